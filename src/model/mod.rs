//! Declarative architectures, validation, compilation and the network math.

pub mod activation;
pub mod compiler;
pub mod layers;
pub mod network;
pub mod optimizer;

pub use activation::Activation;
pub use compiler::{compile, CompileError};
pub use layers::{validate, CanonicalLayer, InputSize, LayerSpec};
pub use network::{CompiledModel, ModelError};
pub use optimizer::{Optimizer, OptimizerKind};
