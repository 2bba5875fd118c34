//! Training sessions, engine and control signaling.

pub mod control;
pub mod engine;
pub mod session;

pub use control::{ControlHandle, Directive};
pub use engine::{seed_from_session_id, PredictionOutput, Predictor, TrainingEngine};
pub use session::{
    SessionStatus, TrainingMetric, TrainingSession, POLL_HINT_ACTIVE_SECS,
    POLL_HINT_TERMINAL_SECS,
};
