//! Turns a validated architecture into an executable [`CompiledModel`].
//!
//! Parameter initialization is fully determined by the caller-provided seed:
//! He-uniform for relu-family activations, Glorot-uniform for saturating
//! ones, zero biases. The loss is paired from the dataset's task kind; for
//! classification the output layer is compiled down to raw logits so softmax
//! is only ever applied inside the loss (and explicitly at prediction time).

use ndarray::{Array1, Array2, Array4};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use super::activation::Activation;
use super::layers::CanonicalLayer;
use super::network::{CompiledModel, Entry, LayerOp, Loss};
use crate::datasets::{DatasetSpec, TaskKind};

/// Shape inconsistencies the validator did not catch. Reaching this from a
/// validated architecture is a bug, but the compiler re-checks anyway.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct CompileError(pub String);

#[derive(Clone, Copy)]
enum Cursor {
    Spatial {
        channels: usize,
        height: usize,
        width: usize,
    },
    Flat(usize),
}

impl Cursor {
    fn flat(self) -> usize {
        match self {
            Cursor::Flat(n) => n,
            Cursor::Spatial {
                channels,
                height,
                width,
            } => channels * height * width,
        }
    }
}

pub fn compile(
    layers: &[CanonicalLayer],
    spec: &DatasetSpec,
    seed: u64,
) -> Result<CompiledModel, CompileError> {
    let Some(CanonicalLayer::Input { shape }) = layers.first() else {
        return Err(CompileError(
            "architecture does not start with an input layer".to_string(),
        ));
    };
    let input_features: usize = shape.iter().product();
    if input_features == 0 {
        return Err(CompileError("input shape has zero features".to_string()));
    }

    let spatial_dims = match shape.len() {
        0 | 1 => None,
        2 => Some((1, shape[0], shape[1])),
        _ => Some((shape[0], shape[1], shape[2])),
    };

    // Spatial ops at the front of the stack consume the feature rows as
    // images; otherwise the rows are used flat (dense directly on an image
    // dataset implicitly flattens).
    let entry_is_spatial = layers
        .iter()
        .skip(1)
        .find(|l| !matches!(l, CanonicalLayer::Dropout { .. }))
        .map(|l| matches!(l, CanonicalLayer::Conv2d { .. } | CanonicalLayer::MaxPool2d { .. }))
        .unwrap_or(false);

    let (entry, mut cursor) = if entry_is_spatial {
        let (channels, height, width) = spatial_dims.ok_or_else(|| {
            CompileError("spatial layers on a non-spatial input shape".to_string())
        })?;
        (
            Entry::Spatial {
                channels,
                height,
                width,
            },
            Cursor::Spatial {
                channels,
                height,
                width,
            },
        )
    } else {
        (Entry::Flat(input_features), Cursor::Flat(input_features))
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let mut ops = Vec::with_capacity(layers.len() - 1);

    for layer in &layers[1..] {
        match layer {
            CanonicalLayer::Input { .. } => {
                return Err(CompileError("duplicate input layer".to_string()));
            }

            CanonicalLayer::Dense { units, activation } => {
                ops.push(dense_op(&mut rng, cursor.flat(), *units, *activation)?);
                cursor = Cursor::Flat(*units);
            }

            CanonicalLayer::Output { units, activation } => {
                if *units != spec.output_arity {
                    return Err(CompileError(format!(
                        "output layer has {units} units, dataset expects {}",
                        spec.output_arity
                    )));
                }
                // The declared activation only picks the init scheme; the
                // compiled op always emits raw values. Classification pairs
                // with cross-entropy-over-logits, regression with MSE, so
                // softmax is never baked into the forward graph.
                let mut op = dense_op(&mut rng, cursor.flat(), *units, *activation)?;
                if let LayerOp::Dense { activation, .. } = &mut op {
                    *activation = Activation::Linear;
                }
                ops.push(op);
                cursor = Cursor::Flat(*units);
            }

            CanonicalLayer::Conv2d {
                filters,
                kernel,
                activation,
            } => {
                let Cursor::Spatial {
                    channels,
                    height,
                    width,
                } = cursor
                else {
                    return Err(CompileError(
                        "conv2d applied to a flat value".to_string(),
                    ));
                };
                if *kernel == 0 || *kernel > height.min(width) {
                    return Err(CompileError(format!(
                        "conv2d kernel {kernel} does not fit a {height}x{width} input"
                    )));
                }
                let fan_in = channels * kernel * kernel;
                let fan_out = filters * kernel * kernel;
                let limit = init_limit(*activation, fan_in, fan_out);
                let kernels = Array4::from_shape_vec(
                    (*filters, channels, *kernel, *kernel),
                    uniform(&mut rng, filters * channels * kernel * kernel, limit),
                )
                .map_err(|e| CompileError(e.to_string()))?;
                ops.push(LayerOp::Conv2d {
                    kernels,
                    bias: Array1::zeros(*filters),
                    activation: *activation,
                });
                cursor = Cursor::Spatial {
                    channels: *filters,
                    height: height - kernel + 1,
                    width: width - kernel + 1,
                };
            }

            CanonicalLayer::MaxPool2d { pool } => {
                let Cursor::Spatial {
                    channels,
                    height,
                    width,
                } = cursor
                else {
                    return Err(CompileError(
                        "maxpool2d applied to a flat value".to_string(),
                    ));
                };
                if *pool == 0 || height / pool == 0 || width / pool == 0 {
                    return Err(CompileError(format!(
                        "maxpool2d pool {pool} collapses a {height}x{width} input"
                    )));
                }
                ops.push(LayerOp::MaxPool2d { pool: *pool });
                cursor = Cursor::Spatial {
                    channels,
                    height: height / pool,
                    width: width / pool,
                };
            }

            CanonicalLayer::Flatten => {
                ops.push(LayerOp::Flatten);
                cursor = Cursor::Flat(cursor.flat());
            }

            CanonicalLayer::Dropout { rate } => {
                ops.push(LayerOp::Dropout { rate: *rate });
            }
        }
    }

    if cursor.flat() != spec.output_arity {
        return Err(CompileError(format!(
            "network emits {} values, dataset expects {}",
            cursor.flat(),
            spec.output_arity
        )));
    }

    let loss = match spec.task_kind {
        TaskKind::Classification => Loss::SoftmaxCrossEntropy,
        TaskKind::Regression => Loss::MeanSquaredError,
    };

    Ok(CompiledModel {
        ops,
        loss,
        task: spec.task_kind,
        entry,
        input_features,
    })
}

fn dense_op(
    rng: &mut StdRng,
    fan_in: usize,
    units: usize,
    activation: Activation,
) -> Result<LayerOp, CompileError> {
    if fan_in == 0 || units == 0 {
        return Err(CompileError(format!(
            "dense layer has degenerate shape {fan_in}x{units}"
        )));
    }
    let limit = init_limit(activation, fan_in, units);
    let weights = Array2::from_shape_vec((fan_in, units), uniform(rng, fan_in * units, limit))
        .map_err(|e| CompileError(e.to_string()))?;
    Ok(LayerOp::Dense {
        weights,
        bias: Array1::zeros(units),
        activation,
    })
}

/// He-uniform for relu-family activations, Glorot-uniform otherwise.
fn init_limit(activation: Activation, fan_in: usize, fan_out: usize) -> f32 {
    if activation.is_relu_family() {
        (6.0 / fan_in as f32).sqrt()
    } else {
        (6.0 / (fan_in + fan_out) as f32).sqrt()
    }
}

fn uniform(rng: &mut StdRng, len: usize, limit: f32) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-limit..limit)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::DatasetRegistry;
    use crate::model::layers::{validate, InputSize, LayerSpec};
    use ndarray::Array2;

    fn iris_arch() -> Vec<LayerSpec> {
        vec![
            LayerSpec::Input {
                neurons: Some(InputSize::Units(4)),
                position: None,
                activation: None,
            },
            LayerSpec::Hidden {
                neurons: 16,
                activation: "relu".to_string(),
                position: None,
            },
            LayerSpec::Output {
                neurons: 3,
                activation: Some("softmax".to_string()),
                position: None,
            },
        ]
    }

    fn weights_of(model: &CompiledModel) -> Vec<Vec<f32>> {
        model
            .ops
            .iter()
            .filter_map(|op| match op {
                LayerOp::Dense { weights, .. } => Some(weights.iter().copied().collect()),
                LayerOp::Conv2d { kernels, .. } => Some(kernels.iter().copied().collect()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn compilation_is_reproducible_for_a_fixed_seed() {
        let registry = DatasetRegistry::with_builtins();
        let spec = registry.get("iris").unwrap().spec().clone();
        let canonical = validate(&iris_arch(), &spec).unwrap();

        let a = compile(&canonical, &spec, 42).unwrap();
        let b = compile(&canonical, &spec, 42).unwrap();
        assert_eq!(weights_of(&a), weights_of(&b));

        let c = compile(&canonical, &spec, 43).unwrap();
        assert_ne!(weights_of(&a), weights_of(&c));
    }

    #[test]
    fn classification_output_is_compiled_to_raw_logits() {
        let registry = DatasetRegistry::with_builtins();
        let spec = registry.get("iris").unwrap().spec().clone();
        let canonical = validate(&iris_arch(), &spec).unwrap();
        let model = compile(&canonical, &spec, 1).unwrap();

        assert_eq!(model.loss, Loss::SoftmaxCrossEntropy);
        let Some(LayerOp::Dense { activation, .. }) = model.ops.last() else {
            panic!("expected a dense output op");
        };
        // Softmax lives in the loss and the prediction path, never in the
        // forward graph.
        assert_eq!(*activation, Activation::Linear);
    }

    #[test]
    fn he_init_respects_fan_in_bound() {
        let registry = DatasetRegistry::with_builtins();
        let spec = registry.get("iris").unwrap().spec().clone();
        let canonical = validate(&iris_arch(), &spec).unwrap();
        let model = compile(&canonical, &spec, 7).unwrap();

        let LayerOp::Dense { weights, bias, .. } = &model.ops[0] else {
            panic!("expected dense");
        };
        let limit = (6.0_f32 / 4.0).sqrt();
        assert!(weights.iter().all(|w| w.abs() <= limit));
        assert!(bias.iter().all(|&b| b == 0.0));
    }

    #[test]
    fn conv_architecture_compiles_and_runs() {
        let registry = DatasetRegistry::with_builtins();
        let spec = registry.get("glyphs").unwrap().spec().clone();
        let layers = vec![
            LayerSpec::Input {
                neurons: None,
                position: None,
                activation: None,
            },
            LayerSpec::Conv2d {
                filters: 4,
                kernel: 3,
                activation: "relu".to_string(),
                position: None,
            },
            LayerSpec::Maxpool2d {
                pool: 2,
                position: None,
            },
            LayerSpec::Flatten { position: None },
            LayerSpec::Hidden {
                neurons: 16,
                activation: "relu".to_string(),
                position: None,
            },
            LayerSpec::Output {
                neurons: 3,
                activation: None,
                position: None,
            },
        ];
        let canonical = validate(&layers, &spec).unwrap();
        let model = compile(&canonical, &spec, 5).unwrap();

        let x = Array2::zeros((2, 64));
        let logits = model.forward_infer(&x).unwrap();
        assert_eq!(logits.dim(), (2, 3));
    }
}
