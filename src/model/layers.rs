//! Declarative layer specifications and the architecture validator.
//!
//! `LayerSpec` is the wire form: a closed tagged variant, so unknown layer
//! kinds fail deserialization instead of passing silently. `validate` checks
//! a full list against a dataset and produces the canonical ordered form the
//! compiler consumes. Validation is pure and deterministic.

use serde::{Deserialize, Serialize};

use super::activation::Activation;
use crate::datasets::{DatasetSpec, TaskKind};
use crate::error::ValidationError;

/// Input width: either a flat unit count or a shape tuple.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputSize {
    Units(usize),
    Shape(Vec<usize>),
}

impl InputSize {
    fn flat(&self) -> usize {
        match self {
            InputSize::Units(n) => *n,
            InputSize::Shape(dims) => dims.iter().product(),
        }
    }
}

/// One layer as submitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Input {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        neurons: Option<InputSize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
        /// Always rejected; present so the mistake is reportable instead of
        /// being a silent serde failure.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        activation: Option<String>,
    },
    Hidden {
        neurons: usize,
        activation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    Output {
        neurons: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        activation: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    Dropout {
        rate: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    Conv2d {
        filters: usize,
        kernel: usize,
        activation: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    Maxpool2d {
        pool: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
    Flatten {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        position: Option<usize>,
    },
}

impl LayerSpec {
    fn position(&self) -> Option<usize> {
        match self {
            LayerSpec::Input { position, .. }
            | LayerSpec::Hidden { position, .. }
            | LayerSpec::Output { position, .. }
            | LayerSpec::Dropout { position, .. }
            | LayerSpec::Conv2d { position, .. }
            | LayerSpec::Maxpool2d { position, .. }
            | LayerSpec::Flatten { position } => *position,
        }
    }
}

/// Validated, position-free architecture. Order is the evaluation order;
/// positions have been rewritten to the implicit 0..N-1 range.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum CanonicalLayer {
    Input {
        shape: Vec<usize>,
    },
    Dense {
        units: usize,
        activation: Activation,
    },
    Output {
        units: usize,
        activation: Activation,
    },
    Dropout {
        rate: f32,
    },
    Conv2d {
        filters: usize,
        kernel: usize,
        activation: Activation,
    },
    MaxPool2d {
        pool: usize,
    },
    Flatten,
}

/// Running shape of the value flowing through the stack during validation.
#[derive(Clone, Copy)]
enum Section {
    Spatial { channels: usize, height: usize, width: usize },
    Flat(usize),
}

/// Validate a layer list against a dataset and return the canonical form.
pub fn validate(
    layers: &[LayerSpec],
    spec: &DatasetSpec,
) -> Result<Vec<CanonicalLayer>, ValidationError> {
    if layers.is_empty() {
        return Err(ValidationError::EmptyArchitecture);
    }

    let ordered = order_by_position(layers)?;
    let last = ordered.len() - 1;

    // Exactly one input at 0, exactly one output at N-1.
    let input_count = ordered
        .iter()
        .filter(|l| matches!(l, LayerSpec::Input { .. }))
        .count();
    let output_count = ordered
        .iter()
        .filter(|l| matches!(l, LayerSpec::Output { .. }))
        .count();
    if input_count != 1 || output_count != 1 {
        return Err(ValidationError::MissingInputOrOutput(format!(
            "found {input_count} input and {output_count} output layers"
        )));
    }
    if !matches!(ordered[0], LayerSpec::Input { .. }) {
        return Err(ValidationError::MissingInputOrOutput(
            "input layer is not at position 0".to_string(),
        ));
    }
    if !matches!(ordered[last], LayerSpec::Output { .. }) {
        return Err(ValidationError::MissingInputOrOutput(
            "output layer is not at the final position".to_string(),
        ));
    }

    let mut canonical = Vec::with_capacity(ordered.len());

    // Input layer: no activation, size inferred from the dataset when
    // omitted and cross-checked when declared.
    let LayerSpec::Input {
        neurons,
        activation,
        ..
    } = ordered[0]
    else {
        unreachable!("checked above");
    };
    if activation.is_some() {
        return Err(ValidationError::ActivationOnInput);
    }
    let expected_features: usize = spec.input_shape.iter().product();
    if let Some(size) = neurons {
        if size.flat() != expected_features {
            return Err(ValidationError::InputShapeMismatch {
                dataset: spec.id.clone(),
                expected: expected_features,
                found: size.flat(),
            });
        }
    }
    canonical.push(CanonicalLayer::Input {
        shape: spec.input_shape.clone(),
    });

    let mut section = if spec.is_image() {
        let dims = &spec.input_shape;
        let (channels, height, width) = match dims.len() {
            2 => (1, dims[0], dims[1]),
            _ => (dims[0], dims[1], dims[2]),
        };
        Section::Spatial {
            channels,
            height,
            width,
        }
    } else {
        Section::Flat(expected_features)
    };
    // Set once a conv/pool layer has been seen; a dense layer is then only
    // legal after an explicit flatten.
    let mut seen_spatial_layer = false;
    let mut flattened = false;
    let mut seen_dense = false;

    for (position, layer) in ordered.iter().enumerate().skip(1) {
        match layer {
            LayerSpec::Input { .. } => unreachable!("uniqueness checked above"),

            LayerSpec::Conv2d {
                filters,
                kernel,
                activation,
                ..
            } => {
                if !spec.is_image() {
                    return Err(ValidationError::SpatialOnNonImageDataset {
                        dataset: spec.id.clone(),
                        layer: "conv2d",
                    });
                }
                if flattened || seen_dense {
                    return Err(ValidationError::SpatialAfterFlatten {
                        layer: "conv2d",
                        position,
                    });
                }
                let Section::Spatial {
                    height, width, ..
                } = section
                else {
                    unreachable!("image datasets start spatial");
                };
                if *filters == 0 {
                    return Err(ValidationError::InvalidLayerParameter(format!(
                        "conv2d at position {position} must have at least one filter"
                    )));
                }
                let side = height.min(width);
                if *kernel == 0 || *kernel > side {
                    return Err(ValidationError::InvalidLayerParameter(format!(
                        "conv2d kernel {kernel} at position {position} must be within 1..={side}"
                    )));
                }
                let activation = parse_activation(activation)?;
                if activation == Activation::Softmax {
                    return Err(ValidationError::InvalidLayerParameter(format!(
                        "softmax is not supported on conv2d (position {position})"
                    )));
                }
                section = Section::Spatial {
                    channels: *filters,
                    height: height - kernel + 1,
                    width: width - kernel + 1,
                };
                seen_spatial_layer = true;
                canonical.push(CanonicalLayer::Conv2d {
                    filters: *filters,
                    kernel: *kernel,
                    activation,
                });
            }

            LayerSpec::Maxpool2d { pool, .. } => {
                if !spec.is_image() {
                    return Err(ValidationError::SpatialOnNonImageDataset {
                        dataset: spec.id.clone(),
                        layer: "maxpool2d",
                    });
                }
                if flattened || seen_dense {
                    return Err(ValidationError::SpatialAfterFlatten {
                        layer: "maxpool2d",
                        position,
                    });
                }
                let Section::Spatial {
                    channels,
                    height,
                    width,
                } = section
                else {
                    unreachable!("image datasets start spatial");
                };
                if *pool == 0 || *pool > height.min(width) {
                    return Err(ValidationError::InvalidLayerParameter(format!(
                        "maxpool2d pool {pool} at position {position} exceeds the {height}x{width} input"
                    )));
                }
                section = Section::Spatial {
                    channels,
                    height: height / pool,
                    width: width / pool,
                };
                seen_spatial_layer = true;
                canonical.push(CanonicalLayer::MaxPool2d { pool: *pool });
            }

            LayerSpec::Flatten { .. } => {
                // Redundant flattens (flat data, or repeated) are dropped
                // during canonicalization.
                if seen_spatial_layer && !flattened {
                    flattened = true;
                    if let Section::Spatial {
                        channels,
                        height,
                        width,
                    } = section
                    {
                        section = Section::Flat(channels * height * width);
                    }
                    canonical.push(CanonicalLayer::Flatten);
                }
            }

            LayerSpec::Dropout { rate, .. } => {
                if !(0.0..1.0).contains(rate) {
                    return Err(ValidationError::InvalidLayerParameter(format!(
                        "dropout rate {rate} at position {position} must be within [0, 1)"
                    )));
                }
                canonical.push(CanonicalLayer::Dropout { rate: *rate });
            }

            LayerSpec::Hidden {
                neurons,
                activation,
                ..
            } => {
                if seen_spatial_layer && !flattened {
                    return Err(ValidationError::DenseAfterSpatialWithoutFlatten { position });
                }
                if *neurons == 0 {
                    return Err(ValidationError::InvalidLayerParameter(format!(
                        "hidden layer at position {position} must have at least one neuron"
                    )));
                }
                let activation = parse_activation(activation)?;
                section = Section::Flat(*neurons);
                seen_dense = true;
                canonical.push(CanonicalLayer::Dense {
                    units: *neurons,
                    activation,
                });
            }

            LayerSpec::Output {
                neurons,
                activation,
                ..
            } => {
                if seen_spatial_layer && !flattened {
                    return Err(ValidationError::DenseAfterSpatialWithoutFlatten { position });
                }
                if *neurons != spec.output_arity {
                    return Err(ValidationError::OutputArityMismatch {
                        dataset: spec.id.clone(),
                        expected: spec.output_arity,
                        found: *neurons,
                    });
                }
                let activation = match activation {
                    None => match spec.task_kind {
                        TaskKind::Classification => Activation::Softmax,
                        TaskKind::Regression => Activation::Linear,
                    },
                    Some(raw) => {
                        let parsed = parse_activation(raw)?;
                        let permitted = match spec.task_kind {
                            TaskKind::Classification => {
                                matches!(parsed, Activation::Softmax | Activation::Linear)
                            }
                            TaskKind::Regression => parsed == Activation::Linear,
                        };
                        if !permitted {
                            return Err(ValidationError::ActivationNotPermittedOnOutput(
                                parsed.name().to_string(),
                            ));
                        }
                        parsed
                    }
                };
                canonical.push(CanonicalLayer::Output {
                    units: spec.output_arity,
                    activation,
                });
            }
        }
    }

    Ok(canonical)
}

/// Re-order by declared positions, or keep list order when none are given.
/// Declared positions must cover 0..N-1 exactly.
fn order_by_position(layers: &[LayerSpec]) -> Result<Vec<&LayerSpec>, ValidationError> {
    let declared = layers.iter().filter(|l| l.position().is_some()).count();
    if declared == 0 {
        return Ok(layers.iter().collect());
    }
    if declared != layers.len() {
        return Err(ValidationError::PositionGap(
            "either every layer declares a position or none does".to_string(),
        ));
    }

    let mut slots: Vec<Option<&LayerSpec>> = vec![None; layers.len()];
    for layer in layers {
        let position = layer.position().unwrap_or_default();
        if position >= layers.len() {
            return Err(ValidationError::PositionGap(format!(
                "position {position} is outside 0..{}",
                layers.len()
            )));
        }
        if slots[position].is_some() {
            return Err(ValidationError::PositionGap(format!(
                "position {position} is declared twice"
            )));
        }
        slots[position] = Some(layer);
    }
    // Every slot filled follows from the pigeonhole above, but keep the
    // check as the actual gap report.
    slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| ValidationError::PositionGap(format!("no layer at position {i}")))
        })
        .collect()
}

fn parse_activation(raw: &str) -> Result<Activation, ValidationError> {
    Activation::parse(raw).ok_or_else(|| ValidationError::UnknownActivation(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{DatasetRegistry, DatasetSpec};

    fn iris_spec() -> DatasetSpec {
        DatasetRegistry::with_builtins()
            .get("iris")
            .unwrap()
            .spec()
            .clone()
    }

    fn glyphs_spec() -> DatasetSpec {
        DatasetRegistry::with_builtins()
            .get("glyphs")
            .unwrap()
            .spec()
            .clone()
    }

    fn input() -> LayerSpec {
        LayerSpec::Input {
            neurons: None,
            position: None,
            activation: None,
        }
    }

    fn hidden(neurons: usize, activation: &str) -> LayerSpec {
        LayerSpec::Hidden {
            neurons,
            activation: activation.to_string(),
            position: None,
        }
    }

    fn output(neurons: usize, activation: Option<&str>) -> LayerSpec {
        LayerSpec::Output {
            neurons,
            activation: activation.map(str::to_string),
            position: None,
        }
    }

    #[test]
    fn unknown_layer_kind_fails_deserialization() {
        let raw = r#"[{"type": "attention", "heads": 8}]"#;
        assert!(serde_json::from_str::<Vec<LayerSpec>>(raw).is_err());
    }

    #[test]
    fn empty_architecture_is_rejected() {
        assert_eq!(
            validate(&[], &iris_spec()),
            Err(ValidationError::EmptyArchitecture)
        );
    }

    #[test]
    fn missing_output_is_rejected() {
        let err = validate(&[input(), hidden(8, "relu")], &iris_spec()).unwrap_err();
        assert!(matches!(err, ValidationError::MissingInputOrOutput(_)));
    }

    #[test]
    fn activation_on_input_is_rejected() {
        let layers = [
            LayerSpec::Input {
                neurons: None,
                position: None,
                activation: Some("relu".to_string()),
            },
            output(3, Some("softmax")),
        ];
        assert_eq!(
            validate(&layers, &iris_spec()),
            Err(ValidationError::ActivationOnInput)
        );
    }

    #[test]
    fn output_arity_mismatch_is_rejected() {
        let layers = [input(), hidden(16, "relu"), output(5, Some("softmax"))];
        let err = validate(&layers, &iris_spec()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::OutputArityMismatch {
                expected: 3,
                found: 5,
                ..
            }
        ));
    }

    #[test]
    fn unknown_activation_is_rejected() {
        let layers = [input(), hidden(16, "swish"), output(3, None)];
        assert_eq!(
            validate(&layers, &iris_spec()),
            Err(ValidationError::UnknownActivation("swish".to_string()))
        );
    }

    #[test]
    fn spatial_layer_on_tabular_dataset_is_rejected() {
        let layers = [
            input(),
            LayerSpec::Conv2d {
                filters: 4,
                kernel: 3,
                activation: "relu".to_string(),
                position: None,
            },
            output(3, None),
        ];
        let err = validate(&layers, &iris_spec()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::SpatialOnNonImageDataset { layer: "conv2d", .. }
        ));
    }

    #[test]
    fn dense_after_conv_without_flatten_is_rejected() {
        let layers = [
            input(),
            LayerSpec::Conv2d {
                filters: 4,
                kernel: 3,
                activation: "relu".to_string(),
                position: None,
            },
            hidden(16, "relu"),
            LayerSpec::Flatten { position: None },
            output(3, None),
        ];
        let err = validate(&layers, &glyphs_spec()).unwrap_err();
        assert_eq!(
            err,
            ValidationError::DenseAfterSpatialWithoutFlatten { position: 2 }
        );
    }

    #[test]
    fn conv_stack_with_flatten_canonicalizes() {
        let layers = [
            input(),
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
            hidden(16, "relu"),
            output(3, None),
        ];
        let canonical = validate(&layers, &glyphs_spec()).unwrap();
        assert_eq!(canonical.len(), 6);
        assert!(matches!(canonical[3], CanonicalLayer::Flatten));
        assert!(matches!(
            canonical[5],
            CanonicalLayer::Output {
                units: 3,
                activation: Activation::Softmax
            }
        ));
    }

    #[test]
    fn oversized_kernel_is_rejected() {
        let layers = [
            input(),
            LayerSpec::Conv2d {
                filters: 4,
                kernel: 9,
                activation: "relu".to_string(),
                position: None,
            },
            LayerSpec::Flatten { position: None },
            output(3, None),
        ];
        let err = validate(&layers, &glyphs_spec()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidLayerParameter(_)));
    }

    #[test]
    fn positions_are_honored_and_gaps_rejected() {
        let layers = [
            LayerSpec::Output {
                neurons: 3,
                activation: None,
                position: Some(2),
            },
            LayerSpec::Input {
                neurons: None,
                position: Some(0),
                activation: None,
            },
            LayerSpec::Hidden {
                neurons: 8,
                activation: "tanh".to_string(),
                position: Some(1),
            },
        ];
        let canonical = validate(&layers, &iris_spec()).unwrap();
        assert!(matches!(canonical[1], CanonicalLayer::Dense { units: 8, .. }));

        let gapped = [
            LayerSpec::Input {
                neurons: None,
                position: Some(0),
                activation: None,
            },
            LayerSpec::Output {
                neurons: 3,
                activation: None,
                position: Some(2),
            },
        ];
        let err = validate(&gapped, &iris_spec()).unwrap_err();
        assert!(matches!(err, ValidationError::PositionGap(_)));
    }

    #[test]
    fn input_size_mismatch_is_rejected() {
        let layers = [
            LayerSpec::Input {
                neurons: Some(InputSize::Units(7)),
                position: None,
                activation: None,
            },
            output(3, None),
        ];
        let err = validate(&layers, &iris_spec()).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InputShapeMismatch {
                expected: 4,
                found: 7,
                ..
            }
        ));
    }

    #[test]
    fn dropout_rate_bounds_are_enforced() {
        let layers = [
            input(),
            LayerSpec::Dropout {
                rate: 1.0,
                position: None,
            },
            output(3, None),
        ];
        let err = validate(&layers, &iris_spec()).unwrap_err();
        assert!(matches!(err, ValidationError::InvalidLayerParameter(_)));
    }

    #[test]
    fn regression_output_defaults_to_linear() {
        let spec = DatasetRegistry::with_builtins()
            .get("ripple")
            .unwrap()
            .spec()
            .clone();
        let canonical = validate(&[input(), hidden(8, "tanh"), output(1, None)], &spec).unwrap();
        assert!(matches!(
            canonical[2],
            CanonicalLayer::Output {
                units: 1,
                activation: Activation::Linear
            }
        ));

        let err = validate(&[input(), output(1, Some("softmax"))], &spec).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::ActivationNotPermittedOnOutput(_)
        ));
    }

    #[test]
    fn validation_is_deterministic() {
        let layers = [input(), hidden(16, "RELU"), output(3, Some("Softmax"))];
        let a = validate(&layers, &iris_spec()).unwrap();
        let b = validate(&layers, &iris_spec()).unwrap();
        assert_eq!(a, b);
        // Canonicalization lower-cased the activations.
        assert!(matches!(
            a[1],
            CanonicalLayer::Dense {
                activation: Activation::Relu,
                ..
            }
        ));
    }
}
