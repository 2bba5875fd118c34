use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Recognized gradient-descent update rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptimizerKind {
    Adam,
    Sgd,
    Rmsprop,
    Adagrad,
}

impl OptimizerKind {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "adam" => Some(Self::Adam),
            "sgd" => Some(Self::Sgd),
            "rmsprop" => Some(Self::Rmsprop),
            "adagrad" => Some(Self::Adagrad),
            _ => None,
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Adam => "adam",
            Self::Sgd => "sgd",
            Self::Rmsprop => "rmsprop",
            Self::Adagrad => "adagrad",
        };
        f.write_str(name)
    }
}

const ADAM_BETA1: f32 = 0.9;
const ADAM_BETA2: f32 = 0.999;
const RMSPROP_DECAY: f32 = 0.9;
const EPSILON: f32 = 1e-8;

/// Per-parameter-buffer accumulator state. `first` holds momentum-style
/// running means, `second` holds squared-gradient accumulators; SGD uses
/// neither.
struct ParamState {
    first: Vec<f32>,
    second: Vec<f32>,
}

/// Stateful optimizer applying one update rule across all parameter buffers
/// of a network. Buffers are identified by a stable index assigned by the
/// caller, so state survives across batches and epochs.
pub struct Optimizer {
    kind: OptimizerKind,
    learning_rate: f32,
    step: u64,
    state: HashMap<usize, ParamState>,
}

impl Optimizer {
    pub fn new(kind: OptimizerKind, learning_rate: f32) -> Self {
        Self {
            kind,
            learning_rate,
            step: 0,
            state: HashMap::new(),
        }
    }

    /// Advance the global step counter. Call once per mini-batch, before the
    /// per-buffer updates; Adam's bias correction depends on it.
    pub fn begin_step(&mut self) {
        self.step += 1;
    }

    /// Apply one update to a single parameter buffer in place.
    pub fn update(&mut self, param_id: usize, param: &mut [f32], grad: &[f32]) {
        debug_assert_eq!(param.len(), grad.len());

        if self.kind == OptimizerKind::Sgd {
            for (p, g) in param.iter_mut().zip(grad) {
                *p -= self.learning_rate * g;
            }
            return;
        }

        let state = self.state.entry(param_id).or_insert_with(|| ParamState {
            first: vec![0.0; param.len()],
            second: vec![0.0; param.len()],
        });

        match self.kind {
            OptimizerKind::Sgd => unreachable!("handled above"),
            OptimizerKind::Adam => {
                let t = self.step.max(1) as i32;
                let bias1 = 1.0 - ADAM_BETA1.powi(t);
                let bias2 = 1.0 - ADAM_BETA2.powi(t);
                for i in 0..param.len() {
                    let g = grad[i];
                    state.first[i] = ADAM_BETA1 * state.first[i] + (1.0 - ADAM_BETA1) * g;
                    state.second[i] = ADAM_BETA2 * state.second[i] + (1.0 - ADAM_BETA2) * g * g;
                    let m_hat = state.first[i] / bias1;
                    let v_hat = state.second[i] / bias2;
                    param[i] -= self.learning_rate * m_hat / (v_hat.sqrt() + EPSILON);
                }
            }
            OptimizerKind::Rmsprop => {
                for i in 0..param.len() {
                    let g = grad[i];
                    state.second[i] =
                        RMSPROP_DECAY * state.second[i] + (1.0 - RMSPROP_DECAY) * g * g;
                    param[i] -= self.learning_rate * g / (state.second[i].sqrt() + EPSILON);
                }
            }
            OptimizerKind::Adagrad => {
                for i in 0..param.len() {
                    let g = grad[i];
                    state.second[i] += g * g;
                    param[i] -= self.learning_rate * g / (state.second[i].sqrt() + EPSILON);
                }
            }
        }
    }
}
