use ndarray::{Array2, Array4, Axis};
use serde::{Deserialize, Serialize};

const LEAKY_SLOPE: f32 = 0.01;
const SELU_LAMBDA: f32 = 1.050_701;
const SELU_ALPHA: f32 = 1.673_263_2;
// sqrt(2/pi), used by the tanh approximation of GELU.
const GELU_COEFF: f32 = 0.797_884_6;

/// Activation functions recognized on hidden, convolutional and output
/// layers. The input layer never carries one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Relu,
    Sigmoid,
    Tanh,
    Softmax,
    Linear,
    Elu,
    Selu,
    Softplus,
    Gelu,
    LeakyRelu,
}

impl Activation {
    /// Parse a user-supplied name. Matching is case-insensitive; the
    /// canonical form is lower-case snake_case.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_lowercase().as_str() {
            "relu" => Some(Self::Relu),
            "sigmoid" => Some(Self::Sigmoid),
            "tanh" => Some(Self::Tanh),
            "softmax" => Some(Self::Softmax),
            "linear" => Some(Self::Linear),
            "elu" => Some(Self::Elu),
            "selu" => Some(Self::Selu),
            "softplus" => Some(Self::Softplus),
            "gelu" => Some(Self::Gelu),
            "leaky_relu" => Some(Self::LeakyRelu),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Relu => "relu",
            Self::Sigmoid => "sigmoid",
            Self::Tanh => "tanh",
            Self::Softmax => "softmax",
            Self::Linear => "linear",
            Self::Elu => "elu",
            Self::Selu => "selu",
            Self::Softplus => "softplus",
            Self::Gelu => "gelu",
            Self::LeakyRelu => "leaky_relu",
        }
    }

    /// Whether He-uniform initialization applies to layers using this
    /// activation; saturating activations get Glorot-uniform instead.
    pub fn is_relu_family(&self) -> bool {
        matches!(
            self,
            Self::Relu | Self::LeakyRelu | Self::Elu | Self::Selu | Self::Gelu
        )
    }

    /// Apply elementwise to a scalar. Softmax is the one non-elementwise
    /// case and is handled by [`Activation::apply`] directly.
    fn scalar(&self, x: f32) -> f32 {
        match self {
            Self::Relu => x.max(0.0),
            Self::Sigmoid => sigmoid(x),
            Self::Tanh => x.tanh(),
            Self::Linear => x,
            Self::Elu => {
                if x > 0.0 {
                    x
                } else {
                    x.exp() - 1.0
                }
            }
            Self::Selu => {
                if x > 0.0 {
                    SELU_LAMBDA * x
                } else {
                    SELU_LAMBDA * SELU_ALPHA * (x.exp() - 1.0)
                }
            }
            Self::Softplus => {
                // Stable form: max(x, 0) + ln(1 + e^-|x|)
                x.max(0.0) + (-x.abs()).exp().ln_1p()
            }
            Self::Gelu => {
                let u = GELU_COEFF * (x + 0.044_715 * x * x * x);
                0.5 * x * (1.0 + u.tanh())
            }
            Self::LeakyRelu => {
                if x > 0.0 {
                    x
                } else {
                    LEAKY_SLOPE * x
                }
            }
            Self::Softmax => unreachable!("softmax is applied row-wise"),
        }
    }

    /// Derivative with respect to the pre-activation, evaluated elementwise.
    /// Softmax is excluded; its Jacobian is handled in the backward pass.
    fn scalar_derivative(&self, x: f32) -> f32 {
        match self {
            Self::Relu => {
                if x > 0.0 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Sigmoid => {
                let s = sigmoid(x);
                s * (1.0 - s)
            }
            Self::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            Self::Linear => 1.0,
            Self::Elu => {
                if x > 0.0 {
                    1.0
                } else {
                    x.exp()
                }
            }
            Self::Selu => {
                if x > 0.0 {
                    SELU_LAMBDA
                } else {
                    SELU_LAMBDA * SELU_ALPHA * x.exp()
                }
            }
            Self::Softplus => sigmoid(x),
            Self::Gelu => {
                let u = GELU_COEFF * (x + 0.044_715 * x * x * x);
                let t = u.tanh();
                let du = GELU_COEFF * (1.0 + 3.0 * 0.044_715 * x * x);
                0.5 * (1.0 + t) + 0.5 * x * (1.0 - t * t) * du
            }
            Self::LeakyRelu => {
                if x > 0.0 {
                    1.0
                } else {
                    LEAKY_SLOPE
                }
            }
            Self::Softmax => unreachable!("softmax jacobian is handled by the backward pass"),
        }
    }

    /// Apply the activation to a `[batch, units]` pre-activation matrix,
    /// returning the layer output. Softmax normalizes each row.
    pub fn apply(&self, z: &Array2<f32>) -> Array2<f32> {
        if *self == Self::Softmax {
            return softmax_rows(z);
        }
        z.mapv(|x| self.scalar(x))
    }

    /// Convert an upstream output-gradient into a pre-activation gradient,
    /// given the cached pre-activation `z` (and, for softmax, the cached
    /// output `a`).
    pub fn backward(&self, upstream: &Array2<f32>, z: &Array2<f32>, a: &Array2<f32>) -> Array2<f32> {
        if *self == Self::Softmax {
            // Row-wise softmax Jacobian: dz = s * (g - sum(g * s)).
            let weighted = (upstream * a).sum_axis(Axis(1)).insert_axis(Axis(1));
            return a * &(upstream - &weighted);
        }
        upstream * &z.mapv(|x| self.scalar_derivative(x))
    }

    /// Elementwise application over a `[batch, channels, h, w]` tensor.
    /// Softmax never appears on spatial layers; the validator rejects it.
    pub fn apply_spatial(&self, z: &Array4<f32>) -> Array4<f32> {
        z.mapv(|x| self.scalar(x))
    }

    pub fn backward_spatial(&self, upstream: &Array4<f32>, z: &Array4<f32>) -> Array4<f32> {
        upstream * &z.mapv(|x| self.scalar_derivative(x))
    }
}

#[inline]
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Numerically stable row-wise softmax over `[batch, classes]` logits.
pub fn softmax_rows(logits: &Array2<f32>) -> Array2<f32> {
    let mut out = logits.clone();
    for mut row in out.rows_mut() {
        let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        row.mapv_inplace(|x| (x - max).exp());
        let sum: f32 = row.sum();
        if sum > 0.0 {
            row.mapv_inplace(|x| x / sum);
        }
    }
    out
}
