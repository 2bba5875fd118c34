//! Executable forward graph and backpropagation.
//!
//! A compiled model is an ordered list of layer operations plus a paired
//! loss. Values flowing through the graph are either flat `[batch, units]`
//! matrices or spatial `[batch, channels, h, w]` tensors; `Flatten` is the
//! only transition between the two. All math is f32 on the CPU.

use ndarray::{Array1, Array2, Array4, Axis};
use rand::rngs::StdRng;
use rand::Rng;
use thiserror::Error;

use super::activation::{softmax_rows, Activation};
use super::optimizer::Optimizer;
use crate::datasets::TaskKind;

/// Internal tensor errors. These indicate a compiler bug rather than bad
/// user input and are surfaced as an unexpected training failure.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("tensor shape mismatch: {0}")]
    Shape(String),
    #[error("parameter buffer is not contiguous")]
    NonContiguous,
}

/// Value flowing between layers.
pub(crate) enum Value {
    Flat(Array2<f32>),
    Spatial(Array4<f32>),
}

impl Value {
    fn into_flat(self) -> Result<Array2<f32>, ModelError> {
        match self {
            Value::Flat(a) => Ok(a),
            Value::Spatial(_) => Err(ModelError::Shape(
                "expected a flat value, found a spatial one".to_string(),
            )),
        }
    }

    fn into_spatial(self) -> Result<Array4<f32>, ModelError> {
        match self {
            Value::Spatial(a) => Ok(a),
            Value::Flat(_) => Err(ModelError::Shape(
                "expected a spatial value, found a flat one".to_string(),
            )),
        }
    }
}

/// One executable operation of the forward graph.
pub(crate) enum LayerOp {
    Dense {
        /// `[fan_in, units]`
        weights: Array2<f32>,
        bias: Array1<f32>,
        activation: Activation,
    },
    Conv2d {
        /// `[filters, in_channels, kernel, kernel]`
        kernels: Array4<f32>,
        bias: Array1<f32>,
        activation: Activation,
    },
    MaxPool2d {
        pool: usize,
    },
    Flatten,
    Dropout {
        rate: f32,
    },
}

/// Per-op state cached by the training forward pass for backprop.
enum TraceStep {
    Dense {
        input: Array2<f32>,
        z: Array2<f32>,
        a: Array2<f32>,
    },
    Conv {
        input: Array4<f32>,
        z: Array4<f32>,
    },
    Pool {
        input_dim: (usize, usize, usize, usize),
        /// Flat `row * width + col` input index of each window maximum.
        argmax: Array4<usize>,
    },
    Flatten {
        dim: (usize, usize, usize, usize),
    },
    DropoutFlat {
        mask: Array2<f32>,
    },
    DropoutSpatial {
        mask: Array4<f32>,
    },
}

/// Parameter gradients per op, aligned with the ops list.
pub(crate) enum OpGrads {
    Dense { dw: Array2<f32>, db: Array1<f32> },
    Conv { dw: Array4<f32>, db: Array1<f32> },
}

/// Loss paired with the network at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Loss {
    /// Numerically stable cross-entropy over raw logits. The forward pass
    /// never applies softmax on the output layer, so it is applied exactly
    /// once, inside this loss (and explicitly at prediction time).
    SoftmaxCrossEntropy,
    MeanSquaredError,
}

impl Loss {
    /// Mean loss over the batch and the gradient with respect to logits.
    pub(crate) fn loss_and_grad(
        &self,
        logits: &Array2<f32>,
        targets: &Array1<f32>,
    ) -> (f32, Array2<f32>) {
        let batch = logits.nrows().max(1) as f32;
        let mut grad = Array2::zeros(logits.raw_dim());
        let mut total = 0.0_f32;

        match self {
            Loss::SoftmaxCrossEntropy => {
                for (i, row) in logits.rows().into_iter().enumerate() {
                    let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                    let lse = max + row.iter().map(|z| (z - max).exp()).sum::<f32>().ln();
                    let target = targets[i] as usize;
                    debug_assert!(target < row.len());
                    total += lse - row[target];
                    for (j, &z) in row.iter().enumerate() {
                        let p = (z - lse).exp();
                        let indicator = if j == target { 1.0 } else { 0.0 };
                        grad[[i, j]] = (p - indicator) / batch;
                    }
                }
            }
            Loss::MeanSquaredError => {
                for i in 0..logits.nrows() {
                    let diff = logits[[i, 0]] - targets[i];
                    total += diff * diff;
                    grad[[i, 0]] = 2.0 * diff / batch;
                }
            }
        }

        (total / batch, grad)
    }
}

/// How the network consumes the flat feature rows it is fed.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Entry {
    Flat(usize),
    Spatial {
        channels: usize,
        height: usize,
        width: usize,
    },
}

/// Executable model: parameters, forward graph, paired loss.
pub struct CompiledModel {
    pub(crate) ops: Vec<LayerOp>,
    pub(crate) loss: Loss,
    pub(crate) task: TaskKind,
    pub(crate) entry: Entry,
    pub(crate) input_features: usize,
}

impl CompiledModel {
    pub fn task(&self) -> TaskKind {
        self.task
    }

    pub fn input_features(&self) -> usize {
        self.input_features
    }

    fn entry_value(&self, x: &Array2<f32>) -> Result<Value, ModelError> {
        if x.ncols() != self.input_features {
            return Err(ModelError::Shape(format!(
                "expected {} input features, got {}",
                self.input_features,
                x.ncols()
            )));
        }
        match self.entry {
            Entry::Flat(_) => Ok(Value::Flat(x.to_owned())),
            Entry::Spatial {
                channels,
                height,
                width,
            } => {
                let batch = x.nrows();
                let spatial = x
                    .to_owned()
                    .into_shape_with_order((batch, channels, height, width))
                    .map_err(|e| ModelError::Shape(e.to_string()))?;
                Ok(Value::Spatial(spatial))
            }
        }
    }

    /// Inference pass: dropout is skipped entirely. Returns raw logits for
    /// classification, predictions for regression.
    pub fn forward_infer(&self, x: &Array2<f32>) -> Result<Array2<f32>, ModelError> {
        let mut value = self.entry_value(x)?;
        for op in &self.ops {
            value = match op {
                LayerOp::Dense {
                    weights,
                    bias,
                    activation,
                } => {
                    let input = value.into_flat()?;
                    let mut z = input.dot(weights);
                    z += bias;
                    Value::Flat(activation.apply(&z))
                }
                LayerOp::Conv2d {
                    kernels,
                    bias,
                    activation,
                } => {
                    let input = value.into_spatial()?;
                    let z = conv_forward(&input, kernels, bias);
                    Value::Spatial(activation.apply_spatial(&z))
                }
                LayerOp::MaxPool2d { pool } => {
                    let input = value.into_spatial()?;
                    let (out, _) = pool_forward(&input, *pool);
                    Value::Spatial(out)
                }
                LayerOp::Flatten => Value::Flat(flatten(value.into_spatial()?)?),
                LayerOp::Dropout { .. } => value,
            };
        }
        value.into_flat()
    }

    /// Training pass: samples dropout masks and caches everything backprop
    /// needs.
    fn forward_train(
        &self,
        x: &Array2<f32>,
        rng: &mut StdRng,
    ) -> Result<(Array2<f32>, Vec<TraceStep>), ModelError> {
        let mut value = self.entry_value(x)?;
        let mut trace = Vec::with_capacity(self.ops.len());

        for op in &self.ops {
            let (next, step) = match op {
                LayerOp::Dense {
                    weights,
                    bias,
                    activation,
                } => {
                    let input = value.into_flat()?;
                    let mut z = input.dot(weights);
                    z += bias;
                    let a = activation.apply(&z);
                    (Value::Flat(a.clone()), TraceStep::Dense { input, z, a })
                }
                LayerOp::Conv2d {
                    kernels,
                    bias,
                    activation,
                } => {
                    let input = value.into_spatial()?;
                    let z = conv_forward(&input, kernels, bias);
                    let a = activation.apply_spatial(&z);
                    (Value::Spatial(a), TraceStep::Conv { input, z })
                }
                LayerOp::MaxPool2d { pool } => {
                    let input = value.into_spatial()?;
                    let input_dim = input.dim();
                    let (out, argmax) = pool_forward(&input, *pool);
                    (Value::Spatial(out), TraceStep::Pool { input_dim, argmax })
                }
                LayerOp::Flatten => {
                    let input = value.into_spatial()?;
                    let dim = input.dim();
                    (Value::Flat(flatten(input)?), TraceStep::Flatten { dim })
                }
                LayerOp::Dropout { rate } => {
                    let keep = 1.0 - rate;
                    match value {
                        Value::Flat(a) => {
                            let mask = a.mapv(|_| {
                                if rng.gen::<f32>() < keep {
                                    1.0 / keep
                                } else {
                                    0.0
                                }
                            });
                            (
                                Value::Flat(&a * &mask),
                                TraceStep::DropoutFlat { mask },
                            )
                        }
                        Value::Spatial(a) => {
                            let mask = a.mapv(|_| {
                                if rng.gen::<f32>() < keep {
                                    1.0 / keep
                                } else {
                                    0.0
                                }
                            });
                            (
                                Value::Spatial(&a * &mask),
                                TraceStep::DropoutSpatial { mask },
                            )
                        }
                    }
                }
            };
            value = next;
            trace.push(step);
        }

        Ok((value.into_flat()?, trace))
    }

    /// Backpropagate a logit gradient through the graph, producing parameter
    /// gradients aligned with `ops`.
    fn backward(
        &self,
        dlogits: Array2<f32>,
        trace: Vec<TraceStep>,
    ) -> Result<Vec<Option<OpGrads>>, ModelError> {
        let mut grads: Vec<Option<OpGrads>> = Vec::with_capacity(self.ops.len());
        grads.resize_with(self.ops.len(), || None);
        let mut grad = Value::Flat(dlogits);

        for (idx, (op, step)) in self.ops.iter().zip(trace).enumerate().rev() {
            grad = match (op, step) {
                (
                    LayerOp::Dense {
                        weights,
                        activation,
                        ..
                    },
                    TraceStep::Dense { input, z, a },
                ) => {
                    let upstream = grad.into_flat()?;
                    let dz = activation.backward(&upstream, &z, &a);
                    let dw = input.t().dot(&dz);
                    let db = dz.sum_axis(Axis(0));
                    let dx = dz.dot(&weights.t());
                    grads[idx] = Some(OpGrads::Dense { dw, db });
                    Value::Flat(dx)
                }
                (
                    LayerOp::Conv2d {
                        kernels,
                        activation,
                        ..
                    },
                    TraceStep::Conv { input, z },
                ) => {
                    let upstream = grad.into_spatial()?;
                    let dz = activation.backward_spatial(&upstream, &z);
                    let (dw, db, dx) = conv_backward(&input, kernels, &dz);
                    grads[idx] = Some(OpGrads::Conv { dw, db });
                    Value::Spatial(dx)
                }
                (LayerOp::MaxPool2d { .. }, TraceStep::Pool { input_dim, argmax }) => {
                    let upstream = grad.into_spatial()?;
                    let mut dx = Array4::zeros(input_dim);
                    let (_, _, _, width) = input_dim;
                    for ((n, c, i, j), &flat) in argmax.indexed_iter() {
                        dx[[n, c, flat / width, flat % width]] += upstream[[n, c, i, j]];
                    }
                    Value::Spatial(dx)
                }
                (LayerOp::Flatten, TraceStep::Flatten { dim }) => {
                    let upstream = grad.into_flat()?;
                    let dx = upstream
                        .into_shape_with_order(dim)
                        .map_err(|e| ModelError::Shape(e.to_string()))?;
                    Value::Spatial(dx)
                }
                (LayerOp::Dropout { .. }, TraceStep::DropoutFlat { mask }) => {
                    Value::Flat(&grad.into_flat()? * &mask)
                }
                (LayerOp::Dropout { .. }, TraceStep::DropoutSpatial { mask }) => {
                    Value::Spatial(&grad.into_spatial()? * &mask)
                }
                _ => {
                    return Err(ModelError::Shape(
                        "trace does not line up with the forward graph".to_string(),
                    ))
                }
            };
        }

        Ok(grads)
    }

    fn apply_gradients(
        &mut self,
        optimizer: &mut Optimizer,
        grads: Vec<Option<OpGrads>>,
    ) -> Result<(), ModelError> {
        for (idx, (op, grad)) in self.ops.iter_mut().zip(grads).enumerate() {
            match (op, grad) {
                (LayerOp::Dense { weights, bias, .. }, Some(OpGrads::Dense { dw, db })) => {
                    step_param(optimizer, idx * 2, weights, &dw)?;
                    step_param(optimizer, idx * 2 + 1, bias, &db)?;
                }
                (LayerOp::Conv2d { kernels, bias, .. }, Some(OpGrads::Conv { dw, db })) => {
                    step_param(optimizer, idx * 2, kernels, &dw)?;
                    step_param(optimizer, idx * 2 + 1, bias, &db)?;
                }
                (_, None) => {}
                _ => {
                    return Err(ModelError::Shape(
                        "gradient does not line up with its op".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// One forward/backward/update cycle over a mini-batch. Returns the mean
    /// batch loss before the update.
    pub fn train_batch(
        &mut self,
        x: &Array2<f32>,
        y: &Array1<f32>,
        optimizer: &mut Optimizer,
        rng: &mut StdRng,
    ) -> Result<f32, ModelError> {
        let (logits, trace) = self.forward_train(x, rng)?;
        let (loss, dlogits) = self.loss.loss_and_grad(&logits, y);
        let grads = self.backward(dlogits, trace)?;
        optimizer.begin_step();
        self.apply_gradients(optimizer, grads)?;
        Ok(loss)
    }

    /// Top-1 accuracy over a labeled slice (classification only).
    pub fn evaluate_accuracy(
        &self,
        x: &Array2<f32>,
        y: &Array1<f32>,
    ) -> Result<f32, ModelError> {
        if x.nrows() == 0 {
            return Ok(0.0);
        }
        let logits = self.forward_infer(x)?;
        let mut correct = 0usize;
        for (i, row) in logits.rows().into_iter().enumerate() {
            if argmax(row.iter().copied()) == y[i] as usize {
                correct += 1;
            }
        }
        Ok(correct as f32 / x.nrows() as f32)
    }

    /// Run a single feature row through the frozen network. For
    /// classification the returned vector holds per-class probabilities;
    /// for regression a single predicted scalar.
    pub fn predict_row(&self, features: &[f32]) -> Result<Vec<f32>, ModelError> {
        let x = Array2::from_shape_vec((1, features.len()), features.to_vec())
            .map_err(|e| ModelError::Shape(e.to_string()))?;
        let out = self.forward_infer(&x)?;
        match self.task {
            TaskKind::Classification => Ok(softmax_rows(&out).row(0).to_vec()),
            TaskKind::Regression => Ok(out.row(0).to_vec()),
        }
    }
}

pub(crate) fn argmax(values: impl Iterator<Item = f32>) -> usize {
    let mut best = 0;
    let mut best_value = f32::NEG_INFINITY;
    for (i, v) in values.enumerate() {
        if v > best_value {
            best = i;
            best_value = v;
        }
    }
    best
}

fn flatten(spatial: Array4<f32>) -> Result<Array2<f32>, ModelError> {
    let (batch, channels, height, width) = spatial.dim();
    spatial
        .into_shape_with_order((batch, channels * height * width))
        .map_err(|e| ModelError::Shape(e.to_string()))
}

fn step_param<D: ndarray::Dimension>(
    optimizer: &mut Optimizer,
    id: usize,
    param: &mut ndarray::Array<f32, D>,
    grad: &ndarray::Array<f32, D>,
) -> Result<(), ModelError> {
    let Some(g) = grad.as_slice() else {
        return Err(ModelError::NonContiguous);
    };
    let Some(p) = param.as_slice_mut() else {
        return Err(ModelError::NonContiguous);
    };
    optimizer.update(id, p, g);
    Ok(())
}

/// Direct convolution, stride 1, valid padding.
fn conv_forward(input: &Array4<f32>, kernels: &Array4<f32>, bias: &Array1<f32>) -> Array4<f32> {
    let (batch, in_channels, height, width) = input.dim();
    let (filters, _, kernel, _) = kernels.dim();
    let out_h = height - kernel + 1;
    let out_w = width - kernel + 1;
    let mut out = Array4::zeros((batch, filters, out_h, out_w));

    for n in 0..batch {
        for f in 0..filters {
            for i in 0..out_h {
                for j in 0..out_w {
                    let mut acc = bias[f];
                    for c in 0..in_channels {
                        for u in 0..kernel {
                            for v in 0..kernel {
                                acc += input[[n, c, i + u, j + v]] * kernels[[f, c, u, v]];
                            }
                        }
                    }
                    out[[n, f, i, j]] = acc;
                }
            }
        }
    }
    out
}

fn conv_backward(
    input: &Array4<f32>,
    kernels: &Array4<f32>,
    dz: &Array4<f32>,
) -> (Array4<f32>, Array1<f32>, Array4<f32>) {
    let (batch, in_channels, _, _) = input.dim();
    let (filters, _, kernel, _) = kernels.dim();
    let (_, _, out_h, out_w) = dz.dim();

    let mut dw = Array4::zeros(kernels.raw_dim());
    let mut db = Array1::zeros(filters);
    let mut dx = Array4::zeros(input.raw_dim());

    for n in 0..batch {
        for f in 0..filters {
            for i in 0..out_h {
                for j in 0..out_w {
                    let g = dz[[n, f, i, j]];
                    if g == 0.0 {
                        continue;
                    }
                    db[f] += g;
                    for c in 0..in_channels {
                        for u in 0..kernel {
                            for v in 0..kernel {
                                dw[[f, c, u, v]] += g * input[[n, c, i + u, j + v]];
                                dx[[n, c, i + u, j + v]] += g * kernels[[f, c, u, v]];
                            }
                        }
                    }
                }
            }
        }
    }
    (dw, db, dx)
}

/// Non-overlapping max pooling; trailing rows/columns that do not fill a
/// window are dropped.
fn pool_forward(input: &Array4<f32>, pool: usize) -> (Array4<f32>, Array4<usize>) {
    let (batch, channels, height, width) = input.dim();
    let out_h = height / pool;
    let out_w = width / pool;
    let mut out = Array4::zeros((batch, channels, out_h, out_w));
    let mut argmax = Array4::zeros((batch, channels, out_h, out_w));

    for n in 0..batch {
        for c in 0..channels {
            for i in 0..out_h {
                for j in 0..out_w {
                    let mut best = f32::NEG_INFINITY;
                    let mut best_flat = 0usize;
                    for u in 0..pool {
                        for v in 0..pool {
                            let row = i * pool + u;
                            let col = j * pool + v;
                            let value = input[[n, c, row, col]];
                            if value > best {
                                best = value;
                                best_flat = row * width + col;
                            }
                        }
                    }
                    out[[n, c, i, j]] = best;
                    argmax[[n, c, i, j]] = best_flat;
                }
            }
        }
    }
    (out, argmax)
}
