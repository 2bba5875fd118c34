//! The training engine: one compiled model, one dataset slice, one live
//! session record, driven by a single worker thread for its whole life.
//!
//! The epoch loop honors control signals only at epoch boundaries, appends
//! one metric per epoch under the session lock, and converts numeric
//! failures into a terminal `failed` state instead of letting them escape.
//! Terminal status and final metrics are written (and persisted) before
//! `run` returns, so the manager only learns about completion after the
//! record is consistent.

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

use chrono::Utc;
use ndarray::Axis;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::control::{ControlHandle, Directive};
use super::session::{
    lock, SessionStatus, TrainingMetric, TrainingSession, POLL_HINT_TERMINAL_SECS,
};
use crate::datasets::{DatasetSplit, Hyperparameters, TaskKind};
use crate::model::network::argmax;
use crate::model::{CompiledModel, ModelError, Optimizer};
use crate::store::SessionStore;

/// Mean epoch loss above this value terminates the session as diverged.
pub const LOSS_DIVERGENCE_CEILING: f32 = 1e6;

/// Derive the per-session RNG seed from the opaque session id, so shuffling
/// and initialization are reproducible from the id alone.
pub fn seed_from_session_id(session_id: &str) -> u64 {
    let digest = Sha256::digest(session_id.as_bytes());
    let bytes: [u8; 8] = digest[..8].try_into().unwrap_or_default();
    u64::from_le_bytes(bytes)
}

/// Task-dependent prediction payload.
#[derive(Debug, Clone, Serialize)]
pub struct PredictionOutput {
    pub prediction: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probabilities: Option<Vec<f32>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// Frozen model published by the engine once training completes. Parameters
/// never change afterwards, so concurrent predictions are safe.
pub struct Predictor {
    model: CompiledModel,
}

impl Predictor {
    pub fn input_features(&self) -> usize {
        self.model.input_features()
    }

    pub fn predict(&self, inputs: &[f32]) -> Result<PredictionOutput, ModelError> {
        let values = self.model.predict_row(inputs)?;
        match self.model.task() {
            TaskKind::Classification => {
                let class = argmax(values.iter().copied());
                let confidence = values.get(class).copied().unwrap_or(0.0);
                Ok(PredictionOutput {
                    prediction: serde_json::json!(class),
                    probabilities: Some(values),
                    confidence: Some(confidence),
                })
            }
            TaskKind::Regression => {
                let value = values.first().copied().unwrap_or(f32::NAN);
                Ok(PredictionOutput {
                    prediction: serde_json::json!(value),
                    probabilities: None,
                    confidence: None,
                })
            }
        }
    }
}

/// Serializes all writes to the session record and mirrors them into the
/// optional store. Store failures are logged, never fatal: the live session
/// stays the source of truth.
struct SessionWriter {
    session: Arc<Mutex<TrainingSession>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl SessionWriter {
    fn session_id(&self) -> String {
        lock(&self.session).session_id.clone()
    }

    fn persist(&self, snapshot: &TrainingSession) {
        if let Some(store) = &self.store {
            if let Err(e) = store.record_session(snapshot) {
                tracing::warn!(
                    session_id = %snapshot.session_id,
                    error = %e,
                    "Session write-through failed"
                );
            }
        }
    }

    fn set_status(&self, status: SessionStatus) {
        let snapshot = {
            let mut session = lock(&self.session);
            if session.status.is_terminal() {
                return;
            }
            session.status = status;
            session.clone()
        };
        self.persist(&snapshot);
    }

    fn append_metric(&self, metric: TrainingMetric) {
        let session_id = {
            let mut session = lock(&self.session);
            session.current_epoch = metric.epoch;
            session.metrics.push(metric.clone());
            session.session_id.clone()
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.record_metric(&session_id, &metric) {
                tracing::warn!(
                    session_id = %session_id,
                    epoch = metric.epoch,
                    error = %e,
                    "Metric write-through failed"
                );
            }
        }
    }

    fn finish(&self, status: SessionStatus, error: Option<String>) -> SessionStatus {
        let snapshot = {
            let mut session = lock(&self.session);
            if !session.status.is_terminal() {
                session.status = status;
                session.end_time = Some(Utc::now());
                session.error_message = error;
                session.poll_interval_hint_seconds = POLL_HINT_TERMINAL_SECS;
            }
            session.clone()
        };
        self.persist(&snapshot);

        match snapshot.status {
            SessionStatus::Completed => {
                metrics::counter!("training_sessions_completed_total").increment(1);
            }
            SessionStatus::Stopped => {
                metrics::counter!("training_sessions_stopped_total").increment(1);
            }
            SessionStatus::Failed => {
                metrics::counter!("training_sessions_failed_total").increment(1);
            }
            _ => {}
        }
        tracing::info!(
            session_id = %snapshot.session_id,
            status = snapshot.status.as_str(),
            epochs = snapshot.current_epoch,
            "Training finished"
        );
        snapshot.status
    }
}

pub struct TrainingEngine {
    model: CompiledModel,
    data: DatasetSplit,
    hyperparameters: Hyperparameters,
    seed: u64,
    session: Arc<Mutex<TrainingSession>>,
    control: Arc<ControlHandle>,
    predictor: Arc<OnceLock<Predictor>>,
    store: Option<Arc<dyn SessionStore>>,
}

impl TrainingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        model: CompiledModel,
        data: DatasetSplit,
        hyperparameters: Hyperparameters,
        seed: u64,
        session: Arc<Mutex<TrainingSession>>,
        control: Arc<ControlHandle>,
        predictor: Arc<OnceLock<Predictor>>,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Self {
        Self {
            model,
            data,
            hyperparameters,
            seed,
            session,
            control,
            predictor,
            store,
        }
    }

    /// Execute the full epoch loop. Call exactly once; returns the terminal
    /// status after it has been written to the session record.
    pub fn run(self) -> SessionStatus {
        let TrainingEngine {
            mut model,
            data,
            hyperparameters: hp,
            seed,
            session,
            control,
            predictor,
            store,
        } = self;
        let writer = SessionWriter { session, store };
        let session_id = writer.session_id();

        // A stop that arrived while the session was still queued.
        if control.stop_requested() {
            return writer.finish(SessionStatus::Stopped, None);
        }

        writer.set_status(SessionStatus::Running);
        tracing::info!(
            session_id = %session_id,
            epochs = hp.epochs,
            batch_size = hp.batch_size,
            optimizer = %hp.optimizer,
            samples = data.x_train.nrows(),
            "Training started"
        );

        let mut rng = StdRng::seed_from_u64(seed);
        let mut optimizer = Optimizer::new(hp.optimizer, hp.learning_rate);
        let batch_size = hp.batch_size.max(1);
        let mut indices: Vec<usize> = (0..data.x_train.nrows()).collect();

        for epoch in 1..=hp.epochs {
            let epoch_start = Instant::now();
            indices.shuffle(&mut rng);

            let mut total_loss = 0.0_f32;
            let mut batches = 0usize;
            for chunk in indices.chunks(batch_size) {
                let xb = data.x_train.select(Axis(0), chunk);
                let yb = data.y_train.select(Axis(0), chunk);
                match model.train_batch(&xb, &yb, &mut optimizer, &mut rng) {
                    Ok(loss) => {
                        total_loss += loss;
                        batches += 1;
                    }
                    Err(e) => {
                        return writer.finish(
                            SessionStatus::Failed,
                            Some(format!("UnexpectedInternal: {e}")),
                        );
                    }
                }
            }
            let mean_loss = total_loss / batches.max(1) as f32;

            let accuracy = match model.task() {
                TaskKind::Classification => {
                    match model.evaluate_accuracy(&data.x_test, &data.y_test) {
                        Ok(a) => Some(a),
                        Err(e) => {
                            return writer.finish(
                                SessionStatus::Failed,
                                Some(format!("UnexpectedInternal: {e}")),
                            );
                        }
                    }
                }
                TaskKind::Regression => None,
            };

            // The failing epoch's metric is still recorded so pollers can
            // see what the loss did right before the session died.
            writer.append_metric(TrainingMetric {
                epoch,
                loss: mean_loss,
                accuracy,
                timestamp: Utc::now(),
            });
            metrics::histogram!("training_epoch_duration_seconds")
                .record(epoch_start.elapsed().as_secs_f64());
            tracing::debug!(
                session_id = %session_id,
                epoch,
                loss = mean_loss,
                accuracy = accuracy.unwrap_or(f32::NAN),
                "Epoch finished"
            );

            // Numeric-failure ladder: non-finite first, then divergence.
            if !mean_loss.is_finite() {
                return writer.finish(
                    SessionStatus::Failed,
                    Some(format!(
                        "NumericNaN: average loss was not finite at epoch {epoch}"
                    )),
                );
            }
            if mean_loss > LOSS_DIVERGENCE_CEILING {
                return writer.finish(
                    SessionStatus::Failed,
                    Some(format!(
                        "Diverged: average loss {mean_loss:e} exceeded {LOSS_DIVERGENCE_CEILING:e} at epoch {epoch}"
                    )),
                );
            }

            let directive = control.checkpoint(
                || {
                    tracing::info!(session_id = %session_id, epoch, "Training paused");
                    writer.set_status(SessionStatus::Paused);
                },
                || {
                    tracing::info!(session_id = %session_id, epoch, "Training resumed");
                    writer.set_status(SessionStatus::Running);
                },
            );
            if directive == Directive::Stop {
                return writer.finish(SessionStatus::Stopped, None);
            }
        }

        // Publish the frozen model before the status flips to completed, so
        // any poller that observes `completed` can immediately predict.
        let _ = predictor.set(Predictor { model });
        writer.finish(SessionStatus::Completed, None)
    }
}
