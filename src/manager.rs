//! Process-wide session manager.
//!
//! Owns the session map, the model-config store and the bounded worker
//! pool. HTTP handlers receive it by dependency injection and only ever see
//! snapshot clones of session state; engines own the live records and
//! communicate back through their control handles and terminal callbacks.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use uuid::Uuid;

use crate::datasets::{DatasetRegistry, Hyperparameters};
use crate::error::{ApiError, Result, ValidationError};
use crate::model::{compile, validate, LayerSpec, OptimizerKind};
use crate::store::SessionStore;
use crate::training::session::lock;
use crate::training::{
    seed_from_session_id, ControlHandle, PredictionOutput, Predictor, SessionStatus,
    TrainingEngine, TrainingSession,
};

/// Upper bound on requested epochs; keeps a typo from parking a worker for
/// hours.
const MAX_EPOCHS: usize = 10_000;

/// A stored model configuration (POST /api/models).
#[derive(Debug, Clone, Serialize)]
pub struct ModelConfig {
    pub id: String,
    pub name: String,
    pub dataset_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub layers: Vec<LayerSpec>,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Optional per-request hyperparameter overrides. Values start from the
/// dataset's recommendations; only explicitly provided fields replace them.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TrainingOverrides {
    pub epochs: Option<usize>,
    pub learning_rate: Option<f32>,
    pub batch_size: Option<usize>,
    pub optimizer: Option<String>,
    pub max_samples: Option<usize>,
}

#[derive(Clone)]
struct SessionEntry {
    state: Arc<Mutex<TrainingSession>>,
    control: Arc<ControlHandle>,
    predictor: Arc<OnceLock<Predictor>>,
}

/// Everything guarded by the one session lock: the entries themselves, the
/// single-active-session index and the terminal LRU order.
#[derive(Default)]
struct SessionTable {
    sessions: HashMap<String, SessionEntry>,
    active_by_model: HashMap<String, String>,
    terminal_order: VecDeque<String>,
}

pub struct SessionManager {
    registry: Arc<DatasetRegistry>,
    sessions: RwLock<SessionTable>,
    models: RwLock<HashMap<String, ModelConfig>>,
    pool: Arc<Semaphore>,
    retention: usize,
    store: Option<Arc<dyn SessionStore>>,
}

impl SessionManager {
    pub fn new(
        registry: Arc<DatasetRegistry>,
        worker_pool_size: usize,
        retention: usize,
        store: Option<Arc<dyn SessionStore>>,
    ) -> Self {
        Self {
            registry,
            sessions: RwLock::new(SessionTable::default()),
            models: RwLock::new(HashMap::new()),
            pool: Arc::new(Semaphore::new(worker_pool_size.max(1))),
            retention,
            store,
        }
    }

    pub fn registry(&self) -> &DatasetRegistry {
        &self.registry
    }

    fn read_table(&self) -> RwLockReadGuard<'_, SessionTable> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_table(&self) -> RwLockWriteGuard<'_, SessionTable> {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Model configurations
    // ------------------------------------------------------------------

    pub fn create_model(
        &self,
        name: String,
        dataset_id: String,
        description: Option<String>,
        layers: Vec<LayerSpec>,
    ) -> Result<ModelConfig> {
        let provider = self
            .registry
            .get(&dataset_id)
            .ok_or_else(|| ApiError::DatasetNotFound(dataset_id.clone()))?;
        validate(&layers, provider.spec())?;

        let config = ModelConfig {
            id: Uuid::new_v4().to_string(),
            name,
            dataset_id,
            description,
            layers,
            status: "created".to_string(),
            created_at: Utc::now(),
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.record_model_config(&config) {
                tracing::warn!(model_id = %config.id, error = %e, "Model config write-through failed");
            }
        }
        self.models
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.id.clone(), config.clone());
        tracing::info!(model_id = %config.id, dataset_id = %config.dataset_id, "Model configuration created");
        Ok(config)
    }

    pub fn get_model(&self, model_id: &str) -> Result<ModelConfig> {
        self.models
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(model_id)
            .cloned()
            .ok_or_else(|| ApiError::ModelNotFound(model_id.to_string()))
    }

    // ------------------------------------------------------------------
    // Session lifecycle
    // ------------------------------------------------------------------

    /// Validate, compile and admit a new training session. Returns the
    /// `pending` snapshot immediately; the engine flips it to `running`
    /// once a worker picks it up.
    pub fn start_training(
        self: &Arc<Self>,
        model_id: &str,
        dataset_id: Option<String>,
        layers: Option<Vec<LayerSpec>>,
        overrides: TrainingOverrides,
    ) -> Result<TrainingSession> {
        // Resolve the model: "new" means an ad-hoc architecture, anything
        // else references a stored configuration whose fields the request
        // may override.
        let (model_id, dataset_id, layers) = if model_id == "new" {
            let dataset_id = dataset_id
                .ok_or_else(|| ApiError::MissingField("dataset_id is required when model_id is \"new\"".to_string()))?;
            let layers = layers
                .ok_or_else(|| ApiError::MissingField("layers are required when model_id is \"new\"".to_string()))?;
            (Uuid::new_v4().to_string(), dataset_id, layers)
        } else {
            let config = self.get_model(model_id)?;
            (
                config.id,
                dataset_id.unwrap_or(config.dataset_id),
                layers.unwrap_or(config.layers),
            )
        };

        let provider = self
            .registry
            .get(&dataset_id)
            .ok_or_else(|| ApiError::DatasetNotFound(dataset_id.clone()))?;
        let spec = provider.spec().clone();

        let canonical = validate(&layers, &spec)?;
        let (hyperparameters, max_samples) =
            resolve_hyperparameters(&spec.recommended, &overrides)?;

        let session_id = Uuid::new_v4().to_string();
        let seed = seed_from_session_id(&session_id);
        let model = compile(&canonical, &spec, seed)
            .map_err(|e| ApiError::Compilation(e.to_string()))?;

        let mut data = provider.load();
        if let Some(max) = max_samples {
            data.truncate_train(max);
        }

        let state = Arc::new(Mutex::new(TrainingSession::new(
            session_id.clone(),
            model_id.clone(),
            dataset_id.clone(),
            hyperparameters.epochs,
        )));
        let control = Arc::new(ControlHandle::new());
        let predictor: Arc<OnceLock<Predictor>> = Arc::new(OnceLock::new());
        let entry = SessionEntry {
            state: Arc::clone(&state),
            control: Arc::clone(&control),
            predictor: Arc::clone(&predictor),
        };

        // The exclusive table lock makes the single-active-session check and
        // the insert atomic: of two concurrent starts for one model, exactly
        // one wins.
        let snapshot = {
            let mut table = self.write_table();
            if let Some(existing) = table.active_by_model.get(&model_id) {
                let live = table
                    .sessions
                    .get(existing)
                    .map(|e| !lock(&e.state).status.is_terminal())
                    .unwrap_or(false);
                if live {
                    return Err(ApiError::ActiveSessionExists {
                        model_id,
                        session_id: existing.clone(),
                    });
                }
                let existing = existing.clone();
                table.active_by_model.remove(&model_id);
                tracing::debug!(session_id = %existing, "Cleared stale active-session marker");
            }
            table.sessions.insert(session_id.clone(), entry);
            table
                .active_by_model
                .insert(model_id.clone(), session_id.clone());
            lock(&state).clone()
        };

        if let Some(store) = &self.store {
            if let Err(e) = store.record_session(&snapshot) {
                tracing::warn!(session_id = %session_id, error = %e, "Session write-through failed");
            }
        }

        let engine = TrainingEngine::new(
            model,
            data,
            hyperparameters,
            seed,
            state,
            control,
            predictor,
            self.store.clone(),
        );

        let manager = Arc::clone(self);
        let semaphore = Arc::clone(&self.pool);
        let spawned_id = session_id.clone();
        tokio::spawn(async move {
            // FIFO admission: the semaphore queue is fair, so sessions run
            // in submission order when the pool is saturated.
            let permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => {
                    manager.fail_session(&spawned_id, "worker pool shut down".to_string());
                    manager.on_session_terminal(&spawned_id);
                    return;
                }
            };
            let outcome = tokio::task::spawn_blocking(move || engine.run()).await;
            drop(permit);
            if let Err(join_error) = outcome {
                tracing::error!(session_id = %spawned_id, error = %join_error, "Training worker aborted");
                manager.fail_session(
                    &spawned_id,
                    format!("UnexpectedInternal: worker aborted: {join_error}"),
                );
            }
            manager.on_session_terminal(&spawned_id);
        });

        metrics::counter!("training_sessions_started_total").increment(1);
        tracing::info!(
            session_id = %session_id,
            model_id = %model_id,
            dataset_id = %dataset_id,
            "Training session admitted"
        );
        Ok(snapshot)
    }

    /// Force a session into `failed`; used when the worker itself dies.
    fn fail_session(&self, session_id: &str, message: String) {
        let Some(entry) = self.read_table().sessions.get(session_id).cloned() else {
            return;
        };
        let snapshot = {
            let mut session = lock(&entry.state);
            if session.status.is_terminal() {
                return;
            }
            session.status = SessionStatus::Failed;
            session.error_message = Some(message);
            session.end_time = Some(Utc::now());
            session.poll_interval_hint_seconds = crate::training::POLL_HINT_TERMINAL_SECS;
            session.clone()
        };
        if let Some(store) = &self.store {
            if let Err(e) = store.record_session(&snapshot) {
                tracing::warn!(session_id = %session_id, error = %e, "Session write-through failed");
            }
        }
    }

    /// Called after an engine's worker task finishes: clears the
    /// single-active marker and applies terminal-session LRU eviction.
    fn on_session_terminal(&self, session_id: &str) {
        let mut table = self.write_table();
        let Some(entry) = table.sessions.get(session_id) else {
            return;
        };
        let model_id = {
            let session = lock(&entry.state);
            session.model_id.clone()
        };
        if table.active_by_model.get(&model_id).map(String::as_str) == Some(session_id) {
            table.active_by_model.remove(&model_id);
        }
        table.terminal_order.push_back(session_id.to_string());
        while table.terminal_order.len() > self.retention {
            if let Some(evicted) = table.terminal_order.pop_front() {
                table.sessions.remove(&evicted);
                tracing::debug!(session_id = %evicted, "Evicted terminal session");
            }
        }
    }

    fn live_entry(&self, session_id: &str) -> Option<SessionEntry> {
        self.read_table().sessions.get(session_id).cloned()
    }

    /// Two-tier read: live snapshot while resident, store fallback for
    /// evicted terminal sessions.
    pub fn get_session(&self, session_id: &str, since_epoch: usize) -> Result<TrainingSession> {
        if let Some(entry) = self.live_entry(session_id) {
            return Ok(lock(&entry.state).snapshot_since(since_epoch));
        }
        if let Some(store) = &self.store {
            match store.load_session(session_id) {
                Ok(Some(session)) => return Ok(session.snapshot_since(since_epoch)),
                Ok(None) => {}
                Err(e) => return Err(ApiError::Internal(e.to_string())),
            }
        }
        Err(ApiError::SessionNotFound(session_id.to_string()))
    }

    /// Snapshot of a session that must exist, live or persisted; used by
    /// the control endpoints after delivering their signal.
    fn control_target(&self, session_id: &str) -> Result<(Option<SessionEntry>, SessionStatus)> {
        if let Some(entry) = self.live_entry(session_id) {
            let status = lock(&entry.state).status;
            return Ok((Some(entry), status));
        }
        // Evicted sessions are terminal by construction.
        let session = self.get_session(session_id, 0)?;
        Ok((None, session.status))
    }

    pub fn pause(&self, session_id: &str) -> Result<TrainingSession> {
        let (entry, status) = self.control_target(session_id)?;
        if status.is_terminal() {
            return Err(ApiError::IllegalTransition(format!(
                "cannot pause session '{session_id}' in terminal state {}",
                status.as_str()
            )));
        }
        if let Some(entry) = entry {
            if status != SessionStatus::Paused {
                entry.control.request_pause();
                tracing::info!(session_id = %session_id, "Pause requested");
            }
        }
        self.get_session(session_id, 0)
    }

    pub fn resume(&self, session_id: &str) -> Result<TrainingSession> {
        let (entry, status) = self.control_target(session_id)?;
        if status.is_terminal() {
            return Err(ApiError::IllegalTransition(format!(
                "cannot resume session '{session_id}' in terminal state {}",
                status.as_str()
            )));
        }
        if let Some(entry) = entry {
            // Also clears a pause that was requested but not yet honored;
            // resume on a running session is a deliberate no-op.
            entry.control.request_resume();
            tracing::info!(session_id = %session_id, "Resume requested");
        }
        self.get_session(session_id, 0)
    }

    pub fn stop(&self, session_id: &str) -> Result<TrainingSession> {
        let (entry, status) = self.control_target(session_id)?;
        if let Some(entry) = entry {
            if !status.is_terminal() {
                entry.control.request_stop();
                tracing::info!(session_id = %session_id, "Stop requested");
            }
        }
        // Stop on an already-terminal session is a no-op success.
        self.get_session(session_id, 0)
    }

    pub fn predict(&self, session_id: &str, inputs: &[f32]) -> Result<PredictionOutput> {
        let entry = self.live_entry(session_id);
        let session = self.get_session(session_id, 0)?;
        if session.status != SessionStatus::Completed {
            return Err(ApiError::SessionNotReady {
                session_id: session_id.to_string(),
                status: session.status.as_str().to_string(),
            });
        }
        // Completed but evicted: the weights are gone (they are never
        // persisted), so the model cannot serve predictions any more.
        let Some(entry) = entry else {
            return Err(ApiError::SessionNotReady {
                session_id: session_id.to_string(),
                status: "evicted".to_string(),
            });
        };
        let predictor = entry
            .predictor
            .get()
            .ok_or_else(|| ApiError::Internal("completed session has no predictor".to_string()))?;
        if inputs.len() != predictor.input_features() {
            return Err(ApiError::Validation(ValidationError::InputShapeMismatch {
                dataset: session.dataset_id.clone(),
                expected: predictor.input_features(),
                found: inputs.len(),
            }));
        }
        let output = predictor
            .predict(inputs)
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        metrics::counter!("predict_requests_total").increment(1);
        Ok(output)
    }

    /// Best-effort drain for process shutdown: signal stop to every live
    /// engine and give them a grace period to reach an epoch boundary.
    pub async fn shutdown(&self, grace: Duration) {
        let handles: Vec<(String, Arc<ControlHandle>)> = {
            let table = self.read_table();
            table
                .sessions
                .iter()
                .filter(|(_, entry)| !lock(&entry.state).status.is_terminal())
                .map(|(id, entry)| (id.clone(), Arc::clone(&entry.control)))
                .collect()
        };
        if handles.is_empty() {
            return;
        }
        tracing::info!(sessions = handles.len(), "Stopping live training sessions");
        for (_, handle) in &handles {
            handle.request_stop();
        }

        let deadline = tokio::time::Instant::now() + grace;
        loop {
            let any_live = {
                let table = self.read_table();
                table
                    .sessions
                    .values()
                    .any(|entry| !lock(&entry.state).status.is_terminal())
            };
            if !any_live {
                tracing::info!("All training sessions reached a terminal state");
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!("Shutdown grace period elapsed with live sessions; abandoning them");
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

}

fn resolve_hyperparameters(
    recommended: &Hyperparameters,
    overrides: &TrainingOverrides,
) -> Result<(Hyperparameters, Option<usize>)> {
    let mut hp = recommended.clone();

    if let Some(epochs) = overrides.epochs {
        if epochs == 0 || epochs > MAX_EPOCHS {
            return Err(ApiError::InvalidHyperparameter(format!(
                "epochs must be within 1..={MAX_EPOCHS}, got {epochs}"
            )));
        }
        hp.epochs = epochs;
    }
    if let Some(learning_rate) = overrides.learning_rate {
        if !learning_rate.is_finite() || learning_rate <= 0.0 {
            return Err(ApiError::InvalidHyperparameter(format!(
                "learning_rate must be a positive finite number, got {learning_rate}"
            )));
        }
        hp.learning_rate = learning_rate;
    }
    if let Some(batch_size) = overrides.batch_size {
        if batch_size == 0 {
            return Err(ApiError::InvalidHyperparameter(
                "batch_size must be at least 1".to_string(),
            ));
        }
        hp.batch_size = batch_size;
    }
    if let Some(raw) = &overrides.optimizer {
        hp.optimizer = OptimizerKind::parse(raw).ok_or_else(|| {
            ApiError::InvalidHyperparameter(format!("unknown optimizer '{raw}'"))
        })?;
    }
    if let Some(max_samples) = overrides.max_samples {
        if max_samples == 0 {
            return Err(ApiError::InvalidHyperparameter(
                "max_samples must be at least 1".to_string(),
            ));
        }
    }

    Ok((hp, overrides.max_samples))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InputSize;
    use std::time::Duration;

    fn manager(worker_pool_size: usize, retention: usize) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            Arc::new(DatasetRegistry::with_builtins()),
            worker_pool_size,
            retention,
            None,
        ))
    }

    fn iris_layers() -> Vec<LayerSpec> {
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

    fn quick_overrides(epochs: usize) -> TrainingOverrides {
        TrainingOverrides {
            epochs: Some(epochs),
            learning_rate: Some(0.01),
            batch_size: Some(16),
            optimizer: Some("adam".to_string()),
            max_samples: Some(100),
        }
    }

    async fn wait_for_terminal(manager: &Arc<SessionManager>, session_id: &str) -> TrainingSession {
        for _ in 0..3000 {
            let session = manager.get_session(session_id, 0).expect("session exists");
            if session.status.is_terminal() {
                return session;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("session {session_id} never reached a terminal state");
    }

    #[tokio::test]
    async fn start_returns_pending_and_completes() {
        let manager = manager(1, 64);
        let session = manager
            .start_training("new", Some("iris".to_string()), Some(iris_layers()), quick_overrides(5))
            .unwrap();
        assert_eq!(session.status, SessionStatus::Pending);
        assert_eq!(session.total_epochs, 5);
        assert!(session.metrics.is_empty());

        let done = wait_for_terminal(&manager, &session.session_id).await;
        assert_eq!(done.status, SessionStatus::Completed);
        assert_eq!(done.metrics.len(), 5);
    }

    #[tokio::test]
    async fn second_start_for_same_model_conflicts() {
        let manager = manager(1, 64);
        let config = manager
            .create_model(
                "iris-mlp".to_string(),
                "iris".to_string(),
                None,
                iris_layers(),
            )
            .unwrap();

        let first = manager
            .start_training(&config.id, None, None, quick_overrides(50))
            .unwrap();
        let second = manager.start_training(&config.id, None, None, quick_overrides(5));
        match second {
            Err(ApiError::ActiveSessionExists { session_id, .. }) => {
                assert_eq!(session_id, first.session_id);
            }
            other => panic!("expected ActiveSessionExists, got {other:?}"),
        }

        // After the first finishes the model is free again.
        manager.stop(&first.session_id).unwrap();
        wait_for_terminal(&manager, &first.session_id).await;
        manager
            .start_training(&config.id, None, None, quick_overrides(2))
            .unwrap();
    }

    #[tokio::test]
    async fn queued_session_can_be_stopped_before_running() {
        let manager = manager(1, 64);
        let busy = manager
            .start_training("new", Some("moons".to_string()), Some(vec![
                LayerSpec::Input { neurons: None, position: None, activation: None },
                LayerSpec::Hidden { neurons: 32, activation: "relu".to_string(), position: None },
                LayerSpec::Output { neurons: 2, activation: None, position: None },
            ]), TrainingOverrides { epochs: Some(200), ..Default::default() })
            .unwrap();
        let queued = manager
            .start_training("new", Some("iris".to_string()), Some(iris_layers()), quick_overrides(5))
            .unwrap();

        // Single worker: the second session is still pending; stop it there.
        manager.stop(&queued.session_id).unwrap();
        let done = wait_for_terminal(&manager, &queued.session_id).await;
        assert_eq!(done.status, SessionStatus::Stopped);
        assert!(done.metrics.is_empty());

        manager.stop(&busy.session_id).unwrap();
        wait_for_terminal(&manager, &busy.session_id).await;
    }

    #[tokio::test]
    async fn control_idempotence_matrix() {
        let manager = manager(1, 64);
        let session = manager
            .start_training("new", Some("iris".to_string()), Some(iris_layers()), quick_overrides(3))
            .unwrap();
        let id = session.session_id.clone();

        // resume on a never-paused session: no-op success.
        manager.resume(&id).unwrap();

        let done = wait_for_terminal(&manager, &id).await;
        assert_eq!(done.status, SessionStatus::Completed);

        // stop on a terminal session: no-op success, state unchanged.
        let stopped = manager.stop(&id).unwrap();
        assert_eq!(stopped.status, SessionStatus::Completed);

        // pause/resume on a terminal session: illegal.
        assert!(matches!(
            manager.pause(&id),
            Err(ApiError::IllegalTransition(_))
        ));
        assert!(matches!(
            manager.resume(&id),
            Err(ApiError::IllegalTransition(_))
        ));
    }

    #[tokio::test]
    async fn predict_requires_completed_state() {
        let manager = manager(1, 64);
        let session = manager
            .start_training("new", Some("iris".to_string()), Some(iris_layers()), quick_overrides(20))
            .unwrap();
        let id = session.session_id.clone();

        match manager.predict(&id, &[0.1, 0.2, 0.3, 0.4]) {
            Err(ApiError::SessionNotReady { .. }) => {}
            other => panic!("expected SessionNotReady, got {other:?}"),
        }

        wait_for_terminal(&manager, &id).await;
        let output = manager.predict(&id, &[0.1, 0.2, 0.3, 0.4]).unwrap();
        assert!(output.probabilities.is_some());

        // Wrong input arity is a validation failure, not a crash.
        assert!(matches!(
            manager.predict(&id, &[0.1, 0.2]),
            Err(ApiError::Validation(ValidationError::InputShapeMismatch { .. }))
        ));
    }

    #[tokio::test]
    async fn terminal_sessions_are_evicted_lru() {
        let manager = manager(1, 1);
        let first = manager
            .start_training("new", Some("iris".to_string()), Some(iris_layers()), quick_overrides(1))
            .unwrap();
        wait_for_terminal(&manager, &first.session_id).await;

        let second = manager
            .start_training("new", Some("iris".to_string()), Some(iris_layers()), quick_overrides(1))
            .unwrap();
        wait_for_terminal(&manager, &second.session_id).await;

        // Retention of one: the older terminal session is gone.
        assert!(matches!(
            manager.get_session(&first.session_id, 0),
            Err(ApiError::SessionNotFound(_))
        ));
        assert!(manager.get_session(&second.session_id, 0).is_ok());
    }

    #[tokio::test]
    async fn lookup_errors_are_typed() {
        let manager = manager(1, 64);
        assert!(matches!(
            manager.start_training("new", Some("imagenet".to_string()), Some(iris_layers()), TrainingOverrides::default()),
            Err(ApiError::DatasetNotFound(_))
        ));
        assert!(matches!(
            manager.get_session("nope", 0),
            Err(ApiError::SessionNotFound(_))
        ));
        assert!(matches!(
            manager.get_model("nope"),
            Err(ApiError::ModelNotFound(_))
        ));
        assert!(matches!(
            manager.start_training("nope", None, None, TrainingOverrides::default()),
            Err(ApiError::ModelNotFound(_))
        ));
    }

    #[tokio::test]
    async fn hyperparameter_overrides_are_validated() {
        let manager = manager(1, 64);
        let bad_lr = manager.start_training(
            "new",
            Some("iris".to_string()),
            Some(iris_layers()),
            TrainingOverrides {
                learning_rate: Some(-0.5),
                ..Default::default()
            },
        );
        assert!(matches!(bad_lr, Err(ApiError::InvalidHyperparameter(_))));

        let bad_optimizer = manager.start_training(
            "new",
            Some("iris".to_string()),
            Some(iris_layers()),
            TrainingOverrides {
                optimizer: Some("lbfgs".to_string()),
                ..Default::default()
            },
        );
        assert!(matches!(
            bad_optimizer,
            Err(ApiError::InvalidHyperparameter(_))
        ));
    }
}
