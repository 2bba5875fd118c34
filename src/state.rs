use std::sync::Arc;

use crate::config::Config;
use crate::datasets::DatasetRegistry;
use crate::manager::SessionManager;
use crate::store::{SessionStore, SqliteStore};

/// Application state shared across all request handlers. The handlers are
/// stateless adapters; everything lives behind the session manager.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<SessionManager>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Initialize application state: built-in datasets, the optional SQLite
    /// store (with restart recovery) and the session manager.
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let registry = Arc::new(DatasetRegistry::with_builtins());
        tracing::info!(datasets = registry.list().len(), "Dataset registry initialized");

        let store: Option<Arc<dyn SessionStore>> = match &config.database_url {
            Some(path) => {
                let store = SqliteStore::open(path)?;
                // Live engines are never persisted; whatever was running
                // when the previous process died cannot be resumed.
                let interrupted = store.mark_interrupted()?;
                if interrupted > 0 {
                    tracing::warn!(
                        sessions = interrupted,
                        "Marked interrupted sessions as failed after restart"
                    );
                }
                tracing::info!(path = %path.display(), "Session store opened");
                Some(Arc::new(store))
            }
            None => None,
        };

        let manager = Arc::new(SessionManager::new(
            registry,
            config.worker_pool_size,
            config.session_retention,
            store,
        ));
        tracing::info!(
            workers = config.worker_pool_size,
            retention = config.session_retention,
            "Session manager initialized"
        );

        Ok(Self {
            manager,
            config: Arc::new(config),
        })
    }
}
