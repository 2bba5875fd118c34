use std::env;
use std::path::PathBuf;

pub struct Config {
    pub host: String,
    pub port: u16,
    /// Number of training engines allowed to run concurrently. Sessions
    /// beyond this bound queue in `pending` until a worker frees up.
    pub worker_pool_size: usize,
    /// Terminal sessions kept resident per process before LRU eviction.
    pub session_retention: usize,
    /// Comma-separated CORS origins. None means permissive (dev default).
    pub allowed_origins: Option<Vec<String>>,
    /// Path of the SQLite session store. None disables durable persistence.
    pub database_url: Option<PathBuf>,
    pub shutdown_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> anyhow::Result<Self> {
        let worker_pool_size: usize = env::var("WORKER_POOL_SIZE")
            .unwrap_or_else(|_| "1".to_string())
            .parse()?;
        if worker_pool_size == 0 {
            anyhow::bail!("WORKER_POOL_SIZE must be at least 1");
        }

        let allowed_origins = env::var("ALLOWED_ORIGINS").ok().map(|raw| {
            raw.split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect()
        });

        Ok(Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()?,
            worker_pool_size,
            session_retention: env::var("SESSION_RETENTION")
                .unwrap_or_else(|_| "64".to_string())
                .parse()?,
            allowed_origins,
            database_url: env::var("DATABASE_URL").ok().map(PathBuf::from),
            shutdown_timeout_secs: env::var("SHUTDOWN_TIMEOUT")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            worker_pool_size: 1,
            session_retention: 64,
            allowed_origins: None,
            database_url: None,
            shutdown_timeout_secs: 5,
        }
    }
}
