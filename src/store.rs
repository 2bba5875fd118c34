//! Durable write-through persistence of model configs, sessions and metrics.
//!
//! The store is optional: without `DATABASE_URL` the process runs purely
//! in-memory and nothing here is touched. When enabled, the live session
//! remains the source of truth; the store only matters for evicted terminal
//! sessions and for marking interrupted runs after a restart. Engine
//! weights are never persisted.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::manager::ModelConfig;
use crate::training::session::lock;
use crate::training::{
    SessionStatus, TrainingMetric, TrainingSession, POLL_HINT_ACTIVE_SECS,
    POLL_HINT_TERMINAL_SECS,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub trait SessionStore: Send + Sync {
    fn record_model_config(&self, config: &ModelConfig) -> Result<(), StoreError>;
    fn record_session(&self, session: &TrainingSession) -> Result<(), StoreError>;
    fn record_metric(&self, session_id: &str, metric: &TrainingMetric) -> Result<(), StoreError>;
    fn load_session(&self, session_id: &str) -> Result<Option<TrainingSession>, StoreError>;
    /// Mark every session left non-terminal by a previous process as failed.
    /// Returns how many rows were touched.
    fn mark_interrupted(&self) -> Result<usize, StoreError>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS model_configs (
                 id          TEXT PRIMARY KEY,
                 name        TEXT NOT NULL,
                 dataset_id  TEXT NOT NULL,
                 description TEXT,
                 layers_json TEXT NOT NULL,
                 status      TEXT NOT NULL,
                 created_at  TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS training_sessions (
                 session_id    TEXT PRIMARY KEY,
                 model_id      TEXT NOT NULL,
                 dataset_id    TEXT NOT NULL,
                 status        TEXT NOT NULL,
                 total_epochs  INTEGER NOT NULL,
                 current_epoch INTEGER NOT NULL,
                 start_time    TEXT NOT NULL,
                 end_time      TEXT,
                 error_message TEXT
             );
             CREATE TABLE IF NOT EXISTS training_metrics (
                 session_id TEXT NOT NULL,
                 epoch      INTEGER NOT NULL,
                 loss       REAL,
                 accuracy   REAL,
                 timestamp  TEXT NOT NULL,
                 PRIMARY KEY (session_id, epoch)
             );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("bad timestamp '{raw}': {e}")))
}

impl SessionStore for SqliteStore {
    fn record_model_config(&self, config: &ModelConfig) -> Result<(), StoreError> {
        let layers_json = serde_json::to_string(&config.layers)?;
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO model_configs
                 (id, name, dataset_id, description, layers_json, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                config.id,
                config.name,
                config.dataset_id,
                config.description,
                layers_json,
                config.status,
                config.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn record_session(&self, session: &TrainingSession) -> Result<(), StoreError> {
        let conn = lock(&self.conn);
        conn.execute(
            "INSERT OR REPLACE INTO training_sessions
                 (session_id, model_id, dataset_id, status, total_epochs,
                  current_epoch, start_time, end_time, error_message)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                session.session_id,
                session.model_id,
                session.dataset_id,
                session.status.as_str(),
                session.total_epochs as i64,
                session.current_epoch as i64,
                session.start_time.to_rfc3339(),
                session.end_time.map(|t| t.to_rfc3339()),
                session.error_message,
            ],
        )?;
        Ok(())
    }

    fn record_metric(&self, session_id: &str, metric: &TrainingMetric) -> Result<(), StoreError> {
        let conn = lock(&self.conn);
        // SQLite has no NaN; a non-finite loss is stored as NULL and read
        // back as NaN.
        let loss = if metric.loss.is_finite() {
            Some(metric.loss as f64)
        } else {
            None
        };
        conn.execute(
            "INSERT OR REPLACE INTO training_metrics
                 (session_id, epoch, loss, accuracy, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                session_id,
                metric.epoch as i64,
                loss,
                metric.accuracy.map(|a| a as f64),
                metric.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn load_session(&self, session_id: &str) -> Result<Option<TrainingSession>, StoreError> {
        let conn = lock(&self.conn);
        let row: Option<(String, String, String, i64, i64, String, Option<String>, Option<String>)> =
            conn.query_row(
                "SELECT model_id, dataset_id, status, total_epochs, current_epoch,
                        start_time, end_time, error_message
                 FROM training_sessions WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok((
                        row.get(0)?,
                        row.get(1)?,
                        row.get(2)?,
                        row.get(3)?,
                        row.get(4)?,
                        row.get(5)?,
                        row.get(6)?,
                        row.get(7)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            model_id,
            dataset_id,
            status_raw,
            total_epochs,
            current_epoch,
            start_raw,
            end_raw,
            error_message,
        )) = row
        else {
            return Ok(None);
        };

        let status = SessionStatus::parse(&status_raw)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown status '{status_raw}'")))?;

        let mut statement = conn.prepare(
            "SELECT epoch, loss, accuracy, timestamp
             FROM training_metrics WHERE session_id = ?1 ORDER BY epoch ASC",
        )?;
        let rows = statement.query_map(params![session_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<f64>>(1)?,
                row.get::<_, Option<f64>>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut metrics = Vec::new();
        for row in rows {
            let (epoch, loss, accuracy, timestamp_raw) = row?;
            metrics.push(TrainingMetric {
                epoch: epoch as usize,
                loss: loss.map(|l| l as f32).unwrap_or(f32::NAN),
                accuracy: accuracy.map(|a| a as f32),
                timestamp: parse_timestamp(&timestamp_raw)?,
            });
        }

        let end_time = end_raw.as_deref().map(parse_timestamp).transpose()?;
        Ok(Some(TrainingSession {
            session_id: session_id.to_string(),
            model_id,
            dataset_id,
            status,
            total_epochs: total_epochs as usize,
            current_epoch: current_epoch as usize,
            start_time: parse_timestamp(&start_raw)?,
            end_time,
            metrics,
            error_message,
            poll_interval_hint_seconds: if status.is_terminal() {
                POLL_HINT_TERMINAL_SECS
            } else {
                POLL_HINT_ACTIVE_SECS
            },
        }))
    }

    fn mark_interrupted(&self) -> Result<usize, StoreError> {
        let conn = lock(&self.conn);
        let changed = conn.execute(
            "UPDATE training_sessions
             SET status = 'failed', error_message = 'process restart', end_time = ?1
             WHERE status NOT IN ('completed', 'stopped', 'failed')",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(changed)
    }
}
