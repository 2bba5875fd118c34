use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Poll hint handed to clients while the session is live.
pub const POLL_HINT_ACTIVE_SECS: f32 = 1.5;
/// Poll hint once the session has reached a terminal state.
pub const POLL_HINT_TERMINAL_SECS: f32 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Stopped,
    Failed,
}

impl SessionStatus {
    /// Terminal states are absorbing: no transition ever leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// One completed epoch. Accuracy is absent for regression tasks.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingMetric {
    pub epoch: usize,
    pub loss: f32,
    pub accuracy: Option<f32>,
    pub timestamp: DateTime<Utc>,
}

/// Live progress record of one training run. Owned by its engine for the
/// whole run; everyone else sees snapshot clones.
#[derive(Debug, Clone, Serialize)]
pub struct TrainingSession {
    pub session_id: String,
    pub model_id: String,
    pub dataset_id: String,
    pub status: SessionStatus,
    pub total_epochs: usize,
    pub current_epoch: usize,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    /// Append-only, strictly increasing epoch order starting at 1.
    pub metrics: Vec<TrainingMetric>,
    pub error_message: Option<String>,
    pub poll_interval_hint_seconds: f32,
}

impl TrainingSession {
    pub fn new(
        session_id: String,
        model_id: String,
        dataset_id: String,
        total_epochs: usize,
    ) -> Self {
        Self {
            session_id,
            model_id,
            dataset_id,
            status: SessionStatus::Pending,
            total_epochs,
            current_epoch: 0,
            start_time: Utc::now(),
            end_time: None,
            metrics: Vec::new(),
            error_message: None,
            poll_interval_hint_seconds: POLL_HINT_ACTIVE_SECS,
        }
    }

    /// Snapshot with the metrics tail filtered to `epoch > since_epoch`.
    /// Status and `current_epoch` always reflect the full record.
    pub fn snapshot_since(&self, since_epoch: usize) -> TrainingSession {
        let mut snapshot = self.clone();
        if since_epoch > 0 {
            snapshot.metrics.retain(|m| m.epoch > since_epoch);
        }
        snapshot
    }
}

/// Lock helper that shrugs off poisoning: a panicking engine thread must not
/// take the pollers down with it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_are_exactly_three() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::Running,
            SessionStatus::Paused,
        ] {
            assert!(!status.is_terminal());
        }
        for status in [
            SessionStatus::Completed,
            SessionStatus::Stopped,
            SessionStatus::Failed,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            SessionStatus::Pending,
            SessionStatus::Running,
            SessionStatus::Paused,
            SessionStatus::Completed,
            SessionStatus::Stopped,
            SessionStatus::Failed,
        ] {
            assert_eq!(SessionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(SessionStatus::parse("exploded"), None);
    }

    #[test]
    fn snapshot_filters_only_the_metrics_tail() {
        let mut session = TrainingSession::new(
            "s".to_string(),
            "m".to_string(),
            "iris".to_string(),
            10,
        );
        for epoch in 1..=5 {
            session.metrics.push(TrainingMetric {
                epoch,
                loss: 1.0 / epoch as f32,
                accuracy: Some(0.5),
                timestamp: Utc::now(),
            });
        }
        session.current_epoch = 5;

        let snapshot = session.snapshot_since(3);
        assert_eq!(snapshot.current_epoch, 5);
        let epochs: Vec<usize> = snapshot.metrics.iter().map(|m| m.epoch).collect();
        assert_eq!(epochs, vec![4, 5]);

        let full = session.snapshot_since(0);
        assert_eq!(full.metrics.len(), 5);
    }
}
