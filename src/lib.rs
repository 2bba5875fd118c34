//! Neuroforge - training-session orchestrator for declarative feed-forward
//! neural networks.
//!
//! This library exposes the core components for the orchestration service,
//! enabling integration tests and potential embedding in other applications.

pub mod config;
pub mod datasets;
pub mod error;
pub mod handlers;
pub mod manager;
pub mod model;
pub mod state;
pub mod store;
pub mod templates;
pub mod training;

use axum::routing::{get, post};
use axum::Router;

// Re-export key types for convenience
pub use config::Config;
pub use error::{ApiError, Result, ValidationError};
pub use manager::{ModelConfig, SessionManager, TrainingOverrides};
pub use state::AppState;
pub use training::{SessionStatus, TrainingSession};

/// The full API router, shared between the server binary and the
/// integration tests so both exercise identical routing.
pub fn api_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/api/datasets", get(handlers::list_datasets))
        .route("/api/datasets/:id", get(handlers::get_dataset))
        .route("/api/datasets/:id/preview", get(handlers::preview_dataset))
        .route("/api/templates", get(handlers::list_templates))
        .route("/api/templates/:id", get(handlers::get_template))
        .route("/api/models", post(handlers::create_model))
        .route("/api/models/:model_id", get(handlers::get_model))
        .route("/api/models/:model_id/train", post(handlers::train_model))
        .route(
            "/api/training/:session_id/status",
            get(handlers::session_status),
        )
        .route(
            "/api/training/:session_id/pause",
            post(handlers::pause_session),
        )
        .route(
            "/api/training/:session_id/resume",
            post(handlers::resume_session),
        )
        .route(
            "/api/training/:session_id/stop",
            post(handlers::stop_session),
        )
        .route("/api/training/:session_id/predict", post(handlers::predict))
        .with_state(state)
}
