use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::Json;
use serde::Deserialize;

use crate::error::Result;
use crate::state::AppState;
use crate::training::{PredictionOutput, TrainingSession};

#[derive(Deserialize)]
pub struct StatusQuery {
    pub since_epoch: Option<usize>,
}

/// Snapshots are moving targets; intermediaries must never cache them.
type NoStore<T> = ([(header::HeaderName, &'static str); 1], T);

fn no_store<T>(body: T) -> NoStore<T> {
    ([(header::CACHE_CONTROL, "no-store")], body)
}

/// GET /api/training/{session_id}/status?since_epoch=K - Poll a session.
///
/// `metrics` holds only the epochs after `since_epoch`, keeping repeat poll
/// payloads small; `status` and `current_epoch` always reflect the latest
/// state.
pub async fn session_status(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<StatusQuery>,
) -> Result<NoStore<Json<TrainingSession>>> {
    let snapshot = state
        .manager
        .get_session(&session_id, query.since_epoch.unwrap_or(0))?;
    Ok(no_store(Json(snapshot)))
}

/// POST /api/training/{session_id}/pause
pub async fn pause_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TrainingSession>> {
    state.manager.pause(&session_id).map(Json)
}

/// POST /api/training/{session_id}/resume
pub async fn resume_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TrainingSession>> {
    state.manager.resume(&session_id).map(Json)
}

/// POST /api/training/{session_id}/stop
pub async fn stop_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<TrainingSession>> {
    state.manager.stop(&session_id).map(Json)
}

#[derive(Deserialize)]
pub struct PredictRequest {
    pub inputs: Vec<f32>,
}

/// POST /api/training/{session_id}/predict - Inference against the trained
/// model; only valid once the session has completed.
pub async fn predict(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictionOutput>> {
    let Json(request) = payload?;
    state
        .manager
        .predict(&session_id, &request.inputs)
        .map(Json)
}
