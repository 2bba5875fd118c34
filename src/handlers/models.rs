use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::manager::{ModelConfig, TrainingOverrides};
use crate::model::LayerSpec;
use crate::state::AppState;
use crate::training::SessionStatus;

#[derive(Deserialize)]
pub struct CreateModelRequest {
    pub name: String,
    pub dataset_id: String,
    pub layers: Vec<LayerSpec>,
    #[serde(default)]
    pub description: Option<String>,
}

/// POST /api/models - Validate and persist a model configuration.
///
/// Body extraction goes through `Result` so a schema mismatch (e.g. an
/// unknown layer `type`) still answers with a `{detail}` body.
pub async fn create_model(
    State(state): State<AppState>,
    payload: std::result::Result<Json<CreateModelRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<ModelConfig>)> {
    let Json(request) = payload?;
    let config = state.manager.create_model(
        request.name,
        request.dataset_id,
        request.description,
        request.layers,
    )?;
    Ok((StatusCode::CREATED, Json(config)))
}

/// GET /api/models/{id} - Stored configuration.
pub async fn get_model(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ModelConfig>> {
    state.manager.get_model(&id).map(Json)
}

#[derive(Deserialize)]
pub struct TrainRequest {
    pub dataset_id: Option<String>,
    pub layers: Option<Vec<LayerSpec>>,
    #[serde(flatten)]
    pub overrides: TrainingOverrides,
}

#[derive(Serialize)]
pub struct TrainResponse {
    pub session_id: String,
    pub status: SessionStatus,
    pub total_epochs: usize,
    pub poll_interval_seconds: f32,
}

/// POST /api/models/{model_id}/train - Admit a training session.
///
/// Returns 202 immediately with the `pending` session; progress is observed
/// through the polling endpoint. `model_id` may be the literal "new" for an
/// ad-hoc architecture, in which case `dataset_id` and `layers` are
/// required.
pub async fn train_model(
    State(state): State<AppState>,
    Path(model_id): Path<String>,
    payload: std::result::Result<Json<TrainRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TrainResponse>)> {
    let Json(request) = payload?;
    let session = state.manager.start_training(
        &model_id,
        request.dataset_id,
        request.layers,
        request.overrides,
    )?;
    Ok((
        StatusCode::ACCEPTED,
        Json(TrainResponse {
            session_id: session.session_id,
            status: session.status,
            total_epochs: session.total_epochs,
            poll_interval_seconds: session.poll_interval_hint_seconds,
        }),
    ))
}
