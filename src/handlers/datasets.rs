use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::datasets::{DatasetSpec, Hyperparameters, TaskKind};
use crate::error::{ApiError, Result};
use crate::state::AppState;

const PREVIEW_MAX: usize = 100;
const PREVIEW_DEFAULT: usize = 10;

#[derive(Serialize)]
pub struct DatasetSummary {
    pub id: String,
    pub name: String,
    pub task_type: TaskKind,
    pub num_samples: usize,
    pub num_features: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
    pub hyperparameters: Hyperparameters,
}

#[derive(Serialize)]
pub struct DatasetDetail {
    #[serde(flatten)]
    pub summary: DatasetSummary,
    pub input_shape: Vec<usize>,
    pub output_shape: Vec<usize>,
}

fn summarize(spec: &DatasetSpec) -> DatasetSummary {
    DatasetSummary {
        id: spec.id.clone(),
        name: spec.name.clone(),
        task_type: spec.task_kind,
        num_samples: spec.num_samples,
        num_features: spec.num_features,
        num_classes: match spec.task_kind {
            TaskKind::Classification => Some(spec.output_arity),
            TaskKind::Regression => None,
        },
        hyperparameters: spec.recommended.clone(),
    }
}

/// GET /api/datasets - All registered datasets.
pub async fn list_datasets(State(state): State<AppState>) -> Json<Vec<DatasetSummary>> {
    let summaries = state
        .manager
        .registry()
        .list()
        .iter()
        .map(summarize)
        .collect();
    Json(summaries)
}

/// GET /api/datasets/{id} - Single dataset descriptor with shapes.
pub async fn get_dataset(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DatasetDetail>> {
    let provider = state
        .manager
        .registry()
        .get(&id)
        .ok_or(ApiError::DatasetNotFound(id))?;
    let spec = provider.spec();
    Ok(Json(DatasetDetail {
        summary: summarize(spec),
        input_shape: spec.input_shape.clone(),
        output_shape: vec![spec.output_arity],
    }))
}

#[derive(Deserialize)]
pub struct PreviewQuery {
    pub num_samples: Option<usize>,
}

#[derive(Serialize)]
pub struct PreviewResponse {
    pub features: Vec<Vec<f32>>,
    pub labels: Vec<serde_json::Value>,
}

/// GET /api/datasets/{id}/preview?num_samples=N - First N training rows.
pub async fn preview_dataset(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<PreviewQuery>,
) -> Result<Json<PreviewResponse>> {
    let requested = query.num_samples.unwrap_or(PREVIEW_DEFAULT);
    if requested == 0 || requested > PREVIEW_MAX {
        return Err(ApiError::InvalidHyperparameter(format!(
            "num_samples must be within 1..={PREVIEW_MAX}, got {requested}"
        )));
    }

    let provider = state
        .manager
        .registry()
        .get(&id)
        .ok_or(ApiError::DatasetNotFound(id))?;
    let task_kind = provider.spec().task_kind;
    let split = provider.load();
    let count = requested.min(split.x_train.nrows());

    let features = split
        .x_train
        .rows()
        .into_iter()
        .take(count)
        .map(|row| row.to_vec())
        .collect();
    let labels = split
        .y_train
        .iter()
        .take(count)
        .map(|&label| match task_kind {
            TaskKind::Classification => serde_json::json!(label as i64),
            TaskKind::Regression => serde_json::json!(label),
        })
        .collect();

    Ok(Json(PreviewResponse { features, labels }))
}
