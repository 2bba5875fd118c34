use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use crate::error::{ApiError, Result};
use crate::state::AppState;
use crate::templates::{self, Template};

#[derive(Deserialize)]
pub struct TemplateQuery {
    pub dataset_id: Option<String>,
}

/// GET /api/templates?dataset_id=... - Prebuilt architectures.
pub async fn list_templates(
    State(_state): State<AppState>,
    Query(query): Query<TemplateQuery>,
) -> Json<Vec<Template>> {
    Json(templates::for_dataset(query.dataset_id.as_deref()))
}

/// GET /api/templates/{id} - Single template.
pub async fn get_template(
    State(_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Template>> {
    templates::get(&id)
        .map(Json)
        .ok_or(ApiError::TemplateNotFound(id))
}
