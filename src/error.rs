use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Architecture validation failures, produced before any model is built.
///
/// Validation is pure: the same layer list and dataset spec always produce
/// the same result, so every variant carries enough context to explain
/// itself without further lookups.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("architecture is empty")]
    EmptyArchitecture,

    #[error("architecture must have exactly one input layer first and one output layer last: {0}")]
    MissingInputOrOutput(String),

    #[error("layer positions must form a contiguous 0..N-1 range: {0}")]
    PositionGap(String),

    #[error("input layer must not declare an activation")]
    ActivationOnInput,

    #[error("dataset '{dataset}' is not an image dataset; {layer} layers require a spatial input shape")]
    SpatialOnNonImageDataset { dataset: String, layer: &'static str },

    #[error("dense layer at position {position} follows a spatial layer without an intervening flatten")]
    DenseAfterSpatialWithoutFlatten { position: usize },

    #[error("{layer} layer at position {position} must come before the flattened dense section")]
    SpatialAfterFlatten { layer: &'static str, position: usize },

    #[error("output layer declares {found} units but dataset '{dataset}' expects {expected}")]
    OutputArityMismatch {
        dataset: String,
        expected: usize,
        found: usize,
    },

    #[error("input layer declares {found} units but dataset '{dataset}' provides {expected}")]
    InputShapeMismatch {
        dataset: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown activation '{0}'")]
    UnknownActivation(String),

    #[error("activation '{0}' is not permitted on the output layer for this task")]
    ActivationNotPermittedOnOutput(String),

    #[error("invalid layer parameter: {0}")]
    InvalidLayerParameter(String),
}

/// Errors surfaced through the HTTP layer. Every variant maps to exactly one
/// status code; the body is always `{"detail": "..."}`.
///
/// Runtime training failures are deliberately absent: they never cross the
/// HTTP boundary and are reported through the owning session's
/// `error_message` instead.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("model compilation failed: {0}")]
    Compilation(String),

    #[error("invalid hyperparameter: {0}")]
    InvalidHyperparameter(String),

    #[error("missing field: {0}")]
    MissingField(String),

    #[error("malformed request body: {0}")]
    MalformedBody(String),

    #[error("unprocessable request body: {0}")]
    UnprocessableBody(String),

    #[error("dataset '{0}' not found")]
    DatasetNotFound(String),

    #[error("model '{0}' not found")]
    ModelNotFound(String),

    #[error("training session '{0}' not found")]
    SessionNotFound(String),

    #[error("template '{0}' not found")]
    TemplateNotFound(String),

    #[error("model '{model_id}' already has an active training session '{session_id}'")]
    ActiveSessionExists {
        model_id: String,
        session_id: String,
    },

    #[error("illegal transition: {0}")]
    IllegalTransition(String),

    #[error("session '{session_id}' is not ready for prediction (status: {status})")]
    SessionNotReady {
        session_id: String,
        status: String,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::Compilation(_)
            | ApiError::InvalidHyperparameter(_)
            | ApiError::MissingField(_)
            | ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ApiError::UnprocessableBody(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::DatasetNotFound(_)
            | ApiError::ModelNotFound(_)
            | ApiError::SessionNotFound(_)
            | ApiError::TemplateNotFound(_) => StatusCode::NOT_FOUND,
            ApiError::ActiveSessionExists { .. }
            | ApiError::IllegalTransition(_)
            | ApiError::SessionNotReady { .. } => StatusCode::CONFLICT,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Body extraction failures must come out in the same `{detail}` envelope
/// as every other error, so handlers extract with
/// `Result<Json<T>, JsonRejection>` and convert here instead of letting
/// axum's default rejection body through. A body that is well-formed JSON
/// but does not match the schema (an unknown layer `type`, a wrongly typed
/// field) is 422; syntax and content-type problems are 400.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        match rejection {
            JsonRejection::JsonDataError(e) => ApiError::UnprocessableBody(e.body_text()),
            other => ApiError::MalformedBody(other.body_text()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let detail = self.to_string();

        match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error = %detail, "Internal error");
            }
            _ => {
                tracing::warn!(error = %detail, status = status.as_u16(), "Request rejected");
            }
        }

        (status, Json(ErrorBody { detail })).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
