use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

/// The only failure kinds that reach the caller. Model, tone-LLM and cache
/// failures are absorbed inside the pipeline with designed fallbacks.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("empty file uploaded")]
    EmptyInput,
    #[error("invalid image file: {0}")]
    InvalidInput(String),
    #[error("internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::EmptyInput | ApiError::InvalidInput(_) => {
                (StatusCode::BAD_REQUEST, self.to_string())
            }
            ApiError::Internal(cause) => {
                // Detail stays in the logs, the caller gets a generic message.
                error!("internal error: {cause:#}");
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}
