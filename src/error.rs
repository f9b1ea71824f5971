use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Application-level errors
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Invalid interaction: {0}")]
    InvalidInteraction(String),

    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    #[error("Index is stale: index at version {index_version}, store at version {store_version}")]
    IndexStale {
        index_version: u64,
        store_version: u64,
    },

    #[error("Index rebuild was cancelled")]
    RebuildCancelled,

    #[error("An index rebuild is already running")]
    RebuildInProgress,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::InvalidInteraction(_) => (StatusCode::BAD_REQUEST, self.to_string()),
            AppError::UnknownEntity(_) => (StatusCode::NOT_FOUND, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::IndexStale { .. } => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            AppError::RebuildCancelled | AppError::RebuildInProgress => {
                (StatusCode::CONFLICT, self.to_string())
            }
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
