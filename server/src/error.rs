//! Unified error handling for the server.

use attrsync_engine::{FailReason, SyncFail};
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Sync error: {0}")]
    Sync(#[from] SyncFail),

    #[error("Sync is disabled: no pair is fully configured")]
    Disabled,

    #[error("Invalid request: {0}")]
    BadRequest(String),
}

/// Error response body.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<FailReason>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message, reason) = match &self {
            AppError::Sync(fail) => {
                tracing::warn!(error = %fail, "Sync request failed");
                let status = if fail.reason().is_transient() {
                    StatusCode::SERVICE_UNAVAILABLE
                } else {
                    StatusCode::UNPROCESSABLE_ENTITY
                };
                (status, fail.to_string(), Some(fail.reason()))
            }
            AppError::Disabled => (StatusCode::CONFLICT, self.to_string(), None),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone(), None),
        };

        let body = Json(ErrorResponse {
            error: error_message,
            reason,
        });

        (status, body).into_response()
    }
}

/// Result type alias for handlers.
pub type Result<T> = std::result::Result<T, AppError>;
