//! Application error type mapping to HTTP status codes and envelope format.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use gemchat_types::error::SessionError;
use gemchat_types::llm::BackendError;

use super::response::ApiResponse;

/// Application-level error that maps to HTTP responses.
#[derive(Debug)]
pub enum AppError {
    /// Session lifecycle errors.
    Session(SessionError),
    /// Unknown session addressed by a path that is not a session id.
    NotFound(String),
    /// Malformed request body or field.
    Validation(String),
}

impl From<SessionError> for AppError {
    fn from(e: SessionError) -> Self {
        AppError::Session(e)
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

impl AppError {
    /// HTTP status and machine-readable code.
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Session(SessionError::InvalidSeedHistory(_)) => {
                (StatusCode::BAD_REQUEST, "INVALID_SEED_HISTORY")
            }
            AppError::Session(SessionError::InvalidRequest(_)) | AppError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR")
            }
            AppError::Session(SessionError::SessionNotFound(_)) | AppError::NotFound(_) => {
                (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND")
            }
            AppError::Session(SessionError::Backend { source, .. }) => match source {
                BackendError::Rejected { .. } => {
                    (StatusCode::UNPROCESSABLE_ENTITY, "BACKEND_REJECTED")
                }
                BackendError::Unavailable(_) => (StatusCode::BAD_GATEWAY, "BACKEND_UNAVAILABLE"),
                BackendError::Timeout { .. } => (StatusCode::GATEWAY_TIMEOUT, "BACKEND_TIMEOUT"),
            },
            AppError::Session(SessionError::InternalStore(_)) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR")
            }
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Session(e) => e.to_string(),
            AppError::NotFound(msg) | AppError::Validation(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            tracing::warn!(status = %status, code, error = %self.message(), "Request failed");
        } else {
            tracing::debug!(status = %status, code, error = %self.message(), "Request rejected");
        }

        (status, Json(ApiResponse::error(code, &self.message()))).into_response()
    }
}
