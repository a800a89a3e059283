use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use dsd_core::error::CoreError;
use dsd_core::job::JobId;
use serde_json::json;

use crate::engine::DispatchError;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses
/// of the form `{ "error": ..., "code": ... }`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `dsd_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A polled identifier that has no artifacts.
    #[error("No result found for request ID: {0}")]
    UnknownRequest(String),

    /// The upload could not be persisted, so no job was created.
    #[error("Failed to save uploaded image: {0}")]
    UploadFailed(CoreError),

    /// A generation finished without an output artifact.
    #[error("{message}")]
    GenerationFailed {
        request_id: Option<JobId>,
        message: String,
    },
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::Persist(e) => AppError::UploadFailed(e),
            e @ DispatchError::Generation(_) => AppError::GenerationFailed {
                request_id: None,
                message: e.to_string(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Io(err) => {
                    tracing::error!(error = %err, "I/O error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- HTTP-specific errors ---
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::UnknownRequest(_) => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            AppError::UploadFailed(err) => {
                tracing::error!(error = %err, "Failed to persist upload");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "UPLOAD_FAILED",
                    "Failed to save uploaded image".to_string(),
                )
            }
            AppError::GenerationFailed { message, .. } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "GENERATION_FAILED",
                message.clone(),
            ),
        };

        let mut body = json!({
            "error": message,
            "code": code,
        });

        if let AppError::GenerationFailed {
            request_id: Some(id),
            ..
        } = &self
        {
            body["request_id"] = json!(id);
            body["status"] = json!("failed");
        }

        (status, axum::Json(body)).into_response()
    }
}
