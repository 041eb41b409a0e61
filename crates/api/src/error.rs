use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use booth_core::error::CoreError;
use booth_pipeline::facade::FacadeError;
use booth_storage::StorageError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and [`StorageError`] for blob
/// access, and adds the job-poll outcomes that are not successes.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `booth_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// An artifact store error.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// The polled job has not settled yet.
    #[error("Job is still processing")]
    StillProcessing,

    /// The polled job failed.
    #[error("Error processing job: {0}")]
    JobFailed(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        AppError::Core(CoreError::Validation(errors.to_string()))
    }
}

impl From<FacadeError> for AppError {
    fn from(e: FacadeError) -> Self {
        match e {
            FacadeError::UnknownHandle(id) => AppError::Core(CoreError::NotFound { entity: "Job", id }),
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
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Storage errors ---
            AppError::Storage(err) => classify_storage_error(err),

            // --- Job outcomes ---
            AppError::StillProcessing => (too_early(), "TOO_EARLY", self.to_string()),
            AppError::JobFailed(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "JOB_FAILED", self.to_string())
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// `425 Too Early`.
fn too_early() -> StatusCode {
    StatusCode::from_u16(425).unwrap_or(StatusCode::SERVICE_UNAVAILABLE)
}

/// Classify a storage error into an HTTP status, error code, and message.
///
/// - `NotFound` maps to 404.
/// - `InvalidPath` maps to 400.
/// - `Signature` maps to 403.
/// - Everything else maps to 500 with a sanitized message.
fn classify_storage_error(err: &StorageError) -> (StatusCode, &'static str, String) {
    match err {
        StorageError::NotFound(path) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Blob {path} not found"),
        ),
        StorageError::InvalidPath(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", err.to_string()),
        StorageError::Signature(_) => (StatusCode::FORBIDDEN, "FORBIDDEN", err.to_string()),
        other => {
            tracing::error!(error = %other, "Storage error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
