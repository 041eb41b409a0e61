//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no server needed.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use booth_api::error::AppError;
use booth_core::error::CoreError;
use booth_pipeline::facade::FacadeError;
use booth_storage::StorageError;
use http_body_util::BodyExt;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn unknown_job_handle_returns_404() {
    let err = AppError::from(FacadeError::UnknownHandle("h-1".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Job with id h-1 not found");
}

#[tokio::test]
async fn still_processing_returns_425() {
    let (status, json) = error_to_response(AppError::StillProcessing).await;

    assert_eq!(status.as_u16(), 425);
    assert_eq!(json["error"], "Job is still processing");
}

#[tokio::test]
async fn job_failure_returns_500_with_reason() {
    let err = AppError::JobFailed("Execution failed: out of memory".into());

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "JOB_FAILED");
    assert_eq!(json["error"], "Error processing job: Execution failed: out of memory");
}

#[tokio::test]
async fn validation_error_returns_400() {
    let err = AppError::Core(CoreError::Validation("session_id: too long".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn storage_errors_map_to_status_codes() {
    let cases = [
        (StorageError::NotFound("abc/after".into()), StatusCode::NOT_FOUND),
        (StorageError::InvalidPath("../x".into()), StatusCode::BAD_REQUEST),
        (StorageError::Signature("expired".into()), StatusCode::FORBIDDEN),
    ];
    for (err, expected) in cases {
        let (status, _) = error_to_response(AppError::Storage(err)).await;
        assert_eq!(status, expected);
    }
}

#[tokio::test]
async fn storage_backend_error_is_sanitized() {
    let err = AppError::Storage(StorageError::Backend("s3 credentials rejected".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "INTERNAL_ERROR");
    assert_eq!(json["error"], "An internal error occurred");
}
