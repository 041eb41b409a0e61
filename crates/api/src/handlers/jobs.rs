//! Handlers for submitting generation jobs and polling their outcome.

use std::borrow::Cow;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::Json;
use booth_pipeline::{JobInput, JobPoll, JobResult};
use serde::Deserialize;
use validator::{Validate, ValidationError};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Request bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Validate)]
pub struct SubmitJobRequest {
    /// Session whose `before` image is the input. Also names the result.
    #[validate(length(min = 1, max = 128), custom(function = "validate_session_id"))]
    pub session_id: String,
    /// Text appended to the workflow's prompt node.
    #[validate(length(max = 4000))]
    pub prompt: String,
}

/// A session id becomes a storage path segment, a file name and the
/// backend socket's client id.
fn validate_session_id(session_id: &str) -> Result<(), ValidationError> {
    let ok = session_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if !ok {
        return Err(ValidationError::new("session_id")
            .with_message(Cow::Borrowed("may only contain A-Z, a-z, 0-9, '_' and '-'")));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// POST /job
// ---------------------------------------------------------------------------

/// Start a generation job. Responds with the job handle as a JSON string.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(input): Json<SubmitJobRequest>,
) -> AppResult<Json<String>> {
    input.validate()?;

    let handle = state
        .facade
        .submit_job(JobInput {
            session_id: input.session_id,
            prompt: input.prompt,
        })
        .await;
    Ok(Json(handle))
}

// ---------------------------------------------------------------------------
// GET /job/{handle}/{session_id}
// ---------------------------------------------------------------------------

/// Wait a bounded time for a job's result.
///
/// `425` while the job is still running, `500` with the reason once it
/// has failed.
pub async fn poll_job(
    State(state): State<AppState>,
    Path((handle, session_id)): Path<(String, String)>,
) -> AppResult<Json<JobResult>> {
    let timeout = Duration::from_secs(state.config.poll_timeout_secs);
    match state.facade.poll_job(&handle, &session_id, timeout).await? {
        JobPoll::Ready(result) => Ok(Json(result)),
        JobPoll::Pending => Err(AppError::StillProcessing),
        JobPoll::Error(reason) => Err(AppError::JobFailed(reason)),
    }
}
