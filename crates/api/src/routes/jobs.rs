use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/job`.
///
/// ```text
/// POST   /job                          -> submit_job
/// GET    /job/{handle}/{session_id}    -> poll_job
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/job", post(jobs::submit_job))
        .route("/job/{handle}/{session_id}", get(jobs::poll_job))
}
