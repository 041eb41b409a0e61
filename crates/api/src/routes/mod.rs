pub mod blobs;
pub mod health;
pub mod jobs;

use axum::Router;

use crate::state::AppState;

/// Build the API route tree.
///
/// ```text
/// POST /job                              submit a generation job
/// GET  /job/{handle}/{session_id}        poll a job (200 / 425 / 500 / 404)
///
/// GET  /blob/{*path}                     presigned URL for a stored blob
/// GET  /files/{*path}?expires&signature  signed download (local storage)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(jobs::router())
        .merge(blobs::router())
}
