use axum::routing::get;
use axum::Router;

use crate::handlers::blobs;
use crate::state::AppState;

/// Blob link routes.
///
/// ```text
/// GET    /blob/{*path}     -> blob_url
/// GET    /files/{*path}    -> serve_file
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/blob/{*path}", get(blobs::blob_url))
        .route("/files/{*path}", get(blobs::serve_file))
}
