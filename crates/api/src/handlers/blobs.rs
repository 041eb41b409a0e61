//! Handlers for blob links: presigned URLs and the signed download route
//! that backs local-disk storage.

use axum::extract::{Path, Query, State};
use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE};
use axum::response::IntoResponse;
use axum::Json;
use booth_storage::ArtifactStore;
use serde::Deserialize;

use crate::error::AppResult;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// GET /blob/{*path}
// ---------------------------------------------------------------------------

/// A time-limited URL for the stored blob at `path`, as a JSON string.
pub async fn blob_url(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> AppResult<Json<String>> {
    let url = state.facade.blob_url(&path).await?;
    Ok(Json(url))
}

// ---------------------------------------------------------------------------
// GET /files/{*path}
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SignedFileQuery {
    pub expires: i64,
    pub signature: String,
}

/// Serve a blob from a signed link. `403` for a bad or expired signature.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<SignedFileQuery>,
) -> AppResult<impl IntoResponse> {
    let store = state.facade.store();
    store.verify_signature(&path, query.expires, &query.signature)?;

    let bytes = store.download_bytes(&path).await?;
    tracing::debug!(path = %path, bytes = bytes.len(), "Serving signed blob");

    Ok((
        [
            (CONTENT_TYPE, sniff_content_type(&bytes)),
            (CACHE_CONTROL, "private, max-age=300"),
        ],
        bytes,
    ))
}

/// Guess a content type from magic bytes.
fn sniff_content_type(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}
