//! Artifact storage.
//!
//! Blobs are addressed by opaque `/`-separated paths. Generation artifacts
//! live at `{session_id}/before` (written by the caller ahead of a run) and
//! `{session_id}/after` (written once by a successful run).
//!
//! Backends:
//! - [`S3ArtifactStore`]: S3 or any S3-compatible endpoint, presigned URLs.
//! - [`LocalArtifactStore`]: a directory on disk; URLs are HMAC-signed
//!   links served by the API's `/files` route.
//! - [`MemoryArtifactStore`]: process-local, for development and tests.

pub mod config;
pub mod error;
pub mod local;
pub mod memory;
pub mod s3;
pub mod signing;

use std::time::Duration;

use async_trait::async_trait;

pub use config::StorageConfig;
pub use error::StorageError;
pub use local::LocalArtifactStore;
pub use memory::MemoryArtifactStore;
pub use s3::S3ArtifactStore;
pub use signing::UrlSigner;

/// Content type of generated images.
pub const PNG_CONTENT_TYPE: &str = "image/png";

/// Which image of a session a blob holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactSlot {
    /// Input image supplied by the caller.
    Before,
    /// Generated image.
    After,
}

impl ArtifactSlot {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::After => "after",
        }
    }
}

/// Storage path of `slot` for `session_id`.
pub fn artifact_path(session_id: &str, slot: ArtifactSlot) -> String {
    format!("{session_id}/{}", slot.as_str())
}

/// Blob storage used by the generation pipeline.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend_name(&self) -> &'static str;

    async fn download_bytes(&self, path: &str) -> Result<Vec<u8>, StorageError>;

    async fn upload_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// A URL granting read access to `path` for `ttl`.
    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError>;

    /// Check a signature produced by [`ArtifactStore::signed_url`].
    ///
    /// Only backends whose links are served by this process can verify;
    /// the rest reject every signature.
    fn verify_signature(
        &self,
        _path: &str,
        _expires: i64,
        _signature: &str,
    ) -> Result<(), StorageError> {
        Err(StorageError::Signature(format!(
            "{} backend does not serve signed links",
            self.backend_name()
        )))
    }
}

/// Reject paths that could escape a storage root or address nothing.
pub(crate) fn validate_path(path: &str) -> Result<(), StorageError> {
    let invalid = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(StorageError::InvalidPath(path.to_string()));
    }
    Ok(())
}
