//! Filesystem-backed artifact store.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::signing::UrlSigner;
use crate::{validate_path, ArtifactStore};

/// Stores blobs under `root`, one file per path.
///
/// Signed URLs point at `{public_base_url}/files/{path}` and are checked
/// with [`ArtifactStore::verify_signature`] when served.
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
    public_base_url: String,
    signer: UrlSigner,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>, public_base_url: impl Into<String>, signer: UrlSigner) -> Self {
        Self {
            root: root.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
            signer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, StorageError> {
        validate_path(path)?;
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    fn backend_name(&self) -> &'static str {
        "local"
    }

    async fn download_bytes(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        let file = self.resolve(path)?;
        match tokio::fs::read(&file).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn upload_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let file = self.resolve(path)?;
        if let Some(parent) = file.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let len = bytes.len();
        tokio::fs::write(&file, bytes).await?;
        tracing::debug!(path, bytes = len, content_type, "Stored artifact on disk");
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_path(path)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        let signature = self.signer.sign(path, expires);
        Ok(format!(
            "{}/files/{path}?expires={expires}&signature={signature}",
            self.public_base_url
        ))
    }

    fn verify_signature(&self, path: &str, expires: i64, signature: &str) -> Result<(), StorageError> {
        validate_path(path)?;
        self.signer.verify(path, expires, signature)
    }
}
