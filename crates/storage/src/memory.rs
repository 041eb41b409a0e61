//! Process-local artifact store.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::{validate_path, ArtifactStore};

/// A stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Keeps blobs in a map. Signed URLs use a `memory://` scheme and are not
/// resolvable outside the process.
#[derive(Default)]
pub struct MemoryArtifactStore {
    blobs: RwLock<HashMap<String, StoredBlob>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The blob at `path`, with its content type.
    pub async fn get(&self, path: &str) -> Option<StoredBlob> {
        self.blobs.read().await.get(path).cloned()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn download_bytes(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        validate_path(path)?;
        self.get(path)
            .await
            .map(|blob| blob.bytes)
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn upload_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        validate_path(path)?;
        self.blobs.write().await.insert(
            path.to_string(),
            StoredBlob {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_path(path)?;
        let expires = Utc::now().timestamp() + ttl.as_secs() as i64;
        Ok(format!("memory://{path}?expires={expires}"))
    }
}
