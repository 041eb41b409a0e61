use std::path::PathBuf;
use std::sync::Arc;

use crate::error::StorageError;
use crate::local::LocalArtifactStore;
use crate::memory::MemoryArtifactStore;
use crate::s3::{S3ArtifactStore, S3Settings};
use crate::signing::UrlSigner;
use crate::ArtifactStore;

/// Which artifact backend to run with.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    S3(S3Settings),
    Local {
        root: PathBuf,
        public_base_url: String,
        /// `None` generates a random secret at startup.
        signing_secret: Option<String>,
    },
    Memory,
}

impl StorageConfig {
    /// Load storage configuration from environment variables.
    ///
    /// | Env Var                | Default                 |
    /// |------------------------|-------------------------|
    /// | `STORAGE_BACKEND`      | `local`                 |
    /// | `S3_BUCKET`            | required for `s3`       |
    /// | `S3_ENDPOINT_URL`      | -                       |
    /// | `S3_REGION`            | AWS provider chain      |
    /// | `S3_ACCESS_KEY_ID`     | AWS provider chain      |
    /// | `S3_SECRET_ACCESS_KEY` | AWS provider chain      |
    /// | `LOCAL_STORAGE_PATH`   | `./storage`             |
    /// | `PUBLIC_BASE_URL`      | `http://localhost:3000` |
    /// | `SIGNING_SECRET`       | random                  |
    pub fn from_env() -> Result<Self, StorageError> {
        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "local".into());
        match backend.as_str() {
            "s3" => Ok(Self::S3(S3Settings {
                bucket: std::env::var("S3_BUCKET")
                    .map_err(|_| StorageError::Config("S3_BUCKET must be set".into()))?,
                endpoint_url: optional_var("S3_ENDPOINT_URL"),
                region: optional_var("S3_REGION"),
                access_key_id: optional_var("S3_ACCESS_KEY_ID"),
                secret_access_key: optional_var("S3_SECRET_ACCESS_KEY"),
            })),
            "local" => Ok(Self::Local {
                root: std::env::var("LOCAL_STORAGE_PATH")
                    .unwrap_or_else(|_| "./storage".into())
                    .into(),
                public_base_url: std::env::var("PUBLIC_BASE_URL")
                    .unwrap_or_else(|_| "http://localhost:3000".into()),
                signing_secret: optional_var("SIGNING_SECRET"),
            }),
            "memory" => Ok(Self::Memory),
            other => Err(StorageError::Config(format!(
                "Unknown STORAGE_BACKEND '{other}'. Must be one of: s3, local, memory"
            ))),
        }
    }

    /// Construct the configured backend.
    pub async fn build(self) -> Result<Arc<dyn ArtifactStore>, StorageError> {
        let store: Arc<dyn ArtifactStore> = match self {
            Self::S3(settings) => Arc::new(S3ArtifactStore::connect(settings).await?),
            Self::Local {
                root,
                public_base_url,
                signing_secret,
            } => {
                let signer = match signing_secret {
                    Some(secret) => UrlSigner::new(secret),
                    None => {
                        tracing::warn!("SIGNING_SECRET not set; signed links will not survive a restart");
                        UrlSigner::random()
                    }
                };
                tokio::fs::create_dir_all(&root).await?;
                tracing::info!(root = %root.display(), "Local artifact store configured");
                Arc::new(LocalArtifactStore::new(root, public_base_url, signer))
            }
            Self::Memory => Arc::new(MemoryArtifactStore::new()),
        };
        Ok(store)
    }
}

fn optional_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}
