//! S3-backed artifact store.

use std::time::Duration;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;

use crate::error::StorageError;
use crate::{validate_path, ArtifactStore};

/// Connection settings for an S3 bucket.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub bucket: String,
    /// Custom endpoint for S3-compatible services; enables path-style
    /// addressing.
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
    /// Static credentials. When absent the default AWS provider chain
    /// is used.
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
}

/// Stores blobs as objects keyed by path.
#[derive(Debug, Clone)]
pub struct S3ArtifactStore {
    client: Client,
    bucket: String,
}

impl S3ArtifactStore {
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Build an SDK client from `settings` and the ambient AWS config.
    pub async fn connect(settings: S3Settings) -> Result<Self, StorageError> {
        if settings.bucket.is_empty() {
            return Err(StorageError::Config("S3 bucket name is empty".into()));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = &settings.region {
            loader = loader.region(Region::new(region.clone()));
        }
        if let Some(endpoint) = &settings.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        match (&settings.access_key_id, &settings.secret_access_key) {
            (Some(key), Some(secret)) => {
                loader = loader.credentials_provider(Credentials::new(
                    key,
                    secret,
                    None,
                    None,
                    "booth-env",
                ));
            }
            (None, None) => {}
            _ => {
                return Err(StorageError::Config(
                    "S3_ACCESS_KEY_ID and S3_SECRET_ACCESS_KEY must be set together".into(),
                ))
            }
        }
        let shared = loader.load().await;

        let config = aws_sdk_s3::config::Builder::from(&shared)
            .force_path_style(settings.endpoint_url.is_some())
            .build();

        tracing::info!(
            bucket = %settings.bucket,
            endpoint = ?settings.endpoint_url,
            "S3 artifact store configured",
        );
        Ok(Self::new(Client::from_conf(config), settings.bucket))
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

fn backend_error(op: &str, path: &str, e: impl std::error::Error) -> StorageError {
    StorageError::Backend(format!("S3 {op} {path}: {}", DisplayErrorContext(e)))
}

#[async_trait]
impl ArtifactStore for S3ArtifactStore {
    fn backend_name(&self) -> &'static str {
        "s3"
    }

    async fn download_bytes(&self, path: &str) -> Result<Vec<u8>, StorageError> {
        validate_path(path)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().is_some_and(|se| se.is_no_such_key()) {
                    StorageError::NotFound(path.to_string())
                } else {
                    backend_error("get", path, e)
                }
            })?;

        let body = output
            .body
            .collect()
            .await
            .map_err(|e| backend_error("read", path, e))?;
        Ok(body.into_bytes().to_vec())
    }

    async fn upload_bytes(
        &self,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        validate_path(path)?;
        let len = bytes.len();
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .content_type(content_type)
            .body(ByteStream::from(bytes))
            .send()
            .await
            .map_err(|e| backend_error("put", path, e))?;
        tracing::debug!(bucket = %self.bucket, path, bytes = len, "Uploaded artifact");
        Ok(())
    }

    async fn signed_url(&self, path: &str, ttl: Duration) -> Result<String, StorageError> {
        validate_path(path)?;
        let presigning = PresigningConfig::expires_in(ttl)
            .map_err(|e| StorageError::Config(format!("invalid signed URL lifetime: {e}")))?;
        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .presigned(presigning)
            .await
            .map_err(|e| backend_error("presign", path, e))?;
        Ok(request.uri().to_string())
    }
}
