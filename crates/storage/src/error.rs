/// Errors from artifact storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid storage path: {0}")]
    InvalidPath(String),

    #[error("Invalid or expired signature: {0}")]
    Signature(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
