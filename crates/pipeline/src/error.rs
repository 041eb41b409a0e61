use std::time::Duration;

use booth_comfyui::api::ComfyUIApiError;
use booth_comfyui::client::ComfyUIClientError;
use booth_comfyui::monitor::MonitorError;
use booth_core::workflow::WorkflowError;
use booth_storage::StorageError;

/// Coarse failure classes of a generation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineErrorKind {
    /// Submission call failed or returned garbage. Not retried.
    Submission,
    /// The backend never became reachable within the retry budget.
    Unavailable,
    /// The run broke before completing.
    Execution,
    /// No terminal event within the bound; the run is abandoned.
    Timeout,
    /// Reading or writing an artifact failed.
    Storage,
    /// The template could not be parametrized.
    Workflow,
}

impl PipelineErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submission => "submission",
            Self::Unavailable => "unavailable",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::Storage => "storage",
            Self::Workflow => "workflow",
        }
    }
}

/// Why a generation run did not produce a stored artifact.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Submission failed: {0}")]
    Submission(ComfyUIApiError),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("No completion within {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("Failed to stage input image: {0}")]
    Staging(#[from] std::io::Error),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

impl PipelineError {
    pub fn kind(&self) -> PipelineErrorKind {
        match self {
            Self::Submission(_) => PipelineErrorKind::Submission,
            Self::Unavailable(_) => PipelineErrorKind::Unavailable,
            Self::Execution(_) => PipelineErrorKind::Execution,
            Self::Timeout(_) => PipelineErrorKind::Timeout,
            Self::Storage(_) | Self::Staging(_) => PipelineErrorKind::Storage,
            Self::Workflow(_) => PipelineErrorKind::Workflow,
        }
    }
}

impl From<ComfyUIApiError> for PipelineError {
    fn from(e: ComfyUIApiError) -> Self {
        match e {
            ComfyUIApiError::Unavailable { .. } => Self::Unavailable(e.to_string()),
            other => Self::Submission(other),
        }
    }
}

impl From<MonitorError> for PipelineError {
    fn from(e: MonitorError) -> Self {
        match e {
            MonitorError::Timeout(deadline) => Self::Timeout(deadline),
            MonitorError::Connection(ComfyUIClientError::Unavailable { .. }) => {
                Self::Unavailable(e.to_string())
            }
            other => Self::Execution(other.to_string()),
        }
    }
}
