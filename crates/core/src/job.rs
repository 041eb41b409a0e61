//! The generation job entity.
//!
//! A [`Job`] is created when a caller submits work and is mutated only by
//! the execution pipeline and the status tracker during one inference
//! run. Once it reaches [`JobStatus::Completed`] or [`JobStatus::Failed`]
//! it is frozen.

use serde::{Deserialize, Serialize};

use crate::types::{SessionId, Timestamp};

/// Lifecycle status of a generation job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted, waiting for the worker.
    Queued,
    /// Submitted to the backend; correlation id assigned.
    Started,
    /// The backend is reporting sampler progress.
    Pending,
    /// The backend signalled terminal completion; artifact not yet stored.
    Executed,
    /// Artifact stored.
    Completed,
    Failed,
}

impl JobStatus {
    /// Lower-case name used in persisted status documents.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Started => "started",
            Self::Pending => "pending",
            Self::Executed => "executed",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse a persisted status name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "queued" => Some(Self::Queued),
            "started" => Some(Self::Started),
            "pending" => Some(Self::Pending),
            "executed" => Some(Self::Executed),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Terminal statuses are sticky.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generation run for a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub session_id: SessionId,
    /// Assigned by the backend at submission.
    pub correlation_id: Option<String>,
    pub status: JobStatus,
    /// 0..=100
    pub progress: u8,
    pub prompt_text: String,
    /// Number of runs recorded for this session, this one included.
    pub generation_count: u32,
    pub start_times: Vec<Timestamp>,
    pub end_times: Vec<Timestamp>,
    /// Failure reason once [`JobStatus::Failed`].
    pub error: Option<String>,
}

impl Job {
    /// A freshly submitted job in [`JobStatus::Queued`].
    pub fn new(session_id: impl Into<SessionId>, prompt_text: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            correlation_id: None,
            status: JobStatus::Queued,
            progress: 0,
            prompt_text: prompt_text.into(),
            generation_count: 0,
            start_times: Vec::new(),
            end_times: Vec::new(),
            error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
