//! Job status tracking.
//!
//! [`JobStatusTracker`] owns the rules for *what* is recorded and *when*:
//! status transitions, progress, generation counts and the append-only
//! start/end timestamp lists. Storage is delegated to a [`JobStore`],
//! a document store keyed by session id that applies partial-field
//! merges and never overwrites a whole document.
//!
//! Every tracker call first updates the in-memory [`Job`] and then
//! persists a [`JobPatch`]. A persistence failure is returned to the
//! caller but never rolls back the in-memory state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Serialize, Serializer};
use tokio::sync::RwLock;

use crate::job::{Job, JobStatus};
use crate::types::{SessionId, Timestamp};

// ---------------------------------------------------------------------------
// Persisted document
// ---------------------------------------------------------------------------

/// The persisted status document for a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobRecord {
    pub session_id: SessionId,
    pub prompt_id: Option<String>,
    pub prompt: Option<String>,
    pub status: Option<JobStatus>,
    pub progress: u8,
    pub generation_count: u32,
    #[serde(serialize_with = "serialize_times")]
    pub generation_start_times: Vec<Timestamp>,
    #[serde(serialize_with = "serialize_times")]
    pub generation_end_times: Vec<Timestamp>,
    pub error: Option<String>,
    pub updated_at: Timestamp,
}

impl JobRecord {
    /// An empty document for a session that has never been recorded.
    pub fn empty(session_id: impl Into<SessionId>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt_id: None,
            prompt: None,
            status: None,
            progress: 0,
            generation_count: 0,
            generation_start_times: Vec::new(),
            generation_end_times: Vec::new(),
            error: None,
            updated_at: Utc::now(),
        }
    }

    /// Apply a partial update: set fields overwrite, list fields append,
    /// the generation counter increments.
    pub fn apply(&mut self, patch: &JobPatch) {
        if let Some(prompt_id) = &patch.prompt_id {
            self.prompt_id = Some(prompt_id.clone());
        }
        if let Some(prompt) = &patch.prompt {
            self.prompt = Some(prompt.clone());
        }
        if let Some(status) = patch.status {
            self.status = Some(status);
        }
        if let Some(progress) = patch.progress {
            self.progress = progress;
        }
        if patch.increment_generation {
            self.generation_count += 1;
        }
        if let Some(at) = patch.append_start_time {
            self.generation_start_times.push(at);
        }
        if let Some(at) = patch.append_end_time {
            self.generation_end_times.push(at);
        }
        if patch.clear_error {
            self.error = None;
        }
        if let Some(error) = &patch.error {
            self.error = Some(error.clone());
        }
        self.updated_at = Utc::now();
    }
}

/// A timestamp entry as stored in the status document.
#[derive(Debug, Serialize)]
struct TimeEntry {
    timestamp: f64,
    iso: String,
}

impl From<&Timestamp> for TimeEntry {
    fn from(at: &Timestamp) -> Self {
        Self {
            timestamp: at.timestamp_millis() as f64 / 1000.0,
            iso: at.to_rfc3339(),
        }
    }
}

fn serialize_times<S: Serializer>(times: &[Timestamp], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_seq(times.iter().map(TimeEntry::from))
}

/// A partial-field merge against a [`JobRecord`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub prompt_id: Option<String>,
    pub prompt: Option<String>,
    pub status: Option<JobStatus>,
    pub progress: Option<u8>,
    pub increment_generation: bool,
    pub append_start_time: Option<Timestamp>,
    pub append_end_time: Option<Timestamp>,
    /// Drop the stored error before applying `error`.
    pub clear_error: bool,
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

/// Failure reported by a [`JobStore`] implementation.
#[derive(Debug, thiserror::Error)]
#[error("Job status store error: {0}")]
pub struct StoreError(pub String);

/// Persistence collaborator for job status documents.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Merge `patch` into the document for `session_id`, creating it if
    /// absent, and return the merged document.
    async fn merge(&self, session_id: &str, patch: JobPatch) -> Result<JobRecord, StoreError>;

    /// Fetch the document for `session_id`.
    async fn get(&self, session_id: &str) -> Result<Option<JobRecord>, StoreError>;
}

/// Process-local [`JobStore`], used when no database is configured and
/// in tests.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<SessionId, JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn merge(&self, session_id: &str, patch: JobPatch) -> Result<JobRecord, StoreError> {
        let mut records = self.records.write().await;
        let record = records
            .entry(session_id.to_string())
            .or_insert_with(|| JobRecord::empty(session_id));
        record.apply(&patch);
        Ok(record.clone())
    }

    async fn get(&self, session_id: &str) -> Result<Option<JobRecord>, StoreError> {
        Ok(self.records.read().await.get(session_id).cloned())
    }
}

// ---------------------------------------------------------------------------
// Tracker
// ---------------------------------------------------------------------------

/// Records job lifecycle transitions.
#[derive(Clone)]
pub struct JobStatusTracker {
    store: Arc<dyn JobStore>,
}

impl JobStatusTracker {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// The underlying store, for status readers.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    /// Record that `job` was accepted and is waiting for the worker.
    pub async fn enqueue(&self, job: &Job) -> Result<(), StoreError> {
        if job.status != JobStatus::Queued {
            return Ok(());
        }

        let patch = JobPatch {
            prompt: Some(job.prompt_text.clone()),
            status: Some(JobStatus::Queued),
            progress: Some(0),
            ..Default::default()
        };
        self.store.merge(&job.session_id, patch).await?;
        tracing::debug!(session_id = %job.session_id, "Job queued");
        Ok(())
    }

    /// Record that `job` was submitted and assigned `correlation_id`.
    ///
    /// Increments the session's generation count, appends a start time
    /// and clears any error left by an earlier run. Repeating the call
    /// for the same correlation id is a no-op.
    pub async fn start(&self, job: &mut Job, correlation_id: &str) -> Result<(), StoreError> {
        if job.is_terminal() || job.correlation_id.as_deref() == Some(correlation_id) {
            return Ok(());
        }

        let now = Utc::now();
        job.correlation_id = Some(correlation_id.to_string());
        job.status = JobStatus::Started;
        job.progress = 0;
        job.generation_count += 1;
        job.start_times.push(now);
        job.error = None;

        let patch = JobPatch {
            prompt_id: Some(correlation_id.to_string()),
            prompt: Some(job.prompt_text.clone()),
            status: Some(JobStatus::Started),
            progress: Some(0),
            increment_generation: true,
            append_start_time: Some(now),
            clear_error: true,
            ..Default::default()
        };
        let record = self.store.merge(&job.session_id, patch).await?;

        job.generation_count = record.generation_count;
        job.start_times = record.generation_start_times;
        tracing::info!(
            session_id = %job.session_id,
            prompt_id = %correlation_id,
            generation = job.generation_count,
            "Job started",
        );
        Ok(())
    }

    /// Record sampler progress. Moves the job to [`JobStatus::Pending`].
    pub async fn update_progress(&self, job: &mut Job, percent: u8) -> Result<(), StoreError> {
        let percent = percent.min(100);
        if job.is_terminal() || job.status == JobStatus::Executed {
            return Ok(());
        }
        if job.status == JobStatus::Pending && job.progress == percent {
            return Ok(());
        }

        job.status = JobStatus::Pending;
        job.progress = percent;

        let patch = JobPatch {
            status: Some(JobStatus::Pending),
            progress: Some(percent),
            ..Default::default()
        };
        self.store.merge(&job.session_id, patch).await?;
        tracing::debug!(session_id = %job.session_id, percent, "Job progress");
        Ok(())
    }

    /// Record that the backend finished executing the workflow.
    pub async fn mark_executed(&self, job: &mut Job) -> Result<(), StoreError> {
        if job.is_terminal() || job.status == JobStatus::Executed {
            return Ok(());
        }
        job.status = JobStatus::Executed;

        let patch = JobPatch {
            status: Some(JobStatus::Executed),
            ..Default::default()
        };
        self.store.merge(&job.session_id, patch).await?;
        tracing::info!(session_id = %job.session_id, "Job executed");
        Ok(())
    }

    /// Record that the artifact was stored. Appends an end time.
    pub async fn complete(&self, job: &mut Job) -> Result<(), StoreError> {
        if job.is_terminal() {
            return Ok(());
        }

        let now = Utc::now();
        job.status = JobStatus::Completed;
        job.progress = 100;
        job.end_times.push(now);

        let patch = JobPatch {
            status: Some(JobStatus::Completed),
            progress: Some(100),
            append_end_time: Some(now),
            ..Default::default()
        };
        let record = self.store.merge(&job.session_id, patch).await?;

        job.end_times = record.generation_end_times;
        tracing::info!(session_id = %job.session_id, "Job completed");
        Ok(())
    }

    /// Record a failure with its reason.
    pub async fn fail(&self, job: &mut Job, reason: &str) -> Result<(), StoreError> {
        if job.is_terminal() {
            return Ok(());
        }
        job.status = JobStatus::Failed;
        job.error = Some(reason.to_string());

        let patch = JobPatch {
            status: Some(JobStatus::Failed),
            error: Some(reason.to_string()),
            ..Default::default()
        };
        self.store.merge(&job.session_id, patch).await?;
        tracing::warn!(session_id = %job.session_id, reason, "Job failed");
        Ok(())
    }
}
