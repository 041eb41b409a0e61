//! Submit/poll facade over the generation executor.
//!
//! `submit_job` returns a handle immediately and runs the job on a
//! background task. `poll_job` waits a bounded time for that task's
//! outcome. Outcomes are published on a per-job watch channel; once a
//! job succeeds or fails its outcome never changes.
//!
//! A settled job stays pollable for the retention window and is then
//! forgotten, together with its encoded image. Polling it afterwards
//! reports an unknown handle.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use booth_core::job::Job;
use booth_storage::{ArtifactStore, StorageError};
use serde::Serialize;
use tokio::sync::{watch, RwLock};

use crate::error::PipelineErrorKind;
use crate::runner::{GenerationExecutor, GenerationOutput};

/// Opaque job reference handed to callers.
pub type JobHandle = String;

/// What a caller submits.
#[derive(Debug, Clone)]
pub struct JobInput {
    pub session_id: String,
    pub prompt: String,
}

/// A finished job as presented to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobResult {
    /// `data:image/png;base64,...`
    pub base64_image: String,
    /// Time-limited link to the stored image.
    pub signed_url: String,
}

/// Result of one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPoll {
    Ready(JobResult),
    /// Not finished within the poll timeout.
    Pending,
    Error(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FacadeError {
    #[error("Unknown job handle: {0}")]
    UnknownHandle(String),
}

#[derive(Debug, Clone)]
enum JobOutcome {
    Running,
    Succeeded(Arc<GenerationOutput>),
    Failed(String),
    /// The run gave up waiting on the backend. Reported as still
    /// processing until the entry is evicted.
    TimedOut,
}

impl JobOutcome {
    fn is_settled(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

struct JobEntry {
    session_id: String,
    outcome: watch::Receiver<JobOutcome>,
}

/// How long a settled job stays pollable by default.
pub const DEFAULT_JOB_RETENTION: Duration = Duration::from_secs(3600);

type JobTable = Arc<RwLock<HashMap<JobHandle, JobEntry>>>;

/// Accepts generation jobs and reports their outcome.
pub struct JobFacade {
    executor: Arc<dyn GenerationExecutor>,
    store: Arc<dyn ArtifactStore>,
    signed_url_ttl: Duration,
    retention: Duration,
    jobs: JobTable,
}

impl JobFacade {
    pub fn new(
        executor: Arc<dyn GenerationExecutor>,
        store: Arc<dyn ArtifactStore>,
        signed_url_ttl: Duration,
    ) -> Self {
        Self {
            executor,
            store,
            signed_url_ttl,
            retention: DEFAULT_JOB_RETENTION,
            jobs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Keep settled jobs pollable for `retention` instead of the default.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Start `input` in the background and return its handle.
    pub async fn submit_job(&self, input: JobInput) -> JobHandle {
        let handle = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = watch::channel(JobOutcome::Running);

        self.jobs.write().await.insert(
            handle.clone(),
            JobEntry {
                session_id: input.session_id.clone(),
                outcome: rx,
            },
        );

        let executor = Arc::clone(&self.executor);
        let jobs = Arc::clone(&self.jobs);
        let retention = self.retention;
        let task_handle = handle.clone();
        tokio::spawn(async move {
            let mut job = Job::new(input.session_id, input.prompt);
            let outcome = match executor.generate(&mut job).await {
                Ok(output) => JobOutcome::Succeeded(Arc::new(output)),
                Err(e) if e.kind() == PipelineErrorKind::Timeout => JobOutcome::TimedOut,
                Err(e) => JobOutcome::Failed(e.to_string()),
            };
            tracing::debug!(handle = %task_handle, status = %job.status, "Job settled");
            // Receivers live as long as the facade entry.
            let _ = tx.send(outcome);

            tokio::time::sleep(retention).await;
            if jobs.write().await.remove(&task_handle).is_some() {
                tracing::debug!(handle = %task_handle, "Settled job evicted");
            }
        });

        tracing::info!(handle = %handle, "Job submitted");
        handle
    }

    /// Wait up to `timeout` for the job behind `handle` to settle.
    ///
    /// A handle is only valid together with the session it was submitted
    /// for.
    pub async fn poll_job(
        &self,
        handle: &str,
        session_id: &str,
        timeout: Duration,
    ) -> Result<JobPoll, FacadeError> {
        let mut outcome = {
            let jobs = self.jobs.read().await;
            match jobs.get(handle) {
                Some(entry) if entry.session_id == session_id => entry.outcome.clone(),
                _ => return Err(FacadeError::UnknownHandle(handle.to_string())),
            }
        };

        let waited = tokio::time::timeout(timeout, outcome.wait_for(JobOutcome::is_settled))
            .await
            .map(|settled| settled.map(|value| (*value).clone()));
        let settled = match waited {
            Err(_) => return Ok(JobPoll::Pending),
            Ok(Err(_)) => {
                return Ok(JobPoll::Error("Job worker exited without a result".into()));
            }
            Ok(Ok(outcome)) => outcome,
        };

        Ok(match settled {
            JobOutcome::Succeeded(output) => {
                match self.blob_url(&output.artifact_path).await {
                    Ok(signed_url) => JobPoll::Ready(JobResult {
                        base64_image: output.data_url.clone(),
                        signed_url,
                    }),
                    Err(e) => JobPoll::Error(e.to_string()),
                }
            }
            JobOutcome::Failed(reason) => JobPoll::Error(reason),
            JobOutcome::TimedOut | JobOutcome::Running => JobPoll::Pending,
        })
    }

    /// Time-limited URL for any stored blob.
    pub async fn blob_url(&self, path: &str) -> Result<String, StorageError> {
        self.store.signed_url(path, self.signed_url_ttl).await
    }

    /// The artifact store behind this facade.
    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }
}
