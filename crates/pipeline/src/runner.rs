//! Generation runner: drives one job through one ComfyUI backend.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use booth_comfyui::api::ComfyUIApi;
use booth_comfyui::client::ComfyUIClient;
use booth_comfyui::events::{ExecutionEvent, ExecutionObserver};
use booth_comfyui::monitor::ExecutionMonitor;
use booth_comfyui::retry::RetryPolicy;
use booth_core::job::Job;
use booth_core::tracker::JobStatusTracker;
use booth_core::workflow::{
    prepare_workflow, GenerationParams, NodeKind, Workflow, WorkflowBindings,
};
use booth_storage::{artifact_path, ArtifactSlot, ArtifactStore, PNG_CONTENT_TYPE};
use tokio::sync::Semaphore;

use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineErrorKind};

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationOutput {
    pub prompt_id: String,
    /// Storage path of the generated image.
    pub artifact_path: String,
    /// `data:image/png;base64,...`
    pub data_url: String,
}

/// Executes generation jobs. The seam between the facade and the backend.
#[async_trait]
pub trait GenerationExecutor: Send + Sync {
    /// Run `job` to completion, updating it as it progresses.
    async fn generate(&self, job: &mut Job) -> Result<GenerationOutput, PipelineError>;
}

/// Encode image bytes as a PNG data URL.
pub fn png_data_url(bytes: &[u8]) -> String {
    format!(
        "data:{PNG_CONTENT_TYPE};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Runs jobs against a single backend, one at a time.
pub struct GenerationRunner {
    api: ComfyUIApi,
    client: ComfyUIClient,
    store: Arc<dyn ArtifactStore>,
    tracker: JobStatusTracker,
    template: Arc<Workflow>,
    bindings: WorkflowBindings,
    input_dir: PathBuf,
    ready_policy: RetryPolicy,
    connect_policy: RetryPolicy,
    job_timeout: Duration,
    /// One permit: a backend process serves a single generation at a time.
    active: Semaphore,
}

impl GenerationRunner {
    /// Build a runner for `template`, checking the role bindings against it.
    pub fn new(
        config: &PipelineConfig,
        template: Arc<Workflow>,
        store: Arc<dyn ArtifactStore>,
        tracker: JobStatusTracker,
    ) -> Result<Self, PipelineError> {
        config.bindings.validate(&template)?;
        if template.kind_of(&config.bindings.seed_node) != Some(NodeKind::Sampler) {
            tracing::warn!(
                node = %config.bindings.seed_node,
                "Seed node is not a sampler; per-job seeds may have no effect",
            );
        }
        tracing::info!(
            nodes = template.len(),
            checkpoints = ?template.nodes_of_kind(NodeKind::CheckpointLoader),
            samplers = ?template.nodes_of_kind(NodeKind::Sampler),
            sinks = ?template.nodes_of_kind(NodeKind::ImageSink),
            "Workflow node roles resolved",
        );
        Ok(Self {
            api: ComfyUIApi::new(&config.comfyui_api_url),
            client: ComfyUIClient::new(&config.comfyui_ws_url),
            store,
            tracker,
            template,
            bindings: config.bindings.clone(),
            input_dir: config.input_dir.clone(),
            ready_policy: config.ready_policy.clone(),
            connect_policy: config.connect_policy.clone(),
            job_timeout: config.job_timeout,
            active: Semaphore::new(1),
        })
    }

    /// Copy the session's input image into the backend's input directory,
    /// named by session id.
    async fn stage_input(&self, session_id: &str) -> Result<PathBuf, PipelineError> {
        let source = artifact_path(session_id, ArtifactSlot::Before);
        let bytes = self.store.download_bytes(&source).await?;

        tokio::fs::create_dir_all(&self.input_dir).await?;
        let target = self.input_dir.join(session_id);
        tokio::fs::write(&target, &bytes).await?;

        tracing::debug!(
            session_id,
            path = %target.display(),
            bytes = bytes.len(),
            "Staged input image",
        );
        Ok(target)
    }

    async fn run(&self, job: &mut Job) -> Result<GenerationOutput, PipelineError> {
        let session_id = job.session_id.clone();

        self.api.wait_until_ready(&self.ready_policy).await?;
        self.stage_input(&session_id).await?;

        let params = GenerationParams::new(&session_id, &job.prompt_text);
        let workflow = prepare_workflow(&self.template, &self.bindings, &params)?;

        // Subscribe before submitting so no early event is missed.
        let mut monitor = ExecutionMonitor::for_workflow(&workflow, &self.bindings.progress_node);
        let mut conn = monitor
            .connect(&self.client, &session_id, &self.connect_policy)
            .await?;

        let submitted = self.api.submit_workflow(&workflow, &session_id).await?;
        let prompt_id = submitted.prompt_id;
        tracing::info!(session_id = %session_id, prompt_id = %prompt_id, seed = params.seed, "Generation submitted");

        if let Err(e) = self.tracker.start(job, &prompt_id).await {
            tracing::error!(error = %e, session_id = %session_id, "Failed to record job start");
        }

        let mut observer = TrackerObserver {
            tracker: &self.tracker,
            job: &mut *job,
        };
        let artifact = monitor
            .run(&prompt_id, &mut conn.ws_stream, &mut observer, self.job_timeout)
            .await;
        if let Err(e) = conn.ws_stream.close(None).await {
            tracing::debug!(error = %e, "Socket close failed");
        }
        let artifact = artifact?;

        let path = artifact_path(&session_id, ArtifactSlot::After);
        let data_url = png_data_url(&artifact);
        self.store
            .upload_bytes(&path, artifact, PNG_CONTENT_TYPE)
            .await?;

        if let Err(e) = self.tracker.complete(job).await {
            tracing::error!(error = %e, session_id = %session_id, "Failed to record job completion");
        }

        Ok(GenerationOutput {
            prompt_id,
            artifact_path: path,
            data_url,
        })
    }
}

#[async_trait]
impl GenerationExecutor for GenerationRunner {
    async fn generate(&self, job: &mut Job) -> Result<GenerationOutput, PipelineError> {
        if let Err(e) = self.tracker.enqueue(job).await {
            tracing::error!(error = %e, session_id = %job.session_id, "Failed to record queued job");
        }
        let _permit = self
            .active
            .acquire()
            .await
            .map_err(|_| PipelineError::Unavailable("runner is shut down".into()))?;

        tracing::info!(session_id = %job.session_id, "Generation started");
        let result = self.run(job).await;

        match &result {
            Ok(output) => {
                tracing::info!(session_id = %job.session_id, path = %output.artifact_path, "Generation completed");
            }
            Err(e) => {
                if e.kind() == PipelineErrorKind::Timeout {
                    tracing::warn!(session_id = %job.session_id, error = %e, "Generation timed out");
                } else {
                    tracing::error!(session_id = %job.session_id, kind = e.kind().as_str(), error = %e, "Generation failed");
                }
                // The socket is closed by now, so nothing will store a late artifact.
                if let Err(store_err) = self.tracker.fail(job, &e.to_string()).await {
                    tracing::error!(error = %store_err, session_id = %job.session_id, "Failed to record job failure");
                }
            }
        }
        result
    }
}

/// Forwards monitor events to the status tracker.
struct TrackerObserver<'a> {
    tracker: &'a JobStatusTracker,
    job: &'a mut Job,
}

#[async_trait]
impl ExecutionObserver for TrackerObserver<'_> {
    async fn on_event(&mut self, event: &ExecutionEvent) {
        let result = match event {
            ExecutionEvent::Progress { percent, .. } => {
                self.tracker.update_progress(self.job, *percent).await
            }
            ExecutionEvent::Executed { .. } => self.tracker.mark_executed(self.job).await,
            ExecutionEvent::NodeStarted { .. } | ExecutionEvent::ArtifactCaptured { .. } => Ok(()),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, session_id = %self.job.session_id, "Failed to record job status");
        }
    }
}
