use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use booth_comfyui::retry::RetryPolicy;
use booth_core::workflow::{WorkflowBindings, DEFAULT_SINK_CLASS};

use crate::facade::DEFAULT_JOB_RETENTION;

/// An environment variable that could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{name} must be a valid {expected}, got '{value}'")]
pub struct ConfigError {
    pub name: &'static str,
    pub expected: &'static str,
    pub value: String,
}

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Backend HTTP base URL.
    pub comfyui_api_url: String,
    /// Backend socket base URL.
    pub comfyui_ws_url: String,
    /// Directory the backend loads input images from.
    pub input_dir: PathBuf,
    /// Shell command that starts the backend, if this process owns it.
    pub launch_cmd: Option<String>,
    /// Workflow template file.
    pub workflow_path: PathBuf,
    pub bindings: WorkflowBindings,
    /// Readiness-check retry budget.
    pub ready_policy: RetryPolicy,
    /// Socket-connect retry budget.
    pub connect_policy: RetryPolicy,
    /// Bound on a connected run without a terminal event.
    pub job_timeout: Duration,
    /// Lifetime of signed result URLs.
    pub signed_url_ttl: Duration,
    /// How long a settled job stays pollable.
    pub job_retention: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let backoff = RetryPolicy::default();
        Self {
            comfyui_api_url: "http://127.0.0.1:8189".into(),
            comfyui_ws_url: "ws://127.0.0.1:8189".into(),
            input_dir: "/root/input".into(),
            launch_cmd: None,
            workflow_path: "workflow_api.json".into(),
            bindings: WorkflowBindings::default(),
            ready_policy: RetryPolicy {
                max_attempts: 120,
                ..backoff.clone()
            },
            connect_policy: backoff,
            job_timeout: Duration::from_secs(3600),
            signed_url_ttl: Duration::from_secs(1800),
            job_retention: DEFAULT_JOB_RETENTION,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                 |
    /// |--------------------------|-------------------------|
    /// | `COMFYUI_API_URL`        | `http://127.0.0.1:8189` |
    /// | `COMFYUI_WS_URL`         | `ws://127.0.0.1:8189`   |
    /// | `COMFYUI_INPUT_DIR`      | `/root/input`           |
    /// | `COMFYUI_LAUNCH_CMD`     | unset                   |
    /// | `WORKFLOW_PATH`          | `workflow_api.json`     |
    /// | `WORKFLOW_SEED_NODE`     | `11`                    |
    /// | `WORKFLOW_IMAGE_NODE`    | `1`                     |
    /// | `WORKFLOW_PROMPT_NODE`   | `9`                     |
    /// | `WORKFLOW_PROGRESS_NODE` | `11`                    |
    /// | `WORKFLOW_SINK_CLASS`    | `SaveImageWebsocket`    |
    /// | `READY_MAX_ATTEMPTS`     | `120`                   |
    /// | `CONNECT_MAX_ATTEMPTS`   | `60`                    |
    /// | `RETRY_INITIAL_DELAY_MS` | `250`                   |
    /// | `RETRY_MAX_DELAY_MS`     | `2000`                  |
    /// | `JOB_TIMEOUT_SECS`       | `3600`                  |
    /// | `SIGNED_URL_TTL_SECS`    | `1800`                  |
    /// | `JOB_RETENTION_SECS`     | `3600`                  |
    pub fn from_env() -> Result<Self, ConfigError> {
        let initial_delay = Duration::from_millis(parse_var("RETRY_INITIAL_DELAY_MS", 250u64)?);
        let max_delay = Duration::from_millis(parse_var("RETRY_MAX_DELAY_MS", 2000u64)?);
        let backoff = |max_attempts| RetryPolicy {
            initial_delay,
            max_delay,
            max_attempts,
            ..RetryPolicy::default()
        };

        Ok(Self {
            comfyui_api_url: string_var("COMFYUI_API_URL", "http://127.0.0.1:8189"),
            comfyui_ws_url: string_var("COMFYUI_WS_URL", "ws://127.0.0.1:8189"),
            input_dir: string_var("COMFYUI_INPUT_DIR", "/root/input").into(),
            launch_cmd: std::env::var("COMFYUI_LAUNCH_CMD")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            workflow_path: string_var("WORKFLOW_PATH", "workflow_api.json").into(),
            bindings: WorkflowBindings {
                seed_node: string_var("WORKFLOW_SEED_NODE", "11"),
                image_node: string_var("WORKFLOW_IMAGE_NODE", "1"),
                prompt_node: string_var("WORKFLOW_PROMPT_NODE", "9"),
                progress_node: string_var("WORKFLOW_PROGRESS_NODE", "11"),
                sink_class: string_var("WORKFLOW_SINK_CLASS", DEFAULT_SINK_CLASS),
            },
            ready_policy: backoff(parse_var("READY_MAX_ATTEMPTS", 120u32)?),
            connect_policy: backoff(parse_var("CONNECT_MAX_ATTEMPTS", 60u32)?),
            job_timeout: Duration::from_secs(parse_var("JOB_TIMEOUT_SECS", 3600u64)?),
            signed_url_ttl: Duration::from_secs(parse_var("SIGNED_URL_TTL_SECS", 1800u64)?),
            job_retention: Duration::from_secs(parse_var(
                "JOB_RETENTION_SECS",
                DEFAULT_JOB_RETENTION.as_secs(),
            )?),
        })
    }
}

fn string_var(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.into())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().map_err(|_| ConfigError {
            name,
            expected: std::any::type_name::<T>(),
            value,
        }),
        Err(_) => Ok(default),
    }
}
