#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use booth_core::job::Job;
use booth_pipeline::{GenerationExecutor, GenerationOutput, JobFacade, PipelineError};
use booth_storage::{ArtifactStore, MemoryArtifactStore};
use http_body_util::BodyExt;
use tower::ServiceExt;

use booth_api::config::ServerConfig;
use booth_api::router::build_app_router;
use booth_api::state::AppState;

/// Build a test `ServerConfig` with a one-second poll window.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["*".to_string()],
        request_timeout_secs: 30,
        poll_timeout_secs: 1,
    }
}

/// How the fake executor finishes every job.
#[derive(Clone)]
pub enum Script {
    Succeed,
    Fail(&'static str),
    /// Never finishes.
    Hang,
}

/// Executor that follows a [`Script`] instead of driving a backend.
pub struct ScriptedExecutor(pub Script);

#[async_trait]
impl GenerationExecutor for ScriptedExecutor {
    async fn generate(&self, job: &mut Job) -> Result<GenerationOutput, PipelineError> {
        match &self.0 {
            Script::Succeed => Ok(GenerationOutput {
                prompt_id: "p-1".into(),
                artifact_path: format!("{}/after", job.session_id),
                data_url: "data:image/png;base64,aGk=".into(),
            }),
            Script::Fail(reason) => Err(PipelineError::Execution((*reason).to_string())),
            Script::Hang => std::future::pending().await,
        }
    }
}

/// Build the full application router over a scripted executor and the
/// given artifact store, with the production middleware stack.
pub fn build_test_app_with_store(script: Script, store: Arc<dyn ArtifactStore>) -> Router {
    let config = test_config();
    let facade = JobFacade::new(
        Arc::new(ScriptedExecutor(script)),
        store,
        Duration::from_secs(1800),
    );
    let state = AppState {
        facade: Arc::new(facade),
        config: Arc::new(config.clone()),
        pool: None,
    };
    build_app_router(state, &config)
}

/// [`build_test_app_with_store`] over an empty in-memory store.
pub fn build_test_app(script: Script) -> Router {
    build_test_app_with_store(script, Arc::new(MemoryArtifactStore::new()))
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
    .unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
