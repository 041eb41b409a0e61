//! End-to-end runs against a mocked ComfyUI: wiremock for HTTP and an
//! in-process WebSocket server replaying a scripted event stream.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use booth_comfyui::retry::RetryPolicy;
use booth_core::job::JobStatus;
use booth_core::tracker::{JobStatusTracker, JobStore, MemoryJobStore};
use booth_core::workflow::{Workflow, DEFAULT_SINK_CLASS};
use booth_pipeline::{GenerationRunner, JobFacade, JobInput, JobPoll, PipelineConfig};
use booth_storage::{ArtifactStore, MemoryArtifactStore};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROMPT_ID: &str = "p-1";
const PAYLOAD: &[u8] = b"\x89PNG final image";

fn template() -> Workflow {
    Workflow::from_value(
        json!({
            "1": {"class_type": "LoadImage", "inputs": {"image": "placeholder.png"}},
            "4": {"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "model.safetensors"}},
            "9": {"class_type": "CLIPTextEncode", "inputs": {"text": "portrait, ", "clip": ["4", 1]}},
            "11": {"class_type": "SaveImageWebsocket", "inputs": {"seed": 0, "images": ["4", 0]}}
        }),
        DEFAULT_SINK_CLASS,
    )
    .unwrap()
}

fn executing(node: Option<&str>) -> Message {
    Message::Text(json!({"type": "executing", "data": {"node": node, "prompt_id": PROMPT_ID}}).to_string())
}

fn progress(node: &str, value: u32) -> Message {
    Message::Text(
        json!({"type": "progress", "data": {"value": value, "max": 100, "node": node, "prompt_id": PROMPT_ID}})
            .to_string(),
    )
}

fn frame(payload: &[u8]) -> Message {
    let mut bytes = vec![0, 0, 0, 1, 0, 0, 0, 2];
    bytes.extend_from_slice(payload);
    Message::Binary(bytes)
}

/// Accept one socket, replay `frames`, then hold the connection until
/// the client hangs up. Resolves to the request URI.
async fn spawn_ws_server(frames: Vec<Message>) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());

    let handle = tokio::spawn(async move {
        let (tcp, _) = listener.accept().await.unwrap();
        let mut uri = String::new();
        let mut ws = tokio_tungstenite::accept_hdr_async(tcp, |req: &Request, resp: Response| {
            uri = req.uri().to_string();
            Ok::<_, ErrorResponse>(resp)
        })
        .await
        .unwrap();

        for msg in frames {
            let closing = matches!(msg, Message::Close(_));
            ws.send(msg).await.unwrap();
            if closing {
                return uri;
            }
        }
        while let Some(Ok(_)) = ws.next().await {}
        uri
    });
    (url, handle)
}

/// Backend whose readiness check passes; no submit route mounted.
async fn ready_backend() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exec_info": {"queue_remaining": 0}})))
        .mount(&server)
        .await;
    server
}

async fn mock_backend() -> MockServer {
    let server = ready_backend().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"prompt_id": PROMPT_ID, "number": 1})))
        .expect(1)
        .mount(&server)
        .await;
    server
}

struct Harness {
    facade: JobFacade,
    artifacts: Arc<MemoryArtifactStore>,
    records: Arc<MemoryJobStore>,
    input_dir: tempfile::TempDir,
}

async fn harness(http: &MockServer, ws_url: String) -> Harness {
    harness_with_timeout(http, ws_url, Duration::from_secs(5)).await
}

async fn harness_with_timeout(http: &MockServer, ws_url: String, job_timeout: Duration) -> Harness {
    let input_dir = tempfile::tempdir().unwrap();
    let artifacts = Arc::new(MemoryArtifactStore::new());
    artifacts
        .upload_bytes("abc/before", b"before-image".to_vec(), "image/png")
        .await
        .unwrap();
    let records = Arc::new(MemoryJobStore::new());

    let config = PipelineConfig {
        comfyui_api_url: http.uri(),
        comfyui_ws_url: ws_url,
        input_dir: input_dir.path().to_path_buf(),
        ready_policy: RetryPolicy::fixed(Duration::from_millis(10), 5),
        connect_policy: RetryPolicy::fixed(Duration::from_millis(10), 5),
        job_timeout,
        ..PipelineConfig::default()
    };
    let runner = GenerationRunner::new(
        &config,
        Arc::new(template()),
        artifacts.clone(),
        JobStatusTracker::new(records.clone()),
    )
    .unwrap();

    Harness {
        facade: JobFacade::new(Arc::new(runner), artifacts.clone(), config.signed_url_ttl),
        artifacts,
        records,
        input_dir,
    }
}

fn submit_input() -> JobInput {
    JobInput {
        session_id: "abc".into(),
        prompt: "a cat".into(),
    }
}

#[tokio::test]
async fn successful_run_stores_image_and_reports_result() {
    let http = mock_backend().await;
    let (ws_url, ws_server) = spawn_ws_server(vec![
        executing(Some("1")),
        frame(b"preview"),
        executing(Some("11")),
        progress("11", 50),
        frame(PAYLOAD),
        executing(None),
    ])
    .await;
    let h = harness(&http, ws_url).await;

    let handle = h.facade.submit_job(submit_input()).await;
    let poll = h
        .facade
        .poll_job(&handle, "abc", Duration::from_secs(10))
        .await
        .unwrap();

    assert_matches!(poll, JobPoll::Ready(result) => {
        assert_eq!(result.base64_image, booth_pipeline::runner::png_data_url(PAYLOAD));
        assert!(result.signed_url.starts_with("memory://abc/after"));
    });

    // Socket addressed by session id.
    assert_eq!(ws_server.await.unwrap(), "/ws?clientId=abc");

    // Input staged under the session id.
    let staged = std::fs::read(h.input_dir.path().join("abc")).unwrap();
    assert_eq!(staged, b"before-image");

    // Artifact stored once, header stripped.
    let blob = h.artifacts.get("abc/after").await.unwrap();
    assert_eq!(blob.bytes, PAYLOAD);
    assert_eq!(blob.content_type, "image/png");

    // Submitted workflow carries the per-job parameters.
    let requests = http.received_requests().await.unwrap();
    let submit = requests
        .iter()
        .find(|r| r.method.as_str() == "POST")
        .unwrap();
    let body: Value = serde_json::from_slice(&submit.body).unwrap();
    assert_eq!(body["client_id"], "abc");
    assert_eq!(body["prompt"]["1"]["inputs"]["image"], "abc");
    assert_eq!(body["prompt"]["9"]["inputs"]["text"], "portrait, a cat");
    assert!(body["prompt"]["11"]["inputs"]["seed"].as_u64().unwrap() >= 1);
    assert_eq!(body["prompt"]["4"], json!({"class_type": "CheckpointLoaderSimple", "inputs": {"ckpt_name": "model.safetensors"}}));

    // Status document.
    let record = h.records.get("abc").await.unwrap().unwrap();
    assert_eq!(record.status, Some(JobStatus::Completed));
    assert_eq!(record.progress, 100);
    assert_eq!(record.prompt_id.as_deref(), Some(PROMPT_ID));
    assert_eq!(record.prompt.as_deref(), Some("a cat"));
    assert_eq!(record.generation_count, 1);
    assert_eq!(record.generation_start_times.len(), 1);
    assert_eq!(record.generation_end_times.len(), 1);
}

#[tokio::test]
async fn socket_closing_mid_run_fails_the_job() {
    let http = mock_backend().await;
    let (ws_url, _ws_server) =
        spawn_ws_server(vec![executing(Some("11")), progress("11", 30), Message::Close(None)]).await;
    let h = harness(&http, ws_url).await;

    let handle = h.facade.submit_job(submit_input()).await;
    let poll = h
        .facade
        .poll_job(&handle, "abc", Duration::from_secs(10))
        .await
        .unwrap();

    assert_matches!(poll, JobPoll::Error(reason) if reason.contains("closed"));
    assert!(h.artifacts.get("abc/after").await.is_none());

    let record = h.records.get("abc").await.unwrap().unwrap();
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert!(record.generation_end_times.is_empty());
    assert!(record.error.is_some());
}

#[tokio::test]
async fn backend_execution_error_fails_the_job() {
    let http = mock_backend().await;
    let error = Message::Text(
        json!({"type": "execution_error", "data": {
            "prompt_id": PROMPT_ID, "node_id": "11",
            "exception_message": "CUDA out of memory", "exception_type": "RuntimeError"
        }})
        .to_string(),
    );
    let (ws_url, _ws_server) = spawn_ws_server(vec![executing(Some("11")), error]).await;
    let h = harness(&http, ws_url).await;

    let handle = h.facade.submit_job(submit_input()).await;
    let poll = h
        .facade
        .poll_job(&handle, "abc", Duration::from_secs(10))
        .await
        .unwrap();

    assert_matches!(poll, JobPoll::Error(reason) if reason.contains("CUDA out of memory"));
    let record = h.records.get("abc").await.unwrap().unwrap();
    assert_eq!(record.status, Some(JobStatus::Failed));
}

// ---------------------------------------------------------------------------
// Submission failures
// ---------------------------------------------------------------------------

async fn poll_settled(h: &Harness, handle: &str) -> JobPoll {
    h.facade
        .poll_job(handle, "abc", Duration::from_secs(10))
        .await
        .unwrap()
}

#[tokio::test]
async fn rejected_submission_fails_the_job() {
    let http = ready_backend().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(500).set_body_string("prompt has no outputs"))
        .expect(1)
        .mount(&http)
        .await;
    let (ws_url, _ws_server) = spawn_ws_server(vec![]).await;
    let h = harness(&http, ws_url).await;

    let handle = h.facade.submit_job(submit_input()).await;
    let poll = poll_settled(&h, &handle).await;

    assert_matches!(
        poll,
        JobPoll::Error(reason) if reason.contains("500") && reason.contains("prompt has no outputs")
    );
    assert!(h.artifacts.get("abc/after").await.is_none());

    let record = h.records.get("abc").await.unwrap().unwrap();
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert_eq!(record.generation_count, 0);
    assert!(record.error.unwrap().contains("prompt has no outputs"));
}

#[tokio::test]
async fn malformed_submit_response_fails_the_job() {
    let http = ready_backend().await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(1)
        .mount(&http)
        .await;
    let (ws_url, _ws_server) = spawn_ws_server(vec![]).await;
    let h = harness(&http, ws_url).await;

    let handle = h.facade.submit_job(submit_input()).await;
    let poll = poll_settled(&h, &handle).await;

    assert_matches!(poll, JobPoll::Error(reason) if reason.contains("Malformed"));
    let record = h.records.get("abc").await.unwrap().unwrap();
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert_eq!(record.prompt_id, None);
}

#[tokio::test]
async fn backend_that_never_becomes_ready_fails_the_job() {
    let http = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&http)
        .await;
    Mock::given(method("POST"))
        .and(path("/prompt"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&http)
        .await;
    let h = harness(&http, "ws://127.0.0.1:9".into()).await;

    let handle = h.facade.submit_job(submit_input()).await;
    let poll = poll_settled(&h, &handle).await;

    assert_matches!(poll, JobPoll::Error(reason) if reason.contains("unavailable"));
    assert!(!h.input_dir.path().join("abc").exists());

    let record = h.records.get("abc").await.unwrap().unwrap();
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert_eq!(record.prompt.as_deref(), Some("a cat"));
}

// ---------------------------------------------------------------------------
// Timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn silent_run_is_recorded_as_failed_after_timeout() {
    let http = mock_backend().await;
    let (ws_url, _ws_server) = spawn_ws_server(vec![executing(Some("11")), progress("11", 10)]).await;
    let h = harness_with_timeout(&http, ws_url, Duration::from_millis(200)).await;

    let handle = h.facade.submit_job(submit_input()).await;
    let poll = poll_settled(&h, &handle).await;

    // Callers keep seeing "still processing" until the handle is evicted.
    assert_eq!(poll, JobPoll::Pending);

    let record = h.records.get("abc").await.unwrap().unwrap();
    assert_eq!(record.status, Some(JobStatus::Failed));
    assert!(record.error.unwrap().contains("No completion within"));
    assert!(record.generation_end_times.is_empty());
    assert!(h.artifacts.get("abc/after").await.is_none());
}
