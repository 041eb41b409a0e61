//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the readiness check and workflow submission using [`reqwest`].
//! Submission is a single request/response exchange; only the readiness
//! check is retried.

use serde::Deserialize;

use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};

/// HTTP client for a single ComfyUI instance.
#[derive(Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: Option<i64>,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A 2xx response whose body is not the expected shape.
    #[error("Malformed ComfyUI response: {0}")]
    MalformedResponse(String),

    /// The readiness check never succeeded.
    #[error("ComfyUI not ready after {attempts} attempts: {last_error}")]
    Unavailable { attempts: u32, last_error: String },
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(client: reqwest::Client, api_url: impl Into<String>) -> Self {
        Self {
            client,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Check the backend once with `GET /prompt`. Any 2xx means ready.
    pub async fn check_ready(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/prompt", self.api_url))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    /// Block until the readiness check succeeds, retrying every failure
    /// under `policy`.
    pub async fn wait_until_ready(&self, policy: &RetryPolicy) -> Result<(), ComfyUIApiError> {
        retry_with_backoff(policy, "comfyui_ready", || self.check_ready(), |_| true)
            .await
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, last } => ComfyUIApiError::Unavailable {
                    attempts,
                    last_error: last.to_string(),
                },
                RetryError::Fatal(e) => e,
            })?;
        tracing::debug!(api_url = %self.api_url, "ComfyUI is ready");
        Ok(())
    }

    /// Submit a workflow for execution.
    ///
    /// Sends `POST /prompt` with `{"prompt": workflow, "client_id": ...}`
    /// and returns the server-assigned `prompt_id`.
    pub async fn submit_workflow<W: serde::Serialize + ?Sized>(
        &self,
        workflow: &W,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        let response = Self::ensure_success(response).await?;
        let text = response.text().await?;
        let parsed: SubmitResponse = serde_json::from_str(&text)
            .map_err(|e| ComfyUIApiError::MalformedResponse(format!("{e}: {text}")))?;
        if parsed.prompt_id.is_empty() {
            return Err(ComfyUIApiError::MalformedResponse(
                "empty prompt_id".to_string(),
            ));
        }

        tracing::info!(
            client_id,
            prompt_id = %parsed.prompt_id,
            queue_number = ?parsed.number,
            "Workflow submitted to ComfyUI",
        );
        Ok(parsed)
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn submit_posts_prompt_and_client_id() {
        let server = MockServer::start().await;
        let workflow = json!({"3": {"class_type": "KSampler", "inputs": {"seed": 1}}});

        Mock::given(method("POST"))
            .and(path("/prompt"))
            .and(body_json(json!({"prompt": workflow, "client_id": "abc"})))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"prompt_id": "p-123", "number": 4, "node_errors": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let response = api.submit_workflow(&workflow, "abc").await.unwrap();

        assert_eq!(response.prompt_id, "p-123");
        assert_eq!(response.number, Some(4));
    }

    #[tokio::test]
    async fn submit_rejects_body_without_prompt_id() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"number": 1})))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let result = api.submit_workflow(&json!({}), "abc").await;

        assert_matches!(result, Err(ComfyUIApiError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn submit_surfaces_backend_validation_errors() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(400).set_body_string("invalid prompt"))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let result = api.submit_workflow(&json!({}), "abc").await;

        assert_matches!(
            result,
            Err(ComfyUIApiError::ApiError { status: 400, body }) if body == "invalid prompt"
        );
    }

    #[tokio::test]
    async fn wait_until_ready_retries_until_2xx() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"exec_info": {}})))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(server.uri());
        let policy = RetryPolicy::fixed(Duration::from_millis(5), 10);
        api.wait_until_ready(&policy).await.unwrap();
    }

    #[tokio::test]
    async fn wait_until_ready_gives_up_when_bounded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/prompt"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let api = ComfyUIApi::new(format!("{}/", server.uri()));
        let policy = RetryPolicy::fixed(Duration::from_millis(5), 3);
        let result = api.wait_until_ready(&policy).await;

        assert_matches!(result, Err(ComfyUIApiError::Unavailable { attempts: 3, .. }));
    }
}
