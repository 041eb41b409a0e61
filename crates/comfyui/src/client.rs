//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the socket base URL for a single ComfyUI
//! instance. Call [`ComfyUIClient::connect`] to establish a live
//! [`ComfyUIConnection`] addressed by a client id, or
//! [`ComfyUIClient::connect_with_retry`] to wait out a backend that is
//! still starting.

use reqwest::Url;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::retry::{retry_with_backoff, RetryError, RetryPolicy};

/// The raw socket type produced by [`ComfyUIClient::connect`].
pub type ComfyUIStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI instance's socket endpoint.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
}

/// A live WebSocket connection to a ComfyUI instance.
#[derive(Debug)]
pub struct ComfyUIConnection {
    /// Client ID sent during the WebSocket handshake. Events for prompts
    /// submitted with the same `client_id` are routed to this socket.
    pub client_id: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// * `ws_url` - WebSocket base URL, e.g. `ws://host:8188`.
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Full socket URL for `client_id`, with the id percent-encoded.
    pub fn socket_url(&self, client_id: &str) -> Result<String, ComfyUIClientError> {
        let mut url = Url::parse(&format!("{}/ws", self.ws_url))
            .map_err(|e| ComfyUIClientError::InvalidUrl(format!("{}: {e}", self.ws_url)))?;
        url.query_pairs_mut().append_pair("clientId", client_id);
        Ok(url.into())
    }

    /// Connect to the ComfyUI WebSocket endpoint once.
    pub async fn connect(&self, client_id: &str) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = self.socket_url(client_id)?;

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            if is_connection_refused(&e) {
                ComfyUIClientError::Refused(self.ws_url.clone())
            } else {
                ComfyUIClientError::Connection(format!(
                    "Failed to connect to ComfyUI at {}: {e}",
                    self.ws_url
                ))
            }
        })?;

        tracing::info!(client_id, "Connected to ComfyUI at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id: client_id.to_string(),
            ws_stream,
        })
    }

    /// Connect, retrying only while the backend refuses connections.
    ///
    /// Any other failure is returned immediately. Exhausting `policy`
    /// yields [`ComfyUIClientError::Unavailable`].
    pub async fn connect_with_retry(
        &self,
        client_id: &str,
        policy: &RetryPolicy,
    ) -> Result<ComfyUIConnection, ComfyUIClientError> {
        retry_with_backoff(
            policy,
            "comfyui_connect",
            || self.connect(client_id),
            |e| matches!(e, ComfyUIClientError::Refused(_)),
        )
        .await
        .map_err(|e| match e {
            RetryError::Exhausted { attempts, .. } => ComfyUIClientError::Unavailable {
                ws_url: self.ws_url.clone(),
                attempts,
            },
            RetryError::Fatal(e) => e,
        })
    }
}

fn is_connection_refused(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused
    )
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Nothing is listening yet; worth retrying.
    #[error("Connection refused by ComfyUI at {0}")]
    Refused(String),

    /// The configured socket base URL does not parse.
    #[error("Invalid ComfyUI socket URL {0}")]
    InvalidUrl(String),

    /// Failed to establish the WebSocket connection for another reason.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend kept refusing connections for the whole retry budget.
    #[error("ComfyUI at {ws_url} unavailable after {attempts} connection attempts")]
    Unavailable { ws_url: String, attempts: u32 },
}
