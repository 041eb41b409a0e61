//! Execution monitor: the per-run protocol state machine.
//!
//! Watches one ComfyUI socket for the events of a single prompt and
//! extracts the final image:
//!
//! ```text
//! Connecting -> Connected -> WaitingNode -> Done
//! ```
//!
//! - `executing` for the active prompt moves the current-node pointer;
//!   `node: null` means the run finished (`Done`).
//! - `progress` for the active prompt on the progress node is forwarded
//!   as a percentage.
//! - Binary frames are `8-byte header + image`. A frame is kept only
//!   while the current node is a sink node; anything else is a preview
//!   and is dropped. The last accepted frame wins.
//!
//! Reaching `Done` is the only successful exit. A closed or failed socket
//! before that is an error, and so is a run that stays silent past the
//! deadline. The monitor never persists anything: it hands the artifact
//! back to its caller.

use std::collections::HashSet;
use std::time::Duration;

use booth_core::workflow::{NodeId, NodeKind, Workflow};
use futures::{Stream, StreamExt};
use tokio_tungstenite::tungstenite::{self, Message};

use crate::client::{ComfyUIClient, ComfyUIClientError, ComfyUIConnection};
use crate::events::{ExecutionEvent, ExecutionObserver};
use crate::messages::{parse_message, ComfyUIMessage};
use crate::retry::RetryPolicy;

/// Length of the framing header preceding binary image payloads.
pub const FRAME_HEADER_LEN: usize = 8;

/// Where the monitor is in the life of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Connecting,
    Connected,
    WaitingNode,
    Done,
}

/// Errors that end a monitored run without an artifact.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    /// The socket could not be opened.
    #[error(transparent)]
    Connection(#[from] ComfyUIClientError),

    /// The socket closed before the terminal event.
    #[error("ComfyUI socket closed before completion (last node: {})", current_node.as_deref().unwrap_or("none"))]
    Closed { current_node: Option<String> },

    /// Reading from the socket failed.
    #[error("ComfyUI socket receive error: {0}")]
    Receive(String),

    /// The backend reported an execution error for the active prompt.
    #[error("ComfyUI execution error at node {}: {message}", node.as_deref().unwrap_or("?"))]
    Backend {
        node: Option<String>,
        message: String,
    },

    /// The run finished without any sink frame.
    #[error("Run completed without producing an image")]
    MissingArtifact,

    /// No terminal event within the deadline.
    #[error("No completion event within {0:?}")]
    Timeout(Duration),
}

/// Tracks one prompt on one socket.
#[derive(Debug)]
pub struct ExecutionMonitor {
    sink_nodes: HashSet<NodeId>,
    progress_node: NodeId,
    state: MonitorState,
    prompt_id: Option<String>,
    current_node: Option<String>,
    artifact: Option<Vec<u8>>,
}

impl ExecutionMonitor {
    /// * `sink_nodes`    - nodes whose binary frames carry the final image.
    /// * `progress_node` - node whose `progress` events are reported.
    pub fn new(sink_nodes: HashSet<NodeId>, progress_node: impl Into<NodeId>) -> Self {
        Self {
            sink_nodes,
            progress_node: progress_node.into(),
            state: MonitorState::Connecting,
            prompt_id: None,
            current_node: None,
            artifact: None,
        }
    }

    /// Monitor for `workflow`, taking its [`NodeKind::ImageSink`] nodes
    /// as sinks.
    pub fn for_workflow(workflow: &Workflow, progress_node: impl Into<NodeId>) -> Self {
        Self::new(workflow.nodes_of_kind(NodeKind::ImageSink), progress_node)
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    /// Node named by the last `executing` event for the active prompt.
    pub fn current_node(&self) -> Option<&str> {
        self.current_node.as_deref()
    }

    /// Open the socket for `client_id`, retrying while refused.
    pub async fn connect(
        &mut self,
        client: &ComfyUIClient,
        client_id: &str,
        policy: &RetryPolicy,
    ) -> Result<ComfyUIConnection, MonitorError> {
        self.state = MonitorState::Connecting;
        let conn = client.connect_with_retry(client_id, policy).await?;
        self.state = MonitorState::Connected;
        Ok(conn)
    }

    /// Drive the protocol for `prompt_id` until `Done`, returning the
    /// accepted image payload (header stripped).
    pub async fn run<S, O>(
        &mut self,
        prompt_id: &str,
        stream: &mut S,
        observer: &mut O,
        deadline: Duration,
    ) -> Result<Vec<u8>, MonitorError>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
        O: ExecutionObserver + ?Sized,
    {
        self.prompt_id = Some(prompt_id.to_string());
        self.state = MonitorState::WaitingNode;
        self.artifact = None;

        match tokio::time::timeout(deadline, self.drive(stream, observer)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    prompt_id,
                    current_node = ?self.current_node,
                    deadline_secs = deadline.as_secs(),
                    "Timed out waiting for completion",
                );
                Err(MonitorError::Timeout(deadline))
            }
        }
    }

    async fn drive<S, O>(&mut self, stream: &mut S, observer: &mut O) -> Result<Vec<u8>, MonitorError>
    where
        S: Stream<Item = Result<Message, tungstenite::Error>> + Unpin,
        O: ExecutionObserver + ?Sized,
    {
        while let Some(frame) = stream.next().await {
            let event = match frame {
                Ok(Message::Text(text)) => self.handle_text(&text)?,
                Ok(Message::Binary(bytes)) => self.handle_binary(bytes),
                Ok(Message::Close(frame)) => {
                    tracing::warn!(?frame, current_node = ?self.current_node, "ComfyUI socket closed");
                    return Err(self.closed());
                }
                // Ping/Pong are answered by tungstenite.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => None,
                Err(e) => {
                    tracing::error!(error = %e, "WebSocket receive error");
                    return Err(MonitorError::Receive(e.to_string()));
                }
            };

            if let Some(event) = event {
                observer.on_event(&event).await;
            }

            if self.state == MonitorState::Done {
                return self.artifact.take().ok_or(MonitorError::MissingArtifact);
            }
        }

        Err(self.closed())
    }

    fn closed(&self) -> MonitorError {
        MonitorError::Closed {
            current_node: self.current_node.clone(),
        }
    }

    fn is_active(&self, prompt_id: Option<&str>) -> bool {
        prompt_id.is_some() && prompt_id == self.prompt_id.as_deref()
    }

    /// Interpret one text frame.
    fn handle_text(&mut self, text: &str) -> Result<Option<ExecutionEvent>, MonitorError> {
        let msg = match parse_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Failed to parse ComfyUI message");
                return Ok(None);
            }
        };
        let prompt_id = self.prompt_id.clone().unwrap_or_default();

        match msg {
            ComfyUIMessage::Executing(data) if self.is_active(data.prompt_id.as_deref()) => {
                match data.node {
                    None => {
                        tracing::info!(prompt_id = %prompt_id, "Execution completed (all nodes done)");
                        self.state = MonitorState::Done;
                        Ok(Some(ExecutionEvent::Executed { prompt_id }))
                    }
                    Some(node) => {
                        tracing::debug!(prompt_id = %prompt_id, node = %node, "Executing node");
                        self.current_node = Some(node.clone());
                        Ok(Some(ExecutionEvent::NodeStarted { prompt_id, node }))
                    }
                }
            }
            ComfyUIMessage::Progress(data)
                if self.is_active(data.prompt_id.as_deref())
                    && data.node.as_deref() == Some(self.progress_node.as_str()) =>
            {
                let percent = data.percent();
                tracing::debug!(prompt_id = %prompt_id, value = data.value, max = ?data.max, percent, "Generation progress");
                Ok(Some(ExecutionEvent::Progress {
                    prompt_id,
                    node: self.progress_node.clone(),
                    percent,
                }))
            }
            ComfyUIMessage::ExecutionError(data) if self.is_active(Some(&data.prompt_id)) => {
                tracing::error!(
                    prompt_id = %prompt_id,
                    node_id = ?data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                Err(MonitorError::Backend {
                    node: data.node_id,
                    message: data.exception_message,
                })
            }
            other => {
                tracing::trace!(kind = ?other, "Ignoring ComfyUI message");
                Ok(None)
            }
        }
    }

    /// Interpret one binary frame.
    fn handle_binary(&mut self, bytes: Vec<u8>) -> Option<ExecutionEvent> {
        let node = match &self.current_node {
            Some(node) if self.sink_nodes.contains(node) => node.clone(),
            _ => {
                tracing::trace!(len = bytes.len(), "Ignoring binary message (preview image)");
                return None;
            }
        };
        if bytes.len() <= FRAME_HEADER_LEN {
            tracing::warn!(len = bytes.len(), node = %node, "Binary frame without image payload");
            return None;
        }

        let payload = bytes[FRAME_HEADER_LEN..].to_vec();
        let len = payload.len();
        self.artifact = Some(payload);
        tracing::debug!(node = %node, bytes = len, "Captured sink image");

        Some(ExecutionEvent::ArtifactCaptured {
            prompt_id: self.prompt_id.clone().unwrap_or_default(),
            node,
            bytes: len,
        })
    }
}
