//! Events emitted by the execution monitor.
//!
//! These represent the high-level state changes of one run that the rest
//! of the platform cares about. They are produced by
//! [`ExecutionMonitor`](crate::monitor::ExecutionMonitor) after
//! interpreting raw WebSocket frames, in the order the backend emitted
//! them, and delivered to an [`ExecutionObserver`].

use async_trait::async_trait;
use serde::Serialize;

/// A run-level event for the active prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The backend moved on to `node`.
    NodeStarted { prompt_id: String, node: String },

    /// The progress-reporting node advanced.
    Progress {
        prompt_id: String,
        node: String,
        /// Completion percentage (0-100).
        percent: u8,
    },

    /// A binary frame from a sink node was accepted as the artifact.
    ArtifactCaptured {
        prompt_id: String,
        node: String,
        bytes: usize,
    },

    /// The backend signalled terminal completion of the prompt.
    Executed { prompt_id: String },
}

/// Receives [`ExecutionEvent`]s while a run is being monitored.
#[async_trait]
pub trait ExecutionObserver: Send {
    async fn on_event(&mut self, event: &ExecutionEvent);
}

/// An observer that discards every event.
pub struct NoopObserver;

#[async_trait]
impl ExecutionObserver for NoopObserver {
    async fn on_event(&mut self, _event: &ExecutionEvent) {}
}

/// Collects events in order; handy for inspection and tests.
#[async_trait]
impl ExecutionObserver for Vec<ExecutionEvent> {
    async fn on_event(&mut self, event: &ExecutionEvent) {
        self.push(event.clone());
    }
}
