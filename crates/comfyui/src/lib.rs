//! ComfyUI WebSocket and REST client library.
//!
//! Provides workflow submission over HTTP, the duplex socket client,
//! bounded retry policies, typed message parsing, and the execution
//! monitor that turns one run's event stream into a single image
//! artifact.

pub mod api;
pub mod client;
pub mod events;
pub mod messages;
pub mod monitor;
pub mod retry;
