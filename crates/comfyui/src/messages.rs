//! ComfyUI WebSocket message types and parser.
//!
//! ComfyUI sends JSON messages over WebSocket with the shape
//! `{"type": "<kind>", "data": {...}}`. This module deserializes them
//! into a strongly-typed [`ComfyUIMessage`] enum. Message kinds the
//! pipeline does not act on become [`ComfyUIMessage::Other`] so that new
//! server versions never break parsing.

use serde::Deserialize;

/// ComfyUI WebSocket messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ComfyUIMessage {
    /// A specific node is currently executing (or execution finished when `node` is `None`).
    Executing(ExecutingData),

    /// Progress update from a long-running node (e.g. KSampler).
    Progress(ProgressData),

    /// Execution failed with an error.
    ExecutionError(ErrorData),

    /// Any other message kind, carried by name only.
    Other(String),
}

/// Payload for `executing` messages.
///
/// When `node` is `None`, execution of the prompt has completed.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    #[serde(default)]
    pub prompt_id: Option<String>,
}

/// Payload for `progress` messages (step-level progress within a node).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProgressData {
    /// Current step number.
    pub value: u32,
    /// Total number of steps, when the server reports it.
    #[serde(default)]
    pub max: Option<u32>,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Completion percentage (0-100). Without a usable `max` the raw
    /// step value is taken as the percentage.
    pub fn percent(&self) -> u8 {
        let percent = match self.max {
            Some(max) if max > 0 => (u64::from(self.value) * 100 / u64::from(max)) as u32,
            _ => self.value,
        };
        percent.min(100) as u8
    }
}

/// Payload for `execution_error` messages.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
    #[serde(default)]
    pub exception_message: String,
    #[serde(default)]
    pub exception_type: String,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Parse a ComfyUI WebSocket text message into a typed enum.
///
/// Returns `Err` for malformed JSON or a known `type` whose payload does
/// not match. Unknown types parse to [`ComfyUIMessage::Other`].
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    let envelope: Envelope = serde_json::from_str(text)?;
    let data = envelope.data;

    Ok(match envelope.kind.as_str() {
        "executing" => ComfyUIMessage::Executing(serde_json::from_value(data)?),
        "progress" => ComfyUIMessage::Progress(serde_json::from_value(data)?),
        "execution_error" => ComfyUIMessage::ExecutionError(serde_json::from_value(data)?),
        _ => ComfyUIMessage::Other(envelope.kind),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcasts_without_handlers_are_carried_by_name() {
        let status = r#"{"type":"status","data":{"status":{"exec_info":{"queue_remaining":3}},"sid":"x"}}"#;
        assert_eq!(parse_message(status).unwrap(), ComfyUIMessage::Other("status".into()));

        let cached = r#"{"type":"execution_cached","data":{"prompt_id":"abc","nodes":["4"]}}"#;
        assert_eq!(
            parse_message(cached).unwrap(),
            ComfyUIMessage::Other("execution_cached".into())
        );
    }

    #[test]
    fn parse_executing_with_node() {
        let json = r#"{"type":"executing","data":{"node":"42","prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::Executing(data) => {
                assert_eq!(data.node.as_deref(), Some("42"));
                assert_eq!(data.prompt_id.as_deref(), Some("xyz"));
            }
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn parse_executing_finished() {
        let json = r#"{"type":"executing","data":{"node":null,"prompt_id":"xyz"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::Executing(data) => {
                assert!(data.node.is_none());
            }
            other => panic!("Expected Executing, got {other:?}"),
        }
    }

    #[test]
    fn parse_progress_message() {
        let json = r#"{"type":"progress","data":{"value":5,"max":20,"prompt_id":"p","node":"11"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::Progress(data) => {
                assert_eq!(data.value, 5);
                assert_eq!(data.max, Some(20));
                assert_eq!(data.node.as_deref(), Some("11"));
                assert_eq!(data.percent(), 25);
            }
            other => panic!("Expected Progress, got {other:?}"),
        }
    }

    #[test]
    fn progress_percent_without_max_uses_value() {
        let data = ProgressData {
            value: 50,
            max: None,
            prompt_id: None,
            node: None,
        };
        assert_eq!(data.percent(), 50);

        let over = ProgressData {
            value: 30,
            max: Some(20),
            ..data
        };
        assert_eq!(over.percent(), 100);
    }

    #[test]
    fn parse_execution_error_message() {
        let json = r#"{"type":"execution_error","data":{"prompt_id":"abc","node_id":"5","exception_message":"out of memory","exception_type":"RuntimeError"}}"#;
        let msg = parse_message(json).unwrap();
        match msg {
            ComfyUIMessage::ExecutionError(data) => {
                assert_eq!(data.prompt_id, "abc");
                assert_eq!(data.node_id.as_deref(), Some("5"));
                assert_eq!(data.exception_message, "out of memory");
                assert_eq!(data.exception_type, "RuntimeError");
            }
            other => panic!("Expected ExecutionError, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_carried_by_name() {
        let json = r#"{"type":"crystools.monitor","data":{"cpu":3}}"#;
        assert_eq!(
            parse_message(json).unwrap(),
            ComfyUIMessage::Other("crystools.monitor".into())
        );
    }

    #[test]
    fn parse_invalid_json_returns_error() {
        assert!(parse_message("not json at all").is_err());
        assert!(parse_message(r#"{"type":"progress","data":{"value":"x"}}"#).is_err());
    }
}
