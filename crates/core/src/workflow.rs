//! Workflow templates in the ComfyUI "API format".
//!
//! A template is a JSON object mapping node identifiers to node
//! descriptors of the shape `{"class_type": "...", "inputs": {...}}`.
//! It is loaded once per worker and never mutated in place:
//! [`Workflow::mutate`] and [`prepare_workflow`] always return an
//! independent copy, so sequential jobs served from one loaded template
//! cannot contaminate each other.
//!
//! Node class types are classified once at load time into a closed
//! [`NodeKind`] enumeration, and the nodes that jobs parametrize are
//! addressed by role through [`WorkflowBindings`] instead of literal
//! node ids scattered across the code.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Identifier of a node within a workflow template (e.g. `"11"`).
pub type NodeId = String;

/// Default class type of the node that emits the final image as a
/// binary socket frame.
pub const DEFAULT_SINK_CLASS: &str = "SaveImageWebsocket";

/// Input field receiving the sampler seed.
pub const SEED_FIELD: &str = "seed";

/// Input field receiving the staged input image name.
pub const IMAGE_FIELD: &str = "image";

/// Input field receiving the positive prompt text.
pub const PROMPT_FIELD: &str = "text";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised while loading or parametrizing a workflow template.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// The targeted node does not exist in the template.
    #[error("Workflow node '{0}' not found")]
    MissingNode(NodeId),

    /// The targeted node exists but has no such input field.
    #[error("Workflow node '{node}' has no input field '{field}'")]
    MissingField { node: NodeId, field: String },

    /// The template is structurally valid JSON but unusable.
    #[error("Invalid workflow template: {0}")]
    InvalidTemplate(String),

    /// The template file could not be read.
    #[error("Failed to read workflow template: {0}")]
    Io(#[from] std::io::Error),

    /// The template is not valid workflow JSON.
    #[error("Failed to parse workflow template: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Node kinds
// ---------------------------------------------------------------------------

/// Recognized node roles, resolved once from the class type string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Emits the final image over the duplex socket.
    ImageSink,
    /// Loads model weights (`CheckpointLoaderSimple` and friends).
    CheckpointLoader,
    /// A denoising sampler (`KSampler`, `KSamplerAdvanced`).
    Sampler,
    Other,
}

impl NodeKind {
    /// Classify a node class type. `sink_class` names the class type
    /// that emits the final binary artifact.
    pub fn classify(class_type: &str, sink_class: &str) -> Self {
        if class_type == sink_class {
            Self::ImageSink
        } else if class_type.contains("CheckpointLoader") {
            Self::CheckpointLoader
        } else if class_type.starts_with("KSampler") {
            Self::Sampler
        } else {
            Self::Other
        }
    }
}

// ---------------------------------------------------------------------------
// Template
// ---------------------------------------------------------------------------

/// A single node descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub class_type: String,
    #[serde(default)]
    pub inputs: serde_json::Map<String, Value>,
    /// Fields the backend tolerates but the pipeline never reads (`_meta`).
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

/// A loaded workflow template.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    nodes: BTreeMap<NodeId, WorkflowNode>,
    kinds: HashMap<NodeId, NodeKind>,
}

impl Serialize for Workflow {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.nodes.serialize(serializer)
    }
}

impl Workflow {
    /// Read and parse a template file.
    pub fn load(path: impl AsRef<Path>, sink_class: &str) -> Result<Self, WorkflowError> {
        let text = std::fs::read_to_string(path)?;
        Self::parse(&text, sink_class)
    }

    /// Parse a template from its JSON text.
    pub fn parse(text: &str, sink_class: &str) -> Result<Self, WorkflowError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(value, sink_class)
    }

    /// Build a template from an already-parsed JSON value.
    pub fn from_value(value: Value, sink_class: &str) -> Result<Self, WorkflowError> {
        if !value.is_object() {
            return Err(WorkflowError::InvalidTemplate(
                "top-level value must be an object of nodes".into(),
            ));
        }
        let nodes: BTreeMap<NodeId, WorkflowNode> = serde_json::from_value(value)?;
        if nodes.is_empty() {
            return Err(WorkflowError::InvalidTemplate("template has no nodes".into()));
        }

        let kinds = nodes
            .iter()
            .map(|(id, node)| (id.clone(), NodeKind::classify(&node.class_type, sink_class)))
            .collect();

        Ok(Self { nodes, kinds })
    }

    /// Number of nodes in the template.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node descriptor.
    pub fn node(&self, node_id: &str) -> Option<&WorkflowNode> {
        self.nodes.get(node_id)
    }

    /// Class type of `node_id`.
    pub fn class_type_of(&self, node_id: &str) -> Result<&str, WorkflowError> {
        self.nodes
            .get(node_id)
            .map(|n| n.class_type.as_str())
            .ok_or_else(|| WorkflowError::MissingNode(node_id.to_string()))
    }

    /// Resolved role of `node_id`, if the node exists.
    pub fn kind_of(&self, node_id: &str) -> Option<NodeKind> {
        self.kinds.get(node_id).copied()
    }

    /// Identifiers of every node classified as `kind`.
    pub fn nodes_of_kind(&self, kind: NodeKind) -> HashSet<NodeId> {
        self.kinds
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Read an input field of a node.
    pub fn field(&self, node_id: &str, field: &str) -> Result<&Value, WorkflowError> {
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| WorkflowError::MissingNode(node_id.to_string()))?;
        node.inputs
            .get(field)
            .ok_or_else(|| WorkflowError::MissingField {
                node: node_id.to_string(),
                field: field.to_string(),
            })
    }

    /// Return a copy of this template with `(node_id, field)` replaced by
    /// `value`. The receiver is left untouched.
    pub fn mutate(&self, node_id: &str, field: &str, value: Value) -> Result<Self, WorkflowError> {
        self.field(node_id, field)?;
        let mut copy = self.clone();
        copy.set_field(node_id, field, value)?;
        Ok(copy)
    }

    fn set_field(&mut self, node_id: &str, field: &str, value: Value) -> Result<(), WorkflowError> {
        let slot = self
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| WorkflowError::MissingNode(node_id.to_string()))?
            .inputs
            .get_mut(field)
            .ok_or_else(|| WorkflowError::MissingField {
                node: node_id.to_string(),
                field: field.to_string(),
            })?;
        *slot = value;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Role bindings
// ---------------------------------------------------------------------------

/// Which template nodes play which role in a generation run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowBindings {
    /// Node whose `seed` input is randomized per job.
    pub seed_node: NodeId,
    /// Node whose `image` input names the staged input image.
    pub image_node: NodeId,
    /// Node whose `text` input gets the caller prompt appended.
    pub prompt_node: NodeId,
    /// Node whose `progress` events drive the job progress percentage.
    pub progress_node: NodeId,
    /// Class type of the node that emits the final image.
    pub sink_class: String,
}

impl Default for WorkflowBindings {
    fn default() -> Self {
        Self {
            seed_node: "11".into(),
            image_node: "1".into(),
            prompt_node: "9".into(),
            progress_node: "11".into(),
            sink_class: DEFAULT_SINK_CLASS.into(),
        }
    }
}

impl WorkflowBindings {
    /// Check that every bound `(node, field)` pair exists in `workflow`,
    /// the prompt field is a string, and the template has a sink node.
    pub fn validate(&self, workflow: &Workflow) -> Result<(), WorkflowError> {
        workflow.field(&self.seed_node, SEED_FIELD)?;
        workflow.field(&self.image_node, IMAGE_FIELD)?;
        if !workflow.field(&self.prompt_node, PROMPT_FIELD)?.is_string() {
            return Err(WorkflowError::InvalidTemplate(format!(
                "node '{}' field '{PROMPT_FIELD}' must be a string",
                self.prompt_node
            )));
        }
        workflow.class_type_of(&self.progress_node)?;
        if workflow.nodes_of_kind(NodeKind::ImageSink).is_empty() {
            return Err(WorkflowError::InvalidTemplate(format!(
                "template has no '{}' node",
                self.sink_class
            )));
        }
        Ok(())
    }
}

/// Per-job parameters applied to the template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationParams {
    pub session_id: String,
    pub prompt: String,
    pub seed: u64,
}

impl GenerationParams {
    /// Parameters with a fresh random seed in `[1, 2^64)`.
    pub fn new(session_id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            prompt: prompt.into(),
            seed: rand::rng().random_range(1..=u64::MAX),
        }
    }
}

/// Produce the job-specific workflow: seed replaced, image input set to
/// the session id, and the caller prompt appended to the template's
/// prompt text. `template` is not modified.
pub fn prepare_workflow(
    template: &Workflow,
    bindings: &WorkflowBindings,
    params: &GenerationParams,
) -> Result<Workflow, WorkflowError> {
    let base_text = template
        .field(&bindings.prompt_node, PROMPT_FIELD)?
        .as_str()
        .ok_or_else(|| {
            WorkflowError::InvalidTemplate(format!(
                "node '{}' field '{PROMPT_FIELD}' must be a string",
                bindings.prompt_node
            ))
        })?;
    let prompt_text = format!("{base_text}{}", params.prompt);

    let mut workflow = template.clone();
    workflow.set_field(&bindings.seed_node, SEED_FIELD, Value::from(params.seed))?;
    workflow.set_field(
        &bindings.image_node,
        IMAGE_FIELD,
        Value::String(params.session_id.clone()),
    )?;
    workflow.set_field(&bindings.prompt_node, PROMPT_FIELD, Value::String(prompt_text))?;
    Ok(workflow)
}
