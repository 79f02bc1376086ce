//! Graph node templates, ports, and edges.
//!
//! A stored graph is a list of [`NodeTemplate`]s whose output ports declare
//! [`Target`] edges into other nodes' input ports. The dispatcher
//! instantiates templates into per-request runtime nodes; templates
//! themselves are immutable and shared.

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// The behavior tag of a node. Selects which executor runs it.
///
/// `Custom` covers kinds registered at runtime without touching the
/// dispatcher loop.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Emit a literal text answer fragment.
    Answer,
    /// Boolean branch: fires exactly one of its `true`/`false` outputs.
    Switch,
    /// External HTTP tool call.
    HttpTool,
    /// Retrieval context assembly.
    ContextAssembly,
    /// Language-model completion.
    ModelCompletion,
    /// A kind resolved through the executor registry by tag.
    Custom(String),
}

impl NodeKind {
    /// The wire/registry tag for this kind.
    pub fn as_tag(&self) -> &str {
        match self {
            Self::Answer => "answer",
            Self::Switch => "switch",
            Self::HttpTool => "httpTool",
            Self::ContextAssembly => "contextAssembly",
            Self::ModelCompletion => "modelCompletion",
            Self::Custom(tag) => tag,
        }
    }

    /// Parse a tag; unknown tags become `Custom`.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "answer" => Self::Answer,
            "switch" => Self::Switch,
            "httpTool" => Self::HttpTool,
            "contextAssembly" => Self::ContextAssembly,
            "modelCompletion" => Self::ModelCompletion,
            other => Self::Custom(other.to_string()),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_tag())
    }
}

impl Serialize for NodeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_tag())
    }
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        if tag.is_empty() {
            return Err(D::Error::custom("node kind tag must not be empty"));
        }
        Ok(Self::from_tag(&tag))
    }
}

/// One directed edge endpoint: feed this value into `input_key` of `node_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub node_id: String,
    pub input_key: String,
}

/// A declared input slot on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputPort {
    pub key: String,

    /// Pre-seeded static value, or `None` until fed by an upstream edge.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Whether the node cannot run until this input is present.
    #[serde(default = "default_true")]
    pub required: bool,
}

fn default_true() -> bool {
    true
}

impl InputPort {
    pub fn required(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            required: true,
        }
    }

    pub fn optional(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            required: false,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }
}

/// A declared output slot on a node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputPort {
    pub key: String,

    /// Set once by the executor's result map; immutable afterwards.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,

    /// Include this output in the per-node response trace.
    #[serde(default)]
    pub response_visible: bool,

    /// Append this output to the answer text and stream it immediately.
    #[serde(default)]
    pub answer_fragment: bool,

    /// Applied when the executor's result map omits this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub targets: Vec<Target>,
}

impl OutputPort {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
            response_visible: false,
            answer_fragment: false,
            default: None,
            targets: Vec::new(),
        }
    }

    pub fn response_visible(mut self) -> Self {
        self.response_visible = true;
        self
    }

    pub fn answer_fragment(mut self) -> Self {
        self.answer_fragment = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn target(mut self, node_id: impl Into<String>, input_key: impl Into<String>) -> Self {
        self.targets.push(Target {
            node_id: node_id.into(),
            input_key: input_key.into(),
        });
        self
    }
}

/// A stored node definition. Instantiated fresh per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeTemplate {
    pub id: String,

    /// Human-readable name, used in traces and status events.
    pub name: String,

    pub kind: NodeKind,

    #[serde(default)]
    pub inputs: Vec<InputPort>,

    #[serde(default)]
    pub outputs: Vec<OutputPort>,

    /// Static per-node configuration (model name, URL, thresholds, ...).
    #[serde(default)]
    pub config: serde_json::Map<String, Value>,

    /// Entry nodes are seeded directly from request parameters.
    #[serde(default)]
    pub entry: bool,
}

impl NodeTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            inputs: Vec::new(),
            outputs: Vec::new(),
            config: serde_json::Map::new(),
            entry: false,
        }
    }

    pub fn entry(mut self) -> Self {
        self.entry = true;
        self
    }

    pub fn input(mut self, port: InputPort) -> Self {
        self.inputs.push(port);
        self
    }

    pub fn output(mut self, port: OutputPort) -> Self {
        self.outputs.push(port);
        self
    }

    pub fn config_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }
}

/// A stored workflow graph: the template the dispatcher instantiates.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowGraph {
    pub nodes: Vec<NodeTemplate>,
}

impl FlowGraph {
    pub fn new(nodes: Vec<NodeTemplate>) -> Self {
        Self { nodes }
    }

    pub fn node(&self, id: &str) -> Option<&NodeTemplate> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Structural validation, run once when a graph is stored or loaded:
    /// node ids must be unique, at least one entry node must exist, and
    /// every target edge must point at a declared input port.
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(format!("duplicate node id '{}'", node.id));
            }
        }

        if !self.nodes.iter().any(|n| n.entry) {
            return Err("graph has no entry node".into());
        }

        for node in &self.nodes {
            for output in &node.outputs {
                for target in &output.targets {
                    let Some(dest) = self.node(&target.node_id) else {
                        return Err(format!(
                            "node '{}' output '{}' targets unknown node '{}'",
                            node.id, output.key, target.node_id
                        ));
                    };
                    if !dest.inputs.iter().any(|i| i.key == target.input_key) {
                        return Err(format!(
                            "node '{}' output '{}' targets undeclared input '{}' on node '{}'",
                            node.id, output.key, target.input_key, target.node_id
                        ));
                    }
                }
            }
        }

        Ok(())
    }
}
