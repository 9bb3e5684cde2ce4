//! Workflow graph types for graphflow.
//!
//! A workflow is an unordered set of [`Node`]s and [`Edge`]s authored in the
//! visual editor. The editor owns these values; the engine only reads them.
//! Field names follow the editor's camelCase JSON, with aliases for the
//! React Flow spellings (`data`, `source`, `target`, ...).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// A typed, configurable unit of work in a workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Stable node identity.
    pub id: String,
    /// Node type tag as supplied by the editor (e.g. `"HTTP_REQUEST"`).
    ///
    /// Kept as a raw string so unknown tags survive deserialization and can
    /// be reported as a typed error at dispatch time.
    #[serde(rename = "type", alias = "typeTag")]
    pub type_tag: String,
    /// Name other nodes and expressions use to reference this node's output.
    #[serde(default)]
    pub name: String,
    /// Arbitrary JSON-shaped configuration tree.
    #[serde(default, alias = "data")]
    pub configuration: Value,
    /// Editor canvas position. Irrelevant to execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
}

impl Node {
    /// Create a node with an empty configuration.
    pub fn new(id: impl Into<String>, type_tag: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            type_tag: type_tag.into(),
            name: name.into(),
            configuration: Value::Object(Default::default()),
            position: None,
        }
    }

    /// Builder-style configuration setter.
    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = configuration;
        self
    }

    /// The closed-vocabulary kind for this node, if the tag is known.
    pub fn kind(&self) -> Option<NodeKind> {
        NodeKind::from_tag(&self.type_tag)
    }

    /// Whether this node is a trigger (entry point).
    pub fn is_trigger(&self) -> bool {
        self.kind().is_some_and(NodeKind::is_trigger)
    }

    /// Whether this node is an editor-only annotation (never executed).
    pub fn is_editor_only(&self) -> bool {
        self.kind().is_some_and(|k| !k.is_executable())
    }

    /// The node's effective name: `name`, or the `name` string in its
    /// configuration when the top-level field is blank.
    pub fn display_name(&self) -> Option<&str> {
        let top = self.name.trim();
        if !top.is_empty() {
            return Some(self.name.as_str());
        }
        self.configuration
            .get("name")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Key under which this node's output is stored in the result map.
    ///
    /// Falls back to the node id for unnamed nodes.
    pub fn result_key(&self) -> &str {
        self.display_name().unwrap_or(self.id.as_str())
    }

    /// Metadata view used by the expression context.
    pub fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            id: self.id.clone(),
            name: self.result_key().to_string(),
            type_tag: self.type_tag.clone(),
        }
    }
}

/// Canvas position coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// Lightweight `(id, name, type)` triple exposed to expressions for
/// name-to-id lookups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub type_tag: String,
}

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// A directed dependency between two nodes.
///
/// Handle names are opaque labels; the scheduler only cares that the edge
/// exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    #[serde(alias = "source")]
    pub from_node_id: String,
    #[serde(alias = "target")]
    pub to_node_id: String,
    #[serde(default, alias = "sourceHandle", skip_serializing_if = "Option::is_none")]
    pub from_output_handle: Option<String>,
    #[serde(default, alias = "targetHandle", skip_serializing_if = "Option::is_none")]
    pub to_input_handle: Option<String>,
}

impl Edge {
    /// Create an edge without handle labels.
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from_node_id: from.into(),
            to_node_id: to.into(),
            from_output_handle: None,
            to_input_handle: None,
        }
    }

    /// Builder-style source handle setter (e.g. `"true"` on an `IF` node).
    pub fn from_handle(mut self, handle: impl Into<String>) -> Self {
        self.from_output_handle = Some(handle.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Workflow graph
// ---------------------------------------------------------------------------

/// The read model the persistence collaborator supplies at run start.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl WorkflowGraph {
    /// Create an empty workflow with a fresh UUIDv7.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            nodes: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Look up a node by id.
    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Metadata for every node, in declared order.
    pub fn node_metadata(&self) -> Vec<NodeMetadata> {
        self.nodes.iter().map(Node::metadata).collect()
    }
}

// ---------------------------------------------------------------------------
// Node kinds
// ---------------------------------------------------------------------------

/// The closed vocabulary of node types the engine knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    ManualTrigger,
    WebhookTrigger,
    ScheduleTrigger,
    HttpRequest,
    #[serde(rename = "SET")]
    SetData,
    Merge,
    #[serde(rename = "IF")]
    Condition,
    Switch,
    Loop,
    Wait,
    Note,
    Group,
}

impl NodeKind {
    /// Every kind, in declaration order.
    pub const ALL: [NodeKind; 12] = [
        NodeKind::ManualTrigger,
        NodeKind::WebhookTrigger,
        NodeKind::ScheduleTrigger,
        NodeKind::HttpRequest,
        NodeKind::SetData,
        NodeKind::Merge,
        NodeKind::Condition,
        NodeKind::Switch,
        NodeKind::Loop,
        NodeKind::Wait,
        NodeKind::Note,
        NodeKind::Group,
    ];

    /// The editor's type tag for this kind.
    pub fn tag(self) -> &'static str {
        match self {
            NodeKind::ManualTrigger => "MANUAL_TRIGGER",
            NodeKind::WebhookTrigger => "WEBHOOK_TRIGGER",
            NodeKind::ScheduleTrigger => "SCHEDULE_TRIGGER",
            NodeKind::HttpRequest => "HTTP_REQUEST",
            NodeKind::SetData => "SET",
            NodeKind::Merge => "MERGE",
            NodeKind::Condition => "IF",
            NodeKind::Switch => "SWITCH",
            NodeKind::Loop => "LOOP",
            NodeKind::Wait => "WAIT",
            NodeKind::Note => "NOTE",
            NodeKind::Group => "GROUP",
        }
    }

    /// Parse an editor type tag. Returns `None` for unknown tags.
    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.tag() == tag)
    }

    pub fn is_trigger(self) -> bool {
        matches!(
            self,
            NodeKind::ManualTrigger | NodeKind::WebhookTrigger | NodeKind::ScheduleTrigger
        )
    }

    /// Editor-only kinds (annotations, groups) are never dispatched.
    pub fn is_executable(self) -> bool {
        !matches!(self, NodeKind::Note | NodeKind::Group)
    }

    /// Kinds whose executors record a branch decision.
    pub fn is_control_flow(self) -> bool {
        matches!(
            self,
            NodeKind::Condition | NodeKind::Switch | NodeKind::Loop | NodeKind::Wait
        )
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
