//! Holistic structural validation of a workflow graph.
//!
//! Produces a report of errors (which make the graph unrunnable) and warnings
//! (which the editor surfaces but the dispatcher tolerates).

use std::collections::{HashMap, HashSet};

use graphflow_types::workflow::{Edge, Node};
use serde::{Deserialize, Serialize};

use super::GraphError;
use super::cycles::cycles_in;
use super::dag::WorkflowDag;

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Category of a validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    Cycle,
    DuplicateNodeId,
    MissingTrigger,
    MultipleTriggers,
    OrphanedNode,
    UnreachableNode,
    MissingConfiguration,
    UnknownNodeType,
    DanglingEdge,
}

/// One finding in a [`GraphValidationReport`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphIssue {
    #[serde(rename = "type")]
    pub kind: IssueKind,
    pub message: String,
    /// Node ids involved. For cycles, the closed chain `[n0, .., nk, n0]`.
    #[serde(default)]
    pub node_ids: Vec<String>,
}

impl GraphIssue {
    fn new(kind: IssueKind, message: impl Into<String>, node_ids: Vec<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            node_ids,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphValidationReport {
    pub is_valid: bool,
    pub errors: Vec<GraphIssue>,
    pub warnings: Vec<GraphIssue>,
}

impl GraphValidationReport {
    /// Convert the first error into a [`GraphError`].
    pub fn ensure_valid(&self) -> Result<(), GraphError> {
        let Some(first) = self.errors.first() else {
            return Ok(());
        };
        match first.kind {
            IssueKind::MissingTrigger => Err(GraphError::MissingTrigger),
            IssueKind::DuplicateNodeId => Err(GraphError::DuplicateNodeId(
                first.node_ids.first().cloned().unwrap_or_default(),
            )),
            _ => {
                let cycles: Vec<Vec<String>> = self
                    .errors
                    .iter()
                    .filter(|e| e.kind == IssueKind::Cycle)
                    .map(|e| e.node_ids.clone())
                    .collect();
                Err(GraphError::Cycle {
                    description: first.node_ids.join(" → "),
                    cycles,
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// validate_workflow_graph
// ---------------------------------------------------------------------------

/// Run every structural check and aggregate the findings.
///
/// Errors: one per cycle among executable nodes, one per repeated node id,
/// plus a missing-trigger error when no trigger-tagged node exists.
/// Warnings: multiple triggers, orphaned nodes, nodes unreachable from the
/// first trigger, nodes without a name, unknown type tags, and edges pointing
/// outside the node set. Editor-only kinds (`NOTE`, `GROUP`) are exempt from
/// the cycle, orphan and reachability checks.
pub fn validate_workflow_graph(nodes: &[Node], edges: &[Edge]) -> GraphValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let dag = WorkflowDag::build(nodes.iter().filter(|n| !n.is_editor_only()), edges);
    for cycle in cycles_in(&dag) {
        let chain = cycle.join(" → ");
        errors.push(GraphIssue::new(
            IssueKind::Cycle,
            format!("workflow contains a cycle: {chain}"),
            cycle,
        ));
    }

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for node in nodes {
        if !seen.insert(node.id.as_str()) && reported.insert(node.id.as_str()) {
            errors.push(GraphIssue::new(
                IssueKind::DuplicateNodeId,
                format!("node id '{}' is used by more than one node", node.id),
                vec![node.id.clone()],
            ));
        }
    }

    let triggers: Vec<&Node> = nodes.iter().filter(|n| n.is_trigger()).collect();
    match triggers.len() {
        0 => errors.push(GraphIssue::new(
            IssueKind::MissingTrigger,
            "workflow needs a trigger node to start",
            Vec::new(),
        )),
        1 => {}
        count => warnings.push(GraphIssue::new(
            IssueKind::MultipleTriggers,
            format!("workflow has {count} triggers; only the first one is used"),
            triggers.iter().map(|n| n.id.clone()).collect(),
        )),
    }

    let known: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();

    for edge in edges {
        let missing: Vec<String> = [&edge.from_node_id, &edge.to_node_id]
            .into_iter()
            .filter(|id| !known.contains(id.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            warnings.push(GraphIssue::new(
                IssueKind::DanglingEdge,
                format!(
                    "edge {} → {} references a node that does not exist",
                    edge.from_node_id, edge.to_node_id
                ),
                missing,
            ));
        }
    }

    if nodes.len() > 1 {
        let mut degree: HashMap<&str, usize> = HashMap::new();
        for edge in edges {
            *degree.entry(edge.from_node_id.as_str()).or_default() += 1;
            *degree.entry(edge.to_node_id.as_str()).or_default() += 1;
        }
        for node in nodes.iter().filter(|n| !n.is_editor_only()) {
            if degree.get(node.id.as_str()).copied().unwrap_or(0) == 0 {
                warnings.push(GraphIssue::new(
                    IssueKind::OrphanedNode,
                    format!("node '{}' is not connected to anything", label(node)),
                    vec![node.id.clone()],
                ));
            }
        }
    }

    if let Some(first_trigger) = triggers.first() {
        let reachable = dag.reachable_from(&first_trigger.id);
        for node in nodes {
            if node.is_trigger() || node.is_editor_only() {
                continue;
            }
            if !reachable.contains(node.id.as_str()) {
                warnings.push(GraphIssue::new(
                    IssueKind::UnreachableNode,
                    format!("node '{}' is unreachable from the trigger", label(node)),
                    vec![node.id.clone()],
                ));
            }
        }
    }

    for node in nodes {
        if node.display_name().is_none() {
            warnings.push(GraphIssue::new(
                IssueKind::MissingConfiguration,
                format!("node '{}' has no name configured", node.id),
                vec![node.id.clone()],
            ));
        }
        if node.kind().is_none() {
            warnings.push(GraphIssue::new(
                IssueKind::UnknownNodeType,
                format!("node '{}' has unknown type '{}'", label(node), node.type_tag),
                vec![node.id.clone()],
            ));
        }
    }

    GraphValidationReport {
        is_valid: errors.is_empty(),
        errors,
        warnings,
    }
}

fn label(node: &Node) -> &str {
    node.display_name().unwrap_or(node.id.as_str())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
