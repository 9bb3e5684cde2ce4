//! Branch decisions recorded by control-flow nodes.
//!
//! Decisions live in a [`BranchHistory`] that travels beside the node-result
//! map, never inside it, so a node literally named `branch` cannot collide
//! with control-flow bookkeeping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Iteration position reported by a loop node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationInfo {
    pub index: usize,
    pub total: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Value>,
}

/// Which outgoing branch a control-flow node took.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BranchDecision {
    pub branch: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<IterationInfo>,
}

impl BranchDecision {
    pub fn new(branch: impl Into<String>) -> Self {
        Self {
            branch: branch.into(),
            data: None,
            iteration: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_iteration(mut self, iteration: IterationInfo) -> Self {
        self.iteration = Some(iteration);
        self
    }
}

/// Decisions keyed by control-flow node id, plus the most recent one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BranchHistory {
    decisions: BTreeMap<String, BranchDecision>,
    last: Option<String>,
}

impl BranchHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision for `node_id`; it becomes the `last` decision.
    pub fn record(&mut self, node_id: impl Into<String>, decision: BranchDecision) {
        let node_id = node_id.into();
        self.decisions.insert(node_id.clone(), decision);
        self.last = Some(node_id);
    }

    pub fn get(&self, node_id: &str) -> Option<&BranchDecision> {
        self.decisions.get(node_id)
    }

    pub fn last(&self) -> Option<&BranchDecision> {
        self.last.as_deref().and_then(|id| self.decisions.get(id))
    }

    pub fn is_empty(&self) -> bool {
        self.decisions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.decisions.len()
    }

    /// `last` as JSON (`null` when nothing has been recorded).
    pub fn last_value(&self) -> Value {
        self.last()
            .and_then(|d| serde_json::to_value(d).ok())
            .unwrap_or(Value::Null)
    }

    /// All decisions as a JSON object keyed by node id.
    pub fn all_value(&self) -> Value {
        let map = self
            .decisions
            .iter()
            .filter_map(|(id, d)| serde_json::to_value(d).ok().map(|v| (id.clone(), v)))
            .collect();
        Value::Object(map)
    }
}
