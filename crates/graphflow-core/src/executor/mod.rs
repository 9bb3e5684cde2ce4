//! Node-executor dispatch.
//!
//! [`WorkflowDispatcher`] walks a validated graph in topological order,
//! resolves each node's configuration through the expression engine, picks
//! the executor from the [`ExecutorRegistry`] and invokes it behind the
//! [`DurableStep`] boundary.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use graphflow_types::branch::BranchDecision;
use graphflow_types::config::EngineConfig;
use graphflow_types::error::{CredentialError, RepositoryError};
use graphflow_types::execution::RunStatus;
use graphflow_types::results::NodeResults;
use graphflow_types::workflow::Node;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::expression::{ExpressionContext, ExpressionError};
use crate::graph::GraphError;
use crate::repository::{CredentialResolver, HttpTransport};

pub mod dispatcher;
pub mod durable;
pub mod nodes;
pub mod registry;

pub use dispatcher::{RunOutcome, RunSeed, WorkflowDispatcher};
pub use durable::{CheckpointStepRunner, DurableStep, InlineStepRunner};
pub use registry::ExecutorRegistry;

// ---------------------------------------------------------------------------
// Executor contract
// ---------------------------------------------------------------------------

/// What an executor hands back to the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeOutput {
    pub value: Value,
    /// Set by control-flow kinds; recorded into the run's branch history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<BranchDecision>,
}

impl NodeOutput {
    pub fn value(value: Value) -> Self {
        Self {
            value,
            decision: None,
        }
    }

    pub fn branch(value: Value, decision: BranchDecision) -> Self {
        Self {
            value,
            decision: Some(decision),
        }
    }
}

/// Shared collaborators available to every executor.
#[derive(Clone)]
pub struct ExecutionServices {
    pub http: Arc<dyn HttpTransport>,
    pub credentials: Arc<dyn CredentialResolver>,
    pub durable: Arc<dyn DurableStep>,
    pub config: EngineConfig,
}

impl std::fmt::Debug for ExecutionServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionServices")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Everything one executor invocation sees.
pub struct NodeContext<'a> {
    pub node: &'a Node,
    /// Configuration after expression resolution.
    pub config: &'a Value,
    pub results: &'a NodeResults,
    pub expressions: &'a ExpressionContext,
    pub services: &'a ExecutionServices,
    pub workflow_id: Uuid,
    pub run_id: Uuid,
    /// Durable step name of this invocation
    /// (`"{run_id}:{node_id}:{node_name}"`).
    pub step_name: &'a str,
}

impl NodeContext<'_> {
    /// A configuration field, if present and not null.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.config.get(key).filter(|v| !v.is_null())
    }

    /// A required string field.
    pub fn require_str(&self, key: &str) -> Result<&str, NodeError> {
        match self.field(key) {
            Some(Value::String(s)) if !s.is_empty() => Ok(s),
            Some(other) => Err(NodeError::InvalidConfig(format!(
                "'{key}' must be a non-empty string, got {other}"
            ))),
            None => Err(NodeError::InvalidConfig(format!("'{key}' is required"))),
        }
    }

    pub fn bool_field(&self, key: &str) -> bool {
        self.field(key).and_then(Value::as_bool).unwrap_or(false)
    }
}

/// One implementation per executable node kind.
///
/// Object-safe: the registry stores executors as `Arc<dyn NodeExecutor>`.
pub trait NodeExecutor: Send + Sync {
    fn execute<'a>(&'a self, ctx: NodeContext<'a>) -> BoxFuture<'a, Result<NodeOutput, NodeError>>;
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failure of a single executor invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum NodeError {
    #[error("execution failed: {0}")]
    Execution(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Passed through unchanged from the credential collaborator.
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("http error: {0}")]
    Http(String),

    #[error("cancelled")]
    Cancelled,
}

/// Why a run ended `Failed`. Stored on the [`RunOutcome`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RunFailure {
    #[error(transparent)]
    GraphCycle(GraphError),

    #[error("unknown node type '{type_tag}' on node '{node_id}'")]
    UnknownNodeType { node_id: String, type_tag: String },

    #[error("node '{node_id}': {error}")]
    Expression {
        node_id: String,
        #[source]
        error: ExpressionError,
    },

    #[error("node '{node_id}' failed: {error}")]
    Node {
        node_id: String,
        #[source]
        error: NodeError,
    },
}

impl RunFailure {
    /// The node the run stopped at, if the failure belongs to one.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            RunFailure::GraphCycle(_) => None,
            RunFailure::UnknownNodeType { node_id, .. }
            | RunFailure::Expression { node_id, .. }
            | RunFailure::Node { node_id, .. } => Some(node_id),
        }
    }
}

/// Collaborator failures and refused requests: the only `Err` returns of
/// [`WorkflowDispatcher::execute`] and [`WorkflowDispatcher::resume`].
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("workflow not found: {0}")]
    WorkflowNotFound(Uuid),

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("run is not active: {0}")]
    RunNotActive(Uuid),

    #[error("run not found: {0}")]
    RunNotFound(Uuid),

    #[error("run {run_id} cannot be resumed while {status}")]
    RunNotResumable { run_id: Uuid, status: RunStatus },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_display() {
        let err = RunFailure::UnknownNodeType {
            node_id: "n1".into(),
            type_tag: "FAX".into(),
        };
        assert_eq!(err.to_string(), "unknown node type 'FAX' on node 'n1'");
        assert_eq!(err.node_id(), Some("n1"));

        let err = NodeError::Credential(CredentialError::NotFound("slack".into()));
        assert_eq!(err.to_string(), "credential 'slack' not found");

        let err = DispatchError::WorkflowNotFound(Uuid::nil());
        assert!(err.to_string().contains("workflow not found"));
    }

    #[test]
    fn test_node_output_serde() {
        let out = NodeOutput::branch(json!({ "result": true }), BranchDecision::new("true"));
        let v = serde_json::to_value(&out).unwrap();
        assert_eq!(v["decision"]["branch"], "true");
        let back: NodeOutput = serde_json::from_value(v).unwrap();
        assert_eq!(back, out);

        let plain = serde_json::to_value(NodeOutput::value(json!(1))).unwrap();
        assert!(plain.get("decision").is_none());
    }
}
