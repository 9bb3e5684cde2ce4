//! Graph validation and topological scheduling.
//!
//! Pure functions over a node/edge set: nothing here mutates its inputs.
//! Edges that reference node ids outside the node set are ignored by the
//! ordering functions and reported by [`validate_workflow_graph`].

pub mod cycles;
mod dag;
pub mod validation;

pub use cycles::{
    ConnectionCheck, InvalidConnection, TopologicalSort, detect_cycles, execution_order,
    topological_sort, topological_sort_nodes, validate_connection, would_create_cycle,
};
pub use validation::{GraphIssue, GraphValidationReport, IssueKind, validate_workflow_graph};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Structural errors that stop a run before any step exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// The executable graph contains at least one directed cycle.
    #[error("workflow contains a cycle: {description}")]
    Cycle {
        /// Every detected cycle, each closed (`[n0, .., nk, n0]`).
        cycles: Vec<Vec<String>>,
        /// Human-readable chain for the first cycle, e.g. `A → B → C → A`.
        description: String,
    },

    #[error("workflow has no trigger node")]
    MissingTrigger,

    #[error("node id '{0}' is used by more than one node")]
    DuplicateNodeId(String),
}
