//! Cycle detection, Kahn ordering and connection-time guards.
//!
//! Ordering is deterministic: the Kahn queue is seeded with zero in-degree
//! nodes in input order and neighbours are visited in edge insertion order,
//! so ties keep the editor's declared node order. Every pass runs over one
//! [`WorkflowDag`].

use std::collections::{HashMap, VecDeque};

use graphflow_types::workflow::{Edge, Node};
use petgraph::graph::NodeIndex;

use super::GraphError;
use super::dag::WorkflowDag;

// ---------------------------------------------------------------------------
// Cycle detection
// ---------------------------------------------------------------------------

/// Find directed cycles with a depth-first search over a recursion stack.
///
/// Every edge that reaches a node still on the stack closes a cycle, which is
/// recorded as `[n0, .., nk, n0]`. The search does not stop at the first
/// cycle.
pub fn detect_cycles(nodes: &[Node], edges: &[Edge]) -> Vec<Vec<String>> {
    cycles_in(&WorkflowDag::build(nodes, edges))
}

pub(super) fn cycles_in(dag: &WorkflowDag<'_>) -> Vec<Vec<String>> {
    let n = dag.node_count();
    let mut visited = vec![false; n];
    let mut on_stack = vec![false; n];
    let mut cycles = Vec::new();

    for root in dag.nodes() {
        if visited[root.index()] {
            continue;
        }

        // Explicit stack of (node, remaining successors) keeps deep graphs
        // off the call stack.
        let mut path: Vec<NodeIndex> = vec![root];
        let mut frames = vec![(root, dag.successors(root).into_iter())];
        visited[root.index()] = true;
        on_stack[root.index()] = true;

        while let Some((node, successors)) = frames.last_mut() {
            let node = *node;
            if let Some(next) = successors.next() {
                if on_stack[next.index()] {
                    let start = path.iter().position(|&p| p == next).unwrap_or(0);
                    let mut cycle: Vec<String> =
                        path[start..].iter().map(|&i| dag.id(i).to_string()).collect();
                    cycle.push(dag.id(next).to_string());
                    cycles.push(cycle);
                } else if !visited[next.index()] {
                    visited[next.index()] = true;
                    on_stack[next.index()] = true;
                    path.push(next);
                    frames.push((next, dag.successors(next).into_iter()));
                }
            } else {
                on_stack[node.index()] = false;
                path.pop();
                frames.pop();
            }
        }
    }

    cycles
}

// ---------------------------------------------------------------------------
// Topological sort
// ---------------------------------------------------------------------------

/// Result of Kahn's algorithm over a node/edge set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologicalSort {
    /// Node ids in execution order. Incomplete when `has_cycle` is set.
    pub order: Vec<String>,
    pub has_cycle: bool,
    /// Populated from [`detect_cycles`] only when `has_cycle` is set.
    pub cycles: Vec<Vec<String>>,
}

/// Order node ids with in-degree counting (Kahn's algorithm).
pub fn topological_sort(nodes: &[Node], edges: &[Edge]) -> TopologicalSort {
    kahn(&WorkflowDag::build(nodes, edges))
}

fn kahn(dag: &WorkflowDag<'_>) -> TopologicalSort {
    let n = dag.node_count();
    let mut in_degree: Vec<usize> = dag.nodes().map(|i| dag.in_degree(i)).collect();

    let mut queue: VecDeque<NodeIndex> = dag.nodes().filter(|i| in_degree[i.index()] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(current) = queue.pop_front() {
        order.push(dag.id(current).to_string());
        for next in dag.successors(current) {
            in_degree[next.index()] -= 1;
            if in_degree[next.index()] == 0 {
                queue.push_back(next);
            }
        }
    }

    let has_cycle = order.len() != n;
    let cycles = if has_cycle { cycles_in(dag) } else { Vec::new() };

    TopologicalSort {
        order,
        has_cycle,
        cycles,
    }
}

/// Order the nodes themselves, failing on any cycle.
///
/// The error carries a readable chain such as `A → B → C → A`, using node
/// names where set and ids otherwise.
pub fn topological_sort_nodes<'a>(
    nodes: &'a [Node],
    edges: &[Edge],
) -> Result<Vec<&'a Node>, GraphError> {
    sort_nodes(nodes.iter().collect(), edges)
}

/// Execution order: [`topological_sort_nodes`] over the executable nodes
/// only. `NOTE`/`GROUP` nodes and the edges that touch them take no part in
/// ordering or the cycle check.
pub fn execution_order<'a>(
    nodes: &'a [Node],
    edges: &[Edge],
) -> Result<Vec<&'a Node>, GraphError> {
    sort_nodes(nodes.iter().filter(|n| !n.is_editor_only()).collect(), edges)
}

fn sort_nodes<'a>(nodes: Vec<&'a Node>, edges: &[Edge]) -> Result<Vec<&'a Node>, GraphError> {
    let sorted = kahn(&WorkflowDag::build(nodes.iter().copied(), edges));

    let by_id: HashMap<&str, &Node> = nodes
        .iter()
        .rev()
        .map(|n| (n.id.as_str(), *n))
        .collect();

    if sorted.has_cycle {
        let description = sorted
            .cycles
            .first()
            .map(|cycle| describe_cycle(cycle, &by_id))
            .unwrap_or_else(|| "unresolvable dependency".to_string());
        return Err(GraphError::Cycle {
            cycles: sorted.cycles,
            description,
        });
    }

    Ok(sorted
        .order
        .iter()
        .filter_map(|id| by_id.get(id.as_str()).copied())
        .collect())
}

fn describe_cycle(cycle: &[String], by_id: &HashMap<&str, &Node>) -> String {
    cycle
        .iter()
        .map(|id| {
            by_id
                .get(id.as_str())
                .and_then(|n| n.display_name())
                .unwrap_or(id.as_str())
                .to_string()
        })
        .collect::<Vec<_>>()
        .join(" → ")
}

// ---------------------------------------------------------------------------
// Connection guards
// ---------------------------------------------------------------------------

/// Whether adding `candidate` to `edges` would leave the graph cyclic.
pub fn would_create_cycle(nodes: &[Node], edges: &[Edge], candidate: &Edge) -> bool {
    if candidate.from_node_id == candidate.to_node_id {
        return true;
    }
    WorkflowDag::build(nodes, edges.iter().chain(std::iter::once(candidate))).is_cyclic()
}

/// Why a proposed edge was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvalidConnection {
    #[error("a node cannot connect to itself")]
    SelfLoop,

    #[error("these nodes are already connected")]
    Duplicate,

    #[error("this connection would create a cycle")]
    WouldCreateCycle,
}

/// Outcome of [`validate_connection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionCheck {
    pub is_valid: bool,
    pub error: Option<InvalidConnection>,
}

impl ConnectionCheck {
    fn ok() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    fn rejected(error: InvalidConnection) -> Self {
        Self {
            is_valid: false,
            error: Some(error),
        }
    }
}

/// Check a proposed edge before it is persisted.
///
/// Rejections, in precedence order: self-loop, duplicate (same source and
/// target), cycle-introducing.
pub fn validate_connection(nodes: &[Node], edges: &[Edge], candidate: &Edge) -> ConnectionCheck {
    if candidate.from_node_id == candidate.to_node_id {
        return ConnectionCheck::rejected(InvalidConnection::SelfLoop);
    }

    let duplicate = edges.iter().any(|e| {
        e.from_node_id == candidate.from_node_id && e.to_node_id == candidate.to_node_id
    });
    if duplicate {
        return ConnectionCheck::rejected(InvalidConnection::Duplicate);
    }

    if would_create_cycle(nodes, edges, candidate) {
        return ConnectionCheck::rejected(InvalidConnection::WouldCreateCycle);
    }

    ConnectionCheck::ok()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
