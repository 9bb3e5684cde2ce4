//! Workflow graph as a `petgraph` [`DiGraph`].
//!
//! Node weights are node ids. The first node with a given id owns it; later
//! duplicates are left out of the graph. Edges whose endpoints are not in the
//! graph are dropped.

use std::collections::{HashMap, HashSet};

use graphflow_types::workflow::{Edge, Node};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};

pub(crate) struct WorkflowDag<'a> {
    graph: DiGraph<&'a str, ()>,
    index: HashMap<&'a str, NodeIndex>,
}

impl<'a> WorkflowDag<'a> {
    pub(crate) fn build(
        nodes: impl IntoIterator<Item = &'a Node>,
        edges: impl IntoIterator<Item = &'a Edge>,
    ) -> Self {
        let mut graph = DiGraph::new();
        let mut index = HashMap::new();
        for node in nodes {
            index
                .entry(node.id.as_str())
                .or_insert_with(|| graph.add_node(node.id.as_str()));
        }
        for edge in edges {
            let from = index.get(edge.from_node_id.as_str());
            let to = index.get(edge.to_node_id.as_str());
            if let (Some(&from), Some(&to)) = (from, to) {
                graph.add_edge(from, to, ());
            }
        }
        Self { graph, index }
    }

    pub(crate) fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Node indices in declared node order.
    pub(crate) fn nodes(&self) -> impl Iterator<Item = NodeIndex> {
        self.graph.node_indices()
    }

    pub(crate) fn id(&self, node: NodeIndex) -> &'a str {
        self.graph[node]
    }

    pub(crate) fn in_degree(&self, node: NodeIndex) -> usize {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .count()
    }

    /// Direct successors in edge declaration order.
    ///
    /// petgraph walks a node's edge list newest first; edge indices grow with
    /// insertion, so sorting by them restores the declared order.
    pub(crate) fn successors(&self, node: NodeIndex) -> Vec<NodeIndex> {
        let mut out: Vec<_> = self
            .graph
            .edges(node)
            .map(|edge| (edge.id(), edge.target()))
            .collect();
        out.sort_unstable_by_key(|(id, _)| *id);
        out.into_iter().map(|(_, target)| target).collect()
    }

    pub(crate) fn is_cyclic(&self) -> bool {
        petgraph::algo::is_cyclic_directed(&self.graph)
    }

    /// Ids reachable by forward traversal from `start`, `start` included.
    pub(crate) fn reachable_from(&self, start: &str) -> HashSet<&'a str> {
        let mut reachable = HashSet::new();
        let Some(&root) = self.index.get(start) else {
            return reachable;
        };
        let mut bfs = Bfs::new(&self.graph, root);
        while let Some(node) = bfs.next(&self.graph) {
            reachable.insert(self.graph[node]);
        }
        reachable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(dag: &WorkflowDag<'_>, nodes: Vec<NodeIndex>) -> Vec<String> {
        nodes.into_iter().map(|n| dag.id(n).to_string()).collect()
    }

    #[test]
    fn test_successors_keep_edge_order() {
        let nodes = vec![
            Node::new("t", "MANUAL_TRIGGER", "Start"),
            Node::new("b", "SET", "B"),
            Node::new("a", "SET", "A"),
            Node::new("c", "SET", "C"),
        ];
        let edges = vec![Edge::new("t", "a"), Edge::new("t", "c"), Edge::new("t", "b")];
        let dag = WorkflowDag::build(&nodes, &edges);

        let root = dag.nodes().next().unwrap();
        assert_eq!(ids(&dag, dag.successors(root)), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_duplicates_and_unknown_endpoints_dropped() {
        let nodes = vec![
            Node::new("a", "SET", "First"),
            Node::new("a", "SET", "Second"),
            Node::new("b", "SET", "B"),
        ];
        let edges = vec![Edge::new("a", "b"), Edge::new("b", "ghost")];
        let dag = WorkflowDag::build(&nodes, &edges);

        assert_eq!(dag.node_count(), 2);
        let b = dag.nodes().nth(1).unwrap();
        assert_eq!(dag.id(b), "b");
        assert_eq!(dag.in_degree(b), 1);
        assert!(dag.successors(b).is_empty());
        assert!(!dag.is_cyclic());
        assert_eq!(dag.reachable_from("a"), HashSet::from(["a", "b"]));
        assert!(dag.reachable_from("ghost").is_empty());
    }
}
