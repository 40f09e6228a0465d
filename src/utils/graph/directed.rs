//! Adjacency-list directed graph.
//!
//! [`DirectedGraph`] stores node payloads in an arena and keeps both outgoing and
//! incoming adjacency lists, so every algorithm can walk edges in either direction
//! in O(degree). It backs the operation dependency graph of the constraint
//! propagator and is the fixture graph for the algorithm tests.

use crate::{
    utils::graph::{GraphBase, NodeId, Predecessors, Successors},
    Result,
};

/// A directed graph with node payloads of type `N`.
///
/// # Examples
///
/// ```rust
/// use classflow::utils::graph::{DirectedGraph, Successors};
///
/// let mut graph: DirectedGraph<&str> = DirectedGraph::new();
/// let a = graph.add_node("A");
/// let b = graph.add_node("B");
/// graph.add_edge(a, b)?;
///
/// assert_eq!(graph.successors(a).collect::<Vec<_>>(), vec![b]);
/// # Ok::<(), classflow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DirectedGraph<N> {
    nodes: Vec<N>,
    outgoing: Vec<Vec<NodeId>>,
    incoming: Vec<Vec<NodeId>>,
    edge_count: usize,
}

impl<N> Default for DirectedGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> DirectedGraph<N> {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty graph with room for `node_capacity` nodes.
    #[must_use]
    pub fn with_capacity(node_capacity: usize) -> Self {
        DirectedGraph {
            nodes: Vec::with_capacity(node_capacity),
            outgoing: Vec::with_capacity(node_capacity),
            incoming: Vec::with_capacity(node_capacity),
            edge_count: 0,
        }
    }

    /// Adds a node and returns its identifier.
    pub fn add_node(&mut self, data: N) -> NodeId {
        let id = NodeId::new(self.nodes.len());
        self.nodes.push(data);
        self.outgoing.push(Vec::new());
        self.incoming.push(Vec::new());
        id
    }

    /// Adds an edge from `source` to `target`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InternalConsistency`] if either endpoint does not exist.
    pub fn add_edge(&mut self, source: NodeId, target: NodeId) -> Result<()> {
        if source.index() >= self.nodes.len() || target.index() >= self.nodes.len() {
            return Err(consistency_error!(
                "edge {} -> {} references a missing node",
                source,
                target
            ));
        }

        self.outgoing[source.index()].push(target);
        self.incoming[target.index()].push(source);
        self.edge_count += 1;
        Ok(())
    }

    /// Returns the payload of a node.
    #[must_use]
    pub fn node(&self, node: NodeId) -> Option<&N> {
        self.nodes.get(node.index())
    }

    /// Returns the number of edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.edge_count
    }

    /// Returns `true` if the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns an iterator over all nodes and their payloads.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &N)> + '_ {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId::new(i), n))
    }
}

impl<N> GraphBase for DirectedGraph<N> {
    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        (0..self.nodes.len()).map(NodeId::new)
    }
}

impl<N> Successors for DirectedGraph<N> {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.outgoing
            .get(node.index())
            .into_iter()
            .flat_map(|edges| edges.iter().copied())
    }
}

impl<N> Predecessors for DirectedGraph<N> {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.incoming
            .get(node.index())
            .into_iter()
            .flat_map(|edges| edges.iter().copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_nodes_and_edges() {
        let mut graph: DirectedGraph<char> = DirectedGraph::new();
        let a = graph.add_node('a');
        let b = graph.add_node('b');
        let c = graph.add_node('c');
        graph.add_edge(a, b).unwrap();
        graph.add_edge(a, c).unwrap();
        graph.add_edge(c, b).unwrap();

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 3);
        assert_eq!(graph.node(b), Some(&'b'));
        assert_eq!(graph.successors(a).collect::<Vec<_>>(), vec![b, c]);
        assert_eq!(graph.predecessors(b).collect::<Vec<_>>(), vec![a, c]);
    }

    #[test]
    fn test_add_edge_to_missing_node() {
        let mut graph: DirectedGraph<()> = DirectedGraph::new();
        let a = graph.add_node(());
        assert!(graph.add_edge(a, NodeId::new(5)).is_err());
    }

    #[test]
    fn test_missing_node_has_no_edges() {
        let graph: DirectedGraph<()> = DirectedGraph::new();
        assert_eq!(graph.successors(NodeId::new(0)).count(), 0);
        assert!(graph.is_empty());
    }
}
