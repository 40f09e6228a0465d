//! Trait definitions for graph abstractions.
//!
//! Algorithms are written against these traits rather than a concrete graph type, so
//! the same dominator, SCC and traversal code runs on the generic [`DirectedGraph`]
//! used in tests and on method control-flow graphs.
//!
//! - [`GraphBase`] - node count and node iteration
//! - [`Successors`] - outgoing edge traversal
//! - [`Predecessors`] - incoming edge traversal
//! - [`RootedGraph`] - graphs with a designated entry node
//!
//! [`DirectedGraph`]: crate::utils::graph::DirectedGraph

use crate::utils::graph::NodeId;

/// Base trait providing core graph properties.
pub trait GraphBase {
    /// Returns the number of node slots in the graph.
    ///
    /// Graphs that mark nodes dead instead of removing them still count those slots;
    /// dead nodes simply have no edges.
    fn node_count(&self) -> usize;

    /// Returns an iterator over all node identifiers in ascending index order.
    fn node_ids(&self) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support forward edge traversal.
pub trait Successors: GraphBase {
    /// Returns an iterator over the successor nodes of the given node.
    ///
    /// Duplicate edges may yield the same successor more than once.
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// Trait for graphs that support backward edge traversal.
pub trait Predecessors: GraphBase {
    /// Returns an iterator over the predecessor nodes of the given node.
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId>;
}

/// A graph with a designated entry node.
///
/// Dominator computation and reverse post-order both start from the entry.
pub trait RootedGraph: Successors + Predecessors {
    /// Returns the entry node of the graph.
    fn entry(&self) -> NodeId;
}
