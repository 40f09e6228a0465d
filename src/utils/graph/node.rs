//! Node identifier for graphs.
//!
//! [`NodeId`] is a strongly-typed index into a graph's node arena. Control-flow graphs
//! use it directly as their block handle, so that every graph algorithm in
//! [`crate::utils::graph::algorithms`] works on method graphs without conversion.

use std::fmt;

/// A strongly-typed identifier for a node within a graph.
///
/// Node IDs are assigned sequentially from 0 as nodes are allocated, and are never
/// reused. Removing a node from a method graph only marks it dead, so a `NodeId`
/// stays valid as an index into per-node side tables for the lifetime of the graph.
///
/// # Examples
///
/// ```rust
/// use classflow::utils::graph::NodeId;
///
/// let node = NodeId::new(3);
/// assert_eq!(node.index(), 3);
/// assert_eq!(node.to_string(), "B3");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    /// Creates a new `NodeId` from a raw index value.
    #[must_use]
    #[inline]
    pub const fn new(index: usize) -> Self {
        NodeId(index)
    }

    /// Returns the raw index value of this node identifier.
    #[must_use]
    #[inline]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

impl From<usize> for NodeId {
    #[inline]
    fn from(index: usize) -> Self {
        NodeId(index)
    }
}

impl From<NodeId> for usize {
    #[inline]
    fn from(node: NodeId) -> Self {
        node.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    #[test]
    fn test_node_id_ordering() {
        let mut nodes = vec![NodeId::new(3), NodeId::new(1), NodeId::new(2)];
        nodes.sort();
        assert_eq!(nodes, vec![NodeId::new(1), NodeId::new(2), NodeId::new(3)]);
    }

    #[test]
    fn test_node_id_formatting() {
        let node = NodeId::new(7);
        assert_eq!(format!("{node:?}"), "NodeId(7)");
        assert_eq!(format!("{node}"), "B7");
    }

    #[test]
    fn test_node_id_conversions() {
        let node: NodeId = 12usize.into();
        let raw: usize = node.into();
        assert_eq!(raw, 12);

        let set: BTreeSet<NodeId> = [node, NodeId::new(12)].into_iter().collect();
        assert_eq!(set.len(), 1);
    }
}
