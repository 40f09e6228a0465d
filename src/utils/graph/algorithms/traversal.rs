//! Graph traversal algorithms.
//!
//! All traversals are iterative with explicit work-stacks. Methods such as large
//! static initializers produce graphs with thousands of blocks, which would exhaust
//! the call stack with recursive walks.
//!
//! - [`dfs`] - depth-first pre-order iterator
//! - [`bfs`] - breadth-first iterator
//! - [`postorder`] - depth-first post-order
//! - [`reverse_postorder`] - the iteration order for forward dataflow and structuring
//! - [`reachable`] - the set of nodes reachable from a start node

use std::collections::VecDeque;

use crate::utils::graph::{NodeId, NodeSet, Successors};

/// Depth-first search iterator over graph nodes.
pub struct DfsIterator<'g, G: Successors> {
    graph: &'g G,
    stack: Vec<NodeId>,
    visited: Vec<bool>,
}

impl<'g, G: Successors> DfsIterator<'g, G> {
    fn new(graph: &'g G, start: NodeId) -> Self {
        let node_count = graph.node_count();
        if start.index() >= node_count {
            return DfsIterator {
                graph,
                stack: Vec::new(),
                visited: Vec::new(),
            };
        }

        DfsIterator {
            graph,
            stack: vec![start],
            visited: vec![false; node_count],
        }
    }
}

impl<G: Successors> Iterator for DfsIterator<'_, G> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let node = self.stack.pop()?;
            if self.visited[node.index()] {
                continue;
            }
            self.visited[node.index()] = true;

            // Reverse so that the first successor is explored first
            let successors: Vec<NodeId> = self.graph.successors(node).collect();
            for &succ in successors.iter().rev() {
                if !self.visited[succ.index()] {
                    self.stack.push(succ);
                }
            }

            return Some(node);
        }
    }
}

/// Returns a depth-first pre-order iterator starting from `start`.
///
/// Nodes not reachable from `start` are not visited. An out-of-range start yields
/// nothing.
///
/// # Examples
///
/// ```rust
/// use classflow::utils::graph::{algorithms::dfs, DirectedGraph};
///
/// let mut graph: DirectedGraph<()> = DirectedGraph::new();
/// let a = graph.add_node(());
/// let b = graph.add_node(());
/// let c = graph.add_node(());
/// graph.add_edge(a, b)?;
/// graph.add_edge(b, c)?;
///
/// assert_eq!(dfs(&graph, a).collect::<Vec<_>>(), vec![a, b, c]);
/// # Ok::<(), classflow::Error>(())
/// ```
pub fn dfs<G: Successors>(graph: &G, start: NodeId) -> DfsIterator<'_, G> {
    DfsIterator::new(graph, start)
}

/// Breadth-first search iterator over graph nodes.
pub struct BfsIterator<'g, G: Successors> {
    graph: &'g G,
    queue: VecDeque<NodeId>,
    visited: Vec<bool>,
}

impl<G: Successors> Iterator for BfsIterator<'_, G> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.queue.pop_front()?;
        for succ in self.graph.successors(node) {
            if !self.visited[succ.index()] {
                self.visited[succ.index()] = true;
                self.queue.push_back(succ);
            }
        }
        Some(node)
    }
}

/// Returns a breadth-first iterator starting from `start`.
pub fn bfs<G: Successors>(graph: &G, start: NodeId) -> BfsIterator<'_, G> {
    let node_count = graph.node_count();
    let mut visited = vec![false; node_count];
    let mut queue = VecDeque::new();
    if start.index() < node_count {
        visited[start.index()] = true;
        queue.push_back(start);
    }

    BfsIterator {
        graph,
        queue,
        visited,
    }
}

/// Returns the nodes reachable from `start` in depth-first post-order.
///
/// A node is marked visited when it is popped, not when it is pushed, so the result
/// is a true depth-first post-order: every edge that is not a back edge goes from a
/// node that appears later to one that appears earlier.
pub fn postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    #[derive(Clone, Copy)]
    enum State {
        Enter,
        Exit,
    }

    let node_count = graph.node_count();
    if start.index() >= node_count {
        return Vec::new();
    }

    let mut visited = vec![false; node_count];
    let mut result = Vec::with_capacity(node_count);
    let mut stack = vec![(start, State::Enter)];

    while let Some((node, state)) = stack.pop() {
        match state {
            State::Enter => {
                if visited[node.index()] {
                    continue;
                }
                visited[node.index()] = true;
                stack.push((node, State::Exit));

                let successors: Vec<NodeId> = graph.successors(node).collect();
                for &succ in successors.iter().rev() {
                    if !visited[succ.index()] {
                        stack.push((succ, State::Enter));
                    }
                }
            }
            State::Exit => result.push(node),
        }
    }

    result
}

/// Returns the nodes reachable from `start` in reverse post-order.
///
/// In reverse post-order every node precedes its successors, except along back
/// edges. This is the order constraint propagation visits blocks in and the order
/// structuring lays out sibling statements in.
pub fn reverse_postorder<G: Successors>(graph: &G, start: NodeId) -> Vec<NodeId> {
    let mut result = postorder(graph, start);
    result.reverse();
    result
}

/// Returns the set of nodes reachable from `start`, including `start`.
pub fn reachable<G: Successors>(graph: &G, start: NodeId) -> NodeSet {
    let mut set = NodeSet::with_capacity(graph.node_count());
    if start.index() >= graph.node_count() {
        return set;
    }

    let mut stack = vec![start];
    set.insert(start);
    while let Some(node) = stack.pop() {
        for succ in graph.successors(node) {
            if set.insert(succ) {
                stack.push(succ);
            }
        }
    }
    set
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::DirectedGraph;

    fn diamond() -> (DirectedGraph<&'static str>, [NodeId; 4]) {
        let mut graph = DirectedGraph::new();
        let a = graph.add_node("A");
        let b = graph.add_node("B");
        let c = graph.add_node("C");
        let d = graph.add_node("D");
        graph.add_edge(a, b).unwrap();
        graph.add_edge(a, c).unwrap();
        graph.add_edge(b, d).unwrap();
        graph.add_edge(c, d).unwrap();
        (graph, [a, b, c, d])
    }

    #[test]
    fn test_dfs_diamond() {
        let (graph, [a, b, c, d]) = diamond();
        assert_eq!(dfs(&graph, a).collect::<Vec<_>>(), vec![a, b, d, c]);
    }

    #[test]
    fn test_bfs_diamond() {
        let (graph, [a, b, c, d]) = diamond();
        assert_eq!(bfs(&graph, a).collect::<Vec<_>>(), vec![a, b, c, d]);
    }

    #[test]
    fn test_postorder_diamond() {
        let (graph, [a, b, c, d]) = diamond();
        assert_eq!(postorder(&graph, a), vec![d, b, c, a]);
        assert_eq!(reverse_postorder(&graph, a), vec![a, c, b, d]);
    }

    #[test]
    fn test_reverse_postorder_with_back_edge() {
        let mut graph: DirectedGraph<()> = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let c = graph.add_node(());
        graph.add_edge(a, b).unwrap();
        graph.add_edge(b, c).unwrap();
        graph.add_edge(c, b).unwrap();

        let rpo = reverse_postorder(&graph, a);
        assert_eq!(rpo, vec![a, b, c]);
    }

    #[test]
    fn test_reachable_skips_disconnected() {
        let mut graph: DirectedGraph<()> = DirectedGraph::new();
        let a = graph.add_node(());
        let b = graph.add_node(());
        let lonely = graph.add_node(());
        graph.add_edge(a, b).unwrap();

        let set = reachable(&graph, a);
        assert!(set.contains(a) && set.contains(b));
        assert!(!set.contains(lonely));
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut graph: DirectedGraph<()> = DirectedGraph::with_capacity(100_000);
        let mut prev = graph.add_node(());
        let first = prev;
        for _ in 0..100_000 {
            let next = graph.add_node(());
            graph.add_edge(prev, next).unwrap();
            prev = next;
        }
        assert_eq!(postorder(&graph, first).len(), 100_001);
    }
}
