//! Dominator tree computation using the Lengauer-Tarjan algorithm.
//!
//! A node `d` **dominates** `n` if every path from the entry to `n` passes through
//! `d`. The **immediate dominator** of `n` is the closest strict dominator, and
//! making it the parent of `n` yields the dominator tree.
//!
//! Structuring leans on this tree heavily: loop bodies, try bodies and branch arms are
//! all dominator-closed node sets, and their legal extents are dominator subtrees.
//!
//! The implementation is Lengauer-Tarjan with path compression (O(V α(V))). The DFS
//! numbering and the path compression both run on explicit stacks.

use crate::utils::graph::{NodeId, NodeSet, RootedGraph, Successors};

const NONE: usize = usize::MAX;

/// Result of dominator tree computation.
///
/// Nodes that are not reachable from the entry have no dominator information:
/// [`DominatorTree::is_reachable`] is `false` for them and every dominance query
/// involving them answers `false`.
///
/// # Examples
///
/// ```rust
/// use classflow::utils::graph::{algorithms::compute_dominators, DirectedGraph};
///
/// let mut graph: DirectedGraph<&str> = DirectedGraph::new();
/// let entry = graph.add_node("entry");
/// let a = graph.add_node("a");
/// let b = graph.add_node("b");
/// graph.add_edge(entry, a)?;
/// graph.add_edge(a, b)?;
///
/// let dom_tree = compute_dominators(&graph, entry);
/// assert!(dom_tree.dominates(entry, b));
/// assert_eq!(dom_tree.immediate_dominator(b), Some(a));
/// # Ok::<(), classflow::Error>(())
/// ```
#[derive(Debug, Clone)]
pub struct DominatorTree {
    entry: NodeId,
    /// Immediate dominator per node; the entry maps to itself, unreachable nodes to `NONE`
    idom: Vec<usize>,
    /// Depth in the dominator tree, entry is 0
    depth: Vec<usize>,
    /// Dominator tree children, in ascending node order
    children: Vec<Vec<NodeId>>,
}

impl DominatorTree {
    /// Returns the entry (root) node of the dominator tree.
    #[inline]
    pub fn entry(&self) -> NodeId {
        self.entry
    }

    /// Returns `true` if `node` is reachable from the entry.
    #[inline]
    pub fn is_reachable(&self, node: NodeId) -> bool {
        self.idom.get(node.index()).is_some_and(|&i| i != NONE)
    }

    /// Returns the immediate dominator of a node, or `None` for the entry and for
    /// unreachable nodes.
    pub fn immediate_dominator(&self, node: NodeId) -> Option<NodeId> {
        if node == self.entry || !self.is_reachable(node) {
            None
        } else {
            Some(NodeId::new(self.idom[node.index()]))
        }
    }

    /// Checks if node `a` dominates node `b`. A node dominates itself.
    ///
    /// Runs in O(depth(b) - depth(a)) by walking up from `b`.
    pub fn dominates(&self, a: NodeId, b: NodeId) -> bool {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }

        let target_depth = self.depth[a.index()];
        let mut current = b;
        while self.depth[current.index()] > target_depth {
            current = NodeId::new(self.idom[current.index()]);
        }
        current == a
    }

    /// Checks if node `a` strictly dominates node `b`.
    #[inline]
    pub fn strictly_dominates(&self, a: NodeId, b: NodeId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns an iterator over all dominators of a node, from the node itself up to
    /// and including the entry.
    pub fn dominators(&self, node: NodeId) -> DominatorIterator<'_> {
        DominatorIterator {
            tree: self,
            current: self.is_reachable(node).then_some(node),
        }
    }

    /// Returns the depth of a node in the dominator tree. The entry has depth 0.
    pub fn depth(&self, node: NodeId) -> usize {
        self.depth.get(node.index()).copied().unwrap_or(0)
    }

    /// Returns the dominator tree children of a node.
    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.children
            .get(node.index())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Returns every node dominated by `node`, including `node` itself.
    pub fn subtree(&self, node: NodeId) -> NodeSet {
        let mut set = NodeSet::with_capacity(self.idom.len());
        if !self.is_reachable(node) {
            return set;
        }

        let mut stack = vec![node];
        while let Some(n) = stack.pop() {
            set.insert(n);
            stack.extend(self.children(n).iter().copied());
        }
        set
    }

    /// Returns the nearest common dominator of two reachable nodes.
    pub fn nearest_common_dominator(&self, a: NodeId, b: NodeId) -> Option<NodeId> {
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return None;
        }

        let (mut a, mut b) = (a, b);
        while self.depth[a.index()] > self.depth[b.index()] {
            a = NodeId::new(self.idom[a.index()]);
        }
        while self.depth[b.index()] > self.depth[a.index()] {
            b = NodeId::new(self.idom[b.index()]);
        }
        while a != b {
            a = NodeId::new(self.idom[a.index()]);
            b = NodeId::new(self.idom[b.index()]);
        }
        Some(a)
    }

    /// Returns the number of node slots covered by this tree.
    #[inline]
    pub fn node_count(&self) -> usize {
        self.idom.len()
    }
}

/// Iterator over dominators of a node, from the node up to the entry.
pub struct DominatorIterator<'a> {
    tree: &'a DominatorTree,
    current: Option<NodeId>,
}

impl Iterator for DominatorIterator<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.current?;
        self.current = self.tree.immediate_dominator(current);
        Some(current)
    }
}

/// Computes the dominator tree for the graph rooted at `entry`.
///
/// # Examples
///
/// ```rust
/// use classflow::utils::graph::{algorithms::compute_dominators, DirectedGraph};
///
/// // entry -> a, entry -> b, a -> exit, b -> exit
/// let mut graph: DirectedGraph<()> = DirectedGraph::new();
/// let entry = graph.add_node(());
/// let a = graph.add_node(());
/// let b = graph.add_node(());
/// let exit = graph.add_node(());
/// graph.add_edge(entry, a)?;
/// graph.add_edge(entry, b)?;
/// graph.add_edge(a, exit)?;
/// graph.add_edge(b, exit)?;
///
/// let dom_tree = compute_dominators(&graph, entry);
/// assert_eq!(dom_tree.immediate_dominator(exit), Some(entry));
/// assert!(!dom_tree.strictly_dominates(a, exit));
/// # Ok::<(), classflow::Error>(())
/// ```
pub fn compute_dominators<G>(graph: &G, entry: NodeId) -> DominatorTree
where
    G: Successors,
{
    let n = graph.node_count();
    if entry.index() >= n {
        return DominatorTree {
            entry,
            idom: vec![NONE; n],
            depth: vec![0; n],
            children: vec![Vec::new(); n],
        };
    }

    let mut lt = LengauerTarjan::new(n);
    lt.compute(graph, entry);

    let mut idom = lt.idom;
    idom[entry.index()] = entry.index();

    let mut children = vec![Vec::new(); n];
    for (node, &parent) in idom.iter().enumerate() {
        if parent != NONE && node != entry.index() {
            children[parent].push(NodeId::new(node));
        }
    }

    // Depths follow DFS preorder, which visits every parent before its children
    let mut depth = vec![0; n];
    for &node in lt.vertex.iter().take(lt.count).skip(1) {
        depth[node] = depth[idom[node]] + 1;
    }

    DominatorTree {
        entry,
        idom,
        depth,
        children,
    }
}

/// Convenience function to compute dominators for a [`RootedGraph`].
pub fn compute_dominators_rooted<G>(graph: &G) -> DominatorTree
where
    G: RootedGraph,
{
    compute_dominators(graph, graph.entry())
}

/// Working state for the Lengauer-Tarjan algorithm. All node references are raw
/// indices; DFS numbers start at 1 and 0 means "not visited".
struct LengauerTarjan {
    dfnum: Vec<usize>,
    vertex: Vec<usize>,
    parent: Vec<usize>,
    semi: Vec<usize>,
    idom: Vec<usize>,
    ancestor: Vec<usize>,
    best: Vec<usize>,
    bucket: Vec<Vec<usize>>,
    preds: Vec<Vec<usize>>,
    count: usize,
}

impl LengauerTarjan {
    fn new(n: usize) -> Self {
        LengauerTarjan {
            dfnum: vec![0; n],
            vertex: vec![NONE; n],
            parent: vec![NONE; n],
            semi: (0..n).collect(),
            idom: vec![NONE; n],
            ancestor: vec![NONE; n],
            best: (0..n).collect(),
            bucket: vec![Vec::new(); n],
            preds: vec![Vec::new(); n],
            count: 0,
        }
    }

    fn compute<G: Successors>(&mut self, graph: &G, entry: NodeId) {
        self.number(graph, entry.index());

        for i in (1..self.count).rev() {
            let w = self.vertex[i];
            let parent_w = self.parent[w];

            let preds = std::mem::take(&mut self.preds[w]);
            for &v in &preds {
                let u = self.eval(v);
                if self.dfnum[self.semi[u]] < self.dfnum[self.semi[w]] {
                    self.semi[w] = self.semi[u];
                }
            }
            self.preds[w] = preds;

            let semi_w = self.semi[w];
            self.bucket[semi_w].push(w);
            self.ancestor[w] = parent_w;

            for v in std::mem::take(&mut self.bucket[parent_w]) {
                let u = self.eval(v);
                self.idom[v] = if self.semi[u] == self.semi[v] {
                    parent_w
                } else {
                    u
                };
            }
        }

        for i in 1..self.count {
            let w = self.vertex[i];
            if self.idom[w] != self.semi[w] {
                self.idom[w] = self.idom[self.idom[w]];
            }
        }
    }

    /// Assigns DFS numbers and records, for every reachable node, its reachable
    /// predecessors.
    fn number<G: Successors>(&mut self, graph: &G, entry: usize) {
        let mut stack = vec![(entry, NONE)];

        while let Some((node, parent)) = stack.pop() {
            if self.dfnum[node] != 0 {
                continue;
            }

            self.count += 1;
            self.dfnum[node] = self.count;
            self.vertex[self.count - 1] = node;
            self.parent[node] = parent;

            let successors: Vec<NodeId> = graph.successors(NodeId::new(node)).collect();
            for succ in successors.iter().rev() {
                self.preds[succ.index()].push(node);
                if self.dfnum[succ.index()] == 0 {
                    stack.push((succ.index(), node));
                }
            }
        }
    }

    fn eval(&mut self, v: usize) -> usize {
        if self.ancestor[v] == NONE {
            return v;
        }
        self.compress(v);
        self.best[v]
    }

    /// Path compression over the link-eval forest, unrolled onto an explicit stack.
    fn compress(&mut self, v: usize) {
        let mut path = Vec::new();
        let mut u = v;
        while self.ancestor[self.ancestor[u]] != NONE {
            path.push(u);
            u = self.ancestor[u];
        }

        for &w in path.iter().rev() {
            let a = self.ancestor[w];
            if self.dfnum[self.semi[self.best[a]]] < self.dfnum[self.semi[self.best[w]]] {
                self.best[w] = self.best[a];
            }
            self.ancestor[w] = self.ancestor[a];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::graph::DirectedGraph;

    fn graph_of(n: usize, edges: &[(usize, usize)]) -> DirectedGraph<()> {
        let mut graph = DirectedGraph::new();
        for _ in 0..n {
            graph.add_node(());
        }
        for &(a, b) in edges {
            graph.add_edge(NodeId::new(a), NodeId::new(b)).unwrap();
        }
        graph
    }

    fn id(i: usize) -> NodeId {
        NodeId::new(i)
    }

    #[test]
    fn test_dominator_single_node() {
        let graph = graph_of(1, &[]);
        let tree = compute_dominators(&graph, id(0));
        assert_eq!(tree.immediate_dominator(id(0)), None);
        assert!(tree.dominates(id(0), id(0)));
    }

    #[test]
    fn test_dominator_diamond() {
        let graph = graph_of(4, &[(0, 1), (0, 2), (1, 3), (2, 3)]);
        let tree = compute_dominators(&graph, id(0));

        assert_eq!(tree.immediate_dominator(id(1)), Some(id(0)));
        assert_eq!(tree.immediate_dominator(id(3)), Some(id(0)));
        assert!(!tree.dominates(id(1), id(3)));
        assert_eq!(tree.children(id(0)), &[id(1), id(2), id(3)]);
        assert_eq!(tree.depth(id(3)), 1);
    }

    #[test]
    fn test_dominator_loop() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3
        let graph = graph_of(4, &[(0, 1), (1, 2), (2, 1), (2, 3)]);
        let tree = compute_dominators(&graph, id(0));

        assert_eq!(tree.immediate_dominator(id(2)), Some(id(1)));
        assert_eq!(tree.immediate_dominator(id(3)), Some(id(2)));
        assert_eq!(tree.dominators(id(3)).collect::<Vec<_>>(), vec![id(3), id(2), id(1), id(0)]);
    }

    #[test]
    fn test_dominator_complex_cfg() {
        // Classic example where semidominator differs from idom
        let graph = graph_of(
            7,
            &[(0, 1), (0, 2), (1, 3), (2, 3), (3, 4), (4, 5), (5, 3), (4, 6), (1, 6)],
        );
        let tree = compute_dominators(&graph, id(0));

        assert_eq!(tree.immediate_dominator(id(3)), Some(id(0)));
        assert_eq!(tree.immediate_dominator(id(4)), Some(id(3)));
        assert_eq!(tree.immediate_dominator(id(5)), Some(id(4)));
        assert_eq!(tree.immediate_dominator(id(6)), Some(id(0)));
    }

    #[test]
    fn test_unreachable_nodes() {
        let graph = graph_of(3, &[(0, 1), (2, 1)]);
        let tree = compute_dominators(&graph, id(0));

        assert!(!tree.is_reachable(id(2)));
        assert!(!tree.dominates(id(2), id(1)));
        assert!(!tree.dominates(id(0), id(2)));
        assert_eq!(tree.immediate_dominator(id(1)), Some(id(0)));
        assert_eq!(tree.dominators(id(2)).count(), 0);
    }

    #[test]
    fn test_subtree_and_common_dominator() {
        let graph = graph_of(6, &[(0, 1), (1, 2), (1, 3), (2, 4), (3, 4), (0, 5)]);
        let tree = compute_dominators(&graph, id(0));

        let sub = tree.subtree(id(1));
        assert_eq!(sub.iter().collect::<Vec<_>>(), vec![id(1), id(2), id(3), id(4)]);
        assert_eq!(tree.nearest_common_dominator(id(2), id(3)), Some(id(1)));
        assert_eq!(tree.nearest_common_dominator(id(4), id(5)), Some(id(0)));
    }

    #[test]
    fn test_long_chain_is_iterative() {
        let n = 50_000;
        let edges: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        let graph = graph_of(n, &edges);
        let tree = compute_dominators(&graph, id(0));
        assert_eq!(tree.immediate_dominator(id(n - 1)), Some(id(n - 2)));
        assert_eq!(tree.depth(id(n - 1)), n - 1);
    }
}
