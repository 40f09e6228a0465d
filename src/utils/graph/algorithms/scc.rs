//! Strongly Connected Components (SCC) using Tarjan's algorithm.
//!
//! SCCs drive two stages: loop normalization looks for multi-entry components of
//! the control-flow graph, and the constraint propagator orders its fixed-point
//! iteration by the components of the operation dependency graph.
//!
//! The classic formulation recurses once per node. Here the DFS keeps an explicit
//! frame stack holding each node's pending successor list, so arbitrarily deep
//! graphs are handled without growing the call stack.

use crate::utils::graph::{NodeId, NodeSet, Successors};

/// Computes the strongly connected components of a directed graph.
///
/// The SCCs are returned in **reverse topological order**: if there is an edge from
/// SCC A to SCC B, then B appears before A. Members of each SCC are listed in the
/// order they were popped from the Tarjan stack.
///
/// # Examples
///
/// ```rust
/// use classflow::utils::graph::{algorithms::strongly_connected_components, DirectedGraph};
///
/// let mut graph: DirectedGraph<char> = DirectedGraph::new();
/// let a = graph.add_node('A');
/// let b = graph.add_node('B');
/// let c = graph.add_node('C');
/// graph.add_edge(a, b)?;
/// graph.add_edge(b, a)?;
/// graph.add_edge(b, c)?;
///
/// let sccs = strongly_connected_components(&graph);
/// assert_eq!(sccs.len(), 2);
/// assert_eq!(sccs[0], vec![c]);
/// # Ok::<(), classflow::Error>(())
/// ```
pub fn strongly_connected_components<G>(graph: &G) -> Vec<Vec<NodeId>>
where
    G: Successors,
{
    strongly_connected_components_within(graph, None)
}

/// Computes the SCCs of the subgraph induced by `members`.
///
/// Edges leaving `members` are ignored and nodes outside it are never visited. With
/// `None` the whole graph is used.
pub fn strongly_connected_components_within<G>(
    graph: &G,
    members: Option<&NodeSet>,
) -> Vec<Vec<NodeId>>
where
    G: Successors,
{
    let node_count = graph.node_count();
    let mut state = TarjanState::new(node_count);

    for i in 0..node_count {
        let node = NodeId::new(i);
        if members.is_some_and(|m| !m.contains(node)) {
            continue;
        }
        if state.index[i].is_none() {
            state.strongconnect(graph, node, members);
        }
    }

    state.sccs
}

/// Returns `true` if the SCC contains a cycle: more than one member, or a single
/// member with a self edge.
pub fn is_cyclic_component<G: Successors>(graph: &G, scc: &[NodeId]) -> bool {
    match scc {
        [single] => graph.successors(*single).any(|s| s == *single),
        _ => scc.len() > 1,
    }
}

struct Frame {
    node: NodeId,
    successors: Vec<NodeId>,
    next: usize,
}

struct TarjanState {
    index: Vec<Option<usize>>,
    lowlink: Vec<usize>,
    on_stack: Vec<bool>,
    stack: Vec<NodeId>,
    current_index: usize,
    sccs: Vec<Vec<NodeId>>,
}

impl TarjanState {
    fn new(n: usize) -> Self {
        Self {
            index: vec![None; n],
            lowlink: vec![0; n],
            on_stack: vec![false; n],
            stack: Vec::new(),
            current_index: 0,
            sccs: Vec::new(),
        }
    }

    fn enter<G: Successors>(&mut self, graph: &G, node: NodeId, members: Option<&NodeSet>) -> Frame {
        let idx = node.index();
        self.index[idx] = Some(self.current_index);
        self.lowlink[idx] = self.current_index;
        self.current_index += 1;
        self.stack.push(node);
        self.on_stack[idx] = true;

        Frame {
            node,
            successors: graph
                .successors(node)
                .filter(|s| members.is_none_or(|m| m.contains(*s)))
                .collect(),
            next: 0,
        }
    }

    fn strongconnect<G: Successors>(&mut self, graph: &G, root: NodeId, members: Option<&NodeSet>) {
        let mut frames = vec![self.enter(graph, root, members)];

        while let Some(frame) = frames.last_mut() {
            let v = frame.node.index();

            if frame.next < frame.successors.len() {
                let w = frame.successors[frame.next];
                frame.next += 1;

                match self.index[w.index()] {
                    None => {
                        let child = self.enter(graph, w, members);
                        frames.push(child);
                    }
                    Some(w_index) if self.on_stack[w.index()] => {
                        self.lowlink[v] = self.lowlink[v].min(w_index);
                    }
                    Some(_) => {}
                }
                continue;
            }

            // All successors done: close this node, then fold its lowlink into the parent
            let node = frame.node;
            frames.pop();

            if Some(self.lowlink[v]) == self.index[v] {
                let mut scc = Vec::new();
                while let Some(w) = self.stack.pop() {
                    self.on_stack[w.index()] = false;
                    scc.push(w);
                    if w == node {
                        break;
                    }
                }
                self.sccs.push(scc);
            }

            if let Some(parent) = frames.last() {
                let p = parent.node.index();
                self.lowlink[p] = self.lowlink[p].min(self.lowlink[v]);
            }
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

    #[test]
    fn test_scc_dag() {
        let graph = graph_of(3, &[(0, 1), (1, 2)]);
        let sccs = strongly_connected_components(&graph);
        assert_eq!(
            sccs,
            vec![vec![NodeId::new(2)], vec![NodeId::new(1)], vec![NodeId::new(0)]]
        );
    }

    #[test]
    fn test_scc_nested_cycles() {
        // 0 -> 1 -> 2 -> 1, 2 -> 3 -> 0, 3 -> 4
        let graph = graph_of(5, &[(0, 1), (1, 2), (2, 1), (2, 3), (3, 0), (3, 4)]);
        let sccs = strongly_connected_components(&graph);

        assert_eq!(sccs.len(), 2);
        assert_eq!(sccs[0], vec![NodeId::new(4)]);
        let mut big = sccs[1].clone();
        big.sort();
        assert_eq!(big, (0..4).map(NodeId::new).collect::<Vec<_>>());
    }

    #[test]
    fn test_scc_within_subset() {
        let graph = graph_of(4, &[(0, 1), (1, 2), (2, 1), (2, 3), (3, 0)]);
        let members: NodeSet = [1, 2].into_iter().map(NodeId::new).collect();
        let sccs = strongly_connected_components_within(&graph, Some(&members));

        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), 2);
    }

    #[test]
    fn test_cyclic_component() {
        let graph = graph_of(2, &[(0, 0), (0, 1)]);
        assert!(is_cyclic_component(&graph, &[NodeId::new(0)]));
        assert!(!is_cyclic_component(&graph, &[NodeId::new(1)]));
    }

    #[test]
    fn test_scc_deep_cycle() {
        let n = 50_000;
        let mut edges: Vec<(usize, usize)> = (0..n - 1).map(|i| (i, i + 1)).collect();
        edges.push((n - 1, 0));
        let graph = graph_of(n, &edges);
        let sccs = strongly_connected_components(&graph);
        assert_eq!(sccs.len(), 1);
        assert_eq!(sccs[0].len(), n);
    }
}
