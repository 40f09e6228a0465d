//! Minimum vertex cuts via Edmonds-Karp maximum flow.
//!
//! Region completion grows a loop or try body by absorbing nodes until the number
//! of distinct exit targets is minimal. That is a minimum vertex cut between the
//! current exits and the nodes that must stay outside, computed on the usual
//! split-node network: every node `v` becomes `v_in -> v_out` with capacity 1, and
//! every graph edge `u -> v` becomes `u_out -> v_in` with unbounded capacity.

use std::collections::VecDeque;

use crate::utils::graph::{NodeId, NodeSet, Successors};

const UNBOUNDED: u32 = u32::MAX;

/// Result of [`min_vertex_cut`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VertexCut {
    /// Nodes strictly on the source side of the cut.
    pub source_side: NodeSet,
    /// The cut nodes themselves. Every path from a source to a sink passes through
    /// one of them.
    pub cut: NodeSet,
}

struct Arc {
    to: usize,
    cap: u32,
    rev: usize,
}

struct FlowNetwork {
    arcs: Vec<Vec<Arc>>,
}

impl FlowNetwork {
    fn new(size: usize) -> Self {
        FlowNetwork {
            arcs: (0..size).map(|_| Vec::new()).collect(),
        }
    }

    fn add_arc(&mut self, from: usize, to: usize, cap: u32) {
        let rev_from = self.arcs[to].len();
        let rev_to = self.arcs[from].len();
        self.arcs[from].push(Arc {
            to,
            cap,
            rev: rev_from,
        });
        self.arcs[to].push(Arc {
            to: from,
            cap: 0,
            rev: rev_to,
        });
    }

    /// Finds a shortest augmenting path and pushes one unit along it. Every path
    /// crosses at least one unit-capacity split arc, so one unit is always the
    /// bottleneck.
    fn augment(&mut self, source: usize, sink: usize) -> bool {
        let mut via: Vec<Option<(usize, usize)>> = vec![None; self.arcs.len()];
        let mut seen = vec![false; self.arcs.len()];
        let mut queue = VecDeque::from([source]);
        seen[source] = true;

        while let Some(u) = queue.pop_front() {
            if u == sink {
                break;
            }
            for (i, arc) in self.arcs[u].iter().enumerate() {
                if arc.cap > 0 && !seen[arc.to] {
                    seen[arc.to] = true;
                    via[arc.to] = Some((u, i));
                    queue.push_back(arc.to);
                }
            }
        }

        if !seen[sink] {
            return false;
        }

        let mut v = sink;
        while let Some((u, i)) = via[v] {
            let rev = self.arcs[u][i].rev;
            if self.arcs[u][i].cap != UNBOUNDED {
                self.arcs[u][i].cap -= 1;
            }
            let back = &mut self.arcs[v][rev];
            if back.cap != UNBOUNDED {
                back.cap += 1;
            }
            v = u;
        }
        true
    }

    fn residual_reachable(&self, source: usize) -> Vec<bool> {
        let mut seen = vec![false; self.arcs.len()];
        let mut stack = vec![source];
        seen[source] = true;
        while let Some(u) = stack.pop() {
            for arc in &self.arcs[u] {
                if arc.cap > 0 && !seen[arc.to] {
                    seen[arc.to] = true;
                    stack.push(arc.to);
                }
            }
        }
        seen
    }
}

/// Computes a minimum vertex cut separating `sources` from `sinks` inside the
/// subgraph induced by `within`.
///
/// Sources and sinks may themselves be cut. Nodes outside `within` are ignored, as
/// are edges leaving it. Among all minimum cuts the one closest to the sources is
/// returned, so the source side is as small as possible.
///
/// # Examples
///
/// ```rust
/// use classflow::utils::graph::{algorithms::min_vertex_cut, DirectedGraph, NodeSet};
///
/// // a -> b -> d, a -> c -> d, d -> e
/// let mut graph: DirectedGraph<()> = DirectedGraph::new();
/// let [a, b, c, d, e] = [(); 5].map(|()| graph.add_node(()));
/// graph.add_edge(a, b)?;
/// graph.add_edge(a, c)?;
/// graph.add_edge(b, d)?;
/// graph.add_edge(c, d)?;
/// graph.add_edge(d, e)?;
///
/// let within: NodeSet = [b, c, d, e].into_iter().collect();
/// let cut = min_vertex_cut(&graph, &within, &[b, c].into_iter().collect(), &NodeSet::singleton(e));
/// assert_eq!(cut.cut, NodeSet::singleton(d));
/// assert_eq!(cut.source_side, [b, c].into_iter().collect());
/// # Ok::<(), classflow::Error>(())
/// ```
pub fn min_vertex_cut<G: Successors>(
    graph: &G,
    within: &NodeSet,
    sources: &NodeSet,
    sinks: &NodeSet,
) -> VertexCut {
    let members: Vec<NodeId> = within.iter().collect();
    let n = graph.node_count();
    let mut slot = vec![usize::MAX; n];
    for (i, &node) in members.iter().enumerate() {
        if node.index() < n {
            slot[node.index()] = i;
        }
    }

    // v_in = 2i, v_out = 2i + 1
    let source = members.len() * 2;
    let sink = source + 1;
    let mut network = FlowNetwork::new(sink + 1);

    for (i, &node) in members.iter().enumerate() {
        if node.index() >= n {
            continue;
        }
        network.add_arc(2 * i, 2 * i + 1, 1);
        for succ in graph.successors(node) {
            let j = slot.get(succ.index()).copied().unwrap_or(usize::MAX);
            if j != usize::MAX {
                network.add_arc(2 * i + 1, 2 * j, UNBOUNDED);
            }
        }
        if sources.contains(node) {
            network.add_arc(source, 2 * i, UNBOUNDED);
        }
        if sinks.contains(node) {
            network.add_arc(2 * i + 1, sink, UNBOUNDED);
        }
    }

    while network.augment(source, sink) {}

    let seen = network.residual_reachable(source);
    let mut result = VertexCut::default();
    for (i, &node) in members.iter().enumerate() {
        match (seen[2 * i], seen[2 * i + 1]) {
            (true, true) => {
                result.source_side.insert(node);
            }
            (true, false) => {
                result.cut.insert(node);
            }
            _ => {}
        }
    }
    result
}
