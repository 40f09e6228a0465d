//! Graph algorithms for control-flow analysis.
//!
//! Every algorithm here is generic over the traits in [`crate::utils::graph`] and
//! iterative: walks keep explicit work-stacks so that very large methods cannot
//! exhaust the call stack.
//!
//! # Available Algorithms
//!
//! ## Traversal
//!
//! - [`dfs`] - Depth-first search traversal
//! - [`bfs`] - Breadth-first search traversal
//! - [`postorder`] / [`reverse_postorder`] - Orders for dataflow and layout
//! - [`reachable`] - Forward reachability set
//!
//! ## Dominator Analysis
//!
//! - [`compute_dominators`] - Lengauer-Tarjan dominator tree
//! - [`DominatorTree`] - Result of dominator computation, with subtree and
//!   nearest-common-dominator queries
//!
//! ## Strongly Connected Components
//!
//! - [`strongly_connected_components`] - Tarjan's SCC algorithm
//! - [`strongly_connected_components_within`] - SCCs of an induced subgraph, used
//!   to find loops nested inside a loop body
//!
//! ## Cuts
//!
//! - [`min_vertex_cut`] - Edmonds-Karp on a split-node network
//!
//! | Algorithm | Time Complexity | Use Case |
//! |-----------|-----------------|----------|
//! | DFS/BFS | O(V + E) | General traversal |
//! | Dominators | O(E α(V)) | Regions, upper bounds, SSA repair |
//! | SCC | O(V + E) | Loop detection, propagation order |
//! | Min vertex cut | O(V E) | Loop and try body completion |

mod dominators;
mod mincut;
mod scc;
mod traversal;

pub use dominators::{
    compute_dominators, compute_dominators_rooted, DominatorIterator, DominatorTree,
};
pub use mincut::{min_vertex_cut, VertexCut};
pub use scc::{
    is_cyclic_component, strongly_connected_components, strongly_connected_components_within,
};
pub use traversal::{bfs, dfs, postorder, reachable, reverse_postorder, BfsIterator, DfsIterator};
