//! Directed graph infrastructure for control-flow analysis.
//!
//! This module provides the graph abstractions and algorithms the pipeline stages
//! share. Method graphs implement the traits in [`traits`](self) directly, so the
//! dominator, SCC and traversal code runs on them without an intermediate copy.
//!
//! # Architecture
//!
//! - **Core Types**: [`NodeId`], [`NodeSet`] and [`DirectedGraph`]
//! - **Traits**: [`GraphBase`], [`Successors`], [`Predecessors`] and [`RootedGraph`]
//!   let algorithms accept any graph type
//! - **Algorithms**: traversal orders, dominators, SCCs and minimum vertex cuts in
//!   [`algorithms`]
//!
//! # Design Principles
//!
//! ## Strongly-Typed Identifiers
//!
//! Node identifiers use a newtype wrapper to prevent accidental mixing with other
//! indices such as variable or operation handles.
//!
//! ## Stable Indices
//!
//! Nodes are never removed from the arena. Stages that delete blocks mark them dead
//! and drop their edges, so side tables indexed by [`NodeId`] stay valid.
//!
//! # Usage Examples
//!
//! ```rust
//! use classflow::utils::graph::{algorithms, DirectedGraph, NodeId};
//!
//! // Create a diamond-shaped graph: A -> B, A -> C, B -> D, C -> D
//! let mut graph: DirectedGraph<&str> = DirectedGraph::new();
//! let a = graph.add_node("A");
//! let b = graph.add_node("B");
//! let c = graph.add_node("C");
//! let d = graph.add_node("D");
//! graph.add_edge(a, b)?;
//! graph.add_edge(a, c)?;
//! graph.add_edge(b, d)?;
//! graph.add_edge(c, d)?;
//!
//! let dom_tree = algorithms::compute_dominators(&graph, a);
//! assert_eq!(dom_tree.immediate_dominator(d), Some(a));
//! # Ok::<(), classflow::Error>(())
//! ```

pub mod algorithms;
mod directed;
mod node;
mod nodeset;
mod traits;

pub use directed::DirectedGraph;
pub use node::NodeId;
pub use nodeset::NodeSet;
pub use traits::{GraphBase, Predecessors, RootedGraph, Successors};
