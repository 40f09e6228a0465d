//! SSA intermediate representation.
//!
//! A method is a [`MethodGraph`]: basic blocks holding phis and typed operations,
//! each block ending in a [`Terminator`] and carrying the handler edges of the
//! operations inside it. Blocks, operations and variables are arena-allocated and
//! addressed by [`BlockId`], [`OpId`] and [`VarId`].
//!
//! # Architecture
//!
//! - [`value`](self) - variables, literals and their types
//! - [`operation`](self) - the closed [`OpKind`] set and its outputs
//! - [`block`](self) - blocks, terminators, handler edges and subroutine records
//! - [`graph`](self) - the arenas and the edge bookkeeping
//! - `duplicate` and `repair` - region copying and SSA reconstruction used by the
//!   normalization passes
//! - [`check_ssa`] - the well-formedness check run between stages
//! - [`GraphBuilder`] - a builder for hand-written graphs
//!
//! # Ordering
//!
//! Side effects are sequenced by a value of type [`VarType::Token`]. Every operation
//! that may throw consumes the current token as `inputs[0]` and produces a new one,
//! so the only order a later pass has to respect is the one visible in the data
//! flow.

mod block;
mod check;
mod duplicate;
mod fixture;
mod graph;
mod operation;
mod repair;
mod value;

pub use block::{Block, BlockId, HandlerEdge, Procedure, Terminator};
pub use check::check_ssa;
pub use duplicate::Duplication;
pub use fixture::GraphBuilder;
pub use graph::MethodGraph;
pub use operation::{OpId, OpKind, Operation};
pub use repair::{remove_trivial_phis, repair};
pub use value::{Literal, VarId, VarType, Variable};

pub(crate) use duplicate::map_vars;
