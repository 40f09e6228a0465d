//! Pipeline driver, configuration and diagnostics.
//!
//! - [`Decompiler`] runs the stages over one method and returns a
//!   [`DecompiledMethod`]
//! - [`DecompilerConfig`] holds every iteration and duplication limit
//! - [`MethodContext`] is the read-only context handed to each stage
//! - [`EventLog`] collects what the stages did, for debugging and tests
//!
//! # Architecture
//!
//! ```text
//! MethodBody
//!   -> verifier      typed frames, subroutine masks
//!   -> builder       raw graph, placeholder phis
//!   -> assembler     subroutines inlined, phis resolved
//!   -> constraints   literals folded, dead branches pruned
//!   -> structuring   normalized graph + Statement tree
//! ```

mod config;
mod context;
mod events;
mod pipeline;

pub use config::DecompilerConfig;
pub use context::MethodContext;
pub use events::{Event, EventBuilder, EventKind, EventLog, EventLogIter};
pub use pipeline::{DecompiledMethod, Decompiler};
