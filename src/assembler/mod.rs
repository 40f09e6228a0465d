//! Graph assembler: resolves phis and inlines `jsr`/`ret` subroutines.
//!
//! Input is the [`RawGraph`] of the block builder: placeholder phis without inputs,
//! exit states for every block and subroutine calls still in place. The assembler
//!
//! 1. copies every subroutine with several callers until each copy has one caller,
//! 2. fills in each phi from the exit states of its predecessors,
//! 3. turns calls and returns into plain jumps and drops the subroutine records,
//! 4. removes phis whose inputs all agree.
//!
//! The result is an ordinary SSA graph with no subroutine constructs left.
//!
//! ```rust
//! use classflow::assembler::assemble;
//! use classflow::builder::build;
//! use classflow::bytecode::{ClassHierarchy, CodeBuilder};
//! use classflow::ir::{check_ssa, Terminator};
//! use classflow::verifier::verify;
//!
//! let mut code = CodeBuilder::new();
//! let sub = code.label();
//! code.jsr(sub)
//!     .vreturn()
//!     .bind(sub)
//!     .astore(0)
//!     .ret(0);
//! let method = code.into_method("Demo", "f", "()V", true)?;
//! let verified = verify(&method, &ClassHierarchy::with_java_lang())?;
//!
//! let graph = assemble(build(&method, &verified)?, 4)?;
//! check_ssa(&graph)?;
//! assert!(graph.procedures().is_empty());
//! # Ok::<(), classflow::Error>(())
//! ```

mod phis;
mod subroutines;

use crate::{
    assembler::{
        phis::resolve_phis,
        subroutines::{collect_masks, duplicate_subroutines, inline_subroutines},
    },
    builder::RawGraph,
    ir::{remove_trivial_phis, MethodGraph},
    Result,
};

/// Turns the block builder's output into a subroutine-free SSA graph.
///
/// `max_subroutine_copies` bounds the number of subroutine copies made for the
/// whole method.
///
/// # Errors
///
/// Returns [`crate::Error::Unsupported`] if the subroutines need more copies than
/// allowed, and [`crate::Error::InternalConsistency`] if a phi input cannot be
/// determined.
pub fn assemble(mut raw: RawGraph, max_subroutine_copies: usize) -> Result<MethodGraph> {
    let masks = collect_masks(&raw.graph);
    let copies = duplicate_subroutines(&mut raw, max_subroutine_copies)?;
    resolve_phis(&mut raw, &masks)?;

    let mut graph = raw.graph;
    inline_subroutines(&mut graph)?;
    let trivial = remove_trivial_phis(&mut graph);

    log::debug!(
        "assembled {}: {} subroutine copies, {} trivial phis removed",
        graph.name(),
        copies,
        trivial
    );
    Ok(graph)
}
