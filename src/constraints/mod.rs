//! Constraint propagation and the rewrites it enables.
//!
//! [`optimize`] alternates two steps until the graph stops changing:
//!
//! 1. [`Propagator`] computes a [`Constraint`] for every variable, an SCC-ordered
//!    fixed point over the operation dependency graph, and narrows it per block
//!    by the branch conditions that lead there
//! 2. [`simplify`] folds constants, removes infeasible branch arms, bypasses empty
//!    blocks and prunes unreachable ones
//!
//! Removing an arm can make a phi constant, and a new constant can decide another
//! branch, so each round feeds the next. The number of rounds is bounded by
//! [`crate::compiler::DecompilerConfig::max_propagation_rounds`].
//!
//! ```rust
//! use classflow::bytecode::{ClassHierarchy, Cond};
//! use classflow::compiler::{DecompilerConfig, MethodContext};
//! use classflow::constraints::optimize;
//! use classflow::ir::{GraphBuilder, Literal, Terminator, VarType};
//!
//! // x = 2 + 3; if (x == 5) return x; else return 0
//! let mut b = GraphBuilder::new("f");
//! let [entry, yes, no] = b.blocks();
//! let (two, three, five, zero) = (b.int(2), b.int(3), b.int(5), b.int(0));
//! let x = b.add(entry, two, three);
//! b.branch(entry, Cond::Eq, x, five, yes, no);
//! b.ret(yes, Some(x));
//! b.ret(no, Some(zero));
//! let mut graph = b.finish();
//!
//! let oracle = ClassHierarchy::with_java_lang();
//! let config = DecompilerConfig::default();
//! let ctx = MethodContext::new(&oracle, &config, "T.f()I");
//! optimize(&mut graph, &ctx, &[])?;
//!
//! assert_eq!(graph.var(x).literal, Some(Literal::Int(5)));
//! assert_eq!(graph.block(entry).terminator, Terminator::Goto(yes));
//! assert_eq!(graph.block_count(), 2);
//! # Ok::<(), classflow::Error>(())
//! ```

mod lattice;
mod propagator;
mod simplifier;

pub use lattice::{
    type_name, Constraint, FloatConstraint, FloatSpecials, IntRange, JoinSemiLattice,
    MeetSemiLattice, ObjectConstraint,
};
pub use propagator::{Propagator, Solution, REFINEMENT_PASSES};
pub use simplifier::simplify;

pub(crate) use simplifier::prune_unreachable;

use crate::{
    compiler::MethodContext,
    ir::{check_ssa, MethodGraph, VarId},
    Result,
};

/// Propagates constraints and simplifies `graph` until neither changes anything.
///
/// `non_null` lists inputs known not to be `null`, such as the receiver.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] if simplification does not settle,
/// or if the graph is no longer in SSA form afterwards and
/// [`crate::compiler::DecompilerConfig::check_ssa`] is set.
pub fn optimize(graph: &mut MethodGraph, ctx: &MethodContext<'_>, non_null: &[VarId]) -> Result<()> {
    let rounds = ctx.config.max_propagation_rounds;
    let mut round = 0;
    while round < rounds {
        round += 1;
        let solution = Propagator::new(ctx.oracle, ctx.config.max_scc_rounds).analyze(graph, non_null)?;
        if !simplify(graph, &solution, ctx)? {
            break;
        }
    }

    log::debug!(
        "optimized {} in {} rounds: {} blocks left",
        graph.name(),
        round,
        graph.block_count()
    );
    if ctx.config.check_ssa {
        check_ssa(graph)?;
    }
    Ok(())
}
