//! Structuring engine: from a method graph to a statement tree.
//!
//! [`structure`] runs the stages below strictly in order. The early stages reshape
//! the graph, the later ones only read it.
//!
//! 1. Loop normalization makes every loop single-entry, copying blocks where
//!    several entries exist
//! 2. Exception normalization makes handler edges disjoint and unifies the blocks
//!    that only rethrow into [`MethodGraph::rethrow`]
//! 3. Conditional normalization gives every branch arm a block of its own
//! 4. Interval construction proposes a candidate construct per loop, per group of
//!    blocks sharing a handler, and per branch
//! 5. Ordering nests the candidates into one laminar family
//! 6. Handler merging joins tries of one handler; handlers still shared are
//!    copied and stages 4 to 6 run again
//! 7. Scope completion grows every construct towards its upper bound
//! 8. Break scope placement decides where each block goes and which jumps need
//!    labels
//! 9. Emission builds the [`Statement`] tree
//!
//! There is no degraded output. Either the tree describes exactly the control flow
//! of the final graph, which [`check_round_trip`] verifies when
//! [`DecompilerConfig::verify_round_trip`](crate::compiler::DecompilerConfig::verify_round_trip)
//! is set, or structuring fails with [`crate::Error::InternalConsistency`].
//!
//! ```rust
//! use classflow::bytecode::{ClassHierarchy, Cond};
//! use classflow::compiler::{DecompilerConfig, MethodContext};
//! use classflow::ir::{GraphBuilder, VarType};
//! use classflow::structuring::{structure, Statement};
//!
//! // if (x < 0) a else b; return
//! let mut b = GraphBuilder::new("f");
//! let x = b.input(VarType::Int);
//! let [entry, a, c, exit] = b.blocks();
//! let zero = b.int(0);
//! b.branch(entry, Cond::Lt, x, zero, a, c);
//! b.goto(a, exit);
//! b.goto(c, exit);
//! b.ret(exit, None);
//! let mut graph = b.finish();
//!
//! let oracle = ClassHierarchy::with_java_lang();
//! let config = DecompilerConfig::default();
//! let ctx = MethodContext::new(&oracle, &config, "T.f(I)V");
//! let tree = structure(&mut graph, &ctx)?;
//!
//! assert!(tree.iter().any(|s| matches!(s, Statement::If { .. })));
//! assert!(!tree.iter().any(|s| matches!(s, Statement::While { .. })));
//! # Ok::<(), classflow::Error>(())
//! ```

mod breaks;
mod completion;
mod emit;
mod exceptions;
mod intervals;
mod linearize;
mod loops;
mod merging;
mod normalize;
mod ordering;
mod statement;

pub use exceptions::{ExceptionSet, TypeRange};
pub use linearize::{check_round_trip, linearize, Edge, Linearized};
pub use statement::{CatchClause, Label, Statement, StatementIter, SwitchCase};

use crate::{
    compiler::MethodContext,
    ir::{BlockId, MethodGraph},
    Result,
};

use self::{
    breaks::place,
    completion::complete_scopes,
    emit::emit,
    intervals::{candidates, Analysis},
    loops::normalize_loops,
    merging::{duplicate_handlers, duplication_requests, merge_handlers},
    normalize::{normalize_conditionals, normalize_exceptions},
    ordering::{absorb_arms, order},
};

/// Rounds of handler duplication before the remaining shared handlers are kept.
const MAX_HANDLER_ROUNDS: usize = 8;

/// Address of a block for diagnostics: its bytecode offset, or its index for
/// synthetic blocks.
pub(crate) fn location(graph: &MethodGraph, block: BlockId) -> usize {
    graph
        .block(block)
        .offset
        .map_or(block.index(), |offset| offset as usize)
}

/// Normalizes `graph` and builds its statement tree.
///
/// # Errors
///
/// Returns [`crate::Error::Unsupported`] if loop normalization exceeds
/// [`DecompilerConfig::max_loop_duplication_rounds`](crate::compiler::DecompilerConfig::max_loop_duplication_rounds),
/// and [`crate::Error::InternalConsistency`] if no consistent tree exists or the
/// tree fails the round-trip check.
pub fn structure(graph: &mut MethodGraph, ctx: &MethodContext<'_>) -> Result<Statement> {
    normalize_loops(graph, ctx)?;
    normalize_exceptions(graph, ctx)?;
    normalize_conditionals(graph, ctx);

    let mut round = 0;
    loop {
        if round > 0 {
            normalize_loops(graph, ctx)?;
            normalize_conditionals(graph, ctx);
        }

        let requests = {
            let analysis = Analysis::new(graph, ctx.oracle);
            let mut found = candidates(&analysis);
            let conditionals = std::mem::take(&mut found.conditionals);
            let mut family = order(&analysis, found)?;
            merge_handlers(&analysis, &mut family, ctx);
            absorb_arms(&mut family, &conditionals);

            let requests = if round < MAX_HANDLER_ROUNDS {
                duplication_requests(&analysis, &family, ctx)
            } else {
                Vec::new()
            };
            if requests.is_empty() {
                let grown = complete_scopes(&analysis, &mut family);
                let placement = place(&analysis, &family);
                let tree = emit(&analysis, &family, &placement)?;
                log::debug!(
                    "structured {}: {} constructs, {} grown, {} labels",
                    graph.name(),
                    family.constructs.len(),
                    grown,
                    placement.labels.len() + placement.loop_labels.len()
                );
                if ctx.config.verify_round_trip {
                    check_round_trip(graph, &tree, ctx.oracle)?;
                }
                return Ok(tree);
            }
            requests
        };

        duplicate_handlers(graph, &requests, ctx)?;
        round += 1;
    }
}
