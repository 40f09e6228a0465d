//! Loop normalization.
//!
//! Every cycle of the graph must become a loop with a single entry block, its
//! head, that dominates the rest of the loop. The graph is scanned outside-in: each
//! cyclic strongly connected component must have one entry, and the component
//! minus its head is scanned again for nested loops.
//!
//! A component with several entries is repaired by keeping one entry as the head
//! and giving the outside predecessors of every other entry a private copy of the
//! blocks they reach before coming back to the head. The copies are no longer part
//! of the cycle. The head is the entry whose choice copies the fewest blocks, the
//! lowest address winning ties. The copy is always correct but can grow
//! exponentially with nesting, so every repair is reported as a warning and the
//! number of rounds is capped by
//! [`DecompilerConfig::max_loop_duplication_rounds`](crate::compiler::DecompilerConfig::max_loop_duplication_rounds).
//!
//! Loop heads also must not throw. A head that does gets an empty forwarding block
//! in front of it, which becomes the new head.

use crate::{
    compiler::{EventKind, MethodContext},
    ir::{repair, BlockId, MethodGraph, Terminator},
    structuring::location,
    utils::graph::{
        algorithms::{is_cyclic_component, reachable, strongly_connected_components_within},
        NodeSet,
    },
    Error, Result,
};

const STAGE: &str = "loops";

enum Scan {
    Done,
    SplitHead(BlockId),
    MultiEntry { component: NodeSet, entries: Vec<BlockId> },
}

/// Makes every loop of `graph` single-entry with a non-throwing head. Returns the
/// number of blocks copied.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] if the loops are not single-entry after the
/// configured number of rounds, and [`Error::InternalConsistency`] if the entry
/// block is a loop head carrying phis or SSA repair fails.
pub(crate) fn normalize_loops(graph: &mut MethodGraph, ctx: &MethodContext<'_>) -> Result<usize> {
    detach_entry(graph)?;

    let limit = ctx.config.max_loop_duplication_rounds;
    let mut rounds = 0;
    let mut copied = 0;
    loop {
        match scan(graph) {
            Scan::Done => break,
            Scan::SplitHead(head) => {
                let preds = graph.preds_of(head).to_vec();
                let forwarder = graph.split_preds(head, &preds);
                ctx.record(
                    EventKind::Indirected,
                    STAGE,
                    location(graph, head),
                    format!("{forwarder} heads the loop of throwing block {head}"),
                );
            }
            Scan::MultiEntry { component, entries } => {
                rounds += 1;
                if rounds > limit {
                    return Err(Error::Unsupported(format!(
                        "loops of {} still have several entries after {} rounds",
                        graph.name(),
                        limit
                    )));
                }
                copied += single_entry(graph, &component, &entries, ctx)?;
            }
        }
    }

    if copied > 0 {
        log::debug!("{}: {} blocks copied by loop normalization", graph.name(), copied);
    }
    Ok(copied)
}

/// Puts an empty block in front of an entry block that has predecessors.
fn detach_entry(graph: &mut MethodGraph) -> Result<()> {
    let entry = graph.entry();
    if graph.preds_of(entry).is_empty() {
        return Ok(());
    }
    if !graph.block(entry).phis.is_empty() {
        return Err(consistency_error!("entry block {} of {} has phis", entry, graph.name()));
    }
    let start = graph.add_block(None);
    graph.set_terminator(start, Terminator::Goto(entry));
    graph.set_entry(start);
    Ok(())
}

fn address(graph: &MethodGraph, block: BlockId) -> (u32, usize) {
    (graph.block(block).offset.unwrap_or(u32::MAX), block.index())
}

/// Finds the outermost loop that needs work.
fn scan(graph: &MethodGraph) -> Scan {
    let live = reachable(graph, graph.entry());
    let mut regions = vec![live.clone()];

    while let Some(region) = regions.pop() {
        for scc in strongly_connected_components_within(graph, Some(&region)) {
            if !is_cyclic_component(graph, &scc) {
                continue;
            }
            let component: NodeSet = scc.iter().copied().collect();
            let mut entries: Vec<BlockId> = scc
                .iter()
                .copied()
                .filter(|&b| {
                    graph
                        .preds_of(b)
                        .iter()
                        .any(|&p| live.contains(p) && !component.contains(p))
                })
                .collect();
            entries.sort_by_key(|&b| address(graph, b));

            let Some(&head) = entries.first() else {
                continue;
            };
            if entries.len() > 1 {
                return Scan::MultiEntry { component, entries };
            }
            let b = graph.block(head);
            if graph.throws(head) || !b.handlers.is_empty() {
                return Scan::SplitHead(head);
            }
            let mut inner = component;
            inner.remove(head);
            if !inner.is_empty() {
                regions.push(inner);
            }
        }
    }
    Scan::Done
}

/// Blocks of `component` reachable from `start` without passing `head`.
fn reached_before(graph: &MethodGraph, component: &NodeSet, start: BlockId, head: BlockId) -> NodeSet {
    let mut seen = NodeSet::singleton(start);
    let mut stack = vec![start];
    while let Some(block) = stack.pop() {
        for succ in graph.successors_of(block) {
            if succ != head && component.contains(succ) && seen.insert(succ) {
                stack.push(succ);
            }
        }
    }
    seen
}

fn single_entry(
    graph: &mut MethodGraph,
    component: &NodeSet,
    entries: &[BlockId],
    ctx: &MethodContext<'_>,
) -> Result<usize> {
    let cost = |head: BlockId| -> usize {
        entries
            .iter()
            .filter(|&&e| e != head)
            .map(|&e| reached_before(graph, component, e, head).len())
            .sum()
    };
    let Some(head) = entries
        .iter()
        .copied()
        .min_by_key(|&e| (cost(e), address(graph, e)))
    else {
        return Ok(0);
    };

    let names: Vec<String> = entries
        .iter()
        .map(|&e| location(graph, e).to_string())
        .collect();
    ctx.warn(
        STAGE,
        format!(
            "loop entered at {} is not single-entry, keeping {} as its head",
            names.join(", "),
            location(graph, head)
        ),
    );

    let mut copied = 0;
    for &entry in entries.iter().filter(|&&e| e != head) {
        let redirect: Vec<(BlockId, BlockId)> = graph
            .preds_of(entry)
            .iter()
            .filter(|&&p| !component.contains(p))
            .map(|&p| (p, entry))
            .collect();
        if redirect.is_empty() {
            continue;
        }
        let region = reached_before(graph, component, entry, head);
        let dup = graph.duplicate_region(&region, &redirect);
        repair(graph, &dup.vars)?;
        copied += dup.blocks.len();
        ctx.record(
            EventKind::LoopDuplicated,
            STAGE,
            location(graph, entry),
            format!("{} blocks copied for the entry at {}", dup.blocks.len(), entry),
        );
    }

    if copied > ctx.config.large_duplication_warning {
        ctx.warn(
            STAGE,
            format!(
                "large duplication: {} blocks copied to give the loop at {} a single entry",
                copied,
                location(graph, head)
            ),
        );
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, Cond},
        compiler::DecompilerConfig,
        ir::{check_ssa, GraphBuilder, VarType},
        utils::graph::algorithms::compute_dominators,
    };

    #[test]
    fn test_two_entry_loop_keeps_lowest_address() {
        // entry -> a | b, a -> b, b -> a | exit
        let mut b = GraphBuilder::new("twin");
        let x = b.input(VarType::Int);
        let [entry, a, bb, exit] = b.blocks();
        let zero = b.int(0);
        b.branch(entry, Cond::Lt, x, zero, a, bb);
        b.goto(a, bb);
        b.branch(bb, Cond::Gt, x, zero, a, exit);
        b.ret(exit, None);
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.twin(I)V");
        let copied = normalize_loops(&mut graph, &ctx).unwrap();

        assert_eq!(copied, 1);
        assert!(ctx.events.has(EventKind::Warning));
        assert_eq!(ctx.events.count_kind(EventKind::LoopDuplicated), 1);
        assert_eq!(graph.block_count(), 5);

        // `a` now dominates the loop it heads
        let doms = compute_dominators(&graph, graph.entry());
        assert!(doms.dominates(a, bb));
        check_ssa(&graph).unwrap();
    }

    #[test]
    fn test_throwing_head_gets_forwarder() {
        let mut b = GraphBuilder::new("spin");
        let x = b.input(VarType::Int);
        let [entry, head, exit] = b.blocks();
        let zero = b.int(0);
        b.goto(entry, head);
        b.call(head, "tick");
        b.branch(head, Cond::Lt, x, zero, head, exit);
        b.ret(exit, None);
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.spin(I)V");
        assert_eq!(normalize_loops(&mut graph, &ctx).unwrap(), 0);

        let Terminator::Goto(new_head) = graph.block(entry).terminator else {
            panic!("entry should still jump");
        };
        assert_ne!(new_head, head);
        assert!(graph.block(new_head).ops.is_empty());
        assert_eq!(graph.preds_of(new_head), &[entry, head]);
        assert!(ctx.events.has(EventKind::Indirected));
        assert!(!ctx.events.has(EventKind::Warning));
    }

    #[test]
    fn test_entry_with_predecessors_is_detached() {
        let mut b = GraphBuilder::new("top");
        let x = b.input(VarType::Int);
        let [entry, exit] = b.blocks();
        let zero = b.int(0);
        b.branch(entry, Cond::Lt, x, zero, entry, exit);
        b.ret(exit, None);
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.top(I)V");
        normalize_loops(&mut graph, &ctx).unwrap();

        assert_ne!(graph.entry(), entry);
        assert!(graph.preds_of(graph.entry()).is_empty());
    }
}
