//! Exception handler merging and duplication.
//!
//! Two tries that send exceptions to the same handler become one when a single try
//! can cover both without crossing another construct or changing how any block
//! dispatches its exceptions. Merges are only ever accepted after that check, so
//! a merge that might reorder overlapping catch clauses is skipped rather than
//! repaired.
//!
//! A handler still shared by several tries afterwards is copied once per extra
//! try when it is small, so each catch clause can hold its own handler code.

use std::collections::BTreeMap;

use crate::{
    compiler::{EventKind, MethodContext},
    ir::{repair, BlockId, MethodGraph},
    structuring::{
        intervals::{try_interval, Analysis},
        location,
        ordering::{crosses, Family},
    },
    utils::graph::{algorithms::compute_dominators, NodeSet},
    Result,
};

const STAGE: &str = "merging";

/// Merges tries that share a handler. Returns the number of merges.
pub(crate) fn merge_handlers(analysis: &Analysis<'_>, family: &mut Family, ctx: &MethodContext<'_>) -> usize {
    let mut merged = 0;
    while let Some((next, handler)) = next_merge(analysis, family) {
        *family = next;
        merged += 1;
        ctx.record(
            EventKind::HandlerMerged,
            STAGE,
            location(analysis.graph, handler),
            format!("tries sharing handler {handler} merged"),
        );
    }
    merged
}

/// The first valid family with two tries of one handler merged.
fn next_merge(analysis: &Analysis<'_>, family: &Family) -> Option<(Family, BlockId)> {
    let constructs = &family.constructs;
    for (i, a) in constructs.iter().enumerate() {
        let Some(handler) = a.handler() else {
            continue;
        };
        for (j, b) in constructs.iter().enumerate().skip(i + 1) {
            if b.handler() != Some(handler) || a.body.is_subset(&b.body) || b.body.is_subset(&a.body) {
                continue;
            }
            let mut seeds = a.body.clone();
            seeds.union_with(&b.body);
            let Some(joined) = try_interval(analysis, &seeds, handler) else {
                continue;
            };

            let mut next = Family {
                constructs: constructs
                    .iter()
                    .enumerate()
                    .filter(|&(k, _)| k != i && k != j)
                    .map(|(_, c)| c.clone())
                    .collect(),
            };
            if next.constructs.iter().any(|c| crosses(&c.body, &joined.body)) {
                continue;
            }
            // tries of the same handler inside the merged one are covered by it
            next.constructs
                .retain(|c| !(c.handler() == Some(handler) && c.body.is_subset(&joined.body)));
            next.constructs.push(joined);
            next.settle_ranks(analysis);
            if next.is_valid(analysis) {
                return Some((next, handler));
            }
        }
    }
    None
}

/// A handler to copy, with the blocks whose edges each copy takes over.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Request {
    pub handler: BlockId,
    /// Protected blocks of every try but the first
    pub groups: Vec<Vec<BlockId>>,
}

/// Handlers shared by tries that stayed apart and are small enough to copy.
pub(crate) fn duplication_requests(
    analysis: &Analysis<'_>,
    family: &Family,
    ctx: &MethodContext<'_>,
) -> Vec<Request> {
    let mut by_handler: BTreeMap<BlockId, Vec<&NodeSet>> = BTreeMap::new();
    for c in &family.constructs {
        if let Some(region) = c.try_region() {
            by_handler.entry(region.handler).or_default().push(&region.seeds);
        }
    }

    let mut requests = Vec::new();
    for (handler, seeds) in by_handler {
        if seeds.len() < 2 || analysis.has_normal_preds(handler) {
            continue;
        }
        let region = analysis.doms.subtree(handler);
        if region.len() > ctx.config.large_duplication_warning {
            continue;
        }
        let disjoint = seeds
            .iter()
            .enumerate()
            .all(|(i, a)| seeds[i + 1..].iter().all(|b| !a.intersects(b)));
        let inside = analysis
            .preds(handler)
            .any(|p| analysis.doms.dominates(handler, p));
        if !disjoint || inside {
            continue;
        }
        requests.push(Request {
            handler,
            groups: seeds[1..].iter().map(|s| s.iter().collect()).collect(),
        });
    }
    requests
}

/// Copies every requested handler. Returns the number of blocks copied.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] if SSA repair of a copy fails.
pub(crate) fn duplicate_handlers(
    graph: &mut MethodGraph,
    requests: &[Request],
    ctx: &MethodContext<'_>,
) -> Result<usize> {
    let mut copied = 0;
    for request in requests {
        let doms = compute_dominators(graph, graph.entry());
        let mut region = doms.subtree(request.handler);
        if let Some(rethrow) = graph.rethrow() {
            region.remove(rethrow);
        }
        for group in &request.groups {
            let redirect: Vec<(BlockId, BlockId)> = group.iter().map(|&n| (n, request.handler)).collect();
            let dup = graph.duplicate_region(&region, &redirect);
            repair(graph, &dup.vars)?;
            copied += dup.blocks.len();
            ctx.record(
                EventKind::HandlerDuplicated,
                STAGE,
                location(graph, request.handler),
                format!("{} blocks of handler {} copied", dup.blocks.len(), request.handler),
            );
        }
    }
    Ok(copied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::ClassHierarchy,
        compiler::DecompilerConfig,
        ir::{check_ssa, GraphBuilder},
        structuring::{intervals::candidates, ordering::order, ExceptionSet},
    };

    /// entry: a() -> mid: b() -> c: c() -> exit, with `a` and `c` caught by one
    /// handler and `b` by another.
    fn split_try() -> (MethodGraph, [BlockId; 6]) {
        let mut b = GraphBuilder::new("split");
        let blocks = b.blocks::<6>();
        let [entry, mid, last, exit, shared, other] = blocks;
        b.call(entry, "a");
        b.goto(entry, mid);
        b.call(mid, "b");
        b.goto(mid, last);
        b.call(last, "c");
        b.goto(last, exit);
        b.ret(exit, None);
        b.ret(shared, None);
        b.ret(other, None);
        b.handler(entry, ExceptionSet::all(), shared);
        b.handler(mid, ExceptionSet::all(), other);
        b.handler(last, ExceptionSet::all(), shared);
        (b.finish(), blocks)
    }

    #[test]
    fn test_shared_handler_is_copied() {
        let (mut graph, [entry, _, last, _, shared, _]) = split_try();
        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.split()V");

        let requests = {
            let analysis = Analysis::new(&graph, &oracle);
            let mut family = order(&analysis, candidates(&analysis)).unwrap();
            assert_eq!(merge_handlers(&analysis, &mut family, &ctx), 0);
            duplication_requests(&analysis, &family, &ctx)
        };
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].handler, shared);

        assert_eq!(duplicate_handlers(&mut graph, &requests, &ctx).unwrap(), 1);
        assert!(ctx.events.has(EventKind::HandlerDuplicated));
        let targets = |n: BlockId| -> Vec<BlockId> {
            graph.block(n).handlers.iter().map(|e| e.target).collect()
        };
        assert_eq!(targets(entry).len(), 1);
        assert_ne!(targets(entry), targets(last));
        check_ssa(&graph).unwrap();
    }
}
