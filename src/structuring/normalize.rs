//! Exception and conditional normalization.
//!
//! After [`normalize_exceptions`] every block's handler edges catch pairwise
//! disjoint exception sets, at most one edge per handler, so the order of the
//! handler list no longer matters. Handlers that do nothing but rethrow the caught
//! exception are unified into one block, [`MethodGraph::rethrow`], whose incoming
//! edges count as exceptions leaving the method.
//!
//! After [`normalize_conditionals`] every arm of a two-way branch starts at a block
//! of its own. Every switch target is reached only from its switch, through such
//! a block, or is chained: the switch alone dominates it and its other
//! predecessors lie under exactly one earlier case, which then falls into it.

use crate::{
    compiler::{EventKind, MethodContext},
    constraints::prune_unreachable,
    ir::{BlockId, HandlerEdge, MethodGraph, OpId, Terminator},
    structuring::{location, ExceptionSet},
    utils::graph::algorithms::{compute_dominators, reachable, DominatorTree},
    Result,
};

const STAGE: &str = "normalize";

/// Makes handler edges disjoint and unifies the rethrow blocks.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] if a rethrow block does not have
/// the shape it was selected for.
pub(crate) fn normalize_exceptions(graph: &mut MethodGraph, ctx: &MethodContext<'_>) -> Result<()> {
    let split = disjoint_handlers(graph, ctx);
    if split > 0 {
        prune_unreachable(graph, ctx);
    }
    unify_rethrow(graph, ctx)
}

/// Rewrites every handler list so that each edge only catches what the edges
/// before it do not. Returns the number of blocks changed.
fn disjoint_handlers(graph: &mut MethodGraph, ctx: &MethodContext<'_>) -> usize {
    let oracle = ctx.oracle;
    let mut changed_blocks = 0;
    for block in graph.block_ids() {
        let edges = graph.block(block).handlers.clone();
        if edges.is_empty() {
            continue;
        }

        let mut covered = ExceptionSet::empty();
        let mut result: Vec<HandlerEdge> = Vec::with_capacity(edges.len());
        let mut changed = false;
        for edge in &edges {
            let reaching = edge.catches.difference(oracle, &covered);
            covered = covered.union(oracle, &edge.catches);
            if !edge.catches.is_subset(oracle, &reaching) {
                changed = true;
            }
            if reaching.is_empty() {
                continue;
            }
            match result.iter_mut().find(|e| e.target == edge.target) {
                Some(existing) => {
                    existing.catches = existing.catches.union(oracle, &reaching);
                    changed = true;
                }
                None => result.push(HandlerEdge {
                    catches: reaching,
                    target: edge.target,
                }),
            }
        }
        if !changed {
            continue;
        }

        graph.set_handlers(block, result);
        for edge in &edges {
            if !graph.preds_of(edge.target).contains(&block) {
                graph.remove_phi_inputs(edge.target, block);
            }
        }
        ctx.record(
            EventKind::HandlerSplit,
            STAGE,
            location(graph, block),
            format!("handlers of {block} catch disjoint sets"),
        );
        changed_blocks += 1;
    }
    changed_blocks
}

/// Merges handler edges of `block` that go to the same target.
fn merge_parallel_edges(graph: &mut MethodGraph, block: BlockId, ctx: &MethodContext<'_>) {
    let edges = graph.block(block).handlers.clone();
    let mut merged: Vec<HandlerEdge> = Vec::with_capacity(edges.len());
    for edge in edges {
        match merged.iter_mut().find(|e| e.target == edge.target) {
            Some(existing) => existing.catches = existing.catches.union(ctx.oracle, &edge.catches),
            None => merged.push(edge),
        }
    }
    graph.set_handlers(block, merged);
}

/// The phi rethrown by a block that only rethrows what its handler edges deliver.
fn pure_rethrow(graph: &MethodGraph, block: BlockId) -> Option<OpId> {
    let b = graph.block(block);
    if b.removed || block == graph.entry() || !b.ops.is_empty() || !b.handlers.is_empty() {
        return None;
    }
    let Terminator::Throw(value) = b.terminator else {
        return None;
    };
    let phi = graph.var(value).def?;
    if !b.phis.contains(&phi) {
        return None;
    }
    let preds = graph.preds_of(block);
    let only_handlers = !preds.is_empty()
        && preds.iter().all(|&p| {
            graph.is_handler_edge(p, block) && !graph.block(p).terminator.targets().contains(&block)
        });
    only_handlers.then_some(phi)
}

fn unify_rethrow(graph: &mut MethodGraph, ctx: &MethodContext<'_>) -> Result<()> {
    let live = reachable(graph, graph.entry());
    let pure: Vec<(BlockId, OpId)> = graph
        .block_ids()
        .into_iter()
        .filter(|&b| live.contains(b))
        .filter_map(|b| pure_rethrow(graph, b).map(|phi| (b, phi)))
        .collect();
    let Some(&(canonical, rethrown)) = pure.first() else {
        graph.set_rethrow(None);
        return Ok(());
    };

    let unused: Vec<_> = graph
        .block(canonical)
        .phis
        .iter()
        .copied()
        .filter(|&p| p != rethrown)
        .collect();
    for phi in unused {
        graph.remove_op(phi);
    }

    for &(other, phi) in &pure[1..] {
        let preds = graph.preds_of(other).to_vec();
        for pred in preds {
            let Some(value) = graph.phi_input(phi, pred) else {
                return Err(consistency_error!(
                    "rethrow block {} has no input from {}",
                    other,
                    pred
                ));
            };
            graph.redirect(pred, other, canonical);
            merge_parallel_edges(graph, pred, ctx);
            graph.set_phi_input(rethrown, pred, value);
        }
        graph.remove_block(other);
        ctx.record(
            EventKind::BlockRemoved,
            STAGE,
            location(graph, canonical),
            format!("rethrow block {other} merged into {canonical}"),
        );
    }

    graph.set_rethrow(Some(canonical));
    log::trace!("{}: {} rethrows escaping exceptions", graph.name(), canonical);
    Ok(())
}

/// Gives both arms of every two-way branch and the shared targets of every switch
/// a forwarding block of their own. Returns the number of forwarders added.
pub(crate) fn normalize_conditionals(graph: &mut MethodGraph, ctx: &MethodContext<'_>) -> usize {
    let live = reachable(graph, graph.entry());
    // Forwarders only split edges, dominance among the other blocks stays valid
    let doms = compute_dominators(graph, graph.entry());
    let mut added = 0;
    for block in graph.block_ids() {
        if !live.contains(block) {
            continue;
        }
        match graph.block(block).terminator.clone() {
            Terminator::If {
                taken, fallthrough, ..
            } if taken == fallthrough => {
                graph.set_terminator(block, Terminator::Goto(taken));
                ctx.record(
                    EventKind::BranchSimplified,
                    STAGE,
                    location(graph, block),
                    format!("both arms of {block} go to {taken}"),
                );
            }
            Terminator::If {
                taken, fallthrough, ..
            } => {
                for target in [taken, fallthrough] {
                    if !is_forwarder(graph, target, block) {
                        indirect(graph, block, target, ctx);
                        added += 1;
                    }
                }
            }
            terminator @ Terminator::Switch { .. } => {
                let links = fallthrough_links(graph, &doms, block);
                for &(member, target) in &links {
                    ctx.record(
                        EventKind::Info,
                        STAGE,
                        location(graph, block),
                        format!("case {target} of {block} is entered from case {member}"),
                    );
                }
                for target in terminator.targets() {
                    let sole = graph.preds_of(target) == [block].as_slice() && target != graph.entry();
                    if !sole && !links.iter().any(|&(_, t)| t == target) {
                        indirect(graph, block, target, ctx);
                        added += 1;
                    }
                }
            }
            Terminator::Goto(_)
            | Terminator::Return(_)
            | Terminator::Throw(_)
            | Terminator::JsrCall { .. }
            | Terminator::Ret { .. } => {}
        }
    }
    added
}

/// Targets of the switch ending `block` in bytecode order. A synthetic forwarder
/// sorts with the block it forwards to.
pub(crate) fn case_order(graph: &MethodGraph, block: BlockId) -> Vec<BlockId> {
    let address = |t: BlockId| {
        let b = graph.block(t);
        let offset = match b.terminator {
            Terminator::Goto(next) if b.offset.is_none() && b.is_empty() => graph.block(next).offset,
            _ => b.offset,
        };
        (offset.unwrap_or(u32::MAX), t)
    };
    let mut targets = graph.block(block).terminator.targets();
    targets.sort_by_key(|&t| address(t));
    targets
}

/// Pairs `(member, target)` of the fallthrough chain of the switch ending
/// `block`: `target` is entered from the switch and from below `member`, an
/// earlier case, so the code of `member` can fall into it.
///
/// Walking the cases in bytecode order, a target is chained when the switch is
/// its immediate dominator and exactly one earlier chain member dominates all of
/// its other predecessors, through normal edges only. A target reached from the
/// switch alone starts a chain of its own. Each member falls into at most one
/// target.
pub(crate) fn fallthrough_links(graph: &MethodGraph, doms: &DominatorTree, block: BlockId) -> Vec<(BlockId, BlockId)> {
    if !matches!(graph.block(block).terminator, Terminator::Switch { .. }) {
        return Vec::new();
    }
    let mut members: Vec<BlockId> = Vec::new();
    let mut links = Vec::new();
    for target in case_order(graph, block) {
        if target == graph.entry() || target == block {
            continue;
        }
        let preds = graph.preds_of(target);
        if preds == [block].as_slice() {
            members.push(target);
            continue;
        }
        if doms.immediate_dominator(target) != Some(block) {
            continue;
        }
        let others: Vec<BlockId> = preds.iter().copied().filter(|&p| p != block).collect();
        if others.iter().any(|&p| graph.is_handler_edge(p, target)) {
            continue;
        }
        let reaching: Vec<BlockId> = members
            .iter()
            .copied()
            .filter(|&m| others.iter().any(|&p| doms.dominates(m, p)))
            .collect();
        let [member] = reaching[..] else {
            continue;
        };
        let free = !links.iter().any(|&(m, _)| m == member);
        if free && others.iter().all(|&p| doms.dominates(member, p)) {
            links.push((member, target));
            members.push(target);
        }
    }
    links
}

/// Returns `true` if `target` is an empty block only `from` jumps to.
fn is_forwarder(graph: &MethodGraph, target: BlockId, from: BlockId) -> bool {
    let b = graph.block(target);
    graph.preds_of(target) == [from].as_slice()
        && b.is_empty()
        && b.handlers.is_empty()
        && matches!(b.terminator, Terminator::Goto(_))
}

fn indirect(graph: &mut MethodGraph, block: BlockId, target: BlockId, ctx: &MethodContext<'_>) {
    let forwarder = graph.split_preds(target, &[block]);
    ctx.record(
        EventKind::Indirected,
        STAGE,
        location(graph, block),
        format!("{block} reaches {target} through {forwarder}"),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, Cond},
        compiler::DecompilerConfig,
        ir::{check_ssa, GraphBuilder, VarType},
    };

    const RUNTIME: &str = "java/lang/RuntimeException";
    const ARITH: &str = "java/lang/ArithmeticException";

    #[test]
    fn test_shadowed_handler_gets_a_hole() {
        let mut b = GraphBuilder::new("catch");
        let [entry, narrow, wide, exit] = b.blocks();
        b.call(entry, "a");
        b.goto(entry, exit);
        b.handler(entry, ExceptionSet::of(ARITH), narrow);
        b.handler(entry, ExceptionSet::of(RUNTIME), wide);
        b.ret(narrow, None);
        b.ret(wide, None);
        b.ret(exit, None);
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.catch()V");
        normalize_exceptions(&mut graph, &ctx).unwrap();

        let edges = &graph.block(entry).handlers;
        assert_eq!(edges.len(), 2);
        assert!(edges[0].catches.contains(&oracle, ARITH));
        assert!(!edges[1].catches.contains(&oracle, ARITH));
        assert!(edges[1].catches.contains(&oracle, "java/lang/NullPointerException"));
        assert!(!edges[0].catches.overlaps(&oracle, &edges[1].catches));
        assert!(ctx.events.has(EventKind::HandlerSplit));
        assert_eq!(graph.rethrow(), None);
    }

    #[test]
    fn test_fully_shadowed_handler_is_dropped() {
        let mut b = GraphBuilder::new("dead");
        let [entry, wide, narrow, exit] = b.blocks();
        b.call(entry, "a");
        b.goto(entry, exit);
        b.handler(entry, ExceptionSet::of(RUNTIME), wide);
        b.handler(entry, ExceptionSet::of(ARITH), narrow);
        b.ret(wide, None);
        b.ret(narrow, None);
        b.ret(exit, None);
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.dead()V");
        normalize_exceptions(&mut graph, &ctx).unwrap();

        assert_eq!(graph.block(entry).handlers.len(), 1);
        assert!(graph.block(narrow).removed);
    }

    #[test]
    fn test_rethrow_blocks_are_unified() {
        let mut b = GraphBuilder::new("rethrow");
        let [entry, second, first_rethrow, second_rethrow, exit] = b.blocks();
        let a = b.call(entry, "a");
        b.goto(entry, second);
        let c = b.call(second, "c");
        b.goto(second, exit);
        b.ret(exit, None);
        b.handler(entry, ExceptionSet::all(), first_rethrow);
        b.handler(second, ExceptionSet::all(), second_rethrow);
        let thrown_a = b.graph_mut().op(a).thrown.unwrap();
        let thrown_c = b.graph_mut().op(c).thrown.unwrap();
        let e1 = b.phi(first_rethrow, VarType::Object, &[(entry, thrown_a)]);
        b.throw(first_rethrow, e1);
        let e2 = b.phi(second_rethrow, VarType::Object, &[(second, thrown_c)]);
        b.throw(second_rethrow, e2);
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.rethrow()V");
        normalize_exceptions(&mut graph, &ctx).unwrap();

        assert_eq!(graph.rethrow(), Some(first_rethrow));
        assert!(graph.block(second_rethrow).removed);
        assert_eq!(graph.preds_of(first_rethrow), &[entry, second]);
        let phi = graph.block(first_rethrow).phis[0];
        assert_eq!(graph.phi_input(phi, second), Some(thrown_c));
        check_ssa(&graph).unwrap();
    }

    #[test]
    fn test_if_arms_are_indirected() {
        let mut b = GraphBuilder::new("arms");
        let x = b.input(VarType::Int);
        let [entry, then, exit] = b.blocks();
        let zero = b.int(0);
        b.branch(entry, Cond::Lt, x, zero, then, exit);
        b.goto(then, exit);
        b.ret(exit, None);
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.arms(I)V");
        assert_eq!(normalize_conditionals(&mut graph, &ctx), 2);
        // a second run finds nothing to do
        assert_eq!(normalize_conditionals(&mut graph, &ctx), 0);

        let Terminator::If {
            taken, fallthrough, ..
        } = graph.block(entry).terminator
        else {
            panic!("entry should still branch");
        };
        assert_eq!(graph.block(taken).terminator, Terminator::Goto(then));
        assert_eq!(graph.block(fallthrough).terminator, Terminator::Goto(exit));
        assert_eq!(graph.preds_of(exit), &[then, fallthrough]);
    }

    #[test]
    fn test_switch_case_chains_into_the_next() {
        // switch (x) { case 1: a(); case 2: b(); break; default: c(); }
        let mut b = GraphBuilder::new("chain");
        let x = b.input(VarType::Int);
        let [entry, one, two, other, exit] = b.blocks();
        b.switch(entry, x, &[(1, one), (2, two)], other);
        b.call(one, "a");
        b.goto(one, two);
        b.call(two, "b");
        b.goto(two, exit);
        b.call(other, "c");
        b.goto(other, exit);
        b.ret(exit, None);
        let mut graph = b.finish();

        let doms = compute_dominators(&graph, graph.entry());
        assert_eq!(fallthrough_links(&graph, &doms, entry), vec![(one, two)]);

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.chain(I)V");
        assert_eq!(normalize_conditionals(&mut graph, &ctx), 0);
        assert_eq!(graph.preds_of(two), &[entry, one]);
        assert!(ctx.events.has(EventKind::Info));
    }

    #[test]
    fn test_switch_target_reached_from_two_cases_is_indirected() {
        let mut b = GraphBuilder::new("shared");
        let x = b.input(VarType::Int);
        let [entry, one, two, three, exit] = b.blocks();
        b.switch(entry, x, &[(1, one), (2, two), (3, three)], exit);
        b.goto(one, three);
        b.goto(two, three);
        b.ret(three, None);
        b.ret(exit, None);
        let mut graph = b.finish();

        let doms = compute_dominators(&graph, graph.entry());
        assert!(fallthrough_links(&graph, &doms, entry).is_empty());

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.shared(I)V");
        assert_eq!(normalize_conditionals(&mut graph, &ctx), 1);
        assert!(!graph.preds_of(three).contains(&entry));
    }

    #[test]
    fn test_switch_keeps_private_targets() {
        let mut b = GraphBuilder::new("sw");
        let x = b.input(VarType::Int);
        let [entry, one, shared, exit] = b.blocks();
        b.switch(entry, x, &[(1, one), (2, shared)], shared);
        b.goto(one, exit);
        b.goto(shared, exit);
        b.ret(exit, None);
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.sw(I)V");
        assert_eq!(normalize_conditionals(&mut graph, &ctx), 0);
        assert_eq!(graph.preds_of(one), &[entry]);
    }
}
