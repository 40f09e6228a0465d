//! Graph rewrites driven by a propagation [`Solution`].
//!
//! - variables pinned to one value become literals; pure definitions are deleted,
//!   ordered ones keep their side effect and lose the value output
//! - reads of an integer the branches above pin to one value, such as `x` under
//!   `if (x == 5)`, read that value as a literal instead
//! - branches with a single feasible target become `goto`
//! - empty forwarding blocks are bypassed
//! - blocks no longer reachable from the entry are deleted
//!
//! The last three feed each other and run to a fixed point.

use crate::{
    compiler::{EventKind, MethodContext},
    constraints::propagator::Solution,
    ir::{remove_trivial_phis, BlockId, Literal, MethodGraph, OpId, OpKind, Terminator, VarId},
    utils::graph::algorithms::reachable,
    Result,
};

const STAGE: &str = "constraints";

/// Address of a block for events, its handle index for synthetic blocks.
fn location(graph: &MethodGraph, block: BlockId) -> usize {
    graph
        .block(block)
        .offset
        .map_or(block.index(), |offset| offset as usize)
}

/// Applies every rewrite `solution` justifies, then simplifies the control flow to
/// a fixed point. Returns `true` if the graph changed.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] if the jump simplification does not
/// settle within the configured number of iterations.
pub fn simplify(graph: &mut MethodGraph, solution: &Solution, ctx: &MethodContext<'_>) -> Result<bool> {
    let mut changed = fold_constants(graph, solution, ctx) > 0;
    changed |= fold_narrowed_uses(graph, solution, ctx) > 0;
    changed |= fold_branches(graph, solution, ctx) > 0;

    let limit = ctx.config.max_simplify_iterations;
    let mut settled = false;
    for _ in 0..limit {
        let mut work = thread_jumps(graph, ctx);
        work += prune_unreachable(graph, ctx);
        work += remove_dead_ops(graph);
        let trivial = remove_trivial_phis(graph);
        if trivial > 0 {
            ctx.record(
                EventKind::PhiSimplified,
                STAGE,
                location(graph, graph.entry()),
                format!("{trivial} trivial phis removed"),
            );
        }
        work += trivial;
        if work == 0 {
            settled = true;
            break;
        }
        changed = true;
    }
    if !settled {
        return Err(consistency_error!(
            "jump simplification of {} did not settle after {} iterations",
            graph.name(),
            limit
        ));
    }
    Ok(changed)
}

/// Turns every variable with a constant constraint into a literal.
pub(crate) fn fold_constants(graph: &mut MethodGraph, solution: &Solution, ctx: &MethodContext<'_>) -> usize {
    let mut folded = 0;
    for block in graph.block_ids() {
        let ops: Vec<OpId> = graph.block_ops(block).collect();
        for op in ops {
            let Some(value) = graph.op(op).value else {
                continue;
            };
            if graph.var(value).is_literal() {
                continue;
            }
            let Some(literal) = solution.get(value).constant() else {
                continue;
            };
            ctx.record(
                EventKind::ConstantFolded,
                STAGE,
                graph
                    .op(op)
                    .offset
                    .map_or_else(|| location(graph, block), |o| o as usize),
                format!("{value} = {literal}"),
            );
            let var = graph.var_mut(value);
            var.literal = Some(literal);
            var.def = None;
            if graph.op(op).is_ordered() {
                graph.op_mut(op).value = None;
            } else {
                graph.remove_op(op);
            }
            folded += 1;
        }
    }
    folded
}

/// Rewrites reads of integers that the branches leading to them pin to one
/// value. Phi inputs use the value along their edge.
pub(crate) fn fold_narrowed_uses(graph: &mut MethodGraph, solution: &Solution, ctx: &MethodContext<'_>) -> usize {
    let mut folded = 0;
    for block in graph.block_ids() {
        let Some(facts) = solution.facts(block) else {
            continue;
        };
        let pinned = |graph: &MethodGraph, var: VarId| -> Option<Literal> {
            if graph.var(var).is_literal() || !facts.contains_key(&var) {
                return None;
            }
            integer(solution.at(block, var).constant())
        };

        let mut inputs = Vec::new();
        for &op in &graph.block(block).ops {
            for (i, &var) in graph.op(op).inputs.iter().enumerate() {
                if let Some(literal) = pinned(graph, var) {
                    inputs.push((op, i, var, literal));
                }
            }
        }
        let uses: Vec<(VarId, Literal)> = graph
            .block(block)
            .terminator
            .uses()
            .into_iter()
            .filter_map(|var| pinned(graph, var).map(|literal| (var, literal)))
            .collect();
        let mut phi_inputs = Vec::new();
        for &phi in &graph.block(block).phis {
            let operation = graph.op(phi);
            let OpKind::Phi { preds } = &operation.kind else {
                continue;
            };
            for (&pred, &var) in preds.iter().zip(&operation.inputs) {
                if graph.var(var).is_literal() || solution.get(var).constant().is_some() {
                    continue;
                }
                let along = solution.along(graph, pred, block, var);
                if let Some(literal) = integer(along.and_then(|c| c.constant())) {
                    phi_inputs.push((phi, pred, var, literal));
                }
            }
        }

        let at = location(graph, block);
        for (op, i, var, literal) in inputs {
            ctx.record(EventKind::ConstantFolded, STAGE, at, format!("{var} = {literal} in {block}"));
            graph.op_mut(op).inputs[i] = pinned_literal(graph, var, literal);
            folded += 1;
        }
        for (var, literal) in uses {
            ctx.record(EventKind::ConstantFolded, STAGE, at, format!("{var} = {literal} in {block}"));
            let replacement = pinned_literal(graph, var, literal);
            graph
                .block_mut(block)
                .terminator
                .map_uses(|v| if v == var { replacement } else { v });
            folded += 1;
        }
        for (phi, pred, var, literal) in phi_inputs {
            ctx.record(
                EventKind::ConstantFolded,
                STAGE,
                at,
                format!("{var} = {literal} from {pred} into {block}"),
            );
            let replacement = pinned_literal(graph, var, literal);
            graph.set_phi_input(phi, pred, replacement);
            folded += 1;
        }
    }
    folded
}

fn integer(literal: Option<Literal>) -> Option<Literal> {
    literal.filter(|l| matches!(l, Literal::Int(_) | Literal::Long(_)))
}

/// A literal standing in for `var`, declared with its type.
fn pinned_literal(graph: &mut MethodGraph, var: VarId, literal: Literal) -> VarId {
    let decl = graph.var(var).decl.clone();
    let replacement = graph.literal(literal);
    graph.var_mut(replacement).decl = decl;
    replacement
}

/// Replaces branches with a single feasible target by a jump.
pub(crate) fn fold_branches(graph: &mut MethodGraph, solution: &Solution, ctx: &MethodContext<'_>) -> usize {
    let mut folded = 0;
    for block in graph.block_ids() {
        let terminator = &graph.block(block).terminator;
        if !matches!(terminator, Terminator::If { .. } | Terminator::Switch { .. }) {
            continue;
        }
        let targets = solution.feasible_targets(graph, block);
        let [target] = targets[..] else {
            continue;
        };
        ctx.record(
            EventKind::BranchSimplified,
            STAGE,
            location(graph, block),
            format!("{block} always continues at {target}"),
        );
        retarget(graph, block, Terminator::Goto(target));
        folded += 1;
    }
    folded
}

/// Replaces the terminator of `block` and drops the phi inputs of edges that
/// disappear.
fn retarget(graph: &mut MethodGraph, block: BlockId, terminator: Terminator) {
    let before = graph.successors_of(block);
    graph.set_terminator(block, terminator);
    let after = graph.successors_of(block);
    for succ in before {
        if !after.contains(&succ) {
            graph.remove_phi_inputs(succ, block);
        }
    }
}

/// Routes the predecessors of empty `goto` blocks straight to the target.
pub(crate) fn thread_jumps(graph: &mut MethodGraph, ctx: &MethodContext<'_>) -> usize {
    let mut threaded = 0;
    for block in graph.block_ids() {
        if block == graph.entry() {
            continue;
        }
        let b = graph.block(block);
        let Terminator::Goto(target) = b.terminator else {
            continue;
        };
        if target == block || !b.is_empty() || !b.handlers.is_empty() {
            continue;
        }

        let phis = graph.block(target).phis.clone();
        let preds = graph.preds_of(block).to_vec();
        let before = threaded;
        for pred in preds {
            if pred == block || graph.is_handler_edge(pred, block) {
                continue;
            }
            // The forwarded values must agree with what `pred` already sends
            let direct = graph.preds_of(target).contains(&pred);
            let mut inputs = Vec::with_capacity(phis.len());
            let mut conflict = false;
            for &phi in &phis {
                match graph.phi_input(phi, block) {
                    Some(value) if !direct || graph.phi_input(phi, pred) == Some(value) => {
                        inputs.push((phi, value));
                    }
                    _ => {
                        conflict = true;
                        break;
                    }
                }
            }
            if conflict {
                continue;
            }
            graph.redirect(pred, block, target);
            for (phi, value) in inputs {
                graph.set_phi_input(phi, pred, value);
            }
            threaded += 1;
        }
        if threaded > before && graph.preds_of(block).is_empty() {
            ctx.record(
                EventKind::Indirected,
                STAGE,
                location(graph, block),
                format!("jumps through {block} go to {target} directly"),
            );
        }
    }
    threaded
}

/// Deletes every block the entry no longer reaches.
pub(crate) fn prune_unreachable(graph: &mut MethodGraph, ctx: &MethodContext<'_>) -> usize {
    let live = reachable(graph, graph.entry());
    let dead: Vec<BlockId> = graph
        .block_ids()
        .into_iter()
        .filter(|&b| !live.contains(b))
        .collect();
    for &block in &dead {
        ctx.record(
            EventKind::BlockRemoved,
            STAGE,
            location(graph, block),
            format!("{block} is unreachable"),
        );
        graph.remove_block(block);
    }
    dead.len()
}

/// Deletes pure operations whose value nothing reads.
pub(crate) fn remove_dead_ops(graph: &mut MethodGraph) -> usize {
    let mut removed = 0;
    loop {
        let uses = graph.use_counts();
        let dead: Vec<OpId> = graph
            .block_ids()
            .into_iter()
            .flat_map(|b| graph.block_ops(b).collect::<Vec<_>>())
            .filter(|&op| {
                let operation = graph.op(op);
                !operation.is_ordered() && operation.value.is_none_or(|v| uses[v.index()] == 0)
            })
            .collect();
        if dead.is_empty() {
            return removed;
        }
        removed += dead.len();
        for op in dead {
            graph.remove_op(op);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, Cond},
        compiler::DecompilerConfig,
        constraints::Propagator,
        ir::{check_ssa, GraphBuilder, Literal, VarType},
    };

    #[test]
    fn test_dead_arm_is_pruned() {
        let mut b = GraphBuilder::new("dead");
        let [entry, then, other] = b.blocks();
        let (one, zero) = (b.int(1), b.int(0));
        b.branch(entry, Cond::Eq, one, zero, then, other);
        b.ret(then, Some(zero));
        b.ret(other, Some(one));
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.dead()I");
        let solution = Propagator::new(&oracle, 4).analyze(&graph, &[]).unwrap();
        assert!(simplify(&mut graph, &solution, &ctx).unwrap());

        assert_eq!(graph.block(entry).terminator, Terminator::Goto(other));
        assert!(graph.block(then).removed);
        assert!(ctx.events.has(EventKind::BranchSimplified));
        assert_eq!(ctx.events.count_kind(EventKind::BlockRemoved), 1);
        check_ssa(&graph).unwrap();
    }

    #[test]
    fn test_empty_block_is_threaded() {
        // entry -> fwd -> exit, the phi in exit keeps its value
        let mut b = GraphBuilder::new("thread");
        let x = b.input(VarType::Int);
        let [entry, fwd, other, exit] = b.blocks();
        let zero = b.int(0);
        b.branch(entry, Cond::Lt, x, zero, fwd, other);
        b.goto(fwd, exit);
        let neg = b.neg(other, x);
        b.goto(other, exit);
        let merged = b.phi(exit, VarType::Int, &[(fwd, x), (other, neg)]);
        b.ret(exit, Some(merged));
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.thread(I)I");
        assert_eq!(thread_jumps(&mut graph, &ctx), 1);
        assert_eq!(prune_unreachable(&mut graph, &ctx), 1);

        let phi = graph.block(exit).phis[0];
        assert_eq!(graph.phi_input(phi, entry), Some(x));
        assert_eq!(graph.preds_of(exit), &[entry, other]);
        check_ssa(&graph).unwrap();
    }

    #[test]
    fn test_folded_value_becomes_literal() {
        let mut b = GraphBuilder::new("fold");
        let [entry] = b.blocks();
        let (two, three) = (b.int(2), b.int(3));
        let sum = b.add(entry, two, three);
        b.ret(entry, Some(sum));
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.fold()I");
        let solution = Propagator::new(&oracle, 4).analyze(&graph, &[]).unwrap();
        assert_eq!(fold_constants(&mut graph, &solution, &ctx), 1);

        assert_eq!(graph.var(sum).literal, Some(Literal::Int(5)));
        assert!(graph.block(entry).ops.is_empty());
        check_ssa(&graph).unwrap();
    }

    #[test]
    fn test_nested_contradiction_is_pruned() {
        // if (x < 0) { if (x > 5) return 1; return 2; } return 3;
        let mut b = GraphBuilder::new("nested");
        let x = b.input(VarType::Int);
        let [entry, outer, inner, two, three] = b.blocks();
        let (zero, five) = (b.int(0), b.int(5));
        let (r1, r2, r3) = (b.int(1), b.int(2), b.int(3));
        b.branch(entry, Cond::Lt, x, zero, outer, three);
        b.branch(outer, Cond::Gt, x, five, inner, two);
        b.ret(inner, Some(r1));
        b.ret(two, Some(r2));
        b.ret(three, Some(r3));
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.nested(I)I");
        let solution = Propagator::new(&oracle, 4).analyze(&graph, &[]).unwrap();
        assert!(simplify(&mut graph, &solution, &ctx).unwrap());

        assert!(graph.block(inner).removed);
        assert!(!graph.block(two).removed && !graph.block(three).removed);
        // The entry branch on an unknown input stays
        assert!(matches!(graph.block(entry).terminator, Terminator::If { .. }));
        check_ssa(&graph).unwrap();
    }

    #[test]
    fn test_equality_folds_reads_in_taken_arm() {
        // if (x == 5) return x; return 0;
        let mut b = GraphBuilder::new("pinned");
        let x = b.input(VarType::Int);
        let [entry, equal, other] = b.blocks();
        let (zero, five) = (b.int(0), b.int(5));
        b.branch(entry, Cond::Eq, x, five, equal, other);
        b.ret(equal, Some(x));
        b.ret(other, Some(zero));
        let mut graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let config = DecompilerConfig::default();
        let ctx = MethodContext::new(&oracle, &config, "T.pinned(I)I");
        let solution = Propagator::new(&oracle, 4).analyze(&graph, &[]).unwrap();
        assert_eq!(fold_narrowed_uses(&mut graph, &solution, &ctx), 1);

        let Terminator::Return(Some(returned)) = graph.block(equal).terminator else {
            panic!("expected a return");
        };
        assert_eq!(graph.var(returned).literal, Some(Literal::Int(5)));
        // The branch itself still reads x
        assert!(matches!(graph.block(entry).terminator, Terminator::If { lhs, .. } if lhs == x));
        assert!(ctx.events.has(EventKind::ConstantFolded));
        check_ssa(&graph).unwrap();
    }
}
