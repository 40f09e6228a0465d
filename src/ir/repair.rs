//! SSA repair and phi cleanup.
//!
//! Duplicating a region gives every value defined in it a second definition. For each
//! such pair, [`repair`] treats both names as one variable and rebuilds SSA form for
//! it: phi sites are the iterated dominance frontier of the two definition blocks,
//! and every use is renamed to the definition that reaches it along the dominator
//! tree. A phi is only materialized if some use, directly or through other phis,
//! reads it, so a repair never leaves dead phis behind for the next one to trip on.
//!
//! [`remove_trivial_phis`] deletes phis whose inputs are all the same value (ignoring
//! the phi itself) and is run after every pass that adds or prunes edges.

use std::collections::{BTreeMap, HashMap};

use crate::{
    ir::{BlockId, MethodGraph, OpId, OpKind, VarId},
    utils::graph::{
        algorithms::{compute_dominators, DominatorTree},
        GraphBase, NodeSet,
    },
    Error, Result,
};

/// Dominance frontier of every block, indexed by block.
fn dominance_frontiers(graph: &MethodGraph, doms: &DominatorTree) -> Vec<NodeSet> {
    let mut frontiers = vec![NodeSet::new(); graph.node_count()];
    for block in graph.block_ids() {
        if !doms.is_reachable(block) {
            continue;
        }
        let preds = graph.preds_of(block);
        if preds.len() < 2 {
            continue;
        }
        let Some(idom) = doms.immediate_dominator(block) else {
            continue;
        };
        for &pred in preds {
            if !doms.is_reachable(pred) {
                continue;
            }
            let mut runner = pred;
            while runner != idom {
                frontiers[runner.index()].insert(block);
                match doms.immediate_dominator(runner) {
                    Some(next) if next != runner => runner = next,
                    _ => break,
                }
            }
        }
    }
    frontiers
}

/// Dominator tree preorder, iteratively.
fn dominator_preorder(doms: &DominatorTree) -> Vec<BlockId> {
    let mut order = Vec::new();
    let mut stack = vec![doms.entry()];
    while let Some(block) = stack.pop() {
        order.push(block);
        for &child in doms.children(block).iter().rev() {
            stack.push(child);
        }
    }
    order
}

/// Restores SSA form after a duplication.
///
/// Each `(original, copy)` pair names two definitions of what used to be one value.
/// Uses of either name, in reachable blocks, are rewritten to whichever definition
/// reaches them, inserting phis where both meet. The pairs are independent: a phi
/// placed for one pair only ever reads names of that pair.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] if a use is reached by neither
/// definition along some path.
pub fn repair(graph: &mut MethodGraph, pairs: &BTreeMap<VarId, VarId>) -> Result<()> {
    if pairs.is_empty() {
        return Ok(());
    }
    let doms = compute_dominators(graph, graph.entry());
    let frontiers = dominance_frontiers(graph, &doms);
    let preorder = dominator_preorder(&doms);

    // Only names with a use outside their own definition's dominance need work
    let mut users: HashMap<VarId, Vec<BlockId>> = HashMap::new();
    for block in graph.block_ids() {
        for op in graph.block_ops(block) {
            let op = graph.op(op);
            let preds = match &op.kind {
                OpKind::Phi { preds } => Some(preds),
                _ => None,
            };
            for (i, &input) in op.inputs.iter().enumerate() {
                let site = preds.map_or(block, |p| p[i]);
                users.entry(input).or_default().push(site);
            }
        }
        for var in graph.block(block).terminator.uses() {
            users.entry(var).or_default().push(block);
        }
    }

    for (&original, &copy) in pairs {
        let needs_repair = [original, copy].iter().any(|&name| {
            let Some(def) = graph.var(name).def else {
                return false;
            };
            let home = graph.op(def).block;
            users.get(&name).is_some_and(|sites| {
                sites
                    .iter()
                    .any(|&s| doms.is_reachable(s) && !doms.dominates(home, s))
            })
        });
        if needs_repair {
            repair_one(graph, &doms, &frontiers, &preorder, original, copy)?;
        }
    }
    Ok(())
}

/// A definition reaching a program point: one of the two names, or the phi that
/// would head a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reaching {
    Var(VarId),
    Phi(BlockId),
}

fn repair_one(
    graph: &mut MethodGraph,
    doms: &DominatorTree,
    frontiers: &[NodeSet],
    preorder: &[BlockId],
    original: VarId,
    copy: VarId,
) -> Result<()> {
    let is_name = |v: VarId| v == original || v == copy;
    let method = graph.name().to_string();
    let missing = |block: BlockId| -> Error {
        consistency_error!(
            "no reaching definition of {} in {} of {}",
            original,
            block,
            method
        )
    };

    let mut def_blocks = NodeSet::new();
    for name in [original, copy] {
        if let Some(def) = graph.var(name).def {
            def_blocks.insert(graph.op(def).block);
        }
    }

    // Phi sites on the iterated dominance frontier
    let mut sites = NodeSet::new();
    let mut worklist: Vec<BlockId> = def_blocks.iter().collect();
    while let Some(block) = worklist.pop() {
        for frontier in frontiers[block.index()].iter() {
            if !doms.is_reachable(frontier) || !sites.insert(frontier) {
                continue;
            }
            if !def_blocks.contains(frontier) {
                worklist.push(frontier);
            }
        }
    }

    // Reaching definition on entry to and at the end of every block, top down.
    // A phi site's own phi comes before any existing definition in the block.
    let mut in_def: Vec<Option<Reaching>> = vec![None; graph.node_count()];
    let mut out_def: Vec<Option<Reaching>> = vec![None; graph.node_count()];
    for &block in preorder {
        let inherited = doms
            .immediate_dominator(block)
            .filter(|&idom| idom != block)
            .and_then(|idom| out_def[idom.index()]);
        let mut current = if sites.contains(block) {
            Some(Reaching::Phi(block))
        } else {
            inherited
        };
        in_def[block.index()] = current;
        for op in graph.block_ops(block) {
            if let Some(output) = graph.op(op).outputs().filter(|&v| is_name(v)).last() {
                current = Some(Reaching::Var(output));
            }
        }
        out_def[block.index()] = current;
    }

    // Uses to rename
    let mut renames: Vec<(OpId, usize, Reaching)> = Vec::new();
    let mut terminator_renames: Vec<(BlockId, Reaching)> = Vec::new();
    for &block in preorder {
        let mut current = in_def[block.index()];
        for op_id in graph.block_ops(block) {
            let op = graph.op(op_id);
            for (i, &input) in op.inputs.iter().enumerate() {
                if !is_name(input) {
                    continue;
                }
                let reaching = match &op.kind {
                    OpKind::Phi { preds } => {
                        let pred = preds[i];
                        if !doms.is_reachable(pred) {
                            continue;
                        }
                        out_def[pred.index()]
                    }
                    _ => current,
                };
                renames.push((op_id, i, reaching.ok_or_else(|| missing(block))?));
            }
            if let Some(output) = op.outputs().filter(|&v| is_name(v)).last() {
                current = Some(Reaching::Var(output));
            }
        }
        if graph.block(block).terminator.uses().into_iter().any(is_name) {
            terminator_renames.push((block, current.ok_or_else(|| missing(block))?));
        }
    }

    // Phis some use reads, directly or through other phis
    let mut live = NodeSet::new();
    let mut stack: Vec<BlockId> = renames
        .iter()
        .map(|&(_, _, r)| r)
        .chain(terminator_renames.iter().map(|&(_, r)| r))
        .filter_map(|r| match r {
            Reaching::Phi(block) => Some(block),
            Reaching::Var(_) => None,
        })
        .collect();
    while let Some(block) = stack.pop() {
        if !live.insert(block) {
            continue;
        }
        for &pred in graph.preds_of(block) {
            if !doms.is_reachable(pred) {
                continue;
            }
            match out_def[pred.index()] {
                Some(Reaching::Phi(site)) => stack.push(site),
                Some(Reaching::Var(_)) => {}
                None => return Err(missing(block)),
            }
        }
    }

    let ty = graph.var(original).ty;
    let decl = graph.var(original).decl.clone();
    let mut phis: BTreeMap<BlockId, (OpId, VarId)> = BTreeMap::new();
    for block in live.iter() {
        let (op, var) = graph.add_phi(block, ty);
        graph.var_mut(var).decl = decl.clone();
        let list = &mut graph.block_mut(block).phis;
        list.pop();
        list.insert(0, op);
        phis.insert(block, (op, var));
    }
    let resolve = |r: Reaching| match r {
        Reaching::Var(var) => var,
        Reaching::Phi(block) => phis.get(&block).map_or(original, |&(_, var)| var),
    };

    // Inputs from unreachable predecessors are never read
    for (&block, &(op, _)) in &phis {
        let preds = graph.preds_of(block).to_vec();
        let inputs = preds
            .iter()
            .map(|p| out_def[p.index()].map_or(original, resolve))
            .collect();
        graph.set_phi_inputs(op, preds, inputs);
    }
    for (op, i, reaching) in renames {
        graph.op_mut(op).inputs[i] = resolve(reaching);
    }
    for (block, reaching) in terminator_renames {
        let var = resolve(reaching);
        graph
            .block_mut(block)
            .terminator
            .map_uses(|v| if is_name(v) { var } else { v });
    }
    Ok(())
}

/// Replaces every phi whose inputs are all one value (or the phi itself) by that
/// value. Returns the number of phis removed.
pub fn remove_trivial_phis(graph: &mut MethodGraph) -> usize {
    let mut removed = 0;
    loop {
        let mut map: HashMap<VarId, VarId> = HashMap::new();
        let mut dead: Vec<OpId> = Vec::new();
        for block in graph.block_ids() {
            for &op_id in &graph.block(block).phis {
                let op = graph.op(op_id);
                let Some(value) = op.value else {
                    continue;
                };
                let mut unique = op.inputs.iter().copied().filter(|&v| v != value);
                let Some(first) = unique.next() else {
                    continue;
                };
                if unique.all(|v| v == first) {
                    map.insert(value, first);
                    dead.push(op_id);
                }
            }
        }
        if dead.is_empty() {
            return removed;
        }
        removed += dead.len();
        for op in dead {
            graph.remove_op(op);
        }
        graph.replace_vars(&map);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::Cond,
        ir::{check_ssa, GraphBuilder, Terminator, VarType},
    };

    #[test]
    fn test_trivial_phi_chain_collapses() {
        let mut b = GraphBuilder::new("loop");
        let x = b.input(VarType::Int);
        let [b0, b1, b2] = b.blocks();
        let zero = b.int(0);
        b.goto(b0, b1);
        let head = b.phi_placeholder(b1, VarType::Int);
        b.branch(b1, Cond::Eq, head, zero, b2, b1);
        b.set_phi(b1, head, &[(b0, x), (b1, head)]);
        b.ret(b2, Some(head));
        let mut graph = b.finish();

        assert_eq!(remove_trivial_phis(&mut graph), 1);
        assert!(graph.block(b1).phis.is_empty());
        assert_eq!(graph.block(b2).terminator, Terminator::Return(Some(x)));
        check_ssa(&graph).unwrap();
    }

    #[test]
    fn test_repair_inserts_merge_phi() {
        // b0 -> b1 -> b3, b0 -> b2 -> b3; v defined in b1, used in b3.
        // Duplicate b1 for nothing but pretend b2 defines a copy of v.
        let mut b = GraphBuilder::new("diamond");
        let x = b.input(VarType::Int);
        let [b0, b1, b2, b3] = b.blocks();
        let zero = b.int(0);
        b.branch(b0, Cond::Eq, x, zero, b1, b2);
        let v = b.neg(b1, x);
        b.goto(b1, b3);
        let w = b.neg(b2, x);
        b.goto(b2, b3);
        b.ret(b3, Some(v));
        let mut graph = b.finish();

        repair(&mut graph, &[(v, w)].into_iter().collect()).unwrap();
        let phis = &graph.block(b3).phis;
        assert_eq!(phis.len(), 1);
        let merged = graph.op(phis[0]).value.unwrap();
        assert_eq!(graph.block(b3).terminator, Terminator::Return(Some(merged)));
        assert_eq!(graph.phi_input(phis[0], b1), Some(v));
        assert_eq!(graph.phi_input(phis[0], b2), Some(w));
        check_ssa(&graph).unwrap();
    }

    #[test]
    fn test_repair_in_nested_loops_creates_only_read_phis() {
        // entry -> h1 -> h2 -> p -> b1 | b2 -> m -> h2, h2 -> latch -> h1, h1 -> exit.
        // v in b1 and its copy w in b2 meet in m. The frontier also names h1 and h2,
        // whose phis would only read each other.
        let mut b = GraphBuilder::new("nested");
        let x = b.input(VarType::Int);
        let [entry, h1, h2, p, b1, b2, m, latch, exit] = b.blocks();
        let zero = b.int(0);
        b.goto(entry, h1);
        b.branch(h1, Cond::Lt, x, zero, h2, exit);
        b.branch(h2, Cond::Gt, x, zero, p, latch);
        b.branch(p, Cond::Eq, x, zero, b1, b2);
        let v = b.neg(b1, x);
        b.goto(b1, m);
        let w = b.neg(b2, x);
        b.goto(b2, m);
        let _ = b.neg(m, v);
        b.goto(m, h2);
        b.goto(latch, h1);
        b.ret(exit, None);
        let mut graph = b.finish();

        repair(&mut graph, &[(v, w)].into_iter().collect()).unwrap();
        assert_eq!(graph.block(m).phis.len(), 1);
        assert!(graph.block(h1).phis.is_empty());
        assert!(graph.block(h2).phis.is_empty());
        let merged = graph.op(graph.block(m).phis[0]).value.unwrap();
        let use_in_m = graph.op(graph.block(m).ops[0]).inputs[0];
        assert_eq!(use_in_m, merged);
        check_ssa(&graph).unwrap();
    }
}
