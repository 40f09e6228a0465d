//! SSA well-formedness checks.

use std::collections::HashSet;

use crate::{
    ir::{BlockId, MethodGraph, OpId, OpKind, VarId},
    utils::graph::{algorithms::compute_dominators, NodeSet},
    Result,
};

/// Checks that `graph` is in valid SSA form and free of subroutine constructs.
///
/// - every used variable is a literal, a method input, or the output of a live
///   operation
/// - every use is dominated by its definition; a phi input counts as a use at the
///   end of its predecessor
/// - every phi has exactly one input per predecessor of its block
/// - no procedure record and no `jsr`/`ret` terminator remains
///
/// Unreachable blocks are ignored.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] describing the first violation.
pub fn check_ssa(graph: &MethodGraph) -> Result<()> {
    if !graph.procedures().is_empty() {
        return Err(consistency_error!(
            "{} subroutine records survived assembly of {}",
            graph.procedures().len(),
            graph.name()
        ));
    }

    let doms = compute_dominators(graph, graph.entry());
    let inputs: HashSet<VarId> = graph.inputs().iter().copied().collect();

    // Position of each defining op inside its block
    let mut position: Vec<usize> = vec![0; graph.op_count()];
    for block in graph.block_ids() {
        for (i, op) in graph.block_ops(block).enumerate() {
            position[op.index()] = i;
        }
    }

    let check_use = |var: VarId, site: BlockId, at: Option<usize>| -> Result<()> {
        let variable = graph.var(var);
        if variable.is_literal() || inputs.contains(&var) {
            return Ok(());
        }
        let Some(def) = variable.def else {
            return Err(consistency_error!("{} is used in {} but never defined", var, site));
        };
        let def_op = graph.op(def);
        if def_op.removed {
            return Err(consistency_error!("{} is used in {} after its definition was removed", var, site));
        }
        let home = def_op.block;
        let ok = match at {
            Some(index) if home == site => position[def.index()] < index,
            _ => doms.dominates(home, site),
        };
        if ok {
            Ok(())
        } else {
            Err(consistency_error!(
                "use of {} in {} is not dominated by its definition in {}",
                var,
                site,
                home
            ))
        }
    };

    for block in graph.block_ids() {
        if !doms.is_reachable(block) {
            continue;
        }
        if graph.block(block).terminator.is_subroutine() {
            return Err(consistency_error!("{} still ends in a subroutine transfer", block));
        }

        let preds: NodeSet = graph.preds_of(block).iter().copied().collect();
        for (i, op_id) in graph.block_ops(block).enumerate() {
            let op = graph.op(op_id);
            check_owner(graph, op_id, block)?;
            match &op.kind {
                OpKind::Phi { preds: phi_preds } => {
                    let listed: NodeSet = phi_preds.iter().copied().collect();
                    if listed != preds || phi_preds.len() != preds.len() {
                        return Err(consistency_error!(
                            "phi {:?} in {} has inputs for {:?} but predecessors {:?}",
                            op_id,
                            block,
                            phi_preds,
                            graph.preds_of(block)
                        ));
                    }
                    for (&pred, &input) in phi_preds.iter().zip(op.inputs.iter()) {
                        if doms.is_reachable(pred) {
                            check_use(input, pred, None)?;
                        }
                    }
                }
                _ => {
                    for &input in &op.inputs {
                        check_use(input, block, Some(i))?;
                    }
                }
            }
        }
        let end = graph.block_ops(block).count();
        for var in graph.block(block).terminator.uses() {
            check_use(var, block, Some(end))?;
        }
    }
    Ok(())
}

fn check_owner(graph: &MethodGraph, op: OpId, block: BlockId) -> Result<()> {
    let operation = graph.op(op);
    if operation.removed || operation.block != block {
        return Err(consistency_error!("{:?} is listed in {} but not owned by it", op, block));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::Cond,
        ir::{GraphBuilder, VarType},
    };

    #[test]
    fn test_detects_undominated_use() {
        let mut b = GraphBuilder::new("bad");
        let x = b.input(VarType::Int);
        let [b0, b1, b2, b3] = b.blocks();
        let zero = b.int(0);
        b.branch(b0, Cond::Eq, x, zero, b1, b2);
        let v = b.neg(b1, x);
        b.goto(b1, b3);
        b.goto(b2, b3);
        b.ret(b3, Some(v));
        let graph = b.finish();

        let err = check_ssa(&graph).unwrap_err();
        assert!(err.to_string().contains("not dominated"));
    }

    #[test]
    fn test_detects_missing_phi_input() {
        let mut b = GraphBuilder::new("phi");
        let x = b.input(VarType::Int);
        let [b0, b1, b2] = b.blocks();
        let zero = b.int(0);
        b.branch(b0, Cond::Eq, x, zero, b1, b2);
        b.goto(b1, b2);
        let merged = b.phi(b2, VarType::Int, &[(b1, x)]);
        b.ret(b2, Some(merged));
        let graph = b.finish();

        assert!(check_ssa(&graph).is_err());
    }
}
