//! Block splitting and region duplication.
//!
//! Normalization passes reshape the graph in two ways. [`MethodGraph::split_preds`]
//! inserts a forwarding block in front of a target for a subset of its
//! predecessors. [`MethodGraph::duplicate_region`] copies a set of blocks with fresh
//! handles for every block, operation and variable. Both keep phis consistent; after
//! a duplication the caller runs [`crate::ir::repair`] for values that now have two
//! definitions.

use std::collections::BTreeMap;

use crate::{
    ir::{BlockId, HandlerEdge, MethodGraph, OpId, OpKind, Operation, Terminator, VarId},
    utils::graph::NodeSet,
};

/// Handles allocated by [`MethodGraph::duplicate_region`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Duplication {
    /// Original block to copy
    pub blocks: BTreeMap<BlockId, BlockId>,
    /// Original variable to copy, for every variable defined in the region
    pub vars: BTreeMap<VarId, VarId>,
}

impl MethodGraph {
    /// Routes the edges from `preds` to `target` through a new forwarding block and
    /// returns it.
    ///
    /// Phi inputs of `target` for `preds` move into the forwarder: a single input
    /// moves as is, several become a phi in the forwarder.
    pub fn split_preds(&mut self, target: BlockId, preds: &[BlockId]) -> BlockId {
        let forwarder = self.add_block(None);
        self.block_mut(forwarder).subroutines = self.block(target).subroutines.clone();
        self.set_terminator(forwarder, Terminator::Goto(target));

        let phis = self.block(target).phis.clone();
        let mut moved = Vec::with_capacity(phis.len());
        for &phi in &phis {
            let incoming: Vec<(BlockId, VarId)> = preds
                .iter()
                .filter_map(|&p| self.phi_input(phi, p).map(|v| (p, v)))
                .collect();
            let value = match incoming.as_slice() {
                [] => None,
                [(_, single)] => Some(*single),
                _ => {
                    let Some(output) = self.op(phi).value else {
                        continue;
                    };
                    let ty = self.var(output).ty;
                    let decl = self.var(output).decl.clone();
                    let (op, var) = self.add_phi(forwarder, ty);
                    self.var_mut(var).decl = decl;
                    let (ps, vs) = incoming.into_iter().unzip();
                    self.set_phi_inputs(op, ps, vs);
                    Some(var)
                }
            };
            moved.push((phi, value));
        }

        for &pred in preds {
            self.remove_phi_inputs(target, pred);
            self.redirect(pred, target, forwarder);
        }
        for (phi, value) in moved {
            if let Some(value) = value {
                self.set_phi_input(phi, forwarder, value);
            }
        }
        forwarder
    }

    /// Copies every block in `region` and moves the edges listed in `redirect`
    /// (`(pred, target)` with `target` in the region) to the copy of `target`.
    ///
    /// Inside the copies, references to region blocks and region variables point at
    /// their copies. Phi inputs are kept consistent on both sides:
    ///
    /// - a copied phi keeps inputs from copied predecessors and redirected edges
    /// - an original phi loses the inputs of redirected edges
    /// - successors outside the region gain inputs for the copied predecessors
    pub fn duplicate_region(
        &mut self,
        region: &NodeSet,
        redirect: &[(BlockId, BlockId)],
    ) -> Duplication {
        let originals: Vec<BlockId> = region.iter().filter(|&b| !self.block(b).removed).collect();
        let mut dup = Duplication::default();

        for &b in &originals {
            let copy = self.add_block(self.block(b).offset);
            self.block_mut(copy).subroutines = self.block(b).subroutines.clone();
            dup.blocks.insert(b, copy);
        }

        let mut copied_ops: Vec<(OpId, OpId)> = Vec::new();
        for &b in &originals {
            let copy = dup.blocks[&b];
            let ops: Vec<OpId> = self.block_ops(b).collect();
            for op in ops {
                let new_op = self.clone_op(op, copy, &mut dup.vars);
                copied_ops.push((op, new_op));
            }
        }

        let block_map = |b: BlockId| dup.blocks.get(&b).copied().unwrap_or(b);
        let var_map = |v: VarId| dup.vars.get(&v).copied().unwrap_or(v);

        for &(old, new) in &copied_ops {
            let original = self.op(old).clone();
            if let OpKind::Phi { preds } = &original.kind {
                let mut ps = Vec::new();
                let mut vs = Vec::new();
                for (&p, &v) in preds.iter().zip(original.inputs.iter()) {
                    if region.contains(p) {
                        ps.push(block_map(p));
                        vs.push(var_map(v));
                    } else if redirect.contains(&(p, original.block)) {
                        ps.push(p);
                        vs.push(v);
                    }
                }
                self.set_phi_inputs(new, ps, vs);
            } else {
                let inputs = original.inputs.iter().map(|&v| var_map(v)).collect();
                self.op_mut(new).inputs = inputs;
            }
        }

        for &b in &originals {
            let copy = dup.blocks[&b];
            let mut terminator = self.block(b).terminator.clone();
            terminator.map_targets(block_map);
            terminator.map_uses(var_map);
            let handlers = self
                .block(b)
                .handlers
                .iter()
                .map(|e| HandlerEdge {
                    catches: e.catches.clone(),
                    target: block_map(e.target),
                })
                .collect();
            self.set_terminator(copy, terminator);
            self.set_handlers(copy, handlers);
        }

        for &(pred, target) in redirect {
            if region.contains(pred) || !region.contains(target) {
                continue;
            }
            self.remove_phi_inputs(target, pred);
            self.redirect(pred, target, block_map(target));
        }

        for &b in &originals {
            let copy = dup.blocks[&b];
            for succ in self.successors_of(b) {
                if region.contains(succ) {
                    continue;
                }
                let phis = self.block(succ).phis.clone();
                for phi in phis {
                    if let Some(v) = self.phi_input(phi, b) {
                        self.set_phi_input(phi, copy, var_map(v));
                    }
                }
            }
        }

        dup
    }

    /// Appends a copy of `op` with fresh outputs to `block`. Inputs are copied
    /// unchanged and remapped by the caller.
    fn clone_op(&mut self, op: OpId, block: BlockId, vars: &mut BTreeMap<VarId, VarId>) -> OpId {
        let original = self.op(op).clone();
        let id = OpId::new(self.op_count());
        let mut fresh = |graph: &mut Self, old: Option<VarId>| {
            old.map(|old| {
                let mut var = graph.var(old).clone();
                var.def = Some(id);
                let new = graph.new_var(var.ty);
                *graph.var_mut(new) = var;
                vars.insert(old, new);
                new
            })
        };
        let value = fresh(self, original.value);
        let thrown = fresh(self, original.thrown);
        let token = fresh(self, original.token);
        let is_phi = original.kind.is_phi();

        self.push_raw_op(Operation {
            value,
            thrown,
            token,
            block,
            removed: false,
            ..original
        });
        let b = self.block_mut(block);
        if is_phi {
            b.phis.push(id);
        } else {
            b.ops.push(id);
        }
        id
    }
}

/// Maps a slot vector through a duplication's variable map.
pub(crate) fn map_vars(vars: &BTreeMap<VarId, VarId>, values: &[Option<VarId>]) -> Vec<Option<VarId>> {
    values
        .iter()
        .map(|v| v.map(|v| vars.get(&v).copied().unwrap_or(v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{GraphBuilder, VarType};

    #[test]
    fn test_split_preds_moves_phi_inputs() {
        let mut b = GraphBuilder::new("split");
        let x = b.input(VarType::Int);
        let y = b.input(VarType::Int);
        let [b0, b1, b2, b3] = b.blocks();
        let zero = b.int(0);
        b.branch(b0, crate::bytecode::Cond::Lt, x, zero, b1, b2);
        b.goto(b1, b3);
        b.goto(b2, b3);
        let merged = b.phi(b3, VarType::Int, &[(b1, x), (b2, y)]);
        b.ret(b3, Some(merged));
        let mut graph = b.finish();

        let fwd = graph.split_preds(b3, &[b1, b2]);
        assert_eq!(graph.preds_of(b3), &[fwd]);
        assert_eq!(graph.preds_of(fwd), &[b1, b2]);
        let phi = graph.block(b3).phis[0];
        let forwarded = graph.phi_input(phi, fwd).unwrap();
        let inner = graph.block(fwd).phis[0];
        assert_eq!(graph.op(inner).value, Some(forwarded));
        assert_eq!(graph.phi_input(inner, b1), Some(x));
    }

    #[test]
    fn test_duplicate_region_redirects_entry_edge() {
        // b0 -> b1 -> b2, b0 -> b2; copy {b1} for the edge b0 -> b1
        let mut b = GraphBuilder::new("dup");
        let x = b.input(VarType::Int);
        let [b0, b1, b2] = b.blocks();
        let zero = b.int(0);
        b.branch(b0, crate::bytecode::Cond::Eq, x, zero, b1, b2);
        let v = b.neg(b1, x);
        b.goto(b1, b2);
        let merged = b.phi(b2, VarType::Int, &[(b0, x), (b1, v)]);
        b.ret(b2, Some(merged));
        let mut graph = b.finish();

        let dup = graph.duplicate_region(&NodeSet::singleton(b1), &[(b0, b1)]);
        let copy = dup.blocks[&b1];
        assert!(graph.preds_of(b1).is_empty());
        assert_eq!(graph.preds_of(copy), &[b0]);
        let phi = graph.block(b2).phis[0];
        assert_eq!(graph.phi_input(phi, copy), Some(dup.vars[&v]));
        assert_eq!(graph.phi_input(phi, b1), Some(v));
        assert_ne!(dup.vars[&v], v);
        assert_eq!(map_vars(&dup.vars, &[Some(v), None]), vec![Some(dup.vars[&v]), None]);
    }
}
