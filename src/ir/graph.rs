//! The per-method SSA graph.
//!
//! [`MethodGraph`] owns three arenas (blocks, operations and variables) and hands out
//! handles into them. Nothing is ever freed: deleting a block or an operation only
//! marks it removed, so handles stay valid for the lifetime of the graph and
//! duplication always allocates fresh ones.
//!
//! # Structure
//!
//! ```text
//! MethodGraph
//! ├── blocks: Vec<Block>         // nodes, addressed by BlockId
//! ├── preds: Vec<Vec<BlockId>>   // predecessor lists, kept in sync with the edges
//! ├── ops: Vec<Operation>        // addressed by OpId
//! ├── vars: Vec<Variable>        // addressed by VarId
//! ├── inputs: Vec<VarId>         // parameters and the initial ordering token
//! └── procedures: Vec<Procedure> // jsr subroutines, empty after assembly
//! ```

use std::{collections::HashMap, fmt};

use crate::{
    bytecode::{TypeDesc, THROWABLE},
    ir::{
        Block, BlockId, HandlerEdge, Literal, OpId, OpKind, Operation, Procedure, Terminator,
        VarId, VarType, Variable,
    },
    utils::graph::{GraphBase, NodeId, Predecessors, RootedGraph, Successors},
};

/// A method in SSA form.
#[derive(Debug, Clone)]
pub struct MethodGraph {
    name: String,
    blocks: Vec<Block>,
    preds: Vec<Vec<BlockId>>,
    ops: Vec<Operation>,
    vars: Vec<Variable>,
    entry: BlockId,
    rethrow: Option<BlockId>,
    inputs: Vec<VarId>,
    procedures: Vec<Procedure>,
}

impl MethodGraph {
    /// Creates an empty graph. The first block added becomes the entry.
    pub fn new(name: impl Into<String>) -> Self {
        MethodGraph {
            name: name.into(),
            blocks: Vec::new(),
            preds: Vec::new(),
            ops: Vec::new(),
            vars: Vec::new(),
            entry: NodeId::new(0),
            rethrow: None,
            inputs: Vec::new(),
            procedures: Vec::new(),
        }
    }

    /// Method name used in diagnostics.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The entry block.
    #[must_use]
    pub fn entry(&self) -> BlockId {
        self.entry
    }

    /// Makes `block` the entry.
    pub fn set_entry(&mut self, block: BlockId) {
        self.entry = block;
    }

    /// The block that rethrows exceptions escaping the method, once exception
    /// normalization has created it.
    #[must_use]
    pub fn rethrow(&self) -> Option<BlockId> {
        self.rethrow
    }

    pub(crate) fn set_rethrow(&mut self, block: Option<BlockId>) {
        self.rethrow = block;
    }

    /// Method inputs: `this`, the parameters, then the initial ordering token.
    #[must_use]
    pub fn inputs(&self) -> &[VarId] {
        &self.inputs
    }

    /// Declares a new method input.
    pub fn add_input(&mut self, ty: VarType, decl: Option<TypeDesc>) -> VarId {
        let var = self.new_var(ty);
        self.vars[var.index()].decl = decl;
        self.inputs.push(var);
        var
    }

    /// Remaining subroutine records.
    #[must_use]
    pub fn procedures(&self) -> &[Procedure] {
        &self.procedures
    }

    pub(crate) fn procedures_mut(&mut self) -> &mut Vec<Procedure> {
        &mut self.procedures
    }

    /// Appends an empty block.
    pub fn add_block(&mut self, offset: Option<u32>) -> BlockId {
        self.blocks.push(Block::new(offset));
        self.preds.push(Vec::new());
        NodeId::new(self.blocks.len() - 1)
    }

    /// The block with handle `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Handles of all blocks that have not been removed, ascending.
    #[must_use]
    pub fn block_ids(&self) -> Vec<BlockId> {
        (0..self.blocks.len())
            .map(NodeId::new)
            .filter(|&b| !self.blocks[b.index()].removed)
            .collect()
    }

    /// Number of live blocks.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.blocks.iter().filter(|b| !b.removed).count()
    }

    /// The operation with handle `id`.
    #[must_use]
    pub fn op(&self, id: OpId) -> &Operation {
        &self.ops[id.index()]
    }

    pub(crate) fn op_mut(&mut self, id: OpId) -> &mut Operation {
        &mut self.ops[id.index()]
    }

    /// The variable with handle `id`.
    #[must_use]
    pub fn var(&self, id: VarId) -> &Variable {
        &self.vars[id.index()]
    }

    pub(crate) fn var_mut(&mut self, id: VarId) -> &mut Variable {
        &mut self.vars[id.index()]
    }

    /// Number of variables ever allocated.
    #[must_use]
    pub fn var_count(&self) -> usize {
        self.vars.len()
    }

    /// Allocates a variable without a definition.
    pub fn new_var(&mut self, ty: VarType) -> VarId {
        self.vars.push(Variable::new(ty));
        VarId::new(self.vars.len() - 1)
    }

    /// Allocates a literal variable.
    pub fn literal(&mut self, literal: Literal) -> VarId {
        let var = self.new_var(literal.var_type());
        self.vars[var.index()].literal = Some(literal);
        var
    }

    /// Live operations of `block`, phis first.
    pub fn block_ops(&self, block: BlockId) -> impl Iterator<Item = OpId> + '_ {
        let b = &self.blocks[block.index()];
        b.phis.iter().chain(b.ops.iter()).copied()
    }

    /// Appends an operation to `block`.
    ///
    /// Allocates a `value` output of type `value` if given. Operations that may
    /// throw also get a `thrown` and a `token` output, and must carry the incoming
    /// token as `inputs[0]`.
    pub fn push_op(
        &mut self,
        block: BlockId,
        kind: OpKind,
        inputs: Vec<VarId>,
        value: Option<VarType>,
        offset: Option<u32>,
    ) -> OpId {
        let id = OpId::new(self.ops.len());
        let ordered = kind.may_throw();
        let value = value.map(|ty| self.defined_var(ty, id));
        let thrown = ordered.then(|| {
            let var = self.defined_var(VarType::Object, id);
            self.vars[var.index()].decl = Some(TypeDesc::object(THROWABLE));
            var
        });
        let token = ordered.then(|| self.defined_var(VarType::Token, id));

        self.ops.push(Operation {
            kind,
            inputs,
            value,
            thrown,
            token,
            block,
            offset,
            removed: false,
        });
        self.blocks[block.index()].ops.push(id);
        id
    }

    /// Appends a phi of type `ty` with no inputs yet. Returns the phi and its output.
    pub fn add_phi(&mut self, block: BlockId, ty: VarType) -> (OpId, VarId) {
        let id = OpId::new(self.ops.len());
        let value = self.defined_var(ty, id);
        self.ops.push(Operation {
            kind: OpKind::Phi { preds: Vec::new() },
            inputs: Vec::new(),
            value: Some(value),
            thrown: None,
            token: None,
            block,
            offset: None,
            removed: false,
        });
        self.blocks[block.index()].phis.push(id);
        (id, value)
    }

    pub(crate) fn op_count(&self) -> usize {
        self.ops.len()
    }

    /// Appends an operation record to the arena without attaching it to a block.
    pub(crate) fn push_raw_op(&mut self, op: Operation) -> OpId {
        self.ops.push(op);
        OpId::new(self.ops.len() - 1)
    }

    fn defined_var(&mut self, ty: VarType, def: OpId) -> VarId {
        let var = self.new_var(ty);
        self.vars[var.index()].def = Some(def);
        var
    }

    /// Replaces the inputs of phi `op`.
    pub fn set_phi_inputs(&mut self, op: OpId, preds: Vec<BlockId>, inputs: Vec<VarId>) {
        let phi = &mut self.ops[op.index()];
        phi.kind = OpKind::Phi { preds };
        phi.inputs = inputs;
    }

    /// Input of phi `op` for predecessor `pred`.
    #[must_use]
    pub fn phi_input(&self, op: OpId, pred: BlockId) -> Option<VarId> {
        let phi = &self.ops[op.index()];
        match &phi.kind {
            OpKind::Phi { preds } => preds
                .iter()
                .position(|&p| p == pred)
                .map(|i| phi.inputs[i]),
            _ => None,
        }
    }

    /// Adds or replaces the input of phi `op` for `pred`.
    pub(crate) fn set_phi_input(&mut self, op: OpId, pred: BlockId, value: VarId) {
        let phi = &mut self.ops[op.index()];
        if let OpKind::Phi { preds } = &mut phi.kind {
            match preds.iter().position(|&p| p == pred) {
                Some(i) => phi.inputs[i] = value,
                None => {
                    preds.push(pred);
                    phi.inputs.push(value);
                }
            }
        }
    }

    /// Removes the input of every phi in `block` for `pred`.
    pub(crate) fn remove_phi_inputs(&mut self, block: BlockId, pred: BlockId) {
        for &op in &self.blocks[block.index()].phis {
            let phi = &mut self.ops[op.index()];
            if let OpKind::Phi { preds } = &mut phi.kind {
                if let Some(i) = preds.iter().position(|&p| p == pred) {
                    preds.remove(i);
                    phi.inputs.remove(i);
                }
            }
        }
    }

    /// Control successors of `block` followed by its handler targets, without
    /// duplicates.
    #[must_use]
    pub fn successors_of(&self, block: BlockId) -> Vec<BlockId> {
        let b = &self.blocks[block.index()];
        if b.removed {
            return Vec::new();
        }
        let mut targets = b.terminator.targets();
        for edge in &b.handlers {
            if !targets.contains(&edge.target) {
                targets.push(edge.target);
            }
        }
        targets
    }

    /// Predecessors of `block`, ascending.
    #[must_use]
    pub fn preds_of(&self, block: BlockId) -> &[BlockId] {
        &self.preds[block.index()]
    }

    /// Returns `true` if `from` reaches `to` through a handler edge.
    #[must_use]
    pub fn is_handler_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.blocks[from.index()]
            .handlers
            .iter()
            .any(|e| e.target == to)
    }

    /// Returns `true` if some operation in `block` may throw, or the block ends in
    /// `athrow`.
    #[must_use]
    pub fn throws(&self, block: BlockId) -> bool {
        let b = &self.blocks[block.index()];
        matches!(b.terminator, Terminator::Throw(_))
            || b.ops.iter().any(|&op| self.ops[op.index()].thrown.is_some())
    }

    fn link(&mut self, block: BlockId) {
        for succ in self.successors_of(block) {
            let preds = &mut self.preds[succ.index()];
            if let Err(pos) = preds.binary_search(&block) {
                preds.insert(pos, block);
            }
        }
    }

    fn unlink(&mut self, block: BlockId) {
        for succ in self.successors_of(block) {
            let preds = &mut self.preds[succ.index()];
            if let Ok(pos) = preds.binary_search(&block) {
                preds.remove(pos);
            }
        }
    }

    /// Replaces the terminator of `block`.
    pub fn set_terminator(&mut self, block: BlockId, terminator: Terminator) {
        self.unlink(block);
        self.blocks[block.index()].terminator = terminator;
        self.link(block);
    }

    /// Replaces the handler edges of `block`.
    pub fn set_handlers(&mut self, block: BlockId, handlers: Vec<HandlerEdge>) {
        self.unlink(block);
        self.blocks[block.index()].handlers = handlers;
        self.link(block);
    }

    /// Points every edge of `block` that goes to `from` at `to` instead. Phis are
    /// not touched.
    pub(crate) fn redirect(&mut self, block: BlockId, from: BlockId, to: BlockId) {
        self.unlink(block);
        let b = &mut self.blocks[block.index()];
        b.terminator.map_targets(|t| if t == from { to } else { t });
        for edge in &mut b.handlers {
            if edge.target == from {
                edge.target = to;
            }
        }
        self.link(block);
    }

    /// Deletes an operation from its block.
    pub(crate) fn remove_op(&mut self, op: OpId) {
        let operation = &mut self.ops[op.index()];
        operation.removed = true;
        let block = &mut self.blocks[operation.block.index()];
        block.phis.retain(|&o| o != op);
        block.ops.retain(|&o| o != op);
    }

    /// Deletes a block, its operations and its outgoing edges, and drops the phi
    /// inputs its successors had for it.
    pub(crate) fn remove_block(&mut self, block: BlockId) {
        for succ in self.successors_of(block) {
            self.remove_phi_inputs(succ, block);
        }
        self.unlink(block);
        let ops: Vec<OpId> = self.block_ops(block).collect();
        for op in ops {
            self.ops[op.index()].removed = true;
        }
        let b = &mut self.blocks[block.index()];
        b.phis.clear();
        b.ops.clear();
        b.handlers.clear();
        b.terminator = Terminator::Return(None);
        b.removed = true;
    }

    /// Rewrites every use of a variable through `map`, following chains.
    pub(crate) fn replace_vars(&mut self, map: &HashMap<VarId, VarId>) {
        if map.is_empty() {
            return;
        }
        let resolve = |mut v: VarId| {
            let mut steps = 0;
            while let Some(&next) = map.get(&v) {
                if next == v || steps > map.len() {
                    break;
                }
                v = next;
                steps += 1;
            }
            v
        };
        for op in self.ops.iter_mut().filter(|op| !op.removed) {
            for input in op.inputs.iter_mut() {
                *input = resolve(*input);
            }
        }
        for block in self.blocks.iter_mut().filter(|b| !b.removed) {
            block.terminator.map_uses(resolve);
        }
    }

    /// Number of live uses of every variable, indexed by [`VarId::index`].
    #[must_use]
    pub fn use_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.vars.len()];
        for op in self.ops.iter().filter(|op| !op.removed) {
            for input in &op.inputs {
                counts[input.index()] += 1;
            }
        }
        for block in self.blocks.iter().filter(|b| !b.removed) {
            for var in block.terminator.uses() {
                counts[var.index()] += 1;
            }
        }
        counts
    }
}

impl GraphBase for MethodGraph {
    fn node_count(&self) -> usize {
        self.blocks.len()
    }

    fn node_ids(&self) -> impl Iterator<Item = NodeId> {
        self.block_ids().into_iter()
    }
}

impl Successors for MethodGraph {
    fn successors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.successors_of(node).into_iter()
    }
}

impl Predecessors for MethodGraph {
    fn predecessors(&self, node: NodeId) -> impl Iterator<Item = NodeId> {
        self.preds[node.index()].iter().copied()
    }
}

impl RootedGraph for MethodGraph {
    fn entry(&self) -> NodeId {
        self.entry
    }
}

impl fmt::Display for MethodGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "method {} (entry {})", self.name, self.entry)?;
        for id in self.block_ids() {
            let block = self.block(id);
            writeln!(f, "{id}: preds {:?}", self.preds_of(id))?;
            for op in self.block_ops(id) {
                let op = self.op(op);
                let outputs: Vec<VarId> = op.outputs().collect();
                writeln!(f, "    {outputs:?} = {:?} {:?}", op.kind, op.inputs)?;
            }
            writeln!(f, "    {:?}", block.terminator)?;
            for edge in &block.handlers {
                writeln!(f, "    catch {} -> {}", edge.catches, edge.target)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ArithOp, ValueKind},
        structuring::ExceptionSet,
    };

    #[test]
    fn test_edges_keep_predecessors_in_sync() {
        let mut graph = MethodGraph::new("t");
        let a = graph.add_block(Some(0));
        let b = graph.add_block(Some(1));
        let c = graph.add_block(Some(2));

        graph.set_terminator(a, Terminator::Goto(b));
        graph.set_handlers(
            a,
            vec![HandlerEdge {
                catches: ExceptionSet::all(),
                target: c,
            }],
        );
        assert_eq!(graph.preds_of(b), &[a]);
        assert_eq!(graph.preds_of(c), &[a]);
        assert!(graph.is_handler_edge(a, c));

        graph.redirect(a, b, c);
        assert!(graph.preds_of(b).is_empty());
        assert_eq!(graph.successors_of(a), vec![c]);

        graph.remove_block(c);
        assert_eq!(graph.block_count(), 2);
        assert!(graph.successors_of(c).is_empty());
    }

    #[test]
    fn test_ordered_ops_get_token_and_thrown() {
        let mut graph = MethodGraph::new("t");
        let b = graph.add_block(None);
        let token = graph.add_input(VarType::Token, None);
        let x = graph.add_input(VarType::Int, None);
        let div = graph.push_op(
            b,
            OpKind::Arith {
                kind: ValueKind::Int,
                op: ArithOp::Div,
            },
            vec![token, x, x],
            Some(VarType::Int),
            Some(0),
        );
        let op = graph.op(div);
        assert!(op.is_ordered());
        assert!(op.thrown.is_some());
        assert!(graph.throws(b));
        assert_eq!(graph.var(op.value.unwrap()).def, Some(div));
        assert_eq!(graph.use_counts()[x.index()], 2);
    }

    #[test]
    fn test_replace_vars_follows_chains() {
        let mut graph = MethodGraph::new("t");
        let b = graph.add_block(None);
        let x = graph.add_input(VarType::Int, None);
        let y = graph.new_var(VarType::Int);
        let z = graph.new_var(VarType::Int);
        graph.set_terminator(b, Terminator::Return(Some(z)));
        graph.replace_vars(&[(z, y), (y, x)].into_iter().collect());
        assert_eq!(graph.block(b).terminator, Terminator::Return(Some(x)));
    }
}
