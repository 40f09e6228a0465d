//! Builder for constructing method graphs directly.
//!
//! Tests of the later stages need graph shapes that are awkward to reach from
//! bytecode: irreducible loops, hand-placed phis, handler edges with chosen exception
//! sets. [`GraphBuilder`] writes them without manual arena bookkeeping:
//!
//! ```rust
//! use classflow::bytecode::Cond;
//! use classflow::ir::{check_ssa, GraphBuilder, VarType};
//!
//! let mut b = GraphBuilder::new("abs");
//! let x = b.input(VarType::Int);
//! let [entry, negate, done] = b.blocks();
//! let zero = b.int(0);
//! b.branch(entry, Cond::Lt, x, zero, negate, done);
//! let neg = b.neg(negate, x);
//! b.goto(negate, done);
//! let result = b.phi(done, VarType::Int, &[(entry, x), (negate, neg)]);
//! b.ret(done, Some(result));
//!
//! let graph = b.finish();
//! assert_eq!(graph.block_count(), 3);
//! check_ssa(&graph)?;
//! # Ok::<(), classflow::Error>(())
//! ```
//!
//! The first block created is the entry. Ordered operations all take the method's
//! initial ordering token.

use crate::{
    bytecode::{ArithOp, Cond, InvokeKind, MethodDescriptor, MethodRef, ValueKind},
    ir::{BlockId, HandlerEdge, Literal, MethodGraph, OpId, OpKind, Terminator, VarId, VarType},
    structuring::ExceptionSet,
    utils::graph::GraphBase,
};

/// Fluent builder for [`MethodGraph`] fixtures.
#[derive(Debug)]
pub struct GraphBuilder {
    graph: MethodGraph,
    token: Option<VarId>,
}

impl GraphBuilder {
    /// Starts an empty graph.
    pub fn new(name: &str) -> Self {
        GraphBuilder {
            graph: MethodGraph::new(name),
            token: None,
        }
    }

    /// Declares a method input.
    pub fn input(&mut self, ty: VarType) -> VarId {
        self.graph.add_input(ty, None)
    }

    /// Adds one block.
    pub fn block(&mut self) -> BlockId {
        self.graph.add_block(None)
    }

    /// Adds `N` blocks. Each gets its index as a pseudo address, so lowest-address
    /// tie-breaks follow creation order.
    pub fn blocks<const N: usize>(&mut self) -> [BlockId; N] {
        std::array::from_fn(|_| {
            let next = self.graph.node_count() as u32;
            self.graph.add_block(Some(next))
        })
    }

    /// An `int` literal.
    pub fn int(&mut self, value: i32) -> VarId {
        self.graph.literal(Literal::Int(value))
    }

    fn token(&mut self) -> VarId {
        match self.token {
            Some(token) => token,
            None => {
                let token = self.graph.add_input(VarType::Token, None);
                self.token = Some(token);
                token
            }
        }
    }

    /// `-x` in `block`.
    pub fn neg(&mut self, block: BlockId, x: VarId) -> VarId {
        self.value_op(block, OpKind::Neg(ValueKind::Int), vec![x], VarType::Int)
    }

    /// `a + b` in `block`.
    pub fn add(&mut self, block: BlockId, a: VarId, b: VarId) -> VarId {
        let kind = OpKind::Arith {
            kind: ValueKind::Int,
            op: ArithOp::Add,
        };
        self.value_op(block, kind, vec![a, b], VarType::Int)
    }

    fn value_op(&mut self, block: BlockId, kind: OpKind, inputs: Vec<VarId>, ty: VarType) -> VarId {
        let op = self.graph.push_op(block, kind, inputs, Some(ty), None);
        self.graph.op(op).value.unwrap_or_else(|| self.graph.new_var(ty))
    }

    /// A static `void` call, which may throw.
    pub fn call(&mut self, block: BlockId, name: &str) -> OpId {
        let token = self.token();
        let method = MethodRef {
            class: "Fixture".to_string(),
            name: name.to_string(),
            desc: MethodDescriptor {
                params: Vec::new(),
                ret: None,
            },
            protected: false,
        };
        self.graph.push_op(
            block,
            OpKind::Invoke {
                kind: InvokeKind::Static,
                method,
            },
            vec![token],
            None,
            None,
        )
    }

    /// A phi with the given inputs.
    pub fn phi(&mut self, block: BlockId, ty: VarType, inputs: &[(BlockId, VarId)]) -> VarId {
        let var = self.phi_placeholder(block, ty);
        self.set_phi(block, var, inputs);
        var
    }

    /// A phi whose inputs are set later with [`GraphBuilder::set_phi`], for loops
    /// where an input depends on the phi itself.
    pub fn phi_placeholder(&mut self, block: BlockId, ty: VarType) -> VarId {
        self.graph.add_phi(block, ty).1
    }

    /// Sets the inputs of the phi defining `var`.
    pub fn set_phi(&mut self, _block: BlockId, var: VarId, inputs: &[(BlockId, VarId)]) {
        if let Some(op) = self.graph.var(var).def {
            let (preds, values) = inputs.iter().copied().unzip();
            self.graph.set_phi_inputs(op, preds, values);
        }
    }

    /// `goto target`
    pub fn goto(&mut self, block: BlockId, target: BlockId) {
        self.graph.set_terminator(block, Terminator::Goto(target));
    }

    /// `if (lhs cond rhs) taken else fallthrough`
    pub fn branch(
        &mut self,
        block: BlockId,
        cond: Cond,
        lhs: VarId,
        rhs: VarId,
        taken: BlockId,
        fallthrough: BlockId,
    ) {
        self.graph.set_terminator(
            block,
            Terminator::If {
                cond,
                lhs,
                rhs,
                taken,
                fallthrough,
            },
        );
    }

    /// `switch (value)`
    pub fn switch(&mut self, block: BlockId, value: VarId, cases: &[(i32, BlockId)], default: BlockId) {
        self.graph.set_terminator(
            block,
            Terminator::Switch {
                value,
                cases: cases.to_vec(),
                default,
            },
        );
    }

    /// `return value`
    pub fn ret(&mut self, block: BlockId, value: Option<VarId>) {
        self.graph.set_terminator(block, Terminator::Return(value));
    }

    /// `throw value`
    pub fn throw(&mut self, block: BlockId, value: VarId) {
        self.graph.set_terminator(block, Terminator::Throw(value));
    }

    /// Adds a handler edge from `block` to `target` for `catches`.
    pub fn handler(&mut self, block: BlockId, catches: ExceptionSet, target: BlockId) {
        let mut handlers = self.graph.block(block).handlers.clone();
        handlers.push(HandlerEdge { catches, target });
        self.graph.set_handlers(block, handlers);
    }

    /// Direct access to the graph under construction.
    pub fn graph_mut(&mut self) -> &mut MethodGraph {
        &mut self.graph
    }

    /// Finishes the graph.
    #[must_use]
    pub fn finish(self) -> MethodGraph {
        self.graph
    }
}
