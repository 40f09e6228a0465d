//! Basic blocks, terminators and subroutine records.

use std::collections::BTreeSet;

use crate::{
    bytecode::Cond,
    ir::{OpId, VarId},
    structuring::ExceptionSet,
    utils::graph::NodeId,
};

/// Identifier of a block. Blocks are the nodes of the method graph.
pub type BlockId = NodeId;

/// The control transfer ending a block.
#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    /// Unconditional jump
    Goto(BlockId),
    /// Two-way branch on `lhs cond rhs`. Comparisons against zero or `null` use a
    /// literal `rhs`.
    If {
        /// Comparison
        cond: Cond,
        /// Left operand
        lhs: VarId,
        /// Right operand
        rhs: VarId,
        /// Target when the condition holds
        taken: BlockId,
        /// Target when it does not
        fallthrough: BlockId,
    },
    /// Multi-way branch on an `int`
    Switch {
        /// Scrutinee
        value: VarId,
        /// Key and target of each explicit case
        cases: Vec<(i32, BlockId)>,
        /// Target when no key matches
        default: BlockId,
    },
    /// Method return
    Return(Option<VarId>),
    /// `athrow`
    Throw(VarId),
    /// `jsr`: enters the subroutine at `target`; its `ret` continues at `ret_to`.
    /// Only `target` is a control successor.
    JsrCall {
        /// Subroutine entry
        target: BlockId,
        /// Block after the call, `None` when the subroutine never returns
        ret_to: Option<BlockId>,
    },
    /// `ret`: returns to the block after one of the calls
    Ret {
        /// Return points of every call site
        targets: Vec<BlockId>,
    },
}

impl Terminator {
    /// Distinct control successors in first-appearance order.
    #[must_use]
    pub fn targets(&self) -> Vec<BlockId> {
        let mut targets = Vec::new();
        let mut add = |b: BlockId| {
            if !targets.contains(&b) {
                targets.push(b);
            }
        };
        match self {
            Terminator::Goto(t) | Terminator::JsrCall { target: t, .. } => add(*t),
            Terminator::If {
                taken, fallthrough, ..
            } => {
                add(*taken);
                add(*fallthrough);
            }
            Terminator::Switch { cases, default, .. } => {
                for (_, t) in cases {
                    add(*t);
                }
                add(*default);
            }
            Terminator::Ret { targets: rets } => {
                for t in rets {
                    add(*t);
                }
            }
            Terminator::Return(_) | Terminator::Throw(_) => {}
        }
        targets
    }

    /// Rewrites every block reference, including a call's return point.
    pub fn map_targets(&mut self, mut f: impl FnMut(BlockId) -> BlockId) {
        match self {
            Terminator::Goto(t) => *t = f(*t),
            Terminator::If {
                taken, fallthrough, ..
            } => {
                *taken = f(*taken);
                *fallthrough = f(*fallthrough);
            }
            Terminator::Switch { cases, default, .. } => {
                for (_, t) in cases.iter_mut() {
                    *t = f(*t);
                }
                *default = f(*default);
            }
            Terminator::JsrCall { target, ret_to } => {
                *target = f(*target);
                *ret_to = ret_to.map(&mut f);
            }
            Terminator::Ret { targets } => {
                for t in targets.iter_mut() {
                    *t = f(*t);
                }
            }
            Terminator::Return(_) | Terminator::Throw(_) => {}
        }
    }

    /// Variables read by the terminator.
    #[must_use]
    pub fn uses(&self) -> Vec<VarId> {
        match self {
            Terminator::If { lhs, rhs, .. } => vec![*lhs, *rhs],
            Terminator::Switch { value, .. } | Terminator::Throw(value) => vec![*value],
            Terminator::Return(value) => value.iter().copied().collect(),
            Terminator::Goto(_) | Terminator::JsrCall { .. } | Terminator::Ret { .. } => {
                Vec::new()
            }
        }
    }

    /// Rewrites every variable read by the terminator.
    pub fn map_uses(&mut self, mut f: impl FnMut(VarId) -> VarId) {
        match self {
            Terminator::If { lhs, rhs, .. } => {
                *lhs = f(*lhs);
                *rhs = f(*rhs);
            }
            Terminator::Switch { value, .. } | Terminator::Throw(value) => *value = f(*value),
            Terminator::Return(value) => {
                if let Some(v) = value {
                    *v = f(*v);
                }
            }
            Terminator::Goto(_) | Terminator::JsrCall { .. } | Terminator::Ret { .. } => {}
        }
    }

    /// Returns `true` for `jsr` and `ret`.
    #[must_use]
    pub fn is_subroutine(&self) -> bool {
        matches!(self, Terminator::JsrCall { .. } | Terminator::Ret { .. })
    }
}

/// An exceptional successor: exceptions in `catches` thrown by the block continue at
/// `target`.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerEdge {
    /// Exception types dispatched along this edge
    pub catches: ExceptionSet,
    /// Handler entry
    pub target: BlockId,
}

/// A basic block.
///
/// The edges of a block are its terminator targets followed by its handler targets.
/// They change only through [`crate::ir::MethodGraph::set_terminator`] and
/// [`crate::ir::MethodGraph::set_handlers`], which keep predecessor lists in sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    /// Phi operations, evaluated on entry
    pub phis: Vec<OpId>,
    /// Operations in execution order
    pub ops: Vec<OpId>,
    /// Control transfer at the end of the block
    pub terminator: Terminator,
    /// Exceptional successors in dispatch order
    pub handlers: Vec<HandlerEdge>,
    /// Bytecode address of the first instruction, `None` for synthetic blocks
    pub offset: Option<u32>,
    /// Entry addresses of the subroutines the block runs in, outermost first
    pub subroutines: Vec<u32>,
    /// Set once the block has been pruned
    pub removed: bool,
}

impl Block {
    /// Creates an empty block that returns.
    #[must_use]
    pub fn new(offset: Option<u32>) -> Self {
        Block {
            phis: Vec::new(),
            ops: Vec::new(),
            terminator: Terminator::Return(None),
            handlers: Vec::new(),
            offset,
            subroutines: Vec::new(),
            removed: false,
        }
    }

    /// Returns `true` if the block has neither phis nor operations.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.phis.is_empty() && self.ops.is_empty()
    }
}

/// Call sites and return site of one `jsr` subroutine.
///
/// Exists only between the block builder and the graph assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    /// First block of the subroutine
    pub entry: BlockId,
    /// Blocks ending in a [`Terminator::JsrCall`] to `entry`
    pub calls: Vec<BlockId>,
    /// The block ending in the subroutine's [`Terminator::Ret`]
    pub ret: Option<BlockId>,
    /// Locals written between entry and return
    pub mask: BTreeSet<u16>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_targets_are_distinct() {
        let b = NodeId::new;
        let sw = Terminator::Switch {
            value: VarId::new(0),
            cases: vec![(1, b(2)), (2, b(3)), (3, b(2))],
            default: b(4),
        };
        assert_eq!(sw.targets(), vec![b(2), b(3), b(4)]);
        assert_eq!(sw.uses(), vec![VarId::new(0)]);

        let mut jsr = Terminator::JsrCall {
            target: b(5),
            ret_to: Some(b(6)),
        };
        assert_eq!(jsr.targets(), vec![b(5)]);
        jsr.map_targets(|t| NodeId::new(t.index() + 10));
        assert_eq!(
            jsr,
            Terminator::JsrCall {
                target: b(15),
                ret_to: Some(b(16))
            }
        );
    }
}
