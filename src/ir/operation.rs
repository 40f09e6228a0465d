//! SSA operations.
//!
//! [`OpKind`] is the closed set of things a block can compute. Control transfers are
//! not operations; they live in the block's [`crate::ir::Terminator`]. Constants are
//! not operations either: a literal is a [`crate::ir::Variable`] without a
//! definition.
//!
//! # Outputs
//!
//! An [`Operation`] has up to three outputs:
//!
//! - `value` - the computed result
//! - `thrown` - the exception object, for operations that may throw
//! - `token` - the new ordering token, for operations that may throw or write memory
//!
//! Ordered operations take the incoming token as `inputs[0]`. Threading a token
//! through every ordered operation fixes their relative order: a pass can move or
//! delete a pure operation freely but must keep the token chain intact. Field and
//! array reads are ordered too, so a read never moves across a write.

use std::fmt;

use crate::{
    bytecode::{
        ArithOp, ArrayKind, CompareKind, FieldRef, InvokeKind, MethodRef, NarrowKind, TypeDesc,
        ValueKind,
    },
    ir::{BlockId, VarId},
};

/// Unique identifier for an operation within one [`crate::ir::MethodGraph`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(usize);

impl OpId {
    /// Creates an operation identifier from an arena index.
    #[must_use]
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Returns the underlying index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Debug for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op{}", self.0)
    }
}

/// What an operation computes.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    /// Selects `inputs[i]` when control arrives from `preds[i]`.
    Phi {
        /// Predecessor block for each input
        preds: Vec<BlockId>,
    },
    /// Binary arithmetic: `inputs = [a, b]`, plus the token first when it may throw
    Arith {
        /// Operand kind
        kind: ValueKind,
        /// Operator
        op: ArithOp,
    },
    /// Negation
    Neg(ValueKind),
    /// Primitive conversion
    Convert {
        /// Source kind
        from: ValueKind,
        /// Result kind
        to: ValueKind,
    },
    /// `int` narrowing
    Truncate(NarrowKind),
    /// Three-way comparison
    Compare(CompareKind),
    /// Instance field read: `[token, object]`
    GetField(FieldRef),
    /// Instance field write: `[token, object, value]`
    PutField(FieldRef),
    /// Static field read: `[token]`
    GetStatic(FieldRef),
    /// Static field write: `[token, value]`
    PutStatic(FieldRef),
    /// Array element read: `[token, array, index]`
    ArrayLoad(ArrayKind),
    /// Array element write: `[token, array, index, value]`
    ArrayStore(ArrayKind),
    /// `[token, array]`
    ArrayLength,
    /// `[token, receiver?, args...]`
    Invoke {
        /// Dispatch flavour
        kind: InvokeKind,
        /// Callee
        method: MethodRef,
    },
    /// Allocation of an uninitialized object: `[token]`
    New(String),
    /// One-dimensional array allocation: `[token, length]`
    NewArray(TypeDesc),
    /// Multi-dimensional array allocation: `[token, dims...]`
    MultiNewArray {
        /// Full array type
        desc: TypeDesc,
        /// Number of dimension operands
        dims: u8,
    },
    /// `[token, object]`
    CheckCast(TypeDesc),
    /// `[object]`
    InstanceOf(TypeDesc),
    /// `[token, object]`
    MonitorEnter,
    /// `[token, object]`
    MonitorExit,
}

impl OpKind {
    /// Returns `true` if the operation may raise an exception. Such operations are
    /// also ordered: they consume and produce the ordering token.
    #[must_use]
    pub fn may_throw(&self) -> bool {
        match self {
            OpKind::Arith { kind, op } => op.may_throw(*kind),
            OpKind::GetField(_)
            | OpKind::PutField(_)
            | OpKind::GetStatic(_)
            | OpKind::PutStatic(_)
            | OpKind::ArrayLoad(_)
            | OpKind::ArrayStore(_)
            | OpKind::ArrayLength
            | OpKind::Invoke { .. }
            | OpKind::New(_)
            | OpKind::NewArray(_)
            | OpKind::MultiNewArray { .. }
            | OpKind::CheckCast(_)
            | OpKind::MonitorEnter
            | OpKind::MonitorExit => true,
            OpKind::Phi { .. }
            | OpKind::Neg(_)
            | OpKind::Convert { .. }
            | OpKind::Truncate(_)
            | OpKind::Compare(_)
            | OpKind::InstanceOf(_) => false,
        }
    }

    /// Returns `true` for phis.
    #[must_use]
    pub fn is_phi(&self) -> bool {
        matches!(self, OpKind::Phi { .. })
    }
}

/// One operation in a block.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    /// What is computed
    pub kind: OpKind,
    /// Input variables; the incoming token comes first for ordered operations
    pub inputs: Vec<VarId>,
    /// Result value
    pub value: Option<VarId>,
    /// Exception object when the operation throws
    pub thrown: Option<VarId>,
    /// Outgoing ordering token
    pub token: Option<VarId>,
    /// Owning block
    pub block: BlockId,
    /// Bytecode address of the originating instruction
    pub offset: Option<u32>,
    /// Set once the operation has been deleted from its block
    pub removed: bool,
}

impl Operation {
    /// Returns `true` if the operation consumes and produces the ordering token.
    #[must_use]
    pub fn is_ordered(&self) -> bool {
        self.token.is_some()
    }

    /// All output variables.
    pub fn outputs(&self) -> impl Iterator<Item = VarId> + '_ {
        self.value.into_iter().chain(self.thrown).chain(self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throwing_kinds() {
        let div = OpKind::Arith {
            kind: ValueKind::Long,
            op: ArithOp::Rem,
        };
        let add = OpKind::Arith {
            kind: ValueKind::Int,
            op: ArithOp::Add,
        };
        assert!(div.may_throw());
        assert!(!add.may_throw());
        assert!(OpKind::ArrayLength.may_throw());
        assert!(!OpKind::Phi { preds: Vec::new() }.may_throw());
        assert!(OpKind::Phi { preds: Vec::new() }.is_phi());
    }
}
