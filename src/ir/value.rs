//! SSA variables and their identifiers.
//!
//! Every value a method computes is a [`Variable`] in the graph's variable arena,
//! addressed by a [`VarId`]. A variable is defined exactly once: by an operation, by
//! a phi, or by the method itself when it is a parameter or a literal. Everything
//! else refers to it by handle.

use std::fmt;

use crate::{
    bytecode::{Constant, TypeDesc, ValueKind},
    ir::OpId,
};

/// Unique identifier for an SSA variable within one [`crate::ir::MethodGraph`].
///
/// ```rust
/// use classflow::ir::VarId;
///
/// let id = VarId::new(7);
/// assert_eq!(id.index(), 7);
/// assert_eq!(id.to_string(), "v7");
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VarId(usize);

impl VarId {
    /// Creates a variable identifier from an arena index.
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

impl fmt::Debug for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Semantic type tag of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VarType {
    /// 32-bit integer, including `boolean`, `byte`, `char` and `short`
    Int,
    /// 64-bit integer
    Long,
    /// 32-bit IEEE float
    Float,
    /// 64-bit IEEE float
    Double,
    /// Any reference
    Object,
    /// The ordering token threaded through side effects
    Token,
}

impl VarType {
    /// Operand stack slots taken by a value of this type.
    #[must_use]
    pub fn width(self) -> u16 {
        match self {
            VarType::Long | VarType::Double => 2,
            _ => 1,
        }
    }

    /// Bit width for integer types.
    #[must_use]
    pub fn bits(self) -> Option<u32> {
        match self {
            VarType::Int => Some(32),
            VarType::Long => Some(64),
            _ => None,
        }
    }
}

impl From<ValueKind> for VarType {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Int => VarType::Int,
            ValueKind::Long => VarType::Long,
            ValueKind::Float => VarType::Float,
            ValueKind::Double => VarType::Double,
            ValueKind::Reference => VarType::Object,
        }
    }
}

/// A constant value carried by a variable.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// `null`
    Null,
    /// An `int` constant
    Int(i32),
    /// A `long` constant
    Long(i64),
    /// A `float` constant
    Float(f32),
    /// A `double` constant
    Double(f64),
    /// A string literal
    String(String),
    /// A class literal
    Class(TypeDesc),
}

impl Literal {
    /// Type tag of a variable holding this literal.
    #[must_use]
    pub fn var_type(&self) -> VarType {
        match self {
            Literal::Int(_) => VarType::Int,
            Literal::Long(_) => VarType::Long,
            Literal::Float(_) => VarType::Float,
            Literal::Double(_) => VarType::Double,
            Literal::Null | Literal::String(_) | Literal::Class(_) => VarType::Object,
        }
    }

    /// The value as a 64-bit integer, for `int` and `long` literals.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Literal::Int(v) => Some(i64::from(*v)),
            Literal::Long(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<&Constant> for Literal {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Null => Literal::Null,
            Constant::Int(v) => Literal::Int(*v),
            Constant::Long(v) => Literal::Long(*v),
            Constant::Float(v) => Literal::Float(*v),
            Constant::Double(v) => Literal::Double(*v),
            Constant::String(s) => Literal::String(s.clone()),
            Constant::Class(t) => Literal::Class(t.clone()),
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Null => write!(f, "null"),
            Literal::Int(v) => write!(f, "{v}"),
            Literal::Long(v) => write!(f, "{v}L"),
            Literal::Float(v) => write!(f, "{v}f"),
            Literal::Double(v) => write!(f, "{v}d"),
            Literal::String(s) => write!(f, "{s:?}"),
            Literal::Class(t) => write!(f, "{t}.class"),
        }
    }
}

/// An SSA variable.
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    /// Semantic type tag
    pub ty: VarType,
    /// Constant value, set for literals and for values folded by constraint
    /// propagation
    pub literal: Option<Literal>,
    /// Declared reference type, when known
    pub decl: Option<TypeDesc>,
    /// The defining operation. `None` for method inputs and literals.
    pub def: Option<OpId>,
}

impl Variable {
    /// Creates a variable without a definition.
    #[must_use]
    pub fn new(ty: VarType) -> Self {
        Variable {
            ty,
            literal: None,
            decl: None,
            def: None,
        }
    }

    /// Returns `true` if the variable is a constant.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.literal.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_types() {
        assert_eq!(Literal::from(&Constant::Long(3)), Literal::Long(3));
        assert_eq!(Literal::Null.var_type(), VarType::Object);
        assert_eq!(Literal::Int(-4).as_integer(), Some(-4));
        assert_eq!(Literal::Double(1.5).as_integer(), None);
        assert_eq!(Literal::Long(9).to_string(), "9L");
        assert_eq!(VarType::from(ValueKind::Double).width(), 2);
        assert_eq!(VarType::Int.bits(), Some(32));
    }
}
