//! Decoded JVM instructions.
//!
//! The class-file collaborator hands over each method as a list of [`CodeItem`]s: an
//! address and an already-decoded [`Instruction`] whose constant-pool operands have
//! been resolved into descriptors. Opcode families that differ only in the value type
//! (`iload`/`lload`/`aload`, `iadd`/`ladd`, ...) are folded into one variant carrying a
//! [`ValueKind`], and short forms (`iload_0`, `iconst_1`, `goto_w`, ...) are folded into
//! their general form. `tableswitch` and `lookupswitch` become one [`Instruction::Switch`].
//!
//! Every pass matches on these variants exhaustively, so a new opcode is a new variant
//! and the compiler points out every place that has to handle it.

use std::fmt;

use crate::{
    bytecode::{MethodDescriptor, TypeDesc},
    Result,
};

/// The computational type an instruction operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// `int` and everything narrower
    Int,
    /// `long`
    Long,
    /// `float`
    Float,
    /// `double`
    Double,
    /// Any reference
    Reference,
}

impl ValueKind {
    /// Local variable slots taken by a value of this kind.
    #[must_use]
    pub fn width(self) -> u16 {
        match self {
            ValueKind::Long | ValueKind::Double => 2,
            _ => 1,
        }
    }

    fn prefix(self) -> char {
        match self {
            ValueKind::Int => 'i',
            ValueKind::Long => 'l',
            ValueKind::Float => 'f',
            ValueKind::Double => 'd',
            ValueKind::Reference => 'a',
        }
    }
}

/// Element type of an array load or store.
///
/// `Byte` is shared by `byte[]` and `boolean[]`, as `baload`/`bastore` are.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArrayKind {
    /// `iaload` / `iastore`
    Int,
    /// `laload` / `lastore`
    Long,
    /// `faload` / `fastore`
    Float,
    /// `daload` / `dastore`
    Double,
    /// `aaload` / `aastore`
    Reference,
    /// `baload` / `bastore`
    Byte,
    /// `caload` / `castore`
    Char,
    /// `saload` / `sastore`
    Short,
}

impl ArrayKind {
    /// The kind of the value loaded or stored.
    #[must_use]
    pub fn value_kind(self) -> ValueKind {
        match self {
            ArrayKind::Long => ValueKind::Long,
            ArrayKind::Float => ValueKind::Float,
            ArrayKind::Double => ValueKind::Double,
            ArrayKind::Reference => ValueKind::Reference,
            ArrayKind::Int | ArrayKind::Byte | ArrayKind::Char | ArrayKind::Short => {
                ValueKind::Int
            }
        }
    }

    fn prefix(self) -> char {
        match self {
            ArrayKind::Int => 'i',
            ArrayKind::Long => 'l',
            ArrayKind::Float => 'f',
            ArrayKind::Double => 'd',
            ArrayKind::Reference => 'a',
            ArrayKind::Byte => 'b',
            ArrayKind::Char => 'c',
            ArrayKind::Short => 's',
        }
    }
}

/// Binary arithmetic and bitwise operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Rem,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    Ushr,
    /// `&`
    And,
    /// `|`
    Or,
    /// `^`
    Xor,
}

impl ArithOp {
    /// Returns `true` for shifts, whose right operand is always an `int`.
    #[must_use]
    pub fn is_shift(self) -> bool {
        matches!(self, ArithOp::Shl | ArithOp::Shr | ArithOp::Ushr)
    }

    /// Returns `true` if the operator can raise `ArithmeticException` for `kind`.
    #[must_use]
    pub fn may_throw(self, kind: ValueKind) -> bool {
        matches!(self, ArithOp::Div | ArithOp::Rem) && matches!(kind, ValueKind::Int | ValueKind::Long)
    }

    fn mnemonic(self) -> &'static str {
        match self {
            ArithOp::Add => "add",
            ArithOp::Sub => "sub",
            ArithOp::Mul => "mul",
            ArithOp::Div => "div",
            ArithOp::Rem => "rem",
            ArithOp::Shl => "shl",
            ArithOp::Shr => "shr",
            ArithOp::Ushr => "ushr",
            ArithOp::And => "and",
            ArithOp::Or => "or",
            ArithOp::Xor => "xor",
        }
    }
}

/// Narrowing conversions from `int` (`i2b`, `i2c`, `i2s`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NarrowKind {
    /// `i2b`
    Byte,
    /// `i2c`
    Char,
    /// `i2s`
    Short,
}

/// Three-way comparisons producing -1, 0 or 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareKind {
    /// `lcmp`
    Long,
    /// `fcmpl`, NaN compares as -1
    FloatL,
    /// `fcmpg`, NaN compares as 1
    FloatG,
    /// `dcmpl`
    DoubleL,
    /// `dcmpg`
    DoubleG,
}

impl CompareKind {
    /// Kind of both operands.
    #[must_use]
    pub fn operand_kind(self) -> ValueKind {
        match self {
            CompareKind::Long => ValueKind::Long,
            CompareKind::FloatL | CompareKind::FloatG => ValueKind::Float,
            CompareKind::DoubleL | CompareKind::DoubleG => ValueKind::Double,
        }
    }
}

/// Branch conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>=`
    Ge,
    /// `>`
    Gt,
    /// `<=`
    Le,
}

impl Cond {
    /// The condition that holds exactly when `self` does not.
    #[must_use]
    pub fn negate(self) -> Self {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::Lt => Cond::Ge,
            Cond::Ge => Cond::Lt,
            Cond::Gt => Cond::Le,
            Cond::Le => Cond::Gt,
        }
    }

    /// The condition with its operands exchanged (`a < b` iff `b > a`).
    #[must_use]
    pub fn swap(self) -> Self {
        match self {
            Cond::Eq => Cond::Eq,
            Cond::Ne => Cond::Ne,
            Cond::Lt => Cond::Gt,
            Cond::Ge => Cond::Le,
            Cond::Gt => Cond::Lt,
            Cond::Le => Cond::Ge,
        }
    }

    /// Evaluates the condition on two concrete integers.
    #[must_use]
    pub fn holds(self, lhs: i64, rhs: i64) -> bool {
        match self {
            Cond::Eq => lhs == rhs,
            Cond::Ne => lhs != rhs,
            Cond::Lt => lhs < rhs,
            Cond::Ge => lhs >= rhs,
            Cond::Gt => lhs > rhs,
            Cond::Le => lhs <= rhs,
        }
    }

    fn mnemonic(self) -> &'static str {
        match self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Ge => "ge",
            Cond::Gt => "gt",
            Cond::Le => "le",
        }
    }
}

/// Method invocation flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvokeKind {
    /// `invokevirtual`
    Virtual,
    /// `invokespecial`, used for constructors, private and `super` calls
    Special,
    /// `invokestatic`
    Static,
    /// `invokeinterface`
    Interface,
}

/// A constant pushed by `aconst_null`, `iconst_*`, `bipush`, `sipush` or `ldc*`.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// `aconst_null`
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

impl Constant {
    /// Kind of the pushed value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Constant::Int(_) => ValueKind::Int,
            Constant::Long(_) => ValueKind::Long,
            Constant::Float(_) => ValueKind::Float,
            Constant::Double(_) => ValueKind::Double,
            Constant::Null | Constant::String(_) | Constant::Class(_) => ValueKind::Reference,
        }
    }
}

/// A resolved field reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldRef {
    /// Declaring class
    pub class: String,
    /// Field name
    pub name: String,
    /// Field type
    pub desc: TypeDesc,
    /// Whether the field is declared `protected`
    pub protected: bool,
}

impl FieldRef {
    /// Creates a field reference from a descriptor string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Descriptor`] if `desc` does not parse.
    pub fn new(class: &str, name: &str, desc: &str) -> Result<Self> {
        Ok(FieldRef {
            class: class.to_string(),
            name: name.to_string(),
            desc: TypeDesc::parse(desc)?,
            protected: false,
        })
    }

    /// Marks the field as `protected`.
    #[must_use]
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }
}

/// A resolved method reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodRef {
    /// Declaring class
    pub class: String,
    /// Method name
    pub name: String,
    /// Method descriptor
    pub desc: MethodDescriptor,
    /// Whether the method is declared `protected`
    pub protected: bool,
}

impl MethodRef {
    /// Creates a method reference from a descriptor string.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Descriptor`] if `desc` does not parse.
    pub fn new(class: &str, name: &str, desc: &str) -> Result<Self> {
        Ok(MethodRef {
            class: class.to_string(),
            name: name.to_string(),
            desc: MethodDescriptor::parse(desc)?,
            protected: false,
        })
    }

    /// Marks the method as `protected`.
    #[must_use]
    pub fn protected(mut self) -> Self {
        self.protected = true;
        self
    }

    /// Returns `true` for instance initializers.
    #[must_use]
    pub fn is_init(&self) -> bool {
        self.name == "<init>"
    }
}

/// One decoded instruction.
///
/// Branch targets are absolute bytecode addresses.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    /// `nop`
    Nop,
    /// Push a constant
    Const(Constant),
    /// Push local variable `n`
    Load(ValueKind, u16),
    /// Pop into local variable `n`
    Store(ValueKind, u16),
    /// `iinc n, delta`
    Iinc(u16, i32),
    /// `xaload`
    ArrayLoad(ArrayKind),
    /// `xastore`
    ArrayStore(ArrayKind),
    /// `pop`
    Pop,
    /// `pop2`
    Pop2,
    /// `dup`
    Dup,
    /// `dup_x1`
    DupX1,
    /// `dup_x2`
    DupX2,
    /// `dup2`
    Dup2,
    /// `dup2_x1`
    Dup2X1,
    /// `dup2_x2`
    Dup2X2,
    /// `swap`
    Swap,
    /// Binary arithmetic on two values of the given kind
    Arith(ValueKind, ArithOp),
    /// `xneg`
    Neg(ValueKind),
    /// `x2y` widening or narrowing between computational types
    Convert(ValueKind, ValueKind),
    /// `i2b`, `i2c`, `i2s`
    Truncate(NarrowKind),
    /// `lcmp`, `fcmpl`, `fcmpg`, `dcmpl`, `dcmpg`
    Compare(CompareKind),
    /// `ifxx`: compare an `int` against zero
    If(Cond, u32),
    /// `if_icmpxx`
    IfCmp(Cond, u32),
    /// `if_acmpeq` (`equal`) or `if_acmpne`
    IfRef {
        /// Branch when the references are identical
        equal: bool,
        /// Branch target
        target: u32,
    },
    /// `ifnull` (`null`) or `ifnonnull`
    IfNull {
        /// Branch when the reference is null
        null: bool,
        /// Branch target
        target: u32,
    },
    /// `goto`
    Goto(u32),
    /// `jsr`
    Jsr(u32),
    /// `ret n`
    Ret(u16),
    /// `tableswitch` or `lookupswitch`
    Switch {
        /// Key and target for each explicit case
        cases: Vec<(i32, u32)>,
        /// Target when no case matches
        default: u32,
    },
    /// `xreturn`, or `return` when `None`
    Return(Option<ValueKind>),
    /// `getstatic`
    GetStatic(FieldRef),
    /// `putstatic`
    PutStatic(FieldRef),
    /// `getfield`
    GetField(FieldRef),
    /// `putfield`
    PutField(FieldRef),
    /// `invokevirtual`, `invokespecial`, `invokestatic`, `invokeinterface`
    Invoke(InvokeKind, MethodRef),
    /// `new`
    New(String),
    /// `newarray` or `anewarray` with the element type
    NewArray(TypeDesc),
    /// `multianewarray` with the full array type and the dimension count
    MultiNewArray(TypeDesc, u8),
    /// `arraylength`
    ArrayLength,
    /// `athrow`
    Throw,
    /// `checkcast`
    CheckCast(TypeDesc),
    /// `instanceof`
    InstanceOf(TypeDesc),
    /// `monitorenter`
    MonitorEnter,
    /// `monitorexit`
    MonitorExit,
}

impl Instruction {
    /// Explicit branch targets, excluding fall-through.
    ///
    /// For `jsr` this is the subroutine entry.
    #[must_use]
    pub fn branch_targets(&self) -> Vec<u32> {
        match self {
            Instruction::If(_, target)
            | Instruction::IfCmp(_, target)
            | Instruction::IfRef { target, .. }
            | Instruction::IfNull { target, .. }
            | Instruction::Goto(target)
            | Instruction::Jsr(target) => vec![*target],
            Instruction::Switch { cases, default } => {
                let mut targets: Vec<u32> = cases.iter().map(|(_, t)| *t).collect();
                targets.push(*default);
                targets
            }
            _ => Vec::new(),
        }
    }

    /// Returns `true` if control can continue at the next instruction.
    ///
    /// `jsr` returns `false`: control reaches the next instruction only through the
    /// subroutine's `ret`.
    #[must_use]
    pub fn falls_through(&self) -> bool {
        !matches!(
            self,
            Instruction::Goto(_)
                | Instruction::Jsr(_)
                | Instruction::Ret(_)
                | Instruction::Switch { .. }
                | Instruction::Return(_)
                | Instruction::Throw
        )
    }

    /// Returns `true` if the instruction ends a basic block.
    #[must_use]
    pub fn is_block_end(&self) -> bool {
        !self.falls_through() || !self.branch_targets().is_empty()
    }

    /// Returns `true` if the instruction can raise an exception.
    #[must_use]
    pub fn may_throw(&self) -> bool {
        match self {
            Instruction::Arith(kind, op) => op.may_throw(*kind),
            Instruction::ArrayLoad(_)
            | Instruction::ArrayStore(_)
            | Instruction::GetStatic(_)
            | Instruction::PutStatic(_)
            | Instruction::GetField(_)
            | Instruction::PutField(_)
            | Instruction::Invoke(..)
            | Instruction::New(_)
            | Instruction::NewArray(_)
            | Instruction::MultiNewArray(..)
            | Instruction::ArrayLength
            | Instruction::Throw
            | Instruction::CheckCast(_)
            | Instruction::MonitorEnter
            | Instruction::MonitorExit => true,
            Instruction::Nop
            | Instruction::Const(_)
            | Instruction::Load(..)
            | Instruction::Store(..)
            | Instruction::Iinc(..)
            | Instruction::Pop
            | Instruction::Pop2
            | Instruction::Dup
            | Instruction::DupX1
            | Instruction::DupX2
            | Instruction::Dup2
            | Instruction::Dup2X1
            | Instruction::Dup2X2
            | Instruction::Swap
            | Instruction::Neg(_)
            | Instruction::Convert(..)
            | Instruction::Truncate(_)
            | Instruction::Compare(_)
            | Instruction::If(..)
            | Instruction::IfCmp(..)
            | Instruction::IfRef { .. }
            | Instruction::IfNull { .. }
            | Instruction::Goto(_)
            | Instruction::Jsr(_)
            | Instruction::Ret(_)
            | Instruction::Switch { .. }
            | Instruction::Return(_)
            | Instruction::InstanceOf(_) => false,
        }
    }

    /// Rewrites every branch target through `f`.
    ///
    /// # Errors
    ///
    /// Propagates the first error returned by `f`.
    pub fn map_targets<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(u32) -> Result<u32>,
    {
        match self {
            Instruction::If(_, target)
            | Instruction::IfCmp(_, target)
            | Instruction::IfRef { target, .. }
            | Instruction::IfNull { target, .. }
            | Instruction::Goto(target)
            | Instruction::Jsr(target) => *target = f(*target)?,
            Instruction::Switch { cases, default } => {
                for (_, target) in cases.iter_mut() {
                    *target = f(*target)?;
                }
                *default = f(*default)?;
            }
            _ => {}
        }
        Ok(())
    }

    /// Encoded length in bytes, ignoring `wide` prefixes and switch padding.
    #[must_use]
    pub fn encoded_len(&self) -> u32 {
        match self {
            Instruction::Load(_, n) | Instruction::Store(_, n) => {
                if *n < 4 {
                    1
                } else {
                    2
                }
            }
            Instruction::Const(Constant::Int(v)) => match *v {
                -1..=5 => 1,
                -128..=127 => 2,
                _ => 3,
            },
            Instruction::Const(Constant::Null) => 1,
            Instruction::Const(Constant::Long(0 | 1)) => 1,
            Instruction::Const(Constant::Long(_) | Constant::Double(_)) => 3,
            Instruction::Const(_) => 2,
            Instruction::Ret(_) | Instruction::NewArray(TypeDesc::Base(_)) => 2,
            Instruction::Iinc(..)
            | Instruction::If(..)
            | Instruction::IfCmp(..)
            | Instruction::IfRef { .. }
            | Instruction::IfNull { .. }
            | Instruction::Goto(_)
            | Instruction::Jsr(_)
            | Instruction::GetStatic(_)
            | Instruction::PutStatic(_)
            | Instruction::GetField(_)
            | Instruction::PutField(_)
            | Instruction::New(_)
            | Instruction::NewArray(_)
            | Instruction::CheckCast(_)
            | Instruction::InstanceOf(_) => 3,
            Instruction::Invoke(InvokeKind::Interface, _) => 5,
            Instruction::Invoke(..) => 3,
            Instruction::MultiNewArray(..) => 4,
            Instruction::Switch { cases, .. } => 8 + 8 * cases.len() as u32,
            _ => 1,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Nop => write!(f, "nop"),
            Instruction::Const(c) => write!(f, "ldc {c:?}"),
            Instruction::Load(k, n) => write!(f, "{}load {n}", k.prefix()),
            Instruction::Store(k, n) => write!(f, "{}store {n}", k.prefix()),
            Instruction::Iinc(n, d) => write!(f, "iinc {n} {d}"),
            Instruction::ArrayLoad(k) => write!(f, "{}aload", k.prefix()),
            Instruction::ArrayStore(k) => write!(f, "{}astore", k.prefix()),
            Instruction::Pop => write!(f, "pop"),
            Instruction::Pop2 => write!(f, "pop2"),
            Instruction::Dup => write!(f, "dup"),
            Instruction::DupX1 => write!(f, "dup_x1"),
            Instruction::DupX2 => write!(f, "dup_x2"),
            Instruction::Dup2 => write!(f, "dup2"),
            Instruction::Dup2X1 => write!(f, "dup2_x1"),
            Instruction::Dup2X2 => write!(f, "dup2_x2"),
            Instruction::Swap => write!(f, "swap"),
            Instruction::Arith(k, op) => write!(f, "{}{}", k.prefix(), op.mnemonic()),
            Instruction::Neg(k) => write!(f, "{}neg", k.prefix()),
            Instruction::Convert(a, b) => write!(f, "{}2{}", a.prefix(), b.prefix()),
            Instruction::Truncate(NarrowKind::Byte) => write!(f, "i2b"),
            Instruction::Truncate(NarrowKind::Char) => write!(f, "i2c"),
            Instruction::Truncate(NarrowKind::Short) => write!(f, "i2s"),
            Instruction::Compare(CompareKind::Long) => write!(f, "lcmp"),
            Instruction::Compare(CompareKind::FloatL) => write!(f, "fcmpl"),
            Instruction::Compare(CompareKind::FloatG) => write!(f, "fcmpg"),
            Instruction::Compare(CompareKind::DoubleL) => write!(f, "dcmpl"),
            Instruction::Compare(CompareKind::DoubleG) => write!(f, "dcmpg"),
            Instruction::If(c, t) => write!(f, "if{} {t}", c.mnemonic()),
            Instruction::IfCmp(c, t) => write!(f, "if_icmp{} {t}", c.mnemonic()),
            Instruction::IfRef { equal, target } => {
                write!(f, "if_acmp{} {target}", if *equal { "eq" } else { "ne" })
            }
            Instruction::IfNull { null, target } => {
                write!(f, "if{} {target}", if *null { "null" } else { "nonnull" })
            }
            Instruction::Goto(t) => write!(f, "goto {t}"),
            Instruction::Jsr(t) => write!(f, "jsr {t}"),
            Instruction::Ret(n) => write!(f, "ret {n}"),
            Instruction::Switch { cases, default } => {
                write!(f, "switch {} cases default {default}", cases.len())
            }
            Instruction::Return(None) => write!(f, "return"),
            Instruction::Return(Some(k)) => write!(f, "{}return", k.prefix()),
            Instruction::GetStatic(r) => write!(f, "getstatic {}.{}", r.class, r.name),
            Instruction::PutStatic(r) => write!(f, "putstatic {}.{}", r.class, r.name),
            Instruction::GetField(r) => write!(f, "getfield {}.{}", r.class, r.name),
            Instruction::PutField(r) => write!(f, "putfield {}.{}", r.class, r.name),
            Instruction::Invoke(kind, m) => {
                let name = match kind {
                    InvokeKind::Virtual => "invokevirtual",
                    InvokeKind::Special => "invokespecial",
                    InvokeKind::Static => "invokestatic",
                    InvokeKind::Interface => "invokeinterface",
                };
                write!(f, "{name} {}.{}{}", m.class, m.name, m.desc)
            }
            Instruction::New(c) => write!(f, "new {c}"),
            Instruction::NewArray(t) => write!(f, "newarray {t}"),
            Instruction::MultiNewArray(t, d) => write!(f, "multianewarray {t} {d}"),
            Instruction::ArrayLength => write!(f, "arraylength"),
            Instruction::Throw => write!(f, "athrow"),
            Instruction::CheckCast(t) => write!(f, "checkcast {t}"),
            Instruction::InstanceOf(t) => write!(f, "instanceof {t}"),
            Instruction::MonitorEnter => write!(f, "monitorenter"),
            Instruction::MonitorExit => write!(f, "monitorexit"),
        }
    }
}

/// An instruction at its bytecode address.
#[derive(Debug, Clone, PartialEq)]
pub struct CodeItem {
    /// Bytecode address
    pub offset: u32,
    /// The decoded instruction
    pub insn: Instruction,
}
