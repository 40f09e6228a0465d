//! The bytecode input model.
//!
//! Everything the class-file collaborator provides for one method: decoded
//! [`Instruction`]s at their addresses, the exception table, the parsed method
//! descriptor and the declaring class. Subtype questions about other classes go to a
//! [`ClassOracle`], which every stage receives as an explicit read-only reference.
//!
//! # Key Components
//!
//! - [`MethodBody`] - Code, limits and exception table of one method
//! - [`Instruction`] - Closed sum type of JVM instructions with resolved operands
//! - [`TypeDesc`] / [`MethodDescriptor`] - Parsed descriptors
//! - [`ClassOracle`] / [`ClassHierarchy`] - Read-only class hierarchy queries
//! - [`CodeBuilder`] - Label-resolving bytecode builder for fixtures

mod builder;
mod descriptor;
mod instruction;
mod method;
mod oracle;

pub use builder::{CodeBuilder, Label};
pub use descriptor::{BaseType, MethodDescriptor, TypeDesc};
pub use instruction::{
    ArithOp, ArrayKind, CodeItem, CompareKind, Cond, Constant, FieldRef, Instruction, InvokeKind,
    MethodRef, NarrowKind, ValueKind,
};
pub use method::{ExceptionHandler, MethodBody};
pub use oracle::{package_of, ClassFlags, ClassHierarchy, ClassOracle, OBJECT, THROWABLE};
