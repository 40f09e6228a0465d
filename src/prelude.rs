//! # classflow Prelude
//!
//! Re-exports the types needed to decompile a method end to end. Import this module
//! to drive the pipeline without naming every stage.

// ================================================================================================
// Core Types and Error Handling
// ================================================================================================

/// The main error type for all classflow operations
pub use crate::Error;

/// The result type used throughout classflow
pub use crate::Result;

// ================================================================================================
// Input Model
// ================================================================================================

/// Method bytecode, instructions and the class hierarchy oracle
pub use crate::bytecode::{
    ClassHierarchy, ClassOracle, CodeBuilder, Cond, ExceptionHandler, FieldRef, Instruction,
    InvokeKind, MethodBody, MethodRef, TypeDesc, ValueKind,
};

// ================================================================================================
// Pipeline
// ================================================================================================

/// The pipeline driver and its configuration
pub use crate::compiler::{DecompiledMethod, Decompiler, DecompilerConfig, EventKind, EventLog};

/// The SSA graph handed to the printer
pub use crate::ir::{BlockId, Literal, MethodGraph, OpKind, Terminator, VarId, VarType};

/// The structured statement tree
pub use crate::structuring::{ExceptionSet, Statement};
