// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![doc(html_no_source)]
#![deny(missing_docs)]
#![allow(clippy::too_many_arguments)]
#![deny(unsafe_code)]

//! # classflow
//!
//! The middle-end of a JVM bytecode decompiler. `classflow` takes the decoded bytecode
//! of a single method and turns it into a tree of structured statements (sequences,
//! loops, conditionals, switches and try/catch blocks) that a source printer can emit
//! directly.
//!
//! ## Pipeline
//!
//! Each stage consumes the output of the previous one and either succeeds completely
//! or returns an [`Error`]:
//!
//! 1. [`verifier`] - abstract interpretation assigning a type to every stack slot and
//!    local at every instruction, including `jsr`/`ret` subroutine masks
//! 2. [`builder`] - synthesizes typed SSA operations and basic blocks, threading an
//!    ordering token through side effects
//! 3. [`assembler`] - resolves phi inputs and inlines subroutines, leaving a plain graph
//! 4. [`constraints`] - constraint propagation over the SSA graph, folding constants
//!    and pruning dead branches
//! 5. [`structuring`] - normalizes loops, exceptions and conditionals and emits the
//!    [`structuring::Statement`] tree
//!
//! The [`compiler::Decompiler`] drives all of them for one method.
//!
//! ## Quick Start
//!
//! ```rust
//! use classflow::prelude::*;
//!
//! let mut code = CodeBuilder::new();
//! let negative = code.label();
//! code.iload(0)
//!     .if_(Cond::Lt, negative)
//!     .iconst(2)
//!     .ireturn()
//!     .bind(negative)
//!     .iconst(1)
//!     .ireturn();
//! let method = code.into_method("Demo", "sign", "(I)I", true)?;
//!
//! let oracle = ClassHierarchy::with_java_lang();
//! let decompiled = Decompiler::new(&oracle, DecompilerConfig::default()).decompile(&method)?;
//! assert!(matches!(decompiled.root, Statement::Scope { .. }));
//! # Ok::<(), classflow::Error>(())
//! ```
//!
//! ## Design
//!
//! - Instructions and operations are closed sum types matched exhaustively.
//! - Blocks, operations and variables live in per-method arenas addressed by handles.
//!   Duplication allocates new handles and never aliases.
//! - The class hierarchy is an explicit read-only [`bytecode::ClassOracle`] passed to
//!   every stage.
//! - Graph walks use explicit work stacks, so methods with thousands of blocks do
//!   not exhaust the call stack.

#[macro_use]
pub(crate) mod error;

pub mod assembler;
pub mod builder;
pub mod bytecode;
pub mod compiler;
pub mod constraints;
pub mod ir;
pub mod prelude;
pub mod structuring;
pub mod utils;
pub mod verifier;

pub use error::Error;

/// The result type used throughout `classflow`.
pub type Result<T> = std::result::Result<T, Error>;
