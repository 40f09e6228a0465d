//! Bytecode verification.
//!
//! The verifier is the first stage of the pipeline. It proves that a
//! [`crate::bytecode::MethodBody`] is type-correct under the JVM rules and records,
//! for every reachable instruction, the [`Frame`] flowing into it. Later stages rely
//! on those frames: the block builder reads stack depths and value kinds from them,
//! and the graph assembler uses the subroutine information to inline `jsr`/`ret`.
//!
//! # Key Components
//!
//! - [`VerifierType`] - the verification type lattice and its merge
//! - [`Frame`] - locals, operand stack and active subroutine masks
//! - [`verify`] / [`Verifier`] - the worklist fixed point
//! - [`VerifiedMethod`] - reachable instructions with their input frames
//!
//! # Example
//!
//! ```rust
//! use classflow::bytecode::{ClassHierarchy, CodeBuilder};
//! use classflow::verifier::{verify, VerifierType};
//!
//! let mut code = CodeBuilder::new();
//! code.iload(0).ireturn();
//! let method = code.into_method("Demo", "id", "(I)I", true)?;
//!
//! let verified = verify(&method, &ClassHierarchy::with_java_lang())?;
//! assert_eq!(verified.nodes[1].frame.stack, vec![VerifierType::Int]);
//! # Ok::<(), classflow::Error>(())
//! ```

mod frame;
mod types;
mod verify;

pub(crate) use frame::shuffle;
pub use frame::{Frame, SubroutineMask};
pub use types::VerifierType;
pub use verify::{verify, InstructionNode, SubroutineInfo, VerifiedMethod, Verifier};
