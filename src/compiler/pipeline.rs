//! The pipeline driver.
//!
//! [`Decompiler`] runs the stages of the middle-end over one method, in order:
//! verification, block building, graph assembly, constraint propagation and
//! structuring. Each stage either hands a well-formed result to the next or fails
//! the whole method; nothing is retried and nothing degrades.

use crate::{
    assembler::assemble,
    builder::build,
    bytecode::{ClassOracle, MethodBody},
    compiler::{DecompilerConfig, EventKind, EventLog, MethodContext},
    constraints::optimize,
    ir::{check_ssa, MethodGraph},
    structuring::{structure, Statement},
    verifier::verify,
    Result,
};

/// Everything the pipeline produced for one method.
#[derive(Debug)]
pub struct DecompiledMethod {
    /// The final graph, normalized so that `root` describes it exactly
    pub graph: MethodGraph,
    /// Root of the statement tree
    pub root: Statement,
    /// Transformations and warnings recorded on the way
    pub events: EventLog,
}

/// Decompiles methods against one class oracle and configuration.
///
/// ```rust
/// use classflow::bytecode::{ClassHierarchy, CodeBuilder};
/// use classflow::compiler::{Decompiler, DecompilerConfig};
/// use classflow::structuring::Statement;
///
/// let mut code = CodeBuilder::new();
/// code.iconst(1).ireturn();
/// let method = code.into_method("Demo", "one", "()I", true)?;
///
/// let oracle = ClassHierarchy::with_java_lang();
/// let result = Decompiler::new(&oracle, DecompilerConfig::default()).decompile(&method)?;
/// assert_eq!(result.root.iter().filter(|s| matches!(s, Statement::Block(_))).count(), 1);
/// # Ok::<(), classflow::Error>(())
/// ```
pub struct Decompiler<'o> {
    oracle: &'o dyn ClassOracle,
    config: DecompilerConfig,
}

impl<'o> Decompiler<'o> {
    /// Creates a driver answering hierarchy queries from `oracle`.
    pub fn new(oracle: &'o dyn ClassOracle, config: DecompilerConfig) -> Self {
        Self { oracle, config }
    }

    /// The limits this driver runs with.
    #[must_use]
    pub fn config(&self) -> &DecompilerConfig {
        &self.config
    }

    /// Runs every stage over `method`.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Verification`] for malformed or ill-typed bytecode
    /// - [`crate::Error::Unsupported`] when subroutine or loop duplication exceeds
    ///   the configured limits
    /// - [`crate::Error::InternalConsistency`] when a stage breaks an invariant of
    ///   the graph it hands on
    pub fn decompile(&self, method: &MethodBody) -> Result<DecompiledMethod> {
        let ctx = MethodContext::new(self.oracle, &self.config, method.display_name());
        log::debug!("decompiling {}", ctx.method);

        let verified = stage(&ctx, "verifier", || verify(method, self.oracle))?;
        for (entry, info) in &verified.subroutines {
            ctx.record(
                EventKind::SubroutineInlined,
                "assembler",
                *entry as usize,
                format!("subroutine at {} called from {} sites", entry, info.calls.len()),
            );
        }

        let raw = stage(&ctx, "builder", || build(method, &verified))?;
        let mut graph = stage(&ctx, "assembler", || {
            assemble(raw, self.config.max_subroutine_copies)
        })?;
        if self.config.check_ssa {
            check_ssa(&graph)?;
        }

        let non_null: Vec<_> = if method.is_static {
            Vec::new()
        } else {
            graph.inputs().first().copied().into_iter().collect()
        };
        stage(&ctx, "constraints", || optimize(&mut graph, &ctx, &non_null))?;

        let root = stage(&ctx, "structuring", || structure(&mut graph, &ctx))?;
        log::debug!("{}: {}", ctx.method, ctx.events.summary());

        let MethodContext { events, .. } = ctx;
        Ok(DecompiledMethod {
            graph,
            root,
            events,
        })
    }
}

/// Runs one stage between its start and completion events.
fn stage<T>(ctx: &MethodContext<'_>, name: &str, run: impl FnOnce() -> Result<T>) -> Result<T> {
    ctx.record(EventKind::StageStarted, name, 0, name);
    log::trace!("{}: {} started", ctx.method, name);
    match run() {
        Ok(value) => {
            ctx.record(EventKind::StageCompleted, name, 0, name);
            Ok(value)
        }
        Err(e) => {
            log::debug!("{}: {} failed: {}", ctx.method, name, e);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, CodeBuilder, Cond, Instruction},
        Error,
    };

    #[test]
    fn test_stages_are_recorded_in_order() {
        let mut code = CodeBuilder::new();
        let zero = code.label();
        code.iload(0)
            .if_(Cond::Eq, zero)
            .iconst(1)
            .ireturn()
            .bind(zero)
            .iconst(0)
            .ireturn();
        let method = code.into_method("T", "f", "(I)I", true).unwrap();

        let oracle = ClassHierarchy::with_java_lang();
        let result = Decompiler::new(&oracle, DecompilerConfig::default())
            .decompile(&method)
            .unwrap();

        let stages: Vec<_> = result
            .events
            .filter_kind(EventKind::StageCompleted)
            .filter_map(|e| e.stage.clone())
            .collect();
        assert_eq!(
            stages,
            ["verifier", "builder", "assembler", "constraints", "structuring"]
        );
        assert!(result
            .root
            .iter()
            .any(|s| matches!(s, Statement::If { .. })));
    }

    #[test]
    fn test_verification_error_stops_the_pipeline() {
        // falls off the end of the code
        let mut code = CodeBuilder::new();
        code.iconst(1).insn(Instruction::Pop);
        let method = code.into_method("T", "g", "()V", true).unwrap();

        let oracle = ClassHierarchy::with_java_lang();
        let err = Decompiler::new(&oracle, DecompilerConfig::default())
            .decompile(&method)
            .unwrap_err();
        assert!(matches!(err, Error::Verification { .. }));
    }
}
