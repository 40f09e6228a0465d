//! Block builder: verified bytecode to an SSA graph with unresolved phis.
//!
//! The builder walks every basic block once, replaying its instructions on a
//! symbolic frame of SSA variables (see [`translate`](self)). Values flowing into a
//! block arrive through placeholder phis, one per live local, stack entry and the
//! ordering token, typed from the verifier's input frame. Their inputs cannot be
//! filled in yet: across a `ret` the value of a local depends on which call site
//! the subroutine returns to, which is only decided when the graph assembler
//! inlines the subroutine. The builder therefore records each block's exit state
//! and leaves phi resolution to [`crate::assembler`].
//!
//! # Block shape
//!
//! - Blocks follow the verifier's instruction order; see [`layout`](self) for where
//!   they split.
//! - A covered instruction that may throw is always the last one in its block, so a
//!   block's handler edges belong to exactly one operation.
//! - When address 0 has predecessors, a synthetic entry block holds the method
//!   inputs and jumps to it, so the entry never has incoming edges.
//! - When a handler entry is also a normal successor of the same block, the handler
//!   edge goes through a trampoline block, so every edge carries exactly one state.
//!
//! # Example
//!
//! ```rust
//! use classflow::bytecode::{ClassHierarchy, CodeBuilder, Cond};
//! use classflow::builder::build;
//! use classflow::verifier::verify;
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
//! let verified = verify(&method, &ClassHierarchy::with_java_lang())?;
//!
//! let raw = build(&method, &verified)?;
//! assert_eq!(raw.graph.block_count(), 3);
//! # Ok::<(), classflow::Error>(())
//! ```

mod layout;
mod translate;

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    bytecode::{MethodBody, TypeDesc},
    builder::{
        layout::partition,
        translate::{desc_type, Exit, PendingJump, Translator},
    },
    ir::{BlockId, HandlerEdge, MethodGraph, OpId, Procedure, Terminator, VarId, VarType},
    structuring::ExceptionSet,
    verifier::{InstructionNode, VerifiedMethod, VerifierType},
    Result,
};

/// Where a placeholder phi takes its value from in a predecessor's exit state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Local variable `n`
    Local(u16),
    /// Operand stack entry `n`, counted from the bottom
    Stack(usize),
    /// The ordering token
    Token,
}

/// Symbolic frame at the end of a block.
///
/// `None` marks slots without an SSA value: return addresses, the upper half of a
/// `long` or `double` local, and locals never written.
#[derive(Debug, Clone, PartialEq)]
pub struct ExitState {
    /// One entry per local slot
    pub locals: Vec<Option<VarId>>,
    /// One entry per stack value, bottom first
    pub stack: Vec<Option<VarId>>,
    /// Current ordering token
    pub token: VarId,
    /// Exception raised by the block's last operation, for handler edges
    pub thrown: Option<VarId>,
}

impl ExitState {
    /// The value `slot` holds in this state.
    #[must_use]
    pub fn get(&self, slot: Slot) -> Option<VarId> {
        match slot {
            Slot::Local(n) => self.locals.get(usize::from(n)).copied().flatten(),
            Slot::Stack(n) => self.stack.get(n).copied().flatten(),
            Slot::Token => Some(self.token),
        }
    }

    /// The state seen by a handler: same locals and token, the exception alone on the
    /// stack.
    #[must_use]
    pub fn exceptional(&self, thrown: VarId) -> ExitState {
        ExitState {
            locals: self.locals.clone(),
            stack: vec![Some(thrown)],
            token: self.token,
            thrown: Some(thrown),
        }
    }
}

/// Output of the block builder.
#[derive(Debug, Clone)]
pub struct RawGraph {
    /// The graph. Its phis have no inputs yet and its subroutines are not inlined.
    pub graph: MethodGraph,
    /// Exit state of every block
    pub(crate) exits: BTreeMap<BlockId, ExitState>,
    /// Placeholder phis of every block and the slot each one merges
    pub(crate) pending: BTreeMap<BlockId, Vec<(OpId, Slot)>>,
}

impl RawGraph {
    /// Exit state of `block`.
    #[must_use]
    pub fn exit(&self, block: BlockId) -> Option<&ExitState> {
        self.exits.get(&block)
    }

    /// Placeholder phis of `block`.
    #[must_use]
    pub fn pending(&self, block: BlockId) -> &[(OpId, Slot)] {
        self.pending.get(&block).map_or(&[], Vec::as_slice)
    }
}

/// Builds the SSA graph of a verified method.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] when the verified instructions do
/// not replay consistently, which means the verifier and the builder disagree.
pub fn build(method: &MethodBody, verified: &VerifiedMethod) -> Result<RawGraph> {
    Builder::new(method, verified).run()
}

struct Builder<'a> {
    method: &'a MethodBody,
    verified: &'a VerifiedMethod,
    graph: MethodGraph,
    /// Block starting at each address
    block_of: BTreeMap<u32, BlockId>,
    /// Block containing each node
    node_block: Vec<BlockId>,
    exits: BTreeMap<BlockId, ExitState>,
    pending: BTreeMap<BlockId, Vec<(OpId, Slot)>>,
}

impl<'a> Builder<'a> {
    fn new(method: &'a MethodBody, verified: &'a VerifiedMethod) -> Self {
        Builder {
            method,
            verified,
            graph: MethodGraph::new(method.display_name()),
            block_of: BTreeMap::new(),
            node_block: Vec::new(),
            exits: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    fn run(mut self) -> Result<RawGraph> {
        let verified = self.verified;
        let nodes = &verified.nodes;
        let spans = partition(verified);
        let Some(first) = nodes.first() else {
            return Err(consistency_error!(
                "verified method {} has no instructions",
                self.method.display_name()
            ));
        };
        let first_offset = first.offset;

        let entry_has_preds = nodes.iter().any(|n| n.successors.contains(&first_offset))
            || verified.handlers.iter().any(|h| h.handler == first_offset);
        let synthetic = entry_has_preds.then(|| self.graph.add_block(None));

        self.node_block = Vec::with_capacity(nodes.len());
        for span in &spans {
            let block = self.graph.add_block(Some(nodes[span.first].offset));
            self.block_of.insert(nodes[span.first].offset, block);
            self.node_block.extend(std::iter::repeat(block).take(span.last - span.first + 1));
            self.graph.block_mut(block).subroutines = nodes[span.first]
                .frame
                .subroutines
                .iter()
                .map(|m| m.entry)
                .collect();
        }

        let initial = self.initial_state();
        let entry = match synthetic {
            Some(entry) => {
                self.exits.insert(entry, initial.clone());
                entry
            }
            None => self.block_at(first_offset)?,
        };
        self.graph.set_entry(entry);
        if let Some(entry) = synthetic {
            let target = self.block_at(first_offset)?;
            self.graph.set_terminator(entry, Terminator::Goto(target));
        }

        for span in &spans {
            let block = self.block_at(nodes[span.first].offset)?;
            let state = if block == entry {
                initial.clone()
            } else {
                self.placeholders(block, &nodes[span.first])?
            };
            self.translate(block, &nodes[span.first..=span.last], span.last, state)?;
        }

        self.record_procedures()?;
        self.prune();

        log::debug!(
            "built {}: {} blocks, {} variables, {} subroutines",
            self.method.display_name(),
            self.graph.block_count(),
            self.graph.var_count(),
            self.graph.procedures().len()
        );

        Ok(RawGraph {
            graph: self.graph,
            exits: self.exits,
            pending: self.pending,
        })
    }

    fn block_at(&self, offset: u32) -> Result<BlockId> {
        self.block_of
            .get(&offset)
            .copied()
            .ok_or_else(|| consistency_error!("no block starts at {}", offset))
    }

    /// `this`, the parameters and the initial token.
    fn initial_state(&mut self) -> ExitState {
        let method = self.method;
        let mut locals = vec![None; usize::from(self.verified.max_locals)];
        let mut slot = 0usize;

        if !method.is_static {
            let this = self
                .graph
                .add_input(VarType::Object, Some(TypeDesc::object(method.class_name.clone())));
            if let Some(local) = locals.get_mut(0) {
                *local = Some(this);
            }
            slot = 1;
        }
        for param in &method.descriptor.params {
            let ty = desc_type(param);
            let decl = param.is_reference().then(|| param.clone());
            let var = self.graph.add_input(ty, decl);
            if let Some(local) = locals.get_mut(slot) {
                *local = Some(var);
            }
            slot += usize::from(param.width());
        }
        let token = self.graph.add_input(VarType::Token, None);

        ExitState {
            locals,
            stack: Vec::new(),
            token,
            thrown: None,
        }
    }

    /// Creates one placeholder phi per live slot of the block's input frame.
    fn placeholders(&mut self, block: BlockId, node: &InstructionNode) -> Result<ExitState> {
        let mut pending = Vec::new();
        let mut locals = vec![None; usize::from(self.verified.max_locals)];
        for (index, ty) in node.frame.locals.iter().enumerate() {
            if let Some((var_type, decl)) = self.phi_type(ty) {
                let (op, var) = self.graph.add_phi(block, var_type);
                self.graph.var_mut(var).decl = decl;
                let slot = u16::try_from(index)
                    .map_err(|_| consistency_error!("local index {} out of range", index))?;
                pending.push((op, Slot::Local(slot)));
                if let Some(local) = locals.get_mut(index) {
                    *local = Some(var);
                }
            }
        }

        let mut stack = Vec::with_capacity(node.frame.stack.len());
        for (index, ty) in node.frame.stack.iter().enumerate() {
            match self.phi_type(ty) {
                Some((var_type, decl)) => {
                    let (op, var) = self.graph.add_phi(block, var_type);
                    self.graph.var_mut(var).decl = decl;
                    pending.push((op, Slot::Stack(index)));
                    stack.push(Some(var));
                }
                None => stack.push(None),
            }
        }

        let (token_op, token) = self.graph.add_phi(block, VarType::Token);
        pending.push((token_op, Slot::Token));
        self.pending.insert(block, pending);

        Ok(ExitState {
            locals,
            stack,
            token,
            thrown: None,
        })
    }

    fn phi_type(&self, ty: &VerifierType) -> Option<(VarType, Option<TypeDesc>)> {
        match ty {
            VerifierType::Int
            | VerifierType::Byte
            | VerifierType::Short
            | VerifierType::Char
            | VerifierType::Boolean => Some((VarType::Int, None)),
            VerifierType::Long => Some((VarType::Long, None)),
            VerifierType::Float => Some((VarType::Float, None)),
            VerifierType::Double => Some((VarType::Double, None)),
            VerifierType::Reference(desc) => Some((VarType::Object, Some(desc.clone()))),
            VerifierType::Null | VerifierType::UninitNew(_) => Some((VarType::Object, None)),
            VerifierType::UninitThis => Some((
                VarType::Object,
                Some(TypeDesc::object(self.method.class_name.clone())),
            )),
            VerifierType::ReturnAddress(_) | VerifierType::Invalid => None,
        }
    }

    fn translate(
        &mut self,
        block: BlockId,
        span: &[InstructionNode],
        last_index: usize,
        state: ExitState,
    ) -> Result<()> {
        let mut translator = Translator::new(&mut self.graph, block, state);
        let mut exit = Exit::FallThrough;
        for (i, node) in span.iter().enumerate() {
            exit = translator.step(node)?;
            if exit != Exit::FallThrough && i + 1 < span.len() {
                return Err(consistency_error!("control transfer inside block at {}", node.offset));
            }
        }
        let state = translator.state();

        let last = &span[span.len() - 1];
        let next = self.verified.nodes.get(last_index + 1).map(|n| n.offset);
        let terminator = match exit {
            Exit::FallThrough => Terminator::Goto(self.next_block(next, last.offset)?),
            Exit::Done(terminator) => terminator,
            Exit::Jump(PendingJump::Goto(target)) => Terminator::Goto(self.block_at(target)?),
            Exit::Jump(PendingJump::If {
                cond,
                lhs,
                rhs,
                taken,
            }) => Terminator::If {
                cond,
                lhs,
                rhs,
                taken: self.block_at(taken)?,
                fallthrough: self.next_block(next, last.offset)?,
            },
            Exit::Jump(PendingJump::Switch {
                value,
                cases,
                default,
            }) => Terminator::Switch {
                value,
                cases: cases
                    .into_iter()
                    .map(|(key, target)| Ok((key, self.block_at(target)?)))
                    .collect::<Result<Vec<_>>>()?,
                default: self.block_at(default)?,
            },
            Exit::Jump(PendingJump::Jsr(target)) => Terminator::JsrCall {
                target: self.block_at(target)?,
                ret_to: match (last.jsr_ret, next) {
                    (Some(_), Some(next)) => self.block_of.get(&next).copied(),
                    _ => None,
                },
            },
            Exit::Jump(PendingJump::Ret) => Terminator::Ret {
                targets: last
                    .successors
                    .iter()
                    .map(|&t| self.block_at(t))
                    .collect::<Result<Vec<_>>>()?,
            },
        };
        self.graph.set_terminator(block, terminator);

        if !last.handlers.is_empty() && last.insn.may_throw() {
            let thrown = state
                .thrown
                .ok_or_else(|| consistency_error!("covered instruction at {} throws nothing", last.offset))?;
            self.add_handlers(block, last, &state, thrown)?;
        }
        self.exits.insert(block, state);
        Ok(())
    }

    fn next_block(&self, next: Option<u32>, from: u32) -> Result<BlockId> {
        let next = next.ok_or_else(|| consistency_error!("control falls off the code at {}", from))?;
        self.block_at(next)
    }

    fn add_handlers(
        &mut self,
        block: BlockId,
        node: &InstructionNode,
        state: &ExitState,
        thrown: VarId,
    ) -> Result<()> {
        let normal = self.graph.block(block).terminator.targets();
        let mut edges = Vec::with_capacity(node.handlers.len());
        let mut trampolines: BTreeMap<BlockId, BlockId> = BTreeMap::new();

        for &index in &node.handlers {
            let handler = self
                .verified
                .handlers
                .get(index)
                .ok_or_else(|| consistency_error!("handler index {} out of range", index))?;
            let mut target = self.block_at(handler.handler)?;
            if normal.contains(&target) {
                target = match trampolines.get(&target) {
                    Some(&t) => t,
                    None => {
                        let trampoline = self.graph.add_block(None);
                        self.graph.block_mut(trampoline).subroutines =
                            self.graph.block(block).subroutines.clone();
                        self.graph.set_terminator(trampoline, Terminator::Goto(target));
                        self.exits.insert(trampoline, state.exceptional(thrown));
                        trampolines.insert(target, trampoline);
                        trampoline
                    }
                };
            }
            edges.push(HandlerEdge {
                catches: ExceptionSet::from_catch(handler.catch_type.as_deref()),
                target,
            });
        }
        self.graph.set_handlers(block, edges);
        Ok(())
    }

    fn record_procedures(&mut self) -> Result<()> {
        let mut procedures = Vec::with_capacity(self.verified.subroutines.len());
        for (&entry_offset, info) in &self.verified.subroutines {
            let entry = self.block_at(entry_offset)?;
            let calls: Vec<BlockId> = self
                .graph
                .block_ids()
                .into_iter()
                .filter(|&b| {
                    matches!(self.graph.block(b).terminator, Terminator::JsrCall { target, .. } if target == entry)
                })
                .collect();
            let (ret, mask) = match info.ret.and_then(|r| self.verified.index_of(r)) {
                Some(index) => (
                    Some(self.node_block[index]),
                    self.verified.nodes[index].ret_mask.clone().unwrap_or_default(),
                ),
                None => (None, BTreeSet::new()),
            };
            procedures.push(Procedure {
                entry,
                calls,
                ret,
                mask,
            });
        }
        *self.graph.procedures_mut() = procedures;
        Ok(())
    }

    /// Drops blocks no path from the entry reaches, such as return points of
    /// subroutines that never return.
    fn prune(&mut self) {
        let mut reached = vec![false; self.graph.block_ids().last().map_or(0, |b| b.index() + 1)];
        let mut stack = vec![self.graph.entry()];
        while let Some(block) = stack.pop() {
            if std::mem::replace(&mut reached[block.index()], true) {
                continue;
            }
            stack.extend(self.graph.successors_of(block));
        }

        for block in self.graph.block_ids() {
            if !reached[block.index()] {
                log::trace!("pruning unreachable block {:?}", block);
                self.graph.remove_block(block);
                self.exits.remove(&block);
                self.pending.remove(&block);
            }
        }
        for procedure in self.graph.procedures_mut() {
            procedure.calls.retain(|c| reached[c.index()]);
            if procedure.ret.is_some_and(|r| !reached[r.index()]) {
                procedure.ret = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, CodeBuilder, Cond, Instruction, InvokeKind, MethodRef},
        ir::{Literal, OpKind},
        verifier::verify,
    };

    fn build_code(code: &mut CodeBuilder, desc: &str) -> RawGraph {
        let method = code.into_method("T", "m", desc, true).unwrap();
        let verified = verify(&method, &ClassHierarchy::with_java_lang()).unwrap();
        build(&method, &verified).unwrap()
    }

    #[test]
    fn test_conditional_compares_against_zero() {
        let mut code = CodeBuilder::new();
        let negative = code.label();
        code.iload(0)
            .if_(Cond::Lt, negative)
            .iconst(2)
            .ireturn()
            .bind(negative)
            .iconst(1)
            .ireturn();
        let raw = build_code(&mut code, "(I)I");
        let graph = &raw.graph;

        let entry = graph.entry();
        assert!(graph.block(entry).phis.is_empty());
        let Terminator::If { cond, lhs, rhs, .. } = graph.block(entry).terminator.clone() else {
            panic!("expected a branch");
        };
        assert_eq!(cond, Cond::Lt);
        assert_eq!(lhs, graph.inputs()[0]);
        assert_eq!(graph.var(rhs).literal, Some(Literal::Int(0)));
        assert_eq!(graph.inputs().len(), 2);
    }

    #[test]
    fn test_loop_header_gets_synthetic_entry() {
        let mut code = CodeBuilder::new();
        let (top, done) = (code.label(), code.label());
        code.bind(top)
            .iload(0)
            .if_(Cond::Le, done)
            .insn(Instruction::Iinc(0, -1))
            .goto(top)
            .bind(done)
            .iload(0)
            .ireturn();
        let raw = build_code(&mut code, "(I)I");
        let graph = &raw.graph;

        let entry = graph.entry();
        assert_eq!(graph.block(entry).offset, None);
        assert_eq!(graph.block_count(), 4);
        let Terminator::Goto(header) = graph.block(entry).terminator else {
            panic!("synthetic entry must jump to address 0");
        };
        assert_eq!(graph.block(header).offset, Some(0));
        let slots: Vec<Slot> = raw.pending(header).iter().map(|(_, s)| *s).collect();
        assert_eq!(slots, vec![Slot::Local(0), Slot::Token]);
        assert_eq!(graph.preds_of(header).len(), 2);
    }

    #[test]
    fn test_covered_call_gets_handler_edge() {
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.label(), code.label(), code.label());
        let call = MethodRef::new("T", "a", "()V").unwrap();
        code.bind(start)
            .invoke(InvokeKind::Static, call)
            .bind(end)
            .vreturn()
            .bind(handler)
            .astore(0)
            .vreturn()
            .try_catch(start, end, handler, Some("java/lang/RuntimeException"));
        let raw = build_code(&mut code, "()V");
        let graph = &raw.graph;

        let entry = graph.entry();
        let edges = &graph.block(entry).handlers;
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].catches, ExceptionSet::of("java/lang/RuntimeException"));

        let call = graph.block(entry).ops[0];
        assert!(matches!(graph.op(call).kind, OpKind::Invoke { .. }));
        let exit = raw.exit(entry).unwrap();
        assert_eq!(exit.thrown, graph.op(call).thrown);
        assert_eq!(exit.token, graph.op(call).token.unwrap());

        let slots: Vec<Slot> = raw.pending(edges[0].target).iter().map(|(_, s)| *s).collect();
        assert!(slots.contains(&Slot::Stack(0)));
    }

    #[test]
    fn test_subroutine_is_recorded() {
        let mut code = CodeBuilder::new();
        let sub = code.label();
        code.iconst(0)
            .istore(0)
            .jsr(sub)
            .iload(0)
            .ireturn()
            .bind(sub)
            .astore(1)
            .iconst(7)
            .istore(0)
            .ret(1);
        let raw = build_code(&mut code, "()I");
        let graph = &raw.graph;

        assert_eq!(graph.procedures().len(), 1);
        let procedure = &graph.procedures()[0];
        assert_eq!(procedure.calls, vec![graph.entry()]);
        assert_eq!(procedure.mask, [0u16, 1].into_iter().collect());

        let Terminator::JsrCall { target, ret_to } = graph.block(graph.entry()).terminator else {
            panic!("expected a jsr");
        };
        assert_eq!(target, procedure.entry);
        let ret = procedure.ret.unwrap();
        assert_eq!(
            graph.block(ret).terminator,
            Terminator::Ret {
                targets: vec![ret_to.unwrap()]
            }
        );
        assert!(raw.exit(graph.entry()).unwrap().stack.last().unwrap().is_none());
    }
}
