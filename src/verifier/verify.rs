//! The worklist verifier.
//!
//! Abstract interpretation over per-instruction [`Frame`]s. Each reachable
//! instruction is executed symbolically on its input frame, and the result is merged
//! into the input frames of its successors until nothing changes. The type lattice
//! has finite height for a given method, so the loop terminates without an
//! iteration cap.
//!
//! # Subroutines
//!
//! A `jsr` pushes a [`SubroutineMask`] onto the frame. Every local store inside the
//! subroutine is recorded in all active masks. When the matching `ret` executes, the
//! instruction after each `jsr` site receives the subroutine's values for the
//! written locals and the caller's values for everything else. A `jsr` discovered or
//! changed after its subroutine's `ret` was seen re-queues that `ret`.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    bytecode::{
        package_of, ArithOp, ArrayKind, BaseType, ClassOracle, Constant, ExceptionHandler, Instruction,
        InvokeKind, MethodBody, TypeDesc, ValueKind, OBJECT, THROWABLE,
    },
    verifier::{Frame, SubroutineMask, VerifierType},
    Result,
};

/// One reachable instruction together with its verified input state.
#[derive(Debug, Clone)]
pub struct InstructionNode {
    /// Bytecode address
    pub offset: u32,
    /// The instruction
    pub insn: Instruction,
    /// Stack, locals and active subroutines before the instruction executes
    pub frame: Frame,
    /// Addresses that normal (non-exceptional) control flow can reach next. For a
    /// `ret` these are the return points of all call sites.
    pub successors: Vec<u32>,
    /// Indices into the exception table of the handlers covering this instruction
    pub handlers: Vec<usize>,
    /// For `jsr`: address of the subroutine's `ret`, if it has one
    pub jsr_ret: Option<u32>,
    /// For `ret`: locals written since the subroutine was entered
    pub ret_mask: Option<BTreeSet<u16>>,
}

/// Call sites and return instruction of one subroutine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubroutineInfo {
    /// Addresses of the `jsr` instructions calling it, ascending
    pub calls: Vec<u32>,
    /// Address of its `ret`, if any path returns
    pub ret: Option<u32>,
}

/// The result of verification: every reachable instruction with its typed state.
#[derive(Debug, Clone)]
pub struct VerifiedMethod {
    /// Reachable instructions in address order
    pub nodes: Vec<InstructionNode>,
    /// Exception table of the method
    pub handlers: Vec<ExceptionHandler>,
    /// Subroutines keyed by entry address
    pub subroutines: BTreeMap<u32, SubroutineInfo>,
    /// Local variable limit
    pub max_locals: u16,
}

impl VerifiedMethod {
    /// Index into `nodes` of the instruction at `offset`.
    #[must_use]
    pub fn index_of(&self, offset: u32) -> Option<usize> {
        self.nodes.binary_search_by_key(&offset, |n| n.offset).ok()
    }

    /// The instruction at `offset`, if it is reachable.
    #[must_use]
    pub fn node_at(&self, offset: u32) -> Option<&InstructionNode> {
        self.index_of(offset).map(|i| &self.nodes[i])
    }
}

/// Verifies `method` against `oracle`.
///
/// # Errors
///
/// Returns [`crate::Error::Verification`] for any typing violation.
///
/// # Examples
///
/// ```rust
/// use classflow::bytecode::{ClassHierarchy, CodeBuilder};
/// use classflow::verifier::verify;
///
/// let mut code = CodeBuilder::new();
/// code.iconst(1).ireturn();
/// let method = code.into_method("Demo", "one", "()I", true)?;
///
/// let verified = verify(&method, &ClassHierarchy::with_java_lang())?;
/// assert_eq!(verified.nodes.len(), 2);
/// # Ok::<(), classflow::Error>(())
/// ```
pub fn verify(method: &MethodBody, oracle: &dyn ClassOracle) -> Result<VerifiedMethod> {
    Verifier::new(method, oracle).run()
}

/// Worklist state for verifying one method.
pub struct Verifier<'a> {
    method: &'a MethodBody,
    oracle: &'a dyn ClassOracle,
    frames: Vec<Option<Frame>>,
    successors: Vec<BTreeSet<u32>>,
    worklist: BTreeSet<usize>,
    /// `jsr` instruction indices per subroutine entry address
    jsr_sites: BTreeMap<u32, BTreeSet<usize>>,
    /// `ret` instruction index per subroutine entry address
    ret_of: BTreeMap<u32, usize>,
}

impl<'a> Verifier<'a> {
    /// Creates a verifier for `method`.
    #[must_use]
    pub fn new(method: &'a MethodBody, oracle: &'a dyn ClassOracle) -> Self {
        let n = method.code.len();
        Verifier {
            method,
            oracle,
            frames: vec![None; n],
            successors: vec![BTreeSet::new(); n],
            worklist: BTreeSet::new(),
            jsr_sites: BTreeMap::new(),
            ret_of: BTreeMap::new(),
        }
    }

    /// Runs the fixed point and collects the reachable instructions.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Verification`] for any typing violation.
    pub fn run(mut self) -> Result<VerifiedMethod> {
        if self.method.code.is_empty() {
            return Err(verify_error!(0, "method has no code"));
        }

        self.frames[0] = Some(self.initial_frame()?);
        self.worklist.insert(0);

        let mut steps = 0usize;
        while let Some(index) = self.worklist.pop_first() {
            let Some(frame) = self.frames[index].clone() else {
                return Err(consistency_error!("queued instruction {} has no frame", index));
            };
            self.step(index, frame)?;
            steps += 1;
        }

        log::debug!(
            "verified {} in {} steps",
            self.method.display_name(),
            steps
        );
        Ok(self.finish())
    }

    fn initial_frame(&self) -> Result<Frame> {
        let method = self.method;
        let mut frame = Frame::new(method.max_locals);
        let mut slot = 0u16;

        if !method.is_static {
            let this = if method.is_constructor() && method.class_name != OBJECT {
                VerifierType::UninitThis
            } else {
                class_type(&method.class_name)
            };
            frame.set_local(0, this, 0)?;
            slot = 1;
        }

        for param in &method.descriptor.params {
            frame.set_local(slot, VerifierType::from_desc(param).as_stack(), 0)?;
            slot += param.width();
        }
        Ok(frame)
    }

    fn offset(&self, index: usize) -> u32 {
        self.method.code[index].offset
    }

    fn target_index(&self, from: usize, target: u32) -> Result<usize> {
        self.method
            .index_of(target)
            .ok_or_else(|| verify_error!(self.offset(from), "invalid branch target {}", target))
    }

    fn next_index(&self, index: usize) -> Result<usize> {
        if index + 1 < self.method.code.len() {
            Ok(index + 1)
        } else {
            Err(verify_error!(
                self.offset(index),
                "execution falls off the end of the code"
            ))
        }
    }

    /// Merges `frame` into the input of instruction `target`, queueing it on change.
    fn flow(&mut self, target: usize, frame: Frame) -> Result<()> {
        let offset = self.offset(target);
        match &mut self.frames[target] {
            Some(existing) => {
                if existing.merge_from(&frame, self.oracle, offset)? {
                    self.worklist.insert(target);
                }
            }
            slot @ None => {
                *slot = Some(frame);
                self.worklist.insert(target);
            }
        }
        Ok(())
    }

    /// Normal control transfer from `from` to `target`.
    fn branch(&mut self, from: usize, target: usize, frame: Frame) -> Result<()> {
        let target_offset = self.offset(target);
        self.successors[from].insert(target_offset);
        self.flow(target, frame)
    }

    fn step(&mut self, index: usize, frame_in: Frame) -> Result<()> {
        let method = self.method;
        let item = &method.code[index];
        let offset = item.offset;
        log::trace!("verify {offset}: {}", item.insn);

        self.flow_to_handlers(index, &frame_in)?;

        let mut frame = frame_in.clone();
        self.execute(index, &mut frame)?;

        match &item.insn {
            Instruction::Goto(target) => {
                let t = self.target_index(index, *target)?;
                self.branch(index, t, frame)?;
            }
            Instruction::If(_, target)
            | Instruction::IfCmp(_, target)
            | Instruction::IfRef { target, .. }
            | Instruction::IfNull { target, .. } => {
                let t = self.target_index(index, *target)?;
                let next = self.next_index(index)?;
                self.branch(index, t, frame.clone())?;
                self.branch(index, next, frame)?;
            }
            Instruction::Switch { cases, default } => {
                let mut targets: BTreeSet<u32> = cases.iter().map(|(_, t)| *t).collect();
                targets.insert(*default);
                for target in targets {
                    let t = self.target_index(index, target)?;
                    self.branch(index, t, frame.clone())?;
                }
            }
            Instruction::Jsr(target) => self.call_subroutine(index, *target, frame)?,
            Instruction::Ret(local) => self.return_from_subroutine(index, *local, &frame_in)?,
            Instruction::Return(_) | Instruction::Throw => {}
            _ => {
                let next = self.next_index(index)?;
                self.branch(index, next, frame)?;
            }
        }
        Ok(())
    }

    fn flow_to_handlers(&mut self, index: usize, frame_in: &Frame) -> Result<()> {
        let offset = self.offset(index);
        let covering: Vec<(u32, VerifierType)> = self
            .method
            .handlers
            .iter()
            .filter(|h| h.covers(offset))
            .map(|h| {
                let caught = h.catch_type.as_deref().unwrap_or(THROWABLE);
                (h.handler, class_type(caught))
            })
            .collect();

        for (handler, caught) in covering {
            let t = self.method.index_of(handler).ok_or_else(|| {
                verify_error!(offset, "exception handler address {} is not an instruction", handler)
            })?;
            let mut frame = Frame {
                locals: frame_in.locals.clone(),
                stack: Vec::new(),
                subroutines: frame_in.subroutines.clone(),
            };
            frame.push(caught, self.method.max_stack, handler)?;
            self.flow(t, frame)?;
        }
        Ok(())
    }

    fn call_subroutine(&mut self, index: usize, entry: u32, mut frame: Frame) -> Result<()> {
        let offset = self.offset(index);
        if frame.subroutines.iter().any(|m| m.entry == entry) {
            return Err(verify_error!(
                offset,
                "recursive call to subroutine at {}",
                entry
            ));
        }

        frame.push(VerifierType::ReturnAddress(entry), self.method.max_stack, offset)?;
        frame.subroutines.push(SubroutineMask {
            entry,
            written: BTreeSet::new(),
        });

        let t = self.target_index(index, entry)?;
        self.branch(index, t, frame)?;
        self.jsr_sites.entry(entry).or_default().insert(index);

        // The return point of this call site depends on the ret's frame
        if let Some(&ret) = self.ret_of.get(&entry) {
            if self.frames[ret].is_some() {
                self.worklist.insert(ret);
            }
        }
        Ok(())
    }

    fn return_from_subroutine(&mut self, index: usize, local: u16, frame: &Frame) -> Result<()> {
        let offset = self.offset(index);
        let entry = match frame.local(local, offset)? {
            VerifierType::ReturnAddress(entry) => *entry,
            other => {
                return Err(verify_error!(
                    offset,
                    "ret on local {} holding {}, not a return address",
                    local,
                    other
                ))
            }
        };

        let Some(depth) = frame.subroutines.iter().position(|m| m.entry == entry) else {
            return Err(verify_error!(offset, "ret outside of subroutine at {}", entry));
        };

        match self.ret_of.get(&entry).copied() {
            Some(existing) if existing != index => {
                return Err(verify_error!(
                    offset,
                    "multiple returns to jsr: subroutine at {} already returns at {}",
                    entry,
                    self.offset(existing)
                ));
            }
            _ => {
                self.ret_of.insert(entry, index);
            }
        }

        let written: BTreeSet<u16> = frame.subroutines[depth..]
            .iter()
            .flat_map(|m| m.written.iter().copied())
            .collect();
        let outer: Vec<SubroutineMask> = frame.subroutines[..depth]
            .iter()
            .map(|m| SubroutineMask {
                entry: m.entry,
                written: m.written.union(&written).copied().collect(),
            })
            .collect();

        let sites: Vec<usize> = self
            .jsr_sites
            .get(&entry)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        for site in sites {
            let Some(caller) = self.frames[site].clone() else {
                continue;
            };
            let after = self.next_index(site)?;
            let locals = caller
                .locals
                .iter()
                .zip(frame.locals.iter())
                .enumerate()
                .map(|(i, (theirs, ours))| {
                    let written_here = u16::try_from(i).is_ok_and(|i| written.contains(&i));
                    if written_here {
                        ours.clone()
                    } else {
                        theirs.clone()
                    }
                })
                .collect();
            let returned = Frame {
                locals,
                stack: frame.stack.clone(),
                subroutines: outer.clone(),
            };
            self.branch(index, after, returned)?;
        }
        Ok(())
    }

    /// Applies the stack and local effects of the instruction at `index`.
    fn execute(&self, index: usize, frame: &mut Frame) -> Result<()> {
        let item = &self.method.code[index];
        let offset = item.offset;
        let max_stack = self.method.max_stack;
        let oracle = self.oracle;

        match &item.insn {
            Instruction::Nop
            | Instruction::Goto(_)
            | Instruction::Jsr(_)
            | Instruction::Ret(_) => {}
            Instruction::Const(constant) => {
                let ty = match constant {
                    Constant::Null => VerifierType::Null,
                    Constant::Int(_) => VerifierType::Int,
                    Constant::Long(_) => VerifierType::Long,
                    Constant::Float(_) => VerifierType::Float,
                    Constant::Double(_) => VerifierType::Double,
                    Constant::String(_) => class_type("java/lang/String"),
                    Constant::Class(_) => class_type("java/lang/Class"),
                };
                frame.push(ty, max_stack, offset)?;
            }
            Instruction::Load(kind, local) => {
                if kind.width() == 2 {
                    frame.local(local + 1, offset)?;
                }
                let ty = frame.local(*local, offset)?.clone();
                if !ty.matches_kind(*kind) {
                    return Err(verify_error!(
                        offset,
                        "local {} holds {}, expected {:?}",
                        local,
                        ty,
                        kind
                    ));
                }
                frame.push(ty, max_stack, offset)?;
            }
            Instruction::Store(kind, local) => {
                let value = frame.pop(offset)?;
                let ok = value.matches_kind(*kind)
                    || (*kind == ValueKind::Reference
                        && matches!(value, VerifierType::ReturnAddress(_)));
                if !ok {
                    return Err(verify_error!(
                        offset,
                        "expected {:?} on stack, found {}",
                        kind,
                        value
                    ));
                }
                frame.set_local(*local, value, offset)?;
            }
            Instruction::Iinc(local, _) => {
                if *frame.local(*local, offset)? != VerifierType::Int {
                    return Err(verify_error!(offset, "iinc on non-int local {}", local));
                }
                frame.set_local(*local, VerifierType::Int, offset)?;
            }
            Instruction::ArrayLoad(kind) => {
                frame.pop_kind(ValueKind::Int, offset)?;
                let array = frame.pop(offset)?;
                let element = array_element(&array, *kind, offset)?;
                frame.push(element, max_stack, offset)?;
            }
            Instruction::ArrayStore(kind) => {
                let value = frame.pop_kind(kind.value_kind(), offset)?;
                if value.is_uninitialized() {
                    return Err(verify_error!(offset, "storing uninitialized object in array"));
                }
                frame.pop_kind(ValueKind::Int, offset)?;
                let array = frame.pop(offset)?;
                array_element(&array, *kind, offset)?;
            }
            Instruction::Pop
            | Instruction::Pop2
            | Instruction::Dup
            | Instruction::DupX1
            | Instruction::DupX2
            | Instruction::Dup2
            | Instruction::Dup2X1
            | Instruction::Dup2X2
            | Instruction::Swap => {
                crate::verifier::shuffle(&item.insn, &mut frame.stack, VerifierType::width)
                    .map_err(|reason| verify_error!(offset, reason))?;
                if frame.stack_slots() > usize::from(max_stack) {
                    return Err(verify_error!(offset, "operand stack overflow"));
                }
            }
            Instruction::Arith(kind, op) => {
                let bitwise = op.is_shift() || matches!(op, ArithOp::And | ArithOp::Or | ArithOp::Xor);
                let valid = match kind {
                    ValueKind::Int | ValueKind::Long => true,
                    ValueKind::Float | ValueKind::Double => !bitwise,
                    ValueKind::Reference => false,
                };
                if !valid {
                    return Err(verify_error!(offset, "invalid operand kind for {}", item.insn));
                }
                if op.is_shift() {
                    frame.pop_kind(ValueKind::Int, offset)?;
                } else {
                    frame.pop_kind(*kind, offset)?;
                }
                let value = frame.pop_kind(*kind, offset)?;
                frame.push(value, max_stack, offset)?;
            }
            Instruction::Neg(kind) => {
                if *kind == ValueKind::Reference {
                    return Err(verify_error!(offset, "cannot negate a reference"));
                }
                let value = frame.pop_kind(*kind, offset)?;
                frame.push(value, max_stack, offset)?;
            }
            Instruction::Convert(from, to) => {
                if *from == ValueKind::Reference || *to == ValueKind::Reference {
                    return Err(verify_error!(offset, "cannot convert references"));
                }
                frame.pop_kind(*from, offset)?;
                frame.push(kind_type(*to), max_stack, offset)?;
            }
            Instruction::Truncate(_) => {
                frame.pop_kind(ValueKind::Int, offset)?;
                frame.push(VerifierType::Int, max_stack, offset)?;
            }
            Instruction::Compare(kind) => {
                frame.pop_kind(kind.operand_kind(), offset)?;
                frame.pop_kind(kind.operand_kind(), offset)?;
                frame.push(VerifierType::Int, max_stack, offset)?;
            }
            Instruction::If(..) | Instruction::Switch { .. } => {
                frame.pop_kind(ValueKind::Int, offset)?;
            }
            Instruction::IfCmp(..) => {
                frame.pop_kind(ValueKind::Int, offset)?;
                frame.pop_kind(ValueKind::Int, offset)?;
            }
            Instruction::IfRef { .. } => {
                frame.pop_kind(ValueKind::Reference, offset)?;
                frame.pop_kind(ValueKind::Reference, offset)?;
            }
            Instruction::IfNull { .. } => {
                frame.pop_kind(ValueKind::Reference, offset)?;
            }
            Instruction::Return(kind) => self.check_return(*kind, frame, offset)?,
            Instruction::GetStatic(field) => {
                frame.push(VerifierType::from_desc(&field.desc), max_stack, offset)?;
            }
            Instruction::PutStatic(field) => {
                frame.pop_assignable(&VerifierType::from_desc(&field.desc), oracle, offset)?;
            }
            Instruction::GetField(field) => {
                let receiver = frame.pop_assignable(&class_type(&field.class), oracle, offset)?;
                self.check_protected(&field.class, field.protected, &receiver, offset)?;
                frame.push(VerifierType::from_desc(&field.desc), max_stack, offset)?;
            }
            Instruction::PutField(field) => {
                frame.pop_assignable(&VerifierType::from_desc(&field.desc), oracle, offset)?;
                let receiver = frame.pop(offset)?;
                // A constructor may store its own fields before calling super()
                let own_field = receiver == VerifierType::UninitThis
                    && field.class == self.method.class_name;
                if !own_field && !receiver.is_assignable_to(&class_type(&field.class), oracle) {
                    return Err(verify_error!(
                        offset,
                        "putfield {}.{} on {}",
                        field.class,
                        field.name,
                        receiver
                    ));
                }
                self.check_protected(&field.class, field.protected, &receiver, offset)?;
            }
            Instruction::Invoke(kind, method) => {
                for param in method.desc.params.iter().rev() {
                    frame.pop_assignable(&VerifierType::from_desc(param), oracle, offset)?;
                }
                match kind {
                    InvokeKind::Static => {}
                    InvokeKind::Special if method.is_init() => {
                        let receiver = frame.pop(offset)?;
                        let initialized = self.initialize(&receiver, &method.class, offset)?;
                        frame.replace_all(&receiver, &initialized);
                    }
                    InvokeKind::Special | InvokeKind::Virtual | InvokeKind::Interface => {
                        let receiver =
                            frame.pop_assignable(&class_type(&method.class), oracle, offset)?;
                        if *kind == InvokeKind::Virtual {
                            self.check_protected(
                                &method.class,
                                method.protected,
                                &receiver,
                                offset,
                            )?;
                        }
                    }
                }
                if let Some(ret) = &method.desc.ret {
                    frame.push(VerifierType::from_desc(ret), max_stack, offset)?;
                }
            }
            Instruction::New(_) => {
                let marker = VerifierType::UninitNew(offset);
                // A previous object from this same `new` can no longer be initialized
                frame.replace_all(&marker, &VerifierType::Invalid);
                frame.push(marker, max_stack, offset)?;
            }
            Instruction::NewArray(element) => {
                frame.pop_kind(ValueKind::Int, offset)?;
                let array = TypeDesc::Array(Box::new(element.clone()));
                frame.push(VerifierType::Reference(array), max_stack, offset)?;
            }
            Instruction::MultiNewArray(array, dims) => {
                if *dims == 0 || usize::from(*dims) > array.dimensions() {
                    return Err(verify_error!(
                        offset,
                        "multianewarray with {} dimensions for {}",
                        dims,
                        array
                    ));
                }
                for _ in 0..*dims {
                    frame.pop_kind(ValueKind::Int, offset)?;
                }
                frame.push(VerifierType::from_desc(array), max_stack, offset)?;
            }
            Instruction::ArrayLength => {
                let array = frame.pop(offset)?;
                let is_array = matches!(
                    array,
                    VerifierType::Null | VerifierType::Reference(TypeDesc::Array(_))
                );
                if !is_array {
                    return Err(verify_error!(offset, "arraylength on {}", array));
                }
                frame.push(VerifierType::Int, max_stack, offset)?;
            }
            Instruction::Throw => {
                frame.pop_assignable(&class_type(THROWABLE), oracle, offset)?;
            }
            Instruction::CheckCast(target) => {
                pop_initialized(frame, offset)?;
                frame.push(VerifierType::from_desc(target), max_stack, offset)?;
            }
            Instruction::InstanceOf(_) => {
                pop_initialized(frame, offset)?;
                frame.push(VerifierType::Int, max_stack, offset)?;
            }
            Instruction::MonitorEnter | Instruction::MonitorExit => {
                pop_initialized(frame, offset)?;
            }
        }
        Ok(())
    }

    fn check_return(&self, kind: Option<ValueKind>, frame: &mut Frame, offset: u32) -> Result<()> {
        let expected = self.method.descriptor.ret.as_ref();
        match (kind, expected) {
            (None, None) => {}
            (Some(kind), Some(ret)) => {
                let ret_type = VerifierType::from_desc(ret).as_stack();
                if !ret_type.matches_kind(kind) {
                    return Err(verify_error!(
                        offset,
                        "{:?} return in a method returning {}",
                        kind,
                        ret
                    ));
                }
                frame.pop_assignable(&ret_type, self.oracle, offset)?;
            }
            (None, Some(ret)) => {
                return Err(verify_error!(offset, "void return in a method returning {}", ret))
            }
            (Some(kind), None) => {
                return Err(verify_error!(offset, "{:?} return in a void method", kind))
            }
        }

        if self.method.is_constructor() && frame.has_uninit_this() {
            return Err(verify_error!(
                offset,
                "constructor returns before calling the super constructor"
            ));
        }
        Ok(())
    }

    /// Type of `receiver` once `<init>` of `class` has run on it.
    fn initialize(&self, receiver: &VerifierType, class: &str, offset: u32) -> Result<VerifierType> {
        match receiver {
            VerifierType::UninitNew(at) => {
                let created = self
                    .method
                    .index_of(*at)
                    .and_then(|i| match &self.method.code[i].insn {
                        Instruction::New(created) => Some(created.as_str()),
                        _ => None,
                    });
                match created {
                    Some(created) if created == class => Ok(class_type(created)),
                    _ => Err(verify_error!(
                        offset,
                        "constructor of {} called on object created at {}",
                        class,
                        at
                    )),
                }
            }
            VerifierType::UninitThis => {
                let current = &self.method.class_name;
                let superclass = self.oracle.supertypes(current).into_iter().next();
                if class == current.as_str() || superclass.as_deref() == Some(class) {
                    Ok(class_type(current))
                } else {
                    Err(verify_error!(
                        offset,
                        "constructor of {} called on uninitialized this of {}",
                        class,
                        current
                    ))
                }
            }
            other => Err(verify_error!(offset, "constructor called on initialized {}", other)),
        }
    }

    /// Access to a protected member of a superclass in another package must go
    /// through a receiver of the current class or a subclass of it.
    fn check_protected(
        &self,
        declaring: &str,
        protected: bool,
        receiver: &VerifierType,
        offset: u32,
    ) -> Result<()> {
        let current = self.method.class_name.as_str();
        if !protected
            || declaring == current
            || package_of(declaring) == package_of(current)
            || !self.oracle.is_subclass(current, declaring)
        {
            return Ok(());
        }

        let ok = matches!(receiver, VerifierType::Null | VerifierType::UninitThis)
            || receiver.is_assignable_to(&class_type(current), self.oracle);
        if ok {
            Ok(())
        } else {
            Err(verify_error!(
                offset,
                "protected member of {} accessed through {}",
                declaring,
                receiver
            ))
        }
    }

    fn finish(self) -> VerifiedMethod {
        let method = self.method;
        let mut nodes = Vec::new();

        for (index, frame) in self.frames.iter().enumerate() {
            let Some(frame) = frame else { continue };
            let item = &method.code[index];

            let handlers = method
                .handlers
                .iter()
                .enumerate()
                .filter(|(_, h)| h.covers(item.offset))
                .map(|(i, _)| i)
                .collect();

            let jsr_ret = match &item.insn {
                Instruction::Jsr(entry) => self.ret_of.get(entry).map(|&r| method.code[r].offset),
                _ => None,
            };

            let ret_mask = match &item.insn {
                Instruction::Ret(local) => match frame.locals.get(usize::from(*local)) {
                    Some(VerifierType::ReturnAddress(entry)) => frame
                        .subroutines
                        .iter()
                        .position(|m| m.entry == *entry)
                        .map(|depth| {
                            frame.subroutines[depth..]
                                .iter()
                                .flat_map(|m| m.written.iter().copied())
                                .collect()
                        }),
                    _ => None,
                },
                _ => None,
            };

            nodes.push(InstructionNode {
                offset: item.offset,
                insn: item.insn.clone(),
                frame: frame.clone(),
                successors: self.successors[index].iter().copied().collect(),
                handlers,
                jsr_ret,
                ret_mask,
            });
        }

        let mut subroutines = BTreeMap::new();
        for (entry, sites) in &self.jsr_sites {
            subroutines.insert(
                *entry,
                SubroutineInfo {
                    calls: sites.iter().map(|&s| method.code[s].offset).collect(),
                    ret: self.ret_of.get(entry).map(|&r| method.code[r].offset),
                },
            );
        }

        VerifiedMethod {
            nodes,
            handlers: method.handlers.clone(),
            subroutines,
            max_locals: method.max_locals,
        }
    }
}

fn class_type(name: &str) -> VerifierType {
    if name.starts_with('[') {
        if let Ok(desc) = TypeDesc::parse(name) {
            return VerifierType::Reference(desc);
        }
    }
    VerifierType::class(name)
}

fn kind_type(kind: ValueKind) -> VerifierType {
    match kind {
        ValueKind::Int => VerifierType::Int,
        ValueKind::Long => VerifierType::Long,
        ValueKind::Float => VerifierType::Float,
        ValueKind::Double => VerifierType::Double,
        ValueKind::Reference => VerifierType::object(),
    }
}

fn pop_initialized(frame: &mut Frame, offset: u32) -> Result<VerifierType> {
    let value = frame.pop_kind(ValueKind::Reference, offset)?;
    if value.is_uninitialized() {
        return Err(verify_error!(offset, "use of uninitialized object {}", value));
    }
    Ok(value)
}

/// Checks that `array` is an array usable with `kind` and returns its element type.
fn array_element(array: &VerifierType, kind: ArrayKind, offset: u32) -> Result<VerifierType> {
    let element = match array {
        VerifierType::Null => {
            return Ok(match kind {
                ArrayKind::Reference => VerifierType::Null,
                other => kind_type(other.value_kind()),
            })
        }
        VerifierType::Reference(TypeDesc::Array(element)) => element.as_ref(),
        other => return Err(verify_error!(offset, "expected an array, found {}", other)),
    };

    let compatible = match (kind, element) {
        (ArrayKind::Reference, TypeDesc::Object(_) | TypeDesc::Array(_)) => true,
        (ArrayKind::Int, TypeDesc::Base(BaseType::Int))
        | (ArrayKind::Long, TypeDesc::Base(BaseType::Long))
        | (ArrayKind::Float, TypeDesc::Base(BaseType::Float))
        | (ArrayKind::Double, TypeDesc::Base(BaseType::Double))
        | (ArrayKind::Char, TypeDesc::Base(BaseType::Char))
        | (ArrayKind::Short, TypeDesc::Base(BaseType::Short))
        | (ArrayKind::Byte, TypeDesc::Base(BaseType::Byte | BaseType::Boolean)) => true,
        _ => false,
    };
    if !compatible {
        return Err(verify_error!(offset, "{:?} array access on {}", kind, array));
    }
    Ok(VerifierType::from_desc(element).as_stack())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, CodeBuilder, Cond, FieldRef, MethodRef},
        Error,
    };

    fn hierarchy() -> ClassHierarchy {
        ClassHierarchy::with_java_lang()
    }

    fn message(result: Result<VerifiedMethod>) -> String {
        match result {
            Err(Error::Verification { message, .. }) => message,
            other => panic!("expected a verification error, got {other:?}"),
        }
    }

    #[test]
    fn test_straight_line_types() {
        let mut code = CodeBuilder::new();
        code.iload(0).iload(1).iadd().ireturn();
        let method = code.into_method("T", "add", "(II)I", true).unwrap();

        let verified = verify(&method, &hierarchy()).unwrap();
        assert_eq!(verified.nodes.len(), 4);
        assert_eq!(verified.nodes[3].frame.stack, vec![VerifierType::Int]);
        assert_eq!(verified.nodes[0].successors, vec![verified.nodes[1].offset]);
        assert!(verified.nodes[3].successors.is_empty());
    }

    #[test]
    fn test_stack_underflow() {
        let mut code = CodeBuilder::new();
        code.iadd().ireturn();
        let method = code.into_method("T", "m", "()I", true).unwrap();
        assert!(message(verify(&method, &hierarchy())).contains("underflow"));
    }

    #[test]
    fn test_fall_off_end() {
        let mut code = CodeBuilder::new();
        code.iconst(1).insn(Instruction::Pop);
        let method = code.into_method("T", "m", "()V", true).unwrap();
        assert!(message(verify(&method, &hierarchy())).contains("falls off"));
    }

    #[test]
    fn test_wrong_return_kind() {
        let mut code = CodeBuilder::new();
        code.iconst(1).ireturn();
        let method = code.into_method("T", "m", "()V", true).unwrap();
        assert!(verify(&method, &hierarchy()).is_err());
    }

    #[test]
    fn test_merge_depth_mismatch() {
        let mut code = CodeBuilder::new();
        let join = code.label();
        code.iload(0)
            .if_(Cond::Eq, join)
            .iconst(1)
            .bind(join)
            .vreturn();
        let method = code.into_method("T", "m", "(I)V", true).unwrap();
        assert!(message(verify(&method, &hierarchy())).contains("stack depth"));
    }

    #[test]
    fn test_subroutine_return_uses_written_locals() {
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
        let method = code.into_method("T", "m", "()I", true).unwrap();

        let verified = verify(&method, &hierarchy()).unwrap();
        let jsr = &verified.nodes[2];
        let ret = verified.nodes.last().unwrap();
        assert_eq!(jsr.jsr_ret, Some(ret.offset));
        assert_eq!(
            ret.ret_mask,
            Some([0u16, 1].into_iter().collect::<BTreeSet<_>>())
        );
        assert_eq!(ret.successors, vec![verified.nodes[3].offset]);

        let info = &verified.subroutines[&verified.nodes[5].offset];
        assert_eq!(info.calls, vec![jsr.offset]);
        assert_eq!(info.ret, Some(ret.offset));
        assert!(verified.nodes[3].frame.subroutines.is_empty());
    }

    #[test]
    fn test_multiple_returns_rejected() {
        let mut code = CodeBuilder::new();
        let sub = code.label();
        let other = code.label();
        code.jsr(sub)
            .vreturn()
            .bind(sub)
            .astore(1)
            .iload(0)
            .if_(Cond::Eq, other)
            .ret(1)
            .bind(other)
            .ret(1);
        let method = code.into_method("T", "m", "(I)V", true).unwrap();
        assert!(message(verify(&method, &hierarchy())).contains("multiple returns to jsr"));
    }

    #[test]
    fn test_recursive_subroutine_rejected() {
        let mut code = CodeBuilder::new();
        let sub = code.label();
        code.jsr(sub).vreturn().bind(sub).astore(0).jsr(sub);
        let method = code.into_method("T", "m", "()V", true).unwrap();
        assert!(message(verify(&method, &hierarchy())).contains("recursive"));
    }

    #[test]
    fn test_constructor_must_call_super() {
        let init = MethodRef::new("java/lang/Object", "<init>", "()V").unwrap();

        let mut code = CodeBuilder::new();
        code.aload(0)
            .invoke(InvokeKind::Special, init)
            .vreturn();
        let method = code.into_method("app/Foo", "<init>", "()V", false).unwrap();
        let verified = verify(&method, &hierarchy()).unwrap();
        assert_eq!(verified.nodes[0].frame.locals[0], VerifierType::UninitThis);
        assert_eq!(verified.nodes[2].frame.locals[0], VerifierType::class("app/Foo"));

        let mut code = CodeBuilder::new();
        code.vreturn();
        let method = code.into_method("app/Foo", "<init>", "()V", false).unwrap();
        assert!(message(verify(&method, &hierarchy())).contains("super constructor"));
    }

    #[test]
    fn test_new_then_init() {
        let init = MethodRef::new("app/Bar", "<init>", "()V").unwrap();
        let mut code = CodeBuilder::new();
        code.new_object("app/Bar")
            .insn(Instruction::Dup)
            .invoke(InvokeKind::Special, init)
            .areturn();
        let method = code
            .into_method("T", "make", "()Ljava/lang/Object;", true)
            .unwrap();

        let verified = verify(&method, &hierarchy()).unwrap();
        assert_eq!(
            verified.nodes[3].frame.stack,
            vec![VerifierType::class("app/Bar")]
        );
    }

    #[test]
    fn test_handler_frame() {
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.label(), code.label(), code.label());
        code.bind(start)
            .invoke(
                InvokeKind::Static,
                MethodRef::new("app/Util", "run", "()V").unwrap(),
            )
            .bind(end)
            .vreturn()
            .bind(handler)
            .astore(0)
            .vreturn();
        code.try_catch(start, end, handler, Some("java/lang/Exception"));
        let method = code.into_method("T", "m", "()V", true).unwrap();

        let verified = verify(&method, &hierarchy()).unwrap();
        assert_eq!(verified.nodes[0].handlers, vec![0]);
        let entry = verified.node_at(method.handlers[0].handler).unwrap();
        assert_eq!(
            entry.frame.stack,
            vec![VerifierType::class("java/lang/Exception")]
        );
    }

    #[test]
    fn test_protected_access_through_foreign_receiver() {
        let mut oracle = hierarchy();
        oracle.add_class("other/Base", OBJECT).add_class("app/Sub", "other/Base");
        let field = FieldRef::new("other/Base", "count", "I").unwrap().protected();

        let mut code = CodeBuilder::new();
        code.aload(0).getfield(field.clone()).ireturn();
        let method = code.into_method("app/Sub", "own", "()I", false).unwrap();
        assert!(verify(&method, &oracle).is_ok());

        let mut code = CodeBuilder::new();
        code.aload(1).getfield(field).ireturn();
        let method = code
            .into_method("app/Sub", "foreign", "(Lother/Base;)I", false)
            .unwrap();
        assert!(message(verify(&method, &oracle)).contains("protected"));
    }
}
