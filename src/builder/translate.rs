//! Instruction to operation translation.
//!
//! A [`Translator`] replays one block's instructions on a symbolic frame whose
//! entries are SSA variables instead of verifier types. Every instruction maps to
//! exactly the operations its semantics prescribe; pure stack and local traffic
//! (`dup`, `swap`, loads, stores) produces no operation at all and only moves
//! variables between slots.

use crate::{
    bytecode::{
        ArithOp, BaseType, Cond, Instruction, InvokeKind, TypeDesc, ValueKind,
    },
    builder::ExitState,
    ir::{BlockId, Literal, MethodGraph, OpId, OpKind, Terminator, VarId, VarType},
    verifier::{shuffle, InstructionNode},
    Result,
};

/// SSA type of a value described by `desc`.
pub(crate) fn desc_type(desc: &TypeDesc) -> VarType {
    match desc {
        TypeDesc::Base(BaseType::Long) => VarType::Long,
        TypeDesc::Base(BaseType::Float) => VarType::Float,
        TypeDesc::Base(BaseType::Double) => VarType::Double,
        TypeDesc::Base(_) => VarType::Int,
        TypeDesc::Object(_) | TypeDesc::Array(_) => VarType::Object,
    }
}

/// Symbolic execution state of one block.
pub(crate) struct Translator<'g> {
    graph: &'g mut MethodGraph,
    block: BlockId,
    pub locals: Vec<Option<VarId>>,
    pub stack: Vec<Option<VarId>>,
    pub token: VarId,
    /// Exception object of the last operation that may throw, or of `athrow`
    pub thrown: Option<VarId>,
    offset: u32,
}

/// Control transfer at the end of a translated block, with targets still given as
/// addresses.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Exit {
    /// Continue at the next instruction
    FallThrough,
    /// A finished terminator whose targets are resolved by the caller
    Jump(PendingJump),
    /// Return or throw
    Done(Terminator),
}

/// A terminator with address targets.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingJump {
    Goto(u32),
    If {
        cond: Cond,
        lhs: VarId,
        rhs: VarId,
        taken: u32,
    },
    Switch {
        value: VarId,
        cases: Vec<(i32, u32)>,
        default: u32,
    },
    Jsr(u32),
    Ret,
}

impl<'g> Translator<'g> {
    pub fn new(graph: &'g mut MethodGraph, block: BlockId, state: ExitState) -> Self {
        Translator {
            graph,
            block,
            locals: state.locals,
            stack: state.stack,
            token: state.token,
            thrown: None,
            offset: 0,
        }
    }

    /// The state after the last translated instruction.
    pub fn state(&self) -> ExitState {
        ExitState {
            locals: self.locals.clone(),
            stack: self.stack.clone(),
            token: self.token,
            thrown: self.thrown,
        }
    }

    fn pop_slot(&mut self) -> Result<Option<VarId>> {
        self.stack
            .pop()
            .ok_or_else(|| consistency_error!("stack underflow building block at {}", self.offset))
    }

    fn pop(&mut self) -> Result<VarId> {
        self.pop_slot()?
            .ok_or_else(|| consistency_error!("return address used as a value at {}", self.offset))
    }

    fn pop_n(&mut self, n: usize) -> Result<Vec<VarId>> {
        let mut values = (0..n).map(|_| self.pop()).collect::<Result<Vec<_>>>()?;
        values.reverse();
        Ok(values)
    }

    fn push(&mut self, var: VarId) {
        self.stack.push(Some(var));
    }

    fn local(&self, index: u16) -> Result<VarId> {
        self.locals
            .get(usize::from(index))
            .copied()
            .flatten()
            .ok_or_else(|| consistency_error!("load of unset local {} at {}", index, self.offset))
    }

    fn set_local(&mut self, index: u16, value: Option<VarId>) -> Result<()> {
        let i = usize::from(index);
        if i >= self.locals.len() {
            return Err(consistency_error!("store to local {} out of range at {}", index, self.offset));
        }
        // A store into the upper half of a wide value kills it
        if i > 0 {
            if let Some(prev) = self.locals[i - 1] {
                if self.graph.var(prev).ty.width() == 2 {
                    self.locals[i - 1] = None;
                }
            }
        }
        self.locals[i] = value;
        if let Some(v) = value {
            if self.graph.var(v).ty.width() == 2 && i + 1 < self.locals.len() {
                self.locals[i + 1] = None;
            }
        }
        Ok(())
    }

    fn literal(&mut self, literal: Literal) -> VarId {
        self.graph.literal(literal)
    }

    fn pure(&mut self, kind: OpKind, inputs: Vec<VarId>, ty: VarType) -> Result<VarId> {
        let op = self.graph.push_op(self.block, kind, inputs, Some(ty), Some(self.offset));
        self.graph
            .op(op)
            .value
            .ok_or_else(|| consistency_error!("operation at {} has no result", self.offset))
    }

    /// Appends an ordered operation, threading the token through it.
    fn ordered(&mut self, kind: OpKind, args: Vec<VarId>, value: Option<(VarType, Option<TypeDesc>)>) -> OpId {
        let mut inputs = Vec::with_capacity(args.len() + 1);
        inputs.push(self.token);
        inputs.extend(args);
        let ty = value.as_ref().map(|(ty, _)| *ty);
        let op = self.graph.push_op(self.block, kind, inputs, ty, Some(self.offset));
        let (value_var, token, thrown) = {
            let operation = self.graph.op(op);
            (operation.value, operation.token, operation.thrown)
        };
        if let (Some(var), Some((_, Some(decl)))) = (value_var, value) {
            self.graph.var_mut(var).decl = Some(decl);
        }
        if let Some(token) = token {
            self.token = token;
        }
        self.thrown = thrown;
        if let Some(var) = value_var {
            self.push(var);
        }
        op
    }

    fn arith(&mut self, kind: ValueKind, op: ArithOp, a: VarId, b: VarId) -> Result<VarId> {
        let op_kind = OpKind::Arith { kind, op };
        if op.may_throw(kind) {
            let id = self.ordered(op_kind, vec![a, b], Some((kind.into(), None)));
            self.stack.pop();
            self.graph
                .op(id)
                .value
                .ok_or_else(|| consistency_error!("division at {} has no result", self.offset))
        } else {
            self.pure(op_kind, vec![a, b], kind.into())
        }
    }

    /// Translates one instruction.
    pub fn step(&mut self, node: &InstructionNode) -> Result<Exit> {
        self.offset = node.offset;
        log::trace!("translate {}: {}", node.offset, node.insn);

        match &node.insn {
            Instruction::Nop => {}
            Instruction::Const(constant) => {
                let var = self.literal(Literal::from(constant));
                self.push(var);
            }
            Instruction::Load(_, index) => {
                let var = self.local(*index)?;
                self.push(var);
            }
            Instruction::Store(_, index) => {
                let value = self.pop_slot()?;
                self.set_local(*index, value)?;
            }
            Instruction::Iinc(index, delta) => {
                let current = self.local(*index)?;
                let delta = self.literal(Literal::Int(*delta));
                let sum = self.arith(ValueKind::Int, ArithOp::Add, current, delta)?;
                self.set_local(*index, Some(sum))?;
            }
            Instruction::ArrayLoad(kind) => {
                let [array, index] = self.pop_array::<2>()?;
                let element = self
                    .graph
                    .var(array)
                    .decl
                    .as_ref()
                    .filter(|d| d.dimensions() > 0)
                    .map(|d| match d {
                        TypeDesc::Array(inner) => (**inner).clone(),
                        other => other.clone(),
                    });
                let ty = VarType::from(kind.value_kind());
                let decl = if ty == VarType::Object { element } else { None };
                self.ordered(OpKind::ArrayLoad(*kind), vec![array, index], Some((ty, decl)));
            }
            Instruction::ArrayStore(kind) => {
                let [array, index, value] = self.pop_array::<3>()?;
                self.ordered(OpKind::ArrayStore(*kind), vec![array, index, value], None);
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
                let graph = &*self.graph;
                let width = |slot: &Option<VarId>| slot.map_or(1, |v| graph.var(v).ty.width());
                shuffle(&node.insn, &mut self.stack, width)
                    .map_err(|reason| consistency_error!("{} at {}", reason, node.offset))?;
            }
            Instruction::Arith(kind, op) => {
                let [a, b] = self.pop_array::<2>()?;
                let result = self.arith(*kind, *op, a, b)?;
                self.push(result);
            }
            Instruction::Neg(kind) => {
                let a = self.pop()?;
                let result = self.pure(OpKind::Neg(*kind), vec![a], (*kind).into())?;
                self.push(result);
            }
            Instruction::Convert(from, to) => {
                let a = self.pop()?;
                let kind = OpKind::Convert {
                    from: *from,
                    to: *to,
                };
                let result = self.pure(kind, vec![a], (*to).into())?;
                self.push(result);
            }
            Instruction::Truncate(narrow) => {
                let a = self.pop()?;
                let result = self.pure(OpKind::Truncate(*narrow), vec![a], VarType::Int)?;
                self.push(result);
            }
            Instruction::Compare(kind) => {
                let [a, b] = self.pop_array::<2>()?;
                let result = self.pure(OpKind::Compare(*kind), vec![a, b], VarType::Int)?;
                self.push(result);
            }
            Instruction::If(cond, target) => {
                let lhs = self.pop()?;
                let rhs = self.literal(Literal::Int(0));
                return Ok(Exit::Jump(PendingJump::If {
                    cond: *cond,
                    lhs,
                    rhs,
                    taken: *target,
                }));
            }
            Instruction::IfCmp(cond, target) => {
                let [lhs, rhs] = self.pop_array::<2>()?;
                return Ok(Exit::Jump(PendingJump::If {
                    cond: *cond,
                    lhs,
                    rhs,
                    taken: *target,
                }));
            }
            Instruction::IfRef { equal, target } => {
                let [lhs, rhs] = self.pop_array::<2>()?;
                let cond = if *equal { Cond::Eq } else { Cond::Ne };
                return Ok(Exit::Jump(PendingJump::If {
                    cond,
                    lhs,
                    rhs,
                    taken: *target,
                }));
            }
            Instruction::IfNull { null, target } => {
                let lhs = self.pop()?;
                let rhs = self.literal(Literal::Null);
                let cond = if *null { Cond::Eq } else { Cond::Ne };
                return Ok(Exit::Jump(PendingJump::If {
                    cond,
                    lhs,
                    rhs,
                    taken: *target,
                }));
            }
            Instruction::Goto(target) => return Ok(Exit::Jump(PendingJump::Goto(*target))),
            Instruction::Jsr(target) => {
                // The return address has no SSA value
                self.stack.push(None);
                return Ok(Exit::Jump(PendingJump::Jsr(*target)));
            }
            Instruction::Ret(_) => return Ok(Exit::Jump(PendingJump::Ret)),
            Instruction::Switch { cases, default } => {
                let value = self.pop()?;
                return Ok(Exit::Jump(PendingJump::Switch {
                    value,
                    cases: cases.clone(),
                    default: *default,
                }));
            }
            Instruction::Return(kind) => {
                let value = match kind {
                    Some(_) => Some(self.pop()?),
                    None => None,
                };
                return Ok(Exit::Done(Terminator::Return(value)));
            }
            Instruction::GetStatic(field) => {
                let value = value_of(&field.desc);
                self.ordered(OpKind::GetStatic(field.clone()), Vec::new(), Some(value));
            }
            Instruction::PutStatic(field) => {
                let value = self.pop()?;
                self.ordered(OpKind::PutStatic(field.clone()), vec![value], None);
            }
            Instruction::GetField(field) => {
                let object = self.pop()?;
                let value = value_of(&field.desc);
                self.ordered(OpKind::GetField(field.clone()), vec![object], Some(value));
            }
            Instruction::PutField(field) => {
                let [object, value] = self.pop_array::<2>()?;
                self.ordered(OpKind::PutField(field.clone()), vec![object, value], None);
            }
            Instruction::Invoke(kind, method) => {
                let mut args = self.pop_n(method.desc.params.len())?;
                if *kind != InvokeKind::Static {
                    let receiver = self.pop()?;
                    args.insert(0, receiver);
                }
                let value = method.desc.ret.as_ref().map(value_of);
                let op_kind = OpKind::Invoke {
                    kind: *kind,
                    method: method.clone(),
                };
                self.ordered(op_kind, args, value);
            }
            Instruction::New(class) => {
                let decl = TypeDesc::object(class.clone());
                self.ordered(
                    OpKind::New(class.clone()),
                    Vec::new(),
                    Some((VarType::Object, Some(decl))),
                );
            }
            Instruction::NewArray(element) => {
                let length = self.pop()?;
                let decl = TypeDesc::Array(Box::new(element.clone()));
                self.ordered(
                    OpKind::NewArray(element.clone()),
                    vec![length],
                    Some((VarType::Object, Some(decl))),
                );
            }
            Instruction::MultiNewArray(desc, dims) => {
                let lengths = self.pop_n(usize::from(*dims))?;
                let kind = OpKind::MultiNewArray {
                    desc: desc.clone(),
                    dims: *dims,
                };
                self.ordered(kind, lengths, Some((VarType::Object, Some(desc.clone()))));
            }
            Instruction::ArrayLength => {
                let array = self.pop()?;
                self.ordered(OpKind::ArrayLength, vec![array], Some((VarType::Int, None)));
            }
            Instruction::Throw => {
                let exception = self.pop()?;
                self.thrown = Some(exception);
                return Ok(Exit::Done(Terminator::Throw(exception)));
            }
            Instruction::CheckCast(desc) => {
                let object = self.pop()?;
                self.ordered(
                    OpKind::CheckCast(desc.clone()),
                    vec![object],
                    Some((VarType::Object, Some(desc.clone()))),
                );
            }
            Instruction::InstanceOf(desc) => {
                let object = self.pop()?;
                let result = self.pure(OpKind::InstanceOf(desc.clone()), vec![object], VarType::Int)?;
                self.push(result);
            }
            Instruction::MonitorEnter => {
                let object = self.pop()?;
                self.ordered(OpKind::MonitorEnter, vec![object], None);
            }
            Instruction::MonitorExit => {
                let object = self.pop()?;
                self.ordered(OpKind::MonitorExit, vec![object], None);
            }
        }
        Ok(Exit::FallThrough)
    }

    /// Pops `N` values, returning them bottom first.
    fn pop_array<const N: usize>(&mut self) -> Result<[VarId; N]> {
        let values = self.pop_n(N)?;
        values
            .try_into()
            .map_err(|_| consistency_error!("stack shape mismatch at {}", self.offset))
    }
}

fn value_of(desc: &TypeDesc) -> (VarType, Option<TypeDesc>) {
    let ty = desc_type(desc);
    let decl = (ty == VarType::Object).then(|| desc.clone());
    (ty, decl)
}
