//! Fluent bytecode assembly with labels.
//!
//! [`CodeBuilder`] lays out instructions at realistic addresses and resolves forward
//! and backward label references when the method is finished. Tests and benchmarks
//! use it to write methods the way `javac` output reads.
//!
//! ```rust
//! use classflow::bytecode::{CodeBuilder, Cond, Instruction, ValueKind};
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
//!
//! let method = code.into_method("Demo", "sign", "(I)I", true)?;
//! assert_eq!(method.code.len(), 6);
//! assert_eq!(method.code[1].insn, Instruction::If(Cond::Lt, method.code[4].offset));
//! # Ok::<(), classflow::Error>(())
//! ```

use crate::{
    bytecode::{
        ArithOp, CodeItem, Cond, Constant, ExceptionHandler, FieldRef, Instruction, InvokeKind,
        MethodBody, MethodDescriptor, MethodRef, ValueKind,
    },
    Error, Result,
};

/// A position in the code, bound with [`CodeBuilder::bind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(usize);

struct PendingHandler {
    start: Label,
    end: Label,
    handler: Label,
    catch_type: Option<String>,
}

/// Builder for method bytecode.
///
/// Misuse such as binding a label twice is recorded and reported by
/// [`CodeBuilder::finish`], so calls can be chained freely.
#[derive(Default)]
pub struct CodeBuilder {
    items: Vec<CodeItem>,
    /// Whether the targets of `items[i]` are label indices awaiting resolution
    labeled: Vec<bool>,
    labels: Vec<Option<u32>>,
    handlers: Vec<PendingHandler>,
    offset: u32,
    max_stack: Option<u16>,
    max_locals: Option<u16>,
    errors: Vec<String>,
}

impl CodeBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates an unbound label.
    pub fn label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Binds `label` to the address of the next instruction.
    pub fn bind(&mut self, label: Label) -> &mut Self {
        match self.labels.get(label.0).copied() {
            Some(None) => self.labels[label.0] = Some(self.offset),
            Some(Some(_)) => self.errors.push(format!("label {} bound twice", label.0)),
            None => self.errors.push(format!("label {} does not exist", label.0)),
        }
        self
    }

    /// Overrides the operand stack limit. Defaults to 255.
    pub fn max_stack(&mut self, max_stack: u16) -> &mut Self {
        self.max_stack = Some(max_stack);
        self
    }

    /// Overrides the local variable limit. Defaults to the highest slot used.
    pub fn max_locals(&mut self, max_locals: u16) -> &mut Self {
        self.max_locals = Some(max_locals);
        self
    }

    /// Appends an instruction whose targets, if any, are already addresses.
    pub fn insn(&mut self, insn: Instruction) -> &mut Self {
        self.push(insn, false)
    }

    fn push(&mut self, insn: Instruction, labeled: bool) -> &mut Self {
        let width = insn.encoded_len();
        self.items.push(CodeItem {
            offset: self.offset,
            insn,
        });
        self.labeled.push(labeled);
        self.offset += width;
        self
    }

    fn branch(&mut self, insn: Instruction) -> &mut Self {
        self.push(insn, true)
    }

    /// Registers an exception handler covering `[start, end)`.
    pub fn try_catch(
        &mut self,
        start: Label,
        end: Label,
        handler: Label,
        catch_type: Option<&str>,
    ) -> &mut Self {
        self.handlers.push(PendingHandler {
            start,
            end,
            handler,
            catch_type: catch_type.map(str::to_string),
        });
        self
    }

    /// `iconst`/`bipush`/`sipush`/`ldc`
    pub fn iconst(&mut self, value: i32) -> &mut Self {
        self.insn(Instruction::Const(Constant::Int(value)))
    }

    /// `aconst_null`
    pub fn aconst_null(&mut self) -> &mut Self {
        self.insn(Instruction::Const(Constant::Null))
    }

    /// `iload`
    pub fn iload(&mut self, index: u16) -> &mut Self {
        self.insn(Instruction::Load(ValueKind::Int, index))
    }

    /// `istore`
    pub fn istore(&mut self, index: u16) -> &mut Self {
        self.insn(Instruction::Store(ValueKind::Int, index))
    }

    /// `aload`
    pub fn aload(&mut self, index: u16) -> &mut Self {
        self.insn(Instruction::Load(ValueKind::Reference, index))
    }

    /// `astore`
    pub fn astore(&mut self, index: u16) -> &mut Self {
        self.insn(Instruction::Store(ValueKind::Reference, index))
    }

    /// `iadd`
    pub fn iadd(&mut self) -> &mut Self {
        self.insn(Instruction::Arith(ValueKind::Int, ArithOp::Add))
    }

    /// `ireturn`
    pub fn ireturn(&mut self) -> &mut Self {
        self.insn(Instruction::Return(Some(ValueKind::Int)))
    }

    /// `areturn`
    pub fn areturn(&mut self) -> &mut Self {
        self.insn(Instruction::Return(Some(ValueKind::Reference)))
    }

    /// `return`
    pub fn vreturn(&mut self) -> &mut Self {
        self.insn(Instruction::Return(None))
    }

    /// `athrow`
    pub fn athrow(&mut self) -> &mut Self {
        self.insn(Instruction::Throw)
    }

    /// `new`
    pub fn new_object(&mut self, class: &str) -> &mut Self {
        self.insn(Instruction::New(class.to_string()))
    }

    /// `getfield`
    pub fn getfield(&mut self, field: FieldRef) -> &mut Self {
        self.insn(Instruction::GetField(field))
    }

    /// `invokevirtual`, `invokespecial`, `invokestatic` or `invokeinterface`
    pub fn invoke(&mut self, kind: InvokeKind, method: MethodRef) -> &mut Self {
        self.insn(Instruction::Invoke(kind, method))
    }

    /// `goto`
    pub fn goto(&mut self, target: Label) -> &mut Self {
        self.branch(Instruction::Goto(target.0 as u32))
    }

    /// `ifxx`, comparing an `int` against zero
    pub fn if_(&mut self, cond: Cond, target: Label) -> &mut Self {
        self.branch(Instruction::If(cond, target.0 as u32))
    }

    /// `if_icmpxx`
    pub fn if_icmp(&mut self, cond: Cond, target: Label) -> &mut Self {
        self.branch(Instruction::IfCmp(cond, target.0 as u32))
    }

    /// `ifnull` when `null`, otherwise `ifnonnull`
    pub fn if_null(&mut self, null: bool, target: Label) -> &mut Self {
        self.branch(Instruction::IfNull {
            null,
            target: target.0 as u32,
        })
    }

    /// `jsr`
    pub fn jsr(&mut self, target: Label) -> &mut Self {
        self.branch(Instruction::Jsr(target.0 as u32))
    }

    /// `ret`
    pub fn ret(&mut self, index: u16) -> &mut Self {
        self.insn(Instruction::Ret(index))
    }

    /// `tableswitch`/`lookupswitch`
    pub fn switch(&mut self, cases: &[(i32, Label)], default: Label) -> &mut Self {
        self.branch(Instruction::Switch {
            cases: cases.iter().map(|(k, l)| (*k, l.0 as u32)).collect(),
            default: default.0 as u32,
        })
    }

    /// Resolves labels and returns the instructions and exception table.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Builder`] if a label was bound twice, or if a referenced label
    /// was never bound.
    pub fn finish(&mut self) -> Result<(Vec<CodeItem>, Vec<ExceptionHandler>)> {
        if let Some(first) = self.errors.first() {
            return Err(Error::Builder(first.clone()));
        }

        let labels = &self.labels;
        let resolve = |label: u32| -> Result<u32> {
            labels
                .get(label as usize)
                .copied()
                .flatten()
                .ok_or_else(|| Error::Builder(format!("label {label} was never bound")))
        };

        let mut items = std::mem::take(&mut self.items);
        for (item, &labeled) in items.iter_mut().zip(self.labeled.iter()) {
            if labeled {
                item.insn.map_targets(resolve)?;
            }
        }

        let handlers = self
            .handlers
            .iter()
            .map(|h| {
                Ok(ExceptionHandler {
                    start: resolve(h.start.0 as u32)?,
                    end: resolve(h.end.0 as u32)?,
                    handler: resolve(h.handler.0 as u32)?,
                    catch_type: h.catch_type.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.labeled.clear();
        Ok((items, handlers))
    }

    /// Finishes the code and wraps it into a [`MethodBody`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::Builder`] for label misuse and [`Error::Descriptor`] if
    /// `descriptor` does not parse.
    pub fn into_method(
        &mut self,
        class_name: &str,
        name: &str,
        descriptor: &str,
        is_static: bool,
    ) -> Result<MethodBody> {
        let descriptor = MethodDescriptor::parse(descriptor)?;
        let (code, handlers) = self.finish()?;

        let param_slots = descriptor.param_slots() + u16::from(!is_static);
        let used_slots = code
            .iter()
            .filter_map(|item| match &item.insn {
                Instruction::Load(kind, n) | Instruction::Store(kind, n) => Some(n + kind.width()),
                Instruction::Iinc(n, _) | Instruction::Ret(n) => Some(n + 1),
                _ => None,
            })
            .max()
            .unwrap_or(0);

        Ok(MethodBody {
            class_name: class_name.to_string(),
            name: name.to_string(),
            descriptor,
            is_static,
            max_stack: self.max_stack.unwrap_or(255),
            max_locals: self.max_locals.unwrap_or(param_slots.max(used_slots)),
            code,
            handlers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_backward_labels() {
        let mut code = CodeBuilder::new();
        let top = code.label();
        let done = code.label();
        code.bind(top)
            .iload(0)
            .if_(Cond::Eq, done)
            .goto(top)
            .bind(done)
            .vreturn();

        let (items, _) = code.finish().unwrap();
        assert_eq!(items[0].offset, 0);
        assert_eq!(items[1].insn, Instruction::If(Cond::Eq, items[3].offset));
        assert_eq!(items[2].insn, Instruction::Goto(0));
    }

    #[test]
    fn test_label_errors() {
        let mut code = CodeBuilder::new();
        let l = code.label();
        code.goto(l);
        assert!(matches!(code.finish(), Err(Error::Builder(_))));

        let mut code = CodeBuilder::new();
        let l = code.label();
        code.bind(l).insn(Instruction::Nop).bind(l);
        assert!(matches!(code.finish(), Err(Error::Builder(_))));
    }

    #[test]
    fn test_method_limits() {
        let mut code = CodeBuilder::new();
        code.iconst(1).istore(3).vreturn();
        let method = code.into_method("T", "m", "(J)V", false).unwrap();
        assert_eq!(method.max_locals, 4);
        assert_eq!(method.max_stack, 255);

        let mut code = CodeBuilder::new();
        code.vreturn();
        let method = code.into_method("T", "m", "(JD)V", true).unwrap();
        assert_eq!(method.max_locals, 4);
    }
}
