//! Abstract machine state at one instruction.

use std::collections::BTreeSet;

use crate::{
    bytecode::{ClassOracle, Instruction, ValueKind},
    verifier::VerifierType,
    Result,
};

/// Locals written since entering one active subroutine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubroutineMask {
    /// Address of the subroutine's first instruction
    pub entry: u32,
    /// Local indices stored to since entry, including writes by nested subroutines
    pub written: BTreeSet<u16>,
}

/// Snapshot of the operand stack, the locals and the active subroutines at a point in
/// the bytecode.
///
/// The stack holds one entry per value; `long` and `double` entries take two slots of
/// the `max_stack` budget. In the locals a `long` or `double` at index `n` leaves
/// [`VerifierType::Invalid`] at `n + 1`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Local variable types, exactly `max_locals` entries
    pub locals: Vec<VerifierType>,
    /// Operand stack, bottom first
    pub stack: Vec<VerifierType>,
    /// Active subroutines, outermost first
    pub subroutines: Vec<SubroutineMask>,
}

impl Frame {
    /// Creates a frame with every local unusable and an empty stack.
    #[must_use]
    pub fn new(max_locals: u16) -> Self {
        Frame {
            locals: vec![VerifierType::Invalid; usize::from(max_locals)],
            stack: Vec::new(),
            subroutines: Vec::new(),
        }
    }

    /// Stack depth in slots.
    #[must_use]
    pub fn stack_slots(&self) -> usize {
        self.stack.iter().map(|t| usize::from(t.width())).sum()
    }

    /// Returns `true` if `this` is still uninitialized anywhere in the frame.
    #[must_use]
    pub fn has_uninit_this(&self) -> bool {
        self.locals
            .iter()
            .chain(self.stack.iter())
            .any(|t| *t == VerifierType::UninitThis)
    }

    pub(crate) fn push(&mut self, ty: VerifierType, max_stack: u16, offset: u32) -> Result<()> {
        let ty = ty.as_stack();
        if self.stack_slots() + usize::from(ty.width()) > usize::from(max_stack) {
            return Err(verify_error!(offset, "operand stack overflow"));
        }
        self.stack.push(ty);
        Ok(())
    }

    pub(crate) fn pop(&mut self, offset: u32) -> Result<VerifierType> {
        self.stack
            .pop()
            .ok_or_else(|| verify_error!(offset, "operand stack underflow"))
    }

    pub(crate) fn pop_kind(&mut self, kind: ValueKind, offset: u32) -> Result<VerifierType> {
        let value = self.pop(offset)?;
        if value.matches_kind(kind) {
            Ok(value)
        } else {
            Err(verify_error!(offset, "expected {:?} on stack, found {}", kind, value))
        }
    }

    /// Pops a value that must be assignable to `target`.
    pub(crate) fn pop_assignable(
        &mut self,
        target: &VerifierType,
        oracle: &dyn ClassOracle,
        offset: u32,
    ) -> Result<VerifierType> {
        let value = self.pop(offset)?;
        if value.is_assignable_to(target, oracle) {
            Ok(value)
        } else {
            Err(verify_error!(offset, "expected {} on stack, found {}", target, value))
        }
    }

    pub(crate) fn local(&self, index: u16, offset: u32) -> Result<&VerifierType> {
        self.locals
            .get(usize::from(index))
            .ok_or_else(|| verify_error!(offset, "local variable index {} out of range", index))
    }

    /// Stores `ty` into local `index` and records the write in every active
    /// subroutine mask.
    pub(crate) fn set_local(&mut self, index: u16, ty: VerifierType, offset: u32) -> Result<()> {
        let width = ty.width();
        let i = usize::from(index);
        if i + usize::from(width) > self.locals.len() {
            return Err(verify_error!(offset, "local variable index {} out of range", index));
        }

        // Overwriting the upper half of a long or double kills the lower half
        if i > 0 && self.locals[i - 1].width() == 2 {
            self.locals[i - 1] = VerifierType::Invalid;
        }
        self.locals[i] = ty;
        if width == 2 {
            self.locals[i + 1] = VerifierType::Invalid;
        }

        for mask in &mut self.subroutines {
            mask.written.insert(index);
            if width == 2 {
                mask.written.insert(index + 1);
            }
        }
        Ok(())
    }

    /// Replaces every occurrence of `from` in the stack and locals.
    pub(crate) fn replace_all(&mut self, from: &VerifierType, to: &VerifierType) {
        for slot in self.locals.iter_mut().chain(self.stack.iter_mut()) {
            if slot == from {
                *slot = to.clone();
            }
        }
    }

    /// Merges `other` into `self`. Returns `true` if `self` changed.
    ///
    /// # Errors
    ///
    /// Fails if the stacks differ in depth, a stack slot has no common type, or the
    /// frames are inside different subroutines.
    pub(crate) fn merge_from(
        &mut self,
        other: &Frame,
        oracle: &dyn ClassOracle,
        offset: u32,
    ) -> Result<bool> {
        if self.stack.len() != other.stack.len() {
            return Err(verify_error!(
                offset,
                "stack depth mismatch at merge point ({} vs {})",
                self.stack.len(),
                other.stack.len()
            ));
        }

        let entries = |f: &Frame| f.subroutines.iter().map(|m| m.entry).collect::<Vec<_>>();
        if entries(&*self) != entries(other) {
            return Err(verify_error!(offset, "inconsistent subroutine nesting at merge point"));
        }

        let mut changed = false;
        for (current, incoming) in self.stack.iter_mut().zip(other.stack.iter()) {
            let merged = current.merge(incoming, oracle);
            if merged == VerifierType::Invalid {
                return Err(verify_error!(
                    offset,
                    "incompatible stack types {} and {} at merge point",
                    current,
                    incoming
                ));
            }
            if merged != *current {
                *current = merged;
                changed = true;
            }
        }

        for (current, incoming) in self.locals.iter_mut().zip(other.locals.iter()) {
            let merged = current.merge(incoming, oracle);
            if merged != *current {
                *current = merged;
                changed = true;
            }
        }

        for (mask, incoming) in self.subroutines.iter_mut().zip(other.subroutines.iter()) {
            for &index in &incoming.written {
                changed |= mask.written.insert(index);
            }
        }

        Ok(changed)
    }
}

/// Pops values totalling exactly `slots` stack slots, returned bottom first.
fn pop_slots<T>(stack: &mut Vec<T>, slots: u16, width: &impl Fn(&T) -> u16) -> Option<Vec<T>> {
    let mut taken = Vec::new();
    let mut total = 0;
    while total < slots {
        let value = stack.pop()?;
        total += width(&value);
        taken.push(value);
    }
    if total != slots {
        return None;
    }
    taken.reverse();
    Some(taken)
}

/// Applies a `pop`, `dup` or `swap` family instruction to a stack of values.
///
/// Shared by the verifier, which shuffles types, and the block builder, which
/// shuffles SSA variables. Returns `false` if the instruction is not a shuffle.
///
/// # Errors
///
/// Returns the reason when the stack is too shallow or the instruction would split a
/// category 2 value.
pub(crate) fn shuffle<T: Clone>(
    insn: &Instruction,
    stack: &mut Vec<T>,
    width: impl Fn(&T) -> u16,
) -> std::result::Result<bool, &'static str> {
    const SPLIT: &str = "stack shuffle splits a long or double, or underflows";

    // (slots copied from the top, slots they are inserted below)
    let (top, under) = match insn {
        Instruction::Pop => {
            pop_slots(stack, 1, &width).ok_or(SPLIT)?;
            return Ok(true);
        }
        Instruction::Pop2 => {
            pop_slots(stack, 2, &width).ok_or(SPLIT)?;
            return Ok(true);
        }
        Instruction::Swap => {
            let a = pop_slots(stack, 1, &width).ok_or(SPLIT)?;
            let b = pop_slots(stack, 1, &width).ok_or(SPLIT)?;
            stack.extend(a);
            stack.extend(b);
            return Ok(true);
        }
        Instruction::Dup => (1, 0),
        Instruction::DupX1 => (1, 1),
        Instruction::DupX2 => (1, 2),
        Instruction::Dup2 => (2, 0),
        Instruction::Dup2X1 => (2, 1),
        Instruction::Dup2X2 => (2, 2),
        _ => return Ok(false),
    };

    let copied = pop_slots(stack, top, &width).ok_or(SPLIT)?;
    let below = pop_slots(stack, under, &width).ok_or(SPLIT)?;
    stack.extend(copied.iter().cloned());
    stack.extend(below);
    stack.extend(copied);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::ClassHierarchy;

    fn w(v: &char) -> u16 {
        if v.is_uppercase() {
            2
        } else {
            1
        }
    }

    #[test]
    fn test_shuffles() {
        let mut stack = vec!['a', 'b', 'c'];
        assert!(shuffle(&Instruction::DupX2, &mut stack, w).unwrap());
        assert_eq!(stack, vec!['c', 'a', 'b', 'c']);

        let mut stack = vec!['a', 'L'];
        shuffle(&Instruction::Dup2X1, &mut stack, w).unwrap();
        assert_eq!(stack, vec!['L', 'a', 'L']);

        let mut stack = vec!['a', 'b'];
        shuffle(&Instruction::Swap, &mut stack, w).unwrap();
        assert_eq!(stack, vec!['b', 'a']);

        let mut stack = vec!['a', 'L'];
        assert!(shuffle(&Instruction::Dup, &mut stack, w).is_err());
        assert!(!shuffle(&Instruction::Nop, &mut vec!['a'], w).unwrap());
    }

    #[test]
    fn test_set_local_wide_values() {
        let mut frame = Frame::new(4);
        frame.subroutines.push(SubroutineMask {
            entry: 10,
            written: BTreeSet::new(),
        });
        frame.set_local(1, VerifierType::Long, 0).unwrap();
        assert_eq!(frame.locals[2], VerifierType::Invalid);

        frame.set_local(2, VerifierType::Int, 0).unwrap();
        assert_eq!(frame.locals[1], VerifierType::Invalid);
        assert_eq!(
            frame.subroutines[0].written,
            [1, 2].into_iter().collect::<BTreeSet<u16>>()
        );
        assert!(frame.set_local(3, VerifierType::Double, 0).is_err());
    }

    #[test]
    fn test_merge_depth_mismatch_is_fatal() {
        let oracle = ClassHierarchy::new();
        let mut a = Frame::new(1);
        let mut b = Frame::new(1);
        b.push(VerifierType::Int, 4, 0).unwrap();
        assert!(a.merge_from(&b, &oracle, 5).is_err());

        a.push(VerifierType::Float, 4, 0).unwrap();
        assert!(a.merge_from(&b, &oracle, 5).is_err());
    }

    #[test]
    fn test_merge_locals_to_invalid() {
        let oracle = ClassHierarchy::new();
        let mut a = Frame::new(2);
        let mut b = Frame::new(2);
        a.set_local(0, VerifierType::Int, 0).unwrap();
        b.set_local(0, VerifierType::Float, 0).unwrap();
        assert!(a.merge_from(&b, &oracle, 0).unwrap());
        assert_eq!(a.locals[0], VerifierType::Invalid);
        assert!(!a.merge_from(&b, &oracle, 0).unwrap());
    }
}
