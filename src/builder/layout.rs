//! Basic block boundaries.
//!
//! A block starts at:
//!
//! - the first instruction
//! - every target of a branch, `jsr`, `ret` or switch, and the instruction after one
//! - every handler entry, and the first and end address of every covered range
//! - the instruction after a covered instruction that may throw
//! - any instruction its predecessor in address order does not fall into
//!
//! Covered ranges starting and ending on block boundaries gives every block a uniform
//! set of covering handlers, and ending the block after a covered throwing
//! instruction makes that instruction the only one in the block with an exceptional
//! successor.

use std::collections::BTreeSet;

use crate::verifier::VerifiedMethod;

/// Node indices `[first, last]` of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BlockSpan {
    pub first: usize,
    pub last: usize,
}

/// Splits the verified instructions into basic blocks, in address order.
pub(crate) fn partition(verified: &VerifiedMethod) -> Vec<BlockSpan> {
    let nodes = &verified.nodes;
    if nodes.is_empty() {
        return Vec::new();
    }

    let mut leaders: BTreeSet<u32> = BTreeSet::new();
    leaders.insert(nodes[0].offset);
    for handler in &verified.handlers {
        leaders.insert(handler.start);
        leaders.insert(handler.end);
        leaders.insert(handler.handler);
    }

    let mut after_end = vec![false; nodes.len()];
    for (i, node) in nodes.iter().enumerate() {
        let covered_throw = !node.handlers.is_empty() && node.insn.may_throw();
        if node.insn.is_block_end() || covered_throw {
            leaders.extend(node.successors.iter().copied());
            if i + 1 < nodes.len() {
                after_end[i + 1] = true;
            }
        }
    }

    let mut spans = Vec::new();
    let mut first = 0;
    for i in 1..nodes.len() {
        let prev = &nodes[i - 1];
        let node = &nodes[i];
        let falls_in = prev.successors.contains(&node.offset);
        if leaders.contains(&node.offset) || after_end[i] || !falls_in {
            spans.push(BlockSpan { first, last: i - 1 });
            first = i;
        }
    }
    spans.push(BlockSpan {
        first,
        last: nodes.len() - 1,
    });
    spans
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, CodeBuilder, Cond, InvokeKind, MethodRef},
        verifier::verify,
    };

    #[test]
    fn test_branches_split_blocks() {
        let mut code = CodeBuilder::new();
        let negative = code.label();
        code.iload(0)
            .if_(Cond::Lt, negative)
            .iconst(2)
            .ireturn()
            .bind(negative)
            .iconst(1)
            .ireturn();
        let method = code.into_method("T", "sign", "(I)I", true).unwrap();
        let verified = verify(&method, &ClassHierarchy::with_java_lang()).unwrap();

        let spans = partition(&verified);
        assert_eq!(
            spans,
            vec![
                BlockSpan { first: 0, last: 1 },
                BlockSpan { first: 2, last: 3 },
                BlockSpan { first: 4, last: 5 },
            ]
        );
    }

    #[test]
    fn test_covered_call_ends_block() {
        let mut code = CodeBuilder::new();
        let (start, end, handler) = (code.label(), code.label(), code.label());
        let call = MethodRef::new("T", "a", "()V").unwrap();
        code.bind(start)
            .iconst(1)
            .istore(0)
            .invoke(InvokeKind::Static, call.clone())
            .invoke(InvokeKind::Static, call)
            .bind(end)
            .vreturn()
            .bind(handler)
            .astore(0)
            .vreturn()
            .try_catch(start, end, handler, None);
        let method = code.into_method("T", "m", "()V", true).unwrap();
        let verified = verify(&method, &ClassHierarchy::with_java_lang()).unwrap();

        let spans = partition(&verified);
        assert_eq!(spans.len(), 4);
        assert_eq!(spans[0], BlockSpan { first: 0, last: 2 });
        assert_eq!(spans[1], BlockSpan { first: 3, last: 3 });
        assert_eq!(spans[3], BlockSpan { first: 5, last: 6 });
    }
}
