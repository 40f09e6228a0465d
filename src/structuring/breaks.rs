//! Break scope placement.
//!
//! Blocks are emitted by walking the dominator tree. A block whose immediate
//! dominator sits inside a construct that does not contain the block follows that
//! construct: it is emitted after it, inside a labeled scope wrapping the
//! construct, so jumps to it are `break`s. A block with several forward
//! predecessors inside the same constructs as its immediate dominator is a merge:
//! it is emitted after a labeled scope wrapping the code of its dominator. A
//! chained switch target opens its own case, and the case before it is a labeled
//! scope that jumps to it leave. A handler entered only from one try block goes
//! straight into that try's catch clause. Every other block is emitted in place at
//! its only jump.
//!
//! Labels are numbered in reverse postorder, loop labels first.

use std::collections::BTreeMap;

use crate::{
    ir::BlockId,
    structuring::{intervals::Analysis, ordering::Family, Label},
    utils::graph::NodeSet,
};

/// A construct opened at a head block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Wrap {
    While(usize),
    /// Tries with one body, innermost first
    Try(Vec<usize>),
}

impl Wrap {
    pub fn members(&self) -> &[usize] {
        match self {
            Wrap::While(i) => std::slice::from_ref(i),
            Wrap::Try(group) => group,
        }
    }
}

/// Where every block is emitted.
#[derive(Debug, Default)]
pub(crate) struct Placement {
    /// `break` target label of every follow and merge block
    pub labels: BTreeMap<BlockId, Label>,
    /// `continue` target label of every loop head
    pub loop_labels: BTreeMap<BlockId, Label>,
    /// Blocks emitted after each construct, in reverse postorder
    pub follows: BTreeMap<usize, Vec<BlockId>>,
    /// Blocks emitted after the code of each block, in reverse postorder
    pub merges: BTreeMap<BlockId, Vec<BlockId>>,
    /// Switch targets opening the case after the one they are entered from
    pub fallthroughs: BTreeMap<BlockId, BlockId>,
    /// Handlers emitted inside their catch clause
    pub in_catch: NodeSet,
    /// Constructs opened at each head, outermost first
    pub wraps: BTreeMap<BlockId, Vec<Wrap>>,
}

impl Placement {
    /// Follows of every member of a wrap, in reverse postorder.
    pub fn follows_of(&self, analysis: &Analysis<'_>, wrap: &Wrap) -> Vec<BlockId> {
        let mut result: Vec<BlockId> = wrap
            .members()
            .iter()
            .filter_map(|i| self.follows.get(i))
            .flatten()
            .copied()
            .collect();
        result.sort_by_key(|&b| analysis.position(b));
        result.dedup();
        result
    }
}

/// Decides the place of every block of the graph.
pub(crate) fn place(analysis: &Analysis<'_>, family: &Family) -> Placement {
    let mut placement = Placement::default();
    let constructs = &family.constructs;

    for (i, c) in constructs.iter().enumerate() {
        let wraps = placement.wraps.entry(c.head).or_default();
        if c.is_while() {
            wraps.push(Wrap::While(i));
            continue;
        }
        if let Some(Wrap::Try(group)) = wraps.last_mut() {
            if constructs[group[0]].body == c.body {
                group.push(i);
                continue;
            }
        }
        wraps.push(Wrap::Try(vec![i]));
    }
    for wraps in placement.wraps.values_mut() {
        for wrap in wraps.iter_mut() {
            if let Wrap::Try(group) = wrap {
                group.reverse();
            }
        }
    }

    for &y in analysis.rpo.iter().skip(1) {
        let Some(a) = analysis.doms.immediate_dominator(y) else {
            continue;
        };
        let outer = family
            .enclosing(a)
            .into_iter()
            .find(|&i| !constructs[i].body.contains(y));
        match outer {
            Some(i) => {
                let catchers: Vec<usize> = (0..constructs.len())
                    .filter(|&j| constructs[j].handler() == Some(y))
                    .collect();
                let own_catch = matches!(catchers.as_slice(), [t] if constructs[*t].body == constructs[i].body);
                if own_catch && !analysis.has_normal_preds(y) {
                    placement.in_catch.insert(y);
                } else {
                    placement.follows.entry(i).or_default().push(y);
                }
            }
            None => {
                if let Some(&member) = analysis.fallthroughs.get(&y) {
                    placement.fallthroughs.insert(y, member);
                } else if analysis.forward_preds(y) >= 2 || analysis.is_handler_target(y) {
                    placement.merges.entry(a).or_default().push(y);
                }
            }
        }
    }

    let targets: NodeSet = placement
        .follows
        .values()
        .chain(placement.merges.values())
        .flatten()
        .chain(placement.fallthroughs.keys())
        .copied()
        .collect();
    let mut next = 0;
    for &b in &analysis.rpo {
        if analysis.loops.contains_key(&b) {
            placement.loop_labels.insert(b, Label(next));
            next += 1;
        }
        if targets.contains(b) {
            placement.labels.insert(b, Label(next));
            next += 1;
        }
    }
    placement
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, Cond},
        ir::{GraphBuilder, VarType},
        structuring::{intervals::candidates, ordering::order, ExceptionSet},
    };

    #[test]
    fn test_diamond_join_is_a_merge() {
        let mut b = GraphBuilder::new("diamond");
        let x = b.input(VarType::Int);
        let [entry, left, right, join] = b.blocks();
        let zero = b.int(0);
        b.branch(entry, Cond::Lt, x, zero, left, right);
        b.goto(left, join);
        b.goto(right, join);
        b.ret(join, None);
        let graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let analysis = Analysis::new(&graph, &oracle);
        let family = order(&analysis, candidates(&analysis)).unwrap();
        let placement = place(&analysis, &family);

        assert_eq!(placement.merges.get(&entry), Some(&vec![join]));
        assert_eq!(placement.labels.get(&join), Some(&Label(0)));
        assert!(placement.follows.is_empty());
        assert!(placement.loop_labels.is_empty());
    }

    #[test]
    fn test_loop_exit_follows_the_loop_and_handler_goes_in_catch() {
        // entry -> head; head -> body | exit; body: a() -> head; handler of a -> exit
        let mut b = GraphBuilder::new("loop");
        let x = b.input(VarType::Int);
        let [entry, head, body, exit, handler] = b.blocks();
        let zero = b.int(0);
        b.goto(entry, head);
        b.branch(head, Cond::Lt, x, zero, body, exit);
        b.call(body, "a");
        b.goto(body, head);
        b.ret(exit, None);
        b.goto(handler, head);
        b.handler(body, ExceptionSet::all(), handler);
        let graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let analysis = Analysis::new(&graph, &oracle);
        let family = order(&analysis, candidates(&analysis)).unwrap();
        let placement = place(&analysis, &family);

        let lp = family.constructs.iter().position(|c| c.is_while()).unwrap();
        assert_eq!(placement.follows.get(&lp), Some(&vec![exit]));
        assert!(placement.in_catch.contains(handler));
        assert_eq!(placement.loop_labels.get(&head), Some(&Label(0)));
        assert_eq!(placement.labels.get(&exit), Some(&Label(1)));
        assert_eq!(placement.wraps.get(&head), Some(&vec![Wrap::While(lp)]));
    }
}
