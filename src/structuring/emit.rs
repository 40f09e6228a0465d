//! Tree emission.
//!
//! Emission walks the dominator tree with an explicit task stack, appending
//! statements to draft sequences held in an arena. Every draft sequence ends in
//! an explicit transfer: a `return`, an `athrow`, a `break`, a `continue`, or a
//! branch whose arms all end in one. A cleanup pass then drops jumps that only
//! restate where control would go anyway, drops labels nothing jumps to, and
//! splices unlabeled sequences into the sequence around them.
//!
//! Switch cases come in bytecode order. A case that falls into the next one is a
//! scope labeled with the next case's block; its jumps there become `break`s, and
//! the one at its end is dropped by the cleanup like any other.

use std::collections::BTreeSet;

use crate::{
    ir::{BlockId, Terminator},
    structuring::{
        breaks::{Placement, Wrap},
        intervals::Analysis,
        normalize::case_order,
        ordering::Family,
        CatchClause, ExceptionSet, Label, Statement, SwitchCase,
    },
    utils::graph::NodeSet,
    Result,
};

enum Draft {
    Block(BlockId),
    Seq {
        label: Option<Label>,
        items: Vec<usize>,
    },
    While {
        label: Label,
        body: usize,
    },
    If {
        block: BlockId,
        then_seq: usize,
        else_seq: usize,
    },
    Switch {
        block: BlockId,
        cases: Vec<(Vec<i32>, bool, usize)>,
    },
    Try {
        body: usize,
        catches: Vec<(ExceptionSet, BlockId, usize)>,
    },
    Break(Label),
    Continue(Label),
}

impl Draft {
    fn children(&self) -> Vec<usize> {
        match self {
            Draft::Block(_) | Draft::Break(_) | Draft::Continue(_) => Vec::new(),
            Draft::Seq { items, .. } => items.clone(),
            Draft::While { body, .. } => vec![*body],
            Draft::If {
                then_seq, else_seq, ..
            } => vec![*then_seq, *else_seq],
            Draft::Switch { cases, .. } => cases.iter().map(|c| c.2).collect(),
            Draft::Try { body, catches } => std::iter::once(*body).chain(catches.iter().map(|c| c.2)).collect(),
        }
    }
}

enum Task {
    /// Emit `x` with the constructs it heads from `level` inward
    Node { x: BlockId, level: usize, seq: usize },
    /// Emit `x` inside the scopes of its first `count` merge blocks
    Within { x: BlockId, count: usize, seq: usize },
    Branch { from: BlockId, to: BlockId, seq: usize },
    Catch { construct: usize, seq: usize },
}

struct Emitter<'a, 'g> {
    analysis: &'a Analysis<'g>,
    family: &'a Family,
    placement: &'a Placement,
    drafts: Vec<Draft>,
    tasks: Vec<Task>,
    emitted: NodeSet,
}

/// Builds the statement tree of the analyzed graph.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] if a block would be emitted twice
/// or not at all, a jump has no label to use, or a subroutine survived assembly.
pub(crate) fn emit(analysis: &Analysis<'_>, family: &Family, placement: &Placement) -> Result<Statement> {
    let mut emitter = Emitter {
        analysis,
        family,
        placement,
        drafts: Vec::new(),
        tasks: Vec::new(),
        emitted: NodeSet::new(),
    };
    let root = emitter.run()?;
    emitter.elide(root);
    emitter.finish(root)
}

impl<'a, 'g> Emitter<'a, 'g> {
    fn add(&mut self, draft: Draft) -> usize {
        self.drafts.push(draft);
        self.drafts.len() - 1
    }

    fn seq(&mut self, label: Option<Label>) -> usize {
        self.add(Draft::Seq {
            label,
            items: Vec::new(),
        })
    }

    fn append(&mut self, seq: usize, item: usize) {
        if let Draft::Seq { items, .. } = &mut self.drafts[seq] {
            items.push(item);
        }
    }

    fn push(&mut self, seq: usize, draft: Draft) {
        let item = self.add(draft);
        self.append(seq, item);
    }

    fn label(&self, block: BlockId) -> Result<Label> {
        self.placement
            .labels
            .get(&block)
            .copied()
            .ok_or_else(|| consistency_error!("{} is a jump target without a label", block))
    }

    fn loop_label(&self, head: BlockId) -> Result<Label> {
        self.placement
            .loop_labels
            .get(&head)
            .copied()
            .ok_or_else(|| consistency_error!("{} is entered by a back edge but heads no loop", head))
    }

    fn run(&mut self) -> Result<usize> {
        let root = self.seq(None);
        self.tasks.push(Task::Node {
            x: self.analysis.graph.entry(),
            level: 0,
            seq: root,
        });
        while let Some(task) = self.tasks.pop() {
            match task {
                Task::Node { x, level, seq } => self.node(x, level, seq)?,
                Task::Within { x, count, seq } => self.within(x, count, seq)?,
                Task::Branch { from, to, seq } => self.branch(from, to, seq)?,
                Task::Catch { construct, seq } => self.catch(construct, seq)?,
            }
        }
        if let Some(missing) = self.analysis.nodes.iter().find(|&b| !self.emitted.contains(b)) {
            return Err(consistency_error!("{} was never emitted", missing));
        }
        Ok(root)
    }

    fn node(&mut self, x: BlockId, level: usize, seq: usize) -> Result<()> {
        let placement = self.placement;
        let family = self.family;
        let wraps = placement.wraps.get(&x).map(Vec::as_slice).unwrap_or_default();
        let Some(wrap) = wraps.get(level) else {
            let count = placement.merges.get(&x).map_or(0, Vec::len);
            self.tasks.push(Task::Within { x, count, seq });
            return Ok(());
        };

        // Follows wrap the construct, the last one outermost
        let mut target = seq;
        let mut after = Vec::new();
        for f in placement.follows_of(self.analysis, wrap).into_iter().rev() {
            let label = self.label(f)?;
            let scope = self.seq(Some(label));
            self.append(target, scope);
            after.push(Task::Node {
                x: f,
                level: 0,
                seq: target,
            });
            target = scope;
        }

        let body = self.seq(None);
        let mut inner = vec![Task::Node {
            x,
            level: level + 1,
            seq: body,
        }];
        let construct = match wrap {
            Wrap::While(_) => Draft::While {
                label: self.loop_label(x)?,
                body,
            },
            Wrap::Try(group) => {
                let mut catches = Vec::with_capacity(group.len());
                for &i in group {
                    let Some(region) = family.constructs[i].try_region() else {
                        return Err(consistency_error!("construct at {} is not a try", x));
                    };
                    let clause = self.seq(None);
                    catches.push((region.catches.clone(), region.handler, clause));
                    inner.push(Task::Catch {
                        construct: i,
                        seq: clause,
                    });
                }
                Draft::Try { body, catches }
            }
        };
        self.push(target, construct);

        self.tasks.extend(after);
        self.tasks.extend(inner.into_iter().rev());
        Ok(())
    }

    fn within(&mut self, x: BlockId, count: usize, seq: usize) -> Result<()> {
        let Some(count) = count.checked_sub(1) else {
            return self.plain(x, seq);
        };
        let merge = self
            .placement
            .merges
            .get(&x)
            .and_then(|m| m.get(count).copied())
            .ok_or_else(|| consistency_error!("merge {} of {} is missing", count, x))?;
        let label = self.label(merge)?;
        let scope = self.seq(Some(label));
        self.append(seq, scope);
        self.tasks.push(Task::Node {
            x: merge,
            level: 0,
            seq,
        });
        self.tasks.push(Task::Within { x, count, seq: scope });
        Ok(())
    }

    fn plain(&mut self, x: BlockId, seq: usize) -> Result<()> {
        if !self.emitted.insert(x) {
            return Err(consistency_error!("{} is emitted twice", x));
        }
        let analysis = self.analysis;
        match &analysis.graph.block(x).terminator {
            Terminator::Goto(target) => {
                self.push(seq, Draft::Block(x));
                self.tasks.push(Task::Branch {
                    from: x,
                    to: *target,
                    seq,
                });
            }
            Terminator::Return(_) | Terminator::Throw(_) => self.push(seq, Draft::Block(x)),
            Terminator::If {
                taken, fallthrough, ..
            } => {
                let then_seq = self.seq(None);
                let else_seq = self.seq(None);
                self.push(
                    seq,
                    Draft::If {
                        block: x,
                        then_seq,
                        else_seq,
                    },
                );
                self.tasks.push(Task::Branch {
                    from: x,
                    to: *fallthrough,
                    seq: else_seq,
                });
                self.tasks.push(Task::Branch {
                    from: x,
                    to: *taken,
                    seq: then_seq,
                });
            }
            Terminator::Switch { cases, default, .. } => {
                let placement = self.placement;
                let next_case = |t: BlockId| {
                    placement
                        .fallthroughs
                        .iter()
                        .find_map(|(&target, &member)| (member == t).then_some(target))
                };
                // Chained targets go right after the case they are entered from
                let mut targets = Vec::new();
                for t in case_order(analysis.graph, x) {
                    if placement.fallthroughs.contains_key(&t) {
                        continue;
                    }
                    let mut case = Some(t);
                    while let Some(c) = case {
                        targets.push(c);
                        case = next_case(c);
                    }
                }

                let mut groups = Vec::with_capacity(targets.len());
                let mut branches = Vec::with_capacity(targets.len());
                for t in targets {
                    let mut keys: Vec<i32> = cases.iter().filter(|c| c.1 == t).map(|c| c.0).collect();
                    keys.sort_unstable();
                    let label = match next_case(t) {
                        Some(next) => Some(self.label(next)?),
                        None => None,
                    };
                    let body = self.seq(label);
                    groups.push((keys, t == *default, body));
                    branches.push(if placement.fallthroughs.contains_key(&t) {
                        Task::Node { x: t, level: 0, seq: body }
                    } else {
                        Task::Branch {
                            from: x,
                            to: t,
                            seq: body,
                        }
                    });
                }
                self.push(seq, Draft::Switch { block: x, cases: groups });
                self.tasks.extend(branches.into_iter().rev());
            }
            Terminator::JsrCall { .. } | Terminator::Ret { .. } => {
                return Err(consistency_error!("subroutine transfer in {} survived assembly", x));
            }
        }
        Ok(())
    }

    fn branch(&mut self, from: BlockId, to: BlockId, seq: usize) -> Result<()> {
        if self.analysis.doms.dominates(to, from) {
            let label = self.loop_label(to)?;
            self.push(seq, Draft::Continue(label));
        } else if let Some(&label) = self.placement.labels.get(&to) {
            self.push(seq, Draft::Break(label));
        } else if self.placement.in_catch.contains(to) {
            return Err(consistency_error!("{} jumps into the catch clause at {}", from, to));
        } else {
            self.tasks.push(Task::Node { x: to, level: 0, seq });
        }
        Ok(())
    }

    fn catch(&mut self, construct: usize, seq: usize) -> Result<()> {
        let c = &self.family.constructs[construct];
        let head = c.head;
        let Some(handler) = c.handler() else {
            return Err(consistency_error!("construct at {} is not a try", head));
        };
        if self.analysis.doms.dominates(handler, head) {
            let label = self.loop_label(handler)?;
            self.push(seq, Draft::Continue(label));
        } else if self.placement.in_catch.contains(handler) {
            self.tasks.push(Task::Node {
                x: handler,
                level: 0,
                seq,
            });
        } else {
            let label = self.label(handler)?;
            self.push(seq, Draft::Break(label));
        }
        Ok(())
    }

    /// Sequences whose last statement runs last when control falls off `start`,
    /// paired with that statement.
    fn tail_jumps(&self, start: usize) -> Vec<(usize, usize)> {
        let mut result = Vec::new();
        let mut stack = vec![start];
        while let Some(s) = stack.pop() {
            let Draft::Seq { items, .. } = &self.drafts[s] else {
                continue;
            };
            let Some(&last) = items.last() else {
                continue;
            };
            match &self.drafts[last] {
                Draft::Break(_) | Draft::Continue(_) => result.push((s, last)),
                Draft::Seq { .. } => stack.push(last),
                Draft::If {
                    then_seq, else_seq, ..
                } => stack.extend([*then_seq, *else_seq]),
                Draft::Try { body, catches } => {
                    stack.push(*body);
                    stack.extend(catches.iter().map(|c| c.2));
                }
                Draft::Block(_) | Draft::While { .. } | Draft::Switch { .. } => {}
            }
        }
        result
    }

    /// Drops every `break` at the end of its own scope and every `continue` at the
    /// end of its own loop.
    fn elide(&mut self, root: usize) {
        loop {
            let mut dropped = false;
            for d in self.reachable(root) {
                let (start, redundant) = match self.drafts[d] {
                    Draft::Seq { label: Some(l), .. } => (d, (Some(l), None)),
                    Draft::While { label, body } => (body, (None, Some(label))),
                    _ => continue,
                };
                for (s, last) in self.tail_jumps(start) {
                    let hit = match self.drafts[last] {
                        Draft::Break(l) => redundant.0 == Some(l),
                        Draft::Continue(l) => redundant.1 == Some(l),
                        _ => false,
                    };
                    if hit {
                        if let Draft::Seq { items, .. } = &mut self.drafts[s] {
                            items.pop();
                            dropped = true;
                        }
                    }
                }
            }
            if !dropped {
                return;
            }
        }
    }

    /// Drafts reachable from `root`, in preorder.
    fn reachable(&self, root: usize) -> Vec<usize> {
        let mut order = Vec::new();
        let mut stack = vec![root];
        while let Some(d) = stack.pop() {
            order.push(d);
            stack.extend(self.drafts[d].children().into_iter().rev());
        }
        order
    }

    fn finish(self, root: usize) -> Result<Statement> {
        let order = self.reachable(root);
        let used: BTreeSet<Label> = order
            .iter()
            .filter_map(|&d| match self.drafts[d] {
                Draft::Break(l) | Draft::Continue(l) => Some(l),
                _ => None,
            })
            .collect();

        let mut out: Vec<Option<Statement>> = (0..self.drafts.len()).map(|_| None).collect();

        // Preorder reversed visits children before parents
        for &d in order.iter().rev() {
            let statement = match &self.drafts[d] {
                Draft::Block(b) => Statement::Block(*b),
                Draft::Break(l) => Statement::Break(*l),
                Draft::Continue(l) => Statement::Continue(*l),
                Draft::Seq { label, items } => {
                    let mut body = Vec::with_capacity(items.len());
                    for &item in items {
                        match take(&mut out, item)? {
                            Statement::Scope { label: None, body: inner } => body.extend(inner),
                            other => body.push(other),
                        }
                    }
                    Statement::Scope {
                        label: label.filter(|l| used.contains(l)),
                        body,
                    }
                }
                Draft::While { label, body } => Statement::While {
                    label: *label,
                    body: sequence(take(&mut out, *body)?),
                },
                Draft::If {
                    block,
                    then_seq,
                    else_seq,
                } => Statement::If {
                    block: *block,
                    then_branch: Box::new(take(&mut out, *then_seq)?),
                    else_branch: Box::new(take(&mut out, *else_seq)?),
                },
                Draft::Switch { block, cases } => {
                    let mut converted = Vec::with_capacity(cases.len());
                    for (keys, is_default, body) in cases {
                        converted.push(SwitchCase {
                            keys: keys.clone(),
                            is_default: *is_default,
                            body: sequence(take(&mut out, *body)?),
                        });
                    }
                    Statement::Switch {
                        block: *block,
                        cases: converted,
                    }
                }
                Draft::Try { body, catches } => {
                    let body = Box::new(take(&mut out, *body)?);
                    let mut clauses = Vec::with_capacity(catches.len());
                    for (set, handler, clause) in catches {
                        clauses.push(CatchClause {
                            catches: set.clone(),
                            handler: *handler,
                            body: sequence(take(&mut out, *clause)?),
                        });
                    }
                    Statement::Try { body, catches: clauses }
                }
            };
            out[d] = Some(statement);
        }

        match take(&mut out, root)? {
            Statement::Scope { body, .. } => Ok(Statement::scope(body)),
            other => Ok(Statement::scope(vec![other])),
        }
    }
}

fn take(out: &mut [Option<Statement>], draft: usize) -> Result<Statement> {
    out[draft]
        .take()
        .ok_or_else(|| consistency_error!("draft {} converted out of order", draft))
}

/// The statements of a converted sequence, keeping a labeled scope whole.
fn sequence(statement: Statement) -> Vec<Statement> {
    match statement {
        Statement::Scope { label: None, body } => body,
        other => vec![other],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, Cond},
        ir::{GraphBuilder, MethodGraph, VarType},
        structuring::{
            breaks::place, check_round_trip, intervals::candidates, ordering::order, ExceptionSet,
        },
    };

    fn structure(graph: &MethodGraph) -> Statement {
        let oracle = ClassHierarchy::with_java_lang();
        let analysis = Analysis::new(graph, &oracle);
        let family = order(&analysis, candidates(&analysis)).unwrap();
        let placement = place(&analysis, &family);
        let tree = emit(&analysis, &family, &placement).unwrap();
        check_round_trip(graph, &tree, &oracle).unwrap();
        tree
    }

    #[test]
    fn test_diamond_falls_through_to_its_join() {
        let mut b = GraphBuilder::new("diamond");
        let x = b.input(VarType::Int);
        let [entry, left, right, join] = b.blocks();
        let zero = b.int(0);
        b.branch(entry, Cond::Lt, x, zero, left, right);
        b.goto(left, join);
        b.goto(right, join);
        b.ret(join, None);
        let graph = b.finish();

        let tree = structure(&graph);
        // both breaks restate the fallthrough, so the label goes too
        let expected = Statement::scope(vec![
            Statement::If {
                block: entry,
                then_branch: Box::new(Statement::scope(vec![Statement::Block(left)])),
                else_branch: Box::new(Statement::scope(vec![Statement::Block(right)])),
            },
            Statement::Block(join),
        ]);
        assert_eq!(tree, expected);
    }

    #[test]
    fn test_loop_with_try_round_trips() {
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

        let tree = structure(&graph);
        let loops = tree.iter().filter(|s| matches!(s, Statement::While { .. })).count();
        let tries: Vec<&Statement> = tree.iter().filter(|s| matches!(s, Statement::Try { .. })).collect();
        assert_eq!(loops, 1);
        assert_eq!(tries.len(), 1);
        let Statement::Try { catches, .. } = tries[0] else {
            unreachable!()
        };
        assert_eq!(catches[0].handler, handler);
        assert_eq!(catches[0].body, vec![Statement::Block(handler)]);
        assert!(!tree.iter().any(|s| matches!(s, Statement::Continue(_))));
    }

    #[test]
    fn test_switch_groups_keys_by_target() {
        let mut b = GraphBuilder::new("switch");
        let x = b.input(VarType::Int);
        let [entry, one, other] = b.blocks();
        b.switch(entry, x, &[(1, one), (2, one), (3, other)], other);
        b.ret(one, None);
        b.ret(other, None);
        let graph = b.finish();

        let tree = structure(&graph);
        let Some(Statement::Switch { cases, .. }) = tree.iter().find(|s| matches!(s, Statement::Switch { .. })) else {
            panic!("no switch in {tree}");
        };
        assert_eq!(cases.len(), 2);
        let keys: Vec<(&[i32], bool)> = cases.iter().map(|c| (c.keys.as_slice(), c.is_default)).collect();
        assert!(keys.contains(&([1, 2].as_slice(), false)));
        assert!(keys.contains(&([3].as_slice(), true)));
    }

    #[test]
    fn test_switch_cases_in_address_order() {
        let mut b = GraphBuilder::new("order");
        let x = b.input(VarType::Int);
        let [entry, one, two, other] = b.blocks();
        b.switch(entry, x, &[(2, two), (1, one)], other);
        b.ret(one, None);
        b.ret(two, None);
        b.ret(other, None);
        let mut graph = b.finish();
        graph.block_mut(entry).offset = Some(0);
        graph.block_mut(one).offset = Some(10);
        graph.block_mut(two).offset = Some(20);
        graph.block_mut(other).offset = Some(30);

        let tree = structure(&graph);
        let Some(Statement::Switch { cases, .. }) = tree.iter().find(|s| matches!(s, Statement::Switch { .. })) else {
            panic!("no switch in {tree}");
        };
        let keys: Vec<(&[i32], bool)> = cases.iter().map(|c| (c.keys.as_slice(), c.is_default)).collect();
        assert_eq!(keys, vec![([1].as_slice(), false), ([2].as_slice(), false), ([].as_slice(), true)]);
    }

    #[test]
    fn test_switch_case_falls_into_next_case() {
        // switch (x) { case 1: a(); case 2: b(); break; default: c(); }
        let mut b = GraphBuilder::new("chain");
        let x = b.input(VarType::Int);
        let [entry, one, two, other, exit] = b.blocks();
        b.switch(entry, x, &[(1, one), (2, two)], other);
        b.call(one, "a");
        b.goto(one, two);
        b.call(two, "b");
        b.goto(two, exit);
        b.call(other, "c");
        b.goto(other, exit);
        b.ret(exit, None);
        let graph = b.finish();

        let tree = structure(&graph);
        let Some(Statement::Switch { cases, .. }) = tree.iter().find(|s| matches!(s, Statement::Switch { .. })) else {
            panic!("no switch in {tree}");
        };
        assert_eq!(cases.len(), 3);
        assert_eq!(cases[0].keys, vec![1]);
        // No jump ends case 1, so it runs on into case 2
        assert_eq!(cases[0].body, vec![Statement::Block(one)]);
        assert_eq!(cases[1].keys, vec![2]);
        assert_eq!(cases[1].body.first(), Some(&Statement::Block(two)));
        assert!(matches!(cases[1].body.last(), Some(Statement::Break(_))));
        assert!(cases[2].is_default);
        assert_eq!(cases[2].body.first(), Some(&Statement::Block(other)));
    }
}
