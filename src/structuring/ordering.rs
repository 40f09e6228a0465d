//! Global ordering of candidate constructs.
//!
//! The loops and tries that survive form a laminar family: any two bodies are
//! disjoint or nested. The family is kept sorted outer-first, so the constructs
//! around a block are listed from the outermost to the innermost. Among tries with
//! equal bodies, the one with the lower rank is nested deeper.
//!
//! A try that overlaps other constructs is grown to swallow them. If that is not
//! possible, it falls back to one try per protected block, which always nests.
//! After placement every block that can throw must see its handlers in the same
//! order as in the graph. Tries around a block that does not are split the same
//! way until it does.

use std::cmp::Reverse;

use crate::{
    ir::BlockId,
    structuring::{
        intervals::{single_try, try_interval, Analysis, Candidates, Construct, ConstructKind},
        linearize::{effective_dispatch, same_dispatch},
        ExceptionSet,
    },
    utils::graph::NodeSet,
    Result,
};

/// Returns `true` if the sets share blocks but neither contains the other.
pub(crate) fn crosses(a: &NodeSet, b: &NodeSet) -> bool {
    a.intersects(b) && !a.is_subset(b) && !b.is_subset(a)
}

/// Loops and tries in nesting order.
#[derive(Debug, Default, Clone)]
pub(crate) struct Family {
    /// Constructs sorted outer-first
    pub constructs: Vec<Construct>,
}

impl Family {
    fn sort(&mut self) {
        self.constructs.sort_by_key(|c| {
            let kind = match c.kind {
                ConstructKind::While => 0,
                ConstructKind::Try(_) => 1,
                ConstructKind::Conditional => 2,
            };
            let rank = c.try_region().map_or(0, |r| r.rank);
            (Reverse(c.body.len()), kind, Reverse(rank))
        });
    }

    /// Indices of the constructs containing `node`, outermost first.
    pub fn enclosing(&self, node: BlockId) -> Vec<usize> {
        (0..self.constructs.len())
            .filter(|&i| self.constructs[i].body.contains(node))
            .collect()
    }

    /// Indices of the constructs `body` would cross.
    pub fn conflicts(&self, body: &NodeSet) -> Vec<usize> {
        (0..self.constructs.len())
            .filter(|&i| crosses(&self.constructs[i].body, body))
            .collect()
    }

    fn protects(&self, node: BlockId, handler: BlockId) -> bool {
        self.constructs
            .iter()
            .any(|c| c.handler() == Some(handler) && c.body.contains(node))
    }

    /// Adds a try for every seed of `region` not yet protected against its handler.
    fn push_singles(&mut self, analysis: &Analysis<'_>, seeds: &NodeSet, handler: BlockId) {
        for n in seeds.iter() {
            if !self.protects(n, handler) {
                self.constructs.push(single_try(analysis, n, handler));
            }
        }
    }

    /// Orders tries with equal bodies by where their handlers appear in the
    /// dispatch lists of the protected blocks, then sorts the family.
    pub fn settle_ranks(&mut self, analysis: &Analysis<'_>) {
        let tries: Vec<usize> = (0..self.constructs.len())
            .filter(|&i| self.constructs[i].try_region().is_some())
            .collect();
        let mut done = vec![false; self.constructs.len()];
        for &i in &tries {
            if done[i] {
                continue;
            }
            let mut group: Vec<(usize, usize)> = tries
                .iter()
                .copied()
                .filter(|&j| self.constructs[j].body == self.constructs[i].body)
                .map(|j| (dispatch_index(analysis, &self.constructs[j]), j))
                .collect();
            group.sort_unstable();
            for (rank, &(_, j)) in group.iter().enumerate() {
                done[j] = true;
                if let ConstructKind::Try(region) = &mut self.constructs[j].kind {
                    region.rank = rank;
                }
            }
        }
        self.sort();
    }

    /// Blocks whose exceptions the tries around them would send to the wrong
    /// handler.
    pub fn dispatch_failures(&self, analysis: &Analysis<'_>) -> Vec<BlockId> {
        let oracle = analysis.oracle;
        let mut failures = Vec::new();
        for (&n, edges) in &analysis.dispatch {
            let around: Vec<(&ExceptionSet, BlockId)> = self
                .enclosing(n)
                .into_iter()
                .rev()
                .filter_map(|i| self.constructs[i].try_region())
                .map(|r| (&r.catches, r.handler))
                .collect();
            let wanted = effective_dispatch(oracle, edges.iter().map(|(s, t)| (s, *t)));
            let actual = effective_dispatch(oracle, around);
            if !same_dispatch(oracle, &wanted, &actual) {
                failures.push(n);
            }
        }
        failures
    }

    /// Returns `true` if no two bodies cross and exceptions reach the right
    /// handlers.
    pub fn is_valid(&self, analysis: &Analysis<'_>) -> bool {
        let laminar = self.constructs.iter().enumerate().all(|(i, a)| {
            self.constructs[i + 1..]
                .iter()
                .all(|b| !crosses(&a.body, &b.body))
        });
        laminar && self.dispatch_failures(analysis).is_empty()
    }
}

/// Smallest position of the construct's handler in the dispatch lists of its seeds.
fn dispatch_index(analysis: &Analysis<'_>, construct: &Construct) -> usize {
    let Some(region) = construct.try_region() else {
        return 0;
    };
    region
        .seeds
        .iter()
        .filter_map(|n| {
            analysis
                .dispatch
                .get(&n)?
                .iter()
                .position(|(_, t)| *t == region.handler)
        })
        .min()
        .unwrap_or(usize::MAX)
}

/// Nests the loops and tries of `candidates` into one family.
///
/// # Errors
///
/// Returns [`crate::Error::InternalConsistency`] if two loops cross or the tries
/// cannot dispatch some block's exceptions even with one try per block.
pub(crate) fn order(analysis: &Analysis<'_>, candidates: Candidates) -> Result<Family> {
    let mut family = Family::default();
    for lp in candidates.loops {
        if let Some(&other) = family.conflicts(&lp.body).first() {
            return Err(consistency_error!(
                "loops at {} and {} overlap",
                lp.head,
                family.constructs[other].head
            ));
        }
        family.constructs.push(lp);
    }

    for candidate in candidates.tries {
        place_try(analysis, &mut family, candidate);
    }
    family.settle_ranks(analysis);
    enforce_dispatch(analysis, &mut family)?;

    log::trace!(
        "{}: {} constructs ordered",
        analysis.graph.name(),
        family.constructs.len()
    );
    Ok(family)
}

fn place_try(analysis: &Analysis<'_>, family: &mut Family, mut candidate: Construct) {
    let Some(handler) = candidate.handler() else {
        return;
    };
    for _ in 0..=analysis.nodes.len() {
        let conflicts = family.conflicts(&candidate.body);
        if conflicts.is_empty() {
            family.constructs.push(candidate);
            return;
        }
        let mut seeds = candidate.body.clone();
        for &i in &conflicts {
            seeds.union_with(&family.constructs[i].body);
        }
        match try_interval(analysis, &seeds, handler) {
            Some(grown) if grown.body != candidate.body => candidate = grown,
            _ => break,
        }
    }
    if let Some(region) = candidate.try_region() {
        let seeds = region.seeds.clone();
        family.push_singles(analysis, &seeds, handler);
    }
}

/// Splits the tries around blocks with wrong dispatch into one try per block.
fn enforce_dispatch(analysis: &Analysis<'_>, family: &mut Family) -> Result<()> {
    for _ in 0..=family.constructs.len() + analysis.nodes.len() {
        let failures = family.dispatch_failures(analysis);
        let Some(&first) = failures.first() else {
            return Ok(());
        };

        let mut split: Vec<usize> = Vec::new();
        for &n in &failures {
            for i in family.enclosing(n) {
                let c = &family.constructs[i];
                if c.try_region().is_some() && c.body.len() > 1 && !split.contains(&i) {
                    split.push(i);
                }
            }
        }
        if split.is_empty() {
            return Err(consistency_error!(
                "no nesting of try blocks dispatches the exceptions of {} correctly",
                first
            ));
        }

        split.sort_unstable_by(|a, b| b.cmp(a));
        let removed: Vec<Construct> = split
            .into_iter()
            .map(|i| family.constructs.remove(i))
            .collect();
        for c in removed {
            if let Some(region) = c.try_region() {
                family.push_singles(analysis, &region.seeds, region.handler);
            }
        }
        family.settle_ranks(analysis);
    }
    Err(consistency_error!(
        "try blocks of {} did not settle",
        analysis.graph.name()
    ))
}

/// Puts the forwarding arms of every branch into the constructs around the branch.
pub(crate) fn absorb_arms(family: &mut Family, conditionals: &[Construct]) {
    for cond in conditionals {
        let x = cond.head;
        for t in cond.lower.iter().filter(|&t| t != x) {
            let owned = family
                .constructs
                .iter()
                .any(|c| c.head == t || c.body.contains(t));
            if owned {
                continue;
            }
            for c in &mut family.constructs {
                if c.body.contains(x) {
                    c.body.insert(t);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, Cond},
        ir::{GraphBuilder, VarType},
        structuring::intervals::candidates,
    };

    #[test]
    fn test_handlers_of_one_block_nest_in_dispatch_order() {
        // entry: a() with ARITH -> first, RUNTIME - ARITH -> second
        let oracle = ClassHierarchy::with_java_lang();
        let arith = ExceptionSet::of("java/lang/ArithmeticException");
        let rest = ExceptionSet::of("java/lang/RuntimeException").difference(&oracle, &arith);

        let mut b = GraphBuilder::new("nest");
        let [entry, exit, first, second] = b.blocks();
        b.call(entry, "a");
        b.goto(entry, exit);
        b.ret(exit, None);
        b.ret(first, None);
        b.ret(second, None);
        b.handler(entry, arith, first);
        b.handler(entry, rest, second);
        let graph = b.finish();

        let analysis = Analysis::new(&graph, &oracle);
        let family = order(&analysis, candidates(&analysis)).unwrap();

        let around: Vec<BlockId> = family
            .enclosing(entry)
            .into_iter()
            .rev()
            .filter_map(|i| family.constructs[i].handler())
            .collect();
        assert_eq!(around, vec![first, second]);
        assert!(family.is_valid(&analysis));
    }

    #[test]
    fn test_crossing_try_falls_back_to_single_blocks() {
        // entry: a() -> mid: b() -> exit: c(); h1 covers entry and mid, h2 mid and exit
        let oracle = ClassHierarchy::with_java_lang();
        let arith = ExceptionSet::of("java/lang/ArithmeticException");
        let npe = ExceptionSet::of("java/lang/NullPointerException");

        let mut b = GraphBuilder::new("cross");
        let [entry, mid, exit, done, h1, h2] = b.blocks();
        b.call(entry, "a");
        b.goto(entry, mid);
        b.call(mid, "b");
        b.goto(mid, exit);
        b.call(exit, "c");
        b.goto(exit, done);
        b.ret(done, None);
        b.ret(h1, None);
        b.ret(h2, None);
        b.handler(entry, arith.clone(), h1);
        b.handler(mid, arith, h1);
        b.handler(mid, npe.clone(), h2);
        b.handler(exit, npe, h2);
        let graph = b.finish();

        let analysis = Analysis::new(&graph, &oracle);
        let family = order(&analysis, candidates(&analysis)).unwrap();

        assert!(family.is_valid(&analysis));
        for n in [entry, mid, exit] {
            assert!(family.enclosing(n).iter().any(|&i| family.constructs[i].try_region().is_some()));
        }
    }

    #[test]
    fn test_arms_join_the_enclosing_loop() {
        let mut b = GraphBuilder::new("arms");
        let x = b.input(VarType::Int);
        let [entry, head, fwd_in, fwd_out, exit] = b.blocks();
        let zero = b.int(0);
        b.goto(entry, head);
        b.branch(head, Cond::Lt, x, zero, fwd_in, fwd_out);
        b.goto(fwd_in, head);
        b.goto(fwd_out, exit);
        b.ret(exit, None);
        let graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let analysis = Analysis::new(&graph, &oracle);
        let found = candidates(&analysis);
        let conditionals = found.conditionals.clone();
        let mut family = order(&analysis, found).unwrap();
        absorb_arms(&mut family, &conditionals);

        assert_eq!(family.constructs.len(), 1);
        assert!(family.constructs[0].body.contains(fwd_out));
        assert!(!family.constructs[0].body.contains(exit));
    }
}
