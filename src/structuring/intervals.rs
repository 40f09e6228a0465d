//! Interval construction.
//!
//! An interval is a candidate construct: a head block and a body that the head
//! dominates, entered only through the head. [`Analysis`] holds the facts about
//! the normalized graph every later stage reads; [`candidates`] derives one
//! interval per loop, per group of blocks sharing an exception handler, and per
//! branch.
//!
//! Each interval carries two bounds. `lower` is what the construct must contain:
//! the natural loop, the protected blocks, the branch and its arms. `upper` is how
//! far scope completion may grow it: the dominator subtree of the head, minus the
//! handler and the blocks it would wrongly protect for a try.

use std::collections::BTreeMap;

use crate::{
    bytecode::ClassOracle,
    ir::{BlockId, MethodGraph, Terminator},
    structuring::{linearize::graph_dispatch, normalize::fallthrough_links, ExceptionSet},
    utils::graph::{
        algorithms::{compute_dominators, reverse_postorder, DominatorTree},
        NodeSet,
    },
};

/// Facts about the normalized graph shared by the structuring stages.
pub(crate) struct Analysis<'g> {
    pub graph: &'g MethodGraph,
    pub oracle: &'g dyn ClassOracle,
    pub doms: DominatorTree,
    /// Blocks to structure: everything reachable except the rethrow block
    pub nodes: NodeSet,
    /// `nodes` in reverse postorder
    pub rpo: Vec<BlockId>,
    position: Vec<usize>,
    /// Natural loop of every loop head
    pub loops: BTreeMap<BlockId, NodeSet>,
    /// Handler edges of every block that can throw, rethrow edges excluded
    pub dispatch: BTreeMap<BlockId, Vec<(ExceptionSet, BlockId)>>,
    /// Chained switch targets, each with the case that falls into it
    pub fallthroughs: BTreeMap<BlockId, BlockId>,
}

impl<'g> Analysis<'g> {
    pub fn new(graph: &'g MethodGraph, oracle: &'g dyn ClassOracle) -> Self {
        let entry = graph.entry();
        let doms = compute_dominators(graph, entry);
        let rpo: Vec<BlockId> = reverse_postorder(graph, entry)
            .into_iter()
            .filter(|&b| Some(b) != graph.rethrow())
            .collect();
        let nodes: NodeSet = rpo.iter().copied().collect();
        let mut position = vec![usize::MAX; graph.block_ids().last().map_or(0, |b| b.index() + 1)];
        for (i, &b) in rpo.iter().enumerate() {
            if b.index() >= position.len() {
                position.resize(b.index() + 1, usize::MAX);
            }
            position[b.index()] = i;
        }

        let mut dispatch = BTreeMap::new();
        for &b in &rpo {
            let edges = graph_dispatch(graph, b);
            if edges.is_empty() && !graph.throws(b) {
                continue;
            }
            dispatch.insert(b, edges.into_iter().map(|(s, t)| (s.clone(), t)).collect());
        }

        let mut fallthroughs = BTreeMap::new();
        for &b in &rpo {
            for (member, target) in fallthrough_links(graph, &doms, b) {
                fallthroughs.insert(target, member);
            }
        }

        let mut analysis = Analysis {
            graph,
            oracle,
            doms,
            nodes,
            rpo,
            position,
            loops: BTreeMap::new(),
            dispatch,
            fallthroughs,
        };
        analysis.loops = analysis.natural_loops();
        analysis
    }

    fn natural_loops(&self) -> BTreeMap<BlockId, NodeSet> {
        let mut loops = BTreeMap::new();
        for &head in &self.rpo {
            let sources: Vec<BlockId> = self
                .preds(head)
                .filter(|&p| self.doms.dominates(head, p))
                .collect();
            if sources.is_empty() {
                continue;
            }
            let mut body = NodeSet::singleton(head);
            let mut stack = sources;
            while let Some(b) = stack.pop() {
                if body.insert(b) {
                    stack.extend(self.preds(b));
                }
            }
            loops.insert(head, body);
        }
        loops
    }

    /// Reverse postorder index of a block.
    pub fn position(&self, block: BlockId) -> usize {
        self.position.get(block.index()).copied().unwrap_or(usize::MAX)
    }

    /// Predecessors that are structured.
    pub fn preds(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.graph
            .preds_of(block)
            .iter()
            .copied()
            .filter(|&p| self.nodes.contains(p))
    }

    /// Structured successors, control targets first.
    pub fn succs(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.graph
            .successors_of(block)
            .into_iter()
            .filter(|&s| self.nodes.contains(s))
    }

    pub fn is_thrower(&self, block: BlockId) -> bool {
        self.dispatch.contains_key(&block)
    }

    /// The exceptions `thrower` sends to `handler`.
    pub fn catches(&self, thrower: BlockId, handler: BlockId) -> Option<&ExceptionSet> {
        self.dispatch
            .get(&thrower)?
            .iter()
            .find(|(_, t)| *t == handler)
            .map(|(s, _)| s)
    }

    /// Distinct predecessors reaching `block` through a forward edge.
    pub fn forward_preds(&self, block: BlockId) -> usize {
        self.preds(block)
            .filter(|&p| !self.doms.dominates(block, p))
            .count()
    }

    pub fn is_handler_target(&self, block: BlockId) -> bool {
        self.preds(block).any(|p| self.graph.is_handler_edge(p, block))
    }

    /// Returns `true` if some block jumps or branches to `block`.
    pub fn has_normal_preds(&self, block: BlockId) -> bool {
        self.preds(block)
            .any(|p| self.graph.block(p).terminator.targets().contains(&block))
    }

    /// Distinct successors of `set` outside it.
    pub fn exits(&self, set: &NodeSet) -> NodeSet {
        let mut exits = NodeSet::new();
        for b in set.iter() {
            for s in self.succs(b) {
                if !set.contains(s) {
                    exits.insert(s);
                }
            }
        }
        exits
    }

    fn common_dominator(&self, set: &NodeSet) -> Option<BlockId> {
        let mut iter = set.iter();
        let first = iter.next()?;
        iter.try_fold(first, |acc, b| self.doms.nearest_common_dominator(acc, b))
    }
}

/// Exception handling data of a try interval.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TryRegion {
    /// Union of what the protected blocks send to `handler`
    pub catches: ExceptionSet,
    pub handler: BlockId,
    /// Protected blocks that can throw
    pub seeds: NodeSet,
    /// Position among tries with the same body, innermost first
    pub rank: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ConstructKind {
    While,
    Try(TryRegion),
    Conditional,
}

/// A candidate construct.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Construct {
    pub kind: ConstructKind,
    pub head: BlockId,
    pub lower: NodeSet,
    pub upper: NodeSet,
    pub body: NodeSet,
}

impl Construct {
    pub fn try_region(&self) -> Option<&TryRegion> {
        match &self.kind {
            ConstructKind::Try(region) => Some(region),
            ConstructKind::While | ConstructKind::Conditional => None,
        }
    }

    pub fn handler(&self) -> Option<BlockId> {
        self.try_region().map(|r| r.handler)
    }

    pub fn is_while(&self) -> bool {
        matches!(self.kind, ConstructKind::While)
    }
}

/// Intervals of the three kinds, in reverse postorder of their heads.
#[derive(Debug, Default)]
pub(crate) struct Candidates {
    pub loops: Vec<Construct>,
    pub tries: Vec<Construct>,
    pub conditionals: Vec<Construct>,
}

/// Derives every candidate construct of the graph.
pub(crate) fn candidates(analysis: &Analysis<'_>) -> Candidates {
    let loops = analysis
        .rpo
        .iter()
        .filter_map(|&head| {
            let body = analysis.loops.get(&head)?;
            Some(Construct {
                kind: ConstructKind::While,
                head,
                lower: body.clone(),
                upper: analysis.doms.subtree(head),
                body: body.clone(),
            })
        })
        .collect();

    Candidates {
        loops,
        tries: try_candidates(analysis),
        conditionals: conditional_candidates(analysis),
    }
}

/// Groups the blocks protected by each handler into as few intervals as possible,
/// visiting handlers and blocks in reverse postorder.
fn try_candidates(analysis: &Analysis<'_>) -> Vec<Construct> {
    let mut by_handler: BTreeMap<usize, (BlockId, Vec<BlockId>)> = BTreeMap::new();
    for &b in &analysis.rpo {
        let Some(edges) = analysis.dispatch.get(&b) else {
            continue;
        };
        for &(_, handler) in edges {
            by_handler
                .entry(analysis.position(handler))
                .or_insert_with(|| (handler, Vec::new()))
                .1
                .push(b);
        }
    }

    let mut result = Vec::new();
    for (handler, throwers) in by_handler.into_values() {
        let mut groups: Vec<Construct> = Vec::new();
        for thrower in throwers {
            if groups
                .iter()
                .any(|g| g.try_region().is_some_and(|r| r.seeds.contains(thrower)))
            {
                continue;
            }
            let joined = groups.iter().enumerate().find_map(|(i, g)| {
                let mut seeds = g.body.clone();
                seeds.insert(thrower);
                try_interval(analysis, &seeds, handler).map(|c| (i, c))
            });
            match joined {
                Some((i, grown)) => groups[i] = grown,
                None => groups.push(
                    try_interval(analysis, &NodeSet::singleton(thrower), handler)
                        .unwrap_or_else(|| single_try(analysis, thrower, handler)),
                ),
            }
        }
        result.extend(groups);
    }
    result
}

/// A try protecting `thrower` alone.
pub(crate) fn single_try(analysis: &Analysis<'_>, thrower: BlockId, handler: BlockId) -> Construct {
    let catches = analysis
        .catches(thrower, handler)
        .cloned()
        .unwrap_or_default();
    let body = NodeSet::singleton(thrower);
    Construct {
        kind: ConstructKind::Try(TryRegion {
            catches,
            handler,
            seeds: body.clone(),
            rank: 0,
        }),
        head: thrower,
        lower: body.clone(),
        upper: body.clone(),
        body,
    }
}

/// The smallest try interval around `seeds` that is entered only through its head
/// and nests with every loop, or `None` if it would protect the handler or a block
/// that does not send exceptions to it.
pub(crate) fn try_interval(analysis: &Analysis<'_>, seeds: &NodeSet, handler: BlockId) -> Option<Construct> {
    let (head, body) = try_body(analysis, seeds)?;
    if body.contains(handler) {
        return None;
    }
    let mut protected = NodeSet::new();
    let mut catches = ExceptionSet::empty();
    for b in body.iter().filter(|&b| analysis.is_thrower(b)) {
        let set = analysis.catches(b, handler)?;
        catches = catches.union(analysis.oracle, set);
        protected.insert(b);
    }
    if protected.is_empty() {
        return None;
    }

    let mut upper = analysis.doms.subtree(head);
    upper.difference_with(&analysis.doms.subtree(handler));
    for &b in analysis.dispatch.keys() {
        if !body.contains(b) {
            upper.remove(b);
        }
    }
    Some(Construct {
        kind: ConstructKind::Try(TryRegion {
            catches,
            handler,
            seeds: protected,
            rank: 0,
        }),
        head,
        lower: body.clone(),
        upper,
        body,
    })
}

/// Head and body of the region spanning `seeds`: their nearest common dominator and
/// every block on a path from it to a seed, grown until it nests with every loop.
fn try_body(analysis: &Analysis<'_>, seeds: &NodeSet) -> Option<(BlockId, NodeSet)> {
    let mut seeds = seeds.clone();
    for _ in 0..=analysis.nodes.len() {
        let head = analysis.common_dominator(&seeds)?;
        let mut body = NodeSet::singleton(head);
        let mut stack: Vec<BlockId> = seeds.iter().collect();
        while let Some(b) = stack.pop() {
            if body.insert(b) {
                stack.extend(analysis.preds(b));
            }
        }

        let mut grown = false;
        for (&l, members) in &analysis.loops {
            let nested = members.is_subset(&body) || body.is_subset(members);
            if nested {
                continue;
            }
            if body.contains(l) {
                // the loop starts inside the region and must end there
                seeds.union_with(members);
                grown = true;
            } else if body.intersects(members) {
                // the region starts inside the loop and leaves it
                seeds.insert(l);
                grown = true;
            }
        }
        if !grown {
            return Some((head, body));
        }
    }
    None
}

/// One interval per two-way or multi-way branch: the branch block and the arms it
/// alone leads to.
fn conditional_candidates(analysis: &Analysis<'_>) -> Vec<Construct> {
    let graph = analysis.graph;
    let mut result = Vec::new();
    for &x in &analysis.rpo {
        let terminator = &graph.block(x).terminator;
        if !matches!(terminator, Terminator::If { .. } | Terminator::Switch { .. }) {
            continue;
        }
        let mut lower = NodeSet::singleton(x);
        for t in terminator.targets() {
            let b = graph.block(t);
            let arm = graph.preds_of(t) == [x].as_slice()
                && !graph.is_handler_edge(x, t)
                && b.is_empty()
                && b.handlers.is_empty()
                && matches!(b.terminator, Terminator::Goto(_));
            if arm && t != x {
                lower.insert(t);
            }
        }
        result.push(Construct {
            kind: ConstructKind::Conditional,
            head: x,
            body: lower.clone(),
            upper: analysis.doms.subtree(x),
            lower,
        });
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bytecode::{ClassHierarchy, Cond},
        ir::{GraphBuilder, VarType},
    };

    #[test]
    fn test_natural_loop_and_conditional() {
        // entry -> head; head -> body | exit; body -> head
        let mut b = GraphBuilder::new("loop");
        let x = b.input(VarType::Int);
        let [entry, head, body, exit] = b.blocks();
        let zero = b.int(0);
        b.goto(entry, head);
        b.branch(head, Cond::Lt, x, zero, body, exit);
        b.goto(body, head);
        b.ret(exit, None);
        let graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let analysis = Analysis::new(&graph, &oracle);
        let found = candidates(&analysis);

        assert_eq!(found.loops.len(), 1);
        assert_eq!(found.loops[0].head, head);
        assert_eq!(found.loops[0].body, [head, body].into_iter().collect());
        assert_eq!(found.conditionals.len(), 1);
        assert!(found.tries.is_empty());
        assert_eq!(analysis.forward_preds(head), 1);
        assert_eq!(analysis.rpo[0], entry);
    }

    #[test]
    fn test_try_spans_the_protected_calls() {
        // entry: a() -> mid: b() -> exit, both protected by one handler
        let mut b = GraphBuilder::new("try");
        let [entry, mid, exit, handler] = b.blocks();
        b.call(entry, "a");
        b.goto(entry, mid);
        b.call(mid, "b");
        b.goto(mid, exit);
        b.ret(exit, None);
        b.ret(handler, None);
        b.handler(entry, ExceptionSet::all(), handler);
        b.handler(mid, ExceptionSet::all(), handler);
        let graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let analysis = Analysis::new(&graph, &oracle);
        let found = candidates(&analysis);

        assert_eq!(found.tries.len(), 1);
        let region = &found.tries[0];
        assert_eq!(region.head, entry);
        assert_eq!(region.body, [entry, mid].into_iter().collect());
        assert_eq!(region.handler(), Some(handler));
        assert!(!region.upper.contains(handler));
    }

    #[test]
    fn test_region_leaving_a_loop_takes_the_loop() {
        // entry -> head; head -> body | exit; body: a() -> head; exit: b()
        let mut b = GraphBuilder::new("spill");
        let x = b.input(VarType::Int);
        let [entry, head, body, exit, done, handler] = b.blocks();
        let zero = b.int(0);
        b.goto(entry, head);
        b.branch(head, Cond::Lt, x, zero, body, exit);
        b.call(body, "a");
        b.goto(body, head);
        b.call(exit, "b");
        b.goto(exit, done);
        b.ret(done, None);
        b.ret(handler, None);
        b.handler(body, ExceptionSet::all(), handler);
        b.handler(exit, ExceptionSet::all(), handler);
        let graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let analysis = Analysis::new(&graph, &oracle);
        let seeds: NodeSet = [body, exit].into_iter().collect();
        let region = try_interval(&analysis, &seeds, handler).unwrap();

        assert_eq!(region.head, head);
        assert_eq!(region.body, [head, body, exit].into_iter().collect());
    }
}
