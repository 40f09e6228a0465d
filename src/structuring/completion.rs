//! Scope completion.
//!
//! A construct's body starts at its lower bound. Every edge leaving the body later
//! becomes a `break`, so each construct absorbs the blocks after its exits that
//! nothing else reaches, as far as its upper bound allows. The blocks to take are
//! the source side of a minimum vertex cut between the current exits and the
//! blocks entered from elsewhere.
//!
//! Constructs are completed innermost first. A body only grows inside the bodies
//! around it and never into a construct beside it, so the family stays laminar
//! and its order stays valid.

use crate::{
    structuring::{intervals::Analysis, ordering::Family},
    utils::graph::{algorithms::min_vertex_cut, NodeSet},
};

/// Grows every construct of `family`. Returns the number of constructs grown.
pub(crate) fn complete_scopes(analysis: &Analysis<'_>, family: &mut Family) -> usize {
    let mut grown = 0;
    for i in (0..family.constructs.len()).rev() {
        let pool = pool(analysis, family, i);
        if pool.is_empty() {
            continue;
        }
        let body = &family.constructs[i].body;
        let exits = analysis.exits(body);
        let mut sources = exits.clone();
        sources.intersect_with(&pool);
        if sources.is_empty() {
            continue;
        }

        let mut inside = body.clone();
        inside.union_with(&pool);
        let sinks: NodeSet = pool
            .iter()
            .filter(|&n| analysis.preds(n).any(|p| !inside.contains(p)))
            .collect();
        let cut = min_vertex_cut(analysis.graph, &pool, &sources, &sinks);
        let absorbed = closed(analysis, body, cut.source_side);
        if absorbed.is_empty() {
            continue;
        }

        let mut next = body.clone();
        next.union_with(&absorbed);
        if analysis.exits(&next).len() > exits.len() {
            continue;
        }
        log::trace!(
            "{}: body at {} grows by {} blocks",
            analysis.graph.name(),
            family.constructs[i].head,
            absorbed.len()
        );
        family.constructs[i].body = next;
        grown += 1;
    }
    grown
}

/// Blocks construct `i` may absorb.
fn pool(analysis: &Analysis<'_>, family: &Family, i: usize) -> NodeSet {
    let c = &family.constructs[i];
    let mut pool = analysis.doms.subtree(c.head);
    pool.intersect_with(&c.upper);
    pool.intersect_with(&analysis.nodes);
    pool.difference_with(&c.body);

    for (j, d) in family.constructs.iter().enumerate() {
        if j == i {
            continue;
        }
        let around = (c.body.is_subset(&d.body) && c.body != d.body) || (c.body == d.body && j < i);
        if around {
            pool.intersect_with(&d.body);
        } else if !c.body.intersects(&d.body) {
            pool.difference_with(&d.body);
        }
    }
    if c.try_region().is_some() {
        let throwers: NodeSet = pool.iter().filter(|&n| analysis.is_thrower(n)).collect();
        pool.difference_with(&throwers);
    }
    pool
}

/// The largest part of `absorbed` entered only from `body` or itself, with every
/// immediate dominator inside too.
fn closed(analysis: &Analysis<'_>, body: &NodeSet, mut absorbed: NodeSet) -> NodeSet {
    loop {
        let mut inside = body.clone();
        inside.union_with(&absorbed);
        let open: Vec<_> = absorbed
            .iter()
            .filter(|&n| {
                analysis.preds(n).any(|p| !inside.contains(p))
                    || analysis
                        .doms
                        .immediate_dominator(n)
                        .map_or(true, |d| !inside.contains(d))
            })
            .collect();
        if open.is_empty() {
            return absorbed;
        }
        for n in open {
            absorbed.remove(n);
        }
    }
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
    fn test_try_takes_both_arms_before_the_join() {
        // entry: a(), then left | right -> join; handler -> join
        let mut b = GraphBuilder::new("arms");
        let x = b.input(VarType::Int);
        let [entry, left, right, join, handler] = b.blocks();
        let zero = b.int(0);
        b.call(entry, "a");
        b.branch(entry, Cond::Lt, x, zero, left, right);
        b.goto(left, join);
        b.goto(right, join);
        b.ret(join, None);
        b.goto(handler, join);
        b.handler(entry, ExceptionSet::all(), handler);
        let graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let analysis = Analysis::new(&graph, &oracle);
        let mut family = order(&analysis, candidates(&analysis)).unwrap();
        assert_eq!(family.constructs[0].body, NodeSet::singleton(entry));

        assert_eq!(complete_scopes(&analysis, &mut family), 1);
        assert_eq!(family.constructs[0].body, [entry, left, right].into_iter().collect());
    }

    #[test]
    fn test_straight_tail_stays_outside() {
        // entry: a() -> tail -> exit; handler -> exit
        let mut b = GraphBuilder::new("tail");
        let [entry, tail, exit, handler] = b.blocks();
        b.call(entry, "a");
        b.goto(entry, tail);
        b.goto(tail, exit);
        b.ret(exit, None);
        b.goto(handler, exit);
        b.handler(entry, ExceptionSet::all(), handler);
        let graph = b.finish();

        let oracle = ClassHierarchy::with_java_lang();
        let analysis = Analysis::new(&graph, &oracle);
        let mut family = order(&analysis, candidates(&analysis)).unwrap();

        assert_eq!(complete_scopes(&analysis, &mut family), 0);
        assert_eq!(family.constructs[0].body, NodeSet::singleton(entry));
    }
}
