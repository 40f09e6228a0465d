//! Subroutine duplication and inlining.
//!
//! A subroutine called from several sites is copied until every copy has exactly one
//! caller. Outer subroutines go first, so a nested subroutine is duplicated together
//! with its enclosing copy before its own callers are counted. Among the callers of
//! one subroutine the lowest-addressed keeps the original blocks.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    builder::{ExitState, RawGraph, Slot},
    ir::{map_vars, BlockId, MethodGraph, OpId, Terminator, VarId},
    utils::graph::NodeSet,
    Error, Result,
};

/// Locals written by each subroutine, keyed by the entry address.
pub(crate) type Masks = BTreeMap<u32, BTreeSet<u16>>;

/// Collects the written-locals masks before the procedure records are discarded.
pub(crate) fn collect_masks(graph: &MethodGraph) -> Masks {
    graph
        .procedures()
        .iter()
        .filter_map(|p| graph.block(p.entry).offset.map(|offset| (offset, p.mask.clone())))
        .collect()
}

/// Current call sites of every subroutine entry, each list in address order.
fn call_sites(graph: &MethodGraph) -> BTreeMap<BlockId, Vec<BlockId>> {
    let mut calls: BTreeMap<BlockId, Vec<BlockId>> = BTreeMap::new();
    for block in graph.block_ids() {
        if let Terminator::JsrCall { target, .. } = graph.block(block).terminator {
            calls.entry(target).or_default().push(block);
        }
    }
    for sites in calls.values_mut() {
        sites.sort_by_key(|&b| (graph.block(b).offset, b));
    }
    calls
}

/// Blocks of the subroutine entered at `entry`: everything reachable from it that
/// still runs inside it.
fn subroutine_region(graph: &MethodGraph, entry: BlockId) -> Result<NodeSet> {
    let address = graph
        .block(entry)
        .offset
        .ok_or_else(|| consistency_error!("subroutine entry {} has no address", entry))?;
    let mut region = NodeSet::new();
    let mut stack = vec![entry];
    while let Some(block) = stack.pop() {
        if !graph.block(block).subroutines.contains(&address) || !region.insert(block) {
            continue;
        }
        stack.extend(graph.successors_of(block));
    }
    Ok(region)
}

/// Copies subroutines until each has at most one call site.
///
/// # Errors
///
/// Returns [`Error::Unsupported`] if more than `max_copies` copies would be needed.
pub(crate) fn duplicate_subroutines(raw: &mut RawGraph, max_copies: usize) -> Result<usize> {
    let mut copies = 0usize;
    loop {
        let calls = call_sites(&raw.graph);
        // Outermost shared subroutine first, ties to the lowest address
        let next = calls
            .iter()
            .filter(|(_, sites)| sites.len() > 1)
            .min_by_key(|(&entry, _)| {
                let block = raw.graph.block(entry);
                (block.subroutines.len(), block.offset, entry)
            })
            .map(|(&entry, sites)| (entry, sites.clone()));
        let Some((entry, sites)) = next else {
            return Ok(copies);
        };

        for &site in &sites[1..] {
            copies += 1;
            if copies > max_copies {
                return Err(Error::Unsupported(format!(
                    "{} needs more than {} subroutine copies",
                    raw.graph.name(),
                    max_copies
                )));
            }
            copy_for_call(raw, entry, site)?;
        }
    }
}

/// Gives call site `site` its own copy of the subroutine at `entry`.
fn copy_for_call(raw: &mut RawGraph, entry: BlockId, site: BlockId) -> Result<()> {
    let ret_to = match raw.graph.block(site).terminator {
        Terminator::JsrCall { ret_to, .. } => ret_to,
        _ => return Err(consistency_error!("block {} is not a call site", site)),
    };
    let region = subroutine_region(&raw.graph, entry)?;
    log::trace!(
        "copying subroutine {} ({} blocks) for call in {}",
        entry,
        region.len(),
        site
    );

    let dup = raw.graph.duplicate_region(&region, &[(site, entry)]);

    for (&original, &copy) in &dup.blocks {
        if let Some(exit) = raw.exits.get(&original) {
            let mapped = ExitState {
                locals: map_vars(&dup.vars, &exit.locals),
                stack: map_vars(&dup.vars, &exit.stack),
                token: dup.vars.get(&exit.token).copied().unwrap_or(exit.token),
                thrown: exit.thrown.map(|t| dup.vars.get(&t).copied().unwrap_or(t)),
            };
            raw.exits.insert(copy, mapped);
        }
        if let Some(pending) = raw.pending.get(&original) {
            let mapped = pending
                .iter()
                .map(|&(op, slot)| Ok((copied_phi(&raw.graph, &dup.vars, op)?, slot)))
                .collect::<Result<Vec<(OpId, Slot)>>>()?;
            raw.pending.insert(copy, mapped);
        }

        // The subroutine's own ret leaves the region; the copy returns only to the
        // new caller and the original no longer does
        if let Terminator::Ret { targets } = raw.graph.block(original).terminator.clone() {
            if targets.iter().all(|&t| !region.contains(t)) {
                let (kept, moved): (Vec<BlockId>, Vec<BlockId>) =
                    targets.into_iter().partition(|&t| Some(t) != ret_to);
                raw.graph.set_terminator(original, Terminator::Ret { targets: kept });
                raw.graph.set_terminator(copy, Terminator::Ret { targets: moved });
            }
        }
    }
    Ok(())
}

fn copied_phi(graph: &MethodGraph, vars: &BTreeMap<VarId, VarId>, op: OpId) -> Result<OpId> {
    graph
        .op(op)
        .value
        .and_then(|v| vars.get(&v))
        .and_then(|&v| graph.var(v).def)
        .ok_or_else(|| consistency_error!("phi {:?} was not copied", op))
}

/// Replaces calls and returns by plain jumps once every subroutine has one caller.
pub(crate) fn inline_subroutines(graph: &mut MethodGraph) -> Result<()> {
    for block in graph.block_ids() {
        let replacement = match &graph.block(block).terminator {
            Terminator::JsrCall { target, .. } => Terminator::Goto(*target),
            Terminator::Ret { targets } => match targets.as_slice() {
                [single] => Terminator::Goto(*single),
                _ => {
                    return Err(consistency_error!(
                        "ret in {} still has {} return points",
                        block,
                        targets.len()
                    ))
                }
            },
            _ => continue,
        };
        graph.set_terminator(block, replacement);
    }
    graph.procedures_mut().clear();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        builder::build,
        bytecode::{ClassHierarchy, CodeBuilder},
        verifier::verify,
    };

    fn finally_twice() -> RawGraph {
        // Two paths each run the same subroutine before returning
        let mut code = CodeBuilder::new();
        let (other, sub) = (code.label(), code.label());
        code.iload(0)
            .if_(crate::bytecode::Cond::Eq, other)
            .jsr(sub)
            .iload(0)
            .ireturn()
            .bind(other)
            .jsr(sub)
            .iconst(0)
            .ireturn()
            .bind(sub)
            .astore(1)
            .ret(1);
        let method = code.into_method("T", "m", "(I)I", true).unwrap();
        let verified = verify(&method, &ClassHierarchy::with_java_lang()).unwrap();
        build(&method, &verified).unwrap()
    }

    #[test]
    fn test_each_call_gets_own_copy() {
        let mut raw = finally_twice();
        assert_eq!(duplicate_subroutines(&mut raw, 4).unwrap(), 1);

        let calls = call_sites(&raw.graph);
        assert_eq!(calls.len(), 2);
        assert!(calls.values().all(|sites| sites.len() == 1));
        for block in raw.graph.block_ids() {
            if let Terminator::Ret { targets } = &raw.graph.block(block).terminator {
                assert_eq!(targets.len(), 1);
            }
        }
    }

    #[test]
    fn test_copy_limit_is_enforced() {
        let mut raw = finally_twice();
        assert!(matches!(
            duplicate_subroutines(&mut raw, 0),
            Err(Error::Unsupported(_))
        ));
    }
}
