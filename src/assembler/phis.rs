//! Filling in the placeholder phis.
//!
//! Each incoming edge contributes the value its predecessor's exit state holds for
//! the phi's slot. Three kinds of edge differ in what that state is:
//!
//! - a normal edge sees the predecessor's exit state as is
//! - a handler edge sees the exception alone on the stack
//! - a `ret` edge sees the subroutine's values for the locals it wrote and the
//!   caller's values for everything else

use std::collections::BTreeMap;

use crate::{
    assembler::subroutines::Masks,
    builder::{ExitState, RawGraph},
    ir::{BlockId, Terminator},
    Result,
};

/// Sets every placeholder phi's inputs from its predecessors' exit states.
pub(crate) fn resolve_phis(raw: &mut RawGraph, masks: &Masks) -> Result<()> {
    let graph = &raw.graph;

    // Return point to the call that continues there
    let mut caller_of: BTreeMap<BlockId, BlockId> = BTreeMap::new();
    for block in graph.block_ids() {
        if let Terminator::JsrCall {
            ret_to: Some(ret_to),
            ..
        } = graph.block(block).terminator
        {
            if caller_of.insert(ret_to, block).is_some() {
                return Err(consistency_error!("return point {} has two callers", ret_to));
            }
        }
    }

    let mut inputs = Vec::new();
    for (&block, pending) in &raw.pending {
        if graph.block(block).removed {
            continue;
        }
        for &pred in graph.preds_of(block) {
            let state = edge_state(raw, masks, &caller_of, pred, block)?;
            for &(phi, slot) in pending {
                let value = state.get(slot).ok_or_else(|| {
                    consistency_error!(
                        "no value for {:?} on edge {} -> {} in {}",
                        slot,
                        pred,
                        block,
                        graph.name()
                    )
                })?;
                inputs.push((phi, pred, value));
            }
        }
    }

    for (phi, pred, value) in inputs {
        raw.graph.set_phi_input(phi, pred, value);
    }
    Ok(())
}

/// The state flowing along `pred -> block`.
fn edge_state(
    raw: &RawGraph,
    masks: &Masks,
    caller_of: &BTreeMap<BlockId, BlockId>,
    pred: BlockId,
    block: BlockId,
) -> Result<ExitState> {
    let graph = &raw.graph;
    let exit = |b: BlockId| {
        raw.exits
            .get(&b)
            .ok_or_else(|| consistency_error!("block {} has no exit state", b))
    };

    if graph.is_handler_edge(pred, block) {
        let state = exit(pred)?;
        let thrown = state
            .thrown
            .ok_or_else(|| consistency_error!("handler edge {} -> {} without exception", pred, block))?;
        return Ok(state.exceptional(thrown));
    }

    if let Terminator::Ret { .. } = graph.block(pred).terminator {
        let call = *caller_of
            .get(&block)
            .ok_or_else(|| consistency_error!("return point {} has no caller", block))?;
        let entry = match graph.block(call).terminator {
            Terminator::JsrCall { target, .. } => target,
            _ => return Err(consistency_error!("caller {} is not a call", call)),
        };
        let mask = graph
            .block(entry)
            .offset
            .and_then(|offset| masks.get(&offset));
        let sub = exit(pred)?;
        let caller = exit(call)?;
        let locals = (0..sub.locals.len().max(caller.locals.len()))
            .map(|i| {
                let written = u16::try_from(i).is_ok_and(|n| mask.is_some_and(|m| m.contains(&n)));
                let source = if written { sub } else { caller };
                source.locals.get(i).copied().flatten()
            })
            .collect();
        return Ok(ExitState {
            locals,
            stack: sub.stack.clone(),
            token: sub.token,
            thrown: None,
        });
    }

    exit(pred).cloned()
}
