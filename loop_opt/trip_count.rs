//! Trip-count inference, combining reaching definitions with constant
//! propagation.
//!
//! Every precondition failure reports `None`, which the caller reads as
//! "leave this loop alone".

use std::collections::{BTreeMap as Map, BTreeSet as Set};

use log::debug;

use super::Loop;
use crate::analysis::constant_prop::{ConstEnv, ConstValue};
use crate::analysis::reaching_defs::Def;
use crate::cfg::{BlockMap, EdgeMap};
use crate::ir::{BbId, Instruction, Literal, Opcode};

/// Infer how many times the loop body executes.
///
/// The loop has been classified, so its unique outgoing edge leaves from
/// the entry or from the exit; that block's `br` condition is traced back
/// to a single in-loop `lt`, whose constant side is the bound and whose
/// other side is the induction variable.  The induction variable must
/// have exactly one in-loop update (`add`/`sub` by a known step) and a
/// single known value on loop entry.
pub fn trip_count(
    l: &Loop,
    blocks: &BlockMap,
    preds: &EdgeMap,
    succs: &EdgeMap,
    in_cp: &Map<BbId, ConstEnv>,
    out_cp: &Map<BbId, ConstEnv>,
    in_rd: &Map<BbId, Set<Def>>,
) -> Option<i64> {
    let (source, target) = outgoing_edge(l, succs)?;
    debug!("outgoing edge of {}: {source} -> {target}", l.name);

    let br = match blocks.get(&source)?.last() {
        Some(Instruction::Op(op)) if op.op == Opcode::Br => op,
        _ => return None,
    };
    let cond = br.args.first()?;

    // The condition must have exactly one reaching definition from inside
    // the loop (which may well be the source block itself).
    let mut defs = in_rd
        .get(&source)?
        .iter()
        .filter(|d| d.0 == *cond && l.nodes.contains(&d.1));
    let def = defs.next()?;
    if defs.next().is_some() {
        return None;
    }

    let cond_block = &def.1;
    let cond_inst = blocks.get(cond_block)?.iter().rev().find_map(|inst| match inst {
        Instruction::Op(op) if op.dest.as_ref() == Some(cond) => Some(op),
        _ => None,
    })?;
    if cond_inst.op != Opcode::Lt || cond_inst.args.len() != 2 {
        return None;
    }
    debug!("condition instruction `{cond_inst}` in block {cond_block}");

    let cp = in_cp.get(cond_block)?;
    let (bound, indvar, negate) = match (
        resolve_int(&cond_inst.args[0], cp),
        resolve_int(&cond_inst.args[1], cp),
    ) {
        (None, None) => return None,
        // Both sides known: the guard's outcome is fixed before entry.
        // Already-false means zero trips; already-true never terminates.
        (Some(a), Some(b)) => return (a >= b).then_some(0),
        (None, Some(b)) => (b, cond_inst.args[0].clone(), false),
        (Some(a), None) => (a, cond_inst.args[1].clone(), true),
    };
    debug!("induction variable {indvar}, bound {bound}");

    // The unique in-loop update of the induction variable.
    let iv = indvar.as_str();
    let mut updates = l.nodes.iter().flat_map(|b| {
        blocks.get(b).into_iter().flat_map(move |block| {
            block.iter().filter_map(move |inst| match inst {
                Instruction::Op(op) if op.dest.as_deref() == Some(iv) => Some((b, op)),
                _ => None,
            })
        })
    });
    let (update_block, update) = updates.next()?;
    if updates.next().is_some() {
        return None;
    }
    if !matches!(update.op, Opcode::Add | Opcode::Sub) || !update.args.contains(&indvar) {
        return None;
    }
    let step_raw = update
        .args
        .iter()
        .find(|a| **a != indvar)
        .and_then(|a| resolve_int(a, in_cp.get(update_block)?))?;
    let step = if update.op == Opcode::Sub {
        step_raw.checked_neg()?
    } else {
        step_raw
    };
    debug!("update `{update}` in block {update_block}, step {step}");

    let init = init_value(l, preds, out_cp, &indvar)?;
    debug!("initial value {init}");

    compute_trip_count(init, bound, step, negate)
}

/// The unique edge leaving the loop: (source block, out-of-loop target).
fn outgoing_edge(l: &Loop, succs: &EdgeMap) -> Option<(BbId, BbId)> {
    let source = if l.exit_from_exit { &l.exit } else { &l.entry };
    let target = succs.get(source)?.iter().find(|s| !l.nodes.contains(*s))?;
    Some((source.clone(), target.clone()))
}

/// The induction variable's value on loop entry: every out-of-loop
/// predecessor of the header that knows the variable must agree on a
/// single integer.
fn init_value(l: &Loop, preds: &EdgeMap, out_cp: &Map<BbId, ConstEnv>, indvar: &str) -> Option<i64> {
    let mut vals = Set::new();
    for pred in preds.get(&l.entry)? {
        if l.nodes.contains(pred) {
            continue;
        }
        if let Some(v) = out_cp.get(pred).and_then(|env| resolve_int(indvar, env)) {
            vals.insert(v);
        }
    }
    if vals.len() == 1 {
        vals.into_iter().next()
    } else {
        None
    }
}

fn resolve_int(var: &str, env: &ConstEnv) -> Option<i64> {
    match env.get(var) {
        Some(ConstValue::Lit(Literal::Int(n))) => Some(*n),
        _ => None,
    }
}

/// The counting formula for `indvar < bound`, or its mirrored form when
/// the comparison holds the bound on the left.  A step driving the
/// variable away from the bound never terminates, and reports unknown.
fn compute_trip_count(init: i64, bound: i64, step: i64, negate: bool) -> Option<i64> {
    if step == 0 {
        return None;
    }

    let trip = if negate {
        // bound < indvar: a countdown loop.
        if init <= bound {
            0
        } else if step > 0 {
            return None;
        } else {
            let down = step.checked_neg()?;
            init.checked_sub(bound)?
                .checked_add(down)?
                .checked_sub(1)?
                .checked_div(down)?
        }
    } else if init >= bound {
        0
    } else if step < 0 {
        return None;
    } else {
        bound
            .checked_sub(init)?
            .checked_add(step)?
            .checked_sub(1)?
            .checked_div(step)?
    };

    (trip >= 0).then_some(trip)
}
