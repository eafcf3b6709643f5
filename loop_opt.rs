//! Natural-loop detection and full unrolling of statically countable
//! loops.

use std::collections::BTreeSet as Set;

use log::debug;

use crate::analysis::dominators::{self, DomMap};
use crate::analysis::{self, constant_prop, reaching_defs};
use crate::cfg::{self, BlockMap, EdgeMap};
use crate::commons::Valid;
use crate::ir::{BbId, Program};

pub mod trip_count;
pub mod unroll;

#[cfg(test)]
mod tests;

/// A natural loop for a back edge `exit -> entry`: the header, the back
/// edge's source, and every block that reaches the source without leaving
/// the header's dominance region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Loop {
    /// Generated identifier `L<i>`, used to label unrolled copies.
    pub name: String,
    /// The header: dominates every node in the loop.
    pub entry: BbId,
    /// The source of the back edge.
    pub exit: BbId,
    /// Labels of the loop body, entry and exit included.
    pub nodes: Set<BbId>,
    /// Whether the unique outgoing edge leaves from `exit` rather than
    /// from `entry`.
    pub exit_from_exit: bool,
}

/// Find every classifiable natural loop.  An edge `A -> B` is a back edge
/// when `B` dominates `A`.  Loops that fail classification, or that touch
/// blocks with no path from the entry, are skipped; names are handed out
/// in discovery order, which follows program order.
pub fn find_loops(blocks: &BlockMap, preds: &EdgeMap, succs: &EdgeMap, dom: &DomMap) -> Vec<Loop> {
    let entry_block = match blocks.keys().next() {
        Some(entry) => entry,
        None => return Vec::new(),
    };
    let reachable = reachable_from(entry_block, succs);

    let mut loops = Vec::new();
    let mut counter = 0usize;
    for (node, succ_list) in succs {
        for succ in succ_list {
            if !dom[node].contains(succ) {
                continue;
            }
            if !reachable.contains(node) || !reachable.contains(succ) {
                continue;
            }
            let nodes = collect_body(succ, node, preds, dom);
            if !nodes.iter().all(|b| reachable.contains(b)) {
                continue;
            }
            if let Some(exit_from_exit) = classify(succ, node, &nodes, succs) {
                debug!("found loop L{counter}: entry {succ}, exit {node}");
                loops.push(Loop {
                    name: format!("L{counter}"),
                    entry: succ.clone(),
                    exit: node.clone(),
                    nodes,
                    exit_from_exit,
                });
                counter += 1;
            }
        }
    }

    loops
}

/// Grow the body for the back edge `exit -> entry`: search backwards from
/// the exit, keeping every block dominated by the entry.
fn collect_body(entry: &BbId, exit: &BbId, preds: &EdgeMap, dom: &DomMap) -> Set<BbId> {
    let mut nodes = Set::from([entry.clone(), exit.clone()]);
    let mut working: Vec<BbId> = preds[exit].clone();

    while let Some(block) = working.pop() {
        if nodes.contains(&block) || !dom[&block].contains(entry) {
            continue;
        }
        working.extend(preds[&block].iter().cloned());
        nodes.insert(block);
    }

    nodes
}

/// A loop is eligible for trip-count analysis when control can only leave
/// it from the entry or the exit, through exactly one outgoing edge in
/// total.  Returns whether that edge leaves from the exit, or `None` for
/// an irregular loop.
fn classify(entry: &BbId, exit: &BbId, nodes: &Set<BbId>, succs: &EdgeMap) -> Option<bool> {
    for block in nodes {
        if block == entry || block == exit {
            continue;
        }
        if succs[block].iter().any(|s| !nodes.contains(s)) {
            return None;
        }
    }

    let outgoing = |block: &BbId| succs[block].iter().filter(|s| !nodes.contains(*s)).count();
    let from_exit = outgoing(exit);
    let from_entry = if entry == exit { 0 } else { outgoing(entry) };

    match (from_entry, from_exit) {
        (0, 1) => Some(true),
        (1, 0) => Some(false),
        _ => None,
    }
}

/// Drop every loop whose node set strictly contains another loop's nodes;
/// what remains are the innermost loops.
pub fn filter_innermost(loops: Vec<Loop>) -> Vec<Loop> {
    loops
        .iter()
        .filter(|l1| {
            !loops
                .iter()
                .any(|l2| l1.nodes != l2.nodes && l1.nodes.is_superset(&l2.nodes))
        })
        .cloned()
        .collect()
}

fn reachable_from(entry: &BbId, succs: &EdgeMap) -> Set<BbId> {
    let mut seen = Set::from([entry.clone()]);
    let mut stack = vec![entry.clone()];
    while let Some(block) = stack.pop() {
        for succ in &succs[&block] {
            if seen.insert(succ.clone()) {
                stack.push(succ.clone());
            }
        }
    }
    seen
}

/// Fully unroll every eligible innermost loop in every function.  A loop
/// whose trip count cannot be established, or that would blow the unroll
/// budget, is left untouched; the pass never fails outright.
pub fn unroll_loops(program: Valid<Program>) -> Valid<Program> {
    let mut program = program.0;

    for func in &mut program.functions {
        let mut blocks = cfg::block_map(cfg::form_blocks(&func.instrs));
        cfg::add_terminators(&mut blocks);

        let (preds, succs) = cfg::edges(&blocks);
        let dom = dominators::dominators(&blocks, &preds);
        let loops = filter_innermost(find_loops(&blocks, &preds, &succs, &dom));

        // Trip-count inference reads these; the cprop run also folds
        // constants in place, which the output keeps.
        let (in_cp, out_cp) = analysis::df_worklist(&mut blocks, &constant_prop::analysis());
        let (in_rd, _out_rd) = analysis::df_worklist(&mut blocks, &reaching_defs::analysis());

        for l in &loops {
            let trip = trip_count::trip_count(l, &blocks, &preds, &succs, &in_cp, &out_cp, &in_rd);
            debug!("trip count of {} in `{}`: {trip:?}", l.name, func.name);
            if let Some(trip) = trip {
                if unroll::check_unroll(l, &blocks, trip) {
                    blocks = unroll::unroll(&blocks, l, trip);
                }
            }
        }

        func.instrs = cfg::flatten(blocks);
    }

    Valid(program)
}
