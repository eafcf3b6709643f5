//! Full unrolling by block duplication.

use log::debug;

use super::Loop;
use crate::cfg::{Block, BlockMap};
use crate::ir::{Instruction, Op, Opcode};

/// Hard cap on `trip count * loop size`, to keep code growth in check.
const UNROLL_BUDGET: i64 = 1024;

/// Whether the loop should actually be unrolled `trip` times.
pub fn check_unroll(l: &Loop, blocks: &BlockMap, trip: i64) -> bool {
    if trip < 0 {
        return false;
    }
    // A zero-trip loop guarded at the exit has no landing copy to take
    // the header's incoming edges; leave it alone.
    if trip == 0 && l.exit_from_exit {
        return false;
    }
    // An earlier unroll may have renamed this loop's blocks out from
    // under it (overlapping loops share nodes).
    if !l.nodes.iter().all(|b| blocks.contains_key(b)) {
        return false;
    }

    let body_size: i64 = l
        .nodes
        .iter()
        .filter_map(|b| blocks.get(b))
        .map(|block| {
            block
                .iter()
                .filter(|inst| matches!(inst, Instruction::Op(_)))
                .count() as i64
        })
        .sum();

    match trip.checked_mul(body_size) {
        Some(total) if total < UNROLL_BUDGET => true,
        _ => {
            debug!("not unrolling {}: {trip} x {body_size} blows the budget", l.name);
            false
        }
    }
}

/// Duplicate the loop body `trip` times, rewriting labels and
/// terminators, and splice the copies in place of the original loop
/// nodes.  Produces a fresh block map; blocks outside the loop are
/// carried over, retargeted at the first copy where they used to jump to
/// the header.
pub fn unroll(blocks: &BlockMap, l: &Loop, trip: i64) -> BlockMap {
    debug!("unrolling {} {trip} times", l.name);

    let mut out = BlockMap::new();
    let mut spliced = false;
    for (name, block) in blocks {
        if l.nodes.contains(name) {
            if !spliced {
                splice_copies(&mut out, blocks, l, trip);
                spliced = true;
            }
            continue;
        }
        let mut block = block.clone();
        if let Some(Instruction::Op(op)) = block.last_mut() {
            for target in op.label_args_mut() {
                if *target == l.entry {
                    *target = copy_label(l, 0, &l.entry);
                }
            }
        }
        out.insert(name.clone(), block);
    }

    out
}

fn copy_label(l: &Loop, i: i64, block: &str) -> String {
    format!("{}_{}_{}", l.name, i, block)
}

/// Emit the `trip` copies of the loop body, plus the landing copy of the
/// header when the loop is guarded at the entry.
fn splice_copies(out: &mut BlockMap, blocks: &BlockMap, l: &Loop, trip: i64) {
    for i in 0..trip {
        for (name, block) in blocks {
            if !l.nodes.contains(name) {
                continue;
            }
            out.insert(copy_label(l, i, name), copy_block(block, l, i, trip));
        }
    }

    // A loop guarded at the entry runs the header once more to fall out:
    // append a landing copy whose guard collapses to a jump to the exit
    // target.
    if !l.exit_from_exit {
        let mut landing = rename_leading_label(blocks[&l.entry].clone(), copy_label(l, trip, &l.entry));
        if let Some(Instruction::Op(op)) = landing.last_mut() {
            if op.op == Opcode::Br {
                let exit_target = op
                    .label_args()
                    .iter()
                    .find(|t| !l.nodes.contains(*t))
                    .cloned();
                if let Some(target) = exit_target {
                    *op = Op::jmp(target);
                }
            }
        }
        out.insert(copy_label(l, trip, &l.entry), landing);
    }
}

/// One copy of a loop block for iteration `i`, with its label and its
/// terminator rewritten.
fn copy_block(block: &Block, l: &Loop, i: i64, trip: i64) -> Block {
    let mut copy = rename_leading_label(block.clone(), copy_label(l, i, block_name(block)));

    let term = match copy.last_mut() {
        Some(Instruction::Op(op)) => op,
        _ => return copy,
    };

    match term.op {
        Opcode::Jmp => {
            if let Some(target) = term.args.first_mut() {
                if *target == l.entry {
                    // The back edge continues into the next copy.
                    *target = copy_label(l, i + 1, &l.entry);
                } else if l.nodes.contains(target.as_str()) {
                    *target = copy_label(l, i, &target.clone());
                }
            }
        }
        Opcode::Br => {
            let in_loop: Vec<bool> = term
                .label_args()
                .iter()
                .map(|t| l.nodes.contains(t))
                .collect();
            match in_loop.as_slice() {
                [true, true] => {
                    for target in term.label_args_mut() {
                        if *target == l.entry {
                            *target = copy_label(l, i + 1, &l.entry);
                        } else {
                            *target = copy_label(l, i, &target.clone());
                        }
                    }
                }
                [t_in, f_in] if t_in != f_in => {
                    // One side leaves the loop, so the guard's outcome is
                    // known for this copy: keep going, except that the
                    // final exit-guarded copy falls out of the loop.
                    let labels = term.label_args();
                    let (inside, outside) = if *t_in {
                        (labels[0].clone(), labels[1].clone())
                    } else {
                        (labels[1].clone(), labels[0].clone())
                    };
                    let target = if l.exit_from_exit && i + 1 == trip {
                        outside
                    } else if inside == l.entry {
                        copy_label(l, i + 1, &l.entry)
                    } else {
                        copy_label(l, i, &inside)
                    };
                    *term = Op::jmp(target);
                }
                _ => {}
            }
        }
        _ => {}
    }

    copy
}

fn block_name(block: &Block) -> &str {
    match block.first() {
        Some(Instruction::Label { label }) => label,
        _ => "",
    }
}

fn rename_leading_label(mut block: Block, name: String) -> Block {
    if let Some(Instruction::Label { label }) = block.first_mut() {
        *label = name;
    }
    block
}
