//! The worklist dataflow framework and its shipped analyses.

use std::collections::VecDeque;
use std::collections::{BTreeMap as Map, BTreeSet as Set};
use std::fmt::Display;
use std::str::FromStr;

use crate::cfg::{self, Block, BlockMap};
use crate::commons::{IrError, Valid};
use crate::ir::{BbId, Instruction, Literal, Op, Opcode, Program, VarId};

pub mod constant_prop;
pub mod defined;
pub mod dominators;
pub mod liveness;
pub mod reaching_defs;


/// A single dataflow analysis: a direction, a boundary value, a meet over
/// incoming values, and a block-local transfer.  Concrete analyses are
/// plain values of this struct, each with its own lattice type `V`.
pub struct Analysis<V> {
    /// True for forward, false for backward.
    pub forward: bool,
    /// The initial per-block value at the boundary.
    pub init: V,
    /// Combine the values flowing into a block.  Must be associative,
    /// commutative and idempotent, or the iteration may not converge.
    pub merge: fn(Vec<V>) -> V,
    /// The block-local effect.  The block is passed mutably because
    /// constant propagation rewrites instructions as it analyzes; the
    /// worklist only hands out the real block once the fixed point is
    /// reached, so rewrites always see final values.
    pub transfer: fn(&mut Block, &V, &BbId) -> V,
}

/// The worklist algorithm, iterating `analysis` to a fixed point.
///
/// Returns the per-block `(input, output)` maps, swapped for backward
/// analyses so that `input` is always the analysis's natural input side.
/// After the fixed point, the transfer is re-run once per block on the
/// final inputs against the real blocks, which is when an analysis with a
/// rewriting transfer (cprop) updates the instructions.
pub fn df_worklist<V: Clone + Eq>(
    blocks: &mut BlockMap,
    analysis: &Analysis<V>,
) -> (Map<BbId, V>, Map<BbId, V>) {
    let (preds, succs) = cfg::edges(blocks);

    let (in_edges, out_edges, first) = if analysis.forward {
        (preds, succs, blocks.keys().next().cloned())
    } else {
        (succs, preds, blocks.keys().last().cloned())
    };

    let mut input: Map<BbId, V> = Map::new();
    let mut output: Map<BbId, V> = blocks
        .keys()
        .map(|b| (b.clone(), analysis.init.clone()))
        .collect();
    if let Some(first) = first {
        input.insert(first, analysis.init.clone());
    }

    let mut worklist: VecDeque<BbId> = blocks.keys().cloned().collect();
    while let Some(node) = worklist.pop_front() {
        let incoming = in_edges[&node].iter().map(|p| output[p].clone()).collect();
        let inval = (analysis.merge)(incoming);

        let mut scratch = blocks[&node].clone();
        let outval = (analysis.transfer)(&mut scratch, &inval, &node);

        input.insert(node.clone(), inval);
        if output[&node] != outval {
            output.insert(node.clone(), outval);
            worklist.extend(out_edges[&node].iter().cloned());
        }
    }

    for (name, block) in blocks.iter_mut() {
        if let Some(inval) = input.get(name) {
            (analysis.transfer)(block, inval, name);
        }
    }

    if analysis.forward {
        (input, output)
    } else {
        (output, input)
    }
}

// SECTION: block-local helpers shared by the analyses

/// Variables written by the block.
pub fn gen(block: &Block) -> Set<VarId> {
    block
        .iter()
        .filter_map(|inst| match inst {
            Instruction::Op(op) => op.dest.clone(),
            _ => None,
        })
        .collect()
}

/// Variables read before they are written in the block.
pub fn use_before_def(block: &Block) -> Set<VarId> {
    let mut defined = Set::new();
    let mut used = Set::new();
    for inst in block {
        if let Instruction::Op(op) = inst {
            for var in op.var_args() {
                if !defined.contains(var) {
                    used.insert(var.clone());
                }
            }
            if let Some(dest) = &op.dest {
                defined.insert(dest.clone());
            }
        }
    }
    used
}

/// Union merge for powerset lattices.
pub fn union<T: Ord>(sets: Vec<Set<T>>) -> Set<T> {
    let mut out = Set::new();
    for set in sets {
        out.extend(set);
    }
    out
}

// SECTION: value formatting

/// Render a set value: sorted members, comma-separated, `∅` when empty.
pub fn fmt_set<T: Display>(val: &Set<T>) -> String {
    if val.is_empty() {
        "∅".to_string()
    } else {
        val.iter()
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Render a map value: sorted `key: value` pairs, `∅` when empty.
pub fn fmt_map<V: Display>(val: &Map<VarId, V>) -> String {
    if val.is_empty() {
        "∅".to_string()
    } else {
        val.iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

// SECTION: the driver surface

/// The shipped analyses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AnalysisKind {
    Defined,
    Live,
    ReachingDefs,
    ConstProp,
}

impl FromStr for AnalysisKind {
    type Err = IrError;

    fn from_str(s: &str) -> Result<Self, IrError> {
        match s {
            "defined" => Ok(AnalysisKind::Defined),
            "live" => Ok(AnalysisKind::Live),
            "rd" => Ok(AnalysisKind::ReachingDefs),
            "cprop" => Ok(AnalysisKind::ConstProp),
            _ => Err(IrError::UnknownAnalysis(s.to_string())),
        }
    }
}

/// Per-block results of one analysis over one function, in the value
/// shape that analysis uses.
#[derive(Clone, Debug, PartialEq)]
pub enum DataflowMaps {
    Vars {
        input: Map<BbId, Set<VarId>>,
        output: Map<BbId, Set<VarId>>,
    },
    Defs {
        input: Map<BbId, Set<reaching_defs::Def>>,
        output: Map<BbId, Set<reaching_defs::Def>>,
    },
    Consts {
        input: Map<BbId, constant_prop::ConstEnv>,
        output: Map<BbId, constant_prop::ConstEnv>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDataflow {
    pub function: String,
    pub maps: DataflowMaps,
}

/// Run one analysis over every function, printing the per-block `in` and
/// `out` values.  The analyzed blocks are written back into each function
/// (this normalizes terminators, and folds constants under `cprop`), and
/// the raw maps are handed back to the caller.
pub fn run_dataflow(program: Valid<Program>, kind: AnalysisKind) -> (Valid<Program>, Vec<FunctionDataflow>) {
    let mut program = program.0;
    let mut results = Vec::new();

    for func in &mut program.functions {
        let mut blocks = cfg::block_map(cfg::form_blocks(&func.instrs));
        cfg::add_terminators(&mut blocks);

        let maps = match kind {
            AnalysisKind::Defined => {
                let (input, output) = df_worklist(&mut blocks, &defined::analysis());
                DataflowMaps::Vars { input, output }
            }
            AnalysisKind::Live => {
                let (input, output) = df_worklist(&mut blocks, &liveness::analysis());
                DataflowMaps::Vars { input, output }
            }
            AnalysisKind::ReachingDefs => {
                let (input, output) = df_worklist(&mut blocks, &reaching_defs::analysis());
                DataflowMaps::Defs { input, output }
            }
            AnalysisKind::ConstProp => {
                let (input, output) = df_worklist(&mut blocks, &constant_prop::analysis());
                DataflowMaps::Consts { input, output }
            }
        };

        print!("{}", render(&func.name, &blocks, &maps));

        func.instrs = cfg::flatten(blocks);
        results.push(FunctionDataflow {
            function: func.name.clone(),
            maps,
        });
    }

    (Valid(program), results)
}

/// Pretty-print one function's per-block values.
pub fn render(function: &str, blocks: &BlockMap, maps: &DataflowMaps) -> String {
    let mut out = format!("{function}:\n");
    for name in blocks.keys() {
        let (i, o) = match maps {
            DataflowMaps::Vars { input, output } => (fmt_set(&input[name]), fmt_set(&output[name])),
            DataflowMaps::Defs { input, output } => (fmt_set(&input[name]), fmt_set(&output[name])),
            DataflowMaps::Consts { input, output } => (fmt_map(&input[name]), fmt_map(&output[name])),
        };
        out += &format!("{name}:\n  in:  {i}\n  out: {o}\n");
    }
    out
}
