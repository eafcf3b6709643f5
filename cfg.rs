//! Basic-block formation and the control-flow graph.

use indexmap::IndexMap;

use crate::ir::{BbId, Instruction, Op, Opcode};


/// A basic block: its leading `Label` followed by straight-line code.
pub type Block = Vec<Instruction>;

/// Blocks keyed by label.  Iteration order is program order; the first
/// key is the entry.
pub type BlockMap = IndexMap<BbId, Block>;

/// Predecessor or successor lists, in program order, deduplicated.
pub type EdgeMap = IndexMap<BbId, Vec<BbId>>;

/// Split a linear instruction stream into basic blocks.  A new block
/// starts at each label and immediately after each terminator; empty
/// blocks are dropped.
pub fn form_blocks(instrs: &[Instruction]) -> Vec<Block> {
    let mut blocks = Vec::new();
    let mut cur: Block = Vec::new();

    for inst in instrs {
        match inst {
            Instruction::Label { .. } => {
                if !cur.is_empty() {
                    blocks.push(std::mem::take(&mut cur));
                }
                cur.push(inst.clone());
            }
            Instruction::Op(op) => {
                cur.push(inst.clone());
                if op.op.is_terminator() {
                    blocks.push(std::mem::take(&mut cur));
                }
            }
        }
    }
    if !cur.is_empty() {
        blocks.push(cur);
    }

    blocks
}

/// Key the blocks by label.  An unlabeled block gets a fresh `b<i>` name,
/// skipping anything already taken, and a synthesized leading label so
/// that every block in the map starts with its own label.
pub fn block_map(blocks: Vec<Block>) -> BlockMap {
    let mut taken: std::collections::BTreeSet<String> = blocks
        .iter()
        .filter_map(|block| match block.first() {
            Some(Instruction::Label { label }) => Some(label.clone()),
            _ => None,
        })
        .collect();

    let mut map = BlockMap::new();
    let mut counter = 0usize;
    for mut block in blocks {
        let name = match block.first() {
            Some(Instruction::Label { label }) => label.clone(),
            _ => {
                let mut name = format!("b{counter}");
                while taken.contains(&name) {
                    counter += 1;
                    name = format!("b{counter}");
                }
                counter += 1;
                taken.insert(name.clone());
                block.insert(0, Instruction::Label { label: name.clone() });
                name
            }
        };
        map.insert(name, block);
    }

    map
}

/// Build the predecessor and successor maps.  `succs[b]` follows the
/// terminator of `b`; a block without one falls through to the next block
/// in program order.  `preds` is the transpose.
pub fn edges(blocks: &BlockMap) -> (EdgeMap, EdgeMap) {
    let mut preds: EdgeMap = blocks.keys().map(|k| (k.clone(), Vec::new())).collect();
    let mut succs: EdgeMap = blocks.keys().map(|k| (k.clone(), Vec::new())).collect();

    let names: Vec<&BbId> = blocks.keys().collect();
    for (idx, (name, block)) in blocks.iter().enumerate() {
        let fallthrough = || names.get(idx + 1).map(|next| vec![(*next).clone()]);
        let targets = match block.last() {
            Some(Instruction::Op(op)) => match op.op {
                Opcode::Jmp | Opcode::Br => op.label_args().to_vec(),
                Opcode::Ret => Vec::new(),
                _ => fallthrough().unwrap_or_default(),
            },
            _ => fallthrough().unwrap_or_default(),
        };
        for target in targets {
            push_unique(succs.entry(name.clone()).or_default(), target.clone());
            push_unique(preds.entry(target).or_default(), name.clone());
        }
    }

    (preds, succs)
}

fn push_unique(list: &mut Vec<BbId>, item: BbId) {
    if !list.contains(&item) {
        list.push(item);
    }
}

/// Append the implicit terminator to every block that lacks one: a `jmp`
/// to the next block in program order, or a `ret` for the last block.
/// Afterwards every block's last instruction is a terminator, so `succs`
/// is total.
pub fn add_terminators(blocks: &mut BlockMap) {
    let names: Vec<BbId> = blocks.keys().cloned().collect();
    for (idx, name) in names.iter().enumerate() {
        let block = blocks.get_mut(name).expect("block map key");
        let done = matches!(block.last(), Some(Instruction::Op(op)) if op.op.is_terminator());
        if done {
            continue;
        }
        let term = match names.get(idx + 1) {
            Some(next) => Op::jmp(next.clone()),
            None => Op::ret(),
        };
        block.push(Instruction::Op(term));
    }
}

/// Reassemble the linear instruction list in block order.
pub fn flatten(blocks: BlockMap) -> Vec<Instruction> {
    blocks.into_iter().flat_map(|(_, block)| block).collect()
}
