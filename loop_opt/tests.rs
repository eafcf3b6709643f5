// Loop detection, trip-count inference, and unrolling tests.

use pretty_assertions::assert_eq;
use serde_json::json;

use super::*;
use crate::ir::{Instruction, Op};

fn blocks_of(v: serde_json::Value) -> BlockMap {
    let func: crate::ir::Function = serde_json::from_value(v).unwrap();
    let mut blocks = cfg::block_map(cfg::form_blocks(&func.instrs));
    cfg::add_terminators(&mut blocks);
    blocks
}

fn counting_loop(init: i64, bound: i64) -> serde_json::Value {
    json!({
        "name": "main",
        "instrs": [
            { "op": "const", "dest": "i", "type": "int", "value": init },
            { "op": "const", "dest": "n", "type": "int", "value": bound },
            { "op": "const", "dest": "k", "type": "int", "value": 1 },
            { "label": ".H" },
            { "op": "lt", "dest": "c", "type": "bool", "args": ["i", "n"] },
            { "op": "br", "args": ["c", ".B", ".E"] },
            { "label": ".B" },
            { "op": "add", "dest": "i", "type": "int", "args": ["i", "k"] },
            { "op": "jmp", "args": [".H"] },
            { "label": ".E" },
            { "op": "ret" }
        ]
    })
}

fn found_loops(v: serde_json::Value) -> (BlockMap, Vec<Loop>) {
    let blocks = blocks_of(v);
    let (preds, succs) = cfg::edges(&blocks);
    let dom = dominators::dominators(&blocks, &preds);
    let loops = filter_innermost(find_loops(&blocks, &preds, &succs, &dom));
    (blocks, loops)
}

fn unrolled(v: serde_json::Value) -> BlockMap {
    let program: Program = serde_json::from_value(json!({ "functions": [v] })).unwrap();
    let out = unroll_loops(program.validate().unwrap());
    cfg::block_map(cfg::form_blocks(&out.0.functions[0].instrs))
}

fn all_targets_defined(blocks: &BlockMap) -> bool {
    blocks.values().all(|block| {
        block.iter().all(|inst| match inst {
            Instruction::Op(op) => op.label_args().iter().all(|t| blocks.contains_key(t)),
            _ => true,
        })
    })
}

#[test]
fn back_edge_and_body_detection() {
    let (blocks, loops) = found_loops(counting_loop(0, 10));
    assert_eq!(loops.len(), 1);

    let l = &loops[0];
    assert_eq!(l.name, "L0");
    assert_eq!(l.entry, ".H");
    assert_eq!(l.exit, ".B");
    assert_eq!(l.nodes, Set::from([".H".to_string(), ".B".to_string()]));
    assert!(!l.exit_from_exit);

    // the header dominates every node of its loop
    let (preds, _) = cfg::edges(&blocks);
    let dom = dominators::dominators(&blocks, &preds);
    for node in &l.nodes {
        assert!(dom[node].contains(&l.entry));
    }
}

#[test]
fn countable_loop_unrolls_fully() {
    let blocks = unrolled(counting_loop(0, 10));

    for i in 0..10 {
        assert!(blocks.contains_key(&format!("L0_{i}_.B")), "missing copy {i}");
        assert!(blocks.contains_key(&format!("L0_{i}_.H")));
    }
    // the landing copy of the header falls through to the old exit
    assert_eq!(
        blocks["L0_10_.H"].last(),
        Some(&Instruction::Op(Op::jmp(".E")))
    );

    // original loop labels are gone, the copies are spliced in their place
    assert!(!blocks.contains_key(".H"));
    assert!(!blocks.contains_key(".B"));
    let names: Vec<&String> = blocks.keys().collect();
    assert_eq!(names[0], "b0");
    assert_eq!(names[1], "L0_0_.H");
    assert_eq!(*names.last().unwrap(), ".E");

    // entry edges into the loop land on the first copy
    assert_eq!(
        blocks["b0"].last(),
        Some(&Instruction::Op(Op::jmp("L0_0_.H")))
    );
    // each copy's guard collapses to a jump into its own body
    assert_eq!(
        blocks["L0_0_.H"].last(),
        Some(&Instruction::Op(Op::jmp("L0_0_.B")))
    );
    // and each body continues into the next copy of the header
    assert_eq!(
        blocks["L0_9_.B"].last(),
        Some(&Instruction::Op(Op::jmp("L0_10_.H")))
    );

    assert!(all_targets_defined(&blocks));
}

#[test]
fn loop_with_a_side_exit_is_rejected() {
    // .B can leave the loop too, so control may escape from two places
    let irregular = json!({
        "name": "main",
        "instrs": [
            { "op": "const", "dest": "i", "type": "int", "value": 0 },
            { "op": "const", "dest": "n", "type": "int", "value": 10 },
            { "op": "const", "dest": "k", "type": "int", "value": 1 },
            { "label": ".H" },
            { "op": "lt", "dest": "c", "type": "bool", "args": ["i", "n"] },
            { "op": "br", "args": ["c", ".B", ".E"] },
            { "label": ".B" },
            { "op": "add", "dest": "i", "type": "int", "args": ["i", "k"] },
            { "op": "br", "args": ["c", ".H", ".E"] },
            { "label": ".E" },
            { "op": "ret" }
        ]
    });

    let (_, loops) = found_loops(irregular.clone());
    assert!(loops.is_empty());

    let blocks = unrolled(irregular);
    assert!(blocks.contains_key(".H"));
    assert!(blocks.contains_key(".B"));
}

#[test]
fn nested_loops_unroll_innermost_only() {
    let nested = json!({
        "name": "main",
        "instrs": [
            { "op": "const", "dest": "j", "type": "int", "value": 0 },
            { "op": "const", "dest": "m", "type": "int", "value": 2 },
            { "op": "const", "dest": "one", "type": "int", "value": 1 },
            { "label": ".OH" },
            { "op": "lt", "dest": "cj", "type": "bool", "args": ["j", "m"] },
            { "op": "br", "args": ["cj", ".OB", ".OE"] },
            { "label": ".OB" },
            { "op": "const", "dest": "i", "type": "int", "value": 0 },
            { "op": "const", "dest": "n", "type": "int", "value": 3 },
            { "op": "jmp", "args": [".IH"] },
            { "label": ".IH" },
            { "op": "lt", "dest": "ci", "type": "bool", "args": ["i", "n"] },
            { "op": "br", "args": ["ci", ".IB", ".IE"] },
            { "label": ".IB" },
            { "op": "add", "dest": "i", "type": "int", "args": ["i", "one"] },
            { "op": "jmp", "args": [".IH"] },
            { "label": ".IE" },
            { "op": "add", "dest": "j", "type": "int", "args": ["j", "one"] },
            { "op": "jmp", "args": [".OH"] },
            { "label": ".OE" },
            { "op": "ret" }
        ]
    });

    let blocks = unrolled(nested);

    // the outer loop survives untouched
    assert!(blocks.contains_key(".OH"));
    assert!(blocks.contains_key(".OB"));
    assert!(blocks.contains_key(".IE"));

    // the inner loop is fully unrolled (trip count 3, plus the landing copy)
    for i in 0..3 {
        assert!(blocks.contains_key(&format!("L0_{i}_.IB")));
    }
    assert!(blocks.contains_key("L0_3_.IH"));
    assert!(!blocks.contains_key(".IH"));
    assert!(!blocks.contains_key(".IB"));

    // the outer body now enters the first inner copy
    assert_eq!(
        blocks[".OB"].last(),
        Some(&Instruction::Op(Op::jmp("L0_0_.IH")))
    );

    assert!(all_targets_defined(&blocks));
}

#[test]
fn do_while_loop_unrolls_from_the_exit() {
    let do_while = json!({
        "name": "main",
        "instrs": [
            { "op": "const", "dest": "i", "type": "int", "value": 0 },
            { "op": "const", "dest": "n", "type": "int", "value": 3 },
            { "op": "const", "dest": "k", "type": "int", "value": 1 },
            { "op": "jmp", "args": [".B"] },
            { "label": ".B" },
            { "op": "add", "dest": "i", "type": "int", "args": ["i", "k"] },
            { "op": "lt", "dest": "c", "type": "bool", "args": ["i", "n"] },
            { "op": "br", "args": ["c", ".B", ".E"] },
            { "label": ".E" },
            { "op": "ret" }
        ]
    });

    let (_, loops) = found_loops(do_while.clone());
    assert_eq!(loops.len(), 1);
    assert!(loops[0].exit_from_exit);
    assert_eq!(loops[0].entry, loops[0].exit);

    let blocks = unrolled(do_while);
    let names: Vec<&String> = blocks.keys().collect();
    assert_eq!(names, ["b0", "L0_0_.B", "L0_1_.B", "L0_2_.B", ".E"]);

    // every copy but the last continues; the last falls out
    assert_eq!(
        blocks["L0_0_.B"].last(),
        Some(&Instruction::Op(Op::jmp("L0_1_.B")))
    );
    assert_eq!(
        blocks["L0_2_.B"].last(),
        Some(&Instruction::Op(Op::jmp(".E")))
    );
    assert!(all_targets_defined(&blocks));
}

#[test]
fn countdown_loop_uses_the_mirrored_formula() {
    let countdown = json!({
        "name": "main",
        "instrs": [
            { "op": "const", "dest": "i", "type": "int", "value": 4 },
            { "op": "const", "dest": "z", "type": "int", "value": 0 },
            { "op": "const", "dest": "k", "type": "int", "value": 1 },
            { "label": ".H" },
            { "op": "lt", "dest": "c", "type": "bool", "args": ["z", "i"] },
            { "op": "br", "args": ["c", ".B", ".E"] },
            { "label": ".B" },
            { "op": "sub", "dest": "i", "type": "int", "args": ["i", "k"] },
            { "op": "jmp", "args": [".H"] },
            { "label": ".E" },
            { "op": "ret" }
        ]
    });

    let blocks = unrolled(countdown);
    for i in 0..4 {
        assert!(blocks.contains_key(&format!("L0_{i}_.B")), "missing copy {i}");
    }
    assert!(blocks.contains_key("L0_4_.H"));
    assert!(!blocks.contains_key("L0_4_.B"));
    assert!(all_targets_defined(&blocks));
}

#[test]
fn zero_trip_loop_collapses_to_the_landing_block() {
    let blocks = unrolled(counting_loop(5, 3));

    let names: Vec<&String> = blocks.keys().collect();
    assert_eq!(names, ["b0", "L0_0_.H", ".E"]);
    assert_eq!(
        blocks["L0_0_.H"].last(),
        Some(&Instruction::Op(Op::jmp(".E")))
    );
    assert!(all_targets_defined(&blocks));
}

#[test]
fn zero_trip_loop_guarded_at_the_exit_is_left_alone() {
    let do_while = json!({
        "name": "main",
        "instrs": [
            { "op": "const", "dest": "i", "type": "int", "value": 5 },
            { "op": "const", "dest": "n", "type": "int", "value": 3 },
            { "op": "const", "dest": "k", "type": "int", "value": 1 },
            { "op": "jmp", "args": [".B"] },
            { "label": ".B" },
            { "op": "add", "dest": "i", "type": "int", "args": ["i", "k"] },
            { "op": "lt", "dest": "c", "type": "bool", "args": ["i", "n"] },
            { "op": "br", "args": ["c", ".B", ".E"] },
            { "label": ".E" },
            { "op": "ret" }
        ]
    });

    let blocks = unrolled(do_while);
    assert!(blocks.contains_key(".B"));
    assert!(all_targets_defined(&blocks));
}

#[test]
fn unknown_bounds_leave_the_loop_alone() {
    // the bound comes in as a parameter, so neither side of the guard
    // resolves to a constant
    let opaque = json!({
        "name": "main",
        "args": [ { "name": "n", "type": "int" } ],
        "instrs": [
            { "op": "const", "dest": "i", "type": "int", "value": 0 },
            { "op": "const", "dest": "k", "type": "int", "value": 1 },
            { "label": ".H" },
            { "op": "lt", "dest": "c", "type": "bool", "args": ["i", "n"] },
            { "op": "br", "args": ["c", ".B", ".E"] },
            { "label": ".B" },
            { "op": "add", "dest": "i", "type": "int", "args": ["i", "k"] },
            { "op": "jmp", "args": [".H"] },
            { "label": ".E" },
            { "op": "ret" }
        ]
    });

    let blocks = unrolled(opaque);
    assert!(blocks.contains_key(".H"));
    assert!(blocks.contains_key(".B"));
}

#[test]
fn unroll_budget_blocks_code_blowup() {
    // 2000 trips x 4 instructions is far past the budget
    let blocks = unrolled(counting_loop(0, 2000));
    assert!(blocks.contains_key(".H"));
    assert!(blocks.contains_key(".B"));
}

#[test]
fn budget_check_counts_instructions_not_labels() {
    let (blocks, loops) = found_loops(counting_loop(0, 10));
    // 2 instructions in the header, 2 in the body
    assert!(unroll::check_unroll(&loops[0], &blocks, 255));
    assert!(!unroll::check_unroll(&loops[0], &blocks, 256));
}

#[test]
fn innermost_filter_removes_strict_supersets() {
    let small = Loop {
        name: "L0".into(),
        entry: "a".into(),
        exit: "b".into(),
        nodes: Set::from(["a".to_string(), "b".to_string()]),
        exit_from_exit: false,
    };
    let big = Loop {
        name: "L1".into(),
        entry: "a".into(),
        exit: "c".into(),
        nodes: Set::from(["a".to_string(), "b".to_string(), "c".to_string()]),
        exit_from_exit: false,
    };

    let kept = filter_innermost(vec![small.clone(), big]);
    assert_eq!(kept, vec![small.clone()]);

    // equal node sets are not strict supersets of each other
    let twin = Loop {
        name: "L1".into(),
        ..small.clone()
    };
    let kept = filter_innermost(vec![small.clone(), twin.clone()]);
    assert_eq!(kept, vec![small, twin]);
}

#[test]
fn multiple_updates_of_the_induction_variable_abandon() {
    let double_update = json!({
        "name": "main",
        "instrs": [
            { "op": "const", "dest": "i", "type": "int", "value": 0 },
            { "op": "const", "dest": "n", "type": "int", "value": 10 },
            { "op": "const", "dest": "k", "type": "int", "value": 1 },
            { "label": ".H" },
            { "op": "lt", "dest": "c", "type": "bool", "args": ["i", "n"] },
            { "op": "br", "args": ["c", ".B", ".E"] },
            { "label": ".B" },
            { "op": "add", "dest": "i", "type": "int", "args": ["i", "k"] },
            { "op": "add", "dest": "i", "type": "int", "args": ["i", "k"] },
            { "op": "jmp", "args": [".H"] },
            { "label": ".E" },
            { "op": "ret" }
        ]
    });

    let blocks = unrolled(double_update);
    assert!(blocks.contains_key(".H"));
    assert!(blocks.contains_key(".B"));
}
