//! Compiler-pass toolkit over a JSON three-address IR: basic-block
//! formation, control-flow graphs, worklist dataflow analyses, dominators,
//! and full unrolling of loops with statically computable trip counts.

pub mod commons;
pub mod ir;

pub mod cfg;

pub mod analysis;
pub mod loop_opt;
