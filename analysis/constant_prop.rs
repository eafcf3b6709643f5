//! Constant propagation.
//!
//! The transfer function folds `id` and integer arithmetic down to
//! `const` while it walks a block, so this analysis doubles as a rewrite.
//! The worklist applies the rewriting run only after the fixed point, so
//! a fold never acts on provisional values.

use derive_more::Display;

use super::*;

/// The per-variable constant lattice.  A missing key means "not yet
/// defined on this path".
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
pub enum ConstValue {
    /// A single known literal.
    #[display(fmt = "{}", _0)]
    Lit(Literal),
    /// Defined, but not a single known constant.
    #[display(fmt = "?")]
    Top,
}

/// The abstract environment.
pub type ConstEnv = Map<VarId, ConstValue>;

pub fn analysis() -> Analysis<ConstEnv> {
    Analysis {
        forward: true,
        init: ConstEnv::new(),
        merge,
        transfer,
    }
}

pub fn analyze(blocks: &mut BlockMap) -> (Map<BbId, ConstEnv>, Map<BbId, ConstEnv>) {
    df_worklist(blocks, &analysis())
}

/// Pointwise meet: variables the paths disagree on go to `Top`; a
/// variable known on only some paths keeps its value.
fn merge(envs: Vec<ConstEnv>) -> ConstEnv {
    let mut out = ConstEnv::new();
    for env in envs {
        for (var, val) in env {
            match out.get(&var) {
                None => {
                    out.insert(var, val);
                }
                Some(known) if *known != val => {
                    out.insert(var, ConstValue::Top);
                }
                Some(_) => {}
            }
        }
    }
    out
}

fn transfer(block: &mut Block, input: &ConstEnv, _name: &BbId) -> ConstEnv {
    let mut env = input.clone();

    for inst in block.iter_mut() {
        let op = match inst {
            Instruction::Op(op) => op,
            Instruction::Label { .. } => continue,
        };
        let dest = match op.dest.clone() {
            Some(dest) => dest,
            None => continue,
        };

        match op.op {
            Opcode::Const => {
                if let Some(value) = op.value {
                    env.insert(dest, ConstValue::Lit(value));
                } else {
                    env.insert(dest, ConstValue::Top);
                }
            }
            Opcode::Id => {
                let known = op.args.first().and_then(|a| env.get(a)).copied();
                match known {
                    Some(ConstValue::Lit(value)) => {
                        fold(op, value);
                        env.insert(dest, ConstValue::Lit(value));
                    }
                    _ => {
                        env.insert(dest, ConstValue::Top);
                    }
                }
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div => {
                let folded = match (int_arg(op, 0, &env), int_arg(op, 1, &env)) {
                    (Some(a), Some(b)) => match op.op {
                        Opcode::Add => a.checked_add(b),
                        Opcode::Sub => a.checked_sub(b),
                        Opcode::Mul => a.checked_mul(b),
                        // Division by zero keeps the instruction as-is.
                        _ => a.checked_div(b),
                    },
                    _ => None,
                };
                match folded {
                    Some(value) => {
                        fold(op, Literal::Int(value));
                        env.insert(dest, ConstValue::Lit(Literal::Int(value)));
                    }
                    None => {
                        env.insert(dest, ConstValue::Top);
                    }
                }
            }
            _ => {
                env.insert(dest, ConstValue::Top);
            }
        }
    }

    env
}

/// Rewrite `op` into the equivalent `const`, keeping dest and type.
fn fold(op: &mut Op, value: Literal) {
    op.op = Opcode::Const;
    op.value = Some(value);
    op.args.clear();
}

fn int_arg(op: &Op, idx: usize, env: &ConstEnv) -> Option<i64> {
    match op.args.get(idx).and_then(|a| env.get(a)) {
        Some(ConstValue::Lit(Literal::Int(n))) => Some(*n),
        _ => None,
    }
}
