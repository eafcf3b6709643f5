//! The three-address IR and its JSON wire shape.
//!
//! A program is a list of functions; a function is a flat list of
//! instruction records.  An instruction is either a label pseudo-instruction
//! or an operation.  Branch and jump targets ride in `args` right next to
//! the variable operands, so `br c T F` has `args = [c, T, F]`.

use std::collections::BTreeSet as Set;
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

use crate::commons::{IrError, Valid};

/// Block labels.
pub type BbId = String;
/// Variable names.
pub type VarId = String;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Program {
    pub functions: Vec<Function>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Function {
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Param>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub typ: Option<Type>,
    pub instrs: Vec<Instruction>,
}

/// A formal parameter.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Param {
    pub name: VarId,
    #[serde(rename = "type")]
    pub typ: Type,
}

/// One instruction record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Instruction {
    Label { label: BbId },
    Op(Op),
}

/// An operation: opcode plus its optional destination, type, argument
/// list, and (for `const`) literal value.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Op {
    pub op: Opcode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dest: Option<VarId>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub typ: Option<Type>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Literal>,
}

/// The closed opcode set.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Opcode {
    Const,
    Id,
    Add,
    Sub,
    Mul,
    Div,
    And,
    Or,
    Not,
    Eq,
    Lt,
    Gt,
    Le,
    Ge,
    Jmp,
    Br,
    Ret,
    Print,
    Nop,
    New,
    Set,
    Index,
}

impl Opcode {
    pub fn as_str(self) -> &'static str {
        use Opcode::*;
        match self {
            Const => "const",
            Id => "id",
            Add => "add",
            Sub => "sub",
            Mul => "mul",
            Div => "div",
            And => "and",
            Or => "or",
            Not => "not",
            Eq => "eq",
            Lt => "lt",
            Gt => "gt",
            Le => "le",
            Ge => "ge",
            Jmp => "jmp",
            Br => "br",
            Ret => "ret",
            Print => "print",
            Nop => "nop",
            New => "new",
            Set => "set",
            Index => "index",
        }
    }

    /// `jmp`, `br` and `ret` end a basic block.
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Jmp | Opcode::Br | Opcode::Ret)
    }
}

impl Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A literal constant.
#[derive(Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Literal {
    Int(i64),
    Bool(bool),
}

impl Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Int(n) => write!(f, "{n}"),
            Literal::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// A type descriptor: a primitive name, or a fixed-size array record.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum Type {
    Prim(String),
    Array { base: Box<Type>, size: u64 },
}

impl Op {
    /// A bare `jmp` to `target`.
    pub fn jmp(target: impl Into<String>) -> Op {
        Op {
            op: Opcode::Jmp,
            dest: None,
            typ: None,
            args: vec![target.into()],
            value: None,
        }
    }

    /// A bare `ret`.
    pub fn ret() -> Op {
        Op {
            op: Opcode::Ret,
            dest: None,
            typ: None,
            args: Vec::new(),
            value: None,
        }
    }

    /// The arguments that name variables (branch targets excluded).
    pub fn var_args(&self) -> &[String] {
        match self.op {
            Opcode::Jmp => &[],
            Opcode::Br => &self.args[..self.args.len().min(1)],
            _ => &self.args,
        }
    }

    /// The arguments that name blocks.
    pub fn label_args(&self) -> &[String] {
        match self.op {
            Opcode::Jmp => &self.args,
            Opcode::Br if self.args.len() > 1 => &self.args[1..],
            _ => &[],
        }
    }

    /// Mutable view of the arguments that name blocks.
    pub fn label_args_mut(&mut self) -> &mut [String] {
        match self.op {
            Opcode::Jmp => &mut self.args,
            Opcode::Br if self.args.len() > 1 => &mut self.args[1..],
            _ => &mut [],
        }
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(dest) = &self.dest {
            write!(f, "{dest} = ")?;
        }
        write!(f, "{}", self.op)?;
        if let Some(value) = &self.value {
            write!(f, " {value}")?;
        }
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instruction::Label { label } => write!(f, "{label}:"),
            Instruction::Op(op) => write!(f, "{op}"),
        }
    }
}

// SECTION: validation

impl Program {
    /// Check the wire-level invariants: label uniqueness, per-opcode
    /// instruction shape, and branch-target resolution.  Everything past
    /// this point treats the program as analyzable.
    pub fn validate(self) -> Result<Valid<Program>, IrError> {
        for func in &self.functions {
            validate_function(func)?;
        }
        Ok(Valid(self))
    }
}

fn validate_function(func: &Function) -> Result<(), IrError> {
    let mut labels: Set<&str> = Set::new();
    for inst in &func.instrs {
        if let Instruction::Label { label } = inst {
            if !labels.insert(label) {
                return Err(IrError::MalformedIr(format!(
                    "duplicate label `{label}` in function `{}`",
                    func.name
                )));
            }
        }
    }

    for inst in &func.instrs {
        let op = match inst {
            Instruction::Op(op) => op,
            Instruction::Label { .. } => continue,
        };
        validate_op(op)?;
        for target in op.label_args() {
            if !labels.contains(target.as_str()) {
                return Err(IrError::DanglingTarget(target.clone()));
            }
        }
    }

    Ok(())
}

fn validate_op(op: &Op) -> Result<(), IrError> {
    use Opcode::*;

    let fail = |what: &str| Err(IrError::MalformedIr(format!("{what} in `{op}`")));

    let need_args = |n: usize| {
        if op.args.len() == n {
            Ok(())
        } else {
            Err(IrError::MalformedIr(format!(
                "`{}` expects {n} argument(s), got {} in `{op}`",
                op.op,
                op.args.len()
            )))
        }
    };

    let need_dest = || {
        if op.dest.is_some() {
            Ok(())
        } else {
            Err(IrError::MalformedIr(format!("missing dest in `{op}`")))
        }
    };

    match op.op {
        Const => {
            need_dest()?;
            need_args(0)?;
            if op.value.is_none() {
                return fail("missing value");
            }
        }
        Id | Not => {
            need_dest()?;
            need_args(1)?;
        }
        Add | Sub | Mul | Div | And | Or | Eq | Lt | Gt | Le | Ge => {
            need_dest()?;
            need_args(2)?;
        }
        Jmp => need_args(1)?,
        Br => need_args(3)?,
        Ret | Print | Nop => {}
        New => need_dest()?,
        Set => need_args(3)?,
        Index => {
            need_dest()?;
            need_args(2)?;
        }
    }

    Ok(())
}
