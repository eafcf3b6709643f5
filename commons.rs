//! Shared wrapper types and boundary errors.

use derive_more::Display;

/// A program that has passed validation.  The passes take validated input
/// so that they never have to raise on malformed instructions themselves;
/// every analysis-level failure downstream is encoded as a value instead.
#[derive(Clone, Debug)]
pub struct Valid<T>(pub T);

/// Errors raised at the IR boundary.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum IrError {
    /// An instruction that does not fit its opcode's shape.
    #[display(fmt = "malformed instruction: {}", _0)]
    MalformedIr(String),
    /// A `jmp`/`br` target with no matching label.
    #[display(fmt = "dangling branch target `{}`", _0)]
    DanglingTarget(String),
    /// An analysis name outside the supported set.
    #[display(fmt = "unknown analysis `{}`", _0)]
    UnknownAnalysis(String),
}

impl std::error::Error for IrError {}
