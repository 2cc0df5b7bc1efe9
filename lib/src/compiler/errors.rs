use thiserror::Error;

use crate::compiler::ir::AuxClass;

/// Errors returned by the compiler.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum Error {
    #[error("too many capture groups (maximum is {0})")]
    TooManyGroups(u8),

    #[error("no mark left for indexing alternatives ({0} marks in use)")]
    NoAltMarkSlot(u8),

    #[error("too many nested loops (maximum is {0})")]
    TooManyCounters(u8),

    #[error("not enough marks for lookaheads and lazy groups (maximum is {0})")]
    TooManyDynamicMarks(u8),

    #[error("too many guarded repeats (maximum is {0})")]
    TooManyGuards(u32),

    #[error("program too large ({len} instructions at address {address})")]
    ProgramTooLarge { len: usize, address: u32 },

    #[error("unknown group `{0}` in backreference")]
    UnknownBackreference(String),

    #[error("backreference to non-existent group {0}")]
    InvalidBackreference(u8),

    #[error("auxiliary class `{0}` is not registered")]
    MissingAuxClass(AuxClass),

    #[error("{what} {value} doesn't fit in an instruction operand")]
    OperandOverflow { what: &'static str, value: i64 },

    #[error("template with {expected} operands got {found}")]
    TemplateArity { expected: usize, found: usize },

    #[error("unpatched instruction at address {0:05x}")]
    NullInstruction(usize),

    #[error("alternation return stack is empty")]
    EmptyBReturnStack,

    #[error("tree has no root")]
    NoRoot,

    #[error("malformed tree: {0}")]
    MalformedTree(&'static str),

    #[error(transparent)]
    Vm(#[from] crate::vm::Error),
}
