//! Error taxonomy for the middle-end (see the error handling design notes).
//!
//! Every error here is fatal to the function currently being compiled: the
//! pipeline aborts that function and propagates the error to the driver,
//! which decides whether to continue with other functions.

use failure_derive::Fail;

use crate::ir::{Block, Var};

/// Result type threaded through every middle-end pass.
pub type MidendResult<T> = Result<T, MidendError>;

/// A fatal error raised by one of the middle-end passes.
#[derive(Debug, Fail)]
pub enum MidendError {
    /// An instruction's operand shape was not recognized by the read/write
    /// taxonomy (`§4.1`), or a block had more than one terminator.
    #[fail(display = "malformed IR in function `{}`: {}", function, detail)]
    MalformedIr {
        /// Name of the function being compiled.
        function: String,
        /// Human-readable description of the offending instruction.
        detail: String,
    },

    /// A branch referenced a label that does not exist within the function.
    #[fail(display = "undefined label `{}` in function `{}`", label, function)]
    UndefinedLabel {
        /// Name of the function being compiled.
        function: String,
        /// The dangling label reference.
        label: String,
    },

    /// A `PHI` had a different number of arguments than its block has
    /// predecessors; this indicates a bug in SSA construction, not malformed
    /// input.
    #[fail(
        display = "phi arity mismatch in block {:?} of function `{}`: {} arguments, {} predecessors",
        block, function, got, expected
    )]
    PhiArityMismatch {
        /// Name of the function being compiled.
        function: String,
        /// The block containing the malformed phi.
        block: Block,
        /// Number of phi arguments actually present.
        got: usize,
        /// Number of predecessors the block has.
        expected: usize,
    },

    /// The interference graph remained non-colorable after the implementation
    /// bound on spill iterations was exceeded.
    #[fail(
        display = "function `{}` is non-colorable after {} spill iterations",
        function, iterations
    )]
    NonColorable {
        /// Name of the function being compiled.
        function: String,
        /// The spill-iteration cap that was exceeded.
        iterations: u32,
    },

    /// A variable expected to be pre-colored to a specific physical register
    /// could not be (a bug in the caller, not a user-facing condition).
    #[fail(display = "variable {:?} has no fixed color in function `{}`", var, function)]
    MissingFixedColor {
        /// Name of the function being compiled.
        function: String,
        /// The offending variable.
        var: Var,
    },
}
