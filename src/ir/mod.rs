//! The input intermediate representation: entities, instructions, and the
//! flat per-function instruction stream the rest of the middle-end operates
//! on.
//!
//! Basic-block splitting, the control-flow graph, and the dominator tree are
//! *not* part of this representation — they are derived views built by
//! [`crate::flowgraph`] and [`crate::dominator_tree`] and threaded alongside
//! a [`Function`], never stored on it, so that a stale CFG can never survive
//! a pass that edited the instruction stream.

pub mod entities;
pub mod function;
pub mod instruction;

pub use self::entities::{Block, Cond, PhysReg, Var, VarRef};
pub use self::function::{Function, Signature, SignatureTable};
pub use self::instruction::{Instruction, Opcode, Operand, VarFilter};
