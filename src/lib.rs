//! Middle-end for a small ahead-of-time compiler targeting 32-bit ARM.
//!
//! This crate turns a flat, virtual-register intermediate representation into
//! fully register-allocated code: it partitions each function into basic
//! blocks, derives the control-flow graph and dominator tree, builds SSA
//! form, computes liveness, coalesces redundant copies, and runs an iterated
//! graph-coloring register allocator with stack spilling.
//!
//! The front end (lexing, parsing, AST-to-IR lowering) and the back end
//! (textual ARM assembly emission) are out of scope; see [`pipeline`] for the
//! contract this crate expects from its neighbors.

#![deny(missing_docs)]
#![warn(unused_import_braces)]

pub use cranelift_entity as entity;

pub mod dominator_tree;
pub mod dot;
pub mod error;
pub mod flowgraph;
pub mod ir;
pub mod pipeline;
pub mod regalloc;
pub mod ssa;

pub use crate::error::{MidendError, MidendResult};
pub use crate::pipeline::compile_function;

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
