//! Register allocation: liveness, the interference graph, copy coalescing,
//! and Chaitin-style iterated graph coloring with spilling.
//!
//! Each submodule is usable on its own (see [`crate::pipeline`] for how
//! they're sequenced), but the typical flow is
//! [`liveness::Liveness::compute`] → [`coalescing::coalesce`] →
//! [`coloring::color`], retrying from liveness with
//! [`coloring::rewrite_spills`] applied whenever coloring reports a spill.

pub mod coalescing;
pub mod coloring;
pub mod interference;
pub mod liveness;
pub mod register_set;

pub use coalescing::coalesce;
pub use coloring::{color, rewrite_spills, use_counts, ColorResult};
pub use interference::InterferenceGraph;
pub use liveness::Liveness;
pub use register_set::RegisterSet;
