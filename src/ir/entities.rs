//! Entity references used throughout the middle-end.
//!
//! Blocks and free/spill variables are referenced by compact `u32` indices
//! rather than by name or by pointer, following the entity-reference
//! convention: a separate index type per kind of thing keeps one from being
//! used where another is expected, and keeps index-keyed maps (see
//! [`cranelift_entity`]) dense and cheap.

use cranelift_entity::{entity_impl, EntityRef};
use std::fmt;

/// A basic block, referenced by its position in a function's block list.
/// The entry block always has index 0.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An interned free or spill variable name (`REG<n>` / `REGSPILL<n>`).
///
/// Two `Var`s compare equal iff they name the same original front-end
/// temporary; SSA versions are tracked alongside, not inside, this type (see
/// [`crate::ir::VarRef`]).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Var(u32);
entity_impl!(Var, "reg");

/// A physical ARM register. Physical registers never participate in
/// allocation; they may appear verbatim in register lists (`push`/`pop`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum PhysReg {
    /// `r0`..`r15`.
    R(u8),
    /// The stack pointer, `sp` (`r13`).
    Sp,
    /// The link register, `lr` (`r14`).
    Lr,
}

impl PhysReg {
    /// The register number this physical register occupies in the ARM
    /// register file (`sp` is r13, `lr` is r14).
    pub fn number(self) -> u8 {
        match self {
            PhysReg::R(n) => n,
            PhysReg::Sp => 13,
            PhysReg::Lr => 14,
        }
    }
}

impl fmt::Display for PhysReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            PhysReg::R(n) => write!(f, "r{}", n),
            PhysReg::Sp => write!(f, "sp"),
            PhysReg::Lr => write!(f, "lr"),
        }
    }
}

/// A reference to a variable occurrence, distinguishing the three namespaces
/// described in the data model: free variables (colorable), fixed variables
/// (pre-colored ABI slots), and spill temporaries (colorable, but excluded
/// from being re-spilled within the pass that introduced them).
///
/// This is the unit that liveness, interference, and coloring all operate
/// over; it carries an SSA version so that `REG4.0` and `REG4.1` are treated
/// as distinct values once SSA construction has run.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum VarRef {
    /// `REG<n>` / `REG<n>.<version>` — freely allocatable.
    Free(Var, u32),
    /// `REGF<n>` — pinned to physical register `r<n>`.
    Fixed(u8, u32),
    /// `REGSPILL<n>` — a spill temporary, live only across its reload/store.
    Spill(Var),
}

impl VarRef {
    /// `true` for [`VarRef::Fixed`] — the allocator must assign it its ABI
    /// register regardless of spill cost.
    pub fn is_fixed(self) -> bool {
        matches!(self, VarRef::Fixed(..))
    }

    /// `true` for [`VarRef::Spill`] — a temporary introduced by the spiller,
    /// exempt from being chosen as a spill victim again within the same
    /// pass (see the spill rewrite design note).
    pub fn is_spill(self) -> bool {
        matches!(self, VarRef::Spill(_))
    }

    /// The SSA version of this occurrence, or 0 for un-renamed / spill
    /// variables.
    pub fn version(self) -> u32 {
        match self {
            VarRef::Free(_, v) | VarRef::Fixed(_, v) => v,
            VarRef::Spill(_) => 0,
        }
    }

    /// Rebuild this reference with a new SSA version, leaving fixed and
    /// spill variables untouched (they never carry a meaningful version).
    pub fn with_version(self, version: u32) -> VarRef {
        match self {
            VarRef::Free(v, _) => VarRef::Free(v, version),
            other => other,
        }
    }
}

impl fmt::Display for VarRef {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            VarRef::Free(v, 0) => write!(f, "REG{}", v.index()),
            VarRef::Free(v, ver) => write!(f, "REG{}.{}", v.index(), ver),
            VarRef::Fixed(n, 0) => write!(f, "REGF{}", n),
            VarRef::Fixed(n, ver) => write!(f, "REGF{}.{}", n, ver),
            VarRef::Spill(v) => write!(f, "REGSPILL{}", v.index()),
        }
    }
}

/// A branch condition, derived from the ARM condition-code suffix
/// (`b{eq,ne,lt,le,gt,ge,hs,ls}`).
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Cond {
    /// `eq`
    Eq,
    /// `ne`
    Ne,
    /// `lt`
    Lt,
    /// `le`
    Le,
    /// `gt`
    Gt,
    /// `ge`
    Ge,
    /// `hs` (unsigned higher-or-same)
    Hs,
    /// `ls` (unsigned lower-or-same)
    Ls,
}

impl fmt::Display for Cond {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Cond::Eq => "eq",
            Cond::Ne => "ne",
            Cond::Lt => "lt",
            Cond::Le => "le",
            Cond::Gt => "gt",
            Cond::Ge => "ge",
            Cond::Hs => "hs",
            Cond::Ls => "ls",
        };
        f.write_str(s)
    }
}
