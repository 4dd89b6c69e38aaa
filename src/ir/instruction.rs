//! Instruction shape, operand taxonomy, and the read/write accessors that
//! every later pass (liveness, SSA, coalescing, coloring) is built on top of.

use std::fmt;

use crate::ir::entities::{Cond, PhysReg, VarRef};

/// The three instruction families from the data model, collapsed to the
/// granularity the middle-end actually cares about: how each opcode shape
/// reads and writes variables.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Opcode {
    /// `mov d, s`
    Mov,
    /// `ldr d, [addr]`
    Ldr,
    /// `str v, [addr]`
    Str,
    /// `add`, in 2- or 3-operand form.
    Add,
    /// `sub`, in 2- or 3-operand form.
    Sub,
    /// `mul`, in 2- or 3-operand form.
    Mul,
    /// `sdiv`, in 2- or 3-operand form.
    Sdiv,
    /// `cmp a, b`
    Cmp,
    /// Unconditional branch to a label.
    B,
    /// Branch to the address held in a register.
    Bx,
    /// Branch-and-link (subroutine call not modeled as a pseudo `func_call`).
    Bl,
    /// Conditional branch, e.g. `beq`, `bne`, ...
    BCond(Cond),
    /// `push {..}`
    Push,
    /// `pop {..}`
    Pop,
    /// `func_def name, REGF0, REGF1, ..`
    FuncDef,
    /// `func_call name, [args], [clobbers]`
    FuncCall,
    /// `func_ret v`
    FuncRet,
    /// Front-end array-declaration pseudo-op, opaque to the middle-end
    /// beyond its read/write shape.
    StackAlloc,
    /// Address-materializing store pseudo-op, lowered to `str` later.
    MemStore,
    /// Address-materializing load pseudo-op, lowered to `ldr` later.
    MemLoad,
    /// SSA phi-function; removed before register allocation.
    Phi,
    /// A standalone label definition (`.L1:`), a leader with no effect of
    /// its own.
    Label,
}

impl Opcode {
    /// Branch family opcodes, i.e. things that transfer control.
    pub fn is_branch(self) -> bool {
        matches!(self, Opcode::B | Opcode::Bx | Opcode::Bl | Opcode::BCond(_))
    }

    /// `true` for opcodes whose successor is "the next instruction" rather
    /// than determined purely by branch targets (used by the block
    /// splitter, not by the read/write taxonomy).
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::B | Opcode::Bx | Opcode::Bl | Opcode::BCond(_) | Opcode::FuncRet
        )
    }

    /// `true` for an unconditional or conditional branch to a label within
    /// the same function, the only kind of terminator that makes the
    /// instruction immediately after it a new block leader. `bl`, `bx`, and
    /// `func_ret` are terminators too, but control never falls through them
    /// into the next instruction within the same block, so they impose no
    /// leader of their own — the block boundary after one of those instead
    /// comes from whatever leader (a label, typically) follows.
    pub(crate) fn is_local_branch(self) -> bool {
        matches!(self, Opcode::B | Opcode::BCond(_))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Opcode::Mov => write!(f, "mov"),
            Opcode::Ldr => write!(f, "ldr"),
            Opcode::Str => write!(f, "str"),
            Opcode::Add => write!(f, "add"),
            Opcode::Sub => write!(f, "sub"),
            Opcode::Mul => write!(f, "mul"),
            Opcode::Sdiv => write!(f, "sdiv"),
            Opcode::Cmp => write!(f, "cmp"),
            Opcode::B => write!(f, "b"),
            Opcode::Bx => write!(f, "bx"),
            Opcode::Bl => write!(f, "bl"),
            Opcode::BCond(c) => write!(f, "b{}", c),
            Opcode::Push => write!(f, "push"),
            Opcode::Pop => write!(f, "pop"),
            Opcode::FuncDef => write!(f, "func_def"),
            Opcode::FuncCall => write!(f, "func_call"),
            Opcode::FuncRet => write!(f, "func_ret"),
            Opcode::StackAlloc => write!(f, "stackalloc"),
            Opcode::MemStore => write!(f, "memstore"),
            Opcode::MemLoad => write!(f, "memload"),
            Opcode::Phi => write!(f, "PHI"),
            Opcode::Label => write!(f, ""),
        }
    }
}

/// An instruction operand. Nested lists cover register lists
/// (`push`/`pop`), effective addresses, and phi-argument vectors.
#[derive(Clone, PartialEq, Debug)]
pub enum Operand {
    /// A textual immediate, e.g. `#100`.
    Immediate(i64),
    /// A physical register used verbatim (never renamed, never colored).
    Phys(PhysReg),
    /// A free, fixed, or spill variable occurrence.
    Var(VarRef),
    /// A label definition (`.L1:`).
    LabelDef(String),
    /// A bare label used as a branch target.
    LabelRef(String),
    /// An effective address `[base, #offset]`, with an optional shift applied
    /// to the offset register (front-end array indexing).
    Address {
        /// The base address operand (a variable or physical register).
        base: Box<Operand>,
        /// Constant byte offset from `base`.
        offset: i32,
        /// Optional left-shift amount applied before adding to `base`.
        shift: Option<u8>,
    },
    /// A nested list: register lists, φ-argument vectors.
    List(Vec<Operand>),
}

impl Operand {
    /// Build a variable operand with SSA version 0.
    pub fn free(var: crate::ir::entities::Var) -> Operand {
        Operand::Var(VarRef::Free(var, 0))
    }

    /// Build a pre-colored fixed-variable operand (`REGF<n>`).
    pub fn fixed(n: u8) -> Operand {
        Operand::Var(VarRef::Fixed(n, 0))
    }

    fn collect_vars(&self, out: &mut Vec<VarRef>) {
        match self {
            Operand::Var(v) => out.push(*v),
            Operand::Address { base, .. } => base.collect_vars(out),
            Operand::List(items) => {
                for item in items {
                    item.collect_vars(out);
                }
            }
            Operand::Immediate(_) | Operand::Phys(_) | Operand::LabelDef(_) | Operand::LabelRef(_) => {}
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Immediate(n) => write!(f, "#{}", n),
            Operand::Phys(r) => write!(f, "{}", r),
            Operand::Var(v) => write!(f, "{}", v),
            Operand::LabelDef(l) => write!(f, "{}:", l),
            Operand::LabelRef(l) => write!(f, "{}", l),
            Operand::Address { base, offset, shift } => {
                write!(f, "[{}, #{}", base, offset)?;
                if let Some(s) = shift {
                    write!(f, ", lsl #{}", s)?;
                }
                write!(f, "]")
            }
            Operand::List(items) => {
                write!(f, "{{")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Whether pre-colored (`REGF<n>`) variables should be reported by
/// [`Instruction::reads`] / [`Instruction::writes`].
///
/// Liveness must always include fixed variables (their lifetime is real and
/// must be respected); some allocator bookkeeping wants to treat them as an
/// external constraint instead of a colorable participant, hence the filter.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum VarFilter {
    /// Report free, fixed, and spill variables.
    IncludeFixed,
    /// Report only free and spill variables.
    ExcludeFixed,
}

fn apply_filter(mut vars: Vec<VarRef>, filter: VarFilter) -> Vec<VarRef> {
    if filter == VarFilter::ExcludeFixed {
        vars.retain(|v| !v.is_fixed());
    }
    vars
}

/// An IR instruction: an opcode plus its operands.
#[derive(Clone, PartialEq, Debug)]
pub struct Instruction {
    /// The opcode.
    pub opcode: Opcode,
    /// Operands, in textual order.
    pub operands: Vec<Operand>,
}

impl Instruction {
    /// Build an instruction from an opcode and its operands.
    pub fn new(opcode: Opcode, operands: Vec<Operand>) -> Instruction {
        Instruction { opcode, operands }
    }

    /// The variables read by this instruction, per the opcode-indexed
    /// taxonomy. For `PHI`, the order of the returned reads matches the
    /// order of predecessor blocks.
    pub fn reads(&self, filter: VarFilter) -> Vec<VarRef> {
        let mut out = Vec::new();
        match self.opcode {
            Opcode::Cmp | Opcode::Push => {
                for op in &self.operands {
                    op.collect_vars(&mut out);
                }
            }
            Opcode::B | Opcode::Bl | Opcode::BCond(_) => {
                for op in &self.operands {
                    op.collect_vars(&mut out);
                }
            }
            Opcode::Bx | Opcode::FuncRet => {
                for op in &self.operands {
                    op.collect_vars(&mut out);
                }
            }
            Opcode::Pop | Opcode::FuncDef => {}
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Sdiv => match self.operands.len() {
                2 => {
                    // 2-operand form: `op d, s` -- d is read and written, s is read.
                    self.operands[0].collect_vars(&mut out);
                    self.operands[1].collect_vars(&mut out);
                }
                3 => {
                    // 3-operand form: `op d, s1, s2` -- only the sources are read.
                    self.operands[1].collect_vars(&mut out);
                    self.operands[2].collect_vars(&mut out);
                }
                n => unreachable!("arithmetic opcode with {} operands", n),
            },
            Opcode::Mov => {
                if let Some(src) = self.operands.get(1) {
                    src.collect_vars(&mut out);
                }
            }
            Opcode::Str | Opcode::MemStore => {
                for op in &self.operands {
                    op.collect_vars(&mut out);
                }
            }
            Opcode::Ldr | Opcode::MemLoad => {
                if let Some(addr) = self.operands.get(1) {
                    addr.collect_vars(&mut out);
                }
            }
            Opcode::FuncCall => {
                if let Some(args) = self.operands.get(1) {
                    args.collect_vars(&mut out);
                }
            }
            Opcode::StackAlloc => {
                if let Some(size) = self.operands.get(1) {
                    size.collect_vars(&mut out);
                }
            }
            Opcode::Phi => {
                if let Some(Operand::List(args)) = self.operands.get(1) {
                    for arg in args {
                        arg.collect_vars(&mut out);
                    }
                }
            }
            Opcode::Label => {}
        }
        apply_filter(out, filter)
    }

    /// The variables written (defined) by this instruction.
    pub fn writes(&self, filter: VarFilter) -> Vec<VarRef> {
        let mut out = Vec::new();
        match self.opcode {
            Opcode::Cmp | Opcode::Push | Opcode::B | Opcode::Bl | Opcode::BCond(_) | Opcode::Bx
            | Opcode::FuncRet => {}
            Opcode::Pop => {
                if let Some(list) = self.operands.get(0) {
                    list.collect_vars(&mut out);
                }
            }
            Opcode::FuncDef => {
                for op in self.operands.iter().skip(1) {
                    op.collect_vars(&mut out);
                }
            }
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Sdiv | Opcode::Mov | Opcode::Ldr
            | Opcode::MemLoad | Opcode::StackAlloc => {
                if let Some(dst) = self.operands.get(0) {
                    dst.collect_vars(&mut out);
                }
            }
            Opcode::Str | Opcode::MemStore => {}
            Opcode::FuncCall => {
                if let Some(clobbers) = self.operands.get(2) {
                    clobbers.collect_vars(&mut out);
                }
            }
            Opcode::Phi => {
                if let Some(dst) = self.operands.get(0) {
                    dst.collect_vars(&mut out);
                }
            }
            Opcode::Label => {}
        }
        apply_filter(out, filter)
    }

    /// Convenience accessor for the single variable a `PHI`, `mov`, `ldr`, or
    /// similar single-destination instruction writes, if any.
    pub fn sole_write(&self) -> Option<VarRef> {
        let mut w = self.writes(VarFilter::IncludeFixed);
        if w.len() == 1 {
            w.pop()
        } else {
            None
        }
    }

    /// `true` if this is a `mov d, s` where both operands are variables.
    pub fn as_copy(&self) -> Option<(VarRef, VarRef)> {
        if self.opcode != Opcode::Mov {
            return None;
        }
        match (self.operands.get(0), self.operands.get(1)) {
            (Some(Operand::Var(d)), Some(Operand::Var(s))) => Some((*d, *s)),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.opcode == Opcode::Label {
            return write!(f, "{}", self.operands[0]);
        }
        write!(f, "{}", self.opcode)?;
        for (i, op) in self.operands.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, " {}", op)?;
        }
        Ok(())
    }
}
