//! [`Function`]: a name, a parameter signature, and a flat instruction
//! stream in source order.

use std::collections::HashMap;

use crate::error::{MidendError, MidendResult};
use crate::ir::instruction::{Instruction, Opcode, Operand};

/// The arity of a function, expressed purely in terms of how many leading
/// `REGF<n>` slots its `func_def` populates. This is the only thing that
/// crosses a function boundary: callers need to know how many argument
/// registers to populate and whether a return value lands in `REGF0`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Signature {
    /// Number of fixed argument registers (`REGF0..REGF<n-1>`).
    pub param_count: usize,
    /// Whether the function is guaranteed to leave a value in `REGF0`
    /// before returning.
    pub returns_value: bool,
}

/// A read-only table of signatures for every function in a compilation unit,
/// built once up front and never mutated while functions are compiled (see
/// the concurrency model: this is the only state shared across functions).
#[derive(Clone, Default, Debug)]
pub struct SignatureTable {
    signatures: HashMap<String, Signature>,
}

impl SignatureTable {
    /// An empty table.
    pub fn new() -> SignatureTable {
        SignatureTable { signatures: HashMap::new() }
    }

    /// Record `sig` for `name`, overwriting any previous entry.
    pub fn insert(&mut self, name: impl Into<String>, sig: Signature) {
        self.signatures.insert(name.into(), sig);
    }

    /// Look up the signature of `name`, if known.
    pub fn get(&self, name: &str) -> Option<&Signature> {
        self.signatures.get(name)
    }
}

/// A single function body: its name, parameter signature, and the flat
/// instruction stream the front end produced.
///
/// Labels are scoped to the function (the entry contract guarantees they
/// are unique within it) and always begin with `.`.
#[derive(Clone, Debug)]
pub struct Function {
    /// The function's name, as it appeared in `func_def`.
    pub name: String,
    /// Its parameter/return arity.
    pub signature: Signature,
    /// The instruction stream, in source order. Block boundaries are not
    /// recorded here; see [`crate::flowgraph::ControlFlowGraph`].
    pub body: Vec<Instruction>,
}

impl Function {
    /// Build a function from a name, signature, and body.
    pub fn new(name: impl Into<String>, signature: Signature, body: Vec<Instruction>) -> Function {
        Function { name: name.into(), signature, body }
    }

    /// Map every label definition in this function to the index of the
    /// `Label` pseudo-instruction that defines it. Per the leader rule, a
    /// label definition is itself a leader, so this is also the index of
    /// the block the label names.
    ///
    /// Returns [`MidendError::MalformedIr`] if two labels collide, and
    /// [`MidendError::UndefinedLabel`] is left for callers that resolve
    /// branch targets against the returned map.
    pub fn label_index(&self) -> MidendResult<HashMap<&str, usize>> {
        let mut map = HashMap::new();
        for (idx, inst) in self.body.iter().enumerate() {
            if inst.opcode != Opcode::Label {
                continue;
            }
            if let Some(Operand::LabelDef(label)) = inst.operands.get(0) {
                if !label.starts_with('.') {
                    return Err(MidendError::MalformedIr {
                        function: self.name.clone(),
                        detail: format!("label `{}` does not start with `.`", label),
                    });
                }
                if map.insert(label.as_str(), idx).is_some() {
                    return Err(MidendError::MalformedIr {
                        function: self.name.clone(),
                        detail: format!("label `{}` defined more than once", label),
                    });
                }
            }
        }
        Ok(map)
    }

    /// Verify the entry contract described for the input guarantees: the
    /// body starts with `func_def`, every block has at most one terminator
    /// and it is its last instruction, every `func_ret` reads a value
    /// (never a bare return), and every branch target resolves to a label
    /// defined in this function.
    pub fn validate(&self) -> MidendResult<()> {
        match self.body.first().map(|i| i.opcode) {
            Some(Opcode::FuncDef) => {}
            _ => {
                return Err(MidendError::MalformedIr {
                    function: self.name.clone(),
                    detail: "function body does not start with func_def".into(),
                })
            }
        }
        for inst in &self.body {
            if inst.opcode == Opcode::FuncRet && inst.operands.is_empty() {
                return Err(MidendError::MalformedIr {
                    function: self.name.clone(),
                    detail: "func_ret without a return value operand".into(),
                });
            }
        }
        self.check_single_terminator_per_block()?;
        let labels = self.label_index()?;
        for inst in &self.body {
            if !inst.opcode.is_branch() {
                continue;
            }
            for op in &inst.operands {
                if let Operand::LabelRef(target) = op {
                    if !labels.contains_key(target.as_str()) {
                        return Err(MidendError::UndefinedLabel {
                            function: self.name.clone(),
                            label: target.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// Reject a block that contains more than one of `func_ret`/`b`/`bx`/
    /// `bcond` — the opcodes with no fallthrough successor of their own. A
    /// leader starts a new block the same way [`crate::flowgraph`] splits
    /// them (index 0, a label definition, or the instruction right after a
    /// local branch), so one of these appearing anywhere but immediately
    /// before the next leader means the front end produced dead or
    /// malformed code within a single block. `bl` is deliberately excluded:
    /// a call returns control to the very next instruction, so code after
    /// it in the same block is ordinary fallthrough, not a second
    /// terminator.
    fn check_single_terminator_per_block(&self) -> MidendResult<()> {
        let mut terminator_seen = false;
        for (idx, inst) in self.body.iter().enumerate() {
            let is_leader = idx == 0
                || inst.opcode == Opcode::Label
                || idx.checked_sub(1).and_then(|p| self.body.get(p)).map_or(false, |prev| prev.opcode.is_local_branch());
            if is_leader {
                terminator_seen = false;
            }
            if terminator_seen {
                return Err(MidendError::MalformedIr {
                    function: self.name.clone(),
                    detail: format!("block contains more than one terminator, at instruction {}", idx),
                });
            }
            if ends_block(inst.opcode) {
                terminator_seen = true;
            }
        }
        Ok(())
    }
}

/// `true` for an opcode that leaves nothing for the rest of its block to
/// do: an unconditional or conditional branch, or a `func_ret`/`bx`. `bl`
/// is a call, not covered here — control returns to the next instruction.
fn ends_block(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::B | Opcode::Bx | Opcode::BCond(_) | Opcode::FuncRet)
}
