//! Basic-block splitting and the control-flow graph.
//!
//! Blocks are the maximal runs of instructions between leaders; this module
//! never mutates a [`Function`](crate::ir::Function)'s instruction stream,
//! it only indexes it. Any pass that edits the stream must recompute the
//! graph afterward — there is no incremental update, unlike
//! `cranelift_codegen::flowgraph`'s `recompute_ebb`, since our functions are
//! small enough that a full rebuild per pass iteration is cheap.

use cranelift_entity::{EntityRef, PrimaryMap, SecondaryMap};

use crate::ir::{Block, Function, Instruction, Opcode};

/// The instruction range `[start, end)` that makes up one block, plus its
/// predecessors and successors in the graph.
#[derive(Clone, Debug, Default)]
struct BlockData {
    start: usize,
    end: usize,
    preds: Vec<Block>,
    succs: Vec<Block>,
}

/// The control-flow graph of a single function: block boundaries, and the
/// predecessor/successor edges between them.
#[derive(Clone, Debug)]
pub struct ControlFlowGraph {
    blocks: PrimaryMap<Block, BlockData>,
    /// Maps the starting instruction index of each block back to the block,
    /// used to resolve branch targets.
    leader_to_block: std::collections::HashMap<usize, Block>,
}

impl ControlFlowGraph {
    /// Split `func`'s instruction stream into blocks and compute the
    /// successor/predecessor edges between them.
    pub fn compute(func: &Function) -> ControlFlowGraph {
        let leaders = find_leaders(&func.body);
        let mut blocks: PrimaryMap<Block, BlockData> = PrimaryMap::new();
        let mut leader_to_block = std::collections::HashMap::new();

        for (i, &start) in leaders.iter().enumerate() {
            let end = leaders.get(i + 1).copied().unwrap_or(func.body.len());
            let block = blocks.push(BlockData { start, end, preds: Vec::new(), succs: Vec::new() });
            leader_to_block.insert(start, block);
        }

        let label_index = func.label_index().unwrap_or_default();

        let block_count = blocks.len();
        for idx in 0..block_count {
            let block = Block::new(idx);
            let data = &blocks[block];
            let last = &func.body[data.end - 1];
            let next_block = leader_to_block.get(&data.end).copied();
            let succs = successors_of(last, next_block, &label_index, &leader_to_block);
            blocks[block].succs = succs;
        }

        // predecessors are the transpose of successors
        for idx in 0..block_count {
            let block = Block::new(idx);
            let succs = blocks[block].succs.clone();
            for succ in succs {
                blocks[succ].preds.push(block);
            }
        }

        ControlFlowGraph { blocks, leader_to_block }
    }

    /// The number of blocks in the graph.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate over every block, in instruction order.
    pub fn blocks(&self) -> impl Iterator<Item = Block> + '_ {
        (0..self.blocks.len()).map(Block::new)
    }

    /// The `[start, end)` instruction range making up `block`.
    pub fn instruction_range(&self, block: Block) -> (usize, usize) {
        let data = &self.blocks[block];
        (data.start, data.end)
    }

    /// The instructions making up `block`.
    pub fn instructions<'a>(&self, func: &'a Function, block: Block) -> &'a [Instruction] {
        let (start, end) = self.instruction_range(block);
        &func.body[start..end]
    }

    /// `block`'s successors, in the order determined by the branch shape
    /// (fallthrough first, taken branch second, for conditional branches).
    pub fn succs(&self, block: Block) -> &[Block] {
        &self.blocks[block].succs
    }

    /// `block`'s predecessors, in block-index order.
    pub fn preds(&self, block: Block) -> &[Block] {
        &self.blocks[block].preds
    }

    /// The block whose first instruction is at `index`, if `index` is a
    /// leader.
    pub fn block_at(&self, index: usize) -> Option<Block> {
        self.leader_to_block.get(&index).copied()
    }

    /// Build an empty secondary map keyed by this graph's blocks, useful
    /// for callers that want dense per-block storage (liveness sets, dom
    /// sets) without depending on our internal layout.
    pub fn block_map<V: Clone + Default>(&self) -> SecondaryMap<Block, V> {
        SecondaryMap::with_default(V::default())
    }
}

fn find_leaders(body: &[Instruction]) -> Vec<usize> {
    let mut leaders: std::collections::BTreeSet<usize> = std::collections::BTreeSet::new();
    if !body.is_empty() {
        leaders.insert(0);
    }
    for (idx, inst) in body.iter().enumerate() {
        if inst.opcode == Opcode::Label {
            leaders.insert(idx);
        }
        if inst.opcode.is_local_branch() && idx + 1 < body.len() {
            leaders.insert(idx + 1);
        }
    }
    leaders.into_iter().collect()
}

fn is_call_like(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::Bl | Opcode::FuncCall)
}

fn is_terminal(opcode: Opcode) -> bool {
    matches!(opcode, Opcode::FuncRet | Opcode::Bx)
}

fn successors_of(
    last: &Instruction,
    fallthrough: Option<Block>,
    label_index: &std::collections::HashMap<&str, usize>,
    leader_to_block: &std::collections::HashMap<usize, Block>,
) -> Vec<Block> {
    if is_terminal(last.opcode) {
        return Vec::new();
    }
    if is_call_like(last.opcode) {
        return fallthrough.into_iter().collect();
    }
    match last.opcode {
        Opcode::B => branch_target(last, label_index, leader_to_block).into_iter().collect(),
        Opcode::BCond(_) => {
            let mut succs = Vec::new();
            if let Some(fall) = fallthrough {
                succs.push(fall);
            }
            if let Some(target) = branch_target(last, label_index, leader_to_block) {
                succs.push(target);
            }
            succs
        }
        _ => fallthrough.into_iter().collect(),
    }
}

fn branch_target(
    inst: &Instruction,
    label_index: &std::collections::HashMap<&str, usize>,
    leader_to_block: &std::collections::HashMap<usize, Block>,
) -> Option<Block> {
    for op in &inst.operands {
        if let crate::ir::Operand::LabelRef(label) = op {
            let idx = label_index.get(label.as_str())?;
            return leader_to_block.get(idx).copied();
        }
    }
    None
}
