//! Backward liveness: a classic gen/kill, may-live dataflow analysis over
//! the control-flow graph, plus the per-instruction live-after sets the
//! interference graph is built from.
//!
//! Grounded on the same shape as most backward dataflow passes in the
//! corpus: per-block `live_in`/`live_out` sets refined to a worklist fixed
//! point, then a single backward sweep per block to recover per-instruction
//! detail.

use std::collections::{HashSet, VecDeque};

use cranelift_entity::SecondaryMap;
use log::debug;

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Function, VarFilter, VarRef};

/// `live_in`/`live_out` sets for one block.
#[derive(Clone, Default, Debug)]
pub struct BlockLiveness {
    /// Variables live on entry to the block.
    pub live_in: HashSet<VarRef>,
    /// Variables live on exit from the block.
    pub live_out: HashSet<VarRef>,
}

/// The result of running liveness analysis on a function: per-block
/// boundary sets, and the live-after set recorded at each instruction.
#[derive(Clone, Debug)]
pub struct Liveness {
    blocks: SecondaryMap<Block, BlockLiveness>,
    /// Indexed by instruction position in the function body: the set of
    /// variables live immediately after that instruction executes.
    live_after: Vec<HashSet<VarRef>>,
}

impl Liveness {
    /// Run liveness analysis on `func` using `cfg`.
    pub fn compute(func: &Function, cfg: &ControlFlowGraph) -> Liveness {
        let all: Vec<Block> = cfg.blocks().collect();

        let mut gen: SecondaryMap<Block, HashSet<VarRef>> = SecondaryMap::new();
        let mut kill: SecondaryMap<Block, HashSet<VarRef>> = SecondaryMap::new();
        for &b in &all {
            let (g, k) = gen_kill(func, cfg, b);
            gen[b] = g;
            kill[b] = k;
        }

        let mut blocks: SecondaryMap<Block, BlockLiveness> = SecondaryMap::new();
        let mut worklist: VecDeque<Block> = all.iter().rev().cloned().collect();
        let mut queued: HashSet<Block> = all.iter().cloned().collect();

        while let Some(b) = worklist.pop_front() {
            queued.remove(&b);

            let mut live_out = HashSet::new();
            for &s in cfg.succs(b) {
                live_out.extend(blocks[s].live_in.iter().cloned());
            }

            let mut live_in = gen[b].clone();
            for v in live_out.iter() {
                if !kill[b].contains(v) {
                    live_in.insert(*v);
                }
            }

            let changed = live_in != blocks[b].live_in || live_out != blocks[b].live_out;
            blocks[b] = BlockLiveness { live_in, live_out };

            if changed {
                for &p in cfg.preds(b) {
                    if queued.insert(p) {
                        worklist.push_back(p);
                    }
                }
            }
        }

        debug!("liveness fixed point reached over {} blocks", all.len());

        let live_after = compute_live_after(func, cfg, &blocks);

        Liveness { blocks, live_after }
    }

    /// Variables live on entry to `b`.
    pub fn live_in(&self, b: Block) -> &HashSet<VarRef> {
        &self.blocks[b].live_in
    }

    /// Variables live on exit from `b`.
    pub fn live_out(&self, b: Block) -> &HashSet<VarRef> {
        &self.blocks[b].live_out
    }

    /// The set of variables live immediately after the instruction at
    /// `index` in the function's body.
    pub fn live_after(&self, index: usize) -> &HashSet<VarRef> {
        &self.live_after[index]
    }
}

fn gen_kill(
    func: &Function,
    cfg: &ControlFlowGraph,
    block: Block,
) -> (HashSet<VarRef>, HashSet<VarRef>) {
    let mut gen = HashSet::new();
    let mut kill = HashSet::new();
    let (start, end) = cfg.instruction_range(block);
    for inst in &func.body[start..end] {
        for r in inst.reads(VarFilter::IncludeFixed) {
            if !kill.contains(&r) {
                gen.insert(r);
            }
        }
        for w in inst.writes(VarFilter::IncludeFixed) {
            kill.insert(w);
        }
    }
    (gen, kill)
}

fn compute_live_after(
    func: &Function,
    cfg: &ControlFlowGraph,
    blocks: &SecondaryMap<Block, BlockLiveness>,
) -> Vec<HashSet<VarRef>> {
    let mut live_after = vec![HashSet::new(); func.body.len()];
    for b in cfg.blocks() {
        let (start, end) = cfg.instruction_range(b);
        let mut live = blocks[b].live_out.clone();
        for idx in (start..end).rev() {
            let inst = &func.body[idx];
            for w in inst.writes(VarFilter::IncludeFixed) {
                live.remove(&w);
            }
            for r in inst.reads(VarFilter::IncludeFixed) {
                live.insert(r);
            }
            live_after[idx] = live.clone();
        }
    }
    live_after
}
