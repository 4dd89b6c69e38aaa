//! Dominator sets, immediate dominators, dominance frontiers, and a
//! preorder walk of the dominator tree.
//!
//! The dominator sets are computed by the textbook naive iterative
//! fixed-point (not the Cooper-Harvey-Kennedy incremental algorithm
//! `cranelift_codegen` uses): `dom(entry) = {entry}`, and
//! `dom(n) = {n} ∪ ⋂ dom(p)` over every predecessor `p` of `n`, repeated
//! until no set changes. Functions here are small enough that the
//! asymptotic cost of the naive approach never matters.

use std::collections::BTreeSet;

use cranelift_entity::{EntityRef, SecondaryMap};

use crate::flowgraph::ControlFlowGraph;
use crate::ir::Block;

/// Dominator relationships for a single function's control-flow graph.
#[derive(Clone, Debug)]
pub struct DominatorTree {
    dom_sets: SecondaryMap<Block, BTreeSet<Block>>,
    idom: SecondaryMap<Block, Option<Block>>,
    frontier: SecondaryMap<Block, Vec<Block>>,
    children: SecondaryMap<Block, Vec<Block>>,
    entry: Block,
}

impl DominatorTree {
    /// Compute dominator sets, immediate dominators, and dominance
    /// frontiers for `cfg`. Block 0 is always the entry block.
    pub fn compute(cfg: &ControlFlowGraph) -> DominatorTree {
        let entry = Block::new(0);
        let all: Vec<Block> = cfg.blocks().collect();

        let mut dom_sets: SecondaryMap<Block, BTreeSet<Block>> = SecondaryMap::new();
        for &b in &all {
            if b == entry {
                let mut s = BTreeSet::new();
                s.insert(entry);
                dom_sets[b] = s;
            } else {
                // Initialize to "everything" so the first intersection pass
                // actually narrows instead of starting from empty.
                dom_sets[b] = all.iter().cloned().collect();
            }
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &n in &all {
                if n == entry {
                    continue;
                }
                let preds = cfg.preds(n);
                let mut new_set = if preds.is_empty() {
                    BTreeSet::new()
                } else {
                    let mut iter = preds.iter();
                    let mut acc = dom_sets[*iter.next().unwrap()].clone();
                    for &p in iter {
                        acc = acc.intersection(&dom_sets[p]).cloned().collect();
                    }
                    acc
                };
                new_set.insert(n);
                if new_set != dom_sets[n] {
                    dom_sets[n] = new_set;
                    changed = true;
                }
            }
        }

        let mut idom: SecondaryMap<Block, Option<Block>> = SecondaryMap::new();
        let mut children: SecondaryMap<Block, Vec<Block>> = SecondaryMap::new();
        for &n in &all {
            if n == entry {
                idom[n] = None;
                continue;
            }
            let d = immediate_dominator(n, &dom_sets);
            if let Some(parent) = d {
                children[parent].push(n);
            }
            idom[n] = d;
        }

        let frontier = compute_frontier(cfg, &all, entry, &idom);

        DominatorTree { dom_sets, idom, frontier, children, entry }
    }

    /// `true` if `a` dominates `b` (every path from the entry to `b` passes
    /// through `a`; every block dominates itself).
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        self.dom_sets[b].contains(&a)
    }

    /// `b`'s immediate dominator, or `None` if `b` is the entry block.
    pub fn idom(&self, b: Block) -> Option<Block> {
        self.idom[b]
    }

    /// `b`'s dominance frontier: the set of blocks `f` such that `b`
    /// dominates some predecessor of `f` but does not strictly dominate
    /// `f` itself.
    pub fn frontier(&self, b: Block) -> &[Block] {
        &self.frontier[b]
    }

    /// The entry block (always block 0).
    pub fn entry(&self) -> Block {
        self.entry
    }

    /// `b`'s children in the dominator tree, in increasing block-index
    /// order.
    pub fn children(&self, b: Block) -> &[Block] {
        &self.children[b]
    }

    /// Walk the dominator tree in preorder (parent before children),
    /// starting at the entry block. Uses an explicit stack rather than
    /// recursion: functions with long linear chains of blocks would
    /// otherwise produce a dominator tree as deep as the function is long.
    pub fn preorder(&self) -> Vec<Block> {
        let mut order = Vec::new();
        let mut stack = vec![self.entry];
        while let Some(b) = stack.pop() {
            order.push(b);
            // push in reverse so children are visited in increasing index
            // order, matching the order blocks were discovered in.
            for &child in self.children[b].iter().rev() {
                stack.push(child);
            }
        }
        order
    }
}

fn immediate_dominator(
    n: Block,
    dom_sets: &SecondaryMap<Block, BTreeSet<Block>>,
) -> Option<Block> {
    let mut candidates: Vec<Block> = dom_sets[n].iter().cloned().filter(|&d| d != n).collect();
    if candidates.is_empty() {
        return None;
    }
    candidates.retain(|&x| !candidates.iter().any(|&y| y != x && dom_sets[y].contains(&x)));
    debug_assert_eq!(candidates.len(), 1, "idom reduction did not converge to a single node");
    candidates.pop()
}

fn compute_frontier(
    cfg: &ControlFlowGraph,
    all: &[Block],
    entry: Block,
    idom: &SecondaryMap<Block, Option<Block>>,
) -> SecondaryMap<Block, Vec<Block>> {
    let mut frontier: SecondaryMap<Block, Vec<Block>> = SecondaryMap::new();
    for &b in all {
        let preds = cfg.preds(b);
        if preds.len() < 2 {
            continue;
        }
        for &p in preds {
            let mut runner = p;
            while Some(runner) != idom[b] {
                if !frontier[runner].contains(&b) {
                    frontier[runner].push(b);
                }
                match idom[runner] {
                    Some(parent) => runner = parent,
                    None => {
                        if runner == entry {
                            break;
                        }
                        unreachable!("block with no idom that isn't the entry");
                    }
                }
            }
        }
    }
    frontier
}
