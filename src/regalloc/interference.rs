//! Interference graph construction.
//!
//! Built once, right after SSA lowering settles on a final variable set, and
//! then maintained incrementally through coalescing rather than rebuilt:
//! each coalesce merges two nodes, which is cheap to apply directly to the
//! adjacency map.

use std::collections::{HashMap, HashSet};

use crate::ir::{Function, VarFilter, VarRef};
use crate::regalloc::liveness::Liveness;

/// An undirected graph over variable occurrences: an edge means the two
/// variables are simultaneously live somewhere and therefore cannot share a
/// physical register.
#[derive(Clone, Default, Debug)]
pub struct InterferenceGraph {
    adjacency: HashMap<VarRef, HashSet<VarRef>>,
}

impl InterferenceGraph {
    /// Build the interference graph for `func`, using the result of
    /// [`Liveness::compute`] on the same function/CFG pair.
    pub fn build(func: &Function, liveness: &Liveness) -> InterferenceGraph {
        let mut graph = InterferenceGraph::default();
        for inst in &func.body {
            for v in inst.reads(VarFilter::IncludeFixed) {
                graph.adjacency.entry(v).or_insert_with(HashSet::new);
            }
            for v in inst.writes(VarFilter::IncludeFixed) {
                graph.adjacency.entry(v).or_insert_with(HashSet::new);
            }
        }

        for (idx, inst) in func.body.iter().enumerate() {
            let writes = inst.writes(VarFilter::IncludeFixed);
            if writes.is_empty() {
                continue;
            }
            let live = liveness.live_after(idx);
            let copy_src = inst.as_copy().map(|(_, s)| s);

            for &d in &writes {
                for &l in live {
                    if l == d || Some(l) == copy_src {
                        continue;
                    }
                    graph.add_edge(d, l);
                }
                for &d2 in &writes {
                    if d2 != d {
                        graph.add_edge(d, d2);
                    }
                }
            }
        }

        graph
    }

    /// Ensure `v` has a node in the graph, with no neighbors.
    pub fn ensure_node(&mut self, v: VarRef) {
        self.adjacency.entry(v).or_insert_with(HashSet::new);
    }

    /// Add an (undirected) interference edge between `a` and `b`.
    pub fn add_edge(&mut self, a: VarRef, b: VarRef) {
        if a == b {
            return;
        }
        self.adjacency.entry(a).or_insert_with(HashSet::new).insert(b);
        self.adjacency.entry(b).or_insert_with(HashSet::new).insert(a);
    }

    /// Remove the edge between `a` and `b`, if any.
    pub fn remove_edge(&mut self, a: VarRef, b: VarRef) {
        if let Some(n) = self.adjacency.get_mut(&a) {
            n.remove(&b);
        }
        if let Some(n) = self.adjacency.get_mut(&b) {
            n.remove(&a);
        }
    }

    /// `true` if `a` and `b` are adjacent.
    pub fn interferes(&self, a: VarRef, b: VarRef) -> bool {
        self.adjacency.get(&a).map_or(false, |n| n.contains(&b))
    }

    /// `a`'s neighbors.
    pub fn neighbors(&self, a: VarRef) -> HashSet<VarRef> {
        self.adjacency.get(&a).cloned().unwrap_or_default()
    }

    /// `a`'s degree (neighbor count), the quantity the spill-cost heuristic
    /// divides by.
    pub fn degree(&self, a: VarRef) -> usize {
        self.adjacency.get(&a).map_or(0, |n| n.len())
    }

    /// All nodes currently in the graph.
    pub fn nodes(&self) -> impl Iterator<Item = VarRef> + '_ {
        self.adjacency.keys().copied()
    }

    /// Number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Remove `v` and all its incident edges from the graph; used by the
    /// simplify step of graph coloring.
    pub fn remove_node(&mut self, v: VarRef) {
        if let Some(neighbors) = self.adjacency.remove(&v) {
            for n in neighbors {
                if let Some(set) = self.adjacency.get_mut(&n) {
                    set.remove(&v);
                }
            }
        }
    }

    /// Merge `from` into `to`: every neighbor of `from` becomes a neighbor
    /// of `to`, and `from` is removed. Used when a `mov to, from` copy is
    /// coalesced.
    pub fn merge(&mut self, to: VarRef, from: VarRef) {
        let neighbors = self.adjacency.remove(&from).unwrap_or_default();
        for n in neighbors {
            if let Some(set) = self.adjacency.get_mut(&n) {
                set.remove(&from);
            }
            self.add_edge(to, n);
        }
    }
}
