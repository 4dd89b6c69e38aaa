//! Copy coalescing: eliminate `mov d, s` where `d` and `s` can safely share
//! a single variable, before the interference graph goes to the colorer.
//!
//! A copy is coalescable when its destination and source are distinct,
//! non-interfering, and neither is pre-colored (coalescing two different
//! fixed variables would silently merge two unrelated ABI slots). A
//! self-copy `mov v, v` is always safe to delete outright, with no renaming
//! needed.

use crate::ir::{Function, VarRef};
use crate::regalloc::interference::InterferenceGraph;

/// Coalesce copies in `func` against `graph`, mutating both until no more
/// copies qualify. Returns the number of copies eliminated.
pub fn coalesce(func: &mut Function, graph: &mut InterferenceGraph) -> usize {
    let mut eliminated = 0;
    loop {
        let mut progressed = false;
        let mut i = 0;
        while i < func.body.len() {
            let copy = func.body[i].as_copy();
            let action = match copy {
                Some((d, s)) if d == s => Some(None),
                Some((d, s)) if can_coalesce(graph, d, s) => Some(Some((d, s))),
                _ => None,
            };
            match action {
                Some(None) => {
                    func.body.remove(i);
                    eliminated += 1;
                    progressed = true;
                }
                Some(Some((dest, src))) => {
                    rename(func, src, dest);
                    func.body.remove(i);
                    graph.merge(dest, src);
                    eliminated += 1;
                    progressed = true;
                }
                None => i += 1,
            }
        }
        if !progressed {
            break;
        }
    }
    eliminated
}

fn can_coalesce(graph: &InterferenceGraph, d: VarRef, s: VarRef) -> bool {
    d != s && !d.is_fixed() && !s.is_fixed() && !graph.interferes(d, s)
}

fn rename(func: &mut Function, from: VarRef, to: VarRef) {
    for inst in &mut func.body {
        for op in &mut inst.operands {
            rename_operand(op, from, to);
        }
    }
}

fn rename_operand(op: &mut crate::ir::Operand, from: VarRef, to: VarRef) {
    use crate::ir::Operand;
    match op {
        Operand::Var(v) if *v == from => *v = to,
        Operand::Address { base, .. } => rename_operand(base, from, to),
        Operand::List(items) => {
            for item in items {
                rename_operand(item, from, to);
            }
        }
        _ => {}
    }
}
