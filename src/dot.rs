//! Graphviz DOT export, for the driver's inspection-only diagnostics (§6):
//! the control-flow graph annotated with live-in sets, and the interference
//! graph, optionally colored by register assignment.
//!
//! Nothing here participates in compilation; it only ever reads already
//! computed state and formats it as text.

use std::collections::HashMap;
use std::fmt::Write;

use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Function, VarRef};
use crate::regalloc::{InterferenceGraph, Liveness};

/// Render `func`'s control-flow graph as a Graphviz DOT digraph: one labeled
/// box per block holding its instructions and live-in set, with an edge to
/// each successor. Blocks with no successor (a `func_ret` or `bx`) have no
/// outgoing edge.
pub fn cfg_to_dot(func: &Function, cfg: &ControlFlowGraph, liveness: &Liveness) -> String {
    let mut out = String::new();
    writeln!(out, "digraph cfg {{").unwrap();
    writeln!(out, "  node [shape=box, fontname=monospace];").unwrap();

    for (index, block) in cfg.blocks().enumerate() {
        let mut label = format!("block{}\\l", index);
        for inst in cfg.instructions(func, block) {
            let _ = write!(label, "{}\\l", escape(&inst.to_string()));
        }
        let live_in = format_var_set(liveness.live_in(block));
        let _ = write!(label, "live-in: {}\\l", escape(&live_in));
        writeln!(out, "  \"{}\" [label=\"{}\"];", node_id(block), label).unwrap();
    }

    for block in cfg.blocks() {
        for &succ in cfg.succs(block) {
            writeln!(out, "  \"{}\" -> \"{}\";", node_id(block), node_id(succ)).unwrap();
        }
    }

    writeln!(out, "}}").unwrap();
    out
}

/// Render `graph` as a Graphviz DOT strict undirected graph. When `colors`
/// is given, each node is filled with a distinct color per register
/// assignment so clashing choices are visually obvious.
pub fn interference_to_dot(graph: &InterferenceGraph, colors: Option<&HashMap<VarRef, u8>>) -> String {
    let mut out = String::new();
    writeln!(out, "strict graph interference {{").unwrap();
    writeln!(out, "  node [fontname=monospace];").unwrap();

    let mut nodes: Vec<VarRef> = graph.nodes().collect();
    nodes.sort_by_key(|v| v.to_string());

    for v in &nodes {
        match colors.and_then(|c| c.get(v)) {
            Some(&r) => {
                writeln!(
                    out,
                    "  \"{}\" [style=filled, fillcolor=\"{}\", label=\"{} (r{})\"];",
                    v, palette_color(r), escape(&v.to_string()), r
                )
                .unwrap();
            }
            None => {
                writeln!(out, "  \"{}\";", v).unwrap();
            }
        }
    }

    let mut seen: Vec<(VarRef, VarRef)> = Vec::new();
    for &v in &nodes {
        for n in graph.neighbors(v) {
            let edge = if v.to_string() <= n.to_string() { (v, n) } else { (n, v) };
            if !seen.contains(&edge) {
                seen.push(edge);
                writeln!(out, "  \"{}\" -- \"{}\";", edge.0, edge.1).unwrap();
            }
        }
    }

    writeln!(out, "}}").unwrap();
    out
}

fn node_id(block: crate::ir::Block) -> String {
    use cranelift_entity::EntityRef;
    format!("block{}", block.index())
}

fn format_var_set(vars: &std::collections::HashSet<VarRef>) -> String {
    let mut names: Vec<String> = vars.iter().map(|v| v.to_string()).collect();
    names.sort();
    names.join(", ")
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// A small fixed palette of distinguishable fill colors, cycling by
/// register number; purely cosmetic.
fn palette_color(register: u8) -> &'static str {
    const COLORS: [&str; 9] =
        ["lightblue", "lightgreen", "lightyellow", "lightpink", "lightgray", "lightcyan", "wheat", "plum", "khaki"];
    COLORS[(register as usize) % COLORS.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::entities::Var;
    use crate::ir::{Instruction, Opcode, Operand, Signature};

    fn sig(n: usize) -> Signature {
        Signature { param_count: n, returns_value: true }
    }

    #[test]
    fn cfg_dot_contains_a_node_per_block_and_an_edge() {
        let f = Function::new(
            "f",
            sig(1),
            vec![
                Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("f".into()), Operand::fixed(0)]),
                Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(0)), Operand::fixed(0)]),
                Instruction::new(Opcode::FuncRet, vec![Operand::free(Var::new(0))]),
            ],
        );
        let cfg = ControlFlowGraph::compute(&f);
        let liveness = Liveness::compute(&f, &cfg);
        let dot = cfg_to_dot(&f, &cfg, &liveness);
        assert!(dot.starts_with("digraph cfg {"));
        assert!(dot.contains("live-in:"));
    }

    #[test]
    fn interference_dot_renders_edges_and_colors() {
        let mut graph = InterferenceGraph::default();
        let a = VarRef::Free(Var::new(0), 0);
        let b = VarRef::Free(Var::new(1), 0);
        graph.add_edge(a, b);
        let mut colors = HashMap::new();
        colors.insert(a, 4);
        colors.insert(b, 5);
        let dot = interference_to_dot(&graph, Some(&colors));
        assert!(dot.starts_with("strict graph interference {"));
        assert!(dot.contains("--"));
        assert!(dot.contains("fillcolor"));
    }
}
