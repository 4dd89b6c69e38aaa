//! Chaitin-style graph coloring: recursive simplify/select over the
//! interference graph, with a spill-cost heuristic for picking victims when
//! no node can be simplified, and the spill rewrite that turns a victim
//! into stack traffic for the next attempt.

use std::collections::{HashMap, HashSet};

use cranelift_entity::EntityRef;

use crate::ir::entities::Var;
use crate::ir::{Function, Instruction, Opcode, Operand, PhysReg, VarFilter, VarRef};
use crate::regalloc::interference::InterferenceGraph;
use crate::regalloc::register_set::RegisterSet;

/// The outcome of one coloring attempt.
pub enum ColorResult {
    /// Every node received a color; `REGF<n>` nodes are always colored
    /// `r<n>`.
    Colored(HashMap<VarRef, u8>),
    /// No coloring was found; these are the chosen spill victims, in the
    /// order they should be rewritten.
    Spill(Vec<VarRef>),
}

/// Attempt to color `graph`. `use_counts` gives each variable's number of
/// appearances in the function, the numerator of the spill-cost heuristic.
pub fn color(graph: &InterferenceGraph, use_counts: &HashMap<VarRef, u32>) -> ColorResult {
    let k = RegisterSet::full().iter().count();
    let mut working = graph.clone();
    let mut stack: Vec<VarRef> = Vec::new();
    let mut spilled: HashSet<VarRef> = HashSet::new();

    loop {
        let simplifiable = working
            .nodes()
            .filter(|v| !v.is_fixed())
            .find(|&v| working.degree(v) < k);

        if let Some(v) = simplifiable {
            stack.push(v);
            working.remove_node(v);
            continue;
        }

        let mut candidates: Vec<VarRef> =
            working.nodes().filter(|v| !v.is_fixed() && !v.is_spill()).collect();
        if candidates.is_empty() {
            // Only fixed and/or spill-temp nodes remain; spill temps are
            // never re-spilled within the same pass, so push them through
            // simplify regardless of degree and let select cope.
            candidates = working.nodes().filter(|v| !v.is_fixed()).collect();
            if candidates.is_empty() {
                break;
            }
        }

        let victim = candidates
            .into_iter()
            .min_by(|&a, &b| {
                spill_cost(&working, use_counts, a)
                    .partial_cmp(&spill_cost(&working, use_counts, b))
                    .expect("spill costs are always finite")
            })
            .expect("candidates is non-empty");

        spilled.insert(victim);
        stack.push(victim);
        working.remove_node(victim);
    }

    let mut colors: HashMap<VarRef, u8> = HashMap::new();
    for v in graph.nodes() {
        if let VarRef::Fixed(n, _) = v {
            colors.insert(v, n);
        }
    }

    let mut failed = Vec::new();
    while let Some(v) = stack.pop() {
        let used: HashSet<u8> = graph.neighbors(v).iter().filter_map(|n| colors.get(n).copied()).collect();
        let mut available = RegisterSet::full();
        for u in used {
            if RegisterSet::in_palette(u) {
                available.remove(u);
            }
        }
        match available.first() {
            Some(r) => {
                colors.insert(v, r);
            }
            None => failed.push(v),
        }
    }

    if failed.is_empty() {
        ColorResult::Colored(colors)
    } else {
        ColorResult::Spill(failed)
    }
}

fn spill_cost(graph: &InterferenceGraph, use_counts: &HashMap<VarRef, u32>, v: VarRef) -> f64 {
    let base = *use_counts.get(&v).unwrap_or(&1) as f64;
    let degree = graph.degree(v) as f64;
    base / (degree + 0.5)
}

/// Count how many times each variable appears (as a read or a write)
/// across `func`'s body; the numerator the spill-cost heuristic scales by
/// degree.
pub fn use_counts(func: &Function) -> HashMap<VarRef, u32> {
    let mut counts = HashMap::new();
    for inst in &func.body {
        for v in inst.reads(VarFilter::IncludeFixed).into_iter().chain(inst.writes(VarFilter::IncludeFixed)) {
            *counts.entry(v).or_insert(0) += 1;
        }
    }
    counts
}

/// Rewrite `victims` out of `func`'s register file and onto the stack:
/// reserve `4 * victims.len() + 4` bytes below the current stack pointer,
/// then replace every read of a victim with a fresh spill temp reloaded
/// immediately before its use, and every write with a fresh spill temp
/// stored immediately after its definition.
///
/// Each occurrence gets its own temporary rather than one shared per
/// victim, so the temporaries introduced here have trivially short live
/// ranges and are never themselves chosen as spill victims by the colorer
/// that runs next.
pub fn rewrite_spills(func: &mut Function, victims: &[VarRef]) -> u32 {
    if victims.is_empty() {
        return 0;
    }
    let stack_bytes = 4 * victims.len() as u32 + 4;
    let victim_offset: HashMap<VarRef, i32> = victims
        .iter()
        .enumerate()
        .map(|(i, &v)| (v, 4 * (i as i32 + 1)))
        .collect();

    let mut next_id = next_var_id(func);
    let mut out = Vec::with_capacity(func.body.len() + 1);

    let prologue_end = func.body.iter().position(|i| i.opcode != Opcode::FuncDef).unwrap_or(1);
    out.extend(func.body.drain(0..prologue_end));
    out.push(Instruction::new(
        Opcode::Sub,
        vec![
            Operand::Phys(PhysReg::Sp),
            Operand::Phys(PhysReg::Sp),
            Operand::Immediate(stack_bytes as i64),
        ],
    ));

    for mut inst in func.body.drain(..) {
        let reads: HashSet<VarRef> = inst.reads(VarFilter::IncludeFixed).into_iter().collect();
        let writes: HashSet<VarRef> = inst.writes(VarFilter::IncludeFixed).into_iter().collect();

        let mut reloads = Vec::new();
        let mut spills = Vec::new();

        // A variable read and written by the same instruction (the
        // 2-operand arithmetic form `op d, s` where `d` is both) occupies
        // a single operand slot, so it gets exactly one temp surrounded by
        // both a reload and a spill, not two independent temps.
        let both: Vec<VarRef> = reads.intersection(&writes).copied().collect();
        let read_only: Vec<VarRef> = reads.difference(&writes).copied().collect();
        let write_only: Vec<VarRef> = writes.difference(&reads).copied().collect();

        for v in both {
            if let Some(&offset) = victim_offset.get(&v) {
                let temp = VarRef::Spill(Var::new(next_id as usize));
                next_id += 1;
                replace_occurrence(&mut inst, v, temp);
                reloads.push(Instruction::new(Opcode::Ldr, vec![Operand::Var(temp), stack_address(offset)]));
                spills.push(Instruction::new(Opcode::Str, vec![Operand::Var(temp), stack_address(offset)]));
            }
        }
        for v in read_only {
            if let Some(&offset) = victim_offset.get(&v) {
                let temp = VarRef::Spill(Var::new(next_id as usize));
                next_id += 1;
                replace_occurrence(&mut inst, v, temp);
                reloads.push(Instruction::new(Opcode::Ldr, vec![Operand::Var(temp), stack_address(offset)]));
            }
        }
        for v in write_only {
            if let Some(&offset) = victim_offset.get(&v) {
                let temp = VarRef::Spill(Var::new(next_id as usize));
                next_id += 1;
                replace_occurrence(&mut inst, v, temp);
                spills.push(Instruction::new(Opcode::Str, vec![Operand::Var(temp), stack_address(offset)]));
            }
        }

        out.extend(reloads);
        out.push(inst);
        out.extend(spills);
    }

    func.body = out;
    stack_bytes
}

fn stack_address(offset: i32) -> Operand {
    Operand::Address { base: Box::new(Operand::Phys(PhysReg::Sp)), offset, shift: None }
}

fn replace_occurrence(inst: &mut Instruction, from: VarRef, to: VarRef) {
    for op in &mut inst.operands {
        replace_operand(op, from, to);
    }
}

fn replace_operand(op: &mut Operand, from: VarRef, to: VarRef) {
    match op {
        Operand::Var(v) if *v == from => *v = to,
        Operand::Address { base, .. } => replace_operand(base, from, to),
        Operand::List(items) => {
            for item in items {
                replace_operand(item, from, to);
            }
        }
        _ => {}
    }
}

fn next_var_id(func: &Function) -> u32 {
    let mut max = 0u32;
    for inst in &func.body {
        for op in &inst.operands {
            collect_max_id(op, &mut max);
        }
    }
    max + 1
}

fn collect_max_id(op: &Operand, max: &mut u32) {
    match op {
        Operand::Var(VarRef::Free(v, _)) | Operand::Var(VarRef::Spill(v)) => {
            *max = (*max).max(v.index() as u32);
        }
        Operand::Address { base, .. } => collect_max_id(base, max),
        Operand::List(items) => {
            for item in items {
                collect_max_id(item, max);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flowgraph::ControlFlowGraph;
    use crate::ir::entities::Var;
    use crate::ir::Signature;
    use crate::regalloc::liveness::Liveness;

    fn sig(n: usize) -> Signature {
        Signature { param_count: n, returns_value: true }
    }

    fn free(n: u32) -> VarRef {
        VarRef::Free(Var::new(n as usize), 0)
    }

    #[test]
    fn two_non_interfering_vars_share_no_conflict_and_both_color() {
        let f = Function::new(
            "f",
            sig(0),
            vec![
                Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("f".into())]),
                Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(0)), Operand::Immediate(1)]),
                Instruction::new(Opcode::FuncRet, vec![Operand::free(Var::new(0))]),
            ],
        );
        let cfg = ControlFlowGraph::compute(&f);
        let liveness = Liveness::compute(&f, &cfg);
        let graph = InterferenceGraph::build(&f, &liveness);
        let counts = use_counts(&f);
        match color(&graph, &counts) {
            ColorResult::Colored(colors) => assert!(RegisterSet::in_palette(colors[&free(0)])),
            ColorResult::Spill(_) => panic!("expected a successful coloring"),
        }
    }

    #[test]
    fn fixed_variable_keeps_its_forced_color() {
        let f = Function::new(
            "f",
            sig(1),
            vec![
                Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("f".into()), Operand::fixed(0)]),
                Instruction::new(Opcode::FuncRet, vec![Operand::fixed(0)]),
            ],
        );
        let cfg = ControlFlowGraph::compute(&f);
        let liveness = Liveness::compute(&f, &cfg);
        let graph = InterferenceGraph::build(&f, &liveness);
        let counts = use_counts(&f);
        match color(&graph, &counts) {
            ColorResult::Colored(colors) => assert_eq!(colors[&VarRef::Fixed(0, 0)], 0),
            ColorResult::Spill(_) => panic!("expected a successful coloring"),
        }
    }

    #[test]
    fn sixteen_live_vars_force_spills_under_nine_color_palette() {
        // 16 vars all written before a single instruction reads all of
        // them, forcing them all to be simultaneously live.
        let mut body = vec![Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("f".into())])];
        for i in 0..16u32 {
            body.push(Instruction::new(
                Opcode::Mov,
                vec![Operand::free(Var::new(i as usize)), Operand::Immediate(i as i64)],
            ));
        }
        let mut sum_operands = vec![Operand::free(Var::new(0))];
        for i in 1..16u32 {
            sum_operands.push(Operand::List(vec![Operand::free(Var::new(i as usize))]));
        }
        // force interference the straightforward way: a push of all 16
        // keeps every one of them live simultaneously.
        body.push(Instruction::new(
            Opcode::Push,
            vec![Operand::List((0..16u32).map(|i| Operand::free(Var::new(i as usize))).collect())],
        ));
        body.push(Instruction::new(Opcode::FuncRet, vec![Operand::free(Var::new(0))]));

        let f = Function::new("f", sig(0), body);
        let cfg = ControlFlowGraph::compute(&f);
        let liveness = Liveness::compute(&f, &cfg);
        let graph = InterferenceGraph::build(&f, &liveness);
        let counts = use_counts(&f);
        match color(&graph, &counts) {
            ColorResult::Colored(_) => panic!("16 simultaneously live vars cannot fit a 9-register palette"),
            ColorResult::Spill(victims) => assert!(victims.len() >= 16 - 9),
        }
    }

    #[test]
    fn rewrite_spills_reserves_stack_and_surrounds_uses() {
        let mut f = Function::new(
            "f",
            sig(0),
            vec![
                Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("f".into())]),
                Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(0)), Operand::Immediate(1)]),
                Instruction::new(
                    Opcode::Add,
                    vec![Operand::free(Var::new(1)), Operand::free(Var::new(0)), Operand::Immediate(1)],
                ),
                Instruction::new(Opcode::FuncRet, vec![Operand::free(Var::new(1))]),
            ],
        );
        let victim = free(0);
        let bytes = rewrite_spills(&mut f, &[victim]);
        assert_eq!(bytes, 8);
        assert_eq!(f.body[1].opcode, Opcode::Sub);
        // the def of REG0 is now followed by a str, and its use in `add`
        // is now preceded by a ldr.
        assert!(f.body.iter().any(|i| i.opcode == Opcode::Str));
        assert!(f.body.iter().any(|i| i.opcode == Opcode::Ldr));
        assert!(!f.body.iter().any(|i| i.reads(VarFilter::IncludeFixed).contains(&victim)
            || i.writes(VarFilter::IncludeFixed).contains(&victim)));
    }
}
