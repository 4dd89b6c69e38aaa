//! End-to-end coverage of the universal invariants and concrete scenarios
//! the middle-end is expected to satisfy: straight-line copy chains,
//! diamond-shaped control flow forcing a phi, loops with nested
//! conditionals, register pressure forcing spills, pre-coloring under
//! pressure, and self-copy elimination.

use std::collections::HashMap;

use drakc_midend::dominator_tree::DominatorTree;
use drakc_midend::entity::EntityRef;
use drakc_midend::flowgraph::ControlFlowGraph;
use drakc_midend::ir::entities::{Cond, Var};
use drakc_midend::ir::{Function, Instruction, Opcode, Operand, Signature, VarFilter, VarRef};
use drakc_midend::regalloc::{color, ColorResult, InterferenceGraph, Liveness};
use drakc_midend::ssa;

fn sig(params: usize) -> Signature {
    Signature { param_count: params, returns_value: true }
}

fn compiles_to_only_physical_operands(f: &Function) -> bool {
    f.body.iter().all(|inst| inst.operands.iter().all(|op| !matches!(op, Operand::Var(_))))
}

/// S1 — straight-line copy chain: `REG5` is a pure copy of `REG4` and
/// should coalesce into it rather than surviving as its own register.
#[test]
fn straight_line_copy_chain_coalesces_and_compiles() {
    let mut f = Function::new(
        "main",
        sig(0),
        vec![
            Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("main".into())]),
            Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(4)), Operand::Immediate(100)]),
            Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(7)), Operand::Immediate(101)]),
            Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(5)), Operand::free(Var::new(4))]),
            Instruction::new(
                Opcode::Add,
                vec![Operand::free(Var::new(6)), Operand::free(Var::new(5)), Operand::free(Var::new(7))],
            ),
            Instruction::new(
                Opcode::Sub,
                vec![Operand::fixed(0), Operand::free(Var::new(5)), Operand::free(Var::new(6))],
            ),
            Instruction::new(Opcode::FuncRet, vec![Operand::fixed(0)]),
        ],
    );
    drakc_midend::compile_function(&mut f).expect("should compile");
    assert!(compiles_to_only_physical_operands(&f));
    // The final subtraction still targets the return slot, `r0`.
    let ret_sub = f.body.iter().rev().find(|i| i.opcode == Opcode::Sub).unwrap();
    assert_eq!(ret_sub.operands[0], Operand::Phys(drakc_midend::ir::PhysReg::R(0)));
}

/// S2 — diamond with two assignments: a phi must appear at the join block
/// before lowering, and disappear (collapsed into one coalesced register)
/// after the full pipeline runs.
#[test]
fn diamond_gets_a_phi_that_fully_resolves() {
    let diamond = |var: u32| {
        Function::new(
            "main",
            sig(0),
            vec![
                Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("main".into())]),
                Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(var)), Operand::Immediate(50)]),
                Instruction::new(Opcode::Cmp, vec![Operand::free(Var::new(var)), Operand::Immediate(3)]),
                Instruction::new(Opcode::BCond(Cond::Ne), vec![Operand::LabelRef(".L1".into())]),
                Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(var)), Operand::Immediate(0)]),
                Instruction::new(Opcode::B, vec![Operand::LabelRef(".L2".into())]),
                Instruction::new(Opcode::Label, vec![Operand::LabelDef(".L1".into())]),
                Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(var)), Operand::Immediate(1)]),
                Instruction::new(Opcode::Label, vec![Operand::LabelDef(".L2".into())]),
                Instruction::new(Opcode::Mov, vec![Operand::fixed(0), Operand::free(Var::new(var))]),
                Instruction::new(Opcode::FuncRet, vec![Operand::fixed(0)]),
            ],
        )
    };

    // Before lowering: a phi must exist at the join block.
    let mut pre = diamond(4);
    let cfg = ControlFlowGraph::compute(&pre);
    let dom = DominatorTree::compute(&cfg);
    let liveness = Liveness::compute(&pre, &cfg);
    let live_in: HashMap<_, _> = cfg.blocks().map(|b| (b, liveness.live_in(b).clone())).collect();
    ssa::build_ssa(&mut pre, &cfg, &dom, &live_in);
    assert!(pre.body.iter().any(|i| i.opcode == Opcode::Phi), "join block should gain a phi");

    // After the full pipeline: no phi remains anywhere.
    let mut post = diamond(4);
    drakc_midend::compile_function(&mut post).expect("should compile");
    assert!(!post.body.iter().any(|i| i.opcode == Opcode::Phi));
    assert!(compiles_to_only_physical_operands(&post));
}

/// S3 — loop with nested conditional: live-in at the loop header must
/// include both the accumulator and the counter, and the two interfere.
#[test]
fn loop_header_live_in_contains_both_loop_variables() {
    let acc = Var::new(4);
    let counter = Var::new(5);
    let mut f = Function::new(
        "sum_even",
        sig(0),
        vec![
            Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("sum_even".into())]),
            Instruction::new(Opcode::Mov, vec![Operand::free(acc), Operand::Immediate(0)]),
            Instruction::new(Opcode::Mov, vec![Operand::free(counter), Operand::Immediate(0)]),
            Instruction::new(Opcode::Label, vec![Operand::LabelDef(".Lhead".into())]),
            Instruction::new(Opcode::Cmp, vec![Operand::free(counter), Operand::Immediate(500)]),
            Instruction::new(Opcode::BCond(Cond::Ge), vec![Operand::LabelRef(".Lend".into())]),
            // nested conditional: only add counter into acc when it's even
            Instruction::new(Opcode::Cmp, vec![Operand::free(counter), Operand::Immediate(0)]),
            Instruction::new(Opcode::BCond(Cond::Ne), vec![Operand::LabelRef(".Lskip".into())]),
            Instruction::new(
                Opcode::Add,
                vec![Operand::free(acc), Operand::free(acc), Operand::free(counter)],
            ),
            Instruction::new(Opcode::Label, vec![Operand::LabelDef(".Lskip".into())]),
            Instruction::new(
                Opcode::Add,
                vec![Operand::free(counter), Operand::free(counter), Operand::Immediate(2)],
            ),
            Instruction::new(Opcode::B, vec![Operand::LabelRef(".Lhead".into())]),
            Instruction::new(Opcode::Label, vec![Operand::LabelDef(".Lend".into())]),
            Instruction::new(Opcode::Mov, vec![Operand::fixed(0), Operand::free(acc)]),
            Instruction::new(Opcode::FuncRet, vec![Operand::fixed(0)]),
        ],
    );

    let cfg = ControlFlowGraph::compute(&f);
    let liveness = Liveness::compute(&f, &cfg);
    let header = cfg.block_at(3).expect("loop header is a leader");
    let live_in = liveness.live_in(header);
    assert!(live_in.contains(&VarRef::Free(acc, 0)));
    assert!(live_in.contains(&VarRef::Free(counter, 0)));

    let graph = InterferenceGraph::build(&f, &liveness);
    assert!(graph.interferes(VarRef::Free(acc, 0), VarRef::Free(counter, 0)));

    drakc_midend::compile_function(&mut f).expect("should compile");
    assert!(compiles_to_only_physical_operands(&f));
}

/// S4 — 16 simultaneously-live free variables against a 9-register
/// palette forces spilling; the result must still use only palette
/// registers and reserve stack space for the spills.
#[test]
fn heavy_register_pressure_forces_spills_and_still_compiles() {
    const N: u32 = 16;
    let mut body = vec![Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("pressure".into())])];
    for i in 0..N {
        body.push(Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(i)), Operand::Immediate(i as i64)]));
    }
    // Keep every one of them live simultaneously by reading them all in one
    // instruction (a register-list operand, as `push` would use).
    let all_vars: Vec<Operand> = (0..N).map(|i| Operand::free(Var::new(i))).collect();
    body.push(Instruction::new(Opcode::Push, vec![Operand::List(all_vars)]));
    body.push(Instruction::new(Opcode::Mov, vec![Operand::fixed(0), Operand::free(Var::new(0))]));
    body.push(Instruction::new(Opcode::FuncRet, vec![Operand::fixed(0)]));

    let mut f = Function::new("pressure", sig(0), body);
    drakc_midend::compile_function(&mut f).expect("should compile despite heavy pressure");
    assert!(compiles_to_only_physical_operands(&f));
    assert!(
        f.body.iter().any(|i| i.opcode == Opcode::Sub
            && matches!(i.operands.get(0), Some(Operand::Phys(drakc_midend::ir::PhysReg::Sp)))),
        "spilling should reserve stack space with a `sub sp, sp, #n`"
    );
}

/// S5 — a pre-colored ABI variable must be colored to its fixed register
/// regardless of how entangled the rest of the graph is; an ordinary free
/// variable with many neighbors is the one that spills if anything does.
#[test]
fn pre_colored_argument_keeps_its_register_under_pressure() {
    let arg = VarRef::Fixed(0, 0);
    let busy: Vec<VarRef> = (0..12).map(|i| VarRef::Free(Var::new(i), 0)).collect();

    let mut graph = InterferenceGraph::default();
    graph.ensure_node(arg);
    for &v in &busy {
        graph.ensure_node(v);
        graph.add_edge(arg, v);
    }
    for i in 0..busy.len() {
        for j in (i + 1)..busy.len() {
            graph.add_edge(busy[i], busy[j]);
        }
    }

    let mut counts = HashMap::new();
    counts.insert(arg, 1);
    for &v in &busy {
        counts.insert(v, 1);
    }

    match color(&graph, &counts) {
        ColorResult::Colored(colors) => {
            assert_eq!(colors[&arg], 0);
        }
        ColorResult::Spill(victims) => {
            assert!(!victims.contains(&arg), "the fixed argument must never be chosen as a spill victim");
        }
    }
}

/// S6 — a self-copy surviving to the post-lowering IR is deleted outright,
/// without touching any other occurrence of the variable.
#[test]
fn self_copy_is_deleted_without_renaming_anything_else() {
    let mut f = Function::new(
        "main",
        sig(0),
        vec![
            Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("main".into())]),
            Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(4)), Operand::Immediate(9)]),
            Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(4)), Operand::free(Var::new(4))]),
            Instruction::new(Opcode::Mov, vec![Operand::fixed(0), Operand::free(Var::new(4))]),
            Instruction::new(Opcode::FuncRet, vec![Operand::fixed(0)]),
        ],
    );
    let before = f.body.len();
    drakc_midend::compile_function(&mut f).expect("should compile");
    assert!(f.body.len() < before, "the self-copy should have been removed");
    assert!(compiles_to_only_physical_operands(&f));
}

/// I1 — concatenating a function's blocks in index order reproduces the
/// original instruction stream exactly.
#[test]
fn block_partition_reconstructs_the_instruction_stream() {
    let f = loop_function();
    let cfg = ControlFlowGraph::compute(&f);
    let mut rebuilt = Vec::new();
    for b in cfg.blocks() {
        rebuilt.extend_from_slice(cfg.instructions(&f, b));
    }
    assert_eq!(rebuilt, f.body);
}

/// I2 — every successor is a valid block index and no block repeats in its
/// own successor list.
#[test]
fn cfg_successors_are_well_formed() {
    let f = loop_function();
    let cfg = ControlFlowGraph::compute(&f);
    for b in cfg.blocks() {
        let succs = cfg.succs(b);
        assert!(succs.iter().all(|&s| s.index() < cfg.block_count()));
        let mut seen = std::collections::HashSet::new();
        assert!(succs.iter().all(|&s| seen.insert(s)), "duplicate successor entry");
    }
}

/// I3 — every non-entry block's immediate dominator is in its dominator
/// set and is never the block itself.
#[test]
fn immediate_dominator_is_a_proper_member_of_the_dominator_set() {
    let f = loop_function();
    let cfg = ControlFlowGraph::compute(&f);
    let dom = DominatorTree::compute(&cfg);
    for b in cfg.blocks() {
        if b == dom.entry() {
            continue;
        }
        let idom = dom.idom(b).expect("non-entry block has an immediate dominator");
        assert_ne!(idom, b);
        assert!(dom.dominates(idom, b));
    }
}

/// I5 / I8 — before lowering every phi's arity matches its block's
/// predecessor count; after lowering no phi remains.
#[test]
fn phi_arity_matches_predecessor_count_then_phis_vanish() {
    let mut f = loop_function();
    let cfg = ControlFlowGraph::compute(&f);
    let dom = DominatorTree::compute(&cfg);
    let liveness = Liveness::compute(&f, &cfg);
    let live_in: HashMap<_, _> = cfg.blocks().map(|b| (b, liveness.live_in(b).clone())).collect();
    ssa::build_ssa(&mut f, &cfg, &dom, &live_in);

    let cfg = ControlFlowGraph::compute(&f);
    for b in cfg.blocks() {
        for inst in cfg.instructions(&f, b) {
            if inst.opcode != Opcode::Phi {
                continue;
            }
            if let Operand::List(args) = &inst.operands[1] {
                assert_eq!(args.len(), cfg.preds(b).len());
            } else {
                panic!("phi argument vector missing");
            }
        }
    }

    ssa::lower_phis(&mut f, &cfg);
    assert!(!f.body.iter().any(|i| i.opcode == Opcode::Phi));
}

/// I6 — liveness is deterministic: recomputing it on the same function and
/// CFG twice yields identical live-in sets.
#[test]
fn liveness_recomputation_is_a_fixed_point() {
    let f = loop_function();
    let cfg = ControlFlowGraph::compute(&f);
    let first = Liveness::compute(&f, &cfg);
    let second = Liveness::compute(&f, &cfg);
    for b in cfg.blocks() {
        assert_eq!(first.live_in(b), second.live_in(b));
    }
}

/// I7 — after coloring, no two interfering nodes share a color, and any
/// pre-colored node keeps its fixed register.
#[test]
fn coloring_never_assigns_the_same_color_to_interfering_nodes() {
    let f = loop_function();
    let cfg = ControlFlowGraph::compute(&f);
    let liveness = Liveness::compute(&f, &cfg);
    let graph = InterferenceGraph::build(&f, &liveness);
    let counts = drakc_midend::regalloc::use_counts(&f);
    if let ColorResult::Colored(colors) = color(&graph, &counts) {
        for a in graph.nodes() {
            for b in graph.neighbors(a) {
                assert_ne!(colors[&a], colors[&b]);
            }
            if let VarRef::Fixed(n, _) = a {
                assert_eq!(colors[&a], n);
            }
        }
    }
}

/// I4 — once renaming has run, every free-variable name (version included)
/// appears in exactly one write position, phi destinations counted.
#[test]
fn ssa_renaming_gives_every_free_variable_a_single_write_site() {
    let mut f = loop_function();
    let cfg = ControlFlowGraph::compute(&f);
    let dom = DominatorTree::compute(&cfg);
    let liveness = Liveness::compute(&f, &cfg);
    let live_in: HashMap<_, _> = cfg.blocks().map(|b| (b, liveness.live_in(b).clone())).collect();
    ssa::build_ssa(&mut f, &cfg, &dom, &live_in);

    let mut write_counts: HashMap<VarRef, u32> = HashMap::new();
    for inst in &f.body {
        for w in inst.writes(VarFilter::IncludeFixed) {
            if matches!(w, VarRef::Free(..)) {
                *write_counts.entry(w).or_insert(0) += 1;
            }
        }
    }
    assert!(!write_counts.is_empty(), "the loop body writes at least one free variable");
    assert!(
        write_counts.values().all(|&count| count == 1),
        "every free variable must have exactly one write site in SSA form: {:?}",
        write_counts
    );
}

/// I9 — running SSA construction and lowering on input that is already in
/// single-assignment form (one write per variable, no joins needing a phi)
/// is a no-op beyond the version suffixes renaming mints.
#[test]
fn ssa_round_trip_on_already_single_assignment_input_is_a_no_op() {
    let build = |a: u32, b: u32| {
        Function::new(
            "straight",
            sig(0),
            vec![
                Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("straight".into())]),
                Instruction::new(Opcode::Mov, vec![Operand::free(Var::new(a)), Operand::Immediate(1)]),
                Instruction::new(
                    Opcode::Add,
                    vec![Operand::free(Var::new(b)), Operand::free(Var::new(a)), Operand::Immediate(1)],
                ),
                Instruction::new(Opcode::FuncRet, vec![Operand::free(Var::new(b))]),
            ],
        )
    };
    let mut f = build(0, 1);
    let original_opcodes: Vec<Opcode> = f.body.iter().map(|i| i.opcode).collect();

    let cfg = ControlFlowGraph::compute(&f);
    let dom = DominatorTree::compute(&cfg);
    let liveness = Liveness::compute(&f, &cfg);
    let live_in: HashMap<_, _> = cfg.blocks().map(|b| (b, liveness.live_in(b).clone())).collect();
    ssa::build_ssa(&mut f, &cfg, &dom, &live_in);
    assert!(!f.body.iter().any(|i| i.opcode == Opcode::Phi), "a single block has no dominance frontier to phi at");

    let cfg = ControlFlowGraph::compute(&f);
    ssa::lower_phis(&mut f, &cfg);

    let renamed_opcodes: Vec<Opcode> = f.body.iter().map(|i| i.opcode).collect();
    assert_eq!(renamed_opcodes, original_opcodes, "the round trip must not add, remove, or reorder instructions");

    let mut write_counts: HashMap<VarRef, u32> = HashMap::new();
    for inst in &f.body {
        for w in inst.writes(VarFilter::IncludeFixed) {
            *write_counts.entry(w).or_insert(0) += 1;
        }
    }
    assert!(write_counts.values().all(|&count| count == 1), "single assignment must survive the round trip");
}

fn loop_function() -> Function {
    let acc = Var::new(4);
    let counter = Var::new(5);
    Function::new(
        "sum_even",
        sig(0),
        vec![
            Instruction::new(Opcode::FuncDef, vec![Operand::LabelRef("sum_even".into())]),
            Instruction::new(Opcode::Mov, vec![Operand::free(acc), Operand::Immediate(0)]),
            Instruction::new(Opcode::Mov, vec![Operand::free(counter), Operand::Immediate(0)]),
            Instruction::new(Opcode::Label, vec![Operand::LabelDef(".Lhead".into())]),
            Instruction::new(Opcode::Cmp, vec![Operand::free(counter), Operand::Immediate(500)]),
            Instruction::new(Opcode::BCond(Cond::Ge), vec![Operand::LabelRef(".Lend".into())]),
            Instruction::new(
                Opcode::Add,
                vec![Operand::free(acc), Operand::free(acc), Operand::free(counter)],
            ),
            Instruction::new(
                Opcode::Add,
                vec![Operand::free(counter), Operand::free(counter), Operand::Immediate(1)],
            ),
            Instruction::new(Opcode::B, vec![Operand::LabelRef(".Lhead".into())]),
            Instruction::new(Opcode::Label, vec![Operand::LabelDef(".Lend".into())]),
            Instruction::new(Opcode::Mov, vec![Operand::fixed(0), Operand::free(acc)]),
            Instruction::new(Opcode::FuncRet, vec![Operand::fixed(0)]),
        ],
    )
}
