//! The full middle-end pipeline: `BUILD_IR → SPLIT → CFG → DOMINANCE →
//! LIVENESS → SSA_BUILD → SSA_LOWER → COALESCE → IGRAPH → COLOR`, with a
//! spill-and-retry loop closing the cycle back to `LIVENESS` whenever
//! `COLOR` fails.
//!
//! SSA form here exists only to split interfering live ranges apart before
//! coalescing runs: it's built, immediately lowered back to ordinary copies
//! at block boundaries, and then coalescing removes whichever of those
//! copies turn out to be redundant once the split has happened. This is why
//! the interference graph is built *after* `SSA_LOWER`, not before
//! `SSA_BUILD` — see [`crate::regalloc::interference`].

use std::collections::{HashMap, HashSet};

use log::{debug, info, warn};

use crate::dominator_tree::DominatorTree;
use crate::error::{MidendError, MidendResult};
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Function, Operand, PhysReg, VarRef};
use crate::regalloc::{self, ColorResult};
use crate::ssa;

/// Number of spill-and-retry iterations allowed before giving up on a
/// function. Each iteration can only shrink the live set that still needs
/// registers (every spill removes at least one node from every future
/// interference graph), so in practice this bound is never approached; it
/// exists purely to turn a latent bug in the heuristic into a diagnosable
/// error instead of an infinite loop.
const MAX_SPILL_ITERATIONS: u32 = 8;

/// Run the full pipeline on `func`, turning its virtual-register body into
/// one using only physical registers (and, for spilled values, stack
/// traffic). `func` is mutated in place.
pub fn compile_function(func: &mut Function) -> MidendResult<()> {
    func.validate()?;
    info!("compiling function `{}`", func.name);

    let cfg = ControlFlowGraph::compute(func);
    let dom = DominatorTree::compute(&cfg);
    let (cfg, dom) = if drop_unreachable_blocks(func, &cfg, &dom) {
        let cfg = ControlFlowGraph::compute(func);
        let dom = DominatorTree::compute(&cfg);
        (cfg, dom)
    } else {
        (cfg, dom)
    };

    let pre_ssa_liveness = regalloc::Liveness::compute(func, &cfg);
    let live_in: HashMap<_, _> = cfg.blocks().map(|b| (b, pre_ssa_liveness.live_in(b).clone())).collect();

    ssa::build_ssa(func, &cfg, &dom, &live_in);
    let cfg = ControlFlowGraph::compute(func);
    ssa::lower_phis(func, &cfg);

    let mut iteration = 0u32;
    loop {
        let cfg = ControlFlowGraph::compute(func);
        let liveness = regalloc::Liveness::compute(func, &cfg);
        let mut graph = regalloc::InterferenceGraph::build(func, &liveness);

        let coalesced = regalloc::coalesce(func, &mut graph);
        debug!("{}: coalesced {} copies (pass {})", func.name, coalesced, iteration);

        let counts = regalloc::use_counts(func);
        match regalloc::color(&graph, &counts) {
            ColorResult::Colored(colors) => {
                substitute(func, &colors)?;
                info!("{}: colored after {} spill iterations", func.name, iteration);
                return Ok(());
            }
            ColorResult::Spill(victims) => {
                if iteration >= MAX_SPILL_ITERATIONS {
                    return Err(MidendError::NonColorable {
                        function: func.name.clone(),
                        iterations: iteration,
                    });
                }
                debug!("{}: spilling {} variables (pass {})", func.name, victims.len(), iteration);
                regalloc::rewrite_spills(func, &victims);
                iteration += 1;
            }
        }
    }
}

/// Drop blocks unreachable from the entry block per the dominance-failure
/// diagnostic policy: a block with no path from `func_def` is dead code the
/// front end should not have produced, but rather than aborting compilation
/// over it, it's removed and logged. Returns `true` if anything was dropped.
fn drop_unreachable_blocks(func: &mut Function, cfg: &ControlFlowGraph, dom: &DominatorTree) -> bool {
    let reachable: HashSet<_> = dom.preorder().into_iter().collect();
    let mut unreachable: Vec<_> = cfg.blocks().filter(|b| !reachable.contains(b)).collect();
    if unreachable.is_empty() {
        return false;
    }
    unreachable.sort_by_key(|&b| std::cmp::Reverse(cfg.instruction_range(b).0));
    for b in unreachable {
        let (start, end) = cfg.instruction_range(b);
        warn!("{}: dropping block at [{}, {}), unreachable from the entry", func.name, start, end);
        func.body.drain(start..end);
    }
    true
}

fn substitute(func: &mut Function, colors: &HashMap<VarRef, u8>) -> MidendResult<()> {
    let name = func.name.clone();
    for inst in &mut func.body {
        for op in &mut inst.operands {
            substitute_operand(op, colors, &name)?;
        }
    }
    Ok(())
}

fn substitute_operand(op: &mut Operand, colors: &HashMap<VarRef, u8>, name: &str) -> MidendResult<()> {
    match op {
        Operand::Var(v) => {
            let color = colors.get(v).copied().ok_or_else(|| MidendError::MissingFixedColor {
                function: name.to_string(),
                var: missing_var_hint(*v),
            })?;
            *op = Operand::Phys(PhysReg::R(color));
        }
        Operand::Address { base, .. } => substitute_operand(base, colors, name)?,
        Operand::List(items) => {
            for item in items {
                substitute_operand(item, colors, name)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// `MidendError::MissingFixedColor` wants a `Var` to report; free and spill
/// variables carry one directly, and a fixed variable missing its color is
/// itself a coloring bug, so any stand-in index is only ever seen if that
/// bug exists.
fn missing_var_hint(v: VarRef) -> crate::ir::entities::Var {
    use cranelift_entity::EntityRef;
    match v {
        VarRef::Free(id, _) | VarRef::Spill(id) => id,
        VarRef::Fixed(n, _) => crate::ir::entities::Var::new(n as usize),
    }
}
