//! SSA construction and deconstruction: φ-insertion restricted to variables
//! live across a block boundary, dominator-tree-walk renaming, and
//! φ-lowering back to ordinary copies.
//!
//! Renaming walks the dominator tree with an explicit stack rather than
//! recursion (see [`crate::dominator_tree::DominatorTree::preorder`]) so a
//! function with a long linear chain of blocks doesn't recurse as deep as
//! it is long.

use std::collections::{HashMap, HashSet};

use cranelift_entity::EntityRef;
use smallvec::SmallVec;

use crate::dominator_tree::DominatorTree;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::entities::Var;
use crate::ir::{Block, Function, Instruction, Opcode, Operand, VarFilter, VarRef};

/// A variable identity with its SSA version stripped off: the thing
/// renaming tracks a stack and counter for.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
enum Origin {
    Free(Var),
    Fixed(u8),
}

fn origin_of(v: VarRef) -> Option<Origin> {
    match v {
        VarRef::Free(id, _) => Some(Origin::Free(id)),
        VarRef::Fixed(n, _) => Some(Origin::Fixed(n)),
        VarRef::Spill(_) => None,
    }
}

fn with_origin_version(origin: Origin, version: u32) -> VarRef {
    match origin {
        Origin::Free(id) => VarRef::Free(id, version),
        Origin::Fixed(n) => VarRef::Fixed(n, version),
    }
}

/// Build SSA form for `func`: insert φ-functions at the dominance frontier
/// of every definition of every variable live across a block boundary, then
/// rename every definition and use to a distinct SSA version.
///
/// `cfg` and `dom` describe `func` as it stands *before* this call; `func`
/// is mutated in place, and the caller must recompute both before running
/// any further block- or dominance-sensitive pass.
pub fn build_ssa(
    func: &mut Function,
    cfg: &ControlFlowGraph,
    dom: &DominatorTree,
    live_in: &HashMap<Block, HashSet<VarRef>>,
) {
    expand_read_write_forms(func);
    let plan = place_phis(func, cfg, dom, live_in);
    insert_phis(func, cfg, &plan);

    let cfg = ControlFlowGraph::compute(func);
    rename(func, &cfg, dom);
}

/// A 2-operand arithmetic instruction `op d, s` both reads and writes `d`
/// through the same operand slot; SSA requires the pre- and post-states to
/// be distinct values, so this expands every such instruction into the
/// 3-operand form `op d, d, s` before renaming ever runs. The two `d`
/// operands then get versioned independently, as an ordinary use and def.
fn expand_read_write_forms(func: &mut Function) {
    for inst in &mut func.body {
        let is_rmw_arith = matches!(inst.opcode, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Sdiv)
            && inst.operands.len() == 2;
        if !is_rmw_arith {
            continue;
        }
        if let Operand::Var(_) = &inst.operands[0] {
            let dest = inst.operands[0].clone();
            let src = inst.operands[1].clone();
            inst.operands = vec![dest.clone(), dest, src];
        }
    }
}

fn def_sites(func: &Function, cfg: &ControlFlowGraph) -> HashMap<Origin, HashSet<Block>> {
    let mut sites: HashMap<Origin, HashSet<Block>> = HashMap::new();
    for b in cfg.blocks() {
        let (start, end) = cfg.instruction_range(b);
        for inst in &func.body[start..end] {
            for w in inst.writes(VarFilter::IncludeFixed) {
                if let Some(origin) = origin_of(w) {
                    sites.entry(origin).or_insert_with(HashSet::new).insert(b);
                }
            }
        }
    }
    sites
}

/// For every block that needs one, the set of origins needing a φ there.
fn place_phis(
    func: &Function,
    cfg: &ControlFlowGraph,
    dom: &DominatorTree,
    live_in: &HashMap<Block, HashSet<VarRef>>,
) -> HashMap<Block, Vec<Origin>> {
    let sites = def_sites(func, cfg);
    let mut has_phi: HashSet<(Block, Origin)> = HashSet::new();
    let mut result: HashMap<Block, Vec<Origin>> = HashMap::new();

    for (&origin, def_blocks) in &sites {
        let mut worklist: Vec<Block> = def_blocks.iter().copied().collect();
        let mut queued: HashSet<Block> = worklist.iter().copied().collect();
        while let Some(b) = worklist.pop() {
            queued.remove(&b);
            for &d in dom.frontier(b) {
                if has_phi.insert((d, origin)) {
                    result.entry(d).or_insert_with(Vec::new).push(origin);
                    if !def_blocks.contains(&d) && queued.insert(d) {
                        worklist.push(d);
                    }
                }
            }
        }
    }

    // A phi at `d` for `origin` is only useful if the value is actually
    // live across the `d` block boundary; drop the rest.
    result.retain(|&b, origins| {
        let live = live_in.get(&b);
        origins.retain(|&origin| {
            live.map_or(false, |set| set.iter().any(|v| origin_of(*v) == Some(origin)))
        });
        !origins.is_empty()
    });

    result
}

fn insert_phis(func: &mut Function, cfg: &ControlFlowGraph, plan: &HashMap<Block, Vec<Origin>>) {
    // Insert from the last block to the first so earlier insertions don't
    // invalidate the instruction indices of blocks not yet processed.
    let mut blocks: Vec<Block> = plan.keys().copied().collect();
    blocks.sort_by_key(|b| std::cmp::Reverse(cfg.instruction_range(*b).0));

    for b in blocks {
        let origins = &plan[&b];
        let (start, _) = cfg.instruction_range(b);
        let pred_count = cfg.preds(b).len();
        let insert_at = if func.body.get(start).map(|i| i.opcode) == Some(Opcode::Label) {
            start + 1
        } else {
            start
        };
        for (offset, &origin) in origins.iter().enumerate() {
            let dest = Operand::Var(with_origin_version(origin, 0));
            let args = Operand::List(vec![Operand::Var(with_origin_version(origin, 0)); pred_count]);
            func.body.insert(insert_at + offset, Instruction::new(Opcode::Phi, vec![dest, args]));
        }
    }
}

fn rename(func: &mut Function, cfg: &ControlFlowGraph, dom: &DominatorTree) {
    let mut stacks: HashMap<Origin, Vec<u32>> = HashMap::new();
    let mut counters: HashMap<Origin, u32> = HashMap::new();

    enum Frame {
        Enter(Block),
        Exit(Vec<Origin>),
    }

    let mut stack = vec![Frame::Enter(dom.entry())];
    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(b) => {
                let pushed = rename_block_body(func, cfg, b, &mut stacks, &mut counters);
                fill_successor_phi_args(func, cfg, b, &stacks);
                stack.push(Frame::Exit(pushed));
                for &child in dom.children(b).iter().rev() {
                    stack.push(Frame::Enter(child));
                }
            }
            Frame::Exit(pushed) => {
                for origin in pushed {
                    stacks.get_mut(&origin).map(|s| s.pop());
                }
            }
        }
    }
}

fn rename_block_body(
    func: &mut Function,
    cfg: &ControlFlowGraph,
    b: Block,
    stacks: &mut HashMap<Origin, Vec<u32>>,
    counters: &mut HashMap<Origin, u32>,
) -> Vec<Origin> {
    let mut pushed = Vec::new();
    let (start, end) = cfg.instruction_range(b);
    for idx in start..end {
        if func.body[idx].opcode == Opcode::Phi {
            mint_writes(&mut func.body[idx], stacks, counters, &mut pushed);
            continue;
        }
        rename_reads(&mut func.body[idx], stacks);
        mint_writes(&mut func.body[idx], stacks, counters, &mut pushed);
    }
    pushed
}

fn fill_successor_phi_args(
    func: &mut Function,
    cfg: &ControlFlowGraph,
    b: Block,
    stacks: &HashMap<Origin, Vec<u32>>,
) {
    for &succ in cfg.succs(b) {
        let preds = cfg.preds(succ);
        let pred_index = match preds.iter().position(|&p| p == b) {
            Some(i) => i,
            None => continue,
        };
        let (start, end) = cfg.instruction_range(succ);
        for idx in start..end {
            let inst = &mut func.body[idx];
            if inst.opcode != Opcode::Phi {
                break;
            }
            if let Some(Operand::List(args)) = inst.operands.get_mut(1) {
                if let Some(Operand::Var(slot)) = args.get_mut(pred_index) {
                    if let Some(origin) = origin_of(*slot) {
                        if let Some(top) = stacks.get(&origin).and_then(|s| s.last()) {
                            *slot = with_origin_version(origin, *top);
                        }
                    }
                }
            }
        }
    }
}

fn rename_reads(inst: &mut Instruction, stacks: &HashMap<Origin, Vec<u32>>) {
    let lookup = |v: VarRef| -> VarRef {
        match origin_of(v) {
            Some(origin) => match stacks.get(&origin).and_then(|s| s.last()) {
                Some(&version) => with_origin_version(origin, version),
                None => v,
            },
            None => v,
        }
    };
    match inst.opcode {
        Opcode::Cmp | Opcode::Push | Opcode::B | Opcode::Bl | Opcode::BCond(_) | Opcode::Bx | Opcode::FuncRet => {
            for op in &mut inst.operands {
                rename_all(op, &lookup);
            }
        }
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Sdiv => {
            // After expansion, always 3-operand: operand 0 is the dest,
            // not read; 1 and 2 are the true sources.
            if inst.operands.len() == 3 {
                rename_all(&mut inst.operands[1], &lookup);
                rename_all(&mut inst.operands[2], &lookup);
            }
        }
        Opcode::Mov => {
            if let Some(src) = inst.operands.get_mut(1) {
                rename_all(src, &lookup);
            }
        }
        Opcode::Str | Opcode::MemStore => {
            for op in &mut inst.operands {
                rename_all(op, &lookup);
            }
        }
        Opcode::Ldr | Opcode::MemLoad => {
            if let Some(addr) = inst.operands.get_mut(1) {
                rename_all(addr, &lookup);
            }
        }
        Opcode::FuncCall => {
            if let Some(args) = inst.operands.get_mut(1) {
                rename_all(args, &lookup);
            }
        }
        Opcode::StackAlloc => {
            if let Some(size) = inst.operands.get_mut(1) {
                rename_all(size, &lookup);
            }
        }
        Opcode::Phi | Opcode::Pop | Opcode::FuncDef | Opcode::Label => {}
    }
}

fn mint_writes(
    inst: &mut Instruction,
    stacks: &mut HashMap<Origin, Vec<u32>>,
    counters: &mut HashMap<Origin, u32>,
    pushed: &mut Vec<Origin>,
) {
    let mut mint = |op: &mut Operand| {
        if let Operand::Var(v) = op {
            if let Some(origin) = origin_of(*v) {
                let next = counters.entry(origin).or_insert(0);
                *next += 1;
                let version = *next;
                stacks.entry(origin).or_insert_with(Vec::new).push(version);
                pushed.push(origin);
                *v = with_origin_version(origin, version);
            }
        }
    };
    match inst.opcode {
        Opcode::Cmp | Opcode::Push | Opcode::B | Opcode::Bl | Opcode::BCond(_) | Opcode::Bx | Opcode::FuncRet
        | Opcode::Str | Opcode::MemStore | Opcode::Label => {}
        Opcode::Pop => {
            if let Some(Operand::List(items)) = inst.operands.get_mut(0) {
                for item in items {
                    mint(item);
                }
            }
        }
        Opcode::FuncDef => {
            for op in inst.operands.iter_mut().skip(1) {
                mint(op);
            }
        }
        Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Sdiv | Opcode::Mov | Opcode::Ldr | Opcode::MemLoad
        | Opcode::StackAlloc | Opcode::Phi => {
            if let Some(dst) = inst.operands.get_mut(0) {
                mint(dst);
            }
        }
        Opcode::FuncCall => {
            if let Some(Operand::List(items)) = inst.operands.get_mut(2) {
                for item in items {
                    mint(item);
                }
            }
        }
    }
}

fn rename_all(op: &mut Operand, lookup: &impl Fn(VarRef) -> VarRef) {
    match op {
        Operand::Var(v) => *v = lookup(*v),
        Operand::Address { base, .. } => rename_all(base, lookup),
        Operand::List(items) => {
            for item in items {
                rename_all(item, lookup);
            }
        }
        _ => {}
    }
}

/// φ-lowering: replace every `PHI d, [s0, s1, ..]` with a plain `mov d, si`
/// inserted at the tail of the i-th predecessor (before that predecessor's
/// own terminator, if it has one), then delete the `PHI`.
///
/// This is the textbook "lost copy" hazard spot: the mov is placed at the
/// predecessor's tail rather than the phi block's head so that a value
/// live across multiple predecessors never gets clobbered by another
/// phi's lowering in the same block.
///
/// The other classic hazard, the "swap" problem (two simultaneous copies
/// whose destination and source alias, needing a temporary to sequence
/// safely), cannot arise from this crate's renaming: two phis in the same
/// block always belong to distinct origins, and every minted SSA version
/// is globally unique and never reused, so a phi's destination can never
/// equal any phi argument, its own or another's. Plain sequential movs are
/// always safe.
pub fn lower_phis(func: &mut Function, cfg: &ControlFlowGraph) {
    // Most blocks end with zero or one incoming phi-copy; `SmallVec` keeps
    // the common case off the heap without giving up the rare block with
    // several simultaneous phis at a join point.
    let mut tail_copies: HashMap<Block, SmallVec<[Instruction; 4]>> = HashMap::new();
    let mut phi_positions: Vec<usize> = Vec::new();

    for b in cfg.blocks() {
        let (start, end) = cfg.instruction_range(b);
        let preds = cfg.preds(b);
        for idx in start..end {
            if func.body[idx].opcode != Opcode::Phi {
                break;
            }
            phi_positions.push(idx);
            let dest = func.body[idx].operands[0].clone();
            if let Operand::List(args) = &func.body[idx].operands[1] {
                for (pred_index, arg) in args.iter().enumerate() {
                    let pred = preds[pred_index];
                    tail_copies
                        .entry(pred)
                        .or_insert_with(SmallVec::new)
                        .push(Instruction::new(Opcode::Mov, vec![dest.clone(), arg.clone()]));
                }
            }
        }
    }

    phi_positions.sort_unstable();
    for &idx in phi_positions.iter().rev() {
        func.body.remove(idx);
    }

    // Re-resolve predecessor tails against the post-removal cfg: block
    // boundaries didn't move relative to each other since all removed
    // instructions were phis at block heads, so the original cfg's ranges
    // (minus the removed phi count per block) still locate each tail
    // correctly via a fresh recompute.
    let cfg = ControlFlowGraph::compute(func);
    let mut inserted_offset = 0isize;
    let mut preds_in_order: Vec<Block> = tail_copies.keys().copied().collect();
    preds_in_order.sort_by_key(|b| cfg.instruction_range(*b).1);
    for pred in preds_in_order {
        let copies = tail_copies.remove(&pred).unwrap();
        let (start, end) = cfg.instruction_range(pred);
        let end = (end as isize + inserted_offset) as usize;
        let start = (start as isize + inserted_offset) as usize;
        let insert_at = tail_insertion_point(func, start, end);
        let n = copies.len();
        for (i, copy) in copies.into_iter().enumerate() {
            func.body.insert(insert_at + i, copy);
        }
        inserted_offset += n as isize;
    }
}

fn tail_insertion_point(func: &Function, start: usize, end: usize) -> usize {
    if end > start && func.body[end - 1].opcode.is_terminator() {
        end - 1
    } else {
        end
    }
}
