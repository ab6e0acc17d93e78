//! Block linear ordering and live-interval analysis.

use std::collections::{BTreeSet, HashSet};

use vmir_entity::SecondaryMap;

use crate::builder::Module;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::instructions::InstructionData;
use crate::ir::value::LIVE_NUMBER_STEP;
use crate::ir::{BlockRef, Marker, Opcode};
use crate::loop_analysis::LoopAnalyzer;

/// Why [`LivenessAnalyzer::build`] refused to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessError {
    /// The CFG has at least one irreducible loop; linear ordering and
    /// interval calculation both assume a reducible loop nest.
    IrreducibleLoops,
}

/// The computed linear order, numbering and live intervals for one
/// function. Built against a `&mut Module` because it writes the
/// per-instruction linear/live numbers and per-value intervals directly
/// onto the arena's entities.
#[derive(Debug, Clone)]
pub struct LivenessAnalyzer {
    linear_order: Vec<BlockRef>,
}

impl LivenessAnalyzer {
    pub fn linear_order(&self) -> &[BlockRef] {
        &self.linear_order
    }

    pub fn build(
        module: &mut Module,
        cfg: &mut ControlFlowGraph,
        loops: &LoopAnalyzer,
    ) -> Result<Self, LivenessError> {
        if loops.has_irreducible_loops() {
            return Err(LivenessError::IrreducibleLoops);
        }

        let linear_order = LinearOrderBuilder::build(module, cfg, loops);
        assign_linear_and_live_numbers(module, &linear_order);
        calculate_live_ranges(module, &linear_order, loops);

        Ok(LivenessAnalyzer { linear_order })
    }
}

/// Header predecessors that are latches of its own loop don't gate
/// visitability (a loop body needs to start before its back edge runs).
fn can_be_visited(
    module: &Module,
    loops: &LoopAnalyzer,
    visited: &SecondaryMap<BlockRef, Marker>,
    block: BlockRef,
) -> bool {
    let own_loop = loops
        .loops()
        .find(|(r, l)| Some(*r) != loops.root_loop() && l.header() == block);

    match own_loop {
        Some((_, l)) => module
            .block(block)
            .predecessors()
            .iter()
            .filter(|p| !l.latches().contains(*p))
            .all(|p| visited[*p].contains(Marker::BLACK)),
        None => module
            .block(block)
            .predecessors()
            .iter()
            .all(|p| visited[*p].contains(Marker::BLACK)),
    }
}

struct LinearOrderBuilder;

impl LinearOrderBuilder {
    fn build(module: &mut Module, cfg: &ControlFlowGraph, loops: &LoopAnalyzer) -> Vec<BlockRef> {
        let mut visited: SecondaryMap<BlockRef, Marker> = SecondaryMap::new();
        let mut order: Vec<BlockRef> = Vec::new();
        if let Some(entry) = cfg.entry() {
            dispatch(module, loops, &mut visited, &mut order, entry);
        }
        order
    }
}

fn header_loop(loops: &LoopAnalyzer, block: BlockRef) -> Option<crate::ir::LoopRef> {
    loops
        .loops()
        .find(|(r, l)| Some(*r) != loops.root_loop() && l.header() == block)
        .map(|(r, _)| r)
}

fn is_inner_of(loops: &LoopAnalyzer, candidate: crate::ir::LoopRef, outer: crate::ir::LoopRef) -> bool {
    loops.get(outer).inner_loops().contains(&candidate)
}

fn mark_and_push(visited: &mut SecondaryMap<BlockRef, Marker>, order: &mut Vec<BlockRef>, b: BlockRef) {
    visited[b].insert(Marker::BLACK);
    order.push(b);
}

/// One in-progress `visit_loop` call, resumable across a "recursive" dive
/// into an inner loop without using the Rust call stack: `cursor` is how
/// far into this round's `exits` this frame has gotten, `still_pending`
/// accumulates what the next round should retry, same as the draining loop
/// that used to live directly in `visit_loop`'s body.
struct LoopFrame {
    loop_ref: crate::ir::LoopRef,
    exits: Vec<BlockRef>,
    cursor: usize,
    still_pending: Vec<BlockRef>,
    progressed: bool,
}

impl LoopFrame {
    fn new(loop_ref: crate::ir::LoopRef, exits: Vec<BlockRef>) -> Self {
        Self {
            loop_ref,
            exits,
            cursor: 0,
            still_pending: Vec::new(),
            progressed: false,
        }
    }
}

enum StepOutcome {
    Continue,
    EnterInner(crate::ir::LoopRef, BlockRef),
    Done(Vec<BlockRef>),
}

fn step_loop_frame(
    module: &mut Module,
    loops: &LoopAnalyzer,
    visited: &mut SecondaryMap<BlockRef, Marker>,
    order: &mut Vec<BlockRef>,
    frame: &mut LoopFrame,
) -> StepOutcome {
    if frame.cursor < frame.exits.len() {
        let e = frame.exits[frame.cursor];
        frame.cursor += 1;

        if visited[e].contains(Marker::BLACK) {
            return StepOutcome::Continue;
        }
        let belongs_here = loops.blocks_loop(module, e) == Some(frame.loop_ref);
        if belongs_here && can_be_visited(module, loops, visited, e) {
            walk_in_loop(module, loops, visited, order, frame.loop_ref, e, &mut frame.still_pending);
            frame.progressed = true;
        } else if let Some(inner_header_loop) = header_loop(loops, e) {
            if is_inner_of(loops, inner_header_loop, frame.loop_ref) && can_be_visited(module, loops, visited, e) {
                frame.progressed = true;
                return StepOutcome::EnterInner(inner_header_loop, e);
            } else {
                frame.still_pending.push(e);
            }
        } else {
            frame.still_pending.push(e);
        }
        StepOutcome::Continue
    } else if frame.progressed {
        frame.exits = std::mem::take(&mut frame.still_pending);
        frame.cursor = 0;
        frame.progressed = false;
        StepOutcome::Continue
    } else {
        StepOutcome::Done(std::mem::take(&mut frame.exits))
    }
}

/// Visit `block` (or, if it heads a loop, the whole loop), exactly as
/// `visit`/`visit_loop` used to, but driven by an explicit `work` stack of
/// pending blocks plus a stack of in-progress `LoopFrame`s standing in for
/// the call stack a recursive version would have used. A deeply nested loop
/// tree or a long chain of sibling loops no longer risks overflowing it.
fn dispatch(
    module: &mut Module,
    loops: &LoopAnalyzer,
    visited: &mut SecondaryMap<BlockRef, Marker>,
    order: &mut Vec<BlockRef>,
    start: BlockRef,
) {
    let mut work: Vec<BlockRef> = vec![start];
    let mut loop_frames: Vec<LoopFrame> = Vec::new();

    loop {
        if let Some(frame) = loop_frames.last_mut() {
            match step_loop_frame(module, loops, visited, order, frame) {
                StepOutcome::Continue => {}
                StepOutcome::EnterInner(inner_loop_ref, inner_header) => {
                    mark_and_push(visited, order, inner_header);
                    let mut initial_exits = Vec::new();
                    walk_in_loop(module, loops, visited, order, inner_loop_ref, inner_header, &mut initial_exits);
                    loop_frames.push(LoopFrame::new(inner_loop_ref, initial_exits));
                }
                StepOutcome::Done(leftover) => {
                    loop_frames.pop();
                    for e in leftover {
                        if !visited[e].contains(Marker::BLACK) {
                            work.push(e);
                        }
                    }
                }
            }
        } else if let Some(block) = work.pop() {
            if visited[block].contains(Marker::BLACK) {
                continue;
            }
            match header_loop(loops, block) {
                Some(loop_ref) => {
                    mark_and_push(visited, order, block);
                    let mut initial_exits = Vec::new();
                    walk_in_loop(module, loops, visited, order, loop_ref, block, &mut initial_exits);
                    loop_frames.push(LoopFrame::new(loop_ref, initial_exits));
                }
                None => {
                    mark_and_push(visited, order, block);
                    let false_s = module.block(block).false_successor();
                    let true_s = module.block(block).true_successor();
                    // Pushed bottom-to-top as [false-retry, true, false] so
                    // the work stack pops false first, then true, then
                    // retries false once more — matching visit_plain's
                    // original false/true/false-again call order, with the
                    // retry's gating re-evaluated lazily at pop time against
                    // whatever `visited` looks like once true's subtree (and
                    // everything beneath it on the stack) has drained.
                    if let Some(f) = false_s {
                        work.push(f);
                    }
                    if let Some(t) = true_s {
                        work.push(t);
                    }
                    if let Some(f) = false_s {
                        work.push(f);
                    }
                }
            }
        } else {
            break;
        }
    }
}

/// Walk the reachable same-loop successors of `start`, marking and pushing
/// each one (including `start` itself, unless the caller already marked
/// it), and record anything outside the loop into `exits` for the caller to
/// drain later. Successors are pushed onto a local stack rather than
/// visited through recursion, so a long straight-line run inside a loop
/// body can't blow the stack.
fn walk_in_loop(
    module: &mut Module,
    loops: &LoopAnalyzer,
    visited: &mut SecondaryMap<BlockRef, Marker>,
    order: &mut Vec<BlockRef>,
    loop_ref: crate::ir::LoopRef,
    start: BlockRef,
    exits: &mut Vec<BlockRef>,
) {
    let mut stack: Vec<BlockRef> = Vec::new();

    if !visited[start].contains(Marker::BLACK) {
        mark_and_push(visited, order, start);
        push_successors(module, start, &mut stack);
    }

    while let Some(block) = stack.pop() {
        if visited[block].contains(Marker::BLACK) {
            continue;
        }
        if loops.blocks_loop(module, block) == Some(loop_ref) {
            if can_be_visited(module, loops, visited, block) {
                mark_and_push(visited, order, block);
                push_successors(module, block, &mut stack);
            } else {
                exits.push(block);
            }
        } else {
            exits.push(block);
        }
    }
}

/// Pushes `block`'s true-successor then its false-successor, so the LIFO
/// stack visits the false successor first, matching the original walk's
/// false-before-true order.
fn push_successors(module: &Module, block: BlockRef, stack: &mut Vec<BlockRef>) {
    if let Some(t) = module.block(block).true_successor() {
        stack.push(t);
    }
    if let Some(f) = module.block(block).false_successor() {
        stack.push(f);
    }
}

fn assign_linear_and_live_numbers(module: &mut Module, linear_order: &[BlockRef]) {
    let mut cursor: u64 = 0;
    for &block in linear_order {
        module.block_mut(block).live_range_mut().start = cursor;
        cursor += LIVE_NUMBER_STEP;

        let mut linear_number = 0u64;
        for inst in module.block_instructions(block) {
            module.inst_mut(inst).set_linear_number(linear_number);
            linear_number += 1;

            if module.inst(inst).opcode() == Opcode::Phi {
                let block_start = module.block(block).live_range().start;
                module.inst_mut(inst).set_live_number(block_start);
            } else {
                module.inst_mut(inst).set_live_number(cursor);
                cursor += LIVE_NUMBER_STEP;
            }
        }

        module.block_mut(block).live_range_mut().end = cursor;
    }
}

fn calculate_live_ranges(module: &mut Module, linear_order: &[BlockRef], loops: &LoopAnalyzer) {
    let mut liveset: SecondaryMap<BlockRef, BTreeSet<crate::ir::ValueRef>> = SecondaryMap::new();

    for &block in linear_order.iter().rev() {
        let mut live: BTreeSet<crate::ir::ValueRef> = BTreeSet::new();
        for succ in module.block(block).successors() {
            live.extend(liveset[succ].iter().copied());
            for inst in module.block_instructions(succ) {
                if module.inst(inst).opcode() != Opcode::Phi {
                    break;
                }
                if let InstructionData::Phi { inputs, .. } = module.inst(inst).data().clone() {
                    for input in inputs {
                        if let Some(producer) = module.value(input).producer() {
                            if module.inst(producer).parent() == Some(block) {
                                live.insert(input);
                            }
                        }
                    }
                }
            }
        }

        let block_range = module.block(block).live_range();
        for &v in &live {
            module.value_mut(v).interval_mut().unite_with(block_range);
        }

        let insts = module.block_instructions(block);
        for &inst in insts.iter().rev() {
            if module.inst(inst).opcode() == Opcode::Phi {
                continue;
            }

            if let Some(out) = module.inst(inst).output() {
                let live_number = module.inst(inst).live_number();
                let interval = module.value(out).interval();
                let start = live_number;
                let end = interval.end.max(live_number + LIVE_NUMBER_STEP);
                *module.value_mut(out).interval_mut() = crate::ir::LiveInterval::new(start, end);
                live.remove(&out);
            }

            let live_number = module.inst(inst).live_number();
            for input in module.inst(inst).inputs() {
                if module.value(input).producer().is_some() || !module.value(input).has_constant() {
                    live.insert(input);
                    let block_start = module.block(block).live_range().start;
                    module
                        .value_mut(input)
                        .interval_mut()
                        .unite_with(crate::ir::LiveInterval::new(block_start, live_number));
                }
            }
        }

        for &inst in &insts {
            if module.inst(inst).opcode() == Opcode::Phi {
                if let Some(out) = module.inst(inst).output() {
                    live.remove(&out);
                }
            }
        }

        if let Some(loop_ref) = loops.blocks_loop(module, block) {
            if Some(loop_ref) != loops.root_loop() && loops.get(loop_ref).header() == block {
                let header_start = module.block(block).live_range().start;
                let mut latch_end = header_start;
                for &latch in loops.get(loop_ref).latches() {
                    latch_end = latch_end.max(module.block(latch).live_range().end);
                }
                for &v in &live {
                    module
                        .value_mut(v)
                        .interval_mut()
                        .unite_with(crate::ir::LiveInterval::new(header_start, latch_end));
                }
            }
        }

        liveset[block] = live;
    }
}

/// Every block reachable from the entry must end up numbered; used by the
/// verifier to sanity check a `LivenessAnalyzer` run.
pub fn covers_all_blocks(analyzer: &LivenessAnalyzer, cfg: &ControlFlowGraph) -> bool {
    let order: HashSet<BlockRef> = analyzer.linear_order.iter().copied().collect();
    cfg.blocks().iter().all(|b| order.contains(b))
        && order.len() == analyzer.linear_order.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueType;
    use crate::ir::ConstValue;
    use crate::loop_analysis::LoopAnalyzer;

    /// entry: x = p + p; jump next. next: y = x + p; ret y.
    /// `x` is defined in `entry` and used in `next`, so its interval must
    /// stretch from its own definition point to the point it's consumed.
    #[test]
    fn value_live_across_a_block_boundary_gets_a_spanning_interval() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let p = module.func(func).params()[0];

        let entry = module.create_block(func, "entry");
        let next = module.create_block(func, "next");

        let x = module.create_value(ValueType::U64);
        let add_in_entry = module.add(entry, p, p, x);
        module.jump(entry, next);

        let y = module.create_value(ValueType::U64);
        let add_in_next = module.add(next, x, p, y);
        module.ret(next, Some(y));

        let mut cfg = ControlFlowGraph::new(&module, func);
        cfg.build_dominator_tree(&mut module);
        let loops = LoopAnalyzer::build(&mut module, &mut cfg);

        let analyzer = LivenessAnalyzer::build(&mut module, &mut cfg, &loops).unwrap();
        assert_eq!(analyzer.linear_order(), &[entry, next]);
        assert!(covers_all_blocks(&analyzer, &cfg));

        let entry_def_number = module.inst(add_in_entry).live_number();
        let next_use_number = module.inst(add_in_next).live_number();
        let interval = module.value(x).interval();
        assert_eq!(interval.start, entry_def_number);
        assert_eq!(interval.end, next_use_number);
    }

    /// entry: x = p + p; jump header. header: beq p,p -> body, exit.
    /// body: y = x + p; jump header (latch). exit: ret.
    /// `x` is loop-invariant but read inside the loop body, so its interval
    /// must be widened to cover the whole loop, not just up to its use.
    #[test]
    fn loop_carried_value_interval_is_widened_to_cover_the_whole_loop() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::Void, &[ValueType::U64]);
        let p = module.func(func).params()[0];

        let entry = module.create_block(func, "entry");
        let header = module.create_block(func, "header");
        let body = module.create_block(func, "body");
        let exit = module.create_block(func, "exit");

        let x = module.create_value(ValueType::U64);
        let add_in_entry = module.add(entry, p, p, x);
        module.jump(entry, header);

        module.beq(header, p, p, body, exit);

        let y = module.create_value(ValueType::U64);
        module.add(body, x, p, y);
        module.jump(body, header);

        module.ret(exit, None);

        let mut cfg = ControlFlowGraph::new(&module, func);
        cfg.build_dominator_tree(&mut module);
        let loops = LoopAnalyzer::build(&mut module, &mut cfg);
        assert!(!loops.has_irreducible_loops());

        let analyzer = LivenessAnalyzer::build(&mut module, &mut cfg, &loops).unwrap();
        assert!(covers_all_blocks(&analyzer, &cfg));

        let entry_def_number = module.inst(add_in_entry).live_number();
        let body_end = module.block(body).live_range().end;
        let interval = module.value(x).interval();
        assert_eq!(interval.start, entry_def_number);
        assert_eq!(interval.end, body_end);
    }

    /// Reuses the mixed reducible/irreducible CFG also exercised in
    /// `loop_analysis`: header C's loop is irreducible, so liveness must
    /// refuse to run rather than compute a linear order over it.
    #[test]
    fn irreducible_loops_are_rejected() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::Void, &[ValueType::I32]);
        let cond = module.func(func).params()[0];

        let a = module.create_block(func, "A");
        let b = module.create_block(func, "B");
        let c = module.create_block(func, "C");
        let d = module.create_block(func, "D");
        let e = module.create_block(func, "E");
        let f = module.create_block(func, "F");
        let g = module.create_block(func, "G");
        let h = module.create_block(func, "H");
        let i = module.create_block(func, "I");

        module.jump(a, b);
        module.beq(b, cond, cond, c, e);
        module.jump(c, d);
        module.beq(e, cond, cond, d, f);
        module.jump(d, g);
        module.beq(f, cond, cond, b, h);
        module.beq(g, cond, cond, c, i);
        module.beq(h, cond, cond, g, i);
        module.ret(i, None);

        let mut cfg = ControlFlowGraph::new(&module, func);
        cfg.build_dominator_tree(&mut module);
        let loops = LoopAnalyzer::build(&mut module, &mut cfg);
        assert!(loops.has_irreducible_loops());

        let result = LivenessAnalyzer::build(&mut module, &mut cfg, &loops);
        assert_eq!(result.unwrap_err(), LivenessError::IrreducibleLoops);
    }

    /// The recursive-factorial CFG: `BB_1: beq v0,0 -> BB_3,BB_2`,
    /// `BB_2: beq v0,1 -> BB_3,BB_4`, `BB_3: ret 1`,
    /// `BB_4: v1=Sub(v0,1); v2=Call(self,v1); v3=Mul(v0,v2); ret v3`.
    /// Pins down the exact linear/live numbers and per-value intervals this
    /// shape produces, which is precisely where an unconditional-vs-`.min()`
    /// tightening bug in `calculate_live_ranges` would show up.
    #[test]
    fn liveness_numbering_on_recursive_factorial_matches_known_intervals() {
        let mut module = Module::new();
        let func = module.create_function("fact", ValueType::I32, &[ValueType::I32]);
        let bb1 = module.create_block(func, "BB_1");
        let bb2 = module.create_block(func, "BB_2");
        let bb3 = module.create_block(func, "BB_3");
        let bb4 = module.create_block(func, "BB_4");

        let zero = module.get_or_create_const(ConstValue::I32(0));
        let one = module.get_or_create_const(ConstValue::I32(1));
        let v0 = module.func(func).params()[0];
        let v1 = module.create_value(ValueType::I32);
        let v2 = module.create_value(ValueType::I32);
        let v3 = module.create_value(ValueType::I32);

        let term_bb1 = module.beq(bb1, v0, zero, bb3, bb2);
        let term_bb2 = module.beq(bb2, v0, one, bb3, bb4);
        let term_bb3 = module.ret(bb3, Some(one));

        let inst_v1 = module.sub(bb4, v0, one, v1);
        let inst_v2 = module.call(bb4, func, crate::ir::OperandList::from_slice(&[v1]), Some(v2));
        let inst_v3 = module.mul(bb4, v0, v2, v3);
        let term_bb4 = module.ret(bb4, Some(v3));

        let mut cfg = ControlFlowGraph::new(&module, func);
        cfg.build_dominator_tree(&mut module);
        let loops = LoopAnalyzer::build(&mut module, &mut cfg);
        let analyzer = LivenessAnalyzer::build(&mut module, &mut cfg, &loops).unwrap();
        assert!(covers_all_blocks(&analyzer, &cfg));

        assert_eq!(module.inst(term_bb1).linear_number(), 0);
        assert_eq!(module.inst(term_bb2).linear_number(), 1);
        assert_eq!(module.inst(inst_v1).linear_number(), 2);
        assert_eq!(module.inst(inst_v2).linear_number(), 3);
        assert_eq!(module.inst(inst_v3).linear_number(), 4);
        assert_eq!(module.inst(term_bb4).linear_number(), 5);
        assert_eq!(module.inst(term_bb3).linear_number(), 6);

        assert_eq!(module.block(bb1).live_range(), crate::ir::LiveRange::new(0, 4));
        assert_eq!(module.block(bb2).live_range(), crate::ir::LiveRange::new(4, 8));
        assert_eq!(module.block(bb4).live_range(), crate::ir::LiveRange::new(8, 18));
        assert_eq!(module.block(bb3).live_range(), crate::ir::LiveRange::new(18, 22));

        assert_eq!(module.inst(term_bb1).live_number(), 2);
        assert_eq!(module.inst(term_bb2).live_number(), 6);
        assert_eq!(module.inst(inst_v1).live_number(), 10);
        assert_eq!(module.inst(inst_v2).live_number(), 12);
        assert_eq!(module.inst(inst_v3).live_number(), 14);
        assert_eq!(module.inst(term_bb4).live_number(), 16);
        assert_eq!(module.inst(term_bb3).live_number(), 20);

        assert_eq!(module.value(v1).interval(), crate::ir::LiveInterval::new(10, 12));
        assert_eq!(module.value(v2).interval(), crate::ir::LiveInterval::new(12, 14));
        assert_eq!(module.value(v3).interval(), crate::ir::LiveInterval::new(14, 16));
    }
}
