//! Static inlining: recursively inline callees under a size threshold,
//! deep-copying the callee's graph into the caller and splicing it in.

use std::collections::HashSet;

use log::{debug, trace};

use crate::builder::Module;
use crate::ir::instructions::{InstructionData, OperandList};
use crate::ir::{BlockRef, FuncRef, InstRef, Opcode};
use crate::pass::Pass;

const NAME: &str = "Static Inlining Pass";
const DEFAULT_INLINE_INSTRUCTION_COUNT_THRESHOLD: usize = 10;

#[derive(Debug)]
pub struct StaticInliningPass {
    instruction_count_threshold: usize,
}

impl StaticInliningPass {
    pub fn new() -> Self {
        Self::with_threshold(DEFAULT_INLINE_INSTRUCTION_COUNT_THRESHOLD)
    }

    pub fn with_threshold(threshold: usize) -> Self {
        Self {
            instruction_count_threshold: threshold,
        }
    }

    pub fn instruction_count_threshold(&self) -> usize {
        self.instruction_count_threshold
    }
}

impl Default for StaticInliningPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for StaticInliningPass {
    fn name(&self) -> &str {
        NAME
    }

    fn run(&self, module: &mut Module, func: FuncRef) {
        let mut in_progress = HashSet::new();
        self.inline_callees(module, func, &mut in_progress);
    }
}

fn function_instruction_count(module: &Module, func: FuncRef) -> usize {
    module
        .func(func)
        .blocks()
        .iter()
        .map(|&b| module.block_instructions(b).len())
        .sum()
}

impl StaticInliningPass {
    /// Recursively inline `func`'s callees bottom-up (a callee is fully
    /// reduced before the decision to inline it into its own callers is
    /// made), guarding against inlining a function into itself through a
    /// call cycle.
    fn inline_callees(&self, module: &mut Module, func: FuncRef, in_progress: &mut HashSet<FuncRef>) {
        in_progress.insert(func);

        let mut calls: Vec<InstRef> = Vec::new();
        for &block in module.func(func).blocks() {
            for inst in module.block_instructions(block) {
                if module.inst(inst).opcode() == Opcode::Call {
                    calls.push(inst);
                }
            }
        }

        for call in calls {
            let callee = match module.inst(call).data() {
                InstructionData::Call { callee, .. } => *callee,
                _ => continue,
            };
            if in_progress.contains(&callee) {
                trace!("skipping recursive call to avoid infinite inlining");
                continue;
            }

            self.inline_callees(module, callee, in_progress);

            if function_instruction_count(module, callee) <= self.instruction_count_threshold {
                debug!("inlining call to {}", module.func(callee).name());
                inline_call(module, call);
            }
        }

        in_progress.remove(&func);
    }
}

/// Pure instruction-list surgery: detach `inst` from its current block
/// without touching def/use registration (the instruction keeps its
/// existing operand wiring; only its container changes).
fn detach_from_block(module: &mut Module, inst: InstRef) {
    let block = module.inst(inst).parent().expect("instruction must be attached");
    let prev = module.inst(inst).prev();
    let next = module.inst(inst).next();
    match prev {
        Some(p) => module.inst_mut(p).set_next(next),
        None => module.block_mut(block).set_head(next),
    }
    match next {
        Some(n) => module.inst_mut(n).set_prev(prev),
        None => module.block_mut(block).set_tail(prev),
    }
    module.block_mut(block).dec_len();
    module.inst_mut(inst).set_prev(None);
    module.inst_mut(inst).set_next(None);
    module.inst_mut(inst).set_parent(None);
}

/// Attach an already-detached `inst` to the tail of `block`, again without
/// touching def/use registration.
fn append_existing(module: &mut Module, block: BlockRef, inst: InstRef) {
    let tail = module.block(block).back();
    module.inst_mut(inst).set_prev(tail);
    module.inst_mut(inst).set_next(None);
    match tail {
        Some(t) => module.inst_mut(t).set_next(Some(inst)),
        None => module.block_mut(block).set_head(Some(inst)),
    }
    module.block_mut(block).set_tail(Some(inst));
    module.inst_mut(inst).set_parent(Some(block));
    module.block_mut(block).inc_len();
}

/// Move ownership of `block` from `from_func` to `to_func`: unlink it from
/// the source function's block list so a later `remove_function(from_func)`
/// doesn't reach in and tear down a block that now belongs elsewhere.
fn transfer_block_to_caller(module: &mut Module, to_func: FuncRef, from_func: FuncRef, block: BlockRef) {
    module.func_mut(from_func).remove_block(block);
    module.func_mut(to_func).push_block(block);
    module.block_mut(block).set_parent(Some(to_func));
}

fn inline_call(module: &mut Module, call_inst: InstRef) {
    let call_bb = module.inst(call_inst).parent().expect("call must be attached");
    let (callee_orig, call_args, call_output) = match module.inst(call_inst).data().clone() {
        InstructionData::Call {
            callee,
            args,
            output,
        } => (callee, args, output),
        _ => return,
    };
    let caller = module.block(call_bb).parent().expect("block must have a parent");
    let callee_name = module.func(callee_orig).name().to_string();

    // Deep-copy the callee's graph so the original definition survives for
    // any other call site.
    let callee = module.copy_function(callee_orig);

    let call_bb_true = module.block(call_bb).true_successor();
    let call_bb_false = module.block(call_bb).false_successor();

    let inst_after_call = module.inst(call_inst).next();
    module.remove_instruction(call_inst);

    let mut insts_after_call: Vec<InstRef> = Vec::new();
    let mut cursor = inst_after_call;
    while let Some(i) = cursor {
        let next = module.inst(i).next();
        detach_from_block(module, i);
        insts_after_call.push(i);
        cursor = next;
    }

    let callee_entry = module.func(callee).entry().expect("callee must have an entry block");
    let callee_blocks = module.func(callee).blocks().to_vec();

    let mut merged_into_call_bb = false;
    if module.block(callee_entry).predecessors().is_empty() {
        // The only way into the callee's entry is through this call, so its
        // instructions can just become the tail of the call block.
        for i in module.block_instructions(callee_entry) {
            detach_from_block(module, i);
            append_existing(module, call_bb, i);
        }
        let entry_true = module.block(callee_entry).true_successor();
        let entry_false = module.block(callee_entry).false_successor();
        module.block_mut(call_bb).set_true_successor(entry_true);
        module.block_mut(call_bb).set_false_successor(entry_false);
        if let Some(t) = entry_true {
            module.block_mut(t).remove_predecessor(callee_entry);
            module.block_mut(t).add_predecessor(call_bb);
        }
        if let Some(f) = entry_false {
            module.block_mut(f).remove_predecessor(callee_entry);
            module.block_mut(f).add_predecessor(call_bb);
        }
        merged_into_call_bb = true;
    } else {
        // The callee entry has internal predecessors (a loop or branch
        // reaching back to it), so splice the whole block in and jump to it.
        transfer_block_to_caller(module, caller, callee, callee_entry);
        module.jump(call_bb, callee_entry);
    }

    for &bb in &callee_blocks {
        if bb == callee_entry {
            continue;
        }
        transfer_block_to_caller(module, caller, callee, bb);
    }

    // Rebind every use of a callee parameter to the matching call argument.
    let callee_params = module.func(callee).params().to_vec();
    for (param, arg) in callee_params.into_iter().zip(call_args.iter().copied()) {
        let users: Vec<InstRef> = module.value(param).users().iter().copied().collect();
        for user in users {
            module.inst_mut(user).replace_input(param, arg);
            module.value_mut(param).remove_user(user);
            module.value_mut(arg).add_user(user);
        }
    }

    // Gather every Ret terminator the inlined body now has, including one
    // that might have landed at the tail of `call_bb` itself after the
    // entry-merge above (a single-block callee with no internal branches).
    let mut callee_rets: Vec<InstRef> = Vec::new();
    if merged_into_call_bb {
        if let Some(tail) = module.block(call_bb).back() {
            if module.inst(tail).opcode() == Opcode::Ret {
                callee_rets.push(tail);
            }
        }
    }
    for &bb in &callee_blocks {
        if merged_into_call_bb && bb == callee_entry {
            continue;
        }
        if let Some(tail) = module.block(bb).back() {
            if module.inst(tail).opcode() == Opcode::Ret {
                callee_rets.push(tail);
            }
        }
    }

    let post_call_bb = if callee_rets.len() == 1 {
        let callee_ret = callee_rets[0];
        let ret_bb = module.inst(callee_ret).parent().expect("ret must be attached");
        let ret_value = match module.inst(callee_ret).data() {
            InstructionData::Ret { output } => *output,
            _ => unreachable!(),
        };
        if let (Some(rv), Some(out)) = (ret_value, call_output) {
            module.append_instruction(ret_bb, Opcode::Mv, InstructionData::Mv { input: rv, output: out });
        }
        module.remove_instruction(callee_ret);

        for i in insts_after_call.iter().copied() {
            append_existing(module, ret_bb, i);
        }
        ret_bb
    } else {
        let post_bb = module.create_block(caller, format!("PostCallTo_{}", callee_name));

        let mut phi_inputs = OperandList::new();
        for &callee_ret in &callee_rets {
            let ret_bb = module.inst(callee_ret).parent().expect("ret must be attached");
            let ret_value = match module.inst(callee_ret).data() {
                InstructionData::Ret { output } => *output,
                _ => unreachable!(),
            };
            if let Some(rv) = ret_value {
                phi_inputs.push(rv);
            }
            module.remove_instruction(callee_ret);
            module.jump(ret_bb, post_bb);
        }

        if let Some(out) = call_output {
            module.insert_front(post_bb, Opcode::Phi, InstructionData::Phi {
                inputs: phi_inputs,
                output: out,
            });
        }

        for i in insts_after_call.iter().copied() {
            append_existing(module, post_bb, i);
        }
        post_bb
    };

    module.block_mut(post_call_bb).set_true_successor(call_bb_true);
    module.block_mut(post_call_bb).set_false_successor(call_bb_false);
    if let Some(t) = call_bb_true {
        module.block_mut(t).remove_predecessor(call_bb);
        module.block_mut(t).add_predecessor(post_call_bb);
    }
    if let Some(f) = call_bb_false {
        module.block_mut(f).remove_predecessor(call_bb);
        module.block_mut(f).add_predecessor(post_call_bb);
    }

    module.remove_function(callee);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{ConstValue, ValueType};

    #[test]
    fn inlines_simple_callee_with_no_predecessors_into_call_site() {
        let mut module = Module::new();

        let callee = module.create_function("double", ValueType::U64, &[ValueType::U64]);
        let callee_entry = module.create_block(callee, "entry");
        let p = module.func(callee).params()[0];
        let out = module.create_value(ValueType::U64);
        module.add(callee_entry, p, p, out);
        module.ret(callee_entry, Some(out));

        let caller = module.create_function("main", ValueType::U64, &[]);
        let caller_entry = module.create_block(caller, "entry");
        let arg = module.get_or_create_const(ConstValue::U64(21));
        let args = OperandList::from_slice(&[arg]);
        let call_output = module.create_value(ValueType::U64);
        let call = module.call(caller_entry, callee, args, Some(call_output));
        module.ret(caller_entry, Some(call_output));

        StaticInliningPass::new().run(&mut module, caller);
        let _ = call;

        let insts = module.block_instructions(caller_entry);
        assert!(insts.iter().all(|&i| module.inst(i).opcode() != Opcode::Call));
        assert!(insts.iter().any(|&i| module.inst(i).opcode() == Opcode::Add));
        assert_eq!(module.inst(*insts.last().unwrap()).opcode(), Opcode::Ret);
    }

    /// Callee branches on its argument to one of two blocks, each returning
    /// a distinct constant. Inlining must fuse the two returns with a Phi
    /// in a new post-call block, with the original `Ret`s turned into
    /// `Jump`s into it.
    #[test]
    fn inlines_callee_with_multiple_returns_via_phi_fusing_post_call_block() {
        let mut module = Module::new();

        let callee = module.create_function("branchy", ValueType::U64, &[ValueType::U64]);
        let entry = module.create_block(callee, "entry");
        let then_bb = module.create_block(callee, "then");
        let else_bb = module.create_block(callee, "else");
        let cond = module.func(callee).params()[0];
        module.beq(entry, cond, cond, then_bb, else_bb);
        let c10 = module.get_or_create_const(ConstValue::U64(10));
        module.ret(then_bb, Some(c10));
        let c20 = module.get_or_create_const(ConstValue::U64(20));
        module.ret(else_bb, Some(c20));

        let caller = module.create_function("main", ValueType::U64, &[]);
        let caller_entry = module.create_block(caller, "entry");
        let arg = module.get_or_create_const(ConstValue::U64(1));
        let call_output = module.create_value(ValueType::U64);
        module.call(caller_entry, callee, OperandList::from_slice(&[arg]), Some(call_output));
        module.ret(caller_entry, Some(call_output));

        StaticInliningPass::new().run(&mut module, caller);

        // The two transferred blocks now jump into a fused post-call block
        // instead of returning.
        let then_insts = module.block_instructions(then_bb);
        assert_eq!(module.inst(*then_insts.last().unwrap()).opcode(), Opcode::Jump);
        let else_insts = module.block_instructions(else_bb);
        assert_eq!(module.inst(*else_insts.last().unwrap()).opcode(), Opcode::Jump);

        let post_bb = match module.inst(*then_insts.last().unwrap()).data() {
            InstructionData::Jump { target } => *target,
            other => panic!("expected Jump, got {:?}", other),
        };
        let post_insts = module.block_instructions(post_bb);
        assert_eq!(module.inst(post_insts[0]).opcode(), Opcode::Phi);
        let phi_inputs = match module.inst(post_insts[0]).data() {
            InstructionData::Phi { inputs, output } => {
                assert_eq!(*output, call_output);
                inputs.clone()
            }
            other => panic!("expected Phi, got {:?}", other),
        };
        let folded: Vec<Option<ConstValue>> = phi_inputs.iter().map(|&v| module.value(v).constant()).collect();
        assert_eq!(folded.len(), 2);
        assert!(folded.contains(&Some(ConstValue::U64(10))));
        assert!(folded.contains(&Some(ConstValue::U64(20))));
        assert_eq!(module.inst(*post_insts.last().unwrap()).opcode(), Opcode::Ret);
    }

    #[test]
    fn oversized_callee_is_left_uninlined() {
        let mut module = Module::new();

        let callee = module.create_function("big", ValueType::U64, &[ValueType::U64]);
        let callee_entry = module.create_block(callee, "entry");
        let mut cur = module.func(callee).params()[0];
        for _ in 0..20 {
            let c = module.get_or_create_const(ConstValue::U64(1));
            let next = module.create_value(ValueType::U64);
            module.add(callee_entry, cur, c, next);
            cur = next;
        }
        module.ret(callee_entry, Some(cur));

        let caller = module.create_function("main", ValueType::U64, &[]);
        let caller_entry = module.create_block(caller, "entry");
        let arg = module.get_or_create_const(ConstValue::U64(0));
        let call_output = module.create_value(ValueType::U64);
        module.call(caller_entry, callee, OperandList::from_slice(&[arg]), Some(call_output));
        module.ret(caller_entry, Some(call_output));

        let pass = StaticInliningPass::with_threshold(10);
        pass.run(&mut module, caller);

        let insts = module.block_instructions(caller_entry);
        assert!(insts.iter().any(|&i| module.inst(i).opcode() == Opcode::Call));
    }
}
