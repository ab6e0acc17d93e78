//! Remove a `NullCheck`/`BoundsCheck` that is redundant because another
//! check on the same operand(s), in a block that dominates it, already ran.

use log::trace;

use crate::builder::Module;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::instructions::InstructionData;
use crate::ir::{FuncRef, InstRef, Opcode};
use crate::pass::Pass;

const NAME: &str = "Check Elimination Pass";

#[derive(Debug, Default)]
pub struct CheckEliminationPass;

impl CheckEliminationPass {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for CheckEliminationPass {
    fn name(&self) -> &str {
        NAME
    }

    fn run(&self, module: &mut Module, func: FuncRef) {
        let mut cfg = ControlFlowGraph::new(module, func);
        if !cfg.dominator_tree_built() {
            cfg.build_dominator_tree(module);
        }

        let mut rpo = crate::flowgraph::Rpo::new();
        if let Some(entry) = cfg.entry() {
            rpo.run(module, entry, cfg.blocks().len());
        }

        for &block in rpo.order() {
            let insts = module.block_instructions(block);
            for inst in insts {
                match module.inst(inst).opcode() {
                    Opcode::NullCheck => eliminate_dominated_null_checks(module, inst),
                    Opcode::BoundsCheck => eliminate_dominated_bounds_checks(module, inst),
                    _ => {}
                }
            }
        }
    }
}

fn eliminate_dominated_null_checks(module: &mut Module, inst: InstRef) {
    let ptr = match module.inst(inst).data() {
        InstructionData::NullCheck { ptr } => *ptr,
        _ => return,
    };
    let this_block = match module.inst(inst).parent() {
        Some(b) => b,
        None => return,
    };

    let dominated: Vec<InstRef> = module
        .value(ptr)
        .users()
        .iter()
        .copied()
        .filter(|&user| {
            user != inst
                && module.inst(user).opcode() == Opcode::NullCheck
                && module
                    .inst(user)
                    .parent()
                    .map(|p| module.block(this_block).is_dominator_of(p))
                    .unwrap_or(false)
        })
        .collect();

    for dead in dominated {
        trace!("eliminated redundant NullCheck");
        module.value_mut(ptr).remove_user(dead);
        module.remove_instruction(dead);
    }
}

fn eliminate_dominated_bounds_checks(module: &mut Module, inst: InstRef) {
    let (ptr, array) = match module.inst(inst).data() {
        InstructionData::BoundsCheck { ptr, array } => (*ptr, *array),
        _ => return,
    };
    let this_block = match module.inst(inst).parent() {
        Some(b) => b,
        None => return,
    };

    let dominated: Vec<InstRef> = module
        .value(array)
        .users()
        .iter()
        .copied()
        .filter(|&user| {
            if user == inst || module.inst(user).opcode() != Opcode::BoundsCheck {
                return false;
            }
            let same_ptr = match module.inst(user).data() {
                InstructionData::BoundsCheck { ptr: other_ptr, .. } => *other_ptr == ptr,
                _ => false,
            };
            same_ptr
                && module
                    .inst(user)
                    .parent()
                    .map(|p| module.block(this_block).is_dominator_of(p))
                    .unwrap_or(false)
        })
        .collect();

    for dead in dominated {
        trace!("eliminated redundant BoundsCheck");
        module.value_mut(ptr).remove_user(dead);
        module.value_mut(array).remove_user(dead);
        module.remove_instruction(dead);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueType;

    #[test]
    fn second_null_check_in_dominated_block_is_removed() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::Void, &[ValueType::Pointer]);
        let entry = module.create_block(func, "entry");
        let next = module.create_block(func, "next");
        let ptr = module.func(func).params()[0];

        module.null_check(entry, ptr);
        module.jump(entry, next);
        module.null_check(next, ptr);
        module.ret(next, None);

        CheckEliminationPass::new().run(&mut module, func);

        let next_insts = module.block_instructions(next);
        assert!(!next_insts
            .iter()
            .any(|&i| module.inst(i).opcode() == Opcode::NullCheck));
        let entry_insts = module.block_instructions(entry);
        assert_eq!(
            entry_insts
                .iter()
                .filter(|&&i| module.inst(i).opcode() == Opcode::NullCheck)
                .count(),
            1
        );
    }

    #[test]
    fn unrelated_pointer_check_is_kept() {
        let mut module = Module::new();
        let func = module.create_function(
            "f",
            ValueType::Void,
            &[ValueType::Pointer, ValueType::Pointer],
        );
        let entry = module.create_block(func, "entry");
        let p1 = module.func(func).params()[0];
        let p2 = module.func(func).params()[1];

        module.null_check(entry, p1);
        module.null_check(entry, p2);
        module.ret(entry, None);

        CheckEliminationPass::new().run(&mut module, func);

        let insts = module.block_instructions(entry);
        assert_eq!(
            insts
                .iter()
                .filter(|&&i| module.inst(i).opcode() == Opcode::NullCheck)
                .count(),
            2
        );
    }
}
