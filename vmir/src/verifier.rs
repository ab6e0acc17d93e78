//! Aggregates the `is_valid`/`is_valid_shape` predicates scattered across
//! `Value`, `Instruction` and `BasicBlock` into one whole-`Function` check.
//!
//! Each node kind already knows how to judge itself in isolation (see
//! `ir::value::ValueData::is_valid`, `ir::instructions::Instruction::is_valid`,
//! `ir::block::BasicBlock::is_valid_shape`); what only `Module` can supply is
//! the context those checks are missing — an instruction doesn't know its
//! own position in its block, a block doesn't own the `Instruction`s it
//! points at.

use crate::builder::Module;
use crate::ir::{FuncRef, Opcode};

/// One thing wrong with a function, named precisely enough to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    NoBlocks,
    EmptyName,
    MissingEntry,
    EmptyBlock { block: crate::ir::BlockRef },
    NotTerminated { block: crate::ir::BlockRef },
    PhiAfterNonPhi { block: crate::ir::BlockRef },
    InvalidInstruction { inst: crate::ir::InstRef },
    InvalidValue { value: crate::ir::ValueRef },
}

/// Check every block and instruction reachable through `func`'s own block
/// list (not just those reachable from entry — an orphaned block left
/// behind by a rewrite is still a defect worth reporting).
pub fn verify_function(module: &Module, func: FuncRef) -> Vec<Violation> {
    let mut violations = Vec::new();
    let f = module.func(func);

    if f.name().is_empty() {
        violations.push(Violation::EmptyName);
    }
    if f.blocks().is_empty() {
        violations.push(Violation::NoBlocks);
        return violations;
    }

    let entry_has_no_missing_blocks = f.entry().map_or(false, |e| f.blocks().contains(&e));
    if !f.is_valid(entry_has_no_missing_blocks) {
        violations.push(Violation::MissingEntry);
    }

    for &block in f.blocks() {
        let insts = module.block_instructions(block);
        if insts.is_empty() {
            violations.push(Violation::EmptyBlock { block });
            continue;
        }
        let terminated = module.inst(*insts.last().unwrap()).opcode().is_terminator();

        let mut seen_non_phi = false;
        let mut phi_ordered = true;
        for &inst in &insts {
            if !module.inst(inst).is_valid() {
                violations.push(Violation::InvalidInstruction { inst });
            }
            if let Some(out) = module.inst(inst).output() {
                if !module.value(out).is_valid() {
                    violations.push(Violation::InvalidValue { value: out });
                }
            }
            let is_phi = module.inst(inst).opcode() == Opcode::Phi;
            if seen_non_phi && is_phi {
                phi_ordered = false;
            }
            if !is_phi {
                seen_non_phi = true;
            }
        }

        if !module.block(block).is_valid_shape(terminated && phi_ordered) {
            if !terminated {
                violations.push(Violation::NotTerminated { block });
            }
            if !phi_ordered {
                violations.push(Violation::PhiAfterNonPhi { block });
            }
        }
    }

    violations
}

pub fn is_valid_function(module: &Module, func: FuncRef) -> bool {
    verify_function(module, func).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueType;

    #[test]
    fn well_formed_function_has_no_violations() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let entry = module.create_block(func, "entry");
        let p = module.func(func).params()[0];
        module.ret(entry, Some(p));

        assert!(is_valid_function(&module, func));
    }

    #[test]
    fn unterminated_block_is_reported() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let entry = module.create_block(func, "entry");
        let p = module.func(func).params()[0];
        let out = module.create_value(ValueType::U64);
        let c = module.get_or_create_const(crate::ir::ConstValue::U64(1));
        module.add(entry, p, c, out);

        let violations = verify_function(&module, func);
        assert!(violations.contains(&Violation::NotTerminated { block: entry }));
    }

    #[test]
    fn phi_after_non_phi_is_reported() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::Void, &[ValueType::U64, ValueType::U64]);
        let entry = module.create_block(func, "entry");
        let a = module.func(func).params()[0];
        let b = module.func(func).params()[1];
        module.ret(entry, None);
        let phi_out = module.create_value(ValueType::U64);
        module.phi(entry, crate::ir::OperandList::from_slice(&[a, b]), phi_out);

        let violations = verify_function(&module, func);
        assert!(violations.contains(&Violation::PhiAfterNonPhi { block: entry }));
    }

    #[test]
    fn value_stuck_at_unknown_type_is_reported() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::Void, &[]);
        let entry = module.create_block(func, "entry");
        let out = module.create_value(ValueType::Unknown);
        let c = module.get_or_create_const(crate::ir::ConstValue::U64(1));
        module.mv(entry, c, out);
        module.ret(entry, None);

        let violations = verify_function(&module, func);
        assert!(violations.contains(&Violation::InvalidValue { value: out }));
    }
}
