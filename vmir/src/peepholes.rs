//! Local, single-instruction (or instruction-pair) algebraic simplifications.
//!
//! The source this was distilled from left `PerformSingleAshrPeephole` and
//! `PerformSingleAndPeephole` as empty stubs (and never wired up the
//! Ashr+Shl-pair rewrite its own `ReplaceShlWithMvOrZero` helper template
//! implements). All three are implemented here in full.

use log::trace;

use crate::builder::Module;
use crate::ir::instructions::InstructionData;
use crate::ir::{ConstValue, FuncRef, InstRef, Opcode, ValueRef, ValueType};
use crate::pass::Pass;

const NAME: &str = "Peepholes Pass";

#[derive(Debug, Default)]
pub struct PeepholesPass;

impl PeepholesPass {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for PeepholesPass {
    fn name(&self) -> &str {
        NAME
    }

    fn run(&self, module: &mut Module, func: FuncRef) {
        let blocks = module.func(func).blocks().to_vec();
        for block in blocks {
            let mut cur = module.block(block).front();
            while let Some(inst) = cur {
                let next = module.inst(inst).next();
                match module.inst(inst).opcode() {
                    Opcode::Add => {
                        perform_single_add_peephole(module, inst);
                    }
                    Opcode::Ashr => {
                        perform_single_ashr_peephole(module, inst);
                    }
                    Opcode::And => {
                        perform_single_and_peephole(module, inst);
                    }
                    _ => {}
                }
                cur = next;
            }
        }
    }
}

fn binary_operands(module: &Module, inst: InstRef) -> (ValueRef, ValueRef, ValueRef) {
    match module.inst(inst).data() {
        InstructionData::Binary {
            input1,
            input2,
            output,
        } => (*input1, *input2, *output),
        other => panic!("expected a binary instruction, got {:?}", other),
    }
}

/// Replace `inst` (already detached from any other bookkeeping) with a `Mv`
/// of `new_input`, preserving `output`'s identity.
fn replace_with_mv(module: &mut Module, inst: InstRef, old_inputs: &[ValueRef], new_input: ValueRef, output: ValueRef) {
    let mv = module.insert_before(inst, Opcode::Mv, InstructionData::Mv {
        input: new_input,
        output,
    });
    for &old in old_inputs {
        module.value_mut(old).remove_user(inst);
    }
    module.remove_instruction(inst);
    let _ = mv;
}

/// `Add T x, 0 -> Mv T x`; `Add T x, x -> Shl T x, 1`.
fn perform_single_add_peephole(module: &mut Module, inst: InstRef) {
    let (input1, input2, output) = binary_operands(module, inst);

    if module.value(input2).is_zero_constant() {
        trace!("Add peephole: zero RHS -> Mv");
        replace_with_mv(module, inst, &[input1, input2], input1, output);
        return;
    }

    if input1 == input2 && module.value(input1).is_integral() {
        trace!("Add peephole: self-add -> Shl 1");
        let ty = module.value(input1).value_type();
        let one = module.get_or_create_const(one_of(ty));
        let shl = module.insert_before(inst, Opcode::Shl, InstructionData::Binary {
            input1,
            input2: one,
            output,
        });
        module.value_mut(input1).remove_user(inst);
        module.value_mut(input2).remove_user(inst);
        module.remove_instruction(inst);
        let _ = shl;
    }
}

/// `Ashr T x, 0 -> Mv T x`; otherwise tries the Ashr+Shl pair collapse.
fn perform_single_ashr_peephole(module: &mut Module, inst: InstRef) {
    let (input1, input2, output) = binary_operands(module, inst);

    if module.value(input2).is_zero_constant() {
        trace!("Ashr peephole: zero shift -> Mv");
        replace_with_mv(module, inst, &[input1, input2], input1, output);
        return;
    }

    perform_complex_ashr_peephole(module, inst, input1, input2, output);
}

/// `Ashr T v2, n; Shl T v2, n` collapses to a single `And` (mask, n <
/// bitwidth) or `Mv T 0` (n >= bitwidth), dropping the `Shl`.
fn perform_complex_ashr_peephole(
    module: &mut Module,
    ashr_inst: InstRef,
    ashr_input1: ValueRef,
    ashr_input2: ValueRef,
    ashr_output: ValueRef,
) {
    let n_const = match module.value(ashr_input2).constant() {
        Some(c) => c,
        None => return,
    };

    let users: Vec<InstRef> = module.value(ashr_output).users().iter().copied().collect();
    for shl_inst in users {
        if module.inst(shl_inst).opcode() != Opcode::Shl {
            continue;
        }
        let (shl_input1, shl_input2, shl_output) = binary_operands(module, shl_inst);
        if shl_input1 != ashr_output {
            continue;
        }
        let shl_n = match module.value(shl_input2).constant() {
            Some(c) => c,
            None => continue,
        };
        if shl_n != n_const {
            continue;
        }

        let ty = module.value(ashr_input1).value_type();
        let bit_width = match ty.bit_width() {
            Some(w) => w,
            None => continue,
        };
        let n = n_const.to_bits();

        trace!("Ashr+Shl peephole: n={} bitwidth={}", n, bit_width);

        if n < bit_width as u64 {
            let mask = module.get_or_create_const(mask_of(ty, n));
            let and_inst = module.insert_before(shl_inst, Opcode::And, InstructionData::Binary {
                input1: ashr_input1,
                input2: mask,
                output: shl_output,
            });
            module.value_mut(shl_input1).remove_user(shl_inst);
            module.value_mut(shl_input2).remove_user(shl_inst);
            module.remove_instruction(shl_inst);
            let _ = and_inst;
        } else {
            let zero = module.get_or_create_const(zero_of(ty));
            let mv_inst = module.insert_before(shl_inst, Opcode::Mv, InstructionData::Mv {
                input: zero,
                output: shl_output,
            });
            module.value_mut(shl_input1).remove_user(shl_inst);
            module.value_mut(shl_input2).remove_user(shl_inst);
            module.remove_instruction(shl_inst);
            let _ = mv_inst;
        }
    }

    let _ = ashr_inst;
}

/// `And T x, 0 -> Mv T 0`; `And T x, x -> Mv T x`.
fn perform_single_and_peephole(module: &mut Module, inst: InstRef) {
    let (input1, input2, output) = binary_operands(module, inst);

    if module.value(input2).is_zero_constant() {
        trace!("And peephole: zero RHS -> Mv 0");
        let ty = module.value(input1).value_type();
        let zero = module.get_or_create_const(zero_of(ty));
        replace_with_mv(module, inst, &[input1, input2], zero, output);
        return;
    }

    if input1 == input2 {
        trace!("And peephole: self-and -> Mv");
        replace_with_mv(module, inst, &[input1, input2], input1, output);
    }
}

fn one_of(ty: ValueType) -> ConstValue {
    match ty {
        ValueType::I8 => ConstValue::I8(1),
        ValueType::I16 => ConstValue::I16(1),
        ValueType::I32 => ConstValue::I32(1),
        ValueType::I64 => ConstValue::I64(1),
        ValueType::U8 => ConstValue::U8(1),
        ValueType::U16 => ConstValue::U16(1),
        ValueType::U32 => ConstValue::U32(1),
        ValueType::U64 => ConstValue::U64(1),
        other => panic!("one_of called on non-integral type {:?}", other),
    }
}

fn zero_of(ty: ValueType) -> ConstValue {
    match ty {
        ValueType::I8 => ConstValue::I8(0),
        ValueType::I16 => ConstValue::I16(0),
        ValueType::I32 => ConstValue::I32(0),
        ValueType::I64 => ConstValue::I64(0),
        ValueType::U8 => ConstValue::U8(0),
        ValueType::U16 => ConstValue::U16(0),
        ValueType::U32 => ConstValue::U32(0),
        ValueType::U64 => ConstValue::U64(0),
        other => panic!("zero_of called on non-integral type {:?}", other),
    }
}

fn truncate_mask(bit_width: u32, n: u64) -> u64 {
    if n >= bit_width as u64 {
        return 0;
    }
    let full_mask: u64 = if bit_width == 64 { u64::MAX } else { (1u64 << bit_width) - 1 };
    let low_mask = (1u64 << n) - 1;
    (!low_mask) & full_mask
}

fn mask_of(ty: ValueType, n: u64) -> ConstValue {
    let bit_width = ty.bit_width().expect("mask only defined for fixed-width integral types");
    let bits = truncate_mask(bit_width, n);
    match ty {
        ValueType::I8 => ConstValue::I8(bits as u8 as i8),
        ValueType::I16 => ConstValue::I16(bits as u16 as i16),
        ValueType::I32 => ConstValue::I32(bits as u32 as i32),
        ValueType::I64 => ConstValue::I64(bits as i64),
        ValueType::U8 => ConstValue::U8(bits as u8),
        ValueType::U16 => ConstValue::U16(bits as u16),
        ValueType::U32 => ConstValue::U32(bits as u32),
        ValueType::U64 => ConstValue::U64(bits),
        other => panic!("mask_of called on non-integral type {:?}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_zero_becomes_move() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let block = module.create_block(func, "entry");
        let param = module.func(func).params()[0];
        let zero = module.get_or_create_const(ConstValue::U64(0));
        let out = module.create_value(ValueType::U64);
        module.add(block, param, zero, out);
        module.ret(block, Some(out));

        PeepholesPass::new().run(&mut module, func);

        let insts = module.block_instructions(block);
        assert_eq!(module.inst(insts[0]).opcode(), Opcode::Mv);
        match module.inst(insts[0]).data() {
            InstructionData::Mv { input, .. } => assert_eq!(*input, param),
            other => panic!("expected Mv, got {:?}", other),
        }
    }

    #[test]
    fn self_add_becomes_shift_left_one() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let block = module.create_block(func, "entry");
        let param = module.func(func).params()[0];
        let out = module.create_value(ValueType::U64);
        module.add(block, param, param, out);
        module.ret(block, Some(out));

        PeepholesPass::new().run(&mut module, func);

        let insts = module.block_instructions(block);
        assert_eq!(module.inst(insts[0]).opcode(), Opcode::Shl);
        match module.inst(insts[0]).data() {
            InstructionData::Binary { input2, .. } => {
                assert_eq!(module.value(*input2).constant(), Some(ConstValue::U64(1)));
            }
            other => panic!("expected Binary, got {:?}", other),
        }
    }

    #[test]
    fn ashr_shl_pair_collapses_to_mask() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let block = module.create_block(func, "entry");
        let param = module.func(func).params()[0];
        let n = module.get_or_create_const(ConstValue::U64(4));
        let shifted = module.create_value(ValueType::U64);
        module.ashr(block, param, n, shifted);
        let out = module.create_value(ValueType::U64);
        module.shl(block, shifted, n, out);
        module.ret(block, Some(out));

        PeepholesPass::new().run(&mut module, func);

        let insts = module.block_instructions(block);
        // Ashr stays (its own zero-shift peephole doesn't apply to n=4), Shl
        // is replaced by And with the computed mask.
        assert_eq!(module.inst(insts[0]).opcode(), Opcode::Ashr);
        assert_eq!(module.inst(insts[1]).opcode(), Opcode::And);
        match module.inst(insts[1]).data() {
            InstructionData::Binary { input2, .. } => {
                let expected = !0xFu64; // ~((1<<4)-1)
                assert_eq!(
                    module.value(*input2).constant(),
                    Some(ConstValue::U64(expected))
                );
            }
            other => panic!("expected Binary, got {:?}", other),
        }
    }

    #[test]
    fn and_self_becomes_move() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let block = module.create_block(func, "entry");
        let param = module.func(func).params()[0];
        let out = module.create_value(ValueType::U64);
        module.and(block, param, param, out);
        module.ret(block, Some(out));

        PeepholesPass::new().run(&mut module, func);

        let insts = module.block_instructions(block);
        assert_eq!(module.inst(insts[0]).opcode(), Opcode::Mv);
    }
}
