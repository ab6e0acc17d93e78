//! Fold arithmetic/bitwise instructions whose inputs are both constants into
//! a `Mv` of the computed constant, then propagate that constant into users.

use log::trace;

use crate::builder::Module;
use crate::ir::instructions::InstructionData;
use crate::ir::{ConstValue, FuncRef, InstRef, Opcode, ValueRef};
use crate::pass::Pass;

const NAME: &str = "Constant Folding Pass";

#[derive(Debug, Default)]
pub struct ConstantFoldingPass;

impl ConstantFoldingPass {
    pub fn new() -> Self {
        Self
    }
}

impl Pass for ConstantFoldingPass {
    fn name(&self) -> &str {
        NAME
    }

    fn run(&self, module: &mut Module, func: FuncRef) {
        let blocks = module.func(func).blocks().to_vec();
        for block in blocks {
            let mut cur = module.block(block).front();
            while let Some(inst) = cur {
                cur = optimize_instruction_and_get_next(module, inst);
            }
        }
    }
}

/// Optimize `inst` (folding it if it's foldable arithmetic, then inlining a
/// resulting constant `Mv` into its users, recursively), and return the next
/// instruction to resume scanning from (the current instruction may have
/// been replaced or erased by the time this returns).
fn optimize_instruction_and_get_next(module: &mut Module, inst: InstRef) -> Option<InstRef> {
    let mut curr = inst;
    if module.inst(curr).opcode().is_binary_arith() {
        curr = optimize_arithmetic(module, curr);
    }

    let mut next = module.inst(curr).next();
    if module.inst(curr).opcode() == Opcode::Mv {
        let (input_mv, output_mv) = match module.inst(curr).data() {
            InstructionData::Mv { input, output } => (*input, *output),
            _ => unreachable!(),
        };

        if module.value(input_mv).has_constant() {
            let users: Vec<InstRef> = module.value(output_mv).users().iter().copied().collect();
            for user in users {
                if module.inst(user).opcode() != Opcode::Phi {
                    replace_move_user_input_with_constant(module, user, input_mv, output_mv);
                }
                if module.inst(user).opcode().is_binary_arith() || module.inst(user).opcode() == Opcode::Mv
                {
                    optimize_instruction_and_get_next(module, user);
                }
            }

            next = module.inst(curr).next();
            if module.value(output_mv).users().is_empty() {
                module.value_mut(input_mv).remove_user(curr);
                module.value_mut(output_mv).set_producer(None);
                module.remove_instruction(curr);
            }
        }
    }

    next
}

fn optimize_arithmetic(module: &mut Module, inst: InstRef) -> InstRef {
    let (input1, input2, output, opcode) = match module.inst(inst).data() {
        InstructionData::Binary {
            input1,
            input2,
            output,
        } => (*input1, *input2, *output, module.inst(inst).opcode()),
        _ => unreachable!(),
    };

    let c1 = match module.value(input1).constant() {
        Some(c) => c,
        None => return inst,
    };
    let c2 = match module.value(input2).constant() {
        Some(c) => c,
        None => return inst,
    };

    let folded = match fold_constants(opcode, c1, c2) {
        Some(f) => f,
        None => return inst,
    };
    trace!("folded {:?} {:?} {:?} -> {:?}", opcode, c1, c2, folded);

    let const_value = module.get_or_create_const(folded);
    let mv = module.insert_before(inst, Opcode::Mv, InstructionData::Mv {
        input: const_value,
        output,
    });

    module.value_mut(input1).remove_user(inst);
    module.value_mut(input2).remove_user(inst);
    module.remove_instruction(inst);

    mv
}

fn replace_move_user_input_with_constant(
    module: &mut Module,
    user: InstRef,
    input_mv: ValueRef,
    output_mv: ValueRef,
) {
    if module.inst(user).opcode() == Opcode::Phi {
        return;
    }
    module.inst_mut(user).replace_input(output_mv, input_mv);
    module.value_mut(output_mv).remove_user(user);
    module.value_mut(input_mv).add_user(user);
}

fn fold_constants(op: Opcode, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    use ConstValue::*;
    match (a, b) {
        (I8(x), I8(y)) => fold_i8(op, x, y).map(I8),
        (I16(x), I16(y)) => fold_i16(op, x, y).map(I16),
        (I32(x), I32(y)) => fold_i32(op, x, y).map(I32),
        (I64(x), I64(y)) => fold_i64(op, x, y).map(I64),
        (U8(x), U8(y)) => fold_u8(op, x, y).map(U8),
        (U16(x), U16(y)) => fold_u16(op, x, y).map(U16),
        (U32(x), U32(y)) => fold_u32(op, x, y).map(U32),
        (U64(x), U64(y)) => fold_u64(op, x, y).map(U64),
        (F32(x), F32(y)) => fold_f32(op, x, y).map(F32),
        (F64(x), F64(y)) => fold_f64(op, x, y).map(F64),
        _ => None,
    }
}

/// Shl/Shr/Ashr shift counts are masked to `b as u32`, matching native
/// hardware shift semantics rather than the panic-on-overflow Rust gives a
/// bare `<<`/`>>` with an out-of-range count. Division/remainder by zero
/// folds to 0 rather than skipping the fold — an implementation-defined
/// choice, not a trap, so it never panics at compile time.
macro_rules! fold_signed {
    ($fname:ident, $t:ty, $u:ty) => {
        fn $fname(op: Opcode, a: $t, b: $t) -> Option<$t> {
            Some(match op {
                Opcode::Add => a.wrapping_add(b),
                Opcode::Sub => a.wrapping_sub(b),
                Opcode::Mul => a.wrapping_mul(b),
                Opcode::Div => {
                    if b == 0 {
                        0
                    } else {
                        a.wrapping_div(b)
                    }
                }
                Opcode::Rem => {
                    if b == 0 {
                        0
                    } else {
                        a.wrapping_rem(b)
                    }
                }
                Opcode::And => a & b,
                Opcode::Or => a | b,
                Opcode::Xor => a ^ b,
                Opcode::Shl => a.wrapping_shl(b as u32),
                Opcode::Shr => (a as $u).wrapping_shr(b as u32) as $t,
                Opcode::Ashr => a.wrapping_shr(b as u32),
                _ => return None,
            })
        }
    };
}

macro_rules! fold_unsigned {
    ($fname:ident, $t:ty, $s:ty) => {
        fn $fname(op: Opcode, a: $t, b: $t) -> Option<$t> {
            Some(match op {
                Opcode::Add => a.wrapping_add(b),
                Opcode::Sub => a.wrapping_sub(b),
                Opcode::Mul => a.wrapping_mul(b),
                Opcode::Div => {
                    if b == 0 {
                        0
                    } else {
                        a.wrapping_div(b)
                    }
                }
                Opcode::Rem => {
                    if b == 0 {
                        0
                    } else {
                        a.wrapping_rem(b)
                    }
                }
                Opcode::And => a & b,
                Opcode::Or => a | b,
                Opcode::Xor => a ^ b,
                Opcode::Shl => a.wrapping_shl(b as u32),
                Opcode::Shr => a.wrapping_shr(b as u32),
                Opcode::Ashr => (a as $s).wrapping_shr(b as u32) as $t,
                _ => return None,
            })
        }
    };
}

fold_signed!(fold_i8, i8, u8);
fold_signed!(fold_i16, i16, u16);
fold_signed!(fold_i32, i32, u32);
fold_signed!(fold_i64, i64, u64);
fold_unsigned!(fold_u8, u8, i8);
fold_unsigned!(fold_u16, u16, i16);
fold_unsigned!(fold_u32, u32, i32);
fold_unsigned!(fold_u64, u64, i64);

/// `Rem/And/Or/Xor/Shl/Shr/Ashr` are integer-only ops; applied to floats
/// they fold to zero rather than being left unfolded.
fn fold_f32(op: Opcode, a: f32, b: f32) -> Option<f32> {
    match op {
        Opcode::Add => Some(a + b),
        Opcode::Sub => Some(a - b),
        Opcode::Mul => Some(a * b),
        Opcode::Div => Some(a / b),
        Opcode::Rem | Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Shl | Opcode::Shr | Opcode::Ashr => {
            Some(0.0)
        }
        _ => None,
    }
}

fn fold_f64(op: Opcode, a: f64, b: f64) -> Option<f64> {
    match op {
        Opcode::Add => Some(a + b),
        Opcode::Sub => Some(a - b),
        Opcode::Mul => Some(a * b),
        Opcode::Div => Some(a / b),
        Opcode::Rem | Opcode::And | Opcode::Or | Opcode::Xor | Opcode::Shl | Opcode::Shr | Opcode::Ashr => {
            Some(0.0)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueType;

    #[test]
    fn folds_chained_arithmetic_to_single_constant_move() {
        let mut module = Module::new();
        let func = module.create_function("main", ValueType::U64, &[]);
        let block = module.create_block(func, "entry");

        let c5 = module.get_or_create_const(ConstValue::U64(5));
        let c10 = module.get_or_create_const(ConstValue::U64(10));
        let sum_out = module.create_value(ValueType::U64);
        module.add(block, c5, c10, sum_out);

        let c4 = module.get_or_create_const(ConstValue::U64(4));
        let product_out = module.create_value(ValueType::U64);
        module.mul(block, sum_out, c4, product_out);
        module.ret(block, Some(product_out));

        ConstantFoldingPass::new().run(&mut module, func);

        let insts = module.block_instructions(block);
        // sum_out's Mv was folded away entirely once inlined into the Mul,
        // leaving one Mv (computed constant) followed by Ret.
        assert_eq!(insts.len(), 2);
        match module.inst(insts[0]).data() {
            InstructionData::Mv { input, output } => {
                assert_eq!(module.value(*input).constant(), Some(ConstValue::U64(60)));
                assert_eq!(*output, product_out);
            }
            other => panic!("expected Mv, got {:?}", other),
        }
    }

    #[test]
    fn leaves_non_constant_arithmetic_untouched() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let block = module.create_block(func, "entry");
        let param = module.func(func).params()[0];
        let c1 = module.get_or_create_const(ConstValue::U64(1));
        let out = module.create_value(ValueType::U64);
        module.add(block, param, c1, out);
        module.ret(block, Some(out));

        ConstantFoldingPass::new().run(&mut module, func);

        let insts = module.block_instructions(block);
        assert_eq!(insts.len(), 2);
        assert_eq!(module.inst(insts[0]).opcode(), Opcode::Add);
    }
}
