//! Whole-pipeline scenario tests: each one builds a function by hand, runs
//! the pipeline stage(s) it's meant to exercise, and checks the function's
//! resulting shape rather than any pass's intermediate bookkeeping.

use vmir::{
    ConstantFoldingPass, ControlFlowGraph, InstructionData, LoopAnalyzer, Module, Pass,
    RegisterAllocator, ValueType,
};

/// `v0 = Mv ui64 97; v1 = Mv ui64 87; v2 = Add ui64 v0, v1;
///  v3 = Add ui64 v0, 314; v4 = Add ui64 v2, v3; Ret ui64 v4`
/// collapses to a single `Ret ui64 595`.
#[test]
fn constant_folding_reduces_chained_arithmetic_to_a_single_ret() {
    use vmir::ConstValue;

    let mut module = Module::new();
    let func = module.create_function("f", ValueType::U64, &[]);
    let block = module.create_block(func, "entry");

    let c97 = module.get_or_create_const(ConstValue::U64(97));
    let v0 = module.create_value(ValueType::U64);
    module.mv(block, c97, v0);

    let c87 = module.get_or_create_const(ConstValue::U64(87));
    let v1 = module.create_value(ValueType::U64);
    module.mv(block, c87, v1);

    let v2 = module.create_value(ValueType::U64);
    module.add(block, v0, v1, v2);

    let c314 = module.get_or_create_const(ConstValue::U64(314));
    let v3 = module.create_value(ValueType::U64);
    module.add(block, v0, c314, v3);

    let v4 = module.create_value(ValueType::U64);
    module.add(block, v2, v3, v4);
    module.ret(block, Some(v4));

    ConstantFoldingPass::new().run(&mut module, func);

    let insts = module.block_instructions(block);
    assert_eq!(insts.len(), 1);
    match module.inst(insts[0]).data() {
        InstructionData::Ret { output: Some(v) } => {
            assert_eq!(module.value(*v).constant(), Some(ConstValue::U64(595)));
        }
        other => panic!("expected Ret ui64 595, got {:?}", other),
    }
}

/// Three non-overlapping SSA temporaries chained `v1 = p+c1; v2 = v1+c2;
/// v3 = v2+c3; Ret v3`, allocated with only two GP registers: each
/// temporary's interval ends exactly where the next one's begins, so every
/// one of them is handed register 0 in turn and nothing spills.
#[test]
fn linear_scan_reuses_one_register_across_non_overlapping_temporaries() {
    use vmir::{ConstValue, Location};

    let mut module = Module::new();
    let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
    let entry = module.create_block(func, "entry");
    let p = module.func(func).params()[0];

    let c1 = module.get_or_create_const(ConstValue::U64(1));
    let v1 = module.create_value(ValueType::U64);
    module.add(entry, p, c1, v1);

    let c2 = module.get_or_create_const(ConstValue::U64(2));
    let v2 = module.create_value(ValueType::U64);
    module.add(entry, v1, c2, v2);

    let c3 = module.get_or_create_const(ConstValue::U64(3));
    let v3 = module.create_value(ValueType::U64);
    module.add(entry, v2, c3, v3);
    module.ret(entry, Some(v3));

    let allocator = RegisterAllocator::new(2, 2);
    allocator.run(&mut module, func).expect("straight-line code is always reducible");

    for v in [v1, v2, v3] {
        assert_eq!(module.value(v).location(), Location::Gp(0));
    }
}

/// Sanity check that a loop tree with no irreducible loops still reaches
/// the allocator end to end (`LoopAnalyzer::build` + `RegisterAllocator`
/// composed, rather than each driven standalone as in their own unit
/// tests).
#[test]
fn register_allocation_runs_over_a_function_with_a_reducible_loop() {
    use vmir::ConstValue;

    let mut module = Module::new();
    let func = module.create_function("f", ValueType::Void, &[ValueType::U64]);
    let p = module.func(func).params()[0];

    let entry = module.create_block(func, "entry");
    let header = module.create_block(func, "header");
    let body = module.create_block(func, "body");
    let exit = module.create_block(func, "exit");

    let c1 = module.get_or_create_const(ConstValue::U64(1));
    let acc0 = module.create_value(ValueType::U64);
    module.add(entry, p, c1, acc0);
    module.jump(entry, header);

    module.beq(header, p, p, body, exit);

    let acc1 = module.create_value(ValueType::U64);
    module.add(body, acc0, c1, acc1);
    module.jump(body, header);

    module.ret(exit, None);

    let mut cfg = ControlFlowGraph::new(&module, func);
    cfg.build_dominator_tree(&mut module);
    let loops = LoopAnalyzer::build(&mut module, &mut cfg);
    assert!(!loops.has_irreducible_loops());

    let allocator = RegisterAllocator::new(4, 4);
    allocator.run(&mut module, func).expect("reducible");

    assert_ne!(module.value(acc0).location(), vmir::Location::Unassigned);
    assert_ne!(module.value(acc1).location(), vmir::Location::Unassigned);
}
