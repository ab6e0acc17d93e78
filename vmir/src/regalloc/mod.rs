//! Linear-scan register allocation over live intervals.

pub mod register_set;

use log::{debug, trace};

use crate::builder::Module;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::value::Location;
use crate::ir::{FuncRef, ValueRef, ValueType};
use crate::liveness::{LivenessAnalyzer, LivenessError};
use crate::loop_analysis::LoopAnalyzer;

use register_set::RegisterSet;

/// Pointer values compete for GP registers the same as integers; only
/// `F32`/`F64` need the FP class.
fn is_gp_class(ty: ValueType) -> bool {
    ty.is_integral() || ty == ValueType::Pointer
}

#[derive(Debug)]
pub struct RegisterAllocator {
    gp_count: u32,
    fp_count: u32,
}

impl RegisterAllocator {
    pub fn new(gp_count: u32, fp_count: u32) -> Self {
        Self { gp_count, fp_count }
    }

    pub fn gp_register_count(&self) -> u32 {
        self.gp_count
    }

    pub fn fp_register_count(&self) -> u32 {
        self.fp_count
    }

    /// Build (or rebuild) the dominator tree, loop tree and live intervals
    /// for `func`, then assign every produced Value a `Location`.
    pub fn run(&self, module: &mut Module, func: FuncRef) -> Result<(), LivenessError> {
        let mut cfg = ControlFlowGraph::new(module, func);
        cfg.build_dominator_tree(module);
        let loops = LoopAnalyzer::build(module, &mut cfg);
        let liveness = LivenessAnalyzer::build(module, &mut cfg, &loops)?;

        let mut values_by_start: Vec<ValueRef> = Vec::new();
        for &block in liveness.linear_order() {
            for inst in module.block_instructions(block) {
                if let Some(out) = module.inst(inst).output() {
                    values_by_start.push(out);
                }
            }
        }
        values_by_start.sort_by_key(|&v| module.value(v).interval().start);

        let mut state = AllocatorState::new(self.gp_count, self.fp_count);
        for value in values_by_start {
            state.allocate(module, value);
        }

        Ok(())
    }
}

struct AllocatorState {
    free_gp: RegisterSet,
    free_fp: RegisterSet,
    active: Vec<ValueRef>,
    next_stack_slot: u32,
}

impl AllocatorState {
    fn new(gp_count: u32, fp_count: u32) -> Self {
        Self {
            free_gp: RegisterSet::new(gp_count),
            free_fp: RegisterSet::new(fp_count),
            active: Vec::new(),
            next_stack_slot: 0,
        }
    }

    fn new_stack_slot(&mut self) -> u32 {
        let slot = self.next_stack_slot;
        self.next_stack_slot += 1;
        slot
    }

    fn allocate(&mut self, module: &mut Module, value: ValueRef) {
        self.expire_old_intervals(module, value);

        let gp_class = is_gp_class(module.value(value).value_type());
        let exhausted = if gp_class {
            self.free_gp.all_occupied()
        } else {
            self.free_fp.all_occupied()
        };

        if exhausted {
            self.spill_at_interval(module, value);
            return;
        }

        let location = if gp_class {
            let reg = self.free_gp.take_free().expect("gp class not exhausted");
            Location::Gp(reg)
        } else {
            let reg = self.free_fp.take_free().expect("fp class not exhausted");
            Location::Fp(reg)
        };
        trace!("assigned {:?}", location);
        module.value_mut(value).set_location(location);
        self.active.push(value);
        self.active
            .sort_by_key(|&v| module.value(v).interval().end);
    }

    /// Values in `active` whose interval has ended by the time `value`
    /// starts no longer hold their register; values of the other class are
    /// skipped since freeing them can't help `value`'s class.
    fn expire_old_intervals(&mut self, module: &mut Module, value: ValueRef) {
        let value_gp = is_gp_class(module.value(value).value_type());
        let value_start = module.value(value).interval().start;

        let mut i = 0;
        while i < self.active.len() {
            let candidate = self.active[i];
            let candidate_gp = is_gp_class(module.value(candidate).value_type());
            if candidate_gp != value_gp {
                i += 1;
                continue;
            }
            if module.value(candidate).interval().end > value_start {
                break;
            }

            self.active.remove(i);
            match module.value(candidate).location() {
                Location::Gp(reg) => self.free_gp.release(reg),
                Location::Fp(reg) => self.free_fp.release(reg),
                other => panic!("active value had no register location: {:?}", other),
            }
        }
    }

    /// Among the same-class active values, evict the one whose interval ends
    /// furthest away (if it outlasts `value`) and hand its register to
    /// `value`, spilling the evicted value to a fresh stack slot. Otherwise
    /// `value` itself spills.
    ///
    /// Fixes a bug in the source this was distilled from: the spill
    /// candidate there was picked from `active | reverse | filter | take(0)`,
    /// an always-empty range (`take(0)`), so dereferencing its `begin()` was
    /// undefined behavior. The policy implemented here — largest-end
    /// same-class active value — is the one the surrounding logic clearly
    /// intends.
    fn spill_at_interval(&mut self, module: &mut Module, value: ValueRef) {
        let value_gp = is_gp_class(module.value(value).value_type());
        let value_end = module.value(value).interval().end;

        let candidate_idx = self
            .active
            .iter()
            .enumerate()
            .filter(|(_, &v)| is_gp_class(module.value(v).value_type()) == value_gp)
            .max_by_key(|(_, &v)| module.value(v).interval().end)
            .map(|(i, _)| i);

        match candidate_idx {
            Some(idx) if module.value(self.active[idx]).interval().end > value_end => {
                let spill = self.active.remove(idx);
                let spill_location = module.value(spill).location();
                module.value_mut(value).set_location(spill_location);

                let stack_slot = self.new_stack_slot();
                module.value_mut(spill).set_location(Location::Stack(stack_slot));
                debug!("spilled to stack slot {}", stack_slot);

                self.active.push(value);
                self.active
                    .sort_by_key(|&v| module.value(v).interval().end);
            }
            _ => {
                let stack_slot = self.new_stack_slot();
                module.value_mut(value).set_location(Location::Stack(stack_slot));
                debug!("spilled to stack slot {}", stack_slot);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueType;

    #[test]
    fn two_non_overlapping_values_share_one_gp_register() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let entry = module.create_block(func, "entry");
        let param = module.func(func).params()[0];

        let c1 = module.get_or_create_const(crate::ir::ConstValue::U64(1));
        let a = module.create_value(ValueType::U64);
        module.add(entry, param, c1, a);

        let c2 = module.get_or_create_const(crate::ir::ConstValue::U64(2));
        let b = module.create_value(ValueType::U64);
        module.add(entry, a, c2, b);
        module.ret(entry, Some(b));

        let allocator = RegisterAllocator::new(1, 1);
        allocator.run(&mut module, func).expect("reducible");

        assert!(matches!(module.value(a).location(), Location::Gp(_)));
        assert!(matches!(module.value(b).location(), Location::Gp(_)));
    }

    #[test]
    fn overlapping_values_exceeding_register_count_spill_to_stack() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::U64, &[ValueType::U64]);
        let entry = module.create_block(func, "entry");
        let param = module.func(func).params()[0];

        let c1 = module.get_or_create_const(crate::ir::ConstValue::U64(1));
        let v1 = module.create_value(ValueType::U64);
        module.add(entry, param, c1, v1);

        let c2 = module.get_or_create_const(crate::ir::ConstValue::U64(2));
        let v2 = module.create_value(ValueType::U64);
        module.add(entry, param, c2, v2);

        let c3 = module.get_or_create_const(crate::ir::ConstValue::U64(3));
        let v3 = module.create_value(ValueType::U64);
        module.add(entry, param, c3, v3);

        let sum1 = module.create_value(ValueType::U64);
        module.add(entry, v1, v2, sum1);
        let sum2 = module.create_value(ValueType::U64);
        module.add(entry, sum1, v3, sum2);
        module.ret(entry, Some(sum2));

        let allocator = RegisterAllocator::new(1, 1);
        allocator.run(&mut module, func).expect("reducible");

        let locations = [v1, v2, v3, sum1]
            .iter()
            .map(|&v| module.value(v).location())
            .collect::<Vec<_>>();
        assert!(locations.iter().any(|l| matches!(l, Location::Stack(_))));
    }
}
