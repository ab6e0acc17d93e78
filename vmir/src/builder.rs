//! `Module`: the arena that owns every `Value`, `Instruction`, `BasicBlock`
//! and `Function`, and the only thing that can create, link or detach them.
//!
//! The original course project makes this a process-wide singleton
//! (`IRBuilder::GetInstance()`). A singleton has no natural translation into
//! safe Rust without a global `RefCell`, and nothing in the spec actually
//! requires one process-wide arena — every caller already threads a
//! `Function`/`ControlFlowGraph` through explicitly. So `Module` here is
//! just an ordinary value the caller owns and passes by `&mut`; analyses
//! (`ControlFlowGraph`, `LoopAnalyzer`, `LivenessAnalyzer`,
//! `RegisterAllocator`) are built on demand from a `&Module` plus a
//! `FuncRef` rather than cached inside the arena, so there is no cascade of
//! side-tables to release when a function goes away.
//!
//! Entities are append-only: `PrimaryMap` has no generic "remove slot N"
//! operation (removing would either leave a hole no `EntityRef` should ever
//! point at, or require shifting every later index). `remove_*` therefore
//! means "detach and orphan": unlink from every place that referenced the
//! entity (instruction lists, def/use sets, CFG edges, the owning
//! function's block list) so nothing reachable from a live `FuncRef` sees
//! it again, without reclaiming its slot. This matches the effect the
//! original's `delete`+`erase` has on everything *except* the id counters.

use std::collections::HashMap;

use vmir_entity::PrimaryMap;

use crate::ir::{
    BasicBlock, BlockRef, ConstValue, Function, FuncRef, Instruction, InstructionData, InstRef,
    Opcode, OperandList, ValueData, ValueRef, ValueType,
};

/// The IR arena.
#[derive(Debug, Clone, Default)]
pub struct Module {
    values: PrimaryMap<ValueRef, ValueData>,
    instructions: PrimaryMap<InstRef, Instruction>,
    blocks: PrimaryMap<BlockRef, BasicBlock>,
    functions: PrimaryMap<FuncRef, Function>,
    const_intern: HashMap<(u8, u64), ValueRef>,
}

fn const_key(c: &ConstValue) -> (u8, u64) {
    (c.value_type() as u8, c.to_bits())
}

impl Module {
    pub fn new() -> Self {
        Self {
            values: PrimaryMap::new(),
            instructions: PrimaryMap::new(),
            blocks: PrimaryMap::new(),
            functions: PrimaryMap::new(),
            const_intern: HashMap::new(),
        }
    }

    // -- accessors -----------------------------------------------------

    pub fn value(&self, v: ValueRef) -> &ValueData {
        &self.values[v]
    }
    pub fn value_mut(&mut self, v: ValueRef) -> &mut ValueData {
        &mut self.values[v]
    }
    pub fn inst(&self, i: InstRef) -> &Instruction {
        &self.instructions[i]
    }
    pub fn inst_mut(&mut self, i: InstRef) -> &mut Instruction {
        &mut self.instructions[i]
    }
    pub fn block(&self, b: BlockRef) -> &BasicBlock {
        &self.blocks[b]
    }
    pub fn block_mut(&mut self, b: BlockRef) -> &mut BasicBlock {
        &mut self.blocks[b]
    }
    pub fn func(&self, f: FuncRef) -> &Function {
        &self.functions[f]
    }
    pub fn func_mut(&mut self, f: FuncRef) -> &mut Function {
        &mut self.functions[f]
    }

    /// Instructions of `block` from front to back.
    pub fn block_instructions(&self, block: BlockRef) -> Vec<InstRef> {
        let mut out = Vec::with_capacity(self.blocks[block].len());
        let mut cur = self.blocks[block].front();
        while let Some(i) = cur {
            out.push(i);
            cur = self.instructions[i].next();
        }
        out
    }

    // -- creation --------------------------------------------------------

    pub fn create_function(
        &mut self,
        name: impl Into<String>,
        ret_type: ValueType,
        param_types: &[ValueType],
    ) -> FuncRef {
        let params: Vec<ValueRef> = param_types.iter().map(|ty| self.create_value(*ty)).collect();
        self.functions
            .push(Function::new(name.into(), ret_type, params))
    }

    pub fn create_block(&mut self, func: FuncRef, name: impl Into<String>) -> BlockRef {
        let mut bb = BasicBlock::new(name.into());
        bb.set_parent(Some(func));
        let b = self.blocks.push(bb);
        self.functions[func].push_block(b);
        b
    }

    pub fn create_value(&mut self, ty: ValueType) -> ValueRef {
        self.values.push(ValueData::new(ty))
    }

    /// Intern a constant: two requests for the same `(type, bit pattern)`
    /// return the same `Value`. `0u8` and `0u64` are different keys; so are
    /// `+0.0` and `-0.0` (same magnitude, different sign bit, different
    /// bits).
    pub fn get_or_create_const(&mut self, c: ConstValue) -> ValueRef {
        let key = const_key(&c);
        if let Some(v) = self.const_intern.get(&key) {
            return *v;
        }
        let v = self.values.push(ValueData::with_constant(c));
        self.const_intern.insert(key, v);
        v
    }

    /// Append a new instruction to the tail of `block`, wiring def/use links
    /// and (for a terminator) CFG edges.
    pub fn append_instruction(
        &mut self,
        block: BlockRef,
        opcode: Opcode,
        data: InstructionData,
    ) -> InstRef {
        let iref = self.instructions.push(Instruction::new(opcode, data));
        self.link_tail(block, iref);
        self.wire(iref);
        iref
    }

    /// Insert a new instruction immediately before `before` in its block.
    pub fn insert_before(
        &mut self,
        before: InstRef,
        opcode: Opcode,
        data: InstructionData,
    ) -> InstRef {
        let block = self.instructions[before]
            .parent()
            .expect("instruction must be attached to a block");
        let iref = self.instructions.push(Instruction::new(opcode, data));
        let prev = self.instructions[before].prev();
        self.instructions[iref].set_prev(prev);
        self.instructions[iref].set_next(Some(before));
        self.instructions[before].set_prev(Some(iref));
        match prev {
            Some(p) => self.instructions[p].set_next(Some(iref)),
            None => self.blocks[block].set_head(Some(iref)),
        }
        self.instructions[iref].set_parent(Some(block));
        self.blocks[block].inc_len();
        self.wire(iref);
        iref
    }

    /// Insert a new instruction at the front of `block` (used to place a
    /// fresh Phi ahead of everything else, preserving the Phis-before-
    /// non-Phis invariant).
    pub fn insert_front(
        &mut self,
        block: BlockRef,
        opcode: Opcode,
        data: InstructionData,
    ) -> InstRef {
        let iref = self.instructions.push(Instruction::new(opcode, data));
        let head = self.blocks[block].front();
        self.instructions[iref].set_next(head);
        self.instructions[iref].set_prev(None);
        match head {
            Some(h) => self.instructions[h].set_prev(Some(iref)),
            None => self.blocks[block].set_tail(Some(iref)),
        }
        self.blocks[block].set_head(Some(iref));
        self.instructions[iref].set_parent(Some(block));
        self.blocks[block].inc_len();
        self.wire(iref);
        iref
    }

    fn link_tail(&mut self, block: BlockRef, iref: InstRef) {
        let tail = self.blocks[block].back();
        self.instructions[iref].set_prev(tail);
        self.instructions[iref].set_next(None);
        match tail {
            Some(t) => self.instructions[t].set_next(Some(iref)),
            None => self.blocks[block].set_head(Some(iref)),
        }
        self.blocks[block].set_tail(Some(iref));
        self.instructions[iref].set_parent(Some(block));
        self.blocks[block].inc_len();
    }

    /// Register def/use links and, for a terminator, CFG edges.
    fn wire(&mut self, iref: InstRef) {
        let inputs = self.instructions[iref].inputs();
        for v in inputs {
            self.values[v].add_user(iref);
        }
        if let Some(out) = self.instructions[iref].output() {
            self.values[out].set_producer(Some(iref));
        }
        let block = self.instructions[iref]
            .parent()
            .expect("wired instruction must have a parent");
        match self.instructions[iref].data().clone() {
            InstructionData::Jump { target } => {
                self.blocks[block].set_true_successor(Some(target));
                self.blocks[target].add_predecessor(block);
            }
            InstructionData::Branch {
                true_bb, false_bb, ..
            } => {
                self.blocks[block].set_true_successor(Some(true_bb));
                self.blocks[block].set_false_successor(Some(false_bb));
                self.blocks[true_bb].add_predecessor(block);
                self.blocks[false_bb].add_predecessor(block);
            }
            _ => {}
        }
    }

    // -- per-opcode convenience constructors ------------------------------

    fn binary(
        &mut self,
        block: BlockRef,
        opcode: Opcode,
        input1: ValueRef,
        input2: ValueRef,
        output: ValueRef,
    ) -> InstRef {
        self.append_instruction(
            block,
            opcode,
            InstructionData::Binary {
                input1,
                input2,
                output,
            },
        )
    }

    pub fn add(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Add, i1, i2, out)
    }
    pub fn sub(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Sub, i1, i2, out)
    }
    pub fn mul(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Mul, i1, i2, out)
    }
    pub fn div(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Div, i1, i2, out)
    }
    pub fn rem(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Rem, i1, i2, out)
    }
    pub fn and(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::And, i1, i2, out)
    }
    pub fn or(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Or, i1, i2, out)
    }
    pub fn xor(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Xor, i1, i2, out)
    }
    pub fn shl(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Shl, i1, i2, out)
    }
    pub fn shr(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Shr, i1, i2, out)
    }
    pub fn ashr(&mut self, block: BlockRef, i1: ValueRef, i2: ValueRef, out: ValueRef) -> InstRef {
        self.binary(block, Opcode::Ashr, i1, i2, out)
    }

    pub fn mv(&mut self, block: BlockRef, input: ValueRef, output: ValueRef) -> InstRef {
        self.append_instruction(block, Opcode::Mv, InstructionData::Mv { input, output })
    }

    pub fn load(&mut self, block: BlockRef, ptr: ValueRef, output: ValueRef) -> InstRef {
        self.append_instruction(block, Opcode::Load, InstructionData::Load { ptr, output })
    }

    pub fn store(&mut self, block: BlockRef, ptr: ValueRef, value: ValueRef) -> InstRef {
        self.append_instruction(block, Opcode::Store, InstructionData::Store { ptr, value })
    }

    pub fn jump(&mut self, block: BlockRef, target: BlockRef) -> InstRef {
        self.append_instruction(block, Opcode::Jump, InstructionData::Jump { target })
    }

    fn branch(
        &mut self,
        block: BlockRef,
        opcode: Opcode,
        input1: ValueRef,
        input2: ValueRef,
        true_bb: BlockRef,
        false_bb: BlockRef,
    ) -> InstRef {
        self.append_instruction(
            block,
            opcode,
            InstructionData::Branch {
                input1,
                input2,
                true_bb,
                false_bb,
            },
        )
    }

    pub fn beq(&mut self, b: BlockRef, i1: ValueRef, i2: ValueRef, t: BlockRef, f: BlockRef) -> InstRef {
        self.branch(b, Opcode::Beq, i1, i2, t, f)
    }
    pub fn bne(&mut self, b: BlockRef, i1: ValueRef, i2: ValueRef, t: BlockRef, f: BlockRef) -> InstRef {
        self.branch(b, Opcode::Bne, i1, i2, t, f)
    }
    pub fn bgt(&mut self, b: BlockRef, i1: ValueRef, i2: ValueRef, t: BlockRef, f: BlockRef) -> InstRef {
        self.branch(b, Opcode::Bgt, i1, i2, t, f)
    }
    pub fn blt(&mut self, b: BlockRef, i1: ValueRef, i2: ValueRef, t: BlockRef, f: BlockRef) -> InstRef {
        self.branch(b, Opcode::Blt, i1, i2, t, f)
    }
    pub fn bge(&mut self, b: BlockRef, i1: ValueRef, i2: ValueRef, t: BlockRef, f: BlockRef) -> InstRef {
        self.branch(b, Opcode::Bge, i1, i2, t, f)
    }
    pub fn ble(&mut self, b: BlockRef, i1: ValueRef, i2: ValueRef, t: BlockRef, f: BlockRef) -> InstRef {
        self.branch(b, Opcode::Ble, i1, i2, t, f)
    }

    pub fn call(
        &mut self,
        block: BlockRef,
        callee: FuncRef,
        args: OperandList,
        output: Option<ValueRef>,
    ) -> InstRef {
        self.append_instruction(
            block,
            Opcode::Call,
            InstructionData::Call {
                callee,
                args,
                output,
            },
        )
    }

    pub fn ret(&mut self, block: BlockRef, output: Option<ValueRef>) -> InstRef {
        self.append_instruction(block, Opcode::Ret, InstructionData::Ret { output })
    }

    pub fn alloc(
        &mut self,
        block: BlockRef,
        output: ValueRef,
        elem_ty: ValueType,
        count: u64,
    ) -> InstRef {
        self.append_instruction(
            block,
            Opcode::Alloc,
            InstructionData::Alloc {
                output,
                elem_ty,
                count,
            },
        )
    }

    pub fn phi(&mut self, block: BlockRef, inputs: OperandList, output: ValueRef) -> InstRef {
        self.append_instruction(block, Opcode::Phi, InstructionData::Phi { inputs, output })
    }

    pub fn null_check(&mut self, block: BlockRef, ptr: ValueRef) -> InstRef {
        self.append_instruction(block, Opcode::NullCheck, InstructionData::NullCheck { ptr })
    }

    pub fn bounds_check(&mut self, block: BlockRef, ptr: ValueRef, array: ValueRef) -> InstRef {
        self.append_instruction(
            block,
            Opcode::BoundsCheck,
            InstructionData::BoundsCheck { ptr, array },
        )
    }

    // -- removal -----------------------------------------------------------

    /// Detach `inst` from its block's instruction list and unregister it
    /// from the def/use graph and (if it was a terminator) the CFG. The
    /// instruction's storage is not reclaimed (see module docs).
    pub fn remove_instruction(&mut self, inst: InstRef) {
        let block = match self.instructions[inst].parent() {
            Some(b) => b,
            None => return,
        };

        let inputs = self.instructions[inst].inputs();
        for v in inputs {
            self.values[v].remove_user(inst);
        }
        if let Some(out) = self.instructions[inst].output() {
            self.values[out].set_producer(None);
        }

        match self.instructions[inst].data().clone() {
            InstructionData::Jump { target } => {
                self.blocks[target].remove_predecessor(block);
                self.blocks[block].set_true_successor(None);
            }
            InstructionData::Branch {
                true_bb, false_bb, ..
            } => {
                self.blocks[true_bb].remove_predecessor(block);
                self.blocks[false_bb].remove_predecessor(block);
                self.blocks[block].set_true_successor(None);
                self.blocks[block].set_false_successor(None);
            }
            _ => {}
        }

        let prev = self.instructions[inst].prev();
        let next = self.instructions[inst].next();
        match prev {
            Some(p) => self.instructions[p].set_next(next),
            None => self.blocks[block].set_head(next),
        }
        match next {
            Some(n) => self.instructions[n].set_prev(prev),
            None => self.blocks[block].set_tail(prev),
        }
        self.blocks[block].dec_len();
        self.instructions[inst].set_parent(None);
    }

    pub fn remove_block(&mut self, block: BlockRef) {
        let func = match self.blocks[block].parent() {
            Some(f) => f,
            None => return,
        };
        let insts = self.block_instructions(block);
        for i in insts {
            self.remove_instruction(i);
        }
        self.functions[func].remove_block(block);
        self.blocks[block].set_parent(None);
    }

    pub fn remove_function(&mut self, func: FuncRef) {
        let blocks = self.functions[func].blocks().to_vec();
        for b in blocks {
            self.remove_block(b);
        }
    }

    /// Detach `value` from the def/use graph: its producer backlink is
    /// cleared and, if it was an interned constant, the intern table forgets
    /// it so a later `get_or_create_const` can't return the stale key. Like
    /// `remove_instruction`, the value's storage itself is not reclaimed;
    /// unlinking it from any instruction that still names it as an input or
    /// output is the caller's responsibility, same as the instruction/block/
    /// function removers above.
    pub fn remove_value(&mut self, value: ValueRef) {
        self.values[value].set_producer(None);
        self.const_intern.retain(|_, v| *v != value);
    }

    // -- structural copy and comparison --------------------------------

    /// Deep-clone `src` into a fresh function: every value, instruction and
    /// block is freshly allocated and the whole producer/user/predecessor/
    /// successor graph is rewired onto the clones. Constants are not
    /// duplicated — `get_or_create_const` interns them, same as the source.
    pub fn copy_function(&mut self, src: FuncRef) -> FuncRef {
        let src_fn = self.functions[src].clone();

        let mut value_map: HashMap<ValueRef, ValueRef> = HashMap::new();
        let mut new_params = Vec::with_capacity(src_fn.params().len());
        for &p in src_fn.params() {
            let clone = self.create_value(self.values[p].value_type());
            value_map.insert(p, clone);
            new_params.push(clone);
        }

        let dst = self
            .functions
            .push(Function::new(src_fn.name().to_string(), src_fn.return_type(), new_params));

        let mut block_map: HashMap<BlockRef, BlockRef> = HashMap::new();
        for &b in src_fn.blocks() {
            let name = self.blocks[b].name().to_string();
            let nb = self.create_block(dst, name);
            block_map.insert(b, nb);
        }

        let remap_value = |this: &mut Self, map: &mut HashMap<ValueRef, ValueRef>, v: ValueRef| -> ValueRef {
            if let Some(&nv) = map.get(&v) {
                return nv;
            }
            let data = &this.values[v];
            let nv = if let Some(c) = data.constant() {
                this.get_or_create_const(c)
            } else {
                this.create_value(data.value_type())
            };
            map.insert(v, nv);
            nv
        };

        for &b in src_fn.blocks() {
            let nb = block_map[&b];
            for i in self.block_instructions(b) {
                let opcode = self.instructions[i].opcode();
                let data = self.instructions[i].data().clone();
                let new_data = match data {
                    InstructionData::Binary {
                        input1,
                        input2,
                        output,
                    } => InstructionData::Binary {
                        input1: remap_value(self, &mut value_map, input1),
                        input2: remap_value(self, &mut value_map, input2),
                        output: remap_value(self, &mut value_map, output),
                    },
                    InstructionData::Mv { input, output } => InstructionData::Mv {
                        input: remap_value(self, &mut value_map, input),
                        output: remap_value(self, &mut value_map, output),
                    },
                    InstructionData::Load { ptr, output } => InstructionData::Load {
                        ptr: remap_value(self, &mut value_map, ptr),
                        output: remap_value(self, &mut value_map, output),
                    },
                    InstructionData::Store { ptr, value } => InstructionData::Store {
                        ptr: remap_value(self, &mut value_map, ptr),
                        value: remap_value(self, &mut value_map, value),
                    },
                    InstructionData::Jump { target } => InstructionData::Jump {
                        target: block_map[&target],
                    },
                    InstructionData::Branch {
                        input1,
                        input2,
                        true_bb,
                        false_bb,
                    } => InstructionData::Branch {
                        input1: remap_value(self, &mut value_map, input1),
                        input2: remap_value(self, &mut value_map, input2),
                        true_bb: block_map[&true_bb],
                        false_bb: block_map[&false_bb],
                    },
                    InstructionData::Call {
                        callee,
                        args,
                        output,
                    } => InstructionData::Call {
                        callee,
                        args: args
                            .into_iter()
                            .map(|a| remap_value(self, &mut value_map, a))
                            .collect(),
                        output: output.map(|o| remap_value(self, &mut value_map, o)),
                    },
                    InstructionData::Ret { output } => InstructionData::Ret {
                        output: output.map(|o| remap_value(self, &mut value_map, o)),
                    },
                    InstructionData::Alloc {
                        output,
                        elem_ty,
                        count,
                    } => InstructionData::Alloc {
                        output: remap_value(self, &mut value_map, output),
                        elem_ty,
                        count,
                    },
                    InstructionData::Phi { inputs, output } => InstructionData::Phi {
                        inputs: inputs
                            .into_iter()
                            .map(|a| remap_value(self, &mut value_map, a))
                            .collect(),
                        output: remap_value(self, &mut value_map, output),
                    },
                    InstructionData::NullCheck { ptr } => InstructionData::NullCheck {
                        ptr: remap_value(self, &mut value_map, ptr),
                    },
                    InstructionData::BoundsCheck { ptr, array } => InstructionData::BoundsCheck {
                        ptr: remap_value(self, &mut value_map, ptr),
                        array: remap_value(self, &mut value_map, array),
                    },
                };
                self.append_instruction(nb, opcode, new_data);
            }
        }

        dst
    }

    /// Structural equality: same signature, same block shape rooted at
    /// entry, and paired instructions share opcode and operand shape with
    /// paired operands either equal constants or corresponding positions in
    /// the producer/user graph. Unreachable blocks are ignored, matching
    /// the RPO-rooted pairing the spec describes.
    pub fn compare_functions(&self, lhs: FuncRef, rhs: FuncRef) -> bool {
        let lf = &self.functions[lhs];
        let rf = &self.functions[rhs];
        if lf.return_type() != rf.return_type() || lf.params().len() != rf.params().len() {
            return false;
        }
        for (l, r) in lf.params().iter().zip(rf.params().iter()) {
            if self.values[*l].value_type() != self.values[*r].value_type() {
                return false;
            }
        }

        if lf.blocks().len() != rf.blocks().len() {
            return false;
        }

        let (le, re) = match (lf.entry(), rf.entry()) {
            (Some(l), Some(r)) => (l, r),
            (None, None) => return true,
            _ => return false,
        };

        let mut block_map: HashMap<BlockRef, BlockRef> = HashMap::new();
        let mut value_map: HashMap<ValueRef, ValueRef> = HashMap::new();
        self.compare_blocks(le, re, &mut block_map, &mut value_map)
    }

    fn compare_blocks(
        &self,
        l: BlockRef,
        r: BlockRef,
        block_map: &mut HashMap<BlockRef, BlockRef>,
        value_map: &mut HashMap<ValueRef, ValueRef>,
    ) -> bool {
        if let Some(&paired) = block_map.get(&l) {
            return paired == r;
        }
        block_map.insert(l, r);

        let li = self.block_instructions(l);
        let ri = self.block_instructions(r);
        if li.len() != ri.len() {
            return false;
        }
        for (&li_ref, &ri_ref) in li.iter().zip(ri.iter()) {
            if !self.compare_instructions(li_ref, ri_ref, value_map) {
                return false;
            }
        }

        let ls = self.blocks[l].successors();
        let rs = self.blocks[r].successors();
        if ls.len() != rs.len() {
            return false;
        }
        for (ls_b, rs_b) in ls.iter().zip(rs.iter()) {
            if !self.compare_blocks(*ls_b, *rs_b, block_map, value_map) {
                return false;
            }
        }
        true
    }

    fn compare_instructions(
        &self,
        l: InstRef,
        r: InstRef,
        value_map: &mut HashMap<ValueRef, ValueRef>,
    ) -> bool {
        let li = &self.instructions[l];
        let ri = &self.instructions[r];
        if li.opcode() != ri.opcode() {
            return false;
        }
        let linputs = li.inputs();
        let rinputs = ri.inputs();
        if linputs.len() != rinputs.len() {
            return false;
        }
        for (lv, rv) in linputs.iter().zip(rinputs.iter()) {
            if !self.compare_values(*lv, *rv, value_map) {
                return false;
            }
        }
        match (li.output(), ri.output()) {
            (Some(lo), Some(ro)) => {
                value_map.insert(lo, ro);
                true
            }
            (None, None) => true,
            _ => false,
        }
    }

    fn compare_values(
        &self,
        l: ValueRef,
        r: ValueRef,
        value_map: &mut HashMap<ValueRef, ValueRef>,
    ) -> bool {
        if let Some(&paired) = value_map.get(&l) {
            return paired == r;
        }
        let ld = &self.values[l];
        let rd = &self.values[r];
        match (ld.constant(), rd.constant()) {
            (Some(lc), Some(rc)) => lc == rc,
            (None, None) => {
                value_map.insert(l, r);
                true
            }
            _ => false,
        }
    }

    /// Release everything and reset to a fresh, empty arena.
    pub fn cleanup(&mut self) {
        *self = Module::new();
    }
}
