//! `Instruction`: a polymorphic, opcode-tagged record.
//!
//! Rather than a class hierarchy the Rust port uses one closed `Opcode` enum
//! plus an `InstructionData` payload enum with one variant per operand shape
//! (several opcodes share a shape, e.g. all ten binary arithmetic/bitwise
//! opcodes use `InstructionData::Binary`). This is the same "tagged record"
//! realization the design notes call for: match-exhaustiveness stands in for
//! the virtual dispatch the original uses.

use smallvec::SmallVec;

use super::entities::{BlockRef, FuncRef, InstRef, ValueRef};
use super::types::ValueType;

/// The closed instruction set.
///
/// Fixes a bug present in the source this was distilled from: there,
/// `InstructionOr` and `InstructionXor` both constructed their base class
/// with `InstructionType::And`, so an `Or` or `Xor` instruction reported
/// itself (and dispatched) as `And`. Here each opcode gets its own tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Ashr,
    Load,
    Store,
    Jump,
    Beq,
    Bne,
    Bgt,
    Blt,
    Bge,
    Ble,
    Call,
    Ret,
    Alloc,
    Phi,
    Mv,
    NullCheck,
    BoundsCheck,
}

impl Opcode {
    pub fn as_str(self) -> &'static str {
        match self {
            Opcode::Add => "Add",
            Opcode::Sub => "Sub",
            Opcode::Mul => "Mul",
            Opcode::Div => "Div",
            Opcode::Rem => "Rem",
            Opcode::And => "And",
            Opcode::Or => "Or",
            Opcode::Xor => "Xor",
            Opcode::Shl => "Shl",
            Opcode::Shr => "Shr",
            Opcode::Ashr => "Ashr",
            Opcode::Load => "Load",
            Opcode::Store => "Store",
            Opcode::Jump => "Jump",
            Opcode::Beq => "Beq",
            Opcode::Bne => "Bne",
            Opcode::Bgt => "Bgt",
            Opcode::Blt => "Blt",
            Opcode::Bge => "Bge",
            Opcode::Ble => "Ble",
            Opcode::Call => "Call",
            Opcode::Ret => "Ret",
            Opcode::Alloc => "Alloc",
            Opcode::Phi => "Phi",
            Opcode::Mv => "Mv",
            Opcode::NullCheck => "NullCheck",
            Opcode::BoundsCheck => "BoundsCheck",
        }
    }

    /// A block's last instruction must be one of these.
    pub fn is_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jump
                | Opcode::Beq
                | Opcode::Bne
                | Opcode::Bgt
                | Opcode::Blt
                | Opcode::Bge
                | Opcode::Ble
                | Opcode::Ret
        )
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            Opcode::Beq | Opcode::Bne | Opcode::Bgt | Opcode::Blt | Opcode::Bge | Opcode::Ble
        )
    }

    /// The ten two-input-one-output arithmetic/bitwise opcodes, i.e. those
    /// using [`InstructionData::Binary`].
    pub fn is_binary_arith(self) -> bool {
        matches!(
            self,
            Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Rem
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Ashr
        )
    }
}

impl std::fmt::Display for Opcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Small inline vector used for Phi inputs and Call arguments: the common
/// case is a handful of operands, so this avoids a heap allocation per
/// instruction the way `smallvec` is used throughout the teacher crate.
pub type OperandList = SmallVec<[ValueRef; 4]>;

/// Per-opcode operand payload.
#[derive(Debug, Clone)]
pub enum InstructionData {
    /// Add/Sub/Mul/Div/Rem/And/Or/Xor/Shl/Shr/Ashr.
    Binary {
        input1: ValueRef,
        input2: ValueRef,
        output: ValueRef,
    },
    Mv {
        input: ValueRef,
        output: ValueRef,
    },
    Load {
        ptr: ValueRef,
        output: ValueRef,
    },
    Store {
        ptr: ValueRef,
        value: ValueRef,
    },
    Jump {
        target: BlockRef,
    },
    /// Beq/Bne/Bgt/Blt/Bge/Ble.
    Branch {
        input1: ValueRef,
        input2: ValueRef,
        true_bb: BlockRef,
        false_bb: BlockRef,
    },
    Call {
        callee: FuncRef,
        args: OperandList,
        output: Option<ValueRef>,
    },
    Ret {
        output: Option<ValueRef>,
    },
    Alloc {
        output: ValueRef,
        elem_ty: ValueType,
        count: u64,
    },
    Phi {
        inputs: OperandList,
        output: ValueRef,
    },
    NullCheck {
        ptr: ValueRef,
    },
    BoundsCheck {
        ptr: ValueRef,
        array: ValueRef,
    },
}

/// A single instruction: its opcode, operand payload, intrusive list
/// position within its parent block, and the two numbers liveness analysis
/// assigns it.
#[derive(Debug, Clone)]
pub struct Instruction {
    opcode: Opcode,
    data: InstructionData,
    parent: Option<BlockRef>,
    prev: Option<InstRef>,
    next: Option<InstRef>,
    linear_number: u64,
    live_number: u64,
}

impl Instruction {
    pub fn new(opcode: Opcode, data: InstructionData) -> Self {
        Self {
            opcode,
            data,
            parent: None,
            prev: None,
            next: None,
            linear_number: 0,
            live_number: 0,
        }
    }

    pub fn opcode(&self) -> Opcode {
        self.opcode
    }

    pub fn data(&self) -> &InstructionData {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut InstructionData {
        &mut self.data
    }

    pub fn is_terminator(&self) -> bool {
        self.opcode.is_terminator()
    }

    pub fn parent(&self) -> Option<BlockRef> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<BlockRef>) {
        self.parent = parent;
    }

    pub fn prev(&self) -> Option<InstRef> {
        self.prev
    }

    pub fn set_prev(&mut self, prev: Option<InstRef>) {
        self.prev = prev;
    }

    pub fn next(&self) -> Option<InstRef> {
        self.next
    }

    pub fn set_next(&mut self, next: Option<InstRef>) {
        self.next = next;
    }

    pub fn linear_number(&self) -> u64 {
        self.linear_number
    }

    pub fn set_linear_number(&mut self, n: u64) {
        self.linear_number = n;
    }

    pub fn live_number(&self) -> u64 {
        self.live_number
    }

    pub fn set_live_number(&mut self, n: u64) {
        self.live_number = n;
    }

    /// Every `ValueRef` this instruction reads, in operand order. Does not
    /// include the output.
    pub fn inputs(&self) -> OperandList {
        match &self.data {
            InstructionData::Binary { input1, input2, .. } => {
                OperandList::from_slice(&[*input1, *input2])
            }
            InstructionData::Mv { input, .. } => OperandList::from_slice(&[*input]),
            InstructionData::Load { ptr, .. } => OperandList::from_slice(&[*ptr]),
            InstructionData::Store { ptr, value } => OperandList::from_slice(&[*ptr, *value]),
            InstructionData::Jump { .. } => OperandList::new(),
            InstructionData::Branch { input1, input2, .. } => {
                OperandList::from_slice(&[*input1, *input2])
            }
            InstructionData::Call { args, .. } => args.clone(),
            InstructionData::Ret { output } => output.into_iter().collect(),
            InstructionData::Alloc { .. } => OperandList::new(),
            InstructionData::Phi { inputs, .. } => inputs.clone(),
            InstructionData::NullCheck { ptr } => OperandList::from_slice(&[*ptr]),
            InstructionData::BoundsCheck { ptr, array } => {
                OperandList::from_slice(&[*ptr, *array])
            }
        }
    }

    /// This instruction's single SSA output, if it has one.
    pub fn output(&self) -> Option<ValueRef> {
        match &self.data {
            InstructionData::Binary { output, .. } => Some(*output),
            InstructionData::Mv { output, .. } => Some(*output),
            InstructionData::Load { output, .. } => Some(*output),
            InstructionData::Alloc { output, .. } => Some(*output),
            InstructionData::Phi { output, .. } => Some(*output),
            InstructionData::Call { output, .. } => *output,
            _ => None,
        }
    }

    /// Rewrite every occurrence of `old` in this instruction's inputs to
    /// `new`. Used by constant folding, peepholes and inlining to rebind a
    /// user after its producer was replaced; the caller is responsible for
    /// updating the two `Value`s' user sets.
    pub fn replace_input(&mut self, old: ValueRef, new: ValueRef) {
        let swap = |v: &mut ValueRef| {
            if *v == old {
                *v = new;
            }
        };
        match &mut self.data {
            InstructionData::Binary { input1, input2, .. } => {
                swap(input1);
                swap(input2);
            }
            InstructionData::Mv { input, .. } => swap(input),
            InstructionData::Load { ptr, .. } => swap(ptr),
            InstructionData::Store { ptr, value } => {
                swap(ptr);
                swap(value);
            }
            InstructionData::Jump { .. } => {}
            InstructionData::Branch { input1, input2, .. } => {
                swap(input1);
                swap(input2);
            }
            InstructionData::Call { args, .. } => {
                for a in args.iter_mut() {
                    swap(a);
                }
            }
            InstructionData::Ret { output } => {
                if let Some(v) = output {
                    swap(v);
                }
            }
            InstructionData::Alloc { .. } => {}
            InstructionData::Phi { inputs, .. } => {
                for a in inputs.iter_mut() {
                    swap(a);
                }
            }
            InstructionData::NullCheck { ptr } => swap(ptr),
            InstructionData::BoundsCheck { ptr, array } => {
                swap(ptr);
                swap(array);
            }
        }
    }

    /// The blocks this terminator can transfer control to, true-successor
    /// first (matching the original's successor iteration order).
    pub fn successors(&self) -> SmallVec<[BlockRef; 2]> {
        match &self.data {
            InstructionData::Jump { target } => SmallVec::from_slice(&[*target]),
            InstructionData::Branch {
                true_bb, false_bb, ..
            } => SmallVec::from_slice(&[*true_bb, *false_bb]),
            _ => SmallVec::new(),
        }
    }

    pub fn is_valid(&self) -> bool {
        match (&self.opcode, &self.data) {
            (
                Opcode::Add
                | Opcode::Sub
                | Opcode::Mul
                | Opcode::Div
                | Opcode::Rem
                | Opcode::And
                | Opcode::Or
                | Opcode::Xor
                | Opcode::Shl
                | Opcode::Shr
                | Opcode::Ashr,
                InstructionData::Binary { .. },
            ) => true,
            (Opcode::Mv, InstructionData::Mv { .. }) => true,
            (Opcode::Load, InstructionData::Load { .. }) => true,
            (Opcode::Store, InstructionData::Store { .. }) => true,
            (Opcode::Jump, InstructionData::Jump { .. }) => true,
            (
                Opcode::Beq | Opcode::Bne | Opcode::Bgt | Opcode::Blt | Opcode::Bge | Opcode::Ble,
                InstructionData::Branch { .. },
            ) => true,
            (Opcode::Call, InstructionData::Call { .. }) => true,
            (Opcode::Ret, InstructionData::Ret { .. }) => true,
            (Opcode::Alloc, InstructionData::Alloc { count, .. }) => *count >= 1,
            (Opcode::Phi, InstructionData::Phi { inputs, .. }) => inputs.len() >= 2,
            (Opcode::NullCheck, InstructionData::NullCheck { .. }) => true,
            (Opcode::BoundsCheck, InstructionData::BoundsCheck { .. }) => true,
            _ => false,
        }
    }
}
