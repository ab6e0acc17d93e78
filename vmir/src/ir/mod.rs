//! The IR data model: values, instructions, basic blocks and functions.

pub mod block;
pub mod entities;
pub mod function;
pub mod instructions;
pub mod types;
pub mod value;

pub use block::{BasicBlock, Marker};
pub use entities::{BlockRef, FuncRef, InstRef, LoopRef, ValueRef};
pub use function::Function;
pub use instructions::{Instruction, InstructionData, Opcode, OperandList};
pub use types::ValueType;
pub use value::{ConstValue, LiveInterval, LiveRange, Location, ValueData};
