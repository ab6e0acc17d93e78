//! SSA-form intermediate representation, analyses and optimizations for a
//! small procedural virtual machine: typed values and instructions grouped
//! into basic blocks and functions, dominator and loop trees, a linear block
//! order with live-interval analysis, a linear-scan register allocator, and
//! four IR-to-IR transformation passes.

pub mod builder;
pub mod check_elimination;
pub mod constant_folding;
pub mod flowgraph;
pub mod inlining;
pub mod ir;
pub mod liveness;
pub mod loop_analysis;
pub mod pass;
pub mod peepholes;
pub mod regalloc;
pub mod verifier;

pub use builder::Module;
pub use check_elimination::CheckEliminationPass;
pub use constant_folding::ConstantFoldingPass;
pub use flowgraph::ControlFlowGraph;
pub use inlining::StaticInliningPass;
pub use ir::{
    BasicBlock, BlockRef, ConstValue, Function, FuncRef, Instruction, InstructionData, InstRef,
    LiveInterval, LiveRange, Location, LoopRef, Opcode, OperandList, ValueData, ValueRef,
    ValueType,
};
pub use liveness::{LivenessAnalyzer, LivenessError};
pub use loop_analysis::{Loop, LoopAnalyzer};
pub use pass::Pass;
pub use peepholes::PeepholesPass;
pub use regalloc::RegisterAllocator;
