//! Opaque handles into the arena's dense storage.

use vmir_entity::entity_impl;

/// A reference to a [`ValueData`](super::value::ValueData).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueRef(u32);
entity_impl!(ValueRef, "v");

/// A reference to an [`InstructionData`](super::instructions::InstructionData).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstRef(u32);
entity_impl!(InstRef, "inst");

/// A reference to a [`BasicBlock`](super::block::BasicBlock).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockRef(u32);
entity_impl!(BlockRef, "bb");

/// A reference to a [`Function`](super::function::Function).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FuncRef(u32);
entity_impl!(FuncRef, "fn");

/// A reference to a [`Loop`](crate::loop_analysis::Loop).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopRef(u32);
entity_impl!(LoopRef, "loop");
