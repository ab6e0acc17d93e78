//! `BasicBlock`: an ordered run of instructions ending in one terminator.

use std::collections::BTreeSet;

use super::entities::{BlockRef, FuncRef, InstRef, LoopRef};
use super::value::LiveRange;

/// Traversal scratch state.
///
/// The original keeps these as persistent bits on `BasicBlock` itself
/// (`SetMarked`/`IsMarked`, a `Marker` enum of `Black`/`Grey`/`Green`). That
/// invites one traversal's leftover marks to corrupt an unrelated one run
/// later. This crate keeps the same three-color vocabulary but treats it as
/// a value every traversal owns and clears itself (see `flowgraph::Dfs`,
/// `loop_analysis`, `liveness`), rather than a field every block carries
/// around for its whole lifetime. `Marker` itself stays as a small bitset so
/// "Grey and not yet Black" (live during a recursive descent) is expressible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Marker(u8);

impl Marker {
    pub const NONE: Marker = Marker(0);
    pub const BLACK: Marker = Marker(1);
    pub const GREY: Marker = Marker(2);
    pub const GREEN: Marker = Marker(4);

    pub fn contains(self, other: Marker) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Marker) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Marker) {
        self.0 &= !other.0;
    }
}

/// A basic block: parent function, intrusive doubly-linked instruction list,
/// CFG edges, dominance bookkeeping and the loop it belongs to.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    name: String,
    parent: Option<FuncRef>,

    head: Option<InstRef>,
    tail: Option<InstRef>,
    size: usize,

    predecessors: BTreeSet<BlockRef>,
    true_successor: Option<BlockRef>,
    false_successor: Option<BlockRef>,

    idom: Option<BlockRef>,
    dominated: BTreeSet<BlockRef>,

    owning_loop: Option<LoopRef>,
    live_range: LiveRange,
}

impl BasicBlock {
    pub fn new(name: String) -> Self {
        Self {
            name,
            parent: None,
            head: None,
            tail: None,
            size: 0,
            predecessors: BTreeSet::new(),
            true_successor: None,
            false_successor: None,
            idom: None,
            dominated: BTreeSet::new(),
            owning_loop: None,
            live_range: LiveRange::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<FuncRef> {
        self.parent
    }

    pub fn set_parent(&mut self, parent: Option<FuncRef>) {
        self.parent = parent;
    }

    pub fn front(&self) -> Option<InstRef> {
        self.head
    }

    pub fn back(&self) -> Option<InstRef> {
        self.tail
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Raw intrusive-list bookkeeping; only `Module` (which owns the
    /// `Instruction` arena and can fix up `prev`/`next`) should call these.
    pub(crate) fn set_head(&mut self, head: Option<InstRef>) {
        self.head = head;
    }
    pub(crate) fn set_tail(&mut self, tail: Option<InstRef>) {
        self.tail = tail;
    }
    pub(crate) fn set_len(&mut self, len: usize) {
        self.size = len;
    }
    pub(crate) fn inc_len(&mut self) {
        self.size += 1;
    }
    pub(crate) fn dec_len(&mut self) {
        self.size -= 1;
    }

    pub fn predecessors(&self) -> &BTreeSet<BlockRef> {
        &self.predecessors
    }

    pub fn add_predecessor(&mut self, pred: BlockRef) {
        self.predecessors.insert(pred);
    }

    pub fn remove_predecessor(&mut self, pred: BlockRef) {
        self.predecessors.remove(&pred);
    }

    pub fn true_successor(&self) -> Option<BlockRef> {
        self.true_successor
    }

    pub fn set_true_successor(&mut self, target: Option<BlockRef>) {
        self.true_successor = target;
    }

    pub fn false_successor(&self) -> Option<BlockRef> {
        self.false_successor
    }

    pub fn set_false_successor(&mut self, target: Option<BlockRef>) {
        self.false_successor = target;
    }

    /// True-successor first, then false-successor: the order every
    /// traversal in this crate walks successors in.
    pub fn successors(&self) -> smallvec::SmallVec<[BlockRef; 2]> {
        let mut out = smallvec::SmallVec::new();
        if let Some(t) = self.true_successor {
            out.push(t);
        }
        if let Some(f) = self.false_successor {
            out.push(f);
        }
        out
    }

    pub fn immediate_dominator(&self) -> Option<BlockRef> {
        self.idom
    }

    pub fn set_immediate_dominator(&mut self, idom: Option<BlockRef>) {
        self.idom = idom;
    }

    pub fn dominated_blocks(&self) -> &BTreeSet<BlockRef> {
        &self.dominated
    }

    pub fn dominated_blocks_mut(&mut self) -> &mut BTreeSet<BlockRef> {
        &mut self.dominated
    }

    /// `self` dominates `other` iff `other` is in `self`'s dominated set
    /// (every block dominates itself; the dominated set includes self).
    pub fn is_dominator_of(&self, other: BlockRef) -> bool {
        self.dominated.contains(&other)
    }

    pub fn owning_loop(&self) -> Option<LoopRef> {
        self.owning_loop
    }

    pub fn set_owning_loop(&mut self, l: Option<LoopRef>) {
        self.owning_loop = l;
    }

    pub fn live_range(&self) -> LiveRange {
        self.live_range
    }

    pub fn live_range_mut(&mut self) -> &mut LiveRange {
        &mut self.live_range
    }

    /// Last instruction is a terminator and every Phi precedes every
    /// non-Phi; checked by the caller walking the instruction list, since a
    /// `BasicBlock` alone doesn't own `Instruction` storage.
    pub fn is_valid_shape(&self, instructions_are_terminated_and_ordered: bool) -> bool {
        instructions_are_terminated_and_ordered
    }
}
