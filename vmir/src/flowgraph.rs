//! Control-flow graph construction and dominator-tree computation.

use std::collections::BTreeSet;

use vmir_entity::SecondaryMap;

use crate::builder::Module;
use crate::ir::{BlockRef, FuncRef, Marker};

/// A depth-first walk over successors (true-successor first, then
/// false-successor), recorded in visitation order.
///
/// Markers are scratch state owned by the traversal itself, not a
/// persistent bit on `BasicBlock` — running two of these back to back (or
/// nesting one inside another, as the dominator-tree builder does) can
/// never see stale marks from a previous walk. Recursion in the original is
/// replaced by an explicit work stack so a pathological, very deep or very
/// wide CFG cannot blow the call stack.
#[derive(Debug, Default)]
pub struct Dfs {
    visited: SecondaryMap<BlockRef, Marker>,
    order: Vec<BlockRef>,
}

impl Dfs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visit every block reachable from `entry`, skipping `ignored` (and
    /// anything only reachable through it).
    pub fn run(&mut self, module: &Module, entry: BlockRef, ignored: Option<BlockRef>) {
        self.visited.clear();
        self.order.clear();
        if Some(entry) == ignored {
            return;
        }
        let mut stack = vec![entry];
        self.visited[entry].insert(Marker::BLACK);
        while let Some(block) = stack.pop() {
            self.order.push(block);
            // Push false then true so true is popped (and thus visited) first,
            // matching the original's true-successor-before-false-successor order.
            let bb = module.block(block);
            if let Some(f) = bb.false_successor() {
                if Some(f) != ignored && !self.visited[f].contains(Marker::BLACK) {
                    self.visited[f].insert(Marker::BLACK);
                    stack.push(f);
                }
            }
            if let Some(t) = bb.true_successor() {
                if Some(t) != ignored && !self.visited[t].contains(Marker::BLACK) {
                    self.visited[t].insert(Marker::BLACK);
                    stack.push(t);
                }
            }
        }
    }

    pub fn visited_blocks(&self) -> &[BlockRef] {
        &self.order
    }

    pub fn is_visited(&self, block: BlockRef) -> bool {
        self.visited[block].contains(Marker::BLACK)
    }
}

/// A depth-first walk whose visitation order, reversed, is a reverse
/// post-order over the CFG.
#[derive(Debug, Default)]
pub struct Rpo {
    order: Vec<BlockRef>,
}

impl Rpo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&mut self, module: &Module, entry: BlockRef, block_count: usize) {
        self.order = vec![entry; block_count];
        let mut visited: SecondaryMap<BlockRef, Marker> = SecondaryMap::new();
        let mut remaining = block_count;
        self.rpo_internal(module, entry, &mut visited, &mut remaining);
    }

    /// A frame for the block currently being visited: `phase` tracks
    /// whether its true-successor, then its false-successor, have already
    /// been pushed, so resuming a "caller" frame after a child completes
    /// picks up exactly where recursion would have returned to.
    fn rpo_internal(
        &mut self,
        module: &Module,
        entry: BlockRef,
        visited: &mut SecondaryMap<BlockRef, Marker>,
        remaining: &mut usize,
    ) {
        struct Frame {
            block: BlockRef,
            phase: u8,
        }

        visited[entry].insert(Marker::BLACK);
        let mut stack = vec![Frame { block: entry, phase: 0 }];

        while let Some(frame) = stack.last_mut() {
            let bb = module.block(frame.block);
            match frame.phase {
                0 => {
                    frame.phase = 1;
                    if let Some(t) = bb.true_successor() {
                        if !visited[t].contains(Marker::BLACK) {
                            visited[t].insert(Marker::BLACK);
                            stack.push(Frame { block: t, phase: 0 });
                        }
                    }
                }
                1 => {
                    frame.phase = 2;
                    if let Some(f) = bb.false_successor() {
                        if !visited[f].contains(Marker::BLACK) {
                            visited[f].insert(Marker::BLACK);
                            stack.push(Frame { block: f, phase: 0 });
                        }
                    }
                }
                _ => {
                    *remaining -= 1;
                    self.order[*remaining] = frame.block;
                    stack.pop();
                }
            }
        }
    }

    pub fn order(&self) -> &[BlockRef] {
        &self.order
    }
}

/// The control-flow graph of one function: its blocks in declaration order
/// plus the entry block, with dominator-tree bookkeeping installed on the
/// blocks themselves once [`ControlFlowGraph::build_dominator_tree`] runs.
#[derive(Debug, Clone)]
pub struct ControlFlowGraph {
    blocks: Vec<BlockRef>,
    entry: Option<BlockRef>,
    dom_tree_built: bool,
}

impl ControlFlowGraph {
    pub fn new(module: &Module, func: FuncRef) -> Self {
        let f = module.func(func);
        Self {
            blocks: f.blocks().to_vec(),
            entry: f.entry(),
            dom_tree_built: false,
        }
    }

    pub fn blocks(&self) -> &[BlockRef] {
        &self.blocks
    }

    pub fn entry(&self) -> Option<BlockRef> {
        self.entry
    }

    pub fn dominator_tree_built(&self) -> bool {
        self.dom_tree_built
    }

    /// The "remove a block and see what becomes unreachable" dominator
    /// algorithm: not Lengauer-Tarjan, but O(V·(V+E)) and simple, which is
    /// plenty for functions with tens of blocks.
    pub fn build_dominator_tree(&mut self, module: &mut Module) {
        let entry = match self.entry {
            Some(e) => e,
            None => {
                self.dom_tree_built = true;
                return;
            }
        };

        let mut dfs = Dfs::new();
        dfs.run(module, entry, None);
        let all_reachable: BTreeSet<BlockRef> = dfs.visited_blocks().iter().copied().collect();
        module.block_mut(entry).dominated_blocks_mut().clear();
        for b in &all_reachable {
            module.block_mut(entry).dominated_blocks_mut().insert(*b);
        }

        for &b in &self.blocks {
            if b == entry {
                continue;
            }
            dfs.run(module, entry, Some(b));
            let reachable_without_b: BTreeSet<BlockRef> =
                dfs.visited_blocks().iter().copied().collect();

            let dominated_by_b: BTreeSet<BlockRef> = all_reachable
                .difference(&reachable_without_b)
                .copied()
                .collect();
            *module.block_mut(b).dominated_blocks_mut() = dominated_by_b;
            module.block_mut(b).dominated_blocks_mut().insert(b);
        }

        for &b in &self.blocks {
            let all_dominated = module.block(b).dominated_blocks().clone();
            let mut imm_dominated = all_dominated.clone();
            imm_dominated.remove(&b);

            for &dominated in &all_dominated {
                if dominated == b {
                    continue;
                }
                let transitively_dominated = module.block(dominated).dominated_blocks().clone();
                for &t in &transitively_dominated {
                    if t != dominated {
                        imm_dominated.remove(&t);
                    }
                }
            }

            for &d in &imm_dominated {
                module.block_mut(d).set_immediate_dominator(Some(b));
            }
        }

        self.dom_tree_built = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueType;

    /// A→B; B→C,F; C→D; F→E,G; E→D; G→D.
    #[test]
    fn seven_block_diamond_matches_expected_idoms() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::Void, &[ValueType::I32]);
        let cond = module.func(func).params()[0];

        let a = module.create_block(func, "A");
        let b = module.create_block(func, "B");
        let c = module.create_block(func, "C");
        let d = module.create_block(func, "D");
        let e = module.create_block(func, "E");
        let f = module.create_block(func, "F");
        let g = module.create_block(func, "G");

        module.jump(a, b);
        module.beq(b, cond, cond, c, f);
        module.jump(c, d);
        module.beq(f, cond, cond, e, g);
        module.jump(e, d);
        module.jump(g, d);
        module.ret(d, None);

        let mut cfg = ControlFlowGraph::new(&module, func);
        cfg.build_dominator_tree(&mut module);

        assert_eq!(module.block(a).immediate_dominator(), None);
        assert_eq!(module.block(b).immediate_dominator(), Some(a));
        assert_eq!(module.block(c).immediate_dominator(), Some(b));
        assert_eq!(module.block(d).immediate_dominator(), Some(b));
        assert_eq!(module.block(e).immediate_dominator(), Some(f));
        assert_eq!(module.block(f).immediate_dominator(), Some(b));
        assert_eq!(module.block(g).immediate_dominator(), Some(f));
    }

    #[test]
    fn rpo_visits_entry_first_and_every_block_once() {
        let mut module = Module::new();
        let func = module.create_function("f", ValueType::Void, &[]);
        let entry = module.create_block(func, "entry");
        let next = module.create_block(func, "next");
        module.jump(entry, next);
        module.ret(next, None);

        let mut rpo = Rpo::new();
        rpo.run(&module, entry, 2);
        assert_eq!(rpo.order(), &[entry, next]);
    }
}
