//! Back-edge detection, reducibility classification and loop-tree
//! construction.

use std::collections::{BTreeSet, HashMap};

use vmir_entity::{PrimaryMap, SecondaryMap};

use crate::builder::Module;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{BlockRef, LoopRef, Marker};

/// One loop: a header, its latches (back-edge sources), its member blocks
/// (excluding blocks that belong to a strictly-inner loop), and its place
/// in the loop forest.
#[derive(Debug, Clone)]
pub struct Loop {
    header: BlockRef,
    latches: BTreeSet<BlockRef>,
    blocks: BTreeSet<BlockRef>,
    reducible: bool,
    outer: Option<LoopRef>,
    inner: BTreeSet<LoopRef>,
}

impl Loop {
    fn new(header: BlockRef) -> Self {
        Self {
            header,
            latches: BTreeSet::new(),
            blocks: BTreeSet::new(),
            reducible: true,
            outer: None,
            inner: BTreeSet::new(),
        }
    }

    pub fn header(&self) -> BlockRef {
        self.header
    }
    pub fn latches(&self) -> &BTreeSet<BlockRef> {
        &self.latches
    }
    pub fn blocks(&self) -> &BTreeSet<BlockRef> {
        &self.blocks
    }
    pub fn is_reducible(&self) -> bool {
        self.reducible
    }
    pub fn outer_loop(&self) -> Option<LoopRef> {
        self.outer
    }
    pub fn inner_loops(&self) -> &BTreeSet<LoopRef> {
        &self.inner
    }
}

/// Builds and owns the loop forest for one function's CFG.
#[derive(Debug, Clone)]
pub struct LoopAnalyzer {
    loops: PrimaryMap<LoopRef, Loop>,
    root: Option<LoopRef>,
}

impl LoopAnalyzer {
    pub fn blocks_loop(&self, module: &Module, block: BlockRef) -> Option<LoopRef> {
        module.block(block).owning_loop()
    }

    pub fn get(&self, l: LoopRef) -> &Loop {
        &self.loops[l]
    }

    pub fn loops(&self) -> impl Iterator<Item = (LoopRef, &Loop)> {
        self.loops.iter()
    }

    pub fn root_loop(&self) -> Option<LoopRef> {
        self.root
    }

    pub fn has_irreducible_loops(&self) -> bool {
        self.loops.iter().any(|(l, data)| Some(l) != self.root && !data.reducible)
    }

    /// Build the loop tree for `cfg`. Builds the dominator tree first if it
    /// hasn't run yet (reducibility is defined in terms of dominance).
    pub fn build(module: &mut Module, cfg: &mut ControlFlowGraph) -> Self {
        if !cfg.dominator_tree_built() {
            cfg.build_dominator_tree(module);
        }

        let mut analyzer = LoopAnalyzer {
            loops: PrimaryMap::new(),
            root: None,
        };

        let entry = match cfg.entry() {
            Some(e) => e,
            None => {
                analyzer.synthesize_root(module, cfg);
                return analyzer;
            }
        };

        let mut header_to_loop: HashMap<BlockRef, LoopRef> = HashMap::new();
        let mut marker: SecondaryMap<BlockRef, Marker> = SecondaryMap::new();
        Self::dfs_black_and_grey(module, entry, &mut marker, &mut analyzer.loops, &mut header_to_loop);

        // Reverse-RPO: headers that appear later in reverse post order tend
        // to be the more deeply nested ones; populate those first so an
        // inner loop already has its members when an outer loop's
        // green-marked search walks into it.
        let mut rpo = crate::flowgraph::Rpo::new();
        rpo.run(module, entry, cfg.blocks().len());
        let mut headers_in_rpo: Vec<BlockRef> = rpo
            .order()
            .iter()
            .copied()
            .filter(|b| header_to_loop.contains_key(b))
            .collect();
        headers_in_rpo.reverse();

        for header in headers_in_rpo {
            let loop_ref = header_to_loop[&header];
            Self::populate_loop(module, &mut analyzer.loops, loop_ref);
        }

        analyzer.synthesize_root(module, cfg);
        analyzer
    }

    /// A frame of the explicit work stack below: `block`'s own successor
    /// list plus how far into it this frame has gotten, so a "recursive"
    /// call into a child can be resumed at the right spot once it returns.
    fn dfs_black_and_grey(
        module: &Module,
        entry: BlockRef,
        marker: &mut SecondaryMap<BlockRef, Marker>,
        loops: &mut PrimaryMap<LoopRef, Loop>,
        header_to_loop: &mut HashMap<BlockRef, LoopRef>,
    ) {
        struct Frame {
            block: BlockRef,
            successors: smallvec::SmallVec<[BlockRef; 2]>,
            next: usize,
        }

        marker[entry].insert(Marker::GREY);
        marker[entry].insert(Marker::BLACK);
        let mut stack = vec![Frame {
            successors: module.block(entry).successors(),
            block: entry,
            next: 0,
        }];

        while let Some(frame) = stack.last_mut() {
            let Some(&succ) = frame.successors.get(frame.next) else {
                marker[frame.block].remove(Marker::GREY);
                stack.pop();
                continue;
            };
            frame.next += 1;
            let block = frame.block;

            if marker[succ].contains(Marker::GREY) {
                let loop_ref = *header_to_loop
                    .entry(succ)
                    .or_insert_with(|| loops.push(Loop::new(succ)));
                loops[loop_ref].latches.insert(block);
                let header_dominates_latch = module.block(succ).is_dominator_of(block);
                loops[loop_ref].reducible = loops[loop_ref].reducible && header_dominates_latch;
            } else if !marker[succ].contains(Marker::BLACK) {
                marker[succ].insert(Marker::GREY);
                marker[succ].insert(Marker::BLACK);
                stack.push(Frame {
                    successors: module.block(succ).successors(),
                    block: succ,
                    next: 0,
                });
            }
        }
    }

    fn populate_loop(module: &mut Module, loops: &mut PrimaryMap<LoopRef, Loop>, loop_ref: LoopRef) {
        let header = loops[loop_ref].header;

        if !loops[loop_ref].reducible {
            let latches = loops[loop_ref].latches.clone();
            loops[loop_ref].blocks.insert(header);
            for l in latches {
                loops[loop_ref].blocks.insert(l);
            }
            for &b in &loops[loop_ref].blocks.clone() {
                module.block_mut(b).set_owning_loop(Some(loop_ref));
            }
            return;
        }

        let latches: Vec<BlockRef> = loops[loop_ref].latches.iter().copied().collect();
        let mut green: SecondaryMap<BlockRef, Marker> = SecondaryMap::new();
        green[header].insert(Marker::GREEN);
        loops[loop_ref].blocks.insert(header);
        // The header is pre-marked so the backward walk below never reaches
        // it through the match arm that would otherwise claim it; claim it
        // here instead, unconditionally, the way it's claimed before the
        // reducible/irreducible branch in the irreducible path above.
        module.block_mut(header).set_owning_loop(Some(loop_ref));

        for latch in latches {
            let mut stack = vec![latch];
            while let Some(block) = stack.pop() {
                if green[block].contains(Marker::GREEN) {
                    continue;
                }
                green[block].insert(Marker::GREEN);

                match module.block(block).owning_loop() {
                    None => {
                        loops[loop_ref].blocks.insert(block);
                        module.block_mut(block).set_owning_loop(Some(loop_ref));
                    }
                    Some(inner) if inner != loop_ref => {
                        let outermost = Self::outermost_ancestor(loops, inner);
                        if outermost != loop_ref && loops[outermost].outer.is_none() {
                            loops[outermost].outer = Some(loop_ref);
                            loops[loop_ref].inner.insert(outermost);
                        }
                    }
                    _ => {}
                }

                for pred in module.block(block).predecessors() {
                    if !green[*pred].contains(Marker::GREEN) {
                        stack.push(*pred);
                    }
                }
            }
        }
    }

    fn outermost_ancestor(loops: &PrimaryMap<LoopRef, Loop>, mut l: LoopRef) -> LoopRef {
        while let Some(outer) = loops[l].outer {
            l = outer;
        }
        l
    }

    fn synthesize_root(&mut self, module: &mut Module, cfg: &ControlFlowGraph) {
        let entry = match cfg.entry() {
            Some(e) => e,
            None => return,
        };
        let root = self.loops.push(Loop::new(entry));
        self.root = Some(root);

        for &b in cfg.blocks() {
            if module.block(b).owning_loop().is_none() {
                self.loops[root].blocks.insert(b);
                module.block_mut(b).set_owning_loop(Some(root));
            }
        }

        let loop_refs: Vec<LoopRef> = self.loops.keys().filter(|l| *l != root).collect();
        for l in loop_refs {
            if self.loops[l].outer.is_none() {
                self.loops[l].outer = Some(root);
                self.loops[root].inner.insert(l);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::ValueType;

    /// A→B; B→C,E; C→D; E→D,F; D→G; F→B,H; G→C,I; H→G,I.
    /// Two loops: header B reducible (latch F), header C irreducible (latch G).
    #[test]
    fn mixed_reducible_and_irreducible_loops_are_classified_correctly() {
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
        let h = module.create_block(func, "H");
        let i = module.create_block(func, "I");

        module.jump(a, b);
        module.beq(b, cond, cond, c, e);
        module.jump(c, d);
        module.beq(e, cond, cond, d, f);
        module.jump(d, g);
        module.beq(f, cond, cond, b, h);
        module.beq(g, cond, cond, c, i);
        module.beq(h, cond, cond, g, i);
        module.ret(i, None);

        let mut cfg = ControlFlowGraph::new(&module, func);
        cfg.build_dominator_tree(&mut module);
        let loops = LoopAnalyzer::build(&mut module, &mut cfg);

        assert!(loops.has_irreducible_loops());

        let b_loop = loops.blocks_loop(&module, b).expect("B is a loop header");
        assert_eq!(loops.get(b_loop).header(), b);
        assert!(loops.get(b_loop).is_reducible());
        assert_eq!(loops.get(b_loop).latches(), &BTreeSet::from([f]));

        let c_loop = loops.blocks_loop(&module, c).expect("C is a loop header");
        assert_eq!(loops.get(c_loop).header(), c);
        assert!(!loops.get(c_loop).is_reducible());
        assert_eq!(loops.get(c_loop).latches(), &BTreeSet::from([g]));
    }
}
