//! `Function`: a named, typed signature plus its owned basic blocks.

use super::entities::{BlockRef, ValueRef};
use super::types::ValueType;

#[derive(Debug, Clone)]
pub struct Function {
    name: String,
    ret_type: ValueType,
    params: Vec<ValueRef>,
    blocks: Vec<BlockRef>,
    entry: Option<BlockRef>,
}

impl Function {
    pub fn new(name: String, ret_type: ValueType, params: Vec<ValueRef>) -> Self {
        Self {
            name,
            ret_type,
            params,
            blocks: Vec::new(),
            entry: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn return_type(&self) -> ValueType {
        self.ret_type
    }

    pub fn params(&self) -> &[ValueRef] {
        &self.params
    }

    pub fn blocks(&self) -> &[BlockRef] {
        &self.blocks
    }

    pub fn entry(&self) -> Option<BlockRef> {
        self.entry
    }

    pub fn set_entry(&mut self, entry: Option<BlockRef>) {
        self.entry = entry;
    }

    pub fn push_block(&mut self, block: BlockRef) {
        self.blocks.push(block);
        if self.entry.is_none() {
            self.entry = Some(block);
        }
    }

    pub fn remove_block(&mut self, block: BlockRef) {
        self.blocks.retain(|b| *b != block);
        if self.entry == Some(block) {
            self.entry = self.blocks.first().copied();
        }
    }

    /// Whether this function has a designated entry block and every block
    /// reachable from it is still present; the instruction-shape half of
    /// validity lives on `BasicBlock`/`Instruction` since `Function` doesn't
    /// own instruction storage itself.
    pub fn is_valid(&self, entry_has_no_missing_blocks: bool) -> bool {
        self.entry.is_some() && entry_has_no_missing_blocks
    }
}
