//! The shared shape every IR-to-IR transformation pass implements.

use crate::builder::Module;
use crate::ir::FuncRef;

/// One transformation pass over a single function.
pub trait Pass {
    /// A human-readable label, used in logging only.
    fn name(&self) -> &str;

    fn run(&self, module: &mut Module, func: FuncRef);
}
