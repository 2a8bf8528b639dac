//! Module-level pass interface.

use tessera_ir::Module;

use crate::errors::PassResult;

/// A whole-module transformation or analysis: module in, module out.
///
/// Passes never mutate their input in place. A pass that changes nothing
/// returns a module whose function nodes are identical to the input's.
pub trait ModulePass {
    fn name(&self) -> &'static str;

    fn run(&self, module: Module) -> PassResult<Module>;
}
