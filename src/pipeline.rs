//! Module-level dynamic-to-static conversion.
//!
//! [`DynamicToStatic`] specializes one function at a time. This module runs
//! it over every function of a module, the way a function pass would:
//!
//! ```text
//! Module
//!     │
//!     ▼
//! for each function ─► DynamicToStatic::run
//!     │                    │
//!     │                    ├─► InferType     (whole module)
//!     │                    ├─► FoldConstant  (whole module)
//!     │                    └─► specialize    (target function)
//!     ▼
//! Module (dynamic calls with constant parameters now static)
//! ```
//!
//! Functions that hit the round cap are kept in their last state and
//! reported with a warning.

use tessera_ir::{Module, OpRegistry};
use tessera_passes::{DynamicToStatic, DynamicToStaticConfig, ModulePass, PassResult};

/// Runs [`DynamicToStatic`] over every function in a module.
pub struct ConvertDynamicToStatic {
    driver: DynamicToStatic,
}

impl ConvertDynamicToStatic {
    pub fn new(driver: DynamicToStatic) -> Self {
        Self { driver }
    }

    /// The standard driver over the global operator registry.
    pub fn standard(config: DynamicToStaticConfig) -> PassResult<Self> {
        let driver = DynamicToStatic::new(OpRegistry::global())?.with_config(config);
        Ok(Self::new(driver))
    }

    pub fn driver(&self) -> &DynamicToStatic {
        &self.driver
    }
}

impl ModulePass for ConvertDynamicToStatic {
    fn name(&self) -> &'static str {
        "DynamicToStatic"
    }

    fn run(&self, mut module: Module) -> PassResult<Module> {
        let _span = tracing::info_span!("dynamic_to_static", functions = module.len()).entered();
        for gv in module.global_vars() {
            let result = self.driver.run(&mut module, gv)?;
            if !result.converged {
                tracing::warn!(
                    function = %gv,
                    rounds = result.rounds,
                    "dynamic-to-static did not reach a fixed point"
                );
            }
        }
        Ok(module)
    }
}

/// Convert every function in `module` with the default configuration.
pub fn convert_dynamic_to_static(module: Module) -> PassResult<Module> {
    ConvertDynamicToStatic::standard(DynamicToStaticConfig::default())?.run(module)
}
