//! Dynamic-to-static operator specialization.
//!
//! Dynamic operators take shape-like parameters as runtime arguments. Once
//! type inference and constant folding have turned such an argument into a
//! constant, the call is rewritten to the static operator with the value
//! moved into its attributes. The driver repeats inference, folding and one
//! rewrite pass until the target function stops changing, because each
//! specialization can expose new constants (a `shape_of` over a now static
//! tensor, for example).

mod rules;

use std::convert::Infallible;
use std::sync::Arc;

use serde::Deserialize;
use tessera_ir::{Expr, GlobalVar, Module, OpRegistry};

pub use self::rules::{
    AttrBuilder, ConstantParamRule, ParamRank, RewriteResult, RuleTable, SpecializationRule,
};
use crate::errors::{PassError, PassResult};
use crate::fold_constant::FoldConstant;
use crate::infer_type::InferType;
use crate::mutator::{Rewriter, mutate_infallible};
use crate::pass::ModulePass;

const DEFAULT_MAX_ROUNDS: usize = 1000;

/// Configuration for [`DynamicToStatic`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DynamicToStaticConfig {
    /// Rounds to run before giving up on convergence.
    /// Default: 1000. Zero also selects the default.
    pub max_rounds: usize,
}

impl Default for DynamicToStaticConfig {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
        }
    }
}

impl DynamicToStaticConfig {
    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn effective_max_rounds(&self) -> usize {
        if self.max_rounds == 0 {
            DEFAULT_MAX_ROUNDS
        } else {
            self.max_rounds
        }
    }
}

/// Result of specializing one function.
#[derive(Debug)]
pub struct DynamicToStaticResult {
    /// The function as bound in the module after the last round.
    pub function: Expr,
    /// Number of rounds performed.
    pub rounds: usize,
    /// Whether the last round left the function unchanged.
    pub converged: bool,
}

/// The convergence driver.
pub struct DynamicToStatic {
    rules: RuleTable,
    type_inference: Box<dyn ModulePass>,
    constant_folding: Box<dyn ModulePass>,
    config: DynamicToStaticConfig,
}

impl DynamicToStatic {
    /// Standard rules and the reference collaborators over `registry`.
    pub fn new(registry: Arc<OpRegistry>) -> PassResult<Self> {
        Ok(Self {
            rules: RuleTable::standard(&registry)?,
            type_inference: Box::new(InferType::new(Arc::clone(&registry))),
            constant_folding: Box::new(FoldConstant::new(registry)),
            config: DynamicToStaticConfig::default(),
        })
    }

    pub fn with_rules(mut self, rules: RuleTable) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_type_inference(mut self, pass: impl ModulePass + 'static) -> Self {
        self.type_inference = Box::new(pass);
        self
    }

    pub fn with_constant_folding(mut self, pass: impl ModulePass + 'static) -> Self {
        self.constant_folding = Box::new(pass);
        self
    }

    pub fn with_config(mut self, config: DynamicToStaticConfig) -> Self {
        self.config = config;
        self
    }

    pub fn rules(&self) -> &RuleTable {
        &self.rules
    }

    pub fn config(&self) -> &DynamicToStaticConfig {
        &self.config
    }

    /// Specialize the function bound to `gv` until it reaches a fixed point
    /// or the round cap.
    ///
    /// `module` is updated in place once per round. Collaborator failures
    /// are returned as is; hitting the round cap is not an error.
    #[tracing::instrument(skip_all, fields(function = %gv))]
    pub fn run(&self, module: &mut Module, gv: GlobalVar) -> PassResult<DynamicToStaticResult> {
        if !module.contains(gv) {
            return Err(gv.into());
        }
        let max_rounds = self.config.effective_max_rounds();
        let mut rounds = 0;
        loop {
            let previous = module.get(gv).cloned().ok_or(gv)?;

            let typed = self.type_inference.run(module.clone())?;
            *module = self.constant_folding.run(typed)?;

            let folded = module.get(gv).cloned().ok_or(gv)?;
            let mut specializer = Specializer::new(&self.rules);
            let current = mutate_infallible(&folded, &mut specializer);
            module.update(gv, current.clone());
            rounds += 1;

            let converged = current.ptr_eq(&previous);
            tracing::debug!(
                round = rounds,
                specialized = specializer.specialized,
                converged,
                "dynamic-to-static round"
            );
            if converged || rounds >= max_rounds {
                tracing::info!(rounds, converged, "dynamic-to-static finished");
                return Ok(DynamicToStaticResult {
                    function: current,
                    rounds,
                    converged,
                });
            }
        }
    }

    /// Specialize `func`, which must be bound in `module`.
    pub fn run_function(
        &self,
        func: &Expr,
        mut module: Module,
    ) -> PassResult<DynamicToStaticResult> {
        let gv = module
            .global_var_of(func)
            .ok_or_else(|| PassError::function_not_found("function is not bound in the module"))?;
        self.run(&mut module, gv)
    }
}

/// One rewrite pass of the rule table.
struct Specializer<'a> {
    rules: &'a RuleTable,
    specialized: usize,
}

impl<'a> Specializer<'a> {
    fn new(rules: &'a RuleTable) -> Self {
        Self {
            rules,
            specialized: 0,
        }
    }
}

impl Rewriter for Specializer<'_> {
    type Error = Infallible;

    fn rewrite_call(&mut self, _pre: &Expr, post: Expr) -> Result<Expr, Infallible> {
        let Some(call) = post.as_call() else {
            return Ok(post);
        };
        match self.rules.apply(call) {
            RewriteResult::Replace(expr) => {
                self.specialized += 1;
                tracing::trace!(%expr, "specialized call");
                Ok(expr)
            }
            RewriteResult::Unchanged => Ok(post),
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use serde::de::value::{Error as DeError, MapDeserializer};
    use tessera_ir::{Attrs, DType, Op, Tensor, Type, ops};

    use super::*;

    fn driver() -> DynamicToStatic {
        DynamicToStatic::new(OpRegistry::global()).unwrap()
    }

    fn op(name: &str) -> Op {
        OpRegistry::global().lookup(name).unwrap()
    }

    /// A folding pass that leaves the module alone.
    struct NoFolding;

    impl ModulePass for NoFolding {
        fn name(&self) -> &'static str {
            "NoFolding"
        }

        fn run(&self, module: Module) -> PassResult<Module> {
            Ok(module)
        }
    }

    #[test]
    fn config_defaults() {
        let config = DynamicToStaticConfig::default();
        assert_eq!(config.max_rounds, 1000);
        assert_eq!(config.clone().with_max_rounds(0).effective_max_rounds(), 1000);
        assert_eq!(config.with_max_rounds(5).effective_max_rounds(), 5);
    }

    #[test]
    fn builders_replace_rules_and_config() {
        let standard = driver();
        assert_eq!(standard.rules().len(), 7);
        assert!(standard.rules().get(op(ops::DYN_TILE)).is_some());
        assert_eq!(standard.config().effective_max_rounds(), 1000);

        let custom = standard
            .with_rules(RuleTable::new())
            .with_config(DynamicToStaticConfig::default().with_max_rounds(4));
        assert!(custom.rules().is_empty());
        assert_eq!(custom.config().effective_max_rounds(), 4);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let empty = MapDeserializer::<_, DeError>::new(std::iter::empty::<(&str, usize)>());
        assert_eq!(DynamicToStaticConfig::deserialize(empty).unwrap().max_rounds, 1000);

        let set = MapDeserializer::<_, DeError>::new([("max_rounds", 12usize)].into_iter());
        assert_eq!(DynamicToStaticConfig::deserialize(set).unwrap().max_rounds, 12);
    }

    #[test]
    fn specializes_tile_then_converges() {
        let x = Expr::var("x", Some(Type::tensor(&[2], DType::Int64)));
        let reps = Expr::constant(Tensor::vector_i64(&[3]));
        let body = Expr::call(op(ops::DYN_TILE), [x.clone(), reps], Attrs::None);
        let mut module = Module::new();
        let gv = module.add("main", Expr::function(vec![x], body, None));

        let result = driver().run(&mut module, gv).unwrap();
        assert!(result.converged);
        assert_eq!(result.rounds, 2);
        assert!(module.get(gv).unwrap().ptr_eq(&result.function));
        assert_snapshot!(result.function.to_string(), @r"
        fn (%x: Tensor[(2,), int64]) {
          tile(%x, reps=[3])
        }
        ");
    }

    #[test]
    fn rules_fire_without_folding_when_params_are_literal() {
        let attrs = tessera_ir::InitOpAttrs {
            shape: None,
            dtype: DType::Float32,
        };
        let shape = Expr::constant(Tensor::vector_i64(&[2, 2]));
        let body = Expr::call(op(ops::DYN_ONES), [shape], attrs);
        let mut module = Module::new();
        let gv = module.add("main", Expr::function(vec![], body, None));

        let result = driver()
            .with_constant_folding(NoFolding)
            .run(&mut module, gv)
            .unwrap();
        assert!(result.converged);
        assert_snapshot!(
            result.function.as_function().unwrap().body.to_string(),
            @"ones(shape=[2, 2], dtype=float32)"
        );
    }

    #[test]
    fn unknown_function_is_an_error() {
        let mut module = Module::new();
        let err = driver()
            .run(&mut module, GlobalVar::new("missing"))
            .unwrap_err();
        assert_eq!(err.to_string(), "Function not found: @missing");

        let x = Expr::var("x", Some(Type::tensor(&[2], DType::Int64)));
        let loose = Expr::function(vec![x.clone()], x, None);
        assert!(driver().run_function(&loose, Module::new()).is_err());
    }

    #[test]
    fn run_function_resolves_by_identity() {
        let x = Expr::var("x", Some(Type::tensor(&[2], DType::Int64)));
        let func = Expr::function(vec![x.clone()], x, None);
        let mut module = Module::new();
        module.add("main", func.clone());

        let result = driver().run_function(&func, module).unwrap();
        assert_eq!(result.rounds, 1);
        assert!(result.converged);
        assert!(result.function.ptr_eq(&func));
    }
}
