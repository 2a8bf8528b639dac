//! Module passes over Tessera IR.
//!
//! - [`InferType`] and [`FoldConstant`] are the reference analyses.
//! - [`mutator`] holds the memoized rewrite engine the passes are built on.
//! - [`DynamicToStatic`] interleaves both analyses with the specialization
//!   rule table until the target function reaches a fixed point.

pub mod dynamic_to_static;
pub mod errors;
pub mod fold_constant;
pub mod infer_type;
pub mod mutator;
pub mod pass;

pub use dynamic_to_static::{
    AttrBuilder, ConstantParamRule, DynamicToStatic, DynamicToStaticConfig,
    DynamicToStaticResult, ParamRank, RewriteResult, RuleTable, SpecializationRule,
};
pub use errors::{PassError, PassErrorKind, PassResult};
pub use fold_constant::FoldConstant;
pub use infer_type::InferType;
pub use mutator::{ExprMutator, Rewriter, Substitute, mutate, mutate_infallible};
pub use pass::ModulePass;
