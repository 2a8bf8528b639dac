//! Tessera: iterative dynamic-to-static operator specialization.
//!
//! Dynamic operators such as `dyn.reshape` take their shape parameters as
//! runtime tensors. When type inference and constant folding prove such a
//! parameter constant, the call is rewritten to the static operator with
//! the value baked into its attributes.
//!
//! The IR lives in [`tessera_ir`], the reference interpreter in
//! [`tessera_eval`] and the passes in [`tessera_passes`]; this crate
//! re-exports the common surface and adds the module-level entry point.

pub mod pipeline;

pub use pipeline::{ConvertDynamicToStatic, convert_dynamic_to_static};
pub use tessera_eval::{EvalError, Interpreter, Value};
pub use tessera_ir::{
    Attrs, DType, Dim, Expr, GlobalVar, Module, Op, OpRegistry, Tensor, TensorType, Type, ops,
};
pub use tessera_passes::{
    DynamicToStatic, DynamicToStaticConfig, DynamicToStaticResult, FoldConstant, InferType,
    ModulePass, PassError, PassErrorKind, PassResult, RuleTable,
};
