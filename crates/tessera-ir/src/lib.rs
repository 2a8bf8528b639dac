//! Tessera IR.
//!
//! A small tensor-program IR built from immutable, shared expression nodes.
//! Functions live in a [`Module`]; operators are interned [`Op`] handles
//! resolved through an [`OpRegistry`] that also holds each operator's type
//! relation and reference kernel.

pub mod attrs;
pub mod error;
pub mod expr;
pub mod module;
pub mod op;
pub mod ops;
pub mod printer;
pub mod symbol;
pub mod tensor;
pub mod types;

pub use attrs::{Attrs, InitOpAttrs, ReshapeAttrs, TileAttrs, TopKAttrs, TopKReturn};
pub use error::{KernelError, TensorError, TypeError, UnknownOperator};
pub use expr::{ArgVec, Call, Callee, Expr, ExprKind, Function, Let, TupleGetItem, Var};
pub use module::{GlobalVar, Module, TypeTable};
pub use op::{Kernel, KernelOutput, Op, OpDef, OpRegistry, TypeRelation};
pub use symbol::Symbol;
pub use tensor::{DType, Shape, Tensor, TensorData};
pub use types::{Dim, Dims, FuncType, TensorType, Type, TypeVar};

// Re-export smallvec for downstream crates building argument lists.
pub use smallvec;
