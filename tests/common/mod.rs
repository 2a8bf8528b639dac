//! Common helpers for integration tests.

use tessera::{Attrs, DType, Expr, GlobalVar, Module, Op, OpRegistry, Type};
use tessera_ir::Tensor;

pub fn op(name: &str) -> Op {
    OpRegistry::global()
        .lookup(name)
        .unwrap_or_else(|e| panic!("{e}"))
}

pub fn var(name: &str, dims: &[usize], dtype: DType) -> Expr {
    Expr::var(name, Some(Type::tensor(dims, dtype)))
}

pub fn shape(values: &[i64]) -> Expr {
    Expr::constant(Tensor::vector_i64(values))
}

pub fn call(name: &str, args: impl IntoIterator<Item = Expr>, attrs: impl Into<Attrs>) -> Expr {
    Expr::call(op(name), args, attrs)
}

/// A module holding a single function `@main`.
pub fn single_function(params: Vec<Expr>, body: Expr, ret: Option<Type>) -> (Module, GlobalVar) {
    let mut module = Module::new();
    let gv = module.add("main", Expr::function(params, body, ret));
    (module, gv)
}

/// Body of the function bound to `gv`, printed.
#[allow(dead_code)]
pub fn body_of(module: &Module, gv: GlobalVar) -> String {
    module
        .get_function(gv)
        .map(|func| func.body.to_string())
        .unwrap_or_else(|| panic!("{gv} is not bound"))
}
