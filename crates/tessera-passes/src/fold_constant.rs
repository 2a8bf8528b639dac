//! Whole-module constant folding.

use std::sync::Arc;

use tessera_eval::{Interpreter, Value};
use tessera_ir::{Callee, Expr, ExprKind, Module, Op, OpRegistry, Tensor, ops};

use crate::errors::{PassError, PassResult};
use crate::mutator::{Rewriter, Substitute, mutate, mutate_infallible};
use crate::pass::ModulePass;

/// Reference constant folding.
///
/// Evaluates operator calls whose arguments are all constants, folds
/// `shape_of` over statically shaped inputs, projects fields out of tuple
/// literals and inlines constant `let` bindings. Checked types come from
/// the module's type table, so run [`InferType`](crate::InferType) first to
/// fold `shape_of`.
pub struct FoldConstant {
    registry: Arc<OpRegistry>,
}

impl FoldConstant {
    pub fn new(registry: Arc<OpRegistry>) -> Self {
        Self { registry }
    }
}

impl ModulePass for FoldConstant {
    fn name(&self) -> &'static str {
        "FoldConstant"
    }

    fn run(&self, mut module: Module) -> PassResult<Module> {
        let _span = tracing::debug_span!("fold_constant").entered();
        let mut updates = Vec::new();
        {
            let mut folder = ConstantFolder::new(&self.registry, &module);
            for (gv, func) in module.functions() {
                let folded = mutate(func, &mut folder)?;
                if !folded.ptr_eq(func) {
                    updates.push((gv, folded));
                }
            }
            tracing::trace!(folded = folder.folded, "constant folding finished");
        }
        for (gv, func) in updates {
            module.update(gv, func);
        }
        Ok(module)
    }
}

struct ConstantFolder<'a> {
    registry: &'a OpRegistry,
    module: &'a Module,
    interpreter: Interpreter<'a>,
    shape_of: Option<Op>,
    folded: usize,
}

impl<'a> ConstantFolder<'a> {
    fn new(registry: &'a Arc<OpRegistry>, module: &'a Module) -> Self {
        Self {
            registry,
            module,
            interpreter: Interpreter::new(Arc::clone(registry)),
            shape_of: registry.lookup(ops::SHAPE_OF).ok(),
            folded: 0,
        }
    }

    /// The static shape of `arg`, preferring the rewritten node's type and
    /// falling back to the original's.
    fn static_shape(&self, post: &Expr, pre: Option<&Expr>) -> Option<Vec<usize>> {
        self.module
            .checked_type(post)
            .or_else(|| pre.and_then(|p| self.module.checked_type(p)))
            .and_then(|ty| ty.as_tensor())
            .and_then(|t| t.static_shape())
    }

    fn fold(&mut self, value: Tensor) -> Expr {
        self.folded += 1;
        Expr::constant(value)
    }
}

impl Rewriter for ConstantFolder<'_> {
    type Error = PassError;

    fn rewrite_call(&mut self, pre: &Expr, post: Expr) -> Result<Expr, PassError> {
        let Some(call) = post.as_call() else {
            return Ok(post);
        };
        let Callee::Op(op) = call.callee else {
            return Ok(post);
        };

        if Some(op) == self.shape_of
            && let Some(arg) = call.arg(0)
        {
            let pre_arg = pre.as_call().and_then(|c| c.arg(0));
            if let Some(shape) = self.static_shape(arg, pre_arg) {
                let dims: Vec<i64> = shape.iter().map(|&d| d as i64).collect();
                return Ok(self.fold(Tensor::vector_i64(&dims)));
            }
        }

        // Zero-argument calls such as `zeros()` stay compact.
        if call.args.is_empty() || !call.args.iter().all(Expr::is_constant) {
            return Ok(post);
        }
        let has_kernel = self
            .registry
            .def(op)
            .is_some_and(|def| def.kernel().is_some());
        if !has_kernel {
            return Ok(post);
        }
        let args: Vec<Tensor> = call
            .args
            .iter()
            .filter_map(|arg| arg.as_constant().cloned())
            .collect();
        match self.interpreter.apply_op(op, &call.attrs, &args)? {
            Value::Tensor(value) => {
                tracing::trace!(%op, "folded call");
                Ok(self.fold(value))
            }
            _ => Ok(post),
        }
    }

    fn rewrite_node(&mut self, _pre: &Expr, post: Expr) -> Result<Expr, PassError> {
        match post.kind() {
            ExprKind::TupleGetItem(item) => match item.tuple.kind() {
                ExprKind::Tuple(fields) if item.index < fields.len() => {
                    Ok(fields[item.index].clone())
                }
                _ => Ok(post),
            },
            ExprKind::Let(binding) if binding.value.is_constant() => {
                let body = mutate_infallible(
                    &binding.body,
                    &mut Substitute::new(binding.var.clone(), binding.value.clone()),
                );
                // Substitution can expose new all-constant calls.
                mutate(&body, self)
            }
            _ => Ok(post),
        }
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_snapshot;
    use tessera_ir::{Attrs, DType, Dim, GlobalVar, InitOpAttrs, TensorType, TopKAttrs, Type};

    use super::*;
    use crate::errors::PassErrorKind;
    use crate::infer_type::InferType;

    fn registry() -> Arc<OpRegistry> {
        OpRegistry::global()
    }

    fn op(name: &str) -> Op {
        registry().lookup(name).unwrap()
    }

    fn single(body: Expr, params: Vec<Expr>, ret: Option<Type>) -> (Module, GlobalVar) {
        let mut module = Module::new();
        let gv = module.add("main", Expr::function(params, body, ret));
        (module, gv)
    }

    fn fold(module: Module) -> PassResult<Module> {
        let typed = InferType::new(registry()).run(module)?;
        FoldConstant::new(registry()).run(typed)
    }

    #[test]
    fn evaluates_constant_calls() {
        let a = Expr::constant(Tensor::vector_i64(&[1, 2]));
        let b = Expr::constant(Tensor::vector_i64(&[10, 20]));
        let x = Expr::var("x", Some(Type::tensor(&[2], DType::Int64)));
        let sum = Expr::call(op(ops::ADD), [a, b], Attrs::None);
        let body = Expr::call(op(ops::MULTIPLY), [x.clone(), sum], Attrs::None);
        let (module, gv) = single(body, vec![x], Some(Type::tensor(&[2], DType::Int64)));

        let folded = fold(module).unwrap();
        assert_snapshot!(folded.get(gv).unwrap().to_string(), @r"
        fn (%x: Tensor[(2,), int64]) {
          multiply(%x, [11, 22])
        }
        ");
    }

    #[test]
    fn folds_shape_of_static_input() {
        let x = Expr::var("x", Some(Type::tensor(&[2, 3], DType::Float32)));
        let body = Expr::call(op(ops::SHAPE_OF), [x.clone()], Attrs::None);
        let (module, gv) = single(body, vec![x], None);

        let folded = fold(module).unwrap();
        assert_eq!(folded.get_function(gv).unwrap().body.to_string(), "[2, 3]");
    }

    #[test]
    fn keeps_shape_of_dynamic_input() {
        let ty = Type::Tensor(TensorType::new([Dim::Any, Dim::Known(3)], DType::Float32));
        let x = Expr::var("x", Some(ty));
        let body = Expr::call(op(ops::SHAPE_OF), [x.clone()], Attrs::None);
        let (module, gv) = single(body, vec![x], None);
        let before = module.get(gv).unwrap().clone();

        let folded = fold(module).unwrap();
        assert!(folded.get(gv).unwrap().ptr_eq(&before));
    }

    #[test]
    fn leaves_tuple_results_and_zero_argument_calls() {
        let data = Expr::constant(Tensor::vector_i64(&[3, 1, 2]));
        let topk = Expr::call(
            op(ops::TOPK),
            [data],
            TopKAttrs {
                k: Some(2),
                ..TopKAttrs::default()
            },
        );
        let zeros = Expr::call(
            op(ops::ZEROS),
            Vec::new(),
            InitOpAttrs {
                shape: Some(vec![2]),
                dtype: DType::Int64,
            },
        );
        let body = Expr::tuple([Expr::tuple_get_item(topk, 0), zeros]);
        let (module, gv) = single(body, vec![], None);
        let before = module.get(gv).unwrap().clone();

        let folded = fold(module).unwrap();
        assert!(folded.get(gv).unwrap().ptr_eq(&before));
    }

    #[test]
    fn projects_tuple_literals_and_inlines_constant_lets() {
        let y = Expr::var("y", None);
        let three = Expr::constant(Tensor::scalar_i64(3));
        let pair = Expr::tuple([Expr::constant(Tensor::scalar_i64(1)), three]);
        let doubled = Expr::call(op(ops::ADD), [y.clone(), y.clone()], Attrs::None);
        let body = Expr::let_(y, Expr::tuple_get_item(pair, 1), doubled);
        let (module, gv) = single(body, vec![], None);

        let folded = fold(module).unwrap();
        assert_eq!(folded.get_function(gv).unwrap().body.to_string(), "6");
    }

    #[test]
    fn kernel_failures_surface() {
        let lhs = Expr::constant(Tensor::vector_i64(&[1, 2]));
        let rhs = Expr::constant(Tensor::vector_i64(&[1, 2, 3]));
        let body = Expr::call(op(ops::ADD), [lhs, rhs], Attrs::None);
        let (module, _) = single(body, vec![], None);

        // Skip inference, which would reject the call first.
        let err = FoldConstant::new(registry()).run(module).unwrap_err();
        assert!(matches!(err.kind(), PassErrorKind::Fold(_)), "{err}");
    }
}
