//! Tree-walking evaluator.
//!
//! Evaluation recurses once per nesting level.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use derive_more::Display;
use tessera_ir::{
    Attrs, Callee, Expr, ExprKind, GlobalVar, KernelError, KernelOutput, Module, Op, OpRegistry,
    Tensor,
};

/// Variable bindings, keyed by the `Var` node.
pub type Environment = HashMap<Expr, Value>;

/// Runtime value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Tensor(Tensor),
    Tuple(Vec<Value>),
    Closure(Closure),
}

/// A function value together with the bindings it captured.
#[derive(Clone, Debug)]
pub struct Closure {
    pub func: Expr,
    pub env: Environment,
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.func == other.func
    }
}

impl Value {
    pub fn as_tensor(&self) -> Option<&Tensor> {
        match self {
            Value::Tensor(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_tensor(self) -> Result<Tensor, EvalError> {
        match self {
            Value::Tensor(t) => Ok(t),
            other => Err(EvalError::NotATensor(other.to_string())),
        }
    }

    fn from_kernel(output: KernelOutput) -> Self {
        match output {
            KernelOutput::Single(t) => Value::Tensor(t),
            KernelOutput::Tuple(parts) => {
                Value::Tuple(parts.into_iter().map(Value::Tensor).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Tensor(t) => write!(f, "{t}"),
            Value::Tuple(fields) => {
                f.write_str("(")?;
                for (i, v) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{v}")?;
                }
                f.write_str(")")
            }
            Value::Closure(_) => f.write_str("<closure>"),
        }
    }
}

/// Evaluation failure.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum EvalError {
    #[display("unbound variable `%{_0}`")]
    UnboundVar(String),

    #[display("unbound global `@{_0}`")]
    UnboundGlobal(String),

    #[display("unknown operator `{_0}`")]
    UnknownOperator(String),

    #[display("operator `{_0}` has no reference kernel")]
    NoKernel(String),

    #[display("`{callee}` expects {expected} arguments, found {found}")]
    Arity {
        callee: String,
        expected: usize,
        found: usize,
    },

    #[display("operator `{op}` failed: {error}")]
    Kernel { op: String, error: KernelError },

    #[display("expected a tensor, found {_0}")]
    NotATensor(String),

    #[display("expected a tuple, found {_0}")]
    NotATuple(String),

    #[display("tuple index {index} is out of range for a tuple of {len} fields")]
    TupleIndex { index: usize, len: usize },

    #[display("cannot call {_0}")]
    NotCallable(String),
}

impl std::error::Error for EvalError {}

/// Reference interpreter.
///
/// Global functions resolve through the attached module; operators run
/// their reference kernels from the registry.
pub struct Interpreter<'m> {
    registry: Arc<OpRegistry>,
    module: Option<&'m Module>,
}

impl<'m> Interpreter<'m> {
    pub fn new(registry: Arc<OpRegistry>) -> Self {
        Self {
            registry,
            module: None,
        }
    }

    pub fn with_module(mut self, module: &'m Module) -> Self {
        self.module = Some(module);
        self
    }

    /// Evaluate a closed expression.
    pub fn eval(&self, expr: &Expr) -> Result<Value, EvalError> {
        self.eval_with(expr, Environment::new())
    }

    /// Evaluate `expr` with free variables bound by `env`.
    pub fn eval_with(&self, expr: &Expr, env: Environment) -> Result<Value, EvalError> {
        Frame::new(self, env).eval(expr)
    }

    /// Apply a function value (a `Function` node, a `GlobalVar` or
    /// anything evaluating to a closure) to arguments.
    pub fn call_function(&self, func: &Expr, args: Vec<Value>) -> Result<Value, EvalError> {
        let callee = self.eval(func)?;
        self.apply(callee, args)
    }

    pub fn call_global(&self, gv: GlobalVar, args: Vec<Value>) -> Result<Value, EvalError> {
        let callee = self.global(gv)?;
        self.apply(callee, args)
    }

    /// Run an operator's reference kernel on tensor arguments.
    pub fn apply_op(&self, op: Op, attrs: &Attrs, args: &[Tensor]) -> Result<Value, EvalError> {
        let def = self
            .registry
            .def(op)
            .ok_or_else(|| EvalError::UnknownOperator(op.to_string()))?;
        if def.arity() != args.len() {
            return Err(EvalError::Arity {
                callee: op.to_string(),
                expected: def.arity(),
                found: args.len(),
            });
        }
        let kernel = def
            .kernel()
            .ok_or_else(|| EvalError::NoKernel(op.to_string()))?;
        tracing::trace!(%op, "applying kernel");
        let output = kernel(args, attrs).map_err(|error| EvalError::Kernel {
            op: op.to_string(),
            error,
        })?;
        Ok(Value::from_kernel(output))
    }

    fn global(&self, gv: GlobalVar) -> Result<Value, EvalError> {
        let func = self
            .module
            .and_then(|m| m.get(gv))
            .ok_or_else(|| EvalError::UnboundGlobal(gv.name().to_string()))?;
        Ok(Value::Closure(Closure {
            func: func.clone(),
            env: Environment::new(),
        }))
    }

    fn apply(&self, callee: Value, args: Vec<Value>) -> Result<Value, EvalError> {
        let closure = match callee {
            Value::Closure(closure) => closure,
            other => return Err(EvalError::NotCallable(other.to_string())),
        };
        let Some(func) = closure.func.as_function() else {
            return Err(EvalError::NotCallable(closure.func.to_string()));
        };
        if func.params.len() != args.len() {
            return Err(EvalError::Arity {
                callee: "function".to_owned(),
                expected: func.params.len(),
                found: args.len(),
            });
        }
        let mut env = closure.env.clone();
        env.extend(func.params.iter().cloned().zip(args));
        Frame::new(self, env).eval(&func.body)
    }
}

/// One activation: the bindings in scope plus a cache of evaluated nodes,
/// so shared sub-expressions are computed once per call.
struct Frame<'a, 'm> {
    interp: &'a Interpreter<'m>,
    env: Environment,
    cache: HashMap<Expr, Value>,
}

impl<'a, 'm> Frame<'a, 'm> {
    fn new(interp: &'a Interpreter<'m>, env: Environment) -> Self {
        Self {
            interp,
            env,
            cache: HashMap::new(),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        if let Some(value) = self.cache.get(expr) {
            return Ok(value.clone());
        }
        let value = self.eval_uncached(expr)?;
        self.cache.insert(expr.clone(), value.clone());
        Ok(value)
    }

    fn eval_uncached(&mut self, expr: &Expr) -> Result<Value, EvalError> {
        match expr.kind() {
            ExprKind::Var(var) => self
                .env
                .get(expr)
                .cloned()
                .ok_or_else(|| EvalError::UnboundVar(var.name.to_string())),
            ExprKind::GlobalVar(gv) => self.interp.global(*gv),
            ExprKind::Constant(t) => Ok(Value::Tensor(t.clone())),
            ExprKind::Call(call) => {
                let args = call
                    .args
                    .iter()
                    .map(|arg| self.eval(arg))
                    .collect::<Result<Vec<_>, _>>()?;
                match &call.callee {
                    Callee::Op(op) => {
                        let tensors = args
                            .into_iter()
                            .map(Value::into_tensor)
                            .collect::<Result<Vec<_>, _>>()?;
                        self.interp.apply_op(*op, &call.attrs, &tensors)
                    }
                    Callee::Func(func) => {
                        let callee = self.eval(func)?;
                        self.interp.apply(callee, args)
                    }
                }
            }
            ExprKind::Function(_) => Ok(Value::Closure(Closure {
                func: expr.clone(),
                env: self.env.clone(),
            })),
            ExprKind::Tuple(fields) => fields
                .iter()
                .map(|field| self.eval(field))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple),
            ExprKind::TupleGetItem(item) => match self.eval(&item.tuple)? {
                Value::Tuple(mut fields) => {
                    let len = fields.len();
                    if item.index >= len {
                        return Err(EvalError::TupleIndex {
                            index: item.index,
                            len,
                        });
                    }
                    Ok(fields.swap_remove(item.index))
                }
                other => Err(EvalError::NotATuple(other.to_string())),
            },
            ExprKind::Let(binding) => {
                let value = self.eval(&binding.value)?;
                self.env.insert(binding.var.clone(), value);
                self.eval(&binding.body)
            }
        }
    }
}
