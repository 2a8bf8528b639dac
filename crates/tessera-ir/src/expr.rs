//! Immutable, shared expression nodes.
//!
//! An [`Expr`] is a reference-counted handle to an [`ExprKind`]. Nodes are
//! never mutated after construction; "editing" builds a new node that reuses
//! the unchanged children of the old one. Equality and hashing compare node
//! identity (the allocation), not structure, so two parents that point to the
//! same child share it and memo tables keyed by `Expr` see it once.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::{Attrs, GlobalVar, Op, Symbol, Tensor, Type, TypeVar};

/// Argument list of a call.
pub type ArgVec = SmallVec<[Expr; 2]>;

/// Handle to an immutable IR node.
#[derive(Clone)]
pub struct Expr(Arc<ExprKind>);

#[derive(Debug)]
pub enum ExprKind {
    Var(Var),
    GlobalVar(GlobalVar),
    Constant(Tensor),
    Call(Call),
    Function(Function),
    Tuple(Vec<Expr>),
    TupleGetItem(TupleGetItem),
    Let(Let),
}

/// A local variable. Its identity is the identity of the enclosing `Expr`.
#[derive(Clone, Debug)]
pub struct Var {
    pub name: Symbol,
    /// Declared type, required on function parameters.
    pub ty: Option<Type>,
}

/// What a call invokes.
#[derive(Clone, Debug)]
pub enum Callee {
    Op(Op),
    /// A function value: a `GlobalVar`, a `Function` literal or a variable
    /// bound to one.
    Func(Expr),
}

#[derive(Clone, Debug)]
pub struct Call {
    pub callee: Callee,
    pub args: ArgVec,
    pub attrs: Attrs,
    pub type_args: Vec<Type>,
}

impl Call {
    /// The invoked operator, if the callee is one.
    pub fn op(&self) -> Option<Op> {
        match self.callee {
            Callee::Op(op) => Some(op),
            Callee::Func(_) => None,
        }
    }

    pub fn arg(&self, index: usize) -> Option<&Expr> {
        self.args.get(index)
    }
}

#[derive(Clone, Debug)]
pub struct Function {
    /// Parameters; each one is a `Var` node.
    pub params: Vec<Expr>,
    pub body: Expr,
    /// Declared return type. Cleared when a rewrite rebuilds the function.
    pub ret_type: Option<Type>,
    pub type_params: Vec<TypeVar>,
    pub attrs: BTreeMap<Symbol, String>,
}

impl Function {
    /// # Panics
    ///
    /// Panics if a parameter is not a `Var` node.
    pub fn new(params: Vec<Expr>, body: Expr) -> Self {
        for param in &params {
            assert!(
                param.as_var().is_some(),
                "function parameter must be a variable, found {param}"
            );
        }
        Self {
            params,
            body,
            ret_type: None,
            type_params: Vec::new(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn with_ret_type(mut self, ret_type: Type) -> Self {
        self.ret_type = Some(ret_type);
        self
    }

    pub fn with_type_params(mut self, type_params: Vec<TypeVar>) -> Self {
        self.type_params = type_params;
        self
    }

    pub fn with_attr(mut self, key: Symbol, value: impl Into<String>) -> Self {
        self.attrs.insert(key, value.into());
        self
    }

    /// Copy of this function with another body. Parameters, type
    /// parameters and attributes are kept; the declared return type is
    /// dropped because the new body may produce a different type.
    pub fn with_body(&self, body: Expr) -> Self {
        Self {
            params: self.params.clone(),
            body,
            ret_type: None,
            type_params: self.type_params.clone(),
            attrs: self.attrs.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TupleGetItem {
    pub tuple: Expr,
    pub index: usize,
}

/// `let var = value; body`
#[derive(Clone, Debug)]
pub struct Let {
    pub var: Expr,
    pub value: Expr,
    pub body: Expr,
}

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Expr(Arc::new(kind))
    }

    pub fn var(name: &str, ty: Option<Type>) -> Self {
        Self::new(ExprKind::Var(Var {
            name: Symbol::from_dynamic(name),
            ty,
        }))
    }

    pub fn global(gv: GlobalVar) -> Self {
        Self::new(ExprKind::GlobalVar(gv))
    }

    pub fn constant(value: Tensor) -> Self {
        Self::new(ExprKind::Constant(value))
    }

    pub fn call(op: Op, args: impl IntoIterator<Item = Expr>, attrs: impl Into<Attrs>) -> Self {
        Self::new(ExprKind::Call(Call {
            callee: Callee::Op(op),
            args: args.into_iter().collect(),
            attrs: attrs.into(),
            type_args: Vec::new(),
        }))
    }

    pub fn call_with_type_args(
        op: Op,
        args: impl IntoIterator<Item = Expr>,
        attrs: impl Into<Attrs>,
        type_args: Vec<Type>,
    ) -> Self {
        Self::new(ExprKind::Call(Call {
            callee: Callee::Op(op),
            args: args.into_iter().collect(),
            attrs: attrs.into(),
            type_args,
        }))
    }

    /// Call a function value.
    pub fn call_func(func: Expr, args: impl IntoIterator<Item = Expr>) -> Self {
        Self::new(ExprKind::Call(Call {
            callee: Callee::Func(func),
            args: args.into_iter().collect(),
            attrs: Attrs::None,
            type_args: Vec::new(),
        }))
    }

    pub fn function(params: Vec<Expr>, body: Expr, ret_type: Option<Type>) -> Self {
        let mut func = Function::new(params, body);
        func.ret_type = ret_type;
        Self::from(func)
    }

    pub fn tuple(fields: impl IntoIterator<Item = Expr>) -> Self {
        Self::new(ExprKind::Tuple(fields.into_iter().collect()))
    }

    pub fn tuple_get_item(tuple: Expr, index: usize) -> Self {
        Self::new(ExprKind::TupleGetItem(TupleGetItem { tuple, index }))
    }

    /// # Panics
    ///
    /// Panics if `var` is not a `Var` node.
    pub fn let_(var: Expr, value: Expr, body: Expr) -> Self {
        assert!(var.as_var().is_some(), "let binder must be a variable");
        Self::new(ExprKind::Let(Let { var, value, body }))
    }

    pub fn kind(&self) -> &ExprKind {
        &self.0
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self.kind() {
            ExprKind::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_global(&self) -> Option<GlobalVar> {
        match self.kind() {
            ExprKind::GlobalVar(gv) => Some(*gv),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Tensor> {
        match self.kind() {
            ExprKind::Constant(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_call(&self) -> Option<&Call> {
        match self.kind() {
            ExprKind::Call(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self.kind() {
            ExprKind::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self.kind(), ExprKind::Constant(_))
    }

    /// Whether both handles point at the same node.
    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Sub-expressions that a rewrite visits, in evaluation order.
    ///
    /// Binders (function parameters, let variables) are not children.
    pub fn children(&self) -> SmallVec<[&Expr; 4]> {
        match self.kind() {
            ExprKind::Var(_) | ExprKind::GlobalVar(_) | ExprKind::Constant(_) => SmallVec::new(),
            ExprKind::Call(call) => {
                let mut children = SmallVec::new();
                if let Callee::Func(func) = &call.callee {
                    children.push(func);
                }
                children.extend(call.args.iter());
                children
            }
            ExprKind::Function(func) => smallvec::smallvec![&func.body],
            ExprKind::Tuple(fields) => fields.iter().collect(),
            ExprKind::TupleGetItem(item) => smallvec::smallvec![&item.tuple],
            ExprKind::Let(binding) => smallvec::smallvec![&binding.value, &binding.body],
        }
    }
}

impl From<Function> for Expr {
    fn from(func: Function) -> Self {
        Expr::new(ExprKind::Function(func))
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Expr {}

impl Hash for Expr {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
