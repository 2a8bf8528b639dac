//! Memoized post-order expression rewriting.
//!
//! [`ExprMutator`] walks an expression DAG bottom-up, visiting each distinct
//! node once (memoized by node identity) and handing it to a [`Rewriter`]
//! after its children have been rewritten. Parents are rebuilt only when a
//! child actually changed, so untouched subtrees keep their identity.
//!
//! The walk uses an explicit work stack, so long chains do not grow the
//! native call stack. This covers the rewrite engine only: the reference
//! [`InferType`](crate::InferType) and the interpreter recurse per node,
//! so a full driver round is bounded by the native stack depth.

use std::collections::HashMap;
use std::convert::Infallible;

use tessera_ir::{ArgVec, Call, Callee, Expr, ExprKind, Function, Let, TupleGetItem};

/// Hooks invoked by [`ExprMutator`].
///
/// `pre` is the original node and `post` the node with rewritten children
/// (the same handle as `pre` when no child changed). The returned node
/// replaces `pre` everywhere it is referenced.
pub trait Rewriter {
    type Error;

    /// Called for every `Call` node.
    fn rewrite_call(&mut self, pre: &Expr, post: Expr) -> Result<Expr, Self::Error> {
        let _ = pre;
        Ok(post)
    }

    /// Called for every other node, leaves included.
    fn rewrite_node(&mut self, pre: &Expr, post: Expr) -> Result<Expr, Self::Error> {
        let _ = pre;
        Ok(post)
    }
}

/// One rewrite traversal. The memo table lives as long as the mutator.
pub struct ExprMutator<'r, R: ?Sized> {
    rewriter: &'r mut R,
    memo: HashMap<Expr, Expr>,
}

impl<'r, R: Rewriter + ?Sized> ExprMutator<'r, R> {
    pub fn new(rewriter: &'r mut R) -> Self {
        Self {
            rewriter,
            memo: HashMap::new(),
        }
    }

    /// Rewrite `root` and everything reachable from it.
    pub fn mutate(mut self, root: &Expr) -> Result<Expr, R::Error> {
        let mut stack: Vec<(Expr, bool)> = vec![(root.clone(), false)];
        while let Some((expr, expanded)) = stack.pop() {
            if self.memo.contains_key(&expr) {
                continue;
            }
            if !expanded {
                let children = expr.children();
                stack.push((expr.clone(), true));
                stack.extend(
                    children
                        .into_iter()
                        .rev()
                        .filter(|child| !self.memo.contains_key(*child))
                        .map(|child| (child.clone(), false)),
                );
                continue;
            }
            let post = self.rebuild(&expr);
            let result = if expr.as_call().is_some() {
                self.rewriter.rewrite_call(&expr, post)?
            } else {
                self.rewriter.rewrite_node(&expr, post)?
            };
            self.memo.insert(expr, result);
        }
        tracing::trace!(visited = self.memo.len(), "mutation pass finished");
        Ok(self.memo.remove(root).unwrap_or_else(|| root.clone()))
    }

    fn lookup(&self, expr: &Expr) -> Expr {
        self.memo.get(expr).cloned().unwrap_or_else(|| expr.clone())
    }

    /// `expr` with its children replaced by their rewritten forms, or
    /// `expr` itself if none of them changed.
    fn rebuild(&self, expr: &Expr) -> Expr {
        match expr.kind() {
            ExprKind::Var(_) | ExprKind::GlobalVar(_) | ExprKind::Constant(_) => expr.clone(),
            ExprKind::Call(call) => {
                let callee = match &call.callee {
                    Callee::Op(op) => Callee::Op(*op),
                    Callee::Func(func) => Callee::Func(self.lookup(func)),
                };
                let args: ArgVec = call.args.iter().map(|arg| self.lookup(arg)).collect();
                let callee_changed = match (&call.callee, &callee) {
                    (Callee::Func(old), Callee::Func(new)) => !old.ptr_eq(new),
                    _ => false,
                };
                if !callee_changed && same_nodes(&call.args, &args) {
                    return expr.clone();
                }
                Expr::new(ExprKind::Call(Call {
                    callee,
                    args,
                    attrs: call.attrs.clone(),
                    type_args: call.type_args.clone(),
                }))
            }
            ExprKind::Function(func) => {
                let body = self.lookup(&func.body);
                if body.ptr_eq(&func.body) {
                    expr.clone()
                } else {
                    Expr::from(Function::with_body(func, body))
                }
            }
            ExprKind::Tuple(fields) => {
                let new_fields: Vec<Expr> = fields.iter().map(|f| self.lookup(f)).collect();
                if same_nodes(fields, &new_fields) {
                    expr.clone()
                } else {
                    Expr::tuple(new_fields)
                }
            }
            ExprKind::TupleGetItem(item) => {
                let tuple = self.lookup(&item.tuple);
                if tuple.ptr_eq(&item.tuple) {
                    expr.clone()
                } else {
                    Expr::new(ExprKind::TupleGetItem(TupleGetItem {
                        tuple,
                        index: item.index,
                    }))
                }
            }
            ExprKind::Let(binding) => {
                let value = self.lookup(&binding.value);
                let body = self.lookup(&binding.body);
                if value.ptr_eq(&binding.value) && body.ptr_eq(&binding.body) {
                    expr.clone()
                } else {
                    Expr::new(ExprKind::Let(Let {
                        var: binding.var.clone(),
                        value,
                        body,
                    }))
                }
            }
        }
    }
}

fn same_nodes(old: &[Expr], new: &[Expr]) -> bool {
    old.len() == new.len() && old.iter().zip(new).all(|(a, b)| a.ptr_eq(b))
}

/// Run one traversal of `rewriter` over `root`.
pub fn mutate<R: Rewriter + ?Sized>(root: &Expr, rewriter: &mut R) -> Result<Expr, R::Error> {
    ExprMutator::new(rewriter).mutate(root)
}

/// [`mutate`] for rewriters that cannot fail.
pub fn mutate_infallible<R>(root: &Expr, rewriter: &mut R) -> Expr
where
    R: Rewriter<Error = Infallible> + ?Sized,
{
    match mutate(root, rewriter) {
        Ok(expr) => expr,
        Err(never) => match never {},
    }
}

/// Replaces one variable with another expression.
pub struct Substitute {
    var: Expr,
    replacement: Expr,
}

impl Substitute {
    pub fn new(var: Expr, replacement: Expr) -> Self {
        Self { var, replacement }
    }
}

impl Rewriter for Substitute {
    type Error = Infallible;

    fn rewrite_node(&mut self, pre: &Expr, post: Expr) -> Result<Expr, Infallible> {
        if *pre == self.var {
            Ok(self.replacement.clone())
        } else {
            Ok(post)
        }
    }
}
