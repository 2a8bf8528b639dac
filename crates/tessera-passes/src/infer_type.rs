//! Whole-module type inference.
//!
//! Computes the type of every reachable node and stores the result in the
//! module's type table. Nodes are never rebuilt, so identity is preserved
//! across runs and an unchanged module comes back with the same functions.
//!
//! Inference recurses once per nesting level, so expression depth is
//! limited by the native stack.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use smallvec::SmallVec;
use tessera_ir::{
    Call, Callee, Expr, ExprKind, FuncType, Function, GlobalVar, Module, OpRegistry, Type,
    TypeError, TypeTable,
};

use crate::errors::PassResult;
use crate::pass::ModulePass;

/// Reference type inference over operator type relations.
pub struct InferType {
    registry: Arc<OpRegistry>,
}

impl InferType {
    pub fn new(registry: Arc<OpRegistry>) -> Self {
        Self { registry }
    }
}

impl ModulePass for InferType {
    fn name(&self) -> &'static str {
        "InferType"
    }

    fn run(&self, module: Module) -> PassResult<Module> {
        let _span = tracing::debug_span!("infer_type").entered();
        let types = TypeInferencer::new(&self.registry, &module).infer_module()?;
        tracing::trace!(typed = types.len(), "type inference finished");
        Ok(module.with_type_table(types))
    }
}

struct TypeInferencer<'a> {
    registry: &'a OpRegistry,
    module: &'a Module,
    types: TypeTable,
    globals: HashMap<GlobalVar, Type>,
    in_progress: HashSet<GlobalVar>,
}

impl<'a> TypeInferencer<'a> {
    fn new(registry: &'a OpRegistry, module: &'a Module) -> Self {
        Self {
            registry,
            module,
            types: TypeTable::new(),
            globals: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    fn infer_module(mut self) -> Result<TypeTable, TypeError> {
        for gv in self.module.global_vars() {
            self.global_type(gv)?;
        }
        Ok(self.types)
    }

    fn infer(&mut self, expr: &Expr) -> Result<Type, TypeError> {
        if let Some(ty) = self.types.get(expr) {
            return Ok(ty.clone());
        }
        let ty = match expr.kind() {
            // Bound variables are typed when their binder is visited.
            ExprKind::Var(var) => return Err(TypeError::UntypedVar(var.name.to_string())),
            ExprKind::GlobalVar(gv) => self.global_type(*gv)?,
            ExprKind::Constant(value) => Type::Tensor(value.ty()),
            ExprKind::Call(call) => self.infer_call(call)?,
            ExprKind::Function(func) => self.infer_function(func)?,
            ExprKind::Tuple(fields) => Type::Tuple(
                fields
                    .iter()
                    .map(|field| self.infer(field))
                    .collect::<Result<_, _>>()?,
            ),
            ExprKind::TupleGetItem(item) => match self.infer(&item.tuple)? {
                Type::Tuple(mut fields) => {
                    let len = fields.len();
                    if item.index >= len {
                        return Err(TypeError::TupleIndex {
                            index: item.index,
                            len,
                        });
                    }
                    fields.swap_remove(item.index)
                }
                other => return Err(TypeError::mismatch("a tuple", other)),
            },
            ExprKind::Let(binding) => {
                let value = self.infer(&binding.value)?;
                self.bind(&binding.var, value)?;
                self.infer(&binding.body)?
            }
        };
        self.types.insert(expr.clone(), ty.clone());
        Ok(ty)
    }

    /// Record the type of a let-bound variable, checking it against the
    /// declared one.
    fn bind(&mut self, var: &Expr, ty: Type) -> Result<(), TypeError> {
        if let Some(declared) = var.as_var().and_then(|v| v.ty.as_ref())
            && !declared.compatible_with(&ty)
        {
            return Err(TypeError::mismatch(declared, ty));
        }
        self.types.insert(var.clone(), ty);
        Ok(())
    }

    fn infer_call(&mut self, call: &Call) -> Result<Type, TypeError> {
        let arg_types = call
            .args
            .iter()
            .map(|arg| self.infer(arg))
            .collect::<Result<SmallVec<[Type; 4]>, _>>()?;
        match &call.callee {
            Callee::Op(op) => {
                let def = self
                    .registry
                    .def(*op)
                    .ok_or_else(|| TypeError::UnknownOperator(op.to_string()))?;
                if def.arity() != arg_types.len() {
                    return Err(TypeError::Arity {
                        op: op.to_string(),
                        expected: def.arity(),
                        found: arg_types.len(),
                    });
                }
                (def.type_relation())(&arg_types, &call.attrs).map_err(|e| e.in_operator(op))
            }
            Callee::Func(func) => {
                let func_type = match self.infer(func)? {
                    Type::Func(func_type) => func_type,
                    other => return Err(TypeError::NotCallable(other.to_string())),
                };
                if func_type.params.len() != arg_types.len() {
                    return Err(TypeError::Arity {
                        op: func.to_string(),
                        expected: func_type.params.len(),
                        found: arg_types.len(),
                    });
                }
                for (param, arg) in func_type.params.iter().zip(&arg_types) {
                    if !param.compatible_with(arg) {
                        return Err(TypeError::mismatch(param, arg));
                    }
                }
                Ok(*func_type.ret)
            }
        }
    }

    fn infer_function(&mut self, func: &Function) -> Result<Type, TypeError> {
        let mut params = Vec::with_capacity(func.params.len());
        for param in &func.params {
            let ty = declared_param_type(param)?;
            self.types.insert(param.clone(), ty.clone());
            params.push(ty);
        }
        let body = self.infer(&func.body)?;
        if let Some(declared) = &func.ret_type
            && !declared.compatible_with(&body)
        {
            return Err(TypeError::mismatch(declared, body));
        }
        Ok(Type::Func(FuncType {
            params,
            ret: Box::new(body),
            type_params: func.type_params.clone(),
        }))
    }

    fn global_type(&mut self, gv: GlobalVar) -> Result<Type, TypeError> {
        if let Some(ty) = self.globals.get(&gv) {
            return Ok(ty.clone());
        }
        let func = self
            .module
            .get(gv)
            .ok_or_else(|| TypeError::UnboundGlobal(gv.name().to_string()))?;
        if self.in_progress.contains(&gv) {
            // A recursive reference can only use the declared signature.
            return func
                .as_function()
                .and_then(declared_signature)
                .ok_or_else(|| TypeError::UnannotatedRecursion(gv.name().to_string()));
        }
        self.in_progress.insert(gv);
        let ty = self.infer(func);
        self.in_progress.remove(&gv);
        let ty = ty?;
        self.globals.insert(gv, ty.clone());
        Ok(ty)
    }
}

fn declared_param_type(param: &Expr) -> Result<Type, TypeError> {
    let var = param
        .as_var()
        .ok_or_else(|| TypeError::invalid(format_args!("parameter {param} is not a variable")))?;
    var.ty
        .clone()
        .ok_or_else(|| TypeError::UntypedVar(var.name.to_string()))
}

fn declared_signature(func: &Function) -> Option<Type> {
    let params = func
        .params
        .iter()
        .map(|p| p.as_var().and_then(|v| v.ty.clone()))
        .collect::<Option<Vec<_>>>()?;
    Some(Type::Func(FuncType {
        params,
        ret: Box::new(func.ret_type.clone()?),
        type_params: func.type_params.clone(),
    }))
}
