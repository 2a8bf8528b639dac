//! Modules: named functions plus the checked types of their nodes.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use crate::{Expr, Function, Symbol, Type};

/// Name of a module-level function.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GlobalVar(Symbol);

impl GlobalVar {
    pub fn new(name: &str) -> Self {
        GlobalVar(Symbol::from_dynamic(name))
    }

    pub fn name(&self) -> Symbol {
        self.0
    }
}

impl fmt::Display for GlobalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

impl fmt::Debug for GlobalVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalVar(@{})", self.0)
    }
}

/// Checked types keyed by node identity.
pub type TypeTable = HashMap<Expr, Type>;

/// A set of named functions.
///
/// Cloning is cheap: function bodies are shared handles and the type table
/// sits behind an `Arc`. Passes take a module by value and return a new one.
#[derive(Clone, Default)]
pub struct Module {
    functions: BTreeMap<GlobalVar, Expr>,
    types: Arc<TypeTable>,
}

impl Module {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `func` under `name` and return its identifier.
    pub fn add(&mut self, name: &str, func: Expr) -> GlobalVar {
        let gv = GlobalVar::new(name);
        self.update(gv, func);
        gv
    }

    /// Replace (or insert) the function bound to `gv`, leaving every other
    /// entry untouched.
    ///
    /// # Panics
    ///
    /// Panics if `func` is not a `Function` node.
    pub fn update(&mut self, gv: GlobalVar, func: Expr) {
        assert!(
            func.as_function().is_some(),
            "module entry {gv} must be a function"
        );
        self.functions.insert(gv, func);
    }

    pub fn get(&self, gv: GlobalVar) -> Option<&Expr> {
        self.functions.get(&gv)
    }

    pub fn get_function(&self, gv: GlobalVar) -> Option<&Function> {
        self.get(gv).and_then(Expr::as_function)
    }

    pub fn contains(&self, gv: GlobalVar) -> bool {
        self.functions.contains_key(&gv)
    }

    /// Resolve a function name without interning it.
    pub fn lookup(&self, name: &str) -> Option<GlobalVar> {
        Symbol::lookup(name)
            .map(GlobalVar)
            .filter(|gv| self.contains(*gv))
    }

    /// The identifier bound to this exact function node, if any.
    pub fn global_var_of(&self, func: &Expr) -> Option<GlobalVar> {
        self.functions
            .iter()
            .find(|(_, f)| f.ptr_eq(func))
            .map(|(gv, _)| *gv)
    }

    pub fn functions(&self) -> impl Iterator<Item = (GlobalVar, &Expr)> {
        self.functions.iter().map(|(gv, f)| (*gv, f))
    }

    pub fn global_vars(&self) -> Vec<GlobalVar> {
        self.functions.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Same functions with a new type table.
    pub fn with_type_table(self, types: TypeTable) -> Self {
        Self {
            functions: self.functions,
            types: Arc::new(types),
        }
    }

    pub fn type_table(&self) -> &TypeTable {
        &self.types
    }

    /// Type recorded for `expr` by the last inference run.
    ///
    /// Nodes built after that run have no entry.
    pub fn checked_type(&self, expr: &Expr) -> Option<&Type> {
        self.types.get(expr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{DType, Tensor};

    fn identity(dims: &[usize]) -> Expr {
        let x = Expr::var("x", Some(Type::tensor(dims, DType::Float32)));
        Expr::function(vec![x.clone()], x, None)
    }

    #[test]
    fn update_replaces_only_target() {
        let mut module = Module::new();
        let f = module.add("f", identity(&[2]));
        let g = module.add("g", identity(&[3]));
        let g_before = module.get(g).unwrap().clone();

        let replacement = identity(&[4]);
        module.update(f, replacement.clone());

        assert!(module.get(f).unwrap().ptr_eq(&replacement));
        assert!(module.get(g).unwrap().ptr_eq(&g_before));
        assert_eq!(module.len(), 2);
    }

    #[test]
    fn global_var_of_uses_identity() {
        let mut module = Module::new();
        let func = identity(&[2]);
        let f = module.add("main", func.clone());
        assert_eq!(module.global_var_of(&func), Some(f));
        assert_eq!(module.global_var_of(&identity(&[2])), None);
        assert_eq!(module.lookup("main"), Some(f));
        assert_eq!(module.lookup("tessera.module.absent"), None);
    }

    #[test]
    fn type_table_is_replaced_wholesale() {
        let c = Expr::constant(Tensor::scalar_i64(1));
        let mut types = TypeTable::new();
        types.insert(c.clone(), Type::tensor(&[], DType::Int64));

        let module = Module::new().with_type_table(types);
        assert_eq!(
            module.checked_type(&c),
            Some(&Type::tensor(&[], DType::Int64))
        );
        let cleared = module.with_type_table(TypeTable::new());
        assert_eq!(cleared.checked_type(&c), None);
    }

    #[test]
    #[should_panic(expected = "must be a function")]
    fn entries_must_be_functions() {
        let mut module = Module::new();
        module.add("c", Expr::constant(Tensor::scalar_i64(0)));
    }
}
