//! Operator identities and the operator registry.
//!
//! An [`Op`] is an interned handle: comparing two ops is a key compare, so
//! rule dispatch never touches strings. Handles are handed out by an
//! [`OpRegistry`], which also owns each operator's type relation and
//! optional reference kernel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::error::{KernelError, TypeError, UnknownOperator};
use crate::{Attrs, Symbol, Tensor, Type};

/// Interned operator identity.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Op(Symbol);

impl Op {
    pub fn name(&self) -> Symbol {
        self.0
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Op({})", self.0)
    }
}

/// Computes a call's result type from its argument types and attributes.
pub type TypeRelation = fn(&[Type], &Attrs) -> Result<Type, TypeError>;

/// Evaluates an operator on concrete tensors.
pub type Kernel = fn(&[Tensor], &Attrs) -> Result<KernelOutput, KernelError>;

/// Result of a kernel invocation.
#[derive(Clone, Debug, PartialEq)]
pub enum KernelOutput {
    Single(Tensor),
    Tuple(Vec<Tensor>),
}

/// Definition of a registered operator.
#[derive(Clone)]
pub struct OpDef {
    name: Symbol,
    arity: usize,
    type_relation: TypeRelation,
    kernel: Option<Kernel>,
}

impl OpDef {
    pub fn new(name: &str, arity: usize, type_relation: TypeRelation) -> Self {
        Self {
            name: Symbol::from_dynamic(name),
            arity,
            type_relation,
            kernel: None,
        }
    }

    pub fn with_kernel(mut self, kernel: Kernel) -> Self {
        self.kernel = Some(kernel);
        self
    }

    pub fn name(&self) -> Symbol {
        self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn type_relation(&self) -> TypeRelation {
        self.type_relation
    }

    pub fn kernel(&self) -> Option<Kernel> {
        self.kernel
    }
}

impl fmt::Debug for OpDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpDef")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("has_kernel", &self.kernel.is_some())
            .finish()
    }
}

static GLOBAL_REGISTRY: LazyLock<Arc<OpRegistry>> =
    LazyLock::new(|| Arc::new(OpRegistry::standard()));

/// Lookup table from operator names to interned handles and definitions.
///
/// Registries are built once and then only read. The process-wide
/// [`OpRegistry::global`] instance holds the standard operator library;
/// callers that need extra operators build their own with
/// [`OpRegistry::standard`] followed by [`OpRegistry::register`].
#[derive(Clone, Debug, Default)]
pub struct OpRegistry {
    defs: HashMap<Op, OpDef>,
}

impl OpRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the standard operator library.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        crate::ops::register_standard(&mut registry);
        registry
    }

    /// Shared, lazily built registry of standard operators.
    pub fn global() -> Arc<OpRegistry> {
        Arc::clone(&GLOBAL_REGISTRY)
    }

    /// Register an operator and return its handle.
    ///
    /// # Panics
    ///
    /// Panics if an operator with the same name is already registered.
    pub fn register(&mut self, def: OpDef) -> Op {
        let op = Op(def.name);
        let previous = self.defs.insert(op, def);
        assert!(previous.is_none(), "operator `{op}` registered twice");
        op
    }

    /// Resolve an operator name to its handle.
    pub fn lookup(&self, name: &str) -> Result<Op, UnknownOperator> {
        Symbol::lookup(name)
            .map(Op)
            .filter(|op| self.defs.contains_key(op))
            .ok_or_else(|| UnknownOperator {
                name: name.to_owned(),
            })
    }

    pub fn def(&self, op: Op) -> Option<&OpDef> {
        self.defs.get(&op)
    }

    pub fn contains(&self, op: Op) -> bool {
        self.defs.contains_key(&op)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }
}
