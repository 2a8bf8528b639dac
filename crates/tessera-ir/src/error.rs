//! Error types shared by the IR, the operator library and its consumers.

use derive_more::Display;

/// Failure while constructing or reading a tensor.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum TensorError {
    #[display("shape {shape:?} holds {expected} elements, but {found} were given")]
    ElementCount {
        shape: Vec<usize>,
        expected: usize,
        found: usize,
    },

    #[display("dtype {dtype} cannot hold {storage} data")]
    StorageMismatch {
        dtype: crate::DType,
        storage: &'static str,
    },
}

impl std::error::Error for TensorError {}

/// Type inference failure.
///
/// Raised by operator type relations and by the module-level inference
/// pass. These are user-facing program errors and are propagated, never
/// swallowed.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum TypeError {
    #[display("operator `{op}` expects {expected} arguments, found {found}")]
    Arity {
        op: String,
        expected: usize,
        found: usize,
    },

    #[display("operator `{op}`: {message}")]
    Operator { op: String, message: String },

    #[display("{_0}")]
    Invalid(String),

    #[display("unknown operator `{_0}`")]
    UnknownOperator(String),

    #[display("unbound global `@{_0}`")]
    UnboundGlobal(String),

    #[display("variable `%{_0}` has no type annotation")]
    UntypedVar(String),

    #[display("function `@{_0}` is recursive and needs declared parameter and return types")]
    UnannotatedRecursion(String),

    #[display("tuple index {index} is out of range for a tuple of {len} fields")]
    TupleIndex { index: usize, len: usize },

    #[display("expected {expected}, found {found}")]
    Mismatch { expected: String, found: String },

    #[display("cannot call a value of type {_0}")]
    NotCallable(String),
}

impl TypeError {
    pub fn invalid(msg: impl std::fmt::Display) -> Self {
        TypeError::Invalid(msg.to_string())
    }

    pub fn mismatch(expected: impl std::fmt::Display, found: impl std::fmt::Display) -> Self {
        TypeError::Mismatch {
            expected: expected.to_string(),
            found: found.to_string(),
        }
    }

    /// Attach the operator name to an error raised inside its type relation.
    pub fn in_operator(self, op: impl std::fmt::Display) -> Self {
        match self {
            TypeError::Invalid(message) => TypeError::Operator {
                op: op.to_string(),
                message,
            },
            other => other,
        }
    }
}

impl std::error::Error for TypeError {}

/// Failure inside a reference kernel.
#[derive(Clone, Debug, Display, PartialEq)]
pub enum KernelError {
    #[display("{_0}")]
    Invalid(String),

    #[display("{_0}")]
    Tensor(TensorError),
}

impl KernelError {
    pub fn invalid(msg: impl std::fmt::Display) -> Self {
        KernelError::Invalid(msg.to_string())
    }
}

impl From<TensorError> for KernelError {
    fn from(error: TensorError) -> Self {
        KernelError::Tensor(error)
    }
}

impl std::error::Error for KernelError {}

/// Registry lookup of an operator name that was never registered.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
#[display("unknown operator `{name}`")]
pub struct UnknownOperator {
    pub name: String,
}

impl std::error::Error for UnknownOperator {}
