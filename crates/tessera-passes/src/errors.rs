//! Error types for module passes.

use derive_more::{Display, From};
use tessera_eval::EvalError;
use tessera_ir::{GlobalVar, TypeError, UnknownOperator};

pub type PassResult<T> = Result<T, PassError>;

#[derive(Clone, Display, Debug, From, PartialEq)]
#[display("{kind}")]
pub struct PassError {
    #[from]
    kind: Box<PassErrorKind>,
}

impl<E> From<E> for PassError
where
    PassErrorKind: From<E>,
{
    fn from(error: E) -> Self {
        PassError {
            kind: Box::new(PassErrorKind::from(error)),
        }
    }
}

impl PassError {
    pub fn function_not_found(name: impl std::fmt::Display) -> Self {
        PassErrorKind::FunctionNotFound(name.to_string()).into()
    }

    pub fn kind(&self) -> &PassErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> PassErrorKind {
        *self.kind
    }
}

#[derive(Clone, Display, Debug, From, PartialEq)]
pub enum PassErrorKind {
    #[display("Type error: {_0}")]
    Type(TypeError),

    #[display("Constant folding failed: {_0}")]
    Fold(EvalError),

    #[display("Function not found: {_0}")]
    #[from(skip)]
    FunctionNotFound(String),

    #[display("Rule table: {_0}")]
    UnknownOperator(UnknownOperator),
}

impl From<GlobalVar> for PassErrorKind {
    fn from(gv: GlobalVar) -> Self {
        PassErrorKind::FunctionNotFound(gv.to_string())
    }
}

impl std::error::Error for PassError {}
