//! Tessera reference interpreter.
//!
//! Evaluates expressions to runtime values using the operators' reference
//! kernels. Constant folding uses it to compute constant sub-expressions,
//! and tests use it to check that rewrites preserve results.

pub mod interpreter;

pub use interpreter::{Closure, Environment, EvalError, Interpreter, Value};
