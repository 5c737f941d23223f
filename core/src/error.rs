//! Shared error types.

use thiserror::Error;

use crate::calc::CalcError;
use crate::units::UnitError;
use crate::variables::{EvalError, ParseError, StoreError};

/// A call across the external boundary (solver VM, variable store, property host) failed.
///
/// Boundary failures are propagated unchanged; nothing in this crate retries them.
#[derive(Debug, Error, Clone, PartialEq)]
#[error("{call} failed: {message}")]
pub struct EngineError {
    /// Name of the boundary call, e.g. `CopyNamedExprToStack`
    pub call: String,
    pub message: String,
}

impl EngineError {
    pub fn new(call: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            call: call.into(),
            message: message.into(),
        }
    }
}

/// Result type for boundary calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Top-level error type for the crate.
#[derive(Debug, Error)]
pub enum FormulaError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error(transparent)]
    Calc(#[from] CalcError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}
