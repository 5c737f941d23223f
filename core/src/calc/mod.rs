//! Field calculator programs.
//!
//! A [`CalcStack`] is an immutable postfix program over field quantities,
//! constants and geometry. Building one has no side effects; the program only
//! touches the solver when it is replayed onto a [`CalcVm`].

pub mod fields;
pub mod machine;
pub mod stack;
pub mod types;


pub use fields::FieldQuantity;
pub use machine::{FieldValue, StackMachine};
pub use stack::CalcStack;
pub use types::*;

use crate::error::{EngineError, EngineResult};
use thiserror::Error;

/// Errors from building or evaluating calculator programs.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CalcError {
    #[error("Unknown calculator opcode: {0}")]
    UnknownOpcode(String),

    #[error("Top of stack is not a number: {0:?}")]
    InvalidTopEntry(Vec<String>),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result type for calculator operations.
pub type CalcResult<T> = Result<T, CalcError>;

/// Command surface of the solver's field calculator.
///
/// Every method is one boundary call. Implementations report failures as
/// [`EngineError`]s; callers propagate them unchanged.
pub trait CalcVm {
    /// Push a real constant.
    fn enter_scalar(&mut self, value: f64) -> EngineResult<()>;

    /// Push a named quantity or a previously saved named expression.
    fn copy_named_expr_to_stack(&mut self, name: &str) -> EngineResult<()>;

    fn enter_line(&mut self, entity: &str) -> EngineResult<()>;

    fn enter_surf(&mut self, entity: &str) -> EngineResult<()>;

    fn enter_vol(&mut self, entity: &str) -> EngineResult<()>;

    /// Pop operands, apply `op`, push the result.
    fn calc_op(&mut self, op: Opcode) -> EngineResult<()>;

    /// Save the top of the stack under `name`.
    fn add_named_expr(&mut self, name: &str) -> EngineResult<()>;

    /// Select the eigenmode / port mode and field phase used for evaluation.
    fn set_mode(&mut self, mode: u32, phase_degrees: i32) -> EngineResult<()>;

    /// Evaluate the top of the stack for `setup`.
    fn clc_eval(&mut self, setup: &str, params: &[String]) -> EngineResult<()>;

    /// Result of the last evaluation as text fields.
    fn get_top_entry_value(&mut self, setup: &str, params: &[String]) -> EngineResult<Vec<String>>;

    /// Setup evaluations run against when none is named.
    fn default_setup_name(&self) -> EngineResult<String>;
}
