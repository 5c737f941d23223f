//! Variable expressions and their resolution.
//!
//! Provides:
//! - An arithmetic parser with a canonical serializer
//! - [`Expression`], an immutable formula value with operator overloading
//! - A [`VariableStore`] over an external variable scope
//! - Unit-aware recursive evaluation with explicit cycle detection

pub mod types;
pub mod parser;
pub mod expression;
pub mod store;
pub mod evaluator;


pub use types::{Variable, VariableValue};
pub use parser::{canonicalize, parse_expression, Expr, ParseError};
pub use expression::Expression;
pub use store::{MemoryBackend, StoreError, StoreResult, VariableBackend, VariableStore};
pub use evaluator::{evaluate_numeric, format_quantity, EvalContext, EvalError, Evaluator};
