pub mod error;
pub mod units;
pub mod naming;
pub mod variables;
pub mod calc;
pub mod property;

pub use calc::{CalcError, CalcResult, CalcStack, CalcVm};
pub use error::{EngineError, EngineResult, FormulaError};
pub use units::{UnitError, UnitTable};
pub use variables::{Evaluator, Expression, VariableBackend, VariableStore};

pub fn version() -> &'static str {
    "0.1.0"
}
