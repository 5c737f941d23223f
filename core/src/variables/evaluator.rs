//! Expression evaluator with variable resolution and unit conversion.
//!
//! Text that parses as arithmetic has each free identifier resolved through the
//! variable store, recursively, in the same target unit. Text that does not parse
//! is a literal quantity and goes through the unit table instead.

use super::parser::{parse_expression, BinaryOperator, Expr, UnaryOperator};
use super::store::{StoreError, VariableBackend, VariableStore};
use crate::error::EngineError;
use crate::units::{UnitError, UnitTable};
use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::debug;

/// Evaluation error
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EvalError {
    /// Reference to an unbound variable
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    /// Variable resolution revisited a name still being resolved
    #[error("Cyclic variable reference: {}", .0.join(" → "))]
    CyclicVariable(Vec<String>),
    #[error(transparent)]
    Unit(#[from] UnitError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl From<StoreError> for EvalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UnknownVariable(name) => Self::UnknownVariable(name),
            StoreError::InvalidName(e) => Self::UnknownVariable(e.text),
            StoreError::Engine(e) => Self::Engine(e),
        }
    }
}

/// Resolves expressions against one variable store and one unit table.
pub struct Evaluator<'a, B> {
    store: &'a VariableStore<B>,
    units: &'a UnitTable,
}

impl<'a, B: VariableBackend> Evaluator<'a, B> {
    pub fn new(store: &'a VariableStore<B>, units: &'a UnitTable) -> Self {
        Self { store, units }
    }

    /// Evaluate `expression` to a magnitude in `target_unit` (`""` for dimensionless).
    pub fn evaluate(&self, expression: &str, target_unit: &str) -> Result<f64, EvalError> {
        debug!(expression, target_unit, "evaluating expression");
        let mut ctx = EvalContext::new(self.store, self.units, target_unit);
        ctx.eval_text(expression)
    }

    /// Evaluate and render as `<float><unit>`, the unit appended verbatim.
    pub fn format(&self, expression: &str, unit: &str) -> Result<String, EvalError> {
        let value = self.evaluate(expression, unit)?;
        Ok(format_quantity(value, unit))
    }

    /// Evaluate every variable in the store, in display order.
    ///
    /// A failing variable does not stop the others; its error is reported in place.
    pub fn evaluate_all(&self, target_unit: &str) -> Result<Vec<(String, Result<f64, EvalError>)>, EvalError> {
        let names = self.store.names()?;
        Ok(names
            .into_iter()
            .map(|name| {
                let result = self.evaluate(&name, target_unit);
                (name, result)
            })
            .collect())
    }
}

/// `5.0` + `mm` → `"5.0mm"`. Floats always carry a decimal point or exponent.
pub fn format_quantity(value: f64, unit: &str) -> String {
    format!("{:?}{}", value, unit)
}

/// Evaluation context for one top-level call
pub struct EvalContext<'a, B> {
    store: &'a VariableStore<B>,
    units: &'a UnitTable,
    target_unit: &'a str,
    /// Track variables being evaluated to detect cycles
    evaluating: HashSet<String>,
    /// Path of variables for error reporting
    eval_path: Vec<String>,
}

impl<'a, B: VariableBackend> EvalContext<'a, B> {
    pub fn new(store: &'a VariableStore<B>, units: &'a UnitTable, target_unit: &'a str) -> Self {
        Self {
            store,
            units,
            target_unit,
            evaluating: HashSet::new(),
            eval_path: Vec::new(),
        }
    }

    fn eval_text(&mut self, text: &str) -> Result<f64, EvalError> {
        let expr = match parse_expression(text) {
            Ok(expr) => expr,
            Err(_) => return Ok(self.units.convert(text, self.target_unit)?),
        };

        let mut bindings = HashMap::new();
        for name in expr.free_variables() {
            let value = self.eval_variable(&name)?;
            bindings.insert(name, value);
        }

        evaluate_numeric(&expr, &bindings)
    }

    /// Evaluate a variable by name in the target unit
    fn eval_variable(&mut self, name: &str) -> Result<f64, EvalError> {
        if self.evaluating.contains(name) {
            self.eval_path.push(name.to_string());
            return Err(EvalError::CyclicVariable(self.eval_path.clone()));
        }

        let raw = self.store.get_raw(name)?;

        self.evaluating.insert(name.to_string());
        self.eval_path.push(name.to_string());

        let result = self.eval_text(&raw);

        self.evaluating.remove(name);
        self.eval_path.pop();

        result
    }
}

/// Evaluate a tree whose free variables are all in `bindings`.
pub fn evaluate_numeric(expr: &Expr, bindings: &HashMap<String, f64>) -> Result<f64, EvalError> {
    match expr {
        Expr::Number(n) => Ok(*n),
        Expr::Variable(name) => bindings
            .get(name)
            .copied()
            .ok_or_else(|| EvalError::UnknownVariable(name.clone())),
        Expr::Constant(c) => Ok(c.value()),
        Expr::BinaryOp { op, left, right } => {
            let l = evaluate_numeric(left, bindings)?;
            let r = evaluate_numeric(right, bindings)?;

            Ok(match op {
                BinaryOperator::Add => l + r,
                BinaryOperator::Sub => l - r,
                BinaryOperator::Mul => l * r,
                BinaryOperator::Div => l / r,
                BinaryOperator::Pow => l.powf(r),
            })
        }
        Expr::UnaryOp {
            op: UnaryOperator::Neg,
            operand,
        } => Ok(-evaluate_numeric(operand, bindings)?),
        Expr::Call { function, arg } => Ok(function.apply(evaluate_numeric(arg, bindings)?)),
    }
}

#[cfg(test)]
mod evaluator_tests {
    use super::*;
    use crate::variables::MemoryBackend;

    fn store(pairs: &[(&str, &str)]) -> VariableStore<MemoryBackend> {
        VariableStore::new(MemoryBackend::with_variables(pairs.iter().copied()))
    }

    fn eval(pairs: &[(&str, &str)], expression: &str, unit: &str) -> Result<f64, EvalError> {
        let store = store(pairs);
        let units = UnitTable::standard();
        Evaluator::new(&store, &units).evaluate(expression, unit)
    }

    #[test]
    fn test_eval_simple() {
        assert!((eval(&[], "2 + 3 * 4", "").unwrap() - 14.0).abs() < 1e-10);
        assert!((eval(&[], "(2 + 3) * 4", "").unwrap() - 20.0).abs() < 1e-10);
    }

    #[test]
    fn test_eval_power_and_negation() {
        assert!((eval(&[], "2 ^ 3", "").unwrap() - 8.0).abs() < 1e-10);
        assert!((eval(&[], "-2 ^ 2", "").unwrap() + 4.0).abs() < 1e-10);
        assert!((eval(&[], "-5 + 10", "").unwrap() - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_eval_variable() {
        assert_eq!(eval(&[("x", "2")], "x*3", "").unwrap(), 6.0);
    }

    #[test]
    fn test_eval_chained_variables() {
        assert_eq!(eval(&[("x", "2"), ("y", "x+1")], "y*y", "").unwrap(), 9.0);
    }

    #[test]
    fn test_eval_literal_with_unit() {
        assert_eq!(eval(&[], "5mm", "mm").unwrap(), 5.0);
        assert_eq!(eval(&[], "5mm", "um").unwrap(), 5000.0);
    }

    #[test]
    fn test_eval_variables_with_units() {
        let pairs = [("w", "2mm"), ("gap", "500um"), ("total", "2 * w + gap")];
        let total = eval(&pairs, "total", "mm").unwrap();
        assert!((total - 4.5).abs() < 1e-10);
    }

    #[test]
    fn test_eval_circular_dependency() {
        let result = eval(&[("a", "b"), ("b", "a")], "a", "");
        match result {
            Err(EvalError::CyclicVariable(path)) => assert_eq!(path, vec!["a", "b", "a"]),
            other => panic!("Expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_eval_self_reference() {
        let result = eval(&[("n", "n + 1")], "n * 2", "");
        assert!(matches!(result, Err(EvalError::CyclicVariable(_))));
    }

    #[test]
    fn test_eval_diamond_is_not_a_cycle() {
        let pairs = [("base", "1"), ("l", "base + 1"), ("r", "base * 3"), ("top", "l + r")];
        assert_eq!(eval(&pairs, "top", "").unwrap(), 5.0);
    }

    #[test]
    fn test_eval_undefined_variable() {
        let result = eval(&[], "undefined * 2", "");
        assert!(matches!(result, Err(EvalError::UnknownVariable(name)) if name == "undefined"));
    }

    #[test]
    fn test_eval_incompatible_unit() {
        let result = eval(&[("f", "2.4GHz")], "f", "mm");
        assert!(matches!(result, Err(EvalError::Unit(UnitError::IncompatibleUnit { .. }))));
    }

    #[test]
    fn test_eval_unknown_unit() {
        let result = eval(&[], "3 cubits", "mm");
        assert!(matches!(result, Err(EvalError::Unit(UnitError::UnknownUnit(_)))));
    }

    #[test]
    fn test_eval_ieee_division() {
        assert_eq!(eval(&[], "1 / 0", "").unwrap(), f64::INFINITY);
        assert!(eval(&[], "0 / 0", "").unwrap().is_nan());
    }

    #[test]
    fn test_eval_functions_and_pi() {
        assert!((eval(&[], "abs(-3)", "").unwrap() - 3.0).abs() < 1e-10);
        assert!((eval(&[], "sqrt(16)", "").unwrap() - 4.0).abs() < 1e-10);
        assert!((eval(&[], "2 * pi", "").unwrap() - 2.0 * std::f64::consts::PI).abs() < 1e-10);
        assert!(eval(&[], "sqrt(-1)", "").unwrap().is_nan());
    }

    #[test]
    fn test_format() {
        let store = store(&[("x", "2.5mm")]);
        let units = UnitTable::standard();
        let evaluator = Evaluator::new(&store, &units);
        assert_eq!(evaluator.format("x * 2", "mm").unwrap(), "5.0mm");
        assert_eq!(evaluator.format("x", "um").unwrap(), "2500.0um");
    }

    #[test]
    fn test_evaluate_all_reports_each_variable() {
        let store = store(&[("good", "5"), ("bad", "missing + 1"), ("derived", "good * 2")]);
        let units = UnitTable::standard();
        let results = Evaluator::new(&store, &units).evaluate_all("").unwrap();

        assert_eq!(results.len(), 3);
        assert_eq!(results[0], ("good".to_string(), Ok(5.0)));
        assert!(matches!(&results[1].1, Err(EvalError::UnknownVariable(n)) if n == "missing"));
        assert_eq!(results[2], ("derived".to_string(), Ok(10.0)));
    }

    #[test]
    fn test_evaluate_numeric_missing_binding() {
        let expr = parse_expression("a + 1").unwrap();
        let result = evaluate_numeric(&expr, &HashMap::new());
        assert!(matches!(result, Err(EvalError::UnknownVariable(_))));
    }
}
