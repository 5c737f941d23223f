//! Core types for the variable system.

use super::expression::Expression;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The value a variable is bound to.
///
/// Text that parses as arithmetic is an expression over other variables;
/// anything else (`"5mm"`, `"2.4 GHz"`) is a literal quantity resolved through
/// the unit table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VariableValue {
    Expression(Expression),
    Literal(String),
}

impl VariableValue {
    /// Classify raw bound text.
    pub fn classify(text: &str) -> Self {
        match Expression::parse(text) {
            Ok(expr) => Self::Expression(expr),
            Err(_) => Self::Literal(text.trim().to_string()),
        }
    }

    /// Text sent across the store boundary.
    pub fn as_text(&self) -> &str {
        match self {
            Self::Expression(expr) => expr.as_str(),
            Self::Literal(text) => text,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }
}

impl fmt::Display for VariableValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_text())
    }
}

impl From<String> for VariableValue {
    fn from(value: String) -> Self {
        Self::classify(&value)
    }
}

impl From<&str> for VariableValue {
    fn from(value: &str) -> Self {
        Self::classify(value)
    }
}

impl From<VariableValue> for String {
    fn from(value: VariableValue) -> Self {
        value.as_text().to_string()
    }
}

impl From<Expression> for VariableValue {
    fn from(value: Expression) -> Self {
        Self::Expression(value)
    }
}

impl From<&Expression> for VariableValue {
    fn from(value: &Expression) -> Self {
        Self::Expression(value.clone())
    }
}

impl From<f64> for VariableValue {
    fn from(value: f64) -> Self {
        Self::Expression(Expression::literal(value))
    }
}

/// A named variable as seen through a [`VariableStore`](super::VariableStore)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Variable name (case-sensitive, unique within its scope)
    pub name: String,
    /// Bound value
    pub value: VariableValue,
}

impl Variable {
    pub fn new(name: &str, value: impl Into<VariableValue>) -> Self {
        Self {
            name: name.to_string(),
            value: value.into(),
        }
    }

    /// An expression referring to this variable, for use in further algebra.
    pub fn reference(&self) -> Option<Expression> {
        Expression::variable(&self.name).ok()
    }
}
