//! Immutable formula values with arithmetic operators.
//!
//! An [`Expression`] holds a parsed tree and its canonical text. Combining two
//! expressions (or an expression and a number) with `+ - * /`, unary `-`,
//! [`Expression::pow`] or [`Expression::abs`] builds a new canonical expression;
//! the operands are never modified.
//!
//! ```
//! use formula_core::variables::Expression;
//!
//! let w = Expression::variable("w").unwrap();
//! let h = Expression::variable("h").unwrap();
//! let corner = (&w - &h) / 2.0;
//! assert_eq!(corner.as_str(), "(w - h) / 2");
//! ```

use super::parser::{parse_expression, BinaryOperator, Expr, Function, ParseError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Expression {
    expr: Expr,
    text: String,
}

impl Expression {
    fn from_expr(expr: Expr) -> Self {
        let text = expr.to_string();
        Self { expr, text }
    }

    /// Parse arbitrary arithmetic text into canonical form.
    pub fn parse(text: &str) -> Result<Self, ParseError> {
        Ok(Self::from_expr(parse_expression(text)?))
    }

    /// An expression consisting of the single identifier `name`.
    pub fn variable(name: &str) -> Result<Self, ParseError> {
        match parse_expression(name)? {
            expr @ Expr::Variable(_) => Ok(Self::from_expr(expr)),
            _ => Err(ParseError {
                message: "Not a variable name".to_string(),
                position: 0,
                text: name.to_string(),
            }),
        }
    }

    pub fn literal(value: f64) -> Self {
        Self::from_expr(Expr::literal(value))
    }

    /// Canonical text of this expression.
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    /// The identifier name if this expression is a bare variable reference.
    pub fn as_variable(&self) -> Option<&str> {
        match &self.expr {
            Expr::Variable(name) => Some(name),
            _ => None,
        }
    }

    pub fn free_variables(&self) -> BTreeSet<String> {
        self.expr.free_variables()
    }

    fn combine(op: BinaryOperator, lhs: &Expression, rhs: &Expression) -> Self {
        Self::from_expr(Expr::binary(op, lhs.expr.clone(), rhs.expr.clone()))
    }

    pub fn pow(&self, exponent: impl Into<Expression>) -> Self {
        Self::combine(BinaryOperator::Pow, self, &exponent.into())
    }

    pub fn abs(&self) -> Self {
        Self::from_expr(Expr::call(Function::Abs, self.expr.clone()))
    }
}

impl fmt::Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl FromStr for Expression {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Expression {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Expression> for String {
    fn from(value: Expression) -> Self {
        value.text
    }
}

impl From<f64> for Expression {
    fn from(value: f64) -> Self {
        Self::literal(value)
    }
}

impl From<i32> for Expression {
    fn from(value: i32) -> Self {
        Self::literal(value as f64)
    }
}

impl From<&Expression> for Expression {
    fn from(value: &Expression) -> Self {
        value.clone()
    }
}

impl Neg for Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        -&self
    }
}

impl Neg for &Expression {
    type Output = Expression;

    fn neg(self) -> Expression {
        Expression::from_expr(Expr::negate(self.expr.clone()))
    }
}

/// Implements a binary operator for every owned/borrowed and numeric operand pairing.
macro_rules! impl_binary_op {
    (@number $trait:ident, $method:ident, $op:expr, $num:ty) => {
        impl $trait<$num> for Expression {
            type Output = Expression;

            fn $method(self, rhs: $num) -> Expression {
                Expression::combine($op, &self, &Expression::from(rhs))
            }
        }

        impl $trait<$num> for &Expression {
            type Output = Expression;

            fn $method(self, rhs: $num) -> Expression {
                Expression::combine($op, self, &Expression::from(rhs))
            }
        }

        impl $trait<Expression> for $num {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                Expression::combine($op, &Expression::from(self), &rhs)
            }
        }

        impl $trait<&Expression> for $num {
            type Output = Expression;

            fn $method(self, rhs: &Expression) -> Expression {
                Expression::combine($op, &Expression::from(self), rhs)
            }
        }
    };
    ($trait:ident, $method:ident, $op:expr) => {
        impl $trait<&Expression> for &Expression {
            type Output = Expression;

            fn $method(self, rhs: &Expression) -> Expression {
                Expression::combine($op, self, rhs)
            }
        }

        impl $trait<Expression> for Expression {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                Expression::combine($op, &self, &rhs)
            }
        }

        impl $trait<&Expression> for Expression {
            type Output = Expression;

            fn $method(self, rhs: &Expression) -> Expression {
                Expression::combine($op, &self, rhs)
            }
        }

        impl $trait<Expression> for &Expression {
            type Output = Expression;

            fn $method(self, rhs: Expression) -> Expression {
                Expression::combine($op, self, &rhs)
            }
        }

        impl_binary_op!(@number $trait, $method, $op, f64);
        impl_binary_op!(@number $trait, $method, $op, i32);
    };
}

impl_binary_op!(Add, add, BinaryOperator::Add);
impl_binary_op!(Sub, sub, BinaryOperator::Sub);
impl_binary_op!(Mul, mul, BinaryOperator::Mul);
impl_binary_op!(Div, div, BinaryOperator::Div);

#[cfg(test)]
mod expression_tests {
    use super::*;

    fn v(name: &str) -> Expression {
        Expression::variable(name).unwrap()
    }

    #[test]
    fn test_parse_is_canonical() {
        let e = Expression::parse("((a)+(b))*(c)").unwrap();
        assert_eq!(e.as_str(), "(a + b) * c");
    }

    #[test]
    fn test_variable_rejects_non_identifier() {
        assert!(Expression::variable("a + b").is_err());
        assert!(Expression::variable("2").is_err());
        assert!(Expression::variable("").is_err());
    }

    #[test]
    fn test_operators_build_canonical_text() {
        let a = v("a");
        let b = v("b");
        assert_eq!((&a + &b).as_str(), "a + b");
        assert_eq!((&a - &b).as_str(), "a - b");
        assert_eq!((&a * &b).as_str(), "a * b");
        assert_eq!((&a / &b).as_str(), "a / b");
        assert_eq!(a.pow(&b).as_str(), "a ^ b");
        assert_eq!((-&a).as_str(), "-a");
        assert_eq!(a.abs().as_str(), "abs(a)");
    }

    #[test]
    fn test_numeric_operands_on_either_side() {
        let w = v("w");
        assert_eq!((&w + 1.5).as_str(), "w + 1.5");
        assert_eq!((2.0 * &w).as_str(), "2 * w");
        assert_eq!((1 - &w).as_str(), "1 - w");
        assert_eq!((&w / -2.0).as_str(), "w / -2");
    }

    #[test]
    fn test_chained_algebra_does_not_accumulate_parens() {
        let x = v("x");
        let mut acc = x.clone();
        for _ in 0..5 {
            acc = acc + &x;
        }
        assert_eq!(acc.as_str(), "x + x + x + x + x + x");
    }

    #[test]
    fn test_grouping_preserved_where_needed() {
        let a = v("a");
        let b = v("b");
        let c = v("c");
        assert_eq!((&a - (&b - &c)).as_str(), "a - (b - c)");
        assert_eq!(((&a + &b) * &c).as_str(), "(a + b) * c");
        assert_eq!((-(&a + &b)).as_str(), "-(a + b)");
        assert_eq!((-&a).pow(2.0).as_str(), "(-a) ^ 2");
    }

    #[test]
    fn test_algebra_closure() {
        let a = Expression::parse("w / 2 - gap").unwrap();
        let b = Expression::parse("-(h ^ 2)").unwrap();
        let results = [
            &a + &b,
            &a - &b,
            &a * &b,
            &a / &b,
            a.pow(&b),
            -&a,
            a.abs(),
        ];
        for r in results {
            let reparsed = Expression::parse(r.as_str()).unwrap();
            assert_eq!(reparsed, r);
        }
    }

    #[test]
    fn test_operands_unchanged() {
        let a = v("a");
        let before = a.clone();
        let _ = &a * 3.0;
        let _ = -&a;
        assert_eq!(a, before);
    }

    #[test]
    fn test_non_finite_literal_reparses() {
        let e = v("x") + f64::INFINITY;
        assert_eq!(e.as_str(), "x + 1 / 0");
        assert_eq!(Expression::parse(e.as_str()).unwrap(), e);
    }

    #[test]
    fn test_serde_as_string() {
        let e = v("a") * 2.0;
        let json = serde_json::to_string(&e).unwrap();
        assert_eq!(json, "\"a * 2\"");
        let back: Expression = serde_json::from_str(&json).unwrap();
        assert_eq!(back, e);
        assert!(serde_json::from_str::<Expression>("\"a +\"").is_err());
    }
}
