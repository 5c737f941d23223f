//! Arithmetic parser and canonical serializer for variable expressions.
//!
//! Supports:
//! - Numbers (integers, floats, scientific notation)
//! - Identifiers (`width`, `$project_var`) resolved later against a variable store
//! - Arithmetic operators (+, -, *, /, ^) with unary minus
//! - Parentheses for grouping
//! - Built-in functions (abs, sqrt, exp, ln, log10, sin, cos, tan, asin, acos, atan)
//! - The constant `pi`
//!
//! `Display` on [`Expr`] produces the canonical text: single spaces around binary
//! operators and only the parentheses the grammar needs. Parsing canonical text
//! yields the same tree, so canonicalization is idempotent.

use std::collections::BTreeSet;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

/// Parse error with location info and the text that failed to parse
#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub position: usize,
    pub text: String,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Parse error at position {} in '{}': {}",
            self.position, self.text, self.message
        )
    }
}

impl std::error::Error for ParseError {}

/// Expression AST node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Finite, non-negative numeric literal
    Number(f64),
    /// Free identifier bound in a variable store
    Variable(String),
    /// Built-in constant
    Constant(Constant),
    /// Binary operation
    BinaryOp {
        op: BinaryOperator,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Unary operation (negation)
    UnaryOp {
        op: UnaryOperator,
        operand: Box<Expr>,
    },
    /// Function call
    Call { function: Function, arg: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOperator {
    fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
        }
    }

    fn precedence(self) -> u8 {
        match self {
            Self::Add | Self::Sub => 1,
            Self::Mul | Self::Div => 2,
            Self::Pow => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constant {
    Pi,
}

impl Constant {
    pub fn value(self) -> f64 {
        match self {
            Self::Pi => std::f64::consts::PI,
        }
    }
}

/// Functions callable with `name(arg)` syntax
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Abs,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
}

impl Function {
    pub fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "abs" => Self::Abs,
            "sqrt" => Self::Sqrt,
            "exp" => Self::Exp,
            "ln" => Self::Ln,
            "log10" => Self::Log10,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            _ => return None,
        };
        Some(function)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Abs => "abs",
            Self::Sqrt => "sqrt",
            Self::Exp => "exp",
            Self::Ln => "ln",
            Self::Log10 => "log10",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
        }
    }

    /// IEEE semantics: out-of-domain arguments give NaN rather than an error.
    pub fn apply(self, x: f64) -> f64 {
        match self {
            Self::Abs => x.abs(),
            Self::Sqrt => x.sqrt(),
            Self::Exp => x.exp(),
            Self::Ln => x.ln(),
            Self::Log10 => x.log10(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Asin => x.asin(),
            Self::Acos => x.acos(),
            Self::Atan => x.atan(),
        }
    }
}

const ATOM_PRECEDENCE: u8 = 5;
const UNARY_PRECEDENCE: u8 = 3;

impl Expr {
    /// Build the tree a numeric literal parses to.
    ///
    /// Negative values become a negation of their magnitude and non-finite values
    /// become IEEE divisions, so every literal has a re-parseable textual form.
    pub fn literal(value: f64) -> Expr {
        if value.is_nan() {
            return Expr::binary(BinaryOperator::Div, Expr::Number(0.0), Expr::Number(0.0));
        }
        if value.is_sign_negative() {
            return Expr::negate(Expr::literal(-value));
        }
        if value.is_infinite() {
            return Expr::binary(BinaryOperator::Div, Expr::Number(1.0), Expr::Number(0.0));
        }
        Expr::Number(value)
    }

    pub fn binary(op: BinaryOperator, left: Expr, right: Expr) -> Expr {
        Expr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn negate(operand: Expr) -> Expr {
        Expr::UnaryOp {
            op: UnaryOperator::Neg,
            operand: Box::new(operand),
        }
    }

    pub fn call(function: Function, arg: Expr) -> Expr {
        Expr::Call {
            function,
            arg: Box::new(arg),
        }
    }

    /// Names of all variables referenced by this expression, sorted.
    pub fn free_variables(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_variables(&mut names);
        names
    }

    fn collect_variables(&self, names: &mut BTreeSet<String>) {
        match self {
            Expr::Variable(name) => {
                names.insert(name.clone());
            }
            Expr::Number(_) | Expr::Constant(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_variables(names);
                right.collect_variables(names);
            }
            Expr::UnaryOp { operand, .. } => operand.collect_variables(names),
            Expr::Call { arg, .. } => arg.collect_variables(names),
        }
    }

    fn precedence(&self) -> u8 {
        match self {
            Expr::BinaryOp { op, .. } => op.precedence(),
            Expr::UnaryOp { .. } => UNARY_PRECEDENCE,
            _ => ATOM_PRECEDENCE,
        }
    }

    fn fmt_child(&self, f: &mut fmt::Formatter<'_>, parenthesize: bool) -> fmt::Result {
        if parenthesize {
            write!(f, "({})", self)
        } else {
            write!(f, "{}", self)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Variable(name) => write!(f, "{}", name),
            Expr::Constant(Constant::Pi) => write!(f, "pi"),
            Expr::BinaryOp { op, left, right } => {
                let (left_parens, right_parens) = match op {
                    // The base of a power is a primary; the exponent is a unary.
                    BinaryOperator::Pow => (
                        left.precedence() < ATOM_PRECEDENCE,
                        right.precedence() < UNARY_PRECEDENCE,
                    ),
                    _ => (
                        left.precedence() < op.precedence(),
                        right.precedence() <= op.precedence(),
                    ),
                };
                left.fmt_child(f, left_parens)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_child(f, right_parens)
            }
            Expr::UnaryOp {
                op: UnaryOperator::Neg,
                operand,
            } => {
                write!(f, "-")?;
                operand.fmt_child(f, operand.precedence() < UNARY_PRECEDENCE)
            }
            Expr::Call { function, arg } => write!(f, "{}({})", function.name(), arg),
        }
    }
}

/// Token types
#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Eof,
}

/// Tokenizer
struct Lexer<'a> {
    input: &'a str,
    chars: Peekable<Chars<'a>>,
    position: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().peekable(),
            position: 0,
        }
    }

    fn error(&self, message: String, position: usize) -> ParseError {
        ParseError {
            message,
            position,
            text: self.input.to_string(),
        }
    }

    fn next_token(&mut self) -> Result<Token, ParseError> {
        self.skip_whitespace();

        let pos = self.position;

        let token = match self.chars.peek() {
            None => return Ok(Token::Eof),
            Some(&c) => match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                c if c.is_ascii_digit() || c == '.' => return self.read_number(),
                c if c.is_ascii_alphabetic() || c == '_' || c == '$' => {
                    let name = self.read_identifier();
                    if name == "$" {
                        return Err(self.error("Expected variable name after $".to_string(), pos));
                    }
                    return Ok(Token::Identifier(name));
                }
                _ => {
                    return Err(self.error(format!("Unexpected character: '{}'", c), pos));
                }
            },
        };
        self.advance();
        Ok(token)
    }

    fn advance(&mut self) -> Option<char> {
        self.position += 1;
        self.chars.next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(&c) = self.chars.peek() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    fn read_number(&mut self) -> Result<Token, ParseError> {
        let pos = self.position;
        let mut num_str = String::new();
        let mut has_dot = false;

        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_digit() {
                num_str.push(c);
                self.advance();
            } else if c == '.' && !has_dot {
                has_dot = true;
                num_str.push(c);
                self.advance();
            } else {
                break;
            }
        }

        // Handle scientific notation (e.g., 1e10, 1.5e-3)
        if let Some(&c) = self.chars.peek() {
            if c == 'e' || c == 'E' {
                num_str.push(c);
                self.advance();
                if let Some(&sign) = self.chars.peek() {
                    if sign == '+' || sign == '-' {
                        num_str.push(sign);
                        self.advance();
                    }
                }
                while let Some(&c) = self.chars.peek() {
                    if c.is_ascii_digit() {
                        num_str.push(c);
                        self.advance();
                    } else {
                        break;
                    }
                }
            }
        }

        num_str
            .parse::<f64>()
            .map(Token::Number)
            .map_err(|_| self.error(format!("Invalid number: '{}'", num_str), pos))
    }

    fn read_identifier(&mut self) -> String {
        let mut name = String::new();
        if let Some(&'$') = self.chars.peek() {
            name.push('$');
            self.advance();
        }
        while let Some(&c) = self.chars.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                name.push(c);
                self.advance();
            } else {
                break;
            }
        }
        name
    }
}

/// Deepest tree the parser builds; every level is a recursion in parsing,
/// serialization and evaluation.
pub const MAX_NESTING: usize = 256;

/// Parser for expressions
struct Parser<'a> {
    lexer: Lexer<'a>,
    current: Token,
    /// Depth of the node being built
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Result<Self, ParseError> {
        let mut lexer = Lexer::new(input);
        let current = lexer.next_token()?;
        Ok(Self {
            lexer,
            current,
            depth: 0,
        })
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_NESTING {
            return Err(self.error(format!("Expression nested too deeply (limit {})", MAX_NESTING)));
        }
        Ok(())
    }

    fn ascend(&mut self, levels: usize) {
        self.depth -= levels;
    }

    fn advance(&mut self) -> Result<(), ParseError> {
        self.current = self.lexer.next_token()?;
        Ok(())
    }

    fn error(&self, message: String) -> ParseError {
        self.lexer.error(message, self.lexer.position)
    }

    fn parse(&mut self) -> Result<Expr, ParseError> {
        let expr = self.parse_additive()?;
        if self.current != Token::Eof {
            return Err(self.error(format!(
                "Unexpected token after expression: {:?}",
                self.current
            )));
        }
        Ok(expr)
    }

    // Additive: term (('+' | '-') term)*
    fn parse_additive(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_multiplicative()?;
        let mut chained = 0;

        loop {
            let op = match &self.current {
                Token::Plus => BinaryOperator::Add,
                Token::Minus => BinaryOperator::Sub,
                _ => break,
            };
            // Left-associative chains deepen the tree by one per operator.
            self.descend()?;
            chained += 1;
            self.advance()?;
            let right = self.parse_multiplicative()?;
            left = Expr::binary(op, left, right);
        }

        self.ascend(chained);
        Ok(left)
    }

    // Multiplicative: unary (('*' | '/') unary)*
    fn parse_multiplicative(&mut self) -> Result<Expr, ParseError> {
        let mut left = self.parse_unary()?;
        let mut chained = 0;

        loop {
            let op = match &self.current {
                Token::Star => BinaryOperator::Mul,
                Token::Slash => BinaryOperator::Div,
                _ => break,
            };
            self.descend()?;
            chained += 1;
            self.advance()?;
            let right = self.parse_unary()?;
            left = Expr::binary(op, left, right);
        }

        self.ascend(chained);
        Ok(left)
    }

    // Unary: '-' unary | power
    fn parse_unary(&mut self) -> Result<Expr, ParseError> {
        if self.current == Token::Minus {
            self.descend()?;
            self.advance()?;
            let operand = self.parse_unary()?;
            self.ascend(1);
            Ok(Expr::negate(operand))
        } else {
            self.parse_power()
        }
    }

    // Power: primary ('^' unary)?  (right associative, binds tighter than unary minus)
    fn parse_power(&mut self) -> Result<Expr, ParseError> {
        let base = self.parse_primary()?;

        if self.current == Token::Caret {
            self.descend()?;
            self.advance()?;
            let exp = self.parse_unary()?;
            self.ascend(1);
            Ok(Expr::binary(BinaryOperator::Pow, base, exp))
        } else {
            Ok(base)
        }
    }

    // Primary: number | identifier | constant | function_call | '(' expr ')'
    fn parse_primary(&mut self) -> Result<Expr, ParseError> {
        match &self.current {
            Token::Number(n) => {
                let val = *n;
                self.advance()?;
                Ok(Expr::literal(val))
            }
            Token::Identifier(name) => {
                let name = name.clone();
                self.advance()?;

                if self.current == Token::LParen {
                    let function = Function::from_name(&name)
                        .ok_or_else(|| self.error(format!("Unknown function: '{}'", name)))?;
                    self.descend()?;
                    self.advance()?; // consume '('
                    let arg = self.parse_additive()?;
                    if self.current != Token::RParen {
                        return Err(self.error("Expected ')' after function argument".to_string()));
                    }
                    self.advance()?; // consume ')'
                    self.ascend(1);
                    return Ok(Expr::call(function, arg));
                }

                match name.as_str() {
                    "pi" | "PI" => Ok(Expr::Constant(Constant::Pi)),
                    _ => Ok(Expr::Variable(name)),
                }
            }
            Token::LParen => {
                self.descend()?;
                self.advance()?;
                let expr = self.parse_additive()?;
                if self.current != Token::RParen {
                    return Err(self.error("Expected ')'".to_string()));
                }
                self.advance()?;
                self.ascend(1);
                Ok(expr)
            }
            _ => Err(self.error(format!("Unexpected token: {:?}", self.current))),
        }
    }
}

/// Parse an expression string into an AST
pub fn parse_expression(input: &str) -> Result<Expr, ParseError> {
    if input.trim().is_empty() {
        return Err(ParseError {
            message: "Empty expression".to_string(),
            position: 0,
            text: input.to_string(),
        });
    }
    let mut parser = Parser::new(input)?;
    parser.parse()
}

/// Parse `text` and re-serialize it in canonical form.
pub fn canonicalize(text: &str) -> Result<String, ParseError> {
    Ok(parse_expression(text)?.to_string())
}

#[cfg(test)]
mod parser_tests {
    use super::*;

    fn var(name: &str) -> Expr {
        Expr::Variable(name.to_string())
    }

    #[test]
    fn test_parse_simple_number() {
        let expr = parse_expression("42").unwrap();
        assert_eq!(expr, Expr::Number(42.0));
    }

    #[test]
    fn test_parse_scientific_notation() {
        let expr = parse_expression("1.5e-3").unwrap();
        if let Expr::Number(n) = expr {
            assert!((n - 0.0015).abs() < 1e-10);
        } else {
            panic!("Expected number");
        }
    }

    #[test]
    fn test_parse_identifier() {
        assert_eq!(parse_expression("thickness").unwrap(), var("thickness"));
        assert_eq!(parse_expression("$width").unwrap(), var("$width"));
    }

    #[test]
    fn test_parse_precedence() {
        // 1 + 2 * 3 should parse as 1 + (2 * 3)
        let expr = parse_expression("1 + 2 * 3").unwrap();
        let expected = Expr::binary(
            BinaryOperator::Add,
            Expr::Number(1.0),
            Expr::binary(BinaryOperator::Mul, Expr::Number(2.0), Expr::Number(3.0)),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parse_negated_power() {
        // -x^2 is -(x^2)
        let expr = parse_expression("-x^2").unwrap();
        let expected = Expr::negate(Expr::binary(BinaryOperator::Pow, var("x"), Expr::Number(2.0)));
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parse_power_right_associative() {
        let expr = parse_expression("2 ^ 3 ^ 2").unwrap();
        let expected = Expr::binary(
            BinaryOperator::Pow,
            Expr::Number(2.0),
            Expr::binary(BinaryOperator::Pow, Expr::Number(3.0), Expr::Number(2.0)),
        );
        assert_eq!(expr, expected);
    }

    #[test]
    fn test_parse_function() {
        let expr = parse_expression("abs(x - 1)").unwrap();
        match expr {
            Expr::Call { function, .. } => assert_eq!(function, Function::Abs),
            _ => panic!("Expected function call"),
        }
    }

    #[test]
    fn test_parse_constant_pi() {
        assert_eq!(parse_expression("pi").unwrap(), Expr::Constant(Constant::Pi));
    }

    #[test]
    fn test_parse_empty_error() {
        assert!(parse_expression("").is_err());
    }

    #[test]
    fn test_parse_invalid_token_error() {
        let err = parse_expression("1 $ 2").unwrap_err();
        assert_eq!(err.text, "1 $ 2");
    }

    #[test]
    fn test_parse_missing_paren_error() {
        assert!(parse_expression("(1 + 2").is_err());
    }

    #[test]
    fn test_unknown_function_is_parse_error() {
        let err = parse_expression("mystery(5)").unwrap_err();
        assert!(err.message.contains("mystery"));
    }

    #[test]
    fn test_unit_literal_is_not_arithmetic() {
        assert!(parse_expression("5mm").is_err());
        assert!(parse_expression("2.4 GHz").is_err());
    }

    #[test]
    fn test_canonical_drops_redundant_parens() {
        assert_eq!(canonicalize("((a)) + ((b))").unwrap(), "a + b");
        assert_eq!(canonicalize("(a + b) + c").unwrap(), "a + b + c");
        assert_eq!(canonicalize("(a * b) * (c)").unwrap(), "a * b * c");
        assert_eq!(canonicalize("(2)^(3)").unwrap(), "2 ^ 3");
    }

    #[test]
    fn test_canonical_keeps_required_parens() {
        assert_eq!(canonicalize("a - (b - c)").unwrap(), "a - (b - c)");
        assert_eq!(canonicalize("a / (b * c)").unwrap(), "a / (b * c)");
        assert_eq!(canonicalize("(a + b) * c").unwrap(), "(a + b) * c");
        assert_eq!(canonicalize("(a ^ b) ^ c").unwrap(), "(a ^ b) ^ c");
        assert_eq!(canonicalize("(-a) ^ 2").unwrap(), "(-a) ^ 2");
        assert_eq!(canonicalize("-(a + b)").unwrap(), "-(a + b)");
    }

    #[test]
    fn test_canonical_unary_forms() {
        assert_eq!(canonicalize("-(-(x))").unwrap(), "--x");
        assert_eq!(canonicalize("a - (-b)").unwrap(), "a - -b");
        assert_eq!(canonicalize("x ^ (-2)").unwrap(), "x ^ -2");
        assert_eq!(canonicalize("abs((x))").unwrap(), "abs(x)");
    }

    #[test]
    fn test_canonicalize_is_idempotent() {
        let inputs = [
            "1 + 2 * 3",
            "((w) + (2)) / (h - -1)",
            "-(a) ^ -(b) ^ c",
            "abs(-(x)) * sqrt(y) - pi",
            "$len / 2 - (gap)",
            "1e999 - x",
            "0.1 + 1e-7",
            "(a - b) - (c - (d - e))",
            "(-(-x))^(-(y))",
        ];
        for input in inputs {
            let once = canonicalize(input).unwrap();
            let twice = canonicalize(&once).unwrap();
            assert_eq!(once, twice, "canonical form of '{}' is not stable", input);
            assert_eq!(parse_expression(&once).unwrap(), parse_expression(input).unwrap());
        }
    }

    #[test]
    fn test_literal_forms() {
        assert_eq!(Expr::literal(-2.0).to_string(), "-2");
        assert_eq!(Expr::literal(f64::INFINITY).to_string(), "1 / 0");
        assert_eq!(Expr::literal(f64::NEG_INFINITY).to_string(), "-(1 / 0)");
        assert_eq!(Expr::literal(f64::NAN).to_string(), "0 / 0");
        assert_eq!(Expr::literal(0.25).to_string(), "0.25");
    }

    #[test]
    fn test_deep_nesting_is_rejected() {
        let too_deep = format!("{}1{}", "(".repeat(20_000), ")".repeat(20_000));
        let err = canonicalize(&too_deep).unwrap_err();
        assert!(err.message.contains("nested too deeply"));

        let negations = format!("{}x", "-".repeat(20_000));
        assert!(parse_expression(&negations).is_err());

        let powers = vec!["2"; 20_000].join("^");
        assert!(parse_expression(&powers).is_err());

        let calls = format!("{}x{}", "abs(".repeat(20_000), ")".repeat(20_000));
        assert!(parse_expression(&calls).is_err());

        let long_sum = vec!["x"; 20_000].join(" + ");
        assert!(parse_expression(&long_sum).is_err());
    }

    #[test]
    fn test_nesting_within_limit() {
        let nested = format!("{}a + 1{}", "(".repeat(100), ")".repeat(100));
        assert_eq!(canonicalize(&nested).unwrap(), "a + 1");

        let sum = vec!["x"; 200].join(" + ");
        assert_eq!(canonicalize(&sum).unwrap(), sum);

        let at_limit = format!("{}1{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        assert_eq!(canonicalize(&at_limit).unwrap(), "1");
        let past_limit = format!("({})", at_limit);
        assert!(canonicalize(&past_limit).is_err());
    }

    #[test]
    fn test_free_variables() {
        let expr = parse_expression("b * a + sin(b) - pi").unwrap();
        let names: Vec<_> = expr.free_variables().into_iter().collect();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}
