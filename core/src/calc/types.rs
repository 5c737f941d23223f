//! Wire-level types for field calculator programs.

use super::CalcError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entity name that makes surface and volume integrals cover every object.
pub const ALL_OBJECTS: &str = "AllObjects";

/// Operation codes understood by the calculator `CalcOp` command.
///
/// The serialized form is the exact text the solver expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Opcode {
    #[serde(rename = "+")]
    Add,
    #[serde(rename = "-")]
    Sub,
    #[serde(rename = "*")]
    Mul,
    #[serde(rename = "/")]
    Div,
    Pow,
    Neg,
    Abs,
    ScalarX,
    ScalarY,
    ScalarZ,
    Real,
    Imag,
    Integrate,
}

impl Opcode {
    pub const ALL: [Opcode; 13] = [
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Pow,
        Opcode::Neg,
        Opcode::Abs,
        Opcode::ScalarX,
        Opcode::ScalarY,
        Opcode::ScalarZ,
        Opcode::Real,
        Opcode::Imag,
        Opcode::Integrate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Opcode::Add => "+",
            Opcode::Sub => "-",
            Opcode::Mul => "*",
            Opcode::Div => "/",
            Opcode::Pow => "Pow",
            Opcode::Neg => "Neg",
            Opcode::Abs => "Abs",
            Opcode::ScalarX => "ScalarX",
            Opcode::ScalarY => "ScalarY",
            Opcode::ScalarZ => "ScalarZ",
            Opcode::Real => "Real",
            Opcode::Imag => "Imag",
            Opcode::Integrate => "Integrate",
        }
    }

    /// Number of stack entries the opcode consumes.
    pub fn arity(&self) -> usize {
        match self {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Pow | Opcode::Integrate => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Opcode {
    type Err = CalcError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Opcode::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| CalcError::UnknownOpcode(s.to_string()))
    }
}

/// Two-operand opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl From<BinaryOp> for Opcode {
    fn from(op: BinaryOp) -> Self {
        match op {
            BinaryOp::Add => Opcode::Add,
            BinaryOp::Sub => Opcode::Sub,
            BinaryOp::Mul => Opcode::Mul,
            BinaryOp::Div => Opcode::Div,
            BinaryOp::Pow => Opcode::Pow,
        }
    }
}

/// One-operand opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Abs,
    ScalarX,
    ScalarY,
    ScalarZ,
    Real,
    Imag,
}

impl From<UnaryOp> for Opcode {
    fn from(op: UnaryOp) -> Self {
        match op {
            UnaryOp::Neg => Opcode::Neg,
            UnaryOp::Abs => Opcode::Abs,
            UnaryOp::ScalarX => Opcode::ScalarX,
            UnaryOp::ScalarY => Opcode::ScalarY,
            UnaryOp::ScalarZ => Opcode::ScalarZ,
            UnaryOp::Real => Opcode::Real,
            UnaryOp::Imag => Opcode::Imag,
        }
    }
}

/// Dimension of the geometry an integral runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum IntegrationKind {
    Line,
    Surf,
    Vol,
}

impl IntegrationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntegrationKind::Line => "Line",
            IntegrationKind::Surf => "Surf",
            IntegrationKind::Vol => "Vol",
        }
    }
}

impl fmt::Display for IntegrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single instruction of a calculator program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "arg")]
pub enum CalcOp {
    PushConstant(f64),
    PushNamed(String),
    PushLine(String),
    PushSurf(String),
    PushVol(String),
    Combine(Opcode),
}

impl CalcOp {
    /// Geometry push for an integral of the given kind.
    pub fn push_geometry(kind: IntegrationKind, entity: impl Into<String>) -> Self {
        let entity = entity.into();
        match kind {
            IntegrationKind::Line => CalcOp::PushLine(entity),
            IntegrationKind::Surf => CalcOp::PushSurf(entity),
            IntegrationKind::Vol => CalcOp::PushVol(entity),
        }
    }

    /// Solver command this op is issued as.
    pub fn command(&self) -> &'static str {
        match self {
            CalcOp::PushConstant(_) => "EnterScalar",
            CalcOp::PushNamed(_) => "CopyNamedExprToStack",
            CalcOp::PushLine(_) => "EnterLine",
            CalcOp::PushSurf(_) => "EnterSurf",
            CalcOp::PushVol(_) => "EnterVol",
            CalcOp::Combine(_) => "CalcOp",
        }
    }
}

impl fmt::Display for CalcOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalcOp::PushConstant(v) => write!(f, "{}({:?})", self.command(), v),
            CalcOp::PushNamed(name)
            | CalcOp::PushLine(name)
            | CalcOp::PushSurf(name)
            | CalcOp::PushVol(name) => write!(f, "{}({})", self.command(), name),
            CalcOp::Combine(op) => write!(f, "{}({})", self.command(), op),
        }
    }
}
