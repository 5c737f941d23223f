//! Immutable postfix programs for the field calculator.

use super::fields::FieldQuantity;
use super::types::{BinaryOp, CalcOp, IntegrationKind, Opcode, UnaryOp, ALL_OBJECTS};
use super::{CalcError, CalcResult, CalcVm};
use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::ops::{Add, Div, Mul, Neg, Sub};
use tracing::{debug, trace, warn};

/// A calculator program.
///
/// Combinators never mutate their inputs; each returns a new program whose ops
/// are the operands' ops in order followed by the combining op. Nothing is
/// simplified, so `-(-x)` replays as two `Neg`s.
///
/// ```
/// use formula_core::calc::{CalcOp, CalcStack, Opcode};
///
/// let sum = CalcStack::from_constant(2.0) + CalcStack::from_constant(3.0);
/// assert_eq!(
///     sum.program(),
///     &[
///         CalcOp::PushConstant(2.0),
///         CalcOp::PushConstant(3.0),
///         CalcOp::Combine(Opcode::Add),
///     ]
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CalcStack {
    program: Vec<CalcOp>,
}

impl CalcStack {
    /// Program from raw ops, e.g. one received over the wire.
    pub fn from_ops(program: Vec<CalcOp>) -> Self {
        Self { program }
    }

    /// A named field quantity or a saved named expression.
    pub fn from_named(name: impl Into<String>) -> Self {
        Self::from_ops(vec![CalcOp::PushNamed(name.into())])
    }

    pub fn from_constant(value: f64) -> Self {
        Self::from_ops(vec![CalcOp::PushConstant(value)])
    }

    pub fn field(quantity: FieldQuantity) -> Self {
        Self::from_named(quantity.name())
    }

    pub fn program(&self) -> &[CalcOp] {
        &self.program
    }

    pub fn len(&self) -> usize {
        self.program.len()
    }

    pub fn is_empty(&self) -> bool {
        self.program.is_empty()
    }

    fn with(&self, tail: impl IntoIterator<Item = CalcOp>) -> Self {
        let mut program = self.program.clone();
        program.extend(tail);
        Self { program }
    }

    pub fn binary_op(&self, other: impl Into<CalcStack>, op: BinaryOp) -> Self {
        let other = other.into();
        self.with(other.program.into_iter().chain([CalcOp::Combine(op.into())]))
    }

    pub fn unary_op(&self, op: UnaryOp) -> Self {
        self.with([CalcOp::Combine(op.into())])
    }

    /// Integrate this quantity over `entity`.
    pub fn integrate(&self, entity: &str, kind: IntegrationKind) -> Self {
        self.with([CalcOp::push_geometry(kind, entity), CalcOp::Combine(Opcode::Integrate)])
    }

    pub fn integrate_line(&self, entity: &str) -> Self {
        self.integrate(entity, IntegrationKind::Line)
    }

    pub fn integrate_surf(&self, entity: &str) -> Self {
        self.integrate(entity, IntegrationKind::Surf)
    }

    pub fn integrate_vol(&self, entity: &str) -> Self {
        self.integrate(entity, IntegrationKind::Vol)
    }

    /// Surface integral over every object.
    pub fn integrate_surf_all(&self) -> Self {
        self.integrate_surf(ALL_OBJECTS)
    }

    /// Volume integral over every object.
    pub fn integrate_vol_all(&self) -> Self {
        self.integrate_vol(ALL_OBJECTS)
    }

    pub fn scalar_x(&self) -> Self {
        self.unary_op(UnaryOp::ScalarX)
    }

    pub fn scalar_y(&self) -> Self {
        self.unary_op(UnaryOp::ScalarY)
    }

    pub fn scalar_z(&self) -> Self {
        self.unary_op(UnaryOp::ScalarZ)
    }

    pub fn real(&self) -> Self {
        self.unary_op(UnaryOp::Real)
    }

    pub fn imag(&self) -> Self {
        self.unary_op(UnaryOp::Imag)
    }

    pub fn abs(&self) -> Self {
        self.unary_op(UnaryOp::Abs)
    }

    pub fn pow(&self, exponent: impl Into<CalcStack>) -> Self {
        self.binary_op(exponent, BinaryOp::Pow)
    }

    /// Issue every op onto the VM in program order.
    ///
    /// Stops at the first failing call; the VM stack is then in whatever state
    /// the ops before it left it.
    pub fn replay<V: CalcVm + ?Sized>(&self, vm: &mut V) -> EngineResult<()> {
        debug!(ops = self.program.len(), "replaying calculator program");
        for op in &self.program {
            trace!(%op, "issue");
            let result = match op {
                CalcOp::PushConstant(v) => vm.enter_scalar(*v),
                CalcOp::PushNamed(name) => vm.copy_named_expr_to_stack(name),
                CalcOp::PushLine(entity) => vm.enter_line(entity),
                CalcOp::PushSurf(entity) => vm.enter_surf(entity),
                CalcOp::PushVol(entity) => vm.enter_vol(entity),
                CalcOp::Combine(opcode) => vm.calc_op(*opcode),
            };
            if let Err(e) = result {
                warn!(%op, "calculator call failed: {}", e);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Replay and save the result as a named expression.
    ///
    /// The returned program refers to the saved expression by name, so later
    /// replays push it without recomputing it.
    pub fn save_as<V: CalcVm + ?Sized>(&self, vm: &mut V, name: &str) -> EngineResult<CalcStack> {
        self.replay(vm)?;
        vm.add_named_expr(name)?;
        debug!(name, "saved named expression");
        Ok(CalcStack::from_named(name))
    }

    /// Replay and evaluate against the VM's default setup.
    pub fn evaluate<V: CalcVm + ?Sized>(&self, vm: &mut V, mode: u32, phase_degrees: i32) -> CalcResult<f64> {
        self.replay(vm)?;
        vm.set_mode(mode, phase_degrees)?;

        let setup = vm.default_setup_name()?;
        let params = vec!["Phase:=".to_string(), format!("{}deg", phase_degrees)];
        vm.clc_eval(&setup, &params)?;

        let entry = vm.get_top_entry_value(&setup, &params)?;
        let value = entry
            .first()
            .and_then(|text| text.trim().parse::<f64>().ok())
            .ok_or_else(|| CalcError::InvalidTopEntry(entry.clone()))?;
        debug!(setup = %setup, mode, phase_degrees, value, "evaluated calculator program");
        Ok(value)
    }
}

impl From<f64> for CalcStack {
    fn from(value: f64) -> Self {
        CalcStack::from_constant(value)
    }
}

impl From<FieldQuantity> for CalcStack {
    fn from(quantity: FieldQuantity) -> Self {
        CalcStack::field(quantity)
    }
}

impl From<&CalcStack> for CalcStack {
    fn from(stack: &CalcStack) -> Self {
        stack.clone()
    }
}

impl Neg for CalcStack {
    type Output = CalcStack;

    fn neg(self) -> CalcStack {
        self.unary_op(UnaryOp::Neg)
    }
}

impl Neg for &CalcStack {
    type Output = CalcStack;

    fn neg(self) -> CalcStack {
        self.unary_op(UnaryOp::Neg)
    }
}

macro_rules! impl_calc_op {
    ($trait:ident, $method:ident, $op:expr) => {
        impl<T: Into<CalcStack>> $trait<T> for CalcStack {
            type Output = CalcStack;

            fn $method(self, rhs: T) -> CalcStack {
                self.binary_op(rhs, $op)
            }
        }

        impl<T: Into<CalcStack>> $trait<T> for &CalcStack {
            type Output = CalcStack;

            fn $method(self, rhs: T) -> CalcStack {
                self.binary_op(rhs, $op)
            }
        }

        // The constant is pushed first so operand order matches the source.
        impl $trait<CalcStack> for f64 {
            type Output = CalcStack;

            fn $method(self, rhs: CalcStack) -> CalcStack {
                CalcStack::from_constant(self).binary_op(rhs, $op)
            }
        }

        impl $trait<&CalcStack> for f64 {
            type Output = CalcStack;

            fn $method(self, rhs: &CalcStack) -> CalcStack {
                CalcStack::from_constant(self).binary_op(rhs, $op)
            }
        }
    };
}

impl_calc_op!(Add, add, BinaryOp::Add);
impl_calc_op!(Sub, sub, BinaryOp::Sub);
impl_calc_op!(Mul, mul, BinaryOp::Mul);
impl_calc_op!(Div, div, BinaryOp::Div);
