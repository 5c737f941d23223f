//! In-memory field calculator.
//!
//! [`StackMachine`] implements [`CalcVm`] over registered field phasors and
//! entity measures. It lets programs be evaluated without a running solver:
//! the bridge server gives each session one, and the tests use it to check
//! replayed programs numerically.
//!
//! Stack entries are lazy trees. Field values are looked up and rotated to the
//! requested phase only when `ClcEval` runs, so one program can be evaluated
//! at several modes and phases.

use super::types::{IntegrationKind, Opcode, ALL_OBJECTS};
use super::CalcVm;
use crate::error::{EngineError, EngineResult};
use num_complex::Complex64;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

/// A field phasor at one mode.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue {
    Scalar(Complex64),
    Vector([Complex64; 3]),
}

impl FieldValue {
    pub fn real(value: f64) -> Self {
        FieldValue::Scalar(Complex64::new(value, 0.0))
    }

    pub fn real_vector(components: [f64; 3]) -> Self {
        FieldValue::Vector(components.map(|c| Complex64::new(c, 0.0)))
    }

    fn map(self, f: impl Fn(Complex64) -> Complex64) -> Self {
        match self {
            FieldValue::Scalar(z) => FieldValue::Scalar(f(z)),
            FieldValue::Vector(v) => FieldValue::Vector(v.map(f)),
        }
    }

    fn magnitude(&self) -> f64 {
        match self {
            FieldValue::Scalar(z) => z.norm(),
            FieldValue::Vector(v) => v.iter().map(|c| c.norm_sqr()).sum::<f64>().sqrt(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Constant(f64),
    Field(String),
    Geometry(IntegrationKind, String),
    Unary(Opcode, Box<Node>),
    Binary(Opcode, Box<Node>, Box<Node>),
    Integral(Box<Node>, IntegrationKind, String),
}

impl Node {
    fn is_geometry(&self) -> bool {
        matches!(self, Node::Geometry(..))
    }
}

fn fail<T>(call: &str, message: impl Into<String>) -> EngineResult<T> {
    Err(EngineError::new(call, message))
}

/// A calculator that evaluates programs against registered data.
#[derive(Debug, Clone)]
pub struct StackMachine {
    stack: Vec<Node>,
    /// Field phasors by quantity name, then mode
    fields: HashMap<String, BTreeMap<u32, FieldValue>>,
    /// Length, area or volume of each entity
    entities: BTreeMap<IntegrationKind, BTreeMap<String, f64>>,
    named: HashMap<String, Node>,
    setups: Vec<String>,
    default_setup: Option<String>,
    mode: u32,
    phase_degrees: i32,
    /// Result of the last `ClcEval`, with the setup it ran against
    last_result: Option<(String, FieldValue)>,
}

impl Default for StackMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StackMachine {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            fields: HashMap::new(),
            entities: BTreeMap::new(),
            named: HashMap::new(),
            setups: Vec::new(),
            default_setup: None,
            mode: 1,
            phase_degrees: 0,
            last_result: None,
        }
    }

    /// Machine with a single setup, which is also the default.
    pub fn with_setup(name: &str) -> Self {
        let mut machine = Self::new();
        machine.add_setup(name);
        machine
    }

    /// Register the phasor of `name` at `mode`, replacing any previous value.
    pub fn define_field(&mut self, name: &str, mode: u32, value: FieldValue) {
        self.fields.entry(name.to_string()).or_default().insert(mode, value);
    }

    /// Register an entity with its length (line), area (surf) or volume (vol).
    pub fn define_entity(&mut self, kind: IntegrationKind, name: &str, measure: f64) {
        self.entities.entry(kind).or_default().insert(name.to_string(), measure);
    }

    /// Add a solution setup. The first one added becomes the default.
    pub fn add_setup(&mut self, name: &str) {
        if !self.setups.iter().any(|s| s == name) {
            self.setups.push(name.to_string());
        }
        if self.default_setup.is_none() {
            self.default_setup = Some(name.to_string());
        }
    }

    pub fn set_default_setup(&mut self, name: &str) -> EngineResult<()> {
        if !self.setups.iter().any(|s| s == name) {
            return fail("SetDefaultSetup", format!("no setup named '{}'", name));
        }
        self.default_setup = Some(name.to_string());
        Ok(())
    }

    pub fn setups(&self) -> &[String] {
        &self.setups
    }

    pub fn mode(&self) -> (u32, i32) {
        (self.mode, self.phase_degrees)
    }

    pub fn stack_depth(&self) -> usize {
        self.stack.len()
    }

    pub fn clear_stack(&mut self) {
        self.stack.clear();
    }

    pub fn has_named_expr(&self, name: &str) -> bool {
        self.named.contains_key(name)
    }

    fn pop(&mut self, call: &str) -> EngineResult<Node> {
        match self.stack.pop() {
            Some(node) => Ok(node),
            None => fail(call, "calculator stack is empty"),
        }
    }

    fn push_geometry(&mut self, call: &str, kind: IntegrationKind, entity: &str) -> EngineResult<()> {
        let known = self.entities.get(&kind).map_or(false, |e| e.contains_key(entity));
        if entity != ALL_OBJECTS && !known {
            return fail(call, format!("no {} entity named '{}'", kind, entity));
        }
        if entity == ALL_OBJECTS && kind == IntegrationKind::Line {
            return fail(call, "line integrals need a named line");
        }
        self.stack.push(Node::Geometry(kind, entity.to_string()));
        Ok(())
    }

    fn measure(&self, kind: IntegrationKind, entity: &str) -> EngineResult<f64> {
        let registered = self.entities.get(&kind);
        if entity == ALL_OBJECTS {
            return match registered {
                Some(all) if !all.is_empty() => Ok(all.values().sum()),
                _ => fail("CalcOp", format!("no {} entities to integrate over", kind)),
            };
        }
        match registered.and_then(|e| e.get(entity)) {
            Some(measure) => Ok(*measure),
            None => fail("CalcOp", format!("no {} entity named '{}'", kind, entity)),
        }
    }

    /// Phase from `Phase:=`, `<n>deg` parameter pairs, if present.
    fn phase_param(params: &[String]) -> EngineResult<Option<f64>> {
        let Some(idx) = params.iter().position(|p| p == "Phase:=") else {
            return Ok(None);
        };
        let Some(value) = params.get(idx + 1) else {
            return fail("ClcEval", "Phase:= is missing its value");
        };
        let number = value.trim().trim_end_matches("deg").trim();
        match number.parse::<f64>() {
            Ok(degrees) => Ok(Some(degrees)),
            Err(_) => fail("ClcEval", format!("invalid phase '{}'", value)),
        }
    }

    fn check_setup(&self, call: &str, setup: &str) -> EngineResult<()> {
        if self.setups.iter().any(|s| s == setup) {
            Ok(())
        } else {
            fail(call, format!("no setup named '{}'", setup))
        }
    }

    fn eval_node(&self, node: &Node, rotation: Complex64) -> EngineResult<FieldValue> {
        match node {
            Node::Constant(v) => Ok(FieldValue::real(*v)),
            Node::Field(name) => {
                let value = self
                    .fields
                    .get(name)
                    .and_then(|modes| modes.get(&self.mode))
                    .copied();
                match value {
                    Some(v) => Ok(v.map(|z| z * rotation)),
                    None => fail("ClcEval", format!("{} has no solution for mode {}", name, self.mode)),
                }
            }
            Node::Geometry(kind, entity) => {
                fail("ClcEval", format!("{} geometry '{}' is not a value", kind, entity))
            }
            Node::Unary(op, operand) => {
                let value = self.eval_node(operand, rotation)?;
                apply_unary(*op, value)
            }
            Node::Binary(op, left, right) => {
                let l = self.eval_node(left, rotation)?;
                let r = self.eval_node(right, rotation)?;
                apply_binary(*op, l, r)
            }
            Node::Integral(integrand, kind, entity) => {
                let value = self.eval_node(integrand, rotation)?;
                let measure = self.measure(*kind, entity)?;
                Ok(value.map(|z| z * measure))
            }
        }
    }
}

fn apply_unary(op: Opcode, value: FieldValue) -> EngineResult<FieldValue> {
    use FieldValue::{Scalar, Vector};

    match (op, value) {
        (Opcode::Neg, v) => Ok(v.map(|z| -z)),
        (Opcode::Abs, v) => Ok(FieldValue::real(v.magnitude())),
        (Opcode::Real, v) => Ok(v.map(|z| Complex64::new(z.re, 0.0))),
        (Opcode::Imag, v) => Ok(v.map(|z| Complex64::new(z.im, 0.0))),
        (Opcode::ScalarX, Vector(v)) => Ok(Scalar(v[0])),
        (Opcode::ScalarY, Vector(v)) => Ok(Scalar(v[1])),
        (Opcode::ScalarZ, Vector(v)) => Ok(Scalar(v[2])),
        (Opcode::ScalarX | Opcode::ScalarY | Opcode::ScalarZ, Scalar(_)) => {
            fail("CalcOp", format!("{} needs a vector operand", op))
        }
        (op, _) => fail("CalcOp", format!("{} is not a unary operation", op)),
    }
}

fn apply_binary(op: Opcode, left: FieldValue, right: FieldValue) -> EngineResult<FieldValue> {
    use FieldValue::{Scalar, Vector};

    let zip = |a: [Complex64; 3], b: [Complex64; 3], f: fn(Complex64, Complex64) -> Complex64| {
        [f(a[0], b[0]), f(a[1], b[1]), f(a[2], b[2])]
    };

    match (op, left, right) {
        (Opcode::Add, Scalar(a), Scalar(b)) => Ok(Scalar(a + b)),
        (Opcode::Add, Vector(a), Vector(b)) => Ok(Vector(zip(a, b, |x, y| x + y))),
        (Opcode::Sub, Scalar(a), Scalar(b)) => Ok(Scalar(a - b)),
        (Opcode::Sub, Vector(a), Vector(b)) => Ok(Vector(zip(a, b, |x, y| x - y))),
        (Opcode::Mul, Scalar(a), Scalar(b)) => Ok(Scalar(a * b)),
        (Opcode::Mul, Scalar(a), Vector(v)) | (Opcode::Mul, Vector(v), Scalar(a)) => {
            Ok(Vector(v.map(|z| z * a)))
        }
        (Opcode::Div, Scalar(a), Scalar(b)) => Ok(Scalar(a / b)),
        (Opcode::Div, Vector(v), Scalar(b)) => Ok(Vector(v.map(|z| z / b))),
        (Opcode::Pow, Scalar(a), Scalar(b)) => Ok(Scalar(power(a, b))),
        (op @ (Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::Div | Opcode::Pow), _, _) => {
            fail("CalcOp", format!("operands of {} have mismatched shapes", op))
        }
        (op, _, _) => fail("CalcOp", format!("{} is not a binary operation", op)),
    }
}

/// Real powers stay real so `x^2` of a real `x` has no rounding in the imaginary part.
fn power(base: Complex64, exponent: Complex64) -> Complex64 {
    if exponent.im == 0.0 {
        if base.im == 0.0 && (base.re >= 0.0 || exponent.re.fract() == 0.0) {
            Complex64::new(base.re.powf(exponent.re), 0.0)
        } else {
            base.powf(exponent.re)
        }
    } else {
        base.powc(exponent)
    }
}

impl CalcVm for StackMachine {
    fn enter_scalar(&mut self, value: f64) -> EngineResult<()> {
        self.stack.push(Node::Constant(value));
        Ok(())
    }

    fn copy_named_expr_to_stack(&mut self, name: &str) -> EngineResult<()> {
        if let Some(node) = self.named.get(name) {
            self.stack.push(node.clone());
            return Ok(());
        }
        if self.fields.contains_key(name) {
            self.stack.push(Node::Field(name.to_string()));
            return Ok(());
        }
        fail("CopyNamedExprToStack", format!("no named expression '{}'", name))
    }

    fn enter_line(&mut self, entity: &str) -> EngineResult<()> {
        self.push_geometry("EnterLine", IntegrationKind::Line, entity)
    }

    fn enter_surf(&mut self, entity: &str) -> EngineResult<()> {
        self.push_geometry("EnterSurf", IntegrationKind::Surf, entity)
    }

    fn enter_vol(&mut self, entity: &str) -> EngineResult<()> {
        self.push_geometry("EnterVol", IntegrationKind::Vol, entity)
    }

    fn calc_op(&mut self, op: Opcode) -> EngineResult<()> {
        if self.stack.len() < op.arity() {
            return fail(
                "CalcOp",
                format!("{} needs {} operands, stack has {}", op, op.arity(), self.stack.len()),
            );
        }

        let node = match op {
            Opcode::Integrate => {
                let geometry = self.pop("CalcOp")?;
                let integrand = self.pop("CalcOp")?;
                match (geometry, integrand) {
                    (_, integrand) if integrand.is_geometry() => {
                        return fail("CalcOp", "cannot integrate a geometry entry");
                    }
                    (Node::Geometry(kind, entity), integrand) => Node::Integral(Box::new(integrand), kind, entity),
                    _ => return fail("CalcOp", "Integrate needs a geometry entry on top of the stack"),
                }
            }
            _ if op.arity() == 2 => {
                let right = self.pop("CalcOp")?;
                let left = self.pop("CalcOp")?;
                if left.is_geometry() || right.is_geometry() {
                    return fail("CalcOp", format!("{} cannot take a geometry operand", op));
                }
                Node::Binary(op, Box::new(left), Box::new(right))
            }
            _ => {
                let operand = self.pop("CalcOp")?;
                if operand.is_geometry() {
                    return fail("CalcOp", format!("{} cannot take a geometry operand", op));
                }
                Node::Unary(op, Box::new(operand))
            }
        };
        self.stack.push(node);
        Ok(())
    }

    fn add_named_expr(&mut self, name: &str) -> EngineResult<()> {
        let node = self.pop("AddNamedExpr")?;
        if node.is_geometry() {
            return fail("AddNamedExpr", "cannot name a geometry entry");
        }
        debug!(name, "storing named expression");
        self.named.insert(name.to_string(), node);
        Ok(())
    }

    fn set_mode(&mut self, mode: u32, phase_degrees: i32) -> EngineResult<()> {
        if mode == 0 {
            return fail("SetMode", "modes are numbered from 1");
        }
        self.mode = mode;
        self.phase_degrees = phase_degrees;
        Ok(())
    }

    fn clc_eval(&mut self, setup: &str, params: &[String]) -> EngineResult<()> {
        self.check_setup("ClcEval", setup)?;
        let degrees = Self::phase_param(params)?.unwrap_or(f64::from(self.phase_degrees));

        let top = match self.stack.last() {
            Some(node) => node,
            None => return fail("ClcEval", "calculator stack is empty"),
        };
        let rotation = Complex64::from_polar(1.0, degrees.to_radians());
        let value = self.eval_node(top, rotation)?;

        debug!(setup, mode = self.mode, degrees, "evaluated top of stack");
        self.last_result = Some((setup.to_string(), value));
        Ok(())
    }

    fn get_top_entry_value(&mut self, setup: &str, _params: &[String]) -> EngineResult<Vec<String>> {
        match &self.last_result {
            Some((evaluated, FieldValue::Scalar(z))) if evaluated == setup => {
                Ok(vec![z.re.to_string(), z.im.to_string()])
            }
            Some((evaluated, FieldValue::Vector(_))) if evaluated == setup => {
                fail("GetTopEntryValue", "top entry is a vector")
            }
            _ => fail("GetTopEntryValue", format!("nothing evaluated for setup '{}'", setup)),
        }
    }

    fn default_setup_name(&self) -> EngineResult<String> {
        match &self.default_setup {
            Some(name) => Ok(name.clone()),
            None => fail("GetDefaultSetup", "design has no setups"),
        }
    }
}

#[cfg(test)]
mod machine_tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    fn top_value(vm: &mut StackMachine) -> f64 {
        vm.clc_eval("Setup1", &[]).unwrap();
        vm.get_top_entry_value("Setup1", &[]).unwrap()[0].parse().unwrap()
    }

    #[test]
    fn test_constant_arithmetic() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.enter_scalar(2.0).unwrap();
        vm.enter_scalar(3.0).unwrap();
        vm.calc_op(Opcode::Sub).unwrap();
        assert_eq!(vm.stack_depth(), 1);
        assert!(approx(top_value(&mut vm), -1.0));
    }

    #[test]
    fn test_underflow() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.enter_scalar(1.0).unwrap();
        let err = vm.calc_op(Opcode::Add).unwrap_err();
        assert_eq!(err.call, "CalcOp");
    }

    #[test]
    fn test_unknown_named_expr() {
        let mut vm = StackMachine::new();
        let err = vm.copy_named_expr_to_stack("Mag_E").unwrap_err();
        assert_eq!(err.call, "CopyNamedExprToStack");
    }

    #[test]
    fn test_phase_rotation() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.define_field("ComplexMag_E", 1, FieldValue::Scalar(Complex64::new(0.0, 2.0)));
        vm.copy_named_expr_to_stack("ComplexMag_E").unwrap();
        vm.calc_op(Opcode::Real).unwrap();

        // j2 rotated by 90 degrees is -2.
        vm.set_mode(1, 90).unwrap();
        assert!(approx(top_value(&mut vm), -2.0));

        vm.set_mode(1, 0).unwrap();
        assert!(approx(top_value(&mut vm), 0.0));
    }

    #[test]
    fn test_phase_param_overrides_mode_phase() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.define_field("ComplexMag_E", 1, FieldValue::real(1.0));
        vm.copy_named_expr_to_stack("ComplexMag_E").unwrap();
        vm.calc_op(Opcode::Real).unwrap();

        let params = vec!["Phase:=".to_string(), "180deg".to_string()];
        vm.clc_eval("Setup1", &params).unwrap();
        let value: f64 = vm.get_top_entry_value("Setup1", &params).unwrap()[0].parse().unwrap();
        assert!(approx(value, -1.0));
    }

    #[test]
    fn test_vector_components_and_magnitude() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.define_field("Vector_E", 1, FieldValue::real_vector([3.0, 4.0, 0.0]));

        vm.copy_named_expr_to_stack("Vector_E").unwrap();
        vm.calc_op(Opcode::ScalarY).unwrap();
        vm.calc_op(Opcode::Real).unwrap();
        assert!(approx(top_value(&mut vm), 4.0));

        vm.clear_stack();
        vm.copy_named_expr_to_stack("Vector_E").unwrap();
        vm.calc_op(Opcode::Abs).unwrap();
        assert!(approx(top_value(&mut vm), 5.0));
    }

    #[test]
    fn test_vector_top_entry_is_rejected() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.define_field("Vector_H", 1, FieldValue::real_vector([1.0, 0.0, 0.0]));
        vm.copy_named_expr_to_stack("Vector_H").unwrap();
        vm.clc_eval("Setup1", &[]).unwrap();
        assert!(vm.get_top_entry_value("Setup1", &[]).is_err());
    }

    #[test]
    fn test_integrals() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.define_field("Mag_Jsurf", 1, FieldValue::real(2.0));
        vm.define_entity(IntegrationKind::Surf, "top", 3.0);
        vm.define_entity(IntegrationKind::Surf, "bottom", 5.0);

        vm.copy_named_expr_to_stack("Mag_Jsurf").unwrap();
        vm.enter_surf("top").unwrap();
        vm.calc_op(Opcode::Integrate).unwrap();
        assert!(approx(top_value(&mut vm), 6.0));

        vm.clear_stack();
        vm.copy_named_expr_to_stack("Mag_Jsurf").unwrap();
        vm.enter_surf(ALL_OBJECTS).unwrap();
        vm.calc_op(Opcode::Integrate).unwrap();
        assert!(approx(top_value(&mut vm), 16.0));
    }

    #[test]
    fn test_unknown_entity() {
        let mut vm = StackMachine::with_setup("Setup1");
        assert_eq!(vm.enter_vol("substrate").unwrap_err().call, "EnterVol");
        assert!(vm.enter_line(ALL_OBJECTS).is_err());
    }

    #[test]
    fn test_integrate_needs_geometry_on_top() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.enter_scalar(1.0).unwrap();
        vm.enter_scalar(2.0).unwrap();
        assert!(vm.calc_op(Opcode::Integrate).is_err());
    }

    #[test]
    fn test_geometry_is_not_an_arithmetic_operand() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.define_entity(IntegrationKind::Vol, "box", 1.0);
        vm.enter_scalar(1.0).unwrap();
        vm.enter_vol("box").unwrap();
        assert!(vm.calc_op(Opcode::Add).is_err());
    }

    #[test]
    fn test_named_expression_snapshot() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.enter_scalar(4.0).unwrap();
        vm.add_named_expr("four").unwrap();
        assert_eq!(vm.stack_depth(), 0);
        assert!(vm.has_named_expr("four"));

        vm.copy_named_expr_to_stack("four").unwrap();
        vm.copy_named_expr_to_stack("four").unwrap();
        vm.calc_op(Opcode::Mul).unwrap();
        assert!(approx(top_value(&mut vm), 16.0));
    }

    #[test]
    fn test_missing_mode() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.define_field("Mag_E", 1, FieldValue::real(1.0));
        vm.copy_named_expr_to_stack("Mag_E").unwrap();
        vm.set_mode(2, 0).unwrap();
        assert!(vm.clc_eval("Setup1", &[]).is_err());
    }

    #[test]
    fn test_setups() {
        let mut vm = StackMachine::new();
        assert!(vm.default_setup_name().is_err());

        vm.add_setup("Setup1");
        vm.add_setup("Setup2");
        assert_eq!(vm.default_setup_name().unwrap(), "Setup1");
        vm.set_default_setup("Setup2").unwrap();
        assert_eq!(vm.default_setup_name().unwrap(), "Setup2");
        assert!(vm.set_default_setup("Setup9").is_err());

        vm.enter_scalar(1.0).unwrap();
        assert!(vm.clc_eval("Setup9", &[]).is_err());
        vm.clc_eval("Setup1", &[]).unwrap();
        assert!(vm.get_top_entry_value("Setup2", &[]).is_err());
    }

    #[test]
    fn test_real_power() {
        let mut vm = StackMachine::with_setup("Setup1");
        vm.enter_scalar(-3.0).unwrap();
        vm.enter_scalar(2.0).unwrap();
        vm.calc_op(Opcode::Pow).unwrap();
        assert!(vm.get_top_entry_value("Setup1", &[]).is_err());
        assert!(approx(top_value(&mut vm), 9.0));
    }
}
