//! Unit table and literal quantity conversion.
//!
//! Variable values bound in the solver are either arithmetic expressions or
//! literal quantities such as `"5mm"`, `"2.4 GHz"` or `"50ohm"`. Literal
//! quantities are converted to a requested unit through a [`UnitTable`]:
//!
//! - Base dimensions: length, mass, time, current; angles are dimensionless
//! - SI prefixes from femto to tera on prefixable symbols
//! - Compound units (`m/s`, `mm^2`, `kg*m/s^2`)
//!
//! The table is immutable once built. Construct it once with
//! [`UnitTable::standard`] and hand it to whoever needs conversions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum UnitError {
    #[error("Unknown unit: '{0}'")]
    UnknownUnit(String),
    #[error("Incompatible units: cannot convert '{from}' to '{to}'")]
    IncompatibleUnit { from: String, to: String },
    #[error("Invalid quantity: '{0}'")]
    InvalidQuantity(String),
    #[error("Unit exponent out of range: '{0}'")]
    ExponentOverflow(String),
}

/// Exponents of the base dimensions a unit is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Dimension {
    pub length: i8,
    pub mass: i8,
    pub time: i8,
    pub current: i8,
}

impl Dimension {
    pub const NONE: Dimension = Dimension::new(0, 0, 0, 0);
    pub const LENGTH: Dimension = Dimension::new(1, 0, 0, 0);
    pub const MASS: Dimension = Dimension::new(0, 1, 0, 0);
    pub const TIME: Dimension = Dimension::new(0, 0, 1, 0);
    pub const CURRENT: Dimension = Dimension::new(0, 0, 0, 1);
    pub const FREQUENCY: Dimension = Dimension::new(0, 0, -1, 0);
    pub const VOLTAGE: Dimension = Dimension::new(2, 1, -3, -1);
    pub const RESISTANCE: Dimension = Dimension::new(2, 1, -3, -2);
    pub const CONDUCTANCE: Dimension = Dimension::new(-2, -1, 3, 2);
    pub const CAPACITANCE: Dimension = Dimension::new(-2, -1, 4, 2);
    pub const INDUCTANCE: Dimension = Dimension::new(2, 1, -2, -2);
    pub const POWER: Dimension = Dimension::new(2, 1, -3, 0);
    pub const ENERGY: Dimension = Dimension::new(2, 1, -2, 0);

    pub const fn new(length: i8, mass: i8, time: i8, current: i8) -> Self {
        Self {
            length,
            mass,
            time,
            current,
        }
    }

    fn exponents(self) -> [i8; 4] {
        [self.length, self.mass, self.time, self.current]
    }

    fn from_exponents([length, mass, time, current]: [i8; 4]) -> Self {
        Self::new(length, mass, time, current)
    }

    /// Exponent-wise `self + sign * other`; `None` if any exponent leaves `i8`.
    fn combine(self, other: Self, sign: i8) -> Option<Self> {
        let (a, b) = (self.exponents(), other.exponents());
        let mut out = [0i8; 4];
        for ((o, a), b) in out.iter_mut().zip(a).zip(b) {
            *o = b.checked_mul(sign).and_then(|e| a.checked_add(e))?;
        }
        Some(Self::from_exponents(out))
    }

    fn powi(self, n: i8) -> Option<Self> {
        let mut out = self.exponents();
        for e in out.iter_mut() {
            *e = e.checked_mul(n)?;
        }
        Some(Self::from_exponents(out))
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = [
            ("L", self.length),
            ("M", self.mass),
            ("T", self.time),
            ("I", self.current),
        ]
        .iter()
        .filter(|(_, exp)| *exp != 0)
        .map(|(sym, exp)| if *exp == 1 { sym.to_string() } else { format!("{}^{}", sym, exp) })
        .collect();

        if parts.is_empty() {
            write!(f, "dimensionless")
        } else {
            write!(f, "{}", parts.join("·"))
        }
    }
}

/// Scale relative to the SI base unit, kept as `factor * 10^pow10` so that
/// conversions between prefixed units stay exact.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitScale {
    pub factor: f64,
    pub pow10: i32,
}

impl UnitScale {
    pub const ONE: UnitScale = UnitScale {
        factor: 1.0,
        pow10: 0,
    };

    pub const fn new(factor: f64, pow10: i32) -> Self {
        Self { factor, pow10 }
    }

    fn mul(self, other: Self) -> Self {
        Self::new(self.factor * other.factor, self.pow10 + other.pow10)
    }

    fn div(self, other: Self) -> Self {
        Self::new(self.factor / other.factor, self.pow10 - other.pow10)
    }

    fn powi(self, n: i8) -> Self {
        Self::new(self.factor.powi(n as i32), self.pow10 * n as i32)
    }

    /// Multiply `value` by this scale.
    pub fn apply(&self, value: f64) -> f64 {
        let scaled = value * self.factor;
        let magnitude = 10f64.powi(self.pow10.abs());
        if self.pow10 >= 0 {
            scaled * magnitude
        } else {
            scaled / magnitude
        }
    }
}

/// A resolved (possibly compound) unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    pub dimension: Dimension,
    pub scale: UnitScale,
}

impl Unit {
    pub const DIMENSIONLESS: Unit = Unit {
        dimension: Dimension::NONE,
        scale: UnitScale::ONE,
    };

    pub fn is_compatible(&self, other: &Self) -> bool {
        self.dimension == other.dimension
    }

    fn mul(self, other: Self) -> Option<Self> {
        Some(Self {
            dimension: self.dimension.combine(other.dimension, 1)?,
            scale: self.scale.mul(other.scale),
        })
    }

    fn div(self, other: Self) -> Option<Self> {
        Some(Self {
            dimension: self.dimension.combine(other.dimension, -1)?,
            scale: self.scale.div(other.scale),
        })
    }

    fn powi(self, n: i8) -> Option<Self> {
        Some(Self {
            dimension: self.dimension.powi(n)?,
            scale: self.scale.powi(n),
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct UnitDef {
    unit: Unit,
    prefixable: bool,
}

const SI_PREFIXES: [(&str, i32); 13] = [
    ("f", -15),
    ("p", -12),
    ("n", -9),
    ("u", -6),
    ("µ", -6),
    ("m", -3),
    ("c", -2),
    ("d", -1),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
];

/// Immutable symbol table used for every literal conversion.
#[derive(Debug, Clone, Default)]
pub struct UnitTable {
    units: HashMap<String, UnitDef>,
}

impl UnitTable {
    /// An empty table. Only dimensionless quantities convert.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Units understood by the solver's variable editor.
    pub fn standard() -> Self {
        use std::f64::consts::PI;

        Self::empty()
            // Length
            .with_unit("m", Dimension::LENGTH, UnitScale::ONE, true)
            .with_unit("meter", Dimension::LENGTH, UnitScale::ONE, false)
            .with_unit("in", Dimension::LENGTH, UnitScale::new(2.54, -2), false)
            .with_unit("inch", Dimension::LENGTH, UnitScale::new(2.54, -2), false)
            .with_unit("mil", Dimension::LENGTH, UnitScale::new(2.54, -5), false)
            .with_unit("ft", Dimension::LENGTH, UnitScale::new(3.048, -1), false)
            // Mass
            .with_unit("g", Dimension::MASS, UnitScale::new(1.0, -3), true)
            // Time and frequency
            .with_unit("s", Dimension::TIME, UnitScale::ONE, true)
            .with_unit("Hz", Dimension::FREQUENCY, UnitScale::ONE, true)
            // Angle, dimensionless so `90deg` converts to a bare number
            .with_unit("rad", Dimension::NONE, UnitScale::ONE, true)
            .with_unit("deg", Dimension::NONE, UnitScale::new(PI / 180.0, 0), false)
            .with_unit("degree", Dimension::NONE, UnitScale::new(PI / 180.0, 0), false)
            // Electrical
            .with_unit("A", Dimension::CURRENT, UnitScale::ONE, true)
            .with_unit("V", Dimension::VOLTAGE, UnitScale::ONE, true)
            .with_unit("ohm", Dimension::RESISTANCE, UnitScale::ONE, true)
            .with_unit("Ohm", Dimension::RESISTANCE, UnitScale::ONE, true)
            .with_unit("S", Dimension::CONDUCTANCE, UnitScale::ONE, true)
            .with_unit("F", Dimension::CAPACITANCE, UnitScale::ONE, true)
            .with_unit("H", Dimension::INDUCTANCE, UnitScale::ONE, true)
            .with_unit("W", Dimension::POWER, UnitScale::ONE, true)
            .with_unit("J", Dimension::ENERGY, UnitScale::ONE, true)
    }

    /// Return a table extended with `symbol`.
    pub fn with_unit(
        mut self,
        symbol: &str,
        dimension: Dimension,
        scale: UnitScale,
        prefixable: bool,
    ) -> Self {
        self.units.insert(
            symbol.to_string(),
            UnitDef {
                unit: Unit { dimension, scale },
                prefixable,
            },
        );
        self
    }

    /// Resolve a single symbol, trying an SI prefix if there is no exact match.
    fn resolve_symbol(&self, symbol: &str) -> Result<Unit, UnitError> {
        if let Some(def) = self.units.get(symbol) {
            return Ok(def.unit);
        }

        for &(prefix, pow10) in &SI_PREFIXES {
            if let Some(base) = symbol.strip_prefix(prefix) {
                if let Some(def) = self.units.get(base).filter(|d| d.prefixable) {
                    return Ok(Unit {
                        dimension: def.unit.dimension,
                        scale: def.unit.scale.mul(UnitScale::new(1.0, pow10)),
                    });
                }
            }
        }

        Err(UnitError::UnknownUnit(symbol.to_string()))
    }

    fn resolve_factor(&self, factor: &str) -> Result<Unit, UnitError> {
        let factor = factor.trim();
        let (symbol, exponent) = match factor.split_once('^') {
            Some((sym, exp)) => {
                let exp = exp
                    .trim()
                    .parse::<i8>()
                    .map_err(|_| UnitError::UnknownUnit(factor.to_string()))?;
                (sym.trim(), exp)
            }
            None => (factor, 1),
        };

        if symbol == "1" {
            return Ok(Unit::DIMENSIONLESS);
        }
        if symbol.is_empty() {
            return Err(UnitError::UnknownUnit(factor.to_string()));
        }

        self.resolve_symbol(symbol)?
            .powi(exponent)
            .ok_or_else(|| UnitError::ExponentOverflow(factor.to_string()))
    }

    /// Parse a unit expression such as `"mm"`, `"GHz"` or `"kg*m/s^2"`.
    /// The empty string is dimensionless.
    pub fn parse_unit(&self, text: &str) -> Result<Unit, UnitError> {
        let text = text.trim();
        if text.is_empty() {
            return Ok(Unit::DIMENSIONLESS);
        }

        let mut unit = Unit::DIMENSIONLESS;
        let mut divide = false;
        let mut start = 0;

        let apply = |unit: Unit, divide: bool, factor: Unit| {
            let next = if divide { unit.div(factor) } else { unit.mul(factor) };
            next.ok_or_else(|| UnitError::ExponentOverflow(text.to_string()))
        };

        for (i, c) in text.char_indices() {
            if c == '*' || c == '/' {
                let factor = self.resolve_factor(&text[start..i])?;
                unit = apply(unit, divide, factor)?;
                divide = c == '/';
                start = i + c.len_utf8();
            }
        }
        let factor = self.resolve_factor(&text[start..])?;
        unit = apply(unit, divide, factor)?;

        Ok(unit)
    }

    /// Split a literal such as `"5mm"` or `"-1.5e-3 m"` into magnitude and unit.
    pub fn parse_quantity(&self, text: &str) -> Result<(f64, Unit), UnitError> {
        let trimmed = text.trim();
        let split = numeric_prefix_len(trimmed);
        if split == 0 {
            return Err(UnitError::InvalidQuantity(text.to_string()));
        }

        let (number, unit) = trimmed.split_at(split);
        let value = number
            .parse::<f64>()
            .map_err(|_| UnitError::InvalidQuantity(text.to_string()))?;

        Ok((value, self.parse_unit(unit)?))
    }

    /// Convert a magnitude between two resolved units.
    pub fn convert_value(&self, value: f64, from: &Unit, to: &Unit) -> Option<f64> {
        if !from.is_compatible(to) {
            return None;
        }
        Some(from.scale.div(to.scale).apply(value))
    }

    /// Convert a literal `value+unit` text to a magnitude in `target_unit`.
    pub fn convert(&self, value_with_unit: &str, target_unit: &str) -> Result<f64, UnitError> {
        let (value, from) = self.parse_quantity(value_with_unit)?;
        let to = self.parse_unit(target_unit)?;

        self.convert_value(value, &from, &to)
            .ok_or_else(|| UnitError::IncompatibleUnit {
                from: value_with_unit.trim().to_string(),
                to: target_unit.to_string(),
            })
    }
}

/// Length of the leading numeric literal (sign, digits, fraction, exponent).
fn numeric_prefix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    let mut i = 0;

    if i < bytes.len() && (bytes[i] == b'+' || bytes[i] == b'-') {
        i += 1;
    }
    let mantissa_start = i;
    while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
        i += 1;
    }
    if i == mantissa_start {
        return 0;
    }

    // Only consume an exponent if digits follow it, so "5e" stays a unit.
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        let mut j = i + 1;
        if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
            j += 1;
        }
        if j < bytes.len() && bytes[j].is_ascii_digit() {
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            i = j;
        }
    }

    i
}
