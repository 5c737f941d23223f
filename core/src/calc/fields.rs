//! Field quantities the solver knows by name.

use serde::{Deserialize, Serialize};
use std::fmt;

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldQuantity {
    Mag_E,
    Mag_H,
    Mag_Jsurf,
    Mag_Jvol,
    Vector_E,
    Vector_H,
    Vector_Jsurf,
    Vector_Jvol,
    ComplexMag_E,
    ComplexMag_H,
    ComplexMag_Jsurf,
    ComplexMag_Jvol,
}

impl FieldQuantity {
    pub const ALL: [FieldQuantity; 12] = [
        FieldQuantity::Mag_E,
        FieldQuantity::Mag_H,
        FieldQuantity::Mag_Jsurf,
        FieldQuantity::Mag_Jvol,
        FieldQuantity::Vector_E,
        FieldQuantity::Vector_H,
        FieldQuantity::Vector_Jsurf,
        FieldQuantity::Vector_Jvol,
        FieldQuantity::ComplexMag_E,
        FieldQuantity::ComplexMag_H,
        FieldQuantity::ComplexMag_Jsurf,
        FieldQuantity::ComplexMag_Jvol,
    ];

    /// Name used with `CopyNamedExprToStack`.
    pub fn name(&self) -> &'static str {
        match self {
            FieldQuantity::Mag_E => "Mag_E",
            FieldQuantity::Mag_H => "Mag_H",
            FieldQuantity::Mag_Jsurf => "Mag_Jsurf",
            FieldQuantity::Mag_Jvol => "Mag_Jvol",
            FieldQuantity::Vector_E => "Vector_E",
            FieldQuantity::Vector_H => "Vector_H",
            FieldQuantity::Vector_Jsurf => "Vector_Jsurf",
            FieldQuantity::Vector_Jvol => "Vector_Jvol",
            FieldQuantity::ComplexMag_E => "ComplexMag_E",
            FieldQuantity::ComplexMag_H => "ComplexMag_H",
            FieldQuantity::ComplexMag_Jsurf => "ComplexMag_Jsurf",
            FieldQuantity::ComplexMag_Jvol => "ComplexMag_Jvol",
        }
    }

    pub fn is_vector(&self) -> bool {
        matches!(
            self,
            FieldQuantity::Vector_E | FieldQuantity::Vector_H | FieldQuantity::Vector_Jsurf | FieldQuantity::Vector_Jvol
        )
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|q| q.name() == name)
    }
}

impl fmt::Display for FieldQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod fields_tests {
    use super::*;

    #[test]
    fn test_names_match_serde() {
        for q in FieldQuantity::ALL {
            let json = serde_json::to_string(&q).unwrap();
            assert_eq!(json, format!("\"{}\"", q.name()));
            assert_eq!(FieldQuantity::from_name(q.name()), Some(q));
        }
    }

    #[test]
    fn test_vector_quantities() {
        assert!(FieldQuantity::Vector_H.is_vector());
        assert!(!FieldQuantity::ComplexMag_H.is_vector());
        assert_eq!(FieldQuantity::ALL.iter().filter(|q| q.is_vector()).count(), 4);
    }
}
