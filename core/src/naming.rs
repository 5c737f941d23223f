//! Unique name generation for objects created in the solver.

/// First of `base1`, `base2`, ... not already in `existing`.
pub fn increment_name<S: AsRef<str>>(base: &str, existing: &[S]) -> String {
    (1..)
        .map(|n| format!("{}{}", base, n))
        .find(|candidate| !existing.iter().any(|e| e.as_ref() == candidate))
        .unwrap_or_else(|| base.to_string())
}

#[cfg(test)]
mod naming_tests {
    use super::*;

    #[test]
    fn test_first_free_suffix() {
        let existing = ["Setup1", "Setup2", "Other"];
        assert_eq!(increment_name("Setup", &existing), "Setup3");
    }

    #[test]
    fn test_gap_is_reused() {
        let existing = vec!["w1".to_string(), "w3".to_string()];
        assert_eq!(increment_name("w", &existing), "w2");
    }

    #[test]
    fn test_empty_existing() {
        let existing: [&str; 0] = [];
        assert_eq!(increment_name("PerfE", &existing), "PerfE1");
    }
}
