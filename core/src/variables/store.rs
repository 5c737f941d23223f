//! Variable store backed by an external project or design scope.
//!
//! The solver owns the variables; [`VariableStore`] only marshals calls across the
//! [`VariableBackend`] boundary. [`MemoryBackend`] is an in-process implementation
//! used by the bridge server and by tests.

use super::expression::Expression;
use super::parser::ParseError;
use super::types::{Variable, VariableValue};
use crate::error::{EngineError, EngineResult};
use crate::naming::increment_name;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum StoreError {
    #[error("Unknown variable: {0}")]
    UnknownVariable(String),
    #[error("Invalid variable name: {0}")]
    InvalidName(#[from] ParseError),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Calls the solver exposes for one variable scope.
pub trait VariableBackend {
    /// Names of all variables in the scope, in display order.
    fn get_variables(&self) -> EngineResult<Vec<String>>;

    fn get_variable_value(&self, name: &str) -> EngineResult<String>;

    fn set_variable_value(&mut self, name: &str, value: &str) -> EngineResult<()>;

    /// First-time binding only.
    fn create_variable(&mut self, name: &str, value: &str) -> EngineResult<()>;
}

/// Typed access to a [`VariableBackend`].
#[derive(Debug, Clone, Default)]
pub struct VariableStore<B> {
    backend: B,
}

impl<B: VariableBackend> VariableStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn into_backend(self) -> B {
        self.backend
    }

    /// Variable names in display order.
    pub fn names(&self) -> StoreResult<Vec<String>> {
        Ok(self.backend.get_variables()?)
    }

    pub fn contains(&self, name: &str) -> StoreResult<bool> {
        Ok(self.names()?.iter().any(|n| n == name))
    }

    /// Currently bound text of `name`.
    pub fn get_raw(&self, name: &str) -> StoreResult<String> {
        if !self.contains(name)? {
            return Err(StoreError::UnknownVariable(name.to_string()));
        }
        Ok(self.backend.get_variable_value(name)?)
    }

    pub fn get(&self, name: &str) -> StoreResult<Variable> {
        let raw = self.get_raw(name)?;
        Ok(Variable::new(name, raw))
    }

    /// All variables in display order.
    pub fn variables(&self) -> StoreResult<Vec<Variable>> {
        self.names()?
            .iter()
            .map(|name| {
                let raw = self.backend.get_variable_value(name)?;
                Ok(Variable::new(name, raw))
            })
            .collect()
    }

    /// Bind `name` to `value`, creating the variable on first use.
    ///
    /// Returns an expression referring to `name` so the variable can be used in
    /// further algebra.
    pub fn set(&mut self, name: &str, value: impl Into<VariableValue>) -> StoreResult<Expression> {
        let reference = Expression::variable(name)?;
        let value = value.into();

        let result = if self.contains(name)? {
            debug!(name, value = value.as_text(), "updating variable");
            self.backend.set_variable_value(name, value.as_text())
        } else {
            debug!(name, value = value.as_text(), "creating variable");
            self.backend.create_variable(name, value.as_text())
        };

        if let Err(e) = result {
            warn!(name, "variable update failed: {}", e);
            return Err(e.into());
        }
        Ok(reference)
    }

    /// Create a new variable named `base1`, `base2`, ... whichever is free first.
    pub fn create_unique(&mut self, base: &str, value: impl Into<VariableValue>) -> StoreResult<Expression> {
        let name = increment_name(base, &self.names()?);
        self.set(&name, value)
    }
}

/// In-memory variable scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryBackend {
    /// Raw value text indexed by name
    values: HashMap<String, String>,
    /// Creation order
    order: Vec<String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a scope from `(name, value)` pairs.
    pub fn with_variables<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let mut backend = Self::new();
        for (name, value) in pairs {
            if !backend.values.contains_key(name) {
                backend.order.push(name.to_string());
            }
            backend.values.insert(name.to_string(), value.to_string());
        }
        backend
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

impl VariableBackend for MemoryBackend {
    fn get_variables(&self) -> EngineResult<Vec<String>> {
        Ok(self.order.clone())
    }

    fn get_variable_value(&self, name: &str) -> EngineResult<String> {
        self.values
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::new("GetVariableValue", format!("no variable named '{}'", name)))
    }

    fn set_variable_value(&mut self, name: &str, value: &str) -> EngineResult<()> {
        match self.values.get_mut(name) {
            Some(slot) => {
                *slot = value.to_string();
                Ok(())
            }
            None => Err(EngineError::new(
                "SetVariableValue",
                format!("no variable named '{}'", name),
            )),
        }
    }

    fn create_variable(&mut self, name: &str, value: &str) -> EngineResult<()> {
        if self.values.contains_key(name) {
            return Err(EngineError::new(
                "CreateVariable",
                format!("variable '{}' already exists", name),
            ));
        }
        self.order.push(name.to_string());
        self.values.insert(name.to_string(), value.to_string());
        Ok(())
    }
}
