//! Typed task parameters
//!
//! A [`ParameterSet`] is built by the caller of a start request and handed,
//! read-only, to the task for the lifetime of that activation.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TaskError};

/// Maximum active time in seconds before the scheduler forces a timeout
pub const TASK_TIMEOUT: &str = "task_timeout";

/// How long the built-in wait task stays active, in seconds
pub const TASK_DURATION: &str = "task_duration";

/// A single parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl ParamValue {
    /// Name of the contained type, used in mismatch errors
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Number(_) => "number",
            ParamValue::Text(_) => "string",
        }
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Number(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Number(v as f64)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// Named, typed parameters passed to a task at start time
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParameterSet {
    values: BTreeMap<String, ParamValue>,
}

impl ParameterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.set(name, value);
        self
    }

    /// Insert or overwrite a parameter, returning the previous value
    pub fn set(
        &mut self,
        name: impl Into<String>,
        value: impl Into<ParamValue>,
    ) -> Option<ParamValue> {
        self.values.insert(name.into(), value.into())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.values.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate parameters in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Raw lookup
    pub fn get(&self, name: &str) -> Result<&ParamValue> {
        self.values
            .get(name)
            .ok_or_else(|| TaskError::ParameterNotFound(name.to_string()))
    }

    pub fn number(&self, name: &str) -> Result<f64> {
        match self.get(name)? {
            ParamValue::Number(n) => Ok(*n),
            other => Err(mismatch(name, "number", other)),
        }
    }

    pub fn boolean(&self, name: &str) -> Result<bool> {
        match self.get(name)? {
            ParamValue::Bool(b) => Ok(*b),
            other => Err(mismatch(name, "bool", other)),
        }
    }

    pub fn string(&self, name: &str) -> Result<&str> {
        match self.get(name)? {
            ParamValue::Text(s) => Ok(s),
            other => Err(mismatch(name, "string", other)),
        }
    }

    /// Number lookup where absence is fine but a wrong type is not
    pub fn optional_number(&self, name: &str) -> Result<Option<f64>> {
        if !self.contains(name) {
            return Ok(None);
        }
        self.number(name).map(Some)
    }

    /// Number lookup falling back to `default` when absent
    pub fn number_or(&self, name: &str, default: f64) -> Result<f64> {
        Ok(self.optional_number(name)?.unwrap_or(default))
    }
}

impl FromIterator<(String, ParamValue)> for ParameterSet {
    fn from_iter<I: IntoIterator<Item = (String, ParamValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}

fn mismatch(name: &str, expected: &'static str, found: &ParamValue) -> TaskError {
    TaskError::ParameterTypeMismatch {
        name: name.to_string(),
        expected,
        found: found.type_name(),
    }
}
