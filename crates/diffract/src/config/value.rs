//! Typed parameter values.

use std::fmt;

use crate::error::{DiffractError, Result};

/// A parameter value as seen through the flat key/value interface.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    /// Name of the value's type, for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            ParamValue::Bool(_) => "bool",
            ParamValue::Int(_) => "int",
            ParamValue::Float(_) => "float",
            ParamValue::Text(_) => "string",
        }
    }

    /// Parse `raw` into a value of the same type as `self`.
    ///
    /// Booleans are written `True`/`False` in parameter files; lowercase is accepted.
    pub fn coerce(&self, key: &str, raw: &str) -> Result<ParamValue> {
        let raw = raw.trim();
        let mismatch = || {
            DiffractError::Config(format!(
                "parameter '{}' expects {} but got '{}'",
                key,
                self.type_name(),
                raw
            ))
        };
        match self {
            ParamValue::Bool(_) => match raw {
                "True" | "true" => Ok(ParamValue::Bool(true)),
                "False" | "false" => Ok(ParamValue::Bool(false)),
                _ => Err(mismatch()),
            },
            ParamValue::Int(_) => raw.parse().map(ParamValue::Int).map_err(|_| mismatch()),
            ParamValue::Float(_) => raw.parse().map(ParamValue::Float).map_err(|_| mismatch()),
            ParamValue::Text(_) => Ok(ParamValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(true) => write!(f, "True"),
            ParamValue::Bool(false) => write!(f, "False"),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Float(v) => write!(f, "{}", v),
            ParamValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// Rust types that can back a parameter field.
pub trait ParamType: Sized {
    fn into_param(self) -> ParamValue;
    fn from_param(key: &str, value: ParamValue) -> Result<Self>;
}

fn wrong_type(key: &str, expected: &str, value: &ParamValue) -> DiffractError {
    DiffractError::Config(format!(
        "parameter '{}' expects {} but got {} '{}'",
        key,
        expected,
        value.type_name(),
        value
    ))
}

impl ParamType for bool {
    fn into_param(self) -> ParamValue {
        ParamValue::Bool(self)
    }

    fn from_param(key: &str, value: ParamValue) -> Result<Self> {
        match value {
            ParamValue::Bool(v) => Ok(v),
            other => Err(wrong_type(key, "bool", &other)),
        }
    }
}

impl ParamType for usize {
    fn into_param(self) -> ParamValue {
        ParamValue::Int(self as i64)
    }

    fn from_param(key: &str, value: ParamValue) -> Result<Self> {
        match value {
            ParamValue::Int(v) if v >= 0 => Ok(v as usize),
            other => Err(wrong_type(key, "non-negative int", &other)),
        }
    }
}

impl ParamType for f64 {
    fn into_param(self) -> ParamValue {
        ParamValue::Float(self)
    }

    fn from_param(key: &str, value: ParamValue) -> Result<Self> {
        match value {
            ParamValue::Float(v) => Ok(v),
            ParamValue::Int(v) => Ok(v as f64),
            other => Err(wrong_type(key, "float", &other)),
        }
    }
}

impl ParamType for String {
    fn into_param(self) -> ParamValue {
        ParamValue::Text(self)
    }

    fn from_param(key: &str, value: ParamValue) -> Result<Self> {
        match value {
            ParamValue::Text(v) => Ok(v),
            other => Err(wrong_type(key, "string", &other)),
        }
    }
}
