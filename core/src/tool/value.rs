//! Dynamically-typed tool input values
//!
//! Tool inputs arrive from the model as loose JSON. `ToolValue` is the
//! tagged in-process representation with explicit accessor helpers;
//! validation converts these to strongly-typed per-tool views at the
//! boundary.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A single tool input value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolValue {
    Null,
    Bool(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<ToolValue>),
    Map(BTreeMap<String, ToolValue>),
}

impl ToolValue {
    /// String view, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ToolValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer view; floats with no fractional part coerce
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ToolValue::Integer(i) => Some(*i),
            ToolValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            _ => None,
        }
    }

    /// Boolean view
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ToolValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// List view
    pub fn as_list(&self) -> Option<&[ToolValue]> {
        match self {
            ToolValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Map view
    pub fn as_map(&self) -> Option<&BTreeMap<String, ToolValue>> {
        match self {
            ToolValue::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Name of the variant, for validation messages
    pub fn type_name(&self) -> &'static str {
        match self {
            ToolValue::Null => "null",
            ToolValue::Bool(_) => "boolean",
            ToolValue::Integer(_) => "integer",
            ToolValue::Float(_) => "float",
            ToolValue::String(_) => "string",
            ToolValue::List(_) => "list",
            ToolValue::Map(_) => "map",
        }
    }
}

impl From<serde_json::Value> for ToolValue {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => ToolValue::Null,
            serde_json::Value::Bool(b) => ToolValue::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ToolValue::Integer(i)
                } else {
                    ToolValue::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => ToolValue::String(s),
            serde_json::Value::Array(items) => {
                ToolValue::List(items.into_iter().map(ToolValue::from).collect())
            }
            serde_json::Value::Object(map) => ToolValue::Map(
                map.into_iter()
                    .map(|(k, v)| (k, ToolValue::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&ToolValue> for serde_json::Value {
    fn from(value: &ToolValue) -> Self {
        match value {
            ToolValue::Null => serde_json::Value::Null,
            ToolValue::Bool(b) => serde_json::Value::Bool(*b),
            ToolValue::Integer(i) => serde_json::Value::from(*i),
            ToolValue::Float(f) => serde_json::Value::from(*f),
            ToolValue::String(s) => serde_json::Value::String(s.clone()),
            ToolValue::List(items) => {
                serde_json::Value::Array(items.iter().map(serde_json::Value::from).collect())
            }
            ToolValue::Map(map) => serde_json::Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<&str> for ToolValue {
    fn from(s: &str) -> Self {
        ToolValue::String(s.to_string())
    }
}

impl From<String> for ToolValue {
    fn from(s: String) -> Self {
        ToolValue::String(s)
    }
}

impl From<i64> for ToolValue {
    fn from(i: i64) -> Self {
        ToolValue::Integer(i)
    }
}

impl From<bool> for ToolValue {
    fn from(b: bool) -> Self {
        ToolValue::Bool(b)
    }
}

/// Ordered tool input map
pub type ToolInput = BTreeMap<String, ToolValue>;

/// Build a [`ToolInput`] from a JSON object, ignoring non-object input
pub fn input_from_json(value: serde_json::Value) -> ToolInput {
    match ToolValue::from(value) {
        ToolValue::Map(map) => map,
        _ => ToolInput::new(),
    }
}

/// Serialize a [`ToolInput`] back to a JSON object
pub fn input_to_json(input: &ToolInput) -> serde_json::Value {
    serde_json::Value::Object(
        input
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::from(v)))
            .collect(),
    )
}
