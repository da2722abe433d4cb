//! The Value type - the dynamically-typed tree that flows through ports.
//!
//! Port arguments, port results, and data cells all carry `Value`s. The type
//! maps directly to JSON but is encoding-agnostic.
//!
//! # Design Notes
//!
//! - Uses `BTreeMap` for deterministic ordering (important for comparison)
//! - Uses `i64` for integers (sufficient for the dispatch model)
//! - `Null` doubles as "no result" at the public call surface

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Argument list carried by a port call.
pub type Args = Vec<Value>;

/// A tree-shaped value flowing through the wired port graph.
///
/// This is the universal data representation in capsula: constructor
/// arguments, port arguments, method results, and data cells are all
/// `Value`s.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value. A port wired to zero callables yields `Null`.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Key-value map with string keys.
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Create a null value.
    pub fn null() -> Self {
        Value::Null
    }

    /// Create an empty map.
    pub fn map() -> Self {
        Value::Map(BTreeMap::new())
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a map.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Check if this value is an array.
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    /// Get the boolean payload, if any.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get the integer payload, if any.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get the float payload, if any.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get the string payload, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get the array payload, if any.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Get the map payload, if any.
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::String(s) => write!(f, "{}", s),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Outcome of a port filter stage.
///
/// A filter either rewrites the argument list and lets the call continue,
/// or short-circuits it: no downstream target runs and the call yields no
/// result.
#[derive(Clone, Debug, PartialEq)]
pub enum Flow {
    /// Continue the call with the given (possibly rewritten) arguments.
    Continue(Args),
    /// STOP - abort propagation, the call produces no result.
    Stop,
}

impl Flow {
    /// Coerce a dynamically supplied value into a filter outcome.
    ///
    /// Only an array coerces (to [`Flow::Continue`]); anything else is an
    /// illegal filter return value. Host integrations that accept untyped
    /// filter results go through this.
    pub fn try_from_value(value: Value) -> Result<Flow, Error> {
        match value {
            Value::Array(items) => Ok(Flow::Continue(items)),
            other => Err(Error::IllegalFiltersReturnValue {
                message: format!("expected an argument array, got: {}", other),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_is_default() {
        assert_eq!(Value::default(), Value::Null);
        assert!(Value::null().is_null());
    }

    #[test]
    fn constructors() {
        assert!(Value::map().is_map());
        assert!(Value::array().is_array());
    }

    #[test]
    fn accessors() {
        assert_eq!(Value::from(true).as_bool(), Some(true));
        assert_eq!(Value::from(7).as_integer(), Some(7));
        assert_eq!(Value::from(1.5).as_float(), Some(1.5));
        assert_eq!(Value::from("hi").as_str(), Some("hi"));
        assert_eq!(Value::Null.as_str(), None);
        assert_eq!(Value::Null.as_integer(), None);
    }

    #[test]
    fn array_accessor() {
        let v = Value::Array(vec![Value::from(1), Value::from(2)]);
        assert_eq!(v.as_array().unwrap().len(), 2);
        assert!(Value::Null.as_array().is_none());
    }

    #[test]
    fn map_accessor() {
        let mut map = BTreeMap::new();
        map.insert("k".to_string(), Value::from(1));
        let v = Value::Map(map);
        assert_eq!(v.as_map().unwrap().get("k"), Some(&Value::from(1)));
    }

    #[test]
    fn display_scalar() {
        assert_eq!(Value::Null.to_string(), "null");
        assert_eq!(Value::from(42).to_string(), "42");
        assert_eq!(Value::from("x").to_string(), "x");
    }

    #[test]
    fn display_nested() {
        let v = Value::Array(vec![Value::from(1), Value::from("a")]);
        assert_eq!(v.to_string(), "[1, a]");

        let mut map = BTreeMap::new();
        map.insert("b".to_string(), Value::from(2));
        map.insert("a".to_string(), Value::from(1));
        assert_eq!(Value::Map(map).to_string(), "{a: 1, b: 2}");
    }

    #[test]
    fn serde_round_trip() {
        let v = Value::Array(vec![Value::from("x"), Value::from(3), Value::Null]);
        let json = serde_json::to_string(&v).unwrap();
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, v);
    }

    #[test]
    fn flow_from_array() {
        let flow = Flow::try_from_value(Value::Array(vec![Value::from(1)])).unwrap();
        assert_eq!(flow, Flow::Continue(vec![Value::from(1)]));
    }

    #[test]
    fn flow_from_non_array_is_illegal() {
        let err = Flow::try_from_value(Value::from("nope")).unwrap_err();
        assert!(matches!(err, Error::IllegalFiltersReturnValue { .. }));
    }
}
