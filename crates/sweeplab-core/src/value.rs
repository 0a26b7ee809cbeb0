//! Scalar values, parameter points, and storage types
//!
//! Every quantity flowing through an experiment — parameters, metadata,
//! results — is a [`Value`]: a scalar or a short list of scalars. Result
//! sets infer a [`StorageType`] per field from the first value they see,
//! and back-fill missing cells with that type's zero.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use num_complex::Complex64;

use crate::error::{Error, Result};

/// A mapping from field name to value. Iteration order is sorted by name.
pub type FieldMap = BTreeMap<String, Value>;

/// A point in the parameter space: parameter name to value.
pub type Point = FieldMap;

/// A scalar or short-list value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int(i64),
    Float(f64),
    Complex(Complex64),
    Bool(bool),
    String(String),
    Timestamp(DateTime<Utc>),
    /// A short list of scalars, all of the same kind.
    List(Vec<Value>),
}

impl Value {
    /// The storage type this value infers to. Lists infer from their first
    /// element; an empty list carries no type information and is rejected.
    pub fn storage_type(&self) -> Result<StorageType> {
        match self {
            Value::Int(_) => Ok(StorageType::Scalar(ScalarKind::Int)),
            Value::Float(_) => Ok(StorageType::Scalar(ScalarKind::Float)),
            Value::Complex(_) => Ok(StorageType::Scalar(ScalarKind::Complex)),
            Value::Bool(_) => Ok(StorageType::Scalar(ScalarKind::Bool)),
            Value::String(_) | Value::Timestamp(_) => Ok(StorageType::Scalar(ScalarKind::String)),
            Value::List(vs) => match vs.first() {
                Some(first) => match first.storage_type()? {
                    StorageType::Scalar(kind) => Ok(StorageType::List(kind)),
                    StorageType::List(_) => Err(Error::ResultsStructure(
                        "lists may only contain scalars".into(),
                    )),
                },
                None => Err(Error::ResultsStructure(
                    "cannot infer a type for an empty list".into(),
                )),
            },
        }
    }

    /// Numeric view of the value, if it has one.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Complex(c) => write!(f, "{c}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Timestamp(t) => write!(f, "{}", t.to_rfc3339_opts(SecondsFormat::Micros, true)),
            Value::List(vs) => {
                write!(f, "[")?;
                for (i, v) in vs.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Complex64> for Value {
    fn from(v: Complex64) -> Self {
        Value::Complex(v)
    }
}

impl From<DateTime<Utc>> for Value {
    fn from(v: DateTime<Utc>) -> Self {
        Value::Timestamp(v)
    }
}

impl From<Vec<Value>> for Value {
    fn from(v: Vec<Value>) -> Self {
        Value::List(v)
    }
}

/// Build a [`Point`] (or any [`FieldMap`]) from `name => value` pairs.
#[macro_export]
macro_rules! point {
    () => { $crate::Point::new() };
    ($($name:expr => $value:expr),+ $(,)?) => {{
        let mut p = $crate::Point::new();
        $( p.insert(($name).to_string(), $crate::Value::from($value)); )+
        p
    }};
}

/// The scalar kinds a column can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Int,
    Float,
    Complex,
    Bool,
    String,
}

impl ScalarKind {
    pub fn zero(&self) -> Value {
        match self {
            ScalarKind::Int => Value::Int(0),
            ScalarKind::Float => Value::Float(0.0),
            ScalarKind::Complex => Value::Complex(Complex64::new(0.0, 0.0)),
            ScalarKind::Bool => Value::Bool(false),
            ScalarKind::String => Value::String(String::new()),
        }
    }

    fn coerce(&self, v: &Value) -> Option<Value> {
        match (self, v) {
            (ScalarKind::Int, Value::Int(_))
            | (ScalarKind::Float, Value::Float(_))
            | (ScalarKind::Complex, Value::Complex(_))
            | (ScalarKind::Bool, Value::Bool(_))
            | (ScalarKind::String, Value::String(_)) => Some(v.clone()),
            // numeric widening
            (ScalarKind::Float, Value::Int(i)) => Some(Value::Float(*i as f64)),
            (ScalarKind::Complex, Value::Int(i)) => {
                Some(Value::Complex(Complex64::new(*i as f64, 0.0)))
            }
            (ScalarKind::Complex, Value::Float(f)) => Some(Value::Complex(Complex64::new(*f, 0.0))),
            // timestamps store as ISO-8601 strings
            (ScalarKind::String, Value::Timestamp(t)) => Some(Value::String(
                t.to_rfc3339_opts(SecondsFormat::Micros, true),
            )),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScalarKind::Int => "int",
            ScalarKind::Float => "float",
            ScalarKind::Complex => "complex",
            ScalarKind::Bool => "bool",
            ScalarKind::String => "string",
        };
        write!(f, "{name}")
    }
}

/// The storage type of a column: a scalar, or a variable-length list of
/// scalars of one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageType {
    Scalar(ScalarKind),
    List(ScalarKind),
}

impl StorageType {
    /// The type-specific zero used to back-fill missing cells.
    pub fn zero(&self) -> Value {
        match self {
            StorageType::Scalar(kind) => kind.zero(),
            StorageType::List(_) => Value::List(Vec::new()),
        }
    }

    /// Fit a value into a column of this type, widening numerics where
    /// that loses nothing. Anything else is a structural error.
    pub fn coerce(&self, v: &Value) -> Result<Value> {
        let fitted = match self {
            StorageType::Scalar(kind) => kind.coerce(v),
            StorageType::List(kind) => match v {
                Value::List(vs) => vs
                    .iter()
                    .map(|item| kind.coerce(item))
                    .collect::<Option<Vec<_>>>()
                    .map(Value::List),
                _ => None,
            },
        };
        fitted.ok_or_else(|| {
            Error::ResultsStructure(format!("value {v} does not fit a column of type {self}"))
        })
    }

    /// Parse the textual form used in persistent schemas.
    pub fn parse(s: &str) -> Result<StorageType> {
        let (list, kind) = match s.strip_prefix("list<").and_then(|s| s.strip_suffix('>')) {
            Some(inner) => (true, inner),
            None => (false, s),
        };
        let kind = match kind {
            "int" => ScalarKind::Int,
            "float" => ScalarKind::Float,
            "complex" => ScalarKind::Complex,
            "bool" => ScalarKind::Bool,
            "string" => ScalarKind::String,
            other => {
                return Err(Error::Format(format!("unknown storage type '{other}'")));
            }
        };
        Ok(if list {
            StorageType::List(kind)
        } else {
            StorageType::Scalar(kind)
        })
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::Scalar(kind) => write!(f, "{kind}"),
            StorageType::List(kind) => write!(f, "list<{kind}>"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_type_inference() {
        assert_eq!(
            Value::Int(3).storage_type().unwrap(),
            StorageType::Scalar(ScalarKind::Int)
        );
        assert_eq!(
            Value::from("hi").storage_type().unwrap(),
            StorageType::Scalar(ScalarKind::String)
        );
        assert_eq!(
            Value::Timestamp(Utc::now()).storage_type().unwrap(),
            StorageType::Scalar(ScalarKind::String)
        );
        assert_eq!(
            Value::List(vec![Value::Float(1.0), Value::Float(2.0)])
                .storage_type()
                .unwrap(),
            StorageType::List(ScalarKind::Float)
        );
        assert!(Value::List(vec![]).storage_type().is_err());
    }

    #[test]
    fn test_zero_values() {
        assert_eq!(StorageType::Scalar(ScalarKind::Int).zero(), Value::Int(0));
        assert_eq!(
            StorageType::Scalar(ScalarKind::Complex).zero(),
            Value::Complex(Complex64::new(0.0, 0.0))
        );
        assert_eq!(
            StorageType::Scalar(ScalarKind::String).zero(),
            Value::String(String::new())
        );
        assert_eq!(
            StorageType::List(ScalarKind::Int).zero(),
            Value::List(vec![])
        );
    }

    #[test]
    fn test_numeric_widening() {
        let float = StorageType::Scalar(ScalarKind::Float);
        assert_eq!(float.coerce(&Value::Int(2)).unwrap(), Value::Float(2.0));

        let complex = StorageType::Scalar(ScalarKind::Complex);
        assert_eq!(
            complex.coerce(&Value::Float(1.5)).unwrap(),
            Value::Complex(Complex64::new(1.5, 0.0))
        );

        // no narrowing
        let int = StorageType::Scalar(ScalarKind::Int);
        assert!(int.coerce(&Value::Float(1.5)).is_err());
        assert!(int.coerce(&Value::from("1")).is_err());
    }

    #[test]
    fn test_storage_type_round_trip_names() {
        for ty in [
            StorageType::Scalar(ScalarKind::Int),
            StorageType::Scalar(ScalarKind::Complex),
            StorageType::List(ScalarKind::String),
        ] {
            assert_eq!(StorageType::parse(&ty.to_string()).unwrap(), ty);
        }
        assert!(StorageType::parse("tensor").is_err());
    }

    #[test]
    fn test_point_macro() {
        let p = point! { "a" => 1, "b" => 2.5, "c" => "x" };
        assert_eq!(p.get("a"), Some(&Value::Int(1)));
        assert_eq!(p.get("b"), Some(&Value::Float(2.5)));
        assert_eq!(p.get("c"), Some(&Value::from("x")));
    }
}
