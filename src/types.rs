//! Types module: primitive column kinds and scalar values.
//!
//! This module provides ColumnType and Value, plus the single ordering shared
//! by comparisons, sorts, indexes and min/max aggregates.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;
use serde::{Serialize, Deserialize};

/// The primitive kind of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[non_exhaustive]
pub enum ColumnType {
    Int64,
    Float64,
    /// Interned strings, stored as string ids.
    String,
}

/// A scalar value read out of a column or supplied as a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    String(Arc<str>),
}

impl ColumnType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ColumnType::Int64 | ColumnType::Float64)
    }

    /// Whether a literal of `literal` kind may be compared against a column of
    /// this kind. Integers widen to floats; nothing else converts.
    pub fn accepts(&self, literal: ColumnType) -> bool {
        *self == literal || (*self == ColumnType::Float64 && literal == ColumnType::Int64)
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnType::Int64 => write!(f, "int64"),
            ColumnType::Float64 => write!(f, "float64"),
            ColumnType::String => write!(f, "string"),
        }
    }
}

impl Value {
    /// The column kind of this value, `None` for null.
    pub fn column_type(&self) -> Option<ColumnType> {
        match self {
            Value::Null => None,
            Value::Int(_) => Some(ColumnType::Int64),
            Value::Float(_) => Some(ColumnType::Float64),
            Value::String(_) => Some(ColumnType::String),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn string(s: impl AsRef<str>) -> Self {
        Value::String(Arc::from(s.as_ref()))
    }

    /// Converts an integer literal to a float; used when an int literal is
    /// compared against a float column.
    pub fn widen_to(self, ty: ColumnType) -> Self {
        match (self, ty) {
            (Value::Int(i), ColumnType::Float64) => Value::Float(i as f64),
            (v, _) => v,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "{:?}", s),
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

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(Arc::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::string(v)
    }
}

/// Orders two floats. `-0.0` and `0.0` are equal; otherwise this is
/// `f64::total_cmp`, so NaN sorts after every other float.
#[inline]
pub fn compare_f64(a: f64, b: f64) -> Ordering {
    if a == b {
        Ordering::Equal
    } else {
        a.total_cmp(&b)
    }
}

/// Compares two non-null values of the same kind.
///
/// Integers compare numerically, floats by `compare_f64`, strings bytewise.
/// An int against a float is compared as floats. Returns `None` for nulls
/// or incompatible kinds.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Float(a), Value::Float(b)) => Some(compare_f64(*a, *b)),
        (Value::Int(a), Value::Float(b)) => Some(compare_f64(*a as f64, *b)),
        (Value::Float(a), Value::Int(b)) => Some(compare_f64(*a, *b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.as_bytes().cmp(b.as_bytes())),
        _ => None,
    }
}
