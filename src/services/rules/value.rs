//! Runtime values of the condition interpreter
//!
//! Values borrow from the cycle's sample, previous sample and diff, so
//! evaluating a rule never copies records.

use super::EvalError;
use crate::models::{Diff, DiffEntry, FieldChanges, FieldDelta, FieldValue, MetricRecord};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

/// Reducers accepted by `aggregate` and usable as bare names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Min,
    Max,
    Sum,
    Len,
    Avg,
}

impl Reducer {
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "min" => Some(Reducer::Min),
            "max" => Some(Reducer::Max),
            "sum" => Some(Reducer::Sum),
            "len" | "count" => Some(Reducer::Len),
            "avg" | "mean" => Some(Reducer::Avg),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Reducer::Min => "min",
            Reducer::Max => "max",
            Reducer::Sum => "sum",
            Reducer::Len => "len",
            Reducer::Avg => "avg",
        }
    }
}

#[derive(Debug, Clone)]
pub enum Value<'a> {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Cow<'a, str>),
    List(Vec<Value<'a>>),
    Record(&'a MetricRecord),
    /// Path-keyed record mapping (`data`, `prev_data`).
    Entries(&'a BTreeMap<String, MetricRecord>),
    Diff(&'a Diff),
    Entry(&'a str, &'a DiffEntry),
    Changes(&'a FieldChanges),
    Delta(&'a FieldDelta),
    Reducer(Reducer),
}

impl<'a> Value<'a> {
    pub fn str(s: &'a str) -> Self {
        Value::Str(Cow::Borrowed(s))
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "None",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Record(_) => "record",
            Value::Entries(_) => "entries",
            Value::Diff(_) => "diff",
            Value::Entry(..) => "diff entry",
            Value::Changes(_) => "changes",
            Value::Delta(_) => "delta",
            Value::Reducer(_) => "function",
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    #[must_use]
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Bool(b) => *b,
            Value::Int(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Entries(entries) => !entries.is_empty(),
            Value::Diff(diff) => diff.has_changes(),
            Value::Entry(_, entry) => entry.is_change(),
            Value::Changes(changes) => !changes.is_empty(),
            Value::Record(_) | Value::Delta(_) | Value::Reducer(_) => true,
        }
    }

    /// Numeric view; booleans count as 0/1.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(b) => Some(f64::from(u8::from(*b))),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int(_) | Value::Float(_) | Value::Bool(_))
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Structural equality. Numbers compare by value across int/float.
    #[must_use]
    pub fn equals(&self, other: &Value<'_>) -> bool {
        match (self, other) {
            (Value::None, Value::None) => true,
            (Value::Str(a), Value::Str(b)) => a == b,
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => a.as_f64() == b.as_f64(),
            },
            (Value::List(a), Value::List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.equals(y))
            }
            (Value::Record(a), Value::Record(b)) => a == b,
            (Value::Delta(a), Value::Delta(b)) => a == b,
            (Value::Reducer(a), Value::Reducer(b)) => a == b,
            _ => false,
        }
    }

    /// Ordering for `< <= > >=`. `None` means the comparison is false
    /// (an operand is absent); mixed kinds are a type error.
    pub fn compare(&self, other: &Value<'_>) -> Result<Option<Ordering>, EvalError> {
        match (self, other) {
            (Value::None, _) | (_, Value::None) => Ok(None),
            (Value::Str(a), Value::Str(b)) => Ok(Some(a[..].cmp(&b[..]))),
            (a, b) if a.is_numeric() && b.is_numeric() => match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) => Ok(Some(x.cmp(&y))),
                _ => Ok(a.as_f64().zip(b.as_f64()).and_then(|(x, y)| x.partial_cmp(&y))),
            },
            (a, b) => Err(EvalError::Type(format!(
                "cannot order {} and {}",
                a.type_name(),
                b.type_name()
            ))),
        }
    }

    /// Lift a stored metric into the interpreter.
    #[must_use]
    pub fn from_field(value: FieldValue) -> Value<'static> {
        match value {
            FieldValue::Bool(b) => Value::Bool(b),
            FieldValue::Int(v) => Value::Int(v),
            FieldValue::Float(v) => Value::Float(v),
            FieldValue::Text(s) => Value::Str(Cow::Owned(s)),
            FieldValue::Absent => Value::None,
        }
    }

    #[must_use]
    pub fn from_field_ref(value: &'a FieldValue) -> Self {
        match value {
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::Int(v) => Value::Int(*v),
            FieldValue::Float(v) => Value::Float(*v),
            FieldValue::Text(s) => Value::str(s),
            FieldValue::Absent => Value::None,
        }
    }
}

impl fmt::Display for Value<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(true) => f.write_str("True"),
            Value::Bool(false) => f.write_str("False"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Str(s) => f.write_str(s),
            Value::List(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Record(record) => write!(f, "<record {}>", record.path),
            Value::Entries(entries) => write!(f, "<{} entries>", entries.len()),
            Value::Diff(diff) => write!(f, "<diff of {} paths>", diff.len()),
            Value::Entry(path, entry) => write!(f, "<{} {path}>", entry.kind()),
            Value::Changes(changes) => write!(f, "<{} changed fields>", changes.len()),
            Value::Delta(delta) => write!(f, "({}, {})", delta.old, delta.new),
            Value::Reducer(r) => f.write_str(r.as_str()),
        }
    }
}
