//! Parameter and result value types.
//!
//! Callers tag every bound parameter with a [`Scalar`] variant, so the layer
//! never has to guess a value's type from its textual form.

use std::fmt;
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

/// A single SQL value, used both for bound parameters and result cells.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Timestamp without timezone (stored as DATETIME2).
    DateTime(NaiveDateTime),
}

impl Scalar {
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Scalar::Int(v) => Some(*v),
            Scalar::Bool(b) => Some(i64::from(*b)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short type label used in logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Scalar::Null => "null",
            Scalar::Bool(_) => "bool",
            Scalar::Int(_) => "int",
            Scalar::Float(_) => "float",
            Scalar::Text(_) => "text",
            Scalar::DateTime(_) => "datetime",
        }
    }

    /// Convert a JSON value into a scalar.
    ///
    /// Arrays and objects are stored as their JSON text, matching how the
    /// application keeps JSON columns in NVARCHAR fields.
    pub fn from_json(value: &serde_json::Value) -> Self {
        use serde_json::Value;

        match value {
            Value::Null => Scalar::Null,
            Value::Bool(b) => Scalar::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Scalar::Int(i),
                None => n.as_f64().map(Scalar::Float).unwrap_or(Scalar::Null),
            },
            Value::String(s) => Scalar::Text(s.clone()),
            other => Scalar::Text(other.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("NULL"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(s) => write!(f, "'{}'", s),
            Scalar::DateTime(dt) => write!(f, "'{}'", dt.format("%Y-%m-%d %H:%M:%S%.f")),
        }
    }
}

impl Serialize for Scalar {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Scalar::Null => serializer.serialize_none(),
            Scalar::Bool(b) => serializer.serialize_bool(*b),
            Scalar::Int(v) => serializer.serialize_i64(*v),
            Scalar::Float(v) => serializer.serialize_f64(*v),
            Scalar::Text(s) => serializer.serialize_str(s),
            Scalar::DateTime(dt) => {
                serializer.collect_str(&dt.format("%Y-%m-%dT%H:%M:%S%.3f"))
            }
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<u32> for Scalar {
    fn from(v: u32) -> Self {
        Scalar::Int(i64::from(v))
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl From<NaiveDateTime> for Scalar {
    fn from(v: NaiveDateTime) -> Self {
        Scalar::DateTime(v)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Scalar::Null)
    }
}

/// One result row: field names shared across the row set, values in engine order.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Scalar>,
}

impl Row {
    /// Build a row. `values` must line up with `columns`.
    pub fn new(columns: Arc<[String]>, values: Vec<Scalar>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Value of the named field, if present.
    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.columns
            .iter()
            .position(|c| c == name)
            .and_then(|idx| self.values.get(idx))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(field, value)` pairs in engine order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Ordered rows returned by a read.
pub type RowSet = Vec<Row>;

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> Row {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        Row::new(columns, vec![Scalar::Int(7), Scalar::Text("Acme".into())])
    }

    #[test]
    fn test_row_get_by_name() {
        let row = row();
        assert_eq!(row.get("id"), Some(&Scalar::Int(7)));
        assert_eq!(row.get("name").and_then(Scalar::as_str), Some("Acme"));
        assert_eq!(row.get("missing"), None);
    }

    #[test]
    fn test_row_serializes_in_column_order() {
        let json = serde_json::to_string(&row()).unwrap();
        assert_eq!(json, r#"{"id":7,"name":"Acme"}"#);
    }

    #[test]
    fn test_from_json_literals() {
        assert_eq!(Scalar::from_json(&serde_json::json!(10)), Scalar::Int(10));
        assert_eq!(Scalar::from_json(&serde_json::json!(1.5)), Scalar::Float(1.5));
        assert_eq!(Scalar::from_json(&serde_json::json!(true)), Scalar::Bool(true));
        assert_eq!(Scalar::from_json(&serde_json::json!(null)), Scalar::Null);
        assert_eq!(
            Scalar::from_json(&serde_json::json!(["a", "b"])),
            Scalar::Text(r#"["a","b"]"#.to_string())
        );
    }

    #[test]
    fn test_option_into_scalar() {
        let none: Option<i64> = None;
        assert_eq!(Scalar::from(none), Scalar::Null);
        assert_eq!(Scalar::from(Some("x")), Scalar::Text("x".into()));
    }
}
