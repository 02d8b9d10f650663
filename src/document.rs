//! Schemaless document model.
//!
//! A `Document` is an insertion-ordered mapping from field name to `Value`,
//! the unit persisted by the destination database.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;

use crate::decimal::Decimal128;

/// Name of the identifier field every persisted document carries.
pub const ID_FIELD: &str = "_id";

/// A document field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    Decimal128(Decimal128),
    String(String),
    Binary(Vec<u8>),
    /// UTC datetime with millisecond precision.
    DateTime(DateTime<Utc>),
    Document(Document),
    Array(Vec<Value>),
}

impl Value {
    /// Short name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Boolean(_) => "bool",
            Value::Int32(_) => "int",
            Value::Int64(_) => "long",
            Value::Double(_) => "double",
            Value::Decimal128(_) => "decimal",
            Value::String(_) => "string",
            Value::Binary(_) => "binData",
            Value::DateTime(_) => "date",
            Value::Document(_) => "object",
            Value::Array(_) => "array",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Approximate encoded size in bytes.
    pub fn estimated_size(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int32(_) => 4,
            Value::Int64(_) | Value::Double(_) | Value::DateTime(_) => 8,
            Value::Decimal128(_) => 16,
            Value::String(s) => s.len() + 5,
            Value::Binary(b) => b.len() + 5,
            Value::Document(d) => d.estimated_size(),
            Value::Array(items) => {
                // arrays encode as documents keyed by index
                5 + items
                    .iter()
                    .enumerate()
                    .map(|(i, v)| 2 + i.to_string().len() + v.estimated_size())
                    .sum::<usize>()
            }
        }
    }

    /// Stable textual key for identity comparisons.
    ///
    /// Numerically equal values share a key regardless of their numeric
    /// type, so `Int32(1)`, `Int64(1)` and the decimal `1.00` collide.
    pub fn identity_key(&self) -> String {
        let mut key = String::new();
        self.write_identity_key(&mut key);
        key
    }

    fn write_identity_key(&self, out: &mut String) {
        match self {
            Value::Int32(v) => out.push_str(&format!("n:{v}")),
            Value::Int64(v) => out.push_str(&format!("n:{v}")),
            Value::Double(v) if v.fract() == 0.0 && v.abs() < 9.0e15 => {
                out.push_str(&format!("n:{}", *v as i64))
            }
            Value::Double(v) => out.push_str(&format!("d:{v:?}")),
            Value::Decimal128(d) => {
                out.push_str(&format!("n:{}", d.value().strip_trailing_zeros()))
            }
            Value::String(v) => out.push_str(&format!("s:{v:?}")),
            Value::Document(d) => {
                out.push('{');
                for (name, value) in d.iter() {
                    out.push_str(&format!("{name:?}:"));
                    value.write_identity_key(out);
                    out.push(',');
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for item in items {
                    item.write_identity_key(out);
                    out.push(',');
                }
                out.push(']');
            }
            other => out.push_str(&format!("{other:?}")),
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int32(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int64(value)
    }
}

impl From<Document> for Value {
    fn from(value: Document) -> Self {
        Value::Document(value)
    }
}

/// Ordered field tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    fields: IndexMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: IndexMap::with_capacity(capacity),
        }
    }

    /// Insert or replace a field, keeping the original position on replace.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Insert a field as the first entry, moving it there if already present.
    pub fn insert_first(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.shift_insert(0, key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Remove a field preserving the order of the remaining ones.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    /// The document identifier, if assigned.
    pub fn id(&self) -> Option<&Value> {
        self.get(ID_FIELD)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Copy of this document without the identifier field.
    pub fn without_id(&self) -> Document {
        let mut doc = self.clone();
        doc.remove(ID_FIELD);
        doc
    }

    /// Approximate encoded size in bytes, used for bulk payload limits.
    pub fn estimated_size(&self) -> usize {
        5 + self
            .fields
            .iter()
            .map(|(k, v)| 2 + k.len() + v.estimated_size())
            .sum::<usize>()
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decimal::Decimal;

    #[test]
    fn test_insert_first_moves_existing_key() {
        let mut doc: Document = [("a", Value::Int32(1)), ("_id", Value::Null)]
            .into_iter()
            .collect();
        doc.insert_first(ID_FIELD, "x");
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["_id", "a"]);
        assert_eq!(doc.id(), Some(&Value::String("x".to_string())));
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut doc: Document = [("a", 1i32), ("b", 2), ("c", 3)].into_iter().collect();
        doc.remove("b");
        assert_eq!(doc.keys().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_estimated_size_grows_with_content() {
        let small: Document = [("a", "x")].into_iter().collect();
        let large: Document = [("a", "x".repeat(100))].into_iter().collect();
        assert!(large.estimated_size() > small.estimated_size() + 90);
    }

    #[test]
    fn test_identity_key_equal_numbers_collide() {
        let dec = |s: &str| {
            Value::Decimal128(s.parse::<Decimal>().unwrap().to_decimal128().unwrap())
        };
        assert_eq!(Value::Int32(1).identity_key(), Value::Int64(1).identity_key());
        assert_eq!(Value::Int64(1).identity_key(), dec("1.00").identity_key());
        assert_eq!(Value::Double(1.0).identity_key(), Value::Int32(1).identity_key());
        assert_eq!(dec("1.5").identity_key(), dec("1.50").identity_key());
        assert_ne!(dec("1.5").identity_key(), dec("15").identity_key());
    }

    #[test]
    fn test_identity_key_distinguishes_types() {
        assert_ne!(Value::from("1").identity_key(), Value::Int32(1).identity_key());
        assert_eq!(Value::from("a").identity_key(), Value::from("a").identity_key());

        let compound = |v: Value| -> Value { [("a", v)].into_iter().collect::<Document>().into() };
        assert_eq!(
            compound(Value::Int32(7)).identity_key(),
            compound(Value::Int64(7)).identity_key()
        );
    }
}
