//! Document identifier derivation.
//!
//! A document reuses the value of its configured identifier field(s) when the
//! row carries them. Otherwise the identifier is synthesized from the write
//! identity and the row's position, so re-executing a partition reproduces
//! the same identifiers.

use snafu::prelude::*;

use crate::document::{Document, ID_FIELD, Value};
use crate::error::{ConfigError, IdFieldMissingSnafu};
use crate::schema::Schema;

/// Position of a row within a write.
#[derive(Debug, Clone, Copy)]
pub struct RowOrigin<'a> {
    /// Identity of the job or streaming epoch the row belongs to.
    pub write_id: &'a str,
    pub partition: usize,
    /// Offset of the row within its partition.
    pub offset: usize,
}

/// Deterministic identifier for a row without one.
pub fn synthesize_id(origin: &RowOrigin<'_>) -> Value {
    Value::String(format!(
        "{}-{:05}-{:08}",
        origin.write_id, origin.partition, origin.offset
    ))
}

/// Resolves `_id` from the configured identifier fields.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    fields: Vec<String>,
}

impl IdentityResolver {
    /// Check that every identifier field exists in the schema.
    ///
    /// `_id` itself may be absent; rows then get synthesized identifiers.
    pub fn new(schema: &Schema, fields: &[String]) -> Result<Self, ConfigError> {
        for field in fields {
            ensure!(
                field == ID_FIELD || schema.field(field).is_some(),
                IdFieldMissingSnafu {
                    field: field.clone()
                }
            );
        }
        Ok(Self {
            fields: fields.to_vec(),
        })
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Set `_id` as the first field of a mapped document.
    pub fn assign(&self, document: &mut Document, origin: &RowOrigin<'_>) {
        let id = self.derive(document).unwrap_or_else(|| synthesize_id(origin));
        document.insert_first(ID_FIELD, id);
    }

    fn derive(&self, document: &Document) -> Option<Value> {
        match self.fields.as_slice() {
            [field] => present(document, field).cloned(),
            fields => {
                let mut id = Document::with_capacity(fields.len());
                for field in fields {
                    id.insert(field.as_str(), present(document, field)?.clone());
                }
                Some(Value::Document(id))
            }
        }
    }
}

fn present<'a>(document: &'a Document, field: &str) -> Option<&'a Value> {
    document.get(field).filter(|v| !v.is_null())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{DataType, Field};

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("a", DataType::Long, true),
            Field::new("b", DataType::String, true),
        ])
    }

    fn origin(offset: usize) -> RowOrigin<'static> {
        RowOrigin {
            write_id: "job",
            partition: 3,
            offset,
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = IdentityResolver::new(&schema(), &["c".to_string()]).unwrap_err();
        assert!(matches!(err, ConfigError::IdFieldMissing { ref field } if field == "c"));
    }

    #[test]
    fn test_default_id_may_be_absent() {
        let resolver = IdentityResolver::new(&schema(), &[ID_FIELD.to_string()]).unwrap();
        let mut doc: Document = [("a", 1i64)].into_iter().collect();
        resolver.assign(&mut doc, &origin(42));
        assert_eq!(doc.id(), Some(&Value::from("job-00003-00000042")));
        assert_eq!(doc.keys().next(), Some(ID_FIELD));
    }

    #[test]
    fn test_single_field_reused() {
        let resolver = IdentityResolver::new(&schema(), &["b".to_string()]).unwrap();
        let mut doc: Document = [("a", Value::Int64(1)), ("b", Value::from("key"))]
            .into_iter()
            .collect();
        resolver.assign(&mut doc, &origin(0));
        assert_eq!(doc.id(), Some(&Value::from("key")));
        // the source field stays in place
        assert_eq!(doc.get("b"), Some(&Value::from("key")));
    }

    #[test]
    fn test_compound_fields_build_nested_id() {
        let fields = ["b".to_string(), "a".to_string()];
        let resolver = IdentityResolver::new(&schema(), &fields).unwrap();
        let mut doc: Document = [("a", Value::Int64(1)), ("b", Value::from("x"))]
            .into_iter()
            .collect();
        resolver.assign(&mut doc, &origin(0));
        let Some(Value::Document(id)) = doc.id() else {
            panic!("expected nested identifier");
        };
        assert_eq!(id.keys().collect::<Vec<_>>(), vec!["b", "a"]);
    }

    #[test]
    fn test_missing_value_falls_back_to_synthesized() {
        let fields = ["a".to_string(), "b".to_string()];
        let resolver = IdentityResolver::new(&schema(), &fields).unwrap();
        let mut doc: Document = [("a", Value::Int64(1)), ("b", Value::Null)]
            .into_iter()
            .collect();
        resolver.assign(&mut doc, &origin(5));
        assert_eq!(doc.id(), Some(&Value::from("job-00003-00000005")));
    }

    #[test]
    fn test_synthesized_ids_are_stable() {
        assert_eq!(synthesize_id(&origin(9)), synthesize_id(&origin(9)));
        assert_ne!(synthesize_id(&origin(9)), synthesize_id(&origin(10)));
    }
}
