//! Source schema model.
//!
//! A schema is an ordered list of named, typed fields drawn from a closed set
//! of type tags. Every tag has exactly one conversion rule in
//! [`crate::mapper`].

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{MappingError, SchemaViolationSnafu};

/// Supported field types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DataType {
    String,
    /// 32-bit signed integer.
    Integer,
    /// 64-bit signed integer.
    Long,
    /// 64-bit floating point.
    Double,
    /// Fixed-point number with `precision` total digits, `scale` after the point.
    Decimal { precision: u8, scale: u8 },
    Boolean,
    /// Calendar date without time.
    Date,
    /// UTC instant.
    Timestamp,
    Binary,
    Array {
        element: Box<DataType>,
        #[serde(default = "default_contains_null")]
        contains_null: bool,
    },
    Struct(Schema),
}

fn default_contains_null() -> bool {
    true
}

impl DataType {
    pub fn decimal(precision: u8, scale: u8) -> Self {
        DataType::Decimal { precision, scale }
    }

    pub fn array(element: DataType, contains_null: bool) -> Self {
        DataType::Array {
            element: Box::new(element),
            contains_null,
        }
    }

    pub fn structure(fields: Vec<Field>) -> Self {
        DataType::Struct(Schema::new(fields))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::String => write!(f, "string"),
            DataType::Integer => write!(f, "integer"),
            DataType::Long => write!(f, "long"),
            DataType::Double => write!(f, "double"),
            DataType::Decimal { precision, scale } => write!(f, "decimal({precision},{scale})"),
            DataType::Boolean => write!(f, "boolean"),
            DataType::Date => write!(f, "date"),
            DataType::Timestamp => write!(f, "timestamp"),
            DataType::Binary => write!(f, "binary"),
            DataType::Array { element, .. } => write!(f, "array<{element}>"),
            DataType::Struct(_) => write!(f, "struct"),
        }
    }
}

/// A single named field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    #[serde(flatten)]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Field {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
        }
    }
}

/// Ordered sequence of fields.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Schema {
    pub fields: Vec<Field>,
}

impl Schema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a top-level field by name.
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Position of a top-level field.
    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Check structural invariants: field names are unique at every level,
    /// decimal scale does not exceed precision.
    pub fn validate(&self) -> Result<(), MappingError> {
        validate_level(self, "")
    }
}

fn validate_level(schema: &Schema, prefix: &str) -> Result<(), MappingError> {
    let mut seen = HashSet::new();
    for field in &schema.fields {
        let path = if prefix.is_empty() {
            field.name.clone()
        } else {
            format!("{prefix}.{}", field.name)
        };
        if !seen.insert(field.name.as_str()) {
            return SchemaViolationSnafu {
                path,
                message: "field name is declared more than once",
            }
            .fail();
        }
        validate_type(&field.data_type, &path)?;
    }
    Ok(())
}

fn validate_type(data_type: &DataType, path: &str) -> Result<(), MappingError> {
    match data_type {
        DataType::Decimal { precision, scale } if scale > precision || *precision == 0 => {
            SchemaViolationSnafu {
                path,
                message: format!("invalid decimal type {data_type}"),
            }
            .fail()
        }
        DataType::Decimal { precision, .. } if *precision > 38 => SchemaViolationSnafu {
            path,
            message: format!("{data_type} exceeds the maximum precision of 38"),
        }
        .fail(),
        DataType::Array { element, .. } => validate_type(element, &format!("{path}[]")),
        DataType::Struct(schema) => validate_level(schema, path),
        _ => Ok(()),
    }
}
