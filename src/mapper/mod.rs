//! Conversion between typed rows and documents.
//!
//! Every schema type tag has exactly one conversion rule in each direction,
//! dispatched on `(DataType, value)` pairs. Fixed-point values are converted
//! in integer arithmetic only.

pub mod identity;

use std::sync::Arc;

use chrono::{NaiveTime, SubsecRound};
use snafu::prelude::*;

use crate::config::WriteConfig;
use crate::decimal::{DECIMAL128_DIGITS, Decimal};
use crate::document::{Document, Value};
use crate::error::{ConfigError, MappingError, PrecisionOverflowSnafu, SchemaViolationSnafu};
use crate::row::{Row, RowValue};
use crate::schema::{DataType, Schema};

pub use identity::{IdentityResolver, RowOrigin, synthesize_id};

/// Convert a row into a document without assigning an identifier.
pub fn row_to_document(row: &Row, schema: &Schema) -> Result<Document, MappingError> {
    Converter::default().struct_to_document(row, schema, "")
}

/// Convert a stored document back into a row of `schema`.
///
/// Missing fields read as null. Integers widen to long, double or decimal;
/// datetimes recover dates and timestamps.
pub fn document_to_row(document: &Document, schema: &Schema) -> Result<Row, MappingError> {
    read_struct(document, schema, "")
}

/// Row-to-document mapper bound to one job's schema and options.
#[derive(Debug, Clone)]
pub struct TypeMapper {
    schema: Arc<Schema>,
    converter: Converter,
    identity: IdentityResolver,
}

impl TypeMapper {
    pub fn new(schema: Arc<Schema>, config: &WriteConfig) -> Result<Self, ConfigError> {
        let identity = IdentityResolver::new(&schema, &config.id_field_list)?;
        Ok(Self {
            schema,
            converter: Converter {
                ignore_nulls: config.ignore_null_values,
            },
            identity,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Convert a row and assign its identifier.
    pub fn map_row(&self, row: &Row, origin: &RowOrigin<'_>) -> Result<Document, MappingError> {
        let mut document = self.converter.struct_to_document(row, &self.schema, "")?;
        self.identity.assign(&mut document, origin);
        Ok(document)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Converter {
    /// Omit null fields from documents.
    ignore_nulls: bool,
}

impl Converter {
    fn struct_to_document(
        &self,
        row: &Row,
        schema: &Schema,
        prefix: &str,
    ) -> Result<Document, MappingError> {
        ensure!(
            row.len() == schema.len(),
            SchemaViolationSnafu {
                path: display_path(prefix),
                message: format!(
                    "row has {} values but the schema declares {} fields",
                    row.len(),
                    schema.len()
                ),
            }
        );

        let mut document = Document::with_capacity(schema.len());
        for (field, value) in schema.fields.iter().zip(row.values()) {
            let path = join_path(prefix, &field.name);
            let converted = self.to_value(value, &field.data_type, field.nullable, &path)?;
            if self.ignore_nulls && converted.is_null() {
                continue;
            }
            document.insert(field.name.as_str(), converted);
        }
        Ok(document)
    }

    fn to_value(
        &self,
        value: &RowValue,
        data_type: &DataType,
        nullable: bool,
        path: &str,
    ) -> Result<Value, MappingError> {
        let converted = match (data_type, value) {
            (_, RowValue::Null) => {
                ensure!(
                    nullable,
                    SchemaViolationSnafu {
                        path,
                        message: "null value in non-nullable field",
                    }
                );
                Value::Null
            }
            (DataType::String, RowValue::String(s)) => Value::String(s.clone()),
            (DataType::Integer, RowValue::Integer(i)) => Value::Int32(*i),
            (DataType::Long, RowValue::Long(l)) => Value::Int64(*l),
            (DataType::Long, RowValue::Integer(i)) => Value::Int64(i64::from(*i)),
            (DataType::Double, RowValue::Double(d)) => Value::Double(*d),
            (DataType::Decimal { precision, scale }, RowValue::Decimal(d)) => {
                convert_decimal(*d, *precision, *scale, path)?
            }
            (DataType::Boolean, RowValue::Boolean(b)) => Value::Boolean(*b),
            (DataType::Date, RowValue::Date(date)) => {
                Value::DateTime(date.and_time(NaiveTime::MIN).and_utc())
            }
            (DataType::Timestamp, RowValue::Timestamp(ts)) => Value::DateTime(ts.trunc_subsecs(3)),
            (DataType::Binary, RowValue::Binary(bytes)) => Value::Binary(bytes.clone()),
            (
                DataType::Array {
                    element,
                    contains_null,
                },
                RowValue::Array(items),
            ) => Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| {
                        self.to_value(item, element, *contains_null, &format!("{path}[{i}]"))
                    })
                    .collect::<Result<_, _>>()?,
            ),
            (DataType::Struct(schema), RowValue::Struct(row)) => {
                Value::Document(self.struct_to_document(row, schema, path)?)
            }
            (expected, actual) => {
                return SchemaViolationSnafu {
                    path,
                    message: format!("expected {expected}, found {}", actual.kind()),
                }
                .fail();
            }
        };
        Ok(converted)
    }
}

/// Round half-up to the field scale and fit the result into 34 digits.
fn convert_decimal(
    value: Decimal,
    precision: u8,
    scale: u8,
    path: &str,
) -> Result<Value, MappingError> {
    let scale = u32::from(scale);
    let precision = u32::from(precision);
    let rounded = value.round_half_up(scale);

    let integer_digits = rounded.integer_digits();
    ensure!(
        integer_digits <= precision.saturating_sub(scale),
        PrecisionOverflowSnafu {
            path,
            value: value.to_string(),
            digits: integer_digits + scale,
            limit: precision,
        }
    );

    rounded
        .to_decimal128()
        .map(Value::Decimal128)
        .context(PrecisionOverflowSnafu {
            path,
            value: value.to_string(),
            digits: rounded.strip_trailing_zeros().precision(),
            limit: DECIMAL128_DIGITS,
        })
}

fn read_struct(document: &Document, schema: &Schema, prefix: &str) -> Result<Row, MappingError> {
    let mut values = Vec::with_capacity(schema.len());
    for field in &schema.fields {
        let path = join_path(prefix, &field.name);
        let value = document.get(&field.name).unwrap_or(&Value::Null);
        values.push(read_value(value, &field.data_type, field.nullable, &path)?);
    }
    Ok(Row::new(values))
}

fn read_value(
    value: &Value,
    data_type: &DataType,
    nullable: bool,
    path: &str,
) -> Result<RowValue, MappingError> {
    let read = match (data_type, value) {
        (_, Value::Null) => {
            ensure!(
                nullable,
                SchemaViolationSnafu {
                    path,
                    message: "missing value for non-nullable field",
                }
            );
            RowValue::Null
        }
        (DataType::String, Value::String(s)) => RowValue::String(s.clone()),
        (DataType::Integer, Value::Int32(i)) => RowValue::Integer(*i),
        (DataType::Integer, Value::Int64(l)) if i32::try_from(*l).is_ok() => {
            RowValue::Integer(*l as i32)
        }
        (DataType::Long, Value::Int64(l)) => RowValue::Long(*l),
        (DataType::Long, Value::Int32(i)) => RowValue::Long(i64::from(*i)),
        (DataType::Double, Value::Double(d)) => RowValue::Double(*d),
        (DataType::Double, Value::Int32(i)) => RowValue::Double(f64::from(*i)),
        (DataType::Double, Value::Int64(l)) => RowValue::Double(*l as f64),
        (DataType::Decimal { precision, scale }, Value::Decimal128(d)) => {
            RowValue::Decimal(read_decimal(d.value(), *precision, *scale, path)?)
        }
        (DataType::Decimal { precision, scale }, Value::Int32(i)) => RowValue::Decimal(
            read_decimal(Decimal::from(i64::from(*i)), *precision, *scale, path)?,
        ),
        (DataType::Decimal { precision, scale }, Value::Int64(l)) => {
            RowValue::Decimal(read_decimal(Decimal::from(*l), *precision, *scale, path)?)
        }
        (DataType::Boolean, Value::Boolean(b)) => RowValue::Boolean(*b),
        (DataType::Date, Value::DateTime(dt)) => RowValue::Date(dt.date_naive()),
        (DataType::Timestamp, Value::DateTime(dt)) => RowValue::Timestamp(*dt),
        (DataType::Binary, Value::Binary(bytes)) => RowValue::Binary(bytes.clone()),
        (
            DataType::Array {
                element,
                contains_null,
            },
            Value::Array(items),
        ) => RowValue::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| read_value(item, element, *contains_null, &format!("{path}[{i}]")))
                .collect::<Result<_, _>>()?,
        ),
        (DataType::Struct(schema), Value::Document(doc)) => {
            RowValue::Struct(read_struct(doc, schema, path)?)
        }
        (expected, actual) => {
            return SchemaViolationSnafu {
                path,
                message: format!("cannot read {} as {expected}", actual.type_name()),
            }
            .fail();
        }
    };
    Ok(read)
}

fn read_decimal(
    value: Decimal,
    precision: u8,
    scale: u8,
    path: &str,
) -> Result<Decimal, MappingError> {
    let scale = u32::from(scale);
    let rounded = value.round_half_up(scale);
    let limit = u32::from(precision);
    ensure!(
        rounded.integer_digits() + scale <= limit,
        PrecisionOverflowSnafu {
            path,
            value: value.to_string(),
            digits: rounded.integer_digits() + scale,
            limit,
        }
    );
    Ok(rounded)
}

fn join_path(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn display_path(prefix: &str) -> &str {
    if prefix.is_empty() { "<root>" } else { prefix }
}
