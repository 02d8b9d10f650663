//! Typed rows and partitions produced by the compute engine.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};

use crate::decimal::Decimal;

/// A single typed value positionally matching a schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum RowValue {
    Null,
    String(String),
    Integer(i32),
    Long(i64),
    Double(f64),
    Decimal(Decimal),
    Boolean(bool),
    Date(NaiveDate),
    Timestamp(DateTime<Utc>),
    Binary(Vec<u8>),
    Array(Vec<RowValue>),
    Struct(Row),
}

impl RowValue {
    pub fn is_null(&self) -> bool {
        matches!(self, RowValue::Null)
    }

    /// Short name of the carried variant, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            RowValue::Null => "null",
            RowValue::String(_) => "string",
            RowValue::Integer(_) => "integer",
            RowValue::Long(_) => "long",
            RowValue::Double(_) => "double",
            RowValue::Decimal(_) => "decimal",
            RowValue::Boolean(_) => "boolean",
            RowValue::Date(_) => "date",
            RowValue::Timestamp(_) => "timestamp",
            RowValue::Binary(_) => "binary",
            RowValue::Array(_) => "array",
            RowValue::Struct(_) => "struct",
        }
    }
}

impl From<&str> for RowValue {
    fn from(value: &str) -> Self {
        RowValue::String(value.to_string())
    }
}

impl From<String> for RowValue {
    fn from(value: String) -> Self {
        RowValue::String(value)
    }
}

impl From<i32> for RowValue {
    fn from(value: i32) -> Self {
        RowValue::Integer(value)
    }
}

impl From<i64> for RowValue {
    fn from(value: i64) -> Self {
        RowValue::Long(value)
    }
}

impl From<f64> for RowValue {
    fn from(value: f64) -> Self {
        RowValue::Double(value)
    }
}

impl From<bool> for RowValue {
    fn from(value: bool) -> Self {
        RowValue::Boolean(value)
    }
}

impl From<Decimal> for RowValue {
    fn from(value: Decimal) -> Self {
        RowValue::Decimal(value)
    }
}

impl<T: Into<RowValue>> From<Option<T>> for RowValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(RowValue::Null, Into::into)
    }
}

/// One tuple of values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Row {
    values: Vec<RowValue>,
}

impl Row {
    pub fn new(values: Vec<RowValue>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[RowValue] {
        &self.values
    }

    pub fn get(&self, index: usize) -> Option<&RowValue> {
        self.values.get(index)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<RowValue>> for Row {
    fn from(values: Vec<RowValue>) -> Self {
        Self::new(values)
    }
}

/// Build a row from heterogeneous values.
///
/// ```ignore
/// let r = row!["name1", 42i64, None::<i64>];
/// ```
#[macro_export]
macro_rules! row {
    ($($value:expr),* $(,)?) => {
        $crate::row::Row::new(vec![$($crate::row::RowValue::from($value)),*])
    };
}

/// A contiguous slice of a dataset assigned to one worker.
///
/// Rows are shared immutably so a failed task can be re-executed from the
/// same input.
#[derive(Debug, Clone)]
pub struct Partition {
    index: usize,
    rows: Arc<[Row]>,
}

impl Partition {
    pub fn new(index: usize, rows: Vec<Row>) -> Self {
        Self {
            index,
            rows: rows.into(),
        }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Split rows into at most `count` contiguous partitions of near-equal size.
pub fn partition_rows(rows: Vec<Row>, count: usize) -> Vec<Partition> {
    let count = count.max(1);
    let chunk = rows.len().div_ceil(count).max(1);
    let mut partitions = Vec::with_capacity(count);
    let mut rows = rows.into_iter().peekable();
    while rows.peek().is_some() {
        let slice: Vec<Row> = rows.by_ref().take(chunk).collect();
        partitions.push(Partition::new(partitions.len(), slice));
    }
    partitions
}
