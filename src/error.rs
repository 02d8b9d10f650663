//! Error types for flurry using snafu.
//!
//! This module defines structured error types with context selectors for
//! all error conditions in the write path.

use snafu::prelude::*;

// ============ Config Errors ============

/// Errors that can occur during configuration parsing and validation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[snafu(display("Failed to read configuration file"))]
    ReadFile { source: std::io::Error },

    /// Failed to parse YAML configuration.
    #[snafu(display("Failed to parse YAML configuration"))]
    YamlParse { source: serde_yaml::Error },

    /// Environment variable interpolation failed.
    #[snafu(display("Environment variable interpolation failed:\n{message}"))]
    EnvInterpolation { message: String },

    /// Database name is empty.
    #[snafu(display("Database name cannot be empty"))]
    EmptyDatabase,

    /// Collection name is empty.
    #[snafu(display("Collection name cannot be empty"))]
    EmptyCollection,

    /// A required option was not supplied.
    #[snafu(display("Missing required option '{key}'"))]
    MissingOption { key: String },

    /// An option value could not be interpreted.
    #[snafu(display("Invalid value '{value}' for option '{key}', expected {expected}"))]
    InvalidOption {
        key: String,
        value: String,
        expected: String,
    },

    /// Bulk batch limits must be positive.
    #[snafu(display("Batch limits must be greater than zero"))]
    InvalidBatchLimit,

    /// The identifier field list is empty.
    #[snafu(display("Identifier field list cannot be empty"))]
    EmptyIdFields,

    /// The identifier field list names a field twice.
    #[snafu(display("Identifier field '{field}' is listed more than once"))]
    DuplicateIdField { field: String },

    /// A configured identifier field does not exist in the schema.
    #[snafu(display("Identifier field '{field}' does not exist in the schema"))]
    IdFieldMissing { field: String },

    /// A time-series field is missing or has an unusable type.
    #[snafu(display("Invalid time-series field '{field}': {reason}"))]
    TimeseriesField { field: String, reason: String },
}

// ============ Mapping Errors ============

/// Errors raised while converting rows to documents and back.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MappingError {
    /// Null in a non-nullable field, type mismatch or malformed schema.
    #[snafu(display("Schema violation at '{path}': {message}"))]
    SchemaViolation { path: String, message: String },

    /// Fixed-point value does not fit the representable digits.
    #[snafu(display(
        "Value {value} at '{path}' needs {digits} significant digits, at most {limit} are representable"
    ))]
    PrecisionOverflow {
        path: String,
        value: String,
        digits: u32,
        limit: u32,
    },
}

// ============ Decimal Errors ============

/// Errors produced when parsing fixed-point literals.
#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum DecimalError {
    /// The literal is not a plain decimal number.
    #[snafu(display("Invalid decimal literal '{input}'"))]
    InvalidLiteral { input: String },

    /// The literal has more digits than a 128-bit coefficient can hold.
    #[snafu(display("Decimal literal '{input}' exceeds 38 digits"))]
    TooManyDigits { input: String },
}

// ============ Store Errors ============

/// Errors reported by the document database client.
#[derive(Debug, Snafu, Clone, PartialEq, Eq)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// Network failure, timeout or interrupted request.
    #[snafu(display("Transient store failure: {message}"))]
    Transient { message: String },

    /// Collection already exists.
    #[snafu(display("Collection {namespace} already exists"))]
    AlreadyExists { namespace: String },

    /// Collection does not exist.
    #[snafu(display("Collection {namespace} does not exist"))]
    NamespaceNotFound { namespace: String },

    /// The store refused the request.
    #[snafu(display("Store rejected request: {message}"))]
    Rejected { message: String },
}

impl StoreError {
    /// Check if this error may succeed when the whole task is retried.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient { .. })
    }
}

// ============ Epoch Log Errors ============

/// Errors that can occur while persisting streaming progress.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum EpochLogError {
    /// IO error reading or writing the epoch file.
    #[snafu(display("Epoch log IO error at {path}"))]
    EpochIo {
        source: std::io::Error,
        path: String,
    },

    /// The epoch file could not be (de)serialized.
    #[snafu(display("Epoch log JSON error"))]
    EpochJson { source: serde_json::Error },

    /// Committed epochs must strictly increase.
    #[snafu(display("Epoch {epoch} is not after last committed epoch {last}"))]
    NonMonotonic { epoch: u64, last: u64 },
}

// ============ Job Error (top-level) ============

/// Top-level write job errors that aggregate all error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JobError {
    /// Configuration error.
    #[snafu(display("Invalid write configuration"))]
    Config { source: ConfigError },

    /// The source schema itself is malformed.
    #[snafu(display("Invalid source schema"))]
    Schema { source: MappingError },

    /// The requested mode cannot be honoured by this writer.
    #[snafu(display("Write mode '{mode}' is not supported: {reason}"))]
    CapabilityUnsupported { mode: String, reason: String },

    /// The destination layout is incompatible with the requested one.
    #[snafu(display("Destination {namespace} has an incompatible layout: {reason}"))]
    LayoutConflict { namespace: String, reason: String },

    /// Rows of a partition could not be converted.
    #[snafu(display("Failed to map rows of partition {partition}"))]
    Mapping {
        partition: usize,
        source: MappingError,
    },

    /// Network or timeout failure while writing a partition.
    #[snafu(display(
        "Transient write failure in partition {partition} after {attempts} attempt(s)"
    ))]
    TransientWrite {
        partition: usize,
        attempts: u32,
        source: StoreError,
    },

    /// Duplicate identifier that is not explained by a retry.
    #[snafu(display(
        "Duplicate identifier at position {position} of partition {partition}: {message}"
    ))]
    DuplicateIdentifier {
        partition: usize,
        position: usize,
        message: String,
    },

    /// One or more bulk operations failed.
    #[snafu(display(
        "{failed} write operation(s) failed in partition {partition}; first error: {first_error}"
    ))]
    WriteFailed {
        partition: usize,
        failed: usize,
        first_error: String,
    },

    /// A destination management step failed.
    #[snafu(display("Destination step '{step}' failed"))]
    Store { step: String, source: StoreError },

    /// Task join error.
    #[snafu(display("Task join error"))]
    TaskJoin { source: tokio::task::JoinError },

    /// Streaming progress could not be persisted or read.
    #[snafu(display("Epoch log error"))]
    EpochLog { source: EpochLogError },

    /// The micro-batch source failed to produce an epoch.
    #[snafu(display("Micro-batch source failed for epoch {epoch}: {message}"))]
    Source { epoch: u64, message: String },

    /// A streaming epoch failed; progress stays at the last committed epoch.
    #[snafu(display(
        "Streaming epoch {epoch} failed (last committed epoch: {})",
        last_committed.map_or_else(|| "none".to_string(), |e| e.to_string())
    ))]
    EpochFailed {
        epoch: u64,
        last_committed: Option<u64>,
        source: Box<JobError>,
    },
}

impl JobError {
    /// Check if retrying the failed partition task could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::TransientWrite { .. })
    }
}
