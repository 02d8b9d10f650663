//! Write job configuration.
//!
//! Handles loading configuration from YAML files and from the engine's
//! string option map, with defaults matching the connector's documented
//! behaviour. Configuration is resolved once per job and shared read-only.

mod options;
mod vars;

use serde::{Deserialize, Serialize};
use snafu::prelude::*;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{
    ConfigError, DuplicateIdFieldSnafu, EmptyCollectionSnafu, EmptyDatabaseSnafu,
    EmptyIdFieldsSnafu, EnvInterpolationSnafu, InvalidBatchLimitSnafu, ReadFileSnafu,
    TimeseriesFieldSnafu, YamlParseSnafu,
};
use crate::sink::{CollectionLayout, Namespace};

pub use options::keys;

/// Byte size constants (binary/IEC units).
pub const KB: usize = 1024;
pub const MB: usize = 1024 * KB;

/// Main configuration structure for a write job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub write: WriteConfig,
    /// Task scheduling (optional).
    #[serde(default)]
    pub job: JobConfig,
    /// Streaming settings (optional).
    #[serde(default)]
    pub streaming: StreamingConfig,
}

/// How existing destination contents are treated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    Overwrite,
    Append,
    #[default]
    ErrorIfExists,
    Ignore,
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WriteMode::Overwrite => "Overwrite",
            WriteMode::Append => "Append",
            WriteMode::ErrorIfExists => "ErrorIfExists",
            WriteMode::Ignore => "Ignore",
        };
        f.write_str(name)
    }
}

impl FromStr for WriteMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "overwrite" => Ok(WriteMode::Overwrite),
            "append" => Ok(WriteMode::Append),
            "errorifexists" | "error" | "default" => Ok(WriteMode::ErrorIfExists),
            "ignore" => Ok(WriteMode::Ignore),
            _ => Err("one of overwrite, append, errorifexists, ignore".to_string()),
        }
    }
}

/// Kind of bulk operation emitted per document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    #[default]
    Replace,
    Update,
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "insert" => Ok(OperationType::Insert),
            "replace" => Ok(OperationType::Replace),
            "update" => Ok(OperationType::Update),
            _ => Err("one of insert, replace, update".to_string()),
        }
    }
}

/// How `Overwrite` clears an existing destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TruncateMode {
    /// Drop the collection; the provisioner creates it fresh.
    #[default]
    Drop,
    /// Drop the collection and recreate it with its previous layout.
    Recreate,
    /// Keep the collection and delete every document.
    DeleteAll,
}

impl FromStr for TruncateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "drop" => Ok(TruncateMode::Drop),
            "recreate" => Ok(TruncateMode::Recreate),
            "deleteall" => Ok(TruncateMode::DeleteAll),
            _ => Err("one of drop, recreate, delete_all".to_string()),
        }
    }
}

/// Time-series bucket granularity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    #[default]
    Seconds,
    Minutes,
    Hours,
}

impl FromStr for Granularity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "seconds" => Ok(Granularity::Seconds),
            "minutes" => Ok(Granularity::Minutes),
            "hours" => Ok(Granularity::Hours),
            _ => Err("one of seconds, minutes, hours".to_string()),
        }
    }
}

/// Physical time-series layout of a collection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeseriesOptions {
    /// Field holding the measurement time.
    pub time_field: String,
    /// Field grouping measurements from the same source (optional).
    #[serde(default)]
    pub meta_field: Option<String>,
    /// Bucket granularity (seconds when unset).
    #[serde(default)]
    pub granularity: Option<Granularity>,
}

impl TimeseriesOptions {
    pub fn new(time_field: impl Into<String>) -> Self {
        Self {
            time_field: time_field.into(),
            meta_field: None,
            granularity: None,
        }
    }

    pub fn with_meta_field(mut self, field: impl Into<String>) -> Self {
        self.meta_field = Some(field.into());
        self
    }

    pub fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = Some(granularity);
        self
    }

    /// Granularity the database applies when none is declared.
    pub fn effective_granularity(&self) -> Granularity {
        self.granularity.unwrap_or_default()
    }
}

/// Destination and bulk write settings, immutable for the job's lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteConfig {
    pub database: String,
    pub collection: String,

    /// Write mode (default: error_if_exists, which is rejected).
    #[serde(default)]
    pub mode: WriteMode,

    /// Bulk operation kind used when upserting (default: replace).
    #[serde(default)]
    pub operation_type: OperationType,

    /// Replace/update by identifier with upsert (default: true).
    #[serde(default = "default_true")]
    pub upsert_document: bool,

    /// Ordered bulk execution (default: true).
    #[serde(default = "default_true")]
    pub ordered: bool,

    /// Fields whose values form the document identifier (default: ["_id"]).
    #[serde(default = "default_id_field_list")]
    pub id_field_list: Vec<String>,

    /// Maximum operations per bulk request (default: 512).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Maximum estimated payload per bulk request (default: 16MB).
    #[serde(default = "default_max_batch_bytes")]
    pub max_batch_bytes: usize,

    /// Omit null fields instead of writing them (default: false).
    #[serde(default)]
    pub ignore_null_values: bool,

    /// How `Overwrite` clears an existing destination (default: drop).
    #[serde(default)]
    pub truncate_mode: TruncateMode,

    /// Time-series layout for the destination (optional).
    #[serde(default)]
    pub timeseries: Option<TimeseriesOptions>,
}

fn default_true() -> bool {
    true
}

fn default_id_field_list() -> Vec<String> {
    vec![crate::document::ID_FIELD.to_string()]
}

fn default_max_batch_size() -> usize {
    512
}

fn default_max_batch_bytes() -> usize {
    16 * MB
}

impl WriteConfig {
    /// Create a configuration for `database.collection` with default settings.
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            mode: WriteMode::default(),
            operation_type: OperationType::default(),
            upsert_document: true,
            ordered: true,
            id_field_list: default_id_field_list(),
            max_batch_size: default_max_batch_size(),
            max_batch_bytes: default_max_batch_bytes(),
            ignore_null_values: false,
            truncate_mode: TruncateMode::default(),
            timeseries: None,
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_operation_type(mut self, operation_type: OperationType) -> Self {
        self.operation_type = operation_type;
        self
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert_document = upsert;
        self
    }

    pub fn with_ordered(mut self, ordered: bool) -> Self {
        self.ordered = ordered;
        self
    }

    pub fn with_id_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.id_field_list = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    pub fn with_max_batch_bytes(mut self, max_batch_bytes: usize) -> Self {
        self.max_batch_bytes = max_batch_bytes;
        self
    }

    pub fn with_ignore_null_values(mut self, ignore: bool) -> Self {
        self.ignore_null_values = ignore;
        self
    }

    pub fn with_truncate_mode(mut self, truncate_mode: TruncateMode) -> Self {
        self.truncate_mode = truncate_mode;
        self
    }

    pub fn with_timeseries(mut self, timeseries: TimeseriesOptions) -> Self {
        self.timeseries = Some(timeseries);
        self
    }

    /// Fully qualified destination.
    pub fn namespace(&self) -> Namespace {
        Namespace::new(&self.database, &self.collection)
    }

    /// Physical layout requested for the destination.
    pub fn layout(&self) -> CollectionLayout {
        CollectionLayout {
            timeseries: self.timeseries.clone(),
        }
    }

    /// True when every operation is a plain insert.
    pub fn is_insert_only(&self) -> bool {
        !self.upsert_document || self.operation_type == OperationType::Insert
    }

    /// Validate settings that do not depend on the schema.
    pub fn validate(&self) -> Result<(), ConfigError> {
        ensure!(!self.database.is_empty(), EmptyDatabaseSnafu);
        ensure!(!self.collection.is_empty(), EmptyCollectionSnafu);
        ensure!(
            self.max_batch_size > 0 && self.max_batch_bytes > 0,
            InvalidBatchLimitSnafu
        );
        ensure!(!self.id_field_list.is_empty(), EmptyIdFieldsSnafu);

        let mut seen = HashSet::new();
        for field in &self.id_field_list {
            ensure!(
                seen.insert(field.as_str()),
                DuplicateIdFieldSnafu { field: field.clone() }
            );
        }

        if let Some(ts) = &self.timeseries {
            ensure!(
                !ts.time_field.is_empty(),
                TimeseriesFieldSnafu {
                    field: "",
                    reason: "time field cannot be empty",
                }
            );
            ensure!(
                ts.meta_field.as_deref() != Some(ts.time_field.as_str()),
                TimeseriesFieldSnafu {
                    field: ts.time_field.clone(),
                    reason: "time field and meta field must differ",
                }
            );
        }
        Ok(())
    }
}

/// Partition task scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Maximum partitions written concurrently (default: 4).
    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: usize,

    /// Attempts per partition before a transient failure fails the job (default: 4).
    #[serde(default = "default_max_task_attempts")]
    pub max_task_attempts: u32,

    /// Delay before the first retry, doubled on each further attempt (default: 100ms).
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: default_max_concurrent_tasks(),
            max_task_attempts: default_max_task_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

impl JobConfig {
    pub fn with_max_concurrent_tasks(mut self, tasks: usize) -> Self {
        self.max_concurrent_tasks = tasks;
        self
    }

    pub fn with_max_task_attempts(mut self, attempts: u32) -> Self {
        self.max_task_attempts = attempts;
        self
    }

    pub fn with_retry_backoff_ms(mut self, backoff_ms: u64) -> Self {
        self.retry_backoff_ms = backoff_ms;
        self
    }
}

fn default_max_concurrent_tasks() -> usize {
    4
}

fn default_max_task_attempts() -> u32 {
    4
}

fn default_retry_backoff_ms() -> u64 {
    100
}

/// Streaming output mode.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Append,
    Complete,
    Update,
}

impl fmt::Display for OutputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutputMode::Append => "Append",
            OutputMode::Complete => "Complete",
            OutputMode::Update => "Update",
        };
        f.write_str(name)
    }
}

/// Streaming micro-batch settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Output mode (default: append).
    #[serde(default)]
    pub output_mode: OutputMode,

    /// Stable query identity; generated on first start when unset.
    #[serde(default)]
    pub query_id: Option<String>,

    /// File holding the last committed epoch (in-memory when unset).
    #[serde(default)]
    pub checkpoint_path: Option<String>,
}

impl StreamingConfig {
    pub fn with_output_mode(mut self, output_mode: OutputMode) -> Self {
        self.output_mode = output_mode;
        self
    }

    pub fn with_query_id(mut self, query_id: impl Into<String>) -> Self {
        self.query_id = Some(query_id.into());
        self
    }

    pub fn with_checkpoint_path(mut self, path: impl Into<String>) -> Self {
        self.checkpoint_path = Some(path.into());
        self
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_file_with_options(path, true)
    }

    /// Load configuration from a YAML file with optional environment variable interpolation.
    pub fn from_file_with_options(
        path: impl AsRef<Path>,
        interpolate_env: bool,
    ) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).context(ReadFileSnafu)?;
        Self::from_yaml(&content, interpolate_env)
    }

    /// Parse configuration from YAML text.
    pub fn from_yaml(content: &str, interpolate_env: bool) -> Result<Self, ConfigError> {
        let content = if interpolate_env {
            vars::interpolate(content).map_err(|errors| {
                EnvInterpolationSnafu {
                    message: errors.join("\n"),
                }
                .build()
            })?
        } else {
            content.to_string()
        };

        let config: Config = serde_yaml::from_str(&content).context(YamlParseSnafu)?;
        config.write.validate()?;
        Ok(config)
    }
}

/// Lowercase and strip separators so `delete_all`, `deleteAll` and
/// `DELETE-ALL` compare equal.
fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !matches!(c, '_' | '-' | ' '))
        .flat_map(char::to_lowercase)
        .collect()
}
