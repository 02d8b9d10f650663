//! String option surface passed by the compute engine.
//!
//! Keys are case-insensitive; unknown keys are ignored so engine-wide
//! options can be passed through unchanged.

use snafu::prelude::*;
use std::collections::HashMap;
use std::str::FromStr;

use super::{Granularity, OperationType, TimeseriesOptions, TruncateMode, WriteConfig, WriteMode};
use crate::error::{ConfigError, InvalidOptionSnafu, MissingOptionSnafu};

/// Recognized option keys.
pub mod keys {
    pub const DATABASE: &str = "database";
    pub const COLLECTION: &str = "collection";
    pub const MODE: &str = "mode";
    pub const OPERATION_TYPE: &str = "operationType";
    pub const UPSERT_DOCUMENT: &str = "upsertDocument";
    pub const ORDERED: &str = "ordered";
    pub const ID_FIELD_LIST: &str = "idFieldList";
    pub const MAX_BATCH_SIZE: &str = "maxBatchSize";
    pub const IGNORE_NULL_VALUES: &str = "ignoreNullValues";
    pub const TRUNCATE_MODE: &str = "truncateMode";
    pub const TIMESERIES_TIME_FIELD: &str = "timeseries.timeField";
    pub const TIMESERIES_META_FIELD: &str = "timeseries.metaField";
    pub const TIMESERIES_GRANULARITY: &str = "timeseries.granularity";
}

/// Case-insensitive view over the raw option map.
struct Options(HashMap<String, String>);

impl Options {
    fn new(raw: &HashMap<String, String>) -> Self {
        Self(
            raw.iter()
                .map(|(k, v)| (k.to_lowercase(), v.trim().to_string()))
                .collect(),
        )
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(&key.to_lowercase()).map(String::as_str)
    }

    fn required(&self, key: &str) -> Result<String, ConfigError> {
        self.get(key)
            .map(str::to_string)
            .context(MissingOptionSnafu { key })
    }

    fn parsed<T>(&self, key: &str, expected: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr,
    {
        self.get(key)
            .map(|value| {
                value.parse::<T>().ok().context(InvalidOptionSnafu {
                    key,
                    value,
                    expected,
                })
            })
            .transpose()
    }

    fn flag(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        self.get(key)
            .map(|value| match value.to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => InvalidOptionSnafu {
                    key,
                    value,
                    expected: "true or false",
                }
                .fail(),
            })
            .transpose()
    }

    fn enumerated<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: FromStr<Err = String>,
    {
        self.get(key)
            .map(|value| {
                value.parse::<T>().map_err(|expected| {
                    InvalidOptionSnafu {
                        key,
                        value,
                        expected,
                    }
                    .build()
                })
            })
            .transpose()
    }
}

impl WriteConfig {
    /// Build a configuration from the engine's string options.
    ///
    /// `database` and `collection` are required; every other option falls
    /// back to its default.
    pub fn from_options(raw: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let options = Options::new(raw);
        let mut config = WriteConfig::new(
            options.required(keys::DATABASE)?,
            options.required(keys::COLLECTION)?,
        );

        if let Some(mode) = options.enumerated::<WriteMode>(keys::MODE)? {
            config.mode = mode;
        }
        if let Some(op) = options.enumerated::<OperationType>(keys::OPERATION_TYPE)? {
            config.operation_type = op;
        }
        if let Some(upsert) = options.flag(keys::UPSERT_DOCUMENT)? {
            config.upsert_document = upsert;
        }
        if let Some(ordered) = options.flag(keys::ORDERED)? {
            config.ordered = ordered;
        }
        if let Some(size) = options.parsed::<usize>(keys::MAX_BATCH_SIZE, "a positive integer")? {
            config.max_batch_size = size;
        }
        if let Some(ignore) = options.flag(keys::IGNORE_NULL_VALUES)? {
            config.ignore_null_values = ignore;
        }
        if let Some(truncate) = options.enumerated::<TruncateMode>(keys::TRUNCATE_MODE)? {
            config.truncate_mode = truncate;
        }
        if let Some(list) = options.get(keys::ID_FIELD_LIST) {
            config.id_field_list = list
                .split(',')
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string)
                .collect();
        }

        config.timeseries = match options.get(keys::TIMESERIES_TIME_FIELD) {
            Some(time_field) => {
                let mut ts = TimeseriesOptions::new(time_field);
                ts.meta_field = options.get(keys::TIMESERIES_META_FIELD).map(str::to_string);
                ts.granularity = options.enumerated::<Granularity>(keys::TIMESERIES_GRANULARITY)?;
                Some(ts)
            }
            None => None,
        };

        config.validate()?;
        Ok(config)
    }
}
