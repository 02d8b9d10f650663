//! Write mode policy.
//!
//! Planning runs once per job, before any partition is processed: it
//! validates configuration and schema against each other, then decides
//! whether the requested mode can be honoured. Unsupported modes fail here so
//! that no worker ever starts a write that cannot be completed.

use snafu::prelude::*;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::config::{TimeseriesOptions, TruncateMode, WriteConfig, WriteMode};
use crate::error::{
    CapabilityUnsupportedSnafu, ConfigError, ConfigSnafu, JobError, LayoutConflictSnafu,
    SchemaSnafu, StoreSnafu, TimeseriesFieldSnafu,
};
use crate::mapper::IdentityResolver;
use crate::provision::{Provisioned, ensure_destination};
use crate::schema::{DataType, Schema};
use crate::sink::{BatchWriter, DocumentStore, DocumentStoreRef};

/// A validated write, ready to prepare the destination and fan out.
#[derive(Debug, Clone)]
pub struct WritePlan {
    config: Arc<WriteConfig>,
    schema: Arc<Schema>,
    write_id: Arc<str>,
}

/// Validate a write request and select its mode.
pub fn plan(config: WriteConfig, schema: Schema) -> Result<WritePlan, JobError> {
    check_preconditions(&config, &schema)?;

    match config.mode {
        WriteMode::Overwrite | WriteMode::Append => {}
        WriteMode::ErrorIfExists => {
            return CapabilityUnsupportedSnafu {
                mode: config.mode.to_string(),
                reason: "bulk writes cannot check for an existing destination atomically; \
                         use Overwrite or Append",
            }
            .fail();
        }
        WriteMode::Ignore => {
            return CapabilityUnsupportedSnafu {
                mode: config.mode.to_string(),
                reason: "bulk writes cannot skip an existing destination atomically; \
                         use Overwrite or Append",
            }
            .fail();
        }
    }

    let write_id: Arc<str> = Uuid::new_v4().simple().to_string().into();
    info!(
        collection = %config.namespace(),
        mode = %config.mode,
        write_id = %write_id,
        "Planned write"
    );
    Ok(WritePlan {
        config: Arc::new(config),
        schema: Arc::new(schema),
        write_id,
    })
}

/// Destination pre-conditions that hold regardless of the write mode.
fn check_preconditions(config: &WriteConfig, schema: &Schema) -> Result<(), JobError> {
    config.validate().context(ConfigSnafu)?;
    schema.validate().context(SchemaSnafu)?;
    IdentityResolver::new(schema, &config.id_field_list).context(ConfigSnafu)?;

    if let Some(ts) = &config.timeseries {
        check_timeseries_fields(schema, ts).context(ConfigSnafu)?;
        ensure!(
            config.is_insert_only(),
            LayoutConflictSnafu {
                namespace: config.namespace().to_string(),
                reason: "time-series collections accept inserts only; \
                         disable upsertDocument or use operationType=insert",
            }
        );
    }
    Ok(())
}

fn check_timeseries_fields(schema: &Schema, ts: &TimeseriesOptions) -> Result<(), ConfigError> {
    let name = ts.time_field.as_str();
    let field = schema.field(name).context(TimeseriesFieldSnafu {
        field: name,
        reason: "time field does not exist in the schema",
    })?;
    ensure!(
        matches!(field.data_type, DataType::Date | DataType::Timestamp),
        TimeseriesFieldSnafu {
            field: name,
            reason: format!("time field must be a date or timestamp, found {}", field.data_type),
        }
    );
    if let Some(meta) = &ts.meta_field {
        ensure!(
            schema.field(meta).is_some(),
            TimeseriesFieldSnafu {
                field: meta.as_str(),
                reason: "meta field does not exist in the schema",
            }
        );
    }
    Ok(())
}

impl WritePlan {
    pub fn config(&self) -> &Arc<WriteConfig> {
        &self.config
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn mode(&self) -> WriteMode {
        self.config.mode
    }

    /// Identity shared by every task of this write.
    pub fn write_id(&self) -> &Arc<str> {
        &self.write_id
    }

    /// Apply the mode to the destination and provision it.
    ///
    /// `Overwrite` clears the destination first; the clear is not undone if a
    /// later step fails.
    pub async fn prepare(&self, store: &dyn DocumentStore) -> Result<Provisioned, JobError> {
        if self.config.mode == WriteMode::Overwrite {
            self.truncate(store).await?;
        }
        ensure_destination(store, &self.config).await
    }

    async fn truncate(&self, store: &dyn DocumentStore) -> Result<(), JobError> {
        let namespace = self.config.namespace();
        match self.config.truncate_mode {
            TruncateMode::Drop => {
                store
                    .drop_collection(&namespace)
                    .await
                    .context(StoreSnafu {
                        step: "drop_collection",
                    })?;
                info!(collection = %namespace, "Dropped destination for overwrite");
            }
            TruncateMode::Recreate => {
                let previous = store
                    .collection_info(&namespace)
                    .await
                    .context(StoreSnafu {
                        step: "list_collections",
                    })?;
                store
                    .drop_collection(&namespace)
                    .await
                    .context(StoreSnafu {
                        step: "drop_collection",
                    })?;
                // a configured layout wins; the provisioner creates it
                if let Some(previous) = previous
                    && self.config.timeseries.is_none()
                {
                    store
                        .create_collection(&namespace, &previous.layout)
                        .await
                        .context(StoreSnafu {
                            step: "create_collection",
                        })?;
                }
                info!(collection = %namespace, "Recreated destination for overwrite");
            }
            TruncateMode::DeleteAll => {
                let removed = store
                    .delete_all(&namespace)
                    .await
                    .context(StoreSnafu { step: "delete_all" })?;
                info!(collection = %namespace, removed, "Emptied destination for overwrite");
            }
        }
        Ok(())
    }

    /// A batch writer for this plan's destination.
    pub fn writer(&self, store: DocumentStoreRef) -> Result<BatchWriter, JobError> {
        BatchWriter::new(store, self.config.clone(), self.schema.clone()).context(ConfigSnafu)
    }
}
