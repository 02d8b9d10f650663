//! Collection provisioning.
//!
//! Runs once per job before any partition task starts, so concurrent workers
//! never race to create the destination. Existing collections are never
//! migrated; an incompatible layout is reported as a conflict.

use snafu::prelude::*;
use tracing::{debug, info};

use crate::config::{TimeseriesOptions, WriteConfig};
use crate::error::{JobError, LayoutConflictSnafu, StoreError, StoreSnafu};
use crate::sink::{CollectionInfo, DocumentStore, Namespace};

/// What `ensure_destination` found or did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The collection was created with the requested layout.
    Created,
    /// A compatible collection already existed.
    Existing,
}

/// Make sure the destination exists with the layout `config` requires.
///
/// Safe to call repeatedly: a collection created concurrently by someone else
/// is treated like one that already existed.
pub async fn ensure_destination(
    store: &dyn DocumentStore,
    config: &WriteConfig,
) -> Result<Provisioned, JobError> {
    let namespace = config.namespace();

    let existing = match describe(store, &namespace).await? {
        Some(info) => info,
        None => match store.create_collection(&namespace, &config.layout()).await {
            Ok(()) => {
                info!(
                    collection = %namespace,
                    timeseries = config.timeseries.is_some(),
                    "Created destination collection"
                );
                return Ok(Provisioned::Created);
            }
            Err(StoreError::AlreadyExists { .. }) => {
                debug!(collection = %namespace, "Collection created concurrently");
                match describe(store, &namespace).await? {
                    Some(info) => info,
                    None => {
                        return Err(StoreError::NamespaceNotFound {
                            namespace: namespace.to_string(),
                        })
                        .context(StoreSnafu {
                            step: "create_collection",
                        });
                    }
                }
            }
            Err(source) => {
                return Err(source).context(StoreSnafu {
                    step: "create_collection",
                });
            }
        },
    };

    check_compatible(&existing, config)?;
    debug!(collection = %namespace, kind = ?existing.kind, "Destination already exists");
    Ok(Provisioned::Existing)
}

async fn describe(
    store: &dyn DocumentStore,
    namespace: &Namespace,
) -> Result<Option<CollectionInfo>, JobError> {
    store
        .collection_info(namespace)
        .await
        .context(StoreSnafu {
            step: "list_collections",
        })
}

/// Check an existing collection against the requested layout.
pub fn check_compatible(existing: &CollectionInfo, config: &WriteConfig) -> Result<(), JobError> {
    let namespace = existing.namespace.to_string();
    let conflict = |reason: String| {
        LayoutConflictSnafu {
            namespace: namespace.clone(),
            reason,
        }
        .fail()
    };

    match (&existing.layout.timeseries, &config.timeseries) {
        (None, None) => Ok(()),
        (None, Some(_)) => conflict(
            "a regular collection exists where a time-series collection was requested".to_string(),
        ),
        (Some(_), None) if !config.is_insert_only() => conflict(
            "time-series collections do not accept replace or update operations".to_string(),
        ),
        (Some(_), None) => Ok(()),
        (Some(have), Some(want)) => match mismatch(have, want) {
            Some(reason) => conflict(reason),
            None => Ok(()),
        },
    }
}

fn mismatch(have: &TimeseriesOptions, want: &TimeseriesOptions) -> Option<String> {
    if have.time_field != want.time_field {
        return Some(format!(
            "time field is '{}', requested '{}'",
            have.time_field, want.time_field
        ));
    }
    if have.meta_field != want.meta_field {
        return Some(format!(
            "meta field is {:?}, requested {:?}",
            have.meta_field, want.meta_field
        ));
    }
    match want.granularity {
        Some(granularity) if granularity != have.effective_granularity() => Some(format!(
            "granularity is {:?}, requested {:?}",
            have.effective_granularity(),
            granularity
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Granularity;
    use crate::sink::{CollectionKind, CollectionLayout, MemoryStore};

    fn sensors() -> TimeseriesOptions {
        TimeseriesOptions::new("timestamp").with_meta_field("metadata")
    }

    fn ts_config() -> WriteConfig {
        WriteConfig::new("db", "sensors")
            .with_upsert(false)
            .with_timeseries(sensors())
    }

    #[tokio::test]
    async fn test_creates_timeseries_collection() {
        let store = MemoryStore::new();
        let config = ts_config();
        assert_eq!(
            ensure_destination(&store, &config).await.unwrap(),
            Provisioned::Created
        );
        let info = store
            .collection_info(&config.namespace())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(info.kind, CollectionKind::Timeseries);
        assert_eq!(info.layout.timeseries, Some(sensors()));

        // idempotent
        assert_eq!(
            ensure_destination(&store, &config).await.unwrap(),
            Provisioned::Existing
        );
    }

    #[tokio::test]
    async fn test_regular_collection_conflicts_with_timeseries() {
        let store = MemoryStore::new();
        let config = ts_config();
        store
            .create_collection(&config.namespace(), &CollectionLayout::default())
            .await
            .unwrap();
        let err = ensure_destination(&store, &config).await.unwrap_err();
        assert!(matches!(err, JobError::LayoutConflict { .. }));
    }

    #[tokio::test]
    async fn test_granularity_mismatch_conflicts() {
        let store = MemoryStore::new();
        ensure_destination(&store, &ts_config()).await.unwrap();

        let hourly = ts_config().with_timeseries(sensors().with_granularity(Granularity::Hours));
        let err = ensure_destination(&store, &hourly).await.unwrap_err();
        let JobError::LayoutConflict { reason, .. } = err else {
            panic!("expected layout conflict");
        };
        assert!(reason.contains("granularity"));

        // seconds is what an undeclared granularity means
        let seconds = ts_config().with_timeseries(sensors().with_granularity(Granularity::Seconds));
        assert!(ensure_destination(&store, &seconds).await.is_ok());
    }

    #[tokio::test]
    async fn test_upsert_into_existing_timeseries_conflicts() {
        let store = MemoryStore::new();
        ensure_destination(&store, &ts_config()).await.unwrap();

        let upsert = WriteConfig::new("db", "sensors");
        let err = ensure_destination(&store, &upsert).await.unwrap_err();
        assert!(matches!(err, JobError::LayoutConflict { .. }));

        let insert_only = WriteConfig::new("db", "sensors").with_upsert(false);
        assert_eq!(
            ensure_destination(&store, &insert_only).await.unwrap(),
            Provisioned::Existing
        );
    }

    #[tokio::test]
    async fn test_meta_field_mismatch_conflicts() {
        let store = MemoryStore::new();
        ensure_destination(&store, &ts_config()).await.unwrap();
        let other = ts_config().with_timeseries(TimeseriesOptions::new("timestamp"));
        assert!(matches!(
            ensure_destination(&store, &other).await,
            Err(JobError::LayoutConflict { .. })
        ));
    }
}
