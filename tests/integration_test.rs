//! Integration tests for flurry

use flurry::config::{OperationType, TimeseriesOptions};
use flurry::document::{Document, ID_FIELD, Value};
use flurry::error::{JobError, MappingError};
use flurry::mapper::document_to_row;
use flurry::row::partition_rows;
use flurry::sink::{CollectionKind, Namespace};
use flurry::{
    Config, DataType, DocumentStore, Field, JobConfig, MemoryStore, Row, RowValue, Schema,
    WriteConfig, WriteJob, WriteMode, row,
};
use std::sync::Arc;

fn people_schema() -> Schema {
    Schema::new(vec![
        Field::new("_id", DataType::Long, false),
        Field::new("name", DataType::String, false),
        Field::new("age", DataType::Integer, true),
    ])
}

fn people(ids: std::ops::Range<i64>) -> Vec<Row> {
    ids.map(|i| row![i, format!("person-{i}"), Some(20 + i as i32)])
        .collect()
}

fn people_ns() -> Namespace {
    Namespace::new("test", "people")
}

fn fast_job() -> JobConfig {
    JobConfig::default()
        .with_max_concurrent_tasks(3)
        .with_retry_backoff_ms(1)
}

async fn write(
    store: &Arc<MemoryStore>,
    config: WriteConfig,
    schema: Schema,
    rows: Vec<Row>,
) -> Result<flurry::JobStats, JobError> {
    WriteJob::new(store.clone(), config, schema)
        .with_job_config(fast_job())
        .run(partition_rows(rows, 4))
        .await
}

fn people_config(mode: WriteMode) -> WriteConfig {
    WriteConfig::new("test", "people").with_mode(mode)
}

fn sorted_by_id(mut docs: Vec<Document>) -> Vec<Document> {
    docs.sort_by_key(|d| match d.id() {
        Some(Value::Int64(i)) => *i,
        _ => i64::MAX,
    });
    docs
}

mod config_tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_config_yaml_parsing() {
        let yaml = r#"
write:
  database: shop
  collection: orders
  mode: overwrite
  operation_type: update
  ordered: false
  id_field_list: [region, order_id]
  max_batch_size: 100
  truncate_mode: delete_all

job:
  max_concurrent_tasks: 16
  max_task_attempts: 2

streaming:
  query_id: orders-stream
  checkpoint_path: /var/lib/flurry/orders.json
"#;
        let config = Config::from_yaml(yaml, false).unwrap();
        assert_eq!(config.write.mode, WriteMode::Overwrite);
        assert_eq!(config.write.operation_type, OperationType::Update);
        assert!(!config.write.ordered);
        assert_eq!(config.write.id_field_list, vec!["region", "order_id"]);
        assert_eq!(config.write.max_batch_size, 100);
        assert_eq!(config.job.max_concurrent_tasks, 16);
        assert_eq!(config.job.max_task_attempts, 2);
        assert_eq!(config.streaming.query_id.as_deref(), Some("orders-stream"));
    }

    #[test]
    fn test_config_from_engine_options() {
        let options: HashMap<String, String> = [
            ("Database", "shop"),
            ("COLLECTION", "orders"),
            ("mode", "append"),
            ("upsertDocument", "false"),
            ("idFieldList", "region, order_id"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let config = WriteConfig::from_options(&options).unwrap();
        assert_eq!(config.namespace(), Namespace::new("shop", "orders"));
        assert_eq!(config.mode, WriteMode::Append);
        assert!(config.is_insert_only());
        assert_eq!(config.id_field_list, vec!["region", "order_id"]);
    }
}

mod write_mode_tests {
    use super::*;

    #[tokio::test]
    async fn test_written_documents_match_rows() {
        for mode in [WriteMode::Overwrite, WriteMode::Append] {
            let store = Arc::new(MemoryStore::new());
            let rows = people(0..25);
            let stats = write(&store, people_config(mode), people_schema(), rows.clone())
                .await
                .unwrap();
            assert_eq!(stats.documents_applied, 25);

            let docs = sorted_by_id(store.documents(&people_ns()).await);
            assert_eq!(docs.len(), 25);
            for (doc, row) in docs.iter().zip(&rows) {
                assert_eq!(&document_to_row(doc, &people_schema()).unwrap(), row);
            }
        }
    }

    #[tokio::test]
    async fn test_overwrite_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        write(&store, people_config(WriteMode::Overwrite), people_schema(), people(0..10))
            .await
            .unwrap();
        let first = sorted_by_id(store.documents(&people_ns()).await);

        write(&store, people_config(WriteMode::Overwrite), people_schema(), people(0..10))
            .await
            .unwrap();
        let second = sorted_by_id(store.documents(&people_ns()).await);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_append_is_additive_and_overwrite_restores() {
        let store = Arc::new(MemoryStore::new());
        write(&store, people_config(WriteMode::Append), people_schema(), people(0..5))
            .await
            .unwrap();
        write(&store, people_config(WriteMode::Append), people_schema(), people(5..8))
            .await
            .unwrap();
        assert_eq!(store.count_documents(&people_ns()).await, 8);

        write(&store, people_config(WriteMode::Overwrite), people_schema(), people(100..103))
            .await
            .unwrap();
        assert_eq!(store.count_documents(&people_ns()).await, 3);
        assert!(store.find_by_id(&people_ns(), &Value::Int64(0)).await.is_none());
        assert!(
            store
                .find_by_id(&people_ns(), &Value::Int64(101))
                .await
                .is_some()
        );
    }

    #[tokio::test]
    async fn test_rejected_modes_write_nothing() {
        for mode in [WriteMode::ErrorIfExists, WriteMode::Ignore] {
            let store = Arc::new(MemoryStore::new());
            let err = write(&store, people_config(mode), people_schema(), people(0..3))
                .await
                .unwrap_err();
            assert!(matches!(err, JobError::CapabilityUnsupported { .. }));
            assert!(err.to_string().contains(&mode.to_string()));
            assert_eq!(store.request_count().await, 0);
            assert!(!store.collection_exists(&people_ns()).await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_synthesized_identifiers_are_unique() {
        let schema = Schema::new(vec![Field::new("name", DataType::String, false)]);
        let rows: Vec<Row> = (0..12).map(|i| row![format!("n{i}")]).collect();
        let store = Arc::new(MemoryStore::new());
        write(&store, people_config(WriteMode::Append), schema, rows)
            .await
            .unwrap();

        let docs = store.documents(&people_ns()).await;
        assert_eq!(docs.len(), 12);
        assert!(docs.iter().all(|d| matches!(d.id(), Some(Value::String(_)))));
    }

    #[tokio::test]
    async fn test_compound_identifier() {
        let schema = Schema::new(vec![
            Field::new("region", DataType::String, false),
            Field::new("order_id", DataType::Long, false),
            Field::new("total", DataType::Double, false),
        ]);
        let config = WriteConfig::new("test", "orders")
            .with_mode(WriteMode::Append)
            .with_id_fields(["region", "order_id"]);
        let store = Arc::new(MemoryStore::new());
        write(&store, config.clone(), schema.clone(), vec![row!["eu", 1i64, 10.0]])
            .await
            .unwrap();
        // same identifier, replaced in place
        write(&store, config, schema, vec![row!["eu", 1i64, 12.5]])
            .await
            .unwrap();

        let docs = store.documents(&Namespace::new("test", "orders")).await;
        assert_eq!(docs.len(), 1);
        let Some(Value::Document(id)) = docs[0].id() else {
            panic!("expected compound identifier");
        };
        assert_eq!(id.keys().collect::<Vec<_>>(), vec!["region", "order_id"]);
        assert_eq!(docs[0].get("total"), Some(&Value::Double(12.5)));
    }

    #[tokio::test]
    async fn test_null_in_required_field_fails_before_write() {
        let store = Arc::new(MemoryStore::new());
        let rows = vec![row![1i64, None::<String>, 30i32]];
        let err = write(&store, people_config(WriteMode::Append), people_schema(), rows)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::Mapping {
                source: MappingError::SchemaViolation { .. },
                ..
            }
        ));
        assert_eq!(store.count_documents(&people_ns()).await, 0);
    }
}

mod decimal_tests {
    use super::*;
    use flurry::decimal::Decimal;

    fn schema(precision: u8, scale: u8) -> Schema {
        Schema::new(vec![
            Field::new("_id", DataType::Long, false),
            Field::new("amount", DataType::decimal(precision, scale), false),
        ])
    }

    async fn round_trip(precision: u8, scale: u8, literal: &str) -> Result<Decimal, JobError> {
        let store = Arc::new(MemoryStore::new());
        let value: Decimal = literal.parse().unwrap();
        write(
            &store,
            people_config(WriteMode::Overwrite),
            schema(precision, scale),
            vec![row![1i64, value]],
        )
        .await?;

        let doc = store
            .find_by_id(&people_ns(), &Value::Int64(1))
            .await
            .unwrap();
        let Some(Value::Decimal128(stored)) = doc.get("amount") else {
            panic!("expected a decimal128 field");
        };
        Ok(stored.value())
    }

    #[tokio::test]
    async fn test_decimal_27_9_round_trips() {
        let stored = round_trip(27, 9, "123456789012345678.123456789").await.unwrap();
        assert_eq!(stored.to_string(), "123456789012345678.123456789");
    }

    #[tokio::test]
    async fn test_decimal_38_9_short_fraction_not_padded() {
        let stored = round_trip(38, 9, "1234.5").await.unwrap();
        assert_eq!(stored.to_string(), "1234.5");
    }

    #[tokio::test]
    async fn test_decimal_beyond_34_digits_rejected() {
        let err = round_trip(38, 9, "12345678901234567890123456.123456789")
            .await
            .unwrap_err();
        let JobError::Mapping {
            source: MappingError::PrecisionOverflow { digits, limit, .. },
            ..
        } = err
        else {
            panic!("expected precision overflow, got {err:?}");
        };
        assert_eq!(digits, 35);
        assert_eq!(limit, 34);
    }
}

mod timeseries_tests {
    use super::*;
    use chrono::{Days, NaiveDate, TimeZone, Utc};
    use flurry::config::Granularity;
    use flurry::sink::CollectionLayout;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("timestamp", DataType::Timestamp, false),
            Field::new("metadata", DataType::String, true),
            Field::new("value", DataType::Double, false),
        ])
    }

    fn readings(n: i64) -> Vec<Row> {
        (0..n)
            .map(|i| {
                let ts = Utc.timestamp_millis_opt(1_700_000_000_000 + i * 1000).unwrap();
                Row::new(vec![
                    RowValue::Timestamp(ts),
                    RowValue::from("sensor-1"),
                    RowValue::Double(i as f64),
                ])
            })
            .collect()
    }

    fn ts_config() -> WriteConfig {
        WriteConfig::new("test", "sensors")
            .with_mode(WriteMode::Append)
            .with_upsert(false)
            .with_timeseries(TimeseriesOptions::new("timestamp").with_meta_field("metadata"))
    }

    #[tokio::test]
    async fn test_creates_timeseries_collection() {
        let store = Arc::new(MemoryStore::new());
        let stats = write(&store, ts_config(), schema(), readings(20)).await.unwrap();
        assert_eq!(stats.documents_applied, 20);

        let ns = Namespace::new("test", "sensors");
        let info = store.collection_info(&ns).await.unwrap().unwrap();
        assert_eq!(info.kind, CollectionKind::Timeseries);
        assert_eq!(store.count_documents(&ns).await, 20);
    }

    #[tokio::test]
    async fn test_append_into_existing_timeseries_collection() {
        let store = Arc::new(MemoryStore::new());
        let ns = Namespace::new("test", "weather");
        let layout = CollectionLayout {
            timeseries: Some(
                TimeseriesOptions::new("timestamp")
                    .with_meta_field("metadata")
                    .with_granularity(Granularity::Hours),
            ),
        };
        store.create_collection(&ns, &layout).await.unwrap();

        let schema = Schema::new(vec![
            Field::new(
                "metadata",
                DataType::structure(vec![
                    Field::new("sensorId", DataType::Integer, false),
                    Field::new("type", DataType::String, false),
                ]),
                false,
            ),
            Field::new("timestamp", DataType::Date, false),
            Field::new("temp", DataType::Integer, false),
        ]);
        let start = NaiveDate::from_ymd_opt(2021, 5, 18).unwrap();
        let rows = (0..12)
            .map(|i| {
                Row::new(vec![
                    RowValue::Struct(Row::new(vec![
                        RowValue::Integer(5578 + i % 2),
                        RowValue::from("temperature"),
                    ])),
                    RowValue::Date(start + Days::new(i as u64 / 2)),
                    RowValue::Integer(10 + i),
                ])
            })
            .collect();

        let config = WriteConfig::new("test", "weather")
            .with_mode(WriteMode::Append)
            .with_upsert(false);
        let stats = write(&store, config, schema, rows).await.unwrap();
        assert_eq!(stats.documents_applied, 12);

        let info = store.collection_info(&ns).await.unwrap().unwrap();
        assert_eq!(info.kind, CollectionKind::Timeseries);
        assert_eq!(store.count_documents(&ns).await, 12);

        let doc = &store.documents(&ns).await[0];
        assert!(matches!(doc.get("timestamp"), Some(Value::DateTime(_))));
        assert!(matches!(doc.get("metadata"), Some(Value::Document(_))));
    }

    #[tokio::test]
    async fn test_upsert_on_timeseries_rejected() {
        let store = Arc::new(MemoryStore::new());
        let err = write(&store, ts_config().with_upsert(true), schema(), readings(1))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::LayoutConflict { .. }));
        assert_eq!(store.request_count().await, 0);
    }
}

mod retry_tests {
    use super::*;

    #[tokio::test]
    async fn test_partial_insert_retried_without_duplicates() {
        let store = Arc::new(MemoryStore::new());
        let config = people_config(WriteMode::Append)
            .with_upsert(false)
            .with_max_batch_size(4);
        store.fail_next_write_after(3).await;

        let stats = WriteJob::new(store.clone(), config, people_schema())
            .with_job_config(fast_job().with_max_concurrent_tasks(1))
            .run(partition_rows(people(0..10), 1))
            .await
            .unwrap();
        assert_eq!(stats.duplicates_tolerated, 3);
        assert_eq!(store.count_documents(&people_ns()).await, 10);
    }

    #[tokio::test]
    async fn test_upsert_replay_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_write_after(5).await;
        write(&store, people_config(WriteMode::Append), people_schema(), people(0..10))
            .await
            .unwrap();
        assert_eq!(store.count_documents(&people_ns()).await, 10);
        let doc = store
            .find_by_id(&people_ns(), &Value::Int64(3))
            .await
            .unwrap();
        assert_eq!(doc.get(ID_FIELD), Some(&Value::Int64(3)));
    }

    #[tokio::test]
    async fn test_duplicate_without_retry_fails() {
        let store = Arc::new(MemoryStore::new());
        let config = people_config(WriteMode::Append).with_upsert(false);
        write(&store, config.clone(), people_schema(), people(0..3))
            .await
            .unwrap();
        let err = write(&store, config, people_schema(), people(2..4))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::DuplicateIdentifier { .. }));
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_transient_error() {
        let store = Arc::new(MemoryStore::new());
        store.fail_next_write_after(0).await;
        let err = WriteJob::new(store.clone(), people_config(WriteMode::Append), people_schema())
            .with_job_config(fast_job().with_max_task_attempts(1))
            .run(partition_rows(people(0..2), 1))
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}
