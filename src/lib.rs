//! flurry: the write path for persisting partitioned row batches into
//! document collections.
//!
//! A write is planned once (mode selection, validation, collection
//! provisioning) and then fanned out to one task per partition. Each task maps
//! its rows to documents and executes them as chunked bulk operations. The
//! streaming controller repeats the same write per micro-batch epoch and
//! records each fully applied epoch so a restarted stream resumes after it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use flurry::{Config, MemoryStore, WriteJob, error::JobError, row::partition_rows};
//!
//! async fn load(config: Config, schema: flurry::Schema, rows: Vec<flurry::Row>) -> Result<(), JobError> {
//!     let store = Arc::new(MemoryStore::new());
//!     let stats = WriteJob::new(store, config.write, schema)
//!         .with_job_config(config.job)
//!         .run(partition_rows(rows, 8))
//!         .await?;
//!     println!("Wrote {} documents", stats.documents_applied);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decimal;
pub mod document;
pub mod error;
pub mod logging;
pub mod mapper;
pub mod metrics;
pub mod pipeline;
pub mod policy;
pub mod provision;
pub mod row;
pub mod schema;
pub mod sink;
pub mod stream;

// Re-export main types
pub use config::{Config, JobConfig, StreamingConfig, WriteConfig, WriteMode};
pub use document::{Document, Value};
pub use mapper::TypeMapper;
pub use pipeline::{JobStats, WriteJob, run_write};
pub use policy::{WritePlan, plan};
pub use provision::{Provisioned, ensure_destination};
pub use row::{Partition, Row, RowValue};
pub use schema::{DataType, Field, Schema};
pub use sink::{BatchWriter, DocumentStore, DocumentStoreRef, MemoryStore, WriteResult};
pub use stream::{MicroBatch, MicroBatchSource, StreamController, StreamHandle};
