//! Batch write job.
//!
//! A job runs in two phases:
//! - **Plan**: validate the request, apply the write mode and provision the
//!   destination. Runs once, before any partition is touched.
//! - **Execute**: write every partition in its own task, at most
//!   `max_concurrent_tasks` at a time, retrying transient failures.

mod tasks;

use std::time::Instant;
use tracing::info;

use crate::config::{Config, JobConfig, WriteConfig};
use crate::error::JobError;
use crate::row::Partition;
use crate::schema::Schema;
use crate::sink::{DocumentStoreRef, TaskContext, WriteResult};

pub(crate) use tasks::execute_partitions;

/// Statistics about a completed write job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStats {
    pub partitions: usize,
    pub documents_attempted: usize,
    pub documents_applied: usize,
    pub duplicates_tolerated: usize,
    pub requests: usize,
}

impl JobStats {
    pub(crate) fn record(&mut self, result: &WriteResult) {
        self.partitions += 1;
        self.documents_attempted += result.attempted;
        self.documents_applied += result.applied;
        self.duplicates_tolerated += result.duplicates_tolerated;
        self.requests += result.requests;
    }

    pub(crate) fn from_results(results: &[WriteResult]) -> Self {
        let mut stats = Self::default();
        for result in results {
            stats.record(result);
        }
        stats
    }
}

/// One batch write of a partitioned dataset into a collection.
pub struct WriteJob {
    store: DocumentStoreRef,
    config: WriteConfig,
    schema: Schema,
    job: JobConfig,
}

impl WriteJob {
    pub fn new(store: DocumentStoreRef, config: WriteConfig, schema: Schema) -> Self {
        Self {
            store,
            config,
            schema,
            job: JobConfig::default(),
        }
    }

    pub fn with_job_config(mut self, job: JobConfig) -> Self {
        self.job = job;
        self
    }

    /// Run the job to completion.
    ///
    /// Nothing is written when planning fails. Once execution starts, a failed
    /// partition fails the job but documents written by other partitions stay
    /// in place.
    pub async fn run(self, partitions: Vec<Partition>) -> Result<JobStats, JobError> {
        let start = Instant::now();
        let plan = crate::policy::plan(self.config, self.schema)?;
        let provisioned = plan.prepare(self.store.as_ref()).await?;
        let writer = plan.writer(self.store.clone())?;

        info!(
            collection = %plan.config().namespace(),
            mode = %plan.mode(),
            destination = ?provisioned,
            partitions = partitions.len(),
            "Starting write job"
        );

        let ctx = TaskContext::new(plan.write_id().clone());
        let results = execute_partitions(&writer, partitions, ctx, &self.job).await?;
        let stats = JobStats::from_results(&results);

        info!(
            collection = %plan.config().namespace(),
            partitions = stats.partitions,
            documents = stats.documents_applied,
            duplicates_tolerated = stats.duplicates_tolerated,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Write job complete"
        );
        Ok(stats)
    }
}

/// Run a batch write described by a loaded [`Config`].
pub async fn run_write(
    config: Config,
    store: DocumentStoreRef,
    schema: Schema,
    partitions: Vec<Partition>,
) -> Result<JobStats, JobError> {
    WriteJob::new(store, config.write, schema)
        .with_job_config(config.job)
        .run(partitions)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteMode;
    use crate::row::partition_rows;
    use crate::schema::{DataType, Field};
    use crate::sink::{DocumentStore, MemoryStore, Namespace};
    use std::sync::Arc;

    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("_id", DataType::Long, false),
            Field::new("name", DataType::String, true),
        ])
    }

    fn job(store: &Arc<MemoryStore>, mode: WriteMode) -> WriteJob {
        WriteJob::new(
            store.clone(),
            WriteConfig::new("db", "people").with_mode(mode),
            schema(),
        )
    }

    #[tokio::test]
    async fn test_stats_aggregate_partitions() {
        let store = Arc::new(MemoryStore::new());
        let rows = (0..10i64).map(|i| crate::row![i, "x"]).collect();
        let stats = job(&store, WriteMode::Append)
            .run(partition_rows(rows, 3))
            .await
            .unwrap();
        assert_eq!(stats.partitions, 3);
        assert_eq!(stats.documents_attempted, 10);
        assert_eq!(stats.documents_applied, 10);
        assert_eq!(stats.duplicates_tolerated, 0);
        assert!(stats.requests >= 3);
    }

    #[tokio::test]
    async fn test_unsupported_mode_writes_nothing() {
        let store = Arc::new(MemoryStore::new());
        let rows = vec![crate::row![1i64, "a"]];
        let err = job(&store, WriteMode::ErrorIfExists)
            .run(partition_rows(rows, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::CapabilityUnsupported { .. }));
        assert_eq!(store.request_count().await, 0);
        let info = store
            .collection_info(&Namespace::new("db", "people"))
            .await
            .unwrap();
        assert!(info.is_none());
    }

    #[tokio::test]
    async fn test_empty_dataset_provisions_destination() {
        let store = Arc::new(MemoryStore::new());
        let stats = job(&store, WriteMode::Overwrite).run(Vec::new()).await.unwrap();
        assert_eq!(stats, JobStats::default());
        assert!(
            store
                .collection_exists(&Namespace::new("db", "people"))
                .await
                .unwrap()
        );
    }
}
