//! Partition write tasks.
//!
//! Each partition is written by its own spawned task. A task that fails with
//! a transient error is re-executed wholesale with an incremented attempt
//! number; the writer relies on that number (or the replay flag of the
//! task context) to tolerate duplicates left by a previous execution.

use futures::stream::{FuturesUnordered, StreamExt};
use snafu::ResultExt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{error, warn};

use crate::config::JobConfig;
use crate::emit;
use crate::error::{JobError, TaskJoinSnafu};
use crate::metrics::events::{ActiveTasks, PartitionCompleted, PartitionStatus, TaskRetried};
use crate::row::Partition;
use crate::sink::{BatchWriter, TaskContext, WriteResult};

/// Future type for partition tasks.
type TaskFuture = Pin<Box<dyn Future<Output = Result<WriteResult, JobError>> + Send>>;

/// Spawn a task writing one partition, retrying transient failures.
fn spawn_partition_task(
    writer: BatchWriter,
    partition: Partition,
    ctx: TaskContext,
    job: &JobConfig,
) -> TaskFuture {
    let max_attempts = job.max_task_attempts.max(1);
    let backoff = Duration::from_millis(job.retry_backoff_ms);
    Box::pin(async move {
        tokio::spawn(async move {
            write_with_retry(&writer, &partition, ctx, max_attempts, backoff).await
        })
        .await
        .context(TaskJoinSnafu)?
    })
}

async fn write_with_retry(
    writer: &BatchWriter,
    partition: &Partition,
    base: TaskContext,
    max_attempts: u32,
    backoff: Duration,
) -> Result<WriteResult, JobError> {
    let mut attempt = 1;
    loop {
        let ctx = base.clone().with_attempt(attempt);
        let result = writer
            .write(partition, &ctx)
            .await
            .and_then(WriteResult::ensure_success);

        match result {
            Err(e) if e.is_transient() && attempt < max_attempts => {
                warn!(
                    partition = partition.index(),
                    attempt,
                    max_attempts,
                    error = %e,
                    "Transient failure, retrying partition"
                );
                tokio::time::sleep(backoff * 2u32.saturating_pow(attempt - 1)).await;
                attempt += 1;
                emit!(TaskRetried { attempt });
            }
            other => return other,
        }
    }
}

/// Write all partitions with at most `max_concurrent_tasks` in flight.
///
/// Every task starts from `ctx`, so a replayed input keeps its replay flag
/// across attempts.
///
/// After the first failure no further partitions are scheduled; tasks already
/// running are drained before the error is returned.
pub(crate) async fn execute_partitions(
    writer: &BatchWriter,
    partitions: Vec<Partition>,
    ctx: TaskContext,
    job: &JobConfig,
) -> Result<Vec<WriteResult>, JobError> {
    let max_concurrent = job.max_concurrent_tasks.max(1);
    let mut pending = partitions.into_iter();
    let mut running: FuturesUnordered<TaskFuture> = FuturesUnordered::new();
    let mut results = Vec::new();
    let mut first_error: Option<JobError> = None;

    loop {
        while first_error.is_none() && running.len() < max_concurrent {
            let Some(partition) = pending.next() else {
                break;
            };
            running.push(spawn_partition_task(
                writer.clone(),
                partition,
                ctx.clone(),
                job,
            ));
        }
        emit!(ActiveTasks {
            count: running.len()
        });

        let Some(outcome) = running.next().await else {
            break;
        };
        match outcome {
            Ok(result) => {
                emit!(PartitionCompleted {
                    status: PartitionStatus::Success
                });
                results.push(result);
            }
            Err(e) => {
                error!(error = %e, "Partition task failed");
                emit!(PartitionCompleted {
                    status: PartitionStatus::Failed
                });
                first_error.get_or_insert(e);
            }
        }
    }

    emit!(ActiveTasks { count: 0 });
    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WriteConfig;
    use crate::row::{Row, partition_rows};
    use crate::schema::{DataType, Field, Schema};
    use crate::sink::{MemoryStore, Namespace};
    use std::sync::Arc;

    fn writer(store: &Arc<MemoryStore>, config: WriteConfig) -> BatchWriter {
        let schema = Arc::new(Schema::new(vec![Field::new("v", DataType::Long, false)]));
        BatchWriter::new(store.clone(), Arc::new(config), schema).unwrap()
    }

    fn rows(n: i64) -> Vec<Row> {
        (0..n).map(|i| crate::row![i]).collect()
    }

    fn fast_job() -> JobConfig {
        JobConfig::default()
            .with_max_concurrent_tasks(2)
            .with_retry_backoff_ms(1)
    }

    #[tokio::test]
    async fn test_all_partitions_written() {
        let store = Arc::new(MemoryStore::new());
        let w = writer(&store, WriteConfig::new("db", "coll"));
        let results = execute_partitions(&w, partition_rows(rows(20), 5), TaskContext::new("job"), &fast_job())
            .await
            .unwrap();
        assert_eq!(results.len(), 5);
        assert_eq!(results.iter().map(|r| r.applied).sum::<usize>(), 20);
        assert_eq!(store.count_documents(&Namespace::new("db", "coll")).await, 20);
    }

    #[tokio::test]
    async fn test_transient_failure_retried() {
        let store = Arc::new(MemoryStore::new());
        let w = writer(&store, WriteConfig::new("db", "coll").with_upsert(false));
        store.fail_next_write_after(2).await;
        let results = execute_partitions(&w, partition_rows(rows(4), 1), TaskContext::new("job"), &fast_job())
            .await
            .unwrap();
        assert_eq!(results[0].duplicates_tolerated, 2);
        assert_eq!(store.count_documents(&Namespace::new("db", "coll")).await, 4);
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let store = Arc::new(MemoryStore::new());
        let w = writer(&store, WriteConfig::new("db", "coll"));
        store.fail_next_write_after(0).await;
        let job = fast_job().with_max_task_attempts(1);
        let err = execute_partitions(&w, partition_rows(rows(4), 1), TaskContext::new("job"), &job)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::TransientWrite {
                partition: 0,
                attempts: 1,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_duplicate_on_first_attempt_fails_job() {
        let store = Arc::new(MemoryStore::new());
        let w = writer(&store, WriteConfig::new("db", "coll").with_upsert(false));
        let job = fast_job().with_max_concurrent_tasks(1);
        execute_partitions(&w, partition_rows(rows(3), 1), TaskContext::new("job"), &job)
            .await
            .unwrap();

        let err = execute_partitions(&w, partition_rows(rows(3), 1), TaskContext::new("job"), &job)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::DuplicateIdentifier { .. }));
    }

    #[tokio::test]
    async fn test_replayed_input_skips_applied_inserts() {
        let store = Arc::new(MemoryStore::new());
        let w = writer(&store, WriteConfig::new("db", "coll").with_upsert(false));
        let job = fast_job().with_max_task_attempts(1);
        store.fail_next_write_after(2).await;
        execute_partitions(&w, partition_rows(rows(5), 1), TaskContext::new("job"), &job)
            .await
            .unwrap_err();

        let replay = TaskContext::new("job").with_replay(true);
        let results = execute_partitions(&w, partition_rows(rows(5), 1), replay, &job)
            .await
            .unwrap();
        assert_eq!(results[0].duplicates_tolerated, 2);
        assert_eq!(results[0].applied, 3);
        assert_eq!(store.count_documents(&Namespace::new("db", "coll")).await, 5);
    }
}
