//! Streaming micro-batch controller.
//!
//! Drives a stream as a loop of epochs: each micro-batch pulled from the
//! source becomes one epoch, written exactly like a batch job and then
//! recorded in the epoch log. The controller moves `Idle -> Processing(epoch)
//! -> Idle` until the source is exhausted or the stream is stopped.
//!
//! # Recovery
//!
//! Only fully applied epochs are recorded. A restarted stream resumes at the
//! epoch after the last record and asks the source for that epoch again, so a
//! partially written epoch is replayed with the same synthesized identifiers.
//! That first epoch runs as a replay: insert-only writes skip identifiers the
//! interrupted run already applied.

pub mod epoch;

pub use epoch::{EpochLog, EpochLogRef, EpochRecord, FileEpochLog, MemoryEpochLog, open_epoch_log};

use async_trait::async_trait;
use snafu::prelude::*;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{JobConfig, OutputMode, StreamingConfig, WriteConfig, WriteMode};
use crate::emit;
use crate::error::{CapabilityUnsupportedSnafu, EpochLogSnafu, JobError, TaskJoinSnafu};
use crate::metrics::events::{CurrentEpoch, EpochCommitted};
use crate::pipeline::{JobStats, execute_partitions};
use crate::row::Partition;
use crate::schema::Schema;
use crate::sink::{BatchWriter, DocumentStoreRef, TaskContext};

/// The partitions delivered for one epoch.
#[derive(Debug, Clone, Default)]
pub struct MicroBatch {
    pub partitions: Vec<Partition>,
}

impl MicroBatch {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self { partitions }
    }
}

/// Supplier of micro-batches.
///
/// `next_batch` must return the same data when asked for an epoch again
/// after a restart.
#[async_trait]
pub trait MicroBatchSource: Send {
    /// The batch for `epoch`, or `None` once the stream is exhausted.
    async fn next_batch(&mut self, epoch: u64) -> Result<Option<MicroBatch>, JobError>;

    /// Called after `epoch` has been fully applied and recorded.
    async fn commit(&mut self, _epoch: u64) -> Result<(), JobError> {
        Ok(())
    }
}

/// Observable controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Processing { epoch: u64 },
    Stopped,
}

/// Summary of a stream that terminated cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamSummary {
    pub query_id: String,
    /// Epochs committed by this run.
    pub epochs_committed: u64,
    pub last_committed: Option<u64>,
    pub documents_applied: u64,
}

/// Builds and starts a streaming write.
pub struct StreamController {
    store: DocumentStoreRef,
    config: WriteConfig,
    schema: Schema,
    log: EpochLogRef,
    job: JobConfig,
    streaming: StreamingConfig,
}

impl StreamController {
    pub fn new(
        store: DocumentStoreRef,
        config: WriteConfig,
        schema: Schema,
        log: EpochLogRef,
    ) -> Self {
        Self {
            store,
            config,
            schema,
            log,
            job: JobConfig::default(),
            streaming: StreamingConfig::default(),
        }
    }

    pub fn with_job_config(mut self, job: JobConfig) -> Self {
        self.job = job;
        self
    }

    pub fn with_streaming_config(mut self, streaming: StreamingConfig) -> Self {
        self.streaming = streaming;
        self
    }

    /// Validate the stream, provision the destination and start the epoch
    /// loop in a background task.
    ///
    /// Streaming writes always append; the configured write mode only
    /// applies to batch jobs.
    pub async fn start<S>(self, source: S) -> Result<StreamHandle, JobError>
    where
        S: MicroBatchSource + 'static,
    {
        let output_mode = self.streaming.output_mode;
        ensure!(
            output_mode == OutputMode::Append,
            CapabilityUnsupportedSnafu {
                mode: output_mode.to_string(),
                reason: "streaming writes support the Append output mode only",
            }
        );

        let mut config = self.config;
        if config.mode != WriteMode::Append {
            debug!(configured = %config.mode, "Streaming writes use Append");
            config.mode = WriteMode::Append;
        }
        let plan = crate::policy::plan(config, self.schema)?;
        plan.prepare(self.store.as_ref()).await?;
        let writer = plan.writer(self.store.clone())?;

        let last = self.log.last_committed().await.context(EpochLogSnafu)?;
        let query_id = match (&last, &self.streaming.query_id) {
            (Some(record), Some(configured)) if &record.query_id != configured => {
                warn!(
                    recorded = %record.query_id,
                    configured = %configured,
                    "Epoch log belongs to another query id, keeping the recorded one"
                );
                record.query_id.clone()
            }
            (Some(record), _) => record.query_id.clone(),
            (None, Some(configured)) => configured.clone(),
            (None, None) => Uuid::new_v4().simple().to_string(),
        };
        // a generated query id cannot have written anything yet
        let resumed = last.is_some() || self.streaming.query_id.is_some();
        let last_committed = last.map(|record| record.epoch);

        info!(
            collection = %plan.config().namespace(),
            query_id = %query_id,
            resume_epoch = last_committed.map_or(0, |e| e + 1),
            "Starting stream"
        );

        let (state_tx, state_rx) = watch::channel(ControllerState::Idle);
        let cancel = CancellationToken::new();
        let run = EpochLoop {
            writer,
            log: self.log,
            job: self.job,
            query_id: query_id.clone(),
            last_committed,
            replay_next: resumed,
            state: state_tx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(run.run(source));

        Ok(StreamHandle {
            query_id,
            state: state_rx,
            cancel,
            task,
        })
    }
}

/// Handle to a running stream.
pub struct StreamHandle {
    query_id: String,
    state: watch::Receiver<ControllerState>,
    cancel: CancellationToken,
    task: JoinHandle<Result<StreamSummary, JobError>>,
}

impl StreamHandle {
    pub fn query_id(&self) -> &str {
        &self.query_id
    }

    pub fn state(&self) -> ControllerState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.clone()
    }

    /// Request a stop. An epoch being written is finished and committed
    /// first; no new epoch is started.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Wait for the stream to end.
    pub async fn await_termination(self) -> Result<StreamSummary, JobError> {
        self.task.await.context(TaskJoinSnafu)?
    }

    /// Stop and wait for the in-flight epoch to drain.
    pub async fn shutdown(self) -> Result<StreamSummary, JobError> {
        self.stop();
        self.await_termination().await
    }
}

struct EpochLoop {
    writer: BatchWriter,
    log: EpochLogRef,
    job: JobConfig,
    query_id: String,
    last_committed: Option<u64>,
    /// Set until the first epoch of a resumed stream is committed.
    replay_next: bool,
    state: watch::Sender<ControllerState>,
    cancel: CancellationToken,
}

impl EpochLoop {
    async fn run<S: MicroBatchSource>(mut self, mut source: S) -> Result<StreamSummary, JobError> {
        let result = self.drive(&mut source).await;
        self.state.send_replace(ControllerState::Stopped);
        match &result {
            Ok(summary) => info!(
                query_id = %summary.query_id,
                epochs = summary.epochs_committed,
                last_committed = ?summary.last_committed,
                "Stream stopped"
            ),
            Err(e) => error!(query_id = %self.query_id, error = %e, "Stream failed"),
        }
        result
    }

    async fn drive<S: MicroBatchSource>(&mut self, source: &mut S) -> Result<StreamSummary, JobError> {
        let mut summary = StreamSummary {
            query_id: self.query_id.clone(),
            epochs_committed: 0,
            last_committed: self.last_committed,
            documents_applied: 0,
        };

        loop {
            let epoch = self.last_committed.map_or(0, |e| e + 1);
            self.state.send_replace(ControllerState::Idle);

            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    debug!(epoch, "Stop requested while waiting for the next batch");
                    break;
                }
                batch = source.next_batch(epoch) => batch.map_err(|e| self.failed(epoch, e))?,
            };
            let Some(batch) = batch else {
                debug!(epoch, "Source exhausted");
                break;
            };

            self.state.send_replace(ControllerState::Processing { epoch });
            emit!(CurrentEpoch { epoch });

            let documents = self.write_epoch(epoch, batch).await?;
            source.commit(epoch).await.map_err(|e| self.failed(epoch, e))?;

            summary.epochs_committed += 1;
            summary.last_committed = Some(epoch);
            summary.documents_applied += documents;

            if self.cancel.is_cancelled() {
                debug!(epoch, "Stop requested, epoch drained");
                break;
            }
        }
        Ok(summary)
    }

    /// Write every partition of an epoch and record it.
    async fn write_epoch(&mut self, epoch: u64, batch: MicroBatch) -> Result<u64, JobError> {
        let write_id: Arc<str> = format!("{}-{epoch}", self.query_id).into();
        let ctx = TaskContext::new(write_id).with_replay(self.replay_next);
        let partitions = batch.partitions.len();

        let results = execute_partitions(&self.writer, batch.partitions, ctx, &self.job)
            .await
            .map_err(|e| self.failed(epoch, e))?;
        let stats = JobStats::from_results(&results);
        let documents = stats.documents_applied as u64;

        self.log
            .commit(EpochRecord::new(self.query_id.clone(), epoch, documents))
            .await
            .context(EpochLogSnafu)
            .map_err(|e| self.failed(epoch, e))?;
        self.last_committed = Some(epoch);
        self.replay_next = false;
        emit!(EpochCommitted { epoch });

        info!(
            query_id = %self.query_id,
            epoch,
            partitions,
            documents,
            "Epoch committed"
        );
        Ok(documents)
    }

    fn failed(&self, epoch: u64, source: JobError) -> JobError {
        JobError::EpochFailed {
            epoch,
            last_committed: self.last_committed,
            source: Box::new(source),
        }
    }
}
