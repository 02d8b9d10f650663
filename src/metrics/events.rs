//! Internal events for metrics emission.
//!
//! Each event struct represents a measurable occurrence in the write path.
//! Events implement the `InternalEvent` trait which records the corresponding
//! counter or gauge through the `metrics` facade.

use metrics::{counter, gauge, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when documents are applied to the destination.
pub struct DocumentsWritten {
    pub count: u64,
}

impl InternalEvent for DocumentsWritten {
    fn emit(self) {
        trace!(count = self.count, "Documents written");
        counter!("flurry_documents_written_total").increment(self.count);
    }
}

/// Event emitted when duplicate identifiers are tolerated on a retried insert.
pub struct DuplicatesTolerated {
    pub count: u64,
}

impl InternalEvent for DuplicatesTolerated {
    fn emit(self) {
        trace!(count = self.count, "Duplicates tolerated");
        counter!("flurry_duplicates_tolerated_total").increment(self.count);
    }
}

/// Event emitted after one bulk request completes.
pub struct ChunkExecuted {
    pub operations: u64,
    pub duration: Duration,
}

impl InternalEvent for ChunkExecuted {
    fn emit(self) {
        trace!(
            operations = self.operations,
            duration_ms = self.duration.as_millis(),
            "Chunk executed"
        );
        counter!("flurry_chunks_executed_total").increment(1);
        histogram!("flurry_chunk_duration_seconds").record(self.duration.as_secs_f64());
    }
}

/// Class of a failed write operation.
#[derive(Debug, Clone, Copy)]
pub enum WriteErrorClass {
    DuplicateKey,
    Rejected,
    Transient,
}

impl WriteErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteErrorClass::DuplicateKey => "duplicate_key",
            WriteErrorClass::Rejected => "rejected",
            WriteErrorClass::Transient => "transient",
        }
    }
}

/// Event emitted for failed write operations.
pub struct WriteErrors {
    pub class: WriteErrorClass,
    pub count: u64,
}

impl InternalEvent for WriteErrors {
    fn emit(self) {
        trace!(class = self.class.as_str(), count = self.count, "Write errors");
        counter!("flurry_write_errors_total", "class" => self.class.as_str())
            .increment(self.count);
    }
}

/// Final status of a partition task.
#[derive(Debug, Clone, Copy)]
pub enum PartitionStatus {
    Success,
    Failed,
}

impl PartitionStatus {
    fn as_str(&self) -> &'static str {
        match self {
            PartitionStatus::Success => "success",
            PartitionStatus::Failed => "failed",
        }
    }
}

/// Event emitted when a partition task finishes.
pub struct PartitionCompleted {
    pub status: PartitionStatus,
}

impl InternalEvent for PartitionCompleted {
    fn emit(self) {
        trace!(status = self.status.as_str(), "Partition completed");
        counter!("flurry_partitions_completed_total", "status" => self.status.as_str())
            .increment(1);
    }
}

/// Event emitted when a partition is retried after a transient failure.
pub struct TaskRetried {
    pub attempt: u32,
}

impl InternalEvent for TaskRetried {
    fn emit(self) {
        trace!(attempt = self.attempt, "Task retried");
        counter!("flurry_task_retries_total").increment(1);
    }
}

/// Event emitted when a streaming epoch is committed.
pub struct EpochCommitted {
    pub epoch: u64,
}

impl InternalEvent for EpochCommitted {
    fn emit(self) {
        trace!(epoch = self.epoch, "Epoch committed");
        counter!("flurry_epochs_committed_total").increment(1);
        gauge!("flurry_last_committed_epoch").set(self.epoch as f64);
    }
}

/// Gauge for the epoch currently being processed.
pub struct CurrentEpoch {
    pub epoch: u64,
}

impl InternalEvent for CurrentEpoch {
    fn emit(self) {
        trace!(epoch = self.epoch, "Current epoch");
        gauge!("flurry_current_epoch").set(self.epoch as f64);
    }
}

/// Gauge for partition tasks currently running.
pub struct ActiveTasks {
    pub count: usize,
}

impl InternalEvent for ActiveTasks {
    fn emit(self) {
        trace!(count = self.count, "Active tasks");
        gauge!("flurry_active_tasks").set(self.count as f64);
    }
}
