//! Batch writer.
//!
//! Maps one partition to documents, turns them into bulk operations, and
//! executes them in chunks against the destination. Each call is
//! independent; writers share nothing but read-only configuration.

use snafu::prelude::*;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use super::{
    BulkWriteOutcome, Chunk, ChunkLimits, DocumentStoreRef, Namespace, OperationError,
    WriteModel, chunk_operations,
};
use crate::config::{OperationType, WriteConfig};
use crate::document::Document;
use crate::emit;
use crate::error::{
    ConfigError, DuplicateIdentifierSnafu, JobError, MappingSnafu, StoreError, WriteFailedSnafu,
};
use crate::mapper::{RowOrigin, TypeMapper};
use crate::metrics::events::{
    ChunkExecuted, DocumentsWritten, DuplicatesTolerated, WriteErrorClass, WriteErrors,
};
use crate::row::Partition;
use crate::schema::Schema;

/// Identity of one execution of a partition task.
#[derive(Debug, Clone)]
pub struct TaskContext {
    /// Job or epoch identity used for synthesized identifiers.
    pub write_id: Arc<str>,
    /// 1 for the first execution, incremented on each retry.
    pub attempt: u32,
    /// The same input may already have been applied by an earlier run, as
    /// with the first epoch of a resumed stream.
    pub replay: bool,
}

impl TaskContext {
    pub fn new(write_id: impl Into<Arc<str>>) -> Self {
        Self {
            write_id: write_id.into(),
            attempt: 1,
            replay: false,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_replay(mut self, replay: bool) -> Self {
        self.replay = replay;
        self
    }

    /// Whether earlier executions may have applied part of this input.
    pub fn is_retry(&self) -> bool {
        self.attempt > 1 || self.replay
    }
}

/// Operation errors of one chunk executed unordered.
#[derive(Debug, Clone)]
pub struct ChunkErrors {
    pub chunk: usize,
    /// Position of the chunk's first operation within the partition.
    pub offset: usize,
    pub errors: Vec<OperationError>,
}

/// The error that stopped an ordered chunk.
#[derive(Debug, Clone)]
pub struct ChunkFailure {
    pub chunk: usize,
    /// Position of the failing operation within the partition.
    pub position: usize,
    pub error: OperationError,
}

/// Outcome of writing one partition.
#[derive(Debug, Clone, Default)]
pub struct WriteResult {
    pub partition: usize,
    /// Documents produced from the partition.
    pub attempted: usize,
    /// Documents applied by the destination.
    pub applied: usize,
    /// Duplicate identifiers skipped because this execution is a retry.
    pub duplicates_tolerated: usize,
    /// Bulk requests sent.
    pub requests: usize,
    /// Per-chunk operation errors (unordered execution).
    pub chunk_errors: Vec<ChunkErrors>,
    /// The failing chunk and position (ordered execution).
    pub failed_chunk: Option<ChunkFailure>,
}

impl WriteResult {
    fn new(partition: usize, attempted: usize) -> Self {
        Self {
            partition,
            attempted,
            ..Default::default()
        }
    }

    pub fn is_success(&self) -> bool {
        self.failed_chunk.is_none() && self.chunk_errors.is_empty()
    }

    /// Total failed operations.
    pub fn failed(&self) -> usize {
        self.chunk_errors.iter().map(|c| c.errors.len()).sum::<usize>()
            + usize::from(self.failed_chunk.is_some())
    }

    pub fn first_error(&self) -> Option<&OperationError> {
        self.failed_chunk
            .as_ref()
            .map(|f| &f.error)
            .or_else(|| self.chunk_errors.iter().flat_map(|c| c.errors.first()).next())
    }

    /// Turn a failed result into the job error it represents.
    pub fn ensure_success(self) -> Result<Self, JobError> {
        if let Some(failure) = &self.failed_chunk
            && failure.error.is_duplicate_key()
        {
            return DuplicateIdentifierSnafu {
                partition: self.partition,
                position: failure.position,
                message: failure.error.message.clone(),
            }
            .fail();
        }
        if let Some(first) = self.first_error() {
            return WriteFailedSnafu {
                partition: self.partition,
                failed: self.failed(),
                first_error: first.message.clone(),
            }
            .fail();
        }
        Ok(self)
    }
}

/// Writes partitions to one destination collection.
#[derive(Clone)]
pub struct BatchWriter {
    store: DocumentStoreRef,
    config: Arc<WriteConfig>,
    mapper: TypeMapper,
    namespace: Namespace,
}

impl BatchWriter {
    pub fn new(
        store: DocumentStoreRef,
        config: Arc<WriteConfig>,
        schema: Arc<Schema>,
    ) -> Result<Self, ConfigError> {
        let mapper = TypeMapper::new(schema, &config)?;
        let namespace = config.namespace();
        Ok(Self {
            store,
            config,
            mapper,
            namespace,
        })
    }

    pub fn config(&self) -> &WriteConfig {
        &self.config
    }

    /// Write one partition.
    ///
    /// Every row is mapped before the first request is sent, so mapping
    /// errors never leave a partially written partition. Operation-level
    /// failures are returned inside the `WriteResult`; request-level failures
    /// are errors.
    pub async fn write(
        &self,
        partition: &Partition,
        ctx: &TaskContext,
    ) -> Result<WriteResult, JobError> {
        let index = partition.index();
        let mut operations = Vec::with_capacity(partition.len());
        for (offset, row) in partition.rows().iter().enumerate() {
            let origin = RowOrigin {
                write_id: &ctx.write_id,
                partition: index,
                offset,
            };
            let document = self
                .mapper
                .map_row(row, &origin)
                .context(MappingSnafu { partition: index })?;
            operations.push(self.to_model(document));
        }

        let mut result = WriteResult::new(index, operations.len());
        let limits = ChunkLimits {
            max_operations: self.config.max_batch_size,
            max_bytes: self.config.max_batch_bytes,
        };

        for chunk in chunk_operations(operations, limits) {
            let stopped = if self.config.ordered {
                self.execute_ordered(&chunk, ctx, &mut result).await?
            } else {
                self.execute_unordered(&chunk, ctx, &mut result).await?;
                false
            };
            if stopped {
                break;
            }
        }

        emit!(DocumentsWritten {
            count: result.applied as u64,
        });
        if result.duplicates_tolerated > 0 {
            emit!(DuplicatesTolerated {
                count: result.duplicates_tolerated as u64,
            });
        }
        debug!(
            collection = %self.namespace,
            partition = index,
            attempt = ctx.attempt,
            attempted = result.attempted,
            applied = result.applied,
            requests = result.requests,
            "Partition written"
        );
        Ok(result)
    }

    fn to_model(&self, document: Document) -> WriteModel {
        let id = match document.id() {
            Some(id) if !self.config.is_insert_only() => id.clone(),
            _ => return WriteModel::Insert { document },
        };
        match self.config.operation_type {
            OperationType::Update => WriteModel::Update {
                id,
                fields: document.without_id(),
                upsert: true,
            },
            OperationType::Replace | OperationType::Insert => WriteModel::Replace {
                id,
                document,
                upsert: true,
            },
        }
    }

    /// Execute a chunk in order. Returns true when a non-tolerated error
    /// stopped execution.
    async fn execute_ordered(
        &self,
        chunk: &Chunk,
        ctx: &TaskContext,
        result: &mut WriteResult,
    ) -> Result<bool, JobError> {
        // duplicates are expected only when re-running inserts that may have
        // been applied by an earlier attempt
        let tolerate_duplicates = ctx.is_retry() && self.config.is_insert_only();
        let mut start = 0;

        while start < chunk.len() {
            let outcome = self
                .send(&chunk.operations[start..], true, ctx, result)
                .await?;
            result.applied += outcome.applied;

            let Some(error) = outcome.errors.into_iter().next() else {
                break;
            };
            let position = chunk.offset + start + error.index;

            if tolerate_duplicates && error.is_duplicate_key() {
                warn!(
                    collection = %self.namespace,
                    partition = result.partition,
                    attempt = ctx.attempt,
                    position,
                    "Duplicate identifier on re-executed insert, skipping"
                );
                result.duplicates_tolerated += 1;
                start += error.index + 1;
                continue;
            }

            emit!(WriteErrors {
                class: error_class(&error),
                count: 1,
            });
            result.failed_chunk = Some(ChunkFailure {
                chunk: chunk.index,
                position,
                error,
            });
            return Ok(true);
        }
        Ok(false)
    }

    async fn execute_unordered(
        &self,
        chunk: &Chunk,
        ctx: &TaskContext,
        result: &mut WriteResult,
    ) -> Result<(), JobError> {
        let outcome = self.send(&chunk.operations, false, ctx, result).await?;
        result.applied += outcome.applied;
        if !outcome.errors.is_empty() {
            for error in &outcome.errors {
                emit!(WriteErrors {
                    class: error_class(error),
                    count: 1,
                });
            }
            debug!(
                collection = %self.namespace,
                chunk = chunk.index,
                errors = outcome.errors.len(),
                "Unordered chunk reported errors"
            );
            result.chunk_errors.push(ChunkErrors {
                chunk: chunk.index,
                offset: chunk.offset,
                errors: outcome.errors,
            });
        }
        Ok(())
    }

    async fn send(
        &self,
        operations: &[WriteModel],
        ordered: bool,
        ctx: &TaskContext,
        result: &mut WriteResult,
    ) -> Result<BulkWriteOutcome, JobError> {
        let started = Instant::now();
        result.requests += 1;
        let outcome = self
            .store
            .bulk_write(&self.namespace, operations, ordered)
            .await
            .map_err(|source| request_error(source, result.partition, ctx.attempt))?;
        emit!(ChunkExecuted {
            operations: operations.len() as u64,
            duration: started.elapsed(),
        });
        Ok(outcome)
    }
}

fn request_error(source: StoreError, partition: usize, attempt: u32) -> JobError {
    if source.is_transient() {
        emit!(WriteErrors {
            class: WriteErrorClass::Transient,
            count: 1,
        });
        JobError::TransientWrite {
            partition,
            attempts: attempt,
            source,
        }
    } else {
        JobError::Store {
            step: "bulk_write".to_string(),
            source,
        }
    }
}

fn error_class(error: &OperationError) -> WriteErrorClass {
    if error.is_duplicate_key() {
        WriteErrorClass::DuplicateKey
    } else {
        WriteErrorClass::Rejected
    }
}
