//! Destination side of the write path.
//!
//! The `DocumentStore` trait is the seam to the database client; the batch
//! writer turns a partition into chunked bulk requests against it.

mod chunk;
mod memory;
mod traits;
mod writer;

pub use chunk::{Chunk, ChunkLimits, chunk_operations};
pub use memory::MemoryStore;
pub use traits::{
    BulkWriteOutcome, CollectionInfo, CollectionKind, CollectionLayout, DocumentStore,
    DocumentStoreRef, Namespace, OperationError, OperationErrorKind, WriteModel,
};
pub use writer::{BatchWriter, ChunkErrors, ChunkFailure, TaskContext, WriteResult};
