//! Traits for document database clients.
//!
//! This module defines the `DocumentStore` trait that abstracts the bulk
//! write and collection management calls the write path needs, enabling
//! dependency inversion and in-memory testing.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::config::TimeseriesOptions;
use crate::document::{Document, Value};
use crate::error::StoreError;

/// Fully qualified collection name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// Physical layout options used when creating a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionLayout {
    pub timeseries: Option<TimeseriesOptions>,
}

/// Kind of an existing collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Collection,
    Timeseries,
}

/// Description of an existing collection as reported by the database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub namespace: Namespace,
    pub kind: CollectionKind,
    pub layout: CollectionLayout,
}

/// One operation in a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    /// Insert a new document; fails on a duplicate identifier.
    Insert { document: Document },
    /// Replace the document with identifier `id`.
    Replace {
        id: Value,
        document: Document,
        upsert: bool,
    },
    /// Set the given fields on the document with identifier `id`.
    Update {
        id: Value,
        fields: Document,
        upsert: bool,
    },
}

impl WriteModel {
    /// The document payload carried by this operation.
    pub fn document(&self) -> &Document {
        match self {
            WriteModel::Insert { document } | WriteModel::Replace { document, .. } => document,
            WriteModel::Update { fields, .. } => fields,
        }
    }

    /// Approximate request payload size in bytes.
    pub fn estimated_size(&self) -> usize {
        let filter = match self {
            WriteModel::Insert { .. } => 0,
            WriteModel::Replace { id, .. } | WriteModel::Update { id, .. } => {
                id.estimated_size() + 16
            }
        };
        self.document().estimated_size() + filter
    }
}

/// Classification of a single failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationErrorKind {
    /// Identifier already present (E11000).
    DuplicateKey,
    /// Document rejected by the database (validation, layout, size).
    Rejected,
}

impl OperationErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationErrorKind::DuplicateKey => "duplicate_key",
            OperationErrorKind::Rejected => "rejected",
        }
    }
}

/// Error reported for one operation of a bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationError {
    /// Index of the operation within the request.
    pub index: usize,
    pub kind: OperationErrorKind,
    pub message: String,
}

impl OperationError {
    pub fn is_duplicate_key(&self) -> bool {
        self.kind == OperationErrorKind::DuplicateKey
    }
}

/// Per-operation results of one bulk request.
///
/// For ordered requests `applied` is the length of the applied prefix and
/// `errors` holds at most the one operation that stopped execution.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteOutcome {
    pub applied: usize,
    pub errors: Vec<OperationError>,
}

/// Trait for document database clients.
///
/// A request-level `Err` means the outcome of the request is unknown (for
/// example a dropped connection after partial application); operation-level
/// failures are reported inside `BulkWriteOutcome`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Execute `operations` against a collection, creating it implicitly if
    /// it does not exist.
    async fn bulk_write(
        &self,
        namespace: &Namespace,
        operations: &[WriteModel],
        ordered: bool,
    ) -> Result<BulkWriteOutcome, StoreError>;

    /// Create a collection; `StoreError::AlreadyExists` if present.
    async fn create_collection(
        &self,
        namespace: &Namespace,
        layout: &CollectionLayout,
    ) -> Result<(), StoreError>;

    /// Drop a collection. Dropping a missing collection succeeds.
    async fn drop_collection(&self, namespace: &Namespace) -> Result<(), StoreError>;

    /// Delete every document, keeping the collection. Returns the count removed.
    async fn delete_all(&self, namespace: &Namespace) -> Result<u64, StoreError>;

    /// List collections of a database.
    async fn list_collections(&self, database: &str) -> Result<Vec<CollectionInfo>, StoreError>;

    /// Describe a single collection, `None` if it does not exist.
    async fn collection_info(
        &self,
        namespace: &Namespace,
    ) -> Result<Option<CollectionInfo>, StoreError> {
        Ok(self
            .list_collections(&namespace.database)
            .await?
            .into_iter()
            .find(|info| info.namespace == *namespace))
    }

    async fn collection_exists(&self, namespace: &Namespace) -> Result<bool, StoreError> {
        Ok(self.collection_info(namespace).await?.is_some())
    }
}

/// Shared handle to a document store client.
pub type DocumentStoreRef = Arc<dyn DocumentStore>;
