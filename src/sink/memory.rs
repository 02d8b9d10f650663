//! In-memory document store.
//!
//! Implements the `DocumentStore` client seam with the semantics the write
//! path relies on: implicit collection creation, unique identifiers,
//! ordered/unordered bulk execution, time-series validation. Used by the test
//! suites and for dry runs; fault injection simulates requests that fail
//! after partial application.

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::Mutex;
use tracing::debug;

use super::{
    BulkWriteOutcome, CollectionInfo, CollectionKind, CollectionLayout, DocumentStore, Namespace,
    OperationError, OperationErrorKind, WriteModel,
};
use crate::document::{Document, ID_FIELD, Value};
use crate::error::StoreError;

#[derive(Debug, Default)]
struct StoredCollection {
    layout: CollectionLayout,
    documents: Vec<Document>,
    /// Identifier key to position in `documents`; unused for time-series.
    ids: HashMap<String, usize>,
    next_generated_id: u64,
}

impl StoredCollection {
    fn new(layout: CollectionLayout) -> Self {
        Self {
            layout,
            ..Default::default()
        }
    }

    fn kind(&self) -> CollectionKind {
        if self.layout.timeseries.is_some() {
            CollectionKind::Timeseries
        } else {
            CollectionKind::Collection
        }
    }

    fn generate_id(&mut self) -> Value {
        self.next_generated_id += 1;
        Value::Int64(self.next_generated_id as i64)
    }

    fn apply(
        &mut self,
        namespace: &Namespace,
        op: &WriteModel,
    ) -> Result<(), (OperationErrorKind, String)> {
        if let Some(ts) = &self.layout.timeseries {
            let WriteModel::Insert { document } = op else {
                return Err((
                    OperationErrorKind::Rejected,
                    "time-series collections only accept inserts".to_string(),
                ));
            };
            if !matches!(document.get(&ts.time_field), Some(Value::DateTime(_))) {
                return Err((
                    OperationErrorKind::Rejected,
                    format!(
                        "'{}' must be present and contain a valid BSON UTC datetime value",
                        ts.time_field
                    ),
                ));
            }
            let mut document = document.clone();
            if document.id().is_none() {
                let id = self.generate_id();
                document.insert_first(ID_FIELD, id);
            }
            self.documents.push(document);
            return Ok(());
        }

        match op {
            WriteModel::Insert { document } => {
                let mut document = document.clone();
                let id = match document.id() {
                    Some(id) => id.clone(),
                    None => {
                        let id = self.generate_id();
                        document.insert_first(ID_FIELD, id.clone());
                        id
                    }
                };
                let key = id.identity_key();
                if self.ids.contains_key(&key) {
                    return Err((OperationErrorKind::DuplicateKey, duplicate_message(namespace, &id)));
                }
                self.ids.insert(key, self.documents.len());
                self.documents.push(document);
            }
            WriteModel::Replace {
                id,
                document,
                upsert,
            } => {
                let mut replacement = document.without_id();
                replacement.insert_first(ID_FIELD, id.clone());
                match self.ids.get(&id.identity_key()) {
                    Some(&pos) => self.documents[pos] = replacement,
                    None if *upsert => self.push_new(id, replacement),
                    None => {}
                }
            }
            WriteModel::Update { id, fields, upsert } => match self.ids.get(&id.identity_key()) {
                Some(&pos) => {
                    let existing = &mut self.documents[pos];
                    for (key, value) in fields.iter().filter(|(k, _)| *k != ID_FIELD) {
                        existing.insert(key, value.clone());
                    }
                }
                None if *upsert => {
                    let mut created = fields.without_id();
                    created.insert_first(ID_FIELD, id.clone());
                    self.push_new(id, created);
                }
                None => {}
            },
        }
        Ok(())
    }

    fn push_new(&mut self, id: &Value, document: Document) {
        self.ids.insert(id.identity_key(), self.documents.len());
        self.documents.push(document);
    }
}

fn duplicate_message(namespace: &Namespace, id: &Value) -> String {
    format!("E11000 duplicate key error collection: {namespace} index: _id_ dup key: {{ _id: {id:?} }}")
}

#[derive(Debug, Default)]
struct State {
    collections: BTreeMap<(String, String), StoredCollection>,
    /// Apply this many operations of the next bulk request, then fail it.
    fail_after: Option<usize>,
    requests: usize,
}

/// Document store held entirely in process memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

fn key(namespace: &Namespace) -> (String, String) {
    (namespace.database.clone(), namespace.collection.clone())
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next bulk request apply `operations` operations and then
    /// fail with a transient error, as a dropped connection would.
    pub async fn fail_next_write_after(&self, operations: usize) {
        self.state.lock().await.fail_after = Some(operations);
    }

    /// Number of documents in a collection (zero if it does not exist).
    pub async fn count_documents(&self, namespace: &Namespace) -> usize {
        self.state
            .lock()
            .await
            .collections
            .get(&key(namespace))
            .map_or(0, |c| c.documents.len())
    }

    /// Snapshot of a collection's documents in insertion order.
    pub async fn documents(&self, namespace: &Namespace) -> Vec<Document> {
        self.state
            .lock()
            .await
            .collections
            .get(&key(namespace))
            .map(|c| c.documents.clone())
            .unwrap_or_default()
    }

    /// Look up a document by identifier.
    pub async fn find_by_id(&self, namespace: &Namespace, id: &Value) -> Option<Document> {
        let state = self.state.lock().await;
        let collection = state.collections.get(&key(namespace))?;
        match collection.kind() {
            CollectionKind::Collection => collection
                .ids
                .get(&id.identity_key())
                .map(|&pos| collection.documents[pos].clone()),
            CollectionKind::Timeseries => collection
                .documents
                .iter()
                .find(|d| d.id() == Some(id))
                .cloned(),
        }
    }

    /// Number of bulk requests received so far.
    pub async fn request_count(&self) -> usize {
        self.state.lock().await.requests
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn bulk_write(
        &self,
        namespace: &Namespace,
        operations: &[WriteModel],
        ordered: bool,
    ) -> Result<BulkWriteOutcome, StoreError> {
        let mut state = self.state.lock().await;
        state.requests += 1;
        let fail_after = state.fail_after.take();

        let collection = state
            .collections
            .entry(key(namespace))
            .or_insert_with(|| StoredCollection::new(CollectionLayout::default()));

        if let Some(limit) = fail_after {
            // partial application, then the outcome is lost
            for op in operations.iter().take(limit) {
                if collection.apply(namespace, op).is_err() {
                    break;
                }
            }
            debug!(namespace = %namespace, applied = limit, "Injected transient failure");
            return Err(StoreError::Transient {
                message: format!("connection closed after {limit} operation(s)"),
            });
        }

        let mut outcome = BulkWriteOutcome::default();
        for (index, op) in operations.iter().enumerate() {
            match collection.apply(namespace, op) {
                Ok(()) => outcome.applied += 1,
                Err((kind, message)) => {
                    outcome.errors.push(OperationError {
                        index,
                        kind,
                        message,
                    });
                    if ordered {
                        break;
                    }
                }
            }
        }
        Ok(outcome)
    }

    async fn create_collection(
        &self,
        namespace: &Namespace,
        layout: &CollectionLayout,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let key = key(namespace);
        if state.collections.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                namespace: namespace.to_string(),
            });
        }
        state
            .collections
            .insert(key, StoredCollection::new(layout.clone()));
        Ok(())
    }

    async fn drop_collection(&self, namespace: &Namespace) -> Result<(), StoreError> {
        self.state.lock().await.collections.remove(&key(namespace));
        Ok(())
    }

    async fn delete_all(&self, namespace: &Namespace) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let Some(collection) = state.collections.get_mut(&key(namespace)) else {
            return Ok(0);
        };
        let removed = collection.documents.len() as u64;
        collection.documents.clear();
        collection.ids.clear();
        Ok(removed)
    }

    async fn list_collections(&self, database: &str) -> Result<Vec<CollectionInfo>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .collections
            .iter()
            .filter(|((db, _), _)| db == database)
            .map(|((db, name), collection)| CollectionInfo {
                namespace: Namespace::new(db.as_str(), name.as_str()),
                kind: collection.kind(),
                layout: collection.layout.clone(),
            })
            .collect())
    }
}
