//! In-memory document store.
//!
//! Collections are kept in id order, so traversal order is stable across queries.
//! All state sits behind one lock that is never held across an await point.
//! Primarily intended for tests and local tooling.

use super::{
    AtomicWriter, DocumentData, DocumentRef, DocumentSnapshot, FieldPatch, FieldPath,
    Precondition, SetOptions, Traversable, WriteBatch,
};
use crate::constants::store::MAX_BATCH_WRITE_COUNT;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use tracing::trace;
use uuid::Uuid;

type DocKey = (String, String);

#[derive(Debug, Clone)]
struct StoredDocument {
    data: Arc<DocumentData>,
    update_time: DateTime<Utc>,
}

/// Operation counters, for asserting how a run touched the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStoreStats {
    /// Pages fetched
    pub fetches: u64,
    /// Successful single-document writes
    pub single_writes: u64,
    /// Successful atomic commits
    pub commits: u64,
}

#[derive(Default)]
struct MemoryStoreInner {
    collections: HashMap<String, BTreeMap<String, StoredDocument>>,
    pending_failures: usize,
    stats: MemoryStoreStats,
}

impl MemoryStoreInner {
    fn lookup(&self, key: &DocKey) -> Option<StoredDocument> {
        self.collections
            .get(&key.0)
            .and_then(|docs| docs.get(&key.1))
            .cloned()
    }

    fn store(&mut self, key: DocKey, document: StoredDocument) {
        self.collections
            .entry(key.0)
            .or_default()
            .insert(key.1, document);
    }

    fn take_failure(&mut self, path: &str) -> Result<(), StoreError> {
        if self.pending_failures > 0 {
            self.pending_failures -= 1;
            return Err(StoreError::Unavailable(format!("injected failure writing {path}")));
        }
        Ok(())
    }
}

/// In-process store holding named collections of documents.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<RwLock<MemoryStoreInner>>,
    max_batch_write_count: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore")
            .field("max_batch_write_count", &self.max_batch_write_count)
            .finish_non_exhaustive()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MemoryStoreInner::default())),
            max_batch_write_count: MAX_BATCH_WRITE_COUNT,
        }
    }

    /// Same data, different atomic write limit.
    pub fn with_max_batch_write_count(mut self, max: usize) -> Self {
        self.max_batch_write_count = max;
        self
    }

    pub fn collection(&self, name: impl Into<String>) -> CollectionRef {
        CollectionRef {
            store: self.clone(),
            name: name.into(),
            filters: Vec::new(),
            limit: None,
            start_after: None,
        }
    }

    /// Make the next `count` write operations fail with [`StoreError::Unavailable`].
    /// A commit counts as one operation.
    pub fn fail_next_writes(&self, count: usize) {
        self.inner.write().pending_failures = count;
    }

    pub fn stats(&self) -> MemoryStoreStats {
        self.inner.read().stats
    }

    pub fn document_count(&self, collection: &str) -> usize {
        self.inner
            .read()
            .collections
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

/// A collection, optionally narrowed by equality filters and a page window.
#[derive(Clone)]
pub struct CollectionRef {
    store: MemoryStore,
    name: String,
    filters: Vec<(FieldPath, Value)>,
    limit: Option<usize>,
    start_after: Option<String>,
}

impl fmt::Debug for CollectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionRef")
            .field("name", &self.name)
            .field("filters", &self.filters)
            .field("limit", &self.limit)
            .field("start_after", &self.start_after)
            .finish()
    }
}

impl CollectionRef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn doc(&self, id: impl Into<String>) -> MemoryDocRef {
        MemoryDocRef {
            store: self.store.clone(),
            collection: self.name.clone(),
            id: id.into(),
        }
    }

    /// Store `data` under a freshly generated id.
    pub async fn add(&self, data: DocumentData) -> Result<MemoryDocRef, StoreError> {
        let reference = self.doc(Uuid::new_v4().to_string());
        reference.set(data, SetOptions::Overwrite).await?;
        Ok(reference)
    }

    /// Restrict the query to documents whose field at `path` equals `value`.
    pub fn where_eq(&self, path: &str, value: impl Into<Value>) -> Result<Self, StoreError> {
        let mut narrowed = self.clone();
        narrowed.filters.push((FieldPath::parse(path)?, value.into()));
        Ok(narrowed)
    }

    fn matches(&self, data: &DocumentData) -> bool {
        self.filters
            .iter()
            .all(|(path, expected)| path.get(data) == Some(expected))
    }
}

#[async_trait]
impl Traversable for CollectionRef {
    type Snapshot = MemorySnapshot;

    fn limit(&self, limit: usize) -> Self {
        let mut limited = self.clone();
        limited.limit = Some(limit);
        limited
    }

    fn start_after(&self, cursor: &MemorySnapshot) -> Self {
        let mut continued = self.clone();
        continued.start_after = Some(cursor.id().to_string());
        continued
    }

    async fn fetch(&self) -> Result<Vec<MemorySnapshot>, StoreError> {
        let mut inner = self.store.inner.write();
        inner.stats.fetches += 1;

        let docs = match inner.collections.get(&self.name) {
            Some(docs) => docs,
            None => return Ok(Vec::new()),
        };

        let range: Box<dyn Iterator<Item = (&String, &StoredDocument)>> = match &self.start_after
        {
            Some(cursor) => Box::new(
                docs.range::<str, _>((Bound::Excluded(cursor.as_str()), Bound::Unbounded)),
            ),
            None => Box::new(docs.iter()),
        };

        let page: Vec<MemorySnapshot> = range
            .filter(|(_, document)| self.matches(&document.data))
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|(id, document)| MemorySnapshot {
                reference: self.doc(id.clone()),
                data: Arc::clone(&document.data),
                update_time: document.update_time,
            })
            .collect();

        trace!(collection = %self.name, page_size = page.len(), "Fetched page");
        Ok(page)
    }
}

impl AtomicWriter for CollectionRef {
    type Batch = MemoryWriteBatch;

    fn batch(&self) -> MemoryWriteBatch {
        MemoryWriteBatch {
            store: self.store.clone(),
            writes: Vec::new(),
        }
    }

    fn max_batch_write_count(&self) -> usize {
        self.store.max_batch_write_count
    }
}

/// Handle to one document of a [`MemoryStore`].
#[derive(Clone)]
pub struct MemoryDocRef {
    store: MemoryStore,
    collection: String,
    id: String,
}

impl fmt::Debug for MemoryDocRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MemoryDocRef").field(&self.path()).finish()
    }
}

impl MemoryDocRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current state of the document, if it exists.
    pub fn get(&self) -> Option<MemorySnapshot> {
        self.store
            .inner
            .read()
            .lookup(&self.key())
            .map(|document| MemorySnapshot {
                reference: self.clone(),
                data: document.data,
                update_time: document.update_time,
            })
    }

    fn key(&self) -> DocKey {
        (self.collection.clone(), self.id.clone())
    }

    fn write(&self, pending: PendingWrite) -> Result<(), StoreError> {
        let mut inner = self.store.inner.write();
        inner.take_failure(&self.path())?;
        let key = self.key();
        let next = pending.apply(inner.lookup(&key).as_ref(), Utc::now())?;
        inner.store(key, next);
        inner.stats.single_writes += 1;
        Ok(())
    }
}

#[async_trait]
impl DocumentRef for MemoryDocRef {
    fn path(&self) -> String {
        format!("{}/{}", self.collection, self.id)
    }

    async fn set(&self, data: DocumentData, options: SetOptions) -> Result<(), StoreError> {
        self.write(PendingWrite::Set {
            reference: self.clone(),
            data,
            options,
        })
    }

    async fn update(
        &self,
        patch: FieldPatch,
        precondition: Option<Precondition>,
    ) -> Result<(), StoreError> {
        self.write(PendingWrite::Update {
            reference: self.clone(),
            patch,
            precondition,
        })
    }
}

/// Document state captured at fetch time.
#[derive(Clone)]
pub struct MemorySnapshot {
    reference: MemoryDocRef,
    data: Arc<DocumentData>,
    update_time: DateTime<Utc>,
}

impl fmt::Debug for MemorySnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemorySnapshot")
            .field("path", &self.reference.path())
            .field("data", &self.data)
            .finish()
    }
}

impl DocumentSnapshot for MemorySnapshot {
    type Ref = MemoryDocRef;

    fn id(&self) -> &str {
        &self.reference.id
    }

    fn data(&self) -> &DocumentData {
        &self.data
    }

    fn update_time(&self) -> Option<DateTime<Utc>> {
        Some(self.update_time)
    }

    fn reference(&self) -> MemoryDocRef {
        self.reference.clone()
    }
}

enum PendingWrite {
    Set {
        reference: MemoryDocRef,
        data: DocumentData,
        options: SetOptions,
    },
    Update {
        reference: MemoryDocRef,
        patch: FieldPatch,
        precondition: Option<Precondition>,
    },
}

impl PendingWrite {
    fn reference(&self) -> &MemoryDocRef {
        match self {
            PendingWrite::Set { reference, .. } | PendingWrite::Update { reference, .. } => {
                reference
            }
        }
    }

    fn apply(
        &self,
        current: Option<&StoredDocument>,
        now: DateTime<Utc>,
    ) -> Result<StoredDocument, StoreError> {
        let data = match self {
            PendingWrite::Set { data, options, .. } => {
                options.apply(current.map(|document| document.data.as_ref()), data)
            }
            PendingWrite::Update {
                reference,
                patch,
                precondition,
            } => {
                let path = reference.path();
                precondition
                    .clone()
                    .unwrap_or_else(|| Precondition::exists(true))
                    .check(&path, current.map(|document| document.update_time))?;
                let mut data = current
                    .map(|document| document.data.as_ref().clone())
                    .ok_or(StoreError::NotFound { path })?;
                super::apply_patch(&mut data, patch);
                data
            }
        };
        Ok(StoredDocument {
            data: Arc::new(data),
            update_time: now,
        })
    }
}

/// Atomic write buffer. A commit validates every write before applying any.
pub struct MemoryWriteBatch {
    store: MemoryStore,
    writes: Vec<PendingWrite>,
}

#[async_trait]
impl WriteBatch for MemoryWriteBatch {
    type Ref = MemoryDocRef;

    fn set(&mut self, reference: &MemoryDocRef, data: DocumentData, options: SetOptions) {
        self.writes.push(PendingWrite::Set {
            reference: reference.clone(),
            data,
            options,
        });
    }

    fn update(
        &mut self,
        reference: &MemoryDocRef,
        patch: FieldPatch,
        precondition: Option<Precondition>,
    ) {
        self.writes.push(PendingWrite::Update {
            reference: reference.clone(),
            patch,
            precondition,
        });
    }

    fn len(&self) -> usize {
        self.writes.len()
    }

    async fn commit(self) -> Result<(), StoreError> {
        let max = self.store.max_batch_write_count;
        if self.writes.len() > max {
            return Err(StoreError::BatchTooLarge {
                size: self.writes.len(),
                max,
            });
        }

        let mut inner = self.store.inner.write();
        inner.take_failure("atomic commit")?;

        let now = Utc::now();
        let mut staged: HashMap<DocKey, StoredDocument> = HashMap::new();
        for write in &self.writes {
            let key = write.reference().key();
            let current = staged.get(&key).cloned().or_else(|| inner.lookup(&key));
            let next = write.apply(current.as_ref(), now)?;
            staged.insert(key, next);
        }

        for (key, document) in staged {
            inner.store(key, document);
        }
        inner.stats.commits += 1;
        Ok(())
    }
}
