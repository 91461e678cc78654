//! # Document Store Interfaces
//!
//! The traversal engine and migrators treat the document store as an opaque paginated
//! resource. This module names the primitives they consume:
//!
//! - [`Traversable`]: an ordered query supporting `limit`, `start_after` and `fetch`
//! - [`DocumentSnapshot`]: an immutable view of a document captured at fetch time
//! - [`DocumentRef`]: a writable handle supporting set and field-patch writes
//! - [`AtomicWriter`] / [`WriteBatch`]: an all-or-nothing multi-document write buffer
//!
//! [`memory::MemoryStore`] implements all of them in process.

pub mod memory;
pub mod path;

use crate::constants::store::MAX_BATCH_WRITE_COUNT;
use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

pub use path::{apply_patch, deep_merge, DocumentData, FieldPatch, FieldPath, FieldValue};

/// Writable reference type behind a traversable's snapshots
pub type RefOf<T> = <<T as Traversable>::Snapshot as DocumentSnapshot>::Ref;

/// How a set write treats fields already stored on the document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SetOptions {
    /// Replace the whole document
    #[default]
    Overwrite,
    /// Deep-merge the data into the stored document, keeping unspecified fields
    Merge,
    /// Copy only the listed paths from the data
    MergeFields(Vec<FieldPath>),
}

impl SetOptions {
    /// Compute the document that results from setting `data` over `current`.
    pub fn apply(&self, current: Option<&DocumentData>, data: &DocumentData) -> DocumentData {
        match self {
            SetOptions::Overwrite => data.clone(),
            SetOptions::Merge => {
                let mut merged = current.cloned().unwrap_or_default();
                deep_merge(&mut merged, data);
                merged
            }
            SetOptions::MergeFields(paths) => {
                let mut merged = current.cloned().unwrap_or_default();
                for path in paths {
                    match path.get(data) {
                        Some(value) => path.set(&mut merged, value.clone()),
                        None => {
                            path.delete(&mut merged);
                        }
                    }
                }
                merged
            }
        }
    }
}

/// Condition a document must meet for a write to proceed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Precondition {
    pub exists: Option<bool>,
    pub last_update_time: Option<DateTime<Utc>>,
}

impl Precondition {
    pub fn exists(exists: bool) -> Self {
        Self {
            exists: Some(exists),
            last_update_time: None,
        }
    }

    pub fn last_update_time(time: DateTime<Utc>) -> Self {
        Self {
            exists: None,
            last_update_time: Some(time),
        }
    }

    /// `current_update_time` is `None` when the document does not exist.
    pub fn check(
        &self,
        path: &str,
        current_update_time: Option<DateTime<Utc>>,
    ) -> Result<(), StoreError> {
        if let Some(exists) = self.exists {
            if exists != current_update_time.is_some() {
                return Err(StoreError::FailedPrecondition {
                    path: path.to_string(),
                    reason: if exists {
                        "document does not exist".to_string()
                    } else {
                        "document already exists".to_string()
                    },
                });
            }
        }
        if let Some(expected) = self.last_update_time {
            if current_update_time != Some(expected) {
                return Err(StoreError::FailedPrecondition {
                    path: path.to_string(),
                    reason: format!("document was not last updated at {}", expected.to_rfc3339()),
                });
            }
        }
        Ok(())
    }
}

/// Immutable view of a document captured when its page was fetched.
pub trait DocumentSnapshot: Clone + Send + Sync + 'static {
    type Ref: DocumentRef;

    fn id(&self) -> &str;

    fn data(&self) -> &DocumentData;

    fn get(&self, path: &FieldPath) -> Option<&Value> {
        path.get(self.data())
    }

    /// `None` for a snapshot of a document that does not exist.
    fn update_time(&self) -> Option<DateTime<Utc>>;

    fn reference(&self) -> Self::Ref;
}

/// Writable handle to a single document.
#[async_trait]
pub trait DocumentRef: Clone + Send + Sync + 'static {
    /// Slash-separated location, used in logs and errors
    fn path(&self) -> String;

    async fn set(&self, data: DocumentData, options: SetOptions) -> Result<(), StoreError>;

    /// Apply a field patch. Without a precondition the document must exist.
    async fn update(
        &self,
        patch: FieldPatch,
        precondition: Option<Precondition>,
    ) -> Result<(), StoreError>;
}

/// Ordered, cursor-paginated source of documents.
///
/// Repeated queries must return documents in the same relative order, otherwise a
/// traversal may skip or repeat documents.
#[async_trait]
pub trait Traversable: Clone + Send + Sync + 'static {
    type Snapshot: DocumentSnapshot;

    fn limit(&self, limit: usize) -> Self;

    /// Continue after `cursor`, exclusive.
    fn start_after(&self, cursor: &Self::Snapshot) -> Self;

    async fn fetch(&self) -> Result<Vec<Self::Snapshot>, StoreError>;
}

/// Buffer of writes committed as one all-or-nothing operation.
#[async_trait]
pub trait WriteBatch: Send + Sized {
    type Ref: DocumentRef;

    fn set(&mut self, reference: &Self::Ref, data: DocumentData, options: SetOptions);

    fn update(
        &mut self,
        reference: &Self::Ref,
        patch: FieldPatch,
        precondition: Option<Precondition>,
    );

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    async fn commit(self) -> Result<(), StoreError>;
}

/// A traversable whose store supports atomic multi-document writes.
pub trait AtomicWriter: Traversable {
    type Batch: WriteBatch<Ref = RefOf<Self>>;

    fn batch(&self) -> Self::Batch;

    /// Largest number of writes one commit may carry
    fn max_batch_write_count(&self) -> usize {
        MAX_BATCH_WRITE_COUNT
    }
}
