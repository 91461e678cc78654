//! # Migrators
//!
//! A migrator traverses a source with a [`Traverser`] and writes to every document that
//! passes its predicates. Two write modes are available:
//!
//! - [`AtomicMigrator`]: the accepted documents of a batch are written in one atomic
//!   commit. Requires a store implementing [`AtomicWriter`] and a batch size within the
//!   store's write-batch limit.
//! - [`BasicMigrator`]: each accepted document is written independently, concurrently
//!   within a batch.
//!
//! Writes are retried together with their batch, so a retried batch re-resolves and
//! rewrites every accepted document from the snapshots captured at fetch time.
//!
//! ```rust
//! use doc_migrate::migrator::BasicMigrator;
//! use doc_migrate::store::memory::MemoryStore;
//! use doc_migrate::store::{DocumentRef, DocumentSnapshot};
//! use doc_migrate::traverser::Traverser;
//! use serde_json::json;
//!
//! tokio_test::block_on(async {
//!     let store = MemoryStore::new();
//!     let users = store.collection("users");
//!     let data = json!({ "name": "Ada", "legacy": true }).as_object().cloned().unwrap();
//!     users.doc("ada").set(data, Default::default()).await.unwrap();
//!
//!     let migrator = BasicMigrator::new(Traverser::new(users.clone()));
//!     let result = migrator.rename_field("name", "full_name").await.unwrap();
//!
//!     assert_eq!(result.migrated_doc_count, 1);
//!     let ada = users.doc("ada").get().unwrap();
//!     assert_eq!(ada.data().get("full_name"), Some(&json!("Ada")));
//!     assert!(ada.data().get("name").is_none());
//! });
//! ```

pub mod mode;
pub mod mutation;

use crate::config::TraversalConfig;
use crate::error::{MigrateError, Result};
use crate::logging::log_migration_summary;
use crate::store::{
    AtomicWriter, DocumentData, DocumentSnapshot, FieldPatch, FieldPath, FieldValue,
    Precondition, SetOptions, Traversable,
};
use crate::traverser::{Batch, TraversalResult, Traverser};
use mutation::Mutation;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

pub use mode::{Atomic, Independent, WriteMode};
pub use mutation::UpdateData;

/// Migrator whose batches commit atomically
pub type AtomicMigrator<T> = Migrator<T, Atomic>;
/// Migrator that writes each document independently
pub type BasicMigrator<T> = Migrator<T, Independent>;

/// Document filter; a document is written only if every predicate accepts it.
pub type MigrationPredicate<S> = Arc<dyn Fn(&S) -> bool + Send + Sync>;
/// Callback run around the processing of a batch.
pub type BatchHook<S> = Arc<dyn Fn(&[S], usize) + Send + Sync>;

/// Totals of a finished migration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationResult {
    pub traversal_result: TraversalResult,
    /// Documents written. Counts only batches whose writes succeeded.
    pub migrated_doc_count: usize,
}

pub struct Migrator<T: Traversable, M> {
    traverser: Traverser<T>,
    mode: M,
    predicates: Vec<MigrationPredicate<T::Snapshot>>,
    before_batch_start: Option<BatchHook<T::Snapshot>>,
    after_batch_complete: Option<BatchHook<T::Snapshot>>,
}

impl<T: Traversable, M: Clone> Clone for Migrator<T, M> {
    fn clone(&self) -> Self {
        Self {
            traverser: self.traverser.clone(),
            mode: self.mode.clone(),
            predicates: self.predicates.clone(),
            before_batch_start: self.before_batch_start.clone(),
            after_batch_complete: self.after_batch_complete.clone(),
        }
    }
}

impl<T: Traversable + fmt::Debug, M: fmt::Debug> fmt::Debug for Migrator<T, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Migrator")
            .field("traverser", &self.traverser)
            .field("mode", &self.mode)
            .field("predicates", &self.predicates.len())
            .finish_non_exhaustive()
    }
}

impl<T: Traversable> Migrator<T, Independent> {
    pub fn new(traverser: Traverser<T>) -> Self {
        Self {
            traverser,
            mode: Independent,
            predicates: Vec::new(),
            before_batch_start: None,
            after_batch_complete: None,
        }
    }
}

impl<T: AtomicWriter> Migrator<T, Atomic> {
    /// Fails with [`MigrateError::InvalidConfiguration`] when the traverser's batch size
    /// exceeds the store's write-batch limit.
    pub fn new(traverser: Traverser<T>) -> Result<Self> {
        Self::with_mode(traverser, Atomic)
    }
}

/// State shared by every batch task of one migration run.
struct BatchContext<T: Traversable, M> {
    traversable: T,
    mode: M,
    mutation: Mutation<T::Snapshot>,
    predicates: Vec<MigrationPredicate<T::Snapshot>>,
    before_batch_start: Option<BatchHook<T::Snapshot>>,
    after_batch_complete: Option<BatchHook<T::Snapshot>>,
    migrated_doc_count: AtomicUsize,
}

impl<T: Traversable, M: WriteMode<T>> BatchContext<T, M> {
    fn accepts(&self, snapshot: &T::Snapshot) -> bool {
        self.predicates.iter().all(|predicate| predicate(snapshot))
    }

    async fn migrate_batch(&self, batch: &[T::Snapshot], batch_index: usize) -> anyhow::Result<()> {
        if let Some(hook) = &self.before_batch_start {
            hook(batch, batch_index);
        }

        let mut writes = Vec::new();
        for snapshot in batch.iter().filter(|snapshot| self.accepts(snapshot)) {
            if let Some(write) = self.mutation.resolve(snapshot)? {
                writes.push((snapshot.reference(), write));
            }
        }

        let written = self
            .mode
            .write_batch(&self.traversable, writes)
            .await?;
        self.migrated_doc_count.fetch_add(written, Ordering::Relaxed);
        debug!(
            batch_index,
            batch_size = batch.len(),
            written,
            mode = self.mode.name(),
            "Batch migrated"
        );

        if let Some(hook) = &self.after_batch_complete {
            hook(batch, batch_index);
        }
        Ok(())
    }
}

impl<T: Traversable, M: WriteMode<T>> Migrator<T, M> {
    /// Migrator with an explicit write mode, validated against `traverser`.
    pub fn with_mode(traverser: Traverser<T>, mode: M) -> Result<Self> {
        mode.validate(&traverser)?;
        Ok(Self {
            traverser,
            mode,
            predicates: Vec::new(),
            before_batch_start: None,
            after_batch_complete: None,
        })
    }

    /// Migrator over `traversable` with a complete configuration.
    pub fn from_traversable(traversable: T, config: TraversalConfig, mode: M) -> Result<Self> {
        Self::with_mode(Traverser::with_traversal_config(traversable, config)?, mode)
    }

    pub fn traverser(&self) -> &Traverser<T> {
        &self.traverser
    }

    /// Copy of this migrator driven by `traverser`. Predicates and hooks carry over.
    pub fn with_traverser(&self, traverser: Traverser<T>) -> Result<Self> {
        self.mode.validate(&traverser)?;
        Ok(Self {
            traverser,
            ..self.clone()
        })
    }

    /// Copy of this migrator that only writes documents accepted by `predicate` as well.
    pub fn with_predicate<P>(&self, predicate: P) -> Self
    where
        P: Fn(&T::Snapshot) -> bool + Send + Sync + 'static,
    {
        let mut migrator = self.clone();
        migrator.predicates.push(Arc::new(predicate));
        migrator
    }

    /// Run `hook` before each batch attempt, replacing any earlier hook.
    pub fn on_before_batch_start<H>(&mut self, hook: H)
    where
        H: Fn(&[T::Snapshot], usize) + Send + Sync + 'static,
    {
        self.before_batch_start = Some(Arc::new(hook));
    }

    /// Run `hook` after each batch attempt whose writes succeeded, replacing any earlier hook.
    pub fn on_after_batch_complete<H>(&mut self, hook: H)
    where
        H: Fn(&[T::Snapshot], usize) + Send + Sync + 'static,
    {
        self.after_batch_complete = Some(Arc::new(hook));
    }

    /// Set `data` on every accepted document.
    pub async fn set(&self, data: DocumentData, options: SetOptions) -> Result<MigrationResult> {
        self.migrate(Mutation::Set { data, options }).await
    }

    /// Set the data computed from each accepted document.
    pub async fn set_with_derived_data<G>(
        &self,
        get_data: G,
        options: SetOptions,
    ) -> Result<MigrationResult>
    where
        G: Fn(&T::Snapshot) -> DocumentData + Send + Sync + 'static,
    {
        self.migrate(Mutation::SetDerived {
            get_data: Arc::new(get_data),
            options,
        })
        .await
    }

    /// Update every accepted document with `data`, keyed by dotted field path.
    ///
    /// Fails with [`MigrateError::InvalidMutation`] before any I/O when `data` is empty
    /// or a key is not a valid field path. Without a `precondition` each document must
    /// still exist when it is written.
    pub async fn update(
        &self,
        data: DocumentData,
        precondition: Option<Precondition>,
    ) -> Result<MigrationResult> {
        self.migrate(Mutation::update_from_fields(data, precondition)?)
            .await
    }

    /// Update every accepted document with explicit path/value pairs.
    pub async fn update_fields<I, P>(
        &self,
        pairs: I,
        precondition: Option<Precondition>,
    ) -> Result<MigrationResult>
    where
        I: IntoIterator<Item = (P, FieldValue)>,
        P: AsRef<str>,
    {
        let patch = pairs
            .into_iter()
            .map(|(path, value)| parse_field_path(path.as_ref()).map(|path| (path, value)))
            .collect::<Result<FieldPatch>>()?;
        self.migrate(Mutation::update_from_patch(patch, precondition)?)
            .await
    }

    /// Update each accepted document with the fields computed from it.
    ///
    /// Documents for which `get_data` returns no fields are left untouched and not
    /// counted as migrated.
    pub async fn update_with_derived_data<G>(
        &self,
        get_data: G,
        precondition: Option<Precondition>,
    ) -> Result<MigrationResult>
    where
        G: Fn(&T::Snapshot) -> UpdateData + Send + Sync + 'static,
    {
        self.migrate(Mutation::UpdateDerived {
            get_data: Arc::new(get_data),
            precondition,
        })
        .await
    }

    pub async fn delete_field(&self, field: &str) -> Result<MigrationResult> {
        self.delete_fields([field]).await
    }

    /// Remove `fields` from every accepted document.
    pub async fn delete_fields<I, P>(&self, fields: I) -> Result<MigrationResult>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<str>,
    {
        self.update_fields(
            fields
                .into_iter()
                .map(|field| (field.as_ref().to_string(), FieldValue::Delete))
                .collect::<Vec<_>>(),
            None,
        )
        .await
    }

    pub async fn rename_field(&self, old_field: &str, new_field: &str) -> Result<MigrationResult> {
        self.rename_fields([(old_field, new_field)]).await
    }

    /// Move each `(old, new)` field pair on every accepted document that defines at
    /// least one of the old fields.
    ///
    /// Only old fields present on a document are moved. When several renames target the
    /// same new field the last one in `changes` wins.
    pub async fn rename_fields<I, P, Q>(&self, changes: I) -> Result<MigrationResult>
    where
        I: IntoIterator<Item = (P, Q)>,
        P: AsRef<str>,
        Q: AsRef<str>,
    {
        let changes = changes
            .into_iter()
            .map(|(old, new)| -> Result<(FieldPath, FieldPath)> {
                Ok((
                    parse_field_path(old.as_ref())?,
                    parse_field_path(new.as_ref())?,
                ))
            })
            .collect::<Result<Vec<(FieldPath, FieldPath)>>>()?;
        if changes.is_empty() {
            return Err(MigrateError::InvalidMutation(
                "rename requires at least one field pair".to_string(),
            ));
        }

        let changes = Arc::new(changes);
        let defined = Arc::clone(&changes);
        self.with_predicate(move |snapshot: &T::Snapshot| {
            defined.iter().any(|(old, _)| snapshot.get(old).is_some())
        })
        .update_with_derived_data(
            move |snapshot: &T::Snapshot| {
                let mut patch = FieldPatch::new();
                for (old, new) in changes.iter() {
                    if let Some(value) = snapshot.get(old) {
                        patch.push((old.clone(), FieldValue::Delete));
                        patch.push((new.clone(), FieldValue::Value(value.clone())));
                    }
                }
                UpdateData::Pairs(patch)
            },
            None,
        )
        .await
    }

    async fn migrate(&self, mutation: Mutation<T::Snapshot>) -> Result<MigrationResult> {
        let operation = mutation.name();
        let context = Arc::new(BatchContext {
            traversable: self.traverser.traversable().clone(),
            mode: self.mode.clone(),
            mutation,
            predicates: self.predicates.clone(),
            before_batch_start: self.before_batch_start.clone(),
            after_batch_complete: self.after_batch_complete.clone(),
            migrated_doc_count: AtomicUsize::new(0),
        });

        let batch_context = Arc::clone(&context);
        let traversal_result = self
            .traverser
            .traverse(move |batch: Batch<T::Snapshot>, batch_index| {
                let context = Arc::clone(&batch_context);
                async move { context.migrate_batch(&batch, batch_index).await }
            })
            .await?;

        let result = MigrationResult {
            traversal_result,
            migrated_doc_count: context.migrated_doc_count.load(Ordering::Relaxed),
        };
        log_migration_summary(operation, &result);
        Ok(result)
    }
}

fn parse_field_path(path: &str) -> Result<FieldPath> {
    FieldPath::parse(path).map_err(|err| MigrateError::InvalidMutation(err.to_string()))
}
