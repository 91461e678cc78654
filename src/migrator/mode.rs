//! Write strategies used by [`Migrator`](super::Migrator).
//!
//! - [`Atomic`] stages a batch's writes into one [`WriteBatch`] and commits them together.
//! - [`Independent`] issues one write per document, concurrently, and fails the batch if
//!   any of them fails after all have settled.

use super::mutation::DocumentWrite;
use crate::error::{MigrateError, Result};
use crate::store::{AtomicWriter, DocumentRef, RefOf, Traversable, WriteBatch};
use crate::traverser::Traverser;
use anyhow::Context;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::debug;

/// How a migrator persists the writes resolved for one batch.
#[async_trait]
pub trait WriteMode<T: Traversable>: Clone + Send + Sync + 'static {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Reject traversers this mode cannot run with. Called before any I/O.
    fn validate(&self, traverser: &Traverser<T>) -> Result<()>;

    /// Persist `writes` and return how many documents were written.
    async fn write_batch(
        &self,
        traversable: &T,
        writes: Vec<(RefOf<T>, DocumentWrite)>,
    ) -> anyhow::Result<usize>;
}

/// All writes of a batch commit together or not at all.
#[derive(Debug, Clone, Copy, Default)]
pub struct Atomic;

#[async_trait]
impl<T: AtomicWriter> WriteMode<T> for Atomic {
    fn name(&self) -> &'static str {
        "atomic"
    }

    fn validate(&self, traverser: &Traverser<T>) -> Result<()> {
        let max_batch_write_count = traverser.traversable().max_batch_write_count();
        let batch_size = traverser.config().batch_size;
        if batch_size > max_batch_write_count {
            return Err(MigrateError::invalid_configuration(
                "batch_size",
                batch_size,
                format!(
                    "atomic migrations commit one write batch per batch; the store accepts at most {max_batch_write_count} writes per batch"
                ),
            ));
        }
        Ok(())
    }

    async fn write_batch(
        &self,
        traversable: &T,
        writes: Vec<(RefOf<T>, DocumentWrite)>,
    ) -> anyhow::Result<usize> {
        let mut batch = traversable.batch();
        for (reference, write) in writes {
            match write {
                DocumentWrite::Set { data, options } => batch.set(&reference, data, options),
                DocumentWrite::Update {
                    patch,
                    precondition,
                } => batch.update(&reference, patch, precondition),
            }
        }

        let staged = batch.len();
        if staged == 0 {
            debug!("No documents accepted, skipping commit");
            return Ok(0);
        }
        batch
            .commit()
            .await
            .with_context(|| format!("atomic commit of {staged} writes failed"))?;
        Ok(staged)
    }
}

/// Each document is written on its own.
#[derive(Debug, Clone, Copy, Default)]
pub struct Independent;

#[async_trait]
impl<T: Traversable> WriteMode<T> for Independent {
    fn name(&self) -> &'static str {
        "independent"
    }

    fn validate(&self, _traverser: &Traverser<T>) -> Result<()> {
        Ok(())
    }

    async fn write_batch(
        &self,
        _traversable: &T,
        writes: Vec<(RefOf<T>, DocumentWrite)>,
    ) -> anyhow::Result<usize> {
        let attempted = writes.len();
        let outcomes = join_all(writes.into_iter().map(|(reference, write)| async move {
            let path = reference.path();
            let outcome = match write {
                DocumentWrite::Set { data, options } => reference.set(data, options).await,
                DocumentWrite::Update {
                    patch,
                    precondition,
                } => reference.update(patch, precondition).await,
            };
            outcome.with_context(|| format!("write to {path} failed"))
        }))
        .await;

        let mut written = 0;
        let mut first_failure = None;
        let mut failed = 0;
        for outcome in outcomes {
            match outcome {
                Ok(()) => written += 1,
                Err(err) => {
                    failed += 1;
                    first_failure.get_or_insert(err);
                }
            }
        }

        match first_failure {
            Some(err) => Err(err.context(format!("{failed} of {attempted} document writes failed"))),
            None => Ok(written),
        }
    }
}
