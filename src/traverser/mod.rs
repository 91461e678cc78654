//! # Traverser
//!
//! Walks a [`Traversable`] page by page and hands each page to a batch callback.
//!
//! ## Execution model
//!
//! Pages are fetched strictly in order with a cursor. Each page becomes a batch task
//! spawned on the Tokio runtime. A semaphore with `max_concurrent_batch_count` permits
//! bounds the number of batch tasks in flight: a permit is acquired before a page is
//! fetched and released when its callback settles, so at most
//! `batch_size * max_concurrent_batch_count` documents are held by callbacks at any time.
//! With more than one permit, fetching the next page overlaps with processing earlier ones.
//!
//! Failed callbacks are retried up to `max_batch_retry_count` times. Once retries are
//! exhausted the traversal fails with [`MigrateError::BatchFailed`]. The failing task
//! raises a shared flag before it gives up its permit, and the fetch loop checks that flag
//! before and after every fetch, so no page is dispatched once a failure is visible. This
//! holds on both the current-thread and the multi-threaded runtime. Batches still in
//! flight are aborted.
//!
//! ```rust
//! use doc_migrate::config::TraversalConfigPatch;
//! use doc_migrate::store::memory::MemoryStore;
//! use doc_migrate::store::DocumentRef;
//! use doc_migrate::traverser::Traverser;
//! use serde_json::json;
//!
//! tokio_test::block_on(async {
//!     let store = MemoryStore::new();
//!     let users = store.collection("users");
//!     for i in 0..5 {
//!         let data = json!({ "n": i }).as_object().cloned().unwrap();
//!         users.doc(format!("u{i}")).set(data, Default::default()).await.unwrap();
//!     }
//!
//!     let traverser = Traverser::new(users)
//!         .with_config(TraversalConfigPatch::new().batch_size(2))
//!         .unwrap();
//!     let result = traverser.traverse(|batch, _batch_index| async move {
//!         assert!(batch.len() <= 2);
//!         Ok(())
//!     }).await.unwrap();
//!
//!     assert_eq!(result.batch_count, 3);
//!     assert_eq!(result.doc_count, 5);
//! });
//! ```

pub mod queue;
pub mod retry;

use crate::config::{TraversalConfig, TraversalConfigPatch};
use crate::error::{MigrateError, Result};
use crate::logging::log_traversal_summary;
use crate::store::Traversable;
use queue::TaskQueue;
use retry::{make_retriable, RetryOptions};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error};

/// Page of snapshots handed to a batch callback. Shared by every trial of the batch.
pub type Batch<S> = Arc<[S]>;

/// Decides after a batch is dispatched whether the traversal should stop.
pub type ExitEarlyPredicate<S> = Arc<dyn Fn(&[S], usize) -> bool + Send + Sync>;

/// Totals of a finished traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalResult {
    /// Batches dispatched to the callback
    pub batch_count: usize,
    /// Documents fetched across all batches
    pub doc_count: usize,
}

/// Settings for [`Traverser::traverse_each`].
#[derive(Debug, Clone, Default)]
pub struct TraverseEachConfig {
    /// Pause between two documents of the same batch
    pub sleep_time_between_docs: Duration,
}

/// Paginated traversal over a [`Traversable`].
///
/// Traversers are immutable; the `with_*` methods return a modified copy.
pub struct Traverser<T: Traversable> {
    traversable: T,
    config: TraversalConfig,
    exit_early_predicates: Vec<ExitEarlyPredicate<T::Snapshot>>,
}

impl<T: Traversable> Clone for Traverser<T> {
    fn clone(&self) -> Self {
        Self {
            traversable: self.traversable.clone(),
            config: self.config.clone(),
            exit_early_predicates: self.exit_early_predicates.clone(),
        }
    }
}

impl<T: Traversable + fmt::Debug> fmt::Debug for Traverser<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Traverser")
            .field("traversable", &self.traversable)
            .field("config", &self.config)
            .field("exit_early_predicates", &self.exit_early_predicates.len())
            .finish()
    }
}

impl<T: Traversable> Traverser<T> {
    /// Traverser with the default configuration.
    pub fn new(traversable: T) -> Self {
        Self {
            traversable,
            config: TraversalConfig::default(),
            exit_early_predicates: Vec::new(),
        }
    }

    /// Traverser with a complete configuration, validated before use.
    pub fn with_traversal_config(traversable: T, config: TraversalConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            traversable,
            config,
            exit_early_predicates: Vec::new(),
        })
    }

    pub fn traversable(&self) -> &T {
        &self.traversable
    }

    pub fn config(&self) -> &TraversalConfig {
        &self.config
    }

    /// Copy of this traverser with `patch` merged over its configuration.
    ///
    /// Fails with [`MigrateError::InvalidConfiguration`] when the merged configuration is
    /// invalid.
    pub fn with_config(&self, patch: TraversalConfigPatch) -> Result<Self> {
        let config = self.config.merge(patch);
        config.validate()?;
        Ok(Self {
            config,
            ..self.clone()
        })
    }

    /// Copy of this traverser that also stops after a batch matching `predicate`.
    ///
    /// Predicates accumulate; the traversal stops when any of them matches.
    pub fn with_exit_early_predicate<P>(&self, predicate: P) -> Self
    where
        P: Fn(&[T::Snapshot], usize) -> bool + Send + Sync + 'static,
    {
        let mut traverser = self.clone();
        traverser.exit_early_predicates.push(Arc::new(predicate));
        traverser
    }

    /// Copy of this traverser reading from `traversable` with the same configuration.
    pub fn with_traversable(&self, traversable: T) -> Self {
        Self {
            traversable,
            ..self.clone()
        }
    }

    fn should_exit_early(&self, batch: &[T::Snapshot], batch_index: usize) -> bool {
        self.exit_early_predicates
            .iter()
            .any(|predicate| predicate(batch, batch_index))
    }

    /// Traverse the whole source, invoking `callback` once per batch.
    ///
    /// Batch indices start at 0 and are consecutive. Batches may run concurrently up to
    /// `max_concurrent_batch_count`; with the default of 1 each batch completes before the
    /// next page is fetched.
    pub async fn traverse<F, Fut>(&self, callback: F) -> Result<TraversalResult>
    where
        F: Fn(Batch<T::Snapshot>, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let config = &self.config;
        let max_trial_count = config.max_trial_count();
        let retriable = Arc::new(make_retriable(
            move |(batch, batch_index): (Batch<T::Snapshot>, usize)| callback(batch, batch_index),
            RetryOptions {
                max_trial_count,
                sleep_time_between_trials: config.sleep_time_between_trials.clone(),
            },
        ));
        let slots = Arc::new(Semaphore::new(config.max_concurrent_batch_count));
        let queue: TaskQueue<Result<()>> = TaskQueue::new();
        // Set by a failed batch before it releases its slot
        let failed = Arc::new(AtomicBool::new(false));

        let mut cursor: Option<T::Snapshot> = None;
        let mut batch_index = 0usize;
        let mut doc_count = 0usize;
        let mut slot = acquire_slot(&slots).await?;

        loop {
            if failed.load(Ordering::Acquire) {
                break;
            }
            let limit = match config.max_doc_count {
                Some(max_doc_count) => config.batch_size.min(max_doc_count - doc_count),
                None => config.batch_size,
            };
            let mut query = self.traversable.limit(limit);
            if let Some(cursor) = &cursor {
                query = query.start_after(cursor);
            }

            let mut page = query.fetch().await?;
            if page.is_empty() || failed.load(Ordering::Acquire) {
                break;
            }
            // Sources may ignore the limit
            page.truncate(limit);
            doc_count += page.len();

            let batch: Batch<T::Snapshot> = page.into();
            debug!(
                batch_index,
                batch_size = batch.len(),
                doc_count,
                "Dispatching batch"
            );

            let task_batch = Arc::clone(&batch);
            let task_retriable = Arc::clone(&retriable);
            let task_failed = Arc::clone(&failed);
            queue.spawn(async move {
                let outcome = task_retriable
                    .call((task_batch, batch_index))
                    .await
                    .map_err(|source| {
                        error!(
                            batch_index,
                            attempts = max_trial_count,
                            error = %source,
                            "Batch failed"
                        );
                        MigrateError::BatchFailed {
                            batch_index,
                            attempts: max_trial_count,
                            source,
                        }
                    });
                if outcome.is_err() {
                    task_failed.store(true, Ordering::Release);
                }
                drop(slot);
                outcome
            });

            let reached_max_doc_count = config
                .max_doc_count
                .is_some_and(|max_doc_count| doc_count >= max_doc_count);
            if reached_max_doc_count || self.should_exit_early(&batch, batch_index) {
                batch_index += 1;
                break;
            }

            slot = acquire_slot(&slots).await?;
            drain_finished(&queue).await?;

            if !config.sleep_time_between_batches.is_zero() {
                tokio::time::sleep(config.sleep_time_between_batches).await;
            }

            cursor = batch.last().cloned();
            batch_index += 1;
        }

        // A failed batch is surfaced here when the loop stopped on the flag. Dropping the
        // queue on an early return aborts the remaining batches.
        while !queue.is_empty() {
            for outcome in queue.process_first(1).await? {
                outcome?;
            }
        }

        let result = TraversalResult {
            batch_count: batch_index,
            doc_count,
        };
        log_traversal_summary("traverse", &result);
        Ok(result)
    }

    /// Traverse the whole source, invoking `callback` once per document.
    ///
    /// Documents of a batch are processed sequentially and receive their index within
    /// the batch alongside the batch index. The retry policy applies to whole batches, so
    /// a retried batch revisits its earlier documents.
    pub async fn traverse_each<F, Fut>(
        &self,
        callback: F,
        each_config: TraverseEachConfig,
    ) -> Result<TraversalResult>
    where
        F: Fn(T::Snapshot, usize, usize) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback = Arc::new(callback);
        let sleep_time_between_docs = each_config.sleep_time_between_docs;

        self.traverse(move |batch: Batch<T::Snapshot>, batch_index| {
            let callback = Arc::clone(&callback);
            async move {
                for (doc_index, snapshot) in batch.iter().enumerate() {
                    callback(snapshot.clone(), doc_index, batch_index).await?;
                    if !sleep_time_between_docs.is_zero() && doc_index + 1 < batch.len() {
                        tokio::time::sleep(sleep_time_between_docs).await;
                    }
                }
                Ok(())
            }
        })
        .await
    }
}

async fn acquire_slot(slots: &Arc<Semaphore>) -> Result<OwnedSemaphorePermit> {
    Arc::clone(slots)
        .acquire_owned()
        .await
        .map_err(|_| MigrateError::Implementation("batch slot semaphore closed".to_string()))
}

/// Collect the batches at the front of the queue that have already settled.
async fn drain_finished(queue: &TaskQueue<Result<()>>) -> Result<()> {
    let finished = queue.finished_prefix_len();
    for outcome in queue.process_first(finished).await? {
        outcome?;
    }
    Ok(())
}
