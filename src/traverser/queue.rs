//! # Bounded Task Queue
//!
//! FIFO of in-flight batch tasks. The traverser enqueues one task per dispatched batch
//! and drains finished tasks in dispatch order. A drain claims its tasks before awaiting
//! them, so tasks enqueued while the drain is in flight are neither drained twice nor
//! skipped.
//!
//! Dropping the queue aborts every task it still holds.

use crate::error::{MigrateError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use tokio::task::JoinHandle;
use tracing::trace;

struct QueuedTask<T> {
    id: u64,
    handle: JoinHandle<T>,
}

struct QueueState<T> {
    next_id: u64,
    tasks: VecDeque<QueuedTask<T>>,
    processing: bool,
}

pub struct TaskQueue<T> {
    state: Mutex<QueueState<T>>,
}

/// Clears the processing flag when a drain finishes or is cancelled.
struct ProcessingGuard<'a, T> {
    state: &'a Mutex<QueueState<T>>,
}

impl<T> Drop for ProcessingGuard<'_, T> {
    fn drop(&mut self) {
        self.state.lock().processing = false;
    }
}

impl<T> Default for TaskQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskQueue<T> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                next_id: 0,
                tasks: VecDeque::new(),
                processing: false,
            }),
        }
    }

    /// Append a task and return its id. Ids increase monotonically.
    pub fn enqueue(&self, handle: JoinHandle<T>) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.tasks.push_back(QueuedTask { id, handle });
        trace!(task_id = id, queued = state.tasks.len(), "Enqueued task");
        id
    }

    /// Outstanding tasks not yet claimed by a drain
    pub fn len(&self) -> usize {
        self.state.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while a drain is awaiting its tasks
    pub fn is_processing(&self) -> bool {
        self.state.lock().processing
    }

    /// Number of leading tasks that have already completed.
    ///
    /// Draining this many tasks never blocks.
    pub fn finished_prefix_len(&self) -> usize {
        self.state
            .lock()
            .tasks
            .iter()
            .take_while(|task| task.handle.is_finished())
            .count()
    }

    /// Await the earliest `n` outstanding tasks and return their outputs in enqueue order.
    ///
    /// Fails with [`MigrateError::InvalidArgument`] when `n` exceeds the queue size or a
    /// drain is already in flight; the queue is left untouched in both cases.
    pub async fn process_first(&self, n: usize) -> Result<Vec<T>> {
        let claimed: Vec<QueuedTask<T>> = {
            let mut state = self.state.lock();
            if state.processing {
                return Err(MigrateError::InvalidArgument(
                    "a drain is already in progress".to_string(),
                ));
            }
            if n > state.tasks.len() {
                return Err(MigrateError::InvalidArgument(format!(
                    "cannot process {n} tasks; queue holds {}",
                    state.tasks.len()
                )));
            }
            if n == 0 {
                return Ok(Vec::new());
            }
            state.processing = true;
            state.tasks.drain(..n).collect()
        };
        let _guard = ProcessingGuard { state: &self.state };

        let mut outputs = Vec::with_capacity(claimed.len());
        let mut remaining = claimed.into_iter();
        while let Some(task) = remaining.next() {
            match task.handle.await {
                Ok(output) => outputs.push(output),
                Err(join_error) => {
                    for rest in remaining {
                        rest.handle.abort();
                    }
                    let cause = if join_error.is_panic() {
                        "panicked"
                    } else {
                        "was cancelled"
                    };
                    return Err(MigrateError::Implementation(format!(
                        "queued task {} {cause}",
                        task.id
                    )));
                }
            }
        }
        Ok(outputs)
    }

    /// Await every outstanding task.
    pub async fn process_all(&self) -> Result<Vec<T>> {
        let size = self.len();
        self.process_first(size).await
    }

    /// Abort every outstanding task.
    pub fn abort_all(&self) {
        let mut state = self.state.lock();
        for task in state.tasks.drain(..) {
            task.handle.abort();
        }
    }
}

impl<T: Send + 'static> TaskQueue<T> {
    /// Spawn `future` on the runtime and enqueue its handle.
    pub fn spawn<F>(&self, future: F) -> u64
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.enqueue(tokio::spawn(future))
    }
}

impl<T> Drop for TaskQueue<T> {
    fn drop(&mut self) {
        for task in self.state.get_mut().tasks.drain(..) {
            task.handle.abort();
        }
    }
}
