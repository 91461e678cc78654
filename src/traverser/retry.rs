//! # Retriable Callbacks
//!
//! Wraps a fallible async callback so it is attempted up to a fixed number of trials,
//! sleeping between failed trials. Successful results pass through unchanged.

use crate::config::SleepTime;
use std::future::Future;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct RetryOptions {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_trial_count: u32,
    pub sleep_time_between_trials: SleepTime,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_trial_count: 1,
            sleep_time_between_trials: SleepTime::default(),
        }
    }
}

/// Result of [`Retriable::call_collecting`].
#[derive(Debug)]
pub enum RetryOutcome<T> {
    Succeeded(T),
    /// Every trial failed. Errors are ordered by trial.
    Failed(Vec<anyhow::Error>),
}

impl<T> RetryOutcome<T> {
    pub fn has_succeeded(&self) -> bool {
        matches!(self, RetryOutcome::Succeeded(_))
    }

    pub fn errors(&self) -> &[anyhow::Error] {
        match self {
            RetryOutcome::Succeeded(_) => &[],
            RetryOutcome::Failed(errors) => errors,
        }
    }
}

/// Callback wrapped with a retry policy. Built by [`make_retriable`].
pub struct Retriable<F> {
    callback: F,
    options: RetryOptions,
}

/// Wrap `callback` with the retry policy in `options`.
///
/// ```rust
/// use doc_migrate::config::SleepTime;
/// use doc_migrate::traverser::retry::{make_retriable, RetryOptions};
/// use std::sync::atomic::{AtomicU32, Ordering};
///
/// let calls = AtomicU32::new(0);
/// let retriable = make_retriable(
///     |n: u32| {
///         let trial = calls.fetch_add(1, Ordering::SeqCst);
///         async move {
///             if trial == 0 {
///                 anyhow::bail!("first trial fails");
///             }
///             Ok(n * 2)
///         }
///     },
///     RetryOptions {
///         max_trial_count: 2,
///         sleep_time_between_trials: SleepTime::from_millis(0),
///     },
/// );
///
/// let doubled = tokio_test::block_on(retriable.call(21)).unwrap();
/// assert_eq!(doubled, 42);
/// assert_eq!(calls.load(Ordering::SeqCst), 2);
/// ```
pub fn make_retriable<F>(callback: F, options: RetryOptions) -> Retriable<F> {
    Retriable { callback, options }
}

impl<F> Retriable<F> {
    pub fn options(&self) -> &RetryOptions {
        &self.options
    }

    /// Attempt the callback until it succeeds or the trials run out.
    ///
    /// On exhaustion the error of the last trial is returned.
    pub async fn call<A, T, Fut>(&self, args: A) -> anyhow::Result<T>
    where
        F: Fn(A) -> Fut,
        A: Clone,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match self.call_collecting(args).await {
            RetryOutcome::Succeeded(value) => Ok(value),
            RetryOutcome::Failed(mut errors) => Err(errors
                .pop()
                .unwrap_or_else(|| anyhow::anyhow!("no trial was attempted"))),
        }
    }

    /// Like [`call`](Self::call), but reports every trial's error instead of failing.
    pub async fn call_collecting<A, T, Fut>(&self, args: A) -> RetryOutcome<T>
    where
        F: Fn(A) -> Fut,
        A: Clone,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_trial_count = self.options.max_trial_count.max(1);
        let mut errors = Vec::new();

        for trial in 0..max_trial_count {
            match (self.callback)(args.clone()).await {
                Ok(value) => return RetryOutcome::Succeeded(value),
                Err(err) if trial + 1 < max_trial_count => {
                    let delay = self.options.sleep_time_between_trials.for_trial(trial);
                    warn!(
                        trial,
                        max_trial_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Trial failed, retrying"
                    );
                    errors.push(err);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(err) => {
                    error!(max_trial_count, error = %err, "All trials failed");
                    errors.push(err);
                }
            }
        }

        RetryOutcome::Failed(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn options(max_trial_count: u32) -> RetryOptions {
        RetryOptions {
            max_trial_count,
            sleep_time_between_trials: SleepTime::from_millis(0),
        }
    }

    #[tokio::test]
    async fn test_success_on_first_trial() {
        let calls = AtomicU32::new(0);
        let retriable = make_retriable(
            |()| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, anyhow::Error>("done") }
            },
            options(3),
        );
        assert_eq!(retriable.call(()).await.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let retriable = make_retriable(
            |()| {
                let trial = calls.fetch_add(1, Ordering::SeqCst);
                async move { Err::<(), _>(anyhow::anyhow!("failure {trial}")) }
            },
            options(3),
        );
        let err = retriable.call(()).await.unwrap_err();
        assert_eq!(err.to_string(), "failure 2");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_collecting_reports_every_error() {
        let retriable = make_retriable(
            |n: u32| async move { Err::<(), _>(anyhow::anyhow!("bad {n}")) },
            options(2),
        );
        let outcome = retriable.call_collecting(7).await;
        assert!(!outcome.has_succeeded());
        let messages: Vec<String> = outcome.errors().iter().map(|e| e.to_string()).collect();
        assert_eq!(messages, vec!["bad 7", "bad 7"]);
    }

    #[tokio::test]
    async fn test_zero_trials_still_attempts_once() {
        let calls = AtomicU32::new(0);
        let retriable = make_retriable(
            |()| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(anyhow::anyhow!("nope")) }
            },
            options(0),
        );
        assert!(retriable.call(()).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_computed_sleep_uses_failed_trial_index() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&seen);
        let retriable = make_retriable(
            |()| async { Err::<(), _>(anyhow::anyhow!("nope")) },
            RetryOptions {
                max_trial_count: 3,
                sleep_time_between_trials: SleepTime::computed(move |trial| {
                    recorded.lock().push(trial);
                    Duration::from_millis(10 * (u64::from(trial) + 1))
                }),
            },
        );
        let started = tokio::time::Instant::now();
        assert!(retriable.call(()).await.is_err());
        assert_eq!(*seen.lock(), vec![0, 1]);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }
}
