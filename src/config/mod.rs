//! # Traversal Configuration
//!
//! Settings that govern how a [`Traverser`](crate::traverser::Traverser) pages through a
//! collection: page size, document ceiling, concurrency bound, retry policy and pacing.
//!
//! ## Validation
//!
//! A config is validated whenever a traverser is built from it or a patch is merged into
//! it, so an invalid value is reported before any page is fetched.
//!
//! ## Usage
//!
//! ```rust
//! use doc_migrate::config::{TraversalConfig, TraversalConfigPatch};
//!
//! let config = TraversalConfig::default()
//!     .merge(TraversalConfigPatch::new().batch_size(100).max_concurrent_batch_count(4));
//! assert!(config.validate().is_ok());
//! assert_eq!(config.peak_in_flight_doc_count(), 400);
//! ```

pub mod loader;

use crate::constants::defaults;
use crate::error::{MigrateError, Result};
use crate::utils::serde::{
    deserialize_optional_count, deserialize_optional_doc_limit, deserialize_optional_millis,
    deserialize_optional_sleep_time,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

pub use loader::ConfigLoader;

/// Delay inserted between two attempts of a failed batch callback.
#[derive(Clone)]
pub enum SleepTime {
    Fixed(Duration),
    /// Computed from the zero-based index of the trial that just failed.
    Computed(Arc<dyn Fn(u32) -> Duration + Send + Sync>),
}

impl SleepTime {
    pub fn from_millis(millis: u64) -> Self {
        SleepTime::Fixed(Duration::from_millis(millis))
    }

    pub fn computed<F>(f: F) -> Self
    where
        F: Fn(u32) -> Duration + Send + Sync + 'static,
    {
        SleepTime::Computed(Arc::new(f))
    }

    /// Exponential delay derived from a [`BackoffConfig`].
    pub fn from_backoff(backoff: BackoffConfig) -> Self {
        SleepTime::computed(move |trial_index| backoff.delay_for_trial(trial_index))
    }

    /// Delay to wait after the trial at `failed_trial_index` failed.
    pub fn for_trial(&self, failed_trial_index: u32) -> Duration {
        match self {
            SleepTime::Fixed(duration) => *duration,
            SleepTime::Computed(f) => f(failed_trial_index),
        }
    }
}

impl Default for SleepTime {
    fn default() -> Self {
        SleepTime::from_millis(defaults::SLEEP_TIME_BETWEEN_TRIALS_MS)
    }
}

impl fmt::Debug for SleepTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SleepTime::Fixed(duration) => f.debug_tuple("Fixed").field(duration).finish(),
            SleepTime::Computed(_) => f.write_str("Computed(..)"),
        }
    }
}

/// Exponential backoff between trials
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BackoffConfig {
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

impl BackoffConfig {
    /// `base * multiplier^trial`, capped at `max_delay_ms`
    pub fn delay_for_trial(&self, trial_index: u32) -> Duration {
        let exponent = i32::try_from(trial_index).unwrap_or(i32::MAX);
        let millis = (self.base_delay_ms as f64) * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(MigrateError::invalid_configuration(
                "backoff_multiplier",
                self.backoff_multiplier,
                "must be a finite number no smaller than 1.0",
            ));
        }
        if self.max_delay_ms < self.base_delay_ms {
            return Err(MigrateError::invalid_configuration(
                "max_delay_ms",
                self.max_delay_ms,
                format!("must not be below base_delay_ms ({})", self.base_delay_ms),
            ));
        }
        Ok(())
    }
}

/// Complete traversal settings.
#[derive(Debug, Clone)]
pub struct TraversalConfig {
    /// Documents fetched per page. Must be positive.
    pub batch_size: usize,
    /// Stop after this many documents. `None` traverses the whole collection.
    pub max_doc_count: Option<usize>,
    /// Batch callbacks allowed in flight at once. Must be at least 1.
    pub max_concurrent_batch_count: usize,
    /// Additional attempts granted to a failed batch callback.
    pub max_batch_retry_count: u32,
    pub sleep_time_between_batches: Duration,
    pub sleep_time_between_trials: SleepTime,
}

impl Default for TraversalConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::BATCH_SIZE,
            max_doc_count: None,
            max_concurrent_batch_count: defaults::MAX_CONCURRENT_BATCH_COUNT,
            max_batch_retry_count: defaults::MAX_BATCH_RETRY_COUNT,
            sleep_time_between_batches: Duration::from_millis(
                defaults::SLEEP_TIME_BETWEEN_BATCHES_MS,
            ),
            sleep_time_between_trials: SleepTime::default(),
        }
    }
}

impl TraversalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(MigrateError::invalid_configuration(
                "batch_size",
                self.batch_size,
                "must be a positive integer",
            ));
        }
        if self.max_doc_count == Some(0) {
            return Err(MigrateError::invalid_configuration(
                "max_doc_count",
                0,
                "must be a positive integer or unbounded",
            ));
        }
        if self.max_concurrent_batch_count == 0 {
            return Err(MigrateError::invalid_configuration(
                "max_concurrent_batch_count",
                self.max_concurrent_batch_count,
                "must be at least 1",
            ));
        }
        if self.max_batch_retry_count == u32::MAX {
            return Err(MigrateError::invalid_configuration(
                "max_batch_retry_count",
                self.max_batch_retry_count,
                "leaves no room for the initial attempt",
            ));
        }
        Ok(())
    }

    /// Shallow merge: every field set in `patch` replaces the current value.
    pub fn merge(&self, patch: TraversalConfigPatch) -> Self {
        let mut merged = self.clone();
        if let Some(batch_size) = patch.batch_size {
            merged.batch_size = batch_size;
        }
        if let Some(max_doc_count) = patch.max_doc_count {
            merged.max_doc_count = max_doc_count;
        }
        if let Some(count) = patch.max_concurrent_batch_count {
            merged.max_concurrent_batch_count = count;
        }
        if let Some(count) = patch.max_batch_retry_count {
            merged.max_batch_retry_count = count;
        }
        if let Some(sleep) = patch.sleep_time_between_batches {
            merged.sleep_time_between_batches = sleep;
        }
        if let Some(sleep) = patch.sleep_time_between_trials {
            merged.sleep_time_between_trials = sleep;
        }
        merged
    }

    /// Total attempts granted to one batch callback
    pub fn max_trial_count(&self) -> u32 {
        self.max_batch_retry_count.saturating_add(1)
    }

    /// Upper bound on documents held by in-flight batch callbacks.
    pub fn peak_in_flight_doc_count(&self) -> usize {
        self.batch_size
            .saturating_mul(self.max_concurrent_batch_count)
    }
}

/// Partial traversal settings, merged into a [`TraversalConfig`] by
/// [`Traverser::with_config`](crate::traverser::Traverser::with_config).
///
/// Deserializable from any [`ConfigLoader`] source. Durations are read in milliseconds from
/// the `*_ms` keys; a computed [`SleepTime`] can only be set in code.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraversalConfigPatch {
    #[serde(default, deserialize_with = "deserialize_optional_count")]
    pub batch_size: Option<usize>,
    /// `Some(None)` lifts the document ceiling.
    #[serde(default, deserialize_with = "deserialize_optional_doc_limit")]
    pub max_doc_count: Option<Option<usize>>,
    #[serde(default, deserialize_with = "deserialize_optional_count")]
    pub max_concurrent_batch_count: Option<usize>,
    #[serde(default, deserialize_with = "deserialize_optional_count")]
    pub max_batch_retry_count: Option<u32>,
    #[serde(
        default,
        rename = "sleep_time_between_batches_ms",
        deserialize_with = "deserialize_optional_millis"
    )]
    pub sleep_time_between_batches: Option<Duration>,
    #[serde(
        default,
        rename = "sleep_time_between_trials_ms",
        deserialize_with = "deserialize_optional_sleep_time"
    )]
    pub sleep_time_between_trials: Option<SleepTime>,
}

impl TraversalConfigPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn max_doc_count(mut self, max_doc_count: usize) -> Self {
        self.max_doc_count = Some(Some(max_doc_count));
        self
    }

    pub fn unbounded_doc_count(mut self) -> Self {
        self.max_doc_count = Some(None);
        self
    }

    pub fn max_concurrent_batch_count(mut self, count: usize) -> Self {
        self.max_concurrent_batch_count = Some(count);
        self
    }

    pub fn max_batch_retry_count(mut self, count: u32) -> Self {
        self.max_batch_retry_count = Some(count);
        self
    }

    pub fn sleep_time_between_batches(mut self, sleep: Duration) -> Self {
        self.sleep_time_between_batches = Some(sleep);
        self
    }

    pub fn sleep_time_between_trials(mut self, sleep: SleepTime) -> Self {
        self.sleep_time_between_trials = Some(sleep);
        self
    }

    /// Layer `other` on top of `self`; fields set in `other` win.
    pub fn overlay(mut self, other: TraversalConfigPatch) -> Self {
        if other.batch_size.is_some() {
            self.batch_size = other.batch_size;
        }
        if other.max_doc_count.is_some() {
            self.max_doc_count = other.max_doc_count;
        }
        if other.max_concurrent_batch_count.is_some() {
            self.max_concurrent_batch_count = other.max_concurrent_batch_count;
        }
        if other.max_batch_retry_count.is_some() {
            self.max_batch_retry_count = other.max_batch_retry_count;
        }
        if other.sleep_time_between_batches.is_some() {
            self.sleep_time_between_batches = other.sleep_time_between_batches;
        }
        if other.sleep_time_between_trials.is_some() {
            self.sleep_time_between_trials = other.sleep_time_between_trials;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TraversalConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.batch_size, 250);
        assert_eq!(config.max_doc_count, None);
        assert_eq!(config.max_trial_count(), 1);
        assert_eq!(
            config.sleep_time_between_trials.for_trial(0),
            Duration::from_millis(1_000)
        );
    }

    #[test]
    fn test_zero_values_are_rejected() {
        let cases = [
            (TraversalConfigPatch::new().batch_size(0), "batch_size"),
            (TraversalConfigPatch::new().max_doc_count(0), "max_doc_count"),
            (
                TraversalConfigPatch::new().max_concurrent_batch_count(0),
                "max_concurrent_batch_count",
            ),
        ];

        for (patch, expected_field) in cases {
            let err = TraversalConfig::default().merge(patch).validate().unwrap_err();
            match err {
                MigrateError::InvalidConfiguration { field, .. } => {
                    assert_eq!(field, expected_field)
                }
                other => panic!("unexpected error: {other:?}"),
            }
        }
    }

    #[test]
    fn test_merge_is_shallow_and_non_destructive() {
        let base = TraversalConfig::default().merge(TraversalConfigPatch::new().max_doc_count(10));
        let merged = base.merge(TraversalConfigPatch::new().batch_size(5));

        assert_eq!(merged.batch_size, 5);
        assert_eq!(merged.max_doc_count, Some(10));
        assert_eq!(base.batch_size, 250);

        let unbounded = merged.merge(TraversalConfigPatch::new().unbounded_doc_count());
        assert_eq!(unbounded.max_doc_count, None);
    }

    #[test]
    fn test_overlay_prefers_later_patch() {
        let patch = TraversalConfigPatch::new()
            .batch_size(10)
            .max_batch_retry_count(2)
            .overlay(TraversalConfigPatch::new().batch_size(20));
        assert_eq!(patch.batch_size, Some(20));
        assert_eq!(patch.max_batch_retry_count, Some(2));
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let backoff = BackoffConfig {
            base_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 500,
        };
        assert!(backoff.validate().is_ok());
        assert_eq!(backoff.delay_for_trial(0), Duration::from_millis(100));
        assert_eq!(backoff.delay_for_trial(2), Duration::from_millis(400));
        assert_eq!(backoff.delay_for_trial(3), Duration::from_millis(500));
        assert_eq!(backoff.delay_for_trial(u32::MAX), Duration::from_millis(500));

        let sleep = SleepTime::from_backoff(backoff);
        assert_eq!(sleep.for_trial(1), Duration::from_millis(200));
    }

    #[test]
    fn test_backoff_validation() {
        let shrinking = BackoffConfig {
            backoff_multiplier: 0.5,
            ..BackoffConfig::default()
        };
        assert!(shrinking.validate().is_err());

        let inverted = BackoffConfig {
            base_delay_ms: 10,
            max_delay_ms: 5,
            ..BackoffConfig::default()
        };
        assert!(inverted.validate().is_err());
    }
}
