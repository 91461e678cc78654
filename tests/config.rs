//! Configuration Loading Tests
//!
//! Layered file and environment loading of traversal settings.

use doc_migrate::config::{ConfigLoader, TraversalConfig, TraversalConfigPatch};
use doc_migrate::Traverser;
use std::io::Write;
use std::time::Duration;
use tempfile::Builder;

#[test]
fn defaults_match_documented_values() {
    let config = TraversalConfig::default();
    assert_eq!(config.batch_size, 250);
    assert_eq!(config.max_doc_count, None);
    assert_eq!(config.max_concurrent_batch_count, 1);
    assert_eq!(config.max_batch_retry_count, 0);
    assert_eq!(config.sleep_time_between_batches, Duration::ZERO);
    assert_eq!(
        config.sleep_time_between_trials.for_trial(0),
        Duration::from_millis(1_000)
    );
    assert_eq!(config.peak_in_flight_doc_count(), 250);
}

#[test]
fn environment_overrides_file() {
    let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
    writeln!(
        file,
        "batch_size = 40\nmax_doc_count = 500\nmax_concurrent_batch_count = 2"
    )
    .unwrap();

    // Unique prefix so parallel tests never observe these variables
    std::env::set_var("DMCFGTEST_OVERRIDE_BATCH_SIZE", "25");
    std::env::set_var("DMCFGTEST_OVERRIDE_MAX_DOC_COUNT", "unbounded");
    std::env::set_var("DMCFGTEST_OVERRIDE_SLEEP_TIME_BETWEEN_TRIALS_MS", "250");

    let config = ConfigLoader::new()
        .with_file(file.path())
        .with_env_prefix("DMCFGTEST_OVERRIDE")
        .load_config(&TraversalConfig::default())
        .unwrap();

    assert_eq!(config.batch_size, 25);
    assert_eq!(config.max_doc_count, None);
    assert_eq!(config.max_concurrent_batch_count, 2);
    assert_eq!(
        config.sleep_time_between_trials.for_trial(3),
        Duration::from_millis(250)
    );
}

#[test]
fn invalid_environment_value_is_a_configuration_error() {
    std::env::set_var("DMCFGTEST_INVALID_MAX_CONCURRENT_BATCH_COUNT", "0");

    let err = ConfigLoader::new()
        .with_env_prefix("DMCFGTEST_INVALID")
        .load_config(&TraversalConfig::default())
        .unwrap_err();
    assert!(err.is_configuration_error());
}

#[test]
fn loaded_patch_configures_a_traverser() {
    let mut file = Builder::new().suffix(".json").tempfile().unwrap();
    write!(
        file,
        r#"{{"batch_size": "12", "max_batch_retry_count": 4, "sleep_time_between_batches_ms": 5}}"#
    )
    .unwrap();

    let patch = ConfigLoader::new()
        .without_environment()
        .with_file(file.path())
        .load()
        .unwrap()
        .overlay(TraversalConfigPatch::new().max_doc_count(100));

    let store = doc_migrate::store::memory::MemoryStore::new();
    let traverser = Traverser::new(store.collection("any"))
        .with_config(patch)
        .unwrap();

    let config = traverser.config();
    assert_eq!(config.batch_size, 12);
    assert_eq!(config.max_batch_retry_count, 4);
    assert_eq!(config.max_trial_count(), 5);
    assert_eq!(config.max_doc_count, Some(100));
    assert_eq!(config.sleep_time_between_batches, Duration::from_millis(5));
}
