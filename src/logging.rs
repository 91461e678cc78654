//! # Structured Logging Module
//!
//! Environment-aware structured logging for traversal and migration runs.

use crate::constants::env;
use crate::migrator::MigrationResult;
use crate::traverser::TraversalResult;
use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging with environment-specific configuration.
///
/// `RUST_LOG` takes precedence over the environment-derived level. Safe to call
/// repeatedly; only the first call has an effect.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));

        let layer = if json_output_requested() {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A subscriber installed by the host application takes precedence
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - continuing with existing subscriber");
        }

        tracing::info!(environment = %environment, "Structured logging initialized");
    });
}

/// Get current environment from environment variables
fn get_environment() -> String {
    std::env::var(env::ENVIRONMENT)
        .or_else(|_| std::env::var(env::FALLBACK_ENVIRONMENT))
        .unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> String {
    match environment {
        "production" => "info".to_string(),
        _ => "debug".to_string(),
    }
}

fn json_output_requested() -> bool {
    std::env::var(env::LOG_FORMAT)
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false)
}

/// Log the summary of a finished traversal
pub fn log_traversal_summary(operation: &str, result: &TraversalResult) {
    tracing::info!(
        operation = %operation,
        batch_count = result.batch_count,
        doc_count = result.doc_count,
        timestamp = %Utc::now().to_rfc3339(),
        "TRAVERSAL_COMPLETE"
    );
}

/// Log the summary of a finished migration
pub fn log_migration_summary(operation: &str, result: &MigrationResult) {
    tracing::info!(
        operation = %operation,
        batch_count = result.traversal_result.batch_count,
        doc_count = result.traversal_result.doc_count,
        migrated_doc_count = result.migrated_doc_count,
        timestamp = %Utc::now().to_rfc3339(),
        "MIGRATION_COMPLETE"
    );
}
