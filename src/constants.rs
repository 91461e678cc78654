//! # System Constants
//!
//! Defaults and limits shared by the traverser, migrators and configuration loader.

/// Default traversal settings
pub mod defaults {
    /// Documents fetched per page
    pub const BATCH_SIZE: usize = 250;
    /// Batch callbacks allowed in flight at once
    pub const MAX_CONCURRENT_BATCH_COUNT: usize = 1;
    /// Additional attempts after a failed batch callback
    pub const MAX_BATCH_RETRY_COUNT: u32 = 0;
    pub const SLEEP_TIME_BETWEEN_BATCHES_MS: u64 = 0;
    pub const SLEEP_TIME_BETWEEN_TRIALS_MS: u64 = 1_000;
}

/// Document store limits
pub mod store {
    /// Maximum number of writes a single atomic commit may carry
    pub const MAX_BATCH_WRITE_COUNT: usize = 500;
    /// Separator between segments of a dotted field path
    pub const FIELD_PATH_SEPARATOR: char = '.';
}

/// Environment variable names
pub mod env {
    /// Prefix for configuration overrides, e.g. `DOC_MIGRATE_BATCH_SIZE`
    pub const CONFIG_PREFIX: &str = "DOC_MIGRATE";
    pub const ENVIRONMENT: &str = "DOC_MIGRATE_ENV";
    pub const FALLBACK_ENVIRONMENT: &str = "APP_ENV";
    /// `json` switches log output to JSON lines
    pub const LOG_FORMAT: &str = "DOC_MIGRATE_LOG_FORMAT";
}
