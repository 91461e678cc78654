//! # Configuration Loader
//!
//! Builds a [`TraversalConfigPatch`] from layered sources with the `config` crate:
//! an optional file (format chosen by extension), then environment variables.
//! Later sources override earlier ones.
//!
//! ```rust,no_run
//! use doc_migrate::config::{ConfigLoader, TraversalConfig};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // DOC_MIGRATE_BATCH_SIZE=100 DOC_MIGRATE_MAX_DOC_COUNT=unbounded ...
//! let config = ConfigLoader::new()
//!     .with_file("migrate.toml")
//!     .load_config(&TraversalConfig::default())?;
//! # Ok(())
//! # }
//! ```

use super::{TraversalConfig, TraversalConfigPatch};
use crate::constants::env;
use crate::error::Result;
use config::{Config, Environment, File};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ConfigLoader {
    file: Option<PathBuf>,
    file_required: bool,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Loader reading `DOC_MIGRATE_*` environment variables and no file.
    pub fn new() -> Self {
        Self {
            file: None,
            file_required: true,
            env_prefix: Some(env::CONFIG_PREFIX.to_string()),
        }
    }

    /// Read settings from `path`. A missing file is an error unless
    /// [`optional_file`](Self::optional_file) is also called.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn optional_file(mut self) -> Self {
        self.file_required = false;
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = Some(prefix.into());
        self
    }

    pub fn without_environment(mut self) -> Self {
        self.env_prefix = None;
        self
    }

    /// Collect the configured sources into a patch.
    pub fn load(&self) -> Result<TraversalConfigPatch> {
        let mut builder = Config::builder();

        if let Some(path) = &self.file {
            debug!(path = %path.display(), required = self.file_required, "Adding configuration file source");
            builder = builder.add_source(File::from(path.clone()).required(self.file_required));
        }

        if let Some(prefix) = &self.env_prefix {
            builder = builder.add_source(Environment::with_prefix(prefix).try_parsing(true));
        }

        let patch: TraversalConfigPatch = builder.build()?.try_deserialize()?;
        debug!(?patch, "Loaded traversal configuration patch");
        Ok(patch)
    }

    /// Merge the loaded patch into `base` and validate the result.
    pub fn load_config(&self, base: &TraversalConfig) -> Result<TraversalConfig> {
        let config = base.merge(self.load()?);
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::Builder;

    #[test]
    fn test_load_from_toml_file() {
        let mut file = Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "batch_size = 40\nmax_batch_retry_count = 3\nsleep_time_between_batches_ms = 25"
        )
        .unwrap();

        let patch = ConfigLoader::new()
            .without_environment()
            .with_file(file.path())
            .load()
            .unwrap();

        assert_eq!(patch.batch_size, Some(40));
        assert_eq!(patch.max_batch_retry_count, Some(3));
        assert_eq!(
            patch.sleep_time_between_batches,
            Some(Duration::from_millis(25))
        );
        assert!(patch.max_doc_count.is_none());
    }

    #[test]
    fn test_missing_optional_file_yields_empty_patch() {
        let patch = ConfigLoader::new()
            .without_environment()
            .with_file("/definitely/not/here.toml")
            .optional_file()
            .load()
            .unwrap();
        assert!(patch.batch_size.is_none());
    }

    #[test]
    fn test_missing_required_file_is_an_error() {
        let err = ConfigLoader::new()
            .without_environment()
            .with_file("/definitely/not/here.toml")
            .load()
            .unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_invalid_loaded_values_fail_validation() {
        let mut file = Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"batch_size": 0}}"#).unwrap();

        let err = ConfigLoader::new()
            .without_environment()
            .with_file(file.path())
            .load_config(&TraversalConfig::default())
            .unwrap_err();
        assert!(err.is_configuration_error());
    }
}
