#![allow(clippy::doc_markdown)] // Allow technical terms like Firestore in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Doc Migrate
//!
//! Bulk traversal and migration engine for paginated document collections.
//!
//! ## Overview
//!
//! A [`Traverser`] walks an ordered, cursor-paginated document source in fixed-size
//! batches and hands each batch to a caller-supplied async callback. Batches can run
//! concurrently up to a configured bound, failed batches are retried with a configurable
//! sleep between trials, and traversal can stop early once a document ceiling or a
//! caller predicate is reached.
//!
//! A [`Migrator`](migrator::Migrator) builds on the traverser to write to every
//! document that passes its predicates, either atomically per batch
//! ([`AtomicMigrator`]) or with one independent write per document
//! ([`BasicMigrator`]).
//!
//! ## Module Organization
//!
//! - [`traverser`] - Paginated traversal, retry wrapper and in-flight task queue
//! - [`migrator`] - Set, update, delete and rename migrations in two write modes
//! - [`store`] - Interfaces consumed from the document store, plus an in-memory store
//! - [`config`] - Traversal settings and layered file/environment loading
//! - [`error`] - Structured error handling
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust
//! use doc_migrate::config::TraversalConfigPatch;
//! use doc_migrate::migrator::BasicMigrator;
//! use doc_migrate::store::memory::MemoryStore;
//! use doc_migrate::store::DocumentRef;
//! use doc_migrate::traverser::Traverser;
//! use serde_json::json;
//!
//! # tokio_test::block_on(async {
//! let store = MemoryStore::new();
//! let projects = store.collection("projects");
//! for i in 0..10 {
//!     let data = json!({ "index": i }).as_object().cloned().unwrap();
//!     projects.doc(format!("p{i:02}")).set(data, Default::default()).await?;
//! }
//!
//! let traverser = Traverser::new(projects)
//!     .with_config(TraversalConfigPatch::new().batch_size(4).max_concurrent_batch_count(2))?;
//! let migrator = BasicMigrator::new(traverser);
//! let result = migrator
//!     .update(json!({ "archived": false }).as_object().cloned().unwrap(), None)
//!     .await?;
//!
//! assert_eq!(result.traversal_result.batch_count, 3);
//! assert_eq!(result.migrated_doc_count, 10);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # }).unwrap();
//! ```

pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod migrator;
pub mod store;
pub mod traverser;
pub mod utils;

pub use crate::config::{BackoffConfig, ConfigLoader, SleepTime, TraversalConfig, TraversalConfigPatch};
pub use crate::error::{MigrateError, Result, StoreError};
pub use crate::migrator::{AtomicMigrator, BasicMigrator, MigrationResult, UpdateData};
pub use crate::traverser::{TraversalResult, TraverseEachConfig, Traverser};
