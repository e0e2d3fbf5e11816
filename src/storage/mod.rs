//! Persistence seam for finished pipeline runs.
//!
//! The engine never writes storage mid-run; a finished run is persisted
//! in one call, and the background reaper prunes old rows. Backends are
//! pluggable: an in-memory store is always available, a SQLite store
//! behind the `sqlite` feature.

mod memory;
#[cfg(feature = "sqlite")]
mod sqlite;

pub use memory::{InMemoryStore, PersistedRun};
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::core::run::{Run, TaskRunResults};

/// Errors from storage operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The requested row was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Backend-specific failure.
    #[error("database error: {0}")]
    Database(String),
}

/// Storage backend for finished runs.
#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Persist a finished run and return its assigned id.
    ///
    /// The run header is always persisted. When
    /// `save_successful_task_runs` is false, only task run records
    /// carrying an error are stored alongside it.
    async fn insert_finished_run(
        &self,
        run: &Run,
        trrs: &TaskRunResults,
        save_successful_task_runs: bool,
    ) -> Result<i64, StoreError>;

    /// Delete persisted runs that finished more than `threshold` ago.
    /// Returns the number of runs removed.
    async fn delete_runs_older_than(&self, threshold: Duration) -> Result<u64, StoreError>;
}
