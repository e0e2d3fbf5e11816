//! In-memory storage backend.
//!
//! Thread-safe storage for testing and development. Data is not
//! persisted across restarts.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use super::{PipelineStore, StoreError};
use crate::core::run::{Run, TaskRunResult, TaskRunResults};

/// A run as held by the in-memory store.
#[derive(Debug, Clone)]
pub struct PersistedRun {
    /// Store-assigned run id.
    pub id: i64,
    /// The run header.
    pub run: Run,
    /// Task run records kept for this run.
    pub task_runs: Vec<TaskRunResult>,
}

/// In-memory storage backend.
pub struct InMemoryStore {
    next_id: AtomicI64,
    runs: RwLock<HashMap<i64, PersistedRun>>,
}

impl InMemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            runs: RwLock::new(HashMap::new()),
        }
    }

    /// Look up a persisted run by id.
    pub fn get_run(&self, id: i64) -> Result<PersistedRun, StoreError> {
        let runs = self.runs.read().map_err(|_| StoreError::LockPoisoned)?;
        runs.get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("run: {}", id)))
    }

    /// Number of persisted runs.
    pub fn run_count(&self) -> usize {
        self.runs.read().map(|r| r.len()).unwrap_or(0)
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PipelineStore for InMemoryStore {
    async fn insert_finished_run(
        &self,
        run: &Run,
        trrs: &TaskRunResults,
        save_successful_task_runs: bool,
    ) -> Result<i64, StoreError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let task_runs = trrs
            .iter()
            .filter(|trr| save_successful_task_runs || trr.has_error())
            .cloned()
            .collect();

        let mut runs = self.runs.write().map_err(|_| StoreError::LockPoisoned)?;
        runs.insert(
            id,
            PersistedRun {
                id,
                run: run.clone(),
                task_runs,
            },
        );
        Ok(id)
    }

    async fn delete_runs_older_than(&self, threshold: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut runs = self.runs.write().map_err(|_| StoreError::LockPoisoned)?;
        let before = runs.len();
        runs.retain(|_, persisted| {
            let finished = persisted.run.finished_at.unwrap_or(persisted.run.created_at);
            finished >= cutoff
        });
        Ok((before - runs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::TaskType;
    use crate::core::types::{SpecId, TaskId};
    use crate::core::value::{TaskError, TaskValue};
    use serde_json::json;

    fn finished_run(age: Duration) -> Run {
        let finished_at = Utc::now() - chrono::Duration::from_std(age).unwrap();
        let mut run = Run::new(SpecId::new(1), finished_at);
        run.finished_at = Some(finished_at);
        run
    }

    fn trr(id: &str, output: crate::core::value::TaskOutput) -> TaskRunResult {
        let now = Utc::now();
        TaskRunResult {
            task_id: TaskId::new(id),
            task_type: TaskType::Any,
            task_index: 0,
            is_terminal: true,
            output,
            created_at: now,
            finished_at: now,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_sequential_ids() {
        let store = InMemoryStore::new();
        let run = finished_run(Duration::ZERO);
        let trrs = TaskRunResults::default();

        let id1 = store.insert_finished_run(&run, &trrs, true).await.unwrap();
        let id2 = store.insert_finished_run(&run, &trrs, true).await.unwrap();

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(store.run_count(), 2);
    }

    #[tokio::test]
    async fn test_successful_task_runs_filtered_when_flag_unset() {
        let store = InMemoryStore::new();
        let run = finished_run(Duration::ZERO);
        let trrs = TaskRunResults::from(vec![
            trr("ok", Ok(TaskValue::Json(json!(1)))),
            trr("bad", Err(TaskError::ExecutionFailed("boom".to_string()))),
        ]);

        let id = store.insert_finished_run(&run, &trrs, false).await.unwrap();

        let persisted = store.get_run(id).unwrap();
        assert_eq!(persisted.task_runs.len(), 1);
        assert_eq!(persisted.task_runs[0].task_id, TaskId::new("bad"));
    }

    #[tokio::test]
    async fn test_all_task_runs_kept_when_flag_set() {
        let store = InMemoryStore::new();
        let run = finished_run(Duration::ZERO);
        let trrs = TaskRunResults::from(vec![
            trr("ok", Ok(TaskValue::Json(json!(1)))),
            trr("bad", Err(TaskError::ExecutionFailed("boom".to_string()))),
        ]);

        let id = store.insert_finished_run(&run, &trrs, true).await.unwrap();

        assert_eq!(store.get_run(id).unwrap().task_runs.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_runs_older_than() {
        let store = InMemoryStore::new();
        let trrs = TaskRunResults::default();

        let old = finished_run(Duration::from_secs(120));
        let fresh = finished_run(Duration::ZERO);
        store.insert_finished_run(&old, &trrs, true).await.unwrap();
        let fresh_id = store.insert_finished_run(&fresh, &trrs, true).await.unwrap();

        let removed = store
            .delete_runs_older_than(Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(removed, 1);
        assert_eq!(store.run_count(), 1);
        assert!(store.get_run(fresh_id).is_ok());
    }

    #[tokio::test]
    async fn test_get_missing_run() {
        let store = InMemoryStore::new();
        assert!(matches!(store.get_run(99), Err(StoreError::NotFound(_))));
    }
}
