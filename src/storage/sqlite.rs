//! SQLite storage backend, enabled by the `sqlite` feature.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::time::Duration;

use super::{PipelineStore, StoreError};
use crate::core::run::{Run, TaskRunResults};

/// SQLite storage backend.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Connect to the database at `url` (e.g. `sqlite::memory:` or
    /// `sqlite:runs.db`) and apply the schema.
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePoolOptions::new()
            .connect(url)
            .await
            .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                pipeline_spec_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                finished_at TEXT,
                outputs TEXT NOT NULL,
                errors TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pipeline_task_runs (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                run_id INTEGER NOT NULL,
                task_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                error TEXT,
                output TEXT,
                created_at TEXT NOT NULL,
                finished_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(db_err)?;

        Ok(Self { pool })
    }
}

fn db_err(err: sqlx::Error) -> StoreError {
    StoreError::Database(err.to_string())
}

#[async_trait]
impl PipelineStore for SqliteStore {
    async fn insert_finished_run(
        &self,
        run: &Run,
        trrs: &TaskRunResults,
        save_successful_task_runs: bool,
    ) -> Result<i64, StoreError> {
        let outputs = serde_json::to_string(&run.outputs)
            .map_err(|e| StoreError::Database(e.to_string()))?;
        let errors = serde_json::to_string(&run.errors)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let result = sqlx::query(
            r#"
            INSERT INTO pipeline_runs
                (pipeline_spec_id, created_at, finished_at, outputs, errors)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.pipeline_spec_id.value())
        .bind(run.created_at.to_rfc3339())
        .bind(run.finished_at.map(|t| t.to_rfc3339()))
        .bind(outputs)
        .bind(errors)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let run_id = result.last_insert_rowid();

        for trr in trrs.iter() {
            if !save_successful_task_runs && !trr.has_error() {
                continue;
            }
            let (output, error) = match &trr.output {
                Ok(value) => (Some(value.to_json().to_string()), None),
                Err(err) => (None, Some(err.to_string())),
            };
            sqlx::query(
                r#"
                INSERT INTO pipeline_task_runs
                    (run_id, task_id, task_type, error, output, created_at, finished_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(run_id)
            .bind(trr.task_id.as_str())
            .bind(trr.task_type.to_string())
            .bind(error)
            .bind(output)
            .bind(trr.created_at.to_rfc3339())
            .bind(trr.finished_at.to_rfc3339())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(run_id)
    }

    async fn delete_runs_older_than(&self, threshold: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(threshold)
                .map_err(|e| StoreError::Database(e.to_string()))?;
        let cutoff = cutoff.to_rfc3339();

        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            DELETE FROM pipeline_task_runs WHERE run_id IN (
                SELECT id FROM pipeline_runs
                WHERE COALESCE(finished_at, created_at) < ?
            )
            "#,
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        let result = sqlx::query(
            "DELETE FROM pipeline_runs WHERE COALESCE(finished_at, created_at) < ?",
        )
        .bind(&cutoff)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SpecId;

    fn finished_run(age: Duration) -> Run {
        let finished_at = Utc::now() - chrono::Duration::from_std(age).unwrap();
        let mut run = Run::new(SpecId::new(1), finished_at);
        run.finished_at = Some(finished_at);
        run
    }

    #[tokio::test]
    async fn test_insert_and_reap() {
        let store = SqliteStore::connect("sqlite::memory:").await.unwrap();
        let trrs = TaskRunResults::default();

        let old = finished_run(Duration::from_secs(120));
        let fresh = finished_run(Duration::ZERO);
        let id1 = store.insert_finished_run(&old, &trrs, true).await.unwrap();
        let id2 = store.insert_finished_run(&fresh, &trrs, true).await.unwrap();
        assert_ne!(id1, id2);

        let removed = store
            .delete_runs_older_than(Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
