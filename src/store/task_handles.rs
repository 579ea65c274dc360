//! Durable task handles and reconciled result maps.
//!
//! One row per (namespace, project, dataset) triple in each table:
//! `task_handles` carries the live processing task id so a reloaded UI can
//! resume observation, `dataset_results` carries the last reconciled
//! per-file result map as JSON. Rows are tagged with `format_version` so a
//! future payload change can detect and migrate old records.

use rusqlite::{Connection, OptionalExtension};
use tracing::debug;

use crate::error::AppError;
use crate::model::DatasetIdentity;
use crate::reconcile::ResultMap;
use crate::store::database::{open_configured, Database};

/// Version tag written into every row.
pub const RECORD_FORMAT_VERSION: i64 = 1;

fn current_timestamp() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl Database {
    /// Persists the live task id for a dataset, replacing any previous one.
    ///
    /// Called before the first poll so a crash or reload between submission
    /// and observation cannot orphan the task.
    pub async fn save_task_handle(
        &self,
        identity: &DatasetIdentity,
        task_id: &str,
    ) -> Result<(), AppError> {
        let db_path = self.db_path().clone();
        let identity = identity.clone();
        let task_id = task_id.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = open_configured(&db_path)?;
            let now = current_timestamp();

            conn.execute(
                r#"
                INSERT INTO task_handles (namespace, project, dataset, task_id, format_version, created_at, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
                ON CONFLICT(namespace, project, dataset) DO UPDATE SET
                    task_id = excluded.task_id,
                    format_version = excluded.format_version,
                    updated_at = excluded.updated_at
                "#,
                rusqlite::params![
                    identity.namespace,
                    identity.project,
                    identity.dataset,
                    task_id,
                    RECORD_FORMAT_VERSION,
                    now,
                ],
            )
            .map_err(|e| AppError::StorageError(format!("Failed to save task handle: {e}")))?;

            debug!(dataset = %identity, "task handle saved");
            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Save task handle task failed: {e}")))??;

        Ok(())
    }

    /// Loads the live task id for a dataset, if one is persisted.
    pub async fn load_task_handle(
        &self,
        identity: &DatasetIdentity,
    ) -> Result<Option<String>, AppError> {
        let db_path = self.db_path().clone();
        let identity = identity.clone();

        tokio::task::spawn_blocking(move || {
            let conn = open_configured(&db_path)?;

            let task_id = conn
                .query_row(
                    r#"
                    SELECT task_id FROM task_handles
                    WHERE namespace = ?1 AND project = ?2 AND dataset = ?3
                    "#,
                    rusqlite::params![identity.namespace, identity.project, identity.dataset],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(|e| AppError::StorageError(format!("Failed to load task handle: {e}")))?;

            Ok::<_, AppError>(task_id)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Load task handle task failed: {e}")))?
    }

    /// Removes the task handle for a dataset. A no-op when none exists.
    pub async fn clear_task_handle(&self, identity: &DatasetIdentity) -> Result<(), AppError> {
        let db_path = self.db_path().clone();
        let identity = identity.clone();

        tokio::task::spawn_blocking(move || {
            let conn = open_configured(&db_path)?;

            conn.execute(
                r#"
                DELETE FROM task_handles
                WHERE namespace = ?1 AND project = ?2 AND dataset = ?3
                "#,
                rusqlite::params![identity.namespace, identity.project, identity.dataset],
            )
            .map_err(|e| AppError::StorageError(format!("Failed to clear task handle: {e}")))?;

            debug!(dataset = %identity, "task handle cleared");
            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Clear task handle task failed: {e}")))??;

        Ok(())
    }

    /// Persists the reconciled result map for a dataset, replacing the
    /// previous snapshot.
    pub async fn save_result_map(
        &self,
        identity: &DatasetIdentity,
        results: &ResultMap,
    ) -> Result<(), AppError> {
        let db_path = self.db_path().clone();
        let identity = identity.clone();
        let result_json = serde_json::to_string(results)
            .map_err(|e| AppError::Internal(format!("Failed to serialize result map: {e}")))?;

        tokio::task::spawn_blocking(move || {
            let conn = open_configured(&db_path)?;
            let now = current_timestamp();

            conn.execute(
                r#"
                INSERT INTO dataset_results (namespace, project, dataset, result_json, format_version, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(namespace, project, dataset) DO UPDATE SET
                    result_json = excluded.result_json,
                    format_version = excluded.format_version,
                    updated_at = excluded.updated_at
                "#,
                rusqlite::params![
                    identity.namespace,
                    identity.project,
                    identity.dataset,
                    result_json,
                    RECORD_FORMAT_VERSION,
                    now,
                ],
            )
            .map_err(|e| AppError::StorageError(format!("Failed to save result map: {e}")))?;

            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Save result map task failed: {e}")))??;

        Ok(())
    }

    /// Loads the last reconciled result map for a dataset, if any.
    pub async fn load_result_map(
        &self,
        identity: &DatasetIdentity,
    ) -> Result<Option<ResultMap>, AppError> {
        let db_path = self.db_path().clone();
        let identity = identity.clone();

        let result_json = tokio::task::spawn_blocking(move || {
            let conn = open_configured(&db_path)?;

            let json = conn
                .query_row(
                    r#"
                    SELECT result_json FROM dataset_results
                    WHERE namespace = ?1 AND project = ?2 AND dataset = ?3
                    "#,
                    rusqlite::params![identity.namespace, identity.project, identity.dataset],
                    |row| row.get::<_, String>(0),
                )
                .optional()
                .map_err(|e| AppError::StorageError(format!("Failed to load result map: {e}")))?;

            Ok::<_, AppError>(json)
        })
        .await
        .map_err(|e| AppError::Internal(format!("Load result map task failed: {e}")))??;

        match result_json {
            None => Ok(None),
            Some(json) => {
                let results: ResultMap = serde_json::from_str(&json).map_err(|e| {
                    AppError::StorageError(format!("Corrupt result map record: {e}"))
                })?;
                Ok(Some(results))
            }
        }
    }

    /// Removes both the task handle and the result map for a dataset.
    /// Used when the dataset itself is deleted.
    pub async fn clear_dataset(&self, identity: &DatasetIdentity) -> Result<(), AppError> {
        let db_path = self.db_path().clone();
        let identity = identity.clone();

        tokio::task::spawn_blocking(move || {
            let conn = open_configured(&db_path)?;

            conn.execute(
                r#"
                DELETE FROM task_handles
                WHERE namespace = ?1 AND project = ?2 AND dataset = ?3
                "#,
                rusqlite::params![identity.namespace, identity.project, identity.dataset],
            )
            .map_err(|e| AppError::StorageError(format!("Failed to clear task handle: {e}")))?;

            conn.execute(
                r#"
                DELETE FROM dataset_results
                WHERE namespace = ?1 AND project = ?2 AND dataset = ?3
                "#,
                rusqlite::params![identity.namespace, identity.project, identity.dataset],
            )
            .map_err(|e| AppError::StorageError(format!("Failed to clear dataset results: {e}")))?;

            debug!(dataset = %identity, "dataset records cleared");
            Ok::<_, AppError>(())
        })
        .await
        .map_err(|e| AppError::Internal(format!("Clear dataset task failed: {e}")))??;

        Ok(())
    }
}
