//! SQLite bootstrap: file creation, connection configuration, and
//! `user_version` migrations.
//!
//! Connections are cheap here; every storage operation opens its own inside
//! `spawn_blocking` rather than sharing one across the async runtime.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use crate::error::AppError;

/// Bump when appending a migration below.
const SCHEMA_VERSION: i32 = 1;

const V1_SCHEMA: &str = r#"
-- At most one live processing task per (namespace, project, dataset)
CREATE TABLE IF NOT EXISTS task_handles (
    namespace TEXT NOT NULL,
    project TEXT NOT NULL,
    dataset TEXT NOT NULL,
    task_id TEXT NOT NULL,
    format_version INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (namespace, project, dataset)
);

-- Last reconciled per-file result map, serialized as JSON
CREATE TABLE IF NOT EXISTS dataset_results (
    namespace TEXT NOT NULL,
    project TEXT NOT NULL,
    dataset TEXT NOT NULL,
    result_json TEXT NOT NULL,
    format_version INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (namespace, project, dataset)
);
"#;

/// Handle to the on-disk database. Holds only the path; see the module doc
/// for the connection model.
#[derive(Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// Opens (creating if needed) the database at `db_path` and brings the
    /// schema up to date.
    ///
    /// # Errors
    ///
    /// `AppError::StorageError` when the directory, file, or migration
    /// cannot be set up.
    pub async fn init(db_path: PathBuf) -> Result<Self, AppError> {
        let path = db_path.clone();

        tokio::task::spawn_blocking(move || {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AppError::StorageError(format!("could not create data directory: {e}"))
                })?;
            }

            let mut conn = open_configured(&path)?;
            apply_migrations(&mut conn)
        })
        .await
        .map_err(|e| AppError::Internal(format!("database init task panicked: {e}")))??;

        info!(path = %db_path.display(), "database ready");
        Ok(Self { db_path })
    }

    /// Path accessor for the sibling storage modules.
    pub fn db_path(&self) -> &PathBuf {
        &self.db_path
    }

    /// Cheap liveness probe for the settings screen.
    pub async fn health_check(&self) -> Result<(), AppError> {
        let path = self.db_path.clone();

        tokio::task::spawn_blocking(move || {
            let conn = open_configured(&path)?;
            conn.query_row("SELECT 1", [], |_| Ok(()))
                .map_err(|e| AppError::StorageError(format!("health check failed: {e}")))
        })
        .await
        .map_err(|e| AppError::Internal(format!("health check task panicked: {e}")))??;

        Ok(())
    }
}

/// Opens a connection with the pragmas every caller needs: a busy timeout
/// so concurrent blocking tasks queue instead of erroring, and WAL so
/// readers never block the writer.
pub(super) fn open_configured(path: &std::path::Path) -> Result<Connection, AppError> {
    let conn = Connection::open(path)
        .map_err(|e| AppError::StorageError(format!("could not open database: {e}")))?;

    conn.busy_timeout(Duration::from_secs(10))
        .map_err(|e| AppError::StorageError(format!("could not set busy timeout: {e}")))?;
    conn.pragma_update(None, "journal_mode", "WAL")
        .map_err(|e| AppError::StorageError(format!("could not enable WAL: {e}")))?;

    Ok(conn)
}

/// Walks the schema forward from the file's `user_version`, one numbered
/// step at a time, inside a single transaction.
fn apply_migrations(conn: &mut Connection) -> Result<(), AppError> {
    let on_disk: i32 = conn
        .pragma_query_value(None, "user_version", |row| row.get(0))
        .map_err(|e| AppError::StorageError(format!("could not read schema version: {e}")))?;

    if on_disk >= SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn
        .transaction()
        .map_err(|e| AppError::StorageError(format!("could not begin migration: {e}")))?;

    if on_disk < 1 {
        tx.execute_batch(V1_SCHEMA)
            .map_err(|e| AppError::StorageError(format!("v1 migration failed: {e}")))?;
    }

    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(|e| AppError::StorageError(format!("could not record schema version: {e}")))?;
    tx.commit()
        .map_err(|e| AppError::StorageError(format!("could not commit migration: {e}")))?;

    info!(from = on_disk, to = SCHEMA_VERSION, "schema migrated");
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
