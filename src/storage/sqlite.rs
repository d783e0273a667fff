use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::backend::BlobBackend;
use super::types::BackendError;

// ============================================================================
// SQLite Blob Backend
// ============================================================================

/// Durable blob store in a single SQLite table.
///
/// Each object is one row keyed by its full path
/// (`sources/<name>/items/<key>.json`), so per-key writes are atomic and
/// prefix listing is an indexed range scan.
#[derive(Clone)]
pub struct SqliteBackend {
    pub(crate) pool: SqlitePool,
}

impl SqliteBackend {
    /// Open (or create) the blob database and run migrations.
    ///
    /// `":memory:"` gives a private in-memory database, which is what the
    /// tests use.
    ///
    /// # Errors
    ///
    /// Returns `BackendError::Locked` if another process holds the database
    /// lock, `BackendError::Migration` if the schema cannot be created.
    pub async fn open(path: &str) -> Result<Self, BackendError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Restrict the database file to the current user before the pool opens it
        #[cfg(unix)]
        if path != ":memory:" {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                let _file = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path)
                    .ok(); // SQLite reports the real error at connect_with
            }
        }

        // busy_timeout lets concurrent fan-out writers queue on SQLite's
        // single writer lock instead of failing with SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(BackendError::from_sqlx)?
            .pragma("busy_timeout", "5000");

        // An in-memory database lives and dies with its connection: keep
        // exactly one and never recycle it.
        let in_memory = path == ":memory:";
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(BackendError::from_sqlx)?;

        let backend = Self { pool };
        backend.migrate().await.map_err(|e| match e {
            BackendError::Locked => BackendError::Locked,
            other => BackendError::Migration(other.to_string()),
        })?;

        tracing::info!(path = %path, "Opened blob database");
        Ok(backend)
    }

    async fn migrate(&self) -> Result<(), BackendError> {
        let mut tx = self.pool.begin().await.map_err(BackendError::from_sqlx)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blobs (
                key TEXT PRIMARY KEY NOT NULL,
                content_type TEXT NOT NULL,
                data BLOB NOT NULL,
                size_bytes INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(BackendError::from_sqlx)?;

        tx.commit().await.map_err(BackendError::from_sqlx)?;
        Ok(())
    }

    /// Number of stored objects (all sources).
    pub async fn count(&self) -> Result<i64, BackendError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM blobs")
            .fetch_one(&self.pool)
            .await
            .map_err(BackendError::from_sqlx)?;
        Ok(count)
    }
}

#[async_trait]
impl BlobBackend for SqliteBackend {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), BackendError> {
        let size_bytes = data.len() as i64;
        sqlx::query(
            r#"
            INSERT INTO blobs (key, content_type, data, size_bytes, updated_at)
            VALUES (?, ?, ?, ?, strftime('%s', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                content_type = excluded.content_type,
                data = excluded.data,
                size_bytes = excluded.size_bytes,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(content_type)
        .bind(data)
        .bind(size_bytes)
        .execute(&self.pool)
        .await
        .map_err(BackendError::from_sqlx)?;

        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT data FROM blobs WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(BackendError::from_sqlx)?;

        row.map(|(data,)| data)
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        // substr comparison avoids escaping LIKE wildcards that may appear in keys
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT key FROM blobs WHERE substr(key, 1, length(?)) = ? ORDER BY key",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(BackendError::from_sqlx)?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        sqlx::query("DELETE FROM blobs WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(BackendError::from_sqlx)?;
        Ok(())
    }
}
