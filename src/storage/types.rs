use crate::retry::RetryError;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised by a [`BlobBackend`](super::BlobBackend) implementation.
#[derive(Debug, Error)]
pub enum BackendError {
    /// No object is stored under the key
    #[error("Object not found: {0}")]
    NotFound(String),

    /// Another process holds the database lock
    #[error("Blob database is locked by another process")]
    Locked,

    /// Schema setup failed
    #[error("Blob database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Failure injected or reported by a non-database backend
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
}

impl BackendError {
    /// Classify a sqlx error, separating lock contention from other failures.
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        let error_string = err.to_string().to_lowercase();

        // SQLITE_BUSY (5), SQLITE_LOCKED (6)
        if error_string.contains("database is locked")
            || error_string.contains("database table is locked")
            || error_string.contains("sqlite_busy")
            || error_string.contains("sqlite_locked")
        {
            return BackendError::Locked;
        }

        BackendError::Database(err)
    }
}

/// Errors surfaced by [`ItemStore`](super::ItemStore) operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A backend call failed after its retries were used up
    #[error("{key}: {source}")]
    Backend {
        key: String,
        #[source]
        source: RetryError<BackendError>,
    },

    /// An item could not be serialized
    #[error("Failed to encode item {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// A stored object is not a valid item
    #[error("Failed to decode object {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Some units of a fan-out failed; `first` is the earliest in input order
    #[error("{failed} of {total} {operation} operations failed, first: {first}")]
    Partial {
        operation: &'static str,
        failed: usize,
        total: usize,
        #[source]
        first: Box<StoreError>,
    },
}

impl StoreError {
    /// True if the failure came from cancellation rather than the backend.
    pub fn is_cancelled(&self) -> bool {
        match self {
            StoreError::Backend { source, .. } => source.is_cancelled(),
            StoreError::Partial { first, .. } => first.is_cancelled(),
            StoreError::Encode { .. } | StoreError::Decode { .. } => false,
        }
    }
}
