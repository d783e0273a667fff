//! Durable item storage.
//!
//! - [`BlobBackend`] - key/value blob store seam (SQLite and in-memory)
//! - [`ItemStore`] - per-item fan-out persistence with deterministic keys
//! - [`ItemKey`] - sanitized, bounded-length key derived from an item id

mod backend;
mod key;
mod sqlite;
mod store;
mod types;

pub use backend::{BlobBackend, MemoryBackend};
pub use key::{item_object_path, items_prefix, ItemKey};
pub use sqlite::SqliteBackend;
pub use store::{ItemStore, StoreConfig, DEFAULT_CONCURRENCY};
pub use types::{BackendError, StoreError};
