use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::RwLock;

use super::types::BackendError;

/// Durable key/value blob store the item store persists into.
///
/// Implementations must be consistent per key; no cross-key transaction is
/// assumed.
#[async_trait]
pub trait BlobBackend: Send + Sync {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), BackendError>;

    /// Returns [`BackendError::NotFound`] if nothing is stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError>;

    /// All keys starting with `prefix`, in lexicographic order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError>;

    /// Removes `key`. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), BackendError>;
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    content_type: String,
}

/// Process-local backend, used for tests and for runs without a database.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Content type recorded for `key`, if stored.
    pub fn content_type(&self, key: &str) -> Option<String> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| o.content_type.clone())
    }
}

#[async_trait]
impl BlobBackend for MemoryBackend {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), BackendError> {
        self.objects.write().unwrap_or_else(|e| e.into_inner()).insert(
            key.to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.objects
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .map(|o| o.data.clone())
            .ok_or_else(|| BackendError::NotFound(key.to_string()))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        let objects = self.objects.read().unwrap_or_else(|e| e.into_inner());
        Ok(objects
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.objects
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        Ok(())
    }
}
