//! Integration tests for per-item persistence: keys, fan-out, overwrite.
//!
//! Each test builds its own backend (in-memory SQLite or the map backend)
//! and a fresh cache, so reads after a new `ItemStore` go to the backend.

use async_trait::async_trait;
use feedkeeper::cache::ItemCache;
use feedkeeper::item::Item;
use feedkeeper::storage::{
    items_prefix, BackendError, BlobBackend, ItemKey, ItemStore, MemoryBackend, SqliteBackend,
    StoreConfig,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

fn item(id: &str) -> Item {
    Item {
        guid: Some(id.to_string()),
        title: format!("Title {id}"),
        link: format!("https://example.com/{id}"),
        description: format!("About {id}"),
        ..Default::default()
    }
}

fn store_on(backend: Arc<dyn BlobBackend>) -> ItemStore {
    ItemStore::new(backend, Arc::new(ItemCache::default()), StoreConfig::default())
}

async fn sqlite() -> Arc<SqliteBackend> {
    Arc::new(SqliteBackend::open(":memory:").await.unwrap())
}

fn sorted_guids(items: &[Item]) -> Vec<String> {
    let mut ids: Vec<String> = items.iter().filter_map(|i| i.guid.clone()).collect();
    ids.sort();
    ids
}

// ============================================================================
// Round trip
// ============================================================================

#[tokio::test]
async fn test_tech_news_example_round_trip() {
    let backend = sqlite().await;
    let cancel = CancellationToken::new();

    let stored = store_on(backend.clone())
        .put_items("tech-news", vec![item("a"), item("b"), item("c")], &cancel)
        .await
        .unwrap();
    assert_eq!(stored, 3);

    // Fresh store, so the read comes from SQLite rather than the cache
    let items = store_on(backend.clone())
        .get_items("tech-news", &cancel)
        .await
        .unwrap();
    assert_eq!(sorted_guids(&items), vec!["a", "b", "c"]);

    let keys = backend.list(&items_prefix("tech-news")).await.unwrap();
    assert_eq!(
        keys,
        vec![
            "sources/tech-news/items/a.json",
            "sources/tech-news/items/b.json",
            "sources/tech-news/items/c.json",
        ]
    );
}

#[tokio::test]
async fn test_put_is_idempotent() {
    let backend = sqlite().await;
    let store = store_on(backend.clone());
    let cancel = CancellationToken::new();
    let items = vec![item("a"), item("b"), item("c")];

    store.put_items("s", items.clone(), &cancel).await.unwrap();
    let first_keys = backend.list(&items_prefix("s")).await.unwrap();

    store.put_items("s", items, &cancel).await.unwrap();
    let second_keys = backend.list(&items_prefix("s")).await.unwrap();

    assert_eq!(first_keys, second_keys);
    assert_eq!(backend.count().await.unwrap(), 3);
    assert_eq!(store_on(backend).get_items("s", &cancel).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_new_set_replaces_old_set() {
    let backend = Arc::new(MemoryBackend::new());
    let store = store_on(backend.clone());
    let cancel = CancellationToken::new();

    store
        .put_items("s", vec![item("a"), item("b"), item("c")], &cancel)
        .await
        .unwrap();
    store
        .put_items("s", vec![item("a"), item("d")], &cancel)
        .await
        .unwrap();

    let from_cache = store.get_items("s", &cancel).await.unwrap();
    assert_eq!(sorted_guids(&from_cache), vec!["a", "d"]);

    let from_backend = store_on(backend).get_items("s", &cancel).await.unwrap();
    assert_eq!(sorted_guids(&from_backend), vec!["a", "d"]);
}

#[tokio::test]
async fn test_unknown_source_is_empty() {
    let items = store_on(sqlite().await)
        .get_items("never-stored", &CancellationToken::new())
        .await
        .unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_sources_do_not_share_prefixes() {
    let backend = Arc::new(MemoryBackend::new());
    let store = store_on(backend.clone());
    let cancel = CancellationToken::new();

    store.put_items("news", vec![item("a")], &cancel).await.unwrap();
    store.put_items("news-extra", vec![item("b")], &cancel).await.unwrap();
    // Overwriting "news" must not prune "news-extra"
    store.put_items("news", vec![item("c")], &cancel).await.unwrap();

    let fresh = store_on(backend);
    assert_eq!(sorted_guids(&fresh.get_items("news", &cancel).await.unwrap()), vec!["c"]);
    assert_eq!(
        sorted_guids(&fresh.get_items("news-extra", &cancel).await.unwrap()),
        vec!["b"]
    );
}

// ============================================================================
// Keys
// ============================================================================

#[tokio::test]
async fn test_overlong_identifiers_get_distinct_bounded_keys() {
    let backend = sqlite().await;
    let cancel = CancellationToken::new();
    let prefix = "x".repeat(192);
    let long_a = format!("{prefix}{}", "a".repeat(40));
    let long_b = format!("{prefix}{}", "b".repeat(40));

    let key_a = ItemKey::from_identifier(&long_a);
    let key_b = ItemKey::from_identifier(&long_b);
    assert_ne!(key_a, key_b);
    assert!(key_a.as_str().len() <= 201);

    store_on(backend.clone())
        .put_items("long", vec![item(&long_a), item(&long_b)], &cancel)
        .await
        .unwrap();

    let items = store_on(backend).get_items("long", &cancel).await.unwrap();
    assert_eq!(items.len(), 2);
    assert_eq!(sorted_guids(&items), vec![long_a, long_b]);
}

#[tokio::test]
async fn test_unsafe_identifiers_are_sanitized() {
    let backend = Arc::new(MemoryBackend::new());
    let cancel = CancellationToken::new();

    store_on(backend.clone())
        .put_items("s", vec![item("https://example.com/posts?id=1")], &cancel)
        .await
        .unwrap();

    let keys = backend.list(&items_prefix("s")).await.unwrap();
    assert_eq!(keys, vec!["sources/s/items/https___example.com_posts_id=1.json"]);
}

// ============================================================================
// Concurrency
// ============================================================================

/// Holds every write under `sources/slow/` until a permit is released.
struct GatedBackend {
    inner: MemoryBackend,
    gate: Semaphore,
}

#[async_trait]
impl BlobBackend for GatedBackend {
    async fn put(&self, key: &str, data: Vec<u8>, content_type: &str) -> Result<(), BackendError> {
        if key.starts_with("sources/slow/") {
            let _permit = self
                .gate
                .acquire()
                .await
                .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        }
        self.inner.put(key, data, content_type).await
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, BackendError> {
        self.inner.get(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, BackendError> {
        self.inner.list(prefix).await
    }

    async fn delete(&self, key: &str) -> Result<(), BackendError> {
        self.inner.delete(key).await
    }
}

#[tokio::test]
async fn test_two_sources_do_not_block_each_other() {
    let backend = Arc::new(GatedBackend {
        inner: MemoryBackend::new(),
        gate: Semaphore::new(0),
    });
    let store = store_on(backend.clone());
    let cancel = CancellationToken::new();

    let slow = tokio::spawn({
        let store = store.clone();
        let cancel = cancel.clone();
        async move { store.put_items("slow", vec![item("a"), item("b")], &cancel).await }
    });

    let fast = tokio::time::timeout(Duration::from_secs(5), async {
        store.put_items("fast", vec![item("x"), item("y")], &cancel).await?;
        store.get_items("fast", &cancel).await
    })
    .await
    .expect("fast source must not wait on the slow one")
    .unwrap();
    assert_eq!(fast.len(), 2);
    assert!(!slow.is_finished());

    backend.gate.add_permits(2);
    assert_eq!(slow.await.unwrap().unwrap(), 2);
}
