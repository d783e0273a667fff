//! In-memory read-through cache shared by every pipeline.
//!
//! Two key spaces live in the same map: the raw source URL (caching the
//! fetched and parsed item list) and `items:<name>` (caching the persisted
//! item list of a source). Entries expire after a configured TTL and the
//! least recently used entry is evicted once `max_entries` is exceeded.

use crate::item::Item;
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Default number of cached lists.
pub const DEFAULT_MAX_ENTRIES: usize = 100;
/// Default entry lifetime (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_entries: NonZeroUsize,
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: NonZeroUsize::new(DEFAULT_MAX_ENTRIES).unwrap_or(NonZeroUsize::MIN),
            ttl: DEFAULT_TTL,
        }
    }
}

/// Key of the cached fetch result for a source URL.
pub fn source_key(url: &str) -> String {
    url.to_string()
}

/// Key of the cached persisted item list for a source name.
pub fn items_key(name: &str) -> String {
    format!("items:{name}")
}

struct CacheEntry {
    items: Arc<Vec<Item>>,
    inserted_at: Instant,
}

/// Counters for cache activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

/// Thread-safe LRU cache with time-based expiry.
///
/// The lock is only held for the map operation itself, never across an
/// await, so callers in different tasks never wait on each other's I/O.
pub struct ItemCache {
    entries: Mutex<LruCache<String, CacheEntry>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl ItemCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(config.max_entries)),
            ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, CacheEntry>> {
        // A panic while holding the lock cannot leave the map half-updated
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Returns the cached list if present and younger than the TTL.
    ///
    /// Expired entries are dropped on lookup.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<Item>>> {
        let mut entries = self.lock();
        let fresh = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                Some(Arc::clone(&entry.items))
            }
            Some(_) => {
                entries.pop(key);
                tracing::debug!(key = %key, "Cache entry expired");
                None
            }
            None => None,
        };
        drop(entries);

        if fresh.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        fresh
    }

    /// Stores `items` under `key`, replacing any previous value.
    pub fn insert(&self, key: String, items: Arc<Vec<Item>>) {
        let entry = CacheEntry {
            items,
            inserted_at: Instant::now(),
        };
        let evicted = self.lock().push(key.clone(), entry);
        // push returns the old value on replace, or the LRU victim on overflow
        if let Some((old_key, _)) = evicted {
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(evicted = %old_key, "Cache full, evicted least recently used entry");
            }
        }
    }

    pub fn invalidate(&self, key: &str) {
        self.lock().pop(key);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for ItemCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}
