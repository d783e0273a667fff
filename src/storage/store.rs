use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::backend::BlobBackend;
use super::key::{item_object_path, items_prefix, ItemKey};
use super::types::StoreError;
use crate::cache::{items_key, ItemCache};
use crate::item::Item;
use crate::retry::{retry, RetryPolicy};

const CONTENT_TYPE_JSON: &str = "application/json";

/// Default number of backend calls in flight per fan-out.
pub const DEFAULT_CONCURRENCY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Upper bound on concurrent backend calls within one put/get.
    pub concurrency: usize,
    /// Retry policy applied to every individual backend call.
    pub retry: RetryPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Per-item persistence and retrieval on top of a [`BlobBackend`].
///
/// Every item is one object at `sources/<name>/items/<ItemKey>.json`. Puts and
/// gets fan out one backend call per item, run up to `concurrency` at a time,
/// and join on all of them before reporting. Nothing is rolled back when a
/// subset fails.
#[derive(Clone)]
pub struct ItemStore {
    backend: Arc<dyn BlobBackend>,
    cache: Arc<ItemCache>,
    config: StoreConfig,
}

impl ItemStore {
    pub fn new(backend: Arc<dyn BlobBackend>, cache: Arc<ItemCache>, config: StoreConfig) -> Self {
        Self {
            backend,
            cache,
            config: StoreConfig {
                concurrency: config.concurrency.max(1),
                ..config
            },
        }
    }

    pub fn cache(&self) -> &Arc<ItemCache> {
        &self.cache
    }

    /// Replaces the stored item set of `source` with `items`.
    ///
    /// Items that map to the same [`ItemKey`] are collapsed first: the last
    /// one in input order wins and takes the slot of the first. Every
    /// remaining item is written concurrently, then objects under the
    /// source's prefix that are not part of the new set are removed. On
    /// success the `items:<name>` cache entry is set to the collapsed list and
    /// its length is returned.
    ///
    /// # Errors
    ///
    /// If any write fails, returns the first failure in input order wrapped
    /// in [`StoreError::Partial`] once all writes have finished. Writes that
    /// succeeded stay in place and the cache is left untouched.
    pub async fn put_items(
        &self,
        source: &str,
        items: Vec<Item>,
        cancel: &CancellationToken,
    ) -> Result<usize, StoreError> {
        let received = items.len();
        let items = dedupe_by_key(source, items);
        let total = items.len();
        if total < received {
            tracing::debug!(
                source = %source,
                received,
                unique = total,
                "Collapsed items sharing a storage key"
            );
        }
        tracing::info!(source = %source, item_count = total, "Storing items");

        let mut encoded = Vec::with_capacity(total);
        for (path, item) in &items {
            let data = serde_json::to_vec(item).map_err(|e| StoreError::Encode {
                key: path.clone(),
                source: e,
            })?;
            encoded.push((path.clone(), data));
        }

        let (written, items): (HashSet<String>, Vec<Item>) = items.into_iter().unzip();

        let outcomes: Vec<(usize, Result<(), StoreError>)> = stream::iter(encoded.into_iter().enumerate())
            .map(|(idx, (path, data))| {
                let backend = Arc::clone(&self.backend);
                let policy = self.config.retry;
                let cancel = cancel.clone();
                async move {
                    let size = data.len();
                    let result = retry(policy, &cancel, "put_item", || {
                        backend.put(&path, data.clone(), CONTENT_TYPE_JSON)
                    })
                    .await
                    .map_err(|e| StoreError::Backend {
                        key: path.clone(),
                        source: e,
                    });

                    match &result {
                        Ok(()) => tracing::debug!(object = %path, size_bytes = size, "Stored item"),
                        Err(e) => tracing::error!(object = %path, error = %e, "Failed to store item"),
                    }
                    (idx, result)
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        first_failure("put", total, outcomes)?;

        self.prune_stale(source, &written, cancel).await;

        self.cache.insert(items_key(source), Arc::new(items));
        tracing::info!(source = %source, item_count = total, "Stored all items");
        Ok(total)
    }

    /// Returns the stored items of `source`, from cache when fresh.
    ///
    /// On a miss, lists the source's prefix and reads every object
    /// concurrently. Order of the returned items is unspecified.
    ///
    /// # Errors
    ///
    /// Fails if listing fails, or with the first failed read or decode once
    /// all reads have finished. A source with nothing stored yields an empty
    /// list, not an error.
    pub async fn get_items(
        &self,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Item>>, StoreError> {
        let cache_key = items_key(source);
        if let Some(items) = self.cache.get(&cache_key) {
            tracing::debug!(source = %source, "Cache hit for stored items");
            return Ok(items);
        }

        let prefix = items_prefix(source);
        let keys = retry(self.config.retry, cancel, "list_items", || self.backend.list(&prefix))
            .await
            .map_err(|e| StoreError::Backend {
                key: prefix.clone(),
                source: e,
            })?;

        tracing::debug!(source = %source, object_count = keys.len(), "Reading stored items");
        let total = keys.len();

        let outcomes: Vec<(usize, Result<Item, StoreError>)> = stream::iter(keys.into_iter().enumerate())
            .map(|(idx, key)| {
                let backend = Arc::clone(&self.backend);
                let policy = self.config.retry;
                let cancel = cancel.clone();
                async move {
                    let result = read_item(backend.as_ref(), policy, &cancel, &key).await;
                    if let Err(e) = &result {
                        tracing::error!(object = %key, error = %e, "Failed to read stored item");
                    }
                    (idx, result)
                }
            })
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        let items = Arc::new(first_failure("get", total, outcomes)?);
        self.cache.insert(cache_key, Arc::clone(&items));
        Ok(items)
    }

    /// Deletes objects of a previous cycle that the new set no longer has.
    ///
    /// Best effort: the new set is already durable, so failures are logged
    /// and leave stale objects behind for the next cycle to retry.
    async fn prune_stale(&self, source: &str, keep: &HashSet<String>, cancel: &CancellationToken) {
        let prefix = items_prefix(source);
        let existing = match retry(self.config.retry, cancel, "list_items", || {
            self.backend.list(&prefix)
        })
        .await
        {
            Ok(keys) => keys,
            Err(e) => {
                tracing::warn!(source = %source, error = %e, "Failed to list items for pruning");
                return;
            }
        };

        let stale: Vec<String> = existing.into_iter().filter(|k| !keep.contains(k)).collect();
        if stale.is_empty() {
            return;
        }

        let stale_count = stale.len();
        let removed = stream::iter(stale)
            .map(|key: String| {
                let backend = Arc::clone(&self.backend);
                async move {
                    match backend.delete(&key).await {
                        Ok(()) => true,
                        Err(e) => {
                            tracing::warn!(object = %key, error = %e, "Failed to delete stale item");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.config.concurrency)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        tracing::info!(source = %source, removed, stale = stale_count, "Pruned stale items");
    }
}

/// Pairs each item with its object path, keeping one item per path.
fn dedupe_by_key(source: &str, items: Vec<Item>) -> Vec<(String, Item)> {
    let mut slots: HashMap<String, usize> = HashMap::with_capacity(items.len());
    let mut unique: Vec<(String, Item)> = Vec::with_capacity(items.len());

    for item in items {
        let path = item_object_path(source, &ItemKey::from_identifier(&item.identifier()));
        match slots.get(&path) {
            Some(&slot) => unique[slot].1 = item,
            None => {
                slots.insert(path.clone(), unique.len());
                unique.push((path, item));
            }
        }
    }
    unique
}

async fn read_item(
    backend: &dyn BlobBackend,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    key: &str,
) -> Result<Item, StoreError> {
    let data = retry(policy, cancel, "get_item", || backend.get(key))
        .await
        .map_err(|e| StoreError::Backend {
            key: key.to_string(),
            source: e,
        })?;

    serde_json::from_slice(&data).map_err(|e| StoreError::Decode {
        key: key.to_string(),
        source: e,
    })
}

/// Collapses fan-out outcomes into either every value or the earliest
/// failure (by input index) together with the failure count.
fn first_failure<T>(
    operation: &'static str,
    total: usize,
    mut outcomes: Vec<(usize, Result<T, StoreError>)>,
) -> Result<Vec<T>, StoreError> {
    outcomes.sort_by_key(|(idx, _)| *idx);

    let mut values = Vec::with_capacity(outcomes.len());
    let mut first = None;
    let mut failed = 0;

    for (_, outcome) in outcomes {
        match outcome {
            Ok(v) => values.push(v),
            Err(e) => {
                failed += 1;
                first.get_or_insert(e);
            }
        }
    }

    match first {
        None => Ok(values),
        Some(first) => Err(StoreError::Partial {
            operation,
            failed,
            total,
            first: Box::new(first),
        }),
    }
}
