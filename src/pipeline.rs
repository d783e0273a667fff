//! One ingestion cycle: fetch and parse, best-effort annotate, persist.
//!
//! The steps are not transactional. A fetch failure aborts the cycle before
//! anything is written; an annotation failure only leaves that item without
//! a summary; a persist failure aborts the cycle after whatever writes
//! already landed.

use crate::cache::{source_key, ItemCache};
use crate::content::Summarizer;
use crate::feed::{SourceAdapter, SourceError};
use crate::item::{Item, Source};
use crate::storage::{ItemStore, StoreError};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("Failed to fetch source: {0}")]
    Fetch(#[from] SourceError),
    #[error("Failed to store items: {0}")]
    Persist(#[from] StoreError),
}

impl CycleError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CycleError::Persist(e) if e.is_cancelled())
    }
}

/// What a successful cycle did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub annotated: usize,
    pub annotation_failures: usize,
    pub stored: usize,
}

/// Wires a source adapter, an optional summarizer and the item store
/// together. Cheap to clone; every scheduler job shares one instance.
#[derive(Clone)]
pub struct Pipeline {
    adapter: Arc<dyn SourceAdapter>,
    summarizer: Option<Arc<dyn Summarizer>>,
    store: ItemStore,
    cache: Arc<ItemCache>,
}

impl Pipeline {
    pub fn new(
        adapter: Arc<dyn SourceAdapter>,
        summarizer: Option<Arc<dyn Summarizer>>,
        store: ItemStore,
    ) -> Self {
        let cache = Arc::clone(store.cache());
        Self {
            adapter,
            summarizer,
            store,
            cache,
        }
    }

    pub fn store(&self) -> &ItemStore {
        &self.store
    }

    /// Runs one fetch, annotate, persist cycle for `source`.
    pub async fn run_cycle(
        &self,
        source: &Source,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleError> {
        tracing::info!(source = %source.name, url = %source.url, "Starting cycle");

        let mut items = self.fetch(source).await?;
        let fetched = items.len();

        let (annotated, annotation_failures) = self.annotate(source, &mut items).await;

        let stored = self.store.put_items(&source.name, items, cancel).await?;

        let report = CycleReport {
            fetched,
            annotated,
            annotation_failures,
            stored,
        };
        tracing::info!(
            source = %source.name,
            fetched,
            annotated,
            annotation_failures,
            stored,
            "Cycle complete"
        );
        Ok(report)
    }

    /// Fetches the source through the cache keyed on its URL.
    pub async fn fetch(&self, source: &Source) -> Result<Vec<Item>, SourceError> {
        let key = source_key(&source.url);
        if let Some(cached) = self.cache.get(&key) {
            tracing::debug!(source = %source.name, "Cache hit for feed");
            return Ok(cached.as_ref().clone());
        }

        let items = self.adapter.fetch(source).await?;
        self.cache.insert(key, Arc::new(items.clone()));
        Ok(items)
    }

    /// Summarizes each item in place. Returns (annotated, failed).
    async fn annotate(&self, source: &Source, items: &mut [Item]) -> (usize, usize) {
        let Some(summarizer) = &self.summarizer else {
            return (0, 0);
        };

        let mut annotated = 0;
        let mut failed = 0;
        for (idx, item) in items.iter_mut().enumerate() {
            match summarizer.summarize(item.summary_input()).await {
                Ok(summary) => {
                    item.summary = Some(summary);
                    annotated += 1;
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!(
                        source = %source.name,
                        item_index = idx,
                        item = %item.identifier(),
                        error = %e,
                        "Failed to summarize item, keeping it unannotated"
                    );
                }
            }
        }
        (annotated, failed)
    }

    /// The persisted items of a source, cache first.
    pub async fn stored_items(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Arc<Vec<Item>>, StoreError> {
        self.store.get_items(name, cancel).await
    }

    /// Stored items with each summary folded into the item's content.
    pub async fn formatted_items(
        &self,
        name: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Item>, StoreError> {
        let items = self.stored_items(name, cancel).await?;
        Ok(items.iter().cloned().map(format_item).collect())
    }
}

/// Prepends the summary to the body, separated by a rule.
pub fn format_item(mut item: Item) -> Item {
    if let Some(summary) = item.summary.as_deref().filter(|s| !s.is_empty()) {
        let body = item.content.as_deref().unwrap_or(&item.description);
        item.content = Some(format!("**Summary**: {summary}\n\n---\n\n{body}"));
    }
    item
}
