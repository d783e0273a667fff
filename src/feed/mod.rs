//! Source adapters: turning a configured [`Source`] into a list of [`Item`]s.
//!
//! - [`SourceAdapter`] - the seam the pipeline fetches through
//! - [`RssAdapter`] - HTTP fetch + RSS/Atom/JSON Feed parsing via `feed-rs`

mod fetcher;
mod parser;

use crate::item::{Item, Source};
use async_trait::async_trait;

pub use fetcher::{RssAdapter, SourceError};
pub use parser::parse_feed;

/// Fetches and normalizes the current items of a source.
///
/// Implementations return items in feed order. Each call is one
/// fetch-and-parse; callers own retries and caching.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch(&self, source: &Source) -> Result<Vec<Item>, SourceError>;
}
