//! Item annotation.
//!
//! The pipeline asks a [`Summarizer`] for one summary per item per cycle.
//! Failures are never fatal: the item is stored without a summary.

mod summarizer;

use async_trait::async_trait;

pub use summarizer::{
    AnnotationError, ChatSummarizer, ChatSummarizerConfig, DEFAULT_ENDPOINT, DEFAULT_MAX_TOKENS,
    DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};

#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Returns a short summary of `text`.
    async fn summarize(&self, text: &str) -> Result<String, AnnotationError>;
}
