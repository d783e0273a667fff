use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::borrow::Cow;

/// A configured content origin.
///
/// The name is the source's identity: it keys the job registry, the storage
/// prefix and the `items:<name>` cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub url: String,
}

impl Source {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }
}

/// A normalized unit of content produced by a source adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Item {
    /// Provider-supplied identifier (RSS guid, Atom id), if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guid: Option<String>,
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub description: String,
    /// Full body, when the feed carries one separately from the description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Item {
    /// Stable identifier used to derive the storage key.
    ///
    /// Falls back from the provider guid to the link, then to the title.
    /// An item with none of those is identified by a SHA-256 of its body and
    /// publication time.
    pub fn identifier(&self) -> Cow<'_, str> {
        let named = self
            .guid
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty())
            .or_else(|| Some(self.link.trim()).filter(|l| !l.is_empty()))
            .or_else(|| Some(self.title.trim()).filter(|t| !t.is_empty()));

        match named {
            Some(id) => Cow::Borrowed(id),
            None => Cow::Owned(self.content_digest()),
        }
    }

    fn content_digest(&self) -> String {
        let input = format!(
            "{}|{}|{}",
            self.description,
            self.content.as_deref().unwrap_or(""),
            self.published.map(|p| p.to_rfc3339()).unwrap_or_default()
        );
        format!("{:x}", Sha256::digest(input.as_bytes()))
    }

    /// Text handed to the summarizer: the full content when present,
    /// otherwise the description.
    pub fn summary_input(&self) -> &str {
        self.content
            .as_deref()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or(&self.description)
    }
}
