use crate::item::Item;
use feed_rs::parser;

/// Parses RSS, Atom or JSON Feed bytes into items, preserving feed order.
pub fn parse_feed(bytes: &[u8]) -> Result<Vec<Item>, parser::ParseFeedError> {
    let feed = parser::parse(bytes)?;

    let items = feed
        .entries
        .into_iter()
        .map(|entry| {
            let link = entry
                .links
                .first()
                .map(|l| l.href.clone())
                .unwrap_or_default();
            let published = entry.published.or(entry.updated);
            let description = entry.summary.map(|s| s.content).unwrap_or_default();
            let content = entry.content.and_then(|c| c.body);
            let title = entry
                .title
                .map(|t| t.content)
                .unwrap_or_else(|| "Untitled".to_string());

            let guid = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());

            Item {
                guid,
                title,
                link,
                description,
                content,
                published,
                summary: None,
            }
        })
        .collect();

    Ok(items)
}
