use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed, Link};
use feed_rs::parser;

use super::error::FetchError;

/// Format-agnostic view of a parsed RSS/Atom document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFeed {
    pub title: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub image: Option<String>,
    pub entries: Vec<RawEntry>,
}

/// One feed item before normalization.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEntry {
    /// The feed's own id for the entry (`<guid>`, `<id>`), when it has one
    pub id: Option<String>,
    pub title: String,
    pub link: Option<String>,
    /// Structured image (media thumbnail)
    pub image: Option<String>,
    pub enclosures: Vec<Enclosure>,
    pub content: Option<String>,
    pub description: Option<String>,
    pub published: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enclosure {
    pub url: String,
    pub mime: Option<String>,
}

impl Enclosure {
    pub fn is_image(&self) -> bool {
        self.mime
            .as_deref()
            .is_some_and(|m| m.trim().to_ascii_lowercase().starts_with("image/"))
    }
}

/// Parse an RSS/Atom/JSON Feed document.
///
/// Entries without an id keep `id: None`; feed-rs would otherwise fill in a
/// random UUID for link-less entries, which changes on every fetch.
pub fn parse_feed(bytes: &[u8]) -> Result<RawFeed, FetchError> {
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| FetchError::FeedParseFailed(e.to_string()))?;
    Ok(RawFeed::from(feed))
}

impl From<Feed> for RawFeed {
    fn from(feed: Feed) -> Self {
        RawFeed {
            title: feed.title.map(|t| t.content).unwrap_or_default(),
            link: primary_link(&feed.links),
            description: feed.description.map(|d| d.content),
            image: feed.logo.or(feed.icon).map(|i| i.uri),
            entries: feed.entries.into_iter().map(RawEntry::from).collect(),
        }
    }
}

impl From<Entry> for RawEntry {
    fn from(entry: Entry) -> Self {
        let image = entry
            .media
            .iter()
            .flat_map(|m| m.thumbnails.iter())
            .map(|t| t.image.uri.clone())
            .find(|uri| !uri.is_empty());

        // RSS <enclosure> and media:content both land in `media`
        let enclosures = entry
            .media
            .iter()
            .flat_map(|m| m.content.iter())
            .filter_map(|c| {
                c.url.as_ref().map(|url| Enclosure {
                    url: url.to_string(),
                    mime: c.content_type.as_ref().map(|m| m.to_string()),
                })
            })
            .collect();

        let id = Some(entry.id.trim().to_string()).filter(|id| !id.is_empty());

        RawEntry {
            id,
            title: entry.title.map(|t| t.content).unwrap_or_default(),
            link: primary_link(&entry.links),
            image,
            enclosures,
            content: entry.content.and_then(|c| c.body),
            description: entry.summary.map(|s| s.content),
            published: entry.published.or(entry.updated),
        }
    }
}

/// First non-`self` link, falling back to whatever link exists.
fn primary_link(links: &[Link]) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref() != Some("self"))
        .or_else(|| links.first())
        .map(|l| l.href.clone())
}
