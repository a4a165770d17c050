use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another instance of the application has locked the database
    #[error("Another instance of feedhaul appears to be running. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_error(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }

        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface
/// as one of these messages.
pub(crate) fn is_lock_error(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Subscriptions
// ============================================================================

/// A configured feed source.
///
/// Exactly one fetch strategy applies: when `script_path` is set the feed is
/// produced by running that script, otherwise `url` is fetched over the network.
/// Script subscriptions carry a `script://<path>` placeholder in `url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub title: String,
    pub url: String,
    /// Homepage of the feed, filled in on first successful fetch
    pub link: Option<String>,
    pub description: Option<String>,
    pub category: String,
    /// Feed logo, filled in on first successful fetch
    pub image_url: Option<String>,
    pub script_path: Option<String>,
    /// Error text from the most recent failed fetch, cleared on success
    pub last_error: Option<String>,
}

/// URL of the subscription that holds articles pulled by FreshRSS sync.
pub const SYNCED_SUBSCRIPTION_URL: &str = "freshrss://synced";

impl Subscription {
    /// The script reference, if this subscription is script-backed.
    pub fn script(&self) -> Option<&str> {
        self.script_path.as_deref().filter(|p| !p.trim().is_empty())
    }

    /// Filled by FreshRSS sync rather than fetched.
    pub fn is_synced(&self) -> bool {
        self.url == SYNCED_SUBSCRIPTION_URL
    }
}

/// Partial edit of a subscription. `None` leaves the field unchanged.
///
/// Setting `script_path` to a non-empty path also rewrites `url` to the
/// `script://<path>` placeholder; setting it to an empty string turns the
/// subscription back into a network feed (pass `url` along with it).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionUpdate {
    pub title: Option<String>,
    pub url: Option<String>,
    pub category: Option<String>,
    pub script_path: Option<String>,
}

impl SubscriptionUpdate {
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.url.is_none()
            && self.category.is_none()
            && self.script_path.is_none()
    }
}

/// Fields needed to create a subscription.
#[derive(Debug, Clone, Default)]
pub struct NewSubscription {
    pub title: String,
    pub url: String,
    pub link: Option<String>,
    pub description: Option<String>,
    pub category: String,
    pub image_url: Option<String>,
    pub script_path: Option<String>,
}

// ============================================================================
// Articles
// ============================================================================

/// An article candidate produced by normalization, not yet persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewArticle {
    pub subscription_id: i64,
    /// Identity within the subscription: the entry's id or a content hash
    pub guid: String,
    pub title: String,
    pub url: String,
    pub image_url: Option<String>,
    pub content: String,
    /// Unix timestamp (seconds)
    pub published_at: i64,
    pub translated_title: Option<String>,
}

/// A persisted article.
///
/// The read/favorite/hidden flags belong to the reader and the rule engine;
/// the fetch pipeline never changes an article after inserting it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Article {
    pub id: i64,
    pub subscription_id: i64,
    pub guid: String,
    pub title: String,
    pub url: String,
    pub image_url: Option<String>,
    pub content: String,
    pub published_at: i64,
    pub translated_title: Option<String>,
    pub is_read: bool,
    pub is_favorite: bool,
    pub is_hidden: bool,
}

/// Flag changes applied to a set of articles. `None` leaves the flag untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArticleFlags {
    pub read: Option<bool>,
    pub favorite: Option<bool>,
    pub hidden: Option<bool>,
}

impl ArticleFlags {
    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.favorite.is_none() && self.hidden.is_none()
    }
}
