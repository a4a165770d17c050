//! FreshRSS synchronization over the Google Reader compatible API.
//!
//! [`FreshRssClient`] speaks the wire protocol; [`SyncService`] imports the
//! server's subscriptions and unread articles through the [`Store`].
//!
//! Unread articles land in a single local subscription with the URL
//! [`SYNCED_SUBSCRIPTION_URL`](crate::storage::SYNCED_SUBSCRIPTION_URL), which
//! the batch fetcher skips.
//!
//! [`Store`]: crate::storage::Store

mod client;
mod service;

use std::time::Duration;
use thiserror::Error;

pub use client::{
    Body, FreshRssClient, Link, RemoteArticle, RemoteCategory, RemoteSubscription, Session,
};
pub use service::{SyncReport, SyncService, SYNCED_CATEGORY, SYNCED_TITLE, UNREAD_LIMIT};

/// Per-request ceiling for FreshRSS calls.
const SYNC_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("FreshRSS request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("FreshRSS returned status {0}")]
    HttpStatus(u16),
    #[error("FreshRSS request timed out")]
    Timeout,
    #[error("FreshRSS login failed: {0}")]
    Login(String),
    #[error("Invalid FreshRSS URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unexpected FreshRSS response: {0}")]
    InvalidResponse(String),
    #[error("Failed to persist: {0}")]
    Store(anyhow::Error),
}
