use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;

use super::client::{FreshRssClient, RemoteArticle, RemoteSubscription};
use super::SyncError;
use crate::storage::{NewArticle, NewSubscription, Store, SYNCED_SUBSCRIPTION_URL};
use crate::util::{clean_html, first_image_src};

/// Unread items pulled per sync.
pub const UNREAD_LIMIT: usize = 100;

pub const SYNCED_TITLE: &str = "FreshRSS Synced Articles";
pub const SYNCED_CATEGORY: &str = "FreshRSS";

/// Counts for one sync run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Server subscriptions created locally
    pub subscriptions_added: usize,
    /// Unread items returned by the server
    pub articles_fetched: usize,
    /// Items that were new locally
    pub articles_saved: usize,
    /// Items marked read on the server afterwards
    pub marked_read: usize,
}

/// Pulls subscriptions and unread articles from FreshRSS into the store.
pub struct SyncService {
    client: FreshRssClient,
    store: Arc<dyn Store>,
    mark_read: bool,
}

impl SyncService {
    pub fn new(client: FreshRssClient, store: Arc<dyn Store>) -> Self {
        Self {
            client,
            store,
            mark_read: false,
        }
    }

    /// Mark pulled items read on the server once they are stored.
    pub fn with_mark_read(mut self, mark_read: bool) -> Self {
        self.mark_read = mark_read;
        self
    }

    /// Run one sync.
    ///
    /// Server subscriptions whose URL is not known locally are created, with
    /// the first server label as category. A subscription that fails to
    /// insert is logged and skipped. Unread items are stored under the synced
    /// subscription, created on first use.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let session = self.client.login().await?;
        let mut report = SyncReport::default();

        let local = self
            .store
            .list_subscriptions()
            .await
            .map_err(SyncError::Store)?;
        let mut known: HashSet<String> = local.iter().map(|s| s.url.clone()).collect();

        for remote in self.client.subscriptions(&session).await? {
            let url = remote.url.trim();
            if url.is_empty() || known.contains(url) {
                continue;
            }

            match self.store.create_subscription(&imported(&remote)).await {
                Ok(id) => {
                    tracing::info!(
                        subscription_id = id,
                        url = %url,
                        "Imported FreshRSS subscription"
                    );
                    known.insert(url.to_string());
                    report.subscriptions_added += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        url = %url,
                        error = %e,
                        "Failed to import FreshRSS subscription"
                    );
                }
            }
        }

        let items = self.client.unread_articles(&session, UNREAD_LIMIT).await?;
        report.articles_fetched = items.len();
        if items.is_empty() {
            tracing::info!(added = report.subscriptions_added, "FreshRSS sync finished");
            return Ok(report);
        }

        let target = match local.iter().find(|s| s.is_synced()) {
            Some(sub) => sub.id,
            None => self
                .store
                .create_subscription(&NewSubscription {
                    title: SYNCED_TITLE.to_string(),
                    url: SYNCED_SUBSCRIPTION_URL.to_string(),
                    category: SYNCED_CATEGORY.to_string(),
                    ..Default::default()
                })
                .await
                .map_err(SyncError::Store)?,
        };

        let now = Utc::now().timestamp();
        let articles: Vec<NewArticle> = items
            .iter()
            .map(|item| to_article(target, item, now))
            .collect();
        let saved = self
            .store
            .save_articles(&articles)
            .await
            .map_err(SyncError::Store)?;
        report.articles_saved = saved.len();

        if self.mark_read {
            let ids: Vec<String> = items.into_iter().map(|item| item.id).collect();
            self.client.mark_as_read(&session, &ids).await?;
            report.marked_read = ids.len();
        }

        tracing::info!(
            added = report.subscriptions_added,
            fetched = report.articles_fetched,
            saved = report.articles_saved,
            "FreshRSS sync finished"
        );
        Ok(report)
    }
}

fn imported(remote: &RemoteSubscription) -> NewSubscription {
    let title = match remote.title.trim() {
        "" => remote.url.trim(),
        title => title,
    };
    NewSubscription {
        title: title.to_string(),
        url: remote.url.trim().to_string(),
        category: remote
            .categories
            .first()
            .map(|c| c.label.clone())
            .unwrap_or_default(),
        ..Default::default()
    }
}

/// The server's item id is the article's identity.
fn to_article(subscription_id: i64, item: &RemoteArticle, now: i64) -> NewArticle {
    NewArticle {
        subscription_id,
        guid: item.id.clone(),
        title: item.title.clone(),
        url: item.link().unwrap_or_default().to_string(),
        image_url: first_image_src(item.body()).map(str::to_string),
        content: clean_html(item.body()),
        published_at: item.published.filter(|p| *p > 0).unwrap_or(now),
        translated_title: None,
    }
}
