use anyhow::Result;
use async_trait::async_trait;

use super::schema::Database;
use super::types::{Article, ArticleFlags, NewArticle, NewSubscription, Subscription};

/// Persistence operations used by the fetch pipeline and the rule engine.
///
/// Implementations must be safe to call from several fetch workers at once;
/// workers never mutate subscriptions in memory, only through this trait.
#[async_trait]
pub trait Store: Send + Sync {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>>;

    /// Record (`Some`) or clear (`None`) the last fetch error of a subscription.
    async fn record_fetch_error(&self, subscription_id: i64, message: Option<&str>) -> Result<()>;

    async fn update_cached_image(&self, subscription_id: i64, url: &str) -> Result<()>;

    async fn update_cached_link(&self, subscription_id: i64, url: &str) -> Result<()>;

    /// Persist articles in one bulk write and return the rows that were created.
    async fn save_articles(&self, articles: &[NewArticle]) -> Result<Vec<Article>>;

    async fn query_recent_articles(&self, subscription_id: i64, limit: usize)
        -> Result<Vec<Article>>;

    async fn get_setting(&self, key: &str) -> Result<Option<String>>;

    async fn set_setting(&self, key: &str, value: &str) -> Result<()>;

    async fn create_subscription(&self, sub: &NewSubscription) -> Result<i64>;

    async fn set_article_flags(&self, ids: &[i64], flags: ArticleFlags) -> Result<u64>;
}

#[async_trait]
impl Store for Database {
    async fn list_subscriptions(&self) -> Result<Vec<Subscription>> {
        self.get_subscriptions().await
    }

    async fn record_fetch_error(&self, subscription_id: i64, message: Option<&str>) -> Result<()> {
        self.set_subscription_error(subscription_id, message).await
    }

    async fn update_cached_image(&self, subscription_id: i64, url: &str) -> Result<()> {
        self.set_subscription_image(subscription_id, url).await
    }

    async fn update_cached_link(&self, subscription_id: i64, url: &str) -> Result<()> {
        self.set_subscription_link(subscription_id, url).await
    }

    async fn save_articles(&self, articles: &[NewArticle]) -> Result<Vec<Article>> {
        self.insert_articles(articles).await
    }

    async fn query_recent_articles(
        &self,
        subscription_id: i64,
        limit: usize,
    ) -> Result<Vec<Article>> {
        self.get_recent_articles(subscription_id, limit).await
    }

    async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        Database::get_setting(self, key).await
    }

    async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        Database::set_setting(self, key, value).await
    }

    async fn create_subscription(&self, sub: &NewSubscription) -> Result<i64> {
        self.insert_subscription(sub).await
    }

    async fn set_article_flags(&self, ids: &[i64], flags: ArticleFlags) -> Result<u64> {
        Database::set_article_flags(self, ids, flags).await
    }
}
