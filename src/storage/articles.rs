use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Article, ArticleFlags, NewArticle};

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: usize = 2000;

const ARTICLE_COLUMNS: &str = "id, subscription_id, guid, title, url, image_url, content, \
     published_at, translated_title, is_read, is_favorite, is_hidden";

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Bulk insert articles, returning the rows that were actually written.
    ///
    /// Articles whose `(subscription_id, guid)` already exists are skipped, so the
    /// returned set is exactly the newly created rows with their generated IDs.
    /// Existing rows are never touched, which keeps reader state intact.
    ///
    /// Batch size of 50 keeps us well under SQLite's 999 parameter limit
    /// (9 columns * 50 = 450).
    pub async fn insert_articles(&self, articles: &[NewArticle]) -> Result<Vec<Article>> {
        if articles.is_empty() {
            return Ok(Vec::new());
        }

        const BATCH_SIZE: usize = 50;
        let now = chrono::Utc::now().timestamp();
        let mut inserted = Vec::with_capacity(articles.len());
        let mut tx = self.pool.begin().await?;

        for chunk in articles.chunks(BATCH_SIZE) {
            let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "INSERT OR IGNORE INTO articles (subscription_id, guid, title, url, \
                 image_url, content, published_at, translated_title, fetched_at) ",
            );

            builder.push_values(chunk, |mut b, article| {
                b.push_bind(article.subscription_id)
                    .push_bind(&article.guid)
                    .push_bind(&article.title)
                    .push_bind(&article.url)
                    .push_bind(&article.image_url)
                    .push_bind(&article.content)
                    .push_bind(article.published_at)
                    .push_bind(&article.translated_title)
                    .push_bind(now);
            });

            builder.push(" RETURNING ");
            builder.push(ARTICLE_COLUMNS);

            let rows: Vec<Article> = builder.build_query_as().fetch_all(&mut *tx).await?;
            inserted.extend(rows);
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// The most recent articles of a subscription, newest first.
    ///
    /// `limit` is capped at 2000.
    pub async fn get_recent_articles(
        &self,
        subscription_id: i64,
        limit: usize,
    ) -> Result<Vec<Article>> {
        let limit = limit.min(MAX_ARTICLES) as i64;
        let articles = sqlx::query_as::<_, Article>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles \
             WHERE subscription_id = ? \
             ORDER BY published_at DESC, id DESC \
             LIMIT ?"
        ))
        .bind(subscription_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(articles)
    }

    /// Apply flag changes to the given articles. Returns the number of rows updated.
    pub async fn set_article_flags(&self, ids: &[i64], flags: ArticleFlags) -> Result<u64> {
        if ids.is_empty() || flags.is_empty() {
            return Ok(0);
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new("UPDATE articles SET is_read = COALESCE(");
        builder.push_bind(flags.read);
        builder.push(", is_read), is_favorite = COALESCE(");
        builder.push_bind(flags.favorite);
        builder.push(", is_favorite), is_hidden = COALESCE(");
        builder.push_bind(flags.hidden);
        builder.push(", is_hidden) WHERE id IN (");

        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
