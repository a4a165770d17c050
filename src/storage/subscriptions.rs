use anyhow::Result;

use super::schema::Database;
use super::types::{NewSubscription, Subscription, SubscriptionUpdate};

const SUBSCRIPTION_COLUMNS: &str =
    "id, title, url, link, description, category, image_url, script_path, last_error";

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Insert a new subscription and return its ID.
    ///
    /// Fails if another subscription already uses the same URL.
    pub async fn insert_subscription(&self, sub: &NewSubscription) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO subscriptions
                (title, url, link, description, category, image_url, script_path, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(&sub.title)
        .bind(&sub.url)
        .bind(&sub.link)
        .bind(&sub.description)
        .bind(&sub.category)
        .bind(&sub.image_url)
        .bind(&sub.script_path)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// All subscriptions ordered by category then title
    pub async fn get_subscriptions(&self) -> Result<Vec<Subscription>> {
        let subs = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions ORDER BY category, title, id"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(subs)
    }

    pub async fn get_subscription(&self, id: i64) -> Result<Option<Subscription>> {
        let sub = sqlx::query_as::<_, Subscription>(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sub)
    }

    /// Set or clear the last fetch error for a subscription
    pub async fn set_subscription_error(&self, id: i64, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET last_error = ? WHERE id = ?")
            .bind(error)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_subscription_image(&self, id: i64, image_url: &str) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET image_url = ? WHERE id = ?")
            .bind(image_url)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_subscription_link(&self, id: i64, link: &str) -> Result<()> {
        sqlx::query("UPDATE subscriptions SET link = ? WHERE id = ?")
            .bind(link)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Edit a subscription in place. Returns `false` when no row has `id`.
    ///
    /// Changing the source (url or script) also drops the cached link, image
    /// and last error, which belonged to the old source. Fails if the new URL
    /// is already used by another subscription.
    pub async fn update_subscription(&self, id: i64, update: &SubscriptionUpdate) -> Result<bool> {
        let (url, script_path) = match update.script_path.as_deref().map(str::trim) {
            Some("") => (update.url.clone(), Some(None)),
            Some(path) => (
                Some(format!("script://{}", path)),
                Some(Some(path.to_string())),
            ),
            None => (update.url.clone(), None),
        };
        let source_changed = url.is_some() || script_path.is_some();

        let result = sqlx::query(
            r#"
            UPDATE subscriptions SET
                title = COALESCE(?, title),
                url = COALESCE(?, url),
                category = COALESCE(?, category),
                script_path = CASE WHEN ? THEN ? ELSE script_path END,
                link = CASE WHEN ? THEN NULL ELSE link END,
                image_url = CASE WHEN ? THEN NULL ELSE image_url END,
                last_error = CASE WHEN ? THEN NULL ELSE last_error END
            WHERE id = ?
        "#,
        )
        .bind(&update.title)
        .bind(&url)
        .bind(&update.category)
        .bind(script_path.is_some())
        .bind(script_path.flatten())
        .bind(source_changed)
        .bind(source_changed)
        .bind(source_changed)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a subscription and its articles. Returns the number of articles removed.
    pub async fn delete_subscription(&self, id: i64) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let removed = sqlx::query("DELETE FROM articles WHERE subscription_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query("DELETE FROM subscriptions WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(removed)
    }
}
