use anyhow::Result;

use super::schema::Database;

impl Database {
    // ========================================================================
    // Settings Operations
    // ========================================================================

    /// Get a single setting value by key, or `None` if not set.
    pub async fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    /// Set a setting value (UPSERT).
    pub async fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Set a value only when the key has no value yet.
    ///
    /// Returns `true` if the value was written.
    pub async fn seed_setting(&self, key: &str, value: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO settings (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
