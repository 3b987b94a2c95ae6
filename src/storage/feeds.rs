use super::schema::Database;
use super::types::{Feed, StorageError};
use crate::sched::health::HealthUpdate;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Create a feed, or return the existing one for the same fetch URL.
    pub async fn create_feed(
        &self,
        fetch_url: &str,
        title: Option<&str>,
        site_url: Option<&str>,
        interval_secs: i64,
    ) -> Result<Feed, StorageError> {
        let id: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (fetch_url, title, url, fetch_interval_secs)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(fetch_url) DO UPDATE SET fetch_url = excluded.fetch_url
            RETURNING id
        "#,
        )
        .bind(fetch_url)
        .bind(title)
        .bind(site_url)
        .bind(interval_secs)
        .fetch_one(&self.pool)
        .await?;

        let feed = self.find_feed(id.0).await?.ok_or_else(|| {
            StorageError::Database(sqlx::Error::RowNotFound)
        })?;
        Ok(feed)
    }

    pub async fn find_feed(&self, feed_id: i64) -> Result<Option<Feed>, StorageError> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn find_feed_by_fetch_url(
        &self,
        fetch_url: &str,
    ) -> Result<Option<Feed>, StorageError> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE fetch_url = ?")
            .bind(fetch_url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    /// Update feed title and site URL. Only non-blank parsed values reach
    /// this point; a provider that stops sending a title must not blank out
    /// the stored one.
    pub async fn update_feed_metadata(
        &self,
        feed_id: i64,
        title: Option<&str>,
        site_url: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                title = COALESCE(?, title),
                url = COALESCE(?, url)
            WHERE id = ?
        "#,
        )
        .bind(title)
        .bind(site_url)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Store the cache validators captured from the last response.
    pub async fn update_feed_validators(
        &self,
        feed_id: i64,
        etag: Option<&str>,
        last_modified: Option<&str>,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE feeds SET etag = ?, last_modified = ? WHERE id = ?")
            .bind(etag)
            .bind(last_modified)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Point the feed at a new polling URL (autodiscovery result).
    pub async fn update_fetch_url(
        &self,
        feed_id: i64,
        fetch_url: &str,
    ) -> Result<(), StorageError> {
        // Validators belong to the old URL; drop them with it.
        sqlx::query(
            "UPDATE feeds SET fetch_url = ?, etag = NULL, last_modified = NULL WHERE id = ?",
        )
        .bind(fetch_url)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Apply a health-machine decision: interval, failure streak,
    /// availability, and the next scheduled run.
    pub async fn apply_health(
        &self,
        feed_id: i64,
        update: &HealthUpdate,
    ) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE feeds SET
                fetch_interval_secs = ?,
                last_fetched = COALESCE(?, last_fetched),
                failing_since = ?,
                available = ?,
                next_fetch_at = ?
            WHERE id = ?
        "#,
        )
        .bind(update.fetch_interval_secs)
        .bind(update.last_fetched)
        .bind(update.failing_since)
        .bind(update.available)
        .bind(update.next_fetch_at)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_next_fetch_at(
        &self,
        feed_id: i64,
        next_fetch_at: i64,
    ) -> Result<(), StorageError> {
        sqlx::query("UPDATE feeds SET next_fetch_at = ? WHERE id = ?")
            .bind(next_fetch_at)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Available feeds whose scheduled run is due.
    pub async fn due_feeds(&self, now: i64, limit: i64) -> Result<Vec<Feed>, StorageError> {
        let feeds = sqlx::query_as::<_, Feed>(
            r#"
            SELECT * FROM feeds
            WHERE available = 1 AND next_fetch_at IS NOT NULL AND next_fetch_at <= ?
            ORDER BY next_fetch_at
            LIMIT ?
        "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Available feeds with no schedule at all (fresh subscriptions, or
    /// rows recovered after a crash mid-cycle).
    pub async fn unscheduled_feeds(&self, limit: i64) -> Result<Vec<Feed>, StorageError> {
        let feeds = sqlx::query_as::<_, Feed>(
            "SELECT * FROM feeds WHERE available = 1 AND next_fetch_at IS NULL LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }

    /// Delete a feed with its entries, tombstones and subscriptions
    /// (cascaded). Used when the last subscriber leaves.
    pub async fn delete_feed(&self, feed_id: i64) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM feeds WHERE id = ?")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Reset a feed's failure state after an administrative re-subscription.
    pub async fn reset_feed_health(&self, feed_id: i64) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE feeds SET failing_since = NULL, available = 1, next_fetch_at = NULL WHERE id = ?",
        )
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_create_feed_is_idempotent() {
        let db = test_db().await;
        let a = db
            .create_feed("http://example.com/rss", Some("Example"), None, 3600)
            .await
            .unwrap();
        let b = db
            .create_feed("http://example.com/rss", None, None, 3600)
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(b.title.as_deref(), Some("Example"));
        assert!(b.available);
        assert_eq!(b.fetch_interval_secs, 3600);
    }

    #[tokio::test]
    async fn test_metadata_update_keeps_existing_on_none() {
        let db = test_db().await;
        let feed = db
            .create_feed("http://example.com/rss", Some("Original"), Some("http://example.com"), 3600)
            .await
            .unwrap();

        db.update_feed_metadata(feed.id, None, None).await.unwrap();
        let feed = db.find_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(feed.title.as_deref(), Some("Original"));
        assert_eq!(feed.url.as_deref(), Some("http://example.com"));

        db.update_feed_metadata(feed.id, Some("Renamed"), None)
            .await
            .unwrap();
        let feed = db.find_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(feed.title.as_deref(), Some("Renamed"));
        assert_eq!(feed.url.as_deref(), Some("http://example.com"));
    }

    #[tokio::test]
    async fn test_update_fetch_url_drops_validators() {
        let db = test_db().await;
        let feed = db
            .create_feed("http://example.com/rss", None, None, 3600)
            .await
            .unwrap();
        db.update_feed_validators(feed.id, Some("\"etag\""), Some("Mon, 01 Jan 2024 00:00:00 GMT"))
            .await
            .unwrap();

        db.update_fetch_url(feed.id, "http://example.com/atom.xml")
            .await
            .unwrap();

        let feed = db.find_feed(feed.id).await.unwrap().unwrap();
        assert_eq!(feed.fetch_url, "http://example.com/atom.xml");
        assert!(feed.etag.is_none());
        assert!(feed.last_modified.is_none());
    }

    #[tokio::test]
    async fn test_due_and_unscheduled_queries() {
        let db = test_db().await;
        let due = db
            .create_feed("http://a.example/rss", None, None, 3600)
            .await
            .unwrap();
        let later = db
            .create_feed("http://b.example/rss", None, None, 3600)
            .await
            .unwrap();
        let unscheduled = db
            .create_feed("http://c.example/rss", None, None, 3600)
            .await
            .unwrap();

        db.set_next_fetch_at(due.id, 1_000).await.unwrap();
        db.set_next_fetch_at(later.id, 2_000).await.unwrap();

        let due_now = db.due_feeds(1_500, 10).await.unwrap();
        assert_eq!(due_now.len(), 1);
        assert_eq!(due_now[0].id, due.id);

        let missing = db.unscheduled_feeds(10).await.unwrap();
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].id, unscheduled.id);
    }
}
