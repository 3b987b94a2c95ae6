use super::schema::Database;
use super::types::{StorageError, Subscription};

impl Database {
    // ========================================================================
    // Subscription Operations
    // ========================================================================

    /// Create a subscription with its unread counter initialized to the
    /// feed's current entry count — every existing entry starts unread for
    /// a brand-new subscriber. Returns false when the subscription already
    /// existed.
    pub async fn create_subscription(
        &self,
        user_id: i64,
        feed_id: i64,
        folder: Option<&str>,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, feed_id, folder, unread_entries)
            VALUES (?, ?, ?, (SELECT COUNT(*) FROM entries WHERE feed_id = ?))
            ON CONFLICT(user_id, feed_id) DO NOTHING
        "#,
        )
        .bind(user_id)
        .bind(feed_id)
        .bind(folder)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Remove a subscription row. Returns false when none existed.
    pub async fn delete_subscription(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<bool, StorageError> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE user_id = ? AND feed_id = ?")
            .bind(user_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_subscription(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<Option<Subscription>, StorageError> {
        let sub = sqlx::query_as::<_, Subscription>(
            "SELECT * FROM subscriptions WHERE user_id = ? AND feed_id = ?",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sub)
    }

    pub async fn subscriber_count(&self, feed_id: i64) -> Result<i64, StorageError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM subscriptions WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }

    // ========================================================================
    // Unread-Count Cache
    // ========================================================================

    /// Bump every subscriber of a feed by `by`. A single commutative add
    /// per row — concurrent bumps from racing cycles and user actions
    /// combine without losing updates.
    pub async fn increment_unread_for_feed(
        &self,
        feed_id: i64,
        by: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE subscriptions SET unread_entries = unread_entries + ? WHERE feed_id = ?",
        )
        .bind(by)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Adjust one subscriber's counter by a (possibly negative) delta.
    pub async fn adjust_unread(
        &self,
        user_id: i64,
        feed_id: i64,
        delta: i64,
    ) -> Result<(), StorageError> {
        sqlx::query(
            "UPDATE subscriptions SET unread_entries = unread_entries + ? WHERE user_id = ? AND feed_id = ?",
        )
        .bind(delta)
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Read a subscriber's unread count, clamped at zero.
    ///
    /// A negative cached value means racing decrements overshot; the clamp
    /// keeps it from rendering, and the caller should schedule a
    /// recalculation.
    pub async fn unread_count(&self, user_id: i64, feed_id: i64) -> Result<i64, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT unread_entries FROM subscriptions WHERE user_id = ? AND feed_id = ?",
        )
        .bind(user_id)
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        let value = row.map(|(v,)| v).unwrap_or(0);
        if value < 0 {
            tracing::warn!(
                user_id = user_id,
                feed_id = feed_id,
                cached = value,
                "Negative unread counter, clamping; recalculation recommended"
            );
            return Ok(0);
        }
        Ok(value)
    }

    /// Authoritative recount for every subscriber of a feed, overwriting
    /// the cached values. The backstop against drift from racing
    /// increments and decrements; runs after each refresh cycle.
    pub async fn recalculate_unread_for_feed(&self, feed_id: i64) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            UPDATE subscriptions SET unread_entries = (
                SELECT COUNT(*) FROM entries e
                WHERE e.feed_id = subscriptions.feed_id
                  AND NOT EXISTS (
                      SELECT 1 FROM entry_states s
                      WHERE s.entry_id = e.id
                        AND s.user_id = subscriptions.user_id
                        AND s.read = 1
                  )
            )
            WHERE feed_id = ?
        "#,
        )
        .bind(feed_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Authoritative recount for one subscriber. Returns the fresh value.
    pub async fn recalculate_unread(
        &self,
        user_id: i64,
        feed_id: i64,
    ) -> Result<i64, StorageError> {
        let count: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM entries e
            WHERE e.feed_id = ?
              AND NOT EXISTS (
                  SELECT 1 FROM entry_states s
                  WHERE s.entry_id = e.id AND s.user_id = ? AND s.read = 1
              )
        "#,
        )
        .bind(feed_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        sqlx::query(
            "UPDATE subscriptions SET unread_entries = ? WHERE user_id = ? AND feed_id = ?",
        )
        .bind(count.0)
        .bind(user_id)
        .bind(feed_id)
        .execute(&self.pool)
        .await?;

        Ok(count.0)
    }

    // ========================================================================
    // Entry-State Signals
    // ========================================================================

    /// Record an entry as read for a user and decrement their counter.
    /// Re-marking an already-read entry is a no-op.
    pub async fn mark_entry_read(
        &self,
        user_id: i64,
        entry_id: i64,
    ) -> Result<bool, StorageError> {
        let Some(entry) = self.find_entry(entry_id).await? else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            r#"
            INSERT INTO entry_states (user_id, entry_id, read) VALUES (?, ?, 1)
            ON CONFLICT(user_id, entry_id) DO UPDATE SET read = 1 WHERE read = 0
        "#,
        )
        .bind(user_id)
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;

        let changed = result.rows_affected() > 0;
        if changed {
            sqlx::query(
                "UPDATE subscriptions SET unread_entries = unread_entries - 1 WHERE user_id = ? AND feed_id = ?",
            )
            .bind(user_id)
            .bind(entry.feed_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(changed)
    }

    /// Record an entry as unread again and increment the counter.
    pub async fn mark_entry_unread(
        &self,
        user_id: i64,
        entry_id: i64,
    ) -> Result<bool, StorageError> {
        let Some(entry) = self.find_entry(entry_id).await? else {
            return Ok(false);
        };

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "UPDATE entry_states SET read = 0 WHERE user_id = ? AND entry_id = ? AND read = 1",
        )
        .bind(user_id)
        .bind(entry_id)
        .execute(&mut *tx)
        .await?;

        let changed = result.rows_affected() > 0;
        if changed {
            sqlx::query(
                "UPDATE subscriptions SET unread_entries = unread_entries + 1 WHERE user_id = ? AND feed_id = ?",
            )
            .bind(user_id)
            .bind(entry.feed_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(changed)
    }

    /// Bulk form of [`Self::mark_entry_read`]: the given entry and
    /// everything older in the same feed. Returns how many entries
    /// actually changed state.
    pub async fn mark_read_and_older(
        &self,
        user_id: i64,
        entry_id: i64,
    ) -> Result<i64, StorageError> {
        let Some(entry) = self.find_entry(entry_id).await? else {
            return Ok(0);
        };

        let mut tx = self.pool.begin().await?;
        // Entries without a publish date sort as epoch zero, matching the
        // retention ordering
        let result = sqlx::query(
            r#"
            INSERT INTO entry_states (user_id, entry_id, read)
            SELECT ?, e.id, 1 FROM entries e
            WHERE e.feed_id = ?
              AND (COALESCE(e.published, 0) < COALESCE(?, 0)
                   OR (COALESCE(e.published, 0) = COALESCE(?, 0) AND e.id <= ?))
            ON CONFLICT(user_id, entry_id) DO UPDATE SET read = 1 WHERE read = 0
        "#,
        )
        .bind(user_id)
        .bind(entry.feed_id)
        .bind(entry.published)
        .bind(entry.published)
        .bind(entry.id)
        .execute(&mut *tx)
        .await?;

        let changed = result.rows_affected() as i64;
        if changed > 0 {
            sqlx::query(
                "UPDATE subscriptions SET unread_entries = unread_entries - ? WHERE user_id = ? AND feed_id = ?",
            )
            .bind(changed)
            .bind(user_id)
            .bind(entry.feed_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(changed)
    }
}
