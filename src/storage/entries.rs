use super::schema::Database;
use super::types::{Entry, InsertOutcome, NewEntry, SkipReason, StorageError};

impl Database {
    // ========================================================================
    // Entry Operations
    // ========================================================================

    /// Insert one entry unless its guid or content hash is already known —
    /// as a live entry or as a tombstone.
    ///
    /// A unique-constraint violation at insert time means another cycle won
    /// the race between our existence check and the INSERT; that folds into
    /// the same skip outcome rather than an error.
    pub async fn insert_entry(
        &self,
        feed_id: i64,
        entry: &NewEntry,
        now: i64,
    ) -> Result<InsertOutcome, StorageError> {
        if let Some(reason) = self.dedup_check(feed_id, entry).await? {
            return Ok(InsertOutcome::Skipped(reason));
        }

        let result = sqlx::query(
            r#"
            INSERT INTO entries
                (feed_id, title, url, author, content, summary, published, guid, unique_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
        "#,
        )
        .bind(feed_id)
        .bind(&entry.title)
        .bind(&entry.url)
        .bind(&entry.author)
        .bind(&entry.content)
        .bind(&entry.summary)
        .bind(entry.published)
        .bind(&entry.guid)
        .bind(&entry.unique_hash)
        .bind(now)
        .fetch_one(&self.pool)
        .await;

        match result {
            Ok(row) => {
                use sqlx::Row;
                Ok(InsertOutcome::Inserted(row.get(0)))
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(InsertOutcome::Skipped(SkipReason::DuplicateGuid))
            }
            Err(e) => Err(StorageError::Database(e)),
        }
    }

    async fn dedup_check(
        &self,
        feed_id: i64,
        entry: &NewEntry,
    ) -> Result<Option<SkipReason>, StorageError> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM entries WHERE feed_id = ? AND guid = ? LIMIT 1",
        )
        .bind(feed_id)
        .bind(&entry.guid)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            return Ok(Some(SkipReason::DuplicateGuid));
        }

        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM entries WHERE feed_id = ? AND unique_hash = ? LIMIT 1",
        )
        .bind(feed_id)
        .bind(&entry.unique_hash)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            return Ok(Some(SkipReason::DuplicateHash));
        }

        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM deleted_entries WHERE feed_id = ? AND guid = ? LIMIT 1",
        )
        .bind(feed_id)
        .bind(&entry.guid)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            return Ok(Some(SkipReason::TombstonedGuid));
        }

        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1 FROM deleted_entries WHERE feed_id = ? AND unique_hash = ? LIMIT 1",
        )
        .bind(feed_id)
        .bind(&entry.unique_hash)
        .fetch_optional(&self.pool)
        .await?;
        if row.is_some() {
            return Ok(Some(SkipReason::TombstonedHash));
        }

        Ok(None)
    }

    pub async fn entry_count(&self, feed_id: i64) -> Result<i64, StorageError> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries WHERE feed_id = ?")
            .bind(feed_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// All entries of a feed, newest first. The read-side pagination layer
    /// owns richer queries; this one exists for tests and counter recounts.
    pub async fn entries_for_feed(&self, feed_id: i64) -> Result<Vec<Entry>, StorageError> {
        let entries = sqlx::query_as::<_, Entry>(
            r#"
            SELECT * FROM entries
            WHERE feed_id = ?
            ORDER BY published DESC, created_at DESC, id DESC
        "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    pub async fn find_entry(&self, entry_id: i64) -> Result<Option<Entry>, StorageError> {
        let entry = sqlx::query_as::<_, Entry>("SELECT * FROM entries WHERE id = ?")
            .bind(entry_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(entry)
    }

    // ========================================================================
    // Retention
    // ========================================================================

    /// Trim a feed to `max_entries`, tombstoning everything removed.
    ///
    /// The delete and its tombstones commit as one transaction: a crash in
    /// between must never leave a deleted entry free to resurrect on the
    /// next fetch. Returns the number of entries removed.
    pub async fn enforce_retention(
        &self,
        feed_id: i64,
        max_entries: i64,
    ) -> Result<usize, StorageError> {
        let count = self.entry_count(feed_id).await?;
        let excess = count - max_entries;
        if excess <= 0 {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await?;

        // Oldest first; ties broken by insertion order, then identity, so
        // the trim set is deterministic.
        let victims: Vec<(i64, String, String)> = sqlx::query_as(
            r#"
            SELECT id, guid, unique_hash FROM entries
            WHERE feed_id = ?
            ORDER BY published ASC, created_at ASC, id ASC
            LIMIT ?
        "#,
        )
        .bind(feed_id)
        .bind(excess)
        .fetch_all(&mut *tx)
        .await?;

        for (entry_id, guid, unique_hash) in &victims {
            sqlx::query(
                "INSERT OR IGNORE INTO deleted_entries (feed_id, guid, unique_hash) VALUES (?, ?, ?)",
            )
            .bind(feed_id)
            .bind(guid)
            .bind(unique_hash)
            .execute(&mut *tx)
            .await?;

            sqlx::query("DELETE FROM entries WHERE id = ?")
                .bind(entry_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::debug!(
            feed_id = feed_id,
            removed = victims.len(),
            "Retention trimmed old entries"
        );
        Ok(victims.len())
    }

    pub async fn tombstone_count(&self, feed_id: i64) -> Result<i64, StorageError> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM deleted_entries WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }
}
