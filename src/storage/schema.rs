use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StorageError;

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a database connection and run migrations.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pragmas set here reach every pooled connection. busy_timeout:
        // SQLite waits for concurrent refresh cycles to release locks
        // before returning SQLITE_BUSY. foreign_keys is per-connection and
        // cascade deletes depend on it.
        let options = SqliteConnectOptions::from_str(&url)
            .map_err(StorageError::Database)?
            .pragma("busy_timeout", "5000")
            .pragma("foreign_keys", "ON");
        // SQLite is single-writer; a small pool covers concurrent refresh
        // jobs plus the signal handlers.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await
            .map_err(StorageError::Database)?;
        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Run schema migrations atomically within a transaction.
    ///
    /// All statements use `IF NOT EXISTS`, so re-running on an existing
    /// database is a no-op; a failure mid-way rolls the whole migration
    /// back.
    async fn migrate(&self) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT,
                fetch_url TEXT UNIQUE NOT NULL,
                title TEXT,
                etag TEXT,
                last_modified TEXT,
                fetch_interval_secs INTEGER NOT NULL DEFAULT 3600,
                last_fetched INTEGER,
                failing_since INTEGER,
                available INTEGER NOT NULL DEFAULT 1,
                next_fetch_at INTEGER
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                title TEXT,
                url TEXT,
                author TEXT,
                content TEXT,
                summary TEXT,
                published INTEGER,
                guid TEXT NOT NULL,
                unique_hash TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                UNIQUE(feed_id, guid),
                UNIQUE(feed_id, unique_hash)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deleted_entries (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                guid TEXT NOT NULL,
                unique_hash TEXT NOT NULL,
                UNIQUE(feed_id, guid),
                UNIQUE(feed_id, unique_hash)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subscriptions (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                feed_id INTEGER NOT NULL REFERENCES feeds(id) ON DELETE CASCADE,
                folder TEXT,
                unread_entries INTEGER NOT NULL DEFAULT 0,
                UNIQUE(user_id, feed_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Read/unread flags are owned by the collaborator layer; the rows
        // live here so recalculation has something authoritative to count.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entry_states (
                id INTEGER PRIMARY KEY,
                user_id INTEGER NOT NULL,
                entry_id INTEGER NOT NULL REFERENCES entries(id) ON DELETE CASCADE,
                read INTEGER NOT NULL DEFAULT 0,
                UNIQUE(user_id, entry_id)
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        // Retention orders by (published, created_at, id); due-feed scans
        // filter on availability and next_fetch_at.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entries_feed_published ON entries(feed_id, published, created_at, id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_feeds_due ON feeds(available, next_fetch_at)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_subscriptions_feed ON subscriptions(feed_id)",
        )
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_entry_states_entry ON entry_states(entry_id)",
        )
        .execute(&mut *tx)
        .await?;

        tx.commit()
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;

        Ok(())
    }
}
