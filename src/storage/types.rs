use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migration(String),
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed row. `url` is the feed's site URL (optional); `fetch_url` is the
/// canonical polling URL and is unique.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: Option<String>,
    pub fetch_url: String,
    pub title: Option<String>,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub fetch_interval_secs: i64,
    pub last_fetched: Option<i64>,
    pub failing_since: Option<i64>,
    pub available: bool,
    pub next_fetch_at: Option<i64>,
}

/// Entry row, belonging to exactly one feed.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Entry {
    pub id: i64,
    pub feed_id: i64,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub published: Option<i64>,
    pub guid: String,
    pub unique_hash: String,
    pub created_at: i64,
}

/// Canonicalized entry fields, ready for persistence.
#[derive(Debug, Clone)]
pub struct NewEntry {
    pub guid: String,
    pub unique_hash: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub published: Option<i64>,
}

/// Subscription row with its denormalized unread counter.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Subscription {
    pub id: i64,
    pub user_id: i64,
    pub feed_id: i64,
    pub folder: Option<String>,
    pub unread_entries: i64,
}

/// Why an ingested entry was skipped rather than persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DuplicateGuid,
    DuplicateHash,
    TombstonedGuid,
    TombstonedHash,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::DuplicateGuid => "duplicate-guid",
            SkipReason::DuplicateHash => "duplicate-hash",
            SkipReason::TombstonedGuid => "tombstoned-guid",
            SkipReason::TombstonedHash => "tombstoned-hash",
        }
    }
}

/// Result of a guarded entry insert.
#[derive(Debug)]
pub enum InsertOutcome {
    Inserted(i64),
    Skipped(SkipReason),
}

/// What the fetcher needs to know about a feed. Borrowing this rather than
/// the full row lets subscription probing fetch URLs that have no feed row
/// yet.
#[derive(Debug, Clone)]
pub struct FetchTarget<'a> {
    pub fetch_url: &'a str,
    pub site_url: Option<&'a str>,
    pub etag: Option<&'a str>,
    pub last_modified: Option<&'a str>,
}

impl<'a> FetchTarget<'a> {
    /// A target with no stored validators: always a full fetch.
    pub fn probe(fetch_url: &'a str) -> Self {
        Self {
            fetch_url,
            site_url: None,
            etag: None,
            last_modified: None,
        }
    }
}

impl<'a> From<&'a Feed> for FetchTarget<'a> {
    fn from(feed: &'a Feed) -> Self {
        Self {
            fetch_url: &feed.fetch_url,
            site_url: feed.url.as_deref(),
            etag: feed.etag.as_deref(),
            last_modified: feed.last_modified.as_deref(),
        }
    }
}
