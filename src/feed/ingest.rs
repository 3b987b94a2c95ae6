//! Entry ingestion: canonicalize, dedup, persist.
//!
//! The one invariant everything else leans on: an entry is stored exactly
//! once per feed, judged by its guid and by a content fingerprint, and a
//! tombstoned entry never comes back. A single bad entry must never take
//! the rest of the batch down with it.

use sha2::{Digest, Sha256};

use crate::policy::{EntryAction, HostPolicy};
use crate::storage::{Database, Feed, InsertOutcome, NewEntry};

use super::parser::RawEntry;

/// An entry after canonicalization, as handed to entry overrides and then
/// to storage.
#[derive(Debug, Clone)]
pub struct CanonicalEntry {
    pub guid: String,
    pub title: Option<String>,
    pub url: Option<String>,
    pub author: Option<String>,
    pub content: Option<String>,
    pub summary: Option<String>,
    pub published: Option<i64>,
}

/// Ingest a batch of raw entries for one feed, returning how many were
/// newly persisted.
///
/// Entries arrive in delivery order (newest first) and are ingested oldest
/// first, so a partial failure leaves storage prefix-consistent with
/// publish order. Per-entry failures are logged and skipped; they never
/// abort the batch. Every persisted entry bumps the unread counter of
/// every current subscriber.
pub async fn ingest(
    db: &Database,
    policy: &HostPolicy,
    feed: &Feed,
    entries: Vec<RawEntry>,
) -> usize {
    let now = chrono::Utc::now().timestamp();
    let override_strategy = policy.entry_override(feed.url.as_deref(), &feed.fetch_url);

    let mut inserted = 0;
    for raw in entries.into_iter().rev() {
        let Some(mut entry) = canonicalize(feed, raw) else {
            continue;
        };

        if let Some(strategy) = &override_strategy {
            if strategy.apply(&mut entry) == EntryAction::Drop {
                tracing::debug!(
                    feed_id = feed.id,
                    strategy = strategy.name(),
                    guid = %entry.guid,
                    "Entry vetoed by override"
                );
                continue;
            }
        }

        let new_entry = NewEntry {
            unique_hash: unique_hash(&entry),
            guid: entry.guid,
            title: entry.title,
            url: entry.url,
            author: entry.author,
            content: entry.content,
            summary: entry.summary,
            published: entry.published,
        };

        match db.insert_entry(feed.id, &new_entry, now).await {
            Ok(InsertOutcome::Inserted(_)) => {
                inserted += 1;
                if let Err(e) = db.increment_unread_for_feed(feed.id, 1).await {
                    tracing::warn!(
                        feed_id = feed.id,
                        error = %e,
                        "Failed to bump unread counters; recalculation will heal"
                    );
                }
            }
            Ok(InsertOutcome::Skipped(reason)) => {
                tracing::debug!(
                    feed_id = feed.id,
                    guid = %new_entry.guid,
                    reason = reason.as_str(),
                    "Skipped entry"
                );
            }
            Err(e) => {
                // Isolate the failure to this one entry
                tracing::warn!(
                    feed_id = feed.id,
                    guid = %new_entry.guid,
                    error = %e,
                    "Failed to persist entry, continuing with batch"
                );
            }
        }
    }

    inserted
}

/// Canonicalize one raw entry, or reject it as unidentifiable.
fn canonicalize(feed: &Feed, raw: RawEntry) -> Option<CanonicalEntry> {
    let site_url = feed.url.as_deref();

    // Prefer the entry's own link; fall back to an enclosure, then an
    // image enclosure, when they look like entry URLs (podcast providers
    // mis-map these).
    let effective_url = raw
        .url
        .as_deref()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| raw.enclosure_url.as_deref().filter(|u| crate::util::is_entry_url(u)))
        .or_else(|| raw.image_url.as_deref().filter(|u| crate::util::is_entry_url(u)));

    let normalized_url =
        effective_url.and_then(|u| crate::util::normalize_entry_url(u, site_url, &feed.fetch_url));

    // An entry with neither id nor URL cannot be identified or deduped
    let guid = match raw.id.as_deref().filter(|s| !s.trim().is_empty()) {
        Some(id) => crate::util::normalize_if_url(id),
        None => match normalized_url.as_deref() {
            Some(url) => url.to_owned(),
            None => {
                tracing::debug!(feed_id = feed.id, "Dropping entry without id or url");
                return None;
            }
        },
    };

    Some(CanonicalEntry {
        guid,
        title: raw.title,
        url: normalized_url,
        author: raw.author,
        content: raw.content,
        summary: raw.summary,
        published: raw.published,
    })
}

/// Content fingerprint: catches a duplicate entry arriving under a fresh
/// guid. Field separators keep ("ab", "c") distinct from ("a", "bc").
fn unique_hash(entry: &CanonicalEntry) -> String {
    let mut hasher = Sha256::new();
    for field in [
        entry.title.as_deref(),
        entry.url.as_deref(),
        entry.content.as_deref(),
        entry.summary.as_deref(),
    ] {
        hasher.update(field.unwrap_or(""));
        hasher.update([0u8]);
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    async fn fixture() -> (Database, HostPolicy, Feed) {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .create_feed(
                "http://example.com/rss",
                Some("Example"),
                Some("http://example.com"),
                3600,
            )
            .await
            .unwrap();
        let policy = HostPolicy::from_config(&Config::default()).unwrap();
        (db, policy, feed)
    }

    fn raw(id: Option<&str>, url: Option<&str>, title: &str) -> RawEntry {
        RawEntry {
            id: id.map(String::from),
            title: Some(title.to_string()),
            url: url.map(String::from),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_ingest_persists_and_counts() {
        let (db, policy, feed) = fixture().await;
        db.create_subscription(1, feed.id, None).await.unwrap();

        let inserted = ingest(
            &db,
            &policy,
            &feed,
            vec![
                raw(Some("b"), Some("http://example.com/b"), "Newer"),
                raw(Some("a"), Some("http://example.com/a"), "Older"),
            ],
        )
        .await;

        assert_eq!(inserted, 2);
        assert_eq!(db.entry_count(feed.id).await.unwrap(), 2);
        assert_eq!(db.unread_count(1, feed.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_ingest_is_idempotent() {
        let (db, policy, feed) = fixture().await;
        db.create_subscription(1, feed.id, None).await.unwrap();

        let batch = vec![raw(Some("a"), Some("http://example.com/a"), "Post")];
        assert_eq!(ingest(&db, &policy, &feed, batch.clone()).await, 1);
        assert_eq!(ingest(&db, &policy, &feed, batch).await, 0);

        assert_eq!(db.entry_count(feed.id).await.unwrap(), 1);
        // No counter drift from the second run
        db.recalculate_unread_for_feed(feed.id).await.unwrap();
        assert_eq!(db.unread_count(1, feed.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_ingest_oldest_first() {
        let (db, policy, feed) = fixture().await;

        // Delivery order: newest first. The older entry must get the
        // smaller rowid.
        ingest(
            &db,
            &policy,
            &feed,
            vec![
                raw(Some("new"), Some("http://example.com/new"), "New"),
                raw(Some("old"), Some("http://example.com/old"), "Old"),
            ],
        )
        .await;

        let entries = db.entries_for_feed(feed.id).await.unwrap();
        let old = entries.iter().find(|e| e.guid == "old").unwrap();
        let new = entries.iter().find(|e| e.guid == "new").unwrap();
        assert!(old.id < new.id);
    }

    #[tokio::test]
    async fn test_entry_without_id_or_url_skipped() {
        let (db, policy, feed) = fixture().await;

        let inserted = ingest(&db, &policy, &feed, vec![raw(None, None, "Orphan")]).await;
        assert_eq!(inserted, 0);
        assert_eq!(db.entry_count(feed.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_url_fallback_becomes_guid() {
        let (db, policy, feed) = fixture().await;

        ingest(
            &db,
            &policy,
            &feed,
            vec![raw(None, Some("http://example.com/only-url"), "Post")],
        )
        .await;

        let entries = db.entries_for_feed(feed.id).await.unwrap();
        assert_eq!(entries[0].guid, "http://example.com/only-url");
    }

    #[tokio::test]
    async fn test_enclosure_fallback_for_missing_link() {
        let (db, policy, feed) = fixture().await;

        let mut entry = raw(Some("ep-1"), None, "Episode");
        entry.enclosure_url = Some("http://cdn.example.com/ep1.mp3".to_string());
        ingest(&db, &policy, &feed, vec![entry]).await;

        let entries = db.entries_for_feed(feed.id).await.unwrap();
        assert_eq!(entries[0].url.as_deref(), Some("http://cdn.example.com/ep1.mp3"));
    }

    #[tokio::test]
    async fn test_invalid_enclosure_scheme_not_used() {
        let (db, policy, feed) = fixture().await;

        let mut entry = raw(Some("ep-1"), None, "Episode");
        entry.enclosure_url = Some("ftp://cdn.example.com/ep1.mp3".to_string());
        ingest(&db, &policy, &feed, vec![entry]).await;

        let entries = db.entries_for_feed(feed.id).await.unwrap();
        assert_eq!(entries[0].url, None);
    }

    #[tokio::test]
    async fn test_relative_entry_url_resolved() {
        let (db, policy, feed) = fixture().await;

        ingest(&db, &policy, &feed, vec![raw(Some("a"), Some("/posts/1"), "Post")]).await;

        let entries = db.entries_for_feed(feed.id).await.unwrap();
        assert_eq!(entries[0].url.as_deref(), Some("http://example.com/posts/1"));
    }

    #[tokio::test]
    async fn test_changed_guid_same_content_deduped() {
        let (db, policy, feed) = fixture().await;

        ingest(
            &db,
            &policy,
            &feed,
            vec![raw(Some("v1"), Some("http://example.com/a"), "Same Post")],
        )
        .await;
        let inserted = ingest(
            &db,
            &policy,
            &feed,
            vec![raw(Some("v2"), Some("http://example.com/a"), "Same Post")],
        )
        .await;

        assert_eq!(inserted, 0);
        assert_eq!(db.entry_count(feed.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_guid_override_applied() {
        let db = Database::open(":memory:").await.unwrap();
        let feed = db
            .create_feed("http://rotating-guids.example/rss", None, None, 3600)
            .await
            .unwrap();
        let mut config = Config::default();
        config.entry_overrides.insert(
            "rotating-guids.example".to_string(),
            "guid-from-url".to_string(),
        );
        let policy = HostPolicy::from_config(&config).unwrap();

        // Two deliveries of the same post under rotating guids
        ingest(
            &db,
            &policy,
            &feed,
            vec![raw(Some("unstable-1"), Some("http://rotating-guids.example/p/1"), "Post")],
        )
        .await;
        let inserted = ingest(
            &db,
            &policy,
            &feed,
            vec![raw(Some("unstable-2"), Some("http://rotating-guids.example/p/1"), "Post")],
        )
        .await;

        assert_eq!(inserted, 0);
        let entries = db.entries_for_feed(feed.id).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].guid, "http://rotating-guids.example/p/1");
    }

    #[test]
    fn test_unique_hash_field_boundaries() {
        let base = CanonicalEntry {
            guid: "g".into(),
            title: Some("ab".into()),
            url: Some("c".into()),
            author: None,
            content: None,
            summary: None,
            published: None,
        };
        let mut shifted = base.clone();
        shifted.title = Some("a".into());
        shifted.url = Some("bc".into());
        assert_ne!(unique_hash(&base), unique_hash(&shifted));
    }
}
