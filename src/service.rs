//! Collaborator surface: subscription lifecycle, bulk import, and
//! entry-state signals.
//!
//! These are ordinary functions invoked by the presentation layer — no
//! persistence callbacks, no exceptions as control flow. Outcomes that a
//! subscriber can act on come back as typed results.

use std::time::Duration;

use thiserror::Error;

use crate::feed::autodiscovery::discover_feed_url;
use crate::feed::fetcher::{self, FetchOutcome};
use crate::feed::ingest;
use crate::feed::parser::parse_feed;
use crate::feed::RefreshPipeline;
use crate::policy::HostDecision;
use crate::sched::health;
use crate::storage::{Feed, FetchTarget, StorageError};

#[derive(Debug, Error)]
pub enum SubscribeError {
    #[error("not a valid feed URL")]
    InvalidUrl,

    #[error("host is blacklisted")]
    Blacklisted,

    #[error("already subscribed")]
    AlreadySubscribed,

    #[error("could not fetch feed: {0}")]
    FetchFailed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Result of a bulk import: per-URL failures never abort the batch.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub subscribed: usize,
    pub failures: Vec<(String, SubscribeError)>,
}

/// Subscribe a user to a feed URL, creating the feed on first contact.
///
/// A URL that resolves to an already-known feed just adds the
/// subscription; a brand-new URL is fetched and parsed once (with one
/// autodiscovery hop) before anything is persisted, so a dead URL never
/// leaves a feed row behind. Subscribing to a feed that failing cycles
/// made unavailable resets its health and resumes polling.
pub async fn subscribe(
    pipeline: &RefreshPipeline,
    user_id: i64,
    url: &str,
    folder: Option<&str>,
) -> Result<Feed, SubscribeError> {
    let normalized = crate::util::normalize_feed_url(url).ok_or(SubscribeError::InvalidUrl)?;

    if pipeline.policy.check_blacklist(&normalized) == HostDecision::Rejected {
        return Err(SubscribeError::Blacklisted);
    }

    if let Some(feed) = pipeline.db.find_feed_by_fetch_url(&normalized).await? {
        if !pipeline.db.create_subscription(user_id, feed.id, folder).await? {
            return Err(SubscribeError::AlreadySubscribed);
        }
        if !feed.available {
            pipeline.db.reset_feed_health(feed.id).await?;
            tracing::info!(feed_id = feed.id, "Re-subscription revived unavailable feed");
        }
        return Ok(feed);
    }

    let feed = resolve_new_feed(pipeline, &normalized).await?;
    pipeline
        .db
        .create_subscription(user_id, feed.id, folder)
        .await?;
    Ok(feed)
}

/// First contact with an unknown URL: fetch, parse (with one
/// autodiscovery hop), persist the feed and its initial entries.
async fn resolve_new_feed(
    pipeline: &RefreshPipeline,
    fetch_url: &str,
) -> Result<Feed, SubscribeError> {
    let timeout = Duration::from_secs(pipeline.config.fetch_timeout_secs);
    let mut current_url = fetch_url.to_owned();
    let mut autodiscovery_available = true;

    loop {
        let target = FetchTarget::probe(&current_url);
        let raw = match fetcher::fetch(
            &pipeline.client,
            &pipeline.policy,
            &target,
            timeout,
            pipeline.config.max_response_bytes,
        )
        .await
        {
            Ok(FetchOutcome::Fetched(raw)) => raw,
            // No validators were sent; a 304 here is a misbehaving origin
            Ok(FetchOutcome::NotModified) => {
                return Err(SubscribeError::FetchFailed("unexpected 304".to_string()))
            }
            Err(crate::feed::FetchError::HostBlacklisted) => {
                return Err(SubscribeError::Blacklisted)
            }
            Err(e) => return Err(SubscribeError::FetchFailed(e.to_string())),
        };

        match parse_feed(&raw.bytes, raw.charset.as_deref(), &current_url) {
            Ok(parsed) => {
                // The autodiscovery hop may have landed on a known feed
                if let Some(existing) = pipeline.db.find_feed_by_fetch_url(&current_url).await? {
                    return Ok(existing);
                }

                let feed = pipeline
                    .db
                    .create_feed(
                        &current_url,
                        parsed.title.as_deref(),
                        parsed.site_url.as_deref(),
                        pipeline.config.default_interval_secs,
                    )
                    .await?;
                pipeline
                    .db
                    .update_feed_validators(feed.id, raw.etag.as_deref(), raw.last_modified.as_deref())
                    .await?;

                ingest::ingest(&pipeline.db, &pipeline.policy, &feed, parsed.entries).await;
                pipeline
                    .db
                    .enforce_retention(feed.id, pipeline.config.max_entries_per_feed)
                    .await?;

                // First poll lands at a random point in the next hour
                let now = chrono::Utc::now().timestamp();
                pipeline
                    .db
                    .set_next_fetch_at(feed.id, health::initial_schedule(&feed, now))
                    .await?;

                let feed = pipeline
                    .db
                    .find_feed(feed.id)
                    .await?
                    .expect("feed just created");
                tracing::info!(feed_id = feed.id, url = %feed.fetch_url, "Created feed");
                return Ok(feed);
            }
            Err(parse_err) if autodiscovery_available => {
                autodiscovery_available = false;
                let html = String::from_utf8_lossy(&raw.bytes);
                match discover_feed_url(&html, &current_url) {
                    Some(discovered) if discovered != current_url => {
                        tracing::debug!(
                            original = %current_url,
                            discovered = %discovered,
                            "Subscription URL was an HTML page, following advertised feed"
                        );
                        current_url = discovered;
                        continue;
                    }
                    _ => return Err(SubscribeError::FetchFailed(parse_err.to_string())),
                }
            }
            Err(parse_err) => return Err(SubscribeError::FetchFailed(parse_err.to_string())),
        }
    }
}

/// Remove a subscription. When the last subscriber leaves, the feed and
/// everything hanging off it (entries, tombstones, states) goes too.
/// Returns whether a subscription existed.
pub async fn unsubscribe(
    pipeline: &RefreshPipeline,
    user_id: i64,
    feed_id: i64,
) -> Result<bool, StorageError> {
    let existed = pipeline.db.delete_subscription(user_id, feed_id).await?;
    if existed && pipeline.db.subscriber_count(feed_id).await? == 0 {
        pipeline.db.delete_feed(feed_id).await?;
        tracing::info!(feed_id = feed_id, "Last subscriber left, deleted feed");
    }
    Ok(existed)
}

/// Bulk import of (url, folder) pairs extracted upstream. Each pair runs
/// through the normal subscribe path; failures are collected per URL and
/// an existing subscription counts as success.
pub async fn import(
    pipeline: &RefreshPipeline,
    user_id: i64,
    pairs: &[(String, Option<String>)],
) -> ImportReport {
    let mut report = ImportReport::default();
    for (url, folder) in pairs {
        match subscribe(pipeline, user_id, url, folder.as_deref()).await {
            Ok(_) | Err(SubscribeError::AlreadySubscribed) => report.subscribed += 1,
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "Import failed for URL");
                report.failures.push((url.clone(), e));
            }
        }
    }
    report
}

/// Entry-state signals from the collaborator layer. Counter adjustments
/// ride along in the same transaction as the state change.
pub async fn mark_entry_read(
    pipeline: &RefreshPipeline,
    user_id: i64,
    entry_id: i64,
) -> Result<bool, StorageError> {
    pipeline.db.mark_entry_read(user_id, entry_id).await
}

pub async fn mark_entry_unread(
    pipeline: &RefreshPipeline,
    user_id: i64,
    entry_id: i64,
) -> Result<bool, StorageError> {
    pipeline.db.mark_entry_unread(user_id, entry_id).await
}

/// Bulk "this and everything older in the feed" read signal.
pub async fn mark_read_and_older(
    pipeline: &RefreshPipeline,
    user_id: i64,
    entry_id: i64,
) -> Result<i64, StorageError> {
    pipeline.db.mark_read_and_older(user_id, entry_id).await
}
