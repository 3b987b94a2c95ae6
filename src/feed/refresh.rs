//! One feed refresh cycle, fetch through reschedule.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::policy::HostPolicy;
use crate::sched::health;
use crate::storage::{Database, Feed, FetchTarget, StorageError};

use super::autodiscovery::discover_feed_url;
use super::fetcher::{self, FetchOutcome};
use super::ingest;
use super::parser::{parse_feed, ParsedFeed};

/// What one refresh cycle produced, for observability and import progress.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// Fresh body fetched and processed; `new_entries` may be zero
    Refreshed { new_entries: usize },
    /// Origin confirmed nothing changed (304)
    NotModified,
    /// Cycle failed; the feed stays available and backs off
    Failed { error: String },
    /// Cycle failed and the sustained-failure threshold flipped the feed
    /// unavailable
    BecameUnavailable { error: String },
    /// The feed was deleted or suspended between scheduling and execution
    Skipped,
}

/// Shared dependencies of the refresh pipeline.
///
/// One instance serves every feed; each [`Self::refresh_feed`] call is an
/// independent, stateless cycle.
pub struct RefreshPipeline {
    pub db: Database,
    pub client: reqwest::Client,
    pub policy: Arc<HostPolicy>,
    pub config: Arc<Config>,
}

impl RefreshPipeline {
    pub fn new(
        db: Database,
        client: reqwest::Client,
        policy: Arc<HostPolicy>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            db,
            client,
            policy,
            config,
        }
    }

    /// Run one refresh cycle for a feed.
    ///
    /// Idempotent and safe to re-invoke: a feed deleted between scheduling
    /// and execution is a no-op. A parse failure triggers at most one
    /// autodiscovery re-fetch; transient errors feed the health machine
    /// and lengthen the retry interval rather than propagating.
    pub async fn refresh_feed(&self, feed_id: i64) -> RefreshOutcome {
        let feed = match self.db.find_feed(feed_id).await {
            Ok(Some(feed)) => feed,
            Ok(None) => {
                tracing::debug!(feed_id = feed_id, "Feed vanished before refresh, skipping");
                return RefreshOutcome::Skipped;
            }
            Err(e) => {
                tracing::warn!(feed_id = feed_id, error = %e, "Failed to load feed");
                return RefreshOutcome::Failed { error: e.to_string() };
            }
        };
        if !feed.available {
            tracing::debug!(feed_id = feed_id, "Feed is unavailable, skipping");
            return RefreshOutcome::Skipped;
        }

        match self.run_cycle(feed).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(feed_id = feed_id, error = %e, "Refresh cycle aborted on storage error");
                RefreshOutcome::Failed { error: e.to_string() }
            }
        }
    }

    async fn run_cycle(&self, mut feed: Feed) -> Result<RefreshOutcome, StorageError> {
        let timeout = Duration::from_secs(self.config.fetch_timeout_secs);
        let mut autodiscovery_available = true;

        loop {
            let target = FetchTarget::from(&feed);
            let outcome = fetcher::fetch(
                &self.client,
                &self.policy,
                &target,
                timeout,
                self.config.max_response_bytes,
            )
            .await;

            let raw = match outcome {
                Ok(FetchOutcome::NotModified) => {
                    tracing::debug!(feed_id = feed.id, "Feed not modified");
                    self.complete_success(&feed).await?;
                    return Ok(RefreshOutcome::NotModified);
                }
                Ok(FetchOutcome::Fetched(raw)) => raw,
                Err(e) => return self.complete_failure(&feed, e.to_string()).await,
            };

            match parse_feed(&raw.bytes, raw.charset.as_deref(), &feed.fetch_url) {
                Ok(parsed) => {
                    let new_entries = self.process_parsed(&feed, parsed, &raw).await?;
                    self.complete_success(&feed).await?;
                    return Ok(RefreshOutcome::Refreshed { new_entries });
                }
                Err(parse_err) if autodiscovery_available => {
                    // The document was not a feed; maybe it is the HTML
                    // page that advertises one. One re-fetch, no more.
                    autodiscovery_available = false;
                    let html = String::from_utf8_lossy(&raw.bytes);
                    match discover_feed_url(&html, &feed.fetch_url) {
                        Some(discovered) if discovered != feed.fetch_url => {
                            tracing::info!(
                                feed_id = feed.id,
                                old = %feed.fetch_url,
                                new = %discovered,
                                "Autodiscovered feed URL, retrying fetch"
                            );
                            self.db.update_fetch_url(feed.id, &discovered).await?;
                            feed.fetch_url = discovered;
                            feed.etag = None;
                            feed.last_modified = None;
                            continue;
                        }
                        _ => return self.complete_failure(&feed, parse_err.to_string()).await,
                    }
                }
                Err(parse_err) => {
                    return self.complete_failure(&feed, parse_err.to_string()).await;
                }
            }
        }
    }

    /// Everything that follows a successfully parsed body: metadata and
    /// validator updates, ingestion, retention.
    async fn process_parsed(
        &self,
        feed: &Feed,
        parsed: ParsedFeed,
        raw: &super::fetcher::RawResponse,
    ) -> Result<usize, StorageError> {
        self.db
            .update_feed_metadata(feed.id, parsed.title.as_deref(), parsed.site_url.as_deref())
            .await?;
        self.db
            .update_feed_validators(feed.id, raw.etag.as_deref(), raw.last_modified.as_deref())
            .await?;

        // Ingest against the refreshed row so entry URL resolution sees the
        // just-updated site URL
        let feed = self
            .db
            .find_feed(feed.id)
            .await?
            .unwrap_or_else(|| feed.clone());

        let new_entries = ingest::ingest(&self.db, &self.policy, &feed, parsed.entries).await;

        self.db
            .enforce_retention(feed.id, self.config.max_entries_per_feed)
            .await?;

        if new_entries > 0 {
            tracing::info!(feed_id = feed.id, new_entries = new_entries, "Feed refreshed");
        }
        Ok(new_entries)
    }

    async fn complete_success(&self, feed: &Feed) -> Result<(), StorageError> {
        let now = chrono::Utc::now().timestamp();
        let update = health::on_success(feed, &self.config, now);
        self.db.apply_health(feed.id, &update).await?;
        // The authoritative recount backstops any drift racing increments
        // and decrements accumulated during the cycle
        self.db.recalculate_unread_for_feed(feed.id).await?;
        Ok(())
    }

    async fn complete_failure(
        &self,
        feed: &Feed,
        error: String,
    ) -> Result<RefreshOutcome, StorageError> {
        let now = chrono::Utc::now().timestamp();
        let update = health::on_failure(feed, &self.config, now);
        let became_unavailable = !update.available;
        self.db.apply_health(feed.id, &update).await?;
        self.db.recalculate_unread_for_feed(feed.id).await?;

        if became_unavailable {
            tracing::warn!(
                feed_id = feed.id,
                url = %feed.fetch_url,
                error = %error,
                "Feed failing past threshold, marking unavailable"
            );
            Ok(RefreshOutcome::BecameUnavailable { error })
        } else {
            tracing::debug!(feed_id = feed.id, error = %error, "Feed refresh failed, backing off");
            Ok(RefreshOutcome::Failed { error })
        }
    }
}
