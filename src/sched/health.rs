//! Per-feed health state machine and interval arithmetic.
//!
//! Three states, derived from two columns: Healthy (`failing_since` null,
//! available), Failing (`failing_since` set, still available), Unavailable
//! (scheduling suspended until an external re-subscription resets it).
//! Success shrinks the poll interval 10%, failure grows it 10%, always
//! clamped to the configured bounds; a failure streak older than the
//! threshold flips the feed unavailable.

use rand::Rng;

use crate::config::Config;
use crate::storage::Feed;

/// Observable health state of a feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Healthy,
    Failing,
    Unavailable,
}

pub fn status(feed: &Feed) -> FeedStatus {
    if !feed.available {
        FeedStatus::Unavailable
    } else if feed.failing_since.is_some() {
        FeedStatus::Failing
    } else {
        FeedStatus::Healthy
    }
}

/// A health-machine decision, applied to the feed row in one statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthUpdate {
    pub fetch_interval_secs: i64,
    /// `Some` only on success; failures leave the stored value alone.
    pub last_fetched: Option<i64>,
    pub failing_since: Option<i64>,
    pub available: bool,
    /// `None` suspends scheduling (unavailable feeds).
    pub next_fetch_at: Option<i64>,
}

/// Successful cycle: clear the failure streak, speed up 10%, reschedule.
pub fn on_success(feed: &Feed, config: &Config, now: i64) -> HealthUpdate {
    let interval = clamp(scale(feed.fetch_interval_secs, 0.9), config);
    HealthUpdate {
        fetch_interval_secs: interval,
        last_fetched: Some(now),
        failing_since: None,
        available: true,
        next_fetch_at: Some(now + interval),
    }
}

/// Failed cycle: start or extend the failure streak, back off 10%, and
/// flip unavailable once the streak is older than the threshold.
pub fn on_failure(feed: &Feed, config: &Config, now: i64) -> HealthUpdate {
    let interval = clamp(scale(feed.fetch_interval_secs, 1.1), config);
    let failing_since = feed.failing_since.unwrap_or(now);

    // Only an already-failing feed can age out; the first failure of a
    // streak always just schedules a retry.
    let exhausted =
        feed.failing_since.is_some() && now - failing_since >= config.failure_threshold_secs;

    if exhausted {
        HealthUpdate {
            fetch_interval_secs: interval,
            last_fetched: None,
            failing_since: Some(failing_since),
            available: false,
            next_fetch_at: None,
        }
    } else {
        HealthUpdate {
            fetch_interval_secs: interval,
            last_fetched: None,
            failing_since: Some(failing_since),
            available: true,
            next_fetch_at: Some(now + interval),
        }
    }
}

/// Schedule for a feed found without one.
///
/// A never-fetched feed gets a uniformly random delay within the first
/// hour, smoothing fleet load when many subscriptions arrive at once. An
/// already-fetched feed resumes its original cadence: `last_fetched +
/// interval`, clamped into the next 15 minutes when that moment has
/// already passed.
pub fn initial_schedule(feed: &Feed, now: i64) -> i64 {
    match feed.last_fetched {
        None => now + rand::rng().random_range(0..=3600),
        Some(last_fetched) => {
            let target = last_fetched + feed.fetch_interval_secs;
            if target < now {
                // Past due — run within the next 15 minutes, spread out to
                // avoid a thundering herd after downtime
                now + rand::rng().random_range(0..=900)
            } else {
                target
            }
        }
    }
}

fn scale(interval: i64, factor: f64) -> i64 {
    (interval as f64 * factor).round() as i64
}

fn clamp(interval: i64, config: &Config) -> i64 {
    interval.clamp(config.min_interval_secs, config.max_interval_secs)
}
