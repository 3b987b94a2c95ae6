//! The polling loop: dispatch due feeds to a bounded worker pool, one
//! serialized refresh job per feed.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;

use crate::feed::RefreshPipeline;
use crate::sched::health;
use crate::storage::StorageError;

/// Feeds picked up per tick. Anything beyond this waits for the next
/// pass rather than ballooning the spawn queue.
const DISPATCH_BATCH: i64 = 500;

pub struct Scheduler {
    pipeline: Arc<RefreshPipeline>,
    /// Feed ids with a refresh currently running or queued. A second
    /// trigger for the same feed while one is in flight is a no-op —
    /// dedup and counters rely on cycles never overlapping per feed.
    in_flight: Arc<Mutex<HashSet<i64>>>,
    workers: Arc<Semaphore>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<RefreshPipeline>) -> Self {
        let worker_count = pipeline.config.worker_count.max(1);
        Self {
            pipeline,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            workers: Arc::new(Semaphore::new(worker_count)),
        }
    }

    /// Run the scheduler until the process shuts down.
    pub async fn run(&self) {
        let tick = std::time::Duration::from_secs(self.pipeline.config.tick_secs.max(1));
        loop {
            let now = chrono::Utc::now().timestamp();
            if let Err(e) = self.tick(now).await {
                tracing::warn!(error = %e, "Scheduler tick failed");
            }
            tokio::time::sleep(tick).await;
        }
    }

    /// One scheduler pass: give schedule-less feeds a next run, then
    /// dispatch everything due. Returns how many jobs were spawned.
    pub async fn tick(&self, now: i64) -> Result<usize, StorageError> {
        // Fresh subscriptions and rows recovered after a crash have no
        // next_fetch_at; compute one instead of fetching immediately.
        for feed in self.pipeline.db.unscheduled_feeds(DISPATCH_BATCH).await? {
            let at = health::initial_schedule(&feed, now);
            self.pipeline.db.set_next_fetch_at(feed.id, at).await?;
            tracing::debug!(feed_id = feed.id, in_secs = at - now, "Scheduled feed");
        }

        let due = self.pipeline.db.due_feeds(now, DISPATCH_BATCH).await?;
        let mut spawned = 0;
        for feed in due {
            if self.spawn_refresh(feed.id) {
                spawned += 1;
            }
        }
        Ok(spawned)
    }

    /// Spawn a refresh job for one feed unless one is already in flight.
    /// Returns whether a job was actually started.
    pub fn spawn_refresh(&self, feed_id: i64) -> bool {
        {
            let mut in_flight = self.in_flight.lock().expect("in-flight set poisoned");
            if !in_flight.insert(feed_id) {
                tracing::debug!(feed_id = feed_id, "Refresh already in flight, coalescing");
                return false;
            }
        }

        let pipeline = Arc::clone(&self.pipeline);
        let in_flight = Arc::clone(&self.in_flight);
        let workers = Arc::clone(&self.workers);

        tokio::spawn(async move {
            // Bound concurrency; the permit is held for the whole cycle
            let _permit = workers.acquire().await.expect("worker semaphore closed");
            pipeline.refresh_feed(feed_id).await;
            in_flight
                .lock()
                .expect("in-flight set poisoned")
                .remove(&feed_id);
        });

        true
    }

    /// Whether a refresh for this feed is currently running or queued.
    pub fn is_in_flight(&self, feed_id: i64) -> bool {
        self.in_flight
            .lock()
            .expect("in-flight set poisoned")
            .contains(&feed_id)
    }
}
