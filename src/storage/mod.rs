//! SQLite persistence: feeds, entries, tombstones, subscriptions, and the
//! unread-count cache.

mod entries;
mod feeds;
mod schema;
mod subscriptions;
mod types;

pub use schema::Database;
pub use types::{
    Entry, Feed, FetchTarget, InsertOutcome, NewEntry, SkipReason, StorageError, Subscription,
};
