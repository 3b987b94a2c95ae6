//! Adaptive scheduling: per-feed health accounting and the polling loop.

pub mod health;
pub mod scheduler;

pub use health::{FeedStatus, HealthUpdate};
pub use scheduler::Scheduler;
