//! Self-refreshing in-memory cache keyed by endpoint path
//!
//! This module provides [`CachedClient`], which keeps decoded endpoint
//! responses in memory and refreshes them in the background, either on a
//! fixed interval or on a cron schedule. Expired entries are still returned
//! with an `is_expired` flag, so callers can fall back to last known data when
//! the upstream API is unavailable.

mod client;
mod error;
mod schedule;
mod scheduler;
mod store;

pub use client::{CacheConfig, CachedClient, REFRESH_TIMEOUT};
pub use error::{CacheError, DecodeError, FetchError, ScheduleError};
pub use schedule::{CronRules, SchedulePolicy, MIN_CRON_PERIOD};
pub use store::CachedData;
