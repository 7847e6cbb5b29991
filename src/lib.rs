//! Endpoint Cache Library
//!
//! A thin HTTP client plus a self-refreshing in-memory cache keyed by
//! endpoint path. The CLI module is exposed for use in integration tests.

pub mod cache;
pub mod cli;
pub mod http;

pub use cache::{CacheConfig, CacheError, CachedClient, CachedData};
pub use http::{Client, Fetch};
