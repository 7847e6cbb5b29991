//! Error types for the endpoint cache

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while fetching raw bytes for an endpoint
#[derive(Debug, Error)]
pub enum FetchError {
    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// Server answered with something other than 200 OK
    #[error("unexpected status code: {0}")]
    Status(reqwest::StatusCode),

    /// The refresh did not finish within its time bound
    #[error("request timed out after {0:?}")]
    TimedOut(Duration),

    /// Failure reported by a non-HTTP fetcher
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur while decoding a fetched payload
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Failed to parse JSON response
    #[error("failed to unmarshal response: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors that can occur while resolving a schedule expression
#[derive(Debug, Error)]
pub enum ScheduleError {
    /// No expression was given
    #[error("empty schedule expression")]
    Empty,

    /// The duration after `@every` could not be parsed
    #[error("invalid duration in @every: {expr}")]
    InvalidInterval {
        expr: String,
        #[source]
        source: humantime::DurationError,
    },

    /// `@every` with a zero duration
    #[error("@every requires a positive duration: {0}")]
    ZeroInterval(String),

    /// The cron expression was rejected
    #[error("invalid cron expression '{expr}': {source}")]
    InvalidCron {
        expr: String,
        #[source]
        source: cron::error::Error,
    },

    /// A numeric day-of-week field outside 0-7 or otherwise malformed
    #[error("invalid day of week '{field}' in cron expression '{expr}'")]
    InvalidWeekday { expr: String, field: String },

    /// The expression is valid but never fires again
    #[error("schedule has no upcoming run: {0}")]
    NoUpcomingRun(String),
}

/// Errors returned by [`CachedClient`](super::CachedClient) operations
#[derive(Debug, Error)]
pub enum CacheError {
    /// The key was never registered
    #[error("no cache entry for path: {0}")]
    NotFound(String),

    /// The entry is older than its freshness window, or was never populated
    #[error("cache expired for path: {0}")]
    Expired(String),

    /// The registration's schedule expression could not be resolved
    #[error("failed to schedule cache updates for {path}: {source}")]
    Schedule {
        path: String,
        #[source]
        source: ScheduleError,
    },

    /// Fetching fresh data failed
    #[error("failed to fetch data for {path}: {source}")]
    Fetch {
        path: String,
        #[source]
        source: FetchError,
    },

    /// Fetched data could not be decoded
    #[error("failed to decode data for {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: DecodeError,
    },

    /// The key holds a value of a different type than requested
    #[error("cached value for {path} is not a {expected}")]
    TypeMismatch { path: String, expected: &'static str },

    /// The cache was shut down with `stop()`
    #[error("cache has been stopped")]
    Stopped,
}

impl CacheError {
    /// Returns the path this error refers to, if any
    pub fn path(&self) -> Option<&str> {
        match self {
            CacheError::NotFound(path) | CacheError::Expired(path) => Some(path),
            CacheError::Schedule { path, .. }
            | CacheError::Fetch { path, .. }
            | CacheError::Decode { path, .. }
            | CacheError::TypeMismatch { path, .. } => Some(path),
            CacheError::Stopped => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_name_the_path() {
        let err = CacheError::NotFound("/users".to_string());
        assert_eq!(err.to_string(), "no cache entry for path: /users");

        let err = CacheError::Expired("/users".to_string());
        assert!(err.to_string().contains("cache expired"));
        assert_eq!(err.path(), Some("/users"));
    }

    #[test]
    fn test_fetch_error_keeps_stage_and_source() {
        let err = CacheError::Fetch {
            path: "/status".to_string(),
            source: FetchError::Status(reqwest::StatusCode::BAD_GATEWAY),
        };
        let message = err.to_string();
        assert!(message.contains("failed to fetch"));
        assert!(message.contains("/status"));
        assert!(message.contains("502"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_decode_error_wraps_serde() {
        let source = serde_json::from_slice::<serde_json::Value>(b"").unwrap_err();
        let err = CacheError::Decode {
            path: "/status".to_string(),
            source: source.into(),
        };
        assert!(err.to_string().contains("failed to decode"));
        assert!(err.to_string().contains("failed to unmarshal"));
    }

    #[test]
    fn test_stopped_has_no_path() {
        assert!(CacheError::Stopped.path().is_none());
    }
}
