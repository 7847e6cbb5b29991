//! In-memory entry store
//!
//! Maps endpoint paths to their last successfully decoded value and freshness
//! metadata. Entries are replaced wholesale under a write lock, so a reader
//! never sees a value paired with another refresh's timestamp.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::error::CacheError;

/// Type-erased decoded value shared with callers
pub(crate) type Value = Arc<dyn Any + Send + Sync>;

/// A cached value together with its freshness metadata
#[derive(Clone)]
pub(crate) struct CacheEntry {
    /// Last successfully decoded value, `None` until the first refresh
    pub value: Option<Value>,
    /// When the value was stored, `None` means never populated
    pub updated_at: Option<DateTime<Utc>>,
    /// How long after `updated_at` the value stays fresh
    pub expiration: Duration,
    /// Registration that owns this entry
    pub generation: u64,
}

impl CacheEntry {
    /// Creates an entry that has never been refreshed
    pub fn unpopulated(generation: u64, expiration: Duration) -> Self {
        Self {
            value: None,
            updated_at: None,
            expiration,
            generation,
        }
    }

    /// Whether the entry is stale at `now`. Never populated entries are always stale.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        let Some(updated_at) = self.updated_at else {
            return true;
        };
        match chrono::Duration::from_std(self.expiration) {
            Ok(window) => now.signed_duration_since(updated_at) > window,
            // Windows too large for chrono never elapse
            Err(_) => false,
        }
    }

    /// Converts the entry into a typed view for `path`.
    pub fn typed<T: Any + Send + Sync>(&self, path: &str, now: DateTime<Utc>) -> Result<CachedData<T>, CacheError> {
        let data = self
            .value
            .clone()
            .map(|value| downcast::<T>(path, value))
            .transpose()?;

        Ok(CachedData {
            path: path.to_string(),
            data,
            updated_at: self.updated_at,
            is_expired: self.is_expired_at(now),
        })
    }
}

/// Recovers the concrete type of a stored value
pub(crate) fn downcast<T: Any + Send + Sync>(path: &str, value: Value) -> Result<Arc<T>, CacheError> {
    value.downcast::<T>().map_err(|_| CacheError::TypeMismatch {
        path: path.to_string(),
        expected: std::any::type_name::<T>(),
    })
}

/// Result of reading from the cache, including metadata about freshness
///
/// Stale entries are still returned (with `is_expired = true`) so callers can
/// decide whether last known data is good enough.
#[derive(Debug)]
pub struct CachedData<T> {
    path: String,
    /// The cached data, absent only if the endpoint was never populated
    pub data: Option<Arc<T>>,
    /// When the data was last refreshed
    pub updated_at: Option<DateTime<Utc>>,
    /// Whether the entry is past its freshness window
    pub is_expired: bool,
}

impl<T> CachedData<T> {
    /// Returns the data if it is fresh, or [`CacheError::Expired`] otherwise.
    pub fn into_fresh(self) -> Result<Arc<T>, CacheError> {
        match self.data {
            Some(data) if !self.is_expired => Ok(data),
            _ => Err(CacheError::Expired(self.path)),
        }
    }

    /// The path this data was read for
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Concurrent map from endpoint path to [`CacheEntry`]
#[derive(Default)]
pub(crate) struct Store {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of the entry for `path`
    pub fn get(&self, path: &str) -> Option<CacheEntry> {
        self.entries.read().get(path).cloned()
    }

    /// Inserts or replaces the entry for `path`
    pub fn put(&self, path: &str, entry: CacheEntry) {
        self.entries.write().insert(path.to_string(), entry);
    }

    /// Stores a freshly decoded value.
    ///
    /// The write only lands if the entry still belongs to registration
    /// `generation`; returns whether it did.
    pub fn update(&self, path: &str, generation: u64, value: Value, at: DateTime<Utc>) -> bool {
        let mut entries = self.entries.write();
        match entries.get_mut(path) {
            Some(entry) if entry.generation == generation => {
                *entry = CacheEntry {
                    value: Some(value),
                    updated_at: Some(at),
                    expiration: entry.expiration,
                    generation,
                };
                true
            }
            _ => false,
        }
    }

    /// Drops the entry for `path` if it still belongs to registration `generation`
    pub fn remove(&self, path: &str, generation: u64) -> Option<CacheEntry> {
        let mut entries = self.entries.write();
        if entries.get(path).is_some_and(|entry| entry.generation == generation) {
            entries.remove(path)
        } else {
            None
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }
}
