//! Self-refreshing cache of endpoint responses
//!
//! [`CachedClient`] keeps the last decoded response of each registered
//! endpoint in memory and refreshes it in the background on a schedule.
//! Reads never block on other keys, and concurrent stale reads of one key
//! share a single fetch.

use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::error::{CacheError, DecodeError, FetchError};
use super::schedule::SchedulePolicy;
use super::scheduler::{spawn_ticker, CronScheduler, Job, JobId};
use super::store::{downcast, CacheEntry, CachedData, Store, Value};
use crate::http::{Client, Fetch};

/// Upper bound for a single background refresh
pub const REFRESH_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a cached endpoint
///
/// Deserializable from config files, with `expiration` written as a
/// human readable duration such as `"5m"`.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// API endpoint path, also the cache key
    pub path: String,
    /// `@every <duration>` or a cron expression
    pub schedule: String,
    /// How long a refreshed value stays fresh
    #[serde(with = "humantime_serde")]
    pub expiration: Duration,
    /// Start unpopulated instead of fetching during registration
    #[serde(default)]
    pub skip_initial_fetch: bool,
}

impl CacheConfig {
    pub fn new(path: impl Into<String>, schedule: impl Into<String>, expiration: Duration) -> Self {
        Self {
            path: path.into(),
            schedule: schedule.into(),
            expiration,
            skip_initial_fetch: false,
        }
    }

    /// Registers without the initial fetch
    pub fn skip_initial_fetch(mut self) -> Self {
        self.skip_initial_fetch = true;
        self
    }
}

type Decoder = fn(&[u8]) -> Result<Value, DecodeError>;

fn decode_json<T: DeserializeOwned + Send + Sync + 'static>(bytes: &[u8]) -> Result<Value, DecodeError> {
    let value: T = serde_json::from_slice(bytes)?;
    Ok(Arc::new(value))
}

/// Per-registration refresh state
struct Endpoint {
    generation: u64,
    decode: Decoder,
    /// Held for the duration of a refresh
    refresh_lock: tokio::sync::Mutex<()>,
}

/// Handle to a key's background schedule
struct ScheduledTask {
    stop: CancellationToken,
    cron_job: Option<JobId>,
}

impl ScheduledTask {
    fn cancel(self, cron: &CronScheduler) {
        self.stop.cancel();
        if let Some(id) = self.cron_job {
            cron.remove(id);
        }
    }
}

struct Inner<F> {
    fetcher: F,
    store: Store,
    endpoints: RwLock<HashMap<String, Arc<Endpoint>>>,
    tasks: Mutex<HashMap<String, ScheduledTask>>,
    cron: CronScheduler,
    refresh_timeout: Duration,
    next_generation: AtomicU64,
    stopped: AtomicBool,
}

impl<F> Inner<F> {
    fn endpoint(&self, path: &str) -> Option<Arc<Endpoint>> {
        self.endpoints.read().get(path).cloned()
    }

    fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        let tasks: Vec<ScheduledTask> = self.tasks.lock().drain().map(|(_, task)| task).collect();
        for task in tasks {
            task.cancel(&self.cron);
        }
        self.cron.stop();
        tracing::debug!("cache stopped");
    }
}

impl<F: Fetch> Inner<F> {
    /// Fetches and decodes `path`, then stores the result.
    ///
    /// Failures leave the stored entry untouched.
    async fn refresh(&self, path: &str, endpoint: &Endpoint) -> Result<Value, CacheError> {
        let bytes = self.fetcher.fetch(path).await.map_err(|source| CacheError::Fetch {
            path: path.to_string(),
            source,
        })?;
        let value = (endpoint.decode)(&bytes).map_err(|source| CacheError::Decode {
            path: path.to_string(),
            source,
        })?;

        if self.store.update(path, endpoint.generation, Arc::clone(&value), Utc::now()) {
            tracing::debug!(path = %path, "cache updated");
        } else {
            tracing::debug!(path = %path, "discarding refresh for a replaced registration");
        }
        Ok(value)
    }
}

impl<F> Drop for Inner<F> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Runs one scheduled refresh for `path`.
///
/// No-op once `stop` is cancelled or the registration was replaced. A firing
/// that finds a refresh of the same key in flight is skipped. Errors are
/// logged and never reach readers.
async fn scheduled_refresh<F: Fetch>(
    inner: Weak<Inner<F>>,
    path: String,
    generation: u64,
    stop: CancellationToken,
) {
    if stop.is_cancelled() {
        return;
    }
    let Some(inner) = inner.upgrade() else {
        return;
    };
    let Some(endpoint) = inner
        .endpoint(&path)
        .filter(|endpoint| endpoint.generation == generation)
    else {
        return;
    };
    let Ok(_guard) = endpoint.refresh_lock.try_lock() else {
        tracing::debug!(path = %path, "refresh already in flight, skipping");
        return;
    };

    let result = match tokio::time::timeout(inner.refresh_timeout, inner.refresh(&path, &endpoint)).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(CacheError::Fetch {
            path: path.clone(),
            source: FetchError::TimedOut(inner.refresh_timeout),
        }),
    };
    if let Err(err) = result {
        tracing::warn!(path = %path, error = %err, "error updating cache");
    }
}

/// HTTP client with self-refreshing cached endpoints
///
/// Cloning is cheap and yields a handle to the same cache. Independent
/// instances share nothing. Background updates stop on [`stop`](Self::stop)
/// or when the last handle is dropped.
pub struct CachedClient<F = Client> {
    inner: Arc<Inner<F>>,
}

impl<F> Clone for CachedClient<F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl CachedClient<Client> {
    /// Creates a cached client over a default [`Client`] for `base_url`
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_fetcher(Client::new(base_url))
    }
}

impl<F: Fetch> CachedClient<F> {
    pub fn with_fetcher(fetcher: F) -> Self {
        Self::with_refresh_timeout(fetcher, REFRESH_TIMEOUT)
    }

    /// Creates a cached client whose background refreshes are bounded by `refresh_timeout`
    pub fn with_refresh_timeout(fetcher: F, refresh_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                fetcher,
                store: Store::new(),
                endpoints: RwLock::new(HashMap::new()),
                tasks: Mutex::new(HashMap::new()),
                cron: CronScheduler::new(),
                refresh_timeout,
                next_generation: AtomicU64::new(1),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// The wrapped fetcher, for uncached requests
    pub fn fetcher(&self) -> &F {
        &self.inner.fetcher
    }

    /// Registers an endpoint and starts its background updates.
    ///
    /// Unless `skip_initial_fetch` is set, the endpoint is fetched once before
    /// returning and any failure is returned; the endpoint is then not
    /// registered. Registering a path again replaces the previous
    /// registration. Cancel by dropping the future.
    pub async fn register<T>(&self, config: CacheConfig) -> Result<(), CacheError>
    where
        T: DeserializeOwned + Send + Sync + 'static,
    {
        if self.inner.stopped.load(Ordering::Acquire) {
            return Err(CacheError::Stopped);
        }

        let CacheConfig {
            path,
            schedule,
            expiration,
            skip_initial_fetch,
        } = config;
        let policy = SchedulePolicy::resolve(&schedule).map_err(|source| CacheError::Schedule {
            path: path.clone(),
            source,
        })?;

        self.stop_updates(&path);

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let endpoint = Arc::new(Endpoint {
            generation,
            decode: decode_json::<T>,
            refresh_lock: tokio::sync::Mutex::new(()),
        });
        self.inner
            .endpoints
            .write()
            .insert(path.clone(), Arc::clone(&endpoint));
        self.inner
            .store
            .put(&path, CacheEntry::unpopulated(generation, expiration));

        if !skip_initial_fetch {
            // Also unwinds the registration if this future is dropped mid-fetch
            let pending = PendingRegistration {
                cache: self,
                path: &path,
                generation,
            };
            {
                let _guard = endpoint.refresh_lock.lock().await;
                self.inner.refresh(&path, &endpoint).await?;
            }
            std::mem::forget(pending);
        }

        let stop = CancellationToken::new();
        let job = self.scheduled_job(path.clone(), generation, stop.clone());
        let cron_job = match policy {
            SchedulePolicy::FixedPeriod(period) => {
                spawn_ticker(period, stop.clone(), job);
                None
            }
            SchedulePolicy::Cron(rules) => Some(self.inner.cron.add(rules, job)),
        };
        let task = ScheduledTask { stop, cron_job };

        let previous = {
            let mut tasks = self.inner.tasks.lock();
            // `stop()` may have drained the registry while we were fetching
            if self.inner.stopped.load(Ordering::Acquire) {
                drop(tasks);
                task.cancel(&self.inner.cron);
                return Err(CacheError::Stopped);
            }
            tasks.insert(path.clone(), task)
        };
        if let Some(previous) = previous {
            previous.cancel(&self.inner.cron);
        }

        tracing::debug!(path = %path, schedule = %schedule, ?expiration, "registered cached endpoint");
        Ok(())
    }

    /// Returns the cached value for `path` without any network activity.
    ///
    /// Stale values are returned with `is_expired` set; use
    /// [`CachedData::into_fresh`] to turn staleness into an error.
    pub fn read_cached<T: Any + Send + Sync>(&self, path: &str) -> Result<CachedData<T>, CacheError> {
        let entry = self
            .inner
            .store
            .get(path)
            .ok_or_else(|| CacheError::NotFound(path.to_string()))?;
        entry.typed(path, Utc::now())
    }

    /// Returns the cached value for `path`, fetching it first if stale.
    ///
    /// Fresh values are returned without I/O. Concurrent callers that find
    /// the entry stale wait for a single shared refresh.
    pub async fn read_or_fetch<T: Any + Send + Sync>(&self, path: &str) -> Result<Arc<T>, CacheError> {
        if let Some(value) = self.fresh_value::<T>(path)? {
            return Ok(value);
        }

        let endpoint = self
            .inner
            .endpoint(path)
            .ok_or_else(|| CacheError::NotFound(path.to_string()))?;
        let _guard = endpoint.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited
        if let Some(value) = self.fresh_value::<T>(path)? {
            return Ok(value);
        }

        let value = self.inner.refresh(path, &endpoint).await?;
        downcast(path, value)
    }

    /// Stops background updates for `path`.
    ///
    /// The last cached value stays readable. A refresh already running is
    /// allowed to finish and may still store its result. Calling this for an
    /// unknown or already stopped path does nothing.
    pub fn stop_updates(&self, path: &str) {
        let task = self.inner.tasks.lock().remove(path);
        if let Some(task) = task {
            task.cancel(&self.inner.cron);
            tracing::debug!(path = %path, "stopped cache updates");
        }
    }

    /// Stops all background updates and the shared cron evaluator.
    ///
    /// Cached values remain readable; nothing is refreshed in the background
    /// afterwards and further registrations fail with [`CacheError::Stopped`].
    pub fn stop(&self) {
        self.inner.shutdown();
    }

    /// Whether `path` currently has background updates scheduled
    pub fn is_scheduled(&self, path: &str) -> bool {
        self.inner.tasks.lock().contains_key(path)
    }

    fn fresh_value<T: Any + Send + Sync>(&self, path: &str) -> Result<Option<Arc<T>>, CacheError> {
        let entry = self
            .inner
            .store
            .get(path)
            .ok_or_else(|| CacheError::NotFound(path.to_string()))?;
        if entry.is_expired_at(Utc::now()) {
            return Ok(None);
        }
        entry.value.map(|value| downcast(path, value)).transpose()
    }

    /// Drops a registration whose initial fetch failed or was cancelled
    fn forget(&self, path: &str, generation: u64) {
        self.inner.store.remove(path, generation);
        let mut endpoints = self.inner.endpoints.write();
        if endpoints
            .get(path)
            .is_some_and(|endpoint| endpoint.generation == generation)
        {
            endpoints.remove(path);
        }
    }

    fn scheduled_job(&self, path: String, generation: u64, stop: CancellationToken) -> Job {
        let inner = Arc::downgrade(&self.inner);
        Arc::new(move || scheduled_refresh(inner.clone(), path.clone(), generation, stop.clone()).boxed())
    }
}

/// Removes a registration whose initial fetch did not complete
struct PendingRegistration<'a, F: Fetch> {
    cache: &'a CachedClient<F>,
    path: &'a str,
    generation: u64,
}

impl<F: Fetch> Drop for PendingRegistration<'_, F> {
    fn drop(&mut self) {
        self.cache.forget(self.path, self.generation);
    }
}
