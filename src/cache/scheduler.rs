//! Background refresh scheduling
//!
//! Two drivers run refresh jobs: a dedicated ticker task per key for short
//! fixed periods, and one shared cron evaluator task per cache instance for
//! everything else. Both stop through `CancellationToken`s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::schedule::CronRules;

/// A type-erased refresh routine, invoked once per trigger
pub(crate) type Job = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Identifier of a job registered with the [`CronScheduler`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct JobId(u64);

/// Spawns a task that runs `job` every `period` until `stop` is cancelled.
///
/// The first run happens one period after spawning. A run that is in flight
/// when `stop` fires is allowed to finish; ticks missed while a run was slow
/// are skipped rather than queued.
pub(crate) fn spawn_ticker(period: Duration, stop: CancellationToken, job: Job) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first tick (immediate)
        interval.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => {
                    break;
                }
                _ = interval.tick() => {
                    job().await;
                }
            }
        }
        tracing::debug!(?period, "ticker stopped");
    })
}

struct CronJob {
    rules: CronRules,
    next: Option<DateTime<Local>>,
    job: Job,
}

struct CronShared {
    jobs: Mutex<HashMap<JobId, CronJob>>,
    /// Wakes the evaluator when the job set changes
    changed: Notify,
    shutdown: CancellationToken,
}

/// Shared evaluator running cron-scheduled jobs for one cache instance.
///
/// Calendar rules are evaluated in local time.
/// The evaluator task is spawned lazily on the first [`add`](Self::add) and
/// runs until [`stop`](Self::stop). Every due job is spawned onto its own
/// task, so a slow job never delays another.
pub(crate) struct CronScheduler {
    shared: Arc<CronShared>,
    next_id: AtomicU64,
    started: AtomicBool,
}

impl Default for CronScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl CronScheduler {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(CronShared {
                jobs: Mutex::new(HashMap::new()),
                changed: Notify::new(),
                shutdown: CancellationToken::new(),
            }),
            next_id: AtomicU64::new(1),
            started: AtomicBool::new(false),
        }
    }

    /// Registers `job` to run at each instant produced by `rules`
    pub fn add(&self, rules: CronRules, job: Job) -> JobId {
        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let next = rules.next_after(Local::now());
        self.shared.jobs.lock().insert(id, CronJob { rules, next, job });
        self.shared.changed.notify_one();

        if !self.started.swap(true, Ordering::AcqRel) {
            tokio::spawn(run_evaluator(Arc::clone(&self.shared)));
        }
        id
    }

    /// Deregisters a job; returns whether it was still registered
    pub fn remove(&self, id: JobId) -> bool {
        let removed = self.shared.jobs.lock().remove(&id).is_some();
        if removed {
            self.shared.changed.notify_one();
        }
        removed
    }

    /// Stops the evaluator task. Jobs already spawned run to completion.
    pub fn stop(&self) {
        self.shared.shutdown.cancel();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.shared.jobs.lock().len()
    }
}

async fn run_evaluator(shared: Arc<CronShared>) {
    tracing::debug!("cron evaluator started");
    loop {
        let now = Local::now();
        let mut due = Vec::new();
        let mut wake_at: Option<DateTime<Local>> = None;

        {
            let mut jobs = shared.jobs.lock();
            // Schedules with no further instants are finished
            jobs.retain(|_, job| job.next.is_some());
            for job in jobs.values_mut() {
                if let Some(next) = job.next {
                    if next <= now {
                        due.push(Arc::clone(&job.job));
                        job.next = job.rules.next_after(now);
                    }
                }
                if let Some(next) = job.next {
                    wake_at = Some(wake_at.map_or(next, |current| current.min(next)));
                }
            }
        }

        for job in due {
            tokio::spawn(job());
        }

        let sleep_for = wake_at.map(|at| (at - now).to_std().unwrap_or(Duration::ZERO));
        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = shared.changed.notified() => {}
            _ = sleep_or_pending(sleep_for) => {}
        }
    }
    tracing::debug!("cron evaluator stopped");
}

async fn sleep_or_pending(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
