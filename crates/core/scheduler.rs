//! Cron-style scheduler driving the poll cycle.
//!
//! Each scheduled entry runs its own timer task. Ticks are spawned as
//! separate tasks so a failing or panicking callback only loses that tick.
//! An entry has at most one tick in flight; a tick that comes due while the
//! previous one is still running is skipped.

use chrono::Utc;
use cron::Schedule;
use std::collections::HashMap;
use std::future::Future;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::config::parse_duration;
use crate::error::{Result, TubesetError};

/// When a scheduled entry fires.
#[derive(Debug, Clone)]
pub enum Cadence {
    /// Fixed period, written `@every <duration>`.
    Every(Duration),
    /// Cron schedule.
    Cron(Box<Schedule>),
}

impl Cadence {
    /// Parse a schedule expression.
    ///
    /// Accepts `@every 5s` (or `every 5s`), the `@hourly`/`@daily`/...
    /// descriptors, 6/7-field cron with seconds, and 5-field Unix cron which
    /// fires at second zero.
    pub fn parse(expr: &str) -> Result<Self> {
        let expr = expr.trim();
        let bad = |reason: String| TubesetError::BadExpression(format!("{:?}: {}", expr, reason));

        if let Some(period) = expr
            .strip_prefix("@every")
            .or_else(|| expr.strip_prefix("every "))
        {
            let period = parse_duration(period).map_err(|e| bad(e.to_string()))?;
            if period.is_zero() {
                return Err(bad("period must be positive".to_string()));
            }
            return Ok(Cadence::Every(period));
        }

        let normalized = if expr.split_whitespace().count() == 5 {
            format!("0 {} *", expr)
        } else {
            expr.to_string()
        };
        Schedule::from_str(&normalized)
            .map(|s| Cadence::Cron(Box::new(s)))
            .map_err(|e| bad(e.to_string()))
    }
}

/// Identifier of a scheduled entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Runs callbacks on schedule expressions until stopped.
pub struct Scheduler {
    entries: Mutex<HashMap<TaskId, JoinHandle<()>>>,
    next_id: AtomicU64,
    running: Arc<AtomicBool>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create a running scheduler with no entries.
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TaskId, JoinHandle<()>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Invoke `callback` on every tick of `expr`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, expr: &str, callback: F) -> Result<TaskId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        if !self.is_running() {
            return Err(TubesetError::Config("scheduler is stopped".to_string()));
        }
        let cadence = Cadence::parse(expr)?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TubesetError::Config(format!("no tokio runtime: {}", e)))?;

        let id = TaskId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let entry = Entry {
            id,
            expr: expr.to_string(),
            cadence,
            running: self.running.clone(),
        };
        let handle = runtime.spawn(entry.run(callback));
        self.entries().insert(id, handle);

        tracing::debug!(task_id = %id, expr = %expr, "Scheduled task");
        Ok(id)
    }

    /// Remove an entry. Ticks already running are left to finish.
    pub fn unschedule(&self, id: TaskId) -> bool {
        match self.entries().remove(&id) {
            Some(handle) => {
                handle.abort();
                tracing::debug!(task_id = %id, "Unscheduled task");
                true
            }
            None => false,
        }
    }

    /// Stop every entry. Idempotent.
    pub fn stop(&self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        for (_, handle) in self.entries().drain() {
            handle.abort();
        }
        if was_running {
            tracing::debug!("Scheduler stopped");
        }
    }

    /// Whether `stop` has not been called.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of scheduled entries.
    pub fn len(&self) -> usize {
        self.entries().len()
    }

    /// Whether no entries are scheduled.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

struct Entry {
    id: TaskId,
    expr: String,
    cadence: Cadence,
    running: Arc<AtomicBool>,
}

impl Entry {
    async fn run<F, Fut>(self, callback: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let mut next_every: Option<Instant> = None;
        let in_flight = Arc::new(Semaphore::new(1));

        while self.running.load(Ordering::SeqCst) {
            match &self.cadence {
                Cadence::Every(period) => {
                    let due = *next_every.get_or_insert_with(|| Instant::now() + *period);
                    tokio::time::sleep_until(due).await;
                    // Skip missed ticks rather than bursting.
                    let now = Instant::now();
                    let mut following = due + *period;
                    if following <= now {
                        following = now + *period;
                    }
                    next_every = Some(following);
                }
                Cadence::Cron(schedule) => {
                    let Some(due) = schedule.upcoming(Utc).next() else {
                        tracing::info!(task_id = %self.id, expr = %self.expr, "Schedule has no further ticks");
                        break;
                    };
                    let wait = (due - Utc::now()).to_std().unwrap_or(Duration::ZERO);
                    tokio::time::sleep(wait).await;
                }
            }

            if !self.running.load(Ordering::SeqCst) {
                break;
            }

            let Ok(permit) = in_flight.clone().try_acquire_owned() else {
                tracing::debug!(task_id = %self.id, expr = %self.expr, "Previous tick still running, skipping");
                continue;
            };
            let tick = tokio::spawn(callback());
            let id = self.id;
            tokio::spawn(async move {
                let _permit = permit;
                match tick.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(task_id = %id, error = %e, "Scheduled tick failed"),
                    Err(e) if e.is_panic() => {
                        tracing::error!(task_id = %id, "Scheduled tick panicked")
                    }
                    Err(_) => {}
                }
            });
        }
    }
}
