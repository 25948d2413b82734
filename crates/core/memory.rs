//! In-process queue server.
//!
//! `MemoryConnector` behaves like a small beanstalkd: jobs are put into named
//! tubes, reserved from the watched set, and deleted through the tube they
//! belong to. Every command a connection issues is journaled, and individual
//! commands can be made to fail, which makes it a convenient fixture for
//! exercising endpoints without a server.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::{Result, TubesetError};
use crate::queue::{Connector, JobStats, QueueConnection, ReservedJob, STAT_TUBE};

const POLL_STEP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone)]
struct StoredJob {
    id: u64,
    tube: String,
    body: Vec<u8>,
    extra: JobStats,
    reserves: u32,
}

#[derive(Debug, Default)]
struct QueueState {
    next_id: u64,
    ready: HashMap<String, VecDeque<StoredJob>>,
    reserved: HashMap<u64, StoredJob>,
    journal: Vec<String>,
    dials: usize,
    failing: Vec<Fault>,
}

/// A command that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Dialing fails.
    Connect,
    /// `reserve` fails with a protocol error.
    Reserve,
    /// `stats-job` fails.
    Stats,
    /// `use` fails.
    UseTube,
    /// `delete` fails.
    Delete,
    /// `delete` fails with a transport error.
    DeleteDisconnect,
    /// Every command fails with a transport error.
    Disconnect,
}

/// Connector for the in-process queue. Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryConnector {
    state: Arc<Mutex<QueueState>>,
    dial_delay: Duration,
}

impl MemoryConnector {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every dial take `delay` before completing.
    pub fn with_dial_delay(mut self, delay: Duration) -> Self {
        self.dial_delay = delay;
        self
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Put a ready job into `tube` and return its id.
    pub fn put(&self, tube: &str, body: impl Into<Vec<u8>>) -> u64 {
        self.put_with_stats(tube, body, JobStats::new())
    }

    /// Put a ready job with extra attributes reported by `stats-job`.
    pub fn put_with_stats(&self, tube: &str, body: impl Into<Vec<u8>>, extra: JobStats) -> u64 {
        let mut state = self.lock();
        state.next_id += 1;
        let job = StoredJob {
            id: state.next_id,
            tube: tube.to_string(),
            body: body.into(),
            extra,
            reserves: 0,
        };
        let id = job.id;
        state.ready.entry(tube.to_string()).or_default().push_back(job);
        id
    }

    /// Number of ready jobs in `tube`.
    pub fn ready_len(&self, tube: &str) -> usize {
        self.lock().ready.get(tube).map_or(0, VecDeque::len)
    }

    /// Number of jobs currently reserved.
    pub fn reserved_len(&self) -> usize {
        self.lock().reserved.len()
    }

    /// Whether a job still exists in any state.
    pub fn contains(&self, id: u64) -> bool {
        let state = self.lock();
        state.reserved.contains_key(&id)
            || state.ready.values().any(|q| q.iter().any(|j| j.id == id))
    }

    /// Number of completed dials.
    pub fn dials(&self) -> usize {
        self.lock().dials
    }

    /// Commands issued so far, e.g. `["reserve", "stats-job 1", "use orders", "delete 1"]`.
    pub fn journal(&self) -> Vec<String> {
        self.lock().journal.clone()
    }

    /// Make `fault` fail until [`MemoryConnector::heal`] is called.
    pub fn fail(&self, fault: Fault) {
        let mut state = self.lock();
        if !state.failing.contains(&fault) {
            state.failing.push(fault);
        }
    }

    /// Clear all injected faults.
    pub fn heal(&self) {
        self.lock().failing.clear();
    }

    fn is_failing(&self, fault: Fault) -> bool {
        self.lock().failing.contains(&fault)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    type Connection = MemoryConnection;

    async fn connect(&self, server: &str, tubes: &[String]) -> Result<MemoryConnection> {
        if !self.dial_delay.is_zero() {
            tokio::time::sleep(self.dial_delay).await;
        }
        if self.is_failing(Fault::Connect) {
            return Err(TubesetError::Connect(format!("{}: connection refused", server)));
        }
        self.lock().dials += 1;
        Ok(MemoryConnection {
            queue: self.clone(),
            watched: tubes.to_vec(),
            tube: crate::config::DEFAULT_TUBE.to_string(),
            closed: false,
        })
    }
}

/// Connection to a [`MemoryConnector`] queue.
#[derive(Debug)]
pub struct MemoryConnection {
    queue: MemoryConnector,
    watched: Vec<String>,
    tube: String,
    closed: bool,
}

impl MemoryConnection {
    fn command(&self, line: String) -> Result<()> {
        let mut state = self.queue.lock();
        state.journal.push(line);
        if self.closed || state.failing.contains(&Fault::Disconnect) {
            return Err(TubesetError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection closed",
            )));
        }
        Ok(())
    }

    fn try_reserve(&self) -> Option<ReservedJob> {
        let mut state = self.queue.lock();
        for tube in &self.watched {
            if let Some(mut job) = state.ready.get_mut(tube).and_then(VecDeque::pop_front) {
                job.reserves += 1;
                let reserved = ReservedJob {
                    id: job.id,
                    body: job.body.clone(),
                };
                state.reserved.insert(job.id, job);
                return Some(reserved);
            }
        }
        None
    }
}

#[async_trait]
impl QueueConnection for MemoryConnection {
    async fn reserve(&mut self, timeout: Duration) -> Result<ReservedJob> {
        self.command("reserve".to_string())?;
        if self.queue.is_failing(Fault::Reserve) {
            return Err(TubesetError::Reserve("INTERNAL_ERROR".to_string()));
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(job) = self.try_reserve() {
                return Ok(job);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Err(TubesetError::ReserveTimeout);
            }
            tokio::time::sleep(POLL_STEP.min(deadline - now)).await;
        }
    }

    async fn stats_job(&mut self, id: u64) -> Result<JobStats> {
        self.command(format!("stats-job {}", id))?;
        if self.queue.is_failing(Fault::Stats) {
            return Err(TubesetError::Stats("INTERNAL_ERROR".to_string()));
        }
        let state = self.queue.lock();
        let job = state
            .reserved
            .get(&id)
            .ok_or_else(|| TubesetError::Stats("NOT_FOUND".to_string()))?;
        let mut stats = JobStats::new();
        stats.insert("id".to_string(), job.id.to_string());
        stats.insert(STAT_TUBE.to_string(), job.tube.clone());
        stats.insert("state".to_string(), "reserved".to_string());
        stats.insert("pri".to_string(), "1024".to_string());
        stats.insert("age".to_string(), "0".to_string());
        stats.insert("reserves".to_string(), job.reserves.to_string());
        stats.extend(job.extra.clone());
        Ok(stats)
    }

    async fn use_tube(&mut self, tube: &str) -> Result<()> {
        self.command(format!("use {}", tube))?;
        if self.queue.is_failing(Fault::UseTube) {
            return Err(TubesetError::UseTube("BAD_FORMAT".to_string()));
        }
        self.tube = tube.to_string();
        Ok(())
    }

    fn current_tube(&self) -> &str {
        &self.tube
    }

    async fn delete(&mut self, id: u64) -> Result<()> {
        self.command(format!("delete {}", id))?;
        if self.queue.is_failing(Fault::Delete) {
            return Err(TubesetError::Delete("INTERNAL_ERROR".to_string()));
        }
        if self.queue.is_failing(Fault::DeleteDisconnect) {
            return Err(TubesetError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "no reply to delete",
            )));
        }
        let mut state = self.queue.lock();
        match state.reserved.get(&id) {
            Some(job) if job.tube == self.tube => {
                state.reserved.remove(&id);
                Ok(())
            }
            _ => Err(TubesetError::Delete("NOT_FOUND".to_string())),
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.command("quit".to_string())?;
        self.closed = true;
        Ok(())
    }
}
