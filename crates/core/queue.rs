//! Queue client abstraction.
//!
//! The endpoint talks to the job-queue server through these traits so that
//! the poll cycle does not depend on a particular wire client. The beanstalkd
//! client lives in its own crate; [`MemoryConnector`](crate::MemoryConnector)
//! is an in-process implementation.

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::Result;

/// Job attributes reported by `stats-job` (tube, pri, age, reserves, ...).
pub type JobStats = HashMap<String, String>;

/// Stats key naming the tube a job lives in.
pub const STAT_TUBE: &str = "tube";

/// A job handed out by `reserve`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedJob {
    /// Server-assigned job id.
    pub id: u64,
    /// Raw job payload.
    pub body: Vec<u8>,
}

/// An established connection to the queue server.
///
/// Methods take `&mut self`: the active tube is connection state and the
/// connection is never shared between concurrent callers.
#[async_trait]
pub trait QueueConnection: Send + 'static {
    /// Reserve one job from the watched tubes, waiting up to `timeout`.
    ///
    /// Returns [`TubesetError::ReserveTimeout`](crate::TubesetError::ReserveTimeout)
    /// when no job became ready in time.
    async fn reserve(&mut self, timeout: Duration) -> Result<ReservedJob>;

    /// Fetch the server's attributes for a job.
    async fn stats_job(&mut self, id: u64) -> Result<JobStats>;

    /// Select the tube used by tube-scoped commands.
    async fn use_tube(&mut self, tube: &str) -> Result<()>;

    /// Name of the currently selected tube.
    fn current_tube(&self) -> &str;

    /// Delete a reserved job.
    async fn delete(&mut self, id: u64) -> Result<()>;

    /// Close the connection. Further calls fail.
    async fn close(&mut self) -> Result<()>;
}

/// Dials connections to the queue server.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced by this connector.
    type Connection: QueueConnection;

    /// Dial `server` and watch `tubes` for reservations.
    async fn connect(&self, server: &str, tubes: &[String]) -> Result<Self::Connection>;
}
