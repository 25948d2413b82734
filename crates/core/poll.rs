//! The per-tick poll cycle.
//!
//! One cycle reserves a job, reads its stats, selects the job's tube, deletes
//! the job and dispatches it to the router:
//!
//! ```text
//! Idle -> Reserving -> Stating -> Switching -> Deleting -> Dispatching -> Idle
//!            |            |           |
//!            +------------+-----------+--> Aborted
//! ```
//!
//! A failed delete does not stop dispatch unless the endpoint is configured
//! with `require_delete`; the job then stays reserved on the server and will
//! be handed out again once its reservation expires.

use std::time::Duration;

use crate::error::TubesetError;
use crate::queue::{QueueConnection, STAT_TUBE};
use crate::router::{dispatch, Exchange, Router};

/// Stage of a poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStage {
    /// Between cycles.
    Idle,
    /// Waiting for a job on the watched tubes.
    Reserving,
    /// Reading the reserved job's stats.
    Stating,
    /// Selecting the job's tube.
    Switching,
    /// Removing the job from the queue.
    Deleting,
    /// Handing the job to the router.
    Dispatching,
    /// The cycle stopped early.
    Aborted,
}

impl std::fmt::Display for PollStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PollStage::Idle => "idle",
            PollStage::Reserving => "reserving",
            PollStage::Stating => "stating",
            PollStage::Switching => "switching",
            PollStage::Deleting => "deleting",
            PollStage::Dispatching => "dispatching",
            PollStage::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// How a poll cycle ended.
#[derive(Debug)]
pub enum PollOutcome {
    /// No router attached; nothing was done.
    NoRouter,
    /// The schedule that triggered this tick was stopped; nothing was done.
    Stopped,
    /// No job became ready within the reservation timeout.
    NoJob,
    /// The cycle stopped at `stage`; nothing was dispatched.
    Aborted {
        stage: PollStage,
        error: TubesetError,
    },
    /// Delete failed and the endpoint requires a successful delete before
    /// dispatch. The job stays reserved.
    Withheld { job_id: u64, error: TubesetError },
    /// The job was handed to the router.
    Dispatched {
        job_id: u64,
        tube: String,
        /// Why the job could not be removed from the queue, if it was not.
        delete_error: Option<TubesetError>,
        /// Whether the router finished within the dispatch timeout.
        completed: bool,
    },
}

impl PollOutcome {
    /// Whether the router was invoked.
    pub fn is_dispatched(&self) -> bool {
        matches!(self, PollOutcome::Dispatched { .. })
    }

    /// Whether a dispatched job was also removed from the queue.
    pub fn is_deleted(&self) -> bool {
        matches!(self, PollOutcome::Dispatched { delete_error: None, .. })
    }

    /// The error that ended or degraded the cycle, if any.
    pub fn error(&self) -> Option<&TubesetError> {
        match self {
            PollOutcome::Aborted { error, .. } | PollOutcome::Withheld { error, .. } => Some(error),
            PollOutcome::Dispatched { delete_error, .. } => delete_error.as_ref(),
            _ => None,
        }
    }
}

/// Settings a cycle runs with.
#[derive(Debug, Clone, Copy)]
pub struct CycleSettings {
    /// How long `reserve` waits for a job.
    pub reserve_timeout: Duration,
    /// How long the router may take per job.
    pub dispatch_timeout: Duration,
    /// Withhold dispatch when delete fails.
    pub require_delete: bool,
}

/// Runs one cycle over an exclusively borrowed connection.
pub struct PollCycle<'a, T: QueueConnection> {
    conn: &'a mut T,
    settings: CycleSettings,
    stage: PollStage,
}

impl<'a, T: QueueConnection> PollCycle<'a, T> {
    /// Start in `Idle` over `conn`.
    pub fn new(conn: &'a mut T, settings: CycleSettings) -> Self {
        Self {
            conn,
            settings,
            stage: PollStage::Idle,
        }
    }

    /// Current stage.
    pub fn stage(&self) -> PollStage {
        self.stage
    }

    fn enter(&mut self, stage: PollStage) {
        tracing::trace!(from = %self.stage, to = %stage, "Poll stage");
        self.stage = stage;
    }

    fn abort(&mut self, error: TubesetError) -> PollOutcome {
        let stage = self.stage;
        self.enter(PollStage::Aborted);
        PollOutcome::Aborted { stage, error }
    }

    /// Run the cycle to completion and return to `Idle`.
    pub async fn run(mut self, router: &dyn Router) -> PollOutcome {
        let outcome = self.drive(router).await;
        self.enter(PollStage::Idle);
        outcome
    }

    async fn drive(&mut self, router: &dyn Router) -> PollOutcome {
        self.enter(PollStage::Reserving);
        let job = match self.conn.reserve(self.settings.reserve_timeout).await {
            Ok(job) => job,
            Err(e) if e.is_timeout() => {
                tracing::debug!(timeout = ?self.settings.reserve_timeout, "No job ready");
                self.enter(PollStage::Idle);
                return PollOutcome::NoJob;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reserve job failed");
                return self.abort(e);
            }
        };

        self.enter(PollStage::Stating);
        let stats = match self.conn.stats_job(job.id).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(job_id = job.id, error = %e, "Get job stats failed");
                return self.abort(e);
            }
        };

        self.enter(PollStage::Switching);
        let tube = match stats.get(STAT_TUBE) {
            Some(tube) => tube.clone(),
            None => {
                let e = TubesetError::Stats(format!("job {} stats have no tube", job.id));
                tracing::warn!(job_id = job.id, error = %e, "Get job stats failed");
                return self.abort(e);
            }
        };
        if let Err(e) = self.conn.use_tube(&tube).await {
            tracing::warn!(job_id = job.id, tube = %tube, error = %e, "Use tube failed");
            return self.abort(e);
        }

        self.enter(PollStage::Deleting);
        let delete_error = match self.conn.delete(job.id).await {
            Ok(()) => None,
            Err(e) if self.settings.require_delete => {
                tracing::warn!(job_id = job.id, tube = %tube, error = %e, "Delete job failed, withholding dispatch");
                self.enter(PollStage::Idle);
                return PollOutcome::Withheld { job_id: job.id, error: e };
            }
            Err(e) => {
                tracing::warn!(job_id = job.id, tube = %tube, error = %e, "Delete job failed, dispatching anyway");
                Some(e)
            }
        };

        self.enter(PollStage::Dispatching);
        let mut exchange = Exchange::from_job(job.body, stats);
        let completed = dispatch(router, &mut exchange, self.settings.dispatch_timeout).await;
        let deleted = delete_error.is_none();
        tracing::debug!(job_id = job.id, tube = %tube, deleted, completed, "Job dispatched");

        PollOutcome::Dispatched {
            job_id: job.id,
            tube,
            delete_error,
            completed,
        }
    }
}
