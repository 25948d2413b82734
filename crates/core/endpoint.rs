//! Scheduled tube-set consumer endpoint.
//!
//! The endpoint owns one lazily dialed queue connection and, once started, a
//! scheduler that runs a [`PollCycle`] on every tick of the configured
//! expression. Cycles run under the endpoint's poll lock, so a slow router
//! holds back the next reservation instead of piling up work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use crate::config::EndpointConfig;
use crate::connection::ConnectionHolder;
use crate::error::{Result, TubesetError};
use crate::poll::{CycleSettings, PollCycle, PollOutcome, PollStage};
use crate::queue::Connector;
use crate::router::Router;
use crate::scheduler::{Scheduler, TaskId};

/// Type identifier of this endpoint.
pub const ENDPOINT_TYPE: &str = "endpoint/beanstalkdTubeset";

/// State guarded by the poll lock.
#[derive(Default)]
struct PollState {
    router: Option<Arc<dyn Router>>,
}

struct Inner<C: Connector> {
    config: EndpointConfig,
    holder: ConnectionHolder<C>,
    poll_lock: tokio::sync::Mutex<PollState>,
}

struct ScheduledPoll {
    scheduler: Scheduler,
    task_id: TaskId,
    active: Arc<AtomicBool>,
}

/// Consumer endpoint reserving jobs from a set of tubes on a schedule.
pub struct TubesetEndpoint<C: Connector> {
    inner: Arc<Inner<C>>,
    schedule: Mutex<Option<ScheduledPoll>>,
}

impl<C: Connector> TubesetEndpoint<C> {
    /// Create an endpoint and, if `connect_on_init` is set, dial right away.
    ///
    /// A failed eager dial is logged and retried by [`start`](Self::start).
    pub async fn init(connector: C, config: EndpointConfig) -> Result<Self> {
        config.validate()?;
        let holder = ConnectionHolder::new(
            connector,
            config.server.clone(),
            config.tubes.clone(),
            config.setup_timeout,
        );
        let endpoint = Self {
            inner: Arc::new(Inner {
                config,
                holder,
                poll_lock: tokio::sync::Mutex::new(PollState::default()),
            }),
            schedule: Mutex::new(None),
        };

        if endpoint.inner.config.connect_on_init {
            if let Err(e) = endpoint.inner.holder.get().await {
                tracing::warn!(server = %endpoint.id(), error = %e, "Initial connect failed, deferring");
            }
        }
        Ok(endpoint)
    }

    /// Create an endpoint from a loose configuration map.
    pub async fn from_value(connector: C, configuration: serde_json::Value) -> Result<Self> {
        Self::init(connector, EndpointConfig::from_value(configuration)?).await
    }

    /// Endpoint id: the server address.
    pub fn id(&self) -> &str {
        &self.inner.config.server
    }

    /// Endpoint type identifier.
    pub fn endpoint_type(&self) -> &'static str {
        ENDPOINT_TYPE
    }

    /// Configuration the endpoint was built with.
    pub fn config(&self) -> &EndpointConfig {
        &self.inner.config
    }

    /// Whether a queue connection is currently held.
    pub fn is_connected(&self) -> bool {
        self.inner.holder.is_connected()
    }

    fn scheduled(&self) -> MutexGuard<'_, Option<ScheduledPoll>> {
        self.schedule.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the endpoint has a running schedule.
    pub fn is_started(&self) -> bool {
        self.scheduled().is_some()
    }

    /// Attach the router that receives exchanges.
    ///
    /// Fails with [`TubesetError::DuplicateRouter`] if one is already attached.
    pub async fn add_router(&self, router: Arc<dyn Router>) -> Result<String> {
        let mut state = self.inner.poll_lock.lock().await;
        if let Some(existing) = &state.router {
            return Err(TubesetError::DuplicateRouter(existing.id().to_string()));
        }
        let id = router.id().to_string();
        state.router = Some(router);
        tracing::debug!(endpoint = %self.id(), router_id = %id, "Router attached");
        Ok(id)
    }

    /// Detach the router. Waits for an in-flight poll to finish.
    pub async fn remove_router(&self, router_id: &str) -> Result<()> {
        let mut state = self.inner.poll_lock.lock().await;
        if state.router.take().is_some() {
            tracing::debug!(endpoint = %self.id(), router_id = %router_id, "Router detached");
        }
        Ok(())
    }

    /// Id of the attached router, if any.
    pub async fn router_id(&self) -> Option<String> {
        let state = self.inner.poll_lock.lock().await;
        state.router.as_ref().map(|r| r.id().to_string())
    }

    /// Ensure the connection and (re)install the poll schedule.
    ///
    /// A previous schedule is stopped before the new one is installed.
    pub async fn start(&self) -> Result<()> {
        self.inner.holder.get().await?;

        let previous = self.scheduled().take();
        if let Some(previous) = previous {
            previous.stop();
        }

        let scheduler = Scheduler::new();
        let active = Arc::new(AtomicBool::new(true));
        let weak: Weak<Inner<C>> = Arc::downgrade(&self.inner);
        let gate = active.clone();
        let task_id = scheduler.schedule(&self.inner.config.interval, move || {
            let inner = weak.clone();
            let gate = gate.clone();
            async move {
                if let Some(inner) = inner.upgrade() {
                    inner.poll(Some(gate.as_ref())).await;
                }
                Ok(())
            }
        })?;

        *self.scheduled() = Some(ScheduledPoll {
            scheduler,
            task_id,
            active,
        });
        tracing::info!(
            endpoint = %self.id(),
            tubes = ?self.inner.config.tubes,
            interval = %self.inner.config.interval,
            "Endpoint started"
        );
        Ok(())
    }

    /// Run one poll cycle now.
    pub async fn poll(&self) -> PollOutcome {
        self.inner.poll(None).await
    }

    /// Stop the schedule and close the connection.
    ///
    /// A cycle already in flight finishes before the connection closes.
    /// Idempotent, and safe to call on an endpoint that was never started.
    pub async fn close(&self) -> Result<()> {
        let scheduled = self.scheduled().take();
        if let Some(scheduled) = scheduled {
            scheduled.stop();
            tracing::info!(endpoint = %self.id(), "Endpoint stopped");
        }
        let _idle = self.inner.poll_lock.lock().await;
        if let Err(e) = self.inner.holder.release().await {
            tracing::warn!(endpoint = %self.id(), error = %e, "Closing queue connection failed");
        }
        Ok(())
    }

    /// Release everything held by the endpoint.
    pub async fn destroy(&self) {
        let _ = self.close().await;
    }
}

impl ScheduledPoll {
    fn stop(self) {
        self.active.store(false, Ordering::SeqCst);
        self.scheduler.unschedule(self.task_id);
        self.scheduler.stop();
    }
}

impl<C: Connector> Inner<C> {
    /// Run one cycle. `gate` is the schedule's active flag for scheduled
    /// ticks; a tick that was queued behind the lock when its schedule
    /// stopped does nothing.
    async fn poll(&self, gate: Option<&AtomicBool>) -> PollOutcome {
        let state = self.poll_lock.lock().await;
        if gate.is_some_and(|g| !g.load(Ordering::SeqCst)) {
            return PollOutcome::Stopped;
        }
        let Some(router) = state.router.clone() else {
            return PollOutcome::NoRouter;
        };

        let reserve_timeout = match self.config.reserve_timeout() {
            Ok(timeout) => timeout,
            Err(e) => {
                tracing::warn!(timeout = %self.config.timeout, error = %e, "Parse reserve timeout failed");
                return PollOutcome::Aborted {
                    stage: PollStage::Reserving,
                    error: e,
                };
            }
        };

        let conn = match self.holder.get().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(server = %self.config.server, error = %e, "Queue connection unavailable");
                return PollOutcome::Aborted {
                    stage: PollStage::Reserving,
                    error: e,
                };
            }
        };

        let settings = CycleSettings {
            reserve_timeout,
            dispatch_timeout: self.config.dispatch_timeout,
            require_delete: self.config.require_delete,
        };
        let outcome = {
            let mut conn = conn.lock().await;
            PollCycle::new(&mut *conn, settings).run(router.as_ref()).await
        };

        if outcome.error().is_some_and(TubesetError::is_connection_error) {
            self.holder.invalidate();
        }
        drop(state);
        outcome
    }
}
