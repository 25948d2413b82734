//! Router contract and exchange dispatch.

use async_trait::async_trait;
use std::time::Duration;

use crate::message::{RequestMessage, ResponseMessage};
use crate::queue::JobStats;

/// A request/response pair handed to the router.
#[derive(Debug)]
pub struct Exchange {
    pub request: RequestMessage,
    pub response: ResponseMessage,
}

impl Exchange {
    /// Build both sides from the same job payload and stats.
    pub fn from_job(body: Vec<u8>, stats: JobStats) -> Self {
        Self {
            request: RequestMessage::new(body.clone(), stats.clone()),
            response: ResponseMessage::new(body, stats),
        }
    }
}

/// Downstream processor receiving exchanges from an endpoint.
#[async_trait]
pub trait Router: Send + Sync {
    /// Identifier returned from `add_router`.
    fn id(&self) -> &str;

    /// Process one exchange. Outcomes are recorded on the exchange itself.
    async fn process(&self, exchange: &mut Exchange);
}

/// Run `router` on `exchange`, giving up after `timeout`.
///
/// Returns `false` if the router did not finish in time.
pub async fn dispatch(router: &dyn Router, exchange: &mut Exchange, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, router.process(exchange)).await {
        Ok(()) => true,
        Err(_) => {
            tracing::warn!(router_id = %router.id(), timeout = ?timeout, "Router dispatch timed out");
            false
        }
    }
}
