//! # tubeset-core - Scheduled tube-set consumer endpoint
//!
//! This crate provides the pieces of an endpoint that periodically reserves
//! one job from a set of queue tubes and hands it to a router:
//! - `QueueConnection`/`Connector` traits for queue clients
//! - `ConnectionHolder` for the lazily dialed, cached connection
//! - `Scheduler` for cron and fixed-interval ticks
//! - `PollCycle` for reserve -> stats -> use -> delete -> dispatch
//! - `RequestMessage`/`ResponseMessage` and the `Router` contract
//! - `TubesetEndpoint` tying it together
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use tubeset_core::{EndpointConfig, Exchange, MemoryConnector, Message, Router, TubesetEndpoint};
//!
//! struct Printer;
//!
//! #[async_trait]
//! impl Router for Printer {
//!     fn id(&self) -> &str {
//!         "printer"
//!     }
//!
//!     async fn process(&self, exchange: &mut Exchange) {
//!         println!("{}", String::from_utf8_lossy(&exchange.request.body()));
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> tubeset_core::Result<()> {
//!     let config = EndpointConfig::builder()
//!         .tubes(["orders"])
//!         .interval("@every 1s")
//!         .timeout("2s")
//!         .build();
//!     let endpoint = TubesetEndpoint::init(MemoryConnector::new(), config).await?;
//!     endpoint.add_router(Arc::new(Printer)).await?;
//!     endpoint.start().await?;
//!
//!     tokio::signal::ctrl_c().await.ok();
//!     endpoint.close().await
//! }
//! ```

mod config;
mod connection;
mod endpoint;
mod error;
mod memory;
mod message;
mod poll;
mod queue;
mod router;
mod scheduler;

// Re-export main types
pub use config::{parse_duration, EndpointConfig, EndpointConfigBuilder, DEFAULT_TUBE};
pub use connection::{ConnectionHolder, SharedConnection};
pub use endpoint::{TubesetEndpoint, ENDPOINT_TYPE};
pub use error::{Result, TubesetError};
pub use memory::{Fault, MemoryConnection, MemoryConnector};
pub use message::{
    encode_json_bytes, BoxError, DataType, Headers, Message, RequestMessage, ResponseMessage,
    RuleMsg, QUEUE_DATA_MSG_TYPE,
};
pub use poll::{CycleSettings, PollCycle, PollOutcome, PollStage};
pub use queue::{Connector, JobStats, QueueConnection, ReservedJob, STAT_TUBE};
pub use router::{dispatch, Exchange, Router};
pub use scheduler::{Cadence, Scheduler, TaskId};
