//! Consumer example against a local beanstalkd.
//!
//! This example demonstrates:
//! - Configuring a tube-set endpoint from environment variables
//! - Attaching a router that logs every delivered job
//! - Closing the endpoint on Ctrl+C
//!
//! Run with: `cargo run -p demo-consumer`
//!
//! Environment: `BEANSTALKD_ADDR`, `TUBES` (comma separated), `INTERVAL`, `TIMEOUT`.

use async_trait::async_trait;
use std::sync::Arc;
use tubeset_beanstalkd::BeanstalkConnector;
use tubeset_core::{EndpointConfig, Exchange, Message, Router, TubesetEndpoint};

/// Logs each job and marks the response as handled.
struct LogRouter;

#[async_trait]
impl Router for LogRouter {
    fn id(&self) -> &str {
        "log"
    }

    async fn process(&self, exchange: &mut Exchange) {
        let tube = exchange.request.stats().get("tube").cloned().unwrap_or_default();
        let job_id = exchange.request.stats().get("id").cloned().unwrap_or_default();
        println!("[{}] job {}: {}", tube, job_id, String::from_utf8_lossy(&exchange.request.body()));
        exchange.response.set_status_code(200);
    }
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

#[tokio::main]
async fn main() -> tubeset_core::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let tubes: Vec<String> = env_or("TUBES", "default")
        .split(',')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();

    let config = EndpointConfig::builder()
        .server(env_or("BEANSTALKD_ADDR", "127.0.0.1:11300"))
        .tubes(tubes)
        .interval(env_or("INTERVAL", "@every 5s"))
        .timeout(env_or("TIMEOUT", "1s"))
        .build();

    let endpoint = TubesetEndpoint::init(BeanstalkConnector::new(), config).await?;
    endpoint.add_router(Arc::new(LogRouter)).await?;
    endpoint.start().await?;

    println!("Consuming from {} (Ctrl+C to stop)", endpoint.id());
    tokio::signal::ctrl_c().await?;

    endpoint.close().await
}
