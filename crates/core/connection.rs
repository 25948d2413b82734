//! Lazily dialed, cached queue connection.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::error::{Result, TubesetError};
use crate::queue::{Connector, QueueConnection};

/// A connection shared between the holder and the poll cycle.
pub type SharedConnection<T> = Arc<Mutex<T>>;

/// Holds at most one connection to the queue server.
///
/// The first caller of [`get`](ConnectionHolder::get) dials; callers racing
/// with that dial wait on the dial lock and then observe the connection it
/// produced. A failed dial leaves the holder empty so the next caller tries
/// again.
pub struct ConnectionHolder<C: Connector> {
    connector: C,
    server: String,
    tubes: Vec<String>,
    setup_timeout: Duration,
    current: RwLock<Option<SharedConnection<C::Connection>>>,
    dial_lock: Mutex<()>,
}

impl<C: Connector> ConnectionHolder<C> {
    /// Create an empty holder.
    pub fn new(
        connector: C,
        server: impl Into<String>,
        tubes: Vec<String>,
        setup_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            server: server.into(),
            tubes,
            setup_timeout,
            current: RwLock::new(None),
            dial_lock: Mutex::new(()),
        }
    }

    /// Server address this holder dials.
    pub fn server(&self) -> &str {
        &self.server
    }

    /// Return the cached connection without dialing.
    pub fn peek(&self) -> Option<SharedConnection<C::Connection>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether a connection is cached.
    pub fn is_connected(&self) -> bool {
        self.peek().is_some()
    }

    /// Return the cached connection, dialing it first if needed.
    pub async fn get(&self) -> Result<SharedConnection<C::Connection>> {
        if let Some(conn) = self.peek() {
            return Ok(conn);
        }

        let _dialing = self.dial_lock.lock().await;
        if let Some(conn) = self.peek() {
            return Ok(conn);
        }

        tracing::debug!(server = %self.server, tubes = ?self.tubes, "Dialing queue server");
        let conn = tokio::time::timeout(
            self.setup_timeout,
            self.connector.connect(&self.server, &self.tubes),
        )
        .await
        .map_err(|_| {
            TubesetError::Connect(format!(
                "{}: timed out after {:?}",
                self.server, self.setup_timeout
            ))
        })?
        .map_err(|e| match e {
            TubesetError::Connect(msg) => TubesetError::Connect(msg),
            other => TubesetError::Connect(format!("{}: {}", self.server, other)),
        })?;

        let conn = Arc::new(Mutex::new(conn));
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Some(conn.clone());
        tracing::info!(server = %self.server, "Connected to queue server");
        Ok(conn)
    }

    /// Forget the cached connection without closing it; the next `get` redials.
    pub fn invalidate(&self) {
        if self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .is_some()
        {
            tracing::debug!(server = %self.server, "Dropped queue connection");
        }
    }

    /// Take the cached connection out of the holder and close it.
    ///
    /// Waits for whoever holds the connection lock (an in-flight poll) to
    /// finish first. Safe to call when nothing is cached.
    pub async fn release(&self) -> Result<()> {
        let taken = self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(conn) = taken else {
            return Ok(());
        };
        let result = conn.lock().await.close().await;
        tracing::info!(server = %self.server, "Closed queue connection");
        result
    }
}
