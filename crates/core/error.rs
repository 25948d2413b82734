//! Error types for the tubeset consumer endpoint.

use thiserror::Error;

/// The main error type for the tubeset crates.
#[derive(Error, Debug)]
pub enum TubesetError {
    /// Dialing the queue server failed or timed out.
    #[error("Connect failed: {0}")]
    Connect(String),

    /// Schedule expression could not be parsed.
    #[error("Bad schedule expression: {0}")]
    BadExpression(String),

    /// Duration string could not be parsed.
    #[error("Bad duration: {0}")]
    BadDuration(String),

    /// No job became ready within the reservation window.
    #[error("Reserve timed out")]
    ReserveTimeout,

    /// Reservation failed with a protocol or transport error.
    #[error("Reserve failed: {0}")]
    Reserve(String),

    /// Fetching job statistics failed.
    #[error("Stats failed: {0}")]
    Stats(String),

    /// Switching the active tube failed.
    #[error("Use tube failed: {0}")]
    UseTube(String),

    /// Deleting a reserved job failed.
    #[error("Delete failed: {0}")]
    Delete(String),

    /// A router is already attached to the endpoint.
    #[error("Duplicate router: {0}")]
    DuplicateRouter(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Unexpected reply from the queue server.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Transport error on an established connection.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TubesetError {
    /// Whether this is the routine "no job within the window" outcome.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TubesetError::ReserveTimeout)
    }

    /// Whether the connection that produced this error should be discarded.
    ///
    /// A malformed reply leaves the reply stream out of step with the
    /// commands, so protocol errors count too.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            TubesetError::Io(_) | TubesetError::Connect(_) | TubesetError::Protocol(_)
        )
    }
}

/// Result type alias using TubesetError.
pub type Result<T> = std::result::Result<T, TubesetError>;
