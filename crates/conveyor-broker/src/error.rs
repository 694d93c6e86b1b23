//! Error types for broker operations.

use thiserror::Error;

/// Result type alias for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;

/// Error conditions on the broker side of a worker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// Dialing or maintaining the connection failed.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Channel, exchange, queue or binding declaration failed.
    #[error("topology declaration failed: {0}")]
    Topology(String),

    /// The consumer definition cannot be turned into broker topology.
    #[error("invalid consumer definition: {0}")]
    Invalid(String),

    /// The worker was cancelled before the operation completed.
    #[error("worker cancelled")]
    Cancelled,
}

impl BrokerError {
    /// Creates a connection error from a message.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection(message.into())
    }

    /// Creates a topology error from a message.
    pub fn topology(message: impl Into<String>) -> Self {
        Self::Topology(message.into())
    }
}

impl From<lapin::Error> for BrokerError {
    fn from(err: lapin::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

impl From<conveyor_core::CoreError> for BrokerError {
    fn from(err: conveyor_core::CoreError) -> Self {
        Self::Invalid(err.to_string())
    }
}
