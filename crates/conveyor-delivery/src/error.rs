//! Error types for callback delivery operations.

use thiserror::Error;

/// Result type alias for delivery operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error conditions on the outbound callback path.
///
/// Only transport-level problems surface as errors; an HTTP response of any
/// status is a successful exchange and is classified by the dispatcher, not
/// here.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// Request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds before the request timed out.
        timeout_seconds: u64,
    },

    /// Client could not be constructed or the URL is unusable.
    #[error("invalid delivery configuration: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_format() {
        assert_eq!(DeliveryError::timeout(10).to_string(), "request timeout after 10s");
        assert_eq!(
            DeliveryError::network("connection refused").to_string(),
            "network connection failed: connection refused"
        );
    }
}
