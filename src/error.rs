//! Error types shared across the telemetry core.

use thiserror::Error;

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Crate-wide error type. Each variant corresponds to one failure taxonomy
/// category from the error handling design: allocation, validation,
/// transport, delivery, capacity, and fatal errors never cross a component
/// boundary except through this type or a counter/signal.
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// I/O errors from socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A named memory pool has no free blocks, or no size class fits the request.
    #[error("pool exhausted or no size class fits: {message}")]
    PoolExhausted {
        /// Description of the exhaustion.
        message: String,
    },

    /// A packet header failed validation (reserved bits set, bad payload size).
    #[error("invalid packet header: {reason}")]
    InvalidHeader {
        /// Why the header was rejected.
        reason: String,
    },

    /// Requested payload size exceeds `MAX_PAYLOAD_SIZE`.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Requested size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Socket/connection level failure, including reconnection exhaustion.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the transport failure.
        message: String,
    },

    /// A subscriber callback panicked or returned an error during distribution.
    #[error("delivery failure: {message}")]
    Delivery {
        /// Description of the delivery failure.
        message: String,
    },

    /// Queue overflow or backpressure shed.
    #[error("capacity exceeded: {message}")]
    Capacity {
        /// Description of the capacity failure.
        message: String,
    },

    /// Invalid configuration supplied to a component constructor.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the configuration problem.
        message: String,
    },

    /// Unrecoverable condition: emergency stop, reserved-bit protocol misuse.
    #[error("fatal error: {message}")]
    Fatal {
        /// Description of the fatal condition.
        message: String,
    },
}

impl TelemetryError {
    /// Build a [`TelemetryError::PoolExhausted`].
    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::PoolExhausted { message: message.into() }
    }

    /// Build a [`TelemetryError::InvalidHeader`].
    pub fn invalid_header(reason: impl Into<String>) -> Self {
        Self::InvalidHeader { reason: reason.into() }
    }

    /// Build a [`TelemetryError::Transport`].
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Build a [`TelemetryError::Delivery`].
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery { message: message.into() }
    }

    /// Build a [`TelemetryError::Capacity`].
    pub fn capacity(message: impl Into<String>) -> Self {
        Self::Capacity { message: message.into() }
    }

    /// Build a [`TelemetryError::InvalidConfig`].
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    /// Build a [`TelemetryError::Fatal`].
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal { message: message.into() }
    }

    /// Whether a retry of the operation that produced this error is sensible.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Capacity { .. } | Self::Transport { .. } | Self::Io(_))
    }

    /// Whether this error originated in the transport/socket layer.
    pub fn is_network_error(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Io(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_recoverable_errors() {
        assert!(TelemetryError::capacity("backpressure").is_recoverable());
        assert!(TelemetryError::transport("reset").is_recoverable());
        assert!(!TelemetryError::fatal("emergency stop").is_recoverable());
    }

    #[test]
    fn classifies_network_errors() {
        assert!(TelemetryError::transport("closed").is_network_error());
        assert!(!TelemetryError::pool_exhausted("full").is_network_error());
    }
}
