//! Error types for the Stratus RPC runtime.

use std::time::Duration;

use crate::context::CorrelationId;
use crate::envelope::StatusCode;

/// Main error type for Stratus operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StratusError {
    /// Transport-level send/connect failure. Always triggers eviction of the
    /// offending connection and a failure report to the health monitor.
    #[error("communication failure: {0}")]
    Communication(#[from] TransportError),

    /// Codec error (framing, serialization, deserialization).
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The remote handler ran but raised.
    #[error("remote invocation failed [{status}]: {message}")]
    Remote {
        /// Flattened exception chain from the remote handler.
        message: String,
        /// Status code derived from the remote failure.
        status: StatusCode,
    },

    /// The call deadline expired before a reply arrived.
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The call was cancelled before a reply arrived.
    #[error("call cancelled")]
    Cancelled,

    /// A pending call already exists for this correlation id.
    #[error("duplicate correlation id: {0}")]
    DuplicateCorrelationId(CorrelationId),

    /// No registered handler matches the requested service.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// The address registry knows no endpoints for the service.
    #[error("no addresses for service: {0}")]
    NoAddresses(String),
}

impl StratusError {
    /// Whether this failure should be reported to the health monitor.
    ///
    /// Timeouts and cancellations are deliberately excluded: a slow but
    /// alive endpoint is not the same as a dead one.
    #[must_use]
    pub fn is_health_signal(&self) -> bool {
        matches!(self, Self::Communication(_))
    }
}

/// Transport-level errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// IO error from the underlying stream.
    #[error("io error: {0}")]
    Io(std::sync::Arc<std::io::Error>),

    /// Connection was closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,

    /// Failed to connect to the remote endpoint.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// Peer violated the wire protocol.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(std::sync::Arc::new(e))
    }
}

/// Codec errors for serialization and framing.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CodecError {
    /// Frame size exceeds maximum allowed.
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Actual frame size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Invalid frame format.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Envelope serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Envelope deserialization/validation failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Failure raised by a service handler.
///
/// Carries a stable status code plus an optional causal source; the
/// dispatcher flattens the full `source()` chain into the result envelope's
/// exception field so the caller sees every causal message.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct ServiceError {
    /// Status code describing the failure class.
    pub status: StatusCode,

    /// Human-readable failure message.
    pub message: String,

    /// Underlying cause, if any.
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ServiceError {
    /// Create a service error with an explicit status.
    #[must_use]
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::Internal, message)
    }

    /// Shorthand for an invalid-argument error.
    #[must_use]
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(StatusCode::InvalidArgument, message)
    }

    /// Attach an underlying cause.
    #[must_use]
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }
}
