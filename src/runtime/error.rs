//! Runtime error types

use thiserror::Error;

/// Transport error with classification
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Network, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::ServerError, message)
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Rejected, message)
    }

    pub fn invalid_endpoint(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::InvalidEndpoint, message)
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::new(TransportErrorKind::Unknown, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

/// Error classification for reconnect logic
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Refused, reset, timed out - retryable
    Network,
    /// Upgrade answered with 5xx - retryable
    ServerError,
    /// Upgrade answered with 4xx - not retryable
    Rejected,
    /// Url cannot be connected to - not retryable
    InvalidEndpoint,
    Unknown,
}

impl TransportErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Network | Self::ServerError)
    }
}

/// Errors returned by [`MirrorClient`](super::MirrorClient) operations
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("session runtime has stopped")]
    RuntimeStopped,
}
