//! Trait abstractions for runtime I/O
//!
//! The executor only sees a [`Connector`] and the channel pair it returns,
//! which lets tests drive it with an in-memory server.

use super::error::TransportError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// A frame crossing the transport in either direction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireFrame {
    Text(String),
    /// Outbound: ask the transport to close. Inbound: the transport closed.
    Close { code: u16, reason: String },
}

/// An open transport, seen as two channels.
///
/// Dropping `outbound` closes the transport normally. `inbound` ends with a
/// `Close` frame, or simply ends if the transport vanished.
#[derive(Debug)]
pub struct TransportLink {
    pub outbound: mpsc::UnboundedSender<WireFrame>,
    pub inbound: mpsc::UnboundedReceiver<WireFrame>,
}

/// Opens transports to the server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a transport to `endpoint`. Resolves once the handshake completes.
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink, TransportError>;
}

// ============================================================================
// Arc implementations for trait objects
// ============================================================================

#[async_trait]
impl<T: Connector + ?Sized> Connector for Arc<T> {
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink, TransportError> {
        (**self).connect(endpoint).await
    }
}
