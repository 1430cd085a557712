//! Pipeline Mirror - client-side mirror of a remote agent pipeline
//!
//! Keeps a local view of a server-side pipeline run in sync over a WebSocket:
//! which node is executing, the streamed response, retrieval results, and the
//! final trace. One [`MirrorClient`] owns one session.

pub mod config;
pub mod dispatcher;
pub mod pacing;
pub mod protocol;
pub mod runtime;
pub mod session;
pub mod state_machine;
pub mod store;
pub mod timer;

pub use config::{ConfigError, MirrorConfig};
pub use runtime::{ClientError, Connector, MirrorClient, WsConnector};
pub use session::SessionId;
pub use store::{ConnectionStatus, NodeId, NodeStatus, StoreSnapshot};
