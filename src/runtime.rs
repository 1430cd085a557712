//! Session runtime and the client handle used to drive it

mod error;
mod executor;
pub mod traits;
mod websocket;

#[cfg(test)]
pub mod testing;

pub use error::{ClientError, TransportError, TransportErrorKind};
pub use executor::SessionRuntime;
pub use traits::*;
pub use websocket::WsConnector;

use crate::config::{ConfigError, MirrorConfig};
use crate::protocol::OutboundCommand;
use crate::session::SessionId;
use crate::state_machine::LinkContext;
use crate::store::{ExecutionStore, StoreSnapshot};
use executor::Command;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

/// Cloneable handle to one mirrored session.
///
/// All operations are forwarded to the session's runtime task. The runtime
/// stops on [`MirrorClient::shutdown`] or once every handle is dropped.
#[derive(Clone)]
pub struct MirrorClient {
    session_id: SessionId,
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<StoreSnapshot>,
}

impl MirrorClient {
    /// Create a session with a fresh id and spawn its runtime.
    /// Nothing connects until [`MirrorClient::connect`].
    pub fn spawn<C>(
        config: &MirrorConfig,
        connector: C,
    ) -> Result<(Self, JoinHandle<()>), ConfigError>
    where
        C: Connector + 'static,
    {
        Self::spawn_with_session(config, connector, SessionId::generate())
    }

    pub fn spawn_with_session<C>(
        config: &MirrorConfig,
        connector: C,
        session_id: SessionId,
    ) -> Result<(Self, JoinHandle<()>), ConfigError>
    where
        C: Connector + 'static,
    {
        let endpoint = config.endpoint(&session_id)?;
        let context = LinkContext::new(session_id.clone(), endpoint, config);
        let store = ExecutionStore::new(&session_id);
        let (snapshot_tx, snapshots) = watch::channel(store.snapshot(0));
        let (commands, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let runtime = SessionRuntime::new(
            context,
            store,
            connector,
            config.pacing_interval,
            command_rx,
            snapshot_tx,
        );
        let handle = tokio::spawn(runtime.run());

        Ok((
            Self {
                session_id,
                commands,
                snapshots,
            },
            handle,
        ))
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Open the transport. No-op while connecting or connected.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.command(Command::Connect).await
    }

    /// Close the transport normally and cancel any pending reconnect
    pub async fn disconnect(&self) -> Result<(), ClientError> {
        self.command(Command::Disconnect).await
    }

    /// Write a raw command to the transport. Returns `false` when not
    /// connected; the failure is logged, never raised.
    pub async fn send(&self, command: OutboundCommand) -> bool {
        let (reply, sent) = oneshot::channel();
        if self.commands.send(Command::Send { command, reply }).await.is_err() {
            return false;
        }
        sent.await.unwrap_or(false)
    }

    /// Send user text for a new turn. Returns whether it was written to a
    /// live transport; nothing is queued while disconnected.
    pub async fn send_message(&self, text: impl Into<String>) -> bool {
        let (reply, sent) = oneshot::channel();
        let command = Command::SendMessage {
            text: text.into(),
            reply,
        };
        if self.commands.send(command).await.is_err() {
            return false;
        }
        sent.await.unwrap_or(false)
    }

    /// Clear execution state back to the baseline. Message history is kept.
    pub async fn reset(&self) -> Result<(), ClientError> {
        self.command(Command::Reset).await
    }

    /// Tear the session down and wait until timers and transport are released
    pub async fn shutdown(&self) -> Result<(), ClientError> {
        let (done, finished) = oneshot::channel();
        self.command(Command::Shutdown { done }).await?;
        finished.await.map_err(|_| ClientError::RuntimeStopped)
    }

    /// Latest published snapshot
    pub fn snapshot(&self) -> StoreSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every published snapshot
    pub fn subscribe(&self) -> watch::Receiver<StoreSnapshot> {
        self.snapshots.clone()
    }

    async fn command(&self, command: Command) -> Result<(), ClientError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| ClientError::RuntimeStopped)
    }
}
