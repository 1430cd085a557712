//! Session runtime executor
//!
//! A single task owns the link state, the store and the pacing buffer. Caller
//! commands, transport signals and timer ticks all arrive as messages and are
//! handled one at a time, so every frame is fully dispatched before the next.

use super::error::TransportError;
use super::traits::{Connector, TransportLink, WireFrame};
use crate::dispatcher::Dispatcher;
use crate::pacing::PacingBuffer;
use crate::protocol::{decode_frame, OutboundCommand};
use crate::state_machine::{transition, Effect, Event, LinkContext, LinkState};
use crate::store::{ExecutionStore, StoreSnapshot};
use crate::timer::{self, TimerHandle};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Requests from [`MirrorClient`](super::MirrorClient) handles
#[derive(Debug)]
pub(crate) enum Command {
    Connect,
    Disconnect,
    Send {
        command: OutboundCommand,
        reply: oneshot::Sender<bool>,
    },
    SendMessage {
        text: String,
        reply: oneshot::Sender<bool>,
    },
    Reset,
    Shutdown {
        done: oneshot::Sender<()>,
    },
}

/// Signals from the transport task of one open attempt
#[derive(Debug)]
pub(crate) enum TransportSignal {
    Opened(mpsc::UnboundedSender<WireFrame>),
    Failed(TransportError),
    Frame(String),
    Closed { code: Option<u16>, reason: String },
}

/// Everything the runtime produces for itself
#[derive(Debug)]
pub(crate) enum RuntimeMessage {
    /// Tagged with the attempt that produced it; older generations are dropped
    Transport {
        generation: u64,
        signal: TransportSignal,
    },
    RetryElapsed {
        attempt: u32,
    },
    HeartbeatTick,
    /// Tagged with the pacing timer that produced it
    PacingTick {
        generation: u64,
    },
}

const INTERNAL_CHANNEL_CAPACITY: usize = 256;

pub struct SessionRuntime<C>
where
    C: Connector + 'static,
{
    context: LinkContext,
    link_state: LinkState,
    store: ExecutionStore,
    pacer: PacingBuffer<RuntimeMessage>,
    connector: Arc<C>,
    /// Outbound half of the live transport
    link: Option<mpsc::UnboundedSender<WireFrame>>,
    /// Bumped whenever a transport is opened or abandoned
    generation: u64,
    /// Stops the task serving the current transport
    link_cancel: Option<CancellationToken>,
    heartbeat: Option<TimerHandle>,
    retry: Option<TimerHandle>,
    command_rx: mpsc::Receiver<Command>,
    internal_rx: mpsc::Receiver<RuntimeMessage>,
    internal_tx: mpsc::Sender<RuntimeMessage>,
    snapshot_tx: watch::Sender<StoreSnapshot>,
}

impl<C> SessionRuntime<C>
where
    C: Connector + 'static,
{
    pub(crate) fn new(
        context: LinkContext,
        store: ExecutionStore,
        connector: C,
        pacing_interval: Duration,
        command_rx: mpsc::Receiver<Command>,
        snapshot_tx: watch::Sender<StoreSnapshot>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::channel(INTERNAL_CHANNEL_CAPACITY);
        let pacer = PacingBuffer::new(pacing_interval, internal_tx.clone(), |generation| {
            RuntimeMessage::PacingTick { generation }
        });
        Self {
            context,
            link_state: LinkState::default(),
            store,
            pacer,
            connector: Arc::new(connector),
            link: None,
            generation: 0,
            link_cancel: None,
            heartbeat: None,
            retry: None,
            command_rx,
            internal_rx,
            internal_tx,
            snapshot_tx,
        }
    }

    pub async fn run(mut self) {
        info!(
            session_id = %self.context.session_id,
            endpoint = %self.context.endpoint,
            "Starting session runtime"
        );

        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Shutdown { done }) => {
                        self.teardown();
                        let _ = done.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    // Every handle dropped
                    None => {
                        self.teardown();
                        break;
                    }
                },
                Some(message) = self.internal_rx.recv() => self.handle_internal(message),
            }
            self.publish();
        }

        info!(session_id = %self.context.session_id, "Session runtime stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect => self.apply(Event::Connect),
            Command::Disconnect => self.apply(Event::Disconnect),
            Command::Send { command, reply } => {
                let _ = reply.send(self.send_command(&command));
            }
            Command::SendMessage { text, reply } => {
                let sent = self.send_user_message(text);
                let _ = reply.send(sent);
            }
            Command::Reset => {
                debug!("Resetting execution state");
                self.pacer.clear();
                self.store.reset();
            }
            // handled by the run loop
            Command::Shutdown { .. } => {}
        }
    }

    fn handle_internal(&mut self, message: RuntimeMessage) {
        match message {
            RuntimeMessage::Transport { generation, signal } => {
                if generation != self.generation {
                    trace!(
                        generation,
                        current = self.generation,
                        "Dropping signal from abandoned transport"
                    );
                    return;
                }
                self.handle_transport(signal);
            }
            RuntimeMessage::RetryElapsed { attempt } => {
                let pending = matches!(
                    self.link_state,
                    LinkState::Reconnecting { attempts } if attempts == attempt
                );
                if pending {
                    self.retry = None;
                }
                self.apply(Event::RetryElapsed { attempt });
            }
            RuntimeMessage::HeartbeatTick => self.apply(Event::HeartbeatTick),
            RuntimeMessage::PacingTick { generation } => {
                if let Some(fragment) = self.pacer.tick(generation, self.store.typing()) {
                    self.store.append_visible(&fragment);
                }
            }
        }
    }

    fn handle_transport(&mut self, signal: TransportSignal) {
        match signal {
            TransportSignal::Opened(outbound) => {
                self.link = Some(outbound);
                self.apply(Event::TransportOpened);
            }
            TransportSignal::Failed(error) => {
                warn!(error = %error, kind = ?error.kind, "Transport open failed");
                self.link_cancel = None;
                self.apply(Event::TransportFailed {
                    retryable: error.is_retryable(),
                    message: error.message,
                });
            }
            TransportSignal::Frame(text) => {
                if let Some(event) = decode_frame(&text) {
                    Dispatcher::new(&mut self.store, &mut self.pacer).dispatch(event);
                }
            }
            TransportSignal::Closed { code, reason } => {
                info!(code, reason = %reason, "Transport closed");
                self.link = None;
                self.link_cancel = None;
                self.store.set_acknowledged(false);
                self.apply(Event::TransportClosed { code, reason });
            }
        }
    }

    /// Run one event through the state machine and execute its effects
    fn apply(&mut self, event: Event) {
        let result = match transition(&self.link_state, &self.context, event) {
            Ok(result) => result,
            Err(e) => {
                debug!(error = %e, "Ignoring link event");
                return;
            }
        };

        if result.new_state != self.link_state {
            info!(from = ?self.link_state, to = ?result.new_state, "Link state changed");
        }
        self.link_state = result.new_state;
        self.store
            .set_connection(self.link_state.status(), self.link_state.attempts());

        for effect in result.effects {
            self.execute_effect(effect);
        }
    }

    fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::OpenTransport => self.open_transport(),

            Effect::CloseTransport { code, reason } => self.close_transport(code, reason),

            Effect::StartHeartbeat => {
                self.heartbeat = Some(timer::every(
                    self.context.heartbeat_interval,
                    self.internal_tx.clone(),
                    || RuntimeMessage::HeartbeatTick,
                ));
            }

            Effect::StopHeartbeat => self.heartbeat = None,

            Effect::ScheduleRetry { delay, attempt } => {
                info!(attempt, delay_ms = delay.as_millis(), "Scheduling reconnect");
                self.retry = Some(timer::after(
                    delay,
                    self.internal_tx.clone(),
                    RuntimeMessage::RetryElapsed { attempt },
                ));
            }

            Effect::CancelRetry => {
                if self.retry.take().is_some() {
                    debug!("Cancelled pending reconnect");
                }
            }

            Effect::Send(command) => {
                self.send_command(&command);
            }

            Effect::RecordError { message } => {
                warn!(error = %message, "Connection error");
                self.store.set_last_error(Some(message));
            }

            Effect::ClearError => self.store.set_last_error(None),
        }
    }

    fn open_transport(&mut self) {
        self.abandon_transport();
        let generation = self.generation;
        let cancel = CancellationToken::new();
        self.link_cancel = Some(cancel.clone());

        let connector = Arc::clone(&self.connector);
        let endpoint = self.context.endpoint.clone();
        let tx = self.internal_tx.clone();
        debug!(generation, endpoint = %endpoint, "Opening transport");

        tokio::spawn(async move {
            let outcome = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                outcome = connector.connect(&endpoint) => outcome,
            };

            let TransportLink { outbound, mut inbound } = match outcome {
                Ok(link) => link,
                Err(error) => {
                    let _ = tx
                        .send(RuntimeMessage::Transport {
                            generation,
                            signal: TransportSignal::Failed(error),
                        })
                        .await;
                    return;
                }
            };

            let opened = RuntimeMessage::Transport {
                generation,
                signal: TransportSignal::Opened(outbound),
            };
            if tx.send(opened).await.is_err() {
                return;
            }

            loop {
                let frame = tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    frame = inbound.recv() => frame,
                };
                let signal = match frame {
                    Some(WireFrame::Text(text)) => TransportSignal::Frame(text),
                    Some(WireFrame::Close { code, reason }) => TransportSignal::Closed {
                        code: Some(code),
                        reason,
                    },
                    None => TransportSignal::Closed {
                        code: None,
                        reason: String::new(),
                    },
                };
                let closed = matches!(signal, TransportSignal::Closed { .. });
                let delivered = tx
                    .send(RuntimeMessage::Transport { generation, signal })
                    .await
                    .is_ok();
                if !delivered || closed {
                    break;
                }
            }
        });
    }

    fn close_transport(&mut self, code: u16, reason: &str) {
        if let Some(link) = self.link.take() {
            let _ = link.send(WireFrame::Close {
                code,
                reason: reason.to_string(),
            });
        }
        self.abandon_transport();
        self.store.set_acknowledged(false);
    }

    /// Stop listening to the current transport; anything it still sends is stale
    fn abandon_transport(&mut self) {
        self.generation += 1;
        if let Some(cancel) = self.link_cancel.take() {
            cancel.cancel();
        }
        self.link = None;
    }

    fn send_command(&self, command: &OutboundCommand) -> bool {
        let kind = command.kind();
        let Some(link) = self.link.as_ref().filter(|_| self.link_state.is_connected()) else {
            warn!(kind, "Not connected, dropping command");
            return false;
        };
        let text = match command.encode() {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Failed to encode command");
                return false;
            }
        };
        if link.send(WireFrame::Text(text)).is_err() {
            warn!(kind, "Transport is gone, dropping command");
            return false;
        }
        trace!(kind, "Sent command");
        true
    }

    fn send_user_message(&mut self, text: String) -> bool {
        if text.trim().is_empty() {
            debug!("Ignoring empty message");
            return false;
        }
        if !self.send_command(&OutboundCommand::message(text.clone())) {
            return false;
        }
        self.store.push_user_message(text);
        true
    }

    fn teardown(&mut self) {
        self.apply(Event::Disconnect);
        self.pacer.clear();
        self.heartbeat = None;
        self.retry = None;
        self.abandon_transport();
        self.publish();
    }

    /// Publish a snapshot when anything observable changed
    fn publish(&mut self) {
        let revision = self.store.revision();
        let pending = self.pacer.pending_len();
        let store = &self.store;
        self.snapshot_tx.send_if_modified(|current| {
            if current.revision == revision && current.streaming.pending_fragments == pending {
                return false;
            }
            *current = store.snapshot(pending);
            true
        });
    }
}
