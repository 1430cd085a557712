//! Execution state store
//!
//! Single source of truth for connection status, pipeline node states,
//! finalized messages, the in-progress streaming text and the current turn's
//! retrieval and trace records. All mutation goes through the dispatcher and
//! the session runtime; readers get immutable [`StoreSnapshot`]s.

mod message;
mod nodes;
mod trace;


pub use message::{Message, Role};
pub use nodes::{NodeId, NodeStates, NodeStatus, WireNodeStates};
pub use trace::{NodeTiming, QueryProjection, RagResult, ServerError, TraceSummary};

use crate::session::SessionId;
use serde::Serialize;

/// Connection status as seen by consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    /// Reconnect budget exhausted, or the server rejected the session.
    /// Only an explicit connect leaves this state.
    TerminallyFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionInfo {
    pub status: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub last_error: Option<String>,
    /// Server sent `connected` on the current transport
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionState {
    /// Always the node whose status is active, if any
    pub current_node: Option<NodeId>,
    pub node_states: NodeStates,
    pub user_intent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamingView {
    /// Text revealed so far for the in-progress turn
    pub text: String,
    pub typing: bool,
    /// Fragments received but not yet revealed
    pub pending_fragments: usize,
}

/// Immutable view of the store at one revision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSnapshot {
    pub session_id: String,
    pub revision: u64,
    pub connection: ConnectionInfo,
    pub execution: ExecutionState,
    pub messages: Vec<Message>,
    pub streaming: StreamingView,
    pub turn_id: Option<String>,
    pub rag: Option<RagResult>,
    pub trace: Option<TraceSummary>,
    pub server_error: Option<ServerError>,
}

#[derive(Debug)]
pub struct ExecutionStore {
    session_id: SessionId,
    revision: u64,
    connection: ConnectionInfo,
    node_states: NodeStates,
    current_node: Option<NodeId>,
    user_intent: Option<String>,
    messages: Vec<Message>,
    streaming_text: String,
    typing: bool,
    turn_id: Option<String>,
    rag: Option<RagResult>,
    trace: Option<TraceSummary>,
    server_error: Option<ServerError>,
}

impl ExecutionStore {
    pub fn new(session_id: &SessionId) -> Self {
        Self {
            session_id: session_id.clone(),
            revision: 0,
            connection: ConnectionInfo {
                status: ConnectionStatus::Disconnected,
                reconnect_attempts: 0,
                last_error: None,
                acknowledged: false,
            },
            node_states: NodeStates::baseline(),
            current_node: None,
            user_intent: None,
            messages: Vec::new(),
            streaming_text: String::new(),
            typing: false,
            turn_id: None,
            rag: None,
            trace: None,
            server_error: None,
        }
    }

    // ---- reads ----

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Bumped on every mutation
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn connection(&self) -> &ConnectionInfo {
        &self.connection
    }

    pub fn node_states(&self) -> &NodeStates {
        &self.node_states
    }

    pub fn current_node(&self) -> Option<NodeId> {
        self.current_node
    }

    pub fn user_intent(&self) -> Option<&str> {
        self.user_intent.as_deref()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn streaming_text(&self) -> &str {
        &self.streaming_text
    }

    pub fn typing(&self) -> bool {
        self.typing
    }

    pub fn turn_id(&self) -> Option<&str> {
        self.turn_id.as_deref()
    }

    pub fn rag(&self) -> Option<&RagResult> {
        self.rag.as_ref()
    }

    pub fn trace(&self) -> Option<&TraceSummary> {
        self.trace.as_ref()
    }

    pub fn server_error(&self) -> Option<&ServerError> {
        self.server_error.as_ref()
    }

    pub fn snapshot(&self, pending_fragments: usize) -> StoreSnapshot {
        StoreSnapshot {
            session_id: self.session_id.to_string(),
            revision: self.revision,
            connection: self.connection.clone(),
            execution: ExecutionState {
                current_node: self.current_node,
                node_states: self.node_states.clone(),
                user_intent: self.user_intent.clone(),
            },
            messages: self.messages.clone(),
            streaming: StreamingView {
                text: self.streaming_text.clone(),
                typing: self.typing,
                pending_fragments,
            },
            turn_id: self.turn_id.clone(),
            rag: self.rag.clone(),
            trace: self.trace.clone(),
            server_error: self.server_error.clone(),
        }
    }

    // ---- connection ----

    pub(crate) fn set_connection(&mut self, status: ConnectionStatus, reconnect_attempts: u32) {
        if self.connection.status == status
            && self.connection.reconnect_attempts == reconnect_attempts
        {
            return;
        }
        self.connection.status = status;
        self.connection.reconnect_attempts = reconnect_attempts;
        if status != ConnectionStatus::Connected {
            self.connection.acknowledged = false;
        }
        self.touch();
    }

    pub(crate) fn set_last_error(&mut self, error: Option<String>) {
        if self.connection.last_error != error {
            self.connection.last_error = error;
            self.touch();
        }
    }

    pub(crate) fn set_acknowledged(&mut self, acknowledged: bool) {
        if self.connection.acknowledged != acknowledged {
            self.connection.acknowledged = acknowledged;
            self.touch();
        }
    }

    // ---- turn lifecycle ----

    pub(crate) fn push_user_message(&mut self, text: impl Into<String>) {
        self.messages.push(Message::user(text));
        self.touch();
    }

    /// A new turn begins: per-turn fields reset, node states replaced by the baseline
    pub(crate) fn begin_turn(&mut self, turn_id: String, baseline: &WireNodeStates) {
        self.turn_id = Some(turn_id);
        self.typing = true;
        self.streaming_text.clear();
        self.user_intent = None;
        self.rag = None;
        self.trace = None;
        self.server_error = None;
        self.replace_node_states(baseline, None);
        self.touch();
    }

    pub(crate) fn enter_node(&mut self, node: NodeId) {
        self.node_states.mark_active(node);
        self.current_node = Some(node);
        self.touch();
    }

    pub(crate) fn complete_node(
        &mut self,
        node: Option<NodeId>,
        snapshot: Option<&WireNodeStates>,
        intent: Option<String>,
    ) {
        if let Some(node) = node {
            self.node_states.set(node, NodeStatus::Complete);
        }
        if let Some(snapshot) = snapshot {
            self.replace_node_states(snapshot, None);
        }
        if intent.is_some() {
            self.user_intent = intent;
        }
        self.sync_current_node();
        self.touch();
    }

    pub(crate) fn record_rag(
        &mut self,
        node: Option<NodeId>,
        snapshot: Option<&WireNodeStates>,
        rag: RagResult,
    ) {
        let prefer = self.current_node;
        if let Some(node) = node {
            self.node_states.set(node, NodeStatus::Complete);
        }
        match snapshot {
            Some(snapshot) => self.replace_node_states(snapshot, prefer),
            None => self.sync_current_node(),
        }
        self.rag = Some(rag);
        self.touch();
    }

    /// Reveal one more fragment of the in-progress response
    pub(crate) fn append_visible(&mut self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        if !self.typing {
            tracing::debug!(len = fragment.len(), "Ignoring fragment outside of a turn");
            return;
        }
        self.streaming_text.push_str(fragment);
        self.touch();
    }

    /// Finalize the turn.
    ///
    /// `flushed` is whatever the pacing queue still held. The server's
    /// `response`, when present, replaces the streamed text outright.
    pub(crate) fn finish_turn(
        &mut self,
        flushed: &str,
        response: Option<String>,
        snapshot: Option<&WireNodeStates>,
        trace: TraceSummary,
    ) {
        self.typing = false;
        if let Some(snapshot) = snapshot {
            self.replace_node_states(snapshot, None);
        }
        self.node_states.settle_active(NodeStatus::Complete);
        self.current_node = None;
        self.trace = Some(trace);

        self.streaming_text.push_str(flushed);
        if let Some(response) = response {
            self.streaming_text = response;
        }
        let content = std::mem::take(&mut self.streaming_text);
        if content.is_empty() {
            tracing::debug!("Turn completed without assistant text");
        } else {
            self.messages.push(Message::assistant(content));
        }
        self.touch();
    }

    /// Abort the turn on a server error. History is left untouched.
    pub(crate) fn fail_turn(&mut self, error: ServerError) {
        self.typing = false;
        self.streaming_text.clear();
        self.node_states.settle_active(NodeStatus::Error);
        self.current_node = None;
        self.server_error = Some(error);
        self.touch();
    }

    /// Wholesale replace from a server state snapshot.
    ///
    /// A snapshot showing an answered pipeline with nothing active finishes
    /// an in-progress turn, since its `complete` was missed.
    pub(crate) fn apply_sync(
        &mut self,
        current_node: Option<&str>,
        snapshot: Option<&WireNodeStates>,
        streaming: Option<String>,
    ) {
        let hint = current_node.and_then(NodeId::parse);
        match snapshot {
            Some(snapshot) => self.replace_node_states(snapshot, hint),
            None => {
                self.node_states = NodeStates::baseline();
                self.sync_current_node();
            }
        }

        let streaming = streaming.unwrap_or_default();
        if self.typing && self.node_states.answered() {
            // The turn completed while we were away; the synced text is final
            tracing::info!(
                len = streaming.len(),
                "Synced snapshot shows the turn already finished"
            );
            self.typing = false;
            self.current_node = None;
            let content = if streaming.is_empty() {
                std::mem::take(&mut self.streaming_text)
            } else {
                self.streaming_text.clear();
                streaming
            };
            if !content.is_empty() {
                self.messages.push(Message::assistant(content));
            }
        } else if self.typing {
            self.streaming_text = streaming;
        } else {
            // Outside a turn the server echoes its last finalized response
            if !streaming.is_empty() {
                tracing::debug!(len = streaming.len(), "Ignoring synced text outside of a turn");
            }
            self.streaming_text.clear();
        }
        self.touch();
    }

    /// Clear execution state. Connection info and message history are kept.
    pub(crate) fn reset(&mut self) {
        self.node_states = NodeStates::baseline();
        self.current_node = None;
        self.user_intent = None;
        self.rag = None;
        self.trace = None;
        self.turn_id = None;
        self.server_error = None;
        self.streaming_text.clear();
        self.typing = false;
        self.touch();
    }

    fn replace_node_states(&mut self, wire: &WireNodeStates, prefer: Option<NodeId>) {
        let mut states = NodeStates::from_wire(wire);
        let demoted = states.normalize_active(prefer);
        if demoted > 0 {
            tracing::warn!(demoted, "Snapshot had several active nodes, keeping one");
        }
        self.node_states = states;
        self.sync_current_node();
    }

    fn sync_current_node(&mut self) {
        self.current_node = self.node_states.active();
    }

    fn touch(&mut self) {
        self.revision += 1;
    }
}
