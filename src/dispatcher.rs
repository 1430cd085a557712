//! Event dispatcher
//!
//! Routes each decoded [`ServerEvent`] to exactly one store mutation, pushing
//! response fragments through the pacing buffer on the way.

use crate::pacing::PacingBuffer;
use crate::protocol::{
    CompletePayload, ConnectedPayload, ErrorPayload, NodeCompletePayload, NodeEnterPayload,
    RagResultsPayload, ServerEvent, StartPayload, StateSyncPayload, TokenPayload,
};
use crate::store::{ExecutionStore, NodeId, RagResult, ServerError, TraceSummary};
use tracing::{debug, info, trace, warn};

pub struct Dispatcher<'a, M> {
    store: &'a mut ExecutionStore,
    pacer: &'a mut PacingBuffer<M>,
}

impl<'a, M: Send + 'static> Dispatcher<'a, M> {
    pub fn new(store: &'a mut ExecutionStore, pacer: &'a mut PacingBuffer<M>) -> Self {
        Self { store, pacer }
    }

    pub fn dispatch(&mut self, event: ServerEvent) {
        trace!(kind = event.kind(), "Dispatching server event");
        match event {
            ServerEvent::Connected(payload) => self.on_connected(&payload),
            ServerEvent::Pong => trace!("Heartbeat acknowledged"),
            ServerEvent::StateSync(payload) => self.on_state_sync(payload),
            ServerEvent::Start(payload) => self.on_start(payload),
            ServerEvent::NodeEnter(payload) => self.on_node_enter(&payload),
            ServerEvent::NodeComplete(payload) => self.on_node_complete(payload),
            ServerEvent::RagResults(payload) => self.on_rag_results(payload),
            ServerEvent::Token(payload) => self.on_token(payload),
            ServerEvent::Complete(payload) => self.on_complete(payload),
            ServerEvent::Error(payload) => self.on_error(payload),
        }
    }

    fn on_connected(&mut self, payload: &ConnectedPayload) {
        if payload.session_id != self.store.session_id().as_str() {
            warn!(
                expected = %self.store.session_id(),
                received = %payload.session_id,
                "Server acknowledged a different session"
            );
        }
        self.store.set_acknowledged(true);
    }

    fn on_state_sync(&mut self, payload: StateSyncPayload) {
        self.pacer.clear();
        self.store.apply_sync(
            payload.current_node.as_deref(),
            payload.node_states.as_ref(),
            payload.streaming_response,
        );
    }

    fn on_start(&mut self, payload: StartPayload) {
        self.pacer.clear();
        info!(trace_id = %payload.trace_id, "Turn started");
        self.store.begin_turn(payload.trace_id, &payload.node_states);
    }

    fn on_node_enter(&mut self, payload: &NodeEnterPayload) {
        match NodeId::parse(&payload.node) {
            Some(node) => self.store.enter_node(node),
            None => debug!(node = %payload.node, "Ignoring unknown node"),
        }
    }

    fn on_node_complete(&mut self, payload: NodeCompletePayload) {
        let node = NodeId::parse(&payload.node);
        if node.is_none() {
            debug!(node = %payload.node, "Completed node is unknown, applying snapshot only");
        }
        self.store
            .complete_node(node, payload.node_states.as_ref(), payload.intent);
    }

    fn on_rag_results(&mut self, payload: RagResultsPayload) {
        let rag = RagResult::new(
            payload.confidence,
            payload.chunk_ids,
            payload.scores,
            payload.query_projection,
        );
        debug!(
            node = %payload.node,
            confidence = rag.confidence,
            chunks = rag.chunk_ids.len(),
            "Retrieval results"
        );
        self.store
            .record_rag(NodeId::parse(&payload.node), payload.node_states.as_ref(), rag);
    }

    fn on_token(&mut self, payload: TokenPayload) {
        if !self.store.typing() {
            debug!("Ignoring token outside of a turn");
            return;
        }
        self.pacer.push(payload.token);
    }

    fn on_complete(&mut self, payload: CompletePayload) {
        let flushed = self.pacer.drain();
        info!(
            trace_id = %payload.trace_id,
            total_tokens = payload.total_tokens,
            "Turn complete"
        );
        let trace = TraceSummary {
            trace_id: payload.trace_id,
            timings: payload.timings,
            total_tokens: payload.total_tokens,
            estimated_cost_usd: payload.estimated_cost_usd,
        };
        self.store
            .finish_turn(&flushed, payload.response, payload.node_states.as_ref(), trace);
    }

    fn on_error(&mut self, payload: ErrorPayload) {
        warn!(
            code = %payload.code,
            message = %payload.message,
            retry_after_seconds = payload.retry_after_seconds,
            "Server reported an error"
        );
        self.pacer.clear();
        self.store.fail_turn(ServerError {
            code: payload.code,
            message: payload.message,
            retry_after_seconds: payload.retry_after_seconds,
        });
    }
}
