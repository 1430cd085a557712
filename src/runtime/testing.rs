//! Mock implementations for testing
//!
//! These mocks enable integration testing of the runtime without sockets.

use super::error::TransportError;
use super::traits::*;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use url::Url;

// ============================================================================
// Mock Server
// ============================================================================

/// Server side of one accepted mock transport
pub struct MockServer {
    to_client: mpsc::UnboundedSender<WireFrame>,
    from_client: mpsc::UnboundedReceiver<WireFrame>,
}

#[allow(dead_code)]
impl MockServer {
    /// Send an event envelope to the client
    pub fn emit(&self, event: &str, payload: Value) {
        let frame = json!({
            "event": event,
            "payload": payload,
            "timestamp": "2024-01-01T00:00:00Z",
        });
        self.send_raw(&frame.to_string());
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(WireFrame::Text(text.to_string()));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(WireFrame::Close {
            code,
            reason: reason.to_string(),
        });
    }

    /// Next frame from the client, or `None` once it hung up
    pub async fn next_frame(&mut self) -> Option<WireFrame> {
        self.from_client.recv().await
    }

    /// Next command of the given type, skipping others (heartbeats and the like)
    pub async fn next_command(&mut self, kind: &str) -> Option<Value> {
        while let Some(frame) = self.from_client.recv().await {
            if let WireFrame::Text(text) = frame {
                let value: Value = serde_json::from_str(&text).ok()?;
                if value["type"] == kind {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Every text command received so far
    pub fn drain_commands(&mut self) -> Vec<Value> {
        let mut commands = vec![];
        while let Ok(frame) = self.from_client.try_recv() {
            if let WireFrame::Text(text) = frame {
                if let Ok(value) = serde_json::from_str(&text) {
                    commands.push(value);
                }
            }
        }
        commands
    }
}

// ============================================================================
// Mock Connector
// ============================================================================

/// Outcome of the next connect attempt
#[derive(Debug, Clone)]
pub enum MockOutcome {
    Accept,
    Refuse(TransportError),
}

/// Connector that accepts by default and hands each accepted server to the test
pub struct MockConnector {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    /// Record of every connect attempt
    attempts: Mutex<Vec<(Instant, Url)>>,
    servers: mpsc::UnboundedSender<MockServer>,
}

#[allow(dead_code)]
impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockServer>) {
        let (servers, accepted) = mpsc::unbounded_channel();
        let connector = Self {
            outcomes: Mutex::new(VecDeque::new()),
            attempts: Mutex::new(Vec::new()),
            servers,
        };
        (connector, accepted)
    }

    pub fn queue(&self, outcome: MockOutcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    pub fn refuse_next(&self, times: usize) {
        for _ in 0..times {
            self.queue(MockOutcome::Refuse(TransportError::network("connection refused")));
        }
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().unwrap().len()
    }

    pub fn attempt_times(&self) -> Vec<Instant> {
        self.attempts.lock().unwrap().iter().map(|(at, _)| *at).collect()
    }

    pub fn endpoints(&self) -> Vec<Url> {
        self.attempts.lock().unwrap().iter().map(|(_, url)| url.clone()).collect()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, endpoint: &Url) -> Result<TransportLink, TransportError> {
        self.attempts
            .lock()
            .unwrap()
            .push((Instant::now(), endpoint.clone()));
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(MockOutcome::Accept);

        match outcome {
            MockOutcome::Refuse(error) => Err(error),
            MockOutcome::Accept => {
                let (to_client, inbound) = mpsc::unbounded_channel();
                let (outbound, from_client) = mpsc::unbounded_channel();
                let _ = self.servers.send(MockServer {
                    to_client,
                    from_client,
                });
                Ok(TransportLink { outbound, inbound })
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorConfig;
    use crate::protocol::OutboundCommand;
    use crate::runtime::MirrorClient;
    use crate::state_machine::event::{
        ABNORMAL_CLOSURE, INVALID_SESSION, NORMAL_CLOSURE, SUPERSEDED,
    };
    use crate::store::{ConnectionStatus, NodeId, NodeStatus, Role, StoreSnapshot};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    const BASE_DELAY: Duration = Duration::from_millis(100);
    const HEARTBEAT: Duration = Duration::from_secs(5);
    const PACING: Duration = Duration::from_millis(10);

    fn test_config() -> MirrorConfig {
        MirrorConfig {
            server_url: "ws://mirror.test".into(),
            reconnect_base_delay: BASE_DELAY,
            max_reconnect_attempts: 3,
            heartbeat_interval: HEARTBEAT,
            pacing_interval: PACING,
        }
    }

    struct TestClient {
        client: MirrorClient,
        connector: Arc<MockConnector>,
        servers: mpsc::UnboundedReceiver<MockServer>,
        snapshots: watch::Receiver<StoreSnapshot>,
        runtime: tokio::task::JoinHandle<()>,
    }

    impl TestClient {
        fn new() -> Self {
            let (connector, servers) = MockConnector::new();
            let connector = Arc::new(connector);
            let (client, runtime) =
                MirrorClient::spawn(&test_config(), Arc::clone(&connector)).unwrap();
            let snapshots = client.subscribe();
            Self {
                client,
                connector,
                servers,
                snapshots,
                runtime,
            }
        }

        /// Connect and return the accepted server once the link is up
        async fn connected(&mut self) -> MockServer {
            self.client.connect().await.unwrap();
            let server = self.servers.recv().await.unwrap();
            self.wait_for(|s| s.connection.status == ConnectionStatus::Connected)
                .await;
            server
        }

        async fn wait_for(
            &mut self,
            predicate: impl Fn(&StoreSnapshot) -> bool,
        ) -> StoreSnapshot {
            let changed = self.snapshots.wait_for(|s| predicate(s));
            let snapshot = tokio::time::timeout(Duration::from_secs(60), changed)
                .await
                .expect("timed out waiting for snapshot")
                .expect("runtime stopped");
            snapshot.clone()
        }
    }

    /// Let spawned tasks run without moving the paused clock much
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_targets_session_endpoint_and_syncs() {
        let mut t = TestClient::new();
        let mut server = t.connected().await;

        let sync = server.next_command("state_sync_request").await;
        assert!(sync.is_some());

        let endpoints = t.connector.endpoints();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].path(), format!("/ws/{}", t.client.session_id()));

        server.emit("connected", json!({"session_id": t.client.session_id().as_str()}));
        let snapshot = t.wait_for(|s| s.connection.acknowledged).await;
        assert_eq!(snapshot.connection.reconnect_attempts, 0);
        assert!(snapshot.connection.last_error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_pings_while_connected() {
        let mut t = TestClient::new();
        let mut server = t.connected().await;

        tokio::time::sleep(HEARTBEAT * 2 + Duration::from_millis(10)).await;
        let pings = server
            .drain_commands()
            .into_iter()
            .filter(|c| c["type"] == "ping")
            .count();
        assert_eq!(pings, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_streamed_turn_is_paced_and_finalized() {
        let mut t = TestClient::new();
        let server = t.connected().await;

        assert!(t.client.send_message("What is RAG?").await);

        server.emit("start", json!({"trace_id": "t-1", "node_states": {"greeter": "active"}}));
        server.emit("node_enter", json!({"node": "response_generator"}));
        server.emit("token", json!({"token": "Hel", "full_response": "Hel"}));
        server.emit("token", json!({"token": "lo", "full_response": "Hello"}));
        settle().await;

        let snapshot = t.client.snapshot();
        assert!(snapshot.streaming.typing);
        assert_eq!(snapshot.streaming.text, "");
        assert_eq!(snapshot.streaming.pending_fragments, 2);

        tokio::time::sleep(PACING).await;
        assert_eq!(t.client.snapshot().streaming.text, "Hel");

        server.emit(
            "complete",
            json!({
                "trace_id": "t-1",
                "response": "Hello",
                "node_states": {"greeter": "complete", "response_generator": "complete"},
                "timings": [],
                "total_tokens": 2,
                "estimated_cost_usd": 0.0
            }),
        );
        let snapshot = t.wait_for(|s| s.messages.len() == 2).await;

        assert_eq!(snapshot.messages[0].role, Role::User);
        assert_eq!(snapshot.messages[0].content, "What is RAG?");
        assert_eq!(snapshot.messages[1].role, Role::Assistant);
        assert_eq!(snapshot.messages[1].content, "Hello");
        assert!(!snapshot.streaming.typing);
        assert!(snapshot.streaming.text.is_empty());
        assert_eq!(snapshot.streaming.pending_fragments, 0);
        assert_eq!(snapshot.execution.current_node, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_while_disconnected_is_dropped() {
        let t = TestClient::new();
        assert!(!t.client.send_message("hello?").await);
        settle().await;
        assert!(t.client.snapshot().messages.is_empty());
        assert_eq!(t.connector.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_raw_send_requires_connection() {
        let mut t = TestClient::new();
        assert!(!t.client.send(OutboundCommand::Ping).await);

        let mut server = t.connected().await;
        server.next_command("state_sync_request").await.unwrap();
        assert!(t.client.send(OutboundCommand::StateSyncRequest).await);
        assert!(server.next_command("state_sync_request").await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_never_reconnects() {
        let mut t = TestClient::new();
        let mut server = t.connected().await;

        t.client.disconnect().await.unwrap();
        let snapshot = t
            .wait_for(|s| s.connection.status == ConnectionStatus::Disconnected)
            .await;
        assert_eq!(snapshot.connection.reconnect_attempts, 0);

        // The server saw a normal close
        let mut saw_close = false;
        while let Some(frame) = server.next_frame().await {
            if let WireFrame::Close { code, .. } = frame {
                assert_eq!(code, NORMAL_CLOSURE);
                saw_close = true;
            }
        }
        assert!(saw_close);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(t.connector.attempt_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_cancels_pending_reconnect() {
        let mut t = TestClient::new();
        let server = t.connected().await;

        server.close(ABNORMAL_CLOSURE, "");
        t.wait_for(|s| s.connection.status == ConnectionStatus::Connecting)
            .await;
        t.client.disconnect().await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(t.connector.attempt_count(), 1);
        assert_eq!(t.client.snapshot().connection.status, ConnectionStatus::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_doubles_then_gives_up() {
        let mut t = TestClient::new();
        let server = t.connected().await;

        t.connector.refuse_next(3);
        let dropped_at = Instant::now();
        server.close(ABNORMAL_CLOSURE, "");

        let snapshot = t
            .wait_for(|s| s.connection.status == ConnectionStatus::TerminallyFailed)
            .await;
        assert_eq!(snapshot.connection.reconnect_attempts, 3);
        assert!(snapshot
            .connection
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("Gave up")));

        let times = t.connector.attempt_times();
        assert_eq!(times.len(), 4);
        let offsets: Vec<Duration> = times[1..].iter().map(|at| *at - dropped_at).collect();
        assert_eq!(
            offsets,
            vec![BASE_DELAY, BASE_DELAY * 3, BASE_DELAY * 7],
            "retries should wait 1x, 2x, 4x the base delay"
        );

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert_eq!(t.connector.attempt_count(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_reconnect_resets_attempts_and_resyncs() {
        let mut t = TestClient::new();
        let mut first = t.connected().await;
        first.next_command("state_sync_request").await.unwrap();

        t.connector.refuse_next(1);
        first.close(ABNORMAL_CLOSURE, "");

        let mut second = t.servers.recv().await.unwrap();
        let snapshot = t
            .wait_for(|s| s.connection.status == ConnectionStatus::Connected)
            .await;
        assert_eq!(snapshot.connection.reconnect_attempts, 0);
        assert!(snapshot.connection.last_error.is_none());
        assert_eq!(t.connector.attempt_count(), 3);
        assert!(second.next_command("state_sync_request").await.is_some());

        second.emit(
            "state_sync",
            json!({
                "current_node": null,
                "node_states": {"greeter": "complete", "intent_classifier": "complete"},
                "streaming_response": null
            }),
        );
        let snapshot = t
            .wait_for(|s| s.execution.node_states.get(NodeId::Greeter) == NodeStatus::Complete)
            .await;
        assert_eq!(snapshot.execution.current_node, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_session_is_terminal() {
        let mut t = TestClient::new();
        let server = t.connected().await;

        server.close(INVALID_SESSION, "Invalid session ID");
        let snapshot = t
            .wait_for(|s| s.connection.status == ConnectionStatus::TerminallyFailed)
            .await;
        assert!(snapshot.connection.last_error.is_some());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(t.connector.attempt_count(), 1);

        // An explicit connect tries again
        t.client.connect().await.unwrap();
        let _again = t.servers.recv().await.unwrap();
        t.wait_for(|s| s.connection.status == ConnectionStatus::Connected)
            .await;
        assert_eq!(t.connector.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_session_stays_disconnected() {
        let mut t = TestClient::new();
        let server = t.connected().await;

        server.close(SUPERSEDED, "New connection opened");
        let snapshot = t
            .wait_for(|s| s.connection.status == ConnectionStatus::Disconnected)
            .await;
        assert!(snapshot
            .connection
            .last_error
            .as_deref()
            .is_some_and(|e| e.contains("another client")));
        assert_eq!(snapshot.connection.reconnect_attempts, 0);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(t.connector.attempt_count(), 1);

        // Taking the session back is an explicit decision
        t.client.connect().await.unwrap();
        let _again = t.servers.recv().await.unwrap();
        let snapshot = t
            .wait_for(|s| s.connection.status == ConnectionStatus::Connected)
            .await;
        assert!(snapshot.connection.last_error.is_none());
        assert_eq!(t.connector.attempt_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_frames_are_ignored() {
        let mut t = TestClient::new();
        let server = t.connected().await;

        server.send_raw("not json at all");
        server.emit("token", json!({"no_token_field": true}));
        server.emit("mystery_event", json!({}));
        server.emit("start", json!({"trace_id": "t-2", "node_states": {}}));

        let snapshot = t.wait_for(|s| s.turn_id.as_deref() == Some("t-2")).await;
        assert!(snapshot.streaming.typing);
        assert_eq!(snapshot.connection.status, ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_error_aborts_turn() {
        let mut t = TestClient::new();
        let server = t.connected().await;

        server.emit("start", json!({"trace_id": "t-3", "node_states": {}}));
        server.emit("node_enter", json!({"node": "response_generator"}));
        server.emit("token", json!({"token": "partial"}));
        server.emit(
            "error",
            json!({
                "code": "RATE_LIMITED",
                "message": "Too many requests",
                "retry_after_seconds": 30
            }),
        );

        let snapshot = t.wait_for(|s| s.server_error.is_some()).await;
        let error = snapshot.server_error.unwrap();
        assert_eq!(error.code, "RATE_LIMITED");
        assert_eq!(error.retry_after_seconds, Some(30));
        assert!(!snapshot.streaming.typing);
        assert_eq!(snapshot.streaming.pending_fragments, 0);
        assert!(snapshot.messages.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_execution_but_keeps_history() {
        let mut t = TestClient::new();
        let server = t.connected().await;

        assert!(t.client.send_message("hi").await);
        server.emit("start", json!({"trace_id": "t-4", "node_states": {}}));
        server.emit("node_enter", json!({"node": "intent_classifier"}));
        t.wait_for(|s| s.execution.current_node == Some(NodeId::IntentClassifier))
            .await;

        t.client.reset().await.unwrap();
        let snapshot = t.wait_for(|s| s.execution.current_node.is_none()).await;

        assert_eq!(snapshot.messages.len(), 1);
        assert!(!snapshot.streaming.typing);
        assert!(snapshot.turn_id.is_none());
        assert!(snapshot
            .execution
            .node_states
            .iter()
            .all(|(_, status)| status == NodeStatus::Pending));
        assert_eq!(snapshot.connection.status, ConnectionStatus::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_runtime_and_timers() {
        let mut t = TestClient::new();
        let server = t.connected().await;

        server.close(ABNORMAL_CLOSURE, "");
        t.wait_for(|s| s.connection.status == ConnectionStatus::Connecting)
            .await;

        t.client.shutdown().await.unwrap();
        t.runtime.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(t.connector.attempt_count(), 1);
        assert!(!t.client.send_message("anyone?").await);
        assert!(t.client.connect().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_every_handle_tears_down() {
        let t = TestClient::new();
        let TestClient {
            client,
            runtime,
            snapshots,
            ..
        } = t;
        drop(client);
        drop(snapshots);
        tokio::time::timeout(Duration::from_secs(5), runtime)
            .await
            .expect("runtime should stop")
            .unwrap();
    }
}
