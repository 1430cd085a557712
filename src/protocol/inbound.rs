//! Server to client events
//!
//! Every frame is an envelope `{"event": <kind>, "payload": {...}, "timestamp": ...}`.
//! The envelope is parsed first, then the payload is decoded by kind.

use super::ProtocolError;
use crate::store::{NodeTiming, QueryProjection, WireNodeStates};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawEnvelope {
    event: String,
    #[serde(default)]
    payload: Value,
}

/// Treat an explicit `null` like a missing field
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectedPayload {
    pub session_id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

/// Full state snapshot; every field may be absent
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
pub struct StateSyncPayload {
    #[serde(default)]
    pub current_node: Option<String>,
    #[serde(default)]
    pub node_states: Option<WireNodeStates>,
    #[serde(default)]
    pub streaming_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartPayload {
    pub trace_id: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub node_states: WireNodeStates,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NodeEnterPayload {
    pub node: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeCompletePayload {
    pub node: String,
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub node_states: Option<WireNodeStates>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RagResultsPayload {
    pub node: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub confidence: f64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub chunk_ids: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub scores: Vec<f64>,
    #[serde(default)]
    pub query_projection: Option<QueryProjection>,
    #[serde(default)]
    pub node_states: Option<WireNodeStates>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPayload {
    pub token: String,
    /// Server-side accumulated text so far. Informational only.
    #[serde(default)]
    pub full_response: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CompletePayload {
    #[serde(default, deserialize_with = "null_as_default")]
    pub trace_id: String,
    /// Authoritative final text; overrides whatever was streamed
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub node_states: Option<WireNodeStates>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub timings: Vec<NodeTiming>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub total_tokens: u64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub estimated_cost_usd: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorPayload {
    #[serde(default = "unknown_error_code")]
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub retry_after_seconds: Option<u64>,
}

fn unknown_error_code() -> String {
    "UNKNOWN".to_string()
}

/// A decoded server event
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Connected(ConnectedPayload),
    Pong,
    StateSync(StateSyncPayload),
    Start(StartPayload),
    NodeEnter(NodeEnterPayload),
    NodeComplete(NodeCompletePayload),
    RagResults(RagResultsPayload),
    Token(TokenPayload),
    Complete(CompletePayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::Connected(_) => "connected",
            ServerEvent::Pong => "pong",
            ServerEvent::StateSync(_) => "state_sync",
            ServerEvent::Start(_) => "start",
            ServerEvent::NodeEnter(_) => "node_enter",
            ServerEvent::NodeComplete(_) => "node_complete",
            ServerEvent::RagResults(_) => "rag_results",
            ServerEvent::Token(_) => "token",
            ServerEvent::Complete(_) => "complete",
            ServerEvent::Error(_) => "error",
        }
    }
}

fn payload<T: DeserializeOwned>(kind: &str, value: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(value).map_err(|source| ProtocolError::MalformedPayload {
        kind: kind.to_string(),
        source,
    })
}

/// Parse one text frame. Unknown event kinds yield `Ok(None)`.
pub fn parse_frame(text: &str) -> Result<Option<ServerEvent>, ProtocolError> {
    let RawEnvelope { event, payload: body } =
        serde_json::from_str(text).map_err(ProtocolError::MalformedEnvelope)?;

    let decoded = match event.as_str() {
        "connected" => ServerEvent::Connected(payload(&event, body)?),
        "pong" => ServerEvent::Pong,
        // A sync without a payload means "nothing to report"
        "state_sync" if body.is_null() => ServerEvent::StateSync(StateSyncPayload::default()),
        "state_sync" => ServerEvent::StateSync(payload(&event, body)?),
        "start" => ServerEvent::Start(payload(&event, body)?),
        "node_enter" => ServerEvent::NodeEnter(payload(&event, body)?),
        "node_complete" => ServerEvent::NodeComplete(payload(&event, body)?),
        "rag_results" => ServerEvent::RagResults(payload(&event, body)?),
        "token" => ServerEvent::Token(payload(&event, body)?),
        "complete" => ServerEvent::Complete(payload(&event, body)?),
        "error" => ServerEvent::Error(payload(&event, body)?),
        _ => return Ok(None),
    };
    Ok(Some(decoded))
}

/// Decode a frame for dispatch. Malformed and unknown frames are logged and
/// dropped; they never reach the store.
pub fn decode_frame(text: &str) -> Option<ServerEvent> {
    match parse_frame(text) {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            tracing::debug!(frame_len = text.len(), "Ignoring unknown event kind");
            None
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dropping malformed frame");
            None
        }
    }
}
