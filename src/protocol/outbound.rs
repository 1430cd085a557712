//! Client to server commands

use super::ProtocolError;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessagePayload {
    pub text: String,
}

/// A command sent to the server, encoded as `{"type": ..., "payload": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundCommand {
    /// Submit user text for a new turn
    Message { payload: MessagePayload },
    /// Heartbeat
    Ping,
    /// Ask for a full state snapshot after (re)connecting
    StateSyncRequest,
}

impl OutboundCommand {
    pub fn message(text: impl Into<String>) -> Self {
        OutboundCommand::Message {
            payload: MessagePayload { text: text.into() },
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            OutboundCommand::Message { .. } => "message",
            OutboundCommand::Ping => "ping",
            OutboundCommand::StateSyncRequest => "state_sync_request",
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|source| ProtocolError::Encode {
            kind: self.kind(),
            source,
        })
    }
}
