//! Effects produced by link transitions

use super::event::NORMAL_CLOSURE;
use crate::protocol::OutboundCommand;
use std::time::Duration;

/// Effects to be executed after a state transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Start opening a transport to the session endpoint
    OpenTransport,

    /// Close the live transport, if any
    CloseTransport { code: u16, reason: &'static str },

    StartHeartbeat,
    StopHeartbeat,

    /// Fire `RetryElapsed { attempt }` after `delay`
    ScheduleRetry { delay: Duration, attempt: u32 },

    /// Drop any pending reconnect timer
    CancelRetry,

    /// Write a command to the live transport
    Send(OutboundCommand),

    /// Surface a connection error to consumers
    RecordError { message: String },

    ClearError,
}

impl Effect {
    pub fn close_normally() -> Self {
        Effect::CloseTransport {
            code: NORMAL_CLOSURE,
            reason: "client disconnect",
        }
    }

    pub fn request_state_sync() -> Self {
        Effect::Send(OutboundCommand::StateSyncRequest)
    }

    pub fn ping() -> Self {
        Effect::Send(OutboundCommand::Ping)
    }

    pub fn record_error(message: impl Into<String>) -> Self {
        Effect::RecordError {
            message: message.into(),
        }
    }
}
