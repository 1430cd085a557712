//! Events that drive the link state machine

/// Clean shutdown
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close frame carried no status code
pub const NO_STATUS: u16 = 1005;
/// Transport dropped without a close frame
pub const ABNORMAL_CLOSURE: u16 = 1006;
/// Server replaced this transport with a newer one for the same session
pub const SUPERSEDED: u16 = 4000;
/// Server refused the session id
pub const INVALID_SESSION: u16 = 4001;

/// How a close code is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Deliberate close; never reconnect
    Normal,
    /// Another client now owns the session; reconnecting would steal it back
    Superseded,
    /// Server will never accept this session
    Rejected,
    /// Anything else; eligible for reconnect
    Abnormal,
}

impl CloseKind {
    pub fn classify(code: Option<u16>) -> Self {
        match code {
            Some(NORMAL_CLOSURE) => CloseKind::Normal,
            Some(SUPERSEDED) => CloseKind::Superseded,
            Some(INVALID_SESSION) => CloseKind::Rejected,
            _ => CloseKind::Abnormal,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    // Caller commands
    Connect,
    Disconnect,

    // Transport outcomes
    TransportOpened,
    TransportFailed {
        message: String,
        retryable: bool,
    },
    TransportClosed {
        code: Option<u16>,
        reason: String,
    },

    // Timers
    RetryElapsed {
        attempt: u32,
    },
    HeartbeatTick,
}
