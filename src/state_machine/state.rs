//! Connection link state types

use crate::config::MirrorConfig;
use crate::session::SessionId;
use crate::store::ConnectionStatus;
use std::time::Duration;
use url::Url;

/// Lifecycle of the transport link.
///
/// Every variant except `Connected` carries the number of reconnect attempts
/// made since the last verified open. Only a verified open resets it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkState {
    /// No transport and nothing scheduled
    Disconnected { attempts: u32 },

    /// Transport open in flight
    Connecting { attempts: u32 },

    /// Transport open and verified
    Connected,

    /// Waiting out the backoff delay before attempt number `attempts`
    Reconnecting { attempts: u32 },

    /// Gave up. Only an explicit connect leaves this state.
    TerminallyFailed { attempts: u32 },
}

impl Default for LinkState {
    fn default() -> Self {
        LinkState::Disconnected { attempts: 0 }
    }
}

impl LinkState {
    pub fn attempts(&self) -> u32 {
        match self {
            LinkState::Disconnected { attempts }
            | LinkState::Connecting { attempts }
            | LinkState::Reconnecting { attempts }
            | LinkState::TerminallyFailed { attempts } => *attempts,
            LinkState::Connected => 0,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        match self {
            LinkState::Disconnected { .. } => ConnectionStatus::Disconnected,
            LinkState::Connecting { .. } | LinkState::Reconnecting { .. } => {
                ConnectionStatus::Connecting
            }
            LinkState::Connected => ConnectionStatus::Connected,
            LinkState::TerminallyFailed { .. } => ConnectionStatus::TerminallyFailed,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, LinkState::Connected)
    }
}

/// Immutable inputs to the transition function
#[derive(Debug, Clone)]
pub struct LinkContext {
    pub session_id: SessionId,
    pub endpoint: Url,
    pub reconnect_base_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
}

impl LinkContext {
    pub fn new(session_id: SessionId, endpoint: Url, config: &MirrorConfig) -> Self {
        Self {
            session_id,
            endpoint,
            reconnect_base_delay: config.reconnect_base_delay,
            max_reconnect_attempts: config.max_reconnect_attempts,
            heartbeat_interval: config.heartbeat_interval,
        }
    }

    /// Backoff before the reconnect that follows `attempts` earlier ones:
    /// `base * 2^attempts`, saturating.
    pub fn backoff_delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.checked_pow(attempts).unwrap_or(u32::MAX);
        self.reconnect_base_delay.saturating_mul(factor)
    }
}
