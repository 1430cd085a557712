//! Client configuration
//!
//! Every knob has a default and can be overridden from the environment.

use crate::session::SessionId;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_SERVER_URL: &str = "ws://127.0.0.1:8000";
pub const DEFAULT_RECONNECT_BASE: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_RECONNECTS: u32 = 5;
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(30);
pub const DEFAULT_PACING: Duration = Duration::from_millis(30);

/// Errors building the connection endpoint
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid server url '{value}': {source}")]
    InvalidUrl {
        value: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported url scheme '{0}' (expected ws, wss, http or https)")]
    UnsupportedScheme(String),
    #[error("server url '{0}' cannot carry a path")]
    CannotBeABase(String),
}

/// Configuration for a mirror client
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    /// Base server url; the session path `/ws/<session_id>` is appended to it
    pub server_url: String,
    /// Delay before the first reconnect attempt; doubles per attempt
    pub reconnect_base_delay: Duration,
    /// Reconnect attempts allowed before giving up
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    /// Period of the token reveal timer
    pub pacing_interval: Duration,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            reconnect_base_delay: DEFAULT_RECONNECT_BASE,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECTS,
            heartbeat_interval: DEFAULT_HEARTBEAT,
            pacing_interval: DEFAULT_PACING,
        }
    }
}

impl MirrorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            server_url: lookup("PIPELINE_MIRROR_URL").unwrap_or(defaults.server_url),
            reconnect_base_delay: parse_var(&lookup, "PIPELINE_MIRROR_RECONNECT_BASE_MS")
                .map_or(defaults.reconnect_base_delay, Duration::from_millis),
            max_reconnect_attempts: parse_var(&lookup, "PIPELINE_MIRROR_MAX_RECONNECTS")
                .unwrap_or(defaults.max_reconnect_attempts),
            heartbeat_interval: parse_var(&lookup, "PIPELINE_MIRROR_HEARTBEAT_SECS")
                .map_or(defaults.heartbeat_interval, Duration::from_secs),
            pacing_interval: parse_var(&lookup, "PIPELINE_MIRROR_PACING_MS")
                .map_or(defaults.pacing_interval, Duration::from_millis),
        }
    }

    /// Build the websocket endpoint for a session: `<server_url>/ws/<session_id>`.
    /// `http`/`https` urls are mapped to `ws`/`wss`.
    pub fn endpoint(&self, session_id: &SessionId) -> Result<Url, ConfigError> {
        let mut url = Url::parse(&self.server_url).map_err(|source| ConfigError::InvalidUrl {
            value: self.server_url.clone(),
            source,
        })?;

        let scheme = match url.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => return Err(ConfigError::UnsupportedScheme(other.to_string())),
        };
        url.set_scheme(scheme)
            .map_err(|()| ConfigError::UnsupportedScheme(url.scheme().to_string()))?;

        url.path_segments_mut()
            .map_err(|()| ConfigError::CannotBeABase(self.server_url.clone()))?
            .pop_if_empty()
            .push("ws")
            .push(session_id.as_str());

        Ok(url)
    }
}

fn parse_var<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = key, value = %raw, "Ignoring unparsable config value");
            None
        }
    }
}
