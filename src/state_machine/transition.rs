//! Pure state transition function
//!
//! Given the same state, context and event this always yields the same new
//! state and effects. Timers, sockets and the store are touched only by the
//! runtime when it executes the effects.

use super::event::CloseKind;
use super::{Effect, Event, LinkContext, LinkState};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: LinkState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(state: LinkState) -> Self {
        Self {
            new_state: state,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("Retry timer for attempt {fired} fired, but attempt {scheduled} is pending")]
    StaleRetry { scheduled: u32, fired: u32 },
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),
}

pub fn transition(
    state: &LinkState,
    context: &LinkContext,
    event: Event,
) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        // ============================================================
        // Caller commands
        // ============================================================

        // The attempt counter survives an explicit connect; a verified open resets it
        (
            LinkState::Disconnected { attempts } | LinkState::TerminallyFailed { attempts },
            Event::Connect,
        ) => Ok(TransitionResult::new(LinkState::Connecting {
            attempts: *attempts,
        })
        .with_effect(Effect::OpenTransport)),

        // Skip the rest of the backoff
        (LinkState::Reconnecting { attempts }, Event::Connect) => {
            Ok(TransitionResult::new(LinkState::Connecting {
                attempts: *attempts,
            })
            .with_effect(Effect::CancelRetry)
            .with_effect(Effect::OpenTransport))
        }

        (LinkState::Connecting { .. } | LinkState::Connected, Event::Connect)
        | (LinkState::Disconnected { .. }, Event::Disconnect) => {
            Ok(TransitionResult::new(state.clone()))
        }

        (_, Event::Disconnect) => Ok(TransitionResult::new(LinkState::Disconnected {
            attempts: state.attempts(),
        })
        .with_effects([
            Effect::CancelRetry,
            Effect::StopHeartbeat,
            Effect::close_normally(),
        ])),

        // ============================================================
        // Transport outcomes
        // ============================================================
        (LinkState::Connecting { .. }, Event::TransportOpened) => {
            Ok(TransitionResult::new(LinkState::Connected).with_effects([
                Effect::ClearError,
                Effect::StartHeartbeat,
                Effect::request_state_sync(),
            ]))
        }

        (
            LinkState::Connecting { attempts },
            Event::TransportFailed {
                message,
                retryable: true,
            },
        ) => Ok(schedule_reconnect(context, *attempts, &message)),

        (
            LinkState::Connecting { attempts },
            Event::TransportFailed {
                message,
                retryable: false,
            },
        ) => Ok(fail_terminally(*attempts, format!("Cannot connect: {message}"))),

        (LinkState::Connecting { attempts }, Event::TransportClosed { code, reason }) => {
            Ok(on_close(context, *attempts, code, &reason))
        }

        (LinkState::Connected, Event::TransportClosed { code, reason }) => {
            Ok(on_close(context, 0, code, &reason))
        }

        // ============================================================
        // Timers
        // ============================================================
        (LinkState::Reconnecting { attempts }, Event::RetryElapsed { attempt })
            if attempt == *attempts =>
        {
            Ok(TransitionResult::new(LinkState::Connecting {
                attempts: *attempts,
            })
            .with_effect(Effect::OpenTransport))
        }

        (LinkState::Reconnecting { attempts }, Event::RetryElapsed { attempt }) => {
            Err(TransitionError::StaleRetry {
                scheduled: *attempts,
                fired: attempt,
            })
        }

        (LinkState::Connected, Event::HeartbeatTick) => {
            Ok(TransitionResult::new(LinkState::Connected).with_effect(Effect::ping()))
        }

        (state, event) => Err(TransitionError::InvalidTransition(format!(
            "No transition from {state:?} on {event:?}"
        ))),
    }
}

fn on_close(
    context: &LinkContext,
    attempts: u32,
    code: Option<u16>,
    reason: &str,
) -> TransitionResult {
    let described = describe_close(code, reason);
    let result = match CloseKind::classify(code) {
        CloseKind::Normal => TransitionResult::new(LinkState::Disconnected { attempts }),
        CloseKind::Superseded => TransitionResult::new(LinkState::Disconnected { attempts })
            .with_effect(Effect::record_error(format!(
                "Session was opened by another client ({described})"
            ))),
        CloseKind::Rejected => {
            fail_terminally(attempts, format!("Server rejected the session ({described})"))
        }
        CloseKind::Abnormal => schedule_reconnect(context, attempts, &described),
    };
    result.with_effect(Effect::StopHeartbeat)
}

/// Schedule the next reconnect, or give up once the budget is spent
fn schedule_reconnect(context: &LinkContext, attempts: u32, cause: &str) -> TransitionResult {
    if attempts >= context.max_reconnect_attempts {
        return fail_terminally(
            attempts,
            format!("Gave up after {attempts} reconnect attempts: {cause}"),
        );
    }

    let delay = context.backoff_delay(attempts);
    let attempt = attempts + 1;
    TransitionResult::new(LinkState::Reconnecting { attempts: attempt }).with_effects([
        Effect::record_error(cause),
        Effect::ScheduleRetry { delay, attempt },
    ])
}

fn fail_terminally(attempts: u32, message: String) -> TransitionResult {
    TransitionResult::new(LinkState::TerminallyFailed { attempts })
        .with_effect(Effect::RecordError { message })
}

fn describe_close(code: Option<u16>, reason: &str) -> String {
    match (code, reason.is_empty()) {
        (Some(code), true) => format!("closed with code {code}"),
        (Some(code), false) => format!("closed with code {code}: {reason}"),
        (None, true) => "connection lost".to_string(),
        (None, false) => format!("connection lost: {reason}"),
    }
}
