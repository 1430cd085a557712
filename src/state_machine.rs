//! Connection link state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions: the
//! runtime feeds [`Event`]s in and executes the returned [`Effect`]s.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;


pub use effect::Effect;
pub use event::{CloseKind, Event};
pub use state::{LinkContext, LinkState};
pub use transition::{transition, TransitionError, TransitionResult};
