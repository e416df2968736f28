//! Streaming session controller: one request/response exchange at a time.
//!
//! [`state`] holds the pure state machine (`Idle -> Sending -> Idle`); [`SessionController`]
//! runs its effects against a token channel and a generation backend.

mod accumulator;
mod controller;
mod settings;
pub mod state;

#[cfg(test)]
mod proptests;

pub use accumulator::{LiveBuffer, TokenAccumulator};
pub use controller::{SendOutcome, SessionController};
pub use settings::{today_label, AlternateBackend, GenerationSettings};
pub use state::{ControllerState, Effect, Rejection, SessionEvent, TransitionError};
