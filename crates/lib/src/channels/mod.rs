//! Named event channels the generation backend publishes text fragments on.
//!
//! The backend emits through an [`Emitter`]; a session listens through a [`Subscription`]
//! obtained from an [`EventSource`]. Fragments arrive in emission order.

mod registry;
mod subscription;

pub use registry::{Emitter, EventHub, EventSource, SubscribeError};
pub use subscription::Subscription;

/// Channel carrying streamed reply fragments, one string per event.
pub const TOKEN_CHANNEL: &str = "chat-token";
