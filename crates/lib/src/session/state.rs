//! Pure session state machine.
//!
//! `transition` maps (state, event) to (next state, effects) with no I/O; the controller
//! executes the effects. Only two states exist: `Idle` and `Sending`.

use crate::conversation::Turn;
use crate::sanitize::strip_fake_turns;

use super::TokenAccumulator;

/// The one in-flight exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    prompt: String,
    accumulator: TokenAccumulator,
    /// Set once the token subscription is open and the user turn is recorded.
    subscribed: bool,
    /// The prompt came from the input field, which is cleared once the send is accepted.
    from_input: bool,
}

impl Session {
    fn new(prompt: &str, from_input: bool) -> Self {
        Self {
            prompt: prompt.to_string(),
            accumulator: TokenAccumulator::new(),
            subscribed: false,
            from_input,
        }
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn accumulated(&self) -> &str {
        self.accumulator.as_str()
    }

    pub fn is_subscribed(&self) -> bool {
        self.subscribed
    }

    pub fn fragment_count(&self) -> usize {
        self.accumulator.fragment_count()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ControllerState {
    #[default]
    Idle,
    Sending(Session),
}

impl ControllerState {
    pub fn is_sending(&self) -> bool {
        matches!(self, ControllerState::Sending(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            ControllerState::Sending(s) => Some(s),
            ControllerState::Idle => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            ControllerState::Idle => "idle",
            ControllerState::Sending(s) if s.subscribed => "sending",
            ControllerState::Sending(_) => "subscribing",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// User asked to send `input` (untrimmed). `from_input` is false for direct sends that
    /// leave the input field alone.
    Submit { input: String, from_input: bool },
    SubscriptionOpened,
    SubscriptionFailed { reason: String },
    Fragment(String),
    BackendFinished,
    BackendFailed { message: String },
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::Submit { .. } => "submit",
            SessionEvent::SubscriptionOpened => "subscription opened",
            SessionEvent::SubscriptionFailed { .. } => "subscription failed",
            SessionEvent::Fragment(_) => "fragment",
            SessionEvent::BackendFinished => "backend finished",
            SessionEvent::BackendFailed { .. } => "backend failed",
        }
    }
}

/// Work for the controller, in the order it must happen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    OpenSubscription,
    AppendTurn(Turn),
    ClearInput,
    ClearLive,
    MirrorLive(String),
    IssueRequest { prompt: String },
    CloseSubscription,
}

/// Why a send never started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("a reply is still streaming")]
    Busy,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error(transparent)]
    Rejected(#[from] Rejection),
    #[error("invalid transition: {event} while {state}")]
    Invalid {
        state: &'static str,
        event: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionContext {
    pub strip_fake_turns: bool,
}

/// Diagnostic text shown in the conversation when generation fails.
pub fn failure_notice(message: &str) -> String {
    format!("[Error: {}]", message)
}

/// On error the returned state is `current`, unchanged.
pub fn transition(
    current: ControllerState,
    ctx: &TransitionContext,
    event: SessionEvent,
) -> (ControllerState, Result<Vec<Effect>, TransitionError>) {
    use ControllerState::{Idle, Sending};

    match (current, event) {
        (Idle, SessionEvent::Submit { input, from_input }) => {
            let prompt = input.trim();
            if prompt.is_empty() {
                return (Idle, Err(Rejection::EmptyPrompt.into()));
            }
            (
                Sending(Session::new(prompt, from_input)),
                Ok(vec![Effect::OpenSubscription]),
            )
        }
        (busy @ Sending(_), SessionEvent::Submit { .. }) => (busy, Err(Rejection::Busy.into())),

        (Sending(mut s), SessionEvent::SubscriptionOpened) if !s.subscribed => {
            s.subscribed = true;
            let prompt = s.prompt.clone();
            let mut effects = vec![Effect::AppendTurn(Turn::user(prompt.clone()))];
            if s.from_input {
                effects.push(Effect::ClearInput);
            }
            effects.push(Effect::ClearLive);
            effects.push(Effect::IssueRequest { prompt });
            (Sending(s), Ok(effects))
        }
        (Sending(s), SessionEvent::SubscriptionFailed { .. }) if !s.subscribed => (Idle, Ok(vec![])),

        (Sending(mut s), SessionEvent::Fragment(fragment)) if s.subscribed => {
            s.accumulator.push(&fragment);
            (Sending(s), Ok(vec![Effect::MirrorLive(fragment)]))
        }
        (Sending(s), SessionEvent::BackendFinished) if s.subscribed => {
            (Idle, Ok(finalize(s, ctx, None, Vec::new())))
        }
        (Sending(s), SessionEvent::BackendFailed { message }) if s.subscribed => {
            let notice = failure_notice(&message);
            let mirror = if s.accumulator.is_empty() {
                notice.clone()
            } else {
                format!("\n\n{}", notice)
            };
            (
                Idle,
                Ok(finalize(s, ctx, Some(notice), vec![Effect::MirrorLive(mirror)])),
            )
        }

        (other, event) => {
            let err = TransitionError::Invalid {
                state: other.name(),
                event: event.name(),
            };
            (other, Err(err))
        }
    }
}

/// Sanitize the streamed text, attach any failure notice after it, record the assistant
/// turn, and release the session's resources.
fn finalize(
    mut session: Session,
    ctx: &TransitionContext,
    notice: Option<String>,
    mut effects: Vec<Effect>,
) -> Vec<Effect> {
    let streamed = session.accumulator.take();
    let body = if ctx.strip_fake_turns {
        strip_fake_turns(&streamed)
    } else {
        streamed
    };
    let content = match notice {
        Some(n) if body.is_empty() => n,
        Some(n) => format!("{}\n\n{}", body, n),
        None => body,
    };
    effects.push(Effect::AppendTurn(Turn::assistant(content)));
    effects.push(Effect::CloseSubscription);
    effects.push(Effect::ClearLive);
    effects
}
