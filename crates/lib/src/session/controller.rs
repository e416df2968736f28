//! Session controller: runs the state machine against the token channel and the backend.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;

use super::state::{transition, ControllerState, Effect, Rejection, SessionEvent, TransitionContext, TransitionError};
use super::{today_label, GenerationSettings, LiveBuffer};
use crate::backend::GenerationBackend;
use crate::channels::{EventSource, TOKEN_CHANNEL};
use crate::conversation::{ConversationLog, Turn};

/// How a send ended. Failures never surface as `Err`; they are recorded here and, for
/// backend failures, in the conversation itself.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Nothing happened: no turn appended, no backend call.
    Rejected(Rejection),
    /// The token channel could not be opened; the backend was not called.
    SubscribeFailed(String),
    Completed(Turn),
    /// The backend failed; `turn` holds the partial text plus the failure notice.
    Failed { turn: Turn, message: String },
    /// The exchange could not be finalized and was reset to idle.
    Abandoned(String),
}

struct Inner {
    state: ControllerState,
    log: ConversationLog,
    input: String,
    settings: GenerationSettings,
}

/// Owns the conversation and at most one in-flight exchange. Clones share state.
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Mutex<Inner>>,
    events: Arc<dyn EventSource>,
    backend: Arc<dyn GenerationBackend>,
    live: LiveBuffer,
}

impl SessionController {
    pub fn new(
        events: Arc<dyn EventSource>,
        backend: Arc<dyn GenerationBackend>,
        settings: GenerationSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ControllerState::Idle,
                log: ConversationLog::new(),
                input: String::new(),
                settings: settings.clamped(),
            })),
            events,
            backend,
            live: LiveBuffer::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn settings(&self) -> GenerationSettings {
        self.lock().settings.clone()
    }

    /// Replace the settings used by the next send. Values are clamped.
    pub fn set_settings(&self, settings: GenerationSettings) {
        self.lock().settings = settings.clamped();
    }

    pub fn input(&self) -> String {
        self.lock().input.clone()
    }

    pub fn set_input(&self, text: impl Into<String>) {
        self.lock().input = text.into();
    }

    /// True while an exchange is in flight; input controls should be disabled.
    pub fn is_busy(&self) -> bool {
        self.lock().state.is_sending()
    }

    pub fn conversation(&self) -> Vec<Turn> {
        self.lock().log.snapshot()
    }

    /// Streamed text of the current exchange, for live rendering.
    pub fn live_view(&self) -> watch::Receiver<String> {
        self.live.subscribe()
    }

    pub fn live_text(&self) -> String {
        self.live.current()
    }

    /// Send the current input.
    pub async fn submit(&self) -> SendOutcome {
        let input = self.input();
        self.run(input, true).await
    }

    /// Send `text` directly. The input field is neither read nor cleared.
    pub async fn send(&self, text: &str) -> SendOutcome {
        self.run(text.to_string(), false).await
    }

    /// Apply one event and carry out the synchronous effects. All effects are returned so
    /// the caller can handle the asynchronous ones.
    fn apply(&self, event: SessionEvent) -> Result<Vec<Effect>, TransitionError> {
        let mut g = self.lock();
        let ctx = TransitionContext {
            strip_fake_turns: g.settings.strip_fake_turns,
        };
        let current = std::mem::take(&mut g.state);
        let (next, outcome) = transition(current, &ctx, event);
        g.state = next;
        let effects = outcome?;
        for effect in &effects {
            match effect {
                Effect::AppendTurn(turn) => g.log.append(turn.clone()),
                Effect::ClearInput => g.input.clear(),
                Effect::ClearLive => self.live.clear(),
                Effect::MirrorLive(text) => self.live.append(text),
                Effect::OpenSubscription
                | Effect::IssueRequest { .. }
                | Effect::CloseSubscription => {}
            }
        }
        Ok(effects)
    }

    fn apply_logged(&self, event: SessionEvent) -> Vec<Effect> {
        match self.apply(event) {
            Ok(effects) => effects,
            Err(e) => {
                log::error!("session: {}", e);
                Vec::new()
            }
        }
    }

    fn force_idle(&self) {
        let mut g = self.lock();
        if g.state.is_sending() {
            log::warn!("session: exchange ended without finalizing; back to idle");
            g.state = ControllerState::Idle;
        }
        self.live.clear();
    }

    async fn run(&self, input: String, from_input: bool) -> SendOutcome {
        match self.apply(SessionEvent::Submit { input, from_input }) {
            Ok(_) => {}
            Err(TransitionError::Rejected(r)) => {
                log::debug!("session: send rejected: {}", r);
                return SendOutcome::Rejected(r);
            }
            Err(e) => {
                log::error!("session: {}", e);
                return SendOutcome::Rejected(Rejection::Busy);
            }
        }

        // Declared before the subscription so the subscription is released first on drop.
        let mut guard = ExchangeGuard {
            controller: self,
            armed: true,
        };

        let mut subscription = match self.events.listen(TOKEN_CHANNEL).await {
            Ok(sub) => sub,
            Err(e) => {
                let reason = e.to_string();
                log::warn!("session: {}", reason);
                self.apply_logged(SessionEvent::SubscriptionFailed {
                    reason: reason.clone(),
                });
                guard.disarm();
                return SendOutcome::SubscribeFailed(reason);
            }
        };

        let issued = self
            .apply_logged(SessionEvent::SubscriptionOpened)
            .into_iter()
            .find_map(|e| match e {
                Effect::IssueRequest { prompt } => Some(prompt),
                _ => None,
            });
        let Some(prompt) = issued else {
            return SendOutcome::Abandoned("session ended before the request was issued".to_string());
        };

        let request = {
            let g = self.lock();
            let date = g.settings.include_date.then(today_label);
            g.settings.request(&prompt, date)
        };
        log::info!(
            "session: sending {} chars (max_tokens={:?}, alternate={})",
            prompt.len(),
            request.max_tokens,
            request.alternate_backend().is_some()
        );

        let mut call = self.backend.generate(request);
        let result = loop {
            tokio::select! {
                biased;
                Some(fragment) = subscription.next_fragment() => {
                    self.apply_logged(SessionEvent::Fragment(fragment));
                }
                result = &mut call => break result,
            }
        };
        // Fragments emitted right before completion may still be queued.
        while let Some(fragment) = subscription.try_next_fragment() {
            self.apply_logged(SessionEvent::Fragment(fragment));
        }

        let (event, failure) = match result {
            Ok(()) => (SessionEvent::BackendFinished, None),
            Err(e) => {
                let message = e.to_string();
                log::warn!("session: generation failed: {}", message);
                (
                    SessionEvent::BackendFailed {
                        message: message.clone(),
                    },
                    Some(message),
                )
            }
        };
        let fragments = self
            .lock()
            .state
            .session()
            .map_or(0, |s| s.fragment_count());
        let effects = self.apply_logged(event);
        let mut turn = None;
        for effect in effects {
            match effect {
                Effect::CloseSubscription => subscription.close(),
                Effect::AppendTurn(t) => turn = Some(t),
                _ => {}
            }
        }
        let Some(turn) = turn else {
            return SendOutcome::Abandoned("exchange could not be finalized".to_string());
        };
        guard.disarm();
        log::debug!(
            "session: finalized reply of {} chars from {} fragments",
            turn.content.len(),
            fragments
        );

        match failure {
            None => SendOutcome::Completed(turn),
            Some(message) => SendOutcome::Failed { turn, message },
        }
    }
}

/// Restores idle if an exchange is dropped before finalizing (cancelled future or panic).
struct ExchangeGuard<'a> {
    controller: &'a SessionController,
    armed: bool,
}

impl ExchangeGuard<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ExchangeGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.controller.force_idle();
        }
    }
}
