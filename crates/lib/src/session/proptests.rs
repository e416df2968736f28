//! Property-based tests for the session state machine.
//!
//! Random event sequences, including ones the controller would never produce, must keep
//! these invariants.

use super::state::*;
use crate::conversation::{Role, Turn};
use proptest::prelude::*;

fn arb_input() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(String::new()),
        Just("   ".to_string()),
        "[a-z ]{1,12}",
    ]
}

fn arb_fragment() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z ]{0,8}",
        Just("\nUser: more".to_string()),
        Just("\n<|user|>".to_string()),
    ]
}

fn arb_event() -> impl Strategy<Value = SessionEvent> {
    prop_oneof![
        (arb_input(), any::<bool>())
            .prop_map(|(input, from_input)| SessionEvent::Submit { input, from_input }),
        Just(SessionEvent::SubscriptionOpened),
        "[a-z ]{0,10}".prop_map(|reason| SessionEvent::SubscriptionFailed { reason }),
        arb_fragment().prop_map(SessionEvent::Fragment),
        Just(SessionEvent::BackendFinished),
        "[a-z ]{1,10}".prop_map(|message| SessionEvent::BackendFailed { message }),
    ]
}

fn arb_context() -> impl Strategy<Value = TransitionContext> {
    any::<bool>().prop_map(|strip_fake_turns| TransitionContext { strip_fake_turns })
}

/// Turns alternate user, assistant, user, ... starting with a user turn.
fn roles_alternate(log: &[Turn]) -> bool {
    log.iter().enumerate().all(|(i, t)| {
        let expected = if i % 2 == 0 { Role::User } else { Role::Assistant };
        t.role == expected
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn prop_log_only_grows_and_alternates(
        ctx in arb_context(),
        events in proptest::collection::vec(arb_event(), 0..40),
    ) {
        let mut state = ControllerState::Idle;
        let mut log: Vec<Turn> = Vec::new();

        for event in events {
            let (next, out) = transition(state, &ctx, event);
            state = next;
            let Ok(effects) = out else { continue };
            let before = log.clone();
            for effect in effects {
                if let Effect::AppendTurn(turn) = effect {
                    log.push(turn);
                }
            }
            prop_assert!(log.len() <= before.len() + 1, "more than one turn per event");
            prop_assert_eq!(&log[..before.len()], &before[..]);
            prop_assert!(roles_alternate(&log), "roles out of order: {:?}", log);
            if !state.is_sending() {
                prop_assert_eq!(log.len() % 2, 0, "idle with an unanswered user turn");
            }
        }
    }

    #[test]
    fn prop_at_most_one_session(
        ctx in arb_context(),
        events in proptest::collection::vec(arb_event(), 0..40),
    ) {
        let mut state = ControllerState::Idle;

        for event in events {
            let was = state.clone();
            let is_submit = matches!(event, SessionEvent::Submit { .. });
            let (next, out) = transition(state, &ctx, event);

            match &out {
                Ok(_) if is_submit => {
                    prop_assert_eq!(&was, &ControllerState::Idle, "second session started");
                    prop_assert!(next.is_sending());
                }
                Ok(_) => {}
                Err(e) => {
                    prop_assert_eq!(&next, &was, "rejected event changed the state");
                    if is_submit && was.is_sending() {
                        prop_assert_eq!(e, &TransitionError::Rejected(Rejection::Busy));
                    }
                }
            }
            if let (Some(before), Some(after)) = (was.session(), next.session()) {
                prop_assert_eq!(before.prompt(), after.prompt(), "session replaced mid-flight");
            }
            state = next;
        }
    }

    #[test]
    fn prop_request_only_after_subscription_opened(
        ctx in arb_context(),
        events in proptest::collection::vec(arb_event(), 0..40),
    ) {
        let mut state = ControllerState::Idle;
        let mut issued_this_session = 0usize;

        for event in events {
            let opened = matches!(event, SessionEvent::SubscriptionOpened);
            let was_subscribed = state.session().is_some_and(|s| s.is_subscribed());
            let (next, out) = transition(state, &ctx, event);
            if let Ok(effects) = &out {
                let requests = effects
                    .iter()
                    .filter(|e| matches!(e, Effect::IssueRequest { .. }))
                    .count();
                if requests > 0 {
                    prop_assert!(opened, "request issued on another event");
                    prop_assert!(!was_subscribed, "request issued twice in one session");
                }
                issued_this_session += requests;
                prop_assert!(issued_this_session <= 1);
            }
            if !next.is_sending() {
                issued_this_session = 0;
            }
            state = next;
        }
    }

    #[test]
    fn prop_idle_rejects_stream_events(
        ctx in arb_context(),
        event in arb_event().prop_filter("not a submit", |e| !matches!(e, SessionEvent::Submit { .. })),
    ) {
        let (next, out) = transition(ControllerState::Idle, &ctx, event);
        let is_invalid = matches!(out, Err(TransitionError::Invalid { state: "idle", .. }));
        prop_assert!(is_invalid);
        prop_assert_eq!(next, ControllerState::Idle);
    }

    #[test]
    fn prop_finalize_closes_subscription_once(
        ctx in arb_context(),
        fragments in proptest::collection::vec(arb_fragment(), 0..8),
        fail in proptest::option::of("[a-z]{1,8}"),
    ) {
        let submit = SessionEvent::Submit { input: "hi".to_string(), from_input: true };
        let (state, out) = transition(ControllerState::Idle, &ctx, submit);
        prop_assert!(out.is_ok());
        let (mut state, out) = transition(state, &ctx, SessionEvent::SubscriptionOpened);
        prop_assert!(out.is_ok());
        for f in fragments {
            let (next, out) = transition(state, &ctx, SessionEvent::Fragment(f));
            prop_assert!(out.is_ok());
            state = next;
        }
        let end = match fail {
            Some(message) => SessionEvent::BackendFailed { message },
            None => SessionEvent::BackendFinished,
        };
        let (state, out) = transition(state, &ctx, end);
        let effects = out.unwrap();
        prop_assert_eq!(state, ControllerState::Idle);
        let closes = effects.iter().filter(|e| **e == Effect::CloseSubscription).count();
        prop_assert_eq!(closes, 1);
        prop_assert_eq!(effects.last(), Some(&Effect::ClearLive));
    }
}

