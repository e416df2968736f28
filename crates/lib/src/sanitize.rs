//! Output sanitizer: strip model-invented continuations of the conversation.
//!
//! Raw-completion models sometimes keep going past their own reply and start writing the
//! next user turn. The reply is cut at the first such marker.

/// Substrings that mark the start of a fabricated user turn.
const FAKE_TURN_MARKERS: [&str; 3] = ["\nUser:", "\n<|user|>", "\n\nUser:"];

/// Truncate `raw` at the earliest fake-turn marker and trim trailing whitespace.
///
/// Text without any marker is returned whole (minus trailing whitespace).
pub fn strip_fake_turns(raw: &str) -> String {
    let cut = FAKE_TURN_MARKERS
        .iter()
        .filter_map(|m| raw.find(m))
        .min()
        .unwrap_or(raw.len());
    raw[..cut].trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn truncates_at_user_marker() {
        assert_eq!(strip_fake_turns("Hello there\nUser: what now"), "Hello there");
    }

    #[test]
    fn plain_reply_only_loses_trailing_whitespace() {
        assert_eq!(
            strip_fake_turns("Just a plain reply.  "),
            "Just a plain reply."
        );
    }

    #[test]
    fn earliest_marker_wins() {
        let raw = "Sure.\n<|user|>\nhi</s>\nUser: again";
        assert_eq!(strip_fake_turns(raw), "Sure.");
    }

    #[test]
    fn double_newline_marker_is_cut_before_blank_line() {
        assert_eq!(strip_fake_turns("Answer.\n\nUser: more?"), "Answer.");
    }

    #[test]
    fn marker_at_start_yields_empty() {
        assert_eq!(strip_fake_turns("\nUser: hi"), "");
    }

    #[test]
    fn leading_whitespace_is_kept() {
        assert_eq!(strip_fake_turns("  indented\n"), "  indented");
    }

    #[test]
    fn idempotent() {
        let samples = [
            "Hello there\nUser: what now",
            "Just a plain reply.  ",
            "a\n\nUser:\nUser: b",
            "",
            "   ",
            "multi\nline\n<|user|> tail",
            "no marker User: inline",
        ];
        for s in samples {
            let once = strip_fake_turns(s);
            assert_eq!(strip_fake_turns(&once), once, "input: {:?}", s);
        }
    }

    /// Replies assembled from marker pieces, whitespace, and plain words.
    fn arb_reply() -> impl Strategy<Value = String> {
        let piece = prop_oneof![
            Just("\n"),
            Just("\n\n"),
            Just("User:"),
            Just("<|user|>"),
            Just(" "),
            Just("\t"),
            Just("a"),
            Just("reply"),
        ];
        proptest::collection::vec(piece, 0..16).prop_map(|parts| parts.concat())
    }

    proptest! {
        #[test]
        fn prop_strip_is_idempotent(raw in arb_reply()) {
            let once = strip_fake_turns(&raw);
            prop_assert_eq!(strip_fake_turns(&once), once);
        }

        #[test]
        fn prop_strip_returns_a_prefix(raw in arb_reply()) {
            let out = strip_fake_turns(&raw);
            prop_assert!(raw.starts_with(&out), "{:?} is not a prefix of {:?}", out, raw);
        }

        #[test]
        fn prop_strip_leaves_no_marker(raw in arb_reply()) {
            let out = strip_fake_turns(&raw);
            for marker in FAKE_TURN_MARKERS {
                prop_assert!(!out.contains(marker), "{:?} still contains {:?}", out, marker);
            }
        }

        #[test]
        fn prop_strip_is_idempotent_on_any_text(raw in "\\PC*") {
            let once = strip_fake_turns(&raw);
            prop_assert_eq!(strip_fake_turns(&once), once);
        }
    }
}
