//! Chat-template prompt for raw-completion models (TinyLlama style), with optional date and
//! retrieved event context in the system block.

use std::path::Path;

use super::retrieval::retrieve_context;

const CONTEXT_EVENT_LIMIT: usize = 5;
const REPLY_ONLY: &str =
    "Only output the assistant reply. Do not generate any user message or \"User:\" line.";

/// Wrap `prompt` so the model only generates the assistant reply.
///
/// Event context is used only when `events_path` exists and parses; otherwise a warning is
/// logged and the prompt is built without it.
pub fn build_prompt(prompt: &str, events_path: Option<&str>, current_date: Option<&str>) -> String {
    let date_line = current_date
        .map(|d| format!("Today's date: {}.\n", d))
        .unwrap_or_default();

    if let Some(path) = events_path {
        let path = Path::new(path);
        if path.exists() {
            match retrieve_context(path, prompt, CONTEXT_EVENT_LIMIT) {
                Ok(context) => {
                    return format!(
                        "<|system|>\n{}Relevant events:\n{}\n{}</s>\n<|user|>\n{}</s>\n<|assistant|>\n",
                        date_line, context, REPLY_ONLY, prompt
                    );
                }
                Err(e) => log::warn!("prompt: event retrieval failed: {}; using raw prompt", e),
            }
        } else {
            log::warn!("prompt: events file not found: {}; using raw prompt", path.display());
        }
    }

    if date_line.is_empty() {
        format!("<|user|>\n{}</s>\n<|assistant|>\n", prompt)
    } else {
        format!(
            "<|system|>\n{}{}</s>\n<|user|>\n{}</s>\n<|assistant|>\n",
            date_line, REPLY_ONLY, prompt
        )
    }
}
