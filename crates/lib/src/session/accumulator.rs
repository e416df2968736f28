//! Per-session text buffer and the live-display mirror.

use std::sync::Arc;
use tokio::sync::watch;

/// Grows by appending fragments in arrival order; emptied only by [`TokenAccumulator::take`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenAccumulator {
    text: String,
    fragments: usize,
}

impl TokenAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.fragments += 1;
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments
    }

    /// Move the text out, leaving the accumulator empty.
    pub fn take(&mut self) -> String {
        self.fragments = 0;
        std::mem::take(&mut self.text)
    }
}

/// What the display renders while a reply streams. Readers subscribe and get notified on
/// every change; only the session controller writes.
#[derive(Clone)]
pub struct LiveBuffer {
    tx: Arc<watch::Sender<String>>,
}

impl Default for LiveBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LiveBuffer {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(String::new());
        Self { tx: Arc::new(tx) }
    }

    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> String {
        self.tx.borrow().clone()
    }

    pub(crate) fn append(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.tx.send_modify(|s| s.push_str(text));
    }

    pub(crate) fn clear(&self) {
        self.tx.send_if_modified(|s| {
            if s.is_empty() {
                false
            } else {
                s.clear();
                true
            }
        });
    }
}
