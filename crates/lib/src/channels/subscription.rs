//! Scoped listener on one named channel; released exactly once.

use tokio::sync::mpsc;

type Release = Box<dyn FnOnce() + Send>;

/// A live registration on a channel. Dropping it closes it.
pub struct Subscription {
    channel: String,
    rx: mpsc::UnboundedReceiver<String>,
    release: Option<Release>,
}

impl Subscription {
    /// Wrap a receiver; `release` unregisters the sender side and runs at most once.
    pub fn new(
        channel: impl Into<String>,
        rx: mpsc::UnboundedReceiver<String>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            channel: channel.into(),
            rx,
            release: Some(Box::new(release)),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Wait for the next fragment. None once the channel is closed and drained.
    pub async fn next_fragment(&mut self) -> Option<String> {
        self.rx.recv().await
    }

    /// Take an already-delivered fragment without waiting.
    pub fn try_next_fragment(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }

    pub fn is_closed(&self) -> bool {
        self.release.is_none()
    }

    /// Unregister from the channel. Closing twice is a no-op.
    pub fn close(&mut self) {
        if let Some(release) = self.release.take() {
            release();
            self.rx.close();
            log::debug!("channel {}: subscription closed", self.channel);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("channel", &self.channel)
            .field("closed", &self.is_closed())
            .finish()
    }
}
