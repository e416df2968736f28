//! Channel registry: listeners per channel name, emit to all of them in order.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;

use super::Subscription;

#[derive(Debug, thiserror::Error)]
pub enum SubscribeError {
    #[error("event hub is shut down; cannot listen on {0}")]
    Closed(String),
    #[error("subscribe to {channel} failed: {reason}")]
    Rejected { channel: String, reason: String },
}

/// Anything a session can listen on. Registration may be asynchronous (e.g. a remote bus
/// acknowledging the listener), so `listen` is async.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn listen(&self, channel: &str) -> Result<Subscription, SubscribeError>;
}

struct Listener {
    id: u64,
    tx: mpsc::UnboundedSender<String>,
}

#[derive(Default)]
struct HubState {
    next_id: u64,
    shut_down: bool,
    listeners: HashMap<String, Vec<Listener>>,
}

/// In-process event hub. Cheap to clone; clones share listeners.
#[derive(Clone, Default)]
pub struct EventHub {
    inner: Arc<Mutex<HubState>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, HubState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `payload` to every listener on `channel`. Returns how many received it.
    pub fn emit(&self, channel: &str, payload: &str) -> usize {
        let mut g = self.state();
        let Some(listeners) = g.listeners.get_mut(channel) else {
            return 0;
        };
        listeners.retain(|l| l.tx.send(payload.to_string()).is_ok());
        listeners.len()
    }

    /// Handle bound to one channel, given to whoever produces its events.
    pub fn emitter(&self, channel: impl Into<String>) -> Emitter {
        Emitter {
            hub: self.clone(),
            channel: channel.into(),
        }
    }

    pub fn listener_count(&self, channel: &str) -> usize {
        self.state().listeners.get(channel).map_or(0, Vec::len)
    }

    /// Refuse new listeners and drop existing ones (their subscriptions see end of stream).
    pub fn shutdown(&self) {
        let mut g = self.state();
        g.shut_down = true;
        g.listeners.clear();
    }

    fn register(&self, channel: &str) -> Result<Subscription, SubscribeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut g = self.state();
            if g.shut_down {
                return Err(SubscribeError::Closed(channel.to_string()));
            }
            let id = g.next_id;
            g.next_id += 1;
            g.listeners
                .entry(channel.to_string())
                .or_default()
                .push(Listener { id, tx });
            id
        };
        log::debug!("channel {}: listener {} registered", channel, id);
        let hub = self.clone();
        let name = channel.to_string();
        Ok(Subscription::new(channel, rx, move || {
            let mut g = hub.state();
            if let Some(listeners) = g.listeners.get_mut(&name) {
                listeners.retain(|l| l.id != id);
                if listeners.is_empty() {
                    g.listeners.remove(&name);
                }
            }
        }))
    }
}

#[async_trait]
impl EventSource for EventHub {
    async fn listen(&self, channel: &str) -> Result<Subscription, SubscribeError> {
        self.register(channel)
    }
}

/// Publishes on a single channel of a hub.
#[derive(Clone)]
pub struct Emitter {
    hub: EventHub,
    channel: String,
}

impl Emitter {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn emit(&self, payload: &str) -> usize {
        self.hub.emit(&self.channel, payload)
    }
}
