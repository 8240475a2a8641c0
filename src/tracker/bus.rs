use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use super::session::TrackingState;

const BUS_CAPACITY: usize = 64;

/// Fire-and-forget messages to whoever listens.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outbound {
    TrackingUpdate(TrackingState),
    Notification { title: String, message: String },
}

/// Best-effort broadcast. Having no subscribers isn't an error, and slow subscribers lose the
/// oldest messages.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Outbound>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BUS_CAPACITY);
        Self { sender }
    }

    pub fn publish(&self, message: Outbound) {
        if self.sender.send(message).is_err() {
            trace!("No listeners for outbound message");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Outbound> {
        self.sender.subscribe()
    }
}
