//! Event fan-out to any number of subscribers.

use ifconnect_types::ClientEvent;
use tokio::sync::broadcast;
use tracing::{trace, warn};

/// Events buffered per subscriber before it starts lagging
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Broadcast bus for [`ClientEvent`]s. Cloning shares the same channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClientEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish to all current subscribers. Having none is fine.
    pub fn publish(&self, event: ClientEvent) {
        if self.tx.send(event).is_err() {
            trace!("Event published with no subscribers");
        }
    }

    #[must_use]
    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// One subscriber's view of the bus.
#[derive(Debug)]
pub struct EventSubscription {
    rx: broadcast::Receiver<ClientEvent>,
}

impl EventSubscription {
    /// Next event, or `None` once every bus handle is gone.
    ///
    /// A subscriber that falls more than [`EVENT_CHANNEL_CAPACITY`] events
    /// behind loses the oldest ones and keeps going.
    pub async fn recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged behind; dropping events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<ClientEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event subscriber lagged behind; dropping events");
                }
                Err(_) => return None,
            }
        }
    }
}
