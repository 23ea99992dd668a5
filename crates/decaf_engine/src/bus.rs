use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex, PoisonError};

use crate::{BusMessage, ProgressEvent, ProgressSink, StatusEvent};

/// Publish/subscribe channel keyed by target key.
///
/// Messages for one key reach every subscriber in publication order.
/// Subscribers that dropped their receiver are pruned on the next publish.
#[derive(Clone, Default)]
pub struct StatusBus {
    subscribers: Arc<Mutex<HashMap<String, Vec<mpsc::Sender<BusMessage>>>>>,
}

impl StatusBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, target_key: &str) -> mpsc::Receiver<BusMessage> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(target_key.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub fn publish(&self, target_key: &str, message: BusMessage) {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(senders) = subscribers.get_mut(target_key) {
            senders.retain(|tx| tx.send(message.clone()).is_ok());
            if senders.is_empty() {
                subscribers.remove(target_key);
            }
        }
    }

    pub fn subscriber_count(&self, target_key: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(target_key)
            .map_or(0, Vec::len)
    }
}

/// Publishes a job's progress events as [`BusMessage::Status`].
pub struct BusSink {
    bus: StatusBus,
    target_key: String,
}

impl BusSink {
    pub fn new(bus: StatusBus, target_key: impl Into<String>) -> Self {
        Self {
            bus,
            target_key: target_key.into(),
        }
    }
}

impl ProgressSink for BusSink {
    fn emit(&self, event: ProgressEvent) {
        let status = StatusEvent::from_progress(&self.target_key, event);
        self.bus.publish(&self.target_key, BusMessage::Status(status));
    }
}
