//! A local publish/subscribe message bus.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;

/// A message on the bus, shared between all subscribers of its topic.
pub type BusMessage = Arc<Value>;

/// Routes JSON messages between named topics.
///
/// Every subscriber of a topic receives every message published to the topic after it subscribed.
/// Messages published to a topic without subscribers are discarded. Subscribers that fall behind
/// by more than the configured capacity miss the oldest messages.
#[derive(Debug)]
pub struct MessageBus {
    capacity: usize,
    topics: RwLock<HashMap<String, broadcast::Sender<BusMessage>>>,
}

impl MessageBus {
    /// Creates a bus that buffers up to `capacity` messages per topic.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: RwLock::new(HashMap::new()),
        }
    }

    /// Subscribes to all future messages of `topic`.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<BusMessage> {
        if let Some(sender) = self.topics.read().get(topic) {
            return sender.subscribe();
        }

        self.topics
            .write()
            .entry(topic.to_owned())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Publishes a message and returns the number of subscribers that will receive it.
    pub fn publish(&self, topic: &str, message: Value) -> usize {
        let topics = self.topics.read();
        let Some(sender) = topics.get(topic) else {
            sluice_log::trace!(topic, "discarding message without subscribers");
            return 0;
        };

        sender.send(Arc::new(message)).unwrap_or(0)
    }

    /// Returns the topics that have been subscribed to, in lexical order.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<_> = self.topics.read().keys().cloned().collect();
        topics.sort_unstable();
        topics
    }
}
