//! In-process event bus over tokio broadcast channels.
//!
//! Reference implementation of the `EventBus` port, used by the binary and
//! the tests. A broker-backed implementation would sit behind the same
//! trait.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, warn};

use crate::domain::{BusMessage, CoreResult, EventBus};

const TOPIC_CAPACITY: usize = 1024;
const SUBSCRIBER_BUFFER: usize = 256;

pub struct BroadcastBus {
    topics: DashMap<String, broadcast::Sender<BusMessage>>,
}

impl BroadcastBus {
    pub fn new() -> Self {
        Self {
            topics: DashMap::new(),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<BusMessage> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }

    /// Infallible subscription used inside the process.
    pub async fn subscribe_messages(&self, topic: &str) -> mpsc::Receiver<BusMessage> {
        let mut source = self.sender(topic).subscribe();
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);

        tokio::spawn(async move {
            loop {
                match source.recv().await {
                    Ok(message) => {
                        if tx.send(message).await.is_err() {
                            break; // subscriber gone
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(missed, "Bus subscriber lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        rx
    }
}

impl Default for BroadcastBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for BroadcastBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> CoreResult<()> {
        let message = BusMessage {
            topic: topic.to_string(),
            payload,
        };
        match self.sender(topic).send(message) {
            Ok(subscribers) => {
                debug!(topic, subscribers, "Bus message delivered");
            }
            Err(_) => {
                debug!(topic, "Bus message published with no subscribers");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> CoreResult<mpsc::Receiver<BusMessage>> {
        Ok(self.subscribe_messages(topic).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_their_topic_only() {
        let bus = BroadcastBus::shared();
        let mut a = bus.subscribe_messages("topic.a").await;
        let mut b = bus.subscribe_messages("topic.b").await;

        bus.publish("topic.a", b"one".to_vec()).await.unwrap();
        bus.publish("topic.b", b"two".to_vec()).await.unwrap();

        assert_eq!(a.recv().await.unwrap().payload, b"one");
        assert_eq!(b.recv().await.unwrap().payload, b"two");
    }

    #[tokio::test]
    async fn publish_without_subscribers_succeeds() {
        let bus = BroadcastBus::new();
        bus.publish("nobody.listens", b"x".to_vec()).await.unwrap();
    }
}
