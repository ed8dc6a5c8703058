//! Domain event publication.
//!
//! Best-effort: a failed publish is logged and counted, never surfaced to
//! the caller. Each event carries a monotonic per-charge-point sequence so
//! consumers can detect gaps.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::domain::{DomainEvent, EventBus, EventEnvelope};

/// Sequence key for events not tied to a charge point.
const GLOBAL_SEQUENCE_KEY: &str = "_global";

pub struct EventPublisher {
    bus: Arc<dyn EventBus>,
    sequences: DashMap<String, u64>,
}

pub type SharedEventPublisher = Arc<EventPublisher>;

impl EventPublisher {
    pub fn new(bus: Arc<dyn EventBus>) -> SharedEventPublisher {
        Arc::new(Self {
            bus,
            sequences: DashMap::new(),
        })
    }

    /// Publish a domain event on its topic.
    pub async fn publish(&self, event: DomainEvent) {
        let topic = event.topic();
        let charge_point_id = event.charge_point_id().map(String::from);

        let sequence = self.next_sequence(charge_point_id.as_deref());
        let envelope = EventEnvelope {
            sequence,
            charge_point_id: charge_point_id.clone(),
            published_at: Utc::now(),
            event,
        };

        let payload = match serde_json::to_vec(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(topic, error = %e, "Failed to serialize event");
                metrics::counter!("ocpp_event_publish_failures_total", "topic" => topic)
                    .increment(1);
                return;
            }
        };

        match self.bus.publish(topic, payload).await {
            Ok(()) => {
                metrics::counter!("ocpp_events_published_total", "topic" => topic).increment(1);
                debug!(topic, ?charge_point_id, sequence, "Event published");
            }
            Err(e) => {
                metrics::counter!("ocpp_event_publish_failures_total", "topic" => topic)
                    .increment(1);
                warn!(topic, ?charge_point_id, error = %e, "Event publish failed");
            }
        }
    }

    fn next_sequence(&self, charge_point_id: Option<&str>) -> u64 {
        let key = charge_point_id.unwrap_or(GLOBAL_SEQUENCE_KEY);
        let mut entry = self.sequences.entry(key.to_string()).or_insert(0);
        *entry += 1;
        *entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bus::BroadcastBus;

    #[tokio::test]
    async fn sequences_are_monotonic_per_charge_point() {
        let bus = BroadcastBus::shared();
        let mut rx = bus
            .subscribe_messages(crate::domain::events::topics::NOTIFICATIONS_EVENTS)
            .await;
        let publisher = EventPublisher::new(bus);

        for _ in 0..3 {
            publisher
                .publish(DomainEvent::ChargePointConnected {
                    charge_point_id: "CP001".into(),
                    remote_addr: None,
                    timestamp: Utc::now(),
                })
                .await;
        }
        publisher
            .publish(DomainEvent::ChargePointConnected {
                charge_point_id: "CP002".into(),
                remote_addr: None,
                timestamp: Utc::now(),
            })
            .await;

        let mut cp1_seqs = Vec::new();
        let mut cp2_seqs = Vec::new();
        for _ in 0..4 {
            let msg = rx.recv().await.unwrap();
            let envelope: EventEnvelope = serde_json::from_slice(&msg.payload).unwrap();
            match envelope.charge_point_id.as_deref() {
                Some("CP001") => cp1_seqs.push(envelope.sequence),
                Some("CP002") => cp2_seqs.push(envelope.sequence),
                other => panic!("unexpected charge point {other:?}"),
            }
        }
        assert_eq!(cp1_seqs, vec![1, 2, 3]);
        assert_eq!(cp2_seqs, vec![1]);
    }
}
