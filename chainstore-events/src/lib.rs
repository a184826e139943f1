//! chainstore events - Domain Event Channel
//!
//! Fire-and-forget market events raised while the cache ingests objects.
//! Consumers (market views, order books) subscribe to an [`EventBus`]; the
//! cache never waits for them and never learns whether anyone listened.

use chainstore_core::{ObjectId, Snapshot};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

/// Event raised by the cache for downstream market consumers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum DomainEvent {
    /// A limit order was removed from the chain.
    CancelOrder(ObjectId),
    /// A call order was removed from the chain.
    CloseCall(ObjectId),
    /// A force-settlement order changed. Settlement orders carry no id, so
    /// the raw object is forwarded.
    SettleOrderUpdate(Value),
    BitassetUpdate(Snapshot),
    CallOrderUpdate(Snapshot),
}

impl DomainEvent {
    /// The wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CancelOrder(_) => "cancel-order",
            Self::CloseCall(_) => "close-call",
            Self::SettleOrderUpdate(_) => "settle-order-update",
            Self::BitassetUpdate(_) => "bitasset-update",
            Self::CallOrderUpdate(_) => "call-order-update",
        }
    }
}

/// Broadcast channel for [`DomainEvent`]s.
///
/// Slow subscribers lag and miss events rather than applying back-pressure
/// to the cache.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<DomainEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event, dropping it if nobody is subscribed.
    pub fn publish(&self, event: DomainEvent) {
        let event_name = event.name();
        match self.tx.send(event) {
            Ok(receivers) => {
                debug!(event = event_name, receivers, "Published domain event");
            }
            Err(_) => {
                debug!(event = event_name, "No receivers for domain event");
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn oid(s: &str) -> ObjectId {
        s.parse().unwrap()
    }

    #[test]
    fn test_event_names() {
        assert_eq!(DomainEvent::CancelOrder(oid("1.7.1")).name(), "cancel-order");
        assert_eq!(DomainEvent::CloseCall(oid("1.8.1")).name(), "close-call");
        assert_eq!(
            DomainEvent::SettleOrderUpdate(json!({})).name(),
            "settle-order-update"
        );
        assert_eq!(
            DomainEvent::BitassetUpdate(Snapshot::default()).name(),
            "bitasset-update"
        );
        assert_eq!(
            DomainEvent::CallOrderUpdate(Snapshot::default()).name(),
            "call-order-update"
        );
    }

    #[test]
    fn test_serialized_shape_uses_event_name() {
        let value = serde_json::to_value(DomainEvent::CancelOrder(oid("1.7.12"))).unwrap();
        assert_eq!(value, json!({"event": "cancel-order", "payload": "1.7.12"}));
    }

    #[test]
    fn test_publish_without_receivers() {
        let bus = EventBus::new(8);
        bus.publish(DomainEvent::CloseCall(oid("1.8.3")));
        assert_eq!(bus.receiver_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_with_receiver() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let event = DomainEvent::CancelOrder(oid("1.7.12"));
        bus.publish(event.clone());
        assert_eq!(rx.recv().await.unwrap(), event);
    }
}
