//! Event sender pipeline.
//!
//! Senders are decorators around one delivery step:
//!
//! ```text
//! PublishingEventSender ──▶ PersistingEventSender ──▶ SocketEventSender
//!   (bus, after local)        (hot store, after         (serialize once,
//!                              delivery)                 queue per socket)
//! ```
//!
//! Only the innermost step can fail the send, and only when the event
//! cannot be serialized at all. Per-socket, persistence and bus failures
//! are logged and absorbed.

use std::sync::Arc;

use async_trait::async_trait;

use crate::adapters::serialization::{EncodedEvent, JsonEventSerializer};
use crate::domain::participant::{Connection, QueueError};
use crate::domain::room_event::{Audience, RoomEvent, RoutingKey, StorageEvent};
use crate::ports::{BusMessage, EventBus, HotEventStore, ServerId};

/// An event on its way out, with its audience and cached wire text.
#[derive(Debug)]
pub struct OutgoingEvent {
    encoded: EncodedEvent,
    audience: Audience,
}

impl OutgoingEvent {
    pub fn new(event: RoomEvent, audience: Audience) -> Self {
        Self {
            encoded: EncodedEvent::new(event),
            audience,
        }
    }

    pub fn event(&self) -> &RoomEvent {
        self.encoded.event()
    }

    pub fn audience(&self) -> Audience {
        self.audience
    }

    pub fn encoded(&self) -> &EncodedEvent {
        &self.encoded
    }
}

/// Outcome of a send across its destinations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Errors that fail a send as a whole.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Event could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// One stage of the sender pipeline.
#[async_trait]
pub trait EventSender: Send + Sync {
    /// Deliver to the given local connections.
    async fn send(
        &self,
        outgoing: &OutgoingEvent,
        destinations: &[Arc<Connection>],
    ) -> Result<DeliveryReport, SendError>;
}

/// Writes the event to each destination socket's outbound queue.
#[derive(Debug, Default)]
pub struct SocketEventSender {
    serializer: JsonEventSerializer,
}

impl SocketEventSender {
    pub fn new(serializer: JsonEventSerializer) -> Self {
        Self { serializer }
    }
}

#[async_trait]
impl EventSender for SocketEventSender {
    async fn send(
        &self,
        outgoing: &OutgoingEvent,
        destinations: &[Arc<Connection>],
    ) -> Result<DeliveryReport, SendError> {
        let mut report = DeliveryReport::default();
        if destinations.is_empty() {
            return Ok(report);
        }

        let text = outgoing.encoded().text(&self.serializer)?;
        for connection in destinations {
            match connection.try_send_text(Arc::clone(&text)) {
                Ok(()) => report.delivered += 1,
                Err(QueueError::Full) => {
                    report.failed += 1;
                    tracing::warn!(
                        connection_id = %connection.id(),
                        event_id = %outgoing.event().id,
                        "Outbound queue full, dropping event"
                    );
                }
                Err(QueueError::Closed) => {
                    report.failed += 1;
                    tracing::debug!(
                        connection_id = %connection.id(),
                        event_id = %outgoing.event().id,
                        "Connection closed before delivery"
                    );
                }
            }
        }
        Ok(report)
    }
}

/// Appends each event to the hot store after the inner sender ran.
pub struct PersistingEventSender {
    inner: Arc<dyn EventSender>,
    hot_store: Arc<dyn HotEventStore>,
}

impl PersistingEventSender {
    pub fn new(inner: Arc<dyn EventSender>, hot_store: Arc<dyn HotEventStore>) -> Self {
        Self { inner, hot_store }
    }
}

#[async_trait]
impl EventSender for PersistingEventSender {
    async fn send(
        &self,
        outgoing: &OutgoingEvent,
        destinations: &[Arc<Connection>],
    ) -> Result<DeliveryReport, SendError> {
        let report = self.inner.send(outgoing, destinations).await?;

        let event = outgoing.event();
        if let Err(e) = self.hot_store.add(StorageEvent::from(event)).await {
            tracing::error!(
                room_id = %event.room_id,
                event_id = %event.id,
                event_type = %event.event_type,
                store = self.hot_store.name(),
                error = %e,
                "Failed to persist event"
            );
        }
        Ok(report)
    }
}

/// Publishes each event to the bus after the inner sender ran.
///
/// Remote processes deliver it to their own local sockets; this process
/// ignores its own publications.
pub struct PublishingEventSender {
    inner: Arc<dyn EventSender>,
    bus: Arc<dyn EventBus>,
    origin: ServerId,
}

impl PublishingEventSender {
    pub fn new(inner: Arc<dyn EventSender>, bus: Arc<dyn EventBus>, origin: ServerId) -> Self {
        Self { inner, bus, origin }
    }
}

#[async_trait]
impl EventSender for PublishingEventSender {
    async fn send(
        &self,
        outgoing: &OutgoingEvent,
        destinations: &[Arc<Connection>],
    ) -> Result<DeliveryReport, SendError> {
        let report = self.inner.send(outgoing, destinations).await?;

        let event = outgoing.event();
        let key = RoutingKey::for_event(&event.room_id, &event.event_type);
        let message = BusMessage {
            origin: self.origin.clone(),
            audience: outgoing.audience(),
            event: event.clone(),
        };
        if let Err(e) = self.bus.publish(&key, message).await {
            tracing::warn!(
                routing_key = %key,
                event_id = %event.id,
                bus = self.bus.name(),
                error = %e,
                "Bus publish failed, delivered locally only"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::bus::InMemoryEventBus;
    use crate::adapters::hot_store::InMemoryHotEventStore;
    use crate::domain::foundation::{EventId, ParticipantId, RoomId, UserId};
    use crate::domain::participant::{OutboundFrame, ParticipantType};
    use crate::ports::{
        BusCallback, BusError, EventFilter, HotStoreError, ScanOrder, ScanPage, Subscription,
    };
    use tokio::sync::mpsc;

    fn connection(
        room: RoomId,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<OutboundFrame>) {
        Connection::open(
            ParticipantId::new(),
            UserId::new(),
            room,
            ParticipantType::Viewer,
            capacity,
        )
    }

    fn outgoing(room: RoomId) -> OutgoingEvent {
        OutgoingEvent::new(RoomEvent::builder(room, "reaction").build(), Audience::Room)
    }

    struct FailingStore;

    #[async_trait]
    impl HotEventStore for FailingStore {
        async fn add(&self, _event: StorageEvent) -> Result<(), HotStoreError> {
            Err(HotStoreError::Unavailable("down".into()))
        }
        async fn fetch_page(
            &self,
            _filter: &EventFilter,
            _order: ScanOrder,
            _offset: usize,
            _limit: usize,
        ) -> Result<ScanPage, HotStoreError> {
            Err(HotStoreError::Unavailable("down".into()))
        }
        async fn delete(&self, _ids: &[EventId]) -> Result<u64, HotStoreError> {
            Err(HotStoreError::Unavailable("down".into()))
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    struct FailingBus;

    #[async_trait]
    impl EventBus for FailingBus {
        async fn publish(&self, _key: &RoutingKey, _message: BusMessage) -> Result<(), BusError> {
            Err(BusError::Unavailable("down".into()))
        }
        async fn subscribe(
            &self,
            key: &RoutingKey,
            _callback: Arc<dyn BusCallback>,
        ) -> Result<Subscription, BusError> {
            Ok(Subscription::inert(key.clone()))
        }
        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[tokio::test]
    async fn socket_sender_shares_one_serialization() {
        let room = RoomId::new();
        let (a, mut rx_a) = connection(room, 4);
        let (b, mut rx_b) = connection(room, 4);
        let sender = SocketEventSender::default();
        let event = outgoing(room);

        let report = sender.send(&event, &[a, b]).await.unwrap();
        assert_eq!(report.delivered, 2);

        let (Some(OutboundFrame::Text(first)), Some(OutboundFrame::Text(second))) =
            (rx_a.recv().await, rx_b.recv().await)
        else {
            panic!("expected text frames");
        };
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn one_full_socket_does_not_block_others() {
        let room = RoomId::new();
        let (slow, _rx_slow) = connection(room, 1);
        let (fast, mut rx_fast) = connection(room, 4);
        slow.try_send_text(Arc::from("backlog")).unwrap();

        let report = SocketEventSender::default()
            .send(&outgoing(room), &[slow, fast])
            .await
            .unwrap();

        assert_eq!(report, DeliveryReport { delivered: 1, failed: 1 });
        assert!(rx_fast.recv().await.is_some());
    }

    #[tokio::test]
    async fn persisting_sender_stores_once_even_without_destinations() {
        let store = Arc::new(InMemoryHotEventStore::new());
        let sender =
            PersistingEventSender::new(Arc::new(SocketEventSender::default()), store.clone());
        let event = outgoing(RoomId::new());

        sender.send(&event, &[]).await.unwrap();
        assert!(store.contains(&event.event().id));
        assert!(!event.encoded().is_encoded());
    }

    #[tokio::test]
    async fn persistence_failure_does_not_fail_delivery() {
        let room = RoomId::new();
        let (a, mut rx) = connection(room, 4);
        let sender = PersistingEventSender::new(
            Arc::new(SocketEventSender::default()),
            Arc::new(FailingStore),
        );

        let report = sender.send(&outgoing(room), &[a]).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn publishing_sender_publishes_with_origin_and_audience() {
        let bus = InMemoryEventBus::new();
        let sender = PublishingEventSender::new(
            Arc::new(SocketEventSender::default()),
            Arc::new(bus.clone()),
            ServerId::new("node-a"),
        );
        let room = RoomId::new();
        let event = outgoing(room);

        sender.send(&event, &[]).await.unwrap();

        let published = bus.published();
        assert_eq!(published.len(), 1);
        let (key, message) = &published[0];
        assert_eq!(key, &RoutingKey::for_event(&room, "reaction"));
        assert_eq!(message.origin, ServerId::new("node-a"));
        assert_eq!(message.event.id, event.event().id);
    }

    #[tokio::test]
    async fn bus_failure_degrades_to_local_delivery() {
        let room = RoomId::new();
        let (a, mut rx) = connection(room, 4);
        let sender = PublishingEventSender::new(
            Arc::new(SocketEventSender::default()),
            Arc::new(FailingBus),
            ServerId::new("node-a"),
        );

        let report = sender.send(&outgoing(room), &[a]).await.unwrap();
        assert_eq!(report.delivered, 1);
        assert!(rx.recv().await.is_some());
    }
}
