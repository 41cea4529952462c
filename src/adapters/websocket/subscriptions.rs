//! Per-room bus subscription lifecycle.
//!
//! A process holds one subscription per `(room, topic)` key while it has at
//! least one local connection in the room. The first connection subscribes
//! every topic; the last one to leave disposes them.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::domain::foundation::{ConnectionId, DomainError, ErrorCode, RoomId};
use crate::domain::participant::ConnectionDetail;
use crate::domain::room_event::{RoutingKey, Topic};
use crate::ports::{BusCallback, ConnectionListener, EventBus, Subscription};

#[derive(Default)]
struct RoomSubscriptions {
    connections: HashSet<ConnectionId>,
    subscriptions: Vec<(Topic, Subscription)>,
    /// Set once the room was removed from the map; joiners must re-fetch.
    retired: bool,
}

impl RoomSubscriptions {
    fn subscribed(&self, topic: Topic) -> bool {
        self.subscriptions.iter().any(|(held, _)| *held == topic)
    }
}

type RoomEntry = Arc<tokio::sync::Mutex<RoomSubscriptions>>;

/// Connection listener that owns this process's bus subscriptions.
pub struct BusSubscriptionListener {
    bus: Arc<dyn EventBus>,
    callback: Arc<dyn BusCallback>,
    rooms: Mutex<HashMap<RoomId, RoomEntry>>,
}

impl BusSubscriptionListener {
    pub fn new(bus: Arc<dyn EventBus>, callback: Arc<dyn BusCallback>) -> Self {
        Self {
            bus,
            callback,
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Rooms this process currently holds subscriptions for.
    pub fn subscribed_rooms(&self) -> usize {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn entry(&self, room_id: RoomId) -> RoomEntry {
        self.rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(room_id)
            .or_default()
            .clone()
    }

    /// Subscribes every topic not yet held. Returns the first failure.
    async fn ensure_subscribed(
        &self,
        room_id: &RoomId,
        state: &mut RoomSubscriptions,
    ) -> Result<(), DomainError> {
        let mut failure = None;
        for topic in Topic::ALL {
            if state.subscribed(topic) {
                continue;
            }
            let key = RoutingKey::new(room_id, topic);
            match self.bus.subscribe(&key, Arc::clone(&self.callback)).await {
                Ok(subscription) => {
                    tracing::debug!(routing_key = %key, bus = self.bus.name(), "Subscribed");
                    state.subscriptions.push((topic, subscription));
                }
                Err(e) => {
                    tracing::warn!(
                        routing_key = %key,
                        bus = self.bus.name(),
                        error = %e,
                        "Bus subscribe failed, room is local-only until next join"
                    );
                    failure.get_or_insert(
                        DomainError::new(ErrorCode::BusError, e.to_string())
                            .with_detail("routing_key", key.to_string()),
                    );
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

#[async_trait]
impl ConnectionListener for BusSubscriptionListener {
    async fn on_connect(&self, detail: &ConnectionDetail) -> Result<(), DomainError> {
        let connection = &detail.connection;
        let room_id = connection.room_id();

        loop {
            let entry = self.entry(room_id);
            let mut state = entry.lock().await;
            if state.retired {
                continue;
            }
            state.connections.insert(connection.id());
            return self.ensure_subscribed(&room_id, &mut state).await;
        }
    }

    async fn on_disconnect(&self, detail: &ConnectionDetail) -> Result<(), DomainError> {
        let connection = &detail.connection;
        let room_id = connection.room_id();

        let Some(entry) = self
            .rooms
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&room_id)
            .cloned()
        else {
            return Ok(());
        };

        let released = {
            let mut state = entry.lock().await;
            if !state.connections.remove(&connection.id()) || !state.connections.is_empty() {
                return Ok(());
            }
            state.retired = true;
            self.rooms
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&room_id);
            std::mem::take(&mut state.subscriptions)
        };

        tracing::debug!(
            room_id = %room_id,
            subscriptions = released.len(),
            "Last local connection left, releasing bus subscriptions"
        );
        for (_, subscription) in released {
            subscription.dispose();
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "BusSubscriptionListener"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::bus::InMemoryEventBus;
    use crate::domain::foundation::{ParticipantId, UserId};
    use crate::domain::participant::{Connection, ParticipantType};
    use crate::ports::BusNotification;

    struct Ignore;

    #[async_trait]
    impl BusCallback for Ignore {
        async fn on_notification(&self, _key: &RoutingKey, _notification: BusNotification) {}

        fn name(&self) -> &'static str {
            "Ignore"
        }
    }

    fn detail(room: RoomId) -> ConnectionDetail {
        let (connection, _rx) =
            Connection::open(ParticipantId::new(), UserId::new(), room, ParticipantType::Viewer, 1);
        ConnectionDetail::new(connection)
    }

    #[tokio::test]
    async fn one_subscription_per_key_while_room_has_connections() {
        let bus = InMemoryEventBus::new();
        let listener = BusSubscriptionListener::new(Arc::new(bus.clone()), Arc::new(Ignore));
        let room = RoomId::new();
        let key = RoutingKey::new(&room, Topic::RoomEvents);
        let first = detail(room);
        let second = detail(room);

        listener.on_connect(&first).await.unwrap();
        listener.on_connect(&second).await.unwrap();
        assert_eq!(bus.subscriber_count(&key), 1);
        assert_eq!(bus.subscriber_count(&RoutingKey::new(&room, Topic::VideoChat)), 1);

        listener.on_disconnect(&first).await.unwrap();
        assert_eq!(bus.subscriber_count(&key), 1);

        listener.on_disconnect(&second).await.unwrap();
        assert_eq!(bus.subscriber_count(&key), 0);
        assert_eq!(listener.subscribed_rooms(), 0);
    }

    #[tokio::test]
    async fn repeated_disconnect_is_harmless() {
        let bus = InMemoryEventBus::new();
        let listener = BusSubscriptionListener::new(Arc::new(bus.clone()), Arc::new(Ignore));
        let room = RoomId::new();
        let staying = detail(room);
        let leaving = detail(room);

        listener.on_connect(&staying).await.unwrap();
        listener.on_connect(&leaving).await.unwrap();
        listener.on_disconnect(&leaving).await.unwrap();
        listener.on_disconnect(&leaving).await.unwrap();

        assert_eq!(bus.subscriber_count(&RoutingKey::new(&room, Topic::ScreenShare)), 1);
    }

    #[tokio::test]
    async fn rejoining_after_last_leave_subscribes_again() {
        let bus = InMemoryEventBus::new();
        let listener = BusSubscriptionListener::new(Arc::new(bus.clone()), Arc::new(Ignore));
        let room = RoomId::new();
        let key = RoutingKey::new(&room, Topic::RoomEvents);

        let first = detail(room);
        listener.on_connect(&first).await.unwrap();
        listener.on_disconnect(&first).await.unwrap();
        let again = detail(room);
        listener.on_connect(&again).await.unwrap();

        assert_eq!(bus.subscriber_count(&key), 1);
    }
}
