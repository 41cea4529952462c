//! Routes domain-produced room events to their recipients.
//!
//! Three pipelines are assembled once at startup:
//!
//! | Pipeline | Local sockets | Hot store | Bus |
//! |----------|---------------|-----------|-----|
//! | `broadcast` | yes | yes | yes |
//! | `signal` | yes | no | yes |
//! | `reply` | sender's socket | no | no |

use std::sync::Arc;

use crate::adapters::serialization::JsonEventSerializer;
use crate::domain::participant::Connection;
use crate::domain::room_event::{Audience, RoomEvent};
use crate::ports::{EventBus, HotEventStore, ServerId};

use super::registry::ConnectionRegistry;
use super::sender::{
    DeliveryReport, EventSender, OutgoingEvent, PersistingEventSender, PublishingEventSender,
    SendError, SocketEventSender,
};

/// Entry point for handlers and listeners that emit room events.
pub struct EventRouter {
    registry: Arc<ConnectionRegistry>,
    broadcast: Arc<dyn EventSender>,
    signal: Arc<dyn EventSender>,
    local: Arc<dyn EventSender>,
}

impl EventRouter {
    pub fn new(
        registry: Arc<ConnectionRegistry>,
        hot_store: Arc<dyn HotEventStore>,
        bus: Arc<dyn EventBus>,
        origin: ServerId,
        serializer: JsonEventSerializer,
    ) -> Self {
        let local: Arc<dyn EventSender> = Arc::new(SocketEventSender::new(serializer));
        let persisting: Arc<dyn EventSender> =
            Arc::new(PersistingEventSender::new(Arc::clone(&local), hot_store));
        let broadcast: Arc<dyn EventSender> = Arc::new(PublishingEventSender::new(
            persisting,
            Arc::clone(&bus),
            origin.clone(),
        ));
        let signal: Arc<dyn EventSender> =
            Arc::new(PublishingEventSender::new(Arc::clone(&local), bus, origin));

        Self {
            registry,
            broadcast,
            signal,
            local,
        }
    }

    /// Local connections of the event's room that the audience includes.
    pub fn local_destinations(
        &self,
        event: &RoomEvent,
        audience: Audience,
    ) -> Vec<Arc<Connection>> {
        self.registry
            .try_get_connections(&event.room_id)
            .unwrap_or_default()
            .into_iter()
            .filter(|connection| audience.includes(&connection.user_id()))
            .collect()
    }

    /// Deliver, persist and publish a room event.
    pub async fn broadcast(
        &self,
        event: RoomEvent,
        audience: Audience,
    ) -> Result<DeliveryReport, SendError> {
        let destinations = self.local_destinations(&event, audience);
        let outgoing = OutgoingEvent::new(event, audience);
        self.broadcast.send(&outgoing, &destinations).await
    }

    /// Deliver and publish without persisting.
    pub async fn signal(
        &self,
        event: RoomEvent,
        audience: Audience,
    ) -> Result<DeliveryReport, SendError> {
        let destinations = self.local_destinations(&event, audience);
        let outgoing = OutgoingEvent::new(event, audience);
        self.signal.send(&outgoing, &destinations).await
    }

    /// Send to one connection only.
    pub async fn reply(
        &self,
        connection: &Arc<Connection>,
        event: RoomEvent,
    ) -> Result<DeliveryReport, SendError> {
        let outgoing = OutgoingEvent::new(event, Audience::User(connection.user_id()));
        self.local
            .send(&outgoing, std::slice::from_ref(connection))
            .await
    }

    /// Deliver an event received from another process to local sockets.
    pub async fn deliver_remote(
        &self,
        event: RoomEvent,
        audience: Audience,
    ) -> Result<DeliveryReport, SendError> {
        let destinations = self.local_destinations(&event, audience);
        let outgoing = OutgoingEvent::new(event, audience);
        self.local.send(&outgoing, &destinations).await
    }
}
