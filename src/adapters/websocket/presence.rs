//! Presence notifications.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::participant::{Connection, ConnectionDetail};
use crate::domain::room_event::{event_types, Audience, PresencePayload, RoomEvent};
use crate::ports::ConnectionListener;

use super::router::EventRouter;

/// Broadcasts `participant-joined` / `participant-left` to the rest of the
/// room.
pub struct PresenceListener {
    router: Arc<EventRouter>,
}

impl PresenceListener {
    pub fn new(router: Arc<EventRouter>) -> Self {
        Self { router }
    }

    async fn announce(&self, connection: &Connection, event_type: &str) -> Result<(), DomainError> {
        let payload = PresencePayload {
            user_id: connection.user_id(),
            participant_type: connection.participant_type(),
        };
        let event = RoomEvent::builder(connection.room_id(), event_type)
            .created_by(connection.user_id())
            .built_payload(&payload)
            .build();

        self.router
            .broadcast(event, Audience::RoomExcept(connection.user_id()))
            .await
            .map_err(|e| DomainError::new(ErrorCode::DeliveryFailed, e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl ConnectionListener for PresenceListener {
    async fn on_connect(&self, detail: &ConnectionDetail) -> Result<(), DomainError> {
        self.announce(&detail.connection, event_types::PARTICIPANT_JOINED)
            .await
    }

    async fn on_disconnect(&self, detail: &ConnectionDetail) -> Result<(), DomainError> {
        self.announce(&detail.connection, event_types::PARTICIPANT_LEFT)
            .await
    }

    fn name(&self) -> &'static str {
        "PresenceListener"
    }
}
