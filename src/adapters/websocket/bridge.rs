//! Bridge from the event bus to local sockets.
//!
//! # Event Flow
//!
//! ```text
//! Event published by another process
//!          │
//!          ▼
//! ┌────────────────────┐
//! │  BusBridge         │
//! │  skips own origin  │
//! └────────────────────┘
//!          │
//!          ▼
//! ┌────────────────────┐
//! │  Local connections │
//! │  of the room that  │
//! │  the audience has  │
//! └────────────────────┘
//! ```
//!
//! Events are not persisted here; the publishing process already did.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::room_event::RoutingKey;
use crate::ports::{BusCallback, BusMessage, BusNotification, ServerId};

use super::router::EventRouter;

/// Bus callback delivering remote events to this process's sockets.
pub struct BusBridge {
    router: Arc<EventRouter>,
    origin: ServerId,
    connected: AtomicBool,
}

impl BusBridge {
    pub fn new(router: Arc<EventRouter>, origin: ServerId) -> Self {
        Self {
            router,
            origin,
            connected: AtomicBool::new(true),
        }
    }

    pub fn new_shared(router: Arc<EventRouter>, origin: ServerId) -> Arc<Self> {
        Arc::new(Self::new(router, origin))
    }

    /// Whether the bus transport was up at the last notification.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    async fn deliver(&self, key: &RoutingKey, message: BusMessage) {
        // Local sockets already got it from the publishing sender
        if message.origin == self.origin {
            return;
        }

        let event_id = message.event.id;
        match self.router.deliver_remote(message.event, message.audience).await {
            Ok(report) => {
                tracing::trace!(
                    routing_key = %key,
                    event_id = %event_id,
                    origin = %message.origin,
                    delivered = report.delivered,
                    "Delivered remote event"
                );
            }
            Err(e) => {
                tracing::warn!(
                    routing_key = %key,
                    event_id = %event_id,
                    error = %e,
                    "Failed to deliver remote event"
                );
            }
        }
    }
}

#[async_trait]
impl BusCallback for BusBridge {
    async fn on_notification(&self, key: &RoutingKey, notification: BusNotification) {
        match notification {
            BusNotification::Message(message) => self.deliver(key, message).await,
            BusNotification::Disconnected => {
                if self.connected.swap(false, Ordering::AcqRel) {
                    tracing::warn!(
                        server_id = %self.origin,
                        "Event bus disconnected, delivering locally only"
                    );
                }
            }
            BusNotification::Reconnected => {
                if !self.connected.swap(true, Ordering::AcqRel) {
                    tracing::info!(server_id = %self.origin, "Event bus reconnected");
                }
            }
        }
    }

    fn name(&self) -> &'static str {
        "BusBridge"
    }
}
