//! JSON serializer for the client-facing event envelope.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;

use crate::domain::room_event::RoomEvent;

/// Stateless JSON codec for room events and inbound frames.
///
/// Timestamps are written as ISO-8601 UTC with a `Z` designator. Unknown
/// fields are ignored on the way in.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventSerializer;

impl JsonEventSerializer {
    pub fn new() -> Self {
        Self
    }

    /// Serialize an event to its wire text.
    pub fn serialize(&self, event: &RoomEvent) -> Result<String, serde_json::Error> {
        serde_json::to_string(event)
    }

    /// Deserialize wire text, returning `None` for malformed or mismatched
    /// input.
    pub fn deserialize<T: DeserializeOwned>(&self, text: &str) -> Option<T> {
        match serde_json::from_str(text) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::debug!(error = %e, "Failed to deserialize frame");
                None
            }
        }
    }
}

/// An event paired with its wire text, computed at most once.
///
/// Shared between every destination of a fan-out so a broadcast to N
/// sockets serializes once.
#[derive(Debug)]
pub struct EncodedEvent {
    event: RoomEvent,
    text: OnceCell<Arc<str>>,
}

impl EncodedEvent {
    pub fn new(event: RoomEvent) -> Self {
        Self {
            event,
            text: OnceCell::new(),
        }
    }

    pub fn event(&self) -> &RoomEvent {
        &self.event
    }

    /// Wire text, serializing on first use.
    pub fn text(&self, serializer: &JsonEventSerializer) -> Result<Arc<str>, serde_json::Error> {
        self.text
            .get_or_try_init(|| serializer.serialize(&self.event).map(Arc::from))
            .cloned()
    }

    /// Whether the wire text has been produced yet.
    pub fn is_encoded(&self) -> bool {
        self.text.get().is_some()
    }

    pub fn into_event(self) -> RoomEvent {
        self.event
    }
}
