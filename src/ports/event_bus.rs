//! EventBus port - Cross-process fan-out of room events.
//!
//! Every server process subscribes to the routing keys of the rooms it
//! currently serves. Publishing on one process reaches the subscribed
//! callbacks of all processes, including the publisher's own.
//!
//! ## Delivery semantics
//!
//! - At-most-once per subscriber, best effort
//! - No acknowledgement, retry, or persistence (the hot store is the
//!   durable record)
//! - No ordering between events published by different processes
//!
//! ## Transport failures
//!
//! Adapters backed by a network transport reconnect on their own and
//! re-issue every live subscription. Subscribers are told through
//! [`BusNotification::Disconnected`] and [`BusNotification::Reconnected`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::room_event::{Audience, RoomEvent, RoutingKey};

/// Unique identifier for a server instance in a multi-server deployment.
///
/// Format is typically hostname:port or container/pod ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

impl ServerId {
    /// Create a new server ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the server ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Create server ID from environment (hostname + port).
    pub fn from_env(port: u16) -> Self {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
        Self(format!("{}:{}", hostname, port))
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors that can occur in bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Transport unreachable; the caller should degrade to local delivery.
    #[error("Event bus unavailable: {0}")]
    Unavailable(String),

    /// Message could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The bus has been shut down.
    #[error("Event bus closed")]
    Closed,
}

/// What travels on the bus.
///
/// `origin` and `audience` are routing metadata. They never reach clients;
/// the client-facing form is `event` alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusMessage {
    pub origin: ServerId,
    pub audience: Audience,
    pub event: RoomEvent,
}

/// What a subscriber callback receives.
///
/// A channel-level notification carries no message, so it is never
/// confused with an event that has no payload.
#[derive(Debug, Clone, PartialEq)]
pub enum BusNotification {
    Message(BusMessage),
    Disconnected,
    Reconnected,
}

/// Callback registered for a routing key.
#[async_trait]
pub trait BusCallback: Send + Sync {
    async fn on_notification(&self, key: &RoutingKey, notification: BusNotification);

    /// Callback name for logging.
    fn name(&self) -> &'static str;
}

/// Disposable registration returned by [`EventBus::subscribe`].
///
/// Dropping or disposing it unregisters the callback.
pub struct Subscription {
    key: RoutingKey,
    unsubscribe: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn new(key: RoutingKey, unsubscribe: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            key,
            unsubscribe: Some(Box::new(unsubscribe)),
        }
    }

    /// A handle that owns nothing, for buses that never deliver.
    pub fn inert(key: RoutingKey) -> Self {
        Self {
            key,
            unsubscribe: None,
        }
    }

    pub fn key(&self) -> &RoutingKey {
        &self.key
    }

    /// Unregister now.
    pub fn dispose(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(unsubscribe) = self.unsubscribe.take() {
            unsubscribe();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("key", &self.key)
            .field("active", &self.unsubscribe.is_some())
            .finish()
    }
}

/// Port for publishing to and subscribing on routing keys.
///
/// Routing keys must be built with [`RoutingKey::new`] on both sides.
#[async_trait]
pub trait EventBus: Send + Sync {
    /// Publish to every subscriber of `key`, in any process.
    async fn publish(&self, key: &RoutingKey, message: BusMessage) -> Result<(), BusError>;

    /// Register a callback for `key`.
    async fn subscribe(
        &self,
        key: &RoutingKey,
        callback: Arc<dyn BusCallback>,
    ) -> Result<Subscription, BusError>;

    /// Adapter name for logging.
    fn name(&self) -> &'static str;
}
