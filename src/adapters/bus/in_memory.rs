//! In-memory pub/sub broker.
//!
//! Clones of one `InMemoryEventBus` share a broker, which is how tests run
//! several nodes in one process. Delivery happens inline: `publish`
//! returns after every subscribed callback has run.
//!
//! Also keeps the most recent published messages for assertions, capped
//! at [`RECENT_MESSAGES`] so a long-running process does not grow.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, Weak};

use async_trait::async_trait;
use futures::future::join_all;

use crate::domain::room_event::RoutingKey;
use crate::ports::{BusCallback, BusError, BusMessage, BusNotification, EventBus, Subscription};

type Callbacks = HashMap<RoutingKey, Vec<(u64, Arc<dyn BusCallback>)>>;

/// How many published messages are kept for inspection.
pub const RECENT_MESSAGES: usize = 256;

#[derive(Default)]
struct Broker {
    callbacks: RwLock<Callbacks>,
    recent: RwLock<VecDeque<(RoutingKey, BusMessage)>>,
    published_total: AtomicUsize,
    next_id: AtomicU64,
}

impl Broker {
    fn callbacks_for(&self, key: &RoutingKey) -> Vec<Arc<dyn BusCallback>> {
        self.callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    fn record(&self, key: &RoutingKey, message: &BusMessage) {
        self.published_total.fetch_add(1, Ordering::Relaxed);
        let mut recent = self.recent.write().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == RECENT_MESSAGES {
            recent.pop_front();
        }
        recent.push_back((key.clone(), message.clone()));
    }

    fn remove(&self, key: &RoutingKey, id: u64) {
        let mut callbacks = self
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entries) = callbacks.get_mut(key) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                callbacks.remove(key);
            }
        }
    }
}

/// Shared in-process broker.
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    broker: Arc<Broker>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    // === Test Helpers ===

    /// The most recent published messages with their keys, oldest first.
    pub fn published(&self) -> Vec<(RoutingKey, BusMessage)> {
        self.broker
            .recent
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Messages published since the broker was created.
    pub fn message_count(&self) -> usize {
        self.broker.published_total.load(Ordering::Relaxed)
    }

    /// Number of live callbacks on a key, across all nodes.
    pub fn subscriber_count(&self, key: &RoutingKey) -> usize {
        self.broker
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, Vec::len)
    }

    /// Sends a channel-level notification to every subscriber, as a
    /// network transport would on connection loss or recovery.
    pub async fn notify_all(&self, notification: BusNotification) {
        let entries: Vec<(RoutingKey, Arc<dyn BusCallback>)> = self
            .broker
            .callbacks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .flat_map(|(key, entries)| {
                entries
                    .iter()
                    .map(move |(_, cb)| (key.clone(), Arc::clone(cb)))
            })
            .collect();

        join_all(entries.iter().map(|(key, cb)| {
            let notification = notification.clone();
            async move { cb.on_notification(key, notification).await }
        }))
        .await;
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, key: &RoutingKey, message: BusMessage) -> Result<(), BusError> {
        self.broker.record(key, &message);

        // Clone callbacks to release the lock before awaiting
        let callbacks = self.broker.callbacks_for(key);

        join_all(callbacks.iter().map(|cb| {
            let notification = BusNotification::Message(message.clone());
            async move { cb.on_notification(key, notification).await }
        }))
        .await;

        Ok(())
    }

    async fn subscribe(
        &self,
        key: &RoutingKey,
        callback: Arc<dyn BusCallback>,
    ) -> Result<Subscription, BusError> {
        let id = self.broker.next_id.fetch_add(1, Ordering::Relaxed);
        self.broker
            .callbacks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(key.clone())
            .or_default()
            .push((id, callback));

        let broker: Weak<Broker> = Arc::downgrade(&self.broker);
        let owned_key = key.clone();
        Ok(Subscription::new(key.clone(), move || {
            if let Some(broker) = broker.upgrade() {
                broker.remove(&owned_key, id);
            }
        }))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
