//! Redis pub/sub event bus for multi-server deployments.
//!
//! Publishing goes through a [`ConnectionManager`], which reconnects on
//! its own after a drop. Receiving is owned by one supervisor task holding
//! the only pub/sub connection, split into a command sink and a single
//! long-lived message stream:
//!
//! ```text
//! subscribe()/dispose() ──commands──▶ supervisor ──▶ SUBSCRIBE/UNSUBSCRIBE
//!                                         │
//!                     pub/sub messages ◀──┘──▶ callbacks for the channel
//! ```
//!
//! When the pub/sub connection drops, every subscriber is told
//! `Disconnected`; the supervisor reconnects with exponential backoff,
//! re-subscribes every live key and then tells subscribers `Reconnected`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use redis::aio::{ConnectionManager, PubSubSink};
use redis::AsyncCommands;
use tokio::sync::mpsc;

use crate::domain::room_event::RoutingKey;
use crate::ports::{BusCallback, BusError, BusMessage, BusNotification, EventBus, Subscription};

/// Reconnect policy for the pub/sub connection.
#[derive(Debug, Clone)]
pub struct RedisBusConfig {
    pub reconnect_min: Duration,
    pub reconnect_max: Duration,
}

impl Default for RedisBusConfig {
    fn default() -> Self {
        Self {
            reconnect_min: Duration::from_millis(250),
            reconnect_max: Duration::from_secs(30),
        }
    }
}

/// Doubling delay between reconnect attempts.
#[derive(Debug)]
struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    fn new(config: &RedisBusConfig) -> Self {
        Self {
            current: config.reconnect_min,
            min: config.reconnect_min,
            max: config.reconnect_max.max(config.reconnect_min),
        }
    }

    fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    fn reset(&mut self) {
        self.current = self.min;
    }
}

enum Command {
    Subscribe(RoutingKey),
    Unsubscribe(RoutingKey),
}

type Callbacks = HashMap<RoutingKey, Vec<(u64, Arc<dyn BusCallback>)>>;

/// Callback table shared by the bus handle, subscriptions and supervisor.
#[derive(Default)]
struct Registry {
    callbacks: Mutex<Callbacks>,
    next_id: AtomicU64,
}

impl Registry {
    fn callbacks_for(&self, key: &RoutingKey) -> Vec<Arc<dyn BusCallback>> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map(|entries| entries.iter().map(|(_, cb)| Arc::clone(cb)).collect())
            .unwrap_or_default()
    }

    fn keys(&self) -> Vec<RoutingKey> {
        self.callbacks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Adds a callback; true if it is the first for its key.
    fn add(&self, key: &RoutingKey, callback: Arc<dyn BusCallback>) -> (u64, bool) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = callbacks.entry(key.clone()).or_default();
        entries.push((id, callback));
        (id, entries.len() == 1)
    }

    /// Removes a callback; true if it was the last for its key.
    fn remove(&self, key: &RoutingKey, id: u64) -> bool {
        let mut callbacks = self.callbacks.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entries) = callbacks.get_mut(key) else {
            return false;
        };
        entries.retain(|(entry_id, _)| *entry_id != id);
        if entries.is_empty() {
            callbacks.remove(key);
            return true;
        }
        false
    }

    async fn notify_all(&self, notification: BusNotification) {
        let entries: Vec<(RoutingKey, Arc<dyn BusCallback>)> = self
            .callbacks
            .lock()
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

    async fn dispatch(&self, msg: redis::Msg) {
        let channel = msg.get_channel_name();
        let Some((room_id, topic)) = RoutingKey::parse(channel) else {
            tracing::debug!(channel, "Ignoring message on foreign channel");
            return;
        };
        let key = RoutingKey::new(&room_id, topic);

        let payload: String = match msg.get_payload() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(routing_key = %key, error = %e, "Unreadable bus payload");
                return;
            }
        };
        let message: BusMessage = match serde_json::from_str(&payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(routing_key = %key, error = %e, "Undecodable bus message");
                return;
            }
        };

        let callbacks = self.callbacks_for(&key);
        join_all(callbacks.iter().map(|cb| {
            let notification = BusNotification::Message(message.clone());
            let key = &key;
            async move { cb.on_notification(key, notification).await }
        }))
        .await;
    }
}

/// Event bus over Redis PUBLISH/SUBSCRIBE.
pub struct RedisEventBus {
    publisher: ConnectionManager,
    registry: Arc<Registry>,
    commands: mpsc::UnboundedSender<Command>,
}

impl RedisEventBus {
    /// Connect the publisher and start the subscriber supervisor.
    ///
    /// The supervisor stops once the bus and every subscription it handed
    /// out have been dropped.
    pub async fn connect(client: redis::Client, config: RedisBusConfig) -> Result<Self, BusError> {
        let publisher = ConnectionManager::new(client.clone())
            .await
            .map_err(|e| BusError::Unavailable(e.to_string()))?;

        let registry = Arc::new(Registry::default());
        let (commands, rx) = mpsc::unbounded_channel();
        tokio::spawn(supervise(client, Arc::clone(&registry), rx, config));

        Ok(Self {
            publisher,
            registry,
            commands,
        })
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, key: &RoutingKey, message: BusMessage) -> Result<(), BusError> {
        let payload =
            serde_json::to_string(&message).map_err(|e| BusError::Serialization(e.to_string()))?;

        let mut conn = self.publisher.clone();
        let receivers: i64 = conn
            .publish(key.as_str(), payload)
            .await
            .map_err(|e: redis::RedisError| BusError::Unavailable(e.to_string()))?;

        tracing::trace!(routing_key = %key, receivers, "Published to bus");
        Ok(())
    }

    async fn subscribe(
        &self,
        key: &RoutingKey,
        callback: Arc<dyn BusCallback>,
    ) -> Result<Subscription, BusError> {
        let (id, first) = self.registry.add(key, callback);
        if first && self.commands.send(Command::Subscribe(key.clone())).is_err() {
            self.registry.remove(key, id);
            return Err(BusError::Closed);
        }

        let registry = Arc::clone(&self.registry);
        let commands = self.commands.clone();
        let owned_key = key.clone();
        Ok(Subscription::new(key.clone(), move || {
            if registry.remove(&owned_key, id) {
                // Supervisor gone means nothing is subscribed anyway
                let _ = commands.send(Command::Unsubscribe(owned_key));
            }
        }))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

/// Owns the pub/sub connection for the lifetime of the bus.
async fn supervise(
    client: redis::Client,
    registry: Arc<Registry>,
    mut commands: mpsc::UnboundedReceiver<Command>,
    config: RedisBusConfig,
) {
    let mut backoff = Backoff::new(&config);
    let mut was_connected = false;

    loop {
        let (mut sink, stream) = match client.get_async_pubsub().await {
            Ok(pubsub) => pubsub.split(),
            Err(e) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Bus connect failed, retrying"
                );
                if !wait_or_shutdown(delay, &mut commands).await {
                    return;
                }
                continue;
            }
        };

        if let Err(e) = resubscribe(&mut sink, &registry).await {
            tracing::warn!(error = %e, "Resubscribe failed");
            let delay = backoff.next_delay();
            if !wait_or_shutdown(delay, &mut commands).await {
                return;
            }
            continue;
        }

        backoff.reset();
        if was_connected {
            tracing::info!("Bus connection restored");
            registry.notify_all(BusNotification::Reconnected).await;
        }
        was_connected = true;

        // One stream for the whole connection: it owns the read buffer
        tokio::pin!(stream);
        loop {
            tokio::select! {
                msg = stream.next() => match msg {
                    Some(msg) => registry.dispatch(msg).await,
                    None => break,
                },
                cmd = commands.recv() => match cmd {
                    Some(Command::Subscribe(key)) => {
                        if let Err(e) = sink.subscribe(key.as_str()).await {
                            tracing::warn!(routing_key = %key, error = %e, "Subscribe failed");
                            break;
                        }
                    }
                    Some(Command::Unsubscribe(key)) => {
                        if let Err(e) = sink.unsubscribe(key.as_str()).await {
                            tracing::warn!(routing_key = %key, error = %e, "Unsubscribe failed");
                            break;
                        }
                    }
                    None => {
                        tracing::debug!("Bus supervisor stopping");
                        return;
                    }
                },
            }
        }

        tracing::warn!("Bus connection lost");
        registry.notify_all(BusNotification::Disconnected).await;
    }
}

/// Subscribes a fresh connection to every key that has callbacks.
async fn resubscribe(sink: &mut PubSubSink, registry: &Registry) -> redis::RedisResult<()> {
    for key in registry.keys() {
        sink.subscribe(key.as_str()).await?;
    }
    Ok(())
}

/// Sleeps for `delay` while draining commands.
///
/// Commands received while disconnected need no action: the registry is
/// the source of truth and is re-applied on reconnect. Returns `false`
/// when every command sender is gone.
async fn wait_or_shutdown(
    delay: Duration,
    commands: &mut mpsc::UnboundedReceiver<Command>,
) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return true,
            cmd = commands.recv() => {
                if cmd.is_none() {
                    return false;
                }
            }
        }
    }
}
