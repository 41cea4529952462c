//! RealtimeNode - One process worth of real-time wiring.
//!
//! Builds the registry, the sender pipelines, the handler registry and the
//! connection listeners around a set of backends, and exposes them to the
//! HTTP layer. Several nodes sharing one [`InMemoryEventBus`] behave like
//! separate processes behind a shared broker.
//!
//! [`InMemoryEventBus`]: crate::adapters::bus::InMemoryEventBus

use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use futures::channel::mpsc as client_mpsc;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::adapters::serialization::JsonEventSerializer;
use crate::adapters::websocket::{
    admit_request, message_types, BusBridge, BusSubscriptionListener, CloseReason, CodeHandler,
    CodeStateRequestHandler, ConnectQuery, ConnectRejection, ConnectionHandler,
    ConnectionRegistry, EventRouter, InboundMessage, MessageDispatcher, PingHandler,
    PresenceListener, ReactionHandler, ScreenShareToggleHandler, SessionConfig, TransportError,
    VideoChatSignalHandler, WebSocketState,
};
use crate::application::AdmitParticipantHandler;
use crate::domain::foundation::RoomId;
use crate::domain::participant::{Connection, OutboundFrame};
use crate::ports::{
    ConnectionListener, EventArchive, EventBus, HotEventStore, ParticipantRepository,
    RoomDirectory, ServerId, SessionValidator,
};

/// Backends a node is built around.
#[derive(Clone)]
pub struct NodeBackends {
    pub hot_store: Arc<dyn HotEventStore>,
    pub bus: Arc<dyn EventBus>,
    pub archive: Arc<dyn EventArchive>,
    pub validator: Arc<dyn SessionValidator>,
    pub rooms: Arc<dyn RoomDirectory>,
    pub participants: Arc<dyn ParticipantRepository>,
}

/// A fully wired real-time process.
pub struct RealtimeNode {
    server_id: ServerId,
    backends: NodeBackends,
    registry: Arc<ConnectionRegistry>,
    router: Arc<EventRouter>,
    bridge: Arc<BusBridge>,
    subscriptions: Arc<BusSubscriptionListener>,
    connections: Arc<ConnectionHandler>,
    admission: Arc<AdmitParticipantHandler>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl RealtimeNode {
    pub fn new(server_id: ServerId, backends: NodeBackends, session: SessionConfig) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let router = Arc::new(EventRouter::new(
            Arc::clone(&registry),
            Arc::clone(&backends.hot_store),
            Arc::clone(&backends.bus),
            server_id.clone(),
            JsonEventSerializer::new(),
        ));
        let bridge = BusBridge::new_shared(Arc::clone(&router), server_id.clone());
        let subscriptions = Arc::new(BusSubscriptionListener::new(
            Arc::clone(&backends.bus),
            bridge.clone(),
        ));

        let dispatcher = Arc::new(
            MessageDispatcher::builder()
                .register(ReactionHandler::new(Arc::clone(&router)))
                .register(CodeHandler::new(Arc::clone(&router)))
                .register(CodeStateRequestHandler::new(
                    Arc::clone(&router),
                    Arc::clone(&backends.hot_store),
                    Arc::clone(&backends.archive),
                ))
                .register(ScreenShareToggleHandler::new(Arc::clone(&router)))
                .register(VideoChatSignalHandler::new(Arc::clone(&router)))
                .register(PingHandler::new(Arc::clone(&router)))
                .build(),
        );

        let listeners: Vec<Arc<dyn ConnectionListener>> = vec![
            registry.clone(),
            subscriptions.clone(),
            Arc::new(PresenceListener::new(Arc::clone(&router))),
        ];
        let connections = Arc::new(ConnectionHandler::new(listeners, dispatcher, session));

        let admission = Arc::new(AdmitParticipantHandler::new(
            Arc::clone(&backends.rooms),
            Arc::clone(&backends.participants),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tracing::info!(server_id = %server_id, "Realtime node assembled");

        Self {
            server_id,
            backends,
            registry,
            router,
            bridge,
            subscriptions,
            connections,
            admission,
            shutdown_tx,
            shutdown_rx,
        }
    }

    pub fn server_id(&self) -> &ServerId {
        &self.server_id
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<EventRouter> {
        &self.router
    }

    pub fn hot_store(&self) -> &Arc<dyn HotEventStore> {
        &self.backends.hot_store
    }

    pub fn archive(&self) -> &Arc<dyn EventArchive> {
        &self.backends.archive
    }

    /// Rooms with a live bus subscription on this node.
    pub fn subscribed_rooms(&self) -> usize {
        self.subscriptions.subscribed_rooms()
    }

    pub fn bus_connected(&self) -> bool {
        self.bridge.is_connected()
    }

    /// State for the axum WebSocket routes.
    pub fn websocket_state(&self) -> WebSocketState {
        WebSocketState {
            admission: Arc::clone(&self.admission),
            validator: Arc::clone(&self.backends.validator),
            connections: Arc::clone(&self.connections),
            registry: Arc::clone(&self.registry),
            bridge: Arc::clone(&self.bridge),
            server_id: self.server_id.clone(),
            shutdown: self.shutdown_rx.clone(),
        }
    }

    /// Receiver that turns true once [`shutdown`](Self::shutdown) is called.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Ends every read loop on this node.
    pub fn shutdown(&self) {
        tracing::info!(server_id = %self.server_id, "Shutting down realtime node");
        self.shutdown_tx.send_replace(true);
    }

    /// Admit and connect an in-process client, without a socket.
    ///
    /// Goes through token validation and admission exactly like the
    /// upgrade endpoint. Returns once every connection listener ran.
    pub async fn connect_local(
        &self,
        room_id: RoomId,
        access_token: &str,
    ) -> Result<LocalClient, ConnectRejection> {
        let state = self.websocket_state();
        let query = ConnectQuery {
            access_token: Some(access_token.to_string()),
        };
        let participant =
            admit_request(&state, &room_id.to_string(), &HeaderMap::new(), &query).await?;

        let (connection, outbound) = self.connections.open(&participant);
        let active = self.connections.connect(Arc::clone(&connection)).await;

        let (inbound_tx, inbound_rx) = client_mpsc::unbounded();
        let session = tokio::spawn(active.serve(inbound_rx, self.shutdown_rx.clone()));

        Ok(LocalClient {
            connection,
            inbound: inbound_tx,
            outbound,
            session,
        })
    }
}

/// Client side of an in-process connection.
pub struct LocalClient {
    connection: Arc<Connection>,
    inbound: client_mpsc::UnboundedSender<Result<InboundMessage, TransportError>>,
    outbound: mpsc::Receiver<OutboundFrame>,
    session: JoinHandle<CloseReason>,
}

impl LocalClient {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Send a raw text frame. Returns false once the read loop has ended.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.inbound
            .unbounded_send(Ok(InboundMessage::Text(text.into())))
            .is_ok()
    }

    /// Send a `{ "Type", "Value" }` frame.
    pub fn send(&self, message_type: &str, value: JsonValue) -> bool {
        let frame = serde_json::json!({ "Type": message_type, "Value": value });
        self.send_text(frame.to_string())
    }

    pub fn ping(&self) -> bool {
        self.send(message_types::PING, JsonValue::Null)
    }

    /// Next outbound frame, or `None` on timeout or once the queue closed.
    pub async fn next_frame(&mut self, timeout: Duration) -> Option<OutboundFrame> {
        tokio::time::timeout(timeout, self.outbound.recv())
            .await
            .ok()
            .flatten()
    }

    /// Next delivered event envelope, skipping non-text frames.
    pub async fn next_event(&mut self, timeout: Duration) -> Option<JsonValue> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            match self.next_frame(remaining).await? {
                OutboundFrame::Text(text) => return serde_json::from_str(&text).ok(),
                OutboundFrame::Close => return None,
            }
        }
    }

    /// Next event whose `Type` equals `event_type`, skipping others.
    pub async fn next_event_of_type(
        &mut self,
        event_type: &str,
        timeout: Duration,
    ) -> Option<JsonValue> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            let event = self.next_event(remaining).await?;
            if event.get("Type").and_then(JsonValue::as_str) == Some(event_type) {
                return Some(event);
            }
        }
    }

    /// Drain whatever is queued right now.
    pub fn drain(&mut self) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.outbound.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Send a close frame and wait for the connection to finish closing.
    ///
    /// Disconnect listeners have run when this returns `Some`.
    pub async fn disconnect(self, timeout: Duration) -> Option<CloseReason> {
        let LocalClient {
            inbound,
            mut outbound,
            session,
            ..
        } = self;
        let _ = inbound.unbounded_send(Ok(InboundMessage::Close));

        // Keep draining so the close frame never blocks on a full queue
        let drain = tokio::spawn(async move { while outbound.recv().await.is_some() {} });
        let reason = tokio::time::timeout(timeout, session).await.ok()?.ok();
        drain.abort();
        reason
    }
}
