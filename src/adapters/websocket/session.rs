//! Connection lifecycle.
//!
//! ```text
//! Admitting ──▶ Connected ──▶ Reading ──▶ Closing ──▶ Closed
//!     │             │                        ▲
//!     └─────────────┴────── error ───────────┘
//! ```
//!
//! Admission happens before the transport upgrade (see the HTTP handler).
//! From there [`ConnectionHandler::connect`] notifies listeners and
//! [`ActiveConnection::serve`] runs the read loop until the client leaves or
//! shutdown is signalled. Every connected connection gets exactly one
//! disconnect notification, even if `serve` never runs.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};

use crate::domain::participant::{
    Connection, ConnectionDetail, ConnectionState, OutboundFrame, Participant,
};
use crate::ports::ConnectionListener;

use super::dispatcher::MessageDispatcher;

/// Tunables for connection handling.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upper bound for one listener's connect or disconnect callback.
    pub listener_timeout: Duration,
    /// Upper bound for queueing the close handshake.
    pub close_timeout: Duration,
    /// Outbound frames buffered per connection before new ones are dropped.
    pub outbound_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            listener_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(2),
            outbound_capacity: 256,
        }
    }
}

/// A frame read from the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Text(String),
    Close,
}

/// The transport failed while reading.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Transport error: {0}")]
pub struct TransportError(pub String);

/// Why the read loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client sent a close frame or the stream ended.
    ClientClosed,
    /// Reading from the transport failed.
    TransportFailed,
    /// The process is shutting down.
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Notification {
    Connect,
    Disconnect,
}

/// Drives connections from admission to teardown.
pub struct ConnectionHandler {
    listeners: Vec<Arc<dyn ConnectionListener>>,
    dispatcher: Arc<MessageDispatcher>,
    config: SessionConfig,
}

impl ConnectionHandler {
    pub fn new(
        listeners: Vec<Arc<dyn ConnectionListener>>,
        dispatcher: Arc<MessageDispatcher>,
        config: SessionConfig,
    ) -> Self {
        Self {
            listeners,
            dispatcher,
            config,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Creates the connection for an admitted participant.
    ///
    /// The receiver must be drained by the transport's writer.
    pub fn open(
        &self,
        participant: &Participant,
    ) -> (Arc<Connection>, mpsc::Receiver<OutboundFrame>) {
        Connection::open(
            participant.id,
            participant.user_id,
            participant.room_id,
            participant.participant_type,
            self.config.outbound_capacity,
        )
    }

    /// Announces the connection to every listener.
    ///
    /// Returns once all listeners finished, failed or timed out.
    pub async fn connect(self: &Arc<Self>, connection: Arc<Connection>) -> ActiveConnection {
        let mut active = ActiveConnection {
            handler: Arc::clone(self),
            connection,
            state: ConnectionState::Admitting,
            disconnected: false,
        };

        self.notify(&active.connection, Notification::Connect).await;
        active.transition(ConnectionState::Connected);

        tracing::info!(
            connection_id = %active.connection.id(),
            room_id = %active.connection.room_id(),
            user_id = %active.connection.user_id(),
            participant_type = %active.connection.participant_type(),
            "Connection established"
        );
        active
    }

    async fn notify(&self, connection: &Arc<Connection>, notification: Notification) {
        notify_listeners(
            &self.listeners,
            ConnectionDetail::new(Arc::clone(connection)),
            notification,
            self.config.listener_timeout,
        )
        .await;
    }
}

/// Runs every listener on its own task, bounded by `timeout`.
async fn notify_listeners(
    listeners: &[Arc<dyn ConnectionListener>],
    detail: ConnectionDetail,
    notification: Notification,
    timeout: Duration,
) {
    let tasks = listeners.iter().map(|listener| {
        let name = listener.name();
        let listener = Arc::clone(listener);
        let detail = detail.clone();
        let task = tokio::spawn(async move {
            let call = async {
                match notification {
                    Notification::Connect => listener.on_connect(&detail).await,
                    Notification::Disconnect => listener.on_disconnect(&detail).await,
                }
            };
            tokio::time::timeout(timeout, call).await
        });
        async move { (name, task.await) }
    });

    let connection_id = detail.connection.id();
    for (name, result) in join_all(tasks).await {
        match result {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                tracing::warn!(
                    listener = name,
                    connection_id = %connection_id,
                    notification = ?notification,
                    error = %e,
                    "Connection listener failed"
                );
            }
            Ok(Err(_elapsed)) => {
                tracing::warn!(
                    listener = name,
                    connection_id = %connection_id,
                    notification = ?notification,
                    timeout_ms = timeout.as_millis() as u64,
                    "Connection listener timed out"
                );
            }
            Err(e) => {
                tracing::error!(
                    listener = name,
                    connection_id = %connection_id,
                    notification = ?notification,
                    panicked = e.is_panic(),
                    "Connection listener aborted"
                );
            }
        }
    }
}

/// A connected connection waiting for, or running, its read loop.
pub struct ActiveConnection {
    handler: Arc<ConnectionHandler>,
    connection: Arc<Connection>,
    state: ConnectionState,
    disconnected: bool,
}

impl ActiveConnection {
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn transition(&mut self, next: ConnectionState) {
        if !self.state.can_transition_to(next) {
            tracing::warn!(
                connection_id = %self.connection.id(),
                from = ?self.state,
                to = ?next,
                "Ignoring invalid connection state transition"
            );
            return;
        }
        tracing::debug!(
            connection_id = %self.connection.id(),
            from = ?self.state,
            to = ?next,
            "Connection state changed"
        );
        self.state = next;
    }

    /// Reads until the client leaves or `shutdown` turns true, then closes.
    ///
    /// Frames are dispatched one at a time in arrival order.
    pub async fn serve<S>(mut self, inbound: S, mut shutdown: watch::Receiver<bool>) -> CloseReason
    where
        S: Stream<Item = Result<InboundMessage, TransportError>> + Send + 'static,
    {
        self.transition(ConnectionState::Reading);

        let mut read_loop = {
            let connection = Arc::clone(&self.connection);
            let dispatcher = Arc::clone(&self.handler.dispatcher);
            tokio::spawn(read_frames(connection, dispatcher, inbound))
        };

        let reason = tokio::select! {
            result = &mut read_loop => match result {
                Ok(reason) => reason,
                Err(e) => {
                    tracing::error!(
                        connection_id = %self.connection.id(),
                        panicked = e.is_panic(),
                        "Read loop aborted"
                    );
                    CloseReason::TransportFailed
                }
            },
            _ = wait_for_shutdown(&mut shutdown) => {
                read_loop.abort();
                CloseReason::Shutdown
            }
        };

        self.close(reason).await;
        reason
    }

    async fn close(&mut self, reason: CloseReason) {
        self.transition(ConnectionState::Closing);

        let close_timeout = self.handler.config.close_timeout;
        match tokio::time::timeout(close_timeout, self.connection.request_close()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => {
                tracing::debug!(connection_id = %self.connection.id(), "Writer already gone");
            }
            Err(_) => {
                tracing::debug!(
                    connection_id = %self.connection.id(),
                    "Close request timed out, abandoning socket"
                );
            }
        }

        self.disconnected = true;
        self.handler
            .notify(&self.connection, Notification::Disconnect)
            .await;
        self.transition(ConnectionState::Closed);

        tracing::info!(
            connection_id = %self.connection.id(),
            room_id = %self.connection.room_id(),
            user_id = %self.connection.user_id(),
            reason = ?reason,
            "Connection closed"
        );
    }
}

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        if self.disconnected {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                connection_id = %self.connection.id(),
                "No runtime to deliver disconnect notification"
            );
            return;
        };

        let listeners = self.handler.listeners.clone();
        let detail = ConnectionDetail::new(Arc::clone(&self.connection));
        let timeout = self.handler.config.listener_timeout;
        runtime.spawn(async move {
            notify_listeners(&listeners, detail, Notification::Disconnect, timeout).await;
        });
    }
}

async fn read_frames<S>(
    connection: Arc<Connection>,
    dispatcher: Arc<MessageDispatcher>,
    inbound: S,
) -> CloseReason
where
    S: Stream<Item = Result<InboundMessage, TransportError>> + Send + 'static,
{
    let mut inbound = Box::pin(inbound);
    while let Some(message) = inbound.next().await {
        match message {
            Ok(InboundMessage::Text(text)) => {
                dispatcher.handle_inbound(&connection, &text).await;
            }
            Ok(InboundMessage::Close) => {
                tracing::debug!(connection_id = %connection.id(), "Client sent close frame");
                return CloseReason::ClientClosed;
            }
            Err(e) => {
                tracing::debug!(connection_id = %connection.id(), error = %e, "Receive error");
                return CloseReason::TransportFailed;
            }
        }
    }
    CloseReason::ClientClosed
}

/// Resolves once the flag is true, or never if the sender is gone.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            futures::future::pending::<()>().await;
        }
    }
}
