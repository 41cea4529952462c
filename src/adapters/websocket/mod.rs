//! WebSocket adapters: everything between a client socket and the
//! event bus.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  handler: GET /rooms/:room_id/ws  →  admission  →  upgrade          │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  session: ConnectionHandler                                          │
//! │   - notifies listeners (registry, presence, bus subscriptions)       │
//! │   - read loop → MessageDispatcher → message handlers                │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │ RoomEvent
//!                                     ▼
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  router: EventRouter                                                 │
//! │   socket delivery → hot store → bus publish                         │
//! └─────────────────────────────────────────────────────────────────────┘
//!                                     │
//!                                     ▼  other processes
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  bridge: BusBridge → ConnectionRegistry → local sockets             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`messages`] - Inbound frame and payload types
//! - [`registry`] - Per-room registry of live connections
//! - [`sender`] - Decorator pipeline for outgoing events
//! - [`router`] - Assembled pipelines for handlers and listeners
//! - [`dispatcher`] - Type-keyed dispatch of inbound frames
//! - [`handlers`] - Built-in message handlers
//! - [`presence`] - Join/leave announcements
//! - [`subscriptions`] - Per-room bus subscription lifecycle
//! - [`bridge`] - Bus → local sockets
//! - [`session`] - Connection lifecycle state machine
//! - [`handler`] - Axum upgrade handler and health endpoint

pub mod bridge;
pub mod dispatcher;
pub mod handler;
pub mod handlers;
pub mod messages;
pub mod presence;
pub mod registry;
pub mod router;
pub mod sender;
pub mod session;
pub mod subscriptions;

pub use bridge::BusBridge;
pub use dispatcher::{DispatchOutcome, MessageDispatcher, MessageDispatcherBuilder, MessageHandler};
pub use handler::{
    admit_request, check_request, health_handler, websocket_router, ws_handler, ConnectQuery,
    ConnectRejection, HealthResponse, WebSocketState,
};
pub use handlers::{
    CodeHandler, CodeStateRequestHandler, PingHandler, ReactionHandler,
    ScreenShareToggleHandler, VideoChatSignalHandler,
};
pub use messages::{
    message_types, CodeMessage, InboundFrame, ReactionMessage, ScreenShareChanged,
    ScreenShareToggleMessage, VideoChatSignalMessage,
};
pub use presence::PresenceListener;
pub use registry::ConnectionRegistry;
pub use router::EventRouter;
pub use sender::{
    DeliveryReport, EventSender, OutgoingEvent, PersistingEventSender, PublishingEventSender,
    SendError, SocketEventSender,
};
pub use session::{
    ActiveConnection, CloseReason, ConnectionHandler, InboundMessage, SessionConfig,
    TransportError,
};
pub use subscriptions::BusSubscriptionListener;
