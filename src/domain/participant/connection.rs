//! A live socket connection as seen by the rest of the system.
//!
//! The connection handler owns the `Arc<Connection>`; everything else
//! (registry, listeners, handlers) borrows it or holds a `Weak`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::domain::foundation::{ConnectionId, ParticipantId, RoomId, UserId};

use super::ParticipantType;

/// A frame queued for the socket writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Pre-serialized text frame, shared between all recipients.
    Text(Arc<str>),
    /// Ask the writer to perform the close handshake.
    Close,
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("outbound queue is full")]
    Full,
    #[error("connection is closed")]
    Closed,
}

/// One live session in a room.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    participant_id: ParticipantId,
    user_id: UserId,
    room_id: RoomId,
    participant_type: ParticipantType,
    screen_share_enabled: AtomicBool,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl Connection {
    /// Creates a connection and the receiving end of its outbound queue.
    ///
    /// The receiver is drained by the transport's writer task.
    pub fn open(
        participant_id: ParticipantId,
        user_id: UserId,
        room_id: RoomId,
        participant_type: ParticipantType,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<OutboundFrame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let connection = Arc::new(Self {
            id: ConnectionId::new(),
            participant_id,
            user_id,
            room_id,
            participant_type,
            screen_share_enabled: AtomicBool::new(false),
            outbound,
        });
        (connection, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn participant_id(&self) -> ParticipantId {
        self.participant_id
    }

    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn participant_type(&self) -> ParticipantType {
        self.participant_type
    }

    pub fn screen_share_enabled(&self) -> bool {
        self.screen_share_enabled.load(Ordering::Acquire)
    }

    /// Sets the screen-share flag, returning the previous value.
    pub fn set_screen_share(&self, enabled: bool) -> bool {
        self.screen_share_enabled.swap(enabled, Ordering::AcqRel)
    }

    /// Queues a text frame without waiting.
    ///
    /// A slow reader never stalls fan-out to other connections; its frames
    /// are dropped once its queue is full.
    pub fn try_send_text(&self, text: Arc<str>) -> Result<(), QueueError> {
        self.outbound
            .try_send(OutboundFrame::Text(text))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => QueueError::Full,
                mpsc::error::TrySendError::Closed(_) => QueueError::Closed,
            })
    }

    /// Queues the close request, waiting for queue space.
    pub async fn request_close(&self) -> Result<(), QueueError> {
        self.outbound
            .send(OutboundFrame::Close)
            .await
            .map_err(|_| QueueError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }
}

/// What connection listeners receive.
///
/// Holds a strong reference, so the connection stays valid for the whole
/// listener invocation.
#[derive(Debug, Clone)]
pub struct ConnectionDetail {
    pub connection: Arc<Connection>,
}

impl ConnectionDetail {
    pub fn new(connection: Arc<Connection>) -> Self {
        Self { connection }
    }
}
