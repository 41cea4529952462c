//! EventArchive port - Durable storage for events drained from the hot tier.

use async_trait::async_trait;

use crate::domain::foundation::RoomId;
use crate::domain::room_event::StorageEvent;

/// Errors from durable storage.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt archived record: {0}")]
    Corrupt(String),
}

/// Port for the durable event archive.
///
/// `store` must be idempotent on event id: archiving the same event twice
/// (for example after a cycle whose hot-store delete failed) leaves one
/// row.
#[async_trait]
pub trait EventArchive: Send + Sync {
    /// Persist events. Returns how many rows were newly written.
    ///
    /// An `Ok` return means the events are durable.
    async fn store(&self, events: &[StorageEvent]) -> Result<u64, ArchiveError>;

    /// Most recent archived event of a type in a room.
    async fn latest(
        &self,
        room_id: &RoomId,
        event_type: &str,
    ) -> Result<Option<StorageEvent>, ArchiveError>;

    /// Archived events of a room, oldest first.
    async fn room_history(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<StorageEvent>, ArchiveError>;
}
