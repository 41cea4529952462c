//! In-memory event archive.
//!
//! Used when no database is configured, and by tests. It can be switched
//! into a failing mode to exercise archiver error paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::foundation::{EventId, RoomId};
use crate::domain::room_event::StorageEvent;
use crate::ports::{ArchiveError, EventArchive};

#[derive(Default)]
pub struct InMemoryEventArchive {
    events: RwLock<HashMap<EventId, StorageEvent>>,
    unavailable: AtomicBool,
}

impl InMemoryEventArchive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &EventId) -> bool {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    pub fn get(&self, id: &EventId) -> Option<StorageEvent> {
        self.events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn check_available(&self) -> Result<(), ArchiveError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ArchiveError::Database("archive unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl EventArchive for InMemoryEventArchive {
    async fn store(&self, events: &[StorageEvent]) -> Result<u64, ArchiveError> {
        self.check_available()?;

        let mut stored = self.events.write().unwrap_or_else(PoisonError::into_inner);
        let mut written = 0;
        for event in events {
            if !stored.contains_key(&event.id) {
                stored.insert(event.id, event.clone());
                written += 1;
            }
        }
        Ok(written)
    }

    async fn latest(
        &self,
        room_id: &RoomId,
        event_type: &str,
    ) -> Result<Option<StorageEvent>, ArchiveError> {
        self.check_available()?;

        Ok(self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| &e.room_id == room_id && e.event_type == event_type)
            .max_by_key(|e| (e.created_at, e.id))
            .cloned())
    }

    async fn room_history(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<StorageEvent>, ArchiveError> {
        self.check_available()?;

        let mut history: Vec<StorageEvent> = self
            .events
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|e| &e.room_id == room_id)
            .cloned()
            .collect();
        history.sort_by_key(|e| (e.created_at, e.id));
        history.truncate(limit);
        Ok(history)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::room_event::RoomEvent;

    fn stored(room: RoomId, event_type: &str) -> StorageEvent {
        StorageEvent::from_room_event(&RoomEvent::builder(room, event_type).build())
    }

    #[tokio::test]
    async fn store_is_idempotent_on_id() {
        let archive = InMemoryEventArchive::new();
        let event = stored(RoomId::new(), "reaction");

        assert_eq!(archive.store(&[event.clone()]).await.unwrap(), 1);
        assert_eq!(archive.store(&[event]).await.unwrap(), 0);
        assert_eq!(archive.len(), 1);
    }

    #[tokio::test]
    async fn latest_picks_newest_of_type_in_room() {
        let archive = InMemoryEventArchive::new();
        let room = RoomId::new();
        let old = stored(room, "code");
        let new = stored(room, "code");
        let other_room = stored(RoomId::new(), "code");
        archive
            .store(&[new.clone(), old, other_room, stored(room, "reaction")])
            .await
            .unwrap();

        assert_eq!(archive.latest(&room, "code").await.unwrap(), Some(new));
        assert!(archive.latest(&room, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn history_is_oldest_first_and_limited() {
        let archive = InMemoryEventArchive::new();
        let room = RoomId::new();
        let events: Vec<_> = (0..3).map(|_| stored(room, "reaction")).collect();
        archive.store(&events).await.unwrap();

        let history = archive.room_history(&room, 2).await.unwrap();
        assert_eq!(history, events[..2].to_vec());
    }

    #[tokio::test]
    async fn unavailable_archive_rejects_writes() {
        let archive = InMemoryEventArchive::new();
        archive.set_unavailable(true);
        assert!(archive.store(&[stored(RoomId::new(), "x")]).await.is_err());
        assert!(archive.is_empty());
    }
}
