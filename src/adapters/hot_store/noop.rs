//! Hot store that keeps nothing.

use async_trait::async_trait;

use crate::domain::foundation::EventId;
use crate::domain::room_event::StorageEvent;
use crate::ports::{EventFilter, HotEventStore, HotStoreError, ScanOrder, ScanPage};

/// Accepts every write and returns no events.
///
/// Used when replay is disabled; the archiver then has nothing to drain.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHotEventStore;

impl NoopHotEventStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl HotEventStore for NoopHotEventStore {
    async fn add(&self, _event: StorageEvent) -> Result<(), HotStoreError> {
        Ok(())
    }

    async fn fetch_page(
        &self,
        _filter: &EventFilter,
        _order: ScanOrder,
        _offset: usize,
        _limit: usize,
    ) -> Result<ScanPage, HotStoreError> {
        Ok(ScanPage::default())
    }

    async fn delete(&self, _ids: &[EventId]) -> Result<u64, HotStoreError> {
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
