//! In-memory hot event store.
//!
//! Suitable for single-node deployments and tests. Events are partitioned
//! per room so writers in unrelated rooms never contend on the same lock;
//! the outer map lock is only held long enough to find or create a
//! partition. Partitions emptied by `delete` are dropped.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::domain::foundation::{EventId, RoomId};
use crate::domain::room_event::StorageEvent;
use crate::ports::{EventFilter, HotEventStore, HotStoreError, ScanOrder, ScanPage};

type Partition = Arc<RwLock<Vec<StorageEvent>>>;

/// Hot store kept in process memory.
///
/// Each partition stays sorted by `(created_at, id)`.
#[derive(Default)]
pub struct InMemoryHotEventStore {
    rooms: RwLock<HashMap<RoomId, Partition>>,
}

impl InMemoryHotEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of events held.
    pub fn len(&self) -> usize {
        self.partitions()
            .iter()
            .map(|p| p.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an event with this id is held.
    pub fn contains(&self, id: &EventId) -> bool {
        self.partitions().iter().any(|p| {
            p.read()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .any(|e| &e.id == id)
        })
    }

    /// Number of rooms currently holding a partition.
    pub fn partition_count(&self) -> usize {
        self.rooms.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Drops empty partitions nobody else holds a handle to.
    ///
    /// A writer between `partition_or_create` and its insert keeps a clone
    /// of the `Arc`, so its partition survives.
    fn prune_empty(&self) {
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, partition| {
                Arc::strong_count(partition) > 1
                    || !partition
                        .read()
                        .unwrap_or_else(PoisonError::into_inner)
                        .is_empty()
            });
    }

    fn partition(&self, room_id: &RoomId) -> Option<Partition> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(room_id)
            .cloned()
    }

    fn partition_or_create(&self, room_id: RoomId) -> Partition {
        if let Some(partition) = self.partition(&room_id) {
            return partition;
        }
        self.rooms
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(room_id)
            .or_default()
            .clone()
    }

    fn partitions(&self) -> Vec<Partition> {
        self.rooms
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Matching events in ascending order.
    fn collect_matching(&self, filter: &EventFilter) -> Vec<StorageEvent> {
        let partitions = match &filter.room_id {
            Some(room_id) => self.partition(room_id).into_iter().collect(),
            None => self.partitions(),
        };

        let mut matching: Vec<StorageEvent> = partitions
            .iter()
            .flat_map(|p| {
                p.read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .iter()
                    .filter(|e| filter.matches(e))
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .collect();

        if filter.room_id.is_none() {
            matching.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));
        }
        matching
    }
}

#[async_trait]
impl HotEventStore for InMemoryHotEventStore {
    async fn add(&self, event: StorageEvent) -> Result<(), HotStoreError> {
        let partition = self.partition_or_create(event.room_id);
        let mut events = partition.write().unwrap_or_else(PoisonError::into_inner);

        if events.iter().any(|e| e.id == event.id) {
            return Ok(());
        }
        let key = (event.created_at, event.id);
        let at = events.partition_point(|e| (e.created_at, e.id) <= key);
        events.insert(at, event);
        Ok(())
    }

    async fn fetch_page(
        &self,
        filter: &EventFilter,
        order: ScanOrder,
        offset: usize,
        limit: usize,
    ) -> Result<ScanPage, HotStoreError> {
        let mut matching = self.collect_matching(filter);
        if order == ScanOrder::NewestFirst {
            matching.reverse();
        }

        let total = matching.len();
        let events: Vec<StorageEvent> = matching.into_iter().skip(offset).take(limit).collect();
        let end = offset + events.len();
        let next_offset = (end < total).then_some(end);

        Ok(ScanPage { events, next_offset })
    }

    async fn delete(&self, ids: &[EventId]) -> Result<u64, HotStoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut removed = 0u64;
        for partition in self.partitions() {
            let mut events = partition.write().unwrap_or_else(PoisonError::into_inner);
            let before = events.len();
            events.retain(|e| !ids.contains(&e.id));
            removed += (before - events.len()) as u64;
        }
        if removed > 0 {
            self.prune_empty();
        }
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
