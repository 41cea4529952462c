//! HotEventStore port - Short-retention buffer of recent room events.
//!
//! The hot tier is what replay and "latest state" queries read from. The
//! background archiver drains it into durable storage.
//!
//! Backends only implement page fetching; chunked scans are built on top
//! of it, so paging backends (offset or cursor) plug in directly.
//!
//! A backend that keeps nothing is valid. Callers must not assume
//! retention.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::domain::foundation::{EventId, RoomId, Timestamp};
use crate::domain::room_event::StorageEvent;

/// Errors surfaced by hot store backends.
#[derive(Debug, thiserror::Error)]
pub enum HotStoreError {
    /// Backend could not be reached or rejected the command.
    #[error("Hot store unavailable: {0}")]
    Unavailable(String),

    /// A stored record could not be encoded or decoded.
    #[error("Hot store serialization error: {0}")]
    Serialization(String),
}

/// Predicate over stored events, in terms every backend can evaluate.
///
/// All set fields must match. Time bounds are exclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    pub room_id: Option<RoomId>,
    pub event_type: Option<String>,
    pub stateful: Option<bool>,
    pub created_after: Option<Timestamp>,
    pub created_before: Option<Timestamp>,
}

impl EventFilter {
    /// Matches every event.
    pub fn all() -> Self {
        Self::default()
    }

    /// Matches events of one room.
    pub fn for_room(room_id: RoomId) -> Self {
        Self {
            room_id: Some(room_id),
            ..Self::default()
        }
    }

    pub fn with_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn stateful_only(mut self) -> Self {
        self.stateful = Some(true);
        self
    }

    pub fn created_after(mut self, ts: Timestamp) -> Self {
        self.created_after = Some(ts);
        self
    }

    pub fn created_before(mut self, ts: Timestamp) -> Self {
        self.created_before = Some(ts);
        self
    }

    /// Evaluates the filter against one event.
    pub fn matches(&self, event: &StorageEvent) -> bool {
        if let Some(room_id) = &self.room_id {
            if &event.room_id != room_id {
                return false;
            }
        }
        if let Some(event_type) = &self.event_type {
            if &event.event_type != event_type {
                return false;
            }
        }
        if let Some(stateful) = self.stateful {
            if event.stateful != stateful {
                return false;
            }
        }
        if let Some(after) = &self.created_after {
            if !event.created_at.is_after(after) {
                return false;
            }
        }
        if let Some(before) = &self.created_before {
            if !event.created_at.is_before(before) {
                return false;
            }
        }
        true
    }
}

/// Order of a scan, by `created_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanOrder {
    OldestFirst,
    NewestFirst,
}

/// One page returned by a backend.
///
/// `events` may be shorter than the requested limit (or empty) while
/// `next_offset` is still set, when the backend filters after paging.
/// `next_offset == None` ends the scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub events: Vec<StorageEvent>,
    pub next_offset: Option<usize>,
}

/// A lazy, finite sequence of non-empty chunks.
pub type EventChunks<'a> = BoxStream<'a, Result<Vec<StorageEvent>, HotStoreError>>;

/// Port for the hot event tier.
///
/// Implementations must be safe under arbitrary concurrent callers and
/// must not serialize unrelated rooms behind one lock.
#[async_trait]
pub trait HotEventStore: Send + Sync {
    /// Append an event. Backend failures propagate to the caller.
    async fn add(&self, event: StorageEvent) -> Result<(), HotStoreError>;

    /// Fetch one page of matching events starting at `offset`.
    async fn fetch_page(
        &self,
        filter: &EventFilter,
        order: ScanOrder,
        offset: usize,
        limit: usize,
    ) -> Result<ScanPage, HotStoreError>;

    /// Remove events by id. Unknown ids are ignored.
    ///
    /// Returns how many events were removed.
    async fn delete(&self, ids: &[EventId]) -> Result<u64, HotStoreError>;

    /// Backend name for logs.
    fn name(&self) -> &'static str;

    /// Chunks of matching events, oldest first.
    fn scan_matching(&self, filter: EventFilter, chunk_size: usize) -> EventChunks<'_> {
        scan_chunks(self, filter, ScanOrder::OldestFirst, chunk_size)
    }

    /// Chunks of matching events, newest first.
    fn scan_matching_newest_first(
        &self,
        filter: EventFilter,
        chunk_size: usize,
    ) -> EventChunks<'_> {
        scan_chunks(self, filter, ScanOrder::NewestFirst, chunk_size)
    }
}

/// Builds a chunk stream over any store by walking its pages.
///
/// Each call starts from offset zero. A backend error is yielded once and
/// ends the stream.
pub fn scan_chunks<'a, S>(
    store: &'a S,
    filter: EventFilter,
    order: ScanOrder,
    chunk_size: usize,
) -> EventChunks<'a>
where
    S: HotEventStore + ?Sized,
{
    let chunk_size = chunk_size.max(1);

    stream::unfold(Some(0usize), move |offset| {
        let filter = filter.clone();
        async move {
            let offset = offset?;
            match store.fetch_page(&filter, order, offset, chunk_size).await {
                Ok(page) => Some((Ok(page.events), page.next_offset)),
                Err(e) => Some((Err(e), None)),
            }
        }
    })
    .filter(|chunk| futures::future::ready(!matches!(chunk, Ok(events) if events.is_empty())))
    .boxed()
}

/// Most recent event matching the filter, if any.
pub async fn latest_matching<S>(
    store: &S,
    filter: EventFilter,
) -> Result<Option<StorageEvent>, HotStoreError>
where
    S: HotEventStore + ?Sized,
{
    let mut chunks = store.scan_matching_newest_first(filter, 1);
    match chunks.next().await {
        Some(Ok(chunk)) => Ok(chunk.into_iter().next()),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}
