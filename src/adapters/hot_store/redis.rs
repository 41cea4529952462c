//! Redis-backed hot event store for multi-server deployments.
//!
//! ## Key layout
//!
//! | Key | Type | Contents |
//! |-----|------|----------|
//! | `{prefix}:events` | hash | event id → JSON [`RedisEventRecord`] |
//! | `{prefix}:index` | sorted set | every event id, scored by `CreatedAt` µs |
//! | `{prefix}:room:{room_id}` | sorted set | a room's event ids, same score |
//!
//! Filters compile to a sorted-set choice plus an exclusive score range;
//! type and stateful checks run on the decoded records, so pages can come
//! back short.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{EventId, RoomId, Timestamp, UserId};
use crate::domain::room_event::StorageEvent;
use crate::ports::{EventFilter, HotEventStore, HotStoreError, ScanOrder, ScanPage};

/// Record stored in the events hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedisEventRecord {
    pub id: EventId,
    pub room_id: RoomId,
    pub event_type: String,
    pub stateful: bool,
    pub created_at_micros: i64,
    pub created_by_id: Option<UserId>,
    pub payload: Option<String>,
}

impl From<&StorageEvent> for RedisEventRecord {
    fn from(event: &StorageEvent) -> Self {
        Self {
            id: event.id,
            room_id: event.room_id,
            event_type: event.event_type.clone(),
            stateful: event.stateful,
            created_at_micros: event.created_at.as_unix_micros(),
            created_by_id: event.created_by_id,
            payload: event.payload.clone(),
        }
    }
}

impl From<RedisEventRecord> for StorageEvent {
    fn from(record: RedisEventRecord) -> Self {
        Self {
            id: record.id,
            room_id: record.room_id,
            event_type: record.event_type,
            stateful: record.stateful,
            created_at: Timestamp::from_unix_micros(record.created_at_micros),
            created_by_id: record.created_by_id,
            payload: record.payload,
        }
    }
}

/// Key names under a common prefix.
#[derive(Debug, Clone)]
struct Keys {
    prefix: String,
}

impl Keys {
    fn events(&self) -> String {
        format!("{}:events", self.prefix)
    }

    fn index(&self) -> String {
        format!("{}:index", self.prefix)
    }

    fn room(&self, room_id: &RoomId) -> String {
        format!("{}:room:{}", self.prefix, room_id)
    }

    fn for_filter(&self, filter: &EventFilter) -> String {
        match &filter.room_id {
            Some(room_id) => self.room(room_id),
            None => self.index(),
        }
    }
}

/// Exclusive score bounds for a filter, as Redis range arguments.
fn score_range(filter: &EventFilter) -> (String, String) {
    let min = filter
        .created_after
        .map(|ts| format!("({}", ts.as_unix_micros()))
        .unwrap_or_else(|| "-inf".to_string());
    let max = filter
        .created_before
        .map(|ts| format!("({}", ts.as_unix_micros()))
        .unwrap_or_else(|| "+inf".to_string());
    (min, max)
}

fn unavailable(e: redis::RedisError) -> HotStoreError {
    HotStoreError::Unavailable(e.to_string())
}

/// Hot store on a shared Redis connection.
///
/// The [`ConnectionManager`] reconnects after a dropped connection; the
/// command that saw the drop fails, later ones go through.
#[derive(Clone)]
pub struct RedisHotEventStore {
    conn: ConnectionManager,
    keys: Keys,
}

impl RedisHotEventStore {
    /// Create a store using keys under `key_prefix`.
    pub fn new(conn: ConnectionManager, key_prefix: impl Into<String>) -> Self {
        Self {
            conn,
            keys: Keys {
                prefix: key_prefix.into(),
            },
        }
    }

    async fn load_records(
        &self,
        ids: &[String],
    ) -> Result<Vec<RedisEventRecord>, HotStoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let raw: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(self.keys.events())
            .arg(ids)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        let mut records = Vec::with_capacity(raw.len());
        for json in raw.into_iter().flatten() {
            match serde_json::from_str::<RedisEventRecord>(&json) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping undecodable hot store record");
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl HotEventStore for RedisHotEventStore {
    async fn add(&self, event: StorageEvent) -> Result<(), HotStoreError> {
        let record = RedisEventRecord::from(&event);
        let json = serde_json::to_string(&record)
            .map_err(|e| HotStoreError::Serialization(e.to_string()))?;
        let id = event.id.to_string();
        let score = record.created_at_micros;

        let mut conn = self.conn.clone();
        let () = redis::pipe()
            .atomic()
            .hset(self.keys.events(), &id, json)
            .ignore()
            .zadd(self.keys.index(), &id, score)
            .ignore()
            .zadd(self.keys.room(&event.room_id), &id, score)
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;
        Ok(())
    }

    async fn fetch_page(
        &self,
        filter: &EventFilter,
        order: ScanOrder,
        offset: usize,
        limit: usize,
    ) -> Result<ScanPage, HotStoreError> {
        let key = self.keys.for_filter(filter);
        let (min, max) = score_range(filter);
        let mut conn = self.conn.clone();

        let ids: Vec<String> = match order {
            ScanOrder::OldestFirst => conn
                .zrangebyscore_limit(&key, &min, &max, offset as isize, limit as isize)
                .await
                .map_err(unavailable)?,
            ScanOrder::NewestFirst => conn
                .zrevrangebyscore_limit(&key, &max, &min, offset as isize, limit as isize)
                .await
                .map_err(unavailable)?,
        };

        let next_offset = (ids.len() == limit).then_some(offset + limit);
        let events = self
            .load_records(&ids)
            .await?
            .into_iter()
            .map(StorageEvent::from)
            .filter(|event| filter.matches(event))
            .collect();

        Ok(ScanPage { events, next_offset })
    }

    async fn delete(&self, ids: &[EventId]) -> Result<u64, HotStoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
        let records = self.load_records(&ids).await?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hdel(self.keys.events(), &ids)
            .zrem(self.keys.index(), &ids)
            .ignore();
        for record in &records {
            pipe.zrem(self.keys.room(&record.room_id), record.id.to_string())
                .ignore();
        }

        let mut conn = self.conn.clone();
        let (removed,): (u64,) = pipe.query_async(&mut conn).await.map_err(unavailable)?;
        Ok(removed)
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
