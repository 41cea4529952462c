//! PostgreSQL implementation of EventArchive.
//!
//! Rows live in `room_events` (see `migrations/`). Inserts use
//! `ON CONFLICT (id) DO NOTHING`, so re-archiving an event is harmless.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::foundation::{EventId, RoomId, Timestamp, UserId};
use crate::domain::room_event::StorageEvent;
use crate::ports::{ArchiveError, EventArchive};

/// PostgreSQL implementation of the EventArchive port.
pub struct PostgresEventArchive {
    pool: PgPool,
}

impl PostgresEventArchive {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Database row representation of an archived event.
#[derive(Debug, sqlx::FromRow)]
struct RoomEventRow {
    id: Uuid,
    room_id: Uuid,
    event_type: String,
    stateful: bool,
    created_at: DateTime<Utc>,
    created_by_id: Option<Uuid>,
    payload: Option<String>,
}

impl From<RoomEventRow> for StorageEvent {
    fn from(row: RoomEventRow) -> Self {
        Self {
            id: EventId::from_uuid(row.id),
            room_id: RoomId::from_uuid(row.room_id),
            event_type: row.event_type,
            stateful: row.stateful,
            created_at: Timestamp::from_datetime(row.created_at),
            created_by_id: row.created_by_id.map(UserId::from_uuid),
            payload: row.payload,
        }
    }
}

fn db_error(e: sqlx::Error) -> ArchiveError {
    ArchiveError::Database(e.to_string())
}

const SELECT_COLUMNS: &str =
    "SELECT id, room_id, event_type, stateful, created_at, created_by_id, payload FROM room_events";

#[async_trait]
impl EventArchive for PostgresEventArchive {
    async fn store(&self, events: &[StorageEvent]) -> Result<u64, ArchiveError> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut written = 0;

        for event in events {
            let result = sqlx::query(
                r#"
                INSERT INTO room_events
                    (id, room_id, event_type, stateful, created_at, created_by_id, payload)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(event.id.as_uuid())
            .bind(event.room_id.as_uuid())
            .bind(&event.event_type)
            .bind(event.stateful)
            .bind(event.created_at.as_datetime())
            .bind(event.created_by_id.map(|id| *id.as_uuid()))
            .bind(&event.payload)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            written += result.rows_affected();
        }

        tx.commit().await.map_err(db_error)?;
        Ok(written)
    }

    async fn latest(
        &self,
        room_id: &RoomId,
        event_type: &str,
    ) -> Result<Option<StorageEvent>, ArchiveError> {
        let query = format!(
            "{} WHERE room_id = $1 AND event_type = $2 ORDER BY created_at DESC, id DESC LIMIT 1",
            SELECT_COLUMNS
        );
        let row: Option<RoomEventRow> = sqlx::query_as(&query)
            .bind(room_id.as_uuid())
            .bind(event_type)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(row.map(StorageEvent::from))
    }

    async fn room_history(
        &self,
        room_id: &RoomId,
        limit: usize,
    ) -> Result<Vec<StorageEvent>, ArchiveError> {
        let query = format!(
            "{} WHERE room_id = $1 ORDER BY created_at ASC, id ASC LIMIT $2",
            SELECT_COLUMNS
        );
        let rows: Vec<RoomEventRow> = sqlx::query_as(&query)
            .bind(room_id.as_uuid())
            .bind(i64::try_from(limit).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(rows.into_iter().map(StorageEvent::from).collect())
    }
}
