//! Durable, ordered event log with consumer-group offsets.
//!
//! Positions are assigned by SQLite and grow monotonically across all
//! topics, so reading one topic by ascending position preserves the order
//! in which its records were appended.

use sqlx::Row;
use tracing::debug;

use crate::error::DbError;
use crate::models::{EventRecord, NewEvent};
use crate::pool::DbPool;

#[derive(Clone)]
pub struct EventLog {
    db: DbPool,
}

impl EventLog {
    pub fn new(db: DbPool) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &DbPool {
        &self.db
    }

    /// Append `events` atomically, in order. Returns the assigned positions.
    pub async fn append(&self, events: &[NewEvent]) -> Result<Vec<i64>, DbError> {
        let mut tx = self.db.pool().begin().await?;
        let mut positions = Vec::with_capacity(events.len());

        for event in events {
            let position: i64 = sqlx::query(
                r#"
                INSERT INTO events (topic, record_key, height, payload)
                VALUES (?, ?, ?, ?)
                RETURNING position
                "#,
            )
            .bind(&event.topic)
            .bind(&event.key)
            .bind(event.height.map(|h| h as i64))
            .bind(&event.payload)
            .fetch_one(&mut *tx)
            .await?
            .get(0);
            positions.push(position);
        }

        tx.commit().await?;
        debug!("Appended {} records to the event log", positions.len());
        Ok(positions)
    }

    /// Read up to `max_records` records of `topic` starting at `from_position`.
    pub async fn poll(
        &self,
        topic: &str,
        from_position: i64,
        max_records: u32,
    ) -> Result<Vec<EventRecord>, DbError> {
        let records = sqlx::query_as::<_, EventRecord>(
            r#"
            SELECT position, topic, record_key, height, payload
            FROM events
            WHERE topic = ? AND position >= ?
            ORDER BY position
            LIMIT ?
            "#,
        )
        .bind(topic)
        .bind(from_position)
        .bind(max_records as i64)
        .fetch_all(self.db.pool())
        .await?;

        Ok(records)
    }

    /// Next position `group` should read from `topic`; 0 when it never committed.
    pub async fn committed_position(&self, group: &str, topic: &str) -> Result<i64, DbError> {
        let position: Option<i64> = sqlx::query_scalar(
            "SELECT next_position FROM consumer_offsets WHERE group_id = ? AND topic = ?",
        )
        .bind(group)
        .bind(topic)
        .fetch_optional(self.db.pool())
        .await?;

        Ok(position.unwrap_or(0))
    }

    /// Highest block height recorded on `topic`, if any.
    pub async fn last_height(&self, topic: &str) -> Result<Option<u64>, DbError> {
        let height: Option<i64> =
            sqlx::query_scalar("SELECT MAX(height) FROM events WHERE topic = ?")
                .bind(topic)
                .fetch_one(self.db.pool())
                .await?;

        Ok(height.map(|h| h as u64))
    }
}
