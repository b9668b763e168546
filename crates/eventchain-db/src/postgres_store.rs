//! `PostgreSQL`-backed event store.
//!
//! Events live in the `chain_events` table. The `seq` column (a `BIGSERIAL`)
//! is the definitive append order; `event_time` is only used to sort query
//! results.
//!
//! # Append protocol
//!
//! Each append runs in one transaction that:
//!
//! 1. takes a transaction-scoped advisory lock, so writers from any process
//!    are serialized,
//! 2. re-reads the tail and rejects the event with [`DbError::TailMismatch`]
//!    if it was linked against a stale tail,
//! 3. inserts the row and returns it as stored.
//!
//! The `UNIQUE` constraint on `previous_hash` rejects a fork even if the
//! advisory lock is bypassed.

use chrono::{DateTime, Utc};
use eventchain_types::{Event, EventFilter, EventId, GENESIS_HASH, LinkedEvent};
use uuid::Uuid;

use crate::error::DbError;
use crate::postgres::PostgresPool;

/// Advisory lock key guarding the append critical section.
const APPEND_LOCK_KEY: i64 = 0x6576_656e_7463_6861;

/// Columns selected for every event read, in [`EventRow`] order.
const EVENT_COLUMNS: &str =
    "id, event_type, event_time, source_app_id, data, hash, previous_hash";

/// Operations on the `chain_events` table.
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PostgresPool,
}

impl PostgresEventStore {
    /// Create a store bound to a connection pool.
    pub fn new(pool: &PostgresPool) -> Self {
        Self { pool: pool.clone() }
    }

    /// Close the underlying connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Append `linked` iff its `previous_hash` still names the current tail.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TailMismatch`] on a stale tail and
    /// [`DbError::Unavailable`] if the database cannot be reached.
    pub async fn append(&self, linked: LinkedEvent) -> Result<Event, DbError> {
        let mut tx = self.pool.pool().begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(APPEND_LOCK_KEY)
            .execute(&mut *tx)
            .await?;

        let current_tail: Option<String> =
            sqlx::query_scalar("SELECT hash FROM chain_events ORDER BY seq DESC LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;

        let expected = current_tail.as_deref().unwrap_or(GENESIS_HASH);
        if linked.previous_hash != expected {
            tx.rollback().await?;
            return Err(DbError::TailMismatch {
                previous_hash: linked.previous_hash,
            });
        }

        let id = EventId::new();
        let inserted = sqlx::query_as::<_, EventRow>(&format!(
            r"INSERT INTO chain_events (id, event_type, event_time, source_app_id, data, hash, previous_hash)
              VALUES ($1, $2, $3, $4, $5, $6, $7)
              RETURNING {EVENT_COLUMNS}"
        ))
        .bind(id.into_inner())
        .bind(&linked.event_type)
        .bind(linked.timestamp)
        .bind(&linked.source_app_id)
        .bind(&linked.data)
        .bind(&linked.hash)
        .bind(&linked.previous_hash)
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(sqlx::Error::Database(ref db_err)) if db_err.is_unique_violation() => {
                return Err(DbError::TailMismatch {
                    previous_hash: linked.previous_hash,
                });
            }
            Err(e) => return Err(e.into()),
        };

        tx.commit().await?;

        tracing::debug!(event_id = %id, "Inserted chain event");
        // The stored row, not `linked`: the store may rewrite the payload text.
        Ok(row.into_event())
    }

    /// The most recently appended event.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn tail(&self) -> Result<Option<Event>, DbError> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM chain_events ORDER BY seq DESC LIMIT 1"
        ))
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(row.map(EventRow::into_event))
    }

    /// Up to `limit` events, newest append first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Event>, DbError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM chain_events ORDER BY seq DESC LIMIT $1"
        ))
        .bind(to_i64(limit))
        .fetch_all(self.pool.pool())
        .await?;

        Ok(rows.into_iter().map(EventRow::into_event).collect())
    }

    /// Up to `limit` events matching `filter`, newest timestamp first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn query(&self, filter: &EventFilter, limit: usize) -> Result<Vec<Event>, DbError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r"SELECT {EVENT_COLUMNS} FROM chain_events
              WHERE ($1::TEXT IS NULL OR event_type = $1)
                AND ($2::TEXT IS NULL OR source_app_id = $2)
                AND ($3::TIMESTAMPTZ IS NULL OR event_time >= $3)
                AND ($4::TIMESTAMPTZ IS NULL OR event_time <= $4)
              ORDER BY event_time DESC, seq DESC
              LIMIT $5"
        ))
        .bind(filter.event_type.as_deref())
        .bind(filter.source_app_id.as_deref())
        .bind(filter.start_time)
        .bind(filter.end_time)
        .bind(to_i64(limit))
        .fetch_all(self.pool.pool())
        .await?;

        Ok(rows.into_iter().map(EventRow::into_event).collect())
    }

    /// Up to `limit` events in append order, skipping the first `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn scan(&self, offset: u64, limit: usize) -> Result<Vec<Event>, DbError> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM chain_events ORDER BY seq ASC OFFSET $1 LIMIT $2"
        ))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .bind(to_i64(limit))
        .fetch_all(self.pool.pool())
        .await?;

        Ok(rows.into_iter().map(EventRow::into_event).collect())
    }

    /// Number of stored events.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the query fails.
    pub async fn len(&self) -> Result<u64, DbError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chain_events")
            .fetch_one(self.pool.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }
}

/// A row from the `chain_events` table.
///
/// Uses runtime types rather than compile-time checked types to
/// avoid requiring a live database during builds.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Store-assigned identifier.
    pub id: Uuid,
    /// Event type tag.
    pub event_type: String,
    /// Resolved event time.
    pub event_time: DateTime<Utc>,
    /// Producing application.
    pub source_app_id: String,
    /// Opaque payload.
    pub data: serde_json::Value,
    /// Stored digest.
    pub hash: String,
    /// Digest of the predecessor, or the genesis sentinel.
    pub previous_hash: String,
}

impl EventRow {
    /// Convert the row into the shared [`Event`] type.
    pub fn into_event(self) -> Event {
        Event {
            id: EventId::from(self.id),
            event_type: self.event_type,
            timestamp: self.event_time,
            source_app_id: self.source_app_id,
            data: self.data,
            hash: self.hash,
            previous_hash: self.previous_hash,
        }
    }
}

/// Clamp a row count into a `BIGINT` bind parameter.
fn to_i64(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}
