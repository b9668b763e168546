//! The event store: durable, ordered persistence of chain events.
//!
//! [`EventStore`] uses enum dispatch instead of trait objects because async
//! methods are not dyn-compatible. Both backends offer the same contract:
//!
//! - `append` persists a [`LinkedEvent`] iff it was linked against the
//!   current tail, assigns its id, and returns the stored [`Event`].
//! - `tail`, `recent`, `query`, `scan` and `len` are read-only and run
//!   concurrently with each other against a consistent snapshot.

use eventchain_types::{Event, EventFilter, LinkedEvent};

use crate::error::DbError;
use crate::memory::MemoryEventStore;
use crate::postgres::PostgresPool;
use crate::postgres_store::PostgresEventStore;

/// A store backend holding the authoritative chain.
#[derive(Clone)]
pub enum EventStore {
    /// Volatile in-process store.
    Memory(MemoryEventStore),
    /// Durable `PostgreSQL` store.
    Postgres(PostgresEventStore),
}

impl EventStore {
    /// Create an empty in-memory store.
    pub fn memory() -> Self {
        Self::Memory(MemoryEventStore::new())
    }

    /// Create a store over an established `PostgreSQL` pool.
    pub fn postgres(pool: &PostgresPool) -> Self {
        Self::Postgres(PostgresEventStore::new(pool))
    }

    /// Human-readable backend name for logging.
    pub const fn backend_name(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            Self::Postgres(_) => "postgres",
        }
    }

    /// Durably append `linked`, assigning its id.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::TailMismatch`] if the tail moved since `linked`
    /// was built, or [`DbError::Unavailable`] if the backend is down.
    pub async fn append(&self, linked: LinkedEvent) -> Result<Event, DbError> {
        match self {
            Self::Memory(store) => store.append(linked).await,
            Self::Postgres(store) => store.append(linked).await,
        }
    }

    /// The most recently appended event, or `None` for an empty chain.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend read fails.
    pub async fn tail(&self) -> Result<Option<Event>, DbError> {
        match self {
            Self::Memory(store) => store.tail().await,
            Self::Postgres(store) => store.tail().await,
        }
    }

    /// Up to `limit` events, newest append first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend read fails.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Event>, DbError> {
        match self {
            Self::Memory(store) => store.recent(limit).await,
            Self::Postgres(store) => store.recent(limit).await,
        }
    }

    /// Up to `limit` events matching every predicate of `filter`, newest
    /// timestamp first.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend read fails.
    pub async fn query(&self, filter: &EventFilter, limit: usize) -> Result<Vec<Event>, DbError> {
        match self {
            Self::Memory(store) => store.query(filter, limit).await,
            Self::Postgres(store) => store.query(filter, limit).await,
        }
    }

    /// Up to `limit` events in append order (oldest first), skipping the
    /// first `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend read fails.
    pub async fn scan(&self, offset: u64, limit: usize) -> Result<Vec<Event>, DbError> {
        match self {
            Self::Memory(store) => store.scan(offset, limit).await,
            Self::Postgres(store) => store.scan(offset, limit).await,
        }
    }

    /// Number of stored events.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the backend read fails.
    pub async fn len(&self) -> Result<u64, DbError> {
        match self {
            Self::Memory(store) => store.len().await,
            Self::Postgres(store) => store.len().await,
        }
    }

    /// Release backend resources. The memory backend has none.
    pub async fn close(&self) {
        if let Self::Postgres(store) = self {
            store.close().await;
        }
    }
}

impl From<MemoryEventStore> for EventStore {
    fn from(store: MemoryEventStore) -> Self {
        Self::Memory(store)
    }
}

impl From<PostgresEventStore> for EventStore {
    fn from(store: PostgresEventStore) -> Self {
        Self::Postgres(store)
    }
}
