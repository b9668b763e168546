//! In-memory event store.
//!
//! Holds the chain in a `Vec` behind a [`RwLock`]: appends take the write
//! lock, every read takes the read lock and sees a consistent snapshot.
//! Nothing survives a restart, so this backend is meant for tests, demos,
//! and embedding.

use std::sync::Arc;

use eventchain_types::{Event, EventFilter, EventId, GENESIS_HASH, LinkedEvent};
use tokio::sync::RwLock;

use crate::error::DbError;

/// Volatile store backed by a vector in append order.
///
/// Cloning yields another handle to the same chain.
#[derive(Debug, Clone, Default)]
pub struct MemoryEventStore {
    events: Arc<RwLock<Vec<Event>>>,
}

impl MemoryEventStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `linked` iff its `previous_hash` still names the current tail.
    pub async fn append(&self, linked: LinkedEvent) -> Result<Event, DbError> {
        let mut events = self.events.write().await;

        let current_tail = events.last().map_or(GENESIS_HASH, |e| e.hash.as_str());
        if linked.previous_hash != current_tail {
            return Err(DbError::TailMismatch {
                previous_hash: linked.previous_hash,
            });
        }

        let event = linked.into_event(EventId::new());
        events.push(event.clone());
        Ok(event)
    }

    /// The most recently appended event.
    pub async fn tail(&self) -> Result<Option<Event>, DbError> {
        Ok(self.events.read().await.last().cloned())
    }

    /// Up to `limit` events, newest append first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Event>, DbError> {
        let events = self.events.read().await;
        Ok(events.iter().rev().take(limit).cloned().collect())
    }

    /// Up to `limit` events matching `filter`, newest timestamp first.
    ///
    /// Events sharing a timestamp are ordered newest append first.
    pub async fn query(&self, filter: &EventFilter, limit: usize) -> Result<Vec<Event>, DbError> {
        let events = self.events.read().await;
        let mut matched: Vec<&Event> = events.iter().rev().filter(|e| filter.matches(e)).collect();
        // Stable sort keeps the reverse-append order among equal timestamps.
        matched.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(matched.into_iter().take(limit).cloned().collect())
    }

    /// Up to `limit` events in append order, skipping the first `offset`.
    pub async fn scan(&self, offset: u64, limit: usize) -> Result<Vec<Event>, DbError> {
        let events = self.events.read().await;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        Ok(events.iter().skip(skip).take(limit).cloned().collect())
    }

    /// Number of stored events.
    pub async fn len(&self) -> Result<u64, DbError> {
        let count = self.events.read().await.len();
        Ok(u64::try_from(count).unwrap_or(u64::MAX))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;

    fn linked(previous_hash: &str, hash: &str, event_type: &str, secs: i64) -> LinkedEvent {
        LinkedEvent {
            event_type: event_type.to_owned(),
            timestamp: Utc.timestamp_opt(secs, 0).single().unwrap(),
            source_app_id: "svc".to_owned(),
            data: serde_json::json!({ "n": secs }),
            hash: hash.to_owned(),
            previous_hash: previous_hash.to_owned(),
        }
    }

    #[tokio::test]
    async fn append_assigns_ids_and_tracks_tail() {
        let store = MemoryEventStore::new();
        assert!(store.tail().await.unwrap().is_none());

        let first = store.append(linked("0", "h1", "a", 1)).await;
        assert!(first.is_ok());
        let second = store.append(linked("h1", "h2", "a", 2)).await;
        assert!(second.is_ok());

        let tail = store.tail().await.ok().flatten();
        assert_eq!(tail.map(|e| e.hash), Some("h2".to_owned()));
        assert_eq!(store.len().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn stale_tail_is_rejected() {
        let store = MemoryEventStore::new();
        assert!(store.append(linked("0", "h1", "a", 1)).await.is_ok());

        let fork = store.append(linked("0", "h-fork", "a", 2)).await;
        assert!(matches!(fork, Err(DbError::TailMismatch { .. })));
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn query_orders_by_timestamp_then_append() {
        let store = MemoryEventStore::new();
        // Appended out of timestamp order on purpose.
        let _ = store.append(linked("0", "h1", "a", 30)).await;
        let _ = store.append(linked("h1", "h2", "b", 10)).await;
        let _ = store.append(linked("h2", "h3", "a", 20)).await;
        let _ = store.append(linked("h3", "h4", "a", 20)).await;

        let all = store.query(&EventFilter::all(), 10).await.unwrap();
        let hashes: Vec<&str> = all.iter().map(|e| e.hash.as_str()).collect();
        assert_eq!(hashes, ["h1", "h4", "h3", "h2"]);

        let only_a = store
            .query(&EventFilter::all().event_type("a"), 2)
            .await
            .unwrap();
        let hashes: Vec<&str> = only_a.iter().map(|e| e.hash.as_str()).collect();
        assert_eq!(hashes, ["h1", "h4"]);
    }

    #[tokio::test]
    async fn recent_and_scan_follow_append_order() {
        let store = MemoryEventStore::new();
        let _ = store.append(linked("0", "h1", "a", 3)).await;
        let _ = store.append(linked("h1", "h2", "a", 2)).await;
        let _ = store.append(linked("h2", "h3", "a", 1)).await;

        let recent = store.recent(2).await.unwrap();
        let hashes: Vec<&str> = recent.iter().map(|e| e.hash.as_str()).collect();
        assert_eq!(hashes, ["h3", "h2"]);

        let page = store.scan(1, 5).await.unwrap();
        let hashes: Vec<&str> = page.iter().map(|e| e.hash.as_str()).collect();
        assert_eq!(hashes, ["h2", "h3"]);

        assert!(store.scan(10, 5).await.unwrap().is_empty());
    }
}
