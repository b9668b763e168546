//! The chain builder: the single entry point for appending and reading.
//!
//! [`EventChain`] owns the append critical section. Within it, and only
//! within it, the current tail is read, the new event is linked and hashed,
//! the store persists it, and the live feed is notified. Appends are
//! therefore totally ordered, and the feed delivers events in chain order.
//!
//! Reads (`tail`, `recent`, `query`, `verify_store`) never take the append
//! lock and run concurrently with appends.
//!
//! # Append flow
//!
//! ```text
//! NewEvent
//!   |-- validate (outside the lock; a rejection has no side effects)
//!   |
//!   +-- lock ----------------------------------------------+
//!   |   resolve timestamp (caller's, or Clock::now)        |
//!   |   tail := store.tail()  (None -> "0")                |
//!   |   hash := H(content, tail.hash)                      |
//!   |   store.append(linked)  (rejects a stale tail)       |
//!   |   feed.publish(event)   (non-blocking)               |
//!   +------------------------------------------------------+
//!   v
//! Event
//! ```

use std::sync::Arc;

use eventchain_db::{EventStore, PostgresPool};
use eventchain_types::{Event, EventFilter, GENESIS_HASH, LinkedEvent, NewEvent, SearchParams};
use tokio::sync::Mutex;

use crate::clock::{Clock, SystemClock};
use crate::config::{ChainConfig, LimitsConfig, StoreBackend};
use crate::error::{ChainError, ValidationError};
use crate::feed::{LiveFeed, Subscription};
use crate::hash;
use crate::query;
use crate::verify::{ChainReport, ChainVerifier};

/// Events fetched per page during full-store verification.
const VERIFY_PAGE_SIZE: usize = 500;

/// A point-in-time summary of the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStatus {
    /// Storage backend name.
    pub backend: &'static str,
    /// Number of stored events.
    pub length: u64,
    /// Hash of the tail, or the genesis sentinel for an empty chain.
    pub tail_hash: String,
    /// Connected live feed subscribers.
    pub subscribers: usize,
}

/// A hash-chained, append-only event log.
pub struct EventChain {
    store: EventStore,
    feed: LiveFeed,
    clock: Arc<dyn Clock>,
    limits: LimitsConfig,
    append_lock: Mutex<()>,
}

impl EventChain {
    /// Build a chain over an existing store.
    pub fn new(store: EventStore, config: &ChainConfig) -> Self {
        Self {
            store,
            feed: LiveFeed::new(config.feed.buffer_capacity, config.feed.overrun_policy),
            clock: Arc::new(SystemClock),
            limits: config.limits.clone(),
            append_lock: Mutex::new(()),
        }
    }

    /// Replace the time source used for events submitted without a
    /// timestamp.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Open the store named by `config` and build a chain over it.
    ///
    /// For `PostgreSQL` this connects (with retry) and applies pending
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::StorageUnavailable`] if the database cannot be
    /// reached, or [`ChainError::Storage`] if migrations fail.
    pub async fn open(config: &ChainConfig) -> Result<Self, ChainError> {
        let store = match config.store.backend {
            StoreBackend::Memory => EventStore::memory(),
            StoreBackend::Postgres => {
                let pool = PostgresPool::connect(&config.store.postgres()).await?;
                pool.run_migrations().await?;
                EventStore::postgres(&pool)
            }
        };
        tracing::info!(backend = store.backend_name(), "Event chain opened");
        Ok(Self::new(store, config))
    }

    /// The underlying store.
    pub const fn store(&self) -> &EventStore {
        &self.store
    }

    /// The live feed.
    pub const fn feed(&self) -> &LiveFeed {
        &self.feed
    }

    /// Validate, link, hash, persist, and publish one event.
    ///
    /// On success the returned event is the tail of the chain as of this
    /// append and has been queued for every live subscriber.
    ///
    /// # Errors
    ///
    /// - [`ChainError::Validation`] if the candidate is malformed.
    /// - [`ChainError::StorageUnavailable`] if the store did not acknowledge
    ///   the write.
    /// - [`ChainError::Conflict`] if another writer moved the tail.
    ///
    /// In every error case nothing was stored and nothing was published.
    pub async fn append(&self, candidate: NewEvent) -> Result<Event, ChainError> {
        self.validate(&candidate)?;
        let NewEvent {
            event_type,
            source_app_id,
            data,
            timestamp,
        } = candidate;
        let data = hash::normalize_payload(data.unwrap_or_default());

        let _guard = self.append_lock.lock().await;

        let timestamp = hash::normalize_timestamp(timestamp.unwrap_or_else(|| self.clock.now()));
        let previous_hash = self
            .store
            .tail()
            .await?
            .map_or_else(|| GENESIS_HASH.to_owned(), |tail| tail.hash);
        let hash = hash::event_hash(&event_type, timestamp, &source_app_id, &data, &previous_hash);

        let event = self
            .store
            .append(LinkedEvent {
                event_type,
                timestamp,
                source_app_id,
                data,
                hash,
                previous_hash,
            })
            .await
            .inspect_err(|e| {
                tracing::warn!(error = %e, "Append failed, chain tail unchanged");
            })?;

        let delivered = self.feed.publish(&event);
        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            previous_hash = %event.previous_hash,
            subscribers = delivered,
            "Appended event"
        );

        Ok(event)
    }

    /// Subscribe to events appended from now on.
    pub fn subscribe(&self) -> Subscription {
        self.feed.subscribe()
    }

    /// The most recently appended event, or `None` for an empty chain.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the store read fails.
    pub async fn tail(&self) -> Result<Option<Event>, ChainError> {
        Ok(self.store.tail().await?)
    }

    /// The newest events by append order, newest first.
    ///
    /// `limit` defaults to, and is capped at, the configured recent limit.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if the store read fails.
    pub async fn recent(&self, limit: Option<usize>) -> Result<Vec<Event>, ChainError> {
        let cap = self.limits.recent_limit;
        let limit = limit.map_or(cap, |n| n.min(cap));
        Ok(self.store.recent(limit).await?)
    }

    /// Events matching every predicate of `filter`, newest timestamp first,
    /// capped at the configured query limit.
    ///
    /// # Errors
    ///
    /// - [`ChainError::Validation`] if the time range is inverted.
    /// - [`ChainError::QueryTimeout`] if the store did not answer in time.
    pub async fn query(&self, filter: &EventFilter) -> Result<Vec<Event>, ChainError> {
        query::check_range(filter)?;

        let timeout = self.limits.query_timeout();
        let events = tokio::time::timeout(timeout, self.store.query(filter, self.limits.query_limit))
            .await
            .map_err(|elapsed| {
                tracing::warn!(error = %elapsed, "Query deadline elapsed");
                ChainError::QueryTimeout {
                    timeout_ms: self.limits.query_timeout_ms,
                }
            })??;

        Ok(events)
    }

    /// Parse raw search parameters and run the resulting query.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Validation`] for unparseable dates or an
    /// inverted range, otherwise as [`EventChain::query`].
    pub async fn search(&self, params: &SearchParams) -> Result<Vec<Event>, ChainError> {
        let filter = query::parse_search(params)?;
        self.query(&filter).await
    }

    /// Verify the whole stored chain, oldest first.
    ///
    /// Events appended while verification runs are included if they are
    /// reached before the scan ends.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError::Integrity`] naming the first break, or a store
    /// error if a page cannot be read.
    pub async fn verify_store(&self) -> Result<ChainReport, ChainError> {
        let mut verifier = ChainVerifier::new();
        loop {
            let page = self.store.scan(verifier.position(), VERIFY_PAGE_SIZE).await?;
            verifier.extend(&page).inspect_err(|e| {
                tracing::warn!(
                    index = e.index,
                    event_id = %e.event_id,
                    kind = %e.kind,
                    "Chain integrity violated"
                );
            })?;
            if page.len() < VERIFY_PAGE_SIZE {
                break;
            }
        }

        let report = verifier.finish();
        tracing::info!(length = report.length, tail_hash = %report.tail_hash, "Chain verified");
        Ok(report)
    }

    /// Summarize the chain. The fields are read separately and may straddle
    /// a concurrent append.
    ///
    /// # Errors
    ///
    /// Returns [`ChainError`] if a store read fails.
    pub async fn status(&self) -> Result<ChainStatus, ChainError> {
        let length = self.store.len().await?;
        let tail_hash = self
            .store
            .tail()
            .await?
            .map_or_else(|| GENESIS_HASH.to_owned(), |tail| tail.hash);

        Ok(ChainStatus {
            backend: self.store.backend_name(),
            length,
            tail_hash,
            subscribers: self.feed.subscriber_count(),
        })
    }

    /// Close the store. Live subscriptions keep working until the chain is
    /// dropped.
    pub async fn close(&self) {
        self.store.close().await;
        tracing::info!(backend = self.store.backend_name(), "Event chain closed");
    }

    fn validate(&self, candidate: &NewEvent) -> Result<(), ValidationError> {
        if candidate.event_type.trim().is_empty() {
            return Err(ValidationError::EmptyEventType);
        }
        if candidate.source_app_id.trim().is_empty() {
            return Err(ValidationError::EmptySourceAppId);
        }
        if candidate.data.as_ref().is_none_or(serde_json::Value::is_null) {
            return Err(ValidationError::MissingData);
        }

        let max = self.limits.max_tag_length;
        for (field, value) in [
            ("eventType", &candidate.event_type),
            ("sourceAppId", &candidate.source_app_id),
        ] {
            if value.len() > max {
                return Err(ValidationError::FieldTooLong {
                    field,
                    max,
                    len: value.len(),
                });
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for EventChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventChain")
            .field("backend", &self.store.backend_name())
            .field("limits", &self.limits)
            .field("subscribers", &self.feed.subscriber_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn chain() -> EventChain {
        EventChain::new(EventStore::memory(), &ChainConfig::default())
    }

    #[tokio::test]
    async fn whitespace_tags_are_rejected() {
        let chain = chain();
        let err = chain
            .append(NewEvent::new("  ", "svc", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Validation(ValidationError::EmptyEventType)));

        let err = chain
            .append(NewEvent::new("t", "\t", json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Validation(ValidationError::EmptySourceAppId)));
    }

    #[tokio::test]
    async fn null_data_is_missing() {
        let chain = chain();
        let err = chain
            .append(NewEvent::new("t", "svc", serde_json::Value::Null))
            .await
            .unwrap_err();
        assert!(matches!(err, ChainError::Validation(ValidationError::MissingData)));
        assert!(chain.tail().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overlong_tag_is_rejected() {
        let chain = chain();
        let long = "x".repeat(257);
        let err = chain
            .append(NewEvent::new("t", long, json!({})))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ChainError::Validation(ValidationError::FieldTooLong { field: "sourceAppId", .. })
        ));
    }

    #[tokio::test]
    async fn recent_limit_is_capped() {
        let chain = chain();
        for i in 0..60 {
            chain
                .append(NewEvent::new("t", "svc", json!({ "i": i })))
                .await
                .unwrap();
        }
        assert_eq!(chain.recent(None).await.unwrap().len(), 50);
        assert_eq!(chain.recent(Some(500)).await.unwrap().len(), 50);
        assert_eq!(chain.recent(Some(3)).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn status_reflects_the_tail() {
        let chain = chain();
        let empty = chain.status().await.unwrap();
        assert_eq!(empty.length, 0);
        assert_eq!(empty.tail_hash, GENESIS_HASH);

        let event = chain.append(NewEvent::new("t", "svc", json!(1))).await.unwrap();
        let _sub = chain.subscribe();
        let status = chain.status().await.unwrap();
        assert_eq!(status.backend, "memory");
        assert_eq!(status.length, 1);
        assert_eq!(status.tail_hash, event.hash);
        assert_eq!(status.subscribers, 1);
    }
}
