//! Data layer for the `EventChain` event log.
//!
//! The store owns the chain tail: it is the only place the "current tail"
//! lives, and every append is checked against it. Two backends share one
//! contract through the [`EventStore`] enum.
//!
//! # Architecture
//!
//! ```text
//! Chain builder
//!     |
//!     +-- append(LinkedEvent) ---> EventStore
//!                                     |-- MemoryEventStore   (RwLock<Vec<Event>>)
//!                                     +-- PostgresEventStore (chain_events table)
//! ```
//!
//! # Modules
//!
//! - [`event_store`] -- Backend-agnostic [`EventStore`] dispatch
//! - [`memory`] -- Volatile in-process backend
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`postgres_store`] -- `PostgreSQL` backend over the `chain_events` table
//! - [`error`] -- Shared error types

pub mod error;
pub mod event_store;
pub mod memory;
pub mod postgres;
pub mod postgres_store;

// Re-export primary types for convenience.
pub use error::DbError;
pub use event_store::EventStore;
pub use memory::MemoryEventStore;
pub use postgres::{PostgresConfig, PostgresPool};
pub use postgres_store::{EventRow, PostgresEventStore};
