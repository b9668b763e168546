//! Chain building, verification, live feed, and queries for `EventChain`.
//!
//! This crate turns a storage backend into a hash-chained, append-only
//! event log. Every event carries the hash of its predecessor, so any
//! modification, removal, or reordering of stored events is detected by
//! recomputing the chain.
//!
//! # Modules
//!
//! - [`chain`] -- [`EventChain`], the append critical section and read API.
//! - [`clock`] -- [`Clock`] trait with system and fixed implementations.
//! - [`config`] -- Configuration loading from `eventchain-config.yaml` into
//!   strongly-typed structs.
//! - [`error`] -- [`ChainError`] and [`ValidationError`].
//! - [`feed`] -- [`LiveFeed`] fan-out to bounded per-subscriber channels.
//! - [`hash`] -- Canonical serialization and SHA-256 event digests.
//! - [`query`] -- Search parameter parsing into an [`EventFilter`].
//! - [`verify`] -- Full and incremental chain verification.
//!
//! [`EventFilter`]: eventchain_types::EventFilter

pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod feed;
pub mod hash;
pub mod query;
pub mod verify;

pub use chain::{ChainStatus, EventChain};
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ChainConfig, ConfigError, LogFormat, StoreBackend};
pub use error::{ChainError, ValidationError};
pub use feed::{LiveFeed, MAX_BUFFER_CAPACITY, OverrunPolicy, SubscriberOverrun, Subscription};
pub use verify::{BreakKind, ChainIntegrityError, ChainReport, ChainVerifier, verify, verify_from};
