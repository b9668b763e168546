//! Shared type definitions for the `EventChain` event log.
//!
//! This crate is the single source of truth for the types that cross crate
//! boundaries: the stored [`Event`], the producer-facing [`NewEvent`], and
//! query filters. Wire-facing types flow to `TypeScript` via `ts-rs` for the
//! dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrapper for event identifiers
//! - [`event`] -- Stored events, append candidates, and the genesis sentinel
//! - [`filter`] -- Raw search parameters and validated store filters

pub mod event;
pub mod filter;
pub mod ids;

// Re-export all public types at crate root for convenience.
pub use event::{Event, GENESIS_HASH, LinkedEvent, NewEvent};
pub use filter::{EventFilter, SearchParams};
pub use ids::EventId;
