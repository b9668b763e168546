//! Event records and append candidates.
//!
//! An [`Event`] is the only entity in the log. Producers submit a
//! [`NewEvent`]; the chain builder resolves its timestamp and links it to the
//! current tail, producing a [`LinkedEvent`]; the store assigns the
//! [`EventId`] and returns the stored [`Event`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::EventId;

/// `previousHash` value of the genesis event.
pub const GENESIS_HASH: &str = "0";

/// A stored, hash-stamped event.
///
/// Field names serialize in camel case to match the wire format consumed by
/// the dashboard (`eventType`, `sourceAppId`, `previousHash`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct Event {
    /// Store-assigned identifier.
    pub id: EventId,
    /// Short tag describing what happened (e.g. `user.login`).
    pub event_type: String,
    /// Resolved event time, millisecond resolution.
    pub timestamp: DateTime<Utc>,
    /// Identifier of the producing application.
    pub source_app_id: String,
    /// Opaque structured payload.
    pub data: serde_json::Value,
    /// Digest over the linkable fields and `previous_hash`.
    pub hash: String,
    /// Hash of the tail at append time, or [`GENESIS_HASH`].
    pub previous_hash: String,
}

impl Event {
    /// Whether this event is the first link of the chain.
    pub fn is_genesis(&self) -> bool {
        self.previous_hash == GENESIS_HASH
    }
}

/// Content submitted by a producer for appending.
///
/// Missing string fields deserialize as empty and `data` as `None` so that
/// the chain builder, not the transport, reports the validation failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct NewEvent {
    /// Short tag describing what happened. Required, non-empty.
    #[serde(default)]
    pub event_type: String,
    /// Identifier of the producing application. Required, non-empty.
    #[serde(default)]
    pub source_app_id: String,
    /// Opaque payload. Required; JSON `null` counts as absent.
    #[serde(default)]
    #[ts(optional)]
    pub data: Option<serde_json::Value>,
    /// Caller-supplied event time. Append time is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[ts(optional)]
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewEvent {
    /// Build a candidate with the three required fields.
    pub fn new(
        event_type: impl Into<String>,
        source_app_id: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            source_app_id: source_app_id.into(),
            data: Some(data),
            timestamp: None,
        }
    }

    /// Set an explicit event time.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// A fully linked event that has not yet been assigned an id.
///
/// Produced by the chain builder inside its append critical section and
/// handed to the store, which persists it and returns the [`Event`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedEvent {
    /// Short tag describing what happened.
    pub event_type: String,
    /// Resolved event time.
    pub timestamp: DateTime<Utc>,
    /// Identifier of the producing application.
    pub source_app_id: String,
    /// Opaque structured payload.
    pub data: serde_json::Value,
    /// Digest over the linkable fields and `previous_hash`.
    pub hash: String,
    /// Hash of the tail this event was linked against.
    pub previous_hash: String,
}

impl LinkedEvent {
    /// Attach the store-assigned identifier.
    pub fn into_event(self, id: EventId) -> Event {
        Event {
            id,
            event_type: self.event_type,
            timestamp: self.timestamp,
            source_app_id: self.source_app_id,
            data: self.data,
            hash: self.hash,
            previous_hash: self.previous_hash,
        }
    }
}
