//! Query filters.
//!
//! [`SearchParams`] is the raw, string-typed form sent by a search form or
//! query string. [`EventFilter`] is the validated, typed form the store
//! evaluates. Translation between the two lives in the query engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::event::Event;

/// Raw search parameters as submitted by a caller.
///
/// Every field is optional; empty strings are treated as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "bindings/")]
pub struct SearchParams {
    /// Exact event type to match.
    #[serde(default)]
    #[ts(optional)]
    pub event_type: Option<String>,
    /// Exact source application to match.
    #[serde(default)]
    #[ts(optional)]
    pub source_app_id: Option<String>,
    /// Inclusive lower time bound (RFC 3339, `datetime-local`, or date).
    #[serde(default)]
    #[ts(optional)]
    pub start_date: Option<String>,
    /// Inclusive upper time bound (RFC 3339, `datetime-local`, or date).
    #[serde(default)]
    #[ts(optional)]
    pub end_date: Option<String>,
}

/// A validated conjunctive filter over stored events.
///
/// `None` fields do not constrain the result. Time bounds are inclusive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Exact event type to match.
    pub event_type: Option<String>,
    /// Exact source application to match.
    pub source_app_id: Option<String>,
    /// Inclusive lower time bound.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper time bound.
    pub end_time: Option<DateTime<Utc>>,
}

impl EventFilter {
    /// A filter matching every event.
    pub const fn all() -> Self {
        Self {
            event_type: None,
            source_app_id: None,
            start_time: None,
            end_time: None,
        }
    }

    /// Restrict to one event type.
    #[must_use]
    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Restrict to one source application.
    #[must_use]
    pub fn source_app_id(mut self, source_app_id: impl Into<String>) -> Self {
        self.source_app_id = Some(source_app_id.into());
        self
    }

    /// Restrict to events at or after `start`.
    #[must_use]
    pub const fn start_time(mut self, start: DateTime<Utc>) -> Self {
        self.start_time = Some(start);
        self
    }

    /// Restrict to events at or before `end`.
    #[must_use]
    pub const fn end_time(mut self, end: DateTime<Utc>) -> Self {
        self.end_time = Some(end);
        self
    }

    /// Whether no predicate is set.
    pub const fn is_empty(&self) -> bool {
        self.event_type.is_none()
            && self.source_app_id.is_none()
            && self.start_time.is_none()
            && self.end_time.is_none()
    }

    /// Evaluate the filter against one event.
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref event_type) = self.event_type
            && event.event_type != *event_type
        {
            return false;
        }
        if let Some(ref source) = self.source_app_id
            && event.source_app_id != *source
        {
            return false;
        }
        if let Some(start) = self.start_time
            && event.timestamp < start
        {
            return false;
        }
        if let Some(end) = self.end_time
            && event.timestamp > end
        {
            return false;
        }
        true
    }
}
