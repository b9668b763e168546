//! Chain integrity verification.
//!
//! A chain `e0, e1, .., en` (in append order) is intact iff
//!
//! - `e0.previous_hash` is the genesis sentinel,
//! - every `ei.previous_hash` equals `e(i-1).hash`, and
//! - every `ei.hash` equals the digest recomputed from `ei`'s content.
//!
//! Verification reports the first position where any of these fails.
//! [`ChainVerifier`] checks the chain incrementally so a large store can be
//! walked page by page without holding it in memory.

use std::fmt;

use eventchain_types::{Event, EventId, GENESIS_HASH};

use crate::hash;

/// What kind of break was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    /// `previous_hash` does not name the predecessor (or the genesis
    /// sentinel at index 0).
    BrokenLink,
    /// The stored `hash` differs from the recomputed digest.
    HashMismatch,
}

impl fmt::Display for BreakKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenLink => write!(f, "broken link"),
            Self::HashMismatch => write!(f, "hash mismatch"),
        }
    }
}

/// The first position at which a chain fails verification.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chain integrity violated at index {index} (event {event_id}): {kind}")]
pub struct ChainIntegrityError {
    /// Zero-based position in append order.
    pub index: u64,
    /// Identifier of the offending event.
    pub event_id: EventId,
    /// What failed.
    pub kind: BreakKind,
}

/// Summary of a successful verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReport {
    /// Number of events checked.
    pub length: u64,
    /// Hash of the last event, or the genesis sentinel for an empty chain.
    pub tail_hash: String,
}

/// Incremental verifier fed events in append order.
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    expected_previous: String,
    next_index: u64,
}

impl ChainVerifier {
    /// Start verifying from the beginning of the chain.
    pub fn new() -> Self {
        Self::from_anchor(GENESIS_HASH, 0)
    }

    /// Start verifying mid-chain: the first event fed must link to
    /// `anchor_hash` and is reported as position `start_index`.
    pub fn from_anchor(anchor_hash: impl Into<String>, start_index: u64) -> Self {
        Self {
            expected_previous: anchor_hash.into(),
            next_index: start_index,
        }
    }

    /// Check the next event.
    ///
    /// # Errors
    ///
    /// Returns [`ChainIntegrityError`] if `event` breaks the chain. The
    /// verifier state is left unchanged in that case.
    pub fn push(&mut self, event: &Event) -> Result<(), ChainIntegrityError> {
        let kind = if event.previous_hash != self.expected_previous {
            Some(BreakKind::BrokenLink)
        } else if hash::recompute(event) != event.hash {
            Some(BreakKind::HashMismatch)
        } else {
            None
        };

        if let Some(kind) = kind {
            return Err(ChainIntegrityError {
                index: self.next_index,
                event_id: event.id,
                kind,
            });
        }

        self.expected_previous.clone_from(&event.hash);
        self.next_index = self.next_index.saturating_add(1);
        Ok(())
    }

    /// Check a batch of consecutive events.
    ///
    /// # Errors
    ///
    /// Returns the first [`ChainIntegrityError`] in the batch.
    pub fn extend<'a>(
        &mut self,
        events: impl IntoIterator<Item = &'a Event>,
    ) -> Result<(), ChainIntegrityError> {
        for event in events {
            self.push(event)?;
        }
        Ok(())
    }

    /// Number of events checked so far, counting from position 0.
    pub const fn position(&self) -> u64 {
        self.next_index
    }

    /// The hash the next event must link to.
    pub fn expected_previous(&self) -> &str {
        &self.expected_previous
    }

    /// Finish and summarize.
    pub fn finish(self) -> ChainReport {
        ChainReport {
            length: self.next_index,
            tail_hash: self.expected_previous,
        }
    }
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Verify a complete chain given in append order.
///
/// An empty sequence is a valid chain.
///
/// # Errors
///
/// Returns the first [`ChainIntegrityError`].
pub fn verify(events: &[Event]) -> Result<ChainReport, ChainIntegrityError> {
    let mut verifier = ChainVerifier::new();
    verifier.extend(events)?;
    Ok(verifier.finish())
}

/// Verify a chain suffix whose first event must link to `anchor_hash`.
///
/// Reported indices are relative to the start of `events`.
///
/// # Errors
///
/// Returns the first [`ChainIntegrityError`].
pub fn verify_from(anchor_hash: &str, events: &[Event]) -> Result<ChainReport, ChainIntegrityError> {
    let mut verifier = ChainVerifier::from_anchor(anchor_hash, 0);
    verifier.extend(events)?;
    Ok(verifier.finish())
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects,
    clippy::cast_possible_wrap
)]
mod tests {
    use chrono::{TimeZone, Utc};
    use eventchain_types::LinkedEvent;
    use serde_json::json;

    use super::*;

    fn build(len: usize) -> Vec<Event> {
        let mut events = Vec::new();
        let mut previous = GENESIS_HASH.to_owned();
        for i in 0..len {
            let timestamp = Utc.timestamp_opt(1_700_000_000 + i as i64, 0).single().unwrap();
            let data = json!({ "i": i });
            let hash = hash::event_hash("tick", timestamp, "test", &data, &previous);
            let event = LinkedEvent {
                event_type: "tick".to_owned(),
                timestamp,
                source_app_id: "test".to_owned(),
                data,
                hash: hash.clone(),
                previous_hash: previous,
            }
            .into_event(EventId::new());
            previous = hash;
            events.push(event);
        }
        events
    }

    #[test]
    fn empty_chain_is_valid() {
        let report = verify(&[]).unwrap();
        assert_eq!(report.length, 0);
        assert_eq!(report.tail_hash, GENESIS_HASH);
    }

    #[test]
    fn intact_chain_verifies() {
        let events = build(5);
        let report = verify(&events).unwrap();
        assert_eq!(report.length, 5);
        assert_eq!(report.tail_hash, events[4].hash);
    }

    #[test]
    fn tampered_payload_is_reported_at_its_index() {
        let mut events = build(4);
        events[2].data = json!({ "i": 99 });
        let err = verify(&events).unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(err.event_id, events[2].id);
        assert_eq!(err.kind, BreakKind::HashMismatch);
    }

    #[test]
    fn rehashed_tamper_breaks_the_next_link() {
        let mut events = build(4);
        events[1].data = json!({ "i": 42 });
        events[1].hash = hash::recompute(&events[1]);
        let err = verify(&events).unwrap_err();
        assert_eq!(err.index, 2);
        assert_eq!(err.kind, BreakKind::BrokenLink);
    }

    #[test]
    fn bad_genesis_link_is_reported() {
        let mut events = build(2);
        events[0].previous_hash = "ff".to_owned();
        let err = verify(&events).unwrap_err();
        assert_eq!(err.index, 0);
        assert_eq!(err.kind, BreakKind::BrokenLink);
    }

    #[test]
    fn removed_event_is_detected() {
        let mut events = build(3);
        events.remove(1);
        let err = verify(&events).unwrap_err();
        assert_eq!(err.index, 1);
        assert_eq!(err.kind, BreakKind::BrokenLink);
    }

    #[test]
    fn suffix_verifies_against_anchor() {
        let events = build(5);
        let report = verify_from(&events[1].hash, &events[2..]).unwrap();
        assert_eq!(report.length, 3);

        let err = verify_from(&events[0].hash, &events[2..]).unwrap_err();
        assert_eq!(err.index, 0);
    }

    #[test]
    fn incremental_matches_batch() {
        let events = build(6);
        let mut verifier = ChainVerifier::new();
        verifier.extend(&events[..3]).unwrap();
        assert_eq!(verifier.position(), 3);
        verifier.extend(&events[3..]).unwrap();
        assert_eq!(verifier.finish(), verify(&events).unwrap());
    }
}
