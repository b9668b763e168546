//! Error types for chain operations.
//!
//! Every failure a caller can see is a [`ChainError`]. Validation failures
//! are raised before the append critical section is entered, so a rejected
//! event never touches the store, the tail, or the live feed.

use eventchain_db::DbError;

use crate::verify::ChainIntegrityError;

/// Reasons an append candidate or a search request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// `eventType` is missing, empty, or whitespace only.
    #[error("eventType is required")]
    EmptyEventType,

    /// `sourceAppId` is missing, empty, or whitespace only.
    #[error("sourceAppId is required")]
    EmptySourceAppId,

    /// `data` is missing or JSON `null`.
    #[error("data is required")]
    MissingData,

    /// A tag field exceeds the configured maximum length.
    #[error("{field} exceeds {max} bytes (got {len})")]
    FieldTooLong {
        /// Wire name of the offending field.
        field: &'static str,
        /// Configured maximum in bytes.
        max: usize,
        /// Actual length in bytes.
        len: usize,
    },

    /// A date bound could not be parsed.
    #[error("{field} is not a valid date: {value:?}")]
    InvalidTimestamp {
        /// Wire name of the offending field.
        field: &'static str,
        /// The rejected input.
        value: String,
    },

    /// `startDate` is after `endDate`.
    #[error("startDate is after endDate")]
    InvertedRange,
}

/// Errors returned by [`EventChain`](crate::EventChain) operations.
#[derive(Debug, thiserror::Error)]
pub enum ChainError {
    /// The request was malformed. Nothing was stored.
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    /// The store could not be reached or did not acknowledge the write.
    /// Nothing was stored and the tail is unchanged.
    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    /// The tail moved under an append. Nothing was stored; the caller may
    /// retry.
    #[error("append conflict: chain tail moved")]
    Conflict,

    /// Any other store failure.
    #[error("storage error: {0}")]
    Storage(DbError),

    /// A query did not finish before its deadline.
    #[error("query timed out after {timeout_ms} ms")]
    QueryTimeout {
        /// The deadline that elapsed.
        timeout_ms: u64,
    },

    /// Verification found a break in the stored chain.
    #[error(transparent)]
    Integrity(#[from] ChainIntegrityError),
}

impl ChainError {
    /// Whether retrying the same request may succeed.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::Conflict | Self::QueryTimeout { .. }
        )
    }
}

impl From<DbError> for ChainError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::Unavailable(reason) => Self::StorageUnavailable(reason),
            DbError::TailMismatch { .. } => Self::Conflict,
            other => Self::Storage(other),
        }
    }
}
