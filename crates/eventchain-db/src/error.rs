//! Error types for the event store.
//!
//! [`DbError`] separates "the backend cannot be reached" ([`DbError::Unavailable`])
//! from every other failure so callers can tell an outage apart from a bad
//! request. Empty results are never errors.

/// Errors that can occur in the event store.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// The backend cannot be reached or did not acknowledge the write.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// A `PostgreSQL` operation failed for a reason other than availability.
    #[error("PostgreSQL error: {0}")]
    Postgres(sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization or deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The append was linked against a tail that is no longer current.
    #[error("append rejected: chain tail is no longer {previous_hash}")]
    TailMismatch {
        /// The `previous_hash` the rejected event was linked against.
        previous_hash: String,
    },

    /// A configuration error.
    #[error("configuration error: {0}")]
    Config(String),
}

impl DbError {
    /// Whether the backend itself is unreachable.
    pub const fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Unavailable(err.to_string()),
            other => Self::Postgres(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_failures_classify_as_unavailable() {
        assert!(DbError::from(sqlx::Error::PoolTimedOut).is_unavailable());
        assert!(DbError::from(sqlx::Error::PoolClosed).is_unavailable());
    }

    #[test]
    fn row_errors_are_not_unavailable() {
        let err = DbError::from(sqlx::Error::RowNotFound);
        assert!(!err.is_unavailable());
        assert!(matches!(err, DbError::Postgres(_)));
    }
}
