//! Error types for the audit binary.

/// Top-level error for the audit binary.
///
/// Each variant wraps a specific subsystem error, providing a single
/// error type that `main` can propagate with `?`.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: eventchain_core::ConfigError,
    },

    /// The store could not be opened or read, or the chain is broken.
    #[error("chain error: {source}")]
    Chain {
        /// The underlying chain error.
        #[from]
        source: eventchain_core::ChainError,
    },

    /// Logging could not be initialized.
    #[error("logging error: {message}")]
    Logging {
        /// Description of the failure.
        message: String,
    },
}
