//! Audit binary for the `EventChain` event log.
//!
//! Opens the configured store, walks the whole chain oldest-first, and
//! recomputes every link and digest. Exits non-zero if the store cannot be
//! read or the chain is broken.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `EVENTCHAIN_CONFIG` (default
//!    `eventchain-config.yaml`; a missing file means defaults)
//! 2. Initialize structured logging (text or JSON)
//! 3. Open the store (connect and migrate for `PostgreSQL`)
//! 4. Verify the chain and log the report or the first break
//! 5. Close the store

mod error;

use std::path::PathBuf;

use eventchain_core::{ChainConfig, ChainError, EventChain, LogFormat};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::error::AuditError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "eventchain-config.yaml";

/// Application entry point for the audit binary.
///
/// # Errors
///
/// Returns an error if configuration, storage, or verification fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::var("EVENTCHAIN_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = ChainConfig::from_file(&config_path).map_err(AuditError::from)?;

    init_logging(&config)?;
    info!(
        config = %config_path.display(),
        backend = ?config.store.backend,
        "eventchain-audit starting"
    );

    let chain = EventChain::open(&config).await.map_err(AuditError::from)?;

    let outcome = chain.verify_store().await;
    chain.close().await;

    match outcome {
        Ok(report) => {
            info!(
                length = report.length,
                tail_hash = %report.tail_hash,
                "Chain intact"
            );
            Ok(())
        }
        Err(ChainError::Integrity(broken)) => {
            error!(
                index = broken.index,
                event_id = %broken.event_id,
                kind = %broken.kind,
                "Chain broken"
            );
            Err(AuditError::from(ChainError::Integrity(broken)).into())
        }
        Err(other) => Err(AuditError::from(other).into()),
    }
}

/// Initialize the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(config: &ChainConfig) -> Result<(), AuditError> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let result = match config.logging.format {
        LogFormat::Text => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    result.map_err(|e| AuditError::Logging {
        message: e.to_string(),
    })
}
