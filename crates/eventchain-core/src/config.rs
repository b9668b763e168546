//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `eventchain-config.yaml`. Every field
//! has a default, so an empty or missing file yields a working in-memory
//! setup.
//!
//! Environment variables override the file:
//! - `DATABASE_URL` overrides `store.postgres_url`
//! - `EVENTCHAIN_STORE` overrides `store.backend` (`memory` or `postgres`)
//! - `EVENTCHAIN_LOG_FORMAT` overrides `logging.format` (`text` or `json`)

use std::path::Path;
use std::time::Duration;

use eventchain_db::PostgresConfig;
use serde::Deserialize;

use crate::feed::{MAX_BUFFER_CAPACITY, OverrunPolicy};

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// A value parsed but is out of range or unknown.
    #[error("invalid config value for {key}: {message}")]
    Invalid {
        /// Dotted path of the offending key.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration for an event chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ChainConfig {
    /// Storage backend selection and connection settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Read limits and timeouts.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Live feed buffering.
    #[serde(default)]
    pub feed: FeedConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ChainConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// A missing file yields the defaults. Environment overrides are applied
    /// in both cases.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file exists but cannot be read,
    /// [`ConfigError::Yaml`] if it is not valid YAML, or
    /// [`ConfigError::Invalid`] if an override or value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for an unknown backend or log format.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(val) = std::env::var("DATABASE_URL") {
            self.store.postgres_url = val;
        }
        if let Ok(val) = std::env::var("EVENTCHAIN_STORE") {
            self.store.backend = match val.to_lowercase().as_str() {
                "memory" => StoreBackend::Memory,
                "postgres" | "postgresql" => StoreBackend::Postgres,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "store.backend",
                        message: format!("unknown backend {other:?}"),
                    });
                }
            };
        }
        if let Ok(val) = std::env::var("EVENTCHAIN_LOG_FORMAT") {
            self.logging.format = match val.to_lowercase().as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => {
                    return Err(ConfigError::Invalid {
                        key: "logging.format",
                        message: format!("unknown log format {other:?}"),
                    });
                }
            };
        }
        Ok(())
    }

    /// Reject values that would make the chain unusable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.recent_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "limits.recent_limit",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.limits.query_limit == 0 {
            return Err(ConfigError::Invalid {
                key: "limits.query_limit",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.limits.max_tag_length == 0 {
            return Err(ConfigError::Invalid {
                key: "limits.max_tag_length",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.feed.buffer_capacity == 0 {
            return Err(ConfigError::Invalid {
                key: "feed.buffer_capacity",
                message: "must be at least 1".to_owned(),
            });
        }
        if self.feed.buffer_capacity > MAX_BUFFER_CAPACITY {
            return Err(ConfigError::Invalid {
                key: "feed.buffer_capacity",
                message: format!("must be at most {MAX_BUFFER_CAPACITY}"),
            });
        }
        if self.store.backend == StoreBackend::Postgres && self.store.postgres_url.is_empty() {
            return Err(ConfigError::Invalid {
                key: "store.postgres_url",
                message: "required when store.backend is postgres".to_owned(),
            });
        }
        Ok(())
    }
}

/// Which storage backend holds the chain.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// Volatile in-process store.
    #[default]
    Memory,
    /// Durable `PostgreSQL` store.
    Postgres,
}

/// Storage configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Backend selection.
    #[serde(default)]
    pub backend: StoreBackend,

    /// `PostgreSQL` connection string.
    #[serde(default = "default_postgres_url")]
    pub postgres_url: String,

    /// Maximum pooled connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Connection timeout in milliseconds.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Connection attempts before reporting the store unavailable.
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Delay before the first reconnect, doubled after each failure.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

impl StoreConfig {
    /// Build the `PostgreSQL` pool configuration.
    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig::new(&self.postgres_url)
            .with_max_connections(self.max_connections)
            .with_connect_timeout(Duration::from_millis(self.connect_timeout_ms))
            .with_retry(
                self.connect_retries,
                Duration::from_millis(self.retry_backoff_ms),
            )
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            postgres_url: default_postgres_url(),
            max_connections: default_max_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            connect_retries: default_connect_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Read limits and timeouts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LimitsConfig {
    /// Default and maximum length of `recent()` results.
    #[serde(default = "default_recent_limit")]
    pub recent_limit: usize,

    /// Maximum length of `query()` results.
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,

    /// Deadline for a single query, in milliseconds.
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    /// Maximum length in bytes of `eventType` and `sourceAppId`.
    #[serde(default = "default_max_tag_length")]
    pub max_tag_length: usize,
}

impl LimitsConfig {
    /// Query deadline as a [`Duration`].
    pub const fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            recent_limit: default_recent_limit(),
            query_limit: default_query_limit(),
            query_timeout_ms: default_query_timeout_ms(),
            max_tag_length: default_max_tag_length(),
        }
    }
}

/// Live feed configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FeedConfig {
    /// Events buffered per subscriber before the overrun policy applies.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// What happens when a subscriber's buffer is full.
    #[serde(default)]
    pub overrun_policy: OverrunPolicy,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: default_buffer_capacity(),
            overrun_policy: OverrunPolicy::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins if set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_postgres_url() -> String {
    "postgresql://localhost:5432/eventchain".to_owned()
}

const fn default_max_connections() -> u32 {
    10
}

const fn default_connect_timeout_ms() -> u64 {
    5000
}

const fn default_connect_retries() -> u32 {
    3
}

const fn default_retry_backoff_ms() -> u64 {
    500
}

const fn default_recent_limit() -> usize {
    50
}

const fn default_query_limit() -> usize {
    1000
}

const fn default_query_timeout_ms() -> u64 {
    5000
}

const fn default_max_tag_length() -> usize {
    256
}

const fn default_buffer_capacity() -> usize {
    256
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ChainConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.limits.recent_limit, 50);
        assert_eq!(config.feed.overrun_policy, OverrunPolicy::DropOldest);
    }

    #[test]
    fn parse_full_yaml() {
        let yaml = r#"
store:
  backend: postgres
  postgres_url: "postgresql://chain@db:5432/chain"
  max_connections: 4
  connect_retries: 5
limits:
  recent_limit: 20
  query_limit: 200
  query_timeout_ms: 750
feed:
  buffer_capacity: 8
  overrun_policy: disconnect
logging:
  level: debug
  format: json
"#;
        let config: ChainConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.store.backend, StoreBackend::Postgres);
        assert_eq!(config.store.max_connections, 4);
        assert_eq!(config.store.connect_timeout_ms, 5000);
        assert_eq!(config.limits.recent_limit, 20);
        assert_eq!(config.limits.query_timeout(), Duration::from_millis(750));
        assert_eq!(config.feed.buffer_capacity, 8);
        assert_eq!(config.feed.overrun_policy, OverrunPolicy::Disconnect);
        assert_eq!(config.logging.format, LogFormat::Json);

        let postgres = config.store.postgres();
        assert_eq!(postgres.connect_attempts, 5);
        assert_eq!(postgres.max_connections, 4);
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let config: ChainConfig = serde_yml::from_str("limits:\n  query_limit: 10\n").unwrap();
        assert_eq!(config.limits.query_limit, 10);
        assert_eq!(config.limits.recent_limit, 50);
        assert_eq!(config.feed.buffer_capacity, 256);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = ChainConfig::default();
        config.feed.buffer_capacity = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "feed.buffer_capacity", .. })
        ));
    }

    #[test]
    fn oversized_capacity_is_rejected() {
        let mut config = ChainConfig::default();
        config.feed.buffer_capacity = MAX_BUFFER_CAPACITY.saturating_add(1);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "feed.buffer_capacity", .. })
        ));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = ChainConfig::from_file(Path::new("/nonexistent/eventchain-config.yaml"));
        assert!(matches!(config, Ok(ref c) if c.limits.recent_limit == 50));
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let result = ChainConfig::parse("limits: [not, a, map]");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
