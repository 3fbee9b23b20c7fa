//! Error types for dns-sentinel.

use thiserror::Error;

/// Errors that can occur in the monitor.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// IO error (network, file, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed event payload or envelope
    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// Domain catalog query failed
    #[error("Catalog error: {0}")]
    Catalog(#[from] sqlx::Error),

    /// Domain catalog query exceeded its deadline
    #[error("Catalog lookup timed out")]
    CatalogTimeout,

    /// Counter store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Metric family construction or registration failed
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Errors surfaced by a counter store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unreachable or a command failed
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// Store round-trip exceeded its deadline
    #[error("store operation timed out")]
    Timeout,

    /// Conditional write lost every attempt
    #[error("conditional write conflicted after {attempts} attempts")]
    Conflict {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// Stored value failed to parse as a counter
    #[error("malformed stored value for {key}: {value:?}")]
    Malformed {
        /// Store key the value was read from.
        key: String,
        /// The raw stored value.
        value: String,
    },
}

impl From<redis::RedisError> for StoreError {
    fn from(e: redis::RedisError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}
