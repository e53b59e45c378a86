//! Data-access configuration.
//!
//! Configuration is loaded from environment variables or a TOML document,
//! with defaults suitable for development.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Upper bound the store places on keys per batch read.
pub const MAX_BATCH_GET_KEYS: usize = 100;

// ============================================================================
// ACCESS CONFIGURATION
// ============================================================================

/// Settings shared by every data-access operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Prepended to logical table names for both physical table names and
    /// cache keys. Example: "prod." turns `users` into `prod.users`.
    pub prefix: String,

    /// TTL applied when neither the caller nor the table supplies one.
    pub default_ttl_secs: u64,

    /// Ids per batch-get request (at most 100).
    pub batch_chunk_size: usize,

    /// First pause after a batch round leaves unprocessed ids.
    pub retry_backoff_ms: u64,

    /// Ceiling for the doubling batch backoff.
    pub max_retry_backoff_ms: u64,

    /// Pending background cache writes before new ones are dropped.
    pub writer_queue_capacity: usize,

    /// Request strongly consistent store reads.
    pub consistent_reads: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            prefix: String::new(),
            default_ttl_secs: 300,
            batch_chunk_size: MAX_BATCH_GET_KEYS,
            retry_backoff_ms: 50,
            max_retry_backoff_ms: 1_000,
            writer_queue_capacity: 1_024,
            consistent_reads: false,
        }
    }
}

impl AccessConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl_secs = ttl.as_secs();
        self
    }

    pub fn with_batch_chunk_size(mut self, size: usize) -> Self {
        self.batch_chunk_size = size;
        self
    }

    /// Set the base and maximum batch retry backoff.
    pub fn with_retry_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.retry_backoff_ms = base.as_millis() as u64;
        self.max_retry_backoff_ms = max.as_millis() as u64;
        self
    }

    pub fn with_writer_queue_capacity(mut self, capacity: usize) -> Self {
        self.writer_queue_capacity = capacity;
        self
    }

    pub fn with_consistent_reads(mut self, enabled: bool) -> Self {
        self.consistent_reads = enabled;
        self
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn max_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.max_retry_backoff_ms)
    }

    /// Create an AccessConfig from environment variables.
    ///
    /// Environment variables:
    /// - `LOOKASIDE_PREFIX`: Table and cache key prefix (default: empty)
    /// - `LOOKASIDE_DEFAULT_TTL_SECS`: Fallback cache TTL (default: 300)
    /// - `LOOKASIDE_BATCH_CHUNK_SIZE`: Ids per batch read (default: 100)
    /// - `LOOKASIDE_RETRY_BACKOFF_MS`: First unprocessed-id backoff (default: 50)
    /// - `LOOKASIDE_MAX_RETRY_BACKOFF_MS`: Backoff ceiling (default: 1000)
    /// - `LOOKASIDE_WRITER_QUEUE`: Background cache write queue size (default: 1024)
    /// - `LOOKASIDE_CONSISTENT_READS`: "true" or "false" (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let prefix = std::env::var("LOOKASIDE_PREFIX").unwrap_or(defaults.prefix);

        let default_ttl_secs = std::env::var("LOOKASIDE_DEFAULT_TTL_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.default_ttl_secs);

        let batch_chunk_size = std::env::var("LOOKASIDE_BATCH_CHUNK_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.batch_chunk_size);

        let retry_backoff_ms = std::env::var("LOOKASIDE_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.retry_backoff_ms);

        let max_retry_backoff_ms = std::env::var("LOOKASIDE_MAX_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_retry_backoff_ms);

        let writer_queue_capacity = std::env::var("LOOKASIDE_WRITER_QUEUE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.writer_queue_capacity);

        let consistent_reads = std::env::var("LOOKASIDE_CONSISTENT_READS")
            .ok()
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.consistent_reads);

        Self {
            prefix,
            default_ttl_secs,
            batch_chunk_size,
            retry_backoff_ms,
            max_retry_backoff_ms,
            writer_queue_capacity,
            consistent_reads,
        }
    }

    /// Parse a TOML document; missing fields take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_chunk_size == 0 || self.batch_chunk_size > MAX_BATCH_GET_KEYS {
            return Err(ConfigError::InvalidValue {
                field: "batch_chunk_size".to_string(),
                value: self.batch_chunk_size.to_string(),
                reason: format!("must be between 1 and {MAX_BATCH_GET_KEYS}"),
            });
        }
        if self.default_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "default_ttl_secs".to_string(),
                value: "0".to_string(),
                reason: "must be at least one second".to_string(),
            });
        }
        if self.max_retry_backoff_ms < self.retry_backoff_ms {
            return Err(ConfigError::InvalidValue {
                field: "max_retry_backoff_ms".to_string(),
                value: self.max_retry_backoff_ms.to_string(),
                reason: "must not be below retry_backoff_ms".to_string(),
            });
        }
        if self.writer_queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "writer_queue_capacity".to_string(),
                value: "0".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}
