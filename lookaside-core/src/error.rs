//! Error types for lookaside operations

use thiserror::Error;

/// Error code the store reports when a conditional write is rejected.
pub const CONDITION_FAILED_CODE: &str = "ConditionalCheckFailedException";

/// Errors reported by the key-value store adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Condition check failed: {code}")]
    ConditionFailed { code: String },

    #[error("Throughput exceeded on {table}: {code}")]
    Throttled { table: String, code: String },

    #[error("Invalid store request ({code}): {message}")]
    InvalidRequest { code: String, message: String },

    #[error("Store request failed ({code}): {message}")]
    Fault { code: String, message: String },
}

impl StoreError {
    /// A condition failure carrying the default store code.
    pub fn condition_failed() -> Self {
        Self::ConditionFailed {
            code: CONDITION_FAILED_CODE.to_string(),
        }
    }

    /// The store's own error code.
    pub fn code(&self) -> &str {
        match self {
            Self::ConditionFailed { code }
            | Self::Throttled { code, .. }
            | Self::InvalidRequest { code, .. }
            | Self::Fault { code, .. } => code,
        }
    }

    pub fn is_condition_failed(&self) -> bool {
        matches!(self, Self::ConditionFailed { .. })
    }
}

/// Errors raised by a look-aside cache backend.
///
/// These never reach callers of the data-access layer: every cache fault is
/// logged and converted into a cache miss at the boundary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Cache is not connected")]
    Disconnected,

    #[error("Cache command failed: {reason}")]
    Command { reason: String },

    #[error("Wrong value type at key {key}")]
    WrongType { key: String },

    #[error("Undecodable cache payload at {key}: {reason}")]
    Decode { key: String, reason: String },

    #[error("Unexpected reply to {command}")]
    UnexpectedReply { command: String },
}

/// Result type alias for cache backend operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Caller input errors, raised before any I/O.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Invalid version in {field}: {reason}")]
    InvalidVersion { field: String, reason: String },

    #[error("Unknown index {index} on table {table}")]
    UnknownIndex { table: String, index: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Duplicate repository method: {name}")]
    DuplicateMethod { name: String },

    #[error("Configuration parse error: {reason}")]
    Parse { reason: String },
}

/// Master error type for all lookaside errors.
#[derive(Debug, Clone, Error)]
pub enum LookasideError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Duplicate key in {table} ({code})")]
    DuplicateKey { table: String, code: String },

    #[error("Concurrency conflict in {table} ({code})")]
    ConcurrencyConflict { table: String, code: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Batch read on {table} dropped ids without reporting them unprocessed: {ids:?}")]
    BatchProtocol { table: String, ids: Vec<String> },

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LookasideError {
    /// True for lost compare-and-swap writes and duplicate creates.
    pub fn is_condition_failed(&self) -> bool {
        match self {
            Self::DuplicateKey { .. } | Self::ConcurrencyConflict { .. } => true,
            Self::Store(err) => err.is_condition_failed(),
            _ => false,
        }
    }

    /// The store's error code, when the error originated in the store.
    pub fn store_code(&self) -> Option<&str> {
        match self {
            Self::DuplicateKey { code, .. } | Self::ConcurrencyConflict { code, .. } => Some(code),
            Self::Store(err) => Some(err.code()),
            _ => None,
        }
    }
}

/// Result type alias for lookaside operations.
pub type LookasideResult<T> = Result<T, LookasideError>;

// =============================================================================
// TESTS
// =============================================================================
