//! lookaside core - table metadata, keys, conditions and errors
//!
//! Pure data and pure functions shared by the storage crate: no I/O happens
//! here. Everything that touches a store or a cache lives in
//! `lookaside-storage`.

pub mod condition;
pub mod config;
pub mod error;
pub mod keys;
pub mod record;
pub mod table;

pub use condition::{Condition, RenderedCondition};
pub use config::{AccessConfig, MAX_BATCH_GET_KEYS};
pub use error::{
    CacheError, CacheResult, ConfigError, LookasideError, LookasideResult, StoreError,
    ValidationError, CONDITION_FAILED_CODE,
};
pub use keys::KeyBuilder;
pub use record::{
    embedded_version, key_segment, read_version, require_attr, require_name, set_version,
    validate_version, Record, VersionState, MAX_VERSION,
};
pub use table::{IndexSpec, ItemId, TableSpec};

/// Re-exported so callers can build records without a direct dependency.
pub use serde_json::{json, Value};
