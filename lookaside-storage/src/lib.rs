//! lookaside storage - versioned look-aside caching over a key-value store
//!
//! [`DataAccess`] reads and writes items of hash/range-keyed tables through
//! a [`KeyValueStore`], optionally fronted by a [`LookasideCache`]:
//! - single items cached as JSON strings or, in versioned mode, as sorted
//!   sets scored by the item's version
//! - whole scan and query results cached as ordered collections of member
//!   ids, answering only when every member still resolves
//! - compare-and-swap creates, updates and removes on a version attribute
//! - batch reads that retry unprocessed keys with a doubling backoff
//!
//! A [`Repository`] binds named methods to these operations from a TOML
//! document.

mod access;
mod batch;
pub mod cache;
mod context;
mod entry;
pub mod memory_store;
mod record_cache;
pub mod registry;
mod set_index;
pub mod stats;
pub mod store;
mod telemetry;
mod versioned;
pub mod writer;

pub use access::DataAccess;
pub use cache::{CacheCommand, CacheReply, LookasideCache, MemoryCache, Pipeline};
#[cfg(feature = "redis")]
pub use cache::RedisCache;
pub use memory_store::MemoryStore;
pub use registry::{
    IndexConfig, MethodConfig, Outcome, Repository, RepositoryConfig, Request, TableConfig, Verb,
};
pub use stats::{AccessStats, StatsSnapshot};
pub use store::{
    BatchGetOutput, BatchGetRequest, DeleteRequest, GetOutput, GetRequest, KeyCondition,
    KeyValueStore, Page, PutRequest, QueryRequest, RangeOp, ScanRequest, WriteOutput,
};
pub use versioned::PageOptions;
pub use writer::CacheWriter;

// Re-export core types for convenience
pub use lookaside_core::{
    AccessConfig, CacheError, Condition, ConfigError, IndexSpec, ItemId, KeyBuilder,
    LookasideError, LookasideResult, Record, StoreError, TableSpec, ValidationError,
};
