//! Key-value store boundary.
//!
//! The data-access layer only consumes a store; it never opens, pools or
//! closes connections. Adapters implement [`KeyValueStore`] for a concrete
//! hash/range-keyed table service and report consumed capacity with every
//! response.

use async_trait::async_trait;
use lookaside_core::{Condition, Record, StoreError, Value};

/// Conditional or unconditional write of a full item.
#[derive(Debug, Clone, PartialEq)]
pub struct PutRequest {
    pub table: String,
    pub item: Record,
    pub condition: Option<Condition>,
}

/// Single-item read by primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct GetRequest {
    pub table: String,
    pub key: Record,
    pub consistent_read: bool,
}

/// Conditional or unconditional delete by primary key.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    pub table: String,
    pub key: Record,
    pub condition: Option<Condition>,
}

/// One page of a whole-table scan.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScanRequest {
    pub table: String,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Record>,
}

/// Comparison applied to the range attribute of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeOp {
    Eq(Value),
    Lt(Value),
    Le(Value),
    Gt(Value),
    Ge(Value),
    Between(Value, Value),
    BeginsWith(String),
}

/// Key condition of a query: hash equality plus an optional range predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyCondition {
    pub hash_attr: String,
    pub hash_value: Value,
    pub range: Option<(String, RangeOp)>,
}

/// One page of a query over a table or one of its secondary indices.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRequest {
    pub table: String,
    pub index_name: Option<String>,
    pub key_condition: KeyCondition,
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Record>,
    pub scan_forward: bool,
}

/// Batch read of up to 100 keys from one table.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchGetRequest {
    pub table: String,
    pub keys: Vec<Record>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct WriteOutput {
    pub consumed_capacity: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct GetOutput {
    pub item: Option<Record>,
    pub consumed_capacity: f64,
}

/// A page of scan or query results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Page {
    pub items: Vec<Record>,
    /// Present when more results remain; pass back as `exclusive_start_key`.
    pub last_evaluated_key: Option<Record>,
    pub consumed_capacity: f64,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct BatchGetOutput {
    pub items: Vec<Record>,
    /// Keys the store declined to serve this round.
    pub unprocessed_keys: Vec<Record>,
    pub consumed_capacity: f64,
}

/// A hash/range-keyed table store with conditional writes.
///
/// A rejected condition must be reported as [`StoreError::ConditionFailed`]
/// so callers can tell a lost compare-and-swap from any other fault.
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn put(&self, request: PutRequest) -> Result<WriteOutput, StoreError>;

    async fn get(&self, request: GetRequest) -> Result<GetOutput, StoreError>;

    async fn delete(&self, request: DeleteRequest) -> Result<WriteOutput, StoreError>;

    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError>;

    async fn query(&self, request: QueryRequest) -> Result<Page, StoreError>;

    async fn batch_get(&self, request: BatchGetRequest) -> Result<BatchGetOutput, StoreError>;
}
