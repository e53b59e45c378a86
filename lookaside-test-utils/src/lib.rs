//! lookaside Test Utilities
//!
//! Shared test infrastructure for the lookaside workspace:
//! - Fixtures for the tables and rows used across test suites
//! - Instrumented store wrappers (call counting, unprocessed keys, dropped
//!   ids, injected faults)
//! - Proptest generators for key values and records
//! - Custom assertions for lookaside error classes

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

// Re-export the reference backends from their source crate
pub use lookaside_storage::{DataAccess, MemoryCache, MemoryStore};

// Re-export core types for convenience
pub use lookaside_core::{
    json, AccessConfig, IndexSpec, ItemId, LookasideError, LookasideResult, Record, StoreError,
    TableSpec, Value,
};

use lookaside_storage::{
    BatchGetOutput, BatchGetRequest, DeleteRequest, GetOutput, GetRequest, KeyValueStore, Page,
    PutRequest, QueryRequest, ScanRequest, WriteOutput,
};

/// Prefix used by every fixture.
pub const PREFIX: &str = "prefix.";

/// Install a test-friendly `tracing` subscriber once per process.
///
/// Honors `RUST_LOG`; defaults to `warn`.
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use std::time::Duration;

    /// `users`: hash `id`, version `iv`.
    pub fn users() -> TableSpec {
        TableSpec::new("users", "id").with_version("iv")
    }

    /// `group-user-pairs`: hash `id` holding `group|user`, version `iv`.
    pub fn group_user_pairs() -> TableSpec {
        TableSpec::new("group-user-pairs", "id").with_version("iv")
    }

    /// `memberships`: hash `groupId`, range `userId`, version `iv`, plus a
    /// `by-user` index keyed the other way round.
    pub fn memberships() -> TableSpec {
        TableSpec::new("memberships", "groupId")
            .with_range("userId")
            .with_version("iv")
            .with_index(IndexSpec::new("by-user", "userId").with_range("groupId"))
    }

    /// Build a record from a JSON object literal.
    pub fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture records must be objects, got {other}"),
        }
    }

    pub fn user_1() -> Record {
        record(json!({"id": "user-1", "iv": 0}))
    }

    pub fn pair_rows() -> Vec<Record> {
        vec![
            record(json!({"id": "group-1|user-1", "iv": 0})),
            record(json!({"id": "group-2|user-1", "iv": 0})),
        ]
    }

    pub fn membership_rows() -> Vec<Record> {
        vec![
            record(json!({"groupId": "group-1", "userId": "user-1", "iv": 0})),
            record(json!({"groupId": "group-1", "userId": "user-2", "iv": 3})),
            record(json!({"groupId": "group-2", "userId": "user-1", "iv": 1})),
        ]
    }

    /// Fixture prefix, no batch backoff.
    pub fn config() -> AccessConfig {
        AccessConfig::new()
            .with_prefix(PREFIX)
            .with_retry_backoff(Duration::ZERO, Duration::ZERO)
    }

    /// A store with every fixture table defined and empty.
    pub fn empty_store() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        for table in [users(), group_user_pairs(), memberships()] {
            store.define_table(format!("{PREFIX}{}", table.name), &table);
        }
        Arc::new(store)
    }

    /// A store holding `user_1`, `pair_rows` and `membership_rows`.
    pub fn seeded_store() -> Arc<MemoryStore> {
        let store = empty_store();
        seed(&store, &users(), [user_1()]);
        seed(&store, &group_user_pairs(), pair_rows());
        seed(&store, &memberships(), membership_rows());
        store
    }

    pub fn seed(store: &MemoryStore, table: &TableSpec, rows: impl IntoIterator<Item = Record>) {
        let physical = format!("{PREFIX}{}", table.name);
        for row in rows {
            store
                .insert(&physical, row)
                .expect("fixture rows must fit their table");
        }
    }

    /// A cached `DataAccess` over `store` with the fixture config.
    pub fn access(store: Arc<dyn KeyValueStore>, cache: Arc<MemoryCache>) -> DataAccess {
        DataAccess::new(store, config())
            .expect("fixture config is valid")
            .with_cache(cache)
    }
}

// ============================================================================
// INSTRUMENTED STORES
// ============================================================================

/// Per-operation call counters.
#[derive(Debug, Default)]
pub struct StoreCalls {
    pub puts: AtomicUsize,
    pub gets: AtomicUsize,
    pub deletes: AtomicUsize,
    pub scans: AtomicUsize,
    pub queries: AtomicUsize,
    pub batch_gets: AtomicUsize,
}

/// Counts every call before delegating.
pub struct CountingStore {
    inner: Arc<dyn KeyValueStore>,
    calls: StoreCalls,
}

impl CountingStore {
    pub fn new(inner: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner,
            calls: StoreCalls::default(),
        }
    }

    pub fn calls(&self) -> &StoreCalls {
        &self.calls
    }

    /// Calls of every kind.
    pub fn total(&self) -> usize {
        let c = &self.calls;
        [&c.puts, &c.gets, &c.deletes, &c.scans, &c.queries, &c.batch_gets]
            .iter()
            .map(|n| n.load(Ordering::SeqCst))
            .sum()
    }

    pub fn reads(&self) -> usize {
        let c = &self.calls;
        [&c.gets, &c.scans, &c.queries, &c.batch_gets]
            .iter()
            .map(|n| n.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl KeyValueStore for CountingStore {
    async fn put(&self, request: PutRequest) -> Result<WriteOutput, StoreError> {
        self.calls.puts.fetch_add(1, Ordering::SeqCst);
        self.inner.put(request).await
    }

    async fn get(&self, request: GetRequest) -> Result<GetOutput, StoreError> {
        self.calls.gets.fetch_add(1, Ordering::SeqCst);
        self.inner.get(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<WriteOutput, StoreError> {
        self.calls.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.delete(request).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError> {
        self.calls.scans.fetch_add(1, Ordering::SeqCst);
        self.inner.scan(request).await
    }

    async fn query(&self, request: QueryRequest) -> Result<Page, StoreError> {
        self.calls.queries.fetch_add(1, Ordering::SeqCst);
        self.inner.query(request).await
    }

    async fn batch_get(&self, request: BatchGetRequest) -> Result<BatchGetOutput, StoreError> {
        self.calls.batch_gets.fetch_add(1, Ordering::SeqCst);
        self.inner.batch_get(request).await
    }
}

/// Reports the first `withheld` keys of its first batch read as unprocessed;
/// every later call passes through.
pub struct UnprocessedStore {
    inner: Arc<dyn KeyValueStore>,
    withheld: usize,
    fired: AtomicBool,
}

impl UnprocessedStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, withheld: usize) -> Self {
        Self {
            inner,
            withheld,
            fired: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl KeyValueStore for UnprocessedStore {
    async fn put(&self, request: PutRequest) -> Result<WriteOutput, StoreError> {
        self.inner.put(request).await
    }

    async fn get(&self, request: GetRequest) -> Result<GetOutput, StoreError> {
        self.inner.get(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<WriteOutput, StoreError> {
        self.inner.delete(request).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError> {
        self.inner.scan(request).await
    }

    async fn query(&self, request: QueryRequest) -> Result<Page, StoreError> {
        self.inner.query(request).await
    }

    async fn batch_get(&self, mut request: BatchGetRequest) -> Result<BatchGetOutput, StoreError> {
        if self.fired.swap(true, Ordering::SeqCst) {
            return self.inner.batch_get(request).await;
        }
        let split = self.withheld.min(request.keys.len());
        let unprocessed_keys: Vec<Record> = request.keys.drain(..split).collect();
        let mut output = self.inner.batch_get(request).await?;
        output.unprocessed_keys.extend(unprocessed_keys);
        Ok(output)
    }
}

/// Silently omits items whose `attr` equals one of `dropped` from batch
/// reads, without reporting them unprocessed.
pub struct DroppingStore {
    inner: Arc<dyn KeyValueStore>,
    attr: String,
    dropped: Vec<Value>,
}

impl DroppingStore {
    pub fn new(
        inner: Arc<dyn KeyValueStore>,
        attr: impl Into<String>,
        dropped: impl IntoIterator<Item = Value>,
    ) -> Self {
        Self {
            inner,
            attr: attr.into(),
            dropped: dropped.into_iter().collect(),
        }
    }
}

#[async_trait]
impl KeyValueStore for DroppingStore {
    async fn put(&self, request: PutRequest) -> Result<WriteOutput, StoreError> {
        self.inner.put(request).await
    }

    async fn get(&self, request: GetRequest) -> Result<GetOutput, StoreError> {
        self.inner.get(request).await
    }

    async fn delete(&self, request: DeleteRequest) -> Result<WriteOutput, StoreError> {
        self.inner.delete(request).await
    }

    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError> {
        self.inner.scan(request).await
    }

    async fn query(&self, request: QueryRequest) -> Result<Page, StoreError> {
        self.inner.query(request).await
    }

    async fn batch_get(&self, request: BatchGetRequest) -> Result<BatchGetOutput, StoreError> {
        let mut output = self.inner.batch_get(request).await?;
        output
            .items
            .retain(|item| !item.get(&self.attr).is_some_and(|v| self.dropped.contains(v)));
        Ok(output)
    }
}

/// Fails every call with a clone of `error`.
pub struct FailingStore {
    error: StoreError,
}

impl FailingStore {
    pub fn new(error: StoreError) -> Self {
        Self { error }
    }

    pub fn throttled(table: &str) -> Self {
        Self::new(StoreError::Throttled {
            table: table.to_string(),
            code: "ProvisionedThroughputExceededException".to_string(),
        })
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn put(&self, _request: PutRequest) -> Result<WriteOutput, StoreError> {
        Err(self.error.clone())
    }

    async fn get(&self, _request: GetRequest) -> Result<GetOutput, StoreError> {
        Err(self.error.clone())
    }

    async fn delete(&self, _request: DeleteRequest) -> Result<WriteOutput, StoreError> {
        Err(self.error.clone())
    }

    async fn scan(&self, _request: ScanRequest) -> Result<Page, StoreError> {
        Err(self.error.clone())
    }

    async fn query(&self, _request: QueryRequest) -> Result<Page, StoreError> {
        Err(self.error.clone())
    }

    async fn batch_get(&self, _request: BatchGetRequest) -> Result<BatchGetOutput, StoreError> {
        Err(self.error.clone())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Non-empty key strings without the `!` delimiter.
    pub fn arb_key_string() -> impl Strategy<Value = String> {
        "[a-z0-9][a-z0-9|._-]{0,15}"
    }

    /// String or non-negative integer key values.
    pub fn arb_key_value() -> impl Strategy<Value = Value> {
        prop_oneof![
            arb_key_string().prop_map(Value::from),
            (0u64..1_000_000).prop_map(Value::from),
        ]
    }

    pub fn arb_version() -> impl Strategy<Value = u64> {
        0u64..10_000
    }

    /// A versioned record keyed on `hash_attr` with a free-text payload.
    pub fn arb_record(
        hash_attr: &'static str,
        version_attr: &'static str,
    ) -> impl Strategy<Value = Record> {
        (arb_key_string(), arb_version(), "[ -~]{0,24}").prop_map(move |(id, version, name)| {
            let mut item = Record::new();
            item.insert(hash_attr.to_string(), Value::from(id));
            item.insert(version_attr.to_string(), Value::from(version));
            item.insert("name".to_string(), Value::from(name));
            item
        })
    }

    /// Up to `max` ids, duplicates included.
    pub fn arb_ids(max: usize) -> impl Strategy<Value = Vec<ItemId>> {
        proptest::collection::vec("[a-e]", 0..=max)
            .prop_map(|ids| ids.iter().map(|id| ItemId::from(id.as_str())).collect())
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    pub fn assert_concurrency_conflict<T: std::fmt::Debug>(result: &LookasideResult<T>) {
        assert!(
            matches!(result, Err(LookasideError::ConcurrencyConflict { .. })),
            "expected ConcurrencyConflict, got {result:?}"
        );
    }

    pub fn assert_duplicate_key<T: std::fmt::Debug>(result: &LookasideResult<T>) {
        assert!(
            matches!(result, Err(LookasideError::DuplicateKey { .. })),
            "expected DuplicateKey, got {result:?}"
        );
    }

    pub fn assert_validation_error<T: std::fmt::Debug>(result: &LookasideResult<T>) {
        assert!(
            matches!(result, Err(LookasideError::Validation(_))),
            "expected Validation error, got {result:?}"
        );
    }

    pub fn assert_batch_protocol<T: std::fmt::Debug>(result: &LookasideResult<T>, ids: &[&str]) {
        match result {
            Err(LookasideError::BatchProtocol { ids: got, .. }) => {
                assert_eq!(got, ids, "unexpected protocol violation ids")
            }
            other => panic!("expected BatchProtocol, got {other:?}"),
        }
    }

    /// The cached sorted set at `key` as `(member, score)` pairs.
    pub async fn cached_scores(cache: &MemoryCache, key: &str) -> Vec<(String, f64)> {
        use lookaside_storage::LookasideCache;
        cache
            .zrange_with_scores(key, 0, -1)
            .await
            .expect("sorted set readable")
    }
}
