//! The data-access facade.
//!
//! [`DataAccess`] binds a store, an optional look-aside cache and an
//! [`AccessConfig`], and exposes one method per operation. Every method
//! validates its input before any I/O, times the call and emits one
//! structured `tracing` event with the verb, physical table, hits, misses
//! and consumed capacity.
//!
//! Cache faults never surface: a disconnected or failing cache only turns
//! reads into store reads.

use std::sync::Arc;
use std::time::Duration;

use lookaside_core::{
    AccessConfig, ItemId, KeyBuilder, LookasideResult, Record, TableSpec, Value,
};

use crate::batch;
use crate::cache::LookasideCache;
use crate::context::Context;
use crate::entry::Mode;
use crate::record_cache;
use crate::set_index::{self, Source};
use crate::stats::{AccessStats, StatsSnapshot};
use crate::store::{KeyValueStore, Page, RangeOp};
use crate::versioned::{self, key_condition, PageOptions};
use crate::writer::CacheWriter;

/// Versioned look-aside data access over a key-value table store.
///
/// # Example
///
/// ```ignore
/// let access = DataAccess::new(store, AccessConfig::from_env())?.with_cache(cache);
/// let users = TableSpec::new("users", "id").with_version("iv");
///
/// let created = access.create_cached_versioned(&users, user, None).await?;
/// let cached = access.get_cached_versioned(&users, &ItemId::from("user-1"), None).await?;
/// ```
pub struct DataAccess {
    ctx: Context,
}

impl DataAccess {
    /// Create a store-only data access layer. Cached operations behave as
    /// permanent misses until a cache is attached.
    pub fn new(store: Arc<dyn KeyValueStore>, config: AccessConfig) -> LookasideResult<Self> {
        config.validate()?;
        Ok(Self {
            ctx: Context {
                store,
                cache: None,
                writer: None,
                keys: KeyBuilder::new(config.prefix.clone()),
                config,
                stats: Arc::new(AccessStats::new()),
            },
        })
    }

    /// Attach a look-aside cache.
    ///
    /// Background repopulation runs on a worker spawned on the current
    /// Tokio runtime; outside a runtime it is awaited inline instead.
    pub fn with_cache(mut self, cache: Arc<dyn LookasideCache>) -> Self {
        self.ctx.writer = CacheWriter::spawn(
            Arc::clone(&cache),
            self.ctx.config.writer_queue_capacity,
            Arc::clone(&self.ctx.stats),
        );
        if self.ctx.writer.is_none() {
            tracing::warn!("No Tokio runtime, cache repopulation will run inline");
        }
        self.ctx.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &AccessConfig {
        &self.ctx.config
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.ctx.keys
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.ctx.stats.snapshot()
    }

    /// Wait until every queued background cache write has been applied.
    pub async fn flush(&self) {
        self.ctx.flush().await;
    }

    // ========================================================================
    // SINGLE ITEMS
    // ========================================================================

    pub async fn get(&self, table: &TableSpec, id: &ItemId) -> LookasideResult<Option<Record>> {
        let mut op = self.ctx.operation("get", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            versioned::get(&self.ctx, &mut op, table, id).await
        }
        .await;
        op.finish(result)
    }

    /// Read through the plain cache entry of `id`.
    pub async fn get_cached(
        &self,
        table: &TableSpec,
        id: &ItemId,
        ttl: Option<Duration>,
    ) -> LookasideResult<Option<Record>> {
        let mut op = self.ctx.operation("get_cached", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            let ttl = self.ctx.resolve_ttl(table, ttl)?;
            record_cache::get_cached(&self.ctx, &mut op, table, Mode::Plain, ttl, id).await
        }
        .await;
        op.finish(result)
    }

    /// Read through the versioned cache entry of `id`; an entry whose
    /// payload version disagrees with its score is a miss.
    pub async fn get_cached_versioned(
        &self,
        table: &TableSpec,
        id: &ItemId,
        ttl: Option<Duration>,
    ) -> LookasideResult<Option<Record>> {
        let mut op = self.ctx.operation("get_cached_versioned", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            let mode = Mode::Versioned(table.require_version_attr()?);
            let ttl = self.ctx.resolve_ttl(table, ttl)?;
            record_cache::get_cached(&self.ctx, &mut op, table, mode, ttl, id).await
        }
        .await;
        op.finish(result)
    }

    /// Unconditional upsert.
    pub async fn put(&self, table: &TableSpec, item: Record) -> LookasideResult<Record> {
        let mut op = self.ctx.operation("put", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            versioned::put(&self.ctx, &mut op, table, item).await
        }
        .await;
        op.finish(result)
    }

    /// Unconditional upsert, then write the plain cache entry.
    pub async fn put_cached(
        &self,
        table: &TableSpec,
        item: Record,
        ttl: Option<Duration>,
    ) -> LookasideResult<Record> {
        let mut op = self.ctx.operation("put_cached", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            let ttl = self.ctx.resolve_ttl(table, ttl)?;
            record_cache::put_cached(&self.ctx, &mut op, table, ttl, item).await
        }
        .await;
        op.finish(result)
    }

    /// Insert `item`; fails with `DuplicateKey` if its hash exists.
    pub async fn create(&self, table: &TableSpec, item: Record) -> LookasideResult<Record> {
        let mut op = self.ctx.operation("create", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            versioned::create(&self.ctx, &mut op, table, item).await
        }
        .await;
        op.finish(result)
    }

    /// Insert `item` at version 0 and return the persisted record.
    pub async fn create_versioned(
        &self,
        table: &TableSpec,
        item: Record,
    ) -> LookasideResult<Record> {
        let mut op = self.ctx.operation("create_versioned", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            versioned::create_versioned(&self.ctx, &mut op, table, item).await
        }
        .await;
        op.finish(result)
    }

    pub async fn create_cached_versioned(
        &self,
        table: &TableSpec,
        item: Record,
        ttl: Option<Duration>,
    ) -> LookasideResult<Record> {
        let mut op = self.ctx.operation("create_cached_versioned", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            let ttl = self.ctx.resolve_ttl(table, ttl)?;
            record_cache::create_cached_versioned(&self.ctx, &mut op, table, ttl, item).await
        }
        .await;
        op.finish(result)
    }

    /// Compare-and-swap update: `item` carries the version the caller last
    /// observed. Returns the persisted record at the next version, or
    /// `ConcurrencyConflict` if someone else got there first.
    pub async fn update_versioned(
        &self,
        table: &TableSpec,
        item: Record,
    ) -> LookasideResult<Record> {
        let mut op = self.ctx.operation("update_versioned", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            versioned::update_versioned(&self.ctx, &mut op, table, item).await
        }
        .await;
        op.finish(result)
    }

    pub async fn update_cached_versioned(
        &self,
        table: &TableSpec,
        item: Record,
        ttl: Option<Duration>,
    ) -> LookasideResult<Record> {
        let mut op = self.ctx.operation("update_cached_versioned", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            let ttl = self.ctx.resolve_ttl(table, ttl)?;
            record_cache::update_cached_versioned(&self.ctx, &mut op, table, ttl, item).await
        }
        .await;
        op.finish(result)
    }

    pub async fn delete(&self, table: &TableSpec, id: &ItemId) -> LookasideResult<()> {
        let mut op = self.ctx.operation("delete", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            versioned::delete(&self.ctx, &mut op, table, id).await
        }
        .await;
        op.finish(result)
    }

    /// Delete from the store, then drop the cache entry.
    pub async fn delete_cached(&self, table: &TableSpec, id: &ItemId) -> LookasideResult<()> {
        let mut op = self.ctx.operation("delete_cached", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            record_cache::delete_cached(&self.ctx, &mut op, table, id).await
        }
        .await;
        op.finish(result)
    }

    /// Delete the item at `hash` if its stored version equals `version`.
    pub async fn remove_versioned(
        &self,
        table: &TableSpec,
        hash: impl Into<Value>,
        version: u64,
    ) -> LookasideResult<()> {
        let id = ItemId::new(hash);
        let mut op = self.ctx.operation("remove_versioned", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            versioned::remove_versioned(&self.ctx, &mut op, table, &id, version).await
        }
        .await;
        op.finish(result)
    }

    /// Delete the item at `(hash, range)` if its stored version equals
    /// `version`.
    pub async fn remove_ranged_versioned(
        &self,
        table: &TableSpec,
        hash: impl Into<Value>,
        range: impl Into<Value>,
        version: u64,
    ) -> LookasideResult<()> {
        let id = ItemId::ranged(hash, range);
        let mut op = self.ctx.operation("remove_ranged_versioned", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            versioned::remove_versioned(&self.ctx, &mut op, table, &id, version).await
        }
        .await;
        op.finish(result)
    }

    /// Version-checked delete, then drop the cache entry.
    pub async fn remove_cached_versioned(
        &self,
        table: &TableSpec,
        id: &ItemId,
        version: u64,
    ) -> LookasideResult<()> {
        let mut op = self.ctx.operation("remove_cached_versioned", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            record_cache::remove_cached_versioned(&self.ctx, &mut op, table, id, version).await
        }
        .await;
        op.finish(result)
    }

    // ========================================================================
    // SCANS AND QUERIES
    // ========================================================================

    /// One page of a whole-table scan.
    pub async fn scan(&self, table: &TableSpec, options: PageOptions) -> LookasideResult<Page> {
        let mut op = self.ctx.operation("scan", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            versioned::scan(&self.ctx, &mut op, options).await
        }
        .await;
        op.finish(result)
    }

    /// Every item of the table, through the cached scan collection.
    pub async fn scan_cached(
        &self,
        table: &TableSpec,
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        self.read_set("scan_cached", table, false, ttl, Source::Scan)
            .await
    }

    pub async fn scan_cached_versioned(
        &self,
        table: &TableSpec,
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        self.read_set("scan_cached_versioned", table, true, ttl, Source::Scan)
            .await
    }

    /// One page of items sharing `hash`, optionally narrowed by `range`.
    pub async fn query(
        &self,
        table: &TableSpec,
        hash: &Value,
        range: Option<RangeOp>,
        options: PageOptions,
    ) -> LookasideResult<Page> {
        let mut op = self.ctx.operation("query", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            let condition =
                key_condition(&table.hash_attr, table.range_attr.as_deref(), hash, range)?;
            versioned::query(&self.ctx, &mut op, condition, None, options).await
        }
        .await;
        op.finish(result)
    }

    /// Every item sharing `hash`, in range order, through the cached
    /// collection of that partition. The table must have a range attribute.
    pub async fn query_cached(
        &self,
        table: &TableSpec,
        hash: &Value,
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        self.read_set("query_cached", table, false, ttl, Source::Query { hash })
            .await
    }

    pub async fn query_cached_versioned(
        &self,
        table: &TableSpec,
        hash: &Value,
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        self.read_set("query_cached_versioned", table, true, ttl, Source::Query { hash })
            .await
    }

    /// One page of a secondary-index query.
    pub async fn query_index(
        &self,
        table: &TableSpec,
        index: &str,
        hash: &Value,
        range: Option<RangeOp>,
        options: PageOptions,
    ) -> LookasideResult<Page> {
        let mut op = self.ctx.operation("query_index", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            let index = table.index(index)?;
            let condition =
                key_condition(&index.hash_attr, index.range_attr.as_deref(), hash, range)?;
            let index_name = Some(index.name.clone());
            versioned::query(&self.ctx, &mut op, condition, index_name, options).await
        }
        .await;
        op.finish(result)
    }

    pub async fn query_index_cached(
        &self,
        table: &TableSpec,
        index: &str,
        hash: &Value,
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        self.read_index_set("query_index_cached", table, false, index, hash, ttl)
            .await
    }

    pub async fn query_index_cached_versioned(
        &self,
        table: &TableSpec,
        index: &str,
        hash: &Value,
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        self.read_index_set("query_index_cached_versioned", table, true, index, hash, ttl)
            .await
    }

    async fn read_set(
        &self,
        verb: &'static str,
        table: &TableSpec,
        versioned: bool,
        ttl: Option<Duration>,
        source: Source<'_>,
    ) -> LookasideResult<Vec<Record>> {
        let mut op = self.ctx.operation(verb, table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            let mode = if versioned {
                Mode::Versioned(table.require_version_attr()?)
            } else {
                Mode::Plain
            };
            let ttl = self.ctx.resolve_ttl(table, ttl)?;
            set_index::read(&self.ctx, &mut op, table, mode, ttl, source).await
        }
        .await;
        op.finish(result)
    }

    async fn read_index_set(
        &self,
        verb: &'static str,
        table: &TableSpec,
        versioned: bool,
        index: &str,
        hash: &Value,
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        match table.index(index) {
            Ok(index) => {
                self.read_set(verb, table, versioned, ttl, Source::Index { index, hash })
                    .await
            }
            Err(e) => {
                let op = self.ctx.operation(verb, table);
                op.finish(Err(e.into()))
            }
        }
    }

    // ========================================================================
    // BATCH READS
    // ========================================================================

    /// Read `ids` from the store in deduplicated request order.
    pub async fn batch_get(
        &self,
        table: &TableSpec,
        ids: &[ItemId],
    ) -> LookasideResult<Vec<Record>> {
        let mut op = self.ctx.operation("batch_get", table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            batch::batch_get(&self.ctx, &mut op, table, ids).await
        }
        .await;
        op.finish(result)
    }

    pub async fn batch_get_cached(
        &self,
        table: &TableSpec,
        ids: &[ItemId],
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        self.read_batch("batch_get_cached", table, false, ids, ttl)
            .await
    }

    pub async fn batch_get_cached_versioned(
        &self,
        table: &TableSpec,
        ids: &[ItemId],
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        self.read_batch("batch_get_cached_versioned", table, true, ids, ttl)
            .await
    }

    async fn read_batch(
        &self,
        verb: &'static str,
        table: &TableSpec,
        versioned: bool,
        ids: &[ItemId],
        ttl: Option<Duration>,
    ) -> LookasideResult<Vec<Record>> {
        let mut op = self.ctx.operation(verb, table);
        let result: LookasideResult<_> = async {
            table.validate()?;
            let mode = if versioned {
                Mode::Versioned(table.require_version_attr()?)
            } else {
                Mode::Plain
            };
            let ttl = self.ctx.resolve_ttl(table, ttl)?;
            batch::batch_get_cached(&self.ctx, &mut op, table, mode, ttl, ids).await
        }
        .await;
        op.finish(result)
    }
}

impl std::fmt::Debug for DataAccess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataAccess")
            .field("config", &self.ctx.config)
            .field("cache", &self.ctx.cache.is_some())
            .finish_non_exhaustive()
    }
}
