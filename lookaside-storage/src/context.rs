//! Shared handles and helpers used by every protocol.

use std::sync::Arc;
use std::time::Duration;

use lookaside_core::{
    AccessConfig, CacheError, CacheResult, KeyBuilder, LookasideError, LookasideResult, Record,
    StoreError, TableSpec, ValidationError,
};

use crate::cache::{CacheReply, LookasideCache, Pipeline};
use crate::stats::AccessStats;
use crate::store::{GetRequest, KeyValueStore, Page, QueryRequest, ScanRequest};
use crate::telemetry::Operation;
use crate::writer::CacheWriter;

pub(crate) struct Context {
    pub(crate) store: Arc<dyn KeyValueStore>,
    pub(crate) cache: Option<Arc<dyn LookasideCache>>,
    pub(crate) writer: Option<CacheWriter>,
    pub(crate) keys: KeyBuilder,
    pub(crate) config: AccessConfig,
    pub(crate) stats: Arc<AccessStats>,
}

impl Context {
    pub(crate) fn operation(&self, verb: &'static str, spec: &TableSpec) -> Operation<'_> {
        Operation::start(verb, self.keys.physical_table(&spec.name), &self.stats)
    }

    /// TTL for a cache write: the caller's, else the table's, else the
    /// configured default. Must be positive.
    pub(crate) fn resolve_ttl(
        &self,
        spec: &TableSpec,
        ttl: Option<Duration>,
    ) -> Result<Duration, ValidationError> {
        let ttl = ttl
            .or(spec.default_ttl)
            .unwrap_or_else(|| self.config.default_ttl());
        if ttl.is_zero() {
            return Err(ValidationError::InvalidValue {
                field: "ttl".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        Ok(ttl)
    }

    /// The cache, if one is configured and connected.
    fn connected_cache(&self) -> Option<&Arc<dyn LookasideCache>> {
        self.cache.as_ref().filter(|cache| cache.is_connected())
    }

    /// Run a read pipeline. Any cache fault is logged and yields `None`.
    pub(crate) async fn cache_read(
        &self,
        op: &mut Operation<'_>,
        key: &str,
        pipeline: Pipeline,
    ) -> Option<Vec<CacheReply>> {
        let cache = self.connected_cache()?;
        let expected = pipeline.len();
        match cache.execute(pipeline).await {
            Ok(replies) if replies.len() == expected => Some(replies),
            Ok(_) => {
                op.cache_error(
                    key,
                    &CacheError::UnexpectedReply {
                        command: "pipeline".to_string(),
                    },
                );
                None
            }
            Err(e) => {
                op.cache_error(key, &e);
                None
            }
        }
    }

    /// Write through to the cache and wait for it. Faults are only logged.
    pub(crate) async fn cache_write(&self, op: &mut Operation<'_>, key: &str, pipeline: Pipeline) {
        let Some(cache) = self.connected_cache() else {
            return;
        };
        if let Err(e) = cache.execute(pipeline).await {
            op.cache_error(key, &e);
        }
    }

    /// Repopulate the cache in the background after a store hit.
    pub(crate) async fn cache_populate(&self, op: &mut Operation<'_>, key: &str, pipeline: Pipeline) {
        if self.connected_cache().is_none() || pipeline.is_empty() {
            return;
        }
        match &self.writer {
            Some(writer) => writer.submit(op.verb(), pipeline),
            None => self.cache_write(op, key, pipeline).await,
        }
    }

    /// Wait for queued background writes.
    pub(crate) async fn flush(&self) {
        if let Some(writer) = &self.writer {
            writer.flush().await;
        }
    }

    pub(crate) async fn store_get(
        &self,
        op: &mut Operation<'_>,
        key: Record,
    ) -> LookasideResult<Option<Record>> {
        let output = self
            .store
            .get(GetRequest {
                table: op.table().to_string(),
                key,
                consistent_read: self.config.consistent_reads,
            })
            .await;
        let output = self.settle(op, output.map(|o| (o.consumed_capacity, o)))?;
        Ok(output.item)
    }

    pub(crate) async fn store_scan(
        &self,
        op: &mut Operation<'_>,
        request: ScanRequest,
    ) -> LookasideResult<Page> {
        let output = self.store.scan(request).await;
        self.settle(op, output.map(|p| (p.consumed_capacity, p)))
    }

    pub(crate) async fn store_query(
        &self,
        op: &mut Operation<'_>,
        request: QueryRequest,
    ) -> LookasideResult<Page> {
        let output = self.store.query(request).await;
        self.settle(op, output.map(|p| (p.consumed_capacity, p)))
    }

    /// Every item of a scan, following continuation keys to the end.
    pub(crate) async fn scan_all(&self, op: &mut Operation<'_>) -> LookasideResult<Vec<Record>> {
        let table = op.table().to_string();
        let mut items = Vec::new();
        let mut start = None;
        loop {
            let request = ScanRequest {
                table: table.clone(),
                limit: None,
                exclusive_start_key: start.take(),
            };
            let page = self.store_scan(op, request).await?;
            items.extend(page.items);
            match page.last_evaluated_key {
                Some(key) => start = Some(key),
                None => return Ok(items),
            }
        }
    }

    /// Every item of a query, following continuation keys to the end.
    pub(crate) async fn query_all(
        &self,
        op: &mut Operation<'_>,
        mut request: QueryRequest,
    ) -> LookasideResult<Vec<Record>> {
        let mut items = Vec::new();
        loop {
            let page = self.store_query(op, request.clone()).await?;
            items.extend(page.items);
            match page.last_evaluated_key {
                Some(key) => request.exclusive_start_key = Some(key),
                None => return Ok(items),
            }
        }
    }

    /// Account for a store response and lift its error.
    pub(crate) fn settle<T>(
        &self,
        op: &mut Operation<'_>,
        output: Result<(f64, T), StoreError>,
    ) -> LookasideResult<T> {
        match output {
            Ok((capacity, value)) => {
                op.store_call(capacity);
                Ok(value)
            }
            Err(e) => {
                op.store_call(0.0);
                Err(LookasideError::Store(e))
            }
        }
    }
}

/// Parse a cached JSON payload into a record.
pub(crate) fn decode_record(key: &str, payload: &str) -> CacheResult<Record> {
    serde_json::from_str(payload).map_err(|e| CacheError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

/// Serialize a record as a cache payload.
pub(crate) fn encode_record(key: &str, item: &Record) -> CacheResult<String> {
    serde_json::to_string(item).map_err(|e| CacheError::Decode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
