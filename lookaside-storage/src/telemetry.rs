//! Per-operation timing, counters and the completion log line.

use std::time::Instant;

use lookaside_core::{CacheError, LookasideResult};

use crate::stats::AccessStats;

/// One in-flight data-access call.
///
/// Collects hits, misses and consumed capacity while the call runs and
/// emits a single structured event when it finishes.
pub(crate) struct Operation<'a> {
    verb: &'static str,
    table: String,
    started: Instant,
    hits: u64,
    misses: u64,
    capacity: f64,
    stats: &'a AccessStats,
}

impl<'a> Operation<'a> {
    pub(crate) fn start(verb: &'static str, table: String, stats: &'a AccessStats) -> Self {
        Self {
            verb,
            table,
            started: Instant::now(),
            hits: 0,
            misses: 0,
            capacity: 0.0,
            stats,
        }
    }

    pub(crate) fn verb(&self) -> &'static str {
        self.verb
    }

    /// Physical table name.
    pub(crate) fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn hit(&mut self) {
        self.hits += 1;
    }

    pub(crate) fn miss(&mut self) {
        self.misses += 1;
    }

    pub(crate) fn store_call(&mut self, capacity: f64) {
        self.capacity += capacity;
        self.stats.record_store_call(capacity);
    }

    /// A swallowed cache fault; the caller carries on as on a miss.
    pub(crate) fn cache_error(&mut self, key: &str, error: &CacheError) {
        self.stats.record_cache_error();
        tracing::warn!(
            verb = self.verb,
            table = %self.table,
            key,
            error = %error,
            "Cache unavailable, falling back to store"
        );
    }

    pub(crate) fn finish<T>(self, result: LookasideResult<T>) -> LookasideResult<T> {
        self.stats.record_hits(self.hits);
        self.stats.record_misses(self.misses);
        let duration = self.started.elapsed();

        match &result {
            Ok(_) => tracing::debug!(
                verb = self.verb,
                table = %self.table,
                hits = self.hits,
                misses = self.misses,
                capacity = self.capacity,
                duration_ms = duration.as_millis(),
                "Operation completed"
            ),
            Err(e) if e.is_condition_failed() => tracing::warn!(
                verb = self.verb,
                table = %self.table,
                code = e.store_code().unwrap_or_default(),
                capacity = self.capacity,
                duration_ms = duration.as_millis(),
                "Conditional write rejected"
            ),
            Err(e) => match e.store_code() {
                Some(code) => tracing::error!(
                    verb = self.verb,
                    table = %self.table,
                    code,
                    error = %e,
                    duration_ms = duration.as_millis(),
                    "Operation failed"
                ),
                None => tracing::warn!(
                    verb = self.verb,
                    table = %self.table,
                    error = %e,
                    duration_ms = duration.as_millis(),
                    "Operation failed"
                ),
            },
        }
        result
    }
}
