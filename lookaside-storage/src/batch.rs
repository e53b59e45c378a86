//! Batch reads.
//!
//! Requested ids are deduplicated (first occurrence wins) and queued. Chunks
//! of at most `batch_chunk_size` ids are read one store call at a time; ids
//! the store reports unprocessed go back on the queue after a doubling
//! backoff. An id the store neither returns nor reports unprocessed breaks
//! the batch contract and fails the whole read.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use lookaside_core::{
    ItemId, LookasideError, LookasideResult, Record, TableSpec, MAX_BATCH_GET_KEYS,
};

use crate::cache::Pipeline;
use crate::context::Context;
use crate::entry::Mode;
use crate::store::BatchGetRequest;
use crate::telemetry::Operation;

/// An id resolved against its table: collection member id and store key.
#[derive(Debug, Clone)]
struct Pending {
    id: String,
    key: Record,
}

/// Resolve and deduplicate `ids`, keeping first occurrences in order.
fn dedup(spec: &TableSpec, ids: &[ItemId]) -> LookasideResult<Vec<Pending>> {
    let mut seen = HashSet::with_capacity(ids.len());
    let mut pending = Vec::with_capacity(ids.len());
    for id in ids {
        let (key, id) = spec.resolve(id)?;
        if seen.insert(id.clone()) {
            pending.push(Pending { id, key });
        } else {
            tracing::debug!(id = %id, "Dropping duplicate batch id");
        }
    }
    Ok(pending)
}

/// Read every id from the store, retrying unprocessed ids until drained.
pub(crate) async fn batch_get(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    ids: &[ItemId],
) -> LookasideResult<Vec<Record>> {
    let requested = dedup(spec, ids)?;
    fetch(ctx, op, spec, &requested).await
}

async fn fetch(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    requested: &[Pending],
) -> LookasideResult<Vec<Record>> {
    let chunk_size = ctx.config.batch_chunk_size.clamp(1, MAX_BATCH_GET_KEYS);
    let table = op.table().to_string();
    let mut queue: VecDeque<&Pending> = requested.iter().collect();
    let mut found: HashMap<String, Record> = HashMap::with_capacity(requested.len());
    let mut backoff = ctx.config.retry_backoff();

    while !queue.is_empty() {
        let take = chunk_size.min(queue.len());
        let chunk: Vec<&Pending> = queue.drain(..take).collect();
        let request = BatchGetRequest {
            table: table.clone(),
            keys: chunk.iter().map(|p| p.key.clone()).collect(),
        };
        let output = ctx.store.batch_get(request).await;
        let output = ctx.settle(op, output.map(|o| (o.consumed_capacity, o)))?;

        let unprocessed: HashSet<String> = output
            .unprocessed_keys
            .iter()
            .map(|key| spec.member_id_of(key))
            .collect::<Result<_, _>>()?;

        let wanted: HashSet<&str> = chunk.iter().map(|p| p.id.as_str()).collect();
        for item in output.items {
            let id = spec.member_id_of(&item)?;
            if wanted.contains(id.as_str()) {
                found.insert(id, item);
            } else {
                tracing::warn!(table = %table, id = %id, "Batch read returned an unrequested item");
            }
        }

        let mut missing = Vec::new();
        let mut retried = 0;
        for pending in chunk {
            if found.contains_key(&pending.id) {
                continue;
            }
            if unprocessed.contains(&pending.id) {
                queue.push_back(pending);
                retried += 1;
            } else {
                missing.push(pending.id.clone());
            }
        }
        if !missing.is_empty() {
            return Err(LookasideError::BatchProtocol {
                table,
                ids: missing,
            });
        }

        if retried > 0 {
            tracing::debug!(
                table = %table,
                retried,
                backoff_ms = backoff.as_millis(),
                "Retrying unprocessed batch ids"
            );
            if !backoff.is_zero() {
                tokio::time::sleep(backoff).await;
            }
            backoff = next_backoff(backoff, ctx.config.max_retry_backoff());
        }
    }

    Ok(requested
        .iter()
        .filter_map(|p| found.remove(&p.id))
        .collect())
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max)
}

/// Batch read through the cache: all ids hit or the store serves them all.
pub(crate) async fn batch_get_cached(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    mode: Mode<'_>,
    ttl: Duration,
    ids: &[ItemId],
) -> LookasideResult<Vec<Record>> {
    let requested = dedup(spec, ids)?;
    if requested.is_empty() {
        return Ok(Vec::new());
    }

    let keys: Vec<String> = requested
        .iter()
        .map(|p| ctx.keys.member(&spec.name, &p.id))
        .collect();
    if let Some(items) = read_cached(ctx, op, mode, &keys).await {
        op.hit();
        return Ok(items);
    }
    op.miss();

    let items = fetch(ctx, op, spec, &requested).await?;
    let mut pipeline = Pipeline::new();
    for item in &items {
        let key = ctx.keys.member(&spec.name, &spec.member_id_of(item)?);
        match mode.store(&key, item, ttl) {
            Ok(Some(entry)) => pipeline = pipeline.extend(entry),
            Ok(None) => {}
            Err(e) => op.cache_error(&key, &e),
        }
    }
    let label = ctx.keys.collection(&spec.name);
    ctx.cache_populate(op, &label, pipeline).await;
    Ok(items)
}

async fn read_cached(
    ctx: &Context,
    op: &mut Operation<'_>,
    mode: Mode<'_>,
    keys: &[String],
) -> Option<Vec<Record>> {
    let pipeline = keys
        .iter()
        .fold(Pipeline::new(), |pipeline, key| mode.lookup(pipeline, key));
    let replies = ctx.cache_read(op, &keys[0], pipeline).await?;

    let mut items = Vec::with_capacity(keys.len());
    for (key, reply) in keys.iter().zip(replies) {
        match mode.decode(key, reply) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => return None,
            Err(e) => {
                op.cache_error(key, &e);
                return None;
            }
        }
    }
    Some(items)
}
