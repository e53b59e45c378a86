//! Single-record look-aside caching.
//!
//! Reads try the cache first and fall back to the store on a miss, a stale
//! versioned entry or any cache fault; a store hit is queued for background
//! repopulation. Cached writes update the store first and then write the
//! cache through, awaiting it so an immediate read hits but never failing on
//! it. Deletes drop the cache entry after the store delete succeeds.

use std::time::Duration;

use lookaside_core::{ItemId, LookasideResult, Record, TableSpec};

use crate::cache::Pipeline;
use crate::context::Context;
use crate::entry::Mode;
use crate::telemetry::Operation;
use crate::versioned;

/// Cache key of the item `id` addresses.
fn item_key(ctx: &Context, spec: &TableSpec, id: &ItemId) -> LookasideResult<String> {
    let (_, member) = spec.resolve(id)?;
    Ok(ctx.keys.member(&spec.name, &member))
}

fn item_key_of(ctx: &Context, spec: &TableSpec, item: &Record) -> LookasideResult<String> {
    let member = spec.member_id_of(item)?;
    Ok(ctx.keys.member(&spec.name, &member))
}

/// Read through the cache entry of `id`.
pub(crate) async fn get_cached(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    mode: Mode<'_>,
    ttl: Duration,
    id: &ItemId,
) -> LookasideResult<Option<Record>> {
    let key = item_key(ctx, spec, id)?;

    if let Some(mut replies) = ctx.cache_read(op, &key, mode.lookup(Pipeline::new(), &key)).await {
        match replies.pop().map(|reply| mode.decode(&key, reply)) {
            Some(Ok(Some(item))) => {
                op.hit();
                return Ok(Some(item));
            }
            Some(Err(e)) => op.cache_error(&key, &e),
            _ => {}
        }
    }
    op.miss();

    let item = versioned::get(ctx, op, spec, id).await?;
    if let Some(item) = &item {
        match mode.store(&key, item, ttl) {
            Ok(Some(pipeline)) => ctx.cache_populate(op, &key, pipeline).await,
            Ok(None) => tracing::debug!(key = %key, "Item has no valid version, not caching"),
            Err(e) => op.cache_error(&key, &e),
        }
    }
    Ok(item)
}

/// Write `item` into its cache entry and wait for it.
async fn write_through(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    mode: Mode<'_>,
    ttl: Duration,
    item: &Record,
) -> LookasideResult<()> {
    let key = item_key_of(ctx, spec, item)?;
    match mode.store(&key, item, ttl) {
        Ok(Some(pipeline)) => ctx.cache_write(op, &key, pipeline).await,
        Ok(None) => {}
        Err(e) => op.cache_error(&key, &e),
    }
    Ok(())
}

/// Unconditional store put, then a plain cache write.
pub(crate) async fn put_cached(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    ttl: Duration,
    item: Record,
) -> LookasideResult<Record> {
    let item = versioned::put(ctx, op, spec, item).await?;
    write_through(ctx, op, spec, Mode::Plain, ttl, &item).await?;
    Ok(item)
}

pub(crate) async fn create_cached_versioned(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    ttl: Duration,
    item: Record,
) -> LookasideResult<Record> {
    let version_attr = spec.require_version_attr()?;
    let item = versioned::create_versioned(ctx, op, spec, item).await?;
    write_through(ctx, op, spec, Mode::Versioned(version_attr), ttl, &item).await?;
    Ok(item)
}

pub(crate) async fn update_cached_versioned(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    ttl: Duration,
    item: Record,
) -> LookasideResult<Record> {
    let version_attr = spec.require_version_attr()?;
    let item = versioned::update_versioned(ctx, op, spec, item).await?;
    write_through(ctx, op, spec, Mode::Versioned(version_attr), ttl, &item).await?;
    Ok(item)
}

/// Unconditional store delete, then drop the cache entry.
pub(crate) async fn delete_cached(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    id: &ItemId,
) -> LookasideResult<()> {
    let key = item_key(ctx, spec, id)?;
    versioned::delete(ctx, op, spec, id).await?;
    ctx.cache_write(op, &key, Pipeline::new().del(&key)).await;
    Ok(())
}

/// Version-checked store delete, then drop the cache entry.
pub(crate) async fn remove_cached_versioned(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    id: &ItemId,
    version: u64,
) -> LookasideResult<()> {
    let key = item_key(ctx, spec, id)?;
    versioned::remove_versioned(ctx, op, spec, id, version).await?;
    ctx.cache_write(op, &key, Pipeline::new().del(&key)).await;
    Ok(())
}
