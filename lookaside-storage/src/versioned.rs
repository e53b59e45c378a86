//! Optimistic concurrency over conditional writes.
//!
//! A versioned record carries a non-negative integer version that starts at
//! 0 and advances by exactly one per accepted update. Every mutation is a
//! conditional write against the version the caller observed; a mismatch is
//! reported as [`LookasideError::ConcurrencyConflict`] and never retried.

use lookaside_core::{
    key_segment, read_version, set_version, validate_version, Condition, ItemId, LookasideError,
    LookasideResult, Record, StoreError, TableSpec, ValidationError, Value, VersionState,
};

use crate::context::Context;
use crate::store::{
    DeleteRequest, KeyCondition, Page, PutRequest, QueryRequest, RangeOp, ScanRequest,
};
use crate::telemetry::Operation;

/// Paging and ordering for single-page scans and queries.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOptions {
    pub limit: Option<usize>,
    pub exclusive_start_key: Option<Record>,
    pub scan_forward: bool,
}

impl Default for PageOptions {
    fn default() -> Self {
        Self {
            limit: None,
            exclusive_start_key: None,
            scan_forward: true,
        }
    }
}

impl PageOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn starting_after(mut self, key: Record) -> Self {
        self.exclusive_start_key = Some(key);
        self
    }

    pub fn reversed(mut self) -> Self {
        self.scan_forward = false;
        self
    }
}

fn duplicate_key(op: &Operation<'_>, err: StoreError) -> LookasideError {
    match err {
        StoreError::ConditionFailed { code } => LookasideError::DuplicateKey {
            table: op.table().to_string(),
            code,
        },
        other => LookasideError::Store(other),
    }
}

fn conflict(op: &Operation<'_>, err: StoreError) -> LookasideError {
    match err {
        StoreError::ConditionFailed { code } => LookasideError::ConcurrencyConflict {
            table: op.table().to_string(),
            code,
        },
        other => LookasideError::Store(other),
    }
}

async fn conditional_put(
    ctx: &Context,
    op: &mut Operation<'_>,
    item: Record,
    condition: Option<Condition>,
    on_condition_failed: fn(&Operation<'_>, StoreError) -> LookasideError,
) -> LookasideResult<Record> {
    let request = PutRequest {
        table: op.table().to_string(),
        item,
        condition,
    };
    match ctx.store.put(request.clone()).await {
        Ok(output) => {
            op.store_call(output.consumed_capacity);
            Ok(request.item)
        }
        Err(e) => {
            op.store_call(0.0);
            Err(on_condition_failed(op, e))
        }
    }
}

async fn conditional_delete(
    ctx: &Context,
    op: &mut Operation<'_>,
    key: Record,
    condition: Option<Condition>,
) -> LookasideResult<()> {
    let request = DeleteRequest {
        table: op.table().to_string(),
        key,
        condition,
    };
    match ctx.store.delete(request).await {
        Ok(output) => {
            op.store_call(output.consumed_capacity);
            Ok(())
        }
        Err(e) => {
            op.store_call(0.0);
            Err(conflict(op, e))
        }
    }
}

/// Unconditional upsert.
pub(crate) async fn put(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    item: Record,
) -> LookasideResult<Record> {
    spec.key_of(&item)?;
    conditional_put(ctx, op, item, None, |_, e| LookasideError::Store(e)).await
}

/// Insert `item`, failing with `DuplicateKey` if its hash already exists.
pub(crate) async fn create(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    item: Record,
) -> LookasideResult<Record> {
    spec.key_of(&item)?;
    let condition = Condition::not_exists(&spec.hash_attr);
    conditional_put(ctx, op, item, Some(condition), duplicate_key).await
}

/// Insert `item` at version 0.
pub(crate) async fn create_versioned(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    mut item: Record,
) -> LookasideResult<Record> {
    let version_attr = spec.require_version_attr()?;
    spec.key_of(&item)?;
    set_version(&mut item, version_attr, 0);
    let condition = Condition::not_exists(&spec.hash_attr);
    conditional_put(ctx, op, item, Some(condition), duplicate_key).await
}

/// Replace `item` if the stored version still equals the one it carries.
///
/// An item without a version is taken to be an existing record that was
/// never versioned; it is seeded at version 0, provided the stored record
/// still has no version either.
pub(crate) async fn update_versioned(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    mut item: Record,
) -> LookasideResult<Record> {
    let version_attr = spec.require_version_attr()?;
    spec.key_of(&item)?;
    let condition = match read_version(&item, version_attr)? {
        VersionState::Absent => {
            set_version(&mut item, version_attr, 0);
            Condition::exists(&spec.hash_attr).and(Condition::not_exists(version_attr))
        }
        VersionState::At(observed) => {
            let next = observed + 1;
            validate_version(version_attr, next)?;
            set_version(&mut item, version_attr, next);
            Condition::equals(version_attr, observed)
        }
    };
    conditional_put(ctx, op, item, Some(condition), conflict).await
}

pub(crate) async fn get(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    id: &ItemId,
) -> LookasideResult<Option<Record>> {
    let key = spec.key(&id.hash, id.range.as_ref())?;
    ctx.store_get(op, key).await
}

/// Unconditional delete.
pub(crate) async fn delete(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    id: &ItemId,
) -> LookasideResult<()> {
    let key = spec.key(&id.hash, id.range.as_ref())?;
    conditional_delete(ctx, op, key, None).await
}

/// Delete if the stored version equals `version`.
pub(crate) async fn remove_versioned(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    id: &ItemId,
    version: u64,
) -> LookasideResult<()> {
    let version_attr = spec.require_version_attr()?;
    validate_version(version_attr, version)?;
    let key = spec.key(&id.hash, id.range.as_ref())?;
    let condition = Condition::equals(version_attr, version);
    conditional_delete(ctx, op, key, Some(condition)).await
}

/// One page of a whole-table scan.
pub(crate) async fn scan(
    ctx: &Context,
    op: &mut Operation<'_>,
    options: PageOptions,
) -> LookasideResult<Page> {
    let request = ScanRequest {
        table: op.table().to_string(),
        limit: options.limit,
        exclusive_start_key: options.exclusive_start_key,
    };
    ctx.store_scan(op, request).await
}

/// One page of a query over the table or one of its indices.
pub(crate) async fn query(
    ctx: &Context,
    op: &mut Operation<'_>,
    key_condition: KeyCondition,
    index_name: Option<String>,
    options: PageOptions,
) -> LookasideResult<Page> {
    let request = QueryRequest {
        table: op.table().to_string(),
        index_name,
        key_condition,
        limit: options.limit,
        exclusive_start_key: options.exclusive_start_key,
        scan_forward: options.scan_forward,
    };
    ctx.store_query(op, request).await
}

/// Key condition for `hash` (and optionally a range predicate) on the
/// given key attributes.
pub(crate) fn key_condition(
    hash_attr: &str,
    range_attr: Option<&str>,
    hash: &Value,
    range: Option<RangeOp>,
) -> LookasideResult<KeyCondition> {
    key_segment(hash_attr, hash)?;
    let range = match (range_attr, range) {
        (Some(attr), Some(op)) => Some((attr.to_string(), op)),
        (None, Some(_)) => {
            return Err(ValidationError::InvalidValue {
                field: hash_attr.to_string(),
                reason: "range condition on a key without a range attribute".to_string(),
            }
            .into());
        }
        (_, None) => None,
    };
    Ok(KeyCondition {
        hash_attr: hash_attr.to_string(),
        hash_value: hash.clone(),
        range,
    })
}
