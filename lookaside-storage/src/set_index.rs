//! Cached result sets of scans and queries.
//!
//! A result set is cached as a sorted set at its collection key, mapping the
//! member id of every result (`hash` or `hash!range`, always from the
//! table's own key attributes) to its position. Each result is cached under
//! its own item key. A cached set only answers a read when every member
//! still resolves, and in versioned mode passes the version check; a single
//! failure sends the whole read to the store.

use std::time::Duration;

use lookaside_core::{
    key_segment, IndexSpec, LookasideResult, Record, TableSpec, ValidationError, Value,
};

use crate::cache::Pipeline;
use crate::context::Context;
use crate::entry::Mode;
use crate::store::{KeyCondition, QueryRequest};
use crate::telemetry::Operation;
use crate::versioned::key_condition;

/// What a cached result set holds.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Source<'a> {
    /// Every item of the table.
    Scan,
    /// Every item sharing a hash value on the table itself.
    Query { hash: &'a Value },
    /// Every item sharing a hash value on a secondary index.
    Index { index: &'a IndexSpec, hash: &'a Value },
}

impl Source<'_> {
    fn collection_key(&self, ctx: &Context, spec: &TableSpec) -> LookasideResult<String> {
        Ok(match self {
            Self::Scan => ctx.keys.collection(&spec.name),
            Self::Query { hash } => {
                if spec.range_attr.is_none() {
                    return Err(ValidationError::InvalidValue {
                        field: format!("{}.range_attr", spec.name),
                        reason: "cached queries need a table with a range attribute".to_string(),
                    }
                    .into());
                }
                let hash = key_segment(&spec.hash_attr, hash)?;
                ctx.keys.range_collection(&spec.name, &hash)
            }
            Self::Index { index, hash } => {
                let hash = key_segment(&index.hash_attr, hash)?;
                ctx.keys.index_collection(&spec.name, &index.name, &hash)
            }
        })
    }

    async fn fetch(
        &self,
        ctx: &Context,
        op: &mut Operation<'_>,
        spec: &TableSpec,
    ) -> LookasideResult<Vec<Record>> {
        match self {
            Self::Scan => ctx.scan_all(op).await,
            Self::Query { hash } => {
                let key_condition =
                    key_condition(&spec.hash_attr, spec.range_attr.as_deref(), hash, None)?;
                let request = query_request(op, key_condition, None);
                ctx.query_all(op, request).await
            }
            Self::Index { index, hash } => {
                let key_condition =
                    key_condition(&index.hash_attr, index.range_attr.as_deref(), hash, None)?;
                let request = query_request(op, key_condition, Some(index.name.clone()));
                ctx.query_all(op, request).await
            }
        }
    }
}

fn query_request(
    op: &Operation<'_>,
    key_condition: KeyCondition,
    index_name: Option<String>,
) -> QueryRequest {
    QueryRequest {
        table: op.table().to_string(),
        index_name,
        key_condition,
        limit: None,
        exclusive_start_key: None,
        scan_forward: true,
    }
}

/// Read a result set through its cached collection.
pub(crate) async fn read(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    mode: Mode<'_>,
    ttl: Duration,
    source: Source<'_>,
) -> LookasideResult<Vec<Record>> {
    let collection = source.collection_key(ctx, spec)?;

    if let Some(items) = read_cached(ctx, op, spec, mode, &collection).await {
        op.hit();
        return Ok(items);
    }
    op.miss();

    let items = source.fetch(ctx, op, spec).await?;
    if items.is_empty() {
        return Ok(items);
    }
    match population(ctx, spec, mode, ttl, &collection, &items) {
        Ok(Some(pipeline)) => ctx.cache_populate(op, &collection, pipeline).await,
        Ok(None) => {}
        Err(e) => tracing::warn!(
            collection = %collection,
            error = %e,
            "Result set not cacheable"
        ),
    }
    Ok(items)
}

/// All-or-nothing lookup of a cached collection.
async fn read_cached(
    ctx: &Context,
    op: &mut Operation<'_>,
    spec: &TableSpec,
    mode: Mode<'_>,
    collection: &str,
) -> Option<Vec<Record>> {
    let mut replies = ctx
        .cache_read(op, collection, Pipeline::new().zrange(collection, 0, -1))
        .await?;
    let ids = match replies.pop()?.into_members() {
        Ok(ids) => ids,
        Err(e) => {
            op.cache_error(collection, &e);
            return None;
        }
    };
    if ids.is_empty() {
        return None;
    }

    let keys: Vec<String> = ids.iter().map(|id| ctx.keys.member(&spec.name, id)).collect();
    let pipeline = keys
        .iter()
        .fold(Pipeline::new(), |pipeline, key| mode.lookup(pipeline, key));
    let replies = ctx.cache_read(op, collection, pipeline).await?;

    let mut items = Vec::with_capacity(keys.len());
    for (key, reply) in keys.iter().zip(replies) {
        match mode.decode(key, reply) {
            Ok(Some(item)) => items.push(item),
            Ok(None) => {
                tracing::debug!(collection, key = %key, "Cached collection member missing");
                return None;
            }
            Err(e) => {
                op.cache_error(key, &e);
                return None;
            }
        }
    }
    Some(items)
}

/// Pipeline caching every item and then the collection itself.
///
/// `None` when some item cannot be cached in `mode`, in which case nothing
/// is written.
fn population(
    ctx: &Context,
    spec: &TableSpec,
    mode: Mode<'_>,
    ttl: Duration,
    collection: &str,
    items: &[Record],
) -> LookasideResult<Option<Pipeline>> {
    let mut pipeline = Pipeline::new();
    let mut members = Vec::with_capacity(items.len());
    for (position, item) in items.iter().enumerate() {
        let id = spec.member_id_of(item)?;
        let key = ctx.keys.member(&spec.name, &id);
        match mode.store(&key, item, ttl) {
            Ok(Some(entry)) => pipeline = pipeline.extend(entry),
            Ok(None) => return Ok(None),
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "Item not cacheable");
                return Ok(None);
            }
        }
        members.push((position as f64, id));
    }
    Ok(Some(
        pipeline
            .del(collection)
            .zadd_multiple(collection, members)
            .expire(collection, ttl),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheCommand;
    use crate::stats::AccessStats;
    use lookaside_core::{json, AccessConfig, KeyBuilder};
    use std::sync::Arc;

    fn context() -> Context {
        Context {
            store: Arc::new(crate::memory_store::MemoryStore::new()),
            cache: None,
            writer: None,
            keys: KeyBuilder::new("prefix."),
            config: AccessConfig::default(),
            stats: Arc::new(AccessStats::new()),
        }
    }

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_collection_keys() {
        let ctx = context();
        let pairs = TableSpec::new("group-user-pairs", "groupId").with_range("userId");
        let index = IndexSpec::new("by-user", "userId");
        let hash = json!("group-1");

        assert_eq!(
            Source::Scan.collection_key(&ctx, &pairs).unwrap(),
            "prefix.group-user-pairs"
        );
        assert_eq!(
            Source::Query { hash: &hash }.collection_key(&ctx, &pairs).unwrap(),
            "prefix.group-user-pairs!group-1"
        );
        assert_eq!(
            Source::Index {
                index: &index,
                hash: &json!("user-1")
            }
            .collection_key(&ctx, &pairs)
            .unwrap(),
            "prefix.group-user-pairs!by-user!user-1"
        );

        let users = TableSpec::new("users", "id");
        assert!(Source::Query { hash: &hash }
            .collection_key(&ctx, &users)
            .is_err());
    }

    #[test]
    fn test_population_layout() {
        let ctx = context();
        let table = TableSpec::new("group-user-pairs", "id").with_version("iv");
        let items = vec![
            record(json!({"id": "group-1|user-1", "iv": 0})),
            record(json!({"id": "group-2|user-1", "iv": 0})),
        ];
        let pipeline = population(
            &ctx,
            &table,
            Mode::Versioned("iv"),
            Duration::from_secs(60),
            "prefix.group-user-pairs",
            &items,
        )
        .unwrap()
        .unwrap();

        let names: Vec<_> = pipeline.commands().iter().map(CacheCommand::name).collect();
        assert_eq!(
            names,
            vec![
                "ZADD",
                "ZREMRANGEBYRANK",
                "EXPIRE",
                "ZADD",
                "ZREMRANGEBYRANK",
                "EXPIRE",
                "DEL",
                "ZADD",
                "EXPIRE"
            ]
        );
        assert_eq!(
            pipeline.commands()[7],
            CacheCommand::ZAdd {
                key: "prefix.group-user-pairs".to_string(),
                members: vec![
                    (0.0, "group-1|user-1".to_string()),
                    (1.0, "group-2|user-1".to_string()),
                ],
            }
        );
    }

    #[test]
    fn test_population_skips_unversioned_items() {
        let ctx = context();
        let table = TableSpec::new("users", "id").with_version("iv");
        let items = vec![record(json!({"id": "a", "iv": 1})), record(json!({"id": "b"}))];
        let pipeline = population(
            &ctx,
            &table,
            Mode::Versioned("iv"),
            Duration::from_secs(60),
            "prefix.users",
            &items,
        )
        .unwrap();
        assert!(pipeline.is_none());
    }
}
