//! In-memory key-value store.
//!
//! Behaves like a hash/range table service closely enough to exercise every
//! protocol in this crate: conditional writes, ordered scans and queries with
//! pagination, sparse secondary indices, bounded batch reads and consumed
//! capacity accounting.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use lookaside_core::{Record, StoreError, TableSpec, Value, MAX_BATCH_GET_KEYS};

use crate::store::{
    BatchGetOutput, BatchGetRequest, DeleteRequest, GetOutput, GetRequest, KeyValueStore, Page,
    PutRequest, QueryRequest, RangeOp, ScanRequest, WriteOutput,
};

const RESOURCE_NOT_FOUND: &str = "ResourceNotFoundException";
const VALIDATION: &str = "ValidationException";
const INTERNAL: &str = "InternalServerError";

/// Sortable rendering of a key attribute value.
#[derive(Debug, Clone)]
enum SortValue {
    Number(f64),
    String(String),
}

impl PartialEq for SortValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SortValue {}

impl Ord for SortValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b),
            (Self::Number(_), Self::String(_)) => Ordering::Less,
            (Self::String(_), Self::Number(_)) => Ordering::Greater,
            (Self::String(a), Self::String(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for SortValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl SortValue {
    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::String(s.clone())),
            _ => None,
        }
    }
}

type RowKey = (SortValue, Option<SortValue>);

#[derive(Debug, Clone)]
struct MemoryIndex {
    name: String,
    hash_attr: String,
    range_attr: Option<String>,
}

#[derive(Debug, Clone)]
struct MemoryTable {
    hash_attr: String,
    range_attr: Option<String>,
    indexes: Vec<MemoryIndex>,
    rows: BTreeMap<RowKey, Record>,
}

impl MemoryTable {
    fn row_key(&self, record: &Record) -> Result<RowKey, StoreError> {
        let hash = record
            .get(&self.hash_attr)
            .and_then(SortValue::from_value)
            .ok_or_else(|| invalid(format!("missing or invalid key attribute {}", self.hash_attr)))?;
        let range = match &self.range_attr {
            Some(attr) => Some(
                record
                    .get(attr)
                    .and_then(SortValue::from_value)
                    .ok_or_else(|| invalid(format!("missing or invalid key attribute {attr}")))?,
            ),
            None => None,
        };
        Ok((hash, range))
    }

    fn key_of(&self, record: &Record, index: Option<&MemoryIndex>) -> Record {
        let mut attrs = vec![Some(&self.hash_attr), self.range_attr.as_ref()];
        if let Some(index) = index {
            attrs.push(Some(&index.hash_attr));
            attrs.push(index.range_attr.as_ref());
        }
        let mut key = Record::new();
        for attr in attrs.into_iter().flatten() {
            if let Some(value) = record.get(attr) {
                key.insert(attr.clone(), value.clone());
            }
        }
        key
    }
}

/// In-memory [`KeyValueStore`] keyed by physical table name.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<HashMap<String, MemoryTable>>>,
    page_size: Option<usize>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Cap every scan/query page at `page_size` items, forcing pagination.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    /// Create (or reset) a table under its physical name.
    pub fn define_table(&self, physical_name: impl Into<String>, spec: &TableSpec) {
        let table = MemoryTable {
            hash_attr: spec.hash_attr.clone(),
            range_attr: spec.range_attr.clone(),
            indexes: spec
                .indexes
                .iter()
                .map(|index| MemoryIndex {
                    name: index.name.clone(),
                    hash_attr: index.hash_attr.clone(),
                    range_attr: index.range_attr.clone(),
                })
                .collect(),
            rows: BTreeMap::new(),
        };
        if let Ok(mut tables) = self.tables.write() {
            tables.insert(physical_name.into(), table);
        }
    }

    /// Write an item unconditionally, bypassing the async interface.
    pub fn insert(&self, table: &str, item: Record) -> Result<(), StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let table = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        let key = table.row_key(&item)?;
        table.rows.insert(key, item);
        Ok(())
    }

    /// Remove an item by key without any condition.
    pub fn remove(&self, table: &str, key: &Record) -> Result<Option<Record>, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let table = tables.get_mut(table).ok_or_else(|| not_found(table))?;
        let key = table.row_key(key)?;
        Ok(table.rows.remove(&key))
    }

    /// Snapshot of a table's items in key order.
    pub fn items(&self, table: &str) -> Vec<Record> {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.rows.values().cloned().collect()))
            .unwrap_or_default()
    }

    /// Number of items in a table.
    pub fn len(&self, table: &str) -> usize {
        self.tables
            .read()
            .ok()
            .and_then(|tables| tables.get(table).map(|t| t.rows.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self, table: &str) -> bool {
        self.len(table) == 0
    }

    fn page_limit(&self, limit: Option<usize>) -> Option<usize> {
        match (limit, self.page_size) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }
}

/// Read capacity: half a unit per started 4 KiB, doubled for strong reads.
fn read_units(items: &[&Record], consistent: bool) -> f64 {
    let bytes: usize = items.iter().map(|item| record_size(item)).sum();
    let units = (bytes.max(1) as f64 / 4096.0).ceil();
    if consistent {
        units
    } else {
        units / 2.0
    }
}

/// Write capacity: one unit per started 1 KiB.
fn write_units(item: &Record) -> f64 {
    (record_size(item).max(1) as f64 / 1024.0).ceil()
}

fn record_size(item: &Record) -> usize {
    serde_json::to_string(item).map(|s| s.len()).unwrap_or(0)
}

fn not_found(table: &str) -> StoreError {
    StoreError::InvalidRequest {
        code: RESOURCE_NOT_FOUND.to_string(),
        message: format!("table {table} does not exist"),
    }
}

fn invalid(message: String) -> StoreError {
    StoreError::InvalidRequest {
        code: VALIDATION.to_string(),
        message,
    }
}

fn poisoned() -> StoreError {
    StoreError::Fault {
        code: INTERNAL.to_string(),
        message: "store lock poisoned".to_string(),
    }
}

fn range_matches(value: Option<&Value>, op: &RangeOp) -> bool {
    let Some(value) = value else {
        return false;
    };
    let Some(actual) = SortValue::from_value(value) else {
        return false;
    };
    let compare = |bound: &Value| SortValue::from_value(bound).map(|b| actual.cmp(&b));
    match op {
        RangeOp::Eq(v) => compare(v) == Some(Ordering::Equal),
        RangeOp::Lt(v) => compare(v) == Some(Ordering::Less),
        RangeOp::Le(v) => matches!(compare(v), Some(Ordering::Less | Ordering::Equal)),
        RangeOp::Gt(v) => compare(v) == Some(Ordering::Greater),
        RangeOp::Ge(v) => matches!(compare(v), Some(Ordering::Greater | Ordering::Equal)),
        RangeOp::Between(low, high) => {
            matches!(compare(low), Some(Ordering::Greater | Ordering::Equal))
                && matches!(compare(high), Some(Ordering::Less | Ordering::Equal))
        }
        RangeOp::BeginsWith(prefix) => value.as_str().is_some_and(|s| s.starts_with(prefix)),
    }
}

/// Slice `rows` into one page after `start`, returning the continuation key.
fn paginate(
    table: &MemoryTable,
    index: Option<&MemoryIndex>,
    rows: Vec<&Record>,
    start: Option<&Record>,
    limit: Option<usize>,
) -> Result<(Vec<Record>, Option<Record>), StoreError> {
    let offset = match start {
        Some(start) => {
            let start_key = table.row_key(start)?;
            let position = rows
                .iter()
                .position(|row| table.row_key(row).ok().as_ref() == Some(&start_key));
            position.map(|p| p + 1).unwrap_or(rows.len())
        }
        None => 0,
    };
    let remaining = &rows[offset.min(rows.len())..];
    let take = limit.unwrap_or(remaining.len()).min(remaining.len());
    let page: Vec<Record> = remaining[..take].iter().map(|r| (*r).clone()).collect();
    let last_evaluated_key = if take < remaining.len() {
        page.last().map(|last| table.key_of(last, index))
    } else {
        None
    };
    Ok((page, last_evaluated_key))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, request: PutRequest) -> Result<WriteOutput, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let table = tables
            .get_mut(&request.table)
            .ok_or_else(|| not_found(&request.table))?;
        let key = table.row_key(&request.item)?;
        if let Some(condition) = &request.condition {
            if !condition.evaluate(table.rows.get(&key)) {
                return Err(StoreError::condition_failed());
            }
        }
        let consumed_capacity = write_units(&request.item);
        table.rows.insert(key, request.item);
        Ok(WriteOutput { consumed_capacity })
    }

    async fn get(&self, request: GetRequest) -> Result<GetOutput, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let table = tables
            .get(&request.table)
            .ok_or_else(|| not_found(&request.table))?;
        let key = table.row_key(&request.key)?;
        let item = table.rows.get(&key).cloned();
        let consumed_capacity = read_units(&item.iter().collect::<Vec<_>>(), request.consistent_read);
        Ok(GetOutput {
            item,
            consumed_capacity,
        })
    }

    async fn delete(&self, request: DeleteRequest) -> Result<WriteOutput, StoreError> {
        let mut tables = self.tables.write().map_err(|_| poisoned())?;
        let table = tables
            .get_mut(&request.table)
            .ok_or_else(|| not_found(&request.table))?;
        let key = table.row_key(&request.key)?;
        if let Some(condition) = &request.condition {
            if !condition.evaluate(table.rows.get(&key)) {
                return Err(StoreError::condition_failed());
            }
        }
        let consumed_capacity = table
            .rows
            .remove(&key)
            .map(|removed| write_units(&removed))
            .unwrap_or(1.0);
        Ok(WriteOutput { consumed_capacity })
    }

    async fn scan(&self, request: ScanRequest) -> Result<Page, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let table = tables
            .get(&request.table)
            .ok_or_else(|| not_found(&request.table))?;
        let rows: Vec<&Record> = table.rows.values().collect();
        let (items, last_evaluated_key) = paginate(
            table,
            None,
            rows,
            request.exclusive_start_key.as_ref(),
            self.page_limit(request.limit),
        )?;
        let consumed_capacity = read_units(&items.iter().collect::<Vec<_>>(), false);
        Ok(Page {
            items,
            last_evaluated_key,
            consumed_capacity,
        })
    }

    async fn query(&self, request: QueryRequest) -> Result<Page, StoreError> {
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let table = tables
            .get(&request.table)
            .ok_or_else(|| not_found(&request.table))?;

        let index = match &request.index_name {
            Some(name) => Some(
                table
                    .indexes
                    .iter()
                    .find(|index| &index.name == name)
                    .ok_or_else(|| invalid(format!("index {name} does not exist")))?,
            ),
            None => None,
        };
        let (hash_attr, range_attr) = match index {
            Some(index) => (&index.hash_attr, index.range_attr.as_ref()),
            None => (&table.hash_attr, table.range_attr.as_ref()),
        };
        let condition = &request.key_condition;
        if &condition.hash_attr != hash_attr {
            return Err(invalid(format!(
                "key condition must target {hash_attr}, not {}",
                condition.hash_attr
            )));
        }
        let wanted = SortValue::from_value(&condition.hash_value)
            .ok_or_else(|| invalid("hash value must be a string or number".to_string()))?;

        let mut rows: Vec<&Record> = table
            .rows
            .values()
            .filter(|row| row.get(hash_attr).and_then(SortValue::from_value).as_ref() == Some(&wanted))
            .filter(|row| match &condition.range {
                Some((attr, op)) => range_matches(row.get(attr), op),
                None => true,
            })
            .collect();

        if let Some(range_attr) = range_attr {
            rows.sort_by(|a, b| {
                let a = a.get(range_attr).and_then(SortValue::from_value);
                let b = b.get(range_attr).and_then(SortValue::from_value);
                a.cmp(&b)
            });
        }
        if !request.scan_forward {
            rows.reverse();
        }

        let (items, last_evaluated_key) = paginate(
            table,
            index,
            rows,
            request.exclusive_start_key.as_ref(),
            self.page_limit(request.limit),
        )?;
        let consumed_capacity = read_units(&items.iter().collect::<Vec<_>>(), false);
        Ok(Page {
            items,
            last_evaluated_key,
            consumed_capacity,
        })
    }

    async fn batch_get(&self, request: BatchGetRequest) -> Result<BatchGetOutput, StoreError> {
        if request.keys.len() > MAX_BATCH_GET_KEYS {
            return Err(invalid(format!(
                "too many keys in batch read: {} > {MAX_BATCH_GET_KEYS}",
                request.keys.len()
            )));
        }
        let tables = self.tables.read().map_err(|_| poisoned())?;
        let table = tables
            .get(&request.table)
            .ok_or_else(|| not_found(&request.table))?;
        let mut items = Vec::new();
        for key in &request.keys {
            if let Some(item) = table.rows.get(&table.row_key(key)?) {
                items.push(item.clone());
            }
        }
        let consumed_capacity = read_units(&items.iter().collect::<Vec<_>>(), false);
        Ok(BatchGetOutput {
            items,
            unprocessed_keys: Vec::new(),
            consumed_capacity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lookaside_core::{json, Condition, IndexSpec};

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    fn messages_store() -> MemoryStore {
        let store = MemoryStore::new();
        let spec = TableSpec::new("messages", "room")
            .with_range("seq")
            .with_index(IndexSpec::new("by-author", "author").with_range("seq"));
        store.define_table("t.messages", &spec);
        for (room, seq, author) in [
            ("room-1", 3, "ann"),
            ("room-1", 1, "bob"),
            ("room-1", 2, "ann"),
            ("room-2", 1, "ann"),
        ] {
            store
                .insert(
                    "t.messages",
                    record(json!({"room": room, "seq": seq, "author": author})),
                )
                .unwrap();
        }
        store
    }

    fn query(hash: &str, index: Option<&str>, hash_attr: &str) -> QueryRequest {
        QueryRequest {
            table: "t.messages".to_string(),
            index_name: index.map(str::to_string),
            key_condition: crate::store::KeyCondition {
                hash_attr: hash_attr.to_string(),
                hash_value: json!(hash),
                range: None,
            },
            limit: None,
            exclusive_start_key: None,
            scan_forward: true,
        }
    }

    #[tokio::test]
    async fn test_conditional_put() {
        let store = MemoryStore::new();
        store.define_table("t.users", &TableSpec::new("users", "id"));
        let item = record(json!({"id": "user-1"}));
        let create = |item: Record| PutRequest {
            table: "t.users".to_string(),
            item,
            condition: Some(Condition::not_exists("id")),
        };

        let out = store.put(create(item.clone())).await.unwrap();
        assert!(out.consumed_capacity >= 1.0);
        let err = store.put(create(item)).await.unwrap_err();
        assert!(err.is_condition_failed());
        assert_eq!(store.len("t.users"), 1);
    }

    #[tokio::test]
    async fn test_unknown_table() {
        let store = MemoryStore::new();
        let err = store
            .get(GetRequest {
                table: "t.nope".to_string(),
                key: record(json!({"id": "x"})),
                consistent_read: false,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), RESOURCE_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_query_orders_by_range() {
        let store = messages_store();
        let page = store.query(query("room-1", None, "room")).await.unwrap();
        let seqs: Vec<_> = page.items.iter().map(|i| i["seq"].clone()).collect();
        assert_eq!(seqs, vec![json!(1), json!(2), json!(3)]);
        assert!(page.last_evaluated_key.is_none());

        let mut backwards = query("room-1", None, "room");
        backwards.scan_forward = false;
        let page = store.query(backwards).await.unwrap();
        assert_eq!(page.items[0]["seq"], json!(3));
    }

    #[tokio::test]
    async fn test_query_range_condition() {
        let store = messages_store();
        let mut request = query("room-1", None, "room");
        request.key_condition.range = Some(("seq".to_string(), RangeOp::Ge(json!(2))));
        let page = store.query(request).await.unwrap();
        assert_eq!(page.items.len(), 2);
    }

    #[tokio::test]
    async fn test_index_query() {
        let store = messages_store();
        let page = store
            .query(query("ann", Some("by-author"), "author"))
            .await
            .unwrap();
        assert_eq!(page.items.len(), 3);
        assert!(page.items.iter().all(|i| i["author"] == json!("ann")));
    }

    #[tokio::test]
    async fn test_scan_pagination() {
        let store = messages_store().with_page_size(3);
        let first = store
            .scan(ScanRequest {
                table: "t.messages".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(first.items.len(), 3);
        let start = first.last_evaluated_key.clone();
        assert!(start.is_some());

        let second = store
            .scan(ScanRequest {
                table: "t.messages".to_string(),
                limit: None,
                exclusive_start_key: start,
            })
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.last_evaluated_key.is_none());
    }

    #[tokio::test]
    async fn test_batch_get_limits() {
        let store = messages_store();
        let keys = vec![record(json!({"room": "room-1", "seq": 1})); 101];
        let err = store
            .batch_get(BatchGetRequest {
                table: "t.messages".to_string(),
                keys,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), VALIDATION);

        let out = store
            .batch_get(BatchGetRequest {
                table: "t.messages".to_string(),
                keys: vec![
                    record(json!({"room": "room-1", "seq": 1})),
                    record(json!({"room": "room-9", "seq": 1})),
                ],
            })
            .await
            .unwrap();
        assert_eq!(out.items.len(), 1);
        assert!(out.unprocessed_keys.is_empty());
    }

    #[tokio::test]
    async fn test_conditional_delete() {
        let store = messages_store();
        let key = record(json!({"room": "room-2", "seq": 1}));
        let err = store
            .delete(DeleteRequest {
                table: "t.messages".to_string(),
                key: key.clone(),
                condition: Some(Condition::equals("author", "bob")),
            })
            .await
            .unwrap_err();
        assert!(err.is_condition_failed());

        store
            .delete(DeleteRequest {
                table: "t.messages".to_string(),
                key,
                condition: Some(Condition::equals("author", "ann")),
            })
            .await
            .unwrap();
        assert_eq!(store.len("t.messages"), 3);
    }
}
