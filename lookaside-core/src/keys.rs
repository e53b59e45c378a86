//! Cache key construction.
//!
//! Every cache key the data-access layer reads or writes is derived here, one
//! function per key shape:
//!
//! | shape | format |
//! |---|---|
//! | item | `{prefix}{table}!{hash}` or `{prefix}{table}!{hash}!{range}` |
//! | scan collection | `{prefix}{table}` |
//! | range-query collection | `{prefix}{table}!{hash}` |
//! | index collection | `{prefix}{table}!{index}!{indexHash}` |
//!
//! Segments are never escaped. A hash value containing `!` can therefore
//! produce the same key as a different (hash, range) pair: `("a!b", None)`
//! and `("a", Some("b"))` both map to `{prefix}{table}!a!b`. Callers that
//! admit `!` in key values must rule this out themselves.

/// Delimiter between key segments.
pub const KEY_DELIMITER: char = '!';

/// Member id of a record inside a cached collection: `hash` or `hash!range`.
pub fn member_id(hash: &str, range: Option<&str>) -> String {
    match range {
        Some(range) => format!("{hash}{KEY_DELIMITER}{range}"),
        None => hash.to_string(),
    }
}

/// Cache key of a single record.
pub fn item_key(prefix: &str, table: &str, hash: &str, range: Option<&str>) -> String {
    member_key(prefix, table, &member_id(hash, range))
}

/// Cache key of a single record addressed by its collection member id.
pub fn member_key(prefix: &str, table: &str, member_id: &str) -> String {
    format!("{prefix}{table}{KEY_DELIMITER}{member_id}")
}

/// Collection key of a whole-table scan.
pub fn collection_key(prefix: &str, table: &str) -> String {
    format!("{prefix}{table}")
}

/// Collection key of a query over one hash partition of the table.
pub fn range_collection_key(prefix: &str, table: &str, hash: &str) -> String {
    format!("{prefix}{table}{KEY_DELIMITER}{hash}")
}

/// Collection key of a secondary-index query.
pub fn index_collection_key(prefix: &str, table: &str, index: &str, index_hash: &str) -> String {
    format!("{prefix}{table}{KEY_DELIMITER}{index}{KEY_DELIMITER}{index_hash}")
}

/// Key functions bound to one configured prefix.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyBuilder {
    prefix: String,
}

impl KeyBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Physical store table name for a logical table.
    pub fn physical_table(&self, table: &str) -> String {
        format!("{}{}", self.prefix, table)
    }

    pub fn item(&self, table: &str, hash: &str, range: Option<&str>) -> String {
        item_key(&self.prefix, table, hash, range)
    }

    pub fn member(&self, table: &str, member_id: &str) -> String {
        member_key(&self.prefix, table, member_id)
    }

    pub fn collection(&self, table: &str) -> String {
        collection_key(&self.prefix, table)
    }

    pub fn range_collection(&self, table: &str, hash: &str) -> String {
        range_collection_key(&self.prefix, table, hash)
    }

    pub fn index_collection(&self, table: &str, index: &str, index_hash: &str) -> String {
        index_collection_key(&self.prefix, table, index, index_hash)
    }
}
