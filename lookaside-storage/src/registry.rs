//! Declarative repositories.
//!
//! A repository is a set of named methods, each bound to one data-access
//! verb on one table. The bindings are read once from a
//! [`RepositoryConfig`], usually a TOML document:
//!
//! ```toml
//! [[tables]]
//! name = "users"
//! hash_attr = "id"
//! version_attr = "iv"
//! ttl_secs = 60
//!
//! [[tables.methods]]
//! name = "getUser"
//! verb = "get_cached_versioned"
//!
//! [[tables.methods]]
//! name = "updateUser"
//! verb = "update_cached_versioned"
//! ```
//!
//! and dispatched with [`Repository::call`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use lookaside_core::{
    ConfigError, IndexSpec, ItemId, LookasideResult, Record, TableSpec, ValidationError, Value,
};
use serde::{Deserialize, Serialize};

use crate::access::DataAccess;
use crate::store::{Page, RangeOp};
use crate::versioned::PageOptions;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Every data-access operation a method can be bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    Get,
    GetCached,
    GetCachedVersioned,
    Put,
    PutCached,
    Create,
    CreateVersioned,
    CreateCachedVersioned,
    UpdateVersioned,
    UpdateCachedVersioned,
    Delete,
    DeleteCached,
    RemoveVersioned,
    RemoveCachedVersioned,
    Scan,
    ScanCached,
    ScanCachedVersioned,
    Query,
    QueryCached,
    QueryCachedVersioned,
    QueryIndex,
    QueryIndexCached,
    QueryIndexCachedVersioned,
    BatchGet,
    BatchGetCached,
    BatchGetCachedVersioned,
}

impl Verb {
    pub fn uses_index(self) -> bool {
        matches!(
            self,
            Self::QueryIndex | Self::QueryIndexCached | Self::QueryIndexCachedVersioned
        )
    }

    pub fn is_versioned(self) -> bool {
        matches!(
            self,
            Self::GetCachedVersioned
                | Self::CreateVersioned
                | Self::CreateCachedVersioned
                | Self::UpdateVersioned
                | Self::UpdateCachedVersioned
                | Self::RemoveVersioned
                | Self::RemoveCachedVersioned
                | Self::ScanCachedVersioned
                | Self::QueryCachedVersioned
                | Self::QueryIndexCachedVersioned
                | Self::BatchGetCachedVersioned
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub name: String,
    pub hash_attr: String,
    #[serde(default)]
    pub range_attr: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodConfig {
    pub name: String,
    pub verb: Verb,
    /// Secondary index for the `query_index*` verbs.
    #[serde(default)]
    pub index: Option<String>,
    /// Overrides the table TTL for cached verbs.
    #[serde(default)]
    pub ttl_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub hash_attr: String,
    #[serde(default)]
    pub range_attr: Option<String>,
    #[serde(default)]
    pub version_attr: Option<String>,
    #[serde(default)]
    pub ttl_secs: Option<u64>,
    #[serde(default)]
    pub indexes: Vec<IndexConfig>,
    #[serde(default)]
    pub methods: Vec<MethodConfig>,
}

impl TableConfig {
    fn to_spec(&self) -> Result<TableSpec, ConfigError> {
        let mut spec = TableSpec::new(&self.name, &self.hash_attr);
        if let Some(range) = &self.range_attr {
            spec = spec.with_range(range);
        }
        if let Some(version) = &self.version_attr {
            spec = spec.with_version(version);
        }
        if let Some(ttl) = self.ttl_secs {
            spec = spec.with_default_ttl(positive_ttl(&self.name, ttl)?);
        }
        for index in &self.indexes {
            let mut index_spec = IndexSpec::new(&index.name, &index.hash_attr);
            if let Some(range) = &index.range_attr {
                index_spec = index_spec.with_range(range);
            }
            spec = spec.with_index(index_spec);
        }
        spec.validate().map_err(|e| ConfigError::InvalidValue {
            field: format!("tables.{}", self.name),
            value: self.name.clone(),
            reason: e.to_string(),
        })?;
        Ok(spec)
    }
}

/// Tables and the methods bound to them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    #[serde(default)]
    pub tables: Vec<TableConfig>,
}

impl RepositoryConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        toml::from_str(source).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }
}

fn positive_ttl(field: &str, secs: u64) -> Result<Duration, ConfigError> {
    if secs == 0 {
        return Err(ConfigError::InvalidValue {
            field: format!("{field}.ttl_secs"),
            value: "0".to_string(),
            reason: "must be at least one second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

// ============================================================================
// DISPATCH
// ============================================================================

/// Arguments of a repository call. Which variant a method accepts depends
/// on its verb.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    /// `get*`, `delete*`.
    Id(ItemId),
    /// `put*`, `create*`, `update*`.
    Item(Record),
    /// `remove*`.
    Versioned { id: ItemId, version: u64 },
    /// `scan`.
    Page(PageOptions),
    /// `scan_cached*`.
    All,
    /// `query`, `query_index`.
    Query {
        hash: Value,
        range: Option<RangeOp>,
        options: PageOptions,
    },
    /// `query_cached*`, `query_index_cached*`.
    Hash(Value),
    /// `batch_get*`.
    Ids(Vec<ItemId>),
}

impl Request {
    fn kind(&self) -> &'static str {
        match self {
            Self::Id(_) => "id",
            Self::Item(_) => "item",
            Self::Versioned { .. } => "versioned id",
            Self::Page(_) => "page options",
            Self::All => "no arguments",
            Self::Query { .. } => "query",
            Self::Hash(_) => "hash value",
            Self::Ids(_) => "ids",
        }
    }
}

/// Result of a repository call.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A lookup that may find nothing.
    Found(Option<Record>),
    /// The persisted record of a write.
    Written(Record),
    Items(Vec<Record>),
    Page(Page),
    Done,
}

#[derive(Debug, Clone)]
struct Binding {
    table: TableSpec,
    verb: Verb,
    index: Option<String>,
    ttl: Option<Duration>,
}

/// Named methods dispatched onto a [`DataAccess`].
pub struct Repository {
    access: Arc<DataAccess>,
    methods: HashMap<String, Binding>,
}

impl Repository {
    /// Build the method table, rejecting duplicate names and bindings that
    /// cannot work (index verbs without a known index, versioned verbs on
    /// tables without a version attribute).
    pub fn from_config(access: Arc<DataAccess>, config: &RepositoryConfig) -> LookasideResult<Self> {
        let mut methods = HashMap::new();
        for table in &config.tables {
            let spec = table.to_spec()?;
            for method in &table.methods {
                let binding = bind(&spec, method)?;
                if methods.insert(method.name.clone(), binding).is_some() {
                    return Err(ConfigError::DuplicateMethod {
                        name: method.name.clone(),
                    }
                    .into());
                }
            }
        }
        tracing::debug!(methods = methods.len(), "Repository built");
        Ok(Self { access, methods })
    }

    pub fn from_toml_str(access: Arc<DataAccess>, source: &str) -> LookasideResult<Self> {
        let config = RepositoryConfig::from_toml_str(source)?;
        Self::from_config(access, &config)
    }

    /// Method names, sorted.
    pub fn methods(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.methods.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn verb(&self, method: &str) -> Option<Verb> {
        self.methods.get(method).map(|b| b.verb)
    }

    pub fn table(&self, method: &str) -> Option<&TableSpec> {
        self.methods.get(method).map(|b| &b.table)
    }

    pub fn access(&self) -> &DataAccess {
        &self.access
    }

    /// Run `method` with `request`.
    pub async fn call(&self, method: &str, request: Request) -> LookasideResult<Outcome> {
        let binding = self
            .methods
            .get(method)
            .ok_or_else(|| ValidationError::InvalidValue {
                field: "method".to_string(),
                reason: format!("unknown repository method {method}"),
            })?;
        let access = &self.access;
        let table = &binding.table;
        let ttl = binding.ttl;
        let index = binding.index.as_deref().unwrap_or_default();

        let outcome = match (binding.verb, request) {
            (Verb::Get, Request::Id(id)) => Outcome::Found(access.get(table, &id).await?),
            (Verb::GetCached, Request::Id(id)) => {
                Outcome::Found(access.get_cached(table, &id, ttl).await?)
            }
            (Verb::GetCachedVersioned, Request::Id(id)) => {
                Outcome::Found(access.get_cached_versioned(table, &id, ttl).await?)
            }
            (Verb::Put, Request::Item(item)) => Outcome::Written(access.put(table, item).await?),
            (Verb::PutCached, Request::Item(item)) => {
                Outcome::Written(access.put_cached(table, item, ttl).await?)
            }
            (Verb::Create, Request::Item(item)) => {
                Outcome::Written(access.create(table, item).await?)
            }
            (Verb::CreateVersioned, Request::Item(item)) => {
                Outcome::Written(access.create_versioned(table, item).await?)
            }
            (Verb::CreateCachedVersioned, Request::Item(item)) => {
                Outcome::Written(access.create_cached_versioned(table, item, ttl).await?)
            }
            (Verb::UpdateVersioned, Request::Item(item)) => {
                Outcome::Written(access.update_versioned(table, item).await?)
            }
            (Verb::UpdateCachedVersioned, Request::Item(item)) => {
                Outcome::Written(access.update_cached_versioned(table, item, ttl).await?)
            }
            (Verb::Delete, Request::Id(id)) => {
                access.delete(table, &id).await?;
                Outcome::Done
            }
            (Verb::DeleteCached, Request::Id(id)) => {
                access.delete_cached(table, &id).await?;
                Outcome::Done
            }
            (Verb::RemoveVersioned, Request::Versioned { id, version }) => {
                match id.range {
                    Some(range) => {
                        access
                            .remove_ranged_versioned(table, id.hash, range, version)
                            .await?
                    }
                    None => access.remove_versioned(table, id.hash, version).await?,
                }
                Outcome::Done
            }
            (Verb::RemoveCachedVersioned, Request::Versioned { id, version }) => {
                access.remove_cached_versioned(table, &id, version).await?;
                Outcome::Done
            }
            (Verb::Scan, Request::Page(options)) => Outcome::Page(access.scan(table, options).await?),
            (Verb::ScanCached, Request::All) => {
                Outcome::Items(access.scan_cached(table, ttl).await?)
            }
            (Verb::ScanCachedVersioned, Request::All) => {
                Outcome::Items(access.scan_cached_versioned(table, ttl).await?)
            }
            (
                Verb::Query,
                Request::Query {
                    hash,
                    range,
                    options,
                },
            ) => Outcome::Page(access.query(table, &hash, range, options).await?),
            (Verb::QueryCached, Request::Hash(hash)) => {
                Outcome::Items(access.query_cached(table, &hash, ttl).await?)
            }
            (Verb::QueryCachedVersioned, Request::Hash(hash)) => {
                Outcome::Items(access.query_cached_versioned(table, &hash, ttl).await?)
            }
            (
                Verb::QueryIndex,
                Request::Query {
                    hash,
                    range,
                    options,
                },
            ) => Outcome::Page(
                access
                    .query_index(table, index, &hash, range, options)
                    .await?,
            ),
            (Verb::QueryIndexCached, Request::Hash(hash)) => {
                Outcome::Items(access.query_index_cached(table, index, &hash, ttl).await?)
            }
            (Verb::QueryIndexCachedVersioned, Request::Hash(hash)) => Outcome::Items(
                access
                    .query_index_cached_versioned(table, index, &hash, ttl)
                    .await?,
            ),
            (Verb::BatchGet, Request::Ids(ids)) => {
                Outcome::Items(access.batch_get(table, &ids).await?)
            }
            (Verb::BatchGetCached, Request::Ids(ids)) => {
                Outcome::Items(access.batch_get_cached(table, &ids, ttl).await?)
            }
            (Verb::BatchGetCachedVersioned, Request::Ids(ids)) => {
                Outcome::Items(access.batch_get_cached_versioned(table, &ids, ttl).await?)
            }
            (verb, request) => {
                return Err(ValidationError::InvalidValue {
                    field: method.to_string(),
                    reason: format!("{verb:?} does not accept {}", request.kind()),
                }
                .into())
            }
        };
        Ok(outcome)
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("methods", &self.methods())
            .finish_non_exhaustive()
    }
}

fn bind(spec: &TableSpec, method: &MethodConfig) -> Result<Binding, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidValue {
        field: format!("{}.{}", spec.name, method.name),
        value: format!("{:?}", method.verb),
        reason,
    };
    if method.name.trim().is_empty() {
        return Err(ConfigError::MissingRequired {
            field: format!("{}.methods.name", spec.name),
        });
    }
    match (&method.index, method.verb.uses_index()) {
        (Some(index), true) => {
            spec.index(index).map_err(|e| invalid(e.to_string()))?;
        }
        (None, true) => return Err(invalid("index verbs need an index".to_string())),
        (Some(_), false) => return Err(invalid("verb does not take an index".to_string())),
        (None, false) => {}
    }
    if method.verb.is_versioned() && spec.version_attr.is_none() {
        return Err(invalid("table has no version attribute".to_string()));
    }
    let ttl = method
        .ttl_secs
        .map(|secs| positive_ttl(&method.name, secs))
        .transpose()?;
    Ok(Binding {
        table: spec.clone(),
        verb: method.verb,
        index: method.index.clone(),
        ttl,
    })
}
