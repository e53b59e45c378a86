//! Table and secondary-index metadata.

use std::time::Duration;

use serde_json::Value;

use crate::error::ValidationError;
use crate::keys::member_id;
use crate::record::{key_segment, require_attr, require_name, Record};

/// Key values identifying one item: the hash value and, on composite
/// tables, the range value.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemId {
    pub hash: Value,
    pub range: Option<Value>,
}

impl ItemId {
    pub fn new(hash: impl Into<Value>) -> Self {
        Self {
            hash: hash.into(),
            range: None,
        }
    }

    pub fn ranged(hash: impl Into<Value>, range: impl Into<Value>) -> Self {
        Self {
            hash: hash.into(),
            range: Some(range.into()),
        }
    }
}

impl From<&str> for ItemId {
    fn from(hash: &str) -> Self {
        Self::new(hash)
    }
}

/// A secondary index of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    pub name: String,
    pub hash_attr: String,
    pub range_attr: Option<String>,
}

impl IndexSpec {
    pub fn new(name: impl Into<String>, hash_attr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash_attr: hash_attr.into(),
            range_attr: None,
        }
    }

    pub fn with_range(mut self, range_attr: impl Into<String>) -> Self {
        self.range_attr = Some(range_attr.into());
        self
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        require_name("index.name", &self.name)?;
        require_name("index.hash_attr", &self.hash_attr)?;
        if let Some(range) = &self.range_attr {
            require_name("index.range_attr", range)?;
        }
        Ok(())
    }
}

/// A logical table: its key schema, optional version attribute and indices.
///
/// The physical table name is the configured prefix followed by `name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
    pub hash_attr: String,
    pub range_attr: Option<String>,
    pub version_attr: Option<String>,
    pub indexes: Vec<IndexSpec>,
    pub default_ttl: Option<Duration>,
}

impl TableSpec {
    pub fn new(name: impl Into<String>, hash_attr: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash_attr: hash_attr.into(),
            range_attr: None,
            version_attr: None,
            indexes: Vec::new(),
            default_ttl: None,
        }
    }

    pub fn with_range(mut self, range_attr: impl Into<String>) -> Self {
        self.range_attr = Some(range_attr.into());
        self
    }

    pub fn with_version(mut self, version_attr: impl Into<String>) -> Self {
        self.version_attr = Some(version_attr.into());
        self
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }

    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Check the metadata itself: names present, version distinct from keys.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_name("table.name", &self.name)?;
        require_name("table.hash_attr", &self.hash_attr)?;
        if let Some(range) = &self.range_attr {
            require_name("table.range_attr", range)?;
        }
        if let Some(version) = &self.version_attr {
            require_name("table.version_attr", version)?;
            if version == &self.hash_attr || Some(version) == self.range_attr.as_ref() {
                return Err(ValidationError::InvalidValue {
                    field: "table.version_attr".to_string(),
                    reason: format!("{version} is also a key attribute"),
                });
            }
        }
        for index in &self.indexes {
            index.validate()?;
        }
        Ok(())
    }

    /// The version attribute, required by versioned operations.
    pub fn require_version_attr(&self) -> Result<&str, ValidationError> {
        self.version_attr
            .as_deref()
            .ok_or_else(|| ValidationError::RequiredFieldMissing {
                field: format!("{}.version_attr", self.name),
            })
    }

    pub fn index(&self, name: &str) -> Result<&IndexSpec, ValidationError> {
        self.indexes
            .iter()
            .find(|index| index.name == name)
            .ok_or_else(|| ValidationError::UnknownIndex {
                table: self.name.clone(),
                index: name.to_string(),
            })
    }

    /// Build the store key for `hash` and, on composite tables, `range`.
    pub fn key(&self, hash: &Value, range: Option<&Value>) -> Result<Record, ValidationError> {
        key_segment(&self.hash_attr, hash)?;
        let mut key = Record::new();
        key.insert(self.hash_attr.clone(), hash.clone());
        match (&self.range_attr, range) {
            (Some(range_attr), Some(range)) => {
                key_segment(range_attr, range)?;
                key.insert(range_attr.clone(), range.clone());
            }
            (Some(range_attr), None) => {
                return Err(ValidationError::RequiredFieldMissing {
                    field: range_attr.clone(),
                });
            }
            (None, Some(_)) => {
                return Err(ValidationError::InvalidValue {
                    field: format!("{}.range", self.name),
                    reason: "table has no range attribute".to_string(),
                });
            }
            (None, None) => {}
        }
        Ok(key)
    }

    /// Project the key attributes out of a full item.
    pub fn key_of(&self, item: &Record) -> Result<Record, ValidationError> {
        let hash = require_attr(item, &self.hash_attr)?;
        let range = match &self.range_attr {
            Some(range_attr) => Some(require_attr(item, range_attr)?),
            None => None,
        };
        self.key(hash, range)
    }

    /// Rendered (hash, range) segments for a key value pair.
    pub fn key_segments(
        &self,
        hash: &Value,
        range: Option<&Value>,
    ) -> Result<(String, Option<String>), ValidationError> {
        let hash = key_segment(&self.hash_attr, hash)?;
        let range = match (&self.range_attr, range) {
            (Some(range_attr), Some(range)) => Some(key_segment(range_attr, range)?),
            _ => None,
        };
        Ok((hash, range))
    }

    /// Store key and collection member id for `id`.
    pub fn resolve(&self, id: &ItemId) -> Result<(Record, String), ValidationError> {
        let key = self.key(&id.hash, id.range.as_ref())?;
        let (hash, range) = self.key_segments(&id.hash, id.range.as_ref())?;
        Ok((key, member_id(&hash, range.as_deref())))
    }

    /// Collection member id of an item: `hash` or `hash!range`.
    pub fn member_id_of(&self, item: &Record) -> Result<String, ValidationError> {
        let hash = key_segment(&self.hash_attr, require_attr(item, &self.hash_attr)?)?;
        let range = match &self.range_attr {
            Some(range_attr) => Some(key_segment(range_attr, require_attr(item, range_attr)?)?),
            None => None,
        };
        Ok(member_id(&hash, range.as_deref()))
    }
}
