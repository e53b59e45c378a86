//! Records, key values and version stamps.

use serde_json::Value;

use crate::error::ValidationError;

/// A stored item: attribute name to JSON value.
pub type Record = serde_json::Map<String, Value>;

/// Largest integer a version can take and still survive a round trip
/// through an `f64` cache score.
pub const MAX_VERSION: u64 = (1 << 53) - 1;

/// State of the version attribute on a caller-supplied item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionState {
    /// The attribute is missing or null: the record was never versioned.
    Absent,
    /// The version the caller last observed.
    At(u64),
}

/// Render a hash or range attribute value as a cache key segment.
///
/// Strings render verbatim, numbers as their JSON text with whole floats
/// written as integers.
pub fn key_segment(field: &str, value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::String(s) if s.is_empty() => Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: "key value must not be empty".to_string(),
        }),
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(number_segment(n)),
        Value::Null => Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }),
        other => Err(ValidationError::InvalidValue {
            field: field.to_string(),
            reason: format!("key value must be a string or number, got {}", type_name(other)),
        }),
    }
}

/// Whole floats render without a fractional part, so `1.0` and `1` share a key.
fn number_segment(n: &serde_json::Number) -> String {
    match n.as_f64() {
        Some(f) if n.is_f64() && f.fract() == 0.0 && f.abs() <= MAX_VERSION as f64 => {
            format!("{}", f as i64)
        }
        _ => n.to_string(),
    }
}

/// Look up a required attribute, treating null as absent.
pub fn require_attr<'a>(item: &'a Record, field: &str) -> Result<&'a Value, ValidationError> {
    match item.get(field) {
        Some(Value::Null) | None => Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        }),
        Some(value) => Ok(value),
    }
}

/// Reject empty names before any I/O is attempted.
pub fn require_name(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::RequiredFieldMissing {
            field: field.to_string(),
        });
    }
    Ok(())
}

/// Read the caller-observed version from an item.
pub fn read_version(item: &Record, version_attr: &str) -> Result<VersionState, ValidationError> {
    match item.get(version_attr) {
        None | Some(Value::Null) => Ok(VersionState::Absent),
        Some(value) => parse_version(value)
            .map(VersionState::At)
            .ok_or_else(|| ValidationError::InvalidVersion {
                field: version_attr.to_string(),
                reason: format!("expected a non-negative integer, got {value}"),
            }),
    }
}

/// Version embedded in a cached or stored payload, if it carries a valid one.
pub fn embedded_version(item: &Record, version_attr: &str) -> Option<u64> {
    item.get(version_attr).and_then(parse_version)
}

/// Stamp `version` onto `item`.
pub fn set_version(item: &mut Record, version_attr: &str, version: u64) {
    item.insert(version_attr.to_string(), Value::from(version));
}

/// Check a caller-supplied version before it is used in a condition.
pub fn validate_version(version_attr: &str, version: u64) -> Result<(), ValidationError> {
    if version > MAX_VERSION {
        return Err(ValidationError::InvalidVersion {
            field: version_attr.to_string(),
            reason: format!("{version} exceeds {MAX_VERSION}"),
        });
    }
    Ok(())
}

fn parse_version(value: &Value) -> Option<u64> {
    let Value::Number(n) = value else {
        return None;
    };
    if let Some(v) = n.as_u64() {
        return (v <= MAX_VERSION).then_some(v);
    }
    let f = n.as_f64()?;
    if f.is_finite() && f >= 0.0 && f.fract() == 0.0 && f <= MAX_VERSION as f64 {
        Some(f as u64)
    } else {
        None
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
