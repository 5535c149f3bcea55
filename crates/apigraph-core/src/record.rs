//! Remote records and the rules for flattening them into node properties.
//!
//! API payloads nest related objects (`"owner": {"guid": "u-9", ...}`).
//! The graph never stores those inline: a nested object only contributes
//! its `guid`, written to the owning node as a flat `<relation>Guid`
//! property that the relationship stage later resolves.

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// A raw item returned by the remote API.
pub type Record = Map<String, Value>;

/// Flat attribute map written to a graph node.
pub type Properties = Map<String, Value>;

/// Natural identifier shared by every remote record.
pub const KEY_FIELD: &str = "guid";

/// A plain attribute copied from a record onto a node.
///
/// `sources` are tried in order; the first present, non-null value wins.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    pub target: &'static str,
    pub sources: &'static [&'static str],
}

impl FieldMapping {
    /// Copy `name` unchanged.
    pub const fn same(name: &'static str) -> Self {
        Self { target: name, sources: &[] }
    }

    /// Copy from one or more differently named source fields.
    pub const fn renamed(target: &'static str, sources: &'static [&'static str]) -> Self {
        Self { target, sources }
    }

    fn resolve<'a>(&self, record: &'a Record) -> Option<&'a Value> {
        if self.sources.is_empty() {
            return record.get(self.target).filter(|v| !v.is_null());
        }
        self.sources
            .iter()
            .filter_map(|source| record.get(*source))
            .find(|v| !v.is_null())
    }
}

/// A nested object whose `guid` is stored as a foreign key property.
#[derive(Debug, Clone, Copy)]
pub struct ForeignReference {
    /// Field holding the nested object in the API payload (`owner`).
    pub field: &'static str,
    /// Property written on the node (`ownerGuid`).
    pub property: &'static str,
}

impl ForeignReference {
    pub const fn new(field: &'static str, property: &'static str) -> Self {
        Self { field, property }
    }
}

/// Read the natural identifier of a record.
///
/// Numeric identifiers are accepted and rendered as strings; blank strings
/// count as missing.
pub fn record_key(record: &Record) -> Option<String> {
    scalar_key(record.get(KEY_FIELD)?)
}

/// Extract the guid of a nested reference object.
///
/// Returns `None` when the field is missing, null, not an object, or an
/// object without a usable `guid`. Only the malformed cases are logged.
pub fn extract_foreign_key(record: &Record, field: &str) -> Option<String> {
    match record.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::Object(nested)) => {
            let key = nested.get(KEY_FIELD).and_then(scalar_key);
            if key.is_none() {
                debug!(field, "Nested reference has no usable guid");
            }
            key
        }
        Some(other) => {
            debug!(field, kind = value_kind(other), "Expected nested reference object");
            None
        }
    }
}

/// Flatten a record into `(key, properties)` for a node of `label`.
///
/// Every declared field and reference is always present in the output,
/// as `null` when the record lacks it, so a later merge clears values the
/// API no longer reports. Nested objects in plain fields are dropped.
pub fn project_record(
    label: &str,
    record: &Record,
    fields: &[FieldMapping],
    references: &[ForeignReference],
) -> CoreResult<(String, Properties)> {
    let key = record_key(record).ok_or_else(|| CoreError::MissingKey {
        label: label.to_string(),
    })?;

    let mut properties = Properties::new();
    for field in fields {
        let value = field.resolve(record).map(flatten_value).unwrap_or(Value::Null);
        properties.insert(field.target.to_string(), value);
    }
    for reference in references {
        let value = extract_foreign_key(record, reference.field)
            .map(Value::String)
            .unwrap_or(Value::Null);
        properties.insert(reference.property.to_string(), value);
    }

    Ok((key, properties))
}

/// True when a property value can be stored on a node as-is.
fn is_flat(value: &Value) -> bool {
    match value {
        Value::Object(_) => false,
        Value::Array(items) => items.iter().all(|v| !v.is_object() && !v.is_array()),
        _ => true,
    }
}

fn flatten_value(value: &Value) -> Value {
    if is_flat(value) {
        value.clone()
    } else {
        Value::Null
    }
}

fn scalar_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_extract_foreign_key_from_nested_object() {
        let r = record(json!({"owner": {"guid": "u-9", "firstName": "Jane"}}));
        assert_eq!(extract_foreign_key(&r, "owner"), Some("u-9".to_string()));
    }

    #[test]
    fn test_extract_foreign_key_missing_and_null() {
        let r = record(json!({"owner": null}));
        assert_eq!(extract_foreign_key(&r, "owner"), None);
        assert_eq!(extract_foreign_key(&r, "team"), None);
    }

    #[test]
    fn test_extract_foreign_key_malformed() {
        let r = record(json!({
            "owner": "u-9",
            "team": {"name": "Backend"},
            "role": {"guid": ""},
            "unit": {"guid": 42}
        }));
        assert_eq!(extract_foreign_key(&r, "owner"), None);
        assert_eq!(extract_foreign_key(&r, "team"), None);
        assert_eq!(extract_foreign_key(&r, "role"), None);
        assert_eq!(extract_foreign_key(&r, "unit"), Some("42".to_string()));
    }

    #[test]
    fn test_project_record_flattens_references() {
        let r = record(json!({"guid": "c-1", "name": "Acme", "owner": {"guid": "u-9"}}));
        let (key, props) = project_record(
            "Customer",
            &r,
            &[FieldMapping::same("name"), FieldMapping::same("number")],
            &[ForeignReference::new("owner", "ownerGuid")],
        )
        .unwrap();

        assert_eq!(key, "c-1");
        assert_eq!(props["name"], json!("Acme"));
        assert_eq!(props["number"], Value::Null);
        assert_eq!(props["ownerGuid"], json!("u-9"));
        assert!(!props.contains_key("owner"));
    }

    #[test]
    fn test_project_record_renamed_fallbacks() {
        let r = record(json!({"guid": "u-1", "lastUpdatedDateTime": "2025-01-15T10:30:00Z"}));
        let mapping = FieldMapping::renamed("lastModified", &["lastModifiedDateTime", "lastUpdatedDateTime"]);
        let (_, props) = project_record("User", &r, &[mapping], &[]).unwrap();
        assert_eq!(props["lastModified"], json!("2025-01-15T10:30:00Z"));
    }

    #[test]
    fn test_project_record_drops_nested_values() {
        let r = record(json!({"guid": "p-1", "tags": ["a", "b"], "address": {"city": "Oslo"}}));
        let (_, props) = project_record(
            "Project",
            &r,
            &[FieldMapping::same("tags"), FieldMapping::same("address")],
            &[],
        )
        .unwrap();
        assert_eq!(props["tags"], json!(["a", "b"]));
        assert_eq!(props["address"], Value::Null);
    }

    #[test]
    fn test_project_record_requires_key() {
        let r = record(json!({"name": "No key"}));
        let err = project_record("Customer", &r, &[], &[]).unwrap_err();
        assert!(matches!(err, CoreError::MissingKey { ref label } if label == "Customer"));
    }
}
