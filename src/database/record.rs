//! Record and key representation
//!
//! Records are JSON objects. Each collection's key field is split off before a
//! record is written and injected back when it is read, so callers always see
//! the key inside the record.

use rusqlite::types::{ToSql, ToSqlOutput};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::database::core::{CollectionSpec, KeyPolicy};
use crate::error::{StoreError, StoreResult};

/// A stored record: field name to JSON value
pub type Record = Map<String, Value>;

/// Identity of a record inside its collection
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordKey {
    /// Surrogate key of an auto-increment collection
    Int(i64),
    /// Natural key, e.g. a username
    Text(String),
}

impl RecordKey {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            RecordKey::Int(id) => Some(*id),
            RecordKey::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            RecordKey::Int(_) => None,
            RecordKey::Text(key) => Some(key),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RecordKey::Int(id) => Value::from(*id),
            RecordKey::Text(key) => Value::from(key.as_str()),
        }
    }
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::Int(id) => write!(f, "{}", id),
            RecordKey::Text(key) => write!(f, "'{}'", key),
        }
    }
}

impl From<i64> for RecordKey {
    fn from(id: i64) -> Self {
        RecordKey::Int(id)
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        RecordKey::Text(key.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(key: String) -> Self {
        RecordKey::Text(key)
    }
}

impl ToSql for RecordKey {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            RecordKey::Int(id) => id.to_sql(),
            RecordKey::Text(key) => key.to_sql(),
        }
    }
}

/// Accept only JSON objects as records
pub fn into_record(value: Value) -> StoreResult<Record> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::validation(format!(
            "record must be a JSON object, got {}",
            json_type_name(&other)
        ))),
    }
}

/// Remove the key field from `record`
///
/// Returns `None` when an auto-increment collection should assign the key.
pub(crate) fn split_key(policy: &KeyPolicy, record: &mut Record) -> StoreResult<Option<RecordKey>> {
    let field = policy.key_field();
    let raw = record.remove(field);

    match policy {
        KeyPolicy::AutoIncrement { .. } => match raw {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n.as_i64().map(|id| Some(RecordKey::Int(id))).ok_or_else(|| {
                StoreError::validation(format!("key field '{}' must be an integer, got {}", field, n))
            }),
            Some(other) => Err(StoreError::validation(format!(
                "key field '{}' must be an integer, got {}",
                field,
                json_type_name(&other)
            ))),
        },
        KeyPolicy::Natural { .. } => match raw {
            Some(Value::String(key)) if !key.is_empty() => Ok(Some(RecordKey::Text(key))),
            Some(Value::String(_)) => Err(StoreError::validation(format!(
                "key field '{}' must not be empty",
                field
            ))),
            None | Some(Value::Null) => Err(StoreError::validation(format!(
                "missing key field '{}'",
                field
            ))),
            Some(other) => Err(StoreError::validation(format!(
                "key field '{}' must be a string, got {}",
                field,
                json_type_name(&other)
            ))),
        },
    }
}

/// Put the key field back into a record read from storage
pub(crate) fn inject_key(policy: &KeyPolicy, key: &RecordKey, mut body: Record) -> Record {
    body.insert(policy.key_field().to_string(), key.to_value());
    body
}

/// Reject keys whose type does not fit the collection's policy
pub(crate) fn check_key_type(spec: &CollectionSpec, key: &RecordKey) -> StoreResult<()> {
    match (&spec.key_policy, key) {
        (KeyPolicy::AutoIncrement { .. }, RecordKey::Int(_)) => Ok(()),
        (KeyPolicy::Natural { .. }, RecordKey::Text(k)) if !k.is_empty() => Ok(()),
        (policy, key) => Err(StoreError::validation(format!(
            "key {} does not fit {} of collection '{}'",
            key, policy, spec.name
        ))),
    }
}

/// Every declared required field must be present and non-empty
pub(crate) fn check_required(spec: &CollectionSpec, record: &Record) -> StoreResult<()> {
    for field in &spec.required_fields {
        let present = match record.get(field) {
            None | Some(Value::Null) => false,
            Some(Value::String(s)) => !s.trim().is_empty(),
            Some(_) => true,
        };
        if !present {
            return Err(StoreError::validation(format!(
                "'{}' record is missing required field '{}'",
                spec.name, field
            )));
        }
    }
    Ok(())
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
