use rusqlite::types::Value as SqliteValue;
use serde_json::Value as JsonValue;

use crate::types::Value;

const TIMESTAMP_FORMAT: &str = "%F %T%.f";

/// Convert a bound [`Value`] into its `SQLite` storage form.
///
/// `SQLite` has no boolean, date, uuid, json or array types: booleans become 0/1,
/// timestamps sortable text, uuids/decimals/json their text form and arrays JSON text.
#[must_use]
pub fn to_sqlite_value(value: Value) -> SqliteValue {
    match value {
        Value::Null | Value::Invalid(_) => SqliteValue::Null,
        Value::Int(i) => SqliteValue::Integer(i),
        Value::Double(f) => SqliteValue::Real(f),
        Value::Text(s) | Value::Decimal(s) => SqliteValue::Text(s),
        Value::Blob(bytes) => SqliteValue::Blob(bytes),
        Value::Bool(b) => SqliteValue::Integer(i64::from(b)),
        Value::Timestamp(dt) => SqliteValue::Text(dt.format(TIMESTAMP_FORMAT).to_string()),
        Value::Uuid(id) => SqliteValue::Text(id.to_string()),
        Value::Json(json) => SqliteValue::Text(json.to_string()),
        Value::Array(items) => SqliteValue::Text(
            JsonValue::Array(items.iter().map(to_json).collect()).to_string(),
        ),
    }
}

/// Convert every binding for one statement.
#[must_use]
pub fn convert_params(values: Vec<Value>) -> Vec<SqliteValue> {
    values.into_iter().map(to_sqlite_value).collect()
}

fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null | Value::Invalid(_) | Value::Blob(_) => JsonValue::Null,
        Value::Int(i) => JsonValue::from(*i),
        Value::Double(f) => JsonValue::from(*f),
        Value::Text(s) | Value::Decimal(s) => JsonValue::String(s.clone()),
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Timestamp(dt) => JsonValue::String(dt.format(TIMESTAMP_FORMAT).to_string()),
        Value::Uuid(id) => JsonValue::String(id.to_string()),
        Value::Json(json) => json.clone(),
        Value::Array(items) => JsonValue::Array(items.iter().map(to_json).collect()),
    }
}
