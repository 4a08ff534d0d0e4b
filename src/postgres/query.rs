use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use tokio_postgres::types::{FromSql, Kind, Type};

use crate::error::SqlConduitError;
use crate::row::{Columns, Row};
use crate::types::Value;

use super::numeric::PgNumeric;

/// Column names of a tokio-postgres row, shared by the rest of its result.
pub fn columns_of(row: &tokio_postgres::Row) -> Columns {
    Columns::new(
        row.columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect(),
    )
}

/// Convert a tokio-postgres row into a [`Row`].
///
/// # Errors
/// Returns `SqlConduitError` if a column cannot be retrieved.
pub fn build_row(columns: &Columns, row: &tokio_postgres::Row) -> Result<Row, SqlConduitError> {
    let mut values = Vec::with_capacity(columns.len());
    for idx in 0..row.len() {
        values.push(postgres_extract_value(row, idx)?);
    }
    Ok(columns.row(values))
}

fn scalar<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, wrap: F) -> Result<Value, SqlConduitError>
where
    T: FromSql<'a>,
    F: FnOnce(T) -> Value,
{
    let val: Option<T> = row.try_get(idx)?;
    Ok(val.map_or(Value::Null, wrap))
}

fn array<'a, T, F>(row: &'a tokio_postgres::Row, idx: usize, wrap: F) -> Result<Value, SqlConduitError>
where
    T: FromSql<'a>,
    F: Fn(T) -> Value,
{
    let val: Option<Vec<Option<T>>> = row.try_get(idx)?;
    Ok(val.map_or(Value::Null, |items| {
        Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, &wrap))
                .collect(),
        )
    }))
}

fn element_value(ty: &Type, row: &tokio_postgres::Row, idx: usize) -> Result<Value, SqlConduitError> {
    match *ty {
        Type::INT2 => array(row, idx, |v: i16| Value::Int(i64::from(v))),
        Type::INT4 => array(row, idx, |v: i32| Value::Int(i64::from(v))),
        Type::INT8 => array(row, idx, Value::Int),
        Type::FLOAT4 => array(row, idx, |v: f32| Value::Double(f64::from(v))),
        Type::FLOAT8 => array(row, idx, Value::Double),
        Type::BOOL => array(row, idx, Value::Bool),
        Type::NUMERIC => array(row, idx, |v: PgNumeric| Value::Decimal(v.0)),
        Type::UUID => array(row, idx, Value::Uuid),
        Type::TIMESTAMP => array(row, idx, Value::Timestamp),
        Type::TIMESTAMPTZ => array(row, idx, |v: DateTime<Utc>| Value::Timestamp(v.naive_utc())),
        Type::DATE => array(row, idx, |v: NaiveDate| Value::Timestamp(v.and_time(NaiveTime::MIN))),
        Type::JSON | Type::JSONB => array(row, idx, Value::Json),
        Type::BYTEA => array(row, idx, Value::Blob),
        _ => array(row, idx, Value::Text),
    }
}

/// Extracts a [`Value`] from a `tokio_postgres` row at the given index.
///
/// # Errors
/// Returns `SqlConduitError` if the column cannot be retrieved.
pub fn postgres_extract_value(
    row: &tokio_postgres::Row,
    idx: usize,
) -> Result<Value, SqlConduitError> {
    let type_info = row.columns()[idx].type_();

    if let Kind::Array(member) = type_info.kind() {
        return element_value(member, row, idx);
    }

    match *type_info {
        Type::INT2 => scalar(row, idx, |v: i16| Value::Int(i64::from(v))),
        Type::INT4 => scalar(row, idx, |v: i32| Value::Int(i64::from(v))),
        Type::INT8 => scalar(row, idx, Value::Int),
        Type::OID => scalar(row, idx, |v: u32| Value::Int(i64::from(v))),
        Type::FLOAT4 => scalar(row, idx, |v: f32| Value::Double(f64::from(v))),
        Type::FLOAT8 => scalar(row, idx, Value::Double),
        Type::NUMERIC => scalar(row, idx, |v: PgNumeric| Value::Decimal(v.0)),
        Type::BOOL => scalar(row, idx, Value::Bool),
        Type::TIMESTAMP => scalar(row, idx, Value::Timestamp),
        Type::TIMESTAMPTZ => scalar(row, idx, |v: DateTime<Utc>| Value::Timestamp(v.naive_utc())),
        Type::DATE => scalar(row, idx, |v: NaiveDate| {
            Value::Timestamp(v.and_time(NaiveTime::MIN))
        }),
        Type::UUID => scalar(row, idx, Value::Uuid),
        Type::JSON | Type::JSONB => scalar(row, idx, |v: JsonValue| Value::Json(v)),
        Type::BYTEA => scalar(row, idx, |v: Vec<u8>| Value::Blob(v)),
        // text, varchar, char, name and anything else that reads as a string
        _ => scalar(row, idx, |v: String| Value::Text(v)),
    }
}
