use rusqlite::types::ValueRef;

use crate::error::SqlConduitError;
use crate::row::{Columns, Row};
use crate::types::Value;

/// Column names of a prepared statement.
pub fn columns_of(stmt: &rusqlite::Statement<'_>) -> Columns {
    Columns::new(
        stmt.column_names()
            .iter()
            .map(std::string::ToString::to_string)
            .collect(),
    )
}

/// Extract a [`Value`] from a `SQLite` row.
///
/// Storage classes map one to one; richer types are recovered by [`crate::decode`].
///
/// # Errors
/// Returns `SqlConduitError::Sqlite` if the column cannot be read.
pub fn sqlite_extract_value(row: &rusqlite::Row<'_>, idx: usize) -> Result<Value, SqlConduitError> {
    Ok(match row.get_ref(idx)? {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Double(f),
        ValueRef::Text(bytes) => Value::Text(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::Blob(bytes.to_vec()),
    })
}

/// Convert a `SQLite` row into a [`Row`] sharing `columns`.
///
/// # Errors
/// Returns `SqlConduitError` if a column cannot be read.
pub fn build_row(columns: &Columns, row: &rusqlite::Row<'_>) -> Result<Row, SqlConduitError> {
    let mut values = Vec::with_capacity(columns.len());
    for idx in 0..columns.len() {
        values.push(sqlite_extract_value(row, idx)?);
    }
    Ok(columns.row(values))
}
