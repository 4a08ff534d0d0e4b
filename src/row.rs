use std::collections::HashMap;
use std::sync::Arc;

use crate::decode::Decode;
use crate::error::SqlConduitError;
use crate::types::Value;

/// Column metadata shared by every row of one result.
#[derive(Debug, Clone)]
pub struct Columns {
    names: Arc<Vec<String>>,
    // name -> index, built once per result instead of once per row
    index: Arc<HashMap<String, usize>>,
}

impl Columns {
    #[must_use]
    pub fn new(names: Vec<String>) -> Self {
        let index = names
            .iter()
            .enumerate()
            .rev()
            .map(|(i, name)| (name.clone(), i))
            .collect::<HashMap<_, _>>();
        Self {
            names: Arc::new(names),
            index: Arc::new(index),
        }
    }

    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Index of the first column called `name`.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Build a row over these columns.
    #[must_use]
    pub fn row(&self, values: Vec<Value>) -> Row {
        Row {
            columns: self.clone(),
            values,
        }
    }
}

/// A decoded result row.
///
/// Values stay in the backend-neutral [`Value`] form until a caller asks for a
/// concrete type with [`Row::decode`] or [`Row::get`].
#[derive(Debug, Clone)]
pub struct Row {
    columns: Columns,
    values: Vec<Value>,
}

impl Row {
    #[must_use]
    pub fn new(column_names: Vec<String>, values: Vec<Value>) -> Self {
        Columns::new(column_names).row(values)
    }

    #[must_use]
    pub fn column_names(&self) -> &[String] {
        self.columns.names()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.position(name)
    }

    /// Raw value at `index`.
    #[must_use]
    pub fn value(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    /// Raw value of the column called `name`.
    #[must_use]
    pub fn value_by_name(&self, name: &str) -> Option<&Value> {
        self.column_index(name).and_then(|idx| self.values.get(idx))
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Decode column `index` as `T`. SQL NULL decodes to `None`.
    ///
    /// # Errors
    /// `SqlConduitError::Decode` when the index is out of range or the stored value
    /// cannot be represented as `T`.
    pub fn decode<T: Decode>(&self, index: usize) -> Result<Option<T>, SqlConduitError> {
        let value = self.required(index)?;
        if value.is_null() {
            return Ok(None);
        }
        T::decode(value)
            .map(Some)
            .map_err(|message| SqlConduitError::Decode { index, message })
    }

    /// Decode the column called `name` as `T`.
    ///
    /// # Errors
    /// `SqlConduitError::Decode` when no such column exists or the value cannot be
    /// represented as `T`.
    pub fn get<T: Decode>(&self, name: &str) -> Result<Option<T>, SqlConduitError> {
        let index = self
            .column_index(name)
            .ok_or_else(|| SqlConduitError::Decode {
                index: self.len(),
                message: format!("no column named `{name}`"),
            })?;
        self.decode(index)
    }

    /// Decode column `index` with `T`'s own NULL handling: a required value for plain
    /// types, `None` for `Option<T>`.
    pub(crate) fn decode_column<T: Decode>(&self, index: usize) -> Result<T, SqlConduitError> {
        let value = self.required(index)?;
        T::decode_column(value).map_err(|message| SqlConduitError::Decode { index, message })
    }

    fn required(&self, index: usize) -> Result<&Value, SqlConduitError> {
        self.values.get(index).ok_or_else(|| SqlConduitError::Decode {
            index,
            message: format!("row has only {} columns", self.values.len()),
        })
    }
}
