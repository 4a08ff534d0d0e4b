use std::fmt;

use chrono::NaiveDateTime;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Values that can be bound into a statement or decoded out of a result row.
///
/// The same enum is used by every backend so helpers never branch on driver types:
/// ```rust
/// use sql_conduit::prelude::*;
///
/// let params = vec![
///     Value::Int(1),
///     Value::Text("alice".into()),
///     Value::Bool(true),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// NULL value
    Null,
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Double(f64),
    /// Text/string value
    Text(String),
    /// Binary data
    Blob(Vec<u8>),
    /// Date and time without a zone
    Timestamp(NaiveDateTime),
    /// UUID value
    Uuid(Uuid),
    /// Boolean value
    Bool(bool),
    /// JSON value
    Json(JsonValue),
    /// Arbitrary-precision decimal in its textual form (`-12.3400`)
    Decimal(String),
    /// Array of scalars; homogeneous arrays map to native typed arrays
    Array(Vec<Value>),
    /// A value whose upstream encoding already failed; binds as NULL with a warning
    Invalid(String),
}

impl Value {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let Value::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let Value::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let Value::Double(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let Value::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Short name of the variant, used in decode and degrade diagnostics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Int(_) => "integer",
            Value::Double(_) => "double",
            Value::Text(_) => "text",
            Value::Blob(_) => "blob",
            Value::Timestamp(_) => "timestamp",
            Value::Uuid(_) => "uuid",
            Value::Bool(_) => "boolean",
            Value::Json(_) => "json",
            Value::Decimal(_) => "decimal",
            Value::Array(_) => "array",
            Value::Invalid(_) => "invalid",
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Value::$variant(value.into())
                }
            }
        )*
    };
}

value_from!(
    i64 => Int,
    i32 => Int,
    i16 => Int,
    f64 => Double,
    f32 => Double,
    String => Text,
    &str => Text,
    Vec<u8> => Blob,
    NaiveDateTime => Timestamp,
    Uuid => Uuid,
    bool => Bool,
    JsonValue => Json,
);

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

/// The database backend behind a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// `PostgreSQL` database
    Postgres,
    /// `SQLite` database
    Sqlite,
}

impl Backend {
    #[must_use]
    pub fn placeholder_style(self) -> PlaceholderStyle {
        match self {
            Backend::Postgres => PlaceholderStyle::Dollar,
            Backend::Sqlite => PlaceholderStyle::QuestionNumbered,
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Postgres => f.write_str("postgres"),
            Backend::Sqlite => f.write_str("sqlite"),
        }
    }
}

/// How positional placeholders are spelled in executable SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `$1, $2, ...`
    Dollar,
    /// `?1, ?2, ...`
    QuestionNumbered,
}

impl PlaceholderStyle {
    pub(crate) fn write(self, out: &mut String, position: usize) {
        use std::fmt::Write;
        let prefix = match self {
            PlaceholderStyle::Dollar => '$',
            PlaceholderStyle::QuestionNumbered => '?',
        };
        // Writing into a String cannot fail.
        let _ = write!(out, "{prefix}{position}");
    }
}

/// Isolation level requested when a top-level transaction starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Server default (read committed on `PostgreSQL`)
    #[default]
    Default,
    RepeatableRead,
    Serializable,
}

/// When foreign-key constraints are checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignKeyMode {
    /// Checked when the transaction commits
    Deferred,
    /// Checked after every statement
    Immediate,
}
