//! Typed decoding of result values.
//!
//! Every backend hands rows over as [`Value`]s. Decoding tries the native
//! representation first and falls back to the decimal or textual form the server may
//! have used instead (SQLite stores most things as text, `PostgreSQL` returns NUMERIC
//! as a decimal string).

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::codec::parse_decimal;
use crate::error::SqlConduitError;
use crate::row::Row;
use crate::types::Value;

/// Conversion from a non-NULL [`Value`] into a Rust type.
pub trait Decode: Sized {
    /// Decode a value. NULL has already been filtered out by the caller.
    ///
    /// # Errors
    /// A human-readable reason when the value cannot be represented as `Self`.
    fn decode(value: &Value) -> Result<Self, String>;

    /// Decode a column where NULL is possible. Plain types reject NULL.
    ///
    /// # Errors
    /// As [`Decode::decode`], plus a NULL for non-optional types.
    fn decode_column(value: &Value) -> Result<Self, String> {
        if value.is_null() {
            Err("unexpected NULL".to_string())
        } else {
            Self::decode(value)
        }
    }
}

fn mismatch(target: &str, value: &Value) -> String {
    format!("cannot decode {} as {target}", value.kind())
}

impl Decode for Value {
    fn decode(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }

    fn decode_column(value: &Value) -> Result<Self, String> {
        Ok(value.clone())
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(value: &Value) -> Result<Self, String> {
        T::decode(value).map(Some)
    }

    fn decode_column(value: &Value) -> Result<Self, String> {
        if value.is_null() {
            Ok(None)
        } else {
            T::decode(value).map(Some)
        }
    }
}

/// Integer part of a decimal with no fractional remainder (`"12.000"` -> `"12"`).
fn integral_decimal(text: &str) -> Option<i64> {
    let parsed = parse_decimal(text)?;
    if !parsed.fraction.bytes().all(|b| b == b'0') {
        return None;
    }
    let magnitude = if parsed.integer.is_empty() {
        "0"
    } else {
        parsed.integer.as_str()
    };
    let signed = if parsed.negative {
        format!("-{magnitude}")
    } else {
        magnitude.to_string()
    };
    signed.parse().ok()
}

impl Decode for i64 {
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Int(i) => Ok(*i),
            Value::Bool(b) => Ok(i64::from(*b)),
            Value::Double(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
                Ok(*f as i64)
            }
            Value::Decimal(text) | Value::Text(text) => text
                .trim()
                .parse::<i64>()
                .ok()
                .or_else(|| integral_decimal(text))
                .ok_or_else(|| format!("`{text}` is not an integer")),
            other => Err(mismatch("integer", other)),
        }
    }
}

macro_rules! decode_narrow_int {
    ($($ty:ty),*) => {
        $(
            impl Decode for $ty {
                fn decode(value: &Value) -> Result<Self, String> {
                    let wide = i64::decode(value)?;
                    <$ty>::try_from(wide)
                        .map_err(|_| format!("{wide} is out of range for {}", stringify!($ty)))
                }
            }
        )*
    };
}

decode_narrow_int!(i32, i16, u32, u16, u8);

impl Decode for u64 {
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Decimal(text) | Value::Text(text) if text.trim().parse::<u64>().is_ok() => {
                text.trim().parse().map_err(|err| format!("{err}"))
            }
            other => {
                let wide = i64::decode(other)?;
                u64::try_from(wide).map_err(|_| format!("{wide} is out of range for u64"))
            }
        }
    }
}

impl Decode for f64 {
    #[allow(clippy::cast_precision_loss)]
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Double(f) => Ok(*f),
            Value::Int(i) => Ok(*i as f64),
            Value::Decimal(text) | Value::Text(text) => text
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("`{text}` is not a number")),
            other => Err(mismatch("float", other)),
        }
    }
}

impl Decode for f32 {
    #[allow(clippy::cast_possible_truncation)]
    fn decode(value: &Value) -> Result<Self, String> {
        f64::decode(value).map(|f| f as f32)
    }
}

impl Decode for bool {
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Bool(b) => Ok(*b),
            Value::Int(0) => Ok(false),
            Value::Int(1) => Ok(true),
            Value::Text(text) => match text.trim().to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(format!("`{text}` is not a boolean")),
            },
            other => Err(mismatch("boolean", other)),
        }
    }
}

impl Decode for String {
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Text(text) | Value::Decimal(text) => Ok(text.clone()),
            Value::Int(i) => Ok(i.to_string()),
            Value::Double(f) => Ok(f.to_string()),
            Value::Uuid(uuid) => Ok(uuid.to_string()),
            Value::Json(json) => Ok(json.to_string()),
            other => Err(mismatch("text", other)),
        }
    }
}

impl Decode for Vec<u8> {
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Blob(bytes) => Ok(bytes.clone()),
            Value::Text(text) => Ok(text.as_bytes().to_vec()),
            other => Err(mismatch("blob", other)),
        }
    }
}

/// Parse the textual timestamp forms SQLite and `PostgreSQL` produce.
fn parse_timestamp(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    for format in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(text, format) {
            return Some(parsed);
        }
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.naive_utc());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .map(|date| date.and_time(NaiveTime::MIN))
}

impl Decode for NaiveDateTime {
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Timestamp(ts) => Ok(*ts),
            Value::Text(text) => {
                parse_timestamp(text).ok_or_else(|| format!("`{text}` is not a timestamp"))
            }
            other => Err(mismatch("timestamp", other)),
        }
    }
}

impl Decode for NaiveDate {
    fn decode(value: &Value) -> Result<Self, String> {
        NaiveDateTime::decode(value).map(|ts| ts.date())
    }
}

impl Decode for Uuid {
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Uuid(uuid) => Ok(*uuid),
            Value::Text(text) => Uuid::parse_str(text.trim()).map_err(|err| err.to_string()),
            Value::Blob(bytes) => Uuid::from_slice(bytes).map_err(|err| err.to_string()),
            other => Err(mismatch("uuid", other)),
        }
    }
}

impl Decode for JsonValue {
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Json(json) => Ok(json.clone()),
            Value::Text(text) => serde_json::from_str(text).map_err(|err| err.to_string()),
            other => Err(mismatch("json", other)),
        }
    }
}

impl<T: Decode> Decode for Vec<T>
where
    T: DecodeElement,
{
    fn decode(value: &Value) -> Result<Self, String> {
        match value {
            Value::Array(items) => items.iter().map(T::decode_column).collect(),
            // SQLite stores arrays as JSON text.
            Value::Text(text) => {
                let parsed: Vec<JsonValue> =
                    serde_json::from_str(text).map_err(|err| err.to_string())?;
                parsed
                    .into_iter()
                    .map(|item| T::decode_column(&json_to_value(item)))
                    .collect()
            }
            other => Err(mismatch("array", other)),
        }
    }
}

/// Marker for types that may appear as array elements. Keeps `Vec<u8>` decoding as a
/// blob instead of an array of integers.
pub trait DecodeElement {}

macro_rules! decode_element {
    ($($ty:ty),*) => { $(impl DecodeElement for $ty {})* };
}

decode_element!(i64, i32, i16, f64, f32, bool, String, NaiveDateTime, Uuid, JsonValue, Value);

impl<T: DecodeElement> DecodeElement for Option<T> {}

fn json_to_value(json: JsonValue) -> Value {
    match json {
        JsonValue::Null => Value::Null,
        JsonValue::Bool(b) => Value::Bool(b),
        JsonValue::Number(n) => n
            .as_i64()
            .map(Value::Int)
            .or_else(|| n.as_f64().map(Value::Double))
            .unwrap_or_else(|| Value::Decimal(n.to_string())),
        JsonValue::String(s) => Value::Text(s),
        other => Value::Json(other),
    }
}

/// Conversion of a whole row into a caller type.
///
/// Implemented for [`Row`] itself, for single-column scalars, for `Option<T>` and for
/// tuples of up to eight columns. Implement it for your own structs:
///
/// ```rust
/// use sql_conduit::prelude::*;
///
/// struct User {
///     id: i64,
///     name: String,
/// }
///
/// impl FromRow for User {
///     fn from_row(row: Row) -> Result<Self, SqlConduitError> {
///         let (id, name) = <(i64, String)>::from_row(row)?;
///         Ok(User { id, name })
///     }
/// }
/// ```
pub trait FromRow: Sized {
    /// # Errors
    /// `SqlConduitError::Decode` when a column is missing or has the wrong shape.
    fn from_row(row: Row) -> Result<Self, SqlConduitError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, SqlConduitError> {
        Ok(row)
    }
}

impl FromRow for Vec<Value> {
    fn from_row(row: Row) -> Result<Self, SqlConduitError> {
        Ok(row.into_values())
    }
}

impl<T: Decode> FromRow for Option<T> {
    fn from_row(row: Row) -> Result<Self, SqlConduitError> {
        row.decode_column::<Option<T>>(0)
    }
}

macro_rules! scalar_from_row {
    ($($ty:ty),*) => {
        $(
            impl FromRow for $ty {
                fn from_row(row: Row) -> Result<Self, SqlConduitError> {
                    row.decode_column::<$ty>(0)
                }
            }
        )*
    };
}

scalar_from_row!(
    i64, i32, i16, u64, u32, u16, u8, f64, f32, bool, String, Vec<u8>, NaiveDateTime, NaiveDate,
    Uuid, JsonValue, Value
);

macro_rules! tuple_from_row {
    ($($name:ident : $idx:tt),+) => {
        impl<$($name: Decode),+> FromRow for ($($name,)+) {
            fn from_row(row: Row) -> Result<Self, SqlConduitError> {
                Ok(($(row.decode_column::<$name>($idx)?,)+))
            }
        }
    };
}

tuple_from_row!(A: 0);
tuple_from_row!(A: 0, B: 1);
tuple_from_row!(A: 0, B: 1, C: 2);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3, E: 4);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
tuple_from_row!(A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_fall_back_to_decimal_and_text() {
        assert_eq!(i64::decode(&Value::Int(5)), Ok(5));
        assert_eq!(i64::decode(&Value::Decimal("42".into())), Ok(42));
        assert_eq!(i64::decode(&Value::Decimal("-42.000".into())), Ok(-42));
        assert_eq!(i64::decode(&Value::Text(" 17 ".into())), Ok(17));
        assert!(i64::decode(&Value::Decimal("1.5".into())).is_err());
        assert!(i64::decode(&Value::Text("abc".into())).is_err());
    }

    #[test]
    fn narrow_integers_are_range_checked() {
        assert_eq!(i16::decode(&Value::Int(300)), Ok(300));
        assert!(i16::decode(&Value::Int(70_000)).is_err());
        assert!(u32::decode(&Value::Int(-1)).is_err());
    }

    #[test]
    fn floats_accept_ints_and_decimals() {
        assert_eq!(f64::decode(&Value::Int(2)), Ok(2.0));
        assert_eq!(f64::decode(&Value::Decimal("12.25".into())), Ok(12.25));
        assert!(f64::decode(&Value::Blob(vec![1])).is_err());
    }

    #[test]
    fn booleans_from_sqlite_storage() {
        assert_eq!(bool::decode(&Value::Int(1)), Ok(true));
        assert_eq!(bool::decode(&Value::Int(0)), Ok(false));
        assert_eq!(bool::decode(&Value::Text("t".into())), Ok(true));
        assert!(bool::decode(&Value::Int(2)).is_err());
    }

    #[test]
    fn timestamps_from_text() {
        let expected = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_milli_opt(12, 30, 0, 250)
            .unwrap();
        assert_eq!(
            NaiveDateTime::decode(&Value::Text("2024-05-01 12:30:00.250".into())),
            Ok(expected)
        );
        assert_eq!(
            NaiveDateTime::decode(&Value::Text("2024-05-01T12:30:00.250Z".into())),
            Ok(expected)
        );
        assert_eq!(
            NaiveDate::decode(&Value::Text("2024-05-01".into())),
            Ok(expected.date())
        );
    }

    #[test]
    fn uuids_from_text_and_blob() {
        let id = Uuid::new_v4();
        assert_eq!(Uuid::decode(&Value::Text(id.to_string())), Ok(id));
        assert_eq!(Uuid::decode(&Value::Blob(id.as_bytes().to_vec())), Ok(id));
        assert!(Uuid::decode(&Value::Blob(vec![0; 3])).is_err());
    }

    #[test]
    fn arrays_from_native_and_json_text() {
        let native = Value::Array(vec![Value::Int(1), Value::Null, Value::Int(3)]);
        assert_eq!(
            Vec::<Option<i64>>::decode(&native),
            Ok(vec![Some(1), None, Some(3)])
        );
        assert!(Vec::<i64>::decode(&native).is_err());
        assert_eq!(
            Vec::<String>::decode(&Value::Text(r#"["a","b"]"#.into())),
            Ok(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn null_handling_in_rows() {
        let row = Row::new(
            vec!["a".into(), "b".into()],
            vec![Value::Int(1), Value::Null],
        );
        let (a, b) = <(i64, Option<String>)>::from_row(row.clone()).unwrap();
        assert_eq!((a, b), (1, None));
        assert!(matches!(
            <(i64, String)>::from_row(row),
            Err(SqlConduitError::Decode { index: 1, .. })
        ));
    }

    #[test]
    fn scalar_from_row_reads_first_column() {
        let row = Row::new(vec!["n".into()], vec![Value::Text("9".into())]);
        assert_eq!(i32::from_row(row).unwrap(), 9);

        let empty = Row::new(vec!["n".into()], vec![Value::Null]);
        assert_eq!(Option::<i32>::from_row(empty.clone()).unwrap(), None);
        assert!(i32::from_row(empty).is_err());
    }
}
