use std::error::Error;

use chrono::{TimeZone, Utc};
use tokio_postgres::types::{IsNull, Kind, ToSql, Type, to_sql_checked};
use tokio_util::bytes::BytesMut;

use crate::types::Value;

use super::numeric::encode_numeric;

type BoxError = Box<dyn Error + Sync + Send>;

fn wrong_type(value: &Value, ty: &Type) -> BoxError {
    format!("cannot bind {} value to a {} parameter", value.kind(), ty.name()).into()
}

fn is_text(ty: &Type) -> bool {
    <String as ToSql>::accepts(ty)
}

/// Borrow bindings in the form tokio-postgres expects.
pub(crate) fn as_refs(values: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    values.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

impl ToSql for Value {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null | Value::Invalid(_) => Ok(IsNull::Yes),
            Value::Int(i) => match *ty {
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT8 => i.to_sql(ty, out),
                Type::OID => u32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                Type::NUMERIC => encode_numeric(&i.to_string(), out).map(|()| IsNull::No),
                _ if is_text(ty) => i.to_string().to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
            Value::Double(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::NUMERIC if f.is_finite() => {
                    encode_numeric(&f.to_string(), out).map(|()| IsNull::No)
                }
                _ if is_text(ty) => f.to_string().to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
            Value::Text(s) => match *ty {
                Type::JSON | Type::JSONB => {
                    serde_json::from_str::<serde_json::Value>(s)?.to_sql(ty, out)
                }
                Type::UUID => uuid::Uuid::parse_str(s)?.to_sql(ty, out),
                Type::NUMERIC => encode_numeric(s, out).map(|()| IsNull::No),
                _ if is_text(ty) => s.to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
            Value::Blob(bytes) => match *ty {
                Type::BYTEA => bytes.to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
            Value::Timestamp(dt) => match *ty {
                Type::TIMESTAMP => dt.to_sql(ty, out),
                Type::TIMESTAMPTZ => Utc.from_utc_datetime(dt).to_sql(ty, out),
                Type::DATE => dt.date().to_sql(ty, out),
                _ if is_text(ty) => dt.format("%F %T%.f").to_string().to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
            Value::Uuid(uuid) => match *ty {
                Type::UUID => uuid.to_sql(ty, out),
                _ if is_text(ty) => uuid.to_string().to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
            Value::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
            Value::Json(json) => match *ty {
                Type::JSON | Type::JSONB => json.to_sql(ty, out),
                _ if is_text(ty) => json.to_string().to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
            Value::Decimal(text) => match *ty {
                Type::NUMERIC => encode_numeric(text, out).map(|()| IsNull::No),
                Type::FLOAT4 | Type::FLOAT8 => text.parse::<f64>()?.to_sql(ty, out),
                _ if is_text(ty) => text.to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
            Value::Array(items) => match ty.kind() {
                // Elements are encoded against the member type through this same impl.
                Kind::Array(_) => items.to_sql(ty, out),
                _ => Err(wrong_type(self, ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        // Each variant checks the parameter type itself in `to_sql`.
        true
    }

    to_sql_checked!();
}
