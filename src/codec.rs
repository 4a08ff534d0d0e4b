//! Binding policy shared by every backend.
//!
//! Two failure paths degrade instead of aborting the statement: a value that arrives
//! already marked [`Value::Invalid`], and a value the backends cannot encode (an
//! unparsable decimal, a heterogeneous array). Both bind as NULL and log a warning.

use tracing::warn;

use crate::types::Value;

/// Replace a value the backends cannot encode with NULL, logging why.
#[must_use]
pub fn degrade(value: Value) -> Value {
    match value {
        Value::Invalid(reason) => {
            warn!(%reason, "binding an invalid value as NULL");
            Value::Null
        }
        Value::Decimal(text) => {
            if parse_decimal(&text).is_some() {
                Value::Decimal(text)
            } else {
                warn!(decimal = %text, "cannot encode decimal; binding NULL");
                Value::Null
            }
        }
        Value::Array(items) => match array_element_kind(&items) {
            Ok(_) => Value::Array(items.into_iter().map(degrade).collect()),
            Err(reason) => {
                warn!(%reason, "unsupported array binding; binding NULL");
                Value::Null
            }
        },
        other => other,
    }
}

/// The shared element kind of an array, ignoring NULLs. `Ok(None)` for an array with
/// no non-null elements.
///
/// # Errors
/// Describes the first mismatch for heterogeneous or nested arrays.
pub fn array_element_kind(items: &[Value]) -> Result<Option<&'static str>, String> {
    let mut kind: Option<&'static str> = None;
    for item in items {
        match item {
            Value::Null => {}
            Value::Array(_) => return Err("nested arrays are not supported".to_string()),
            Value::Invalid(reason) => {
                return Err(format!("array contains an invalid element: {reason}"));
            }
            other => match kind {
                None => kind = Some(other.kind()),
                Some(existing) if existing == other.kind() => {}
                Some(existing) => {
                    return Err(format!(
                        "heterogeneous array mixes {existing} and {} elements",
                        other.kind()
                    ));
                }
            },
        }
    }
    Ok(kind)
}

/// A decimal split into its parts. Digits carry no sign, no leading zeros in the
/// integer part, and the fraction keeps its trailing zeros (they define the scale).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDecimal {
    pub negative: bool,
    pub integer: String,
    pub fraction: String,
}

/// Parse `[+-]digits[.digits]`. Exponents, `NaN` and infinities are rejected.
#[must_use]
pub fn parse_decimal(text: &str) -> Option<ParsedDecimal> {
    let text = text.trim();
    let (negative, unsigned) = match text.as_bytes().first()? {
        b'-' => (true, &text[1..]),
        b'+' => (false, &text[1..]),
        _ => (false, text),
    };
    let (integer, fraction) = match unsigned.split_once('.') {
        Some((integer, fraction)) => (integer, fraction),
        None => (unsigned, ""),
    };
    if integer.is_empty() && fraction.is_empty() {
        return None;
    }
    if !integer.bytes().all(|b| b.is_ascii_digit()) || !fraction.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let integer = integer.trim_start_matches('0').to_string();
    let is_zero = integer.is_empty() && fraction.bytes().all(|b| b == b'0');
    Some(ParsedDecimal {
        negative: negative && !is_zero,
        integer,
        fraction: fraction.to_string(),
    })
}
