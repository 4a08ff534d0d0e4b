//! Binary NUMERIC wire format.
//!
//! Layout: `ndigits: i16, weight: i16, sign: u16, dscale: u16`, then `ndigits`
//! base-10000 groups as `i16`. `weight` is the power of 10000 of the first group;
//! `dscale` is the number of decimal digits after the point.

use std::error::Error;

use tokio_postgres::types::{FromSql, Type};
use tokio_util::bytes::{BufMut, BytesMut};

use crate::codec::parse_decimal;

const SIGN_POSITIVE: u16 = 0x0000;
const SIGN_NEGATIVE: u16 = 0x4000;
const SIGN_NAN: u16 = 0xC000;
const SIGN_POS_INF: u16 = 0xD000;
const SIGN_NEG_INF: u16 = 0xF000;

type BoxError = Box<dyn Error + Sync + Send>;

fn groups_of_four(digits: &str) -> Vec<i16> {
    digits
        .as_bytes()
        .chunks(4)
        .map(|chunk| {
            chunk
                .iter()
                .fold(0i16, |acc, b| acc * 10 + i16::from(b - b'0'))
        })
        .collect()
}

/// Encode a decimal string (`-123.4500`) into `out`.
///
/// # Errors
/// The text is not a plain decimal or does not fit the wire format.
pub fn encode_numeric(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let parsed = parse_decimal(text).ok_or_else(|| format!("`{text}` is not a decimal"))?;

    // Pad the integer part on the left and the fraction on the right to whole groups.
    let int_pad = (4 - parsed.integer.len() % 4) % 4;
    let integer = format!("{}{}", "0".repeat(int_pad), parsed.integer);
    let frac_pad = (4 - parsed.fraction.len() % 4) % 4;
    let fraction = format!("{}{}", parsed.fraction, "0".repeat(frac_pad));

    let int_groups = groups_of_four(&integer);
    let mut weight = i32::try_from(int_groups.len())? - 1;
    let mut digits: Vec<i16> = int_groups;
    digits.extend(groups_of_four(&fraction));

    let leading = digits.iter().take_while(|d| **d == 0).count();
    digits.drain(..leading);
    weight -= i32::try_from(leading)?;
    while digits.last() == Some(&0) {
        digits.pop();
    }

    let dscale = u16::try_from(parsed.fraction.len())?;
    let (weight, sign) = if digits.is_empty() {
        (0, SIGN_POSITIVE)
    } else if parsed.negative {
        (i16::try_from(weight)?, SIGN_NEGATIVE)
    } else {
        (i16::try_from(weight)?, SIGN_POSITIVE)
    };

    out.put_i16(i16::try_from(digits.len())?);
    out.put_i16(weight);
    out.put_u16(sign);
    out.put_u16(dscale);
    for digit in digits {
        out.put_i16(digit);
    }
    Ok(())
}

fn read_u16(raw: &[u8], at: usize) -> Result<u16, BoxError> {
    raw.get(at..at + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
        .ok_or_else(|| "truncated numeric value".into())
}

/// Decode the wire format back into its canonical decimal string.
///
/// # Errors
/// The buffer is truncated or malformed.
pub fn decode_numeric(raw: &[u8]) -> Result<String, BoxError> {
    let ndigits = usize::from(read_u16(raw, 0)?);
    #[allow(clippy::cast_possible_wrap)]
    let weight = i32::from(read_u16(raw, 2)? as i16);
    let sign = read_u16(raw, 4)?;
    let dscale = usize::from(read_u16(raw, 6)?);

    match sign {
        SIGN_NAN => return Ok("NaN".to_string()),
        SIGN_POS_INF => return Ok("Infinity".to_string()),
        SIGN_NEG_INF => return Ok("-Infinity".to_string()),
        SIGN_POSITIVE | SIGN_NEGATIVE => {}
        other => return Err(format!("invalid numeric sign {other:#06x}").into()),
    }

    let mut digits = Vec::with_capacity(ndigits);
    for i in 0..ndigits {
        let digit = read_u16(raw, 8 + i * 2)?;
        if digit > 9999 {
            return Err(format!("invalid numeric digit {digit}").into());
        }
        digits.push(digit);
    }
    let group = |index: i32| -> u16 {
        usize::try_from(index)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut text = String::new();
    if sign == SIGN_NEGATIVE && !digits.is_empty() {
        text.push('-');
    }
    if weight < 0 {
        text.push('0');
    } else {
        for index in 0..=weight {
            if index == 0 {
                text.push_str(&group(index).to_string());
            } else {
                text.push_str(&format!("{:04}", group(index)));
            }
        }
    }
    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut index = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", group(index)));
            index += 1;
        }
        fraction.truncate(dscale);
        text.push('.');
        text.push_str(&fraction);
    }
    Ok(text)
}

/// A NUMERIC column read as its decimal string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgNumeric(pub String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        decode_numeric(raw).map(PgNumeric)
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}
