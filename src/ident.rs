//! Validation for names spliced into SQL text (savepoints, channels, ledger tables).
//!
//! These names cannot be sent as bind parameters, so they are restricted to plain
//! identifiers before any SQL is built from them.

use lazy_static::lazy_static;
use regex::Regex;

use crate::error::SqlConduitError;

/// `PostgreSQL` truncates identifiers beyond this length.
pub const MAX_IDENTIFIER_LEN: usize = 63;

lazy_static! {
    static ref IDENTIFIER: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex");
}

/// Check that `name` is a plain identifier: a letter or underscore followed by
/// letters, digits or underscores, at most 63 bytes.
///
/// # Errors
/// Returns `SqlConduitError::InvalidIdentifier` describing the first problem found.
pub fn validate_identifier(name: &str) -> Result<(), SqlConduitError> {
    if name.is_empty() {
        return Err(SqlConduitError::InvalidIdentifier(
            "identifier cannot be empty".to_string(),
        ));
    }
    if name.len() > MAX_IDENTIFIER_LEN {
        return Err(SqlConduitError::InvalidIdentifier(format!(
            "`{name}` exceeds the maximum length of {MAX_IDENTIFIER_LEN} characters"
        )));
    }
    if !IDENTIFIER.is_match(name) {
        return Err(SqlConduitError::InvalidIdentifier(format!(
            "`{name}` must start with a letter or underscore and contain only letters, digits and underscores"
        )));
    }
    Ok(())
}

/// Double-quote an identifier, doubling any embedded quotes.
pub(crate) fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
