//! SQL fragments: literal text interleaved with typed bindings.
//!
//! A [`Fragment`] is what a query builder hands over. Turning it into an executable
//! [`Statement`] numbers the bindings positionally in segment order; nothing is
//! escaped or inlined, parameterization is left to the driver.

use crate::codec;
use crate::types::{PlaceholderStyle, Value};

/// One piece of a fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum Segment {
    Sql(String),
    Bind(Value),
}

/// An abstract, not yet executable statement.
///
/// ```rust
/// use sql_conduit::prelude::*;
///
/// let fragment = Fragment::sql("SELECT name FROM users WHERE id = ")
///     .bind(7)
///     .push_sql(" AND active = ")
///     .bind(true);
/// let stmt = fragment.to_executable(PlaceholderStyle::Dollar);
/// assert_eq!(stmt.sql, "SELECT name FROM users WHERE id = $1 AND active = $2");
/// assert_eq!(stmt.bindings, vec![Value::Int(7), Value::Bool(true)]);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fragment {
    segments: Vec<Segment>,
}

impl Fragment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fragment with literal SQL.
    #[must_use]
    pub fn sql(text: impl Into<String>) -> Self {
        Self::new().push_sql(text)
    }

    /// Append literal SQL.
    #[must_use]
    pub fn push_sql(mut self, text: impl Into<String>) -> Self {
        self.append_sql(text);
        self
    }

    /// Append a binding.
    #[must_use]
    pub fn bind(mut self, value: impl Into<Value>) -> Self {
        self.push_bind(value);
        self
    }

    /// Append literal SQL in place.
    pub fn append_sql(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        // Adjacent literals are merged so segment count tracks bindings.
        if let Some(Segment::Sql(last)) = self.segments.last_mut() {
            last.push_str(&text);
        } else {
            self.segments.push(Segment::Sql(text));
        }
    }

    /// Append a binding in place.
    pub fn push_bind(&mut self, value: impl Into<Value>) {
        self.segments.push(Segment::Bind(value.into()));
    }

    /// Append another fragment, keeping its bindings after this one's.
    #[must_use]
    pub fn append(mut self, other: Fragment) -> Self {
        for segment in other.segments {
            match segment {
                Segment::Sql(text) => self.append_sql(text),
                Segment::Bind(value) => self.segments.push(Segment::Bind(value)),
            }
        }
        self
    }

    /// Join fragments with a literal separator (`", "`, `" AND "`...).
    #[must_use]
    pub fn join(parts: impl IntoIterator<Item = Fragment>, separator: &str) -> Self {
        let mut joined = Fragment::new();
        for (i, part) in parts.into_iter().enumerate() {
            if i > 0 {
                joined.append_sql(separator);
            }
            joined = joined.append(part);
        }
        joined
    }

    /// True when there is no SQL text at all. Such fragments are never sent to the server.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.iter().all(|segment| match segment {
            Segment::Sql(text) => text.trim().is_empty(),
            Segment::Bind(_) => true,
        })
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn binding_count(&self) -> usize {
        self.segments
            .iter()
            .filter(|segment| matches!(segment, Segment::Bind(_)))
            .count()
    }

    /// Build the executable statement for a placeholder style.
    #[must_use]
    pub fn to_executable(&self, style: PlaceholderStyle) -> Statement {
        let mut sql = String::new();
        let mut bindings = Vec::with_capacity(self.binding_count());
        for segment in &self.segments {
            match segment {
                Segment::Sql(text) => sql.push_str(text),
                Segment::Bind(value) => {
                    bindings.push(value.clone());
                    style.write(&mut sql, bindings.len());
                }
            }
        }
        Statement { sql, bindings }
    }
}

impl From<&str> for Fragment {
    fn from(text: &str) -> Self {
        Fragment::sql(text)
    }
}

impl From<String> for Fragment {
    fn from(text: String) -> Self {
        Fragment::sql(text)
    }
}

/// Executable SQL text plus its ordered bindings.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<Value>,
}

impl Statement {
    #[must_use]
    pub fn new(sql: impl Into<String>, bindings: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            bindings,
        }
    }

    /// Bindings ready for a driver, after the lossy-degrade policy in [`codec::degrade`]
    /// has replaced unusable values with NULL.
    #[must_use]
    pub fn into_parameters(self) -> (String, Vec<Value>) {
        let Statement { sql, bindings } = self;
        let bindings = bindings.into_iter().map(codec::degrade).collect();
        (sql, bindings)
    }
}
