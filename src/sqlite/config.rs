use std::time::Duration;

use serde::Deserialize;

use crate::config::PoolConfig;
use crate::error::SqlConduitError;
use crate::pool::PoolRunner;

use super::connection::SqliteConnection;
use super::manager::SqliteManager;

fn default_busy_timeout() -> Duration {
    Duration::from_secs(5)
}

fn enabled() -> bool {
    true
}

/// Options for opening `SQLite` databases.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SqliteOptions {
    /// File path, or `:memory:` (one private database per connection)
    pub path: String,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout: Duration,
    #[serde(default = "enabled")]
    pub foreign_keys: bool,
    #[serde(default = "enabled")]
    pub wal: bool,
}

impl SqliteOptions {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            busy_timeout: default_busy_timeout(),
            foreign_keys: true,
            wal: true,
        }
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.foreign_keys = enabled;
        self
    }

    #[must_use]
    pub fn wal(mut self, enabled: bool) -> Self {
        self.wal = enabled;
        self
    }

    /// Open one dedicated connection.
    ///
    /// # Errors
    /// Returns `SqlConduitError` if the database cannot be opened.
    pub async fn connect(&self) -> Result<SqliteConnection, SqlConduitError> {
        SqliteConnection::open(self).await
    }

    /// Start a pooled runner for these options.
    ///
    /// # Errors
    /// `InvalidConfiguration` when `pool` does not validate.
    pub async fn build_pool(
        &self,
        pool: PoolConfig,
    ) -> Result<PoolRunner<SqliteManager>, SqlConduitError> {
        PoolRunner::start(SqliteManager::new(self.clone()), pool).await
    }
}

/// Fluent builder for `SQLite` options.
#[derive(Debug, Clone)]
pub struct SqliteOptionsBuilder {
    opts: SqliteOptions,
}

impl SqliteOptionsBuilder {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            opts: SqliteOptions::new(path),
        }
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.opts.busy_timeout = timeout;
        self
    }

    #[must_use]
    pub fn foreign_keys(mut self, enabled: bool) -> Self {
        self.opts.foreign_keys = enabled;
        self
    }

    #[must_use]
    pub fn wal(mut self, enabled: bool) -> Self {
        self.opts.wal = enabled;
        self
    }

    #[must_use]
    pub fn finish(self) -> SqliteOptions {
        self.opts
    }

    /// Open one dedicated connection.
    ///
    /// # Errors
    /// Returns `SqlConduitError` if the database cannot be opened.
    pub async fn connect(self) -> Result<SqliteConnection, SqlConduitError> {
        self.finish().connect().await
    }

    /// Start a pooled runner.
    ///
    /// # Errors
    /// `InvalidConfiguration` when `pool` does not validate.
    pub async fn build_pool(
        self,
        pool: PoolConfig,
    ) -> Result<PoolRunner<SqliteManager>, SqlConduitError> {
        self.finish().build_pool(pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_serde_agree_on_defaults() {
        let built = SqliteOptionsBuilder::new("app.db").finish();
        let parsed: SqliteOptions = serde_json::from_str(r#"{ "path": "app.db" }"#).unwrap();
        assert_eq!(built, parsed);
        assert!(parsed.foreign_keys);
        assert!(parsed.wal);
        assert_eq!(parsed.busy_timeout, Duration::from_secs(5));
    }

    #[test]
    fn builder_overrides() {
        let opts = SqliteOptionsBuilder::new(":memory:")
            .wal(false)
            .foreign_keys(false)
            .busy_timeout(Duration::from_millis(250))
            .finish();
        assert!(!opts.wal);
        assert!(!opts.foreign_keys);
        assert_eq!(opts.busy_timeout, Duration::from_millis(250));
    }
}
