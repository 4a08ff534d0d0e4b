use std::time::Duration;

use serde::Deserialize;

use crate::error::SqlConduitError;

/// Sizing and timing for a [`PoolRunner`](crate::pool::PoolRunner).
///
/// Deserializable so it can live in the host's own configuration file:
/// ```rust
/// use sql_conduit::prelude::*;
///
/// let cfg: PoolConfig = serde_json::from_str(r#"{ "max_connections": 4 }"#).unwrap();
/// assert_eq!(cfg.max_connections, 4);
/// assert_eq!(cfg.min_connections, PoolConfig::default().min_connections);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    pub min_connections: u32,
    pub max_connections: u32,
    /// Idle connections above the minimum are closed after this long.
    pub idle_timeout: Option<Duration>,
    /// How long an acquisition waits before failing.
    pub connection_timeout: Duration,
    /// Interval of the background loop that checks a connection out and back in.
    pub keep_alive_interval: Duration,
    /// How long `start` waits for the minimum number of connections.
    pub startup_grace: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 10,
            idle_timeout: Some(Duration::from_secs(600)),
            connection_timeout: Duration::from_secs(30),
            keep_alive_interval: Duration::from_secs(60),
            startup_grace: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn with_min_connections(mut self, min: u32) -> Self {
        self.min_connections = min;
        self
    }

    #[must_use]
    pub fn with_max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_keep_alive_interval(mut self, interval: Duration) -> Self {
        self.keep_alive_interval = interval;
        self
    }

    #[must_use]
    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// # Errors
    /// `InvalidConfiguration` for an empty pool, `min > max`, or zero intervals.
    pub fn validate(&self) -> Result<(), SqlConduitError> {
        if self.max_connections == 0 {
            return Err(SqlConduitError::InvalidConfiguration(
                "max_connections must be at least 1".to_string(),
            ));
        }
        if self.min_connections > self.max_connections {
            return Err(SqlConduitError::InvalidConfiguration(format!(
                "min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            )));
        }
        if self.connection_timeout.is_zero() {
            return Err(SqlConduitError::InvalidConfiguration(
                "connection_timeout must be positive".to_string(),
            ));
        }
        if self.keep_alive_interval.is_zero() {
            return Err(SqlConduitError::InvalidConfiguration(
                "keep_alive_interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
