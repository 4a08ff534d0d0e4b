use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;
use tokio_postgres::config::SslMode;

use crate::config::PoolConfig;
use crate::error::SqlConduitError;
use crate::pool::PoolRunner;

use super::connection::PgConnection;
use super::manager::PgManager;

/// Transport security for `PostgreSQL` sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    Disable,
    /// Use TLS when the server and the connector support it
    #[default]
    Prefer,
    Require,
}

/// Where and how to connect to `PostgreSQL`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    pub host: Option<String>,
    pub port: u16,
    pub database: Option<String>,
    pub username: String,
    pub password: Option<String>,
    pub tls: TlsMode,
    pub application_name: Option<String>,
    /// Idle time before TCP keep-alive probes start; `None` disables them.
    pub tcp_keepalive: Option<Duration>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            host: None,
            port: 5432,
            database: None,
            username: "postgres".to_string(),
            password: None,
            tls: TlsMode::default(),
            application_name: None,
            tcp_keepalive: Some(Duration::from_secs(60)),
        }
    }
}

impl ConnectOptions {
    #[must_use]
    pub fn new(host: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            database: Some(database.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    #[must_use]
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = username.into();
        self
    }

    #[must_use]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    #[must_use]
    pub fn tls(mut self, tls: TlsMode) -> Self {
        self.tls = tls;
        self
    }

    #[must_use]
    pub fn application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn tcp_keepalive(mut self, idle: Option<Duration>) -> Self {
        self.tcp_keepalive = idle;
        self
    }

    /// Translate into a driver configuration.
    ///
    /// # Errors
    /// `NotConfigured` when host or database is missing; `InvalidConfiguration` for
    /// `TlsMode::Require`, which needs a TLS connector this crate does not ship.
    pub fn to_pg_config(&self) -> Result<tokio_postgres::Config, SqlConduitError> {
        let host = self
            .host
            .as_deref()
            .ok_or_else(|| SqlConduitError::NotConfigured("postgres host is required".into()))?;
        let database = self.database.as_deref().ok_or_else(|| {
            SqlConduitError::NotConfigured("postgres database is required".into())
        })?;

        let mut cfg = tokio_postgres::Config::new();
        cfg.host(host)
            .port(self.port)
            .dbname(database)
            .user(&self.username);
        if let Some(password) = &self.password {
            cfg.password(password);
        }
        if let Some(name) = &self.application_name {
            cfg.application_name(name);
        }
        match self.tcp_keepalive {
            Some(idle) => {
                cfg.keepalives(true).keepalives_idle(idle);
            }
            None => {
                cfg.keepalives(false);
            }
        }
        match self.tls {
            TlsMode::Disable => {
                cfg.ssl_mode(SslMode::Disable);
            }
            TlsMode::Prefer => {
                cfg.ssl_mode(SslMode::Prefer);
            }
            TlsMode::Require => {
                return Err(SqlConduitError::InvalidConfiguration(
                    "TlsMode::Require needs a TLS connector; only plaintext sessions are available"
                        .into(),
                ));
            }
        }
        Ok(cfg)
    }

    /// Open one dedicated connection.
    ///
    /// # Errors
    /// Configuration errors from [`ConnectOptions::to_pg_config`] or connect failures.
    pub async fn connect(&self) -> Result<PgConnection, SqlConduitError> {
        PgConnection::connect(&self.to_pg_config()?).await
    }

    /// Start a pooled runner for these options.
    ///
    /// # Errors
    /// Configuration errors from [`ConnectOptions::to_pg_config`] or
    /// [`PoolConfig::validate`].
    pub async fn build_pool(
        &self,
        pool: PoolConfig,
    ) -> Result<PoolRunner<PgManager>, SqlConduitError> {
        PoolRunner::start(PgManager::new(self.to_pg_config()?), pool).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_host_or_database_is_not_configured() {
        let opts = ConnectOptions::default();
        assert!(matches!(
            opts.to_pg_config(),
            Err(SqlConduitError::NotConfigured(_))
        ));
        let opts = ConnectOptions {
            host: Some("localhost".into()),
            ..ConnectOptions::default()
        };
        assert!(matches!(
            opts.to_pg_config(),
            Err(SqlConduitError::NotConfigured(_))
        ));
    }

    #[test]
    fn require_tls_is_rejected() {
        let opts = ConnectOptions::new("localhost", "app").tls(TlsMode::Require);
        assert!(matches!(
            opts.to_pg_config(),
            Err(SqlConduitError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn options_translate_to_driver_config() {
        let cfg = ConnectOptions::new("db.internal", "app")
            .port(6543)
            .username("svc")
            .password("secret")
            .application_name("conduit-tests")
            .to_pg_config()
            .unwrap();
        assert_eq!(cfg.get_ports(), &[6543]);
        assert_eq!(cfg.get_dbname(), Some("app"));
        assert_eq!(cfg.get_user(), Some("svc"));
        assert_eq!(cfg.get_password(), Some(&b"secret"[..]));
        assert_eq!(cfg.get_application_name(), Some("conduit-tests"));
    }

    #[test]
    fn deserializes_with_defaults() {
        let opts: ConnectOptions =
            serde_json::from_str(r#"{ "host": "h", "database": "d", "tls": "disable" }"#).unwrap();
        assert_eq!(opts.port, 5432);
        assert_eq!(opts.tls, TlsMode::Disable);
        assert!(opts.to_pg_config().is_ok());
    }
}
