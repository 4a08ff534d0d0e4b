use std::future::Future;

use bb8::ManageConnection;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::Connection;
use crate::error::SqlConduitError;
use crate::pool::ManagedBackend;
use crate::types::Backend;

use super::connection::PgConnection;

/// bb8 manager for `PostgreSQL` connections.
pub struct PgManager {
    pub(crate) config: tokio_postgres::Config,
    shutdown: CancellationToken,
}

impl PgManager {
    #[must_use]
    pub fn new(config: tokio_postgres::Config) -> Self {
        Self {
            config,
            shutdown: CancellationToken::new(),
        }
    }
}

impl ManageConnection for PgManager {
    type Connection = PgConnection;
    type Error = SqlConduitError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let cfg = self.config.clone();
        let shutdown = self.shutdown.clone();
        async move {
            if shutdown.is_cancelled() {
                return Err(SqlConduitError::PoolShuttingDown);
            }
            debug!(
                hosts = ?cfg.get_hosts(),
                db = ?cfg.get_dbname(),
                user = ?cfg.get_user(),
                "postgres connect start"
            );
            let conn = PgConnection::connect_with_shutdown(&cfg, &shutdown).await?;
            debug!("postgres connect established");
            Ok(conn)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move { conn.run_batch("SELECT 1").await }
    }

    /// Sessions left inside a transaction or still subscribed to a channel are not
    /// handed to the next caller.
    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        conn.is_closed() || conn.transaction_depth() > 0 || conn.is_listening()
    }
}

impl ManagedBackend for PgManager {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
