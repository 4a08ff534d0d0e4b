use std::future::Future;

use bb8::ManageConnection;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::Connection;
use crate::error::SqlConduitError;
use crate::fragment::Statement;
use crate::notification::{Channel, NotificationSource, Notifications};
use crate::pool::{ManagedBackend, PoolRunner};
use crate::types::Backend;

use super::config::SqliteOptions;
use super::connection::SqliteConnection;

/// bb8 manager for worker-backed `SQLite` connections.
pub struct SqliteManager {
    options: SqliteOptions,
    shutdown: CancellationToken,
}

impl SqliteManager {
    #[must_use]
    pub fn new(options: SqliteOptions) -> Self {
        Self {
            options,
            shutdown: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn options(&self) -> &SqliteOptions {
        &self.options
    }
}

impl ManageConnection for SqliteManager {
    type Connection = SqliteConnection;
    type Error = SqlConduitError;

    #[allow(clippy::manual_async_fn)]
    fn connect(&self) -> impl Future<Output = Result<Self::Connection, Self::Error>> + Send {
        let options = self.options.clone();
        let shutdown = self.shutdown.clone();
        async move {
            if shutdown.is_cancelled() {
                return Err(SqlConduitError::PoolShuttingDown);
            }
            let conn = SqliteConnection::open(&options).await?;
            debug!(path = %options.path, "sqlite connection opened");
            Ok(conn)
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn is_valid(
        &self,
        conn: &mut Self::Connection,
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            conn.run_statement(Statement::new("SELECT 1", Vec::new()))
                .await
                .map(|_| ())
        }
    }

    fn has_broken(&self, conn: &mut Self::Connection) -> bool {
        !conn.is_alive() || conn.transaction_depth() > 0
    }
}

impl ManagedBackend for SqliteManager {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl NotificationSource for PoolRunner<SqliteManager> {
    async fn listen<Ch: Channel>(&self) -> Result<Notifications<Ch>, SqlConduitError> {
        Err(SqlConduitError::NotificationUnsupported(Backend::Sqlite))
    }
}
