use std::fmt;

use futures_util::stream;

use crate::connection::{Connection, RowStream};
use crate::error::SqlConduitError;
use crate::fragment::Statement;
use crate::types::Backend;

use super::config::SqliteOptions;
use super::params::convert_params;
use super::worker::SqliteWorker;

/// One `SQLite` session running on its own worker thread.
pub struct SqliteConnection {
    worker: SqliteWorker,
    depth: usize,
}

impl SqliteConnection {
    /// Open a connection outside any pool.
    ///
    /// # Errors
    /// Returns `SqlConduitError` if the worker cannot start or the file cannot be
    /// opened.
    pub async fn open(options: &SqliteOptions) -> Result<Self, SqlConduitError> {
        let worker = SqliteWorker::open(options).await?;
        Ok(Self { worker, depth: 0 })
    }

    /// False once the worker thread has exited.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.worker.is_alive()
    }
}

impl fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("worker", &self.worker.id())
            .field("depth", &self.depth)
            .finish()
    }
}

impl Connection for SqliteConnection {
    fn backend(&self) -> Backend {
        Backend::Sqlite
    }

    fn transaction_depth(&self) -> usize {
        self.depth
    }

    fn transaction_depth_mut(&mut self) -> &mut usize {
        &mut self.depth
    }

    async fn run_statement(&mut self, statement: Statement) -> Result<u64, SqlConduitError> {
        let (sql, params) = statement.into_parameters();
        self.worker.execute(sql, convert_params(params)).await
    }

    async fn run_batch(&mut self, sql: &str) -> Result<(), SqlConduitError> {
        self.worker.batch(sql.to_string()).await
    }

    async fn open_rows(&mut self, statement: Statement) -> Result<RowStream<'_>, SqlConduitError> {
        let (sql, params) = statement.into_parameters();
        let mut rows = self.worker.query(sql, convert_params(params)).await?;
        Ok(Box::pin(stream::poll_fn(move |cx| rows.poll_recv(cx))))
    }
}
