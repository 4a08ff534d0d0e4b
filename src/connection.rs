use std::future::Future;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::cursor::Cursor;
use crate::decode::FromRow;
use crate::error::SqlConduitError;
use crate::fragment::{Fragment, Statement};
use crate::row::Row;
use crate::types::Backend;

/// Forward-only stream of decoded rows borrowed from a connection.
pub type RowStream<'a> = BoxStream<'a, Result<Row, SqlConduitError>>;

/// One physical database session.
///
/// A connection is owned by exactly one block at a time (`&mut self`), so statements
/// on it are naturally serialized. Backends provide the three raw primitives; the
/// fragment-level operations are built on top of them.
///
/// The connection also records how deep it is inside transactions and savepoints.
/// A depth above zero outside of a transactional block means a block was abandoned
/// mid-flight and the session must be rolled back or discarded.
pub trait Connection: Send {
    fn backend(&self) -> Backend;

    /// Current transaction nesting: 0 outside a transaction, 1 inside a top-level
    /// transaction, one more per open savepoint.
    fn transaction_depth(&self) -> usize;

    #[doc(hidden)]
    fn transaction_depth_mut(&mut self) -> &mut usize;

    /// Run one statement, returning the number of affected rows.
    fn run_statement(
        &mut self,
        statement: Statement,
    ) -> impl Future<Output = Result<u64, SqlConduitError>> + Send;

    /// Run unparameterized SQL, possibly several statements.
    fn run_batch(&mut self, sql: &str) -> impl Future<Output = Result<(), SqlConduitError>> + Send;

    /// Start a query and return its rows as a stream.
    fn open_rows(
        &mut self,
        statement: Statement,
    ) -> impl Future<Output = Result<RowStream<'_>, SqlConduitError>> + Send;

    /// Execute a fragment that is not expected to return rows.
    ///
    /// An empty fragment is a no-op and never reaches the server.
    #[allow(clippy::manual_async_fn)]
    fn execute(
        &mut self,
        fragment: &Fragment,
    ) -> impl Future<Output = Result<u64, SqlConduitError>> + Send {
        async move {
            if fragment.is_empty() {
                return Ok(0);
            }
            let statement = fragment.to_executable(self.backend().placeholder_style());
            self.run_statement(statement).await
        }
    }

    /// Execute raw SQL text outside the fragment model (DDL, maintenance).
    #[allow(clippy::manual_async_fn)]
    fn execute_raw(&mut self, sql: &str) -> impl Future<Output = Result<(), SqlConduitError>> + Send {
        async move {
            if sql.trim().is_empty() {
                return Ok(());
            }
            self.run_batch(sql).await
        }
    }

    /// Fetch every row of a query into memory.
    #[allow(clippy::manual_async_fn)]
    fn fetch_all<T: FromRow + Send>(
        &mut self,
        fragment: &Fragment,
    ) -> impl Future<Output = Result<Vec<T>, SqlConduitError>> + Send {
        async move {
            if fragment.is_empty() {
                return Ok(Vec::new());
            }
            let statement = fragment.to_executable(self.backend().placeholder_style());
            let mut rows = self.open_rows(statement).await?;
            let mut out = Vec::new();
            while let Some(row) = rows.next().await {
                out.push(T::from_row(row?)?);
            }
            Ok(out)
        }
    }

    /// First row of [`Connection::fetch_all`], if any.
    #[allow(clippy::manual_async_fn)]
    fn fetch_one<T: FromRow + Send>(
        &mut self,
        fragment: &Fragment,
    ) -> impl Future<Output = Result<Option<T>, SqlConduitError>> + Send {
        async move {
            let rows: Vec<T> = self.fetch_all(fragment).await?;
            Ok(rows.into_iter().next())
        }
    }

    /// Open a cursor over a query. Rows are pulled from the server as the cursor
    /// advances; an empty fragment yields an already exhausted cursor.
    #[allow(clippy::manual_async_fn)]
    fn fetch_cursor<T: FromRow>(
        &mut self,
        fragment: &Fragment,
    ) -> impl Future<Output = Result<Cursor<'_, T>, SqlConduitError>> + Send {
        async move {
            if fragment.is_empty() {
                return Ok(Cursor::exhausted());
            }
            let statement = fragment.to_executable(self.backend().placeholder_style());
            let rows = self.open_rows(statement).await?;
            Ok(Cursor::new(rows))
        }
    }
}
