//! Transactions and savepoints with guaranteed cleanup.
//!
//! Every helper here runs a caller block and finishes the transaction or savepoint
//! on every path: commit/release on success, rollback on failure. The block's own
//! error is always the one returned; cleanup failures are logged and leave the
//! connection marked dirty so pools discard it.

use std::future::Future;

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::connection::{Connection, RowStream};
use crate::error::SqlConduitError;
use crate::fragment::{Fragment, Statement};
use crate::ident::validate_identifier;
use crate::row::Row;
use crate::types::{Backend, ForeignKeyMode, IsolationLevel};

/// A connection inside an open transaction or savepoint.
///
/// Handed to transactional blocks. It is itself a [`Connection`], so everything that
/// works on a plain connection works inside the block.
///
/// Statement failures seen through this handle are remembered: on `PostgreSQL` any
/// failed statement aborts the whole transaction, so a block that handles such an
/// error and still returns `Ok` gets `TransactionFailed` instead of a commit. Use a
/// savepoint around statements that are allowed to fail.
pub struct Transaction<'c, C> {
    conn: &'c mut C,
    failed: bool,
}

impl<'c, C: Connection> Transaction<'c, C> {
    fn new(conn: &'c mut C) -> Self {
        Self {
            conn,
            failed: false,
        }
    }

    /// Whether a statement run through this handle has failed.
    pub fn has_failed_statement(&self) -> bool {
        self.failed
    }

    /// The underlying physical connection, still inside this transaction.
    ///
    /// Failures of statements run directly on it are not tracked by
    /// [`Transaction::has_failed_statement`].
    pub fn connection_mut(&mut self) -> &mut C {
        self.conn
    }

    /// Run `block` inside a savepoint of this transaction. Auto-named `sp_<depth>`
    /// when `name` is `None`.
    ///
    /// # Errors
    /// Returns the block's error after rolling back to the savepoint, or
    /// `InvalidIdentifier` for a bad name.
    pub async fn savepoint<T>(
        &mut self,
        name: Option<&str>,
        block: impl AsyncFnOnce(&mut Transaction<'_, C>) -> Result<T, SqlConduitError>,
    ) -> Result<T, SqlConduitError> {
        with_savepoint(&mut *self.conn, name, block).await
    }

    /// A nested unit of work; inside a transaction this is always an unnamed savepoint.
    ///
    /// # Errors
    /// As [`Transaction::savepoint`].
    pub async fn nested<T>(
        &mut self,
        block: impl AsyncFnOnce(&mut Transaction<'_, C>) -> Result<T, SqlConduitError>,
    ) -> Result<T, SqlConduitError> {
        with_savepoint(&mut *self.conn, None, block).await
    }
}

impl<C: Connection> Connection for Transaction<'_, C> {
    fn backend(&self) -> Backend {
        self.conn.backend()
    }

    fn transaction_depth(&self) -> usize {
        self.conn.transaction_depth()
    }

    fn transaction_depth_mut(&mut self) -> &mut usize {
        self.conn.transaction_depth_mut()
    }

    #[allow(clippy::manual_async_fn)]
    fn run_statement(
        &mut self,
        statement: Statement,
    ) -> impl Future<Output = Result<u64, SqlConduitError>> + Send {
        async move {
            let outcome = self.conn.run_statement(statement).await;
            self.failed |= outcome.is_err();
            outcome
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn run_batch(&mut self, sql: &str) -> impl Future<Output = Result<(), SqlConduitError>> + Send {
        async move {
            let outcome = self.conn.run_batch(sql).await;
            self.failed |= outcome.is_err();
            outcome
        }
    }

    #[allow(clippy::manual_async_fn)]
    fn open_rows(
        &mut self,
        statement: Statement,
    ) -> impl Future<Output = Result<RowStream<'_>, SqlConduitError>> + Send {
        async move {
            let failed = &mut self.failed;
            match self.conn.open_rows(statement).await {
                Ok(rows) => {
                    let rows: RowStream<'_> = Box::pin(rows.inspect(move |row| {
                        if row.is_err() {
                            *failed = true;
                        }
                    }));
                    Ok(rows)
                }
                Err(err) => {
                    *failed = true;
                    Err(err)
                }
            }
        }
    }
}

fn begin_sql(backend: Backend, isolation: IsolationLevel) -> &'static str {
    match (backend, isolation) {
        (Backend::Postgres, IsolationLevel::Default) => "BEGIN",
        (Backend::Postgres, IsolationLevel::RepeatableRead) => {
            "BEGIN ISOLATION LEVEL REPEATABLE READ"
        }
        (Backend::Postgres, IsolationLevel::Serializable) => "BEGIN ISOLATION LEVEL SERIALIZABLE",
        // SQLite transactions are always serializable; IMMEDIATE takes the write lock
        // up front instead of failing on upgrade.
        (Backend::Sqlite, IsolationLevel::Default) => "BEGIN",
        (Backend::Sqlite, IsolationLevel::RepeatableRead | IsolationLevel::Serializable) => {
            "BEGIN IMMEDIATE"
        }
    }
}

/// Run `block` inside a new top-level transaction.
///
/// Commits when the block succeeds. When the block fails the transaction is rolled
/// back and the block's error is returned unchanged. A failed commit is rolled back
/// (best effort) and reported as `TransactionFailed`.
///
/// On `PostgreSQL`, a block that returns `Ok` after one of its statements failed
/// outside a savepoint is rolled back and reported as `TransactionFailed`: the server
/// has already aborted the transaction and would turn the `COMMIT` into a rollback.
///
/// # Errors
/// `TransactionState` if `conn` is already inside a transaction (use
/// [`with_savepoint`] or [`with_nested_transaction`] there), driver errors from
/// `BEGIN`, the block's error, or `TransactionFailed`.
pub async fn with_transaction<C, T>(
    conn: &mut C,
    isolation: IsolationLevel,
    block: impl AsyncFnOnce(&mut Transaction<'_, C>) -> Result<T, SqlConduitError>,
) -> Result<T, SqlConduitError>
where
    C: Connection,
{
    if conn.transaction_depth() > 0 {
        return Err(SqlConduitError::TransactionState(
            "a transaction is already open on this connection; use a savepoint".to_string(),
        ));
    }
    conn.run_batch(begin_sql(conn.backend(), isolation)).await?;
    *conn.transaction_depth_mut() = 1;
    debug!(backend = %conn.backend(), ?isolation, "transaction started");

    let mut tx = Transaction::new(conn);
    let outcome = block(&mut tx).await;
    let aborted = tx.failed && tx.conn.backend() == Backend::Postgres;
    let conn = tx.conn;

    match outcome {
        Ok(_) if aborted => {
            warn!("statement failed inside the transaction; rolling back instead of committing");
            rollback_quietly(conn).await;
            Err(SqlConduitError::TransactionFailed(Box::new(
                SqlConduitError::TransactionState(
                    "a statement failed outside a savepoint, so the transaction was aborted"
                        .to_string(),
                ),
            )))
        }
        Ok(value) => match conn.run_batch("COMMIT").await {
            Ok(()) => {
                *conn.transaction_depth_mut() = 0;
                debug!("transaction committed");
                Ok(value)
            }
            Err(err) => {
                rollback_quietly(conn).await;
                Err(SqlConduitError::TransactionFailed(Box::new(err)))
            }
        },
        Err(err) => {
            debug!(error = %err, "transaction block failed; rolling back");
            rollback_quietly(conn).await;
            Err(err)
        }
    }
}

async fn rollback_quietly<C: Connection>(conn: &mut C) {
    match conn.run_batch("ROLLBACK").await {
        Ok(()) => *conn.transaction_depth_mut() = 0,
        Err(err) => warn!(error = %err, "rollback failed; connection left dirty"),
    }
}

/// Run `block` inside a savepoint of the transaction already open on `conn`.
///
/// The savepoint is released when the block succeeds. On failure it is rolled back
/// and released, leaving the enclosing transaction usable, and the block's error is
/// returned.
///
/// # Errors
/// `TransactionState` outside a transaction, `InvalidIdentifier` for a bad name
/// (checked before any SQL is sent), driver errors, or the block's error.
pub async fn with_savepoint<C, T>(
    conn: &mut C,
    name: Option<&str>,
    block: impl AsyncFnOnce(&mut Transaction<'_, C>) -> Result<T, SqlConduitError>,
) -> Result<T, SqlConduitError>
where
    C: Connection,
{
    let depth = conn.transaction_depth();
    if depth == 0 {
        return Err(SqlConduitError::TransactionState(
            "savepoints require an open transaction".to_string(),
        ));
    }
    let name = match name {
        Some(name) => {
            validate_identifier(name)?;
            name.to_string()
        }
        None => format!("sp_{depth}"),
    };

    conn.run_batch(&format!("SAVEPOINT {name}")).await?;
    *conn.transaction_depth_mut() = depth + 1;
    debug!(savepoint = %name, depth = depth + 1, "savepoint created");

    let mut tx = Transaction::new(conn);
    let outcome = block(&mut tx).await;
    let conn = tx.conn;

    match outcome {
        Ok(value) => match conn.run_batch(&format!("RELEASE SAVEPOINT {name}")).await {
            Ok(()) => {
                *conn.transaction_depth_mut() = depth;
                Ok(value)
            }
            Err(err) => {
                rollback_to_savepoint(conn, &name, depth).await;
                Err(err)
            }
        },
        Err(err) => {
            debug!(savepoint = %name, error = %err, "savepoint block failed; rolling back to it");
            rollback_to_savepoint(conn, &name, depth).await;
            Err(err)
        }
    }
}

async fn rollback_to_savepoint<C: Connection>(conn: &mut C, name: &str, depth: usize) {
    let sql = format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}");
    match conn.run_batch(&sql).await {
        Ok(()) => *conn.transaction_depth_mut() = depth,
        Err(err) => warn!(savepoint = %name, error = %err, "rollback to savepoint failed"),
    }
}

/// A savepoint when `conn` is already inside a transaction, otherwise a new
/// top-level transaction with `isolation`.
///
/// # Errors
/// As [`with_transaction`] or [`with_savepoint`].
pub async fn with_nested_transaction<C, T>(
    conn: &mut C,
    isolation: IsolationLevel,
    block: impl AsyncFnOnce(&mut Transaction<'_, C>) -> Result<T, SqlConduitError>,
) -> Result<T, SqlConduitError>
where
    C: Connection,
{
    if conn.transaction_depth() > 0 {
        with_savepoint(conn, None, block).await
    } else {
        with_transaction(conn, isolation, block).await
    }
}

/// Switch foreign-key checking between per-statement and at-commit.
///
/// On `PostgreSQL` this only affects constraints declared `DEFERRABLE`, and switching
/// back to immediate checks any pending violations right away.
///
/// `SQLite` forgets pending violations when deferral is switched off, so switching to
/// [`ForeignKeyMode::Immediate`] there first runs `PRAGMA foreign_key_check` and fails
/// while any row in the database still breaks a foreign key. Deferral stays on in
/// that case.
///
/// # Errors
/// Driver errors, or `ExecutionError` for outstanding violations on `SQLite`.
pub async fn set_foreign_key_checks<C: Connection>(
    conn: &mut C,
    mode: ForeignKeyMode,
) -> Result<(), SqlConduitError> {
    let sql = match (conn.backend(), mode) {
        (Backend::Postgres, ForeignKeyMode::Deferred) => "SET CONSTRAINTS ALL DEFERRED",
        (Backend::Postgres, ForeignKeyMode::Immediate) => "SET CONSTRAINTS ALL IMMEDIATE",
        (Backend::Sqlite, ForeignKeyMode::Deferred) => "PRAGMA defer_foreign_keys = ON",
        (Backend::Sqlite, ForeignKeyMode::Immediate) => {
            check_sqlite_foreign_keys(conn).await?;
            "PRAGMA defer_foreign_keys = OFF"
        }
    };
    conn.run_batch(sql).await
}

async fn check_sqlite_foreign_keys<C: Connection>(conn: &mut C) -> Result<(), SqlConduitError> {
    let violations: Vec<Row> = conn
        .fetch_all(&Fragment::sql("PRAGMA foreign_key_check"))
        .await?;
    let Some(first) = violations.first() else {
        return Ok(());
    };
    let table = first.get::<String>("table")?.unwrap_or_default();
    let parent = first.get::<String>("parent")?.unwrap_or_default();
    Err(SqlConduitError::ExecutionError(format!(
        "FOREIGN KEY constraint failed: {} row(s) violate foreign keys, first in `{table}` referencing `{parent}`",
        violations.len()
    )))
}

/// Method-call forms of the transaction helpers for every connection.
pub trait TransactionExt: Connection + Sized {
    /// See [`with_transaction`].
    fn transaction<T>(
        &mut self,
        isolation: IsolationLevel,
        block: impl AsyncFnOnce(&mut Transaction<'_, Self>) -> Result<T, SqlConduitError>,
    ) -> impl Future<Output = Result<T, SqlConduitError>> {
        with_transaction(self, isolation, block)
    }

    /// See [`with_savepoint`].
    fn savepoint<T>(
        &mut self,
        name: Option<&str>,
        block: impl AsyncFnOnce(&mut Transaction<'_, Self>) -> Result<T, SqlConduitError>,
    ) -> impl Future<Output = Result<T, SqlConduitError>> {
        with_savepoint(self, name, block)
    }

    /// See [`with_nested_transaction`].
    fn nested_transaction<T>(
        &mut self,
        isolation: IsolationLevel,
        block: impl AsyncFnOnce(&mut Transaction<'_, Self>) -> Result<T, SqlConduitError>,
    ) -> impl Future<Output = Result<T, SqlConduitError>> {
        with_nested_transaction(self, isolation, block)
    }
}

impl<C: Connection> TransactionExt for C {}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use futures_util::stream;

    use super::*;
    use crate::types::Value;

    /// Logs statements, fails those containing `fail_on`, and answers
    /// `PRAGMA foreign_key_check` with `violations`.
    struct Scripted {
        backend: Backend,
        depth: usize,
        fail_on: &'static str,
        violations: Vec<Row>,
        log: Arc<Mutex<Vec<String>>>,
    }

    impl Scripted {
        fn new(backend: Backend) -> Self {
            Self {
                backend,
                depth: 0,
                fail_on: "never matches",
                violations: Vec::new(),
                log: Arc::default(),
            }
        }

        fn run(&self, sql: &str) -> Result<(), SqlConduitError> {
            self.log.lock().unwrap().push(sql.to_string());
            if sql.contains(self.fail_on) {
                return Err(SqlConduitError::ExecutionError(format!("rejected: {sql}")));
            }
            Ok(())
        }
    }

    impl Connection for Scripted {
        fn backend(&self) -> Backend {
            self.backend
        }

        fn transaction_depth(&self) -> usize {
            self.depth
        }

        fn transaction_depth_mut(&mut self) -> &mut usize {
            &mut self.depth
        }

        async fn run_statement(&mut self, statement: Statement) -> Result<u64, SqlConduitError> {
            self.run(&statement.sql).map(|()| 1)
        }

        async fn run_batch(&mut self, sql: &str) -> Result<(), SqlConduitError> {
            self.run(sql)
        }

        async fn open_rows(
            &mut self,
            statement: Statement,
        ) -> Result<RowStream<'_>, SqlConduitError> {
            self.run(&statement.sql)?;
            let rows = if statement.sql == "PRAGMA foreign_key_check" {
                self.violations.clone()
            } else {
                Vec::new()
            };
            Ok(Box::pin(stream::iter(rows.into_iter().map(Ok))))
        }
    }

    fn violation(table: &str, parent: &str) -> Row {
        Row::new(
            vec!["table".into(), "rowid".into(), "parent".into(), "fkid".into()],
            vec![
                Value::from(table),
                Value::from(1_i64),
                Value::from(parent),
                Value::from(0_i64),
            ],
        )
    }

    #[test]
    fn begin_statements_follow_backend_and_isolation() {
        assert_eq!(begin_sql(Backend::Postgres, IsolationLevel::Default), "BEGIN");
        assert_eq!(
            begin_sql(Backend::Postgres, IsolationLevel::Serializable),
            "BEGIN ISOLATION LEVEL SERIALIZABLE"
        );
        assert_eq!(
            begin_sql(Backend::Sqlite, IsolationLevel::RepeatableRead),
            "BEGIN IMMEDIATE"
        );
    }

    #[tokio::test]
    async fn swallowed_statement_error_aborts_postgres_commit() {
        let mut conn = Scripted::new(Backend::Postgres);
        conn.fail_on = "INSERT";
        let log = Arc::clone(&conn.log);

        let err = with_transaction(&mut conn, IsolationLevel::Default, async |tx| {
            let failed = tx.execute(&Fragment::sql("INSERT INTO t VALUES (1)")).await;
            assert!(failed.is_err());
            assert!(tx.has_failed_statement());
            Ok(())
        })
        .await
        .unwrap_err();

        assert!(matches!(err, SqlConduitError::TransactionFailed(_)));
        assert_eq!(conn.transaction_depth(), 0);
        let log = log.lock().unwrap();
        assert_eq!(log.last().map(String::as_str), Some("ROLLBACK"));
        assert!(!log.iter().any(|sql| sql == "COMMIT"));
    }

    #[tokio::test]
    async fn errors_recovered_by_savepoint_still_commit() {
        let mut conn = Scripted::new(Backend::Postgres);
        conn.fail_on = "INSERT";
        let log = Arc::clone(&conn.log);

        with_transaction(&mut conn, IsolationLevel::Default, async |tx| {
            let inner = tx
                .savepoint(None, async |sp| {
                    sp.execute(&Fragment::sql("INSERT INTO t VALUES (1)")).await?;
                    Ok(())
                })
                .await;
            assert!(inner.is_err());
            assert!(!tx.has_failed_statement());
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("COMMIT"));
    }

    #[tokio::test]
    async fn sqlite_statement_errors_do_not_abort_the_transaction() {
        let mut conn = Scripted::new(Backend::Sqlite);
        conn.fail_on = "INSERT";
        let log = Arc::clone(&conn.log);

        with_transaction(&mut conn, IsolationLevel::Default, async |tx| {
            let _ = tx.execute(&Fragment::sql("INSERT INTO t VALUES (1)")).await;
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("COMMIT"));
    }

    #[tokio::test]
    async fn sqlite_immediate_checks_refuse_pending_violations() {
        let mut conn = Scripted::new(Backend::Sqlite);
        conn.violations = vec![violation("posts", "users"), violation("posts", "users")];
        let log = Arc::clone(&conn.log);

        let err = set_foreign_key_checks(&mut conn, ForeignKeyMode::Immediate)
            .await
            .unwrap_err();
        match err {
            SqlConduitError::ExecutionError(message) => {
                assert!(message.contains("2 row(s)"), "{message}");
                assert!(message.contains("`posts` referencing `users`"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(*log.lock().unwrap(), ["PRAGMA foreign_key_check"]);

        conn.violations.clear();
        set_foreign_key_checks(&mut conn, ForeignKeyMode::Immediate)
            .await
            .unwrap();
        assert_eq!(
            log.lock().unwrap().last().map(String::as_str),
            Some("PRAGMA defer_foreign_keys = OFF")
        );
    }
}
