use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use rusqlite::params_from_iter;
use rusqlite::types::Value as SqliteValue;
use tokio::sync::{mpsc as tokio_mpsc, oneshot};
use tracing::debug;

use crate::error::SqlConduitError;
use crate::row::Row;

use super::config::SqliteOptions;
use super::query::{build_row, columns_of};

/// Rows a cursor may run ahead of its consumer.
pub(crate) const ROW_BUFFER: usize = 32;

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type RowReceiver = tokio_mpsc::Receiver<Result<Row, SqlConduitError>>;

/// A dedicated thread owning one `rusqlite::Connection`.
///
/// Commands arrive over a std channel and are answered on tokio oneshots, so async
/// callers never block on `SQLite`. The thread never enters the tokio runtime.
pub(crate) struct SqliteWorker {
    sender: Sender<Command>,
    alive: Arc<AtomicBool>,
    id: u64,
}

enum Command {
    Execute {
        sql: String,
        params: Vec<SqliteValue>,
        respond_to: oneshot::Sender<Result<u64, SqlConduitError>>,
    },
    Batch {
        sql: String,
        respond_to: oneshot::Sender<Result<(), SqlConduitError>>,
    },
    Query {
        sql: String,
        params: Vec<SqliteValue>,
        opened: oneshot::Sender<Result<(), SqlConduitError>>,
        rows: tokio_mpsc::Sender<Result<Row, SqlConduitError>>,
    },
    Shutdown,
}

/// Clears the liveness flag however the thread exits.
struct AliveFlag(Arc<AtomicBool>);

impl Drop for AliveFlag {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SqliteWorker {
    /// Start a worker and open the database on it.
    pub(crate) async fn open(options: &SqliteOptions) -> Result<Self, SqlConduitError> {
        let (sender, receiver) = mpsc::channel::<Command>();
        let (ready_tx, ready_rx) = oneshot::channel();
        let alive = Arc::new(AtomicBool::new(true));
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);

        let flag = AliveFlag(Arc::clone(&alive));
        let options = options.clone();
        thread::Builder::new()
            .name(format!("sqlite-worker-{id}"))
            .spawn(move || {
                let _flag = flag;
                let conn = match open_connection(&options) {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };
                run_sqlite_worker(&conn, &receiver);
                debug!(worker = id, "sqlite worker stopped");
            })
            .map_err(|err| {
                SqlConduitError::ConnectionError(format!(
                    "failed to spawn SQLite worker thread: {err}"
                ))
            })?;

        ready_rx.await.map_err(|_| {
            SqlConduitError::ConnectionError("SQLite worker exited while opening".into())
        })??;
        Ok(Self { sender, alive, id })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub(crate) fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    fn send_command(&self, command: Command) -> Result<(), SqlConduitError> {
        self.sender
            .send(command)
            .map_err(|_| SqlConduitError::ConnectionError("SQLite worker closed".into()))
    }

    pub(crate) async fn execute(
        &self,
        sql: String,
        params: Vec<SqliteValue>,
    ) -> Result<u64, SqlConduitError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Execute {
            sql,
            params,
            respond_to: tx,
        })?;
        rx.await.map_err(|_| {
            SqlConduitError::ConnectionError("SQLite worker dropped while executing".into())
        })?
    }

    pub(crate) async fn batch(&self, sql: String) -> Result<(), SqlConduitError> {
        let (tx, rx) = oneshot::channel();
        self.send_command(Command::Batch {
            sql,
            respond_to: tx,
        })?;
        rx.await.map_err(|_| {
            SqlConduitError::ConnectionError("SQLite worker dropped while executing batch".into())
        })?
    }

    /// Start a query. Rows arrive on the returned channel; dropping it stops the
    /// statement on the worker.
    pub(crate) async fn query(
        &self,
        sql: String,
        params: Vec<SqliteValue>,
    ) -> Result<RowReceiver, SqlConduitError> {
        let (opened_tx, opened_rx) = oneshot::channel();
        let (rows_tx, rows_rx) = tokio_mpsc::channel(ROW_BUFFER);
        self.send_command(Command::Query {
            sql,
            params,
            opened: opened_tx,
            rows: rows_tx,
        })?;
        opened_rx.await.map_err(|_| {
            SqlConduitError::ConnectionError("SQLite worker dropped while preparing query".into())
        })??;
        Ok(rows_rx)
    }
}

impl Drop for SqliteWorker {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
    }
}

fn open_connection(options: &SqliteOptions) -> Result<rusqlite::Connection, SqlConduitError> {
    let conn = rusqlite::Connection::open(&options.path)?;
    conn.busy_timeout(options.busy_timeout)?;
    let mut pragmas = String::new();
    if options.wal {
        pragmas.push_str("PRAGMA journal_mode = WAL;");
    }
    pragmas.push_str(if options.foreign_keys {
        "PRAGMA foreign_keys = ON;"
    } else {
        "PRAGMA foreign_keys = OFF;"
    });
    conn.execute_batch(&pragmas)?;
    Ok(conn)
}

fn run_sqlite_worker(conn: &rusqlite::Connection, receiver: &Receiver<Command>) {
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Execute {
                sql,
                params,
                respond_to,
            } => {
                let _ = respond_to.send(execute(conn, &sql, &params));
            }
            Command::Batch { sql, respond_to } => {
                let outcome = conn.execute_batch(&sql).map_err(SqlConduitError::from);
                let _ = respond_to.send(outcome);
            }
            Command::Query {
                sql,
                params,
                opened,
                rows,
            } => stream_rows(conn, &sql, &params, opened, &rows),
            Command::Shutdown => break,
        }
    }
}

fn execute(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[SqliteValue],
) -> Result<u64, SqlConduitError> {
    let mut stmt = conn.prepare_cached(sql)?;
    if stmt.column_count() == 0 {
        return Ok(stmt.execute(params_from_iter(params.iter()))? as u64);
    }
    // Statements that produce rows (RETURNING, some pragmas) are drained and counted.
    let mut rows = stmt.query(params_from_iter(params.iter()))?;
    let mut count = 0;
    while rows.next()?.is_some() {
        count += 1;
    }
    Ok(count)
}

fn stream_rows(
    conn: &rusqlite::Connection,
    sql: &str,
    params: &[SqliteValue],
    opened: oneshot::Sender<Result<(), SqlConduitError>>,
    sink: &tokio_mpsc::Sender<Result<Row, SqlConduitError>>,
) {
    let mut stmt = match conn.prepare_cached(sql) {
        Ok(stmt) => stmt,
        Err(err) => {
            let _ = opened.send(Err(err.into()));
            return;
        }
    };
    let columns = columns_of(&stmt);
    let mut rows = match stmt.query(params_from_iter(params.iter())) {
        Ok(rows) => rows,
        Err(err) => {
            let _ = opened.send(Err(err.into()));
            return;
        }
    };
    if opened.send(Ok(())).is_err() {
        return;
    }
    loop {
        let item = match rows.next() {
            Ok(Some(row)) => build_row(&columns, row),
            Ok(None) => return,
            Err(err) => Err(err.into()),
        };
        let failed = item.is_err();
        // Blocks until the consumer makes room; errors once the cursor is dropped.
        if sink.blocking_send(item).is_err() {
            debug!("cursor dropped before its rows were exhausted");
            return;
        }
        if failed {
            return;
        }
    }
}

impl std::fmt::Debug for SqliteWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteWorker")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}
