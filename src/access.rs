//! Read/write capability split.
//!
//! Callers ask for a connection through [`Reader::read`] or [`Writer::write`] and
//! receive it only for the duration of an async block. Anything that needs one
//! consistent session (a transaction, a cursor plus follow-up statements) must
//! happen inside a single block.

use std::future::Future;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::SqlConduitError;

/// Access to a connection suitable for reads.
pub trait Reader {
    type Conn: Connection;

    /// Run `block` with a connection. No write isolation is promised.
    fn read<T>(
        &self,
        block: impl AsyncFnOnce(&mut Self::Conn) -> Result<T, SqlConduitError>,
    ) -> impl Future<Output = Result<T, SqlConduitError>>;

    /// Release every resource held. Best effort and idempotent.
    fn close(&self) -> impl Future<Output = ()>;
}

/// Access to a connection that may write.
pub trait Writer: Reader {
    fn write<T>(
        &self,
        block: impl AsyncFnOnce(&mut Self::Conn) -> Result<T, SqlConduitError>,
    ) -> impl Future<Output = Result<T, SqlConduitError>>;
}

/// Reader and writer over one dedicated connection.
///
/// Blocks are serialized on an async mutex. If a previous block was cancelled while
/// a transaction was open, the transaction is rolled back before the connection is
/// handed out again.
pub struct Single<C> {
    conn: Mutex<Option<C>>,
}

impl<C: Connection> Single<C> {
    #[must_use]
    pub fn new(conn: C) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
        }
    }

    async fn run<T>(
        &self,
        block: impl AsyncFnOnce(&mut C) -> Result<T, SqlConduitError>,
    ) -> Result<T, SqlConduitError> {
        let mut guard = self.conn.lock().await;
        let conn = guard.as_mut().ok_or(SqlConduitError::PoolShuttingDown)?;
        recover_abandoned_transaction(conn).await;
        block(conn).await
    }

    /// Take the connection back out; `None` after [`Reader::close`].
    #[must_use]
    pub fn into_inner(self) -> Option<C> {
        self.conn.into_inner()
    }
}

/// Roll back a transaction a cancelled block left open.
async fn recover_abandoned_transaction<C: Connection>(conn: &mut C) {
    let depth = conn.transaction_depth();
    if depth == 0 {
        return;
    }
    warn!(depth, "connection returned inside a transaction; rolling back");
    if let Err(err) = conn.run_batch("ROLLBACK").await {
        // The server may already have ended it; either way there is nothing left open.
        debug!(error = %err, "rollback of abandoned transaction failed");
    }
    *conn.transaction_depth_mut() = 0;
}

impl<C: Connection> Reader for Single<C> {
    type Conn = C;

    async fn read<T>(
        &self,
        block: impl AsyncFnOnce(&mut C) -> Result<T, SqlConduitError>,
    ) -> Result<T, SqlConduitError> {
        self.run(block).await
    }

    async fn close(&self) {
        let mut guard = self.conn.lock().await;
        if guard.take().is_some() {
            debug!("single connection closed");
        }
    }
}

impl<C: Connection> Writer for Single<C> {
    async fn write<T>(
        &self,
        block: impl AsyncFnOnce(&mut C) -> Result<T, SqlConduitError>,
    ) -> Result<T, SqlConduitError> {
        self.run(block).await
    }
}
