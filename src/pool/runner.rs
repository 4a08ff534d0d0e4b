use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use bb8::{ManageConnection, Pool, PooledConnection, RunError, State};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::access::{Reader, Writer};
use crate::config::PoolConfig;
use crate::error::SqlConduitError;
use crate::types::Backend;

use super::sink::TracingErrorSink;

/// A bb8 connection manager this crate knows how to run.
pub trait ManagedBackend:
    ManageConnection<Connection: crate::connection::Connection, Error = SqlConduitError>
{
    fn backend(&self) -> Backend;

    /// Token cancelled when the owning runner shuts down. Connection driver tasks
    /// run as children of it.
    fn shutdown_token(&self) -> CancellationToken;
}

/// Owns a bb8 pool plus the background work around it.
///
/// `start` returns once the pool is usable; `close` tears everything down in order:
/// background loop and connection drivers first, then the pool itself.
pub struct PoolRunner<M: ManagedBackend> {
    pool: RwLock<Option<Pool<M>>>,
    config: PoolConfig,
    backend: Backend,
    shutdown: CancellationToken,
    keep_alive: Mutex<Option<JoinHandle<()>>>,
}

impl<M: ManagedBackend> PoolRunner<M> {
    /// Build the pool and start its keep-alive loop.
    ///
    /// Connections are established in the background; this waits at most
    /// `config.startup_grace` for `min_connections` of them and logs a warning when
    /// the pool is not there yet.
    ///
    /// # Errors
    /// `InvalidConfiguration` when `config` does not validate.
    pub async fn start(manager: M, config: PoolConfig) -> Result<Self, SqlConduitError> {
        config.validate()?;
        let backend = manager.backend();
        let shutdown = manager.shutdown_token();

        let pool = Pool::builder()
            .max_size(config.max_connections)
            .min_idle(Some(config.min_connections))
            .idle_timeout(config.idle_timeout)
            .connection_timeout(config.connection_timeout)
            .error_sink(Box::new(TracingErrorSink { backend }))
            .build_unchecked(manager);

        let keep_alive = tokio::spawn(keep_alive_loop(
            pool.clone(),
            config.keep_alive_interval,
            shutdown.clone(),
        ));

        wait_for_min_connections(&pool, &config).await;
        debug!(%backend, state = ?pool.state(), "pool started");

        Ok(Self {
            pool: RwLock::new(Some(pool)),
            config,
            backend,
            shutdown,
            keep_alive: Mutex::new(Some(keep_alive)),
        })
    }

    #[must_use]
    pub fn backend(&self) -> Backend {
        self.backend
    }

    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Pool statistics; `None` once closed.
    #[must_use]
    pub fn state(&self) -> Option<State> {
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Pool::state)
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    fn current_pool(&self) -> Result<Pool<M>, SqlConduitError> {
        if self.shutdown.is_cancelled() {
            return Err(SqlConduitError::PoolShuttingDown);
        }
        self.pool
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(SqlConduitError::PoolShuttingDown)
    }

    /// Check out a connection not tied to the runner's borrow (listeners keep one
    /// for as long as they live).
    ///
    /// # Errors
    /// `PoolShuttingDown`, `PoolExhausted`, `ConnectionTimeout`, or the manager's
    /// connect error.
    pub async fn get_owned(&self) -> Result<PooledConnection<'static, M>, SqlConduitError> {
        let pool = self.current_pool()?;
        pool.get_owned()
            .await
            .map_err(|err| self.acquire_error(&pool, err))
    }

    fn acquire_error(&self, pool: &Pool<M>, err: RunError<SqlConduitError>) -> SqlConduitError {
        match err {
            RunError::User(err) => err,
            RunError::TimedOut => {
                let state = pool.state();
                if state.connections >= self.config.max_connections && state.idle_connections == 0
                {
                    SqlConduitError::PoolExhausted(self.config.max_connections)
                } else {
                    SqlConduitError::ConnectionTimeout(self.config.connection_timeout)
                }
            }
        }
    }

    async fn run<T>(
        &self,
        block: impl AsyncFnOnce(&mut M::Connection) -> Result<T, SqlConduitError>,
    ) -> Result<T, SqlConduitError> {
        let mut conn = self.get_owned().await?;
        block(&mut *conn).await
    }
}

async fn wait_for_min_connections<M: ManagedBackend>(pool: &Pool<M>, config: &PoolConfig) {
    let deadline = Instant::now() + config.startup_grace;
    while pool.state().connections < config.min_connections {
        if Instant::now() >= deadline {
            warn!(
                wanted = config.min_connections,
                have = pool.state().connections,
                grace = ?config.startup_grace,
                "pool did not reach its minimum size during startup"
            );
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

async fn keep_alive_loop<M: ManagedBackend>(
    pool: Pool<M>,
    interval: Duration,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                // Checkout runs the manager's health check and evicts dead sessions.
                if let Err(err) = pool.get().await {
                    warn!(error = ?err, "keep-alive checkout failed");
                }
            }
        }
    }
    debug!("keep-alive loop stopped");
}

impl<M: ManagedBackend> Reader for PoolRunner<M> {
    type Conn = M::Connection;

    async fn read<T>(
        &self,
        block: impl AsyncFnOnce(&mut M::Connection) -> Result<T, SqlConduitError>,
    ) -> Result<T, SqlConduitError> {
        self.run(block).await
    }

    async fn close(&self) {
        self.shutdown.cancel();
        let keep_alive = self
            .keep_alive
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = keep_alive
            && tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
        {
            handle.abort();
        }
        let pool = self
            .pool
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if pool.is_some() {
            debug!(backend = %self.backend, "pool closed");
        }
    }
}

impl<M: ManagedBackend> Writer for PoolRunner<M> {
    async fn write<T>(
        &self,
        block: impl AsyncFnOnce(&mut M::Connection) -> Result<T, SqlConduitError>,
    ) -> Result<T, SqlConduitError> {
        self.run(block).await
    }
}

impl<M: ManagedBackend> Drop for PoolRunner<M> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
