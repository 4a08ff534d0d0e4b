use std::pin::pin;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::StreamExt;
use futures_util::stream;
use tokio::sync::mpsc::UnboundedSender;
use tokio_postgres::{AsyncMessage, Client, NoTls};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use crate::connection::{Connection, RowStream};
use crate::error::SqlConduitError;
use crate::fragment::Statement;
use crate::notification::RawNotification;
use crate::types::Backend;

use super::params::as_refs;
use super::query::{build_row, columns_of};

/// Where the connection driver forwards `NOTIFY` messages while a listener is attached.
pub(crate) type NotificationSlot = Arc<Mutex<Option<UnboundedSender<RawNotification>>>>;

/// One `PostgreSQL` session plus its background driver task.
pub struct PgConnection {
    client: Client,
    notifications: NotificationSlot,
    // Stops the driver task when the connection goes away.
    _driver: DropGuard,
    depth: usize,
    listening: bool,
}

impl PgConnection {
    /// Connect outside any pool. The driver task stops when the connection is dropped.
    ///
    /// # Errors
    /// Returns `SqlConduitError::Postgres` when the server cannot be reached.
    pub async fn connect(config: &tokio_postgres::Config) -> Result<Self, SqlConduitError> {
        Self::connect_with_shutdown(config, &CancellationToken::new()).await
    }

    /// Connect with the driver task as a child of `shutdown`.
    pub(crate) async fn connect_with_shutdown(
        config: &tokio_postgres::Config,
        shutdown: &CancellationToken,
    ) -> Result<Self, SqlConduitError> {
        let (client, mut connection) = config.connect(NoTls).await?;
        let notifications: NotificationSlot = Arc::default();
        let driver = shutdown.child_token();

        let slot = Arc::clone(&notifications);
        let stop = driver.clone();
        tokio::spawn(async move {
            let mut messages = pin!(stream::poll_fn(move |cx| connection.poll_message(cx)));
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    message = messages.next() => match message {
                        Some(Ok(AsyncMessage::Notification(note))) => forward(&slot, note),
                        Some(Ok(AsyncMessage::Notice(notice))) => {
                            debug!(severity = notice.severity(), message = notice.message(), "postgres notice");
                        }
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, "postgres connection closed with error");
                            break;
                        }
                        None => break,
                    },
                }
            }
        });

        Ok(Self {
            client,
            notifications,
            _driver: driver.drop_guard(),
            depth: 0,
            listening: false,
        })
    }

    /// The underlying tokio-postgres client, for features this crate does not wrap.
    #[must_use]
    pub fn client(&self) -> &Client {
        &self.client
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.client.is_closed()
    }

    pub(crate) fn is_listening(&self) -> bool {
        self.listening
    }

    /// Route notifications to `sender` until [`PgConnection::detach_listener`].
    pub(crate) fn attach_listener(&mut self, sender: UnboundedSender<RawNotification>) {
        *self
            .notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sender);
        self.listening = true;
    }

    /// Stop routing notifications. The session still counts as listening until
    /// `UNLISTEN` has run.
    pub(crate) fn detach_listener(&mut self) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    pub(crate) fn mark_unlistened(&mut self) {
        self.listening = false;
    }
}

fn forward(slot: &NotificationSlot, note: tokio_postgres::Notification) {
    let mut guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(sender) = guard.as_ref() {
        let raw = RawNotification {
            channel: note.channel().to_string(),
            payload: note.payload().to_string(),
            process_id: note.process_id(),
        };
        if sender.send(raw).is_err() {
            // Listener dropped; stop forwarding.
            guard.take();
        }
    }
}

impl Connection for PgConnection {
    fn backend(&self) -> Backend {
        Backend::Postgres
    }

    fn transaction_depth(&self) -> usize {
        self.depth
    }

    fn transaction_depth_mut(&mut self) -> &mut usize {
        &mut self.depth
    }

    async fn run_statement(&mut self, statement: Statement) -> Result<u64, SqlConduitError> {
        let (sql, params) = statement.into_parameters();
        let refs = as_refs(&params);
        Ok(self.client.execute(sql.as_str(), &refs).await?)
    }

    async fn run_batch(&mut self, sql: &str) -> Result<(), SqlConduitError> {
        Ok(self.client.batch_execute(sql).await?)
    }

    async fn open_rows(&mut self, statement: Statement) -> Result<RowStream<'_>, SqlConduitError> {
        let (sql, params) = statement.into_parameters();
        let rows = self
            .client
            .query_raw(sql.as_str(), as_refs(&params))
            .await?;
        let mut columns = None;
        let rows = rows.map(move |row| {
            let row = row?;
            let columns = columns.get_or_insert_with(|| columns_of(&row));
            build_row(columns, &row)
        });
        Ok(Box::pin(rows))
    }
}
