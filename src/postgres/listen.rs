use bb8::PooledConnection;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::Connection;
use crate::error::SqlConduitError;
use crate::ident::quote;
use crate::notification::{Channel, NotificationSource, Notifications, validate_channel};
use crate::pool::PoolRunner;

use super::manager::PgManager;

/// Keeps a pooled session subscribed until dropped.
struct PgListener {
    conn: Option<PooledConnection<'static, PgManager>>,
    channel: &'static str,
}

impl Drop for PgListener {
    fn drop(&mut self) {
        let Some(mut conn) = self.conn.take() else {
            return;
        };
        conn.detach_listener();
        let channel = self.channel;
        match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let sql = format!("UNLISTEN {}", quote(channel));
                    match conn.run_batch(&sql).await {
                        Ok(()) => {
                            conn.mark_unlistened();
                            debug!(channel, "listener closed");
                        }
                        // Still marked listening, so the pool discards the session.
                        Err(err) => warn!(channel, error = %err, "UNLISTEN failed"),
                    }
                });
            }
            Err(_) => {
                warn!(
                    channel,
                    "listener dropped outside a runtime; its session will be discarded"
                );
            }
        }
    }
}

impl NotificationSource for PoolRunner<PgManager> {
    async fn listen<Ch: Channel>(&self) -> Result<Notifications<Ch>, SqlConduitError> {
        validate_channel::<Ch>()?;
        let mut conn = self.get_owned().await?;
        let (tx, rx) = mpsc::unbounded_channel();
        conn.attach_listener(tx);
        if let Err(err) = conn.run_batch(&format!("LISTEN {}", quote(Ch::NAME))).await {
            conn.detach_listener();
            conn.mark_unlistened();
            return Err(err);
        }
        debug!(channel = Ch::NAME, "listening");
        let listener = PgListener {
            conn: Some(conn),
            channel: Ch::NAME,
        };
        Ok(Notifications::new(rx, Box::new(listener)))
    }
}
