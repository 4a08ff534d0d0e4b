//! Typed publish/subscribe over `LISTEN` / `NOTIFY`.
//!
//! A [`Channel`] ties a channel name to a payload type. Publishing encodes the
//! payload and calls `pg_notify`; subscribing yields decoded payloads as a stream.
//!
//! ```rust,no_run
//! use serde::{Deserialize, Serialize};
//! use sql_conduit::prelude::*;
//!
//! #[derive(Serialize, Deserialize)]
//! struct OrderPlaced {
//!     id: i64,
//! }
//!
//! struct Orders;
//!
//! impl Channel for Orders {
//!     const NAME: &'static str = "orders";
//!     type Payload = OrderPlaced;
//! }
//!
//! # async fn demo(pool: &PoolRunner<PgManager>) -> Result<(), SqlConduitError> {
//! use futures_util::StreamExt;
//!
//! let mut incoming = pool.listen::<Orders>().await?;
//! pool.write(async |conn| notify::<Orders, _>(conn, &OrderPlaced { id: 7 }).await)
//!     .await?;
//! if let Some(note) = incoming.next().await {
//!     assert_eq!(note?.payload.id, 7);
//! }
//! # Ok(())
//! # }
//! ```

use std::any::type_name;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures_util::Stream;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::connection::Connection;
use crate::error::SqlConduitError;
use crate::fragment::Fragment;
use crate::ident::validate_identifier;
use crate::types::Backend;

/// `PostgreSQL` rejects `NOTIFY` payloads of this size or larger.
pub const MAX_NOTIFICATION_PAYLOAD: usize = 8000;

/// A named channel carrying one payload type.
pub trait Channel {
    const NAME: &'static str;
    type Payload: Serialize + DeserializeOwned;

    /// Payload to wire text. JSON unless overridden.
    ///
    /// # Errors
    /// `InvalidNotificationPayload` when the payload does not serialize.
    fn encode(payload: &Self::Payload) -> Result<String, SqlConduitError> {
        serde_json::to_string(payload)
            .map_err(|err| SqlConduitError::InvalidNotificationPayload(err.to_string()))
    }

    /// Wire text to payload. JSON unless overridden.
    ///
    /// # Errors
    /// `NotificationDecodeFailed` carrying the raw text.
    fn decode(raw: &str) -> Result<Self::Payload, SqlConduitError> {
        serde_json::from_str(raw).map_err(|err| SqlConduitError::NotificationDecodeFailed {
            type_name: type_name::<Self::Payload>(),
            payload: raw.to_string(),
            source: Box::new(err),
        })
    }
}

/// Check that a channel's name can be spliced into `LISTEN`.
///
/// # Errors
/// `InvalidNotificationChannel` naming the problem.
pub fn validate_channel<Ch: Channel>() -> Result<(), SqlConduitError> {
    validate_identifier(Ch::NAME).map_err(|err| match err {
        SqlConduitError::InvalidIdentifier(reason) => {
            SqlConduitError::InvalidNotificationChannel(reason)
        }
        other => other,
    })
}

/// Publish `payload` on `Ch`.
///
/// Inside a transaction the notification is delivered when the transaction commits
/// and never if it rolls back.
///
/// # Errors
/// `NotificationUnsupported` on SQLite, `InvalidNotificationChannel`,
/// `InvalidNotificationPayload` for payloads of 8000 bytes or more, or driver errors.
pub async fn notify<Ch, C>(conn: &mut C, payload: &Ch::Payload) -> Result<(), SqlConduitError>
where
    Ch: Channel,
    C: Connection,
{
    validate_channel::<Ch>()?;
    if conn.backend() != Backend::Postgres {
        return Err(SqlConduitError::NotificationUnsupported(conn.backend()));
    }
    let text = Ch::encode(payload)?;
    if text.len() >= MAX_NOTIFICATION_PAYLOAD {
        return Err(SqlConduitError::InvalidNotificationPayload(format!(
            "payload is {} bytes; the limit is {} bytes",
            text.len(),
            MAX_NOTIFICATION_PAYLOAD - 1
        )));
    }
    let fragment = Fragment::sql("SELECT pg_notify(")
        .bind(Ch::NAME)
        .push_sql(", ")
        .bind(text)
        .push_sql(")");
    conn.execute(&fragment).await?;
    Ok(())
}

/// A notification as it arrived, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    pub channel: String,
    pub payload: String,
    pub process_id: i32,
}

/// A decoded notification.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification<P> {
    pub channel: String,
    /// Backend process that sent it
    pub process_id: i32,
    pub payload: P,
}

/// Something that can open a subscription.
pub trait NotificationSource {
    /// Subscribe to `Ch` on a dedicated connection.
    fn listen<Ch: Channel>(
        &self,
    ) -> impl Future<Output = Result<Notifications<Ch>, SqlConduitError>>;
}

/// A live subscription.
///
/// Items are buffered without bound until polled. A payload that fails to decode is
/// yielded as an error and the stream keeps going. Dropping the stream unsubscribes
/// and gives the connection back.
pub struct Notifications<Ch: Channel> {
    receiver: UnboundedReceiver<RawNotification>,
    // Unsubscribes on drop.
    _listener: Box<dyn Send + Sync>,
    _channel: PhantomData<fn() -> Ch>,
}

impl<Ch: Channel> Notifications<Ch> {
    pub(crate) fn new(
        receiver: UnboundedReceiver<RawNotification>,
        listener: Box<dyn Send + Sync>,
    ) -> Self {
        Self {
            receiver,
            _listener: listener,
            _channel: PhantomData,
        }
    }

    #[must_use]
    pub fn channel(&self) -> &'static str {
        Ch::NAME
    }
}

impl<Ch: Channel> Stream for Notifications<Ch> {
    type Item = Result<Notification<Ch::Payload>, SqlConduitError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let Some(raw) = std::task::ready!(self.receiver.poll_recv(cx)) else {
                return Poll::Ready(None);
            };
            if raw.channel != Ch::NAME {
                continue;
            }
            let item = Ch::decode(&raw.payload).map(|payload| Notification {
                channel: raw.channel,
                process_id: raw.process_id,
                payload,
            });
            return Poll::Ready(Some(item));
        }
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt;
    use serde::Deserialize;
    use tokio::sync::mpsc;

    use super::*;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    struct Pings;

    impl Channel for Pings {
        const NAME: &'static str = "pings";
        type Payload = Ping;
    }

    struct BadName;

    impl Channel for BadName {
        const NAME: &'static str = "pings; DROP TABLE users";
        type Payload = Ping;
    }

    fn raw(channel: &str, payload: &str) -> RawNotification {
        RawNotification {
            channel: channel.to_string(),
            payload: payload.to_string(),
            process_id: 42,
        }
    }

    #[test]
    fn channel_names_are_validated() {
        assert!(validate_channel::<Pings>().is_ok());
        assert!(matches!(
            validate_channel::<BadName>(),
            Err(SqlConduitError::InvalidNotificationChannel(_))
        ));
    }

    #[test]
    fn default_codec_is_json() {
        let text = Pings::encode(&Ping { seq: 3 }).unwrap();
        assert_eq!(text, r#"{"seq":3}"#);
        assert_eq!(Pings::decode(&text).unwrap(), Ping { seq: 3 });
    }

    #[tokio::test]
    async fn decode_failures_do_not_end_the_stream() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut stream = Notifications::<Pings>::new(rx, Box::new(()));
        tx.send(raw("pings", "not json")).unwrap();
        tx.send(raw("other", r#"{"seq":0}"#)).unwrap();
        tx.send(raw("pings", r#"{"seq":1}"#)).unwrap();
        drop(tx);

        match stream.next().await {
            Some(Err(SqlConduitError::NotificationDecodeFailed {
                type_name, payload, ..
            })) => {
                assert!(type_name.ends_with("Ping"));
                assert_eq!(payload, "not json");
            }
            other => panic!("expected a decode failure, got {other:?}"),
        }
        let note = stream.next().await.unwrap().unwrap();
        assert_eq!(note.payload, Ping { seq: 1 });
        assert_eq!(note.process_id, 42);
        assert!(stream.next().await.is_none());
    }
}
