use std::time::Duration;

use thiserror::Error;

#[cfg(feature = "sqlite")]
use rusqlite;
#[cfg(feature = "postgres")]
use tokio_postgres;

use crate::types::Backend;

#[derive(Debug, Error)]
pub enum SqlConduitError {
    #[cfg(feature = "postgres")]
    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[cfg(feature = "sqlite")]
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool is shutting down")]
    PoolShuttingDown,

    #[error("timed out after {0:?} waiting for a connection")]
    ConnectionTimeout(Duration),

    #[error("connection pool exhausted: all {0} connections are in use")]
    PoolExhausted(u32),

    #[error("database access is not configured: {0}")]
    NotConfigured(String),

    #[error("migration `{0}` is already registered")]
    DuplicateMigration(String),

    #[error("migration `{identifier}` failed: {source}")]
    MigrationFailed {
        identifier: String,
        #[source]
        source: Box<SqlConduitError>,
    },

    #[error("schema change detected: {0}")]
    SchemaChangeDetected(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(#[source] Box<SqlConduitError>),

    #[error("invalid transaction state: {0}")]
    TransactionState(String),

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("invalid notification channel: {0}")]
    InvalidNotificationChannel(String),

    #[error("notifications are not supported by the {0} backend")]
    NotificationUnsupported(Backend),

    #[error("invalid notification payload: {0}")]
    InvalidNotificationPayload(String),

    #[error("failed to decode {type_name} from notification payload {payload:?}: {source}")]
    NotificationDecodeFailed {
        type_name: &'static str,
        payload: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("cannot decode column {index}: {message}")]
    Decode { index: usize, message: String },

    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Other database error: {0}")]
    Other(String),
}

impl SqlConduitError {
    /// Wrap a failure raised while applying `identifier`.
    pub(crate) fn migration_failed(identifier: &str, source: SqlConduitError) -> Self {
        SqlConduitError::MigrationFailed {
            identifier: identifier.to_string(),
            source: Box::new(source),
        }
    }

    /// True when the server aborted the transaction because of a concurrent update
    /// (SQLSTATE 40001) or, on SQLite, because the database was locked by another writer.
    ///
    /// Callers use this to decide whether a `Serializable` transaction is worth retrying.
    #[must_use]
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            #[cfg(feature = "postgres")]
            SqlConduitError::Postgres(err) => err.code().is_some_and(|code| {
                *code == tokio_postgres::error::SqlState::T_R_SERIALIZATION_FAILURE
                    || *code == tokio_postgres::error::SqlState::T_R_DEADLOCK_DETECTED
            }),
            #[cfg(feature = "sqlite")]
            SqlConduitError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            SqlConduitError::TransactionFailed(inner)
            | SqlConduitError::MigrationFailed { source: inner, .. } => {
                inner.is_serialization_failure()
            }
            _ => false,
        }
    }

    /// True for timeouts surfaced by the pool or the transport, including an
    /// acquisition that gave up because every connection stayed checked out.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SqlConduitError::ConnectionTimeout(_) | SqlConduitError::PoolExhausted(_)
        )
    }
}
