//! Convenient imports for common functionality.
//!
//! `use sql_conduit::prelude::*;` brings in the traits needed to call methods on
//! connections, pools and transactions, plus the types most code names.

pub use crate::access::{Reader, Single, Writer};
pub use crate::config::PoolConfig;
pub use crate::connection::Connection;
pub use crate::cursor::Cursor;
pub use crate::decode::{Decode, FromRow};
pub use crate::error::SqlConduitError;
pub use crate::fragment::{Fragment, Statement};
pub use crate::migration::{MigrationReport, MigrationStep, Migrator};
pub use crate::notification::{
    Channel, Notification, NotificationSource, Notifications, notify,
};
pub use crate::pool::PoolRunner;
pub use crate::row::Row;
pub use crate::transaction::{Transaction, TransactionExt, set_foreign_key_checks};
pub use crate::types::{Backend, ForeignKeyMode, IsolationLevel, PlaceholderStyle, Value};

#[cfg(feature = "postgres")]
pub use crate::postgres::{ConnectOptions, PgConnection, PgManager, TlsMode};

#[cfg(feature = "sqlite")]
pub use crate::sqlite::{SqliteConnection, SqliteManager, SqliteOptions, SqliteOptionsBuilder};
