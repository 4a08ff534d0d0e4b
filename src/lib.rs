//! Transactional async database access over tokio-postgres and rusqlite.
//!
//! Statements are built as [`Fragment`]s, whose bound values never touch the SQL
//! text, and executed on a [`Connection`] that a [`Reader`] or [`Writer`] lends
//! for one async block at a time. On top of that sit transactions and savepoints
//! that always clean up, forward-only [`Cursor`]s, a [`Migrator`] and typed
//! `LISTEN`/`NOTIFY` channels.
//!
//! ```rust,no_run
//! use sql_conduit::prelude::*;
//!
//! # async fn demo() -> Result<(), SqlConduitError> {
//! let pool = SqliteOptions::new("app.db").build_pool(PoolConfig::default()).await?;
//!
//! let names: Vec<String> = pool
//!     .read(async |conn| {
//!         conn.fetch_all(&Fragment::sql("SELECT name FROM users WHERE id > ").bind(10_i64))
//!             .await
//!     })
//!     .await?;
//!
//! pool.write(async |conn| {
//!     conn.transaction(IsolationLevel::Default, async |tx| {
//!         tx.execute(&Fragment::sql("DELETE FROM sessions")).await?;
//!         Ok(())
//!     })
//!     .await
//! })
//! .await?;
//! # let _ = names;
//! # Ok(())
//! # }
//! ```

pub mod prelude;

pub mod access;
pub mod codec;
pub mod config;
pub mod connection;
pub mod cursor;
pub mod decode;
pub mod error;
pub mod fragment;
pub mod ident;
pub mod migration;
pub mod notification;
pub mod pool;
pub mod row;
pub mod transaction;
pub mod types;

#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "test-utils")]
pub mod test_utils;

pub use access::{Reader, Single, Writer};
pub use config::PoolConfig;
pub use connection::{Connection, RowStream};
pub use cursor::Cursor;
pub use decode::{Decode, FromRow};
pub use error::SqlConduitError;
pub use fragment::{Fragment, Segment, Statement};
pub use migration::{MigrationReport, MigrationStep, Migrator};
pub use notification::{
    Channel, Notification, NotificationSource, Notifications, notify, validate_channel,
};
pub use pool::{ManagedBackend, PoolRunner, PoolState};
pub use row::Row;
pub use transaction::{
    Transaction, TransactionExt, set_foreign_key_checks, with_nested_transaction,
    with_savepoint, with_transaction,
};
pub use types::{Backend, ForeignKeyMode, IsolationLevel, PlaceholderStyle, Value};

#[cfg(feature = "postgres")]
pub use postgres::{ConnectOptions, PgConnection, PgManager, TlsMode};
#[cfg(feature = "sqlite")]
pub use sqlite::{SqliteConnection, SqliteManager, SqliteOptions, SqliteOptionsBuilder};
