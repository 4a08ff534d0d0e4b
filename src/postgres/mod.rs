// PostgreSQL backend
//
// - config: connection options and pool setup
// - connection: a session plus its driver task
// - manager: bb8 glue
// - params / numeric: binding values to server types
// - query: decoding result rows
// - listen: LISTEN subscriptions on pooled sessions

pub mod config;
pub mod connection;
mod listen;
pub mod manager;
mod numeric;
pub mod params;
pub mod query;

pub use config::{ConnectOptions, TlsMode};
pub use connection::PgConnection;
pub use manager::PgManager;
