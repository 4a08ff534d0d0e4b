// SQLite backend
//
// - config: options, builder and pool setup
// - worker: the thread that owns each rusqlite connection
// - connection: async handle over a worker
// - manager: bb8 glue
// - params / query: value conversion in and out

pub mod config;
pub mod connection;
pub mod manager;
pub mod params;
pub mod query;
mod worker;

pub use config::{SqliteOptions, SqliteOptionsBuilder};
pub use connection::SqliteConnection;
pub use manager::SqliteManager;
