use postgresql_embedded::PostgreSQL;

use super::super::SHARED_RUNTIME;
use crate::connection::Connection;
use crate::postgres::{ConnectOptions, TlsMode};

/// A running embedded `PostgreSQL` instance.
pub struct EmbeddedPostgres {
    pub postgresql: PostgreSQL,
    pub port: u16,
    /// Options that reach the instance with its generated credentials
    pub options: ConnectOptions,
}

/// Set up an embedded `PostgreSQL` instance for testing or benchmarking.
///
/// Only the database name of `options` is used; host, port and credentials come
/// from the embedded server. Call from synchronous code: this blocks on a shared
/// runtime.
///
/// # Errors
/// Returns an error if the embedded server cannot be set up or started, the
/// database cannot be created, or the post-start connectivity check fails.
pub fn setup_postgres_embedded(
    options: &ConnectOptions,
) -> Result<EmbeddedPostgres, Box<dyn std::error::Error>> {
    SHARED_RUNTIME.block_on(async {
        let mut postgresql = PostgreSQL::default();
        // Bundled binaries, so no download.
        postgresql.setup().await?;
        postgresql.start().await?;

        let settings = postgresql.settings();
        let port = settings.port;
        let db_name = options
            .database
            .clone()
            .unwrap_or_else(|| "sql_conduit_test".to_string());
        postgresql.create_database(&db_name).await?;

        let final_options = ConnectOptions {
            host: Some(settings.host.clone()),
            port,
            database: Some(db_name),
            username: settings.username.clone(),
            password: Some(settings.password.clone()),
            tls: TlsMode::Disable,
            ..options.clone()
        };

        let mut conn = final_options.connect().await?;
        conn.run_batch("SELECT 1").await?;
        println!("PostgreSQL started on port {port}");

        Ok(EmbeddedPostgres {
            postgresql,
            port,
            options: final_options,
        })
    })
}

/// Stop a previously started embedded `PostgreSQL` instance.
pub fn stop_postgres_embedded(postgres: EmbeddedPostgres) {
    let EmbeddedPostgres { postgresql, .. } = postgres;
    SHARED_RUNTIME.block_on(async move {
        let _ = postgresql.stop().await;
    });
}
