//! Ordered, recorded schema migrations.
//!
//! Migrations are registered under unique identifiers and applied in registration
//! order. Each applied identifier is recorded in a ledger table, so a later
//! `migrate` only runs what is new. The whole run happens in one transaction and
//! every step in its own savepoint: a failing step undoes itself, stops the queue,
//! and the steps before it stay committed.
//!
//! ```rust,no_run
//! use sql_conduit::prelude::*;
//!
//! # async fn demo(pool: &PoolRunner<SqliteManager>) -> Result<(), SqlConduitError> {
//! let mut migrator = Migrator::<SqliteConnection>::new();
//! migrator.register_sql(
//!     "001_create_users",
//!     "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL)",
//! )?;
//! migrator.register_fn("002_seed_admin", |conn| {
//!     Box::pin(async move {
//!         conn.execute(&Fragment::sql("INSERT INTO users (name) VALUES (").bind("admin").push_sql(")"))
//!             .await?;
//!         Ok(())
//!     })
//! })?;
//! let report = migrator.migrate(pool).await?;
//! println!("applied {:?}", report.applied);
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::access::Writer;
use crate::connection::Connection;
use crate::error::SqlConduitError;
use crate::fragment::Fragment;
use crate::ident::{quote, validate_identifier};
use crate::transaction::{Transaction, set_foreign_key_checks, with_transaction};
use crate::types::{Backend, ForeignKeyMode, IsolationLevel, Value};

pub const DEFAULT_LEDGER_TABLE: &str = "schema_migrations";

/// One unit of schema change.
#[async_trait]
pub trait MigrationStep<C: Connection>: Send + Sync {
    /// Apply the change. Runs inside a savepoint; an error undoes everything the
    /// step did.
    async fn apply(&self, conn: &mut C) -> Result<(), SqlConduitError>;
}

struct SqlStep(String);

#[async_trait]
impl<C: Connection> MigrationStep<C> for SqlStep {
    async fn apply(&self, conn: &mut C) -> Result<(), SqlConduitError> {
        conn.execute_raw(&self.0).await
    }
}

struct FnStep<F>(F);

#[async_trait]
impl<C, F> MigrationStep<C> for FnStep<F>
where
    C: Connection,
    F: for<'c> Fn(&'c mut C) -> BoxFuture<'c, Result<(), SqlConduitError>> + Send + Sync,
{
    async fn apply(&self, conn: &mut C) -> Result<(), SqlConduitError> {
        (self.0)(conn).await
    }
}

/// Outcome of a successful [`Migrator::migrate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Applied by this run, in order
    pub applied: Vec<String>,
    /// Already in the ledger
    pub skipped: Vec<String>,
    /// Whether the destructive reset wiped the schema first
    pub reset: bool,
}

/// The report so far, plus the step that stopped the run.
type Halted = (MigrationReport, Option<(String, SqlConduitError)>);

/// Registry and runner of migrations for connections of type `C`.
pub struct Migrator<C: Connection> {
    steps: IndexMap<String, Box<dyn MigrationStep<C>>>,
    ledger: String,
    destructive_reset: bool,
    defer_foreign_keys: bool,
}

impl<C: Connection> Default for Migrator<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Connection> Migrator<C> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: IndexMap::new(),
            ledger: DEFAULT_LEDGER_TABLE.to_string(),
            destructive_reset: false,
            defer_foreign_keys: true,
        }
    }

    /// Record applied identifiers in `table` instead of `schema_migrations`.
    ///
    /// # Errors
    /// `InvalidIdentifier` when `table` is not a plain identifier.
    pub fn with_ledger_table(mut self, table: &str) -> Result<Self, SqlConduitError> {
        validate_identifier(table)?;
        self.ledger = table.to_string();
        Ok(self)
    }

    /// When the ledger names a migration that is no longer registered, drop every
    /// table and start over instead of failing. Development databases only.
    #[must_use]
    pub fn with_destructive_reset(mut self, enabled: bool) -> Self {
        self.destructive_reset = enabled;
        self
    }

    /// Defer foreign-key checks to the end of each step (on by default).
    #[must_use]
    pub fn with_deferred_foreign_keys(mut self, enabled: bool) -> Self {
        self.defer_foreign_keys = enabled;
        self
    }

    #[must_use]
    pub fn ledger_table(&self) -> &str {
        &self.ledger
    }

    /// Registered identifiers in application order.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.steps.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Register `step` under `identifier`.
    ///
    /// # Errors
    /// `DuplicateMigration` when the identifier is taken (the first registration
    /// stays in place), `InvalidIdentifier` when it is empty.
    pub fn register(
        &mut self,
        identifier: impl Into<String>,
        step: impl MigrationStep<C> + 'static,
    ) -> Result<(), SqlConduitError> {
        let identifier = identifier.into();
        if identifier.trim().is_empty() {
            return Err(SqlConduitError::InvalidIdentifier(
                "migration identifier cannot be empty".to_string(),
            ));
        }
        if self.steps.contains_key(&identifier) {
            warn!(migration = %identifier, "duplicate migration ignored");
            return Err(SqlConduitError::DuplicateMigration(identifier));
        }
        self.steps.insert(identifier, Box::new(step));
        Ok(())
    }

    /// Register a closure step.
    ///
    /// # Errors
    /// As [`Migrator::register`].
    pub fn register_fn<F>(
        &mut self,
        identifier: impl Into<String>,
        step: F,
    ) -> Result<(), SqlConduitError>
    where
        F: for<'c> Fn(&'c mut C) -> BoxFuture<'c, Result<(), SqlConduitError>>
            + Send
            + Sync
            + 'static,
    {
        self.register(identifier, FnStep(step))
    }

    /// Register a step that runs `sql` as a batch.
    ///
    /// # Errors
    /// As [`Migrator::register`].
    pub fn register_sql(
        &mut self,
        identifier: impl Into<String>,
        sql: impl Into<String>,
    ) -> Result<(), SqlConduitError> {
        self.register(identifier, SqlStep(sql.into()))
    }

    /// Apply every pending migration on a connection from `writer`.
    ///
    /// # Errors
    /// `SchemaChangeDetected` when the ledger names unregistered migrations and
    /// destructive reset is off (nothing is changed), `MigrationFailed` naming the
    /// first failing step (earlier steps stay applied), or connection errors.
    pub async fn migrate<W>(&self, writer: &W) -> Result<MigrationReport, SqlConduitError>
    where
        W: Writer<Conn = C>,
    {
        writer.write(async |conn| self.migrate_on(conn).await).await
    }

    /// [`Migrator::migrate`] on a connection the caller already holds. The
    /// connection must not be inside a transaction.
    ///
    /// # Errors
    /// As [`Migrator::migrate`], plus `TransactionState` inside a transaction.
    pub async fn migrate_on(&self, conn: &mut C) -> Result<MigrationReport, SqlConduitError> {
        let isolation = ledger_isolation(conn.backend());
        let (report, halted) =
            with_transaction(conn, isolation, async |tx| self.run_pending(tx).await).await?;
        match halted {
            None => {
                debug!(
                    applied = report.applied.len(),
                    skipped = report.skipped.len(),
                    "migrations complete"
                );
                Ok(report)
            }
            Some((identifier, err)) => Err(SqlConduitError::migration_failed(&identifier, err)),
        }
    }

    /// Whether every registered migration is in the ledger.
    ///
    /// # Errors
    /// Connection errors.
    pub async fn has_completed_migrations<W>(&self, writer: &W) -> Result<bool, SqlConduitError>
    where
        W: Writer<Conn = C>,
    {
        let applied = self.applied_identifiers(writer).await?;
        Ok(self.steps.keys().all(|id| applied.contains(id)))
    }

    /// Identifiers in the ledger, in the order they were applied.
    ///
    /// # Errors
    /// Connection errors.
    pub async fn applied_identifiers<W>(&self, writer: &W) -> Result<Vec<String>, SqlConduitError>
    where
        W: Writer<Conn = C>,
    {
        writer
            .write(async |conn| {
                self.ensure_ledger(conn).await?;
                self.read_ledger(conn).await
            })
            .await
    }

    /// Registered identifiers not yet in the ledger, in registration order.
    ///
    /// # Errors
    /// Connection errors.
    pub async fn pending_identifiers<W>(&self, writer: &W) -> Result<Vec<String>, SqlConduitError>
    where
        W: Writer<Conn = C>,
    {
        let applied = self.applied_identifiers(writer).await?;
        Ok(self
            .steps
            .keys()
            .filter(|id| !applied.contains(id))
            .cloned()
            .collect())
    }

    async fn run_pending(&self, tx: &mut Transaction<'_, C>) -> Result<Halted, SqlConduitError> {
        self.ensure_ledger(tx).await?;
        if tx.backend() == Backend::Postgres {
            // Self-conflicting: a second migrator waits here until the first commits.
            tx.execute_raw(&format!(
                "LOCK TABLE {} IN SHARE ROW EXCLUSIVE MODE",
                quote(&self.ledger)
            ))
            .await?;
        }

        let mut applied = self.read_ledger(tx).await?;
        let mut report = MigrationReport::default();

        let unknown: Vec<&String> = applied
            .iter()
            .filter(|id| !self.steps.contains_key(*id))
            .collect();
        if !unknown.is_empty() {
            if !self.destructive_reset {
                return Err(SqlConduitError::SchemaChangeDetected(format!(
                    "ledger `{}` records migrations that are not registered: {unknown:?}",
                    self.ledger
                )));
            }
            info!(unknown = ?unknown, "unregistered migrations in ledger; resetting schema");
            self.reset_schema(tx).await?;
            applied.clear();
            report.reset = true;
        }

        for (identifier, step) in &self.steps {
            if applied.contains(identifier) {
                report.skipped.push(identifier.clone());
                continue;
            }
            if let Err(err) = self.apply_step(tx, identifier, step.as_ref()).await {
                warn!(migration = %identifier, error = %err, "migration failed; stopping");
                return Ok((report, Some((identifier.clone(), err))));
            }
            info!(migration = %identifier, "migration applied");
            report.applied.push(identifier.clone());
        }
        Ok((report, None))
    }

    async fn apply_step(
        &self,
        tx: &mut Transaction<'_, C>,
        identifier: &str,
        step: &dyn MigrationStep<C>,
    ) -> Result<(), SqlConduitError> {
        let defer = self.defer_foreign_keys;
        let record = Fragment::sql(format!(
            "INSERT INTO {} (identifier, applied_at) VALUES (",
            quote(&self.ledger)
        ))
        .bind(identifier)
        .push_sql(", ")
        .bind(Value::Timestamp(Utc::now().naive_utc()))
        .push_sql(")");

        tx.savepoint(None, async |sp| {
            if defer {
                set_foreign_key_checks(sp, ForeignKeyMode::Deferred).await?;
            }
            let outcome = step.apply(sp.connection_mut()).await;
            // Fails on rows the step left violating a foreign key, undoing the step.
            if defer {
                let restored = set_foreign_key_checks(sp, ForeignKeyMode::Immediate).await;
                match (&outcome, restored) {
                    (Ok(()), Err(err)) => return Err(err),
                    (Err(_), Err(err)) => {
                        warn!(error = %err, "could not restore immediate foreign key checks");
                    }
                    (_, Ok(())) => {}
                }
            }
            outcome?;
            sp.execute(&record).await?;
            Ok(())
        })
        .await
    }

    async fn ensure_ledger<X: Connection>(&self, conn: &mut X) -> Result<(), SqlConduitError> {
        conn.execute_raw(&format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             identifier TEXT PRIMARY KEY, \
             applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)",
            quote(&self.ledger)
        ))
        .await
    }

    async fn read_ledger<X: Connection>(&self, conn: &mut X) -> Result<Vec<String>, SqlConduitError> {
        conn.fetch_all(&Fragment::sql(format!(
            "SELECT identifier FROM {} ORDER BY applied_at, identifier",
            quote(&self.ledger)
        )))
        .await
    }

    async fn reset_schema(&self, tx: &mut Transaction<'_, C>) -> Result<(), SqlConduitError> {
        let backend = tx.backend();
        set_foreign_key_checks(tx, ForeignKeyMode::Deferred).await?;
        let tables: Vec<String> = tx.fetch_all(&Fragment::sql(list_tables_sql(backend))).await?;
        for table in &tables {
            let drop = match backend {
                Backend::Postgres => format!("DROP TABLE IF EXISTS {} CASCADE", quote(table)),
                Backend::Sqlite => format!("DROP TABLE IF EXISTS {}", quote(table)),
            };
            tx.execute_raw(&drop).await?;
        }
        info!(dropped = tables.len(), "schema reset");
        self.ensure_ledger(tx).await
    }
}

/// `PostgreSQL` stays read committed so the ledger is re-read after the lock is
/// granted; `SQLite` takes the write lock up front with `BEGIN IMMEDIATE`.
fn ledger_isolation(backend: Backend) -> IsolationLevel {
    match backend {
        Backend::Postgres => IsolationLevel::Default,
        Backend::Sqlite => IsolationLevel::Serializable,
    }
}

fn list_tables_sql(backend: Backend) -> &'static str {
    match backend {
        Backend::Postgres => {
            "SELECT tablename::text FROM pg_catalog.pg_tables WHERE schemaname = current_schema()"
        }
        Backend::Sqlite => {
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%'"
        }
    }
}
