#![cfg(feature = "sqlite")]

use std::time::Duration;

use sql_conduit::prelude::*;
use sql_conduit::{with_savepoint, with_transaction};
use tempfile::tempdir;

fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

async fn ledger_db(prefix: &str) -> Result<Single<SqliteConnection>, SqlConduitError> {
    let db = Single::new(SqliteOptions::new(unique_db_path(prefix)).connect().await?);
    db.write(async |conn| {
        conn.execute_raw("CREATE TABLE entries (id INTEGER PRIMARY KEY, note TEXT NOT NULL)")
            .await
    })
    .await?;
    Ok(db)
}

fn insert(id: i64, note: &str) -> Fragment {
    Fragment::sql("INSERT INTO entries (id, note) VALUES (")
        .bind(id)
        .push_sql(", ")
        .bind(note)
        .push_sql(")")
}

async fn ids<C: Connection>(conn: &mut C) -> Result<Vec<i64>, SqlConduitError> {
    conn.fetch_all(&Fragment::sql("SELECT id FROM entries ORDER BY id"))
        .await
}

#[tokio::test]
async fn commit_on_success_rollback_on_error() -> Result<(), Box<dyn std::error::Error>> {
    let db = ledger_db("basic").await?;

    db.write(async |conn| {
        conn.transaction(IsolationLevel::Default, async |tx| {
            tx.execute(&insert(1, "kept")).await?;
            Ok(())
        })
        .await
    })
    .await?;

    let failed = db
        .write(async |conn| {
            conn.transaction(IsolationLevel::Default, async |tx| {
                tx.execute(&insert(2, "discarded")).await?;
                Err::<(), _>(SqlConduitError::Other("business rule violated".into()))
            })
            .await
        })
        .await;
    assert!(matches!(failed, Err(SqlConduitError::Other(ref msg)) if msg == "business rule violated"));

    let (remaining, depth) = db
        .read(async |conn| Ok((ids(conn).await?, conn.transaction_depth())))
        .await?;
    assert_eq!(remaining, vec![1]);
    assert_eq!(depth, 0);
    Ok(())
}

#[tokio::test]
async fn failed_savepoint_only_undoes_its_own_work() -> Result<(), Box<dyn std::error::Error>> {
    let db = ledger_db("partial").await?;

    db.write(async |conn| {
        with_transaction(conn, IsolationLevel::Default, async |tx| {
            tx.savepoint(Some("r1"), async |sp| {
                sp.execute(&insert(1, "first")).await?;
                Ok(())
            })
            .await?;

            // Duplicate key: the savepoint rolls back and the transaction carries on.
            let second = tx
                .savepoint(Some("r2"), async |sp| {
                    sp.execute(&insert(2, "second")).await?;
                    sp.execute(&insert(1, "duplicate")).await?;
                    Ok(())
                })
                .await;
            assert!(second.is_err());
            assert_eq!(tx.transaction_depth(), 1);

            tx.savepoint(Some("r3"), async |sp| {
                sp.execute(&insert(3, "third")).await?;
                Ok(())
            })
            .await
        })
        .await
    })
    .await?;

    let remaining = db.read(async |conn| ids(conn).await).await?;
    assert_eq!(remaining, vec![1, 3]);
    Ok(())
}

#[tokio::test]
async fn nested_savepoints_track_depth() -> Result<(), Box<dyn std::error::Error>> {
    let db = ledger_db("nested").await?;

    let depths = db
        .write(async |conn| {
            conn.transaction(IsolationLevel::Serializable, async |tx| {
                let mut depths = vec![tx.transaction_depth()];
                tx.nested(async |level2| {
                    depths.push(level2.transaction_depth());
                    level2.execute(&insert(10, "level2")).await?;
                    let inner = level2
                        .nested(async |level3| {
                            depths.push(level3.transaction_depth());
                            level3.execute(&insert(20, "level3")).await?;
                            Err::<(), _>(SqlConduitError::Other("inner abort".into()))
                        })
                        .await;
                    assert!(inner.is_err());
                    depths.push(level2.transaction_depth());
                    Ok(())
                })
                .await?;
                depths.push(tx.transaction_depth());
                Ok(depths)
            })
            .await
        })
        .await?;
    assert_eq!(depths, vec![1, 2, 3, 2, 1]);

    let remaining = db.read(async |conn| ids(conn).await).await?;
    assert_eq!(remaining, vec![10]);
    Ok(())
}

#[tokio::test]
async fn transaction_state_is_enforced() -> Result<(), Box<dyn std::error::Error>> {
    let db = ledger_db("state").await?;

    let outside = db
        .write(async |conn| with_savepoint(conn, None, async |_sp| Ok(())).await)
        .await;
    assert!(matches!(outside, Err(SqlConduitError::TransactionState(_))));

    let nested_top_level = db
        .write(async |conn| {
            conn.transaction(IsolationLevel::Default, async |tx| {
                let inner = tx
                    .connection_mut()
                    .transaction(IsolationLevel::Default, async |_inner| Ok(()))
                    .await;
                assert!(matches!(inner, Err(SqlConduitError::TransactionState(_))));
                Ok(())
            })
            .await
        })
        .await;
    assert!(nested_top_level.is_ok());

    let bad_name = db
        .write(async |conn| {
            conn.transaction(IsolationLevel::Default, async |tx| {
                tx.savepoint(Some("bad name; DROP TABLE entries"), async |_sp| Ok(()))
                    .await
            })
            .await
        })
        .await;
    assert!(matches!(bad_name, Err(SqlConduitError::InvalidIdentifier(_))));

    let still_there = db.read(async |conn| ids(conn).await).await?;
    assert!(still_there.is_empty());
    Ok(())
}

#[tokio::test]
async fn nested_transaction_starts_top_level_when_idle() -> Result<(), Box<dyn std::error::Error>>
{
    let db = ledger_db("idle").await?;
    let depth = db
        .write(async |conn| {
            conn.nested_transaction(IsolationLevel::Default, async |tx| {
                tx.execute(&insert(5, "solo")).await?;
                Ok(tx.transaction_depth())
            })
            .await
        })
        .await?;
    assert_eq!(depth, 1);
    assert_eq!(db.read(async |conn| ids(conn).await).await?, vec![5]);
    Ok(())
}

#[tokio::test]
async fn cancelled_block_is_rolled_back_on_next_use() -> Result<(), Box<dyn std::error::Error>> {
    let db = ledger_db("cancel").await?;

    let abandoned = tokio::time::timeout(
        Duration::from_millis(100),
        db.write(async |conn| {
            conn.transaction(IsolationLevel::Default, async |tx| {
                tx.execute(&insert(7, "never committed")).await?;
                std::future::pending::<()>().await;
                Ok(())
            })
            .await
        }),
    )
    .await;
    assert!(abandoned.is_err(), "block should have timed out");

    let (remaining, depth) = db
        .write(async |conn| Ok((ids(conn).await?, conn.transaction_depth())))
        .await?;
    assert!(remaining.is_empty());
    assert_eq!(depth, 0);
    Ok(())
}

#[tokio::test]
async fn deferred_foreign_keys_are_checked_at_commit() -> Result<(), Box<dyn std::error::Error>> {
    let db = Single::new(
        SqliteOptions::new(unique_db_path("fk"))
            .connect()
            .await?,
    );
    db.write(async |conn| {
        conn.execute_raw(
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL REFERENCES parent(id));",
        )
        .await
    })
    .await?;

    db.write(async |conn| {
        conn.transaction(IsolationLevel::Default, async |tx| {
            set_foreign_key_checks(tx, ForeignKeyMode::Deferred).await?;
            tx.execute_raw("INSERT INTO child (id, parent_id) VALUES (1, 1)").await?;
            tx.execute_raw("INSERT INTO parent (id) VALUES (1)").await?;
            Ok(())
        })
        .await
    })
    .await?;

    let orphan = db
        .write(async |conn| {
            conn.transaction(IsolationLevel::Default, async |tx| {
                tx.execute_raw("INSERT INTO child (id, parent_id) VALUES (2, 99)").await
            })
            .await
        })
        .await;
    assert!(orphan.is_err());
    Ok(())
}

#[tokio::test]
async fn immediate_checks_refuse_outstanding_violations() -> Result<(), Box<dyn std::error::Error>> {
    let db = Single::new(
        SqliteOptions::new(unique_db_path("fk_immediate"))
            .connect()
            .await?,
    );
    db.write(async |conn| {
        conn.execute_raw(
            "CREATE TABLE parent (id INTEGER PRIMARY KEY);
             CREATE TABLE child (id INTEGER PRIMARY KEY, parent_id INTEGER NOT NULL REFERENCES parent(id));",
        )
        .await
    })
    .await?;

    db.write(async |conn| {
        conn.transaction(IsolationLevel::Default, async |tx| {
            set_foreign_key_checks(tx, ForeignKeyMode::Deferred).await?;
            tx.execute_raw("INSERT INTO child (id, parent_id) VALUES (1, 5)").await?;

            let early = set_foreign_key_checks(tx, ForeignKeyMode::Immediate).await;
            assert!(matches!(early, Err(SqlConduitError::ExecutionError(ref m)) if m.contains("`child`")));

            tx.execute_raw("INSERT INTO parent (id) VALUES (5)").await?;
            set_foreign_key_checks(tx, ForeignKeyMode::Immediate).await
        })
        .await
    })
    .await?;

    let children: Option<i64> = db
        .read(async |conn| conn.fetch_one(&Fragment::sql("SELECT COUNT(*) FROM child")).await)
        .await?;
    assert_eq!(children, Some(1));
    Ok(())
}
