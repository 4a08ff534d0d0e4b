#![cfg(feature = "sqlite")]

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::try_join_all;
use sql_conduit::prelude::*;
use tempfile::tempdir;

fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

fn pool_config(max: u32) -> PoolConfig {
    PoolConfig::default()
        .with_min_connections(1)
        .with_max_connections(max)
        .with_connection_timeout(Duration::from_millis(300))
        .with_startup_grace(Duration::from_secs(2))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_share_the_pool() -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(
        SqliteOptionsBuilder::new(unique_db_path("shared"))
            .busy_timeout(Duration::from_secs(5))
            .build_pool(pool_config(4))
            .await?,
    );
    assert_eq!(pool.backend(), Backend::Sqlite);
    pool.write(async |conn| {
        conn.execute_raw("CREATE TABLE hits (id INTEGER PRIMARY KEY, worker INTEGER NOT NULL)")
            .await
    })
    .await?;

    let writers = (0..8_i64).map(|worker| {
        let pool = Arc::clone(&pool);
        async move {
            pool.write(async |conn| {
                conn.transaction(IsolationLevel::Serializable, async |tx| {
                    for _ in 0..10 {
                        tx.execute(
                            &Fragment::sql("INSERT INTO hits (worker) VALUES (")
                                .bind(worker)
                                .push_sql(")"),
                        )
                        .await?;
                    }
                    Ok(())
                })
                .await
            })
            .await
        }
    });
    try_join_all(writers).await?;

    let total: Option<i64> = pool
        .read(async |conn| conn.fetch_one(&Fragment::sql("SELECT COUNT(*) FROM hits")).await)
        .await?;
    assert_eq!(total, Some(80));

    let state = pool.state().expect("open pool has state");
    assert!(state.connections >= 1 && state.connections <= 4);
    pool.close().await;
    Ok(())
}

#[tokio::test]
async fn close_rejects_further_work() -> Result<(), Box<dyn std::error::Error>> {
    let pool = SqliteOptions::new(unique_db_path("closing"))
        .build_pool(pool_config(2))
        .await?;
    pool.read(async |conn| conn.execute_raw("SELECT 1").await).await?;

    pool.close().await;
    assert!(pool.is_closed());
    assert!(pool.state().is_none());

    let read = pool.read(async |conn| conn.execute_raw("SELECT 1").await).await;
    assert!(matches!(read, Err(SqlConduitError::PoolShuttingDown)));
    let write = pool.write(async |conn| conn.execute_raw("SELECT 1").await).await;
    assert!(matches!(write, Err(SqlConduitError::PoolShuttingDown)));

    // Closing twice is harmless.
    pool.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn exhausted_pool_times_out() -> Result<(), Box<dyn std::error::Error>> {
    let pool = Arc::new(
        SqliteOptions::new(unique_db_path("exhausted"))
            .build_pool(pool_config(1))
            .await?,
    );
    let (held_tx, held_rx) = tokio::sync::oneshot::channel::<()>();
    let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();

    let holder = pool.write(async move |_conn| {
        let _ = held_tx.send(());
        let _ = release_rx.await;
        Ok(())
    });
    let contender = async {
        let _ = held_rx.await;
        let starved = pool.read(async |conn| conn.execute_raw("SELECT 1").await).await;
        let _ = release_tx.send(());
        starved
    };
    let (held, starved) = tokio::join!(holder, contender);
    held?;
    assert!(
        matches!(starved, Err(SqlConduitError::PoolExhausted(1))),
        "unexpected outcome: {starved:?}"
    );
    assert!(starved.unwrap_err().is_timeout());

    pool.read(async |conn| conn.execute_raw("SELECT 1").await).await?;
    Ok(())
}

#[tokio::test]
async fn abandoned_transactions_are_not_reused() -> Result<(), Box<dyn std::error::Error>> {
    let pool = SqliteOptions::new(unique_db_path("abandoned"))
        .build_pool(pool_config(1))
        .await?;
    pool.write(async |conn| conn.execute_raw("CREATE TABLE t (id INTEGER)").await)
        .await?;

    let _ = tokio::time::timeout(
        Duration::from_millis(100),
        pool.write(async |conn| {
            conn.transaction(IsolationLevel::Default, async |tx| {
                tx.execute_raw("INSERT INTO t VALUES (1)").await?;
                std::future::pending::<()>().await;
                Ok(())
            })
            .await
        }),
    )
    .await;

    let (count, depth) = pool
        .write(async |conn| {
            let count: Option<i64> = conn.fetch_one(&Fragment::sql("SELECT COUNT(*) FROM t")).await?;
            Ok((count, conn.transaction_depth()))
        })
        .await?;
    assert_eq!(count, Some(0));
    assert_eq!(depth, 0);
    Ok(())
}

#[tokio::test]
async fn invalid_pool_config_is_rejected() {
    let bad = PoolConfig::default()
        .with_min_connections(5)
        .with_max_connections(2);
    let result = SqliteOptions::new(unique_db_path("invalid"))
        .build_pool(bad)
        .await;
    assert!(matches!(result, Err(SqlConduitError::InvalidConfiguration(_))));
}
