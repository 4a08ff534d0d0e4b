#![cfg(feature = "sqlite")]

use chrono::NaiveDate;
use serde_json::json;
use sql_conduit::prelude::*;
use tempfile::tempdir;
use uuid::Uuid;

fn unique_db_path(prefix: &str) -> String {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    // Leak the tempdir so the file persists for the duration of the test binary.
    std::mem::forget(dir);
    path.to_string_lossy().into_owned()
}

async fn single(prefix: &str) -> Result<Single<SqliteConnection>, SqlConduitError> {
    let conn = SqliteOptions::new(unique_db_path(prefix)).connect().await?;
    Ok(Single::new(conn))
}

#[tokio::test]
async fn bound_values_round_trip_through_sqlite() -> Result<(), Box<dyn std::error::Error>> {
    let db = single("values").await?;
    let id = Uuid::new_v4();
    let seen = NaiveDate::from_ymd_opt(2024, 5, 17)
        .unwrap()
        .and_hms_micro_opt(9, 15, 30, 120_000)
        .unwrap();

    db.write(async |conn| {
        conn.execute_raw(
            "CREATE TABLE items (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                active BOOLEAN NOT NULL,
                seen_at TEXT,
                price TEXT,
                tags TEXT,
                meta TEXT,
                payload BLOB
            )",
        )
        .await?;
        let insert = Fragment::sql(
            "INSERT INTO items (id, name, active, seen_at, price, tags, meta, payload) VALUES (",
        )
        .bind(id)
        .push_sql(", ")
        .bind("widget")
        .push_sql(", ")
        .bind(true)
        .push_sql(", ")
        .bind(seen)
        .push_sql(", ")
        .bind(Value::Decimal("19.990".into()))
        .push_sql(", ")
        .bind(Value::Array(vec![Value::from("a"), Value::from("b")]))
        .push_sql(", ")
        .bind(json!({"color": "red"}))
        .push_sql(", ")
        .bind(vec![0_u8, 1, 2])
        .push_sql(")");
        assert_eq!(conn.execute(&insert).await?, 1);
        Ok(())
    })
    .await?;

    let row: Option<Row> = db
        .read(async |conn| {
            conn.fetch_one(
                &Fragment::sql("SELECT * FROM items WHERE id = ").bind(id),
            )
            .await
        })
        .await?;
    let row = row.expect("inserted row");
    assert_eq!(row.get::<Uuid>("id")?, Some(id));
    assert_eq!(row.get::<String>("name")?.as_deref(), Some("widget"));
    assert_eq!(row.get::<bool>("active")?, Some(true));
    assert_eq!(row.get::<chrono::NaiveDateTime>("seen_at")?, Some(seen));
    assert_eq!(row.get::<String>("price")?.as_deref(), Some("19.990"));
    assert_eq!(
        row.get::<Vec<String>>("tags")?,
        Some(vec!["a".to_string(), "b".to_string()])
    );
    assert_eq!(row.get::<serde_json::Value>("meta")?, Some(json!({"color": "red"})));
    assert_eq!(row.get::<Vec<u8>>("payload")?, Some(vec![0, 1, 2]));
    Ok(())
}

#[tokio::test]
async fn empty_fragments_never_reach_the_database() -> Result<(), Box<dyn std::error::Error>> {
    let db = single("empty").await?;
    let (affected, rows) = db
        .write(async |conn| {
            let affected = conn.execute(&Fragment::sql("   ")).await?;
            let rows: Vec<Row> = conn.fetch_all(&Fragment::new()).await?;
            conn.execute_raw("").await?;
            Ok((affected, rows))
        })
        .await?;
    assert_eq!(affected, 0);
    assert!(rows.is_empty());
    Ok(())
}

#[tokio::test]
async fn nulls_decode_as_none_and_reject_plain_types() -> Result<(), Box<dyn std::error::Error>> {
    let db = single("nulls").await?;
    let (maybe, strict) = db
        .read(async |conn| {
            let maybe: Vec<(i64, Option<String>)> = conn
                .fetch_all(&Fragment::sql("SELECT 1, NULL"))
                .await?;
            let strict = conn
                .fetch_all::<(i64, String)>(&Fragment::sql("SELECT 1, NULL"))
                .await;
            Ok((maybe, strict))
        })
        .await?;
    assert_eq!(maybe, vec![(1, None)]);
    assert!(matches!(strict, Err(SqlConduitError::Decode { index: 1, .. })));
    Ok(())
}

#[tokio::test]
async fn duplicate_column_names_resolve_to_the_first() -> Result<(), Box<dyn std::error::Error>> {
    let db = single("dupes").await?;
    let row: Option<Row> = db
        .read(async |conn| conn.fetch_one(&Fragment::sql("SELECT 1 AS x, 2 AS x")).await)
        .await?;
    let row = row.expect("one row");
    assert_eq!(row.len(), 2);
    assert_eq!(row.get::<i64>("x")?, Some(1));
    assert_eq!(row.decode::<i64>(1)?, Some(2));
    Ok(())
}

#[tokio::test]
async fn bindings_are_data_not_sql() -> Result<(), Box<dyn std::error::Error>> {
    let db = single("inject").await?;
    let hostile = "x'); DROP TABLE notes; --";
    let stored: Vec<String> = db
        .write(async |conn| {
            conn.execute_raw("CREATE TABLE notes (body TEXT)").await?;
            conn.execute(
                &Fragment::sql("INSERT INTO notes (body) VALUES (")
                    .bind(hostile)
                    .push_sql(")"),
            )
            .await?;
            conn.fetch_all(&Fragment::sql("SELECT body FROM notes")).await
        })
        .await?;
    assert_eq!(stored, vec![hostile.to_string()]);
    Ok(())
}

#[tokio::test]
async fn joined_fragments_number_placeholders_in_order() -> Result<(), Box<dyn std::error::Error>> {
    let db = single("joined").await?;
    let ids = [3_i64, 1, 2];
    let predicate = Fragment::join(
        ids.iter().map(|id| Fragment::sql("n = ").bind(*id)),
        " OR ",
    );
    let query = Fragment::sql(
        "WITH RECURSIVE c(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM c WHERE n < 5) \
         SELECT n FROM c WHERE ",
    )
    .append(predicate)
    .push_sql(" ORDER BY n");
    assert_eq!(query.binding_count(), 3);

    let found: Vec<i64> = db.read(async |conn| conn.fetch_all(&query).await).await?;
    assert_eq!(found, vec![1, 2, 3]);
    Ok(())
}
