//! Integration tests for the querier and pool against SQLite files.

use db_querier::config::{DatabaseConfig, PoolOptions};
use db_querier::models::{ColumnDef, EntityMeta, EntityRegistry, QuerierState, Record, Value};
use db_querier::query::{Direction, Filter, Query};
use db_querier::{DbError, Pool};
use serde_json::{Value as JsonValue, json};
use std::sync::Arc;
use tempfile::TempDir;

fn user_entity() -> EntityMeta {
    EntityMeta::new("User")
        .table("users")
        .with_column(ColumnDef::primary("id"))
        .with_column(ColumnDef::new("email"))
        .with_column(ColumnDef::new("name"))
        .with_column(ColumnDef::new("createdAt").column("created_at"))
        .with_column(ColumnDef::new("status"))
}

fn record(value: JsonValue) -> Record {
    value.as_object().cloned().unwrap()
}

async fn setup(max_connections: u32) -> (TempDir, Pool) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("app.db").display());
    let config = DatabaseConfig::parse(&url)
        .unwrap()
        .with_options(PoolOptions {
            max_connections: Some(max_connections),
            acquire_timeout_ms: Some(200),
            ..Default::default()
        })
        .unwrap();
    let registry = EntityRegistry::new().with(user_entity()).unwrap();
    let pool = Pool::new(config, Arc::new(registry)).unwrap();

    let mut querier = pool.get_querier().await.unwrap();
    querier
        .run(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT NOT NULL UNIQUE,
                name TEXT,
                created_at TEXT,
                status TEXT NOT NULL DEFAULT 'active'
            )",
            &[],
        )
        .await
        .unwrap();
    querier.release().unwrap();

    (dir, pool)
}

#[tokio::test]
async fn test_insert_many_returns_ids_in_order() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    let ids = q
        .insert_many(
            "User",
            &[
                record(json!({"email": "a@x.io", "name": "A"})),
                record(json!({"email": "b@x.io"})),
                record(json!({"email": "c@x.io", "name": "C"})),
            ],
        )
        .await
        .unwrap();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);

    let b = q
        .find_one_by_id("User", &json!(2), &[])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(b["email"], json!("b@x.io"));
    assert_eq!(b["name"], JsonValue::Null);

    q.release().unwrap();
}

#[tokio::test]
async fn test_insert_many_keeps_defaults_for_missing_properties() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    q.insert_one("User", &record(json!({"email": "solo@x.io"})))
        .await
        .unwrap();
    let ids = q
        .insert_many(
            "User",
            &[
                record(json!({"email": "a@x.io", "status": "banned"})),
                record(json!({"email": "b@x.io"})),
            ],
        )
        .await
        .unwrap();
    assert_eq!(ids, vec![json!(2), json!(3)]);
    assert_eq!(q.state(), QuerierState::Idle);

    let rows = q
        .find_many("User", &Query::new().sort_by("id", Direction::Asc))
        .await
        .unwrap();
    let statuses: Vec<_> = rows.iter().map(|r| r["status"].clone()).collect();
    assert_eq!(statuses, vec![json!("active"), json!("banned"), json!("active")]);

    q.release().unwrap();
}

#[tokio::test]
async fn test_failed_split_insert_leaves_no_rows() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    // Second run violates the unique email of the first
    let err = q
        .insert_many(
            "User",
            &[
                record(json!({"email": "a@x.io", "name": "A"})),
                record(json!({"email": "a@x.io"})),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }));
    assert_eq!(q.state(), QuerierState::Idle);
    assert_eq!(q.count("User", None).await.unwrap(), 0);

    q.release().unwrap();
}

#[tokio::test]
async fn test_save_one_with_null_id_generates_key() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    q.insert_one("User", &record(json!({"email": "first@x.io"})))
        .await
        .unwrap();
    let id = q
        .save_one("User", &record(json!({"id": null, "email": "c@x.io"})))
        .await
        .unwrap();
    assert_eq!(id, json!(2));

    let saved = q.find_one_by_id_or_fail("User", &id, &[]).await.unwrap();
    assert_eq!(saved["email"], json!("c@x.io"));

    q.release().unwrap();
}

#[tokio::test]
async fn test_records_use_property_names() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    q.insert_one(
        "User",
        &record(json!({"email": "a@x.io", "createdAt": "2024-01-01"})),
    )
    .await
    .unwrap();

    let rows = q
        .find_many("User", &Query::new().project(["email", "createdAt"]))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["createdAt"], json!("2024-01-01"));
    assert!(!rows[0].contains_key("created_at"));
    assert!(!rows[0].contains_key("id"));

    q.release().unwrap();
}

#[tokio::test]
async fn test_upsert_twice_updates_existing_row() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();
    let paths = vec!["email".to_string()];

    q.upsert_one("User", &paths, &record(json!({"email": "a@x.io", "name": "A"})))
        .await
        .unwrap();
    q.upsert_one("User", &paths, &record(json!({"email": "a@x.io", "name": "B"})))
        .await
        .unwrap();

    let rows = q.find_many("User", &Query::new()).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("B"));

    q.release().unwrap();
}

#[tokio::test]
async fn test_upsert_many_single_statement() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();
    let paths = vec!["email".to_string()];

    q.insert_one("User", &record(json!({"email": "a@x.io", "name": "old"})))
        .await
        .unwrap();
    q.upsert_many(
        "User",
        &paths,
        &[
            record(json!({"email": "a@x.io", "name": "new"})),
            record(json!({"email": "b@x.io", "name": "fresh"})),
        ],
    )
    .await
    .unwrap();

    let rows = q
        .find_many("User", &Query::new().sort_by("email", Direction::Asc))
        .await
        .unwrap();
    let names: Vec<_> = rows.iter().map(|r| r["name"].clone()).collect();
    assert_eq!(names, vec![json!("new"), json!("fresh")]);

    q.release().unwrap();
}

#[tokio::test]
async fn test_save_many_inserts_new_and_updates_existing() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    let existing = q
        .insert_one("User", &record(json!({"email": "e@x.io", "name": "E"})))
        .await
        .unwrap();
    assert_eq!(existing, json!(1));

    let ids = q
        .save_many(
            "User",
            &[
                record(json!({"email": "n1@x.io", "name": "N1"})),
                record(json!({"id": 1, "name": "E2"})),
                record(json!({"email": "n2@x.io"})),
            ],
        )
        .await
        .unwrap();
    assert_eq!(ids, vec![json!(2), json!(1), json!(3)]);

    let updated = q
        .find_one_by_id_or_fail("User", &json!(1), &["name".to_string()])
        .await
        .unwrap();
    assert_eq!(updated["name"], json!("E2"));
    assert_eq!(q.count("User", None).await.unwrap(), 3);

    q.release().unwrap();
}

#[tokio::test]
async fn test_find_one_without_match_is_none() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    let found = q
        .find_one("User", &Query::filtered(Filter::eq("email", "ghost@x.io")))
        .await
        .unwrap();
    assert!(found.is_none());

    assert!(matches!(
        q.find_one_by_id_or_fail("User", &json!(42), &[]).await,
        Err(DbError::NotFound { .. })
    ));

    q.release().unwrap();
}

#[tokio::test]
async fn test_find_many_and_count_ignores_paging() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    for email in ["a@x.io", "b@x.io", "c@x.io"] {
        q.insert_one("User", &record(json!({"email": email})))
            .await
            .unwrap();
    }

    let query = Query::new()
        .sort_by("email", Direction::Desc)
        .skip(1)
        .limit(1);
    let (rows, total) = q.find_many_and_count("User", &query).await.unwrap();
    assert_eq!(total, 3);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["email"], json!("b@x.io"));

    let offset_only = Query::new().sort_by("email", Direction::Asc).skip(2);
    let rows = q.find_many("User", &offset_only).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["email"], json!("c@x.io"));

    q.release().unwrap();
}

#[tokio::test]
async fn test_like_operators_escape_wildcards() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    q.insert_many(
        "User",
        &[
            record(json!({"email": "a@x.io", "name": "100% real"})),
            record(json!({"email": "b@x.io", "name": "1000 real"})),
        ],
    )
    .await
    .unwrap();

    let filter = Filter::from_json(&json!({"name": {"$startsWith": "100%"}})).unwrap();
    let rows = q.find_many("User", &Query::filtered(filter)).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["email"], json!("a@x.io"));

    let filter = Filter::from_json(&json!({"name": {"$ilike": "%REAL"}})).unwrap();
    assert_eq!(q.count("User", Some(&filter)).await.unwrap(), 2);

    q.release().unwrap();
}

#[tokio::test]
async fn test_update_and_delete_by_id() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    let id = q
        .insert_one("User", &record(json!({"email": "a@x.io", "name": "A"})))
        .await
        .unwrap();

    let affected = q
        .update_one_by_id("User", &id, &record(json!({"name": "Z"})))
        .await
        .unwrap();
    assert_eq!(affected, 1);

    assert_eq!(q.delete_one_by_id("User", &id).await.unwrap(), 1);
    assert_eq!(q.delete_one_by_id("User", &id).await.unwrap(), 0);

    q.release().unwrap();
}

#[tokio::test]
async fn test_bulk_writes_require_explicit_filter() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    q.insert_many(
        "User",
        &[
            record(json!({"email": "a@x.io"})),
            record(json!({"email": "b@x.io"})),
        ],
    )
    .await
    .unwrap();

    let err = q.delete_many("User", &Query::new()).await.unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "$filter"));

    let err = q
        .update_many("User", &Query::new(), &record(json!({"name": "x"})))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "$filter"));

    let updated = q
        .update_many(
            "User",
            &Query::filtered(Filter::eq("email", "a@x.io")),
            &record(json!({"name": "x"})),
        )
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let deleted = q
        .delete_many("User", &Query::filtered(Filter::all()))
        .await
        .unwrap();
    assert_eq!(deleted, 2);
    assert_eq!(q.count("User", None).await.unwrap(), 0);

    q.release().unwrap();
}

#[tokio::test]
async fn test_unknown_property_is_rejected() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    let err = q
        .find_many("User", &Query::filtered(Filter::eq("nickname", "x")))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "nickname"));

    let err = q.find_many("Ghost", &Query::new()).await.unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "$entity"));

    q.release().unwrap();
}

#[tokio::test]
async fn test_run_raw_statements() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    let result = q
        .run(
            "INSERT INTO users (email, name) VALUES (?, ?)",
            &[Value::from("a@x.io"), Value::from("A")],
        )
        .await
        .unwrap();
    assert_eq!(result.affected, 1);
    assert!(result.rows.is_empty());

    let result = q
        .run("SELECT name FROM users WHERE id = ?", &[Value::from(1)])
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["name"], json!("A"));

    let result = q
        .run(
            "UPDATE users SET name = ? WHERE id = ? RETURNING id",
            &[Value::from("B"), Value::from(1)],
        )
        .await
        .unwrap();
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["id"], json!(1));

    let err = q.run("SELECT * FROM missing", &[]).await.unwrap_err();
    assert!(matches!(err, DbError::Execution { ref statement, .. } if statement.contains("missing")));

    q.release().unwrap();
}

#[tokio::test]
async fn test_transaction_rollback_on_error() {
    let (_dir, pool) = setup(1).await;

    let result = pool
        .transaction::<(), _>(|q| {
            Box::pin(async move {
                q.insert_one("User", &record(json!({"email": "a@x.io"})))
                    .await?;
                assert!(q.has_open_transaction());
                Err(DbError::validation("test", "abort"))
            })
        })
        .await;
    assert!(matches!(result, Err(DbError::Validation { ref field, .. }) if field == "test"));

    let mut q = pool.get_querier().await.unwrap();
    assert_eq!(q.count("User", None).await.unwrap(), 0);
    q.release().unwrap();
    assert_eq!(pool.status().in_use, 0);
}

#[tokio::test]
async fn test_transaction_commit() {
    let (_dir, pool) = setup(1).await;

    let ids = pool
        .transaction(|q| {
            Box::pin(async move {
                q.insert_many(
                    "User",
                    &[
                        record(json!({"email": "a@x.io"})),
                        record(json!({"email": "b@x.io"})),
                    ],
                )
                .await
            })
        })
        .await
        .unwrap();
    assert_eq!(ids.len(), 2);

    let mut q = pool.get_querier().await.unwrap();
    assert_eq!(q.count("User", None).await.unwrap(), 2);
    q.release().unwrap();
}

#[tokio::test]
async fn test_explicit_transaction_methods() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    q.begin_transaction().await.unwrap();
    assert_eq!(q.state(), QuerierState::InTransaction);
    q.insert_one("User", &record(json!({"email": "a@x.io"})))
        .await
        .unwrap();
    q.rollback_transaction().await.unwrap();
    assert_eq!(q.count("User", None).await.unwrap(), 0);

    q.begin_transaction().await.unwrap();
    q.insert_one("User", &record(json!({"email": "b@x.io"})))
        .await
        .unwrap();
    q.commit_transaction().await.unwrap();
    assert_eq!(q.count("User", None).await.unwrap(), 1);

    assert!(matches!(
        q.commit_transaction().await,
        Err(DbError::Transaction { .. })
    ));

    q.release().unwrap();
}

#[tokio::test]
async fn test_nested_transaction_is_rejected() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    q.begin_transaction().await.unwrap();
    assert!(matches!(
        q.begin_transaction().await,
        Err(DbError::NestedTransaction)
    ));
    let nested = q
        .transaction::<(), _>(|_| Box::pin(async move { Ok(()) }))
        .await;
    assert!(matches!(nested, Err(DbError::NestedTransaction)));

    // The outer transaction is untouched
    assert!(q.has_open_transaction());
    q.rollback_transaction().await.unwrap();
    q.release().unwrap();
}

#[tokio::test]
async fn test_release_lifecycle() {
    let (_dir, pool) = setup(1).await;
    let mut q = pool.get_querier().await.unwrap();

    q.begin_transaction().await.unwrap();
    assert!(matches!(q.release(), Err(DbError::Transaction { .. })));
    q.rollback_transaction().await.unwrap();

    q.release().unwrap();
    assert_eq!(q.state(), QuerierState::Released);
    // Second release is a no-op
    q.release().unwrap();

    assert!(matches!(
        q.find_many("User", &Query::new()).await,
        Err(DbError::QuerierClosed)
    ));
    assert!(matches!(q.run("SELECT 1", &[]).await, Err(DbError::QuerierClosed)));
    assert!(matches!(
        q.begin_transaction().await,
        Err(DbError::QuerierClosed)
    ));

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 1);
}

#[tokio::test]
async fn test_drop_mid_transaction_discards_connection() {
    let (_dir, pool) = setup(1).await;

    let mut q = pool.get_querier().await.unwrap();
    q.begin_transaction().await.unwrap();
    drop(q);

    let status = pool.status();
    assert_eq!(status.in_use, 0);
    assert_eq!(status.idle, 0);

    // Dropping an idle querier returns its connection
    let q = pool.get_querier().await.unwrap();
    drop(q);
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test]
async fn test_pool_exhaustion_and_recovery() {
    let (_dir, pool) = setup(2).await;

    let mut first = pool.get_querier().await.unwrap();
    let _second = pool.get_querier().await.unwrap();

    match pool.get_querier().await {
        Err(DbError::PoolExhausted { capacity, waited_ms }) => {
            assert_eq!(capacity, 2);
            assert!(waited_ms >= 150);
        }
        other => panic!("expected PoolExhausted, got {other:?}"),
    }

    first.release().unwrap();
    let third = pool.get_querier().await;
    assert!(third.is_ok());
}

#[tokio::test]
async fn test_closed_pool_rejects_queriers() {
    let (_dir, pool) = setup(1).await;
    pool.close().await;
    assert!(matches!(
        pool.get_querier().await,
        Err(DbError::PoolClosed)
    ));
}
