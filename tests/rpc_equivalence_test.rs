//! The RPC query encoding and the typed builder must produce identical SQL.

use db_querier::DbError;
use db_querier::models::{ColumnDef, Dialect, EntityMeta, EntityRegistry};
use db_querier::query::{Comparison, DescriptorBuilder, Direction, Filter, Query, RpcQuery};
use db_querier::sql::SqlGenerator;
use serde_json::json;

fn registry() -> EntityRegistry {
    EntityRegistry::from_json(
        r#"[
            {"name": "User", "table": "users", "columns": [
                {"property": "id", "primary_key": true},
                {"property": "email"},
                {"property": "name"},
                {"property": "createdAt", "column": "created_at"}
            ]}
        ]"#,
    )
    .unwrap()
}

fn render(entity: &EntityMeta, query: &Query, dialect: Dialect) -> (String, usize) {
    let descriptor = DescriptorBuilder::new(entity).select(query).unwrap();
    let stmt = SqlGenerator::new(dialect).generate(&descriptor).unwrap();
    (stmt.text, stmt.params.len())
}

#[test]
fn test_rpc_and_typed_queries_generate_same_sql() {
    let registry = registry();

    let rpc = RpcQuery::from_json(&json!({
        "$entity": "User",
        "$project": ["id", "name"],
        "$filter": {
            "$or": [
                {"name": {"$startsWith": "A"}},
                {"email": {"$in": ["a@x.io", "b@x.io"]}}
            ],
            "createdAt": {"$gte": "2024-01-01"}
        },
        "$sort": {"createdAt": -1, "id": "asc"},
        "$skip": 20,
        "$limit": 10
    }))
    .unwrap();
    let (entity_name, from_rpc) = rpc.into_parts().unwrap();
    assert_eq!(entity_name, "User");

    let typed = Query::filtered(Filter::and([
        Filter::or([
            Filter::field("name", Comparison::StartsWith("A".into())),
            Filter::in_list("email", ["a@x.io", "b@x.io"]),
        ]),
        Filter::gte("createdAt", "2024-01-01"),
    ]))
    .project(["id", "name"])
    .sort_by("createdAt", Direction::Desc)
    .sort_by("id", Direction::Asc)
    .skip(20)
    .limit(10);

    assert_eq!(from_rpc, typed);

    let entity = registry.get(&entity_name).unwrap();
    for dialect in [Dialect::Postgres, Dialect::MySql, Dialect::Sqlite] {
        assert_eq!(
            render(&entity, &from_rpc, dialect),
            render(&entity, &typed, dialect)
        );
    }
}

#[test]
fn test_postgres_statement_shape() {
    let registry = registry();
    let entity = registry.get("User").unwrap();
    let (_, query) = RpcQuery::from_json(&json!({
        "$entity": "User",
        "$project": {"id": true, "email": true, "name": false},
        "$filter": {"name": "A", "createdAt": null},
        "$sort": {"id": 1},
        "$limit": 5
    }))
    .unwrap()
    .into_parts()
    .unwrap();

    let (text, params) = render(&entity, &query, Dialect::Postgres);
    assert_eq!(
        text,
        r#"SELECT "id", "email" FROM "users" WHERE "name" = $1 AND "created_at" IS NULL ORDER BY "id" ASC LIMIT 5"#
    );
    assert_eq!(params, 1);
}

#[test]
fn test_rpc_rejects_bad_input() {
    let err = RpcQuery::from_json(&json!({"$entity": "User", "$limit": -1})).unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "$limit"));

    let err = RpcQuery::from_json(&json!({"$entity": "User", "$where": {}})).unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "$where"));

    let err = RpcQuery::from_json(&json!({"$limit": 1}))
        .unwrap()
        .into_parts()
        .unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "$entity"));

    let registry = registry();
    let entity = registry.get("User").unwrap();
    let (_, query) = RpcQuery::from_json(&json!({"$entity": "User", "$sort": {"age": 1}}))
        .unwrap()
        .into_parts()
        .unwrap();
    let err = DescriptorBuilder::new(&entity).select(&query).unwrap_err();
    assert!(matches!(err, DbError::Validation { ref field, .. } if field == "age"));
}
