#![cfg(feature = "sqlite")]

use quarry_orm::prelude::*;
use quarry_orm::test_utils::MockDatabase;
use serde_json::{Value, json};
use sqlx::Sqlite;

const SCHEMA: &str = r#"{
    "Account": {
        "table": "accounts",
        "fields": {
            "email": { "type": "string", "meta": { "unique": true } },
            "password": { "type": "string" },
            "score": { "type": "number", "meta": { "default": 0 } },
            "verified": { "type": "boolean", "meta": { "default": false } }
        }
    }
}"#;

fn row(value: Value) -> Row {
    value.as_object().cloned().expect("object")
}

async fn setup() -> Quarry<SqlxExecutor<Sqlite>> {
    let pool = MockDatabase::new_sqlite().await.expect("pool");
    let db = Quarry::new(pool.executor(), Schema::from_json(SCHEMA).expect("schema"));
    db.sync().await.expect("sync");
    for (email, score, verified) in [
        ("ada@example.com", 10, true),
        ("Bob@Example.com", 20, false),
        ("cy@example.com", 30, true),
    ] {
        db.insert(
            "Account",
            row(json!({ "email": email, "password": "hunter2", "score": score, "verified": verified })),
        )
        .await
        .expect("insert");
    }
    db
}

#[tokio::test]
async fn insert_returns_the_stored_row() {
    let db = setup().await;
    let stored = db
        .insert("Account", row(json!({ "email": "dee@example.com", "password": "x", "ignored": 1 })))
        .await
        .expect("insert");
    assert_eq!(stored["id"], json!(4));
    assert_eq!(stored["score"], json!(0));
    assert_eq!(stored["verified"], false);
    assert!(!stored.contains_key("ignored"));
}

#[tokio::test]
async fn first_accepts_fields_operators_and_raw_sql() {
    let db = setup().await;
    let accounts = db.query("Account").expect("query");

    let by_email = accounts
        .first(row(json!({ "email": "cy@example.com" })))
        .await
        .expect("first")
        .expect("row");
    assert_eq!(by_email["score"], json!(30));

    let by_op = accounts
        .clone()
        .order_by("score", Direction::Desc)
        .first(row(json!({ "score": { "op": "<", "value": 30 } })))
        .await
        .expect("first")
        .expect("row");
    assert_eq!(by_op["email"], "Bob@Example.com");

    let raw = accounts
        .first("score >= 20 AND verified = 1")
        .await
        .expect("first")
        .expect("row");
    assert_eq!(raw["email"], "cy@example.com");

    let none = accounts
        .first(row(json!({ "email": "nobody@example.com" })))
        .await
        .expect("first");
    assert!(none.is_none());
    assert!(accounts.intent().filters.is_empty());
}

#[tokio::test]
async fn first_rejects_unknown_operators() {
    let db = setup().await;
    let err = db
        .query("Account")
        .expect("query")
        .first(row(json!({ "score": { "op": "~~", "value": 1 } })))
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::InvalidOperator(op) if op == "~~"));
}

#[tokio::test]
async fn booleans_and_exclusions_apply_to_results() {
    let db = setup().await;
    let rows = db
        .query("Account")
        .expect("query")
        .exclude(["password"])
        .order_by("id", Direction::Asc)
        .get()
        .await
        .expect("get");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["verified"], true);
    assert_eq!(rows[1]["verified"], false);
    assert!(rows.iter().all(|r| !r.contains_key("password")));
}

#[tokio::test]
async fn filters_paging_and_projection() {
    let db = setup().await;
    let page = db
        .query("Account")
        .expect("query")
        .select(["email", "score"])
        .where_op("score", ">=", 10)
        .expect("operator")
        .order_by("score", Direction::Asc)
        .offset(1)
        .limit(1)
        .get()
        .await
        .expect("page");
    assert_eq!(page.len(), 1);
    assert_eq!(page[0]["score"], json!(20));
    assert!(!page[0].contains_key("id"));

    let insensitive = db
        .query("Account")
        .expect("query")
        .case_insensitive_like("email", "bob@%")
        .get()
        .await
        .expect("ilike");
    assert_eq!(insensitive.len(), 1);

    let none = db
        .query("Account")
        .expect("query")
        .r#where("id", Operator::In, json!([]))
        .get()
        .await
        .expect("empty in");
    assert!(none.is_empty());

    let bound = db
        .query("Account")
        .expect("query")
        .where_raw_bind("score > ?", 15)
        .count()
        .await
        .expect("count");
    assert_eq!(bound, 2);
}

#[tokio::test]
async fn writes_require_a_condition() {
    let db = setup().await;
    let accounts = db.query("Account").expect("query");

    let err = accounts.update(row(json!({ "score": 0 }))).await.unwrap_err();
    assert!(matches!(err, QuarryError::EmptyCondition("update")));
    let err = accounts.delete().await.unwrap_err();
    assert!(matches!(err, QuarryError::EmptyCondition("delete")));
    assert_eq!(accounts.count().await.expect("count"), 3);

    let changed = accounts
        .clone()
        .r#where("verified", Operator::Eq, true)
        .update(row(json!({ "score": 99 })))
        .await
        .expect("update");
    assert_eq!(changed, 2);

    let removed = accounts
        .clone()
        .r#where("score", Operator::Eq, 99)
        .delete()
        .await
        .expect("delete");
    assert_eq!(removed, 2);
    assert_eq!(accounts.count().await.expect("count"), 1);
}

#[tokio::test]
async fn table_names_resolve_to_models() {
    let db = setup().await;
    let rows = db.query("accounts").expect("query by table").get().await.expect("get");
    assert_eq!(rows.len(), 3);

    let err = db.query("Ledger").unwrap_err();
    assert!(matches!(err, QuarryError::ModelNotFound(name) if name == "Ledger"));
}
