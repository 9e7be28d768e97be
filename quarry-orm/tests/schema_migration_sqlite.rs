#![cfg(feature = "sqlite")]

use quarry_orm::prelude::*;
use quarry_orm::test_utils::{MockDatabase, RecordingExecutor};
use quarry_orm::{MigrationOptions, RelationMeta};
use serde_json::{Value, json};

fn notes_schema(with_summary: bool) -> Schema {
    let mut notes = ModelSchema::new("notes")
        .field("title", FieldDescriptor::new("string"))
        .field(
            "pinned",
            FieldDescriptor::new("boolean").with_meta(FieldMeta {
                default: Some(json!(false)),
                ..FieldMeta::default()
            }),
        );
    if with_summary {
        notes = notes.field("summary", FieldDescriptor::new("string | undefined"));
    }
    Schema::new([("Note", notes)]).expect("schema")
}

#[tokio::test]
async fn adding_a_field_alters_once() {
    let pool = MockDatabase::new_sqlite().await.expect("pool");

    let first = Quarry::new(RecordingExecutor::new(pool.executor()), notes_schema(false));
    let reports = first.sync().await.expect("create");
    assert!(reports[0].created);

    let second = Quarry::new(RecordingExecutor::new(pool.executor()), notes_schema(true));
    let reports = second.sync().await.expect("extend");
    assert_eq!(reports[0].added_columns, ["summary"]);
    assert_eq!(second.executor().count_matching("ALTER TABLE"), 1);
    assert_eq!(second.executor().count_matching("CREATE"), 0);

    let stored = second
        .insert(
            "Note",
            json!({ "title": "draft", "summary": "short" })
                .as_object()
                .cloned()
                .expect("object"),
        )
        .await
        .expect("insert");
    assert_eq!(stored["summary"], "short");
    assert_eq!(stored["pinned"], false);
}

#[tokio::test]
async fn reset_migrations_reinspects_without_ddl() {
    let pool = MockDatabase::new_sqlite().await.expect("pool");
    let db = Quarry::new(RecordingExecutor::new(pool.executor()), notes_schema(true));
    db.sync().await.expect("create");

    db.executor().clear();
    let skipped = db.sync().await.expect("skip");
    assert!(skipped[0].skipped);
    assert!(db.executor().statements().is_empty());

    db.reset_migrations();
    let again = db.sync().await.expect("reinspect");
    assert!(!again[0].skipped);
    assert!(!again[0].created);
    assert_eq!(db.executor().count_matching("CREATE"), 0);
    assert_eq!(db.executor().count_matching("ALTER"), 0);
}

#[tokio::test]
async fn timestamps_can_be_turned_off() {
    let pool = MockDatabase::new_sqlite().await.expect("pool");
    let db = Quarry::new(pool.executor(), notes_schema(false)).with_options(MigrationOptions {
        timestamps: false,
        backfill_defaults: true,
    });
    db.sync().await.expect("create");

    let columns: Vec<String> = db
        .executor()
        .execute(r#"PRAGMA table_info("notes")"#, &[])
        .await
        .expect("pragma")
        .rows
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_owned))
        .collect();
    assert_eq!(columns, ["id", "title", "pinned"]);
}

#[tokio::test]
async fn one_to_one_foreign_keys_are_unique() {
    let schema = Schema::new([
        ("Person", ModelSchema::new("people").field("name", FieldDescriptor::new("string"))),
        (
            "Passport",
            ModelSchema::new("passports")
                .field("personId", FieldDescriptor::new("number"))
                .relation(
                    RelationDescriptor::new("holder", RelationKind::OneToOne, "Person", "personId").with_meta(
                        RelationMeta {
                            on_delete: Some("CASCADE".to_owned()),
                            ..RelationMeta::default()
                        },
                    ),
                ),
        ),
    ])
    .expect("schema");
    let pool = MockDatabase::new_sqlite().await.expect("pool");
    let db = Quarry::new(RecordingExecutor::new(pool.executor()), schema);
    let reports = db.sync().await.expect("sync");
    assert!(reports.iter().all(|r| r.is_clean()));

    let create = db
        .executor()
        .statements()
        .into_iter()
        .map(|(sql, _)| sql)
        .find(|sql| sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "passports""#))
        .expect("create passports");
    assert!(create.contains(r#"FOREIGN KEY ("personId") REFERENCES "people"("id") ON DELETE CASCADE"#));
    assert_eq!(db.executor().count_matching(r#"CREATE UNIQUE INDEX IF NOT EXISTS "uniq_passports_personId""#), 1);

    let person = db
        .insert("Person", json!({ "name": "Eve" }).as_object().cloned().expect("object"))
        .await
        .expect("person");
    let passport = json!({ "personId": person["id"] }).as_object().cloned().expect("object");
    db.insert("Passport", passport.clone()).await.expect("first passport");
    assert!(db.insert("Passport", passport).await.is_err());
}
