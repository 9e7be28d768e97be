#![cfg(feature = "sqlite")]

use quarry_core::executor::Execute;
use quarry_core::migrator::introspect::introspect;
use quarry_core::migrator::{MigrationState, Migrator};
use quarry_core::schema::{FieldDescriptor, FieldMeta, ModelSchema, RelationDescriptor, RelationKind, Schema};
use quarry_core::test_utils::{MockDatabase, RecordingExecutor};
use quarry_core::{QuarryError, QueryBuilder, SqlxExecutor};
use serde_json::{Value, json};

type Exec = RecordingExecutor<SqlxExecutor<sqlx::Sqlite>>;

async fn setup() -> Exec {
    let db = MockDatabase::new_sqlite().await.expect("pool");
    RecordingExecutor::new(db.executor())
}

fn ddl_count(exec: &Exec) -> usize {
    exec.count_matching("CREATE") + exec.count_matching("ALTER")
}

async fn names(exec: &Exec, sql: &str) -> Vec<String> {
    exec.execute(sql, &[])
        .await
        .expect("introspect")
        .rows
        .iter()
        .filter_map(|row| row.get("name").and_then(Value::as_str).map(str::to_owned))
        .collect()
}

fn blog_schema() -> Schema {
    Schema::new([
        (
            "User",
            ModelSchema::new("users")
                .field(
                    "email",
                    FieldDescriptor::new("string").with_meta(FieldMeta {
                        unique: true,
                        ..FieldMeta::default()
                    }),
                )
                .field(
                    "name",
                    FieldDescriptor::new("string").with_meta(FieldMeta {
                        index: true,
                        ..FieldMeta::default()
                    }),
                )
                .relation(RelationDescriptor::new("posts", RelationKind::OneToMany, "Post", "userId"))
                .relation(RelationDescriptor::many_to_many(
                    "groups",
                    "Group",
                    "user_groups",
                    "userId",
                    "groupId",
                )),
        ),
        (
            "Post",
            ModelSchema::new("posts")
                .field("title", FieldDescriptor::new("string"))
                .field("userId", FieldDescriptor::new("number"))
                .relation(RelationDescriptor::new("author", RelationKind::ManyToOne, "User", "userId")),
        ),
        ("Group", ModelSchema::new("groups").field("label", FieldDescriptor::new("string"))),
    ])
    .expect("schema")
}

#[tokio::test]
async fn second_call_is_short_circuited_by_state() {
    let exec = setup().await;
    let schema = blog_schema();
    let state = MigrationState::new();
    let migrator = Migrator::new(&exec, &schema, &state);

    let first = migrator.ensure_model("User").await.expect("first");
    assert!(first.created);
    assert!(first.is_clean(), "{:?}", first.statements);

    exec.clear();
    let second = migrator.ensure_model("User").await.expect("second");
    assert!(second.skipped);
    assert!(exec.statements().is_empty());
}

#[tokio::test]
async fn repeated_migration_issues_no_ddl() {
    let exec = setup().await;
    let schema = blog_schema();
    for name in ["User", "Post", "Group"] {
        let state = MigrationState::new();
        Migrator::new(&exec, &schema, &state)
            .ensure_model(name)
            .await
            .expect("migrate");
    }

    exec.clear();
    for name in ["User", "Post", "Group"] {
        let state = MigrationState::new();
        let report = Migrator::new(&exec, &schema, &state)
            .ensure_model(name)
            .await
            .expect("migrate again");
        assert!(!report.created);
        assert!(report.added_columns.is_empty());
    }
    assert_eq!(ddl_count(&exec), 0, "{:?}", exec.statements());
}

#[tokio::test]
async fn new_optional_field_adds_exactly_one_column() {
    let exec = setup().await;
    let schema = blog_schema();
    let posts = schema.model("Post").expect("post");

    let state = MigrationState::new();
    let migrator = Migrator::new(&exec, &schema, &state);
    migrator
        .ensure_table("posts", &posts.fields, &posts.relations)
        .await
        .expect("create");

    let mut fields = posts.fields.clone();
    fields.insert("summary".to_owned(), FieldDescriptor::new("string | undefined"));

    exec.clear();
    let state = MigrationState::new();
    let report = Migrator::new(&exec, &schema, &state)
        .ensure_table("posts", &fields, &posts.relations)
        .await
        .expect("alter");

    assert_eq!(report.added_columns, ["summary"]);
    assert_eq!(exec.count_matching("ALTER TABLE"), 1);
    assert_eq!(exec.count_matching("CREATE"), 0);
    let alter = exec
        .statements()
        .into_iter()
        .find(|(sql, _)| sql.starts_with("ALTER"))
        .expect("alter statement");
    assert_eq!(alter.0, r#"ALTER TABLE "posts" ADD COLUMN "summary" TEXT"#);

    let columns = names(&exec, r#"PRAGMA table_info("posts")"#).await;
    assert!(columns.contains(&"summary".to_owned()));
}

#[tokio::test]
async fn creates_indexes_timestamps_and_inline_foreign_keys() {
    let exec = setup().await;
    let schema = blog_schema();
    let state = MigrationState::new();
    let migrator = Migrator::new(&exec, &schema, &state);
    migrator.ensure_model("User").await.expect("users");
    let report = migrator.ensure_model("Post").await.expect("posts");

    let create = &report.statements[0];
    assert!(create.starts_with(r#"CREATE TABLE IF NOT EXISTS "posts""#));
    assert!(create.contains(r#""id" INTEGER PRIMARY KEY AUTOINCREMENT"#));
    assert!(create.contains(r#"FOREIGN KEY ("userId") REFERENCES "users"("id")"#));

    let live = introspect(&exec, "posts").await.expect("introspect posts");
    assert!(live.has_foreign_key("userId", "users"));
    assert!(!live.has_foreign_key("userId", "posts"));

    let columns = names(&exec, r#"PRAGMA table_info("users")"#).await;
    assert_eq!(
        columns,
        ["id", "email", "name", "createdAt", "updatedAt", "deletedAt"]
    );

    let indexes = names(&exec, r#"PRAGMA index_list("users")"#).await;
    for expected in [
        "uniq_users_email",
        "idx_users_name",
        "idx_users_createdAt",
        "idx_users_updatedAt",
        "idx_users_deletedAt",
    ] {
        assert!(indexes.contains(&expected.to_owned()), "missing {expected}: {indexes:?}");
    }
}

#[tokio::test]
async fn creates_undeclared_junction_tables() {
    let exec = setup().await;
    let schema = blog_schema();
    let state = MigrationState::new();
    let migrator = Migrator::new(&exec, &schema, &state);
    migrator.ensure_model("Group").await.expect("groups");
    migrator.ensure_model("User").await.expect("users");

    let columns = names(&exec, r#"PRAGMA table_info("user_groups")"#).await;
    assert_eq!(columns, ["userId", "groupId"]);

    for sql in [
        r#"INSERT INTO "users" ("email", "name") VALUES ('a@x.io', 'a')"#,
        r#"INSERT INTO "groups" ("label") VALUES ('staff')"#,
        r#"INSERT INTO "user_groups" ("userId", "groupId") VALUES (1, 1)"#,
    ] {
        exec.execute(sql, &[]).await.expect(sql);
    }
    let duplicate = exec
        .execute(
            r#"INSERT INTO "user_groups" ("userId", "groupId") VALUES (1, 1)"#,
            &[],
        )
        .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn backfills_defaults_on_existing_tables() {
    let exec = setup().await;
    exec.execute(r#"CREATE TABLE "flags" ("id" INTEGER PRIMARY KEY AUTOINCREMENT, "label" TEXT)"#, &[])
        .await
        .expect("seed table");
    exec.execute(r#"INSERT INTO "flags" ("label") VALUES ('a')"#, &[])
        .await
        .expect("seed row");

    let schema = Schema::new([(
        "Flag",
        ModelSchema::new("flags")
            .field("label", FieldDescriptor::new("string"))
            .field(
                "enabled",
                FieldDescriptor::new("boolean").with_meta(FieldMeta {
                    default: Some(json!(true)),
                    ..FieldMeta::default()
                }),
            ),
    )])
    .expect("schema");
    let state = MigrationState::new();
    let report = Migrator::new(&exec, &schema, &state)
        .ensure_model("Flag")
        .await
        .expect("migrate");
    assert!(report.added_columns.contains(&"enabled".to_owned()));
    assert!(report.statements.iter().any(|sql| sql.starts_with("UPDATE")));

    let rows = QueryBuilder::new(&exec, &schema, "Flag")
        .expect("builder")
        .get()
        .await
        .expect("select");
    assert_eq!(rows[0]["enabled"], json!(true));
    assert!(rows[0]["createdAt"].is_number());
}

#[tokio::test]
async fn failed_statements_are_counted_not_raised() {
    let exec = setup().await;
    let schema = Schema::new([(
        "Broken",
        ModelSchema::new("broken").field(
            "total",
            FieldDescriptor::new("number").with_meta(FieldMeta {
                check: Some("total >".to_owned()),
                ..FieldMeta::default()
            }),
        ),
    )])
    .expect("schema");
    let state = MigrationState::new();
    let report = Migrator::new(&exec, &schema, &state)
        .ensure_model("Broken")
        .await
        .expect("ddl failures do not abort");
    assert!(report.failures >= 1);
    assert!(!report.is_clean());
}

#[tokio::test]
async fn unknown_models_are_rejected() {
    let exec = setup().await;
    let schema = blog_schema();
    let state = MigrationState::new();
    let err = Migrator::new(&exec, &schema, &state)
        .ensure_model("Comment")
        .await
        .unwrap_err();
    assert!(matches!(err, QuarryError::ModelNotFound(name) if name == "Comment"));
}
