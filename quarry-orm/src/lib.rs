//! # Quarry ORM
//!
//! Quarry drives a relational database from a schema description instead of
//! derive macros: describe your tables, fields and relations once, let
//! [`Quarry::sync`] create or extend the tables, then query with a fluent builder
//! that eager-loads relations in batches.
//!
//! ## Key features
//!
//! - **Additive sync**: missing tables, columns, indexes, foreign keys and
//!   junction tables are created; nothing is ever dropped.
//! - **Batched preloads**: one `WHERE ... IN` query per relation, nested paths
//!   like `"posts.comments.author"`, cycles resolved without re-querying.
//! - **Field exclusion**: `exclude(["password", "author.email"])`.
//! - **Multi-database**: SQLite, PostgreSQL and MySQL through sqlx.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use quarry_orm::prelude::*;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let schema = Schema::from_json(r#"{
//!     "User": {
//!         "table": "users",
//!         "fields": { "name": { "type": "string" } },
//!         "relations": [
//!             { "fieldName": "posts", "kind": "one-to-many", "targetModel": "Post", "foreignKey": "userId" }
//!         ]
//!     },
//!     "Post": {
//!         "table": "posts",
//!         "fields": { "title": { "type": "string" }, "userId": { "type": "number" } }
//!     }
//! }"#)?;
//!
//! let config = QuarryConfig::new("sqlite:app.db?mode=rwc");
//! let db = Quarry::<SqlxExecutor<quarry_orm::sqlx::Sqlite>>::connect(&config, schema).await?;
//! db.sync().await?;
//!
//! let users = db
//!     .query("User")?
//!     .preload("posts")
//!     .exclude(["posts.createdAt"])
//!     .get()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub use quarry_core::*;

pub mod prelude {
    pub use quarry_core::prelude::*;

    pub use crate::{Migrator, SqlxExecutor};
}
