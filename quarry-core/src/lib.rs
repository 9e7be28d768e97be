//! Schema-driven query building, relation preloading and additive migrations.
//!
//! Quarry works from a [`Schema`] description (tables, fields, relations) and a
//! single [`Execute`] implementation. [`Quarry`] ties the two together:
//!
//! ```no_run
//! # async fn demo() -> quarry_core::QuarryResult<()> {
//! use quarry_core::prelude::*;
//!
//! let schema = Schema::from_json(r#"{
//!     "User": { "table": "users", "fields": { "name": { "type": "string" } } }
//! }"#)?;
//! let config = QuarryConfig::new("sqlite:app.db?mode=rwc");
//! let db = Quarry::<quarry_core::SqlxExecutor<quarry_core::sqlx::Sqlite>>::connect(&config, schema).await?;
//! db.sync().await?;
//! let users = db.query("User")?.limit(10).get().await?;
//! # Ok(())
//! # }
//! ```

pub use sqlx;

pub mod config;
pub mod dialect;
pub mod error;
pub mod executor;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod migrator;
pub mod preload;
pub mod query;
pub mod row;
pub mod schema;
pub mod test_utils;

use std::sync::Arc;

pub use config::QuarryConfig;
pub use dialect::{Dialect, SqlDialect};
pub use error::{QuarryError, QuarryResult};
pub use executor::{Execute, FnExecutor, JsonCodec, QueryOutput, SqlxExecutor};
pub use migrator::{MigrationOptions, MigrationReport, MigrationState, Migrator};
pub use preload::PreloadState;
pub use query::{Condition, Direction, FilterExpr, Operator, QueryBuilder, QueryIntent};
pub use row::Row;
pub use schema::{
    FieldDescriptor, FieldMeta, ModelSchema, RelationDescriptor, RelationKind, RelationMeta, Schema,
};

pub mod prelude {
    pub use crate::{
        Condition, Direction, Execute, FieldDescriptor, FieldMeta, ModelSchema, Operator, Quarry,
        QuarryConfig, QuarryError, QuarryResult, RelationDescriptor, RelationKind, Row, Schema,
    };
}

/// A connection wrapper: one executor, one shared schema and the migration
/// state of this connection.
pub struct Quarry<E> {
    executor: E,
    schema: Arc<Schema>,
    state: MigrationState,
    options: MigrationOptions,
}

impl<E> std::fmt::Debug for Quarry<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quarry")
            .field("models", &self.schema.len())
            .field("state", &self.state)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<E: Execute> Quarry<E> {
    pub fn new(executor: E, schema: impl Into<Arc<Schema>>) -> Self {
        Self {
            executor,
            schema: schema.into(),
            state: MigrationState::new(),
            options: MigrationOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }

    pub fn executor(&self) -> &E {
        &self.executor
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn dialect(&self) -> Dialect {
        self.executor.dialect()
    }

    /// Starts a query on a model (by model name or table name).
    pub fn query(&self, model: &str) -> QuarryResult<QueryBuilder<'_, E>> {
        QueryBuilder::new(&self.executor, &self.schema, model)
    }

    /// A migrator sharing this connection's migration state.
    pub fn migrator(&self) -> Migrator<'_, E> {
        Migrator::new(&self.executor, &self.schema, &self.state).with_options(self.options)
    }

    /// Forgets which tables were migrated, so the next `sync` inspects them again.
    pub fn reset_migrations(&self) {
        self.state.reset();
    }

    /// Runs `ensure_table` for every model, in declaration order.
    pub async fn sync(&self) -> QuarryResult<Vec<MigrationReport>> {
        let migrator = self.migrator();
        let mut reports = Vec::with_capacity(self.schema.len());
        for (name, _) in self.schema.models() {
            reports.push(migrator.ensure_model(name).await?);
        }
        Ok(reports)
    }

    /// Inserts `row` into `model` and returns the stored row.
    pub async fn insert(&self, model: &str, row: Row) -> QuarryResult<Row> {
        self.query(model)?.insert(row).await
    }
}

impl<DB> Quarry<SqlxExecutor<DB>>
where
    SqlxExecutor<DB>: Execute,
    DB: SqlDialect,
{
    /// Opens a pool for `config` and wraps it.
    pub async fn connect(config: &QuarryConfig, schema: impl Into<Arc<Schema>>) -> QuarryResult<Self> {
        config.validate()?;
        if config.dialect() != DB::DIALECT {
            return Err(QuarryError::Config(format!(
                "`{}` is not a {} url",
                config.database_url,
                DB::DIALECT
            )));
        }
        let pool = sqlx::pool::PoolOptions::<DB>::new()
            .max_connections(config.max_connections)
            .connect(&config.database_url)
            .await?;
        tracing::debug!(db = DB::DIALECT.name(), max_connections = config.max_connections, "quarry connected");
        Ok(Self::new(SqlxExecutor::new(pool), schema).with_options(config.migration_options()))
    }
}

#[cfg(all(test, feature = "sqlite"))]
mod tests {
    use serde_json::json;

    use super::*;

    fn schema() -> Schema {
        Schema::from_json(
            r#"{
                "User": {
                    "table": "users",
                    "fields": {
                        "name": { "type": "string" },
                        "active": { "type": "boolean", "meta": { "default": true } }
                    }
                }
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn sync_then_insert_and_read_back() {
        // Every in-memory connection is its own database.
        let config = QuarryConfig {
            max_connections: 1,
            ..QuarryConfig::new("sqlite::memory:")
        };
        let db = Quarry::<SqlxExecutor<sqlx::Sqlite>>::connect(&config, schema())
            .await
            .unwrap();
        let reports = db.sync().await.unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].created);
        assert!(reports[0].is_clean());

        let row = json!({ "name": "ada" }).as_object().cloned().unwrap();
        let stored = db.insert("User", row).await.unwrap();
        assert_eq!(stored["name"], "ada");
        assert_eq!(stored["active"], true);

        let again = db.sync().await.unwrap();
        assert!(again[0].skipped);
    }

    #[tokio::test]
    async fn connect_rejects_mismatched_urls() {
        let err = Quarry::<SqlxExecutor<sqlx::Sqlite>>::connect(&QuarryConfig::new("postgres://x/y"), schema())
            .await
            .unwrap_err();
        assert!(matches!(err, QuarryError::Config(_)));
    }
}
