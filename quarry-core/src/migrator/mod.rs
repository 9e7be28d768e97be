//! Additive, idempotent schema synchronization.
//!
//! [`Migrator::ensure_table`] brings one table in line with its declared fields:
//! it creates the table when absent, otherwise adds the missing columns, then
//! installs indexes, foreign keys and one-to-one uniqueness, creates junction
//! tables for many-to-many relations and backfills defaults. It never drops or
//! renames anything.
//!
//! Introspection errors propagate. Each DDL or backfill statement runs through
//! [`Migrator::best_effort`], which logs a failure and moves on; the outcome is
//! recorded in the returned [`MigrationReport`].

pub mod column;
pub mod introspect;

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use futures_util::future::join_all;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dialect::Dialect;
use crate::error::QuarryResult;
use crate::executor::{Execute, QueryOutput};
use crate::schema::{FieldDescriptor, FieldMeta, Ownership, RelationDescriptor, RelationKind, Schema};

use column::{ColumnSql, column_sql, default_literal, enum_type_name, quote_literal};
use introspect::LiveTable;

#[cfg(feature = "metrics")]
fn record_migration_metrics(table: &str, report: &MigrationReport) {
    let labels = [("table", table.to_owned())];
    metrics::counter!("quarry.migration.statements", &labels).increment(report.statements.len() as u64);
    metrics::counter!("quarry.migration.failures", &labels).increment(report.failures as u64);
}

#[cfg(not(feature = "metrics"))]
fn record_migration_metrics(_table: &str, _report: &MigrationReport) {}

/// Tables already processed through one connection wrapper.
///
/// `ensure_table` consults this set first and returns immediately for a table it
/// has already handled. A schema change made after that point therefore needs a
/// fresh state (or [`MigrationState::forget`]) to be picked up.
#[derive(Debug, Default)]
pub struct MigrationState {
    migrated: Mutex<HashSet<String>>,
}

impl MigrationState {
    /// Creates an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `table` as processed. Returns false if it already was.
    pub fn mark(&self, table: &str) -> bool {
        self.migrated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_owned())
    }

    /// Returns true if `table` was processed.
    pub fn is_migrated(&self, table: &str) -> bool {
        self.migrated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table)
    }

    /// Forgets `table`, so the next `ensure_table` inspects it again.
    pub fn forget(&self, table: &str) {
        self.migrated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(table);
    }

    /// Forgets every table.
    pub fn reset(&self) {
        self.migrated
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Migration switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationOptions {
    /// Synthesize `createdAt`, `updatedAt` and `deletedAt` when not declared.
    pub timestamps: bool,
    /// Fill NULLs in pre-existing tables with declared defaults.
    pub backfill_defaults: bool,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            timestamps: true,
            backfill_defaults: true,
        }
    }
}

/// Outcome of one `ensure_table` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    pub table: String,
    /// The call returned early because the table was already processed.
    pub skipped: bool,
    /// The table did not exist and a `CREATE TABLE` was issued.
    pub created: bool,
    /// Columns issued through `ALTER TABLE ... ADD COLUMN`.
    pub added_columns: Vec<String>,
    /// Every DDL and backfill statement attempted, in order.
    pub statements: Vec<String>,
    /// How many of `statements` failed.
    pub failures: usize,
}

impl MigrationReport {
    fn new(table: &str) -> Self {
        Self {
            table: table.to_owned(),
            ..Self::default()
        }
    }

    fn record(&mut self, sql: String, result: QuarryResult<QueryOutput>) {
        if let Err(err) = result {
            tracing::warn!(
                table = %self.table,
                sql = %sql,
                error = %err,
                "quarry migration statement failed, continuing"
            );
            self.failures += 1;
        }
        self.statements.push(sql);
    }

    /// Returns true if every attempted statement succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// A foreign key to install on the table being migrated.
#[derive(Debug, Clone, PartialEq, Eq)]
struct ForeignKey {
    column: String,
    ref_table: String,
    ref_column: String,
    on_delete: Option<String>,
    on_update: Option<String>,
    match_kind: Option<String>,
    deferrable: bool,
    unique: bool,
}

impl ForeignKey {
    fn to(column: &str, ref_table: &str, ref_column: &str) -> Self {
        Self {
            column: column.to_owned(),
            ref_table: ref_table.to_owned(),
            ref_column: ref_column.to_owned(),
            on_delete: None,
            on_update: None,
            match_kind: None,
            deferrable: false,
            unique: false,
        }
    }

    fn constraint_name(&self, table: &str) -> String {
        format!("fk_{table}_{}", self.column)
    }

    fn references_sql(&self, dialect: Dialect) -> String {
        let mut sql = format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            dialect.quote_identifier(&self.column),
            dialect.quote_identifier(&self.ref_table),
            dialect.quote_identifier(&self.ref_column)
        );
        if let Some(kind) = self.match_kind.as_deref().filter(|_| dialect != Dialect::MySql) {
            sql.push_str(" MATCH ");
            sql.push_str(kind);
        }
        if let Some(action) = &self.on_delete {
            sql.push_str(" ON DELETE ");
            sql.push_str(action);
        }
        if let Some(action) = &self.on_update {
            sql.push_str(" ON UPDATE ");
            sql.push_str(action);
        }
        if self.deferrable && dialect != Dialect::MySql {
            sql.push_str(" DEFERRABLE INITIALLY DEFERRED");
        }
        sql
    }
}

fn timestamp_field(index: bool, nullable: bool, on_update_now: bool) -> FieldDescriptor {
    FieldDescriptor::new("Date").with_meta(FieldMeta {
        index,
        nullable,
        on_update_now,
        default: (!nullable).then(|| Value::String("CURRENT_TIMESTAMP".to_owned())),
        ..FieldMeta::default()
    })
}

/// Schema synchronizer bound to one executor, schema and state.
pub struct Migrator<'a, E> {
    executor: &'a E,
    schema: &'a Schema,
    state: &'a MigrationState,
    options: MigrationOptions,
}

impl<E> std::fmt::Debug for Migrator<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<'a, E: Execute> Migrator<'a, E> {
    /// Creates a migrator with default options.
    pub fn new(executor: &'a E, schema: &'a Schema, state: &'a MigrationState) -> Self {
        Self {
            executor,
            schema,
            state,
            options: MigrationOptions::default(),
        }
    }

    /// Replaces the options.
    pub fn with_options(mut self, options: MigrationOptions) -> Self {
        self.options = options;
        self
    }

    fn dialect(&self) -> Dialect {
        self.executor.dialect()
    }

    /// Runs one statement, logging instead of returning a failure.
    async fn best_effort(&self, report: &mut MigrationReport, sql: String) {
        tracing::debug!(operation = "ddl", sql = %sql, table = %report.table, "quarry migration");
        let result = self.executor.execute(&sql, &[]).await;
        report.record(sql, result);
    }

    /// Migrates the declared model `name`.
    pub async fn ensure_model(&self, name: &str) -> QuarryResult<MigrationReport> {
        let model = self.schema.model(name)?;
        self.ensure_table(&model.table, &model.fields, &model.relations)
            .await
    }

    /// Brings `table` in line with `fields` and `relations`.
    #[tracing::instrument(skip(self, fields, relations), fields(dialect = %self.dialect()))]
    pub async fn ensure_table(
        &self,
        table: &str,
        fields: &IndexMap<String, FieldDescriptor>,
        relations: &[RelationDescriptor],
    ) -> QuarryResult<MigrationReport> {
        let mut report = MigrationReport::new(table);
        if !self.state.mark(table) {
            report.skipped = true;
            return Ok(report);
        }
        match self.migrate(table, fields, relations, &mut report).await {
            Ok(()) => {
                record_migration_metrics(table, &report);
                tracing::info!(
                    operation = "ensure_table",
                    table,
                    created = report.created,
                    added = report.added_columns.len(),
                    statements = report.statements.len(),
                    failures = report.failures,
                    "quarry migration"
                );
                Ok(report)
            }
            Err(err) => {
                self.state.forget(table);
                Err(err)
            }
        }
    }

    async fn migrate(
        &self,
        table: &str,
        declared: &IndexMap<String, FieldDescriptor>,
        relations: &[RelationDescriptor],
        report: &mut MigrationReport,
    ) -> QuarryResult<()> {
        let dialect = self.dialect();
        let fields = self.with_timestamps(declared);
        let live = introspect::introspect(self.executor, table).await?;

        let pending: Vec<(&String, &FieldDescriptor)> = fields
            .iter()
            .filter(|(name, _)| !live.exists || !live.has_column(name))
            .collect();

        if dialect.supports_native_enum() {
            for (name, field) in &pending {
                self.ensure_enum_type(table, name, field, report).await?;
            }
        }

        let foreign_keys = self.foreign_keys(table, &fields, relations);
        let columns: Vec<ColumnSql> = pending
            .iter()
            .map(|(name, field)| column_sql(dialect, table, name, field))
            .collect();

        if live.exists {
            for column in &columns {
                let sql = format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    dialect.quote_identifier(table),
                    column.alter_sql(dialect)
                );
                self.best_effort(report, sql).await;
                report.added_columns.push(column.name.clone());
            }
        } else {
            let mut definitions: Vec<String> = columns.iter().map(|c| c.create_sql(dialect)).collect();
            if dialect == Dialect::Sqlite {
                definitions.extend(foreign_keys.iter().map(|fk| fk.references_sql(dialect)));
            }
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} ({})",
                dialect.quote_identifier(table),
                definitions.join(", ")
            );
            self.best_effort(report, sql).await;
            report.created = true;
        }

        if dialect == Dialect::Postgres {
            for column in &columns {
                if let Some(comment) = &column.comment {
                    let sql = format!(
                        "COMMENT ON COLUMN {}.{} IS {}",
                        dialect.quote_identifier(table),
                        dialect.quote_identifier(&column.name),
                        quote_literal(comment)
                    );
                    self.best_effort(report, sql).await;
                }
            }
        }

        self.ensure_indexes(table, &fields, &live, report).await;
        self.ensure_foreign_keys(table, &foreign_keys, &live, report).await;
        for relation in relations {
            if relation.kind == RelationKind::ManyToMany {
                self.ensure_junction(table, declared, relation, report).await?;
            }
        }

        if live.exists && self.options.backfill_defaults {
            self.backfill(table, &fields, report).await;
        }
        Ok(())
    }

    fn with_timestamps(
        &self,
        declared: &IndexMap<String, FieldDescriptor>,
    ) -> IndexMap<String, FieldDescriptor> {
        let mut fields = declared.clone();
        if self.options.timestamps {
            for (name, field) in [
                ("createdAt", timestamp_field(true, false, false)),
                ("updatedAt", timestamp_field(true, false, true)),
                ("deletedAt", timestamp_field(true, true, false)),
            ] {
                if !fields.contains_key(name) {
                    fields.insert(name.to_owned(), field);
                }
            }
        }
        fields
    }

    async fn ensure_enum_type(
        &self,
        table: &str,
        name: &str,
        field: &FieldDescriptor,
        report: &mut MigrationReport,
    ) -> QuarryResult<()> {
        if field.meta.enum_values.is_empty() {
            return Ok(());
        }
        let type_name = enum_type_name(table, name);
        if introspect::enum_type_exists(self.executor, &type_name).await? {
            return Ok(());
        }
        let values = field
            .meta
            .enum_values
            .iter()
            .map(|v| quote_literal(v))
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "CREATE TYPE {} AS ENUM ({values})",
            self.dialect().quote_identifier(&type_name)
        );
        self.best_effort(report, sql).await;
        Ok(())
    }

    async fn ensure_indexes(
        &self,
        table: &str,
        fields: &IndexMap<String, FieldDescriptor>,
        live: &LiveTable,
        report: &mut MigrationReport,
    ) {
        let dialect = self.dialect();
        for (name, field) in fields {
            if field.is_primary() {
                continue;
            }
            let wanted = [
                (field.meta.index, format!("idx_{table}_{name}"), ""),
                (field.meta.unique, format!("uniq_{table}_{name}"), "UNIQUE "),
            ];
            for (flagged, index_name, unique) in wanted {
                if !flagged || live.has_index(&index_name) {
                    continue;
                }
                let sql = format!(
                    "CREATE {unique}INDEX {}{} ON {} ({})",
                    if dialect == Dialect::MySql { "" } else { "IF NOT EXISTS " },
                    dialect.quote_identifier(&index_name),
                    dialect.quote_identifier(table),
                    dialect.quote_identifier(name)
                );
                self.best_effort(report, sql).await;
            }
        }
    }

    /// Resolves a `foreign_key_target` (`Model`, `table` or `table.column`).
    fn resolve_target(&self, target: &str) -> (String, String) {
        if let Some((table, column)) = target.split_once('.') {
            return (table.to_owned(), column.to_owned());
        }
        if let Some(model) = self.schema.get(target) {
            return (model.table.clone(), model.primary_key().to_owned());
        }
        match self.schema.model_by_table(target) {
            Some((_, model)) => (target.to_owned(), model.primary_key().to_owned()),
            None => (target.to_owned(), crate::schema::DEFAULT_PRIMARY_KEY.to_owned()),
        }
    }

    fn foreign_keys(
        &self,
        table: &str,
        fields: &IndexMap<String, FieldDescriptor>,
        relations: &[RelationDescriptor],
    ) -> Vec<ForeignKey> {
        let mut keys: Vec<ForeignKey> = Vec::new();
        for (name, field) in fields {
            if let Some(target) = &field.meta.foreign_key_target {
                let (ref_table, ref_column) = self.resolve_target(target);
                keys.push(ForeignKey::to(name, &ref_table, &ref_column));
            }
        }

        for relation in relations {
            if !matches!(relation.kind, RelationKind::ManyToOne | RelationKind::OneToOne) {
                continue;
            }
            let Some(target) = self.schema.get(&relation.target_model) else {
                tracing::debug!(relation = %relation.field_name, "quarry migration: target model missing");
                continue;
            };
            let fk = relation.foreign_key();
            let owned = match self.schema.get(&relation.source_model) {
                Some(source) => source.ownership(relation, target) == Ownership::Parent,
                None => fields.contains_key(fk),
            };
            if !owned || !fields.contains_key(fk) {
                continue;
            }
            let mut key = ForeignKey::to(fk, &target.table, target.primary_key());
            key.on_delete = relation.meta.on_delete.clone();
            key.on_update = relation.meta.on_update.clone();
            key.match_kind = relation.meta.match_kind.clone();
            key.deferrable = relation.meta.deferrable;
            key.unique = relation.kind == RelationKind::OneToOne;
            match keys.iter_mut().find(|k| k.column == key.column) {
                Some(existing) => *existing = key,
                None => keys.push(key),
            }
        }

        // Relations declared on other models whose foreign key lives here.
        for (_, source) in self.schema.models() {
            for relation in &source.relations {
                let Some(target) = self.schema.get(&relation.target_model) else {
                    continue;
                };
                let child_owned = match relation.kind {
                    RelationKind::OneToMany => true,
                    RelationKind::OneToOne => source.ownership(relation, target) == Ownership::Child,
                    RelationKind::ManyToOne | RelationKind::ManyToMany => false,
                };
                let fk = relation.foreign_key();
                if !child_owned
                    || target.table != table
                    || !fields.contains_key(fk)
                    || keys.iter().any(|k| k.column == fk)
                {
                    continue;
                }
                let mut key = ForeignKey::to(fk, &source.table, source.primary_key());
                key.on_delete = relation.meta.on_delete.clone();
                key.on_update = relation.meta.on_update.clone();
                key.unique = relation.kind == RelationKind::OneToOne;
                keys.push(key);
            }
        }
        keys
    }

    async fn ensure_foreign_keys(
        &self,
        table: &str,
        keys: &[ForeignKey],
        live: &LiveTable,
        report: &mut MigrationReport,
    ) {
        let dialect = self.dialect();
        let quoted = dialect.quote_identifier(table);

        if !dialect.supports_alter_constraints() {
            for key in keys {
                if live.exists && !live.has_foreign_key(&key.column, &key.ref_table) {
                    tracing::debug!(
                        table,
                        column = %key.column,
                        "quarry migration: sqlite cannot add a foreign key to an existing table"
                    );
                }
                let index_name = format!("uniq_{table}_{}", key.column);
                if key.unique && !live.has_index(&index_name) {
                    let sql = format!(
                        "CREATE UNIQUE INDEX IF NOT EXISTS {} ON {quoted} ({})",
                        dialect.quote_identifier(&index_name),
                        dialect.quote_identifier(&key.column)
                    );
                    self.best_effort(report, sql).await;
                }
            }
            return;
        }

        let mut statements = Vec::new();
        for key in keys {
            let name = key.constraint_name(table);
            if !live.has_constraint(&name) {
                statements.push(format!(
                    "ALTER TABLE {quoted} ADD CONSTRAINT {} {}",
                    dialect.quote_identifier(&name),
                    key.references_sql(dialect)
                ));
            }
            let unique_name = format!("uq_{table}_{}", key.column);
            if key.unique && !live.has_constraint(&unique_name) {
                statements.push(format!(
                    "ALTER TABLE {quoted} ADD CONSTRAINT {} UNIQUE ({})",
                    dialect.quote_identifier(&unique_name),
                    dialect.quote_identifier(&key.column)
                ));
            }
        }
        let results = join_all(statements.iter().map(|sql| {
            tracing::debug!(operation = "ddl", sql = %sql, table, "quarry migration");
            self.executor.execute(sql, &[])
        }))
        .await;
        for (sql, result) in statements.into_iter().zip(results) {
            report.record(sql, result);
        }
    }

    /// Creates the junction table of a many-to-many relation unless it is a
    /// declared model (declared models are migrated on their own).
    async fn ensure_junction(
        &self,
        table: &str,
        declared: &IndexMap<String, FieldDescriptor>,
        relation: &RelationDescriptor,
        report: &mut MigrationReport,
    ) -> QuarryResult<()> {
        let dialect = self.dialect();
        let Some(through) = relation.through.as_deref() else {
            return Ok(());
        };
        if self.schema.get(through).is_some() || self.schema.model_by_table(through).is_some() {
            return Ok(());
        }
        if introspect::table_exists(self.executor, through).await? {
            return Ok(());
        }
        let Some(target) = self.schema.get(&relation.target_model) else {
            return Ok(());
        };

        let source_pk = self
            .schema
            .get(&relation.source_model)
            .map_or(crate::schema::DEFAULT_PRIMARY_KEY, |m| m.primary_key());
        let key_type = |field: Option<&FieldDescriptor>| match field {
            Some(f) if f.ty.to_ascii_lowercase().contains("string") => match dialect {
                Dialect::Sqlite => "TEXT",
                Dialect::Postgres | Dialect::MySql => "VARCHAR(255)",
            },
            _ => "INTEGER",
        };
        let fk = relation.foreign_key();
        let rk = relation.related_key.as_deref().unwrap_or_default();
        let mut source_key = ForeignKey::to(fk, table, source_pk);
        source_key.on_delete = Some("CASCADE".to_owned());
        let mut target_key = ForeignKey::to(rk, &target.table, target.primary_key());
        target_key.on_delete = Some("CASCADE".to_owned());

        let mut definitions = vec![
            format!(
                "{} {} NOT NULL",
                dialect.quote_identifier(fk),
                key_type(declared.get(source_pk))
            ),
            format!(
                "{} {} NOT NULL",
                dialect.quote_identifier(rk),
                key_type(target.fields.get(target.primary_key()))
            ),
            format!(
                "UNIQUE ({}, {})",
                dialect.quote_identifier(fk),
                dialect.quote_identifier(rk)
            ),
        ];
        if dialect == Dialect::Sqlite {
            definitions.push(source_key.references_sql(dialect));
            definitions.push(target_key.references_sql(dialect));
        }
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            dialect.quote_identifier(through),
            definitions.join(", ")
        );
        self.best_effort(report, sql).await;

        if dialect.supports_alter_constraints() {
            let empty = LiveTable::default();
            self.ensure_foreign_keys(through, &[source_key, target_key], &empty, report)
                .await;
        }
        Ok(())
    }

    async fn backfill(
        &self,
        table: &str,
        fields: &IndexMap<String, FieldDescriptor>,
        report: &mut MigrationReport,
    ) {
        let dialect = self.dialect();
        for (name, field) in fields {
            let Some(default) = field.meta.default.as_ref().filter(|d| !d.is_null()) else {
                continue;
            };
            if field.meta.generated_expression.is_some() {
                continue;
            }
            let column = dialect.quote_identifier(name);
            let sql = format!(
                "UPDATE {} SET {column} = {} WHERE {column} IS NULL",
                dialect.quote_identifier(table),
                default_literal(dialect, default, field.is_temporal())
            );
            self.best_effort(report, sql).await;
        }
    }
}
