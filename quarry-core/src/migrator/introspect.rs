//! Live table metadata read through the executor.
//!
//! Every function here propagates executor errors: a migration cannot proceed
//! without knowing what already exists.

use std::collections::HashSet;

use serde_json::Value;

use crate::dialect::Dialect;
use crate::error::QuarryResult;
use crate::executor::Execute;
use crate::row::Row;

/// A foreign key as reported by SQLite's `PRAGMA foreign_key_list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveForeignKey {
    pub column: String,
    pub ref_table: String,
}

/// What the database currently holds for one table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveTable {
    pub exists: bool,
    pub columns: Vec<String>,
    /// Index names.
    pub indexes: HashSet<String>,
    /// Constraint names, lowercased.
    pub constraints: HashSet<String>,
    pub foreign_keys: Vec<LiveForeignKey>,
}

impl LiveTable {
    /// Returns true if a column with this name exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Returns true if an index with this name exists.
    pub fn has_index(&self, name: &str) -> bool {
        self.indexes.contains(name)
    }

    /// Returns true if a constraint with this name exists (case-insensitive).
    pub fn has_constraint(&self, name: &str) -> bool {
        self.constraints.contains(&name.to_ascii_lowercase())
    }

    /// Returns true if SQLite reports a foreign key from `column` to `ref_table`.
    pub fn has_foreign_key(&self, column: &str, ref_table: &str) -> bool {
        self.foreign_keys
            .iter()
            .any(|fk| fk.column == column && fk.ref_table == ref_table)
    }
}

fn string_field(row: &Row, key: &str) -> Option<String> {
    row.get(key)
        .or_else(|| row.get(&key.to_ascii_uppercase()))
        .and_then(Value::as_str)
        .map(str::to_owned)
}

async fn fetch<E: Execute>(executor: &E, sql: &str, table: &str) -> QuarryResult<Vec<Row>> {
    let params = if executor.dialect().binds_table_name() {
        vec![Value::String(table.to_owned())]
    } else {
        Vec::new()
    };
    tracing::debug!(operation = "introspect", sql = %sql, table, "quarry migration");
    Ok(executor.execute(sql, &params).await?.rows)
}

async fn names<E: Execute>(executor: &E, sql: &str, table: &str) -> QuarryResult<Vec<String>> {
    Ok(fetch(executor, sql, table)
        .await?
        .iter()
        .filter_map(|row| string_field(row, "name"))
        .collect())
}

/// Returns true if `table` exists.
pub async fn table_exists<E: Execute>(executor: &E, table: &str) -> QuarryResult<bool> {
    let dialect = executor.dialect();
    let sql = dialect.table_exists_sql();
    let params = [Value::String(table.to_owned())];
    tracing::debug!(operation = "introspect", sql = %sql, table, "quarry migration");
    Ok(!executor.execute(&sql, &params).await?.rows.is_empty())
}

/// Reads columns, indexes and constraints of `table`.
pub async fn introspect<E: Execute>(executor: &E, table: &str) -> QuarryResult<LiveTable> {
    if !table_exists(executor, table).await? {
        return Ok(LiveTable::default());
    }
    let dialect = executor.dialect();
    let columns = names(executor, &dialect.columns_sql(table), table).await?;
    let indexes = names(executor, &dialect.indexes_sql(table), table)
        .await?
        .into_iter()
        .collect();

    let mut live = LiveTable {
        exists: true,
        columns,
        indexes,
        ..LiveTable::default()
    };
    let constraints = fetch(executor, &dialect.constraints_sql(table), table).await?;
    match dialect {
        Dialect::Sqlite => {
            live.foreign_keys = constraints
                .iter()
                .filter_map(|row| {
                    Some(LiveForeignKey {
                        column: string_field(row, "from")?,
                        ref_table: string_field(row, "table")?,
                    })
                })
                .collect();
        }
        Dialect::Postgres | Dialect::MySql => {
            live.constraints = constraints
                .iter()
                .filter_map(|row| string_field(row, "name"))
                .map(|name| name.to_ascii_lowercase())
                .collect();
        }
    }
    Ok(live)
}

/// Returns true if the PostgreSQL type `name` exists.
pub async fn enum_type_exists<E: Execute>(executor: &E, name: &str) -> QuarryResult<bool> {
    let dialect = executor.dialect();
    let sql = format!(
        "SELECT typname AS name FROM pg_type WHERE typname = {}",
        dialect.placeholder(0)
    );
    let params = [Value::String(name.to_owned())];
    Ok(!executor.execute(&sql, &params).await?.rows.is_empty())
}
