use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use sqlx::{Column, Database, Row as _, ValueRef};

use crate::dialect::{Dialect, SqlDialect};
use crate::error::QuarryResult;
use crate::row::Row;

/// What one statement produced.
///
/// Row-returning statements fill `rows`; writes report `changes` and, where the
/// driver knows it, `last_insert_id`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutput {
    /// Result rows (empty for writes).
    pub rows: Vec<Row>,
    /// Number of affected rows, for writes.
    pub changes: Option<u64>,
    /// ID of the row inserted last, for writes.
    pub last_insert_id: Option<i64>,
}

impl QueryOutput {
    /// Output of a row-returning statement.
    pub fn rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            ..Self::default()
        }
    }

    /// Output of a write.
    pub fn changes(changes: u64, last_insert_id: Option<i64>) -> Self {
        Self {
            rows: Vec::new(),
            changes: Some(changes),
            last_insert_id,
        }
    }
}

/// The single entry point through which every statement reaches the database.
///
/// Implementations receive the SQL text (placeholders already in the dialect's
/// style) and the positional parameters. Errors propagate unchanged to the caller
/// of the query builder or migrator.
pub trait Execute: Send + Sync {
    /// The SQL dialect statements must be rendered in.
    fn dialect(&self) -> Dialect;

    /// Runs one statement.
    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> impl Future<Output = QuarryResult<QueryOutput>> + Send + 'a;
}

impl<E: Execute> Execute for &E {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> impl Future<Output = QuarryResult<QueryOutput>> + Send + 'a {
        (**self).execute(sql, params)
    }
}

impl<E: Execute> Execute for Arc<E> {
    fn dialect(&self) -> Dialect {
        (**self).dialect()
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> impl Future<Output = QuarryResult<QueryOutput>> + Send + 'a {
        (**self).execute(sql, params)
    }
}

/// Returns true if `sql` is a statement whose result is a row set.
pub fn returns_rows(sql: &str) -> bool {
    let head = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == '(')
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        head.as_str(),
        "SELECT" | "PRAGMA" | "WITH" | "SHOW" | "EXPLAIN" | "VALUES" | "DESCRIBE"
    ) || sql.to_ascii_uppercase().contains(" RETURNING ")
}

/// Translation between dynamic JSON values and a sqlx driver's wire types.
pub trait JsonCodec: SqlDialect {
    /// Binds one parameter.
    fn bind_value<'q>(
        query: sqlx::query::Query<'q, Self, <Self as Database>::Arguments<'q>>,
        value: &Value,
    ) -> sqlx::query::Query<'q, Self, <Self as Database>::Arguments<'q>>;

    /// Decodes the column at `index` into a JSON value.
    fn decode_column(row: &<Self as Database>::Row, index: usize) -> Value;
}

macro_rules! impl_json_codec {
    ($db:ty) => {
        impl JsonCodec for $db {
            fn bind_value<'q>(
                query: sqlx::query::Query<'q, Self, <Self as Database>::Arguments<'q>>,
                value: &Value,
            ) -> sqlx::query::Query<'q, Self, <Self as Database>::Arguments<'q>> {
                match value {
                    Value::Null => query.bind(Option::<String>::None),
                    Value::Bool(b) => query.bind(*b),
                    Value::Number(n) => match n.as_i64() {
                        Some(i) => query.bind(i),
                        None => query.bind(n.as_f64().unwrap_or_default()),
                    },
                    Value::String(s) => query.bind(s.clone()),
                    Value::Array(_) | Value::Object(_) => {
                        query.bind(sqlx::types::Json(value.clone()))
                    }
                }
            }

            fn decode_column(row: &<Self as Database>::Row, index: usize) -> Value {
                match row.try_get_raw(index) {
                    Ok(raw) if !raw.is_null() => {}
                    _ => return Value::Null,
                }
                if let Ok(v) = row.try_get::<i64, _>(index) {
                    return Value::from(v);
                }
                if let Ok(v) = row.try_get::<i32, _>(index) {
                    return Value::from(v);
                }
                if let Ok(v) = row.try_get::<i16, _>(index) {
                    return Value::from(v);
                }
                if let Ok(v) = row.try_get::<f64, _>(index) {
                    return Value::from(v);
                }
                if let Ok(v) = row.try_get::<f32, _>(index) {
                    return Value::from(f64::from(v));
                }
                if let Ok(v) = row.try_get::<bool, _>(index) {
                    return Value::Bool(v);
                }
                if let Ok(v) = row.try_get::<String, _>(index) {
                    return Value::String(v);
                }
                if let Ok(v) = row.try_get::<chrono::DateTime<chrono::Utc>, _>(index) {
                    return Value::String(v.to_rfc3339());
                }
                if let Ok(v) = row.try_get::<chrono::NaiveDateTime, _>(index) {
                    return Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string());
                }
                if let Ok(v) = row.try_get::<chrono::NaiveDate, _>(index) {
                    return Value::String(v.to_string());
                }
                if let Ok(v) = row.try_get::<uuid::Uuid, _>(index) {
                    return Value::String(v.to_string());
                }
                if let Ok(v) = row.try_get::<sqlx::types::Json<Value>, _>(index) {
                    return v.0;
                }
                tracing::debug!(
                    column = row.columns()[index].name(),
                    "quarry: undecodable column, returning null"
                );
                Value::Null
            }
        }
    };
}

#[cfg(feature = "sqlite")]
impl_json_codec!(sqlx::Sqlite);
#[cfg(feature = "postgres")]
impl_json_codec!(sqlx::Postgres);
#[cfg(feature = "mysql")]
impl_json_codec!(sqlx::MySql);

/// [`Execute`] backed by a sqlx connection pool.
#[derive(Debug)]
pub struct SqlxExecutor<DB: Database> {
    pool: sqlx::Pool<DB>,
}

impl<DB: Database> Clone for SqlxExecutor<DB> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
        }
    }
}

impl<DB: Database> SqlxExecutor<DB> {
    /// Wraps a pool.
    pub fn new(pool: sqlx::Pool<DB>) -> Self {
        Self { pool }
    }

    /// Returns the wrapped pool.
    pub fn pool(&self) -> &sqlx::Pool<DB> {
        &self.pool
    }

    /// Unwraps the pool.
    pub fn into_pool(self) -> sqlx::Pool<DB> {
        self.pool
    }
}

impl<DB: Database> From<sqlx::Pool<DB>> for SqlxExecutor<DB> {
    fn from(pool: sqlx::Pool<DB>) -> Self {
        Self::new(pool)
    }
}

fn decode_row<DB: JsonCodec>(row: &DB::Row) -> Row {
    row.columns()
        .iter()
        .enumerate()
        .map(|(index, column)| (column.name().to_owned(), DB::decode_column(row, index)))
        .collect()
}

impl<DB> Execute for SqlxExecutor<DB>
where
    DB: JsonCodec,
    DB::Connection: Send,
    for<'c> &'c mut DB::Connection: sqlx::Executor<'c, Database = DB>,
    for<'q> DB::Arguments<'q>: sqlx::IntoArguments<'q, DB>,
{
    fn dialect(&self) -> Dialect {
        DB::DIALECT
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> impl Future<Output = QuarryResult<QueryOutput>> + Send + 'a {
        async move {
            tracing::debug!(
                db = DB::DIALECT.name(),
                sql = %sql,
                params = params.len(),
                "quarry execute"
            );
            let mut query = sqlx::query::<DB>(sql);
            for value in params {
                query = DB::bind_value(query, value);
            }

            if returns_rows(sql) {
                let rows = query.fetch_all(&self.pool).await?;
                let rows: Vec<Row> = rows.iter().map(decode_row::<DB>).collect();
                let is_write = !sql.trim_start().to_ascii_uppercase().starts_with("SELECT");
                let changes = is_write.then(|| rows.len() as u64);
                Ok(QueryOutput {
                    rows,
                    changes,
                    last_insert_id: None,
                })
            } else {
                let res = query.execute(&self.pool).await?;
                Ok(QueryOutput::changes(
                    DB::rows_affected(&res),
                    DB::last_insert_id(&res),
                ))
            }
        }
    }
}

/// [`Execute`] backed by an async closure.
///
/// Useful for plugging in a driver Quarry does not wrap, or for scripted tests.
pub struct FnExecutor<F> {
    dialect: Dialect,
    f: F,
}

impl<F> FnExecutor<F> {
    /// Wraps `f`, rendering statements in `dialect`.
    pub const fn new(dialect: Dialect, f: F) -> Self {
        Self { dialect, f }
    }
}

impl<F> std::fmt::Debug for FnExecutor<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnExecutor")
            .field("dialect", &self.dialect)
            .finish_non_exhaustive()
    }
}

impl<F, Fut> Execute for FnExecutor<F>
where
    F: Fn(String, Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = QuarryResult<QueryOutput>> + Send + 'static,
{
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn execute<'a>(
        &'a self,
        sql: &'a str,
        params: &'a [Value],
    ) -> impl Future<Output = QuarryResult<QueryOutput>> + Send + 'a {
        (self.f)(sql.to_owned(), params.to_vec())
    }
}
