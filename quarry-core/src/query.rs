use std::fmt::{self, Write};
use std::str::FromStr;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::dialect::Dialect;
use crate::error::{QuarryError, QuarryResult};
use crate::executor::Execute;
use crate::migrator::column::enum_type_name;
use crate::preload::PreloadState;
use crate::row::{Row, normalize_booleans, remove_excluded_from_row};
use crate::schema::{ModelSchema, Schema};

#[cfg(feature = "metrics")]
pub(crate) fn record_query_metrics(operation: &str, table: &str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    let labels = [
        ("operation", operation.to_owned()),
        ("table", table.to_owned()),
    ];
    metrics::histogram!("quarry.query.duration_ms", &labels).record(elapsed_ms);
    metrics::counter!("quarry.query.count", &labels).increment(1);
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record_query_metrics(_operation: &str, _table: &str, _elapsed: Duration) {}

/// Comparison operators accepted by [`QueryBuilder::r#where`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `LIKE`
    Like,
    /// `ILIKE` (emulated where the engine lacks it)
    ILike,
    /// `IN`
    In,
    /// `NOT IN`
    NotIn,
}

impl Operator {
    /// Returns the SQL spelling.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::ILike => "ILIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
        }
    }
}

impl FromStr for Operator {
    type Err = QuarryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "=" | "==" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "LIKE" => Ok(Self::Like),
            "ILIKE" => Ok(Self::ILike),
            "IN" => Ok(Self::In),
            "NOT IN" => Ok(Self::NotIn),
            _ => Err(QuarryError::InvalidOperator(s.to_owned())),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Sort direction for [`QueryBuilder::order_by`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending.
    #[default]
    Asc,
    /// Descending.
    Desc,
}

impl Direction {
    /// Returns the SQL keyword.
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JoinKind {
    Inner,
    Left,
}

/// One `JOIN ... ON left = right` clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinClause {
    kind: JoinKind,
    table: String,
    left: String,
    right: String,
}

/// A single WHERE predicate.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpr {
    /// Raw SQL. When `value` is set, the first `?` in `sql` becomes its placeholder.
    Raw { sql: String, value: Option<Value> },
    /// `column <op> value`.
    Compare {
        column: String,
        op: Operator,
        value: Value,
    },
}

/// Accumulated query intent. Read, never reset, by `get`/`first`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryIntent {
    pub selects: Vec<String>,
    pub filters: Vec<FilterExpr>,
    /// `"column DIR"` tokens.
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub joins: Vec<JoinClause>,
    pub preloads: Vec<String>,
    pub excludes: Vec<String>,
}

/// Argument of [`QueryBuilder::first`].
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Condition {
    /// No extra condition.
    #[default]
    None,
    /// One predicate per key: equality, or `{ "op": ..., "value": ... }`.
    Fields(Row),
    /// Raw SQL; known column names are quoted.
    Raw(String),
}

impl From<Row> for Condition {
    fn from(row: Row) -> Self {
        Self::Fields(row)
    }
}

impl From<&str> for Condition {
    fn from(sql: &str) -> Self {
        Self::Raw(sql.to_owned())
    }
}

impl From<String> for Condition {
    fn from(sql: String) -> Self {
        Self::Raw(sql)
    }
}

impl From<Value> for Condition {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Self::Fields(map),
            Value::String(sql) => Self::Raw(sql),
            _ => Self::None,
        }
    }
}

/// A schema-aware query builder for one model.
///
/// `QueryBuilder` accumulates select, filter, order, pagination, join, preload and
/// exclude intent through chained calls, then renders dialect-correct SQL and runs
/// it through an [`Execute`] implementation. Result rows come back as plain JSON
/// objects with relations attached, booleans coerced and excluded fields removed.
pub struct QueryBuilder<'a, E> {
    pub(crate) executor: &'a E,
    pub(crate) schema: &'a Schema,
    pub(crate) model_name: String,
    pub(crate) model: &'a ModelSchema,
    pub(crate) intent: QueryIntent,
}

impl<E> Clone for QueryBuilder<'_, E> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor,
            schema: self.schema,
            model_name: self.model_name.clone(),
            model: self.model,
            intent: self.intent.clone(),
        }
    }
}

impl<E> fmt::Debug for QueryBuilder<'_, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("model", &self.model_name)
            .field("table", &self.model.table)
            .field("intent", &self.intent)
            .finish()
    }
}

impl<'a, E: Execute> QueryBuilder<'a, E> {
    /// Starts a query on `model` (a model name, or failing that a table name).
    pub fn new(executor: &'a E, schema: &'a Schema, model: &str) -> QuarryResult<Self> {
        let (model_name, model_schema) = match schema.get(model) {
            Some(found) => (model.to_owned(), found),
            None => schema
                .model_by_table(model)
                .map(|(name, found)| (name.to_owned(), found))
                .ok_or_else(|| QuarryError::ModelNotFound(model.to_owned()))?,
        };
        Ok(Self::scoped(executor, schema, model_name, model_schema))
    }

    pub(crate) fn scoped(
        executor: &'a E,
        schema: &'a Schema,
        model_name: String,
        model: &'a ModelSchema,
    ) -> Self {
        Self {
            executor,
            schema,
            model_name,
            model,
            intent: QueryIntent::default(),
        }
    }

    /// Returns the model name this builder targets.
    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Returns the accumulated intent.
    pub fn intent(&self) -> &QueryIntent {
        &self.intent
    }

    fn dialect(&self) -> Dialect {
        self.executor.dialect()
    }

    /// Placeholder `index` for a value bound to `column`.
    ///
    /// Native enum columns need the parameter cast to their type; PostgreSQL has
    /// no `enum = text` operator.
    fn bind_placeholder(&self, column: &str, index: usize) -> String {
        let dialect = self.dialect();
        let placeholder = dialect.placeholder(index);
        if !dialect.supports_native_enum() {
            return placeholder;
        }
        let name = match column.split_once('.') {
            Some((table, name)) if table == self.model.table => name,
            Some(_) => return placeholder,
            None => column,
        };
        match self.model.fields.get(name) {
            Some(field) if !field.meta.enum_values.is_empty() => format!(
                "{placeholder}::{}",
                dialect.quote_identifier(&enum_type_name(&self.model.table, name))
            ),
            _ => placeholder,
        }
    }

    /// Restricts the selected columns.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intent.selects.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Adds a `column <op> value` predicate.
    pub fn r#where(mut self, column: impl Into<String>, op: Operator, value: impl Into<Value>) -> Self {
        self.intent.filters.push(FilterExpr::Compare {
            column: column.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Adds a predicate with an operator given in its SQL spelling.
    pub fn where_op(
        self,
        column: impl Into<String>,
        op: &str,
        value: impl Into<Value>,
    ) -> QuarryResult<Self> {
        let op = op.parse()?;
        Ok(self.r#where(column, op, value))
    }

    /// Adds a raw SQL predicate.
    pub fn where_raw(mut self, sql: impl Into<String>) -> Self {
        self.intent.filters.push(FilterExpr::Raw {
            sql: sql.into(),
            value: None,
        });
        self
    }

    /// Adds a raw SQL predicate binding one value at its `?` marker.
    pub fn where_raw_bind(mut self, sql: impl Into<String>, value: impl Into<Value>) -> Self {
        self.intent.filters.push(FilterExpr::Raw {
            sql: sql.into(),
            value: Some(value.into()),
        });
        self
    }

    /// Adds a case-insensitive LIKE predicate.
    pub fn case_insensitive_like(self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.r#where(column, Operator::ILike, Value::String(pattern.into()))
    }

    /// Appends an ORDER BY term.
    pub fn order_by(mut self, column: impl AsRef<str>, direction: Direction) -> Self {
        self.intent
            .order_by
            .push(format!("{} {}", column.as_ref(), direction.as_sql()));
        self
    }

    /// Sets the maximum number of rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.intent.limit = Some(limit);
        self
    }

    /// Skips the given number of rows.
    pub fn offset(mut self, offset: u64) -> Self {
        self.intent.offset = Some(offset);
        self
    }

    /// Adds `INNER JOIN table ON left = right`.
    pub fn join(mut self, table: impl Into<String>, left: impl Into<String>, right: impl Into<String>) -> Self {
        self.intent.joins.push(JoinClause {
            kind: JoinKind::Inner,
            table: table.into(),
            left: left.into(),
            right: right.into(),
        });
        self
    }

    /// Adds `LEFT JOIN table ON left = right`.
    pub fn left_join(
        mut self,
        table: impl Into<String>,
        left: impl Into<String>,
        right: impl Into<String>,
    ) -> Self {
        self.intent.joins.push(JoinClause {
            kind: JoinKind::Left,
            table: table.into(),
            left: left.into(),
            right: right.into(),
        });
        self
    }

    /// Removes fields from the result. Dotted paths reach into preloaded relations.
    pub fn exclude<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.intent.excludes.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Eager-loads a relation. Dotted paths chain through nested relations.
    pub fn preload(mut self, path: impl Into<String>) -> Self {
        self.intent.preloads.push(path.into());
        self
    }

    pub(crate) fn with_preloads(mut self, paths: Vec<String>) -> Self {
        self.intent.preloads = paths;
        self
    }

    /// Renders the SELECT statement and its parameters.
    pub fn build_statement(&self) -> (String, Vec<Value>) {
        let dialect = self.dialect();
        let mut sql = String::with_capacity(128);
        let mut params = Vec::with_capacity(self.intent.filters.len());

        sql.push_str("SELECT ");
        if self.intent.selects.is_empty() {
            sql.push('*');
        } else {
            let columns = self
                .intent
                .selects
                .iter()
                .map(|c| quote_column(dialect, c))
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(&columns);
        }
        let _ = write!(sql, " FROM {}", dialect.quote_identifier(&self.model.table));
        self.render_joins_into(&mut sql);
        self.render_where_clause_into(&mut sql, &mut params);
        self.render_tail_into(&mut sql);
        (sql, params)
    }

    fn render_joins_into(&self, sql: &mut String) {
        let dialect = self.dialect();
        for join in &self.intent.joins {
            let keyword = match join.kind {
                JoinKind::Inner => "INNER JOIN",
                JoinKind::Left => "LEFT JOIN",
            };
            let _ = write!(
                sql,
                " {keyword} {} ON {} = {}",
                dialect.quote_identifier(&join.table),
                dialect.quote_qualified(&join.left),
                dialect.quote_qualified(&join.right)
            );
        }
    }

    fn render_tail_into(&self, sql: &mut String) {
        let dialect = self.dialect();
        if !self.intent.order_by.is_empty() {
            let terms = self
                .intent
                .order_by
                .iter()
                .map(|token| render_order_term(dialect, token))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = write!(sql, " ORDER BY {terms}");
        }
        if let Some(limit) = self.intent.limit {
            let _ = write!(sql, " LIMIT {limit}");
        }
        if let Some(offset) = self.intent.offset {
            // SQLite and MySQL reject OFFSET without LIMIT.
            if self.intent.limit.is_none() {
                match dialect {
                    Dialect::Sqlite => sql.push_str(" LIMIT -1"),
                    Dialect::MySql => sql.push_str(" LIMIT 18446744073709551615"),
                    Dialect::Postgres => {}
                }
            }
            let _ = write!(sql, " OFFSET {offset}");
        }
    }

    /// Appends ` WHERE ...` for the accumulated filters. Placeholder indices
    /// continue from `params.len()`.
    pub(crate) fn render_where_clause_into(&self, sql: &mut String, params: &mut Vec<Value>) {
        let dialect = self.dialect();
        let mut first_clause = true;

        for filter in &self.intent.filters {
            if first_clause {
                sql.push_str(" WHERE ");
                first_clause = false;
            } else {
                sql.push_str(" AND ");
            }
            match filter {
                FilterExpr::Raw { sql: raw, value } => match value {
                    Some(value) if raw.contains('?') => {
                        let placeholder = dialect.placeholder(params.len());
                        sql.push_str(&raw.replacen('?', &placeholder, 1));
                        params.push(value.clone());
                    }
                    _ => sql.push_str(raw),
                },
                FilterExpr::Compare { column, op, value } => {
                    render_compare(dialect, sql, params, column, *op, value, |i| {
                        self.bind_placeholder(column, i)
                    });
                }
            }
        }
    }

    async fn run(&self, operation: &str, sql: &str, params: &[Value]) -> QuarryResult<crate::executor::QueryOutput> {
        tracing::debug!(
            operation,
            sql = %sql,
            params = params.len(),
            "quarry query"
        );
        let start = Instant::now();
        let out = self.executor.execute(sql, params).await?;
        record_query_metrics(operation, &self.model.table, start.elapsed());
        Ok(out)
    }

    pub(crate) async fn fetch_base(&self) -> QuarryResult<Vec<Row>> {
        let (sql, params) = self.build_statement();
        Ok(self.run("select", &sql, &params).await?.rows)
    }

    /// Runs the query and returns the post-processed rows.
    ///
    /// Preloads resolve first, then boolean fields are coerced, then excluded
    /// fields are removed. The intent is left untouched, so calling `get` again
    /// re-runs the same statement.
    #[tracing::instrument(skip(self), fields(model = %self.model_name, table = %self.model.table))]
    pub async fn get(&self) -> QuarryResult<Vec<Row>> {
        let mut state = PreloadState::default();
        self.get_with_state(&mut state).await
    }

    /// Like [`get`](Self::get), recording visited relations in `state`.
    pub async fn get_with_state(&self, state: &mut PreloadState) -> QuarryResult<Vec<Row>> {
        let mut rows = self.fetch_base().await?;
        if !self.intent.preloads.is_empty() {
            self.apply_preloads(&mut rows, state).await?;
        }
        for row in &mut rows {
            normalize_booleans(self.model, row);
            remove_excluded_from_row(row, &self.intent.excludes);
        }
        Ok(rows)
    }

    /// Runs the query narrowed by `condition` and returns the first row.
    ///
    /// Forces `LIMIT 1` unless a limit is already set.
    #[tracing::instrument(skip(self, condition), fields(model = %self.model_name))]
    pub async fn first(&self, condition: impl Into<Condition>) -> QuarryResult<Option<Row>> {
        let mut scoped = self.clone();
        match condition.into() {
            Condition::None => {}
            Condition::Fields(fields) => {
                for (column, value) in fields {
                    scoped.intent.filters.push(field_condition(column, value)?);
                }
            }
            Condition::Raw(raw) => {
                let columns: Vec<&str> = self.model.fields.keys().map(String::as_str).collect();
                scoped.intent.filters.push(FilterExpr::Raw {
                    sql: quote_known_columns(self.dialect(), &raw, &columns),
                    value: None,
                });
            }
        }
        if scoped.intent.limit.is_none() {
            scoped.intent.limit = Some(1);
        }
        Ok(scoped.get().await?.into_iter().next())
    }

    /// Counts the rows matching the filters and joins.
    #[tracing::instrument(skip(self), fields(table = %self.model.table))]
    pub async fn count(&self) -> QuarryResult<u64> {
        let dialect = self.dialect();
        let mut sql = format!(
            "SELECT COUNT(*) AS {} FROM {}",
            dialect.quote_identifier("count"),
            dialect.quote_identifier(&self.model.table)
        );
        let mut params = Vec::new();
        self.render_joins_into(&mut sql);
        self.render_where_clause_into(&mut sql, &mut params);
        let out = self.run("count", &sql, &params).await?;
        let count = out
            .rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(|v| v.as_u64().or_else(|| v.as_str().and_then(|s| s.parse().ok())))
            .unwrap_or_default();
        Ok(count)
    }

    /// Inserts one row and returns it as stored.
    ///
    /// Keys that are not declared fields are skipped. PostgreSQL reads the row back
    /// with `RETURNING *`; other engines re-select it by primary key.
    #[tracing::instrument(skip(self, values), fields(table = %self.model.table))]
    pub async fn insert(&self, values: Row) -> QuarryResult<Row> {
        let dialect = self.dialect();
        let table = dialect.quote_identifier(&self.model.table);
        let (names, params): (Vec<&str>, Vec<Value>) = values
            .iter()
            .filter(|(name, _)| self.model.has_field(name))
            .map(|(name, value)| (name.as_str(), value.clone()))
            .unzip();

        let mut sql = if names.is_empty() {
            match dialect {
                Dialect::MySql => format!("INSERT INTO {table} () VALUES ()"),
                Dialect::Sqlite | Dialect::Postgres => format!("INSERT INTO {table} DEFAULT VALUES"),
            }
        } else {
            let columns = names
                .iter()
                .map(|name| dialect.quote_identifier(name))
                .collect::<Vec<_>>()
                .join(", ");
            let placeholders = names
                .iter()
                .enumerate()
                .map(|(i, name)| self.bind_placeholder(name, i))
                .collect::<Vec<_>>()
                .join(", ");
            format!("INSERT INTO {table} ({columns}) VALUES ({placeholders})")
        };
        if dialect == Dialect::Postgres {
            sql.push_str(" RETURNING *");
        }

        let out = self.run("insert", &sql, &params).await?;
        if let Some(mut row) = out.rows.into_iter().next() {
            normalize_booleans(self.model, &mut row);
            return Ok(row);
        }

        let pk = self.model.primary_key();
        let id = match values.get(pk) {
            Some(value) if !value.is_null() => Some(value.clone()),
            _ => out.last_insert_id.map(Value::from),
        };
        let Some(id) = id else {
            return Ok(values);
        };
        let mut lookup = Row::new();
        lookup.insert(pk.to_owned(), id);
        let fresh = Self::scoped(self.executor, self.schema, self.model_name.clone(), self.model);
        Ok(fresh.first(lookup).await?.unwrap_or(values))
    }

    /// Updates the rows matching the filters and returns the affected count.
    ///
    /// Fields flagged `on_update_now` are refreshed unless assigned explicitly.
    #[tracing::instrument(skip(self, values), fields(table = %self.model.table))]
    pub async fn update(&self, values: Row) -> QuarryResult<u64> {
        if self.intent.filters.is_empty() {
            return Err(QuarryError::EmptyCondition("update"));
        }
        let dialect = self.dialect();
        let mut assignments = Vec::new();
        let mut params = Vec::new();
        for (name, value) in &values {
            if !self.model.has_field(name) {
                continue;
            }
            assignments.push(format!(
                "{} = {}",
                dialect.quote_identifier(name),
                self.bind_placeholder(name, params.len())
            ));
            params.push(value.clone());
        }
        if assignments.is_empty() {
            return Err(QuarryError::EmptyCondition("update"));
        }
        for (name, field) in &self.model.fields {
            if field.meta.on_update_now && !values.contains_key(name) {
                assignments.push(format!(
                    "{} = {}",
                    dialect.quote_identifier(name),
                    dialect.current_timestamp(field.is_temporal())
                ));
            }
        }

        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_identifier(&self.model.table),
            assignments.join(", ")
        );
        self.render_where_clause_into(&mut sql, &mut params);
        let out = self.run("update", &sql, &params).await?;
        Ok(out.changes.unwrap_or_default())
    }

    /// Deletes the rows matching the filters and returns the affected count.
    #[tracing::instrument(skip(self), fields(table = %self.model.table))]
    pub async fn delete(&self) -> QuarryResult<u64> {
        if self.intent.filters.is_empty() {
            return Err(QuarryError::EmptyCondition("delete"));
        }
        let mut sql = format!(
            "DELETE FROM {}",
            self.dialect().quote_identifier(&self.model.table)
        );
        let mut params = Vec::new();
        self.render_where_clause_into(&mut sql, &mut params);
        let out = self.run("delete", &sql, &params).await?;
        Ok(out.changes.unwrap_or_default())
    }
}

fn quote_column(dialect: Dialect, column: &str) -> String {
    let is_expression = column
        .chars()
        .any(|c| matches!(c, '(' | ' ' | '"' | '`'));
    if is_expression {
        column.to_owned()
    } else {
        dialect.quote_qualified(column)
    }
}

fn render_order_term(dialect: Dialect, token: &str) -> String {
    let token = token.trim();
    if let Some((column, direction)) = token.rsplit_once(char::is_whitespace) {
        let upper = direction.to_ascii_uppercase();
        if upper == "ASC" || upper == "DESC" {
            return format!("{} {upper}", quote_column(dialect, column.trim()));
        }
    }
    quote_column(dialect, token)
}

fn render_compare(
    dialect: Dialect,
    sql: &mut String,
    params: &mut Vec<Value>,
    column: &str,
    op: Operator,
    value: &Value,
    placeholder: impl Fn(usize) -> String,
) {
    let quoted = dialect.quote_qualified(column);
    match op {
        Operator::In | Operator::NotIn => {
            let values = match value {
                Value::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            if values.is_empty() {
                sql.push_str(if op == Operator::In { "1=0" } else { "1=1" });
                return;
            }
            let _ = write!(sql, "{quoted} {} (", op.as_sql());
            for (i, v) in values.into_iter().enumerate() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push_str(&placeholder(params.len()));
                params.push(v);
            }
            sql.push(')');
        }
        Operator::ILike => {
            sql.push_str(&dialect.case_insensitive_like(column, params.len()));
            params.push(value.clone());
        }
        Operator::Eq if value.is_null() => {
            let _ = write!(sql, "{quoted} IS NULL");
        }
        Operator::Ne if value.is_null() => {
            let _ = write!(sql, "{quoted} IS NOT NULL");
        }
        _ => {
            let _ = write!(sql, "{quoted} {} {}", op.as_sql(), placeholder(params.len()));
            params.push(value.clone());
        }
    }
}

fn field_condition(column: String, value: Value) -> QuarryResult<FilterExpr> {
    if let Value::Object(spec) = &value {
        if let (Some(op), Some(inner)) = (spec.get("op").and_then(Value::as_str), spec.get("value")) {
            return Ok(FilterExpr::Compare {
                column,
                op: op.parse()?,
                value: inner.clone(),
            });
        }
    }
    Ok(FilterExpr::Compare {
        column,
        op: Operator::Eq,
        value,
    })
}

/// Quotes every bare occurrence of a known column name in `sql`.
///
/// String literals and already-quoted identifiers are copied untouched; names match
/// on whole words only.
pub fn quote_known_columns(dialect: Dialect, sql: &str, columns: &[&str]) -> String {
    let mut out = String::with_capacity(sql.len() + 16);
    let mut chars = sql.char_indices().peekable();

    while let Some((start, c)) = chars.next() {
        match c {
            '\'' | '"' | '`' => {
                out.push(c);
                while let Some((_, inner)) = chars.next() {
                    out.push(inner);
                    if inner == c {
                        if chars.peek().is_some_and(|&(_, next)| next == c) {
                            if let Some((_, escaped)) = chars.next() {
                                out.push(escaped);
                            }
                            continue;
                        }
                        break;
                    }
                }
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = start + c.len_utf8();
                while let Some(&(i, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        end = i + next.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let word = &sql[start..end];
                if columns.contains(&word) {
                    out.push_str(&dialect.quote_identifier(word));
                } else {
                    out.push_str(word);
                }
            }
            c if c.is_ascii_digit() => {
                out.push(c);
                while let Some(&(_, next)) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' || next == '.' {
                        out.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
            }
            other => out.push(other),
        }
    }
    out
}
