use std::fmt;

use sqlx::Database;

/// The SQL conventions of one database engine.
///
/// Every statement Quarry generates goes through a `Dialect`: bind placeholders,
/// identifier quoting, case-insensitive matching and the handful of DDL fragments
/// the migrator needs. Dialects are plain values so they can be looked up by engine
/// name at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Dialect {
    /// `?` placeholders, double-quoted identifiers.
    #[default]
    Sqlite,
    /// `$n` placeholders, double-quoted identifiers, native `ILIKE`.
    Postgres,
    /// `?` placeholders, backtick-quoted identifiers.
    MySql,
}

impl Dialect {
    /// Resolves an engine name (`"sqlite"`, `"postgres"`, `"mysql"`, ...).
    ///
    /// Unrecognized names fall back to [`Dialect::Sqlite`].
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" | "pg" => Self::Postgres,
            "mysql" | "mariadb" => Self::MySql,
            _ => Self::Sqlite,
        }
    }

    /// Resolves the dialect from a connection URL scheme.
    pub fn from_url(url: &str) -> Self {
        let scheme = url.split(':').next().unwrap_or_default();
        Self::from_name(scheme)
    }

    /// Returns the engine name.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
        }
    }

    /// Returns the bind placeholder for the zero-based parameter `index`.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Self::Postgres => format!("${}", index + 1),
            Self::Sqlite | Self::MySql => "?".to_owned(),
        }
    }

    /// Quotes a bare identifier, doubling any embedded quote character.
    pub fn quote_identifier(self, ident: &str) -> String {
        match self {
            Self::MySql => format!("`{}`", ident.replace('`', "``")),
            Self::Sqlite | Self::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
        }
    }

    /// Quotes a possibly qualified identifier (`table.column`, `table.*`, `*`).
    pub fn quote_qualified(self, ident: &str) -> String {
        ident
            .split('.')
            .map(|part| {
                if part == "*" {
                    part.to_owned()
                } else {
                    self.quote_identifier(part)
                }
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Returns a case-insensitive LIKE predicate for `column` bound at `index`.
    pub fn case_insensitive_like(self, column: &str, index: usize) -> String {
        let column = self.quote_qualified(column);
        let placeholder = self.placeholder(index);
        match self {
            Self::Postgres => format!("{column} ILIKE {placeholder}"),
            Self::Sqlite | Self::MySql => format!("LOWER({column}) LIKE LOWER({placeholder})"),
        }
    }

    /// Returns the SQL expression for "now" in a column of the given semantic type.
    ///
    /// SQLite stores date/time columns as integer epochs.
    pub const fn current_timestamp(self, temporal: bool) -> &'static str {
        match self {
            Self::Sqlite if temporal => "(strftime('%s','now'))",
            _ => "CURRENT_TIMESTAMP",
        }
    }

    /// Returns the column fragment for an auto-incrementing primary key.
    pub const fn auto_increment_pk(self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT",
            Self::Postgres => "SERIAL PRIMARY KEY",
            Self::MySql => "INTEGER AUTO_INCREMENT PRIMARY KEY",
        }
    }

    /// Returns the native type for date/time columns.
    pub const fn temporal_type(self) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER",
            Self::Postgres => "TIMESTAMP",
            Self::MySql => "DATETIME",
        }
    }

    /// Returns the native JSON type.
    pub const fn json_type(self) -> &'static str {
        match self {
            Self::Sqlite => "TEXT",
            Self::Postgres => "JSONB",
            Self::MySql => "JSON",
        }
    }

    /// Renders a boolean literal.
    pub const fn bool_literal(self, value: bool) -> &'static str {
        match (self, value) {
            (Self::Sqlite, true) => "1",
            (Self::Sqlite, false) => "0",
            (_, true) => "TRUE",
            (_, false) => "FALSE",
        }
    }

    /// Returns true if the engine has native enum types.
    pub const fn supports_native_enum(self) -> bool {
        matches!(self, Self::Postgres)
    }

    /// Returns true if constraints can be added with `ALTER TABLE ... ADD CONSTRAINT`.
    pub const fn supports_alter_constraints(self) -> bool {
        !matches!(self, Self::Sqlite)
    }

    /// Returns the keyword used for generated columns.
    pub const fn generated_storage(self) -> &'static str {
        match self {
            Self::Sqlite => "VIRTUAL",
            Self::Postgres | Self::MySql => "STORED",
        }
    }

    /// Returns the statement that lists a table by name (zero or one row).
    pub fn table_exists_sql(self) -> String {
        match self {
            Self::Sqlite => format!(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = {}",
                self.placeholder(0)
            ),
            Self::Postgres => format!(
                "SELECT table_name AS name FROM information_schema.tables WHERE table_schema = current_schema() AND table_name = {}",
                self.placeholder(0)
            ),
            Self::MySql => format!(
                "SELECT table_name AS name FROM information_schema.tables WHERE table_schema = DATABASE() AND table_name = {}",
                self.placeholder(0)
            ),
        }
    }

    /// Returns the statement listing the live columns of `table`.
    ///
    /// Every row carries the column name under `name`.
    pub fn columns_sql(self, table: &str) -> String {
        match self {
            Self::Sqlite => format!("PRAGMA table_info({})", self.quote_identifier(table)),
            Self::Postgres => format!(
                "SELECT column_name AS name FROM information_schema.columns WHERE table_schema = current_schema() AND table_name = {} ORDER BY ordinal_position",
                self.placeholder(0)
            ),
            Self::MySql => format!(
                "SELECT column_name AS name FROM information_schema.columns WHERE table_schema = DATABASE() AND table_name = {} ORDER BY ordinal_position",
                self.placeholder(0)
            ),
        }
    }

    /// Returns the statement listing the live index names of `table`.
    pub fn indexes_sql(self, table: &str) -> String {
        match self {
            Self::Sqlite => format!("PRAGMA index_list({})", self.quote_identifier(table)),
            Self::Postgres => format!(
                "SELECT indexname AS name FROM pg_indexes WHERE schemaname = current_schema() AND tablename = {}",
                self.placeholder(0)
            ),
            Self::MySql => format!(
                "SELECT DISTINCT index_name AS name FROM information_schema.statistics WHERE table_schema = DATABASE() AND table_name = {}",
                self.placeholder(0)
            ),
        }
    }

    /// Returns the statement listing the live constraint names of `table`.
    ///
    /// SQLite has no named post-hoc constraints; its foreign keys are reported by
    /// `PRAGMA foreign_key_list` and matched by column instead.
    pub fn constraints_sql(self, table: &str) -> String {
        match self {
            Self::Sqlite => format!("PRAGMA foreign_key_list({})", self.quote_identifier(table)),
            Self::Postgres => format!(
                "SELECT constraint_name AS name FROM information_schema.table_constraints WHERE table_schema = current_schema() AND table_name = {}",
                self.placeholder(0)
            ),
            Self::MySql => format!(
                "SELECT constraint_name AS name FROM information_schema.table_constraints WHERE table_schema = DATABASE() AND table_name = {}",
                self.placeholder(0)
            ),
        }
    }

    /// Returns true if the introspection statements for this engine take the
    /// table name as a bound parameter.
    pub const fn binds_table_name(self) -> bool {
        !matches!(self, Self::Sqlite)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Ties a sqlx database driver to its [`Dialect`].
///
/// Implemented for every driver enabled through cargo features so that
/// [`SqlxExecutor`](crate::executor::SqlxExecutor) can report its dialect and
/// translate query results.
pub trait SqlDialect: Database + Sized + Send + Sync {
    /// The SQL conventions of this driver.
    const DIALECT: Dialect;
    /// Returns the number of rows affected by a query result.
    fn rows_affected(res: &Self::QueryResult) -> u64;
    /// Returns the ID of the last inserted row, if the driver reports one.
    fn last_insert_id(res: &Self::QueryResult) -> Option<i64>;
}

#[cfg(feature = "sqlite")]
impl SqlDialect for sqlx::Sqlite {
    const DIALECT: Dialect = Dialect::Sqlite;

    fn rows_affected(res: &sqlx::sqlite::SqliteQueryResult) -> u64 {
        res.rows_affected()
    }
    fn last_insert_id(res: &sqlx::sqlite::SqliteQueryResult) -> Option<i64> {
        Some(res.last_insert_rowid())
    }
}

#[cfg(feature = "postgres")]
impl SqlDialect for sqlx::Postgres {
    const DIALECT: Dialect = Dialect::Postgres;

    fn rows_affected(res: &sqlx::postgres::PgQueryResult) -> u64 {
        res.rows_affected()
    }
    fn last_insert_id(_res: &sqlx::postgres::PgQueryResult) -> Option<i64> {
        None
    }
}

#[cfg(feature = "mysql")]
impl SqlDialect for sqlx::MySql {
    const DIALECT: Dialect = Dialect::MySql;

    fn rows_affected(res: &sqlx::mysql::MySqlQueryResult) -> u64 {
        res.rows_affected()
    }
    fn last_insert_id(res: &sqlx::mysql::MySqlQueryResult) -> Option<i64> {
        i64::try_from(res.last_insert_id()).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_follow_engine_convention() {
        assert_eq!(Dialect::Sqlite.placeholder(0), "?");
        assert_eq!(Dialect::MySql.placeholder(4), "?");
        assert_eq!(Dialect::Postgres.placeholder(0), "$1");
        assert_eq!(Dialect::Postgres.placeholder(9), "$10");
    }

    #[test]
    fn identifiers_are_quoted_and_escaped() {
        assert_eq!(Dialect::Sqlite.quote_identifier("name"), "\"name\"");
        assert_eq!(Dialect::Postgres.quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(Dialect::MySql.quote_identifier("na`me"), "`na``me`");
        assert_eq!(
            Dialect::MySql.quote_qualified("users.name"),
            "`users`.`name`"
        );
        assert_eq!(Dialect::Sqlite.quote_qualified("users.*"), "\"users\".*");
    }

    #[test]
    fn case_insensitive_like_uses_native_ilike_on_postgres() {
        assert_eq!(
            Dialect::Postgres.case_insensitive_like("name", 2),
            "\"name\" ILIKE $3"
        );
        assert_eq!(
            Dialect::Sqlite.case_insensitive_like("name", 0),
            "LOWER(\"name\") LIKE LOWER(?)"
        );
        assert_eq!(
            Dialect::MySql.case_insensitive_like("name", 0),
            "LOWER(`name`) LIKE LOWER(?)"
        );
    }

    #[test]
    fn unknown_engine_names_fall_back_to_sqlite() {
        assert_eq!(Dialect::from_name("oracle"), Dialect::Sqlite);
        assert_eq!(Dialect::from_name("PostgreSQL"), Dialect::Postgres);
        assert_eq!(Dialect::from_name("mariadb"), Dialect::MySql);
        assert_eq!(Dialect::from_url("postgres://localhost/db"), Dialect::Postgres);
        assert_eq!(Dialect::from_url("sqlite::memory:"), Dialect::Sqlite);
    }
}
