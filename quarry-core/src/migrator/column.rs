//! Column definitions rendered from field descriptors.

use serde_json::Value;

use crate::dialect::Dialect;
use crate::schema::FieldDescriptor;

/// Default length of string columns that need a bounded type.
const DEFAULT_VARCHAR: u32 = 255;

/// The rendered parts of one column definition.
///
/// Kept in parts so the same column can be written for `CREATE TABLE` and, with
/// the primary key fragment stripped, for `ALTER TABLE ... ADD COLUMN`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSql {
    pub name: String,
    pub sql_type: String,
    /// Primary key fragment appended after the type (`PRIMARY KEY`), or `None`
    /// when `sql_type` already carries it (auto-increment keys).
    pub primary_key: Option<&'static str>,
    pub auto_increment: bool,
    pub not_null: bool,
    pub default: Option<String>,
    /// False for expressions SQLite refuses in `ADD COLUMN` (e.g. `CURRENT_TIMESTAMP`).
    pub constant_default: bool,
    pub on_update: Option<&'static str>,
    pub generated: Option<String>,
    pub collate: Option<String>,
    pub check: Option<String>,
    pub comment: Option<String>,
}

impl ColumnSql {
    /// Renders the definition used inside `CREATE TABLE`.
    pub fn create_sql(&self, dialect: Dialect) -> String {
        self.render(dialect, true)
    }

    /// Renders the definition used by `ALTER TABLE ... ADD COLUMN`.
    ///
    /// Primary key and auto-increment fragments are dropped. A `NOT NULL` column
    /// without a usable default is added as nullable so that existing rows
    /// can be backfilled.
    pub fn alter_sql(&self, dialect: Dialect) -> String {
        let mut column = self.clone();
        if column.auto_increment {
            column.sql_type = "INTEGER".to_owned();
            column.auto_increment = false;
        }
        column.primary_key = None;
        if dialect == Dialect::Sqlite && !column.constant_default {
            column.default = None;
        }
        if column.default.is_none() {
            column.not_null = false;
        }
        column.render(dialect, false)
    }

    fn render(&self, dialect: Dialect, create: bool) -> String {
        let mut sql = format!("{} {}", dialect.quote_identifier(&self.name), self.sql_type);
        if create {
            if let Some(pk) = self.primary_key {
                sql.push(' ');
                sql.push_str(pk);
            }
        }
        let is_key = create && (self.auto_increment || self.primary_key.is_some());
        if let Some(expr) = &self.generated {
            sql.push_str(&format!(
                " GENERATED ALWAYS AS ({expr}) {}",
                dialect.generated_storage()
            ));
        } else {
            if self.not_null && !is_key {
                sql.push_str(" NOT NULL");
            }
            if let Some(default) = &self.default {
                sql.push_str(" DEFAULT ");
                sql.push_str(default);
            }
        }
        if let Some(on_update) = self.on_update {
            sql.push(' ');
            sql.push_str(on_update);
        }
        if let Some(collate) = &self.collate {
            sql.push_str(" COLLATE ");
            sql.push_str(collate);
        }
        if let Some(check) = &self.check {
            sql.push_str(&format!(" CHECK ({check})"));
        }
        if dialect == Dialect::MySql {
            if let Some(comment) = &self.comment {
                sql.push_str(" COMMENT ");
                sql.push_str(&quote_literal(comment));
            }
        }
        sql
    }
}

/// Returns the name of the native enum type backing `table.column`.
pub fn enum_type_name(table: &str, column: &str) -> String {
    format!("{table}_{column}_enum")
}

/// Quotes a string literal, doubling embedded single quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn is_now(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_uppercase().as_str(),
        "NOW" | "NOW()" | "CURRENT_TIMESTAMP" | "CURRENT_TIMESTAMP()"
    )
}

/// Renders a default value as a SQL literal.
pub fn default_literal(dialect: Dialect, value: &Value, temporal: bool) -> String {
    match value {
        Value::Null => "NULL".to_owned(),
        Value::Bool(b) => dialect.bool_literal(*b).to_owned(),
        Value::Number(n) => n.to_string(),
        Value::String(s) if is_now(s) => dialect.current_timestamp(temporal).to_owned(),
        Value::String(s) => quote_literal(s),
        Value::Array(_) | Value::Object(_) => quote_literal(&value.to_string()),
    }
}

/// Maps a field to its column type, following enum, JSON, date/time and then
/// generic type-name rules.
pub fn sql_type(dialect: Dialect, table: &str, name: &str, field: &FieldDescriptor) -> String {
    let meta = &field.meta;
    if !meta.enum_values.is_empty() {
        if dialect.supports_native_enum() {
            return dialect.quote_identifier(&enum_type_name(table, name));
        }
        let longest = meta.enum_values.iter().map(|v| v.len()).max().unwrap_or(1);
        let length = meta.length.unwrap_or(0).max(u32::try_from(longest).unwrap_or(DEFAULT_VARCHAR));
        return format!("VARCHAR({length})");
    }
    if meta.json {
        return dialect.json_type().to_owned();
    }
    if field.is_temporal() {
        return dialect.temporal_type().to_owned();
    }

    let ty = field.ty.to_ascii_lowercase();
    let base = if ty.contains("bool") {
        "BOOLEAN".to_owned()
    } else if ty.contains("float") || ty.contains("double") || ty.contains("decimal") || meta.precision.is_some()
    {
        match (meta.precision, meta.scale) {
            (Some(p), Some(s)) => numeric(dialect, format!("({p}, {s})")),
            (Some(p), None) => numeric(dialect, format!("({p})")),
            _ => match dialect {
                Dialect::Sqlite => "REAL".to_owned(),
                Dialect::Postgres => "DOUBLE PRECISION".to_owned(),
                Dialect::MySql => "DOUBLE".to_owned(),
            },
        }
    } else if ty.contains("number") || ty.contains("int") {
        "INTEGER".to_owned()
    } else if ty.contains("string") {
        let bounded = meta.length.or_else(|| {
            (dialect == Dialect::MySql && (meta.unique || meta.index || meta.primary_key))
                .then_some(DEFAULT_VARCHAR)
        });
        match bounded {
            Some(length) => format!("VARCHAR({length})"),
            None => "TEXT".to_owned(),
        }
    } else {
        "TEXT".to_owned()
    };

    if meta.array {
        match dialect {
            Dialect::Postgres => format!("{base}[]"),
            Dialect::Sqlite | Dialect::MySql => dialect.json_type().to_owned(),
        }
    } else {
        base
    }
}

fn numeric(dialect: Dialect, args: String) -> String {
    match dialect {
        Dialect::MySql => format!("DECIMAL{args}"),
        Dialect::Sqlite | Dialect::Postgres => format!("NUMERIC{args}"),
    }
}

/// Builds the full column definition for one field.
pub fn column_sql(dialect: Dialect, table: &str, name: &str, field: &FieldDescriptor) -> ColumnSql {
    let meta = &field.meta;
    let temporal = field.is_temporal();
    let auto_increment = meta.auto;
    let sql_type = if auto_increment {
        dialect.auto_increment_pk().to_owned()
    } else {
        sql_type(dialect, table, name, field)
    };
    let primary_key = (!auto_increment && meta.primary_key).then_some("PRIMARY KEY");

    let (default, constant_default) = match (&meta.default_expression, &meta.default) {
        (Some(expr), _) => (Some(expr.clone()), false),
        (None, Some(value)) if !value.is_null() => {
            let literal = default_literal(dialect, value, temporal);
            let constant = !value.as_str().is_some_and(is_now);
            (Some(literal), constant)
        }
        _ => (None, true),
    };

    let mut check = meta.check.clone();
    if !meta.enum_values.is_empty() && !dialect.supports_native_enum() {
        let allowed = meta
            .enum_values
            .iter()
            .map(|v| quote_literal(v))
            .collect::<Vec<_>>()
            .join(", ");
        let enum_check = format!("{} IN ({allowed})", dialect.quote_identifier(name));
        check = Some(match check {
            Some(existing) => format!("({existing}) AND {enum_check}"),
            None => enum_check,
        });
    }

    let on_update = (meta.on_update_now && dialect == Dialect::MySql).then_some("ON UPDATE CURRENT_TIMESTAMP");

    ColumnSql {
        name: name.to_owned(),
        sql_type,
        primary_key,
        auto_increment,
        not_null: !field.is_optional(),
        default,
        constant_default,
        on_update,
        generated: meta.generated_expression.clone(),
        collate: meta.collate.clone(),
        check,
        comment: meta.comment.clone(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::schema::FieldMeta;

    fn field(ty: &str, meta: FieldMeta) -> FieldDescriptor {
        FieldDescriptor::new(ty).with_meta(meta)
    }

    #[test]
    fn auto_increment_keys_follow_dialect() {
        let id = field(
            "number",
            FieldMeta {
                auto: true,
                primary_key: true,
                ..FieldMeta::default()
            },
        );
        assert_eq!(
            column_sql(Dialect::Sqlite, "users", "id", &id).create_sql(Dialect::Sqlite),
            "\"id\" INTEGER PRIMARY KEY AUTOINCREMENT"
        );
        assert_eq!(
            column_sql(Dialect::Postgres, "users", "id", &id).create_sql(Dialect::Postgres),
            "\"id\" SERIAL PRIMARY KEY"
        );
        assert_eq!(
            column_sql(Dialect::MySql, "users", "id", &id).alter_sql(Dialect::MySql),
            "`id` INTEGER"
        );
    }

    #[test]
    fn enums_use_native_type_or_check() {
        let role = field(
            "string",
            FieldMeta {
                enum_values: vec!["admin".to_owned(), "member".to_owned()],
                ..FieldMeta::default()
            },
        );
        let pg = column_sql(Dialect::Postgres, "users", "role", &role);
        assert_eq!(pg.sql_type, "\"users_role_enum\"");
        assert!(pg.check.is_none());

        let sqlite = column_sql(Dialect::Sqlite, "users", "role", &role);
        assert_eq!(
            sqlite.create_sql(Dialect::Sqlite),
            "\"role\" VARCHAR(6) NOT NULL CHECK (\"role\" IN ('admin', 'member'))"
        );
    }

    #[test]
    fn type_mapping_priority() {
        let json_field = field(
            "Record<string, unknown>",
            FieldMeta {
                json: true,
                ..FieldMeta::default()
            },
        );
        assert_eq!(sql_type(Dialect::Postgres, "t", "data", &json_field), "JSONB");
        assert_eq!(sql_type(Dialect::Sqlite, "t", "at", &FieldDescriptor::new("Date")), "INTEGER");
        assert_eq!(sql_type(Dialect::MySql, "t", "at", &FieldDescriptor::new("Date")), "DATETIME");
        assert_eq!(sql_type(Dialect::Sqlite, "t", "n", &FieldDescriptor::new("number")), "INTEGER");
        assert_eq!(sql_type(Dialect::Sqlite, "t", "b", &FieldDescriptor::new("boolean")), "BOOLEAN");
        assert_eq!(sql_type(Dialect::Sqlite, "t", "x", &FieldDescriptor::new("Buffer")), "TEXT");
        let name = field(
            "string",
            FieldMeta {
                length: Some(80),
                ..FieldMeta::default()
            },
        );
        assert_eq!(sql_type(Dialect::Postgres, "t", "name", &name), "VARCHAR(80)");
        let price = field(
            "number",
            FieldMeta {
                precision: Some(10),
                scale: Some(2),
                ..FieldMeta::default()
            },
        );
        assert_eq!(sql_type(Dialect::MySql, "t", "price", &price), "DECIMAL(10, 2)");
        let tags = field(
            "string",
            FieldMeta {
                array: true,
                ..FieldMeta::default()
            },
        );
        assert_eq!(sql_type(Dialect::Postgres, "t", "tags", &tags), "TEXT[]");
        assert_eq!(sql_type(Dialect::Sqlite, "t", "tags", &tags), "TEXT");
    }

    #[test]
    fn defaults_and_nullability() {
        let active = field(
            "boolean",
            FieldMeta {
                default: Some(json!(true)),
                ..FieldMeta::default()
            },
        );
        assert_eq!(
            column_sql(Dialect::Sqlite, "t", "active", &active).create_sql(Dialect::Sqlite),
            "\"active\" BOOLEAN NOT NULL DEFAULT 1"
        );
        let bio = FieldDescriptor::new("string | undefined");
        assert_eq!(
            column_sql(Dialect::Postgres, "t", "bio", &bio).create_sql(Dialect::Postgres),
            "\"bio\" TEXT"
        );
        let note = field(
            "string",
            FieldMeta {
                default: Some(json!("it's")),
                ..FieldMeta::default()
            },
        );
        assert_eq!(
            column_sql(Dialect::Postgres, "t", "note", &note).create_sql(Dialect::Postgres),
            "\"note\" TEXT NOT NULL DEFAULT 'it''s'"
        );
    }

    #[test]
    fn sqlite_alter_drops_non_constant_default_and_not_null() {
        let created = field(
            "Date",
            FieldMeta {
                default: Some(json!("now")),
                ..FieldMeta::default()
            },
        );
        let column = column_sql(Dialect::Sqlite, "t", "createdAt", &created);
        assert_eq!(
            column.create_sql(Dialect::Sqlite),
            "\"createdAt\" INTEGER NOT NULL DEFAULT (strftime('%s','now'))"
        );
        assert_eq!(column.alter_sql(Dialect::Sqlite), "\"createdAt\" INTEGER");

        let pg = column_sql(Dialect::Postgres, "t", "createdAt", &created);
        assert_eq!(
            pg.alter_sql(Dialect::Postgres),
            "\"createdAt\" TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP"
        );
    }

    #[test]
    fn mysql_extras_are_inline() {
        let updated = field(
            "Date",
            FieldMeta {
                default: Some(json!("CURRENT_TIMESTAMP")),
                on_update_now: true,
                comment: Some("last change".to_owned()),
                ..FieldMeta::default()
            },
        );
        assert_eq!(
            column_sql(Dialect::MySql, "t", "updatedAt", &updated).create_sql(Dialect::MySql),
            "`updatedAt` DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP ON UPDATE CURRENT_TIMESTAMP COMMENT 'last change'"
        );
    }

    #[test]
    fn generated_columns_skip_default() {
        let full = field(
            "string",
            FieldMeta {
                generated_expression: Some("first || ' ' || last".to_owned()),
                default: Some(json!("x")),
                ..FieldMeta::default()
            },
        );
        assert_eq!(
            column_sql(Dialect::Sqlite, "t", "full", &full).create_sql(Dialect::Sqlite),
            "\"full\" TEXT GENERATED ALWAYS AS (first || ' ' || last) VIRTUAL"
        );
    }
}
