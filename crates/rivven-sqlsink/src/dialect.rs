//! SQL dialect abstraction for rivven-sqlsink
//!
//! Renders the DDL and DML the sink needs for one engine family:
//!
//! - `SqlDialect`: trait with identifier quoting, type mapping and statement
//!   builders (CREATE TABLE, ALTER TABLE ... ADD COLUMN, INSERT, upsert)
//! - `Dialect`: closed set of supported engines, resolved once from the
//!   connection URL scheme
//!
//! All statements use `?` positional placeholders. Parameters bind in the
//! column order the statement text lists them.

use crate::error::{Error, Result};
use crate::record::FieldSpec;
use crate::security::{escape_string_literal, require_column_name, require_table_name};
use crate::types::FieldType;

/// SQL dialect for vendor-specific SQL generation
pub trait SqlDialect: Send + Sync {
    /// Get the dialect name
    fn name(&self) -> &'static str;

    /// Opening and closing identifier quote characters
    fn quote_chars(&self) -> (char, char) {
        ('"', '"')
    }

    /// Quote an identifier (table, column name), doubling embedded closing quotes
    fn quote_identifier(&self, name: &str) -> String {
        let (open, close) = self.quote_chars();
        let mut quoted = String::with_capacity(name.len() + 2);
        quoted.push(open);
        for c in name.chars() {
            if c == close {
                quoted.push(close);
            }
            quoted.push(c);
        }
        quoted.push(close);
        quoted
    }

    /// Reverse `quote_identifier`; `None` if the input is not a quoted identifier
    fn unquote_identifier(&self, quoted: &str) -> Option<String> {
        let (open, close) = self.quote_chars();
        let inner = quoted.strip_prefix(open)?.strip_suffix(close)?;
        let mut name = String::with_capacity(inner.len());
        let mut chars = inner.chars();
        while let Some(c) = chars.next() {
            if c == close && chars.next() != Some(close) {
                return None;
            }
            name.push(c);
        }
        Some(name)
    }

    /// Column type for a logical field type. Struct, array and map fields
    /// are stored as text.
    fn map_type(&self, field_type: FieldType) -> Result<&'static str>;

    /// Normalize an engine-reported column type for comparison
    fn canonical_type(&self, type_name: &str) -> String {
        base_type(type_name)
    }

    /// Whether an existing column type can hold values of the required type
    fn types_compatible(&self, existing: &str, required: &str) -> bool {
        self.canonical_type(existing) == self.canonical_type(required)
    }

    /// Whether one ALTER TABLE can add several columns
    fn supports_multi_column_add(&self) -> bool {
        true
    }

    /// Clause that introduces an added column
    fn add_column_clause(&self) -> &'static str {
        "ADD COLUMN"
    }

    /// Escape and quote a string literal
    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", escape_string_literal(value))
    }

    /// Column definition: quoted name, mapped type, nullability
    fn column_definition(&self, field: &FieldSpec, nullable: bool) -> Result<String> {
        require_column_name(&field.name)?;
        Ok(format!(
            "{} {} {}",
            self.quote_identifier(&field.name),
            self.map_type(field.field_type)?,
            if nullable { "NULL" } else { "NOT NULL" }
        ))
    }

    /// CREATE TABLE with a PRIMARY KEY clause when any field is a key
    fn create_table_sql(&self, table: &str, fields: &[FieldSpec]) -> Result<String> {
        require_table_name(table)?;
        if fields.is_empty() {
            return Err(Error::invalid_argument(format!(
                "cannot create table '{}' without columns",
                table
            )));
        }

        let mut parts = Vec::with_capacity(fields.len() + 1);
        for field in fields {
            if field.primary_key && field.field_type.is_nested() {
                return Err(Error::unsupported_type(
                    format!("{} primary key '{}'", field.field_type, field.name),
                    self.name(),
                ));
            }
            parts.push(self.column_definition(field, !field.primary_key)?);
        }

        let keys: Vec<_> = fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| self.quote_identifier(&f.name))
            .collect();
        if !keys.is_empty() {
            parts.push(format!("PRIMARY KEY({})", keys.join(",")));
        }

        Ok(format!(
            "CREATE TABLE {} ({})",
            self.quote_identifier(table),
            parts.join(",")
        ))
    }

    /// ALTER TABLE statements adding nullable columns
    fn alter_table_sql(&self, table: &str, fields: &[FieldSpec]) -> Result<Vec<String>> {
        require_table_name(table)?;
        if fields.is_empty() {
            return Err(Error::invalid_argument(format!(
                "no columns to add to table '{}'",
                table
            )));
        }

        let table = self.quote_identifier(table);
        let clauses = fields
            .iter()
            .map(|f| {
                Ok(format!(
                    "{} {}",
                    self.add_column_clause(),
                    self.column_definition(f, true)?
                ))
            })
            .collect::<Result<Vec<_>>>()?;

        if self.supports_multi_column_add() {
            Ok(vec![format!("ALTER TABLE {} {}", table, clauses.join(", "))])
        } else {
            Ok(clauses
                .into_iter()
                .map(|clause| format!("ALTER TABLE {} {}", table, clause))
                .collect())
        }
    }

    /// Plain INSERT
    fn insert_sql(&self, table: &str, columns: &[&str]) -> Result<String> {
        require_table_name(table)?;
        if columns.is_empty() {
            return Err(Error::invalid_argument(format!(
                "cannot insert into '{}' without columns",
                table
            )));
        }
        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.quote_identifier(table),
            self.column_list(columns)?,
            placeholders(columns.len())
        ))
    }

    /// Insert-or-update keyed on `key_columns`; binds keys first, then values
    fn upsert_sql(
        &self,
        table: &str,
        key_columns: &[&str],
        value_columns: &[&str],
    ) -> Result<String>;

    /// Query returning the live table's columns (name, type)
    fn describe_columns_sql(&self, table: &str) -> Result<String>;

    /// Comma-separated quoted column list
    fn column_list(&self, columns: &[&str]) -> Result<String> {
        let mut quoted = Vec::with_capacity(columns.len());
        for column in columns {
            require_column_name(column)?;
            quoted.push(self.quote_identifier(column));
        }
        Ok(quoted.join(","))
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(",")
}

/// Uppercase type name with any length/precision suffix removed
fn base_type(type_name: &str) -> String {
    let upper = type_name.trim().to_uppercase();
    match upper.find('(') {
        Some(idx) => upper[..idx].trim_end().to_string(),
        None => upper,
    }
}

fn check_upsert_args(table: &str, key_columns: &[&str]) -> Result<()> {
    require_table_name(table)?;
    if key_columns.is_empty() {
        return Err(Error::invalid_argument(format!(
            "upsert into '{}' requires at least one key column",
            table
        )));
    }
    Ok(())
}

/// `INSERT ... ON CONFLICT (...) DO UPDATE SET c=EXCLUDED.c` shared by
/// PostgreSQL and SQLite.
fn on_conflict_upsert(
    dialect: &dyn SqlDialect,
    table: &str,
    key_columns: &[&str],
    value_columns: &[&str],
) -> Result<String> {
    check_upsert_args(table, key_columns)?;

    let all: Vec<&str> = key_columns.iter().chain(value_columns).copied().collect();
    let action = if value_columns.is_empty() {
        "DO NOTHING".to_string()
    } else {
        let sets: Vec<_> = value_columns
            .iter()
            .map(|c| {
                let q = dialect.quote_identifier(c);
                format!("{}=EXCLUDED.{}", q, q)
            })
            .collect();
        format!("DO UPDATE SET {}", sets.join(","))
    };

    Ok(format!(
        "INSERT INTO {} ({}) VALUES ({}) ON CONFLICT ({}) {}",
        dialect.quote_identifier(table),
        dialect.column_list(&all)?,
        placeholders(all.len()),
        dialect.column_list(key_columns)?,
        action
    ))
}

// ===========================================================================
// PostgreSQL
// ===========================================================================

/// PostgreSQL dialect
#[derive(Debug, Clone, Default)]
pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn map_type(&self, field_type: FieldType) -> Result<&'static str> {
        match field_type {
            FieldType::Int8 | FieldType::Int16 => Ok("SMALLINT"),
            FieldType::Int32 => Ok("INT"),
            FieldType::Int64 => Ok("BIGINT"),
            FieldType::Float32 => Ok("FLOAT"),
            FieldType::Float64 => Ok("DOUBLE PRECISION"),
            FieldType::Boolean => Ok("BOOLEAN"),
            FieldType::String | FieldType::Struct | FieldType::Array | FieldType::Map => {
                Ok("TEXT")
            }
            FieldType::Bytes => Ok("BYTEA"),
        }
    }

    fn canonical_type(&self, type_name: &str) -> String {
        // FLOAT without precision is double precision in PostgreSQL
        match base_type(type_name).as_str() {
            "INT" | "INTEGER" | "INT4" | "SERIAL" => "INT".into(),
            "SMALLINT" | "INT2" => "SMALLINT".into(),
            "BIGINT" | "INT8" | "BIGSERIAL" => "BIGINT".into(),
            "FLOAT" | "FLOAT8" | "DOUBLE PRECISION" => "DOUBLE PRECISION".into(),
            "REAL" | "FLOAT4" => "REAL".into(),
            "BOOL" | "BOOLEAN" => "BOOLEAN".into(),
            "TEXT" | "VARCHAR" | "CHARACTER VARYING" => "TEXT".into(),
            other => other.to_string(),
        }
    }

    fn upsert_sql(
        &self,
        table: &str,
        key_columns: &[&str],
        value_columns: &[&str],
    ) -> Result<String> {
        on_conflict_upsert(self, table, key_columns, value_columns)
    }

    fn describe_columns_sql(&self, table: &str) -> Result<String> {
        require_table_name(table)?;
        Ok(format!(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = current_schema() AND table_name = {} \
             ORDER BY ordinal_position",
            self.string_literal(table)
        ))
    }
}

// ===========================================================================
// MySQL / MariaDB
// ===========================================================================

/// MySQL dialect (also used for MariaDB)
#[derive(Debug, Clone, Default)]
pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn name(&self) -> &'static str {
        "MySQL"
    }

    fn quote_chars(&self) -> (char, char) {
        ('`', '`')
    }

    fn map_type(&self, field_type: FieldType) -> Result<&'static str> {
        match field_type {
            FieldType::Int8 => Ok("TINYINT"),
            FieldType::Int16 => Ok("SMALLINT"),
            FieldType::Int32 => Ok("INT"),
            FieldType::Int64 => Ok("BIGINT"),
            FieldType::Float32 => Ok("FLOAT"),
            FieldType::Float64 => Ok("DOUBLE"),
            FieldType::Boolean => Ok("TINYINT"),
            // TEXT cannot be a key column without a prefix length
            FieldType::String | FieldType::Struct | FieldType::Array | FieldType::Map => {
                Ok("VARCHAR(256)")
            }
            FieldType::Bytes => Ok("VARBINARY(1024)"),
        }
    }

    fn canonical_type(&self, type_name: &str) -> String {
        match base_type(type_name).as_str() {
            "INTEGER" | "INT" => "INT".into(),
            "BOOL" | "BOOLEAN" | "TINYINT" => "TINYINT".into(),
            "DOUBLE PRECISION" | "DOUBLE" | "REAL" => "DOUBLE".into(),
            other => other.to_string(),
        }
    }

    fn upsert_sql(
        &self,
        table: &str,
        key_columns: &[&str],
        value_columns: &[&str],
    ) -> Result<String> {
        check_upsert_args(table, key_columns)?;

        let all: Vec<&str> = key_columns.iter().chain(value_columns).copied().collect();
        // With no value columns, a self-assignment of the first key keeps the row untouched
        let updates: Vec<_> = if value_columns.is_empty() {
            let q = self.quote_identifier(key_columns[0]);
            vec![format!("{}={}", q, q)]
        } else {
            value_columns
                .iter()
                .map(|c| {
                    let q = self.quote_identifier(c);
                    format!("{}=VALUES({})", q, q)
                })
                .collect()
        };

        Ok(format!(
            "INSERT INTO {} ({}) VALUES ({}) ON DUPLICATE KEY UPDATE {}",
            self.quote_identifier(table),
            self.column_list(&all)?,
            placeholders(all.len()),
            updates.join(",")
        ))
    }

    fn describe_columns_sql(&self, table: &str) -> Result<String> {
        require_table_name(table)?;
        Ok(format!(
            "SELECT column_name, data_type FROM information_schema.columns \
             WHERE table_schema = DATABASE() AND table_name = {} \
             ORDER BY ordinal_position",
            self.string_literal(table)
        ))
    }

    fn string_literal(&self, value: &str) -> String {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "''"))
    }
}

// ===========================================================================
// SQL Server
// ===========================================================================

/// SQL Server dialect
#[derive(Debug, Clone, Default)]
pub struct SqlServerDialect;

impl SqlDialect for SqlServerDialect {
    fn name(&self) -> &'static str {
        "SQL Server"
    }

    fn quote_chars(&self) -> (char, char) {
        ('[', ']')
    }

    fn map_type(&self, field_type: FieldType) -> Result<&'static str> {
        match field_type {
            FieldType::Int8 => Ok("TINYINT"),
            FieldType::Int16 => Ok("SMALLINT"),
            FieldType::Int32 => Ok("INT"),
            FieldType::Int64 => Ok("BIGINT"),
            FieldType::Float32 => Ok("REAL"),
            FieldType::Float64 => Ok("FLOAT"),
            FieldType::Boolean => Ok("BIT"),
            FieldType::String | FieldType::Struct | FieldType::Array | FieldType::Map => {
                Ok("VARCHAR(MAX)")
            }
            FieldType::Bytes => Ok("VARBINARY(MAX)"),
        }
    }

    fn canonical_type(&self, type_name: &str) -> String {
        match base_type(type_name).as_str() {
            "INTEGER" | "INT" => "INT".into(),
            "NVARCHAR" | "VARCHAR" | "TEXT" | "NTEXT" => "VARCHAR".into(),
            "DOUBLE PRECISION" | "FLOAT" => "FLOAT".into(),
            other => other.to_string(),
        }
    }

    // SQL Server writes `ADD c1 ..., c2 ...` without the COLUMN keyword
    fn alter_table_sql(&self, table: &str, fields: &[FieldSpec]) -> Result<Vec<String>> {
        require_table_name(table)?;
        if fields.is_empty() {
            return Err(Error::invalid_argument(format!(
                "no columns to add to table '{}'",
                table
            )));
        }
        let defs = fields
            .iter()
            .map(|f| self.column_definition(f, true))
            .collect::<Result<Vec<_>>>()?;
        Ok(vec![format!(
            "ALTER TABLE {} ADD {}",
            self.quote_identifier(table),
            defs.join(", ")
        )])
    }

    fn upsert_sql(
        &self,
        table: &str,
        key_columns: &[&str],
        value_columns: &[&str],
    ) -> Result<String> {
        check_upsert_args(table, key_columns)?;

        let all: Vec<&str> = key_columns.iter().chain(value_columns).copied().collect();
        for column in &all {
            require_column_name(column)?;
        }
        let q = |c: &str| self.quote_identifier(c);

        let source: Vec<_> = all.iter().map(|c| format!("? AS {}", q(c))).collect();
        let on: Vec<_> = key_columns
            .iter()
            .map(|c| format!("target.{}=incoming.{}", q(c), q(c)))
            .collect();
        let inserted: Vec<_> = all.iter().map(|c| format!("incoming.{}", q(c))).collect();

        let mut sql = format!(
            "MERGE INTO {} WITH (HOLDLOCK) AS target USING (SELECT {}) AS incoming ON ({})",
            q(table),
            source.join(","),
            on.join(" AND ")
        );
        if !value_columns.is_empty() {
            let sets: Vec<_> = value_columns
                .iter()
                .map(|c| format!("{}=incoming.{}", q(c), q(c)))
                .collect();
            sql.push_str(&format!(" WHEN MATCHED THEN UPDATE SET {}", sets.join(",")));
        }
        sql.push_str(&format!(
            " WHEN NOT MATCHED THEN INSERT ({}) VALUES ({});",
            self.column_list(&all)?,
            inserted.join(",")
        ));
        Ok(sql)
    }

    fn describe_columns_sql(&self, table: &str) -> Result<String> {
        require_table_name(table)?;
        Ok(format!(
            "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_SCHEMA = SCHEMA_NAME() AND TABLE_NAME = {} \
             ORDER BY ORDINAL_POSITION",
            self.string_literal(table)
        ))
    }
}

// ===========================================================================
// SQLite
// ===========================================================================

/// SQLite dialect
#[derive(Debug, Clone, Default)]
pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "SQLite"
    }

    fn map_type(&self, field_type: FieldType) -> Result<&'static str> {
        match field_type {
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 | FieldType::Int64 => {
                Ok("INTEGER")
            }
            FieldType::Float32 | FieldType::Float64 => Ok("REAL"),
            FieldType::Boolean => Ok("NUMERIC"),
            FieldType::String | FieldType::Struct | FieldType::Array | FieldType::Map => {
                Ok("TEXT")
            }
            FieldType::Bytes => Ok("BLOB"),
        }
    }

    fn canonical_type(&self, type_name: &str) -> String {
        match base_type(type_name).as_str() {
            "INT" | "INTEGER" | "BIGINT" | "SMALLINT" | "TINYINT" => "INTEGER".into(),
            "FLOAT" | "DOUBLE" | "DOUBLE PRECISION" | "REAL" => "REAL".into(),
            "VARCHAR" | "TEXT" | "CLOB" => "TEXT".into(),
            other => other.to_string(),
        }
    }

    fn supports_multi_column_add(&self) -> bool {
        false
    }

    fn upsert_sql(
        &self,
        table: &str,
        key_columns: &[&str],
        value_columns: &[&str],
    ) -> Result<String> {
        on_conflict_upsert(self, table, key_columns, value_columns)
    }

    fn describe_columns_sql(&self, table: &str) -> Result<String> {
        require_table_name(table)?;
        Ok(format!(
            "SELECT name, type FROM pragma_table_info({}) ORDER BY cid",
            self.string_literal(table)
        ))
    }
}

// ===========================================================================
// Dialect selection
// ===========================================================================

/// Supported engine families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// PostgreSQL
    Postgres,
    /// MySQL / MariaDB
    MySql,
    /// SQL Server
    SqlServer,
    /// SQLite
    Sqlite,
}

impl Dialect {
    /// Resolve the dialect from a connection URL such as
    /// `postgres://host/db`, `jdbc:sqlserver://host` or `sqlite::memory:`
    pub fn from_connection_url(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        let without_jdbc = match trimmed.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &trimmed[5..],
            _ => trimmed,
        };
        let scheme = without_jdbc.split(':').next().unwrap_or_default();
        Self::from_scheme(scheme)
    }

    /// Resolve the dialect from a bare scheme / driver name
    pub fn from_scheme(scheme: &str) -> Result<Self> {
        match scheme.to_lowercase().as_str() {
            "postgres" | "postgresql" | "pgsql" => Ok(Self::Postgres),
            "mysql" | "mariadb" => Ok(Self::MySql),
            "sqlserver" | "mssql" | "jtds" => Ok(Self::SqlServer),
            "sqlite" | "sqlite3" => Ok(Self::Sqlite),
            _ => Err(Error::UnsupportedDialect {
                scheme: scheme.to_string(),
            }),
        }
    }

    /// The SQL generator for this engine
    pub fn sql(self) -> &'static dyn SqlDialect {
        match self {
            Self::Postgres => &PostgresDialect,
            Self::MySql => &MySqlDialect,
            Self::SqlServer => &SqlServerDialect,
            Self::Sqlite => &SqliteDialect,
        }
    }

    /// Dialect name
    pub fn name(self) -> &'static str {
        self.sql().name()
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
