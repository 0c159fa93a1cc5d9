//! SQLite backend for rivven-sqlsink
//!
//! Implements [`Connection`] over `rusqlite`. SQLite has no connection-level
//! auto-commit switch, so turning auto-commit off is emulated: the first
//! statement after a commit or rollback opens a transaction with `BEGIN`.
//!
//! Accepted URLs: `sqlite::memory:`, `sqlite://path/to/db`, `sqlite:path`
//! (optionally `jdbc:`-prefixed).

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::types::Value as SqlValue;
use rusqlite::ErrorCode;
use tracing::{debug, trace};

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::dialect::{Dialect, SqlDialect, SqliteDialect};
use crate::error::{Error, Result};
use crate::types::{ColumnMetadata, Value};

/// Where a SQLite database lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqliteLocation {
    /// Private in-memory database
    Memory,
    /// Database file
    File(PathBuf),
}

impl SqliteLocation {
    /// Parse a connection URL
    pub fn from_url(url: &str) -> Result<Self> {
        if Dialect::from_connection_url(url)? != Dialect::Sqlite {
            return Err(Error::config(format!(
                "not a sqlite connection url: {}",
                crate::connection::redact_url(url)
            )));
        }

        let trimmed = url.trim();
        let without_jdbc = match trimmed.get(..5) {
            Some(prefix) if prefix.eq_ignore_ascii_case("jdbc:") => &trimmed[5..],
            _ => trimmed,
        };
        let rest = without_jdbc
            .split_once(':')
            .map(|(_, rest)| rest)
            .unwrap_or_default();
        let path = rest.strip_prefix("//").unwrap_or(rest);

        if path.is_empty() || path == ":memory:" {
            Ok(Self::Memory)
        } else {
            Ok(Self::File(PathBuf::from(path)))
        }
    }
}

/// Opens [`SqliteConnection`]s
#[derive(Debug, Clone, Default)]
pub struct SqliteConnectionFactory;

impl SqliteConnectionFactory {
    /// Create a factory
    pub fn new() -> Self {
        Self
    }
}

impl ConnectionFactory for SqliteConnectionFactory {
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let location = SqliteLocation::from_url(&config.url)?;
        let conn = SqliteConnection::open(&location, config.connect_timeout)?;
        Ok(Box::new(conn))
    }
}

/// A SQLite connection
pub struct SqliteConnection {
    conn: Option<rusqlite::Connection>,
    auto_commit: bool,
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("open", &self.conn.is_some())
            .field("auto_commit", &self.auto_commit)
            .finish()
    }
}

impl SqliteConnection {
    /// Open a database; `busy_timeout` bounds waits on a locked database
    pub fn open(location: &SqliteLocation, busy_timeout: Duration) -> Result<Self> {
        let conn = match location {
            SqliteLocation::Memory => rusqlite::Connection::open_in_memory(),
            SqliteLocation::File(path) => rusqlite::Connection::open(path),
        }
        .map_err(|e| Error::connection_with_source("failed to open sqlite database", e))?;

        conn.busy_timeout(busy_timeout)
            .map_err(|e| Error::connection_with_source("failed to set busy timeout", e))?;

        debug!(location = ?location, "opened sqlite database");
        Ok(Self {
            conn: Some(conn),
            auto_commit: true,
        })
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::open(&SqliteLocation::Memory, Duration::from_secs(5))
    }

    /// Whether a transaction is open
    pub fn in_transaction(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| !c.is_autocommit())
    }

    /// Run a query returning rows of values; used for verification and tooling
    pub fn query(&mut self, sql: &str) -> Result<Vec<Vec<Value>>> {
        let conn = self.handle()?;
        let mut stmt = conn.prepare(sql).map_err(|e| classify(e, sql))?;
        let width = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                (0..width)
                    .map(|i| row.get::<_, SqlValue>(i).map(from_sql))
                    .collect::<rusqlite::Result<Vec<_>>>()
            })
            .map_err(|e| classify(e, sql))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| classify(e, sql))
    }

    fn handle(&self) -> Result<&rusqlite::Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| Error::connection("sqlite connection is closed"))
    }

    /// Open a transaction when auto-commit is off and none is active
    fn begin_if_needed(&mut self) -> Result<()> {
        let auto_commit = self.auto_commit;
        let conn = self.handle()?;
        if !auto_commit && conn.is_autocommit() {
            trace!("BEGIN");
            conn.execute_batch("BEGIN").map_err(|e| Error::Transaction {
                message: "failed to begin transaction".into(),
                source: Some(Box::new(e)),
            })?;
        }
        Ok(())
    }

    fn finish(&mut self, statement: &str) -> Result<()> {
        let conn = self.handle()?;
        if conn.is_autocommit() {
            return Ok(());
        }
        trace!("{}", statement);
        conn.execute_batch(statement).map_err(|e| Error::Transaction {
            message: format!("{} failed", statement.to_lowercase()),
            source: Some(Box::new(e)),
        })
    }
}

impl Connection for SqliteConnection {
    fn is_valid(&mut self, _timeout: Duration) -> bool {
        match self.conn.as_ref() {
            Some(conn) => conn
                .query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                .is_ok(),
            None => false,
        }
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.handle()?;
        if enabled && !self.auto_commit {
            self.finish("COMMIT")?;
        }
        self.auto_commit = enabled;
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.begin_if_needed()?;
        let conn = self.handle()?;
        trace!(sql = %sql, "execute");
        let affected = conn.execute(sql, []).map_err(|e| classify(e, sql))?;
        Ok(affected as u64)
    }

    fn execute_batch(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.begin_if_needed()?;
        let conn = self.handle()?;
        trace!(sql = %sql, rows = rows.len(), "execute batch");

        let mut stmt = conn.prepare_cached(sql).map_err(|e| classify(e, sql))?;
        let mut affected = 0u64;
        for row in rows {
            let n = stmt
                .execute(rusqlite::params_from_iter(row.iter().map(to_sql)))
                .map_err(|e| classify(e, sql))?;
            affected += n as u64;
        }
        Ok(affected)
    }

    fn describe_table(&mut self, table: &str) -> Result<Option<Vec<ColumnMetadata>>> {
        let sql = SqliteDialect.describe_columns_sql(table)?;
        let conn = self.handle()?;
        let mut stmt = conn.prepare(&sql).map_err(|e| classify(e, &sql))?;
        let columns = stmt
            .query_map([], |row| {
                let name: String = row.get(0)?;
                let type_name: String = row.get(1)?;
                Ok(if type_name.is_empty() {
                    ColumnMetadata::untyped(name)
                } else {
                    ColumnMetadata::new(name, type_name)
                })
            })
            .map_err(|e| classify(e, &sql))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| classify(e, &sql))?;

        if columns.is_empty() {
            Ok(None)
        } else {
            Ok(Some(columns))
        }
    }

    fn commit(&mut self) -> Result<()> {
        self.finish("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.finish("ROLLBACK")
    }

    fn close(&mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => conn.close().map_err(|(_, e)| {
                Error::connection_with_source("failed to close sqlite connection", e)
            }),
            None => Ok(()),
        }
    }
}

/// Map a driver error into the sink taxonomy
fn classify(e: rusqlite::Error, sql: &str) -> Error {
    let message = e.to_string();
    if message.contains("already exists") || message.contains("duplicate column name") {
        return Error::already_exists(message);
    }
    let code = match &e {
        rusqlite::Error::SqliteFailure(failure, _) => Some(failure.code),
        _ => None,
    };
    match code {
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => Error::timeout(message),
        Some(ErrorCode::CannotOpen | ErrorCode::NotADatabase) => {
            Error::connection_with_source(message, e)
        }
        _ => Error::query_with_source(message, sql, e),
    }
}

fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int8(n) => SqlValue::Integer(i64::from(*n)),
        Value::Int16(n) => SqlValue::Integer(i64::from(*n)),
        Value::Int32(n) => SqlValue::Integer(i64::from(*n)),
        Value::Int64(n) => SqlValue::Integer(*n),
        Value::Float32(n) => SqlValue::Real(f64::from(*n)),
        Value::Float64(n) => SqlValue::Real(*n),
        Value::String(s) => SqlValue::Text(s.clone()),
        Value::Bytes(b) => SqlValue::Blob(b.clone()),
    }
}

fn from_sql(value: SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Integer(n) => Value::Int64(n),
        SqlValue::Real(n) => Value::Float64(n),
        SqlValue::Text(s) => Value::String(s),
        SqlValue::Blob(b) => Value::Bytes(b),
    }
}
