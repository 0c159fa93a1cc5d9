//! Connection traits for rivven-sqlsink
//!
//! Core abstractions the sink drives directly:
//! - Connection: a stateful handle with batch execution, metadata lookup and
//!   explicit transaction control
//! - ConnectionFactory: driver-specific `connect(url, user, password)`
//!
//! Everything here is synchronous. A connection is used by one write cycle
//! at a time, so methods take `&mut self`.

use std::time::Duration;

use crate::config::SensitiveString;
use crate::error::Result;
use crate::types::{ColumnMetadata, Value};

/// A connection to a database
///
/// DDL issued through [`Connection::execute`] runs inside the open
/// transaction, and the schema reconciler treats
/// [`Error::AlreadyExists`](crate::Error::AlreadyExists) from it as success.
/// On engines where any statement error aborts the whole transaction
/// (PostgreSQL), implementations must wrap each `execute` in a savepoint and
/// roll back to it on failure, so that a swallowed duplicate leaves the
/// transaction usable. SQLite needs no such wrapping.
pub trait Connection: Send {
    /// Check if the connection is alive, waiting at most `timeout`
    fn is_valid(&mut self, timeout: Duration) -> bool;

    /// Enable or disable auto-commit. With auto-commit off, statements
    /// accumulate in a transaction until `commit` or `rollback`.
    fn set_auto_commit(&mut self, enabled: bool) -> Result<()>;

    /// Execute a single statement without parameters, returns affected row count
    fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Prepare `sql` once and execute it for every parameter row, returns the
    /// total affected row count
    fn execute_batch(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64>;

    /// Columns of `table`, or `None` if the table does not exist
    fn describe_table(&mut self, table: &str) -> Result<Option<Vec<ColumnMetadata>>>;

    /// Commit the current transaction
    fn commit(&mut self) -> Result<()>;

    /// Roll back the current transaction
    fn rollback(&mut self) -> Result<()>;

    /// Close the connection
    fn close(&mut self) -> Result<()>;
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection URL (e.g., postgres://host:5432/db, sqlite::memory:)
    pub url: String,
    /// User name, if not part of the URL
    pub user: Option<String>,
    /// Password, if not part of the URL
    pub password: Option<SensitiveString>,
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Upper bound on a liveness check
    pub validity_timeout: Duration,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &redact_url(&self.url))
            .field("user", &self.user)
            .field("password", &self.password)
            .field("connect_timeout", &self.connect_timeout)
            .field("validity_timeout", &self.validity_timeout)
            .finish()
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            user: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            validity_timeout: Duration::from_secs(3),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set credentials
    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<SensitiveString>,
    ) -> Self {
        self.user = Some(user.into());
        self.password = Some(password.into());
        self
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the liveness check timeout
    pub fn with_validity_timeout(mut self, timeout: Duration) -> Self {
        self.validity_timeout = timeout;
        self
    }
}

/// Redact credentials from a URL to prevent leaking passwords to logs.
pub fn redact_url(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut parsed) => {
            if parsed.password().is_some() {
                let _ = parsed.set_password(Some("***"));
            }
            parsed.to_string()
        }
        Err(_) => "***".to_string(),
    }
}

/// Factory for creating connections
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;
}

impl<F> ConnectionFactory for F
where
    F: Fn(&ConnectionConfig) -> Result<Box<dyn Connection>> + Send + Sync,
{
    fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        self(config)
    }
}
