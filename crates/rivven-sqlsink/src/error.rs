//! Error types for rivven-sqlsink
//!
//! Provides granular error classification so the host runtime can decide
//! what to retry:
//! - Retriable errors (connection, timeout)
//! - Fatal configuration errors (unsupported type / dialect, schema conflicts)
//! - Idempotent DDL conflicts, which the schema reconciler swallows

use std::fmt;
use thiserror::Error;

/// Result type for rivven-sqlsink operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Malformed table/column input (caller bug, never retried)
    InvalidArgument,
    /// Configuration does not match the destination (fatal)
    Configuration,
    /// Live table is incompatible with the records (operator intervention)
    Schema,
    /// Connection-related errors (retriable)
    Connection,
    /// Statement execution errors
    Query,
    /// Transaction errors
    Transaction,
    /// Timeout errors (retriable)
    Timeout,
    /// Object created concurrently by another writer (treated as success)
    AlreadyExists,
}

impl ErrorCategory {
    /// Whether errors in this category are generally retriable
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::Connection | Self::Timeout)
    }
}

/// Main error type for rivven-sqlsink
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum Error {
    /// Malformed table or column arguments
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },

    /// Logical field type has no column mapping in the dialect
    #[error("unsupported type {type_name} for {dialect}")]
    UnsupportedType {
        type_name: String,
        dialect: &'static str,
    },

    /// Connection string scheme does not name a supported engine
    #[error("unsupported dialect for connection url scheme '{scheme}'")]
    UnsupportedDialect { scheme: String },

    /// Existing column type differs from the type the records require
    #[error("schema conflict on {table}.{column}: existing type {existing}, required {required}")]
    SchemaConflict {
        table: String,
        column: String,
        existing: String,
        required: String,
    },

    /// Connection could not be established or was lost
    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Statement execution failed
    #[error("query error: {message}")]
    Query {
        message: String,
        sql: Option<String>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Commit or rollback failed
    #[error("transaction error: {message}")]
    Transaction {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// A table or column already exists (concurrent DDL from a sibling writer)
    #[error("already exists: {object}")]
    AlreadyExists { object: String },

    /// Configuration error
    #[error("configuration error: {message}")]
    Configuration { message: String },

    /// Schema error (auto-DDL disabled, malformed record schema)
    #[error("schema error: {message}")]
    Schema { message: String },

    /// Table not found and auto-create is disabled
    #[error("table not found: {table}")]
    TableNotFound { table: String },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidArgument { .. } => ErrorCategory::InvalidArgument,
            Self::UnsupportedType { .. }
            | Self::UnsupportedDialect { .. }
            | Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::SchemaConflict { .. } | Self::Schema { .. } | Self::TableNotFound { .. } => {
                ErrorCategory::Schema
            }
            Self::Connection { .. } => ErrorCategory::Connection,
            Self::Query { .. } => ErrorCategory::Query,
            Self::Transaction { .. } => ErrorCategory::Transaction,
            Self::Timeout { .. } => ErrorCategory::Timeout,
            Self::AlreadyExists { .. } => ErrorCategory::AlreadyExists,
        }
    }

    /// Whether this error is retriable
    #[inline]
    pub fn is_retriable(&self) -> bool {
        self.category().is_retriable()
    }

    /// Whether this error reports DDL that another writer already applied
    #[inline]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Create an unsupported type error
    pub fn unsupported_type(type_name: impl Into<String>, dialect: &'static str) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
            dialect,
        }
    }

    /// Create a connection error
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Create a connection error with source
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error
    pub fn query(message: impl Into<String>) -> Self {
        Self::Query {
            message: message.into(),
            sql: None,
            source: None,
        }
    }

    /// Create a query error with the failing SQL and driver cause
    pub fn query_with_source(
        message: impl Into<String>,
        sql: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Query {
            message: message.into(),
            sql: Some(sql.into()),
            source: Some(Box::new(source)),
        }
    }

    /// Create a timeout error
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(object: impl Into<String>) -> Self {
        Self::AlreadyExists {
            object: object.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a schema error
    pub fn schema(message: impl Into<String>) -> Self {
        Self::Schema {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::Configuration => write!(f, "configuration"),
            Self::Schema => write!(f, "schema"),
            Self::Connection => write!(f, "connection"),
            Self::Query => write!(f, "query"),
            Self::Transaction => write!(f, "transaction"),
            Self::Timeout => write!(f, "timeout"),
            Self::AlreadyExists => write!(f, "already_exists"),
        }
    }
}
