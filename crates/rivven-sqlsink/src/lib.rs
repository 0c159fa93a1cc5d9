//! # rivven-sqlsink
//!
//! Schema-evolving relational sink for the Rivven event streaming platform.
//!
//! Moves streams of structured change records into relational tables,
//! creating tables and adding columns on demand, and writes rows through
//! dialect-specific SQL. Equivalent in scope to the Kafka Connect JDBC sink.
//!
//! ## Features
//!
//! - **Multi-Dialect SQL**: PostgreSQL, MySQL/MariaDB, SQL Server, SQLite with
//!   consistent identifier quoting
//! - **Auto-DDL**: CREATE TABLE for new tables, ALTER TABLE ADD COLUMN for new
//!   fields, with a per-table column cache
//! - **Insert or Upsert**: engine-native merge statements keyed on the record
//!   primary key
//! - **Batching**: one prepared batch execution per table and field set
//! - **Unit of Work**: one transaction per `write` call, committed only when
//!   every table succeeded
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rivven_sqlsink::prelude::*;
//! use std::sync::Arc;
//!
//! let config = SinkConfig::new("sqlite::memory:")
//!     .with_table_name_format("cdc_${topic}")
//!     .with_insert_mode(InsertMode::Upsert);
//!
//! let mut writer = WriteCoordinator::new(config, Arc::new(SqliteConnectionFactory::new()))?;
//! let summary = writer.write(&records)?;
//! println!("wrote {} records", summary.records_written);
//! ```
//!
//! ## Feature Flags
//!
//! - `sqlite` - SQLite backend via rusqlite (default)

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod buffer;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod error;
pub mod record;
pub mod schema;
pub mod security;
pub mod types;
pub mod writer;

// Backend implementations (conditionally compiled)
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and type system
    pub use crate::types::{ColumnMetadata, FieldType, Value};

    // Records
    pub use crate::record::{FieldSchema, FieldSet, FieldSpec, Record, RecordSchema};

    // Connection traits and config
    pub use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};

    // Configuration
    pub use crate::config::{InsertMode, SensitiveString, SinkConfig, TopicOverrides};

    // Dialect types
    pub use crate::dialect::{
        Dialect, MySqlDialect, PostgresDialect, SqlDialect, SqlServerDialect, SqliteDialect,
    };

    // Schema types
    pub use crate::schema::{AutoDdlMode, SchemaEvolutionResult, SchemaReconciler};

    // Buffering and coordination
    pub use crate::buffer::{TableWriteBuffer, WriteContext};
    pub use crate::writer::{
        AtomicSinkStats, ConnectionState, SinkStats, TableWriteSummary, WriteCoordinator,
        WriteSummary,
    };

    #[cfg(feature = "sqlite")]
    pub use crate::sqlite::{SqliteConnection, SqliteConnectionFactory, SqliteLocation};
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use types::Value;
