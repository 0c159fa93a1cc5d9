//! Input guards for generated SQL in rivven-sqlsink.
//!
//! Provides:
//! - Table and column name validation (blank names are caller bugs)
//! - String literal escaping for SQL string contexts
//!
//! Identifiers are never validated against a character whitelist here: every
//! identifier the dialects emit is quoted, so any name the upstream schema
//! carries is representable. Validation only rejects names that cannot form a
//! statement at all.

use crate::error::{Error, Result};

/// Reject a blank (empty or whitespace-only) table name.
///
/// # Examples
///
/// ```
/// use rivven_sqlsink::security::require_table_name;
///
/// assert!(require_table_name("users").is_ok());
/// assert!(require_table_name("  ").is_err());
/// ```
pub fn require_table_name(table: &str) -> Result<()> {
    if table.trim().is_empty() {
        return Err(Error::invalid_argument("table name cannot be blank"));
    }
    Ok(())
}

/// Reject a blank column name.
pub fn require_column_name(column: &str) -> Result<()> {
    if column.trim().is_empty() {
        return Err(Error::invalid_argument("column name cannot be blank"));
    }
    Ok(())
}

/// Escape a string value for safe interpolation into a SQL string literal context.
///
/// Replaces `'` with `''` (standard SQL escaping for single-quoted string literals).
/// Used for metadata queries that must be returned as a complete SQL string.
///
/// # Examples
///
/// ```
/// use rivven_sqlsink::security::escape_string_literal;
///
/// assert_eq!(escape_string_literal("users"), "users");
/// assert_eq!(escape_string_literal("don't"), "don''t");
/// ```
pub fn escape_string_literal(value: &str) -> String {
    // Fast path: no escaping needed (common case)
    if !value.contains('\'') {
        return value.to_string();
    }
    value.replace('\'', "''")
}
