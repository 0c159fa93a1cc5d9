//! Schema reconciliation for rivven-sqlsink
//!
//! Provides:
//! - SchemaReconciler: keeps a live table's columns a superset of what a
//!   batch requires, with a per-table column cache
//! - Auto-DDL modes for table creation/evolution
//!
//! Columns are only ever added. An existing column whose type does not match
//! the required type is a [`Error::SchemaConflict`].

use std::collections::{HashMap, HashSet};

use tracing::{debug, info, trace, warn};

use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::record::{FieldSet, FieldSpec};
use crate::security::require_table_name;

/// Result of one `ensure_schema` call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaEvolutionResult {
    /// Whether the table was created
    pub table_created: bool,
    /// Columns added to an existing table
    pub columns_added: Vec<String>,
    /// DDL statements executed (swallowed duplicates included)
    pub statements_executed: usize,
}

impl SchemaEvolutionResult {
    /// Create a result for a newly created table
    pub fn table_created() -> Self {
        Self {
            table_created: true,
            statements_executed: 1,
            ..Default::default()
        }
    }

    /// Check if any changes were made
    pub fn has_changes(&self) -> bool {
        self.table_created || !self.columns_added.is_empty()
    }
}

/// Auto-DDL mode for the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoDdlMode {
    /// No auto-DDL (error if the table or a column doesn't exist)
    None,
    /// Create table if not exists
    Create,
    /// Add missing columns to existing tables only
    Evolve,
    /// Create and evolve schema
    #[default]
    CreateAndEvolve,
}

impl AutoDdlMode {
    /// Mode from the `auto_create` / `auto_evolve` switches
    pub fn from_flags(auto_create: bool, auto_evolve: bool) -> Self {
        match (auto_create, auto_evolve) {
            (true, true) => Self::CreateAndEvolve,
            (true, false) => Self::Create,
            (false, true) => Self::Evolve,
            (false, false) => Self::None,
        }
    }

    /// Whether missing tables are created
    pub fn allows_create(self) -> bool {
        matches!(self, Self::Create | Self::CreateAndEvolve)
    }

    /// Whether missing columns are added
    pub fn allows_evolve(self) -> bool {
        matches!(self, Self::Evolve | Self::CreateAndEvolve)
    }
}

/// Known columns of one live table: name -> declared type, when reported
#[derive(Debug, Clone, Default)]
struct TableSchema {
    columns: HashMap<String, Option<String>>,
}

impl TableSchema {
    fn from_fields(dialect: Dialect, fields: &[FieldSpec]) -> Self {
        let columns = fields
            .iter()
            .map(|f| {
                let type_name = dialect.sql().map_type(f.field_type).ok().map(String::from);
                (f.name.clone(), type_name)
            })
            .collect();
        Self { columns }
    }

    fn add(&mut self, dialect: Dialect, fields: &[FieldSpec]) {
        for f in fields {
            let type_name = dialect.sql().map_type(f.field_type).ok().map(String::from);
            self.columns.entry(f.name.clone()).or_insert(type_name);
        }
    }
}

/// Reconciles live tables with the columns batches require
///
/// Owned by one writer; the cache lives as long as the reconciler. DDL runs
/// inside the writer's transaction, so tables changed since the last commit
/// are tracked and dropped from the cache if that transaction is discarded.
#[derive(Debug)]
pub struct SchemaReconciler {
    dialect: Dialect,
    mode: AutoDdlMode,
    cache: HashMap<String, TableSchema>,
    uncommitted: HashSet<String>,
}

impl SchemaReconciler {
    /// Create a reconciler with create-and-evolve enabled
    pub fn new(dialect: Dialect) -> Self {
        Self::with_mode(dialect, AutoDdlMode::default())
    }

    /// Create a reconciler with an explicit default auto-DDL mode
    pub fn with_mode(dialect: Dialect, mode: AutoDdlMode) -> Self {
        Self {
            dialect,
            mode,
            cache: HashMap::new(),
            uncommitted: HashSet::new(),
        }
    }

    /// Dialect used for DDL
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Default auto-DDL mode
    pub fn mode(&self) -> AutoDdlMode {
        self.mode
    }

    /// Whether the table's columns are cached
    pub fn is_cached(&self, table: &str) -> bool {
        self.cache.contains_key(table)
    }

    /// Cached column names of a table, sorted
    pub fn cached_columns(&self, table: &str) -> Option<Vec<String>> {
        self.cache.get(table).map(|schema| {
            let mut names: Vec<_> = schema.columns.keys().cloned().collect();
            names.sort();
            names
        })
    }

    /// The transaction holding this reconciler's DDL committed
    pub fn mark_committed(&mut self) {
        self.uncommitted.clear();
    }

    /// The transaction holding this reconciler's DDL was rolled back or
    /// abandoned: forget tables it changed so they are described again.
    /// Returns the number of tables forgotten.
    pub fn discard_uncommitted(&mut self) -> usize {
        let count = self.uncommitted.len();
        for table in self.uncommitted.drain() {
            debug!(table = %table, "dropping uncommitted schema from cache");
            self.cache.remove(&table);
        }
        count
    }

    /// Make `table` hold every field in `fields`, using the default mode
    pub fn ensure_schema(
        &mut self,
        conn: &mut dyn Connection,
        table: &str,
        fields: &FieldSet,
    ) -> Result<SchemaEvolutionResult> {
        self.ensure_schema_with(conn, table, fields, self.mode)
    }

    /// Make `table` hold every field in `fields`
    pub fn ensure_schema_with(
        &mut self,
        conn: &mut dyn Connection,
        table: &str,
        fields: &FieldSet,
        mode: AutoDdlMode,
    ) -> Result<SchemaEvolutionResult> {
        require_table_name(table)?;
        if fields.is_empty() {
            return Err(Error::invalid_argument(format!(
                "no fields required for table '{}'",
                table
            )));
        }

        let mut result = SchemaEvolutionResult::default();

        if self.cache.contains_key(table) {
            trace!(table = %table, "schema cache hit");
        } else if !self.describe(conn, table)? {
            if !mode.allows_create() {
                return Err(Error::TableNotFound {
                    table: table.to_string(),
                });
            }
            if self.create_table(conn, table, fields)? {
                return Ok(SchemaEvolutionResult::table_created());
            }
            // Created concurrently by another writer; reconcile against what it made
            result.statements_executed += 1;
        }

        // Two passes: a swallowed duplicate-column error on a multi-column
        // ALTER leaves the other columns unadded, so describe again and retry once.
        for attempt in 0..2 {
            let missing = self.missing_columns(table, fields)?;
            if missing.is_empty() {
                return Ok(result);
            }

            if !mode.allows_evolve() {
                let names: Vec<_> = missing.iter().map(|f| f.name.as_str()).collect();
                return Err(Error::schema(format!(
                    "table '{}' is missing columns [{}] and auto-evolve is disabled",
                    table,
                    names.join(", ")
                )));
            }

            let (applied, executed) = self.alter_table(conn, table, &missing)?;
            result.statements_executed += executed;
            if applied {
                result
                    .columns_added
                    .extend(missing.iter().map(|f| f.name.clone()));
                return Ok(result);
            }

            debug!(table = %table, attempt, "re-probing after concurrent column add");
            if !self.describe(conn, table)? {
                return Err(Error::schema(format!(
                    "table '{}' disappeared during schema evolution",
                    table
                )));
            }
        }

        let missing = self.missing_columns(table, fields)?;
        if missing.is_empty() {
            Ok(result)
        } else {
            Err(Error::schema(format!(
                "table '{}' still lacks {} column(s) after evolution",
                table,
                missing.len()
            )))
        }
    }

    /// Load live columns into the cache, returns whether the table exists
    fn describe(&mut self, conn: &mut dyn Connection, table: &str) -> Result<bool> {
        match conn.describe_table(table)? {
            Some(columns) => {
                debug!(table = %table, columns = columns.len(), "described live table");
                let schema = TableSchema {
                    columns: columns
                        .into_iter()
                        .map(|c| (c.name, c.type_name))
                        .collect(),
                };
                self.cache.insert(table.to_string(), schema);
                Ok(true)
            }
            None => {
                debug!(table = %table, "table does not exist");
                Ok(false)
            }
        }
    }

    /// Required fields with no column yet; fails on an incompatible existing type
    fn missing_columns(&self, table: &str, fields: &FieldSet) -> Result<Vec<FieldSpec>> {
        let sql = self.dialect.sql();
        let schema = self.cache.get(table).ok_or_else(|| {
            Error::schema(format!("no cached schema for table '{}'", table))
        })?;

        let mut missing = Vec::new();
        for field in fields.fields() {
            match schema.columns.get(&field.name) {
                Some(Some(existing)) => {
                    let required = sql.map_type(field.field_type)?;
                    if !sql.types_compatible(existing, required) {
                        return Err(Error::SchemaConflict {
                            table: table.to_string(),
                            column: field.name.clone(),
                            existing: existing.clone(),
                            required: required.to_string(),
                        });
                    }
                }
                Some(None) => {}
                None => missing.push(field.clone()),
            }
        }
        Ok(missing)
    }

    /// Returns false when the table already existed (swallowed)
    fn create_table(
        &mut self,
        conn: &mut dyn Connection,
        table: &str,
        fields: &FieldSet,
    ) -> Result<bool> {
        let sql = self.dialect.sql().create_table_sql(table, fields.fields())?;
        info!(table = %table, columns = fields.len(), "creating table");

        match conn.execute(&sql) {
            Ok(_) => {
                self.cache.insert(
                    table.to_string(),
                    TableSchema::from_fields(self.dialect, fields.fields()),
                );
                self.uncommitted.insert(table.to_string());
                Ok(true)
            }
            Err(e) if e.is_already_exists() => {
                warn!(table = %table, error = %e, "table already exists, re-probing");
                if self.describe(conn, table)? {
                    Ok(false)
                } else {
                    Err(Error::schema(format!(
                        "table '{}' reported as existing but cannot be described",
                        table
                    )))
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Returns (all statements applied, statements executed)
    fn alter_table(
        &mut self,
        conn: &mut dyn Connection,
        table: &str,
        missing: &[FieldSpec],
    ) -> Result<(bool, usize)> {
        let statements = self.dialect.sql().alter_table_sql(table, missing)?;
        let names: Vec<_> = missing.iter().map(|f| f.name.as_str()).collect();
        info!(table = %table, columns = ?names, "adding columns");

        let mut applied = true;
        let mut executed = 0;
        for statement in &statements {
            executed += 1;
            match conn.execute(statement) {
                Ok(_) => {}
                Err(e) if e.is_already_exists() => {
                    warn!(table = %table, error = %e, "column already exists, ignoring");
                    applied = false;
                }
                Err(e) => return Err(e),
            }
        }

        if applied {
            if let Some(schema) = self.cache.get_mut(table) {
                schema.add(self.dialect, missing);
            }
        }
        if executed > 0 {
            self.uncommitted.insert(table.to_string());
        }
        Ok((applied, executed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auto_ddl_mode_from_flags() {
        assert_eq!(AutoDdlMode::from_flags(true, true), AutoDdlMode::CreateAndEvolve);
        assert_eq!(AutoDdlMode::from_flags(false, false), AutoDdlMode::None);

        let create_only = AutoDdlMode::from_flags(true, false);
        assert!(create_only.allows_create());
        assert!(!create_only.allows_evolve());

        let evolve_only = AutoDdlMode::from_flags(false, true);
        assert!(!evolve_only.allows_create());
        assert!(evolve_only.allows_evolve());
    }

    #[test]
    fn test_evolution_result_changes() {
        assert!(!SchemaEvolutionResult::default().has_changes());
        assert!(SchemaEvolutionResult::table_created().has_changes());

        let added = SchemaEvolutionResult {
            columns_added: vec!["email".into()],
            ..Default::default()
        };
        assert!(added.has_changes());
    }

    #[test]
    fn test_reconciler_starts_empty() {
        let reconciler = SchemaReconciler::new(Dialect::Postgres);
        assert_eq!(reconciler.mode(), AutoDdlMode::CreateAndEvolve);
        assert!(!reconciler.is_cached("users"));
        assert!(reconciler.cached_columns("users").is_none());
    }
}
