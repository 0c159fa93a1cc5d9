//! Per-table write buffering
//!
//! A [`TableWriteBuffer`] accumulates the records of one destination table
//! for a single write cycle. Every flushed execution binds records sharing
//! one [`FieldSet`]: a record with a different field set forces the pending
//! batch out first.

use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::config::{InsertMode, SinkConfig};
use crate::connection::Connection;
use crate::dialect::Dialect;
use crate::error::Result;
use crate::record::{FieldSet, Record, RecordSchema};
use crate::schema::{AutoDdlMode, SchemaReconciler};
use crate::types::Value;

/// Resources a buffer borrows from its writer while flushing
pub struct WriteContext<'a> {
    /// Live connection
    pub conn: &'a mut dyn Connection,
    /// Schema reconciler (owns the column cache)
    pub reconciler: &'a mut SchemaReconciler,
}

impl<'a> WriteContext<'a> {
    /// Bundle a connection and reconciler
    pub fn new(conn: &'a mut dyn Connection, reconciler: &'a mut SchemaReconciler) -> Self {
        Self { conn, reconciler }
    }
}

/// Buffered records for one destination table
#[derive(Debug)]
pub struct TableWriteBuffer<'r> {
    table: String,
    config: Arc<SinkConfig>,
    dialect: Dialect,
    field_set: Option<FieldSet>,
    last_schema: Option<Arc<RecordSchema>>,
    records: Vec<&'r Record>,
    records_flushed: u64,
    batches_flushed: u64,
}

impl<'r> TableWriteBuffer<'r> {
    /// Create an empty buffer for `table`
    pub fn new(table: impl Into<String>, config: Arc<SinkConfig>, dialect: Dialect) -> Self {
        Self {
            table: table.into(),
            config,
            dialect,
            field_set: None,
            last_schema: None,
            records: Vec::new(),
            records_flushed: 0,
            batches_flushed: 0,
        }
    }

    /// Destination table
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Effective configuration for the table's topic
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Number of buffered records
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing is buffered
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Field set of the pending batch
    pub fn field_set(&self) -> Option<&FieldSet> {
        self.field_set.as_ref()
    }

    /// Records executed so far
    pub fn records_flushed(&self) -> u64 {
        self.records_flushed
    }

    /// Batched executions so far
    pub fn batches_flushed(&self) -> u64 {
        self.batches_flushed
    }

    /// Buffer a record. Flushes the pending batch first when the record's
    /// field set differs from it, and after appending when the batch is
    /// full. Returns rows affected by those flushes.
    pub fn add(&mut self, ctx: &mut WriteContext<'_>, record: &'r Record) -> Result<u64> {
        let fields = self.field_set_of(record);
        let mut affected = 0;

        if let Some(current) = &self.field_set {
            if !self.records.is_empty() && *current != fields {
                debug!(
                    table = %self.table,
                    buffered = self.records.len(),
                    "field set changed, flushing pending batch"
                );
                affected += self.flush(ctx)?;
            }
        }

        if self.records.is_empty() {
            self.field_set = Some(fields);
        }
        self.last_schema = Some(Arc::clone(&record.schema));
        self.records.push(record);

        if self.records.len() >= self.config.batch_size {
            trace!(table = %self.table, batch_size = self.config.batch_size, "batch full");
            affected += self.flush(ctx)?;
        }

        Ok(affected)
    }

    /// Execute the pending batch as one prepared batch statement. Returns
    /// the affected row count, 0 when empty.
    pub fn flush(&mut self, ctx: &mut WriteContext<'_>) -> Result<u64> {
        let Some(fields) = self.field_set.clone() else {
            return Ok(0);
        };
        if self.records.is_empty() {
            return Ok(0);
        }

        let mode = AutoDdlMode::from_flags(self.config.auto_create, self.config.auto_evolve);
        ctx.reconciler
            .ensure_schema_with(ctx.conn, &self.table, &fields, mode)?;

        let key_columns = fields.key_columns();
        let value_columns = fields.value_columns();
        let columns: Vec<&str> = key_columns
            .iter()
            .chain(value_columns.iter())
            .copied()
            .collect();

        let sql = self.dialect.sql();
        let statement = match self.config.insert_mode {
            InsertMode::Upsert if !key_columns.is_empty() => {
                sql.upsert_sql(&self.table, &key_columns, &value_columns)?
            }
            InsertMode::Upsert => {
                debug!(table = %self.table, "no primary key fields, upsert falls back to insert");
                sql.insert_sql(&self.table, &columns)?
            }
            InsertMode::Insert => sql.insert_sql(&self.table, &columns)?,
        };

        let rows: Vec<Vec<Value>> = self
            .records
            .iter()
            .map(|record| columns.iter().map(|c| record.value(c).clone()).collect())
            .collect();

        let affected = match ctx.conn.execute_batch(&statement, &rows) {
            Ok(n) => n,
            Err(e) => {
                error!(
                    table = %self.table,
                    records = rows.len(),
                    error = %e,
                    "batch execution failed"
                );
                return Err(e);
            }
        };

        debug!(table = %self.table, records = rows.len(), affected, "flushed batch");
        self.records_flushed += rows.len() as u64;
        self.batches_flushed += 1;
        self.records.clear();
        self.field_set = None;
        Ok(affected)
    }

    /// Field set of a record, reusing the pending one when the record shares
    /// its schema with the previous record
    fn field_set_of(&self, record: &Record) -> FieldSet {
        match (&self.last_schema, &self.field_set) {
            (Some(last), Some(current))
                if !self.records.is_empty() && Arc::ptr_eq(last, &record.schema) =>
            {
                current.clone()
            }
            _ => record.schema.field_set(),
        }
    }
}
