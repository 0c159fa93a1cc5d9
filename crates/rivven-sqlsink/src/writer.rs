//! Write coordination for rivven-sqlsink
//!
//! Provides:
//! - WriteCoordinator: connection lifecycle, per-table fan-out, commit
//! - Sink statistics (atomic counters plus snapshots)
//! - WriteSummary: outcome of one `write` call
//!
//! One `write` call is one unit of work: records are grouped by destination
//! table in first-arrival order, each table's batch is flushed in turn and the
//! transaction is committed only when every flush succeeded. On failure the
//! transaction is left open and the first error is returned; rollback is the
//! caller's decision. A transaction left open by a failed call is never
//! committed: the next `write` rolls it back before doing anything else.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, trace, warn};

use crate::buffer::{TableWriteBuffer, WriteContext};
use crate::config::SinkConfig;
use crate::connection::{redact_url, Connection, ConnectionConfig, ConnectionFactory};
use crate::dialect::Dialect;
use crate::error::{Error, Result};
use crate::record::Record;
use crate::schema::SchemaReconciler;

/// Lifecycle state of the coordinator's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection held
    #[default]
    Absent,
    /// Connecting
    Establishing,
    /// Connected, auto-commit disabled
    Valid,
    /// Failed a liveness check or a retriable error; rebuilt on next write
    Invalid,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Absent => write!(f, "absent"),
            Self::Establishing => write!(f, "establishing"),
            Self::Valid => write!(f, "valid"),
            Self::Invalid => write!(f, "invalid"),
        }
    }
}

/// Sink statistics snapshot
#[derive(Debug, Clone, Default)]
pub struct SinkStats {
    /// Total records written
    pub records_written: u64,
    /// Total records failed
    pub records_failed: u64,
    /// Total batches written
    pub batches_written: u64,
    /// Total batches failed
    pub batches_failed: u64,
    /// Total committed write calls
    pub commits: u64,
    /// Total write duration (milliseconds)
    pub total_write_time_ms: u64,
    /// Average records per second
    pub records_per_second: f64,
}

/// Atomic sink statistics
#[derive(Debug, Default)]
#[allow(missing_docs)]
pub struct AtomicSinkStats {
    pub records_written: AtomicU64,
    pub records_failed: AtomicU64,
    pub batches_written: AtomicU64,
    pub batches_failed: AtomicU64,
    pub commits: AtomicU64,
    pub total_write_time_ms: AtomicU64,
}

impl AtomicSinkStats {
    /// Record flushed batches
    pub fn record_batches(&self, records: u64, batches: u64) {
        self.records_written.fetch_add(records, Ordering::Relaxed);
        self.batches_written.fetch_add(batches, Ordering::Relaxed);
    }

    /// Record a failed batch
    pub fn record_batch_failure(&self, failed_records: u64) {
        self.records_failed.fetch_add(failed_records, Ordering::Relaxed);
        self.batches_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a committed write call
    pub fn record_commit(&self, duration: Duration) {
        self.commits.fetch_add(1, Ordering::Relaxed);
        self.total_write_time_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot
    pub fn snapshot(&self) -> SinkStats {
        let records = self.records_written.load(Ordering::Relaxed);
        let time_ms = self.total_write_time_ms.load(Ordering::Relaxed);
        let rps = if time_ms > 0 {
            (records as f64 * 1000.0) / time_ms as f64
        } else {
            0.0
        };

        SinkStats {
            records_written: records,
            records_failed: self.records_failed.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            total_write_time_ms: time_ms,
            records_per_second: rps,
        }
    }
}

/// Per-table outcome of a write call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableWriteSummary {
    /// Destination table
    pub table: String,
    /// Records written
    pub records: u64,
    /// Batched executions
    pub batches: u64,
    /// Rows reported affected by the engine
    pub rows_affected: u64,
}

/// Outcome of a committed write call
#[derive(Debug, Clone, Default)]
pub struct WriteSummary {
    /// Records written across all tables
    pub records_written: u64,
    /// Tables in write order
    pub tables: Vec<TableWriteSummary>,
    /// Wall time of the call
    pub duration: Duration,
}

impl WriteSummary {
    /// Total rows affected
    pub fn rows_affected(&self) -> u64 {
        self.tables.iter().map(|t| t.rows_affected).sum()
    }

    /// Summary for one table
    pub fn table(&self, name: &str) -> Option<&TableWriteSummary> {
        self.tables.iter().find(|t| t.table == name)
    }
}

/// Records of one destination table, in arrival order
struct TableGroup<'r> {
    table: String,
    config: Arc<SinkConfig>,
    records: Vec<&'r Record>,
}

/// Drives writes of record collections into relational tables
pub struct WriteCoordinator {
    config: SinkConfig,
    connection_config: ConnectionConfig,
    dialect: Dialect,
    factory: Arc<dyn ConnectionFactory>,
    connection: Option<Box<dyn Connection>>,
    state: ConnectionState,
    /// A failed write left statements in the open transaction
    tx_failed: bool,
    reconciler: SchemaReconciler,
    contexts: HashMap<String, Arc<SinkConfig>>,
    stats: AtomicSinkStats,
}

impl std::fmt::Debug for WriteCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("dialect", &self.dialect)
            .field("connection_config", &self.connection_config)
            .field("state", &self.state)
            .field("tx_failed", &self.tx_failed)
            .field("contexts", &self.contexts.len())
            .finish()
    }
}

impl WriteCoordinator {
    /// Create a coordinator. The configuration is validated and the dialect
    /// resolved from the connection URL; no connection is opened yet.
    pub fn new(config: SinkConfig, factory: Arc<dyn ConnectionFactory>) -> Result<Self> {
        config.check()?;
        let dialect = config.dialect()?;
        let connection_config = config.connection_config();

        Ok(Self {
            config,
            connection_config,
            dialect,
            factory,
            connection: None,
            state: ConnectionState::Absent,
            tx_failed: false,
            reconciler: SchemaReconciler::new(dialect),
            contexts: HashMap::new(),
            stats: AtomicSinkStats::default(),
        })
    }

    /// Override connection settings (timeouts) derived from the sink config
    pub fn with_connection_config(mut self, connection_config: ConnectionConfig) -> Self {
        self.connection_config = connection_config;
        self
    }

    /// Dialect in use
    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Base configuration
    pub fn config(&self) -> &SinkConfig {
        &self.config
    }

    /// Current connection state
    pub fn connection_state(&self) -> ConnectionState {
        self.state
    }

    /// Whether a failed write left an open transaction that the next write
    /// will roll back
    pub fn has_failed_transaction(&self) -> bool {
        self.tx_failed
    }

    /// Schema reconciler (exposes the column cache)
    pub fn reconciler(&self) -> &SchemaReconciler {
        &self.reconciler
    }

    /// Statistics snapshot
    pub fn stats(&self) -> SinkStats {
        self.stats.snapshot()
    }

    /// Write a collection of records as one unit of work
    pub fn write(&mut self, records: &[Record]) -> Result<WriteSummary> {
        let start = Instant::now();
        if records.is_empty() {
            trace!("empty write, nothing to do");
            return Ok(WriteSummary::default());
        }

        self.discard_failed_transaction();
        self.init_connection()?;
        let groups = self.group_by_table(records)?;
        debug!(records = records.len(), tables = groups.len(), "writing records");

        let Self {
            connection,
            reconciler,
            stats,
            state,
            tx_failed,
            dialect,
            ..
        } = self;
        let conn = connection
            .as_deref_mut()
            .ok_or_else(|| Error::connection("no connection established"))?;
        let mut ctx = WriteContext::new(conn, reconciler);

        let mut summary = WriteSummary::default();
        for group in groups {
            let mut buffer = TableWriteBuffer::new(group.table, group.config, *dialect);
            let outcome = write_table(&mut buffer, &mut ctx, &group.records);
            let table = buffer.table().to_string();

            stats.record_batches(buffer.records_flushed(), buffer.batches_flushed());
            match outcome {
                Ok(rows_affected) => summary.tables.push(TableWriteSummary {
                    table,
                    records: buffer.records_flushed(),
                    batches: buffer.batches_flushed(),
                    rows_affected,
                }),
                Err(e) => {
                    let failed = group.records.len() as u64 - buffer.records_flushed();
                    stats.record_batch_failure(failed);
                    error!(
                        table = %table,
                        error = %e,
                        "write failed, transaction left uncommitted"
                    );
                    *tx_failed = true;
                    if e.is_retriable() {
                        *state = ConnectionState::Invalid;
                    }
                    return Err(e);
                }
            }
        }

        if let Err(e) = ctx.conn.commit() {
            error!(error = %e, "commit failed");
            *tx_failed = true;
            if e.is_retriable() {
                *state = ConnectionState::Invalid;
            }
            return Err(e);
        }
        ctx.reconciler.mark_committed();

        summary.records_written = summary.tables.iter().map(|t| t.records).sum();
        summary.duration = start.elapsed();
        stats.record_commit(summary.duration);
        debug!(
            records = summary.records_written,
            tables = summary.tables.len(),
            elapsed_ms = summary.duration.as_millis() as u64,
            "write committed"
        );
        Ok(summary)
    }

    /// Roll back the open transaction, if connected
    pub fn rollback(&mut self) -> Result<()> {
        match self.connection.as_mut() {
            Some(conn) => {
                debug!("rolling back transaction");
                conn.rollback()?;
                self.tx_failed = false;
                self.reconciler.discard_uncommitted();
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Close the connection, abandoning any open transaction. The context
    /// cache and committed schema knowledge are kept.
    pub fn close(&mut self) -> Result<()> {
        self.state = ConnectionState::Absent;
        self.tx_failed = false;
        self.reconciler.discard_uncommitted();
        match self.connection.take() {
            Some(mut conn) => {
                info!("closing connection");
                conn.close()
            }
            None => Ok(()),
        }
    }

    /// Make sure a live connection with auto-commit disabled is held
    pub fn init_connection(&mut self) -> Result<()> {
        if let Some(conn) = self.connection.as_mut() {
            if self.state == ConnectionState::Valid
                && conn.is_valid(self.connection_config.validity_timeout)
            {
                trace!("connection is valid");
                return Ok(());
            }
            warn!(state = %self.state, "connection is invalid, reconnecting");
            self.state = ConnectionState::Invalid;
            self.close_quietly();
        }

        self.state = ConnectionState::Establishing;
        info!(
            url = %redact_url(&self.connection_config.url),
            dialect = %self.dialect,
            "establishing connection"
        );

        let mut conn = match self.factory.connect(&self.connection_config) {
            Ok(conn) => conn,
            Err(e) => {
                self.state = ConnectionState::Absent;
                error!(error = %e, "failed to establish connection");
                return Err(e);
            }
        };

        if let Err(e) = conn.set_auto_commit(false) {
            self.state = ConnectionState::Absent;
            if let Err(close_err) = conn.close() {
                warn!(error = %close_err, "failed to close connection");
            }
            return Err(e);
        }

        self.connection = Some(conn);
        self.state = ConnectionState::Valid;
        Ok(())
    }

    /// Effective configuration for a topic, resolved once and cached
    pub fn contextual_config(&mut self, topic: &str) -> Arc<SinkConfig> {
        if let Some(config) = self.contexts.get(topic) {
            return Arc::clone(config);
        }
        let config = Arc::new(self.config.contextual(topic));
        self.contexts.insert(topic.to_string(), Arc::clone(&config));
        config
    }

    fn group_by_table<'r>(&mut self, records: &'r [Record]) -> Result<Vec<TableGroup<'r>>> {
        let mut groups: Vec<TableGroup<'r>> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();

        for record in records {
            let config = self.contextual_config(&record.topic);
            let table = config.table_name_for(&record.topic)?;
            match index.get(&table) {
                Some(&i) => groups[i].records.push(record),
                None => {
                    index.insert(table.clone(), groups.len());
                    groups.push(TableGroup {
                        table,
                        config,
                        records: vec![record],
                    });
                }
            }
        }
        Ok(groups)
    }

    /// Roll back what a failed write left in the open transaction. A handle
    /// that cannot roll back is dropped so `init_connection` replaces it.
    fn discard_failed_transaction(&mut self) {
        if !self.tx_failed {
            return;
        }
        let Some(conn) = self.connection.as_mut() else {
            self.tx_failed = false;
            return;
        };
        if self.state != ConnectionState::Valid {
            // Reconnecting abandons the transaction anyway
            return;
        }

        warn!("rolling back transaction left open by a failed write");
        match conn.rollback() {
            Ok(()) => {
                self.tx_failed = false;
                self.reconciler.discard_uncommitted();
            }
            Err(e) => {
                warn!(error = %e, "rollback failed, dropping connection");
                self.state = ConnectionState::Invalid;
                self.close_quietly();
            }
        }
    }

    fn close_quietly(&mut self) {
        self.tx_failed = false;
        self.reconciler.discard_uncommitted();
        if let Some(mut conn) = self.connection.take() {
            if let Err(e) = conn.close() {
                warn!(error = %e, "failed to close connection");
            }
        }
    }
}

impl Drop for WriteCoordinator {
    fn drop(&mut self) {
        self.close_quietly();
    }
}

/// Feed one table's records through a buffer and flush the remainder
fn write_table<'r>(
    buffer: &mut TableWriteBuffer<'r>,
    ctx: &mut WriteContext<'_>,
    records: &[&'r Record],
) -> Result<u64> {
    let mut affected = 0;
    for &record in records {
        affected += buffer.add(ctx, record)?;
    }
    affected += buffer.flush(ctx)?;
    Ok(affected)
}
