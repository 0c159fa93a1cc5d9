//! Shared test helpers: a recording in-memory connection and record builders

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rivven_sqlsink::prelude::*;

/// A call observed by a [`RecordingConnection`]
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Connect,
    IsValid(bool),
    SetAutoCommit(bool),
    Execute(String),
    ExecuteBatch { sql: String, rows: Vec<Vec<Value>> },
    Describe(String),
    Commit,
    Rollback,
    Close,
}

/// State shared by a factory and every connection it hands out
#[derive(Debug)]
pub struct MockState {
    pub events: Vec<Event>,
    /// Live tables reported by `describe_table`
    pub tables: HashMap<String, Vec<ColumnMetadata>>,
    /// Whether the current handle passes the liveness check
    pub valid: bool,
    pub fail_connect: bool,
    pub fail_close: bool,
    /// DDL statements fail with `AlreadyExists`
    pub ddl_already_exists: bool,
    /// Batch executions whose SQL contains this text fail
    pub fail_batch_containing: Option<String>,
    /// Batch failures are connection errors (retriable) rather than query errors
    pub batch_failure_retriable: bool,
    /// Rollback fails with a connection error
    pub fail_rollback: bool,
}

impl Default for MockState {
    fn default() -> Self {
        Self {
            events: Vec::new(),
            tables: HashMap::new(),
            valid: true,
            fail_connect: false,
            fail_close: false,
            ddl_already_exists: false,
            fail_batch_containing: None,
            batch_failure_retriable: true,
            fail_rollback: false,
        }
    }
}

/// Handle to the shared mock state
#[derive(Debug, Clone, Default)]
pub struct Mock {
    state: Arc<Mutex<MockState>>,
}

impl Mock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        Arc::new(RecordingFactory { mock: self.clone() })
    }

    pub fn connection(&self) -> RecordingConnection {
        RecordingConnection { mock: self.clone() }
    }

    /// Seed a live table
    pub fn with_table(self, table: &str, columns: &[(&str, &str)]) -> Self {
        self.state().tables.insert(
            table.to_string(),
            columns
                .iter()
                .map(|(name, ty)| ColumnMetadata::new(*name, *ty))
                .collect(),
        );
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// SQL of every `execute` call (DDL)
    pub fn ddl(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Execute(sql) => Some(sql),
                _ => None,
            })
            .collect()
    }

    /// (sql, rows) of every `execute_batch` call
    pub fn batches(&self) -> Vec<(String, Vec<Vec<Value>>)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ExecuteBatch { sql, rows } => Some((sql, rows)),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, event: &Event) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    fn push(&self, event: Event) {
        self.state().events.push(event);
    }
}

struct RecordingFactory {
    mock: Mock,
}

impl ConnectionFactory for RecordingFactory {
    fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        {
            let mut state = self.mock.state();
            if state.fail_connect {
                return Err(Error::connection("connection refused"));
            }
            state.valid = true;
        }
        self.mock.push(Event::Connect);
        Ok(Box::new(self.mock.connection()))
    }
}

/// Connection that records calls and answers from [`MockState`]
pub struct RecordingConnection {
    mock: Mock,
}

impl Connection for RecordingConnection {
    fn is_valid(&mut self, _timeout: Duration) -> bool {
        let valid = self.mock.state().valid;
        self.mock.push(Event::IsValid(valid));
        valid
    }

    fn set_auto_commit(&mut self, enabled: bool) -> Result<()> {
        self.mock.push(Event::SetAutoCommit(enabled));
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> Result<u64> {
        self.mock.push(Event::Execute(sql.to_string()));
        if self.mock.state().ddl_already_exists {
            return Err(Error::already_exists(sql));
        }
        Ok(0)
    }

    fn execute_batch(&mut self, sql: &str, rows: &[Vec<Value>]) -> Result<u64> {
        self.mock.push(Event::ExecuteBatch {
            sql: sql.to_string(),
            rows: rows.to_vec(),
        });
        let (fail, retriable) = {
            let state = self.mock.state();
            let fail = state
                .fail_batch_containing
                .as_ref()
                .is_some_and(|needle| sql.contains(needle.as_str()));
            (fail, state.batch_failure_retriable)
        };
        if fail && retriable {
            return Err(Error::connection("connection reset by peer"));
        }
        if fail {
            return Err(Error::query("duplicate key value violates unique constraint"));
        }
        Ok(rows.len() as u64)
    }

    fn describe_table(&mut self, table: &str) -> Result<Option<Vec<ColumnMetadata>>> {
        self.mock.push(Event::Describe(table.to_string()));
        Ok(self.mock.state().tables.get(table).cloned())
    }

    fn commit(&mut self) -> Result<()> {
        self.mock.push(Event::Commit);
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.mock.push(Event::Rollback);
        if self.mock.state().fail_rollback {
            return Err(Error::connection("connection reset by peer"));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.mock.push(Event::Close);
        if self.mock.state().fail_close {
            return Err(Error::connection("socket already closed"));
        }
        Ok(())
    }
}

/// Install a test subscriber once; honours RUST_LOG
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn schema(fields: Vec<FieldSchema>) -> Arc<RecordSchema> {
    Arc::new(RecordSchema::new(fields).unwrap())
}

pub fn record(topic: &str, schema: &Arc<RecordSchema>, values: &[(&str, Value)]) -> Record {
    Record::new(
        topic,
        Arc::clone(schema),
        values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect(),
    )
}

/// `id INT64 PK, name STRING`
pub fn users_schema() -> Arc<RecordSchema> {
    schema(vec![
        FieldSchema::new("id", FieldType::Int64).primary_key(),
        FieldSchema::new("name", FieldType::String),
    ])
}

pub fn user(topic: &str, schema: &Arc<RecordSchema>, id: i64, name: &str) -> Record {
    record(
        topic,
        schema,
        &[("id", Value::Int64(id)), ("name", Value::from(name))],
    )
}
