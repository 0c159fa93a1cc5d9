//! Change records consumed by the sink
//!
//! A [`Record`] is an immutable, caller-owned row image tagged with the topic
//! it came from. Its [`RecordSchema`] describes the fields in order and which
//! of them form the primary key. The sink derives a [`FieldSet`] from the
//! schema to decide whether consecutive records can share one batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::types::{FieldType, Value};

/// A single field in a record schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSchema {
    /// Field (and column) name
    pub name: String,
    /// Logical type
    pub field_type: FieldType,
    /// Whether records may omit the field
    pub optional: bool,
    /// Whether the field is part of the primary key
    pub primary_key: bool,
}

impl FieldSchema {
    /// Create a required, non-key field
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            optional: false,
            primary_key: false,
        }
    }

    /// Mark the field as optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Mark the field as part of the primary key
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }
}

/// Ordered field list describing a record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSchema {
    /// Upstream schema version, if known
    pub version: Option<i32>,
    fields: Vec<FieldSchema>,
}

impl RecordSchema {
    /// Create a schema, rejecting blank or duplicate field names
    pub fn new(fields: Vec<FieldSchema>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(fields.len());
        for field in &fields {
            if field.name.trim().is_empty() {
                return Err(Error::invalid_argument("field name cannot be blank"));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(Error::invalid_argument(format!(
                    "duplicate field '{}' in record schema",
                    field.name
                )));
            }
        }
        Ok(Self {
            version: None,
            fields,
        })
    }

    /// Set the schema version
    pub fn with_version(mut self, version: i32) -> Self {
        self.version = Some(version);
        self
    }

    /// Fields in declaration order
    #[inline]
    pub fn fields(&self) -> &[FieldSchema] {
        &self.fields
    }

    /// Derive the column set this schema requires
    pub fn field_set(&self) -> FieldSet {
        FieldSet::new(
            self.fields
                .iter()
                .map(|f| FieldSpec {
                    name: f.name.clone(),
                    field_type: f.field_type,
                    primary_key: f.primary_key,
                })
                .collect(),
        )
    }
}

/// A record to write to the sink
#[derive(Debug, Clone)]
pub struct Record {
    /// Origin topic (the context the destination table is resolved from)
    pub topic: String,
    /// Shared schema of the record
    pub schema: Arc<RecordSchema>,
    /// Field values keyed by field name; absent optional fields are NULL
    pub values: HashMap<String, Value>,
    /// Upstream offset (for tracking)
    pub offset: Option<u64>,
}

impl Record {
    /// Create a new record
    pub fn new(
        topic: impl Into<String>,
        schema: Arc<RecordSchema>,
        values: HashMap<String, Value>,
    ) -> Self {
        Self {
            topic: topic.into(),
            schema,
            values,
            offset: None,
        }
    }

    /// Set the offset
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Value of a field, NULL when the record does not carry it
    pub fn value(&self, name: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(name).unwrap_or(&NULL)
    }
}

/// One required column: name, logical type and key membership
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FieldSpec {
    /// Column name
    pub name: String,
    /// Logical type
    pub field_type: FieldType,
    /// Part of the primary key
    pub primary_key: bool,
}

impl FieldSpec {
    /// Create a non-key field spec
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary_key: false,
        }
    }

    /// Create a primary-key field spec
    pub fn key(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            primary_key: true,
        }
    }
}

/// Ordered set of field specs
///
/// Equality ignores order: two sets are equal when they hold the same
/// name/type/key triples. Iteration follows the order the set was built in,
/// which becomes the column order of generated statements.
#[derive(Debug, Clone, Default)]
pub struct FieldSet {
    fields: Vec<FieldSpec>,
    signature: Vec<FieldSpec>,
}

impl FieldSet {
    /// Build a set from ordered specs
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        let mut signature = fields.clone();
        signature.sort();
        Self { fields, signature }
    }

    /// Specs in column order
    #[inline]
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Number of fields
    #[inline]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the set is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Primary-key column names in column order
    pub fn key_columns(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| f.primary_key)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Non-key column names in column order
    pub fn value_columns(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| !f.primary_key)
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Whether any field is part of the primary key
    pub fn has_primary_key(&self) -> bool {
        self.fields.iter().any(|f| f.primary_key)
    }
}

impl PartialEq for FieldSet {
    fn eq(&self, other: &Self) -> bool {
        self.signature == other.signature
    }
}

impl Eq for FieldSet {}
