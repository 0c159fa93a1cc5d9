//! Sink configuration
//!
//! `SinkConfig` is the effective configuration of a writer: destination
//! connection, table naming, insert mode, batching and auto-DDL switches.
//! Per-topic overrides live under `topics` and are folded in by
//! [`SinkConfig::contextual`].
//!
//! ```yaml
//! connection_url: "postgres://db:5432/warehouse"
//! connection_user: sink
//! connection_password: "${SINK_PASSWORD}"
//! table_name_format: "cdc_${topic}"
//! insert_mode: upsert
//! batch_size: 2000
//! topics:
//!   audit-log:
//!     insert_mode: insert
//!     table_name_format: "audit"
//! ```

use regex::Regex;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use validator::Validate;

use crate::connection::ConnectionConfig;
use crate::dialect::Dialect;
use crate::error::{Error, Result};

/// Placeholder substituted with the record topic in `table_name_format`
pub const TOPIC_PLACEHOLDER: &str = "${topic}";

static ENV_VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*)(?::-([^}]*))?\}")
        .expect("env var regex pattern is invalid - this is a bug")
});

/// A string holding a secret (password, token)
///
/// Redacted in `Debug`, `Display` and serialization.
#[derive(Clone)]
pub struct SensitiveString(SecretString);

impl SensitiveString {
    /// Create a new sensitive string
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::new(value.into().into_boxed_str()))
    }

    /// Expose the secret value.
    ///
    /// Use sparingly - only when the actual value is needed (e.g., for authentication).
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl std::fmt::Display for SensitiveString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl From<String> for SensitiveString {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for SensitiveString {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl Serialize for SensitiveString {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str("***REDACTED***")
    }
}

impl<'de> Deserialize<'de> for SensitiveString {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::new(value))
    }
}

/// How rows are written
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum InsertMode {
    /// Plain INSERT (fails on duplicate keys)
    #[default]
    Insert,
    /// Insert or update on primary-key conflict
    Upsert,
}

/// Per-topic overrides of the sink configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicOverrides {
    /// Table name template for this topic
    #[serde(default)]
    pub table_name_format: Option<String>,
    /// Insert mode for this topic
    #[serde(default)]
    pub insert_mode: Option<InsertMode>,
    /// Batch size for this topic
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Auto-create switch for this topic
    #[serde(default)]
    pub auto_create: Option<bool>,
    /// Auto-evolve switch for this topic
    #[serde(default)]
    pub auto_evolve: Option<bool>,
}

/// Sink configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SinkConfig {
    /// Destination connection URL; its scheme selects the SQL dialect
    #[validate(length(min = 1))]
    pub connection_url: String,

    /// Connection user
    #[serde(default)]
    pub connection_user: Option<String>,

    /// Connection password
    #[serde(default)]
    pub connection_password: Option<SensitiveString>,

    /// Destination table template; `${topic}` is replaced by the record topic
    #[serde(default = "default_table_name_format")]
    #[validate(length(min = 1))]
    pub table_name_format: String,

    /// Insert mode (default: insert)
    #[serde(default)]
    pub insert_mode: InsertMode,

    /// Maximum records per batched statement (default: 3000)
    #[serde(default = "default_batch_size")]
    #[validate(range(min = 1, max = 1_000_000))]
    pub batch_size: usize,

    /// Create missing tables (default: true)
    #[serde(default = "default_true")]
    pub auto_create: bool,

    /// Add missing columns to existing tables (default: true)
    #[serde(default = "default_true")]
    pub auto_evolve: bool,

    /// Per-topic overrides
    #[serde(default)]
    pub topics: HashMap<String, TopicOverrides>,
}

fn default_table_name_format() -> String {
    TOPIC_PLACEHOLDER.to_string()
}

fn default_batch_size() -> usize {
    3000
}

fn default_true() -> bool {
    true
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            connection_url: String::new(),
            connection_user: None,
            connection_password: None,
            table_name_format: default_table_name_format(),
            insert_mode: InsertMode::default(),
            batch_size: default_batch_size(),
            auto_create: true,
            auto_evolve: true,
            topics: HashMap::new(),
        }
    }
}

impl SinkConfig {
    /// Create a configuration for a connection URL with defaults
    pub fn new(connection_url: impl Into<String>) -> Self {
        Self {
            connection_url: connection_url.into(),
            ..Default::default()
        }
    }

    /// Set the table name template
    pub fn with_table_name_format(mut self, format: impl Into<String>) -> Self {
        self.table_name_format = format.into();
        self
    }

    /// Set the insert mode
    pub fn with_insert_mode(mut self, mode: InsertMode) -> Self {
        self.insert_mode = mode;
        self
    }

    /// Set the batch size
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the auto-DDL switches
    pub fn with_auto_ddl(mut self, auto_create: bool, auto_evolve: bool) -> Self {
        self.auto_create = auto_create;
        self.auto_evolve = auto_evolve;
        self
    }

    /// Set connection credentials
    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<SensitiveString>,
    ) -> Self {
        self.connection_user = Some(user.into());
        self.connection_password = Some(password.into());
        self
    }

    /// Add overrides for a topic
    pub fn with_topic(mut self, topic: impl Into<String>, overrides: TopicOverrides) -> Self {
        self.topics.insert(topic.into(), overrides);
        self
    }

    /// Parse from YAML, expanding `${VAR}` / `${VAR:-default}` environment
    /// references first
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Self = serde_yaml::from_str(&expanded)
            .map_err(|e| Error::config(format!("failed to parse sink config: {}", e)))?;
        config.check()?;
        Ok(config)
    }

    /// Load from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    /// Validate field ranges, overrides and the dialect scheme
    pub fn check(&self) -> Result<()> {
        self.validate()
            .map_err(|e| Error::config(format!("validation failed: {}", e)))?;

        for (topic, overrides) in &self.topics {
            if let Some(size) = overrides.batch_size {
                if size == 0 {
                    return Err(Error::config(format!(
                        "topic '{}': batch_size must be at least 1",
                        topic
                    )));
                }
            }
            if let Some(format) = &overrides.table_name_format {
                if format.trim().is_empty() {
                    return Err(Error::config(format!(
                        "topic '{}': table_name_format cannot be empty",
                        topic
                    )));
                }
            }
        }

        self.dialect()?;
        Ok(())
    }

    /// Dialect selected by the connection URL scheme
    pub fn dialect(&self) -> Result<Dialect> {
        Dialect::from_connection_url(&self.connection_url)
    }

    /// Effective configuration for one topic (overrides folded in)
    pub fn contextual(&self, topic: &str) -> SinkConfig {
        let mut effective = SinkConfig {
            topics: HashMap::new(),
            ..self.clone()
        };
        if let Some(o) = self.topics.get(topic) {
            if let Some(format) = &o.table_name_format {
                effective.table_name_format = format.clone();
            }
            if let Some(mode) = o.insert_mode {
                effective.insert_mode = mode;
            }
            if let Some(size) = o.batch_size {
                effective.batch_size = size;
            }
            if let Some(create) = o.auto_create {
                effective.auto_create = create;
            }
            if let Some(evolve) = o.auto_evolve {
                effective.auto_evolve = evolve;
            }
        }
        effective
    }

    /// Destination table for a topic
    pub fn table_name_for(&self, topic: &str) -> Result<String> {
        let table = self.table_name_format.replace(TOPIC_PLACEHOLDER, topic);
        if table.trim().is_empty() {
            return Err(Error::invalid_argument(format!(
                "table name for topic '{}' is blank",
                topic
            )));
        }
        Ok(table)
    }

    /// Connection settings for the connection factory
    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.connection_url.clone(),
            user: self.connection_user.clone(),
            password: self.connection_password.clone(),
            ..Default::default()
        }
    }
}

/// Expand environment variables in the format ${VAR} or ${VAR:-default};
/// `${topic}` is left for table name resolution
fn expand_env_vars(content: &str) -> String {
    ENV_VAR_REGEX
        .replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            if var_name == "topic" {
                return caps[0].to_string();
            }
            let default = caps.get(2).map(|m| m.as_str());
            std::env::var(var_name).unwrap_or_else(|_| default.unwrap_or("").to_string())
        })
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SinkConfig::new("sqlite::memory:");
        assert_eq!(config.table_name_format, "${topic}");
        assert_eq!(config.insert_mode, InsertMode::Insert);
        assert_eq!(config.batch_size, 3000);
        assert!(config.auto_create);
        assert!(config.auto_evolve);
        assert!(config.check().is_ok());
    }

    #[test]
    fn test_table_name_for() {
        let config = SinkConfig::new("sqlite::memory:").with_table_name_format("kafka_${topic}");
        assert_eq!(config.table_name_for("orders").unwrap(), "kafka_orders");

        let fixed = SinkConfig::new("sqlite::memory:").with_table_name_format("events");
        assert_eq!(fixed.table_name_for("anything").unwrap(), "events");

        let blank = SinkConfig::new("sqlite::memory:");
        assert!(matches!(
            blank.table_name_for(" "),
            Err(Error::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_contextual_overrides() {
        let config = SinkConfig::new("postgres://db/app")
            .with_insert_mode(InsertMode::Upsert)
            .with_topic(
                "audit",
                TopicOverrides {
                    insert_mode: Some(InsertMode::Insert),
                    table_name_format: Some("audit_log".into()),
                    batch_size: Some(10),
                    ..Default::default()
                },
            );

        let audit = config.contextual("audit");
        assert_eq!(audit.insert_mode, InsertMode::Insert);
        assert_eq!(audit.table_name_for("audit").unwrap(), "audit_log");
        assert_eq!(audit.batch_size, 10);
        assert!(audit.topics.is_empty());

        let other = config.contextual("orders");
        assert_eq!(other.insert_mode, InsertMode::Upsert);
        assert_eq!(other.table_name_for("orders").unwrap(), "orders");
    }

    #[test]
    fn test_check_rejects_bad_values() {
        assert!(SinkConfig::new("").check().is_err());
        assert!(SinkConfig::new("sqlite::memory:")
            .with_batch_size(0)
            .check()
            .is_err());

        let err = SinkConfig::new("oracle:thin:@db").check().unwrap_err();
        assert!(matches!(err, Error::UnsupportedDialect { .. }));

        let bad_override = SinkConfig::new("sqlite::memory:").with_topic(
            "t",
            TopicOverrides {
                batch_size: Some(0),
                ..Default::default()
            },
        );
        assert!(bad_override.check().is_err());
    }

    #[test]
    fn test_expand_env_vars_keeps_topic_placeholder() {
        let expanded = expand_env_vars("a: ${RIVVEN_SQLSINK_UNSET_VAR:-fallback}\nb: ${topic}");
        assert_eq!(expanded, "a: fallback\nb: ${topic}");
    }

    #[test]
    fn test_sensitive_string_redacted() {
        let secret = SensitiveString::new("hunter2");
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(secret.to_string(), "[REDACTED]");
        assert_eq!(secret.expose_secret(), "hunter2");
    }

    #[test]
    fn test_connection_config() {
        let config = SinkConfig::new("postgres://db/app").with_credentials("sink", "pw");
        let conn = config.connection_config();
        assert_eq!(conn.url, "postgres://db/app");
        assert_eq!(conn.user.as_deref(), Some("sink"));
        assert_eq!(conn.password.as_ref().map(|p| p.expose_secret()), Some("pw"));
    }
}
