//! Collected metadata about a source database.
//!
//! A [`FactSet`] maps fact names to either a measured value or an explicit
//! absence. Collectors never substitute a default for a value they could not
//! read, so rules can tell "measured zero" apart from "unknown".

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::config::EngineKind;

/// Fact vocabulary shared by collectors and rules.
pub mod names {
    /// Full server version string as reported by the engine.
    pub const VERSION: &str = "version";
    /// Major component of the server version.
    pub const VERSION_MAJOR: &str = "version_major";
    /// Minor component of the server version.
    pub const VERSION_MINOR: &str = "version_minor";
    /// Total size of the assessed database, in bytes.
    pub const DATABASE_SIZE_BYTES: &str = "database_size_bytes";
    /// Number of user tables.
    pub const TABLE_COUNT: &str = "object_count.tables";
    /// Number of user views.
    pub const VIEW_COUNT: &str = "object_count.views";
    /// Number of user indexes.
    pub const INDEX_COUNT: &str = "object_count.indexes";
    /// Number of stored procedures and functions.
    pub const ROUTINE_COUNT: &str = "object_count.routines";
    /// Number of triggers.
    pub const TRIGGER_COUNT: &str = "object_count.triggers";
    /// Number of user tables without a primary key.
    pub const TABLES_WITHOUT_PK: &str = "tables_without_primary_key";
    /// Database character set.
    pub const CHARSET: &str = "charset";

    /// Installed extensions.
    pub const PG_EXTENSIONS: &str = "postgres.extensions";
    /// `wal_level` setting.
    pub const PG_WAL_LEVEL: &str = "postgres.wal_level";
    /// `max_replication_slots` setting.
    pub const PG_MAX_REPLICATION_SLOTS: &str = "postgres.max_replication_slots";
    /// `max_wal_senders` setting.
    pub const PG_MAX_WAL_SENDERS: &str = "postgres.max_wal_senders";
    /// `shared_preload_libraries` setting, split into a list.
    pub const PG_SHARED_PRELOAD_LIBRARIES: &str = "postgres.shared_preload_libraries";
    /// Number of unlogged tables.
    pub const PG_UNLOGGED_TABLES: &str = "postgres.unlogged_tables";
    /// Number of large objects in `pg_largeobject_metadata`.
    pub const PG_LARGE_OBJECTS: &str = "postgres.large_objects";
    /// Whether the connected role has REPLICATION or superuser.
    pub const PG_HAS_REPLICATION_ROLE: &str = "postgres.has_replication_role";

    /// Whether binary logging is enabled.
    pub const MYSQL_LOG_BIN: &str = "mysql.log_bin";
    /// `binlog_format` setting.
    pub const MYSQL_BINLOG_FORMAT: &str = "mysql.binlog_format";
    /// `binlog_row_image` setting.
    pub const MYSQL_BINLOG_ROW_IMAGE: &str = "mysql.binlog_row_image";
    /// `gtid_mode` setting.
    pub const MYSQL_GTID_MODE: &str = "mysql.gtid_mode";
    /// `server_id` setting.
    pub const MYSQL_SERVER_ID: &str = "mysql.server_id";
    /// Number of tables not using InnoDB.
    pub const MYSQL_NON_INNODB_TABLES: &str = "mysql.non_innodb_tables";
    /// Binary log retention, in seconds.
    pub const MYSQL_BINLOG_RETENTION_SECONDS: &str = "mysql.binlog_retention_seconds";

    /// Server edition string.
    pub const MSSQL_EDITION: &str = "mssql.edition";
    /// Recovery model of the assessed database.
    pub const MSSQL_RECOVERY_MODEL: &str = "mssql.recovery_model";
    /// Whether change data capture is enabled on the database.
    pub const MSSQL_CDC_ENABLED: &str = "mssql.cdc_enabled";
    /// Whether the SQL Server Agent service is running.
    pub const MSSQL_SQL_AGENT_RUNNING: &str = "mssql.sql_agent_running";
    /// Whether transparent data encryption is enabled.
    pub const MSSQL_TDE_ENABLED: &str = "mssql.tde_enabled";
    /// Number of tables with FILESTREAM columns.
    pub const MSSQL_FILESTREAM_TABLES: &str = "mssql.filestream_tables";

    /// Archive log mode (`ARCHIVELOG` / `NOARCHIVELOG`).
    pub const ORACLE_LOG_MODE: &str = "oracle.log_mode";
    /// Whether minimal supplemental logging is enabled.
    pub const ORACLE_SUPPLEMENTAL_LOGGING: &str = "oracle.supplemental_logging";
    /// Whether the database is a multitenant container database.
    pub const ORACLE_IS_CDB: &str = "oracle.is_cdb";
    /// Number of columns with data types the target cannot replicate.
    pub const ORACLE_UNSUPPORTED_COLUMN_TYPES: &str = "oracle.unsupported_column_types";
}

/// Facts every collector must produce; failing to read one aborts collection.
pub const REQUIRED_FACTS: &[&str] = &[
    names::VERSION,
    names::VERSION_MAJOR,
    names::DATABASE_SIZE_BYTES,
    names::TABLE_COUNT,
];

/// Returns true if `name` is part of the required vocabulary.
#[must_use]
pub fn is_required(name: &str) -> bool {
    REQUIRED_FACTS.contains(&name)
}

/// A typed fact value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FactValue {
    /// Boolean flag.
    Bool(bool),
    /// Integer count or setting.
    Int(i64),
    /// Floating point metric.
    Float(f64),
    /// Text setting or identifier.
    Text(String),
    /// Sequence of values.
    List(Vec<FactValue>),
    /// Named values.
    Map(BTreeMap<String, FactValue>),
}

impl FactValue {
    /// Name of the value's type, used in fault messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    /// Returns the boolean value, if this is a flag.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value, if this is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the value as a float, widening integers.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Returns the text value.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the list items.
    #[must_use]
    pub fn as_list(&self) -> Option<&[FactValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Empty text, list or map.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Map(map) => map.is_empty(),
            _ => false,
        }
    }

    /// Case-insensitive equality for text, exact equality otherwise.
    /// Integers and floats compare numerically.
    #[must_use]
    pub fn loosely_equals(&self, other: &FactValue) -> bool {
        match (self, other) {
            (Self::Text(a), Self::Text(b)) => a.eq_ignore_ascii_case(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                self.as_f64() == other.as_f64()
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for FactValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Text(s) => write!(f, "{s}"),
            Self::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
            Self::Map(map) => {
                let rendered: Vec<String> = map.iter().map(|(k, v)| format!("{k}={v}")).collect();
                write!(f, "{{{}}}", rendered.join(", "))
            }
        }
    }
}

impl From<bool> for FactValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for FactValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for FactValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u64> for FactValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<f64> for FactValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for FactValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FactValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Vec<String>> for FactValue {
    fn from(values: Vec<String>) -> Self {
        Self::List(values.into_iter().map(Self::Text).collect())
    }
}

/// One named, typed piece of collected metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Fact name from the vocabulary in [`names`].
    pub name: String,
    /// Measured value.
    pub value: FactValue,
    /// Optional unit (e.g. "bytes").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

/// Slot for one fact name: measured, or explicitly known to be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FactSlot {
    /// The collector read a value.
    Measured(Fact),
    /// The collector tried and failed, or the engine does not expose it.
    Absent {
        /// Why the value is missing.
        reason: String,
    },
}

/// Facts collected from one database instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FactSet {
    slots: BTreeMap<String, FactSlot>,
}

impl FactSet {
    /// Creates an empty fact set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a measured value, replacing any previous slot for `name`.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<FactValue>) {
        self.insert_fact(name, value, None);
    }

    /// Records a measured value with a unit.
    pub fn insert_with_unit(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FactValue>,
        unit: &str,
    ) {
        self.insert_fact(name, value, Some(unit.to_string()));
    }

    fn insert_fact(
        &mut self,
        name: impl Into<String>,
        value: impl Into<FactValue>,
        unit: Option<String>,
    ) {
        let name = name.into();
        let fact = Fact {
            name: name.clone(),
            value: value.into(),
            unit,
        };
        self.slots.insert(name, FactSlot::Measured(fact));
    }

    /// Records that `name` could not be measured.
    pub fn mark_absent(&mut self, name: impl Into<String>, reason: impl Into<String>) {
        self.slots.insert(
            name.into(),
            FactSlot::Absent {
                reason: reason.into(),
            },
        );
    }

    /// Builder-style insert.
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<FactValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Builder-style absence.
    #[must_use]
    pub fn with_absent(mut self, name: &str, reason: &str) -> Self {
        self.mark_absent(name, reason);
        self
    }

    /// Measured value for `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&FactValue> {
        self.fact(name).map(|fact| &fact.value)
    }

    /// Measured fact for `name`, if any.
    #[must_use]
    pub fn fact(&self, name: &str) -> Option<&Fact> {
        match self.slots.get(name) {
            Some(FactSlot::Measured(fact)) => Some(fact),
            _ => None,
        }
    }

    /// Returns true if `name` has a measured value.
    #[must_use]
    pub fn is_measured(&self, name: &str) -> bool {
        self.fact(name).is_some()
    }

    /// Reason recorded for an absent fact.
    #[must_use]
    pub fn absence_reason(&self, name: &str) -> Option<&str> {
        match self.slots.get(name) {
            Some(FactSlot::Absent { reason }) => Some(reason),
            _ => None,
        }
    }

    /// Names from `required` that have no measured value, in input order.
    #[must_use]
    pub fn missing<'a>(&self, required: &[&'a str]) -> Vec<&'a str> {
        required
            .iter()
            .copied()
            .filter(|name| !self.is_measured(name))
            .collect()
    }

    /// Iterates over all slots in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &FactSlot)> {
        self.slots.iter()
    }

    /// Number of slots (measured and absent).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Number of measured facts.
    #[must_use]
    pub fn measured_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| matches!(slot, FactSlot::Measured(_)))
            .count()
    }
}

/// Persisted output of a data collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    /// Label used to tag this collection and reports derived from it.
    pub collection_identifier: String,
    /// Engine the facts were collected from.
    pub engine: EngineKind,
    /// When collection finished.
    pub collected_at: DateTime<Utc>,
    /// Collected facts.
    pub facts: FactSet,
}

impl Collection {
    /// Loads a collection document from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }
}
