//! Configuration types for dma.
//!
//! Settings come from an optional YAML file; command-line flags and
//! environment variables override it. Anything still missing after that is
//! filled in by the [`crate::wizard`] before a session is created.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Database product of the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EngineKind {
    /// MySQL (and compatible forks).
    #[serde(rename = "mysql")]
    MySql,
    /// `PostgreSQL`.
    #[serde(rename = "postgres", alias = "postgresql")]
    Postgres,
    /// Microsoft SQL Server.
    #[serde(rename = "mssql", alias = "sqlserver")]
    SqlServer,
    /// Oracle Database.
    #[serde(rename = "oracle")]
    Oracle,
}

impl EngineKind {
    /// Returns all engine kinds.
    pub fn all() -> [Self; 4] {
        [Self::MySql, Self::Postgres, Self::SqlServer, Self::Oracle]
    }

    /// Short name used in identifiers and on the command line.
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::MySql => "mysql",
            Self::Postgres => "postgres",
            Self::SqlServer => "mssql",
            Self::Oracle => "oracle",
        }
    }

    /// Human-readable product name.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::MySql => "MySQL",
            Self::Postgres => "PostgreSQL",
            Self::SqlServer => "SQL Server",
            Self::Oracle => "Oracle",
        }
    }

    /// Standard listener port.
    pub fn default_port(&self) -> u16 {
        match self {
            Self::MySql => 3306,
            Self::Postgres => 5432,
            Self::SqlServer => 1433,
            Self::Oracle => 1521,
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

impl FromStr for EngineKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "mysql" => Ok(Self::MySql),
            "postgres" | "postgresql" | "pg" => Ok(Self::Postgres),
            "mssql" | "sqlserver" | "sql-server" => Ok(Self::SqlServer),
            "oracle" => Ok(Self::Oracle),
            other => Err(Error::Config(format!(
                "unknown database type '{other}'. Supported: mysql, postgres, mssql, oracle"
            ))),
        }
    }
}

/// Fully resolved connection parameters for one source database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    /// Engine of the source database.
    pub engine: EngineKind,
    /// Hostname or IP address.
    pub host: String,
    /// Listener port.
    pub port: u16,
    /// Database (or Oracle service) name.
    pub database: String,
    /// User to connect as.
    pub username: String,
    /// Password for `username`.
    #[serde(skip_serializing)]
    pub password: String,
    /// Label for the collection; derived when absent.
    #[serde(default)]
    pub collection_identifier: Option<String>,
}

impl ConnectionParams {
    /// Identifier used to tag collections and reports.
    ///
    /// Falls back to `{engine}-{host}-{database}`.
    pub fn identifier(&self) -> String {
        self.collection_identifier
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| format!("{}-{}-{}", self.engine, self.host, self.database))
    }

    /// Validates the parameters.
    ///
    /// # Errors
    ///
    /// Returns an error if a mandatory field is empty or the port is zero.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("hostname cannot be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be greater than 0".to_string()));
        }
        if self.database.trim().is_empty() {
            return Err(Error::Config("database name cannot be empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(Error::Config("username cannot be empty".to_string()));
        }
        Ok(())
    }
}

// Keep the password out of logs.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("engine", &self.engine)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("collection_identifier", &self.collection_identifier)
            .finish()
    }
}

/// Connection parameters as they arrive from the file and the command line.
/// Every field may still be missing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionArgs {
    /// Engine of the source database.
    #[serde(default)]
    pub db_type: Option<EngineKind>,
    /// Hostname or IP address.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Listener port.
    #[serde(default)]
    pub port: Option<u16>,
    /// Database name.
    #[serde(default)]
    pub database: Option<String>,
    /// User to connect as.
    #[serde(default)]
    pub username: Option<String>,
    /// Password. Prefer the `DMA_PASSWORD` environment variable.
    #[serde(default)]
    pub password: Option<String>,
    /// Label for the collection.
    #[serde(default)]
    pub collection_identifier: Option<String>,
}

impl ConnectionArgs {
    /// Fills every field that is `None` here from `fallback`.
    #[must_use]
    pub fn or(self, fallback: &ConnectionArgs) -> Self {
        Self {
            db_type: self.db_type.or(fallback.db_type),
            hostname: self.hostname.or_else(|| fallback.hostname.clone()),
            port: self.port.or(fallback.port),
            database: self.database.or_else(|| fallback.database.clone()),
            username: self.username.or_else(|| fallback.username.clone()),
            password: self.password.or_else(|| fallback.password.clone()),
            collection_identifier: self
                .collection_identifier
                .or_else(|| fallback.collection_identifier.clone()),
        }
    }

    /// Converts to [`ConnectionParams`] if nothing mandatory is missing.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first missing field.
    pub fn into_params(self) -> Result<ConnectionParams> {
        let missing = |field: &str| Error::Config(format!("missing required parameter '{field}'"));
        let params = ConnectionParams {
            engine: self.db_type.ok_or_else(|| missing("db-type"))?,
            host: self.hostname.ok_or_else(|| missing("hostname"))?,
            port: self.port.ok_or_else(|| missing("port"))?,
            database: self.database.ok_or_else(|| missing("database"))?,
            username: self.username.ok_or_else(|| missing("username"))?,
            password: self.password.ok_or_else(|| missing("password"))?,
            collection_identifier: self.collection_identifier,
        };
        params.validate()?;
        Ok(params)
    }
}

/// Report output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Terminal table.
    #[default]
    Table,
    /// Pretty-printed JSON document.
    Json,
}

impl FromStr for OutputFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(Error::Config(format!(
                "unknown output format '{other}'. Supported: table, json"
            ))),
        }
    }
}

/// Assessment run options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssessmentOptions {
    /// Deadline for connecting and collecting, in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Whole-session retries after a transient connection failure.
    #[serde(default)]
    pub connect_retries: u32,
    /// Evaluate rules on the rayon thread pool.
    #[serde(default)]
    pub parallel_evaluation: bool,
    /// Directory for collection and report documents.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Report output format.
    #[serde(default)]
    pub format: OutputFormat,
}

impl Default for AssessmentOptions {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_retries: 0,
            parallel_evaluation: false,
            output_dir: default_output_dir(),
            format: OutputFormat::default(),
        }
    }
}

/// Connectivity prober settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProberSettings {
    /// Base URL of the network management API.
    #[serde(default = "default_prober_url")]
    pub base_url: String,
    /// Delay between polls of a long-running operation, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of polls before reporting the probe as pending.
    #[serde(default = "default_max_polls")]
    pub max_polls: u32,
}

impl Default for ProberSettings {
    fn default() -> Self {
        Self {
            base_url: default_prober_url(),
            poll_interval_ms: default_poll_interval_ms(),
            max_polls: default_max_polls(),
        }
    }
}

/// Main configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssessmentConfig {
    /// Source connection defaults.
    #[serde(default)]
    pub connection: ConnectionArgs,
    /// Run options.
    #[serde(default)]
    pub options: AssessmentOptions,
    /// Connectivity prober settings.
    #[serde(default)]
    pub prober: ProberSettings,
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./dma_output")
}

fn default_prober_url() -> String {
    "https://networkmanagement.googleapis.com/v1".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_max_polls() -> u32 {
    60
}

impl AssessmentConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.options.timeout_secs == 0 {
            return Err(Error::Config(
                "timeout_secs must be greater than 0".to_string(),
            ));
        }
        if self.connection.port == Some(0) {
            return Err(Error::Config("port must be greater than 0".to_string()));
        }
        if self.prober.max_polls == 0 {
            return Err(Error::Config("max_polls must be greater than 0".to_string()));
        }
        if !self.prober.base_url.starts_with("http://")
            && !self.prober.base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "invalid prober base_url '{}': expected http(s)://",
                self.prober.base_url
            )));
        }
        Ok(())
    }
}
