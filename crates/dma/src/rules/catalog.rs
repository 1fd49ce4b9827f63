//! Built-in rule catalog.
//!
//! Rule ids are stable: once published, an id keeps its meaning so reports
//! from different runs can be compared. Retire an id instead of reusing it.

use std::collections::HashSet;
use std::sync::OnceLock;

use super::{Check, Predicate, Rule, Severity};
use crate::config::EngineKind;
use crate::error::{Error, Result};
use crate::facts::{names, FactSet};

/// 10 TiB.
const MAX_DATABASE_SIZE_BYTES: f64 = 10.0 * 1024.0 * 1024.0 * 1024.0 * 1024.0;

const MIN_BINLOG_RETENTION_DAYS: f64 = 7.0;

const SECONDS_PER_DAY: f64 = 86_400.0;

/// Extensions the managed PostgreSQL target cannot host.
const UNSUPPORTED_PG_EXTENSIONS: &[&str] = &[
    "adminpack",
    "citus",
    "file_fdw",
    "plperlu",
    "plpython3u",
    "plpythonu",
    "timescaledb",
];

/// Immutable, ordered set of rules with unique ids.
#[derive(Debug, Clone)]
pub struct Catalog {
    rules: Vec<Rule>,
}

impl Catalog {
    /// Builds a catalog, rejecting duplicate ids.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first duplicate or empty id.
    pub fn new(rules: Vec<Rule>) -> Result<Self> {
        let mut seen = HashSet::new();
        for rule in &rules {
            if rule.id.trim().is_empty() {
                return Err(Error::Config("rule id cannot be empty".to_string()));
            }
            if !seen.insert(rule.id.as_str()) {
                return Err(Error::Config(format!("duplicate rule id '{}'", rule.id)));
            }
        }
        Ok(Self { rules })
    }

    /// The process-wide built-in catalog.
    pub fn builtin() -> &'static Catalog {
        static BUILTIN: OnceLock<Catalog> = OnceLock::new();
        // Uniqueness of the built-in ids is covered by tests.
        BUILTIN.get_or_init(|| Catalog {
            rules: builtin_rules(),
        })
    }

    /// Rules in declaration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Rules that apply to `engine`, in declaration order.
    pub fn applicable(&self, engine: EngineKind) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter(move |rule| rule.applies_to(engine))
    }

    /// Looks up a rule by id.
    pub fn get(&self, id: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.id == id)
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Returns true if the catalog has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// All built-in rules in canonical order.
pub fn builtin_rules() -> Vec<Rule> {
    let mut rules = common_rules();
    rules.extend(postgres_rules());
    rules.extend(mysql_rules());
    rules.extend(mssql_rules());
    rules.extend(oracle_rules());
    rules
}

fn common_rules() -> Vec<Rule> {
    vec![
        Rule::new(
            "common.version_detected",
            Severity::Info,
            "version",
            Predicate::present(names::VERSION),
        )
        .titled("Server version detected"),
        Rule::new(
            "common.database_size",
            Severity::Warning,
            "storage",
            Predicate::at_most(names::DATABASE_SIZE_BYTES, MAX_DATABASE_SIZE_BYTES),
        )
        .titled("Database fits the target storage limit")
        .remediation(
            "Databases above 10 TiB need a storage plan: archive cold data or split the \
             migration into several jobs.",
        ),
        Rule::new(
            "common.primary_keys",
            Severity::Warning,
            "schema",
            Predicate::at_most(names::TABLES_WITHOUT_PK, 0.0),
        )
        .titled("All tables have a primary key")
        .remediation(
            "Add a primary key to every table. Tables without one replicate slowly and \
             updates or deletes on them may not be applied.",
        ),
    ]
}

fn postgres_rules() -> Vec<Rule> {
    let pg = &[EngineKind::Postgres];
    vec![
        Rule::new(
            "postgres.version_supported",
            Severity::Blocker,
            "version",
            Predicate::version_at_least(9, 4),
        )
        .titled("PostgreSQL 9.4 or later")
        .for_engines(pg)
        .remediation("Upgrade the source to PostgreSQL 9.4 or later before migrating."),
        Rule::new(
            "postgres.wal_level_logical",
            Severity::Blocker,
            "replication",
            Predicate::equals(names::PG_WAL_LEVEL, "logical"),
        )
        .titled("wal_level is logical")
        .for_engines(pg)
        .remediation("Set wal_level = logical in postgresql.conf and restart the server."),
        Rule::new(
            "postgres.replication_slots",
            Severity::Blocker,
            "replication",
            Predicate::at_least(names::PG_MAX_REPLICATION_SLOTS, 1.0),
        )
        .titled("Replication slots available")
        .for_engines(pg)
        .remediation(
            "Set max_replication_slots to at least the number of databases being migrated.",
        ),
        Rule::new(
            "postgres.wal_senders",
            Severity::Warning,
            "replication",
            Predicate::at_least(names::PG_MAX_WAL_SENDERS, 1.0),
        )
        .titled("WAL senders available")
        .for_engines(pg)
        .remediation("Set max_wal_senders to at least max_replication_slots plus existing replicas."),
        Rule::new(
            "postgres.pglogical_installed",
            Severity::Warning,
            "replication",
            Predicate::any(vec![
                Predicate::contains(names::PG_EXTENSIONS, "pglogical"),
                Predicate::contains(names::PG_SHARED_PRELOAD_LIBRARIES, "pglogical"),
            ]),
        )
        .titled("pglogical is installed")
        .for_engines(pg)
        .remediation(
            "Install the pglogical package, add it to shared_preload_libraries and run \
             CREATE EXTENSION pglogical in every migrated database.",
        ),
        Rule::new(
            "postgres.unsupported_extensions",
            Severity::Blocker,
            "extensions",
            Predicate::contains_none(names::PG_EXTENSIONS, UNSUPPORTED_PG_EXTENSIONS),
        )
        .titled("No unsupported extensions")
        .for_engines(pg)
        .remediation("Drop the listed extensions or move their data out before migrating."),
        Rule::new(
            "postgres.unlogged_tables",
            Severity::Warning,
            "schema",
            Predicate::at_most(names::PG_UNLOGGED_TABLES, 0.0),
        )
        .titled("No unlogged tables")
        .for_engines(pg)
        .remediation(
            "Unlogged tables are not replicated. Convert them with ALTER TABLE ... SET LOGGED \
             or copy them separately.",
        ),
        Rule::new(
            "postgres.large_objects",
            Severity::Warning,
            "schema",
            Predicate::at_most(names::PG_LARGE_OBJECTS, 0.0),
        )
        .titled("No large objects")
        .for_engines(pg)
        .remediation("Large objects are not replicated; move them to bytea columns or copy them manually."),
        Rule::new(
            "postgres.replication_role",
            Severity::Blocker,
            "privileges",
            Predicate::is_true(names::PG_HAS_REPLICATION_ROLE),
        )
        .titled("Migration user can replicate")
        .for_engines(pg)
        .remediation("Grant the REPLICATION attribute: ALTER ROLE <user> WITH REPLICATION."),
    ]
}

fn mysql_rules() -> Vec<Rule> {
    let mysql = &[EngineKind::MySql];
    vec![
        Rule::new(
            "mysql.version_supported",
            Severity::Blocker,
            "version",
            Predicate::version_at_least(5, 6),
        )
        .titled("MySQL 5.6 or later")
        .for_engines(mysql)
        .remediation("Upgrade the source to MySQL 5.6 or later before migrating."),
        Rule::new(
            "mysql.binary_log_enabled",
            Severity::Blocker,
            "replication",
            Predicate::is_true(names::MYSQL_LOG_BIN),
        )
        .titled("Binary logging enabled")
        .for_engines(mysql)
        .remediation("Enable binary logging with log-bin in my.cnf and restart the server."),
        Rule::new(
            "mysql.binlog_format_row",
            Severity::Blocker,
            "replication",
            Predicate::equals(names::MYSQL_BINLOG_FORMAT, "ROW"),
        )
        .titled("binlog_format is ROW")
        .for_engines(mysql)
        .remediation("Set binlog_format = ROW."),
        Rule::new(
            "mysql.binlog_row_image_full",
            Severity::Warning,
            "replication",
            Predicate::equals(names::MYSQL_BINLOG_ROW_IMAGE, "FULL"),
        )
        .titled("binlog_row_image is FULL")
        .for_engines(mysql)
        .remediation("Set binlog_row_image = FULL."),
        Rule::new(
            "mysql.gtid_mode",
            Severity::Info,
            "replication",
            Predicate::equals(names::MYSQL_GTID_MODE, "ON"),
        )
        .titled("GTID mode is ON")
        .for_engines(mysql)
        .remediation("GTID-based replication is preferred; enable gtid_mode and enforce_gtid_consistency."),
        Rule::new(
            "mysql.server_id_set",
            Severity::Blocker,
            "replication",
            Predicate::at_least(names::MYSQL_SERVER_ID, 1.0),
        )
        .titled("server_id is set")
        .for_engines(mysql)
        .remediation("Set server_id to a non-zero value unique in the replication topology."),
        Rule::new(
            "mysql.binlog_retention",
            Severity::Warning,
            "replication",
            Predicate::custom(&[names::MYSQL_BINLOG_RETENTION_SECONDS], binlog_retention),
        )
        .titled("Binary logs retained for 7 days")
        .for_engines(mysql)
        .remediation(
            "Keep binary logs for at least 7 days (binlog_expire_logs_seconds = 604800) so \
             replication can resume after an interruption.",
        ),
        Rule::new(
            "mysql.non_innodb_tables",
            Severity::Warning,
            "storage",
            Predicate::at_most(names::MYSQL_NON_INNODB_TABLES, 0.0),
        )
        .titled("All tables use InnoDB")
        .for_engines(mysql)
        .remediation("Convert tables with ALTER TABLE ... ENGINE = InnoDB."),
    ]
}

fn mssql_rules() -> Vec<Rule> {
    let mssql = &[EngineKind::SqlServer];
    vec![
        Rule::new(
            "mssql.version_supported",
            Severity::Blocker,
            "version",
            Predicate::version_at_least(10, 0),
        )
        .titled("SQL Server 2008 or later")
        .for_engines(mssql)
        .remediation("Upgrade the source to SQL Server 2008 or later before migrating."),
        Rule::new(
            "mssql.edition_supports_cdc",
            Severity::Blocker,
            "edition",
            Predicate::custom(
                &[names::MSSQL_EDITION, names::VERSION_MAJOR, names::VERSION],
                edition_supports_cdc,
            ),
        )
        .titled("Edition supports change data capture")
        .for_engines(mssql)
        .remediation(
            "Change data capture needs Enterprise or Developer edition, or Standard edition \
             on SQL Server 2016 SP1 or later.",
        ),
        Rule::new(
            "mssql.full_recovery_model",
            Severity::Blocker,
            "replication",
            Predicate::equals(names::MSSQL_RECOVERY_MODEL, "FULL"),
        )
        .titled("Recovery model is FULL")
        .for_engines(mssql)
        .remediation("ALTER DATABASE <db> SET RECOVERY FULL, then take a full backup."),
        Rule::new(
            "mssql.cdc_enabled",
            Severity::Warning,
            "replication",
            Predicate::is_true(names::MSSQL_CDC_ENABLED),
        )
        .titled("Change data capture enabled")
        .for_engines(mssql)
        .remediation("Run EXEC sys.sp_cdc_enable_db in the migrated database."),
        Rule::new(
            "mssql.sql_agent_running",
            Severity::Warning,
            "replication",
            Predicate::is_true(names::MSSQL_SQL_AGENT_RUNNING),
        )
        .titled("SQL Server Agent running")
        .for_engines(mssql)
        .remediation("Start the SQL Server Agent service; CDC capture jobs depend on it."),
        Rule::new(
            "mssql.tde",
            Severity::Warning,
            "security",
            Predicate::is_false(names::MSSQL_TDE_ENABLED),
        )
        .titled("Transparent data encryption disabled")
        .for_engines(mssql)
        .remediation("Backups of TDE databases need the certificate exported and imported on the target."),
        Rule::new(
            "mssql.filestream_tables",
            Severity::Warning,
            "schema",
            Predicate::at_most(names::MSSQL_FILESTREAM_TABLES, 0.0),
        )
        .titled("No FILESTREAM tables")
        .for_engines(mssql)
        .remediation("FILESTREAM data is not supported on the target; move it to varbinary(max) or object storage."),
    ]
}

fn oracle_rules() -> Vec<Rule> {
    let oracle = &[EngineKind::Oracle];
    vec![
        Rule::new(
            "oracle.version_supported",
            Severity::Blocker,
            "version",
            Predicate::version_at_least(11, 2),
        )
        .titled("Oracle 11g Release 2 or later")
        .for_engines(oracle)
        .remediation("Upgrade the source to Oracle 11.2 or later before migrating."),
        Rule::new(
            "oracle.archivelog_mode",
            Severity::Blocker,
            "replication",
            Predicate::equals(names::ORACLE_LOG_MODE, "ARCHIVELOG"),
        )
        .titled("Database in ARCHIVELOG mode")
        .for_engines(oracle)
        .remediation("SHUTDOWN IMMEDIATE; STARTUP MOUNT; ALTER DATABASE ARCHIVELOG; ALTER DATABASE OPEN;"),
        Rule::new(
            "oracle.supplemental_logging",
            Severity::Blocker,
            "replication",
            Predicate::is_true(names::ORACLE_SUPPLEMENTAL_LOGGING),
        )
        .titled("Supplemental logging enabled")
        .for_engines(oracle)
        .remediation("ALTER DATABASE ADD SUPPLEMENTAL LOG DATA;"),
        Rule::new(
            "oracle.unsupported_column_types",
            Severity::Warning,
            "schema",
            Predicate::at_most(names::ORACLE_UNSUPPORTED_COLUMN_TYPES, 0.0),
        )
        .titled("No columns with unsupported data types")
        .for_engines(oracle)
        .remediation("Columns of type BFILE, ANYDATA, XMLTYPE or SDO_GEOMETRY need manual conversion."),
        Rule::new(
            "oracle.multitenant",
            Severity::Info,
            "topology",
            Predicate::is_false(names::ORACLE_IS_CDB),
        )
        .titled("Non-container database")
        .for_engines(oracle)
        .remediation("For a container database, assess and migrate each pluggable database separately."),
    ]
}

fn binlog_retention(facts: &FactSet) -> std::result::Result<Check, String> {
    let value = facts
        .get(names::MYSQL_BINLOG_RETENTION_SECONDS)
        .ok_or_else(|| "binlog retention was not measured".to_string())?;
    let seconds = value.as_f64().ok_or_else(|| {
        format!(
            "fact '{}' is {}, expected a number",
            names::MYSQL_BINLOG_RETENTION_SECONDS,
            value.type_name()
        )
    })?;
    // 0 means logs are never purged automatically.
    if seconds == 0.0 {
        return Ok(Check::pass("binary logs are never expired"));
    }
    let days = seconds / SECONDS_PER_DAY;
    let detail = format!(
        "binary logs retained for {days:.1} days (minimum {MIN_BINLOG_RETENTION_DAYS})"
    );
    if days >= MIN_BINLOG_RETENTION_DAYS {
        Ok(Check::pass(detail))
    } else {
        Ok(Check::fail(detail))
    }
}

fn edition_supports_cdc(facts: &FactSet) -> std::result::Result<Check, String> {
    let edition = facts
        .get(names::MSSQL_EDITION)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("fact '{}' is not text", names::MSSQL_EDITION))?;
    let major = facts
        .get(names::VERSION_MAJOR)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| format!("fact '{}' is not an int", names::VERSION_MAJOR))?;

    let lowered = edition.to_lowercase();
    let supported = if lowered.contains("enterprise") || lowered.contains("developer") {
        true
    } else if lowered.contains("standard") {
        // Standard gained CDC in 2016 SP1 (build 13.0.4001).
        match major {
            m if m > 13 => true,
            13 => product_build(facts)? >= STANDARD_CDC_MIN_BUILD,
            _ => false,
        }
    } else {
        false
    };
    let detail = format!("edition '{edition}' on major version {major}");
    if supported {
        Ok(Check::pass(detail))
    } else {
        Ok(Check::fail(detail))
    }
}

const STANDARD_CDC_MIN_BUILD: i64 = 4001;

/// Build number from a `major.minor.build.revision` product version.
fn product_build(facts: &FactSet) -> std::result::Result<i64, String> {
    let version = facts
        .get(names::VERSION)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("fact '{}' is not text", names::VERSION))?;
    version
        .split('.')
        .nth(2)
        .and_then(|build| build.trim().parse().ok())
        .ok_or_else(|| format!("no build number in version '{version}'"))
}
