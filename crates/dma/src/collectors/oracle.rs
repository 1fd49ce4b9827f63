//! Oracle collector.
//!
//! The `oracle` crate is blocking (it wraps ODPI-C), so connecting and
//! querying run on the blocking thread pool. Needs Oracle client libraries
//! at runtime; the feature is off by default.

use async_trait::async_trait;
use oracle::Connection;
use tracing::{debug, info};

use super::common::FactRecorder;
use super::{not_connected, FactCollector};
use crate::config::{ConnectionParams, EngineKind};
use crate::error::{Error, Result};
use crate::facts::{names, FactSet};

/// Schemas owned by Oracle itself.
const SYSTEM_OWNERS: &str = "('SYS', 'SYSTEM', 'OUTLN', 'DBSNMP', 'APPQOSSYS', 'AUDSYS', \
     'CTXSYS', 'DVSYS', 'GSMADMIN_INTERNAL', 'LBACSYS', 'MDSYS', 'OJVMSYS', 'OLAPSYS', \
     'ORDDATA', 'ORDSYS', 'WMSYS', 'XDB', 'EXFSYS', 'ORACLE_OCM', 'DIP', 'XS$NULL')";

/// Collector for Oracle sources.
pub struct OracleCollector {
    params: ConnectionParams,
    conn: Option<Connection>,
}

impl OracleCollector {
    /// Creates a collector; no connection is opened yet.
    pub fn new(params: ConnectionParams) -> Self {
        Self { params, conn: None }
    }

    /// Easy Connect string: `//host:port/service`.
    fn connect_string(&self) -> String {
        format!(
            "//{}:{}/{}",
            self.params.host, self.params.port, self.params.database
        )
    }
}

fn map_connect_error(err: oracle::Error) -> Error {
    let message = err.to_string();
    // ORA-01017: invalid username/password; logon denied
    if message.contains("ORA-01017") {
        Error::Authentication(message)
    } else {
        Error::Connection(message)
    }
}

fn int(conn: &Connection, sql: &str) -> std::result::Result<i64, oracle::Error> {
    conn.query_row_as::<i64>(sql, &[])
}

fn text(conn: &Connection, sql: &str) -> std::result::Result<String, oracle::Error> {
    conn.query_row_as::<String>(sql, &[])
}

fn collect_blocking(conn: &Connection) -> Result<FactSet> {
    let mut facts = FactRecorder::new(EngineKind::Oracle);

    facts.version(text(
        conn,
        "SELECT version FROM product_component_version \
         WHERE product LIKE 'Oracle%' AND ROWNUM = 1",
    ))?;
    facts.required_with_unit(
        names::DATABASE_SIZE_BYTES,
        int(conn, "SELECT NVL(SUM(bytes), 0) FROM dba_segments"),
        "bytes",
    )?;
    facts.required(
        names::TABLE_COUNT,
        int(
            conn,
            &format!("SELECT COUNT(*) FROM all_tables WHERE owner NOT IN {SYSTEM_OWNERS}"),
        ),
    )?;
    debug!("Required Oracle facts collected");

    facts.optional(
        names::VIEW_COUNT,
        int(
            conn,
            &format!("SELECT COUNT(*) FROM all_views WHERE owner NOT IN {SYSTEM_OWNERS}"),
        ),
    );
    facts.optional(
        names::INDEX_COUNT,
        int(
            conn,
            &format!("SELECT COUNT(*) FROM all_indexes WHERE owner NOT IN {SYSTEM_OWNERS}"),
        ),
    );
    facts.optional(
        names::ROUTINE_COUNT,
        int(
            conn,
            &format!(
                "SELECT COUNT(*) FROM all_objects WHERE owner NOT IN {SYSTEM_OWNERS} \
                 AND object_type IN ('PROCEDURE', 'FUNCTION', 'PACKAGE')"
            ),
        ),
    );
    facts.optional(
        names::TRIGGER_COUNT,
        int(
            conn,
            &format!("SELECT COUNT(*) FROM all_triggers WHERE owner NOT IN {SYSTEM_OWNERS}"),
        ),
    );
    facts.optional(
        names::TABLES_WITHOUT_PK,
        int(
            conn,
            &format!(
                "SELECT COUNT(*) FROM all_tables t WHERE t.owner NOT IN {SYSTEM_OWNERS} \
                 AND NOT EXISTS (SELECT 1 FROM all_constraints c \
                 WHERE c.owner = t.owner AND c.table_name = t.table_name \
                 AND c.constraint_type = 'P')"
            ),
        ),
    );
    facts.optional(
        names::CHARSET,
        text(
            conn,
            "SELECT value FROM nls_database_parameters WHERE parameter = 'NLS_CHARACTERSET'",
        ),
    );

    facts.optional(
        names::ORACLE_LOG_MODE,
        text(conn, "SELECT log_mode FROM v$database"),
    );
    facts.optional(
        names::ORACLE_SUPPLEMENTAL_LOGGING,
        text(conn, "SELECT supplemental_log_data_min FROM v$database")
            .map(|value| !value.eq_ignore_ascii_case("NO")),
    );
    // v$database.cdb exists from 12c on.
    facts.optional(
        names::ORACLE_IS_CDB,
        text(conn, "SELECT cdb FROM v$database").map(|value| value.eq_ignore_ascii_case("YES")),
    );
    facts.optional(
        names::ORACLE_UNSUPPORTED_COLUMN_TYPES,
        int(
            conn,
            &format!(
                "SELECT COUNT(*) FROM all_tab_columns WHERE owner NOT IN {SYSTEM_OWNERS} \
                 AND data_type IN ('BFILE', 'ANYDATA', 'XMLTYPE', 'SDO_GEOMETRY', 'UROWID')"
            ),
        ),
    );

    Ok(facts.finish())
}

#[async_trait]
impl FactCollector for OracleCollector {
    fn engine(&self) -> EngineKind {
        EngineKind::Oracle
    }

    async fn connect(&mut self) -> Result<()> {
        let connect_string = self.connect_string();
        info!(connect_string = %connect_string, "Connecting to Oracle");

        let username = self.params.username.clone();
        let password = self.params.password.clone();
        let conn = tokio::task::spawn_blocking(move || {
            Connection::connect(&username, &password, &connect_string)
        })
        .await
        .map_err(|e| Error::Connection(format!("connect task failed: {e}")))?
        .map_err(map_connect_error)?;

        self.conn = Some(conn);
        Ok(())
    }

    async fn collect(&mut self) -> Result<FactSet> {
        let conn = self.conn.take().ok_or_else(|| not_connected(EngineKind::Oracle))?;
        let (conn, result) = tokio::task::spawn_blocking(move || {
            let result = collect_blocking(&conn);
            (conn, result)
        })
        .await
        .map_err(|e| Error::collection(names::VERSION, format!("collection task failed: {e}")))?;
        self.conn = Some(conn);
        result
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            debug!("Closing Oracle connection");
            tokio::task::spawn_blocking(move || conn.close())
                .await
                .map_err(|e| Error::Connection(format!("close task failed: {e}")))?
                .map_err(|e| Error::Connection(e.to_string()))?;
        }
        Ok(())
    }
}
