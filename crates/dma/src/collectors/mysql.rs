//! `MySQL` collector.

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info};

use super::common::FactRecorder;
use super::{not_connected, FactCollector};
use crate::config::{ConnectionParams, EngineKind};
use crate::error::Result;
use crate::facts::{names, FactSet};

/// Collector for `MySQL` sources.
pub struct MySqlCollector {
    params: ConnectionParams,
    conn: Option<MySqlConnection>,
}

impl MySqlCollector {
    /// Creates a collector; no connection is opened yet.
    pub fn new(params: ConnectionParams) -> Self {
        Self { params, conn: None }
    }

    fn connect_options(&self) -> MySqlConnectOptions {
        MySqlConnectOptions::new()
            .host(&self.params.host)
            .port(self.params.port)
            .database(&self.params.database)
            .username(&self.params.username)
            .password(&self.params.password)
    }
}

async fn int(conn: &mut MySqlConnection, sql: &str) -> std::result::Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(sql).fetch_one(conn).await
}

/// Integer query with the schema name bound to its single placeholder.
async fn schema_int(
    conn: &mut MySqlConnection,
    sql: &str,
    schema: &str,
) -> std::result::Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(sql)
        .bind(schema)
        .fetch_one(conn)
        .await
}

async fn text(conn: &mut MySqlConnection, sql: &str) -> std::result::Result<String, sqlx::Error> {
    sqlx::query_scalar::<_, String>(sql).fetch_one(conn).await
}

/// Binary log retention in seconds. `MySQL` 8 uses
/// `binlog_expire_logs_seconds`; older servers only have `expire_logs_days`.
async fn binlog_retention_seconds(
    conn: &mut MySqlConnection,
) -> std::result::Result<i64, sqlx::Error> {
    match int(conn, "SELECT CAST(@@binlog_expire_logs_seconds AS SIGNED)").await {
        Ok(seconds) => Ok(seconds),
        Err(e) => {
            debug!(error = %e, "binlog_expire_logs_seconds unavailable, using expire_logs_days");
            int(conn, "SELECT CAST(@@expire_logs_days * 86400 AS SIGNED)").await
        }
    }
}

#[async_trait]
impl FactCollector for MySqlCollector {
    fn engine(&self) -> EngineKind {
        EngineKind::MySql
    }

    async fn connect(&mut self) -> Result<()> {
        info!(
            host = %self.params.host,
            port = self.params.port,
            database = %self.params.database,
            "Connecting to MySQL"
        );
        let conn = self.connect_options().connect().await?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn collect(&mut self) -> Result<FactSet> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(EngineKind::MySql))?;
        let schema = self.params.database.as_str();
        let mut facts = FactRecorder::new(EngineKind::MySql);

        facts.version(text(conn, "SELECT CAST(VERSION() AS CHAR)").await)?;
        facts.required_with_unit(
            names::DATABASE_SIZE_BYTES,
            schema_int(
                conn,
                "SELECT CAST(COALESCE(SUM(data_length + index_length), 0) AS SIGNED) \
                 FROM information_schema.tables WHERE table_schema = ?",
                schema,
            )
            .await,
            "bytes",
        )?;
        facts.required(
            names::TABLE_COUNT,
            schema_int(
                conn,
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = ? AND table_type = 'BASE TABLE'",
                schema,
            )
            .await,
        )?;
        debug!("Required MySQL facts collected");

        facts.optional(
            names::VIEW_COUNT,
            schema_int(
                conn,
                "SELECT COUNT(*) FROM information_schema.views WHERE table_schema = ?",
                schema,
            )
            .await,
        );
        facts.optional(
            names::INDEX_COUNT,
            schema_int(
                conn,
                "SELECT COUNT(DISTINCT table_name, index_name) \
                 FROM information_schema.statistics WHERE table_schema = ?",
                schema,
            )
            .await,
        );
        facts.optional(
            names::ROUTINE_COUNT,
            schema_int(
                conn,
                "SELECT COUNT(*) FROM information_schema.routines WHERE routine_schema = ?",
                schema,
            )
            .await,
        );
        facts.optional(
            names::TRIGGER_COUNT,
            schema_int(
                conn,
                "SELECT COUNT(*) FROM information_schema.triggers WHERE trigger_schema = ?",
                schema,
            )
            .await,
        );
        facts.optional(
            names::TABLES_WITHOUT_PK,
            schema_int(
                conn,
                "SELECT COUNT(*) FROM information_schema.tables t \
                 LEFT JOIN information_schema.table_constraints c \
                 ON c.table_schema = t.table_schema AND c.table_name = t.table_name \
                 AND c.constraint_type = 'PRIMARY KEY' \
                 WHERE t.table_schema = ? AND t.table_type = 'BASE TABLE' \
                 AND c.constraint_name IS NULL",
                schema,
            )
            .await,
        );
        facts.optional(
            names::CHARSET,
            sqlx::query_scalar::<_, String>(
                "SELECT CAST(default_character_set_name AS CHAR) \
                 FROM information_schema.schemata WHERE schema_name = ?",
            )
            .bind(schema)
            .fetch_one(&mut *conn)
            .await,
        );

        facts.optional(
            names::MYSQL_LOG_BIN,
            int(conn, "SELECT CAST(@@log_bin AS SIGNED)")
                .await
                .map(|v| v != 0),
        );
        facts.optional(
            names::MYSQL_BINLOG_FORMAT,
            text(conn, "SELECT CAST(@@binlog_format AS CHAR)").await,
        );
        facts.optional(
            names::MYSQL_BINLOG_ROW_IMAGE,
            text(conn, "SELECT CAST(@@binlog_row_image AS CHAR)").await,
        );
        facts.optional(
            names::MYSQL_GTID_MODE,
            text(conn, "SELECT CAST(@@gtid_mode AS CHAR)").await,
        );
        facts.optional(
            names::MYSQL_SERVER_ID,
            int(conn, "SELECT CAST(@@server_id AS SIGNED)").await,
        );
        facts.optional(
            names::MYSQL_NON_INNODB_TABLES,
            schema_int(
                conn,
                "SELECT COUNT(*) FROM information_schema.tables \
                 WHERE table_schema = ? AND table_type = 'BASE TABLE' \
                 AND engine <> 'InnoDB'",
                schema,
            )
            .await,
        );
        facts.optional(
            names::MYSQL_BINLOG_RETENTION_SECONDS,
            binlog_retention_seconds(conn).await,
        );

        Ok(facts.finish())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            debug!("Closing MySQL connection");
            conn.close().await?;
        }
        Ok(())
    }
}
