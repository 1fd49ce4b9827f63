//! SQL Server collector.
//!
//! `tiberius` runs over a tokio TCP stream adapted with `tokio-util`'s
//! compat layer. `SERVERPROPERTY` returns `sql_variant`, which the driver
//! cannot decode, so every such call is cast to `NVARCHAR`.

use async_trait::async_trait;
use tiberius::{AuthMethod, Client, Config, Row};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use super::common::FactRecorder;
use super::{not_connected, FactCollector};
use crate::config::{ConnectionParams, EngineKind};
use crate::error::{Error, Result};
use crate::facts::{names, FactSet};

type MssqlClient = Client<Compat<TcpStream>>;

/// Login failed for user.
const LOGIN_FAILED: u32 = 18456;

/// Collector for SQL Server sources.
pub struct SqlServerCollector {
    params: ConnectionParams,
    client: Option<MssqlClient>,
}

impl SqlServerCollector {
    /// Creates a collector; no connection is opened yet.
    pub fn new(params: ConnectionParams) -> Self {
        Self {
            params,
            client: None,
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.params.host);
        config.port(self.params.port);
        config.database(&self.params.database);
        config.application_name("dma");
        config.authentication(AuthMethod::sql_server(
            &self.params.username,
            &self.params.password,
        ));
        // Source servers commonly use self-signed certificates.
        config.trust_cert();
        config
    }
}

fn map_connect_error(err: tiberius::error::Error) -> Error {
    match &err {
        tiberius::error::Error::Server(token) if token.code() == LOGIN_FAILED => {
            Error::Authentication(token.message().to_string())
        }
        _ => Error::Connection(err.to_string()),
    }
}

async fn first_row(client: &mut MssqlClient, sql: &str) -> std::result::Result<Row, String> {
    client
        .simple_query(sql)
        .await
        .map_err(|e| e.to_string())?
        .into_row()
        .await
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "query returned no rows".to_string())
}

async fn int(client: &mut MssqlClient, sql: &str) -> std::result::Result<i64, String> {
    let row = first_row(client, sql).await?;
    row.try_get::<i64, _>(0)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "query returned NULL".to_string())
}

async fn text(client: &mut MssqlClient, sql: &str) -> std::result::Result<String, String> {
    let row = first_row(client, sql).await?;
    row.try_get::<&str, _>(0)
        .map_err(|e| e.to_string())?
        .map(ToString::to_string)
        .ok_or_else(|| "query returned NULL".to_string())
}

async fn flag(client: &mut MssqlClient, sql: &str) -> std::result::Result<bool, String> {
    let row = first_row(client, sql).await?;
    row.try_get::<bool, _>(0)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| "query returned NULL".to_string())
}

#[async_trait]
impl FactCollector for SqlServerCollector {
    fn engine(&self) -> EngineKind {
        EngineKind::SqlServer
    }

    async fn connect(&mut self) -> Result<()> {
        info!(
            host = %self.params.host,
            port = self.params.port,
            database = %self.params.database,
            "Connecting to SQL Server"
        );
        let config = self.config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| Error::Connection(format!("{}: {e}", config.get_addr())))?;
        tcp.set_nodelay(true)?;

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(map_connect_error)?;
        self.client = Some(client);
        Ok(())
    }

    async fn collect(&mut self) -> Result<FactSet> {
        let client = self
            .client
            .as_mut()
            .ok_or_else(|| not_connected(EngineKind::SqlServer))?;
        let mut facts = FactRecorder::new(EngineKind::SqlServer);

        facts.version(
            text(
                client,
                "SELECT CAST(SERVERPROPERTY('ProductVersion') AS NVARCHAR(128))",
            )
            .await,
        )?;
        facts.required_with_unit(
            names::DATABASE_SIZE_BYTES,
            int(
                client,
                "SELECT CAST(SUM(CAST(size AS BIGINT)) * 8192 AS BIGINT) FROM sys.database_files",
            )
            .await,
            "bytes",
        )?;
        facts.required(
            names::TABLE_COUNT,
            int(
                client,
                "SELECT CAST(COUNT(*) AS BIGINT) FROM sys.tables WHERE is_ms_shipped = 0",
            )
            .await,
        )?;
        debug!("Required SQL Server facts collected");

        facts.optional(
            names::VIEW_COUNT,
            int(
                client,
                "SELECT CAST(COUNT(*) AS BIGINT) FROM sys.views WHERE is_ms_shipped = 0",
            )
            .await,
        );
        facts.optional(
            names::INDEX_COUNT,
            int(
                client,
                "SELECT CAST(COUNT(*) AS BIGINT) FROM sys.indexes i \
                 JOIN sys.tables t ON t.object_id = i.object_id \
                 WHERE i.type > 0 AND t.is_ms_shipped = 0",
            )
            .await,
        );
        facts.optional(
            names::ROUTINE_COUNT,
            int(
                client,
                "SELECT CAST(COUNT(*) AS BIGINT) FROM sys.objects \
                 WHERE type IN ('P', 'FN', 'IF', 'TF') AND is_ms_shipped = 0",
            )
            .await,
        );
        facts.optional(
            names::TRIGGER_COUNT,
            int(
                client,
                "SELECT CAST(COUNT(*) AS BIGINT) FROM sys.triggers WHERE is_ms_shipped = 0",
            )
            .await,
        );
        facts.optional(
            names::TABLES_WITHOUT_PK,
            int(
                client,
                "SELECT CAST(COUNT(*) AS BIGINT) FROM sys.tables t \
                 WHERE t.is_ms_shipped = 0 \
                 AND OBJECTPROPERTY(t.object_id, 'TableHasPrimaryKey') = 0",
            )
            .await,
        );
        facts.optional(
            names::CHARSET,
            text(
                client,
                "SELECT CAST(DATABASEPROPERTYEX(DB_NAME(), 'Collation') AS NVARCHAR(128))",
            )
            .await,
        );

        facts.optional(
            names::MSSQL_EDITION,
            text(
                client,
                "SELECT CAST(SERVERPROPERTY('Edition') AS NVARCHAR(128))",
            )
            .await,
        );
        facts.optional(
            names::MSSQL_RECOVERY_MODEL,
            text(
                client,
                "SELECT recovery_model_desc FROM sys.databases WHERE name = DB_NAME()",
            )
            .await,
        );
        facts.optional(
            names::MSSQL_CDC_ENABLED,
            flag(
                client,
                "SELECT is_cdc_enabled FROM sys.databases WHERE name = DB_NAME()",
            )
            .await,
        );
        // Needs VIEW SERVER STATE.
        facts.optional(
            names::MSSQL_SQL_AGENT_RUNNING,
            int(
                client,
                "SELECT CAST(COUNT(*) AS BIGINT) FROM sys.dm_server_services \
                 WHERE servicename LIKE 'SQL Server Agent%' AND status_desc = 'Running'",
            )
            .await
            .map(|running| running > 0),
        );
        facts.optional(
            names::MSSQL_TDE_ENABLED,
            flag(
                client,
                "SELECT is_encrypted FROM sys.databases WHERE name = DB_NAME()",
            )
            .await,
        );
        facts.optional(
            names::MSSQL_FILESTREAM_TABLES,
            int(
                client,
                "SELECT CAST(COUNT(DISTINCT c.object_id) AS BIGINT) FROM sys.columns c \
                 JOIN sys.tables t ON t.object_id = c.object_id WHERE c.is_filestream = 1",
            )
            .await,
        );

        Ok(facts.finish())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            debug!("Closing SQL Server connection");
            client
                .close()
                .await
                .map_err(|e| Error::Connection(e.to_string()))?;
        }
        Ok(())
    }
}
