//! `PostgreSQL` collector.
//!
//! Uses a single `sqlx` connection; assessments run a few dozen catalog
//! queries, so there is no pool.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, info};

use super::common::{split_list, FactRecorder};
use super::{not_connected, FactCollector};
use crate::config::{ConnectionParams, EngineKind};
use crate::error::Result;
use crate::facts::{names, FactSet};

const USER_SCHEMAS: &str = "NOT IN ('pg_catalog', 'information_schema', 'pg_toast')";

/// Collector for `PostgreSQL` sources.
pub struct PostgresCollector {
    params: ConnectionParams,
    conn: Option<PgConnection>,
}

impl PostgresCollector {
    /// Creates a collector; no connection is opened yet.
    pub fn new(params: ConnectionParams) -> Self {
        Self { params, conn: None }
    }

    fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.params.host)
            .port(self.params.port)
            .database(&self.params.database)
            .username(&self.params.username)
            .password(&self.params.password)
            .application_name("dma")
    }
}

async fn int(conn: &mut PgConnection, sql: &str) -> std::result::Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(sql).fetch_one(conn).await
}

async fn text(conn: &mut PgConnection, sql: &str) -> std::result::Result<String, sqlx::Error> {
    sqlx::query_scalar::<_, String>(sql).fetch_one(conn).await
}

async fn flag(conn: &mut PgConnection, sql: &str) -> std::result::Result<bool, sqlx::Error> {
    sqlx::query_scalar::<_, bool>(sql).fetch_one(conn).await
}

async fn texts(conn: &mut PgConnection, sql: &str) -> std::result::Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(sql).fetch_all(conn).await
}

#[async_trait]
impl FactCollector for PostgresCollector {
    fn engine(&self) -> EngineKind {
        EngineKind::Postgres
    }

    async fn connect(&mut self) -> Result<()> {
        info!(
            host = %self.params.host,
            port = self.params.port,
            database = %self.params.database,
            "Connecting to PostgreSQL"
        );
        let conn = self.connect_options().connect().await?;
        self.conn = Some(conn);
        Ok(())
    }

    async fn collect(&mut self) -> Result<FactSet> {
        let conn = self.conn.as_mut().ok_or_else(|| not_connected(EngineKind::Postgres))?;
        let mut facts = FactRecorder::new(EngineKind::Postgres);

        facts.version(text(conn, "SHOW server_version").await)?;
        facts.required_with_unit(
            names::DATABASE_SIZE_BYTES,
            int(conn, "SELECT pg_database_size(current_database())").await,
            "bytes",
        )?;
        facts.required(
            names::TABLE_COUNT,
            int(
                conn,
                &format!(
                    "SELECT count(*) FROM information_schema.tables \
                     WHERE table_type = 'BASE TABLE' AND table_schema {USER_SCHEMAS}"
                ),
            )
            .await,
        )?;
        debug!("Required PostgreSQL facts collected");

        facts.optional(
            names::VIEW_COUNT,
            int(
                conn,
                &format!(
                    "SELECT count(*) FROM information_schema.views WHERE table_schema {USER_SCHEMAS}"
                ),
            )
            .await,
        );
        facts.optional(
            names::INDEX_COUNT,
            int(
                conn,
                &format!("SELECT count(*) FROM pg_indexes WHERE schemaname {USER_SCHEMAS}"),
            )
            .await,
        );
        facts.optional(
            names::ROUTINE_COUNT,
            int(
                conn,
                &format!(
                    "SELECT count(*) FROM pg_proc p JOIN pg_namespace n ON n.oid = p.pronamespace \
                     WHERE n.nspname {USER_SCHEMAS}"
                ),
            )
            .await,
        );
        facts.optional(
            names::TRIGGER_COUNT,
            int(conn, "SELECT count(*) FROM pg_trigger WHERE NOT tgisinternal").await,
        );
        facts.optional(
            names::TABLES_WITHOUT_PK,
            int(
                conn,
                &format!(
                    "SELECT count(*) FROM pg_class c \
                     JOIN pg_namespace n ON n.oid = c.relnamespace \
                     WHERE c.relkind = 'r' AND n.nspname {USER_SCHEMAS} \
                     AND NOT EXISTS (SELECT 1 FROM pg_constraint con \
                     WHERE con.conrelid = c.oid AND con.contype = 'p')"
                ),
            )
            .await,
        );
        facts.optional(
            names::CHARSET,
            text(
                conn,
                "SELECT pg_encoding_to_char(encoding)::text FROM pg_database \
                 WHERE datname = current_database()",
            )
            .await,
        );

        facts.optional(
            names::PG_EXTENSIONS,
            texts(conn, "SELECT extname::text FROM pg_extension ORDER BY extname").await,
        );
        facts.optional(names::PG_WAL_LEVEL, text(conn, "SHOW wal_level").await);
        facts.optional(
            names::PG_MAX_REPLICATION_SLOTS,
            int(
                conn,
                "SELECT setting::bigint FROM pg_settings WHERE name = 'max_replication_slots'",
            )
            .await,
        );
        facts.optional(
            names::PG_MAX_WAL_SENDERS,
            int(
                conn,
                "SELECT setting::bigint FROM pg_settings WHERE name = 'max_wal_senders'",
            )
            .await,
        );
        facts.optional(
            names::PG_SHARED_PRELOAD_LIBRARIES,
            text(conn, "SHOW shared_preload_libraries")
                .await
                .map(|setting| split_list(&setting)),
        );
        facts.optional(
            names::PG_UNLOGGED_TABLES,
            int(
                conn,
                "SELECT count(*) FROM pg_class WHERE relpersistence = 'u' AND relkind = 'r'",
            )
            .await,
        );
        facts.optional(
            names::PG_LARGE_OBJECTS,
            int(conn, "SELECT count(*) FROM pg_largeobject_metadata").await,
        );
        facts.optional(
            names::PG_HAS_REPLICATION_ROLE,
            flag(
                conn,
                "SELECT rolreplication OR rolsuper FROM pg_roles WHERE rolname = current_user",
            )
            .await,
        );

        Ok(facts.finish())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(conn) = self.conn.take() {
            debug!("Closing PostgreSQL connection");
            conn.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_options_use_params() {
        let collector = PostgresCollector::new(ConnectionParams {
            engine: EngineKind::Postgres,
            host: "db.internal".to_string(),
            port: 6432,
            database: "orders".to_string(),
            username: "assessor".to_string(),
            password: "secret".to_string(),
            collection_identifier: None,
        });
        let options = collector.connect_options();
        assert_eq!(options.get_host(), "db.internal");
        assert_eq!(options.get_port(), 6432);
        assert_eq!(options.get_database(), Some("orders"));
        assert_eq!(options.get_username(), "assessor");
    }
}
