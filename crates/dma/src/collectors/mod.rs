//! Fact collectors for the supported source engines.
//!
//! Each engine is one implementation of [`FactCollector`]. Drivers are
//! cargo features so a build only links the clients it needs.

pub mod common;
#[cfg(feature = "mssql")]
pub mod mssql;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "oracle")]
pub mod oracle;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod snapshot;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::config::{ConnectionParams, EngineKind};
use crate::error::{Error, Result};
use crate::facts::FactSet;

/// Collects facts from one source database.
///
/// A collector owns at most one connection. `collect` requires `&mut self`,
/// so only one collection can be in flight per connection.
#[async_trait]
pub trait FactCollector: Send {
    /// Engine this collector reads.
    fn engine(&self) -> EngineKind;

    /// Opens the connection.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Connection`] or [`Error::Authentication`] if the
    /// server cannot be reached or rejects the credentials.
    async fn connect(&mut self) -> Result<()>;

    /// Runs the metadata queries.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collection`] if a required fact cannot be read.
    /// Optional facts that fail are recorded as absent instead.
    async fn collect(&mut self) -> Result<FactSet>;

    /// Releases the connection. Safe to call more than once.
    async fn close(&mut self) -> Result<()>;

    /// When the facts were originally gathered, if not just now.
    fn collected_at(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// Creates the collector for `params.engine`.
///
/// # Errors
///
/// Returns [`Error::UnsupportedEngine`] if the engine's driver was not
/// compiled in.
pub fn create_collector(params: &ConnectionParams) -> Result<Box<dyn FactCollector>> {
    match params.engine {
        #[cfg(feature = "postgres")]
        EngineKind::Postgres => Ok(Box::new(postgres::PostgresCollector::new(params.clone()))),
        #[cfg(feature = "mysql")]
        EngineKind::MySql => Ok(Box::new(mysql::MySqlCollector::new(params.clone()))),
        #[cfg(feature = "mssql")]
        EngineKind::SqlServer => Ok(Box::new(mssql::SqlServerCollector::new(params.clone()))),
        #[cfg(feature = "oracle")]
        EngineKind::Oracle => Ok(Box::new(oracle::OracleCollector::new(params.clone()))),
        #[allow(unreachable_patterns)]
        other => Err(Error::UnsupportedEngine(other.to_string())),
    }
}

/// Error for an operation attempted before `connect`.
pub(crate) fn not_connected(engine: EngineKind) -> Error {
    Error::Connection(format!("{} collector is not connected", engine.display_name()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(engine: EngineKind) -> ConnectionParams {
        ConnectionParams {
            engine,
            host: "localhost".to_string(),
            port: engine.default_port(),
            database: "app".to_string(),
            username: "assessor".to_string(),
            password: "secret".to_string(),
            collection_identifier: None,
        }
    }

    #[cfg(feature = "postgres")]
    #[test]
    fn test_create_postgres_collector() {
        let collector = create_collector(&params(EngineKind::Postgres)).unwrap();
        assert_eq!(collector.engine(), EngineKind::Postgres);
    }

    #[cfg(feature = "mysql")]
    #[test]
    fn test_create_mysql_collector() {
        let collector = create_collector(&params(EngineKind::MySql)).unwrap();
        assert_eq!(collector.engine(), EngineKind::MySql);
    }

    #[cfg(feature = "mssql")]
    #[test]
    fn test_create_mssql_collector() {
        let collector = create_collector(&params(EngineKind::SqlServer)).unwrap();
        assert_eq!(collector.engine(), EngineKind::SqlServer);
    }

    #[cfg(not(feature = "oracle"))]
    #[test]
    fn test_disabled_engine_is_unsupported() {
        let err = create_collector(&params(EngineKind::Oracle)).err().unwrap();
        assert!(matches!(err, Error::UnsupportedEngine(ref e) if e == "oracle"));
    }

    #[cfg(feature = "postgres")]
    #[tokio::test]
    async fn test_collect_before_connect_fails() {
        let mut collector = create_collector(&params(EngineKind::Postgres)).unwrap();
        let err = collector.collect().await.unwrap_err();
        assert!(err.is_connection_failure());
        // close without a connection is a no-op
        assert!(collector.close().await.is_ok());
        assert!(collector.close().await.is_ok());
    }
}
