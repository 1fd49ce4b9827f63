//! Integration tests against real source databases.
//!
//! These tests require environment variables per engine, with `PREFIX` one
//! of `PG`, `MYSQL`, `MSSQL` or `ORACLE`:
//! - `DMA_TEST_{PREFIX}_HOST`: Hostname of the server
//! - `DMA_TEST_{PREFIX}_PORT`: Port (optional, engine default otherwise)
//! - `DMA_TEST_{PREFIX}_DATABASE`: Database or service name
//! - `DMA_TEST_{PREFIX}_USER` / `DMA_TEST_{PREFIX}_PASSWORD`: Credentials
//!
//! Run with: `cargo test --test integration_test -- --ignored`

#![allow(clippy::pedantic)]

use std::env;
use std::time::Duration;

use dma::facts::{names, REQUIRED_FACTS};
use dma::{ConnectionParams, EngineKind, Outcome, Session};

/// Connection parameters from the environment, if configured.
fn live_params(prefix: &str, engine: EngineKind) -> Option<ConnectionParams> {
    let var = |name: &str| env::var(format!("DMA_TEST_{prefix}_{name}")).ok();
    Some(ConnectionParams {
        engine,
        host: var("HOST")?,
        port: var("PORT")
            .and_then(|p| p.parse().ok())
            .unwrap_or_else(|| engine.default_port()),
        database: var("DATABASE")?,
        username: var("USER")?,
        password: var("PASSWORD").unwrap_or_default(),
        collection_identifier: Some(format!("live-{}", engine.short_name())),
    })
}

async fn assess_live(prefix: &str, engine: EngineKind) {
    let Some(params) = live_params(prefix, engine) else {
        eprintln!("Skipping: DMA_TEST_{prefix}_HOST, _DATABASE and _USER not set");
        return;
    };

    let mut session = Session::for_params(&params)
        .expect("Failed to create session")
        .with_deadline(Duration::from_secs(60));
    let collection = session
        .collect()
        .await
        .into_result()
        .expect("Collection failed");

    for fact in REQUIRED_FACTS {
        assert!(
            collection.facts.is_measured(fact),
            "required fact {fact} was not measured"
        );
    }
    println!(
        "✅ Collected {} facts ({} measured) from {} {}",
        collection.facts.len(),
        collection.facts.measured_count(),
        engine.display_name(),
        collection
            .facts
            .get(names::VERSION)
            .and_then(|v| v.as_str())
            .unwrap_or("?")
    );

    let report = session.run().await.into_result().expect("Assessment failed");
    assert!(!report.findings.is_empty());
    assert!(report
        .findings
        .iter()
        .all(|f| f.outcome != Outcome::Error), "{:#?}", report.findings);
    println!("   Verdict: {}", report.verdict);
}

#[cfg(feature = "postgres")]
#[tokio::test]
#[ignore] // Run with --ignored flag when env vars are set
async fn test_live_postgres() {
    assess_live("PG", EngineKind::Postgres).await;
}

#[cfg(feature = "mysql")]
#[tokio::test]
#[ignore]
async fn test_live_mysql() {
    assess_live("MYSQL", EngineKind::MySql).await;
}

#[cfg(feature = "mssql")]
#[tokio::test]
#[ignore]
async fn test_live_sql_server() {
    assess_live("MSSQL", EngineKind::SqlServer).await;
}

#[cfg(feature = "oracle")]
#[tokio::test]
#[ignore]
async fn test_live_oracle() {
    assess_live("ORACLE", EngineKind::Oracle).await;
}

#[tokio::test]
#[ignore]
async fn test_unreachable_host_fails_fast() {
    let params = ConnectionParams {
        engine: EngineKind::Postgres,
        host: "127.0.0.1".to_string(),
        port: 1,
        database: "postgres".to_string(),
        username: "nobody".to_string(),
        password: String::new(),
        collection_identifier: None,
    };
    let Ok(session) = Session::for_params(&params) else {
        return;
    };

    let diagnostic = session
        .with_deadline(Duration::from_secs(10))
        .run()
        .await
        .into_result()
        .unwrap_err();

    assert!(diagnostic.is_retryable(), "{diagnostic}");
}
