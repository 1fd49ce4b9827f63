// Assessment tool - pedantic lints relaxed for CLI ergonomics
#![allow(clippy::pedantic)]

//! # Database Migration Assessment
//!
//! `dma` is a CLI tool and library that decides whether a source database is
//! ready to migrate to a managed cloud database. It collects metadata facts
//! from the source, evaluates them against a catalog of readiness rules and
//! produces a severity-ranked report with a verdict.
//!
//! ## Supported Sources
//!
//! | Engine | Driver | Feature |
//! |--------|--------|---------|
//! | `PostgreSQL` | sqlx | `postgres` (default) |
//! | `MySQL` | sqlx | `mysql` (default) |
//! | SQL Server | tiberius | `mssql` (default) |
//! | Oracle | oracle (OCI) | `oracle` |
//!
//! ## Quick Start
//!
//! ```bash
//! # Collect facts and keep them for later
//! dma collect-data --db-type postgres -H 10.0.0.5 -d orders -u assessor
//!
//! # Assess readiness
//! dma readiness-check --db-type mysql -H db01 -d shop -u assessor --format json
//!
//! # Assess a previously collected document, offline
//! dma readiness-check --from-collection dma_output/orders.facts.json
//!
//! # Check that the migration target can reach the source
//! dma connectivity-check --test-id dma-orders --gcp-project acme \
//!     --target-db-ip 10.20.0.3 --source-db-ip 192.168.1.40 --source-db-port 5432
//! ```
//!
//! ## Configuration Example
//!
//! ```yaml
//! connection:
//!   db_type: postgres
//!   hostname: 10.0.0.5
//!   database: orders
//!   username: assessor
//!
//! options:
//!   timeout_secs: 120
//!   connect_retries: 2
//!   output_dir: ./dma_output
//!   format: table
//!
//! prober:
//!   poll_interval_ms: 2000
//!   max_polls: 60
//! ```
//!
//! ## Library use
//!
//! ```no_run
//! # async fn demo() -> dma::Result<()> {
//! use dma::{ConnectionParams, EngineKind, Session, SessionOutcome};
//!
//! let params = ConnectionParams {
//!     engine: EngineKind::Postgres,
//!     host: "10.0.0.5".to_string(),
//!     port: 5432,
//!     database: "orders".to_string(),
//!     username: "assessor".to_string(),
//!     password: "secret".to_string(),
//!     collection_identifier: None,
//! };
//! let mut session = Session::for_params(&params)?;
//! match session.run().await {
//!     SessionOutcome::Done(report) => println!("{}", report.verdict),
//!     SessionOutcome::Failed(diagnostic) => eprintln!("{diagnostic}"),
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod collectors;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod facts;
pub mod finding;
pub mod prober;
pub mod report;
pub mod retry;
pub mod rules;
pub mod session;
pub mod wizard;

pub use collectors::{create_collector, FactCollector};
pub use config::{AssessmentConfig, ConnectionArgs, ConnectionParams, EngineKind, OutputFormat};
pub use error::{Error, Result};
pub use evaluator::Evaluator;
pub use facts::{Collection, Fact, FactSet, FactSlot, FactValue};
pub use finding::{Finding, Outcome};
pub use prober::{ConnectivityProber, ProbeOperation, ProbeRequest, ProbeResult, ProbeStatus};
pub use report::{Report, Summary, Verdict};
pub use retry::RetryConfig;
pub use rules::{Catalog, Predicate, Rule, Severity};
pub use session::{Diagnostic, Session, SessionOutcome, SessionState};
