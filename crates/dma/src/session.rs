//! Collection session orchestration.
//!
//! A session drives one assessment of one database through
//! `Created → Connecting → Collecting → Evaluating → Aggregating → Done`,
//! or into `Failed` with a [`Diagnostic`]. Connecting and collecting run
//! under a deadline; the collector is closed on every exit path.
//!
//! Sessions never retry on their own. [`Session::run_with_retry`] reruns the
//! whole session after a transient connection failure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::collectors::{create_collector, FactCollector};
use crate::config::{ConnectionParams, EngineKind};
use crate::error::{Error, Result};
use crate::evaluator::Evaluator;
use crate::facts::{Collection, FactSet};
use crate::report::{self, aggregate, Report, ReportMetadata};
use crate::retry::RetryConfig;
use crate::rules::Catalog;

/// Default deadline for connecting and collecting.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(120);

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not started.
    Created,
    /// Opening the connection.
    Connecting,
    /// Running metadata queries.
    Collecting,
    /// Running the rule catalog.
    Evaluating,
    /// Building the report.
    Aggregating,
    /// Finished successfully.
    Done,
    /// Finished with a diagnostic.
    Failed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Created => "created",
            Self::Connecting => "connecting",
            Self::Collecting => "collecting",
            Self::Evaluating => "evaluating",
            Self::Aggregating => "aggregating",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Why a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    /// The database could not be reached or logged into.
    Connection,
    /// A required fact could not be collected.
    Collection,
    /// The deadline expired.
    Cancelled,
}

/// Record of a failed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    /// Collection identifier of the database.
    pub database_identifier: String,
    /// Engine of the database.
    pub engine: EngineKind,
    /// State the session was in when it failed.
    pub failed_in: SessionState,
    /// Failure class.
    pub cause: FailureCause,
    /// Error code (e.g. "DMA-002").
    pub code: String,
    /// Whether rerunning the session may succeed.
    #[serde(default)]
    pub retryable: bool,
    /// Error message.
    pub message: String,
    /// When the failure happened.
    pub occurred_at: DateTime<Utc>,
}

impl Diagnostic {
    /// Returns true if rerunning the session may succeed.
    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    /// Writes the diagnostic to `{dir}/{identifier}.diagnostic.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        report::write_document(dir, &self.database_identifier, "diagnostic", self)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed while {} ({:?}): {}",
            self.database_identifier, self.failed_in, self.cause, self.message
        )
    }
}

/// Result of running a session.
#[derive(Debug, Clone)]
pub enum SessionOutcome<T> {
    /// The session reached `Done`.
    Done(T),
    /// The session reached `Failed`.
    Failed(Diagnostic),
}

impl<T> SessionOutcome<T> {
    /// Converts to a `Result`, keeping the diagnostic as the error.
    pub fn into_result(self) -> std::result::Result<T, Diagnostic> {
        match self {
            Self::Done(value) => Ok(value),
            Self::Failed(diagnostic) => Err(diagnostic),
        }
    }
}

type Observer = Box<dyn Fn(SessionState) + Send + Sync>;

/// State, history and observer, kept apart from the collector so both can be
/// borrowed while the timed collection future is alive.
struct Tracker {
    identifier: String,
    engine: EngineKind,
    state: SessionState,
    history: Vec<SessionState>,
    observer: Option<Observer>,
}

impl Tracker {
    fn reset(&mut self) {
        self.state = SessionState::Created;
        self.history = vec![SessionState::Created];
    }

    fn enter(&mut self, next: SessionState) {
        debug!(
            session = %self.identifier,
            from = %self.state,
            to = %next,
            "Session state changed"
        );
        self.state = next;
        self.history.push(next);
        if let Some(observer) = &self.observer {
            observer(next);
        }
    }

    fn fail(&mut self, cause: FailureCause, error: &Error) -> Diagnostic {
        let failed_in = self.state;
        warn!(
            session = %self.identifier,
            state = %failed_in,
            code = error.code(),
            error = %error,
            "Session failed"
        );
        self.enter(SessionState::Failed);
        Diagnostic {
            database_identifier: self.identifier.clone(),
            engine: self.engine,
            failed_in,
            cause,
            code: error.code().to_string(),
            retryable: transient(cause, error),
            message: error.to_string(),
            occurred_at: Utc::now(),
        }
    }
}

/// Only a refused or dropped connection is worth another session.
fn transient(cause: FailureCause, error: &Error) -> bool {
    cause == FailureCause::Connection && matches!(error, Error::Connection(_))
}

/// One assessment of one database.
pub struct Session<'c> {
    collector: Box<dyn FactCollector>,
    tracker: Tracker,
    deadline: Duration,
    evaluator: Evaluator,
    catalog: &'c Catalog,
}

impl Session<'static> {
    /// Creates a session around `collector`, using the built-in catalog.
    pub fn new(identifier: impl Into<String>, collector: Box<dyn FactCollector>) -> Self {
        let engine = collector.engine();
        Self {
            collector,
            tracker: Tracker {
                identifier: identifier.into(),
                engine,
                state: SessionState::Created,
                history: vec![SessionState::Created],
                observer: None,
            },
            deadline: DEFAULT_DEADLINE,
            evaluator: Evaluator::new(),
            catalog: Catalog::builtin(),
        }
    }

    /// Creates a session for a live database.
    ///
    /// # Errors
    ///
    /// Returns an error if the engine is not supported by this build.
    pub fn for_params(params: &ConnectionParams) -> Result<Self> {
        let collector = create_collector(params)?;
        Ok(Self::new(params.identifier(), collector))
    }
}

impl<'c> Session<'c> {
    /// Evaluates against `catalog` instead of the built-in one.
    pub fn with_catalog<'a>(self, catalog: &'a Catalog) -> Session<'a> {
        Session {
            collector: self.collector,
            tracker: self.tracker,
            deadline: self.deadline,
            evaluator: self.evaluator,
            catalog,
        }
    }

    /// Sets the deadline for connecting and collecting.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Sets the rule evaluator.
    #[must_use]
    pub fn with_evaluator(mut self, evaluator: Evaluator) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Calls `observer` on every state transition.
    #[must_use]
    pub fn on_transition(mut self, observer: impl Fn(SessionState) + Send + Sync + 'static) -> Self {
        self.tracker.observer = Some(Box::new(observer));
        self
    }

    /// Collection identifier.
    pub fn identifier(&self) -> &str {
        &self.tracker.identifier
    }

    /// Engine of the database.
    pub fn engine(&self) -> EngineKind {
        self.tracker.engine
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.tracker.state
    }

    /// States visited by the latest run, starting with `Created`.
    pub fn history(&self) -> &[SessionState] {
        &self.tracker.history
    }

    /// Connects, collects, evaluates and aggregates.
    pub async fn run(&mut self) -> SessionOutcome<Report> {
        let collection = match self.gather().await {
            Ok(collection) => collection,
            Err(diagnostic) => return SessionOutcome::Failed(diagnostic),
        };

        self.tracker.enter(SessionState::Evaluating);
        let findings = self
            .evaluator
            .evaluate(&collection.facts, collection.engine, self.catalog);

        self.tracker.enter(SessionState::Aggregating);
        let report = aggregate(findings, ReportMetadata::from(&collection));

        self.tracker.enter(SessionState::Done);
        info!(
            session = %self.tracker.identifier,
            verdict = %report.verdict,
            findings = report.findings.len(),
            "Assessment complete"
        );
        SessionOutcome::Done(report)
    }

    /// Connects and collects only.
    pub async fn collect(&mut self) -> SessionOutcome<Collection> {
        match self.gather().await {
            Ok(collection) => {
                self.tracker.enter(SessionState::Done);
                info!(
                    session = %self.tracker.identifier,
                    facts = collection.facts.len(),
                    "Collection complete"
                );
                SessionOutcome::Done(collection)
            }
            Err(diagnostic) => SessionOutcome::Failed(diagnostic),
        }
    }

    /// [`Session::run`], rerun after transient connection failures.
    pub async fn run_with_retry(&mut self, retry: &RetryConfig) -> SessionOutcome<Report> {
        let mut attempt = 0;
        loop {
            match self.run().await {
                SessionOutcome::Failed(d) if d.is_retryable() && attempt < retry.max_retries => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        session = %self.tracker.identifier,
                        attempt,
                        max_retries = retry.max_retries,
                        "Retrying session in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                outcome => return outcome,
            }
        }
    }

    /// [`Session::collect`], rerun after transient connection failures.
    pub async fn collect_with_retry(&mut self, retry: &RetryConfig) -> SessionOutcome<Collection> {
        let mut attempt = 0;
        loop {
            match self.collect().await {
                SessionOutcome::Failed(d) if d.is_retryable() && attempt < retry.max_retries => {
                    attempt += 1;
                    let delay = retry.delay_for_attempt(attempt);
                    warn!(
                        session = %self.tracker.identifier,
                        attempt,
                        max_retries = retry.max_retries,
                        "Retrying collection in {:?}",
                        delay
                    );
                    sleep(delay).await;
                }
                outcome => return outcome,
            }
        }
    }

    async fn gather(&mut self) -> std::result::Result<Collection, Diagnostic> {
        self.tracker.reset();
        info!(
            session = %self.tracker.identifier,
            engine = %self.tracker.engine,
            deadline_secs = self.deadline.as_secs(),
            "Starting session"
        );

        let timed = tokio::time::timeout(
            self.deadline,
            connect_and_collect(self.collector.as_mut(), &mut self.tracker),
        )
        .await;
        let collected_at = self.collector.collected_at().unwrap_or_else(Utc::now);

        if let Err(e) = self.collector.close().await {
            warn!(session = %self.tracker.identifier, error = %e, "Failed to close collector");
        }

        let facts = match timed {
            Ok(Ok(facts)) => facts,
            Ok(Err(error)) => {
                let cause = match self.tracker.state {
                    SessionState::Connecting => FailureCause::Connection,
                    _ => FailureCause::Collection,
                };
                return Err(self.tracker.fail(cause, &error));
            }
            Err(_) => {
                let error = Error::Cancelled(format!(
                    "deadline of {}s exceeded",
                    self.deadline.as_secs_f64()
                ));
                return Err(self.tracker.fail(FailureCause::Cancelled, &error));
            }
        };

        Ok(Collection {
            collection_identifier: self.tracker.identifier.clone(),
            engine: self.tracker.engine,
            collected_at,
            facts,
        })
    }
}

async fn connect_and_collect(
    collector: &mut dyn FactCollector,
    tracker: &mut Tracker,
) -> Result<FactSet> {
    tracker.enter(SessionState::Connecting);
    collector.connect().await?;
    tracker.enter(SessionState::Collecting);
    collector.collect().await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diagnostic(cause: FailureCause, error: Error) -> Diagnostic {
        Diagnostic {
            database_identifier: "db".to_string(),
            engine: EngineKind::MySql,
            failed_in: SessionState::Connecting,
            cause,
            code: error.code().to_string(),
            retryable: transient(cause, &error),
            message: error.to_string(),
            occurred_at: Utc::now(),
        }
    }

    #[test]
    fn test_only_transient_connection_failures_retry() {
        assert!(diagnostic(FailureCause::Connection, Error::Connection("refused".into())).is_retryable());
        assert!(!diagnostic(FailureCause::Connection, Error::Authentication("denied".into())).is_retryable());
        assert!(!diagnostic(FailureCause::Cancelled, Error::Cancelled("deadline".into())).is_retryable());
        assert!(!diagnostic(FailureCause::Connection, Error::Config("unreadable".into())).is_retryable());
        assert!(!diagnostic(FailureCause::Collection, Error::Connection("reset".into())).is_retryable());
    }

    #[test]
    fn test_diagnostic_serializes_state_names() {
        let json = serde_json::to_string(&diagnostic(
            FailureCause::Connection,
            Error::Connection("refused".into()),
        ))
        .unwrap();
        assert!(json.contains("\"failed_in\":\"connecting\""));
        assert!(json.contains("\"cause\":\"connection\""));
    }

    #[test]
    fn test_outcome_into_result() {
        let done: SessionOutcome<u8> = SessionOutcome::Done(1);
        assert_eq!(done.into_result().unwrap(), 1);
    }
}
