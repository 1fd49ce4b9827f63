//! Report aggregation, rendering and persistence.
//!
//! The verdict is a total function of the findings: there is no way for
//! aggregation to fail. Only failing blockers and failing warnings move the
//! verdict; `inapplicable` and `error` findings are counted as operational
//! gaps in the summary.

use chrono::{DateTime, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::EngineKind;
use crate::error::Result;
use crate::facts::Collection;
use crate::finding::{Finding, Outcome};
use crate::rules::Severity;

/// Overall readiness classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// No failing blocker or warning.
    Ready,
    /// At least one failing warning, no failing blocker.
    ReadyWithWarnings,
    /// At least one failing blocker.
    NotReady,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ready => "READY",
            Self::ReadyWithWarnings => "READY WITH WARNINGS",
            Self::NotReady => "NOT READY",
        };
        f.write_str(label)
    }
}

/// Computes the verdict for a set of findings.
pub fn verdict_for(findings: &[Finding]) -> Verdict {
    if findings.iter().any(|f| f.fails_with(Severity::Blocker)) {
        Verdict::NotReady
    } else if findings.iter().any(|f| f.fails_with(Severity::Warning)) {
        Verdict::ReadyWithWarnings
    } else {
        Verdict::Ready
    }
}

/// Outcome counts for one category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    /// Passing findings.
    pub passed: usize,
    /// Failing findings, any severity.
    pub failed: usize,
    /// Rules skipped for missing data.
    pub inapplicable: usize,
    /// Rules whose predicate faulted.
    pub errors: usize,
}

impl OutcomeCounts {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Pass => self.passed += 1,
            Outcome::Fail => self.failed += 1,
            Outcome::Inapplicable => self.inapplicable += 1,
            Outcome::Error => self.errors += 1,
        }
    }

    /// Total findings counted.
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.inapplicable + self.errors
    }
}

/// Aggregate counts over a report's findings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Counts per outcome over all findings.
    pub outcomes: OutcomeCounts,
    /// Failing blockers.
    pub failed_blockers: usize,
    /// Failing warnings.
    pub failed_warnings: usize,
    /// Failing info rules.
    pub failed_info: usize,
    /// Counts per outcome for each category.
    pub by_category: BTreeMap<String, OutcomeCounts>,
}

impl Summary {
    /// Builds the summary for `findings`.
    pub fn from_findings(findings: &[Finding]) -> Self {
        let mut summary = Self::default();
        for finding in findings {
            summary.outcomes.record(finding.outcome);
            summary
                .by_category
                .entry(finding.category.clone())
                .or_default()
                .record(finding.outcome);
            if finding.outcome == Outcome::Fail {
                match finding.severity {
                    Severity::Blocker => summary.failed_blockers += 1,
                    Severity::Warning => summary.failed_warnings += 1,
                    Severity::Info => summary.failed_info += 1,
                }
            }
        }
        summary
    }

    /// Rules that could not produce a pass or fail.
    pub fn operational_gaps(&self) -> usize {
        self.outcomes.inapplicable + self.outcomes.errors
    }
}

/// Identification of the assessed database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportMetadata {
    /// Collection identifier.
    pub database_identifier: String,
    /// Engine of the source.
    pub engine: EngineKind,
    /// When the facts were collected.
    pub collected_at: DateTime<Utc>,
}

impl From<&Collection> for ReportMetadata {
    fn from(collection: &Collection) -> Self {
        Self {
            database_identifier: collection.collection_identifier.clone(),
            engine: collection.engine,
            collected_at: collection.collected_at,
        }
    }
}

/// Readiness report for one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    /// Unique id of this report.
    pub report_id: Uuid,
    /// Version of the tool that produced the report.
    pub tool_version: String,
    /// Collection identifier of the assessed database.
    pub database_identifier: String,
    /// Engine of the source.
    pub engine: EngineKind,
    /// When the facts were collected.
    pub collected_at: DateTime<Utc>,
    /// Findings in catalog order.
    pub findings: Vec<Finding>,
    /// Aggregate counts.
    pub summary: Summary,
    /// Overall classification.
    pub verdict: Verdict,
}

/// Aggregates findings into a report.
pub fn aggregate(findings: Vec<Finding>, metadata: ReportMetadata) -> Report {
    let summary = Summary::from_findings(&findings);
    let verdict = verdict_for(&findings);
    Report {
        report_id: Uuid::new_v4(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        database_identifier: metadata.database_identifier,
        engine: metadata.engine,
        collected_at: metadata.collected_at,
        findings,
        summary,
        verdict,
    }
}

impl Report {
    /// Pretty-printed JSON document.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Findings that failed with `severity`.
    pub fn failures(&self, severity: Severity) -> impl Iterator<Item = &Finding> {
        self.findings.iter().filter(move |f| f.fails_with(severity))
    }

    /// Terminal table of all findings.
    pub fn to_table(&self) -> Table {
        let mut table = Table::new();
        table
            .load_preset(UTF8_FULL)
            .set_content_arrangement(ContentArrangement::Dynamic);

        let header: Vec<Cell> = ["Rule", "Severity", "Outcome", "Details"]
            .iter()
            .map(|c| Cell::new(c).fg(Color::Cyan))
            .collect();
        table.set_header(header);

        for finding in &self.findings {
            let mut details = finding.message.clone();
            if let Some(remediation) = &finding.remediation {
                details.push_str("\n→ ");
                details.push_str(remediation);
            }
            table.add_row(vec![
                Cell::new(&finding.rule_id),
                Cell::new(finding.severity),
                Cell::new(finding.outcome).fg(outcome_color(finding)),
                Cell::new(details),
            ]);
        }
        table
    }

    /// Writes the report to `{dir}/{identifier}.report.json`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the file written.
    pub fn write_to(&self, dir: &Path) -> Result<PathBuf> {
        write_document(dir, &self.database_identifier, "report", self)
    }
}

fn outcome_color(finding: &Finding) -> Color {
    match (finding.outcome, finding.severity) {
        (Outcome::Pass, _) => Color::Green,
        (Outcome::Fail, Severity::Blocker) => Color::Red,
        (Outcome::Fail, Severity::Warning) => Color::Yellow,
        (Outcome::Fail, Severity::Info) => Color::Blue,
        (Outcome::Inapplicable, _) => Color::DarkGrey,
        (Outcome::Error, _) => Color::Magenta,
    }
}

/// Writes a collection document to `{dir}/{identifier}.facts.json`.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the file written.
pub fn write_collection(dir: &Path, collection: &Collection) -> Result<PathBuf> {
    write_document(dir, &collection.collection_identifier, "facts", collection)
}

pub(crate) fn write_document<T: Serialize>(
    dir: &Path,
    identifier: &str,
    kind: &str,
    document: &T,
) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{}.{kind}.json", sanitize_identifier(identifier)));
    let json = serde_json::to_string_pretty(document)?;
    std::fs::write(&path, json)?;
    tracing::info!(path = %path.display(), "Wrote {} document", kind);
    Ok(path)
}

/// Maps an identifier to a safe file stem.
pub fn sanitize_identifier(identifier: &str) -> String {
    let cleaned: String = identifier
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').to_string();
    if cleaned.is_empty() {
        "collection".to_string()
    } else {
        cleaned
    }
}
