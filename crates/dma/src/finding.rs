//! Outcome of evaluating one rule against one fact set.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::facts::FactValue;
use crate::rules::Severity;

/// Result class of a rule evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    /// The condition holds.
    Pass,
    /// The condition does not hold.
    Fail,
    /// A required fact was not measured.
    Inapplicable,
    /// The predicate faulted.
    Error,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Inapplicable => "inapplicable",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// One rule's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    /// Id of the rule that produced this finding.
    pub rule_id: String,
    /// Rule title.
    pub title: String,
    /// Rule severity.
    pub severity: Severity,
    /// Rule category.
    pub category: String,
    /// Result class.
    pub outcome: Outcome,
    /// What was observed, or why the rule could not run.
    pub message: String,
    /// What to do about a failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,
    /// Measured values of the facts the rule read.
    #[serde(default)]
    pub evidence: BTreeMap<String, FactValue>,
}

impl Finding {
    /// Returns true if this finding failed with `severity`.
    pub fn fails_with(&self, severity: Severity) -> bool {
        self.outcome == Outcome::Fail && self.severity == severity
    }
}
