//! Readiness rules.
//!
//! A rule pairs a [`Predicate`] over a [`FactSet`] with a severity, a
//! category, the engines it applies to and remediation text. Predicates are
//! built from a closed set of combinators so most rules are plain data; the
//! [`Predicate::Custom`] variant covers the few checks that need code.

pub mod catalog;

pub use catalog::Catalog;

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use crate::config::EngineKind;
use crate::facts::{names, FactSet, FactValue};

/// How serious a failing rule is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational; never affects the verdict.
    Info,
    /// Migration can proceed but needs attention.
    Warning,
    /// Migration cannot proceed until resolved.
    Blocker,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Blocker => "blocker",
        };
        f.write_str(name)
    }
}

/// Result of a predicate that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Check {
    /// Whether the rule's condition holds.
    pub passed: bool,
    /// What was observed.
    pub detail: String,
}

impl Check {
    /// A passing check.
    pub fn pass(detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            detail: detail.into(),
        }
    }

    /// A failing check.
    pub fn fail(detail: impl Into<String>) -> Self {
        Self {
            passed: false,
            detail: detail.into(),
        }
    }
}

/// Signature of a custom predicate. `Err` is an internal fault, not a failure.
pub type CustomCheck = fn(&FactSet) -> Result<Check, String>;

/// Composable condition over a fact set.
#[derive(Debug, Clone)]
pub enum Predicate {
    /// Fact equals a value (text compares case-insensitively).
    Equals {
        /// Fact read.
        fact: String,
        /// Expected value.
        expected: FactValue,
    },
    /// Fact equals one of several values.
    OneOf {
        /// Fact read.
        fact: String,
        /// Accepted values.
        allowed: Vec<FactValue>,
    },
    /// Numeric fact is at least a threshold.
    AtLeast {
        /// Fact read.
        fact: String,
        /// Inclusive lower bound.
        threshold: f64,
    },
    /// Numeric fact is at most a threshold.
    AtMost {
        /// Fact read.
        fact: String,
        /// Inclusive upper bound.
        threshold: f64,
    },
    /// Fact is measured and not empty.
    Present {
        /// Fact read.
        fact: String,
    },
    /// Boolean fact is true.
    IsTrue {
        /// Fact read.
        fact: String,
    },
    /// List fact contains an item (case-insensitive).
    Contains {
        /// Fact read.
        fact: String,
        /// Item looked for.
        item: String,
    },
    /// List fact contains none of the forbidden items (case-insensitive).
    ContainsNone {
        /// Fact read.
        fact: String,
        /// Items that must not appear.
        forbidden: Vec<String>,
    },
    /// Server version is at least `major.minor`.
    VersionAtLeast {
        /// Minimum major version.
        major: i64,
        /// Minimum minor version within `major`.
        minor: i64,
    },
    /// Every inner predicate holds.
    All(Vec<Predicate>),
    /// At least one inner predicate holds.
    Any(Vec<Predicate>),
    /// The inner predicate does not hold.
    Not(Box<Predicate>),
    /// Hand-written check reading exactly `facts`.
    Custom {
        /// Facts the check reads.
        facts: Vec<String>,
        /// The check.
        check: CustomCheck,
    },
}

impl Predicate {
    /// `fact == expected`.
    pub fn equals(fact: &str, expected: impl Into<FactValue>) -> Self {
        Self::Equals {
            fact: fact.to_string(),
            expected: expected.into(),
        }
    }

    /// `fact` is one of `allowed`.
    pub fn one_of(fact: &str, allowed: &[&str]) -> Self {
        Self::OneOf {
            fact: fact.to_string(),
            allowed: allowed.iter().map(|v| FactValue::from(*v)).collect(),
        }
    }

    /// `fact >= threshold`.
    pub fn at_least(fact: &str, threshold: f64) -> Self {
        Self::AtLeast {
            fact: fact.to_string(),
            threshold,
        }
    }

    /// `fact <= threshold`.
    pub fn at_most(fact: &str, threshold: f64) -> Self {
        Self::AtMost {
            fact: fact.to_string(),
            threshold,
        }
    }

    /// `fact` is measured and not empty.
    pub fn present(fact: &str) -> Self {
        Self::Present {
            fact: fact.to_string(),
        }
    }

    /// `fact == true`.
    pub fn is_true(fact: &str) -> Self {
        Self::IsTrue {
            fact: fact.to_string(),
        }
    }

    /// `fact == false`.
    pub fn is_false(fact: &str) -> Self {
        Self::equals(fact, false)
    }

    /// List `fact` contains `item`.
    pub fn contains(fact: &str, item: &str) -> Self {
        Self::Contains {
            fact: fact.to_string(),
            item: item.to_string(),
        }
    }

    /// List `fact` contains none of `forbidden`.
    pub fn contains_none(fact: &str, forbidden: &[&str]) -> Self {
        Self::ContainsNone {
            fact: fact.to_string(),
            forbidden: forbidden.iter().map(ToString::to_string).collect(),
        }
    }

    /// Server version is at least `major.minor`.
    pub fn version_at_least(major: i64, minor: i64) -> Self {
        Self::VersionAtLeast { major, minor }
    }

    /// All of `predicates` hold.
    pub fn all(predicates: Vec<Predicate>) -> Self {
        Self::All(predicates)
    }

    /// Any of `predicates` holds.
    pub fn any(predicates: Vec<Predicate>) -> Self {
        Self::Any(predicates)
    }

    /// Negation.
    #[allow(clippy::should_implement_trait)]
    pub fn not(predicate: Predicate) -> Self {
        Self::Not(Box::new(predicate))
    }

    /// Custom check reading `facts`.
    pub fn custom(facts: &[&str], check: CustomCheck) -> Self {
        Self::Custom {
            facts: facts.iter().map(ToString::to_string).collect(),
            check,
        }
    }

    /// Facts this predicate reads, deduplicated, in first-use order.
    pub fn facts(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_facts(&mut out);
        out
    }

    fn collect_facts(&self, out: &mut Vec<String>) {
        match self {
            Self::Equals { fact, .. }
            | Self::OneOf { fact, .. }
            | Self::AtLeast { fact, .. }
            | Self::AtMost { fact, .. }
            | Self::Present { fact }
            | Self::IsTrue { fact }
            | Self::Contains { fact, .. }
            | Self::ContainsNone { fact, .. } => push_unique(out, fact),
            // The minor is only read when the major ties the threshold.
            Self::VersionAtLeast { .. } => push_unique(out, names::VERSION_MAJOR),
            Self::Custom { facts, .. } => facts.iter().for_each(|f| push_unique(out, f)),
            Self::All(inner) | Self::Any(inner) => {
                inner.iter().for_each(|p| p.collect_facts(out));
            }
            Self::Not(inner) => inner.collect_facts(out),
        }
    }

    /// Evaluates the predicate.
    ///
    /// # Errors
    ///
    /// Returns a fault message if a fact is missing or has the wrong type.
    pub fn evaluate(&self, facts: &FactSet) -> Result<Check, String> {
        match self {
            Self::Equals { fact, expected } => {
                let actual = measured(facts, fact)?;
                let detail = format!("{fact} = {actual} (expected {expected})");
                Ok(verdict(actual.loosely_equals(expected), detail))
            }
            Self::OneOf { fact, allowed } => {
                let actual = measured(facts, fact)?;
                let expected: Vec<String> = allowed.iter().map(ToString::to_string).collect();
                let detail = format!(
                    "{fact} = {actual} (expected one of {})",
                    expected.join(", ")
                );
                Ok(verdict(
                    allowed.iter().any(|v| actual.loosely_equals(v)),
                    detail,
                ))
            }
            Self::AtLeast { fact, threshold } => {
                let actual = number(facts, fact)?;
                let detail = format!("{fact} = {actual} (minimum {threshold})");
                Ok(verdict(actual >= *threshold, detail))
            }
            Self::AtMost { fact, threshold } => {
                let actual = number(facts, fact)?;
                let detail = format!("{fact} = {actual} (maximum {threshold})");
                Ok(verdict(actual <= *threshold, detail))
            }
            Self::Present { fact } => {
                let actual = measured(facts, fact)?;
                if actual.is_empty() {
                    Ok(Check::fail(format!("{fact} is empty")))
                } else {
                    Ok(Check::pass(format!("{fact} = {actual}")))
                }
            }
            Self::IsTrue { fact } => {
                let actual = measured(facts, fact)?;
                let flag = actual.as_bool().ok_or_else(|| type_fault(fact, actual, "bool"))?;
                Ok(verdict(flag, format!("{fact} = {flag} (expected true)")))
            }
            Self::Contains { fact, item } => {
                let items = text_items(facts, fact)?;
                if items.iter().any(|i| i.eq_ignore_ascii_case(item)) {
                    Ok(Check::pass(format!("{fact} contains {item}")))
                } else {
                    Ok(Check::fail(format!("{fact} does not contain {item}")))
                }
            }
            Self::ContainsNone { fact, forbidden } => {
                let items = text_items(facts, fact)?;
                let found: Vec<&str> = items
                    .iter()
                    .filter(|i| forbidden.iter().any(|f| f.eq_ignore_ascii_case(i)))
                    .map(String::as_str)
                    .collect();
                if found.is_empty() {
                    Ok(Check::pass(format!(
                        "{fact} contains none of {}",
                        forbidden.join(", ")
                    )))
                } else {
                    Ok(Check::fail(format!("{fact} contains {}", found.join(", "))))
                }
            }
            Self::VersionAtLeast { major, minor } => {
                let actual_major = integer(facts, names::VERSION_MAJOR)?;
                let actual_minor = if *minor > 0 && actual_major == *major {
                    integer(facts, names::VERSION_MINOR)?
                } else {
                    facts
                        .get(names::VERSION_MINOR)
                        .and_then(FactValue::as_i64)
                        .unwrap_or(0)
                };
                let passed = (actual_major, actual_minor) >= (*major, *minor);
                let detail =
                    format!("version {actual_major}.{actual_minor} (minimum {major}.{minor})");
                Ok(verdict(passed, detail))
            }
            Self::All(inner) => {
                let results = inner
                    .iter()
                    .map(|p| p.evaluate(facts))
                    .collect::<Result<Vec<_>, _>>()?;
                let failing: Vec<&str> = results
                    .iter()
                    .filter(|c| !c.passed)
                    .map(|c| c.detail.as_str())
                    .collect();
                if failing.is_empty() {
                    Ok(Check::pass(join_details(&results)))
                } else {
                    Ok(Check::fail(failing.join("; ")))
                }
            }
            Self::Any(inner) => {
                let results = inner
                    .iter()
                    .map(|p| p.evaluate(facts))
                    .collect::<Result<Vec<_>, _>>()?;
                match results.iter().find(|c| c.passed) {
                    Some(hit) => Ok(Check::pass(hit.detail.clone())),
                    None => Ok(Check::fail(join_details(&results))),
                }
            }
            Self::Not(inner) => {
                let result = inner.evaluate(facts)?;
                Ok(Check {
                    passed: !result.passed,
                    detail: format!("not ({})", result.detail),
                })
            }
            Self::Custom { check, .. } => check(facts),
        }
    }
}

fn verdict(passed: bool, detail: String) -> Check {
    Check { passed, detail }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|existing| existing == name) {
        out.push(name.to_string());
    }
}

fn join_details(results: &[Check]) -> String {
    results
        .iter()
        .map(|c| c.detail.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

fn measured<'a>(facts: &'a FactSet, name: &str) -> Result<&'a FactValue, String> {
    facts
        .get(name)
        .ok_or_else(|| format!("fact '{name}' was not measured"))
}

fn type_fault(name: &str, actual: &FactValue, expected: &str) -> String {
    format!(
        "fact '{name}' is {}, expected {expected}",
        actual.type_name()
    )
}

fn number(facts: &FactSet, name: &str) -> Result<f64, String> {
    let value = measured(facts, name)?;
    value
        .as_f64()
        .ok_or_else(|| type_fault(name, value, "a number"))
}

fn integer(facts: &FactSet, name: &str) -> Result<i64, String> {
    let value = measured(facts, name)?;
    value
        .as_i64()
        .ok_or_else(|| type_fault(name, value, "int"))
}

fn text_items(facts: &FactSet, name: &str) -> Result<Vec<String>, String> {
    let value = measured(facts, name)?;
    let items = value.as_list().ok_or_else(|| type_fault(name, value, "list"))?;
    items
        .iter()
        .map(|item| {
            item.as_str()
                .map(ToString::to_string)
                .ok_or_else(|| type_fault(name, item, "list of text"))
        })
        .collect()
}

/// A readiness rule.
#[derive(Debug, Clone)]
pub struct Rule {
    /// Stable identifier. Never reused for different semantics.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Engines the rule applies to; empty means all engines.
    pub engines: BTreeSet<EngineKind>,
    /// Severity when the rule fails.
    pub severity: Severity,
    /// Grouping used in reports (e.g. "replication").
    pub category: String,
    /// Condition that must hold.
    pub predicate: Predicate,
    /// What to do when the rule fails.
    pub remediation: String,
    required_facts: Vec<String>,
}

impl Rule {
    /// Creates a universal rule; narrow it with [`Rule::for_engines`].
    pub fn new(id: &str, severity: Severity, category: &str, predicate: Predicate) -> Self {
        let required_facts = predicate.facts();
        Self {
            id: id.to_string(),
            title: id.to_string(),
            engines: BTreeSet::new(),
            severity,
            category: category.to_string(),
            predicate,
            remediation: String::new(),
            required_facts,
        }
    }

    /// Sets the title.
    #[must_use]
    pub fn titled(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    /// Restricts the rule to `engines`.
    #[must_use]
    pub fn for_engines(mut self, engines: &[EngineKind]) -> Self {
        self.engines = engines.iter().copied().collect();
        self
    }

    /// Sets the remediation text.
    #[must_use]
    pub fn remediation(mut self, text: &str) -> Self {
        self.remediation = text.to_string();
        self
    }

    /// Facts the rule reads.
    pub fn required_facts(&self) -> &[String] {
        &self.required_facts
    }

    /// Returns true if the rule applies to `engine`.
    pub fn applies_to(&self, engine: EngineKind) -> bool {
        self.engines.is_empty() || self.engines.contains(&engine)
    }
}

#[cfg(test)]
#[path = "predicate_tests.rs"]
mod tests;
