//! Rule evaluation.
//!
//! Evaluation is pure and total: every applicable rule yields exactly one
//! [`Finding`], in catalog order. A missing prerequisite fact makes a rule
//! inapplicable; a predicate that returns a fault or panics yields an
//! `error` finding without affecting the rules after it.

use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

use crate::config::EngineKind;
use crate::facts::FactSet;
use crate::finding::{Finding, Outcome};
use crate::rules::{Catalog, Rule};

/// Evaluates rules against a fact set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    parallel: bool,
}

impl Evaluator {
    /// Sequential evaluator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enables evaluation on the rayon thread pool. Output order is unchanged.
    #[must_use]
    pub fn parallel(mut self, enabled: bool) -> Self {
        self.parallel = enabled;
        self
    }

    /// Evaluates every rule in `catalog` that applies to `engine`.
    pub fn evaluate(&self, facts: &FactSet, engine: EngineKind, catalog: &Catalog) -> Vec<Finding> {
        let rules: Vec<&Rule> = catalog.applicable(engine).collect();
        debug!(
            engine = %engine,
            rules = rules.len(),
            parallel = self.parallel,
            "Evaluating readiness rules"
        );

        if self.parallel {
            rules
                .par_iter()
                .map(|rule| evaluate_rule(rule, facts))
                .collect()
        } else {
            rules.iter().map(|rule| evaluate_rule(rule, facts)).collect()
        }
    }
}

/// Sequentially evaluates every rule in `catalog` that applies to `engine`.
pub fn evaluate(facts: &FactSet, engine: EngineKind, catalog: &Catalog) -> Vec<Finding> {
    Evaluator::new().evaluate(facts, engine, catalog)
}

/// Evaluates a single rule.
pub fn evaluate_rule(rule: &Rule, facts: &FactSet) -> Finding {
    let required: Vec<&str> = rule.required_facts().iter().map(String::as_str).collect();
    let missing = facts.missing(&required);

    let evidence: BTreeMap<String, _> = required
        .iter()
        .filter_map(|name| facts.get(name).map(|value| (name.to_string(), value.clone())))
        .collect();

    let (outcome, message) = if missing.is_empty() {
        run_predicate(rule, facts)
    } else {
        (
            Outcome::Inapplicable,
            format!("missing prerequisite data: {}", missing.join(", ")),
        )
    };

    match outcome {
        Outcome::Error => warn!(rule = %rule.id, error = %message, "Rule evaluation faulted"),
        _ => debug!(rule = %rule.id, outcome = %outcome, "{}", message),
    }

    let remediation = (outcome == Outcome::Fail && !rule.remediation.is_empty())
        .then(|| rule.remediation.clone());

    Finding {
        rule_id: rule.id.clone(),
        title: rule.title.clone(),
        severity: rule.severity,
        category: rule.category.clone(),
        outcome,
        message,
        remediation,
        evidence,
    }
}

fn run_predicate(rule: &Rule, facts: &FactSet) -> (Outcome, String) {
    let result = panic::catch_unwind(AssertUnwindSafe(|| rule.predicate.evaluate(facts)));
    match result {
        Ok(Ok(check)) if check.passed => (Outcome::Pass, check.detail),
        Ok(Ok(check)) => (Outcome::Fail, check.detail),
        Ok(Err(fault)) => (Outcome::Error, fault),
        Err(payload) => (Outcome::Error, format!("predicate panicked: {}", panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{names, FactValue};
    use crate::rules::{Check, Predicate, Severity};

    fn panicking(_: &FactSet) -> Result<Check, String> {
        panic!("index out of bounds")
    }

    fn catalog() -> Catalog {
        Catalog::new(vec![
            Rule::new(
                "test.panics",
                Severity::Blocker,
                "general",
                Predicate::custom(&[names::VERSION], panicking),
            ),
            Rule::new(
                "test.wal_level",
                Severity::Blocker,
                "replication",
                Predicate::equals(names::PG_WAL_LEVEL, "logical"),
            )
            .remediation("Set wal_level = logical."),
            Rule::new(
                "test.mysql_only",
                Severity::Warning,
                "replication",
                Predicate::is_true(names::MYSQL_LOG_BIN),
            )
            .for_engines(&[EngineKind::MySql]),
            Rule::new(
                "test.slots",
                Severity::Warning,
                "replication",
                Predicate::at_least(names::PG_MAX_REPLICATION_SLOTS, 1.0),
            ),
        ])
        .unwrap()
    }

    #[test]
    fn test_panic_is_contained() {
        let facts = FactSet::new()
            .with(names::VERSION, "14.2")
            .with(names::PG_WAL_LEVEL, "replica");

        let findings = evaluate(&facts, EngineKind::Postgres, &catalog());

        assert_eq!(findings[0].outcome, Outcome::Error);
        assert!(findings[0].message.contains("index out of bounds"));
        assert_eq!(findings[1].outcome, Outcome::Fail);
    }

    #[test]
    fn test_engine_filter_and_order() {
        let findings = evaluate(&FactSet::new(), EngineKind::Postgres, &catalog());
        let ids: Vec<&str> = findings.iter().map(|f| f.rule_id.as_str()).collect();
        assert_eq!(ids, vec!["test.panics", "test.wal_level", "test.slots"]);
    }

    #[test]
    fn test_missing_facts_listed_in_message() {
        let facts = FactSet::new().with_absent(names::PG_MAX_REPLICATION_SLOTS, "permission denied");
        let findings = evaluate(&facts, EngineKind::Postgres, &catalog());

        let slots = &findings[2];
        assert_eq!(slots.outcome, Outcome::Inapplicable);
        assert_eq!(
            slots.message,
            "missing prerequisite data: postgres.max_replication_slots"
        );
        assert!(slots.evidence.is_empty());
    }

    #[test]
    fn test_remediation_only_on_failure() {
        let failing = FactSet::new().with(names::PG_WAL_LEVEL, "replica");
        let passing = FactSet::new().with(names::PG_WAL_LEVEL, "logical");

        let failed = &evaluate(&failing, EngineKind::Postgres, &catalog())[1];
        let passed = &evaluate(&passing, EngineKind::Postgres, &catalog())[1];

        assert_eq!(failed.remediation.as_deref(), Some("Set wal_level = logical."));
        assert!(passed.remediation.is_none());
    }

    #[test]
    fn test_evidence_holds_read_values() {
        let facts = FactSet::new()
            .with(names::PG_WAL_LEVEL, "logical")
            .with(names::CHARSET, "UTF8");
        let finding = &evaluate(&facts, EngineKind::Postgres, &catalog())[1];

        assert_eq!(finding.evidence.len(), 1);
        assert_eq!(
            finding.evidence.get(names::PG_WAL_LEVEL),
            Some(&FactValue::from("logical"))
        );
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let facts = FactSet::new()
            .with(names::VERSION, "8.0.36")
            .with(names::VERSION_MAJOR, 8_i64)
            .with(names::VERSION_MINOR, 0_i64)
            .with(names::MYSQL_LOG_BIN, true)
            .with(names::MYSQL_BINLOG_FORMAT, "MIXED");

        let catalog = Catalog::builtin();
        let sequential = Evaluator::new().evaluate(&facts, EngineKind::MySql, catalog);
        let parallel = Evaluator::new()
            .parallel(true)
            .evaluate(&facts, EngineKind::MySql, catalog);

        assert_eq!(sequential, parallel);
    }

    #[test]
    fn test_version_check_runs_without_minor_component() {
        let facts = FactSet::new()
            .with(names::VERSION, "16devel")
            .with(names::VERSION_MAJOR, 16_i64)
            .with_absent(names::VERSION_MINOR, "version string has no minor component");

        let findings = evaluate(&facts, EngineKind::Postgres, Catalog::builtin());
        let finding = findings
            .iter()
            .find(|f| f.rule_id == "postgres.version_supported")
            .unwrap();

        assert_eq!(finding.outcome, Outcome::Pass, "{}", finding.message);
    }
}
