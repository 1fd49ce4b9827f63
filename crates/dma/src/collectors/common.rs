//! Helpers shared across collectors.
//!
//! [`FactRecorder`] enforces the collection contract: a failed required fact
//! aborts collection with [`Error::Collection`], a failed optional fact is
//! recorded as absent with its reason and logged at `warn`.

use std::fmt::Display;
use tracing::{debug, warn};

use crate::config::EngineKind;
use crate::error::{Error, Result};
use crate::facts::{names, FactSet, FactValue};

/// Accumulates facts for one collection run.
#[derive(Debug)]
pub struct FactRecorder {
    engine: EngineKind,
    facts: FactSet,
}

impl FactRecorder {
    /// Creates an empty recorder for `engine`.
    pub fn new(engine: EngineKind) -> Self {
        Self {
            engine,
            facts: FactSet::new(),
        }
    }

    /// Records a required fact.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collection`] if `result` is an error.
    pub fn required<T, E>(&mut self, name: &str, result: std::result::Result<T, E>) -> Result<()>
    where
        T: Into<FactValue>,
        E: Display,
    {
        let value = result.map_err(|e| Error::collection(name, e))?;
        self.facts.insert(name, value);
        Ok(())
    }

    /// Records a required fact with a unit.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collection`] if `result` is an error.
    pub fn required_with_unit<T, E>(
        &mut self,
        name: &str,
        result: std::result::Result<T, E>,
        unit: &str,
    ) -> Result<()>
    where
        T: Into<FactValue>,
        E: Display,
    {
        let value = result.map_err(|e| Error::collection(name, e))?;
        self.facts.insert_with_unit(name, value, unit);
        Ok(())
    }

    /// Records an optional fact, or its absence.
    pub fn optional<T, E>(&mut self, name: &str, result: std::result::Result<T, E>)
    where
        T: Into<FactValue>,
        E: Display,
    {
        match result {
            Ok(value) => self.facts.insert(name, value),
            Err(e) => self.absent(name, e.to_string()),
        }
    }

    /// Records that an optional fact could not be measured.
    pub fn absent(&mut self, name: &str, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(
            engine = %self.engine,
            fact = name,
            reason = %reason,
            "Optional fact not collected"
        );
        self.facts.mark_absent(name, reason);
    }

    /// Records `version`, `version_major` and `version_minor` from a version string.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Collection`] if the query failed or the string has no
    /// recognizable major version.
    pub fn version<E: Display>(&mut self, result: std::result::Result<String, E>) -> Result<()> {
        let text = result.map_err(|e| Error::collection(names::VERSION, e))?;
        let (major, minor) = parse_version(&text).ok_or_else(|| {
            Error::collection(
                names::VERSION_MAJOR,
                format!("unrecognized version string '{text}'"),
            )
        })?;
        self.facts.insert(names::VERSION, text);
        self.facts.insert(names::VERSION_MAJOR, major);
        match minor {
            Some(minor) => self.facts.insert(names::VERSION_MINOR, minor),
            None => self.absent(names::VERSION_MINOR, "version string has no minor component"),
        }
        Ok(())
    }

    /// Returns the collected facts.
    pub fn finish(self) -> FactSet {
        debug!(
            engine = %self.engine,
            measured = self.facts.measured_count(),
            total = self.facts.len(),
            "Collection finished"
        );
        self.facts
    }
}

/// Extracts `(major, minor)` from the first dotted number in `text`.
///
/// `"14.2 (Debian 14.2-1.pgdg110+1)"` yields `(14, Some(2))`,
/// `"8.0.36-log"` yields `(8, Some(0))`.
pub fn parse_version(text: &str) -> Option<(i64, Option<i64>)> {
    let start = text.find(|c: char| c.is_ascii_digit())?;
    let numeric: String = text[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = numeric.split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next().and_then(|m| m.parse().ok());
    Some((major, minor))
}

/// Splits a comma-separated setting into trimmed, non-empty items.
pub fn split_list(setting: &str) -> Vec<String> {
    setting
        .split(',')
        .map(|item| item.trim().trim_matches('"').to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_variants() {
        assert_eq!(parse_version("14.2 (Debian 14.2-1.pgdg110+1)"), Some((14, Some(2))));
        assert_eq!(parse_version("8.0.36-log"), Some((8, Some(0))));
        assert_eq!(parse_version("15.0.2000.5"), Some((15, Some(0))));
        assert_eq!(parse_version("PostgreSQL 9.6.24"), Some((9, Some(6))));
        assert_eq!(parse_version("16"), Some((16, None)));
        assert_eq!(parse_version("unknown"), None);
    }

    #[test]
    fn test_required_failure_aborts() {
        let mut recorder = FactRecorder::new(EngineKind::Postgres);
        let err = recorder
            .required::<i64, _>(names::DATABASE_SIZE_BYTES, Err("permission denied"))
            .unwrap_err();
        assert!(matches!(err, Error::Collection { ref fact, .. } if fact == names::DATABASE_SIZE_BYTES));
    }

    #[test]
    fn test_optional_failure_is_absent_not_zero() {
        let mut recorder = FactRecorder::new(EngineKind::Postgres);
        recorder.optional::<i64, _>(names::PG_LARGE_OBJECTS, Err("permission denied"));
        recorder.optional::<i64, &str>(names::PG_UNLOGGED_TABLES, Ok(0));

        let facts = recorder.finish();
        assert_eq!(
            facts.absence_reason(names::PG_LARGE_OBJECTS),
            Some("permission denied")
        );
        assert_eq!(facts.get(names::PG_UNLOGGED_TABLES), Some(&FactValue::Int(0)));
    }

    #[test]
    fn test_version_records_components() {
        let mut recorder = FactRecorder::new(EngineKind::MySql);
        recorder
            .version::<&str>(Ok("5.7.44-log".to_string()))
            .unwrap();
        let facts = recorder.finish();

        assert_eq!(facts.get(names::VERSION_MAJOR), Some(&FactValue::Int(5)));
        assert_eq!(facts.get(names::VERSION_MINOR), Some(&FactValue::Int(7)));
    }

    #[test]
    fn test_malformed_version_is_collection_error() {
        let mut recorder = FactRecorder::new(EngineKind::MySql);
        let err = recorder.version::<&str>(Ok("n/a".to_string())).unwrap_err();
        assert_eq!(err.code(), "DMA-004");
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list("pg_stat_statements, pglogical,,"),
            vec!["pg_stat_statements".to_string(), "pglogical".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
