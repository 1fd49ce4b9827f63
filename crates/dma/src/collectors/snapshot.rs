//! Replays a persisted collection document.
//!
//! Lets `readiness-check --from-collection` evaluate facts gathered earlier
//! by `collect-data`, without access to the source database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use tracing::info;

use super::FactCollector;
use crate::config::EngineKind;
use crate::error::{Error, Result};
use crate::facts::{Collection, FactSet};

/// Collector backed by a collection document.
#[derive(Debug)]
pub struct SnapshotCollector {
    engine: EngineKind,
    source: Source,
    loaded: Option<Collection>,
}

#[derive(Debug)]
enum Source {
    File(PathBuf),
    Memory(Collection),
}

impl SnapshotCollector {
    /// Reads the document at `path` on `connect`. Collection fails unless the
    /// document was produced from an `engine` database.
    pub fn open(path: impl Into<PathBuf>, engine: EngineKind) -> Self {
        Self {
            engine,
            source: Source::File(path.into()),
            loaded: None,
        }
    }

    /// Wraps an already loaded document.
    pub fn from_collection(collection: Collection) -> Self {
        Self {
            engine: collection.engine,
            source: Source::Memory(collection),
            loaded: None,
        }
    }
}

#[async_trait]
impl FactCollector for SnapshotCollector {
    fn engine(&self) -> EngineKind {
        self.engine
    }

    async fn connect(&mut self) -> Result<()> {
        let collection = match &self.source {
            Source::File(path) => {
                info!(path = %path.display(), "Loading collection document");
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    Error::Config(format!("cannot read '{}': {e}", path.display()))
                })?;
                serde_json::from_str(&content)?
            }
            Source::Memory(collection) => collection.clone(),
        };
        self.loaded = Some(collection);
        Ok(())
    }

    async fn collect(&mut self) -> Result<FactSet> {
        let collection = self
            .loaded
            .as_ref()
            .ok_or_else(|| super::not_connected(self.engine))?;
        if collection.engine != self.engine {
            return Err(Error::collection(
                "engine",
                format!(
                    "collection '{}' was taken from {}, expected {}",
                    collection.collection_identifier,
                    collection.engine.display_name(),
                    self.engine.display_name()
                ),
            ));
        }
        Ok(collection.facts.clone())
    }

    async fn close(&mut self) -> Result<()> {
        self.loaded = None;
        Ok(())
    }

    fn collected_at(&self) -> Option<DateTime<Utc>> {
        self.loaded.as_ref().map(|collection| collection.collected_at)
    }
}
