//! Error types for `dma`.
//!
//! Rule evaluation never produces an [`Error`]: a failing or faulting rule is
//! reported as a finding. Errors here are the fatal conditions of a run
//! (configuration, connection, collection, cancellation) and the failures of
//! the connectivity prober.

use thiserror::Error;

/// Result type alias for `dma` operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while assessing a source database.
///
/// Error codes follow the pattern `DMA-XXX` and are printed with every
/// diagnostic so failures can be looked up quickly.
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid or incomplete configuration (DMA-001).
    #[error("[DMA-001] Configuration error: {0}")]
    Config(String),

    /// The source database could not be reached (DMA-002).
    #[error("[DMA-002] Connection error: {0}")]
    Connection(String),

    /// The source database rejected the credentials (DMA-003).
    #[error("[DMA-003] Authentication failed: {0}")]
    Authentication(String),

    /// A required metadata query failed or returned malformed data (DMA-004).
    #[error("[DMA-004] Collection error for '{fact}': {message}")]
    Collection {
        /// Fact the failing query was meant to produce.
        fact: String,
        /// Underlying cause.
        message: String,
    },

    /// The run exceeded its deadline and was cancelled (DMA-005).
    #[error("[DMA-005] Cancelled: {0}")]
    Cancelled(String),

    /// The engine is known but support for it was not compiled in (DMA-006).
    #[error("[DMA-006] Engine '{0}' is not supported by this build")]
    UnsupportedEngine(String),

    /// The connectivity prober reported a failure (DMA-007).
    #[error("[DMA-007] Connectivity probe error: {0}")]
    Prober(String),

    /// Rate limited by a remote API (DMA-008).
    #[error("[DMA-008] Rate limited, retry after {0} seconds")]
    RateLimit(u64),

    /// HTTP transport error (DMA-009).
    #[error("[DMA-009] HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (DMA-010).
    #[error("[DMA-010] IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error (DMA-011).
    #[error("[DMA-011] JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parse error (DMA-012).
    #[error("[DMA-012] YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Returns the error code (e.g., "DMA-001").
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "DMA-001",
            Self::Connection(_) => "DMA-002",
            Self::Authentication(_) => "DMA-003",
            Self::Collection { .. } => "DMA-004",
            Self::Cancelled(_) => "DMA-005",
            Self::UnsupportedEngine(_) => "DMA-006",
            Self::Prober(_) => "DMA-007",
            Self::RateLimit(_) => "DMA-008",
            Self::Http(_) => "DMA-009",
            Self::Io(_) => "DMA-010",
            Self::Json(_) => "DMA-011",
            Self::Yaml(_) => "DMA-012",
        }
    }

    /// Shorthand for a collection failure on `fact`.
    pub fn collection(fact: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::Collection {
            fact: fact.into(),
            message: message.to_string(),
        }
    }

    /// Returns true if the source database could not be reached or logged into.
    #[must_use]
    pub const fn is_connection_failure(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Authentication(_))
    }
}

#[cfg(any(feature = "postgres", feature = "mysql"))]
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => match db.code().as_deref() {
                // SQLSTATE class 28: invalid authorization specification
                Some("28P01" | "28000") => Self::Authentication(db.message().to_string()),
                _ => Self::Connection(err.to_string()),
            },
            _ => Self::Connection(err.to_string()),
        }
    }
}
