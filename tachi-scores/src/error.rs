//! Error types for tachi-scores
//!
//! - `InvalidMetricSchema`: caller error, reported, never retried automatically
//! - `ScoreNotFound`: the mutation target vanished; caller decides whether to re-fetch
//! - `ReferenceMigrationIncomplete`: recoverable by the reconciliation sweep
//! - `ScopeChanged`: optimistic check failed before anything was written
//! - `Store`: store I/O failures, propagated unchanged

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ScoreError {
    /// Metric bag cannot be canonicalized against the variant's schema
    #[error("Invalid metrics for {variant}: {reason}")]
    InvalidMetricSchema { variant: String, reason: String },

    /// No score exists under this identity
    #[error("Score not found: {0}")]
    ScoreNotFound(String),

    /// The new score is written and the old one retired, but some referrers
    /// still point at the old identity
    #[error(
        "Reference migration {migration_id} from {old_score_id} to {new_score_id} incomplete: {reason}"
    )]
    ReferenceMigrationIncomplete {
        migration_id: Uuid,
        old_score_id: String,
        new_score_id: String,
        reason: String,
    },

    /// The stored score no longer matches what the caller read
    #[error("Score {score_id} changed underneath the mutation; re-fetch and retry")]
    ScopeChanged { score_id: String },

    /// Store adapter failure
    #[error("Store error: {0}")]
    Store(#[from] tachi_common::Error),
}

impl ScoreError {
    pub(crate) fn invalid_metrics(variant: impl ToString, reason: impl Into<String>) -> Self {
        ScoreError::InvalidMetricSchema {
            variant: variant.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<sqlx::Error> for ScoreError {
    fn from(err: sqlx::Error) -> Self {
        ScoreError::Store(tachi_common::Error::Database(err))
    }
}

/// Result type for score operations
pub type ScoreResult<T> = Result<T, ScoreError>;
