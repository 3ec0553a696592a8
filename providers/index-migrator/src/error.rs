//! Error types for Index Migrator Provider

use cache_common::CacheError;
use search_common::SearchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MigrationError {
    /// Current index does not follow `<base>_v<N>`; the next version is not guessed
    #[error("Index '{0}' does not follow the <base>_v<N> naming convention")]
    UnrecognizedIndexName(String),

    #[error("Candidate index '{0}' already exists")]
    CandidateExists(String),

    #[error("Copy task {task} failed: {reason}")]
    CopyFailed { task: String, reason: String },

    #[error("Copy task {task} did not complete within {waited_secs}s")]
    CopyTimedOut { task: String, waited_secs: u64 },

    #[error("Index '{index}' holds {actual} documents, copy reported {expected}")]
    VerificationFailed {
        index: String,
        expected: u64,
        actual: u64,
    },

    /// A failure after the alias swap; the rollback flags say what was undone
    #[error(
        "Migration rolled back (alias restored: {alias_restored}, candidate deleted: {candidate_deleted}): {cause}"
    )]
    RolledBack {
        #[source]
        cause: Box<MigrationError>,
        alias_restored: bool,
        candidate_deleted: bool,
    },

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl MigrationError {
    pub fn is_retryable(&self) -> bool {
        match self {
            MigrationError::Search(e) => e.is_retryable(),
            MigrationError::Cache(e) => e.is_retryable(),
            MigrationError::CopyTimedOut { .. } => true,
            MigrationError::RolledBack { cause, .. } => cause.is_retryable(),
            _ => false,
        }
    }

    /// Failure cause with rollback wrapping removed
    pub fn root_cause(&self) -> &MigrationError {
        match self {
            MigrationError::RolledBack { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}
