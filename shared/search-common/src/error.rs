//! Error types for search index access, query construction and decoding

use thiserror::Error;

/// Search index operation errors
#[derive(Error, Debug)]
pub enum SearchError {
    /// Sub-aggregation attached to a parent name that is not in the tree
    #[error("Unknown parent aggregation '{parent}' for '{name}'")]
    UnknownParentAggregation { parent: String, name: String },

    /// Aggregation name already used somewhere in the tree
    #[error("Duplicate aggregation name: {0}")]
    DuplicateAggregation(String),

    /// Metric and pipeline aggregations cannot carry children
    #[error("Aggregation '{0}' is a leaf and cannot have sub-aggregations")]
    LeafAggregation(String),

    /// Top-level aggregation missing from a search response
    #[error("Aggregation '{0}' missing from response")]
    MissingAggregation(String),

    /// Malformed aggregation payload for a single bucket or metric
    #[error("Decode error: {0}")]
    Decode(String),

    /// Transport level failure talking to the search engine
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success status returned by the search engine
    #[error("Search engine returned {status}: {body}")]
    Status { status: u16, body: String },

    /// Alias resolves to zero or several indices
    #[error("Alias '{alias}' resolves to {count} indices")]
    AliasResolution { alias: String, count: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SearchError {
    pub fn is_retryable(&self) -> bool {
        match self {
            SearchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SearchError::Status { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// True when the engine answered 404
    pub fn is_not_found(&self) -> bool {
        matches!(self, SearchError::Status { status: 404, .. })
    }
}
