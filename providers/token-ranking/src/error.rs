//! Error types for Token Ranking Provider

use cache_common::CacheError;
use search_common::SearchError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RankingError {
    #[error("Invalid rank query: {0}")]
    InvalidQuery(String),

    #[error("Search error: {0}")]
    Search(#[from] SearchError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{service} returned {status}: {body}")]
    UpstreamStatus {
        service: &'static str,
        status: u16,
        body: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl RankingError {
    pub fn is_retryable(&self) -> bool {
        match self {
            RankingError::Search(e) => e.is_retryable(),
            RankingError::Cache(e) => e.is_retryable(),
            RankingError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            RankingError::UpstreamStatus { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }
}
