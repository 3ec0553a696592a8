//! Token Ranking Provider
//!
//! Ranks tokens by trading activity from search aggregations and keeps the
//! hot-token cache warm:
//!
//! - [`RankingPipeline`]: rank query -> aggregation search -> decoded, sorted
//!   tokens, optionally behind a short-lived result cache
//! - [`HotTokenRefresher`]: lock-guarded cycle that enriches new top tokens and
//!   commits them to the `hot:tokens` TTL sorted set

pub mod config;
pub mod enrichment;
pub mod error;
pub mod model;
pub mod pipeline;
pub mod provider;
pub mod query;
pub mod ranking_query;
pub mod refresh;
pub mod retry;

pub use config::RankingConfig;
pub use enrichment::{HttpSafetyChecker, HttpTokenRepository, SafetyChecker, TokenRepository};
pub use error::RankingError;
pub use model::{EnrichedToken, RankOutcome, RankedToken, SafetyReport, TokenFlags, TokenMetadata};
pub use pipeline::RankingPipeline;
pub use provider::TokenRankingProvider;
pub use query::{FilterPredicate, RankQuery, RankQueryBuilder, SortField, TimeWindow};
pub use ranking_query::build_ranking_query;
pub use refresh::{CandidateSource, HotTokenRefresher, RankedCandidates, RefreshPhase, RefreshReport};
pub use retry::{retry_with_backoff, RetryConfig};

// Re-export Result type for convenience
pub type Result<T> = std::result::Result<T, RankingError>;
