//! Search Common - query construction and result decoding for token ranking
//!
//! This crate provides the search-engine side of the token ranking backend:
//!
//! - **Query builder**: typed boolean query + aggregation tree, serialized into
//!   one search document
//! - **Aggregation decoder**: nested token buckets decoded into typed metrics,
//!   with per-bucket failure isolation
//! - **Search index client**: the primitive index/alias/reindex operations,
//!   behind the [`SearchIndex`] trait
//!
//! # Index Layout
//!
//! ```text
//! transactions            # alias, always bound to exactly one generation
//! transactions_v{N}       # concrete index generation
//! ```

pub mod aggregation;
pub mod client;
pub mod error;
pub mod query;
pub mod schema;

// Re-exports for convenient access
pub use aggregation::{
    decode_bucket, decode_buckets, decode_sibling_value, AggregationBucket, DecodedBuckets,
    LatestTransaction, WindowStats,
};
pub use client::{
    ElasticsearchClient, ReindexRequest, SearchClientConfig, SearchIndex, SearchResponse,
    TaskHandle, TaskStatus,
};
pub use error::SearchError;
pub use query::{Aggregation, BoolQuery, Clause, QueryBuilder, RangeBounds, SortOrder};

pub type Result<T> = std::result::Result<T, SearchError>;
