//! Configuration for Token Ranking Provider

use crate::retry::RetryConfig;
use crate::{RankingError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for Token Ranking Provider
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RankingConfig {
    /// Redis connection URL (hot set, flags, ranking results, locks)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Redis connection pool size
    #[serde(default = "default_pool_size")]
    pub redis_pool_size: usize,

    /// Search engine base URL
    #[serde(default = "default_search_url")]
    pub search_url: String,

    #[serde(default)]
    pub search_username: Option<String>,

    #[serde(default)]
    pub search_password: Option<String>,

    /// Alias the ranking queries run against
    #[serde(default = "default_transactions_alias")]
    pub transactions_alias: String,

    /// Per-request search timeout in seconds
    #[serde(default = "default_search_timeout")]
    pub search_timeout_secs: u64,

    /// Sorted set holding the hot tokens
    #[serde(default = "default_hot_set_key")]
    pub hot_set_key: String,

    /// Cache domain used in the refresh lock key
    #[serde(default = "default_cache_domain")]
    pub cache_domain: String,

    /// Lifetime of a hot set entry in seconds
    #[serde(default = "default_hot_set_ttl")]
    pub hot_set_ttl_secs: u64,

    /// Refresh lock TTL in seconds
    #[serde(default = "default_lock_ttl")]
    pub lock_ttl_secs: u64,

    /// Tokens per enrichment batch
    #[serde(default = "default_enrichment_batch_size")]
    pub enrichment_batch_size: usize,

    /// Lifetime of a cached ranking result in seconds
    #[serde(default = "default_result_cache_ttl")]
    pub result_cache_ttl_secs: u64,

    /// Terms aggregation over-fetch factor relative to the requested limit
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Cron expression (with seconds) for the refresh job
    #[serde(default = "default_refresh_cron")]
    pub refresh_cron: String,

    /// Ranking window used to select hot tokens
    #[serde(default = "default_refresh_window")]
    pub refresh_window: String,

    /// Number of hot tokens selected per refresh
    #[serde(default = "default_refresh_limit")]
    pub refresh_limit: usize,

    /// Token service (system of record) base URL
    #[serde(default = "default_token_service_url")]
    pub token_service_url: String,

    /// Safety/liquidity API base URL
    #[serde(default = "default_safety_api_url")]
    pub safety_api_url: String,

    /// Token security API base URL (honeypot and mint authority verdicts)
    #[serde(default)]
    pub token_security_url: Option<String>,

    /// Chain identifier passed to the safety API
    #[serde(default = "default_chain")]
    pub chain: String,

    /// Liquidity below which a token is flagged
    #[serde(default = "default_min_liquidity")]
    pub min_liquidity_usd: f64,

    /// Timeout for token service and safety API calls in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,

    /// Number of attempts per enrichment call
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,

    /// Initial retry delay in milliseconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,

    /// Maximum retry delay in milliseconds
    #[serde(default = "default_retry_max_delay")]
    pub retry_max_delay_ms: u64,
}

impl RankingConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> std::result::Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Load configuration from `PREFIX`-prefixed environment variables
    pub fn from_env_prefixed(prefix: &str) -> std::result::Result<Self, envy::Error> {
        envy::prefixed(prefix).from_env()
    }

    pub fn with_redis_url(mut self, redis_url: impl Into<String>) -> Self {
        self.redis_url = redis_url.into();
        self
    }

    pub fn with_search_url(mut self, search_url: impl Into<String>) -> Self {
        self.search_url = search_url.into();
        self
    }

    pub fn hot_set_ttl(&self) -> Duration {
        Duration::from_secs(self.hot_set_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn result_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.result_cache_ttl_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn retry(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry_attempts,
            self.retry_delay_ms,
            self.retry_max_delay_ms,
        )
    }

    /// Worst-case duration of one refresh cycle: the candidate search, then
    /// every batch spending its full retry budget on the slower sub-call and
    /// the upsert.
    pub fn expected_refresh_secs(&self) -> u64 {
        let batches = self
            .refresh_limit
            .div_ceil(self.enrichment_batch_size.max(1)) as u64;
        let attempts = u64::from(self.retry_attempts.max(1));
        let per_call = self.http_timeout_secs * attempts + self.retry_max_delay_ms * attempts / 1000;
        self.search_timeout_secs + batches * per_call * 2
    }

    pub fn validate(&self) -> Result<()> {
        let positive = [
            ("hot_set_ttl_secs", self.hot_set_ttl_secs),
            ("lock_ttl_secs", self.lock_ttl_secs),
            ("result_cache_ttl_secs", self.result_cache_ttl_secs),
            ("search_timeout_secs", self.search_timeout_secs),
            ("http_timeout_secs", self.http_timeout_secs),
            ("enrichment_batch_size", self.enrichment_batch_size as u64),
            ("refresh_limit", self.refresh_limit as u64),
            ("candidate_multiplier", self.candidate_multiplier as u64),
            ("redis_pool_size", self.redis_pool_size as u64),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(RankingError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        let expected = self.expected_refresh_secs();
        if self.lock_ttl_secs <= expected {
            return Err(RankingError::Configuration(format!(
                "lock_ttl_secs ({}) must exceed the expected refresh duration ({}s)",
                self.lock_ttl_secs, expected
            )));
        }
        Ok(())
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            redis_pool_size: default_pool_size(),
            search_url: default_search_url(),
            search_username: None,
            search_password: None,
            transactions_alias: default_transactions_alias(),
            search_timeout_secs: default_search_timeout(),
            hot_set_key: default_hot_set_key(),
            cache_domain: default_cache_domain(),
            hot_set_ttl_secs: default_hot_set_ttl(),
            lock_ttl_secs: default_lock_ttl(),
            enrichment_batch_size: default_enrichment_batch_size(),
            result_cache_ttl_secs: default_result_cache_ttl(),
            candidate_multiplier: default_candidate_multiplier(),
            refresh_cron: default_refresh_cron(),
            refresh_window: default_refresh_window(),
            refresh_limit: default_refresh_limit(),
            token_service_url: default_token_service_url(),
            safety_api_url: default_safety_api_url(),
            token_security_url: None,
            chain: default_chain(),
            min_liquidity_usd: default_min_liquidity(),
            http_timeout_secs: default_http_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay(),
            retry_max_delay_ms: default_retry_max_delay(),
        }
    }
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_pool_size() -> usize {
    16
}

fn default_search_url() -> String {
    "http://localhost:9200".to_string()
}

fn default_transactions_alias() -> String {
    "transactions".to_string()
}

fn default_search_timeout() -> u64 {
    10
}

fn default_hot_set_key() -> String {
    "hot:tokens".to_string()
}

fn default_cache_domain() -> String {
    "tokens".to_string()
}

fn default_hot_set_ttl() -> u64 {
    900 // 15 minutes
}

fn default_lock_ttl() -> u64 {
    900
}

fn default_enrichment_batch_size() -> usize {
    30
}

fn default_result_cache_ttl() -> u64 {
    15
}

fn default_candidate_multiplier() -> usize {
    3
}

fn default_refresh_cron() -> String {
    "0 */2 * * * *".to_string()
}

fn default_refresh_window() -> String {
    "1h".to_string()
}

fn default_refresh_limit() -> usize {
    200
}

fn default_token_service_url() -> String {
    "http://localhost:8000/api".to_string()
}

fn default_safety_api_url() -> String {
    "https://api.dexscreener.com".to_string()
}

fn default_chain() -> String {
    "solana".to_string()
}

fn default_min_liquidity() -> f64 {
    5_000.0
}

fn default_http_timeout() -> u64 {
    10
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    200
}

fn default_retry_max_delay() -> u64 {
    5_000
}
