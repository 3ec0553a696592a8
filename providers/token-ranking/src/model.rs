//! Ranked and enriched token records

use search_common::{AggregationBucket, WindowStats};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Per-token flags shared through `token:flags:<address>`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenFlags {
    #[serde(default)]
    pub holder_count: Option<u64>,
    #[serde(default)]
    pub liquidity_usd: Option<f64>,
    #[serde(default)]
    pub low_liquidity: bool,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub honeypot: bool,
    #[serde(default)]
    pub mintable: bool,
}

/// One entry of a ranking
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RankedToken {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
    pub platform: Option<String>,
    pub price_usd: f64,
    pub market_cap: f64,
    pub holders: u64,
    pub is_completed: bool,
    pub last_trade_at: Option<i64>,
    /// Statistics of the ranking window
    pub stats: WindowStats,
    /// Statistics of every aggregated window, keyed by label
    pub windows: BTreeMap<String, WindowStats>,
    /// Market-cap change in percent since each horizon
    pub market_cap_change_pct: BTreeMap<String, f64>,
    pub buy_ratio: Option<f64>,
    pub top_holder_pcts: Vec<f64>,
    pub metadata: Option<Map<String, Value>>,
    pub flags: Option<TokenFlags>,
}

impl RankedToken {
    /// Build from an actionable bucket; `None` when the bucket has no latest transaction
    pub fn from_bucket(bucket: AggregationBucket, window: &str) -> Option<Self> {
        let holders = bucket.holder_count();
        let stats = bucket.window(window);
        let latest = bucket.latest?;

        let market_cap_change_pct = bucket
            .market_caps
            .iter()
            .filter(|(_, past)| **past > 0.0)
            .map(|(label, past)| {
                (
                    label.clone(),
                    (latest.market_cap - past) / past * 100.0,
                )
            })
            .collect();

        Some(Self {
            address: bucket.token_address,
            name: latest.name,
            symbol: latest.symbol,
            platform: latest.platform,
            price_usd: latest.price_usd,
            market_cap: latest.market_cap,
            holders,
            is_completed: latest.is_completed,
            last_trade_at: latest.timestamp,
            stats,
            windows: bucket.windows,
            market_cap_change_pct,
            buy_ratio: bucket.buy_ratio,
            top_holder_pcts: latest.top_holder_pcts,
            metadata: latest.metadata,
            flags: None,
        })
    }
}

/// Result of a ranking request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RankOutcome {
    Ranked {
        tokens: Vec<RankedToken>,
        /// Volume of the ranking window summed over all returned buckets
        total_volume_usd: f64,
    },
    /// The search matched no token; not an error
    Empty,
}

impl RankOutcome {
    pub fn tokens(&self) -> &[RankedToken] {
        match self {
            RankOutcome::Ranked { tokens, .. } => tokens,
            RankOutcome::Empty => &[],
        }
    }

    pub fn addresses(&self) -> Vec<String> {
        self.tokens().iter().map(|t| t.address.clone()).collect()
    }
}

/// Token metadata held by the system of record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenMetadata {
    pub address: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(default)]
    pub decimals: Option<u8>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub holder_count: Option<u64>,
    #[serde(default)]
    pub verified: bool,
}

/// Liquidity and risk check result from the safety API
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafetyReport {
    pub address: String,
    pub liquidity_usd: f64,
    pub pair_count: usize,
    pub price_usd: Option<f64>,
    pub low_liquidity: bool,
    /// `None` when no security verdict was available
    #[serde(default)]
    pub honeypot: Option<bool>,
    #[serde(default)]
    pub mintable: Option<bool>,
}

/// Token with whatever enrichment succeeded
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnrichedToken {
    pub address: String,
    pub metadata: Option<TokenMetadata>,
    pub safety: Option<SafetyReport>,
    pub refreshed_at: i64,
}

impl EnrichedToken {
    pub fn new(address: impl Into<String>, refreshed_at: i64) -> Self {
        Self {
            address: address.into(),
            refreshed_at,
            ..Default::default()
        }
    }

    pub fn is_enriched(&self) -> bool {
        self.metadata.is_some() || self.safety.is_some()
    }

    pub fn flags(&self) -> TokenFlags {
        TokenFlags {
            holder_count: self.metadata.as_ref().and_then(|m| m.holder_count),
            liquidity_usd: self.safety.as_ref().map(|s| s.liquidity_usd),
            low_liquidity: self.safety.as_ref().is_some_and(|s| s.low_liquidity),
            verified: self.metadata.as_ref().is_some_and(|m| m.verified),
            honeypot: self.safety.as_ref().is_some_and(|s| s.honeypot == Some(true)),
            mintable: self.safety.as_ref().is_some_and(|s| s.mintable == Some(true)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use search_common::LatestTransaction;

    #[test]
    fn bucket_without_latest_is_not_ranked() {
        let bucket = AggregationBucket {
            token_address: "T1".to_string(),
            doc_count: 3,
            ..Default::default()
        };
        assert!(RankedToken::from_bucket(bucket, "1h").is_none());
    }

    #[test]
    fn market_cap_change_skips_empty_horizons() {
        let mut bucket = AggregationBucket {
            token_address: "T1".to_string(),
            doc_count: 3,
            latest: Some(LatestTransaction {
                market_cap: 150.0,
                ..Default::default()
            }),
            ..Default::default()
        };
        bucket.market_caps.insert("5m".to_string(), 100.0);
        bucket.market_caps.insert("1h".to_string(), 0.0);

        let token = RankedToken::from_bucket(bucket, "1h").unwrap();
        assert_eq!(token.market_cap_change_pct.get("5m"), Some(&50.0));
        assert!(token.market_cap_change_pct.get("1h").is_none());
    }
}
