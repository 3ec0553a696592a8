//! Ranking pipeline: query construction, search, decode, post-processing

use crate::config::RankingConfig;
use crate::model::{RankOutcome, RankedToken, TokenFlags};
use crate::query::{RankQuery, SortField};
use crate::ranking_query::build_ranking_query;
use crate::Result;
use cache_common::{ranking_result_key, token_flags_key, CacheStore};
use futures::future::join_all;
use search_common::schema::aggs;
use search_common::{decode_buckets, decode_sibling_value, SearchIndex, SortOrder};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct RankingPipeline {
    search: Arc<dyn SearchIndex>,
    cache: Arc<dyn CacheStore>,
    index: String,
    result_ttl: Duration,
    candidate_multiplier: usize,
}

impl RankingPipeline {
    pub fn new(search: Arc<dyn SearchIndex>, cache: Arc<dyn CacheStore>, index: impl Into<String>) -> Self {
        Self {
            search,
            cache,
            index: index.into(),
            result_ttl: Duration::from_secs(15),
            candidate_multiplier: 3,
        }
    }

    pub fn from_config(
        search: Arc<dyn SearchIndex>,
        cache: Arc<dyn CacheStore>,
        config: &RankingConfig,
    ) -> Self {
        Self::new(search, cache, config.transactions_alias.clone())
            .with_result_ttl(config.result_cache_ttl())
            .with_candidate_multiplier(config.candidate_multiplier)
    }

    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }

    pub fn with_candidate_multiplier(mut self, multiplier: usize) -> Self {
        self.candidate_multiplier = multiplier.max(1);
        self
    }

    /// Rank tokens for `query`. A search failure yields an error, never a
    /// partial list.
    pub async fn rank(&self, query: &RankQuery) -> Result<RankOutcome> {
        let document = build_ranking_query(query, self.candidate_multiplier)?.build();
        let response = self.search.search(&self.index, &document).await?;

        let decoded = decode_buckets(&response.aggregations, aggs::TOKENS)?;
        if decoded.is_empty() && decoded.rejected == 0 {
            debug!("No tokens matched window {}", query.window());
            return Ok(RankOutcome::Empty);
        }

        let total_volume_usd = match decode_sibling_value(&response.aggregations, aggs::TOTAL_VOLUME)
        {
            Ok(total) => total,
            Err(e) => {
                warn!("Total volume unavailable: {}", e);
                0.0
            }
        };

        let bucket_count = decoded.buckets.len();
        let mut tokens = Vec::with_capacity(bucket_count);
        for bucket in decoded.buckets {
            let address = bucket.token_address.clone();
            let Some(token) = RankedToken::from_bucket(bucket, query.window().label()) else {
                debug!("Skipping {}: no latest transaction in window", address);
                continue;
            };
            if query.exclude_completed() && token.is_completed {
                continue;
            }
            tokens.push(token);
        }

        self.apply_flag_fallback(&mut tokens).await;
        sort_tokens(&mut tokens, query.sort_field(), query.direction());
        tokens.truncate(query.limit());

        info!(
            "Ranked {} tokens for window {} ({} buckets, {} rejected)",
            tokens.len(),
            query.window(),
            bucket_count,
            decoded.rejected
        );
        Ok(RankOutcome::Ranked {
            tokens,
            total_volume_usd,
        })
    }

    /// [`rank`](Self::rank) behind the `ranking:result:<key>` cache. Cache
    /// failures fall back to an uncached ranking.
    pub async fn rank_cached(&self, query: &RankQuery) -> Result<RankOutcome> {
        let key = ranking_result_key(&query.cache_key()?);

        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<RankOutcome>(&raw) {
                Ok(outcome) => {
                    debug!("Ranking cache hit {}", key);
                    return Ok(outcome);
                }
                Err(e) => warn!("Discarding unreadable cached ranking {}: {}", key, e),
            },
            Ok(None) => debug!("Ranking cache miss {}", key),
            Err(e) => warn!("Ranking cache read failed for {}: {}", key, e),
        }

        let outcome = self.rank(query).await?;

        match serde_json::to_string(&outcome) {
            Ok(raw) => {
                if let Err(e) = self
                    .cache
                    .set_ex(&key, &raw, self.result_ttl.as_secs().max(1))
                    .await
                {
                    warn!("Failed to cache ranking {}: {}", key, e);
                }
            }
            Err(e) => warn!("Failed to serialize ranking {}: {}", key, e),
        }

        Ok(outcome)
    }

    /// Ranked token addresses, used to select the hot set
    pub async fn candidates(&self, query: &RankQuery) -> Result<Vec<String>> {
        Ok(self.rank(query).await?.addresses())
    }

    /// Fill holder counts the index does not know from `token:flags:<address>`
    async fn apply_flag_fallback(&self, tokens: &mut [RankedToken]) {
        let lookups = tokens
            .iter()
            .enumerate()
            .filter(|(_, token)| token.holders == 0)
            .map(|(slot, token)| async move { (slot, self.read_flags(&token.address).await) });
        let found: Vec<(usize, Option<TokenFlags>)> = join_all(lookups).await;

        for (slot, flags) in found {
            let Some(flags) = flags else { continue };
            let token = &mut tokens[slot];
            if let Some(holders) = flags.holder_count {
                token.holders = holders;
            }
            token.flags = Some(flags);
        }
    }

    async fn read_flags(&self, address: &str) -> Option<TokenFlags> {
        let key = token_flags_key(address);
        match self.cache.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str(&raw) {
                Ok(flags) => Some(flags),
                Err(e) => {
                    warn!("Ignoring malformed flags {}: {}", key, e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("Flag lookup failed for {}: {}", key, e);
                None
            }
        }
    }
}

fn sort_value(token: &RankedToken, field: SortField) -> f64 {
    match field {
        SortField::Volume => token.stats.volume_usd,
        SortField::Swaps => token.stats.swaps as f64,
        SortField::Buys => token.stats.buys as f64,
        SortField::Sells => token.stats.sells as f64,
        SortField::Traders => token.stats.traders as f64,
        SortField::MarketCap => token.market_cap,
        SortField::Holders => token.holders as f64,
        SortField::Price => token.price_usd,
        SortField::BuyRatio => token.buy_ratio.unwrap_or(0.0),
        SortField::LastTradeAt => token.last_trade_at.unwrap_or(0) as f64,
    }
}

/// Stable sort; equal values keep bucket order
fn sort_tokens(tokens: &mut [RankedToken], field: SortField, direction: SortOrder) {
    tokens.sort_by(|a, b| {
        let ordering = sort_value(a, field).total_cmp(&sort_value(b, field));
        match direction {
            SortOrder::Asc => ordering,
            SortOrder::Desc => ordering.reverse(),
        }
    });
}
