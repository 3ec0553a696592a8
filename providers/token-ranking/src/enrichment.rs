//! Enrichment sources for the hot-token refresh
//!
//! - [`TokenRepository`]: the token service (system of record) holding token
//!   metadata; enriched tokens are written back through it
//! - [`SafetyChecker`]: DEX pair lookup used as the liquidity check, plus
//!   honeypot and mint authority verdicts from a token security API

use crate::model::{EnrichedToken, SafetyReport, TokenMetadata};
use crate::{RankingError, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Metadata for the given addresses; unknown addresses are omitted
    async fn fetch_metadata(&self, addresses: &[String]) -> Result<Vec<TokenMetadata>>;

    async fn upsert(&self, tokens: &[EnrichedToken]) -> Result<()>;
}

#[async_trait]
pub trait SafetyChecker: Send + Sync {
    /// One report per address that has a trading pair or a security verdict
    async fn check(&self, addresses: &[String]) -> Result<Vec<SafetyReport>>;
}

fn http_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| RankingError::Configuration(format!("Failed to create HTTP client: {}", e)))
}

async fn ensure_success(service: &'static str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RankingError::UpstreamStatus {
        service,
        status: status.as_u16(),
        body,
    })
}

#[derive(Debug, Serialize)]
struct LookupRequest<'a> {
    addresses: &'a [String],
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    tokens: Vec<TokenMetadata>,
}

#[derive(Debug, Serialize)]
struct UpsertRequest<'a> {
    tokens: &'a [EnrichedToken],
}

/// Token service REST client
pub struct HttpTokenRepository {
    client: Client,
    base_url: String,
}

impl HttpTokenRepository {
    const SERVICE: &'static str = "token service";

    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl TokenRepository for HttpTokenRepository {
    async fn fetch_metadata(&self, addresses: &[String]) -> Result<Vec<TokenMetadata>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(format!("{}/tokens/lookup", self.base_url))
            .json(&LookupRequest { addresses })
            .send()
            .await?;
        let body: LookupResponse = ensure_success(Self::SERVICE, response).await?.json().await?;
        debug!(
            "Token service returned {} of {} tokens",
            body.tokens.len(),
            addresses.len()
        );
        Ok(body.tokens)
    }

    async fn upsert(&self, tokens: &[EnrichedToken]) -> Result<()> {
        if tokens.is_empty() {
            return Ok(());
        }
        let response = self
            .client
            .post(format!("{}/tokens/bulk-upsert", self.base_url))
            .json(&UpsertRequest { tokens })
            .send()
            .await?;
        ensure_success(Self::SERVICE, response).await?;
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct DexPair {
    #[serde(rename = "baseToken")]
    base_token: DexBaseToken,
    #[serde(rename = "priceUsd", default)]
    price_usd: Option<String>,
    #[serde(default)]
    liquidity: Option<DexLiquidity>,
}

#[derive(Debug, Deserialize)]
struct DexBaseToken {
    address: String,
}

#[derive(Debug, Deserialize)]
struct DexLiquidity {
    #[serde(default)]
    usd: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SecurityVerdict {
    address: String,
    #[serde(default)]
    honeypot: Option<bool>,
    #[serde(default)]
    mintable: Option<bool>,
}

/// DEX pair API client; liquidity is summed across a token's pairs. When a
/// security API is configured its verdicts are fetched concurrently and merged.
pub struct HttpSafetyChecker {
    client: Client,
    base_url: String,
    security_url: Option<String>,
    chain: String,
    min_liquidity_usd: f64,
}

impl HttpSafetyChecker {
    const SERVICE: &'static str = "safety api";

    pub fn new(
        base_url: impl Into<String>,
        chain: impl Into<String>,
        min_liquidity_usd: f64,
        timeout: Duration,
    ) -> Result<Self> {
        Ok(Self {
            client: http_client(timeout)?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            security_url: None,
            chain: chain.into(),
            min_liquidity_usd,
        })
    }

    pub fn with_security_api(mut self, security_url: Option<String>) -> Self {
        self.security_url = security_url
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        self
    }

    async fn fetch_pairs(&self, addresses: &[String]) -> Result<Vec<DexPair>> {
        let url = format!(
            "{}/tokens/v1/{}/{}",
            self.base_url,
            self.chain,
            addresses.join(",")
        );
        let response = self.client.get(url).send().await?;
        Ok(ensure_success(Self::SERVICE, response).await?.json().await?)
    }

    async fn fetch_verdicts(&self, addresses: &[String]) -> Result<Vec<SecurityVerdict>> {
        let Some(security_url) = &self.security_url else {
            return Ok(Vec::new());
        };
        let url = format!(
            "{}/security/v1/{}/{}",
            security_url,
            self.chain,
            addresses.join(",")
        );
        let response = self.client.get(url).send().await?;
        Ok(ensure_success(Self::SERVICE, response).await?.json().await?)
    }
}

#[async_trait]
impl SafetyChecker for HttpSafetyChecker {
    async fn check(&self, addresses: &[String]) -> Result<Vec<SafetyReport>> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let (pairs, verdicts) =
            tokio::join!(self.fetch_pairs(addresses), self.fetch_verdicts(addresses));
        let pairs = pairs?;
        // Liquidity alone is still a usable report
        let verdicts = verdicts.unwrap_or_else(|e| {
            warn!("Token security lookup failed, reporting liquidity only: {}", e);
            Vec::new()
        });

        let mut reports: BTreeMap<String, SafetyReport> = BTreeMap::new();
        for pair in pairs {
            let report = reports
                .entry(pair.base_token.address.clone())
                .or_insert_with(|| SafetyReport {
                    address: pair.base_token.address.clone(),
                    ..Default::default()
                });
            report.pair_count += 1;
            report.liquidity_usd += pair.liquidity.and_then(|l| l.usd).unwrap_or(0.0);
            if report.price_usd.is_none() {
                report.price_usd = pair.price_usd.and_then(|p| p.parse().ok());
            }
        }
        for verdict in verdicts {
            let report = reports
                .entry(verdict.address.clone())
                .or_insert_with(|| SafetyReport {
                    address: verdict.address.clone(),
                    ..Default::default()
                });
            report.honeypot = verdict.honeypot;
            report.mintable = verdict.mintable;
        }

        Ok(reports
            .into_values()
            .map(|mut report| {
                report.low_liquidity = report.liquidity_usd < self.min_liquidity_usd;
                report
            })
            .collect())
    }
}
