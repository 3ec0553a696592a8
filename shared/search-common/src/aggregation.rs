//! Aggregation result decoder
//!
//! Maps the nested JSON returned for the `tokens` terms aggregation into typed
//! [`AggregationBucket`]s. Decoding failures are isolated per bucket: a
//! malformed bucket is logged and counted in [`DecodedBuckets::rejected`],
//! its siblings are still returned.

use crate::error::SearchError;
use crate::schema::{aggs, fields};
use crate::Result;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Swap statistics for one time window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowStats {
    pub swaps: u64,
    pub buys: u64,
    pub sells: u64,
    pub volume_usd: f64,
    pub buy_volume_usd: f64,
    pub sell_volume_usd: f64,
    pub traders: u64,
}

/// Fields of the most recent transaction of a token
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LatestTransaction {
    pub timestamp: Option<i64>,
    pub price_usd: f64,
    pub market_cap: f64,
    pub platform: Option<String>,
    pub is_completed: bool,
    pub holder_count: u64,
    pub top_holder_pcts: Vec<f64>,
    pub name: Option<String>,
    pub symbol: Option<String>,
    /// Free-form token metadata decoded from the document's JSON string
    pub metadata: Option<Map<String, Value>>,
}

/// One decoded token bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregationBucket {
    pub token_address: String,
    pub doc_count: u64,
    /// Keyed by window label (`1h`, `24h`, ...)
    pub windows: BTreeMap<String, WindowStats>,
    /// Market cap at each lookback horizon, keyed by horizon label
    pub market_caps: BTreeMap<String, f64>,
    pub holders: u64,
    pub buy_ratio: Option<f64>,
    /// `None` when the latest-transaction projection matched no document.
    /// Such buckets are not actionable.
    pub latest: Option<LatestTransaction>,
}

impl AggregationBucket {
    pub fn is_actionable(&self) -> bool {
        self.latest.is_some()
    }

    pub fn window(&self, label: &str) -> WindowStats {
        self.windows.get(label).cloned().unwrap_or_default()
    }

    /// Holder count from the bucket, preferring the indexed document value
    pub fn holder_count(&self) -> u64 {
        match &self.latest {
            Some(latest) if latest.holder_count > 0 => latest.holder_count,
            _ => self.holders,
        }
    }
}

/// Decoding result for a bucket list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedBuckets {
    pub buckets: Vec<AggregationBucket>,
    pub rejected: usize,
}

impl DecodedBuckets {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

/// Decode the bucket list of the multi-bucket aggregation `name` found in the
/// response's `aggregations` object.
pub fn decode_buckets(aggregations: &Value, name: &str) -> Result<DecodedBuckets> {
    let aggregation = aggregations
        .get(name)
        .ok_or_else(|| SearchError::MissingAggregation(name.to_string()))?;

    let raw_buckets = aggregation
        .get("buckets")
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::Decode(format!("'{}' has no bucket list", name)))?;

    let mut decoded = DecodedBuckets::default();
    for raw in raw_buckets {
        match decode_bucket(raw) {
            Ok(bucket) => decoded.buckets.push(bucket),
            Err(e) => {
                let key = raw.get("key").map(Value::to_string).unwrap_or_default();
                warn!("Skipping bucket {} in '{}': {}", key, name, e);
                decoded.rejected += 1;
            }
        }
    }

    debug!(
        "Decoded {} buckets from '{}' ({} rejected)",
        decoded.buckets.len(),
        name,
        decoded.rejected
    );
    Ok(decoded)
}

/// Decode a root level single-value pipeline aggregation such as `sum_bucket`
pub fn decode_sibling_value(aggregations: &Value, name: &str) -> Result<f64> {
    let aggregation = aggregations
        .get(name)
        .ok_or_else(|| SearchError::MissingAggregation(name.to_string()))?;
    metric_value(aggregation, name)
}

/// Decode a single token bucket
pub fn decode_bucket(raw: &Value) -> Result<AggregationBucket> {
    let object = raw
        .as_object()
        .ok_or_else(|| SearchError::Decode("bucket is not an object".to_string()))?;

    let token_address = match object.get("key") {
        Some(Value::String(key)) => key.clone(),
        Some(Value::Number(key)) => key.to_string(),
        _ => return Err(SearchError::Decode("bucket has no key".to_string())),
    };
    let doc_count = doc_count(raw)?;

    let mut bucket = AggregationBucket {
        token_address,
        doc_count,
        ..Default::default()
    };

    for (name, sub) in object {
        if let Some(label) = name.strip_prefix(aggs::WINDOW_PREFIX) {
            bucket.windows.insert(label.to_string(), decode_window(sub)?);
        } else if let Some(label) = name.strip_prefix(aggs::MCAP_PREFIX) {
            bucket
                .market_caps
                .insert(label.to_string(), decode_snapshot(sub)?);
        }
    }

    if let Some(holders) = object.get(aggs::HOLDERS) {
        bucket.holders = metric_value(holders, aggs::HOLDERS)? as u64;
    }
    if let Some(ratio) = object.get(aggs::BUY_RATIO) {
        bucket.buy_ratio = optional_metric_value(ratio, aggs::BUY_RATIO)?;
    }
    if let Some(latest) = object.get(aggs::LATEST_TRANSACTION) {
        bucket.latest = decode_latest(latest)?;
    }

    Ok(bucket)
}

fn decode_window(raw: &Value) -> Result<WindowStats> {
    let swaps = doc_count(raw)?;
    if swaps == 0 {
        return Ok(WindowStats::default());
    }

    let mut stats = WindowStats {
        swaps,
        ..Default::default()
    };
    if let Some(volume) = raw.get(aggs::VOLUME) {
        stats.volume_usd = metric_value(volume, aggs::VOLUME)?;
    }
    if let Some(traders) = raw.get(aggs::TRADERS) {
        stats.traders = metric_value(traders, aggs::TRADERS)? as u64;
    }
    if let Some(buys) = raw.get(aggs::BUYS) {
        stats.buys = doc_count(buys)?;
        if let Some(volume) = buys.get(aggs::VOLUME) {
            stats.buy_volume_usd = metric_value(volume, aggs::BUY_VOLUME)?;
        }
    }
    if let Some(sells) = raw.get(aggs::SELLS) {
        stats.sells = doc_count(sells)?;
        if let Some(volume) = sells.get(aggs::VOLUME) {
            stats.sell_volume_usd = metric_value(volume, aggs::SELL_VOLUME)?;
        }
    }
    Ok(stats)
}

/// Market cap carried by the first hit of a snapshot filter, zero when the
/// horizon has no documents
fn decode_snapshot(raw: &Value) -> Result<f64> {
    if doc_count(raw)? == 0 {
        return Ok(0.0);
    }
    let Some(snapshot) = raw.get(aggs::SNAPSHOT) else {
        return Ok(0.0);
    };
    Ok(first_hit_source(snapshot)?
        .and_then(|source| source.get(fields::MARKET_CAP))
        .and_then(Value::as_f64)
        .unwrap_or(0.0))
}

#[derive(Debug, Deserialize)]
struct LatestSource {
    #[serde(default)]
    timestamp: Option<Value>,
    #[serde(default)]
    price_usd: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    is_completed: Option<bool>,
    #[serde(default)]
    holder_count: Option<u64>,
    #[serde(default)]
    top_holder_pcts: Option<Vec<f64>>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    metadata: Option<Value>,
}

fn decode_latest(raw: &Value) -> Result<Option<LatestTransaction>> {
    let Some(source) = first_hit_source(raw)? else {
        return Ok(None);
    };

    let source: LatestSource = serde_json::from_value(source.clone())
        .map_err(|e| SearchError::Decode(format!("latest transaction: {}", e)))?;

    Ok(Some(LatestTransaction {
        timestamp: source.timestamp.as_ref().map(parse_timestamp).transpose()?,
        price_usd: source.price_usd.unwrap_or(0.0),
        market_cap: source.market_cap.unwrap_or(0.0),
        platform: source.platform,
        is_completed: source.is_completed.unwrap_or(false),
        holder_count: source.holder_count.unwrap_or(0),
        top_holder_pcts: source.top_holder_pcts.unwrap_or_default(),
        name: source.name,
        symbol: source.symbol,
        metadata: source.metadata.map(parse_metadata).transpose()?.flatten(),
    }))
}

/// Metadata is stored as a JSON string; objects are accepted as-is
fn parse_metadata(raw: Value) -> Result<Option<Map<String, Value>>> {
    match raw {
        Value::Null => Ok(None),
        Value::Object(map) => Ok(Some(map)),
        Value::String(text) if text.trim().is_empty() => Ok(None),
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => Ok(Some(map)),
            Ok(other) => Err(SearchError::Decode(format!(
                "metadata is not an object: {}",
                other
            ))),
            Err(e) => Err(SearchError::Decode(format!("metadata: {}", e))),
        },
        other => Err(SearchError::Decode(format!(
            "unexpected metadata type: {}",
            other
        ))),
    }
}

fn parse_timestamp(raw: &Value) -> Result<i64> {
    match raw {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| SearchError::Decode(format!("invalid timestamp {}", n))),
        Value::String(s) => {
            if let Ok(secs) = s.parse::<i64>() {
                return Ok(secs);
            }
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.timestamp())
                .map_err(|e| SearchError::Decode(format!("invalid timestamp '{}': {}", s, e)))
        }
        other => Err(SearchError::Decode(format!("invalid timestamp {}", other))),
    }
}

/// `_source` of the first hit of a top-hits aggregation, `None` for no hits
fn first_hit_source(top_hits: &Value) -> Result<Option<&Value>> {
    let hits = top_hits
        .get("hits")
        .and_then(|h| h.get("hits"))
        .and_then(Value::as_array)
        .ok_or_else(|| SearchError::Decode("top_hits without hit list".to_string()))?;

    match hits.first() {
        None => Ok(None),
        Some(hit) => hit
            .get("_source")
            .map(Some)
            .ok_or_else(|| SearchError::Decode("hit without _source".to_string())),
    }
}

fn doc_count(raw: &Value) -> Result<u64> {
    raw.get("doc_count")
        .and_then(Value::as_u64)
        .ok_or_else(|| SearchError::Decode("missing doc_count".to_string()))
}

fn metric_value(raw: &Value, name: &str) -> Result<f64> {
    Ok(optional_metric_value(raw, name)?.unwrap_or(0.0))
}

/// `{"value": x}` metric; a `null` value (empty bucket) decodes to `None`
fn optional_metric_value(raw: &Value, name: &str) -> Result<Option<f64>> {
    match raw.get("value") {
        Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_f64()),
        Some(other) => Err(SearchError::Decode(format!(
            "metric '{}' has non-numeric value {}",
            name, other
        ))),
        None => Err(SearchError::Decode(format!("metric '{}' has no value", name))),
    }
}
