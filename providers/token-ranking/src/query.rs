//! Rank query model

use crate::{RankingError, Result};
use search_common::{Clause, RangeBounds, SortOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Lookback window such as `5m`, `1h`, `24h` or `7d`
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeWindow {
    label: String,
    seconds: u64,
}

impl TimeWindow {
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn seconds(&self) -> u64 {
        self.seconds
    }

    /// Date-math expression for the window start (`now-1h`)
    pub fn start_expr(&self) -> String {
        format!("now-{}", self.label)
    }
}

impl FromStr for TimeWindow {
    type Err = RankingError;

    fn from_str(raw: &str) -> Result<Self> {
        let label = raw.trim();
        let invalid = || RankingError::InvalidQuery(format!("invalid time window '{}'", raw));

        let split = label.len().checked_sub(1).ok_or_else(invalid)?;
        if !label.is_char_boundary(split) {
            return Err(invalid());
        }
        let (amount, unit) = label.split_at(split);
        if amount.is_empty() || !amount.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let amount: u64 = amount.parse().map_err(|_| invalid())?;
        let unit_secs = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            _ => return Err(invalid()),
        };
        if amount == 0 {
            return Err(invalid());
        }

        Ok(Self {
            label: label.to_string(),
            seconds: amount.checked_mul(unit_secs).ok_or_else(invalid)?,
        })
    }
}

impl TryFrom<String> for TimeWindow {
    type Error = RankingError;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<TimeWindow> for String {
    fn from(window: TimeWindow) -> Self {
        window.label
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

/// Filter applied to the transaction documents before aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FilterPredicate {
    Term {
        field: String,
        value: Value,
    },
    Terms {
        field: String,
        values: Vec<Value>,
    },
    Range {
        field: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        gte: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        lte: Option<f64>,
    },
}

impl FilterPredicate {
    pub fn to_clause(&self) -> Clause {
        match self {
            FilterPredicate::Term { field, value } => Clause::term(field.as_str(), value.clone()),
            FilterPredicate::Terms { field, values } => {
                Clause::terms(field.as_str(), values.iter().cloned())
            }
            FilterPredicate::Range { field, gte, lte } => {
                let mut bounds = RangeBounds::new();
                if let Some(gte) = gte {
                    bounds = bounds.gte(*gte);
                }
                if let Some(lte) = lte {
                    bounds = bounds.lte(*lte);
                }
                Clause::range(field.as_str(), bounds)
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            FilterPredicate::Terms { field, values } if values.is_empty() => Err(
                RankingError::InvalidQuery(format!("terms filter on '{}' has no values", field)),
            ),
            FilterPredicate::Range {
                field,
                gte: None,
                lte: None,
            } => Err(RankingError::InvalidQuery(format!(
                "range filter on '{}' has no bounds",
                field
            ))),
            _ => Ok(()),
        }
    }
}

/// Metric a ranking is sorted by
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Volume,
    Swaps,
    Buys,
    Sells,
    Traders,
    MarketCap,
    Holders,
    Price,
    BuyRatio,
    LastTradeAt,
}

/// Immutable ranking request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawRankQuery")]
pub struct RankQuery {
    window: TimeWindow,
    limit: usize,
    filters: Vec<FilterPredicate>,
    platforms: Option<Vec<String>>,
    exclude_completed: bool,
    sort_field: SortField,
    direction: SortOrder,
}

impl RankQuery {
    pub fn new(window: &str, limit: usize) -> Result<Self> {
        RankQueryBuilder::new(window, limit).build()
    }

    pub fn builder(window: &str, limit: usize) -> RankQueryBuilder {
        RankQueryBuilder::new(window, limit)
    }

    pub fn window(&self) -> &TimeWindow {
        &self.window
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn filters(&self) -> &[FilterPredicate] {
        &self.filters
    }

    pub fn platforms(&self) -> Option<&[String]> {
        self.platforms.as_deref()
    }

    pub fn exclude_completed(&self) -> bool {
        self.exclude_completed
    }

    pub fn sort_field(&self) -> SortField {
        self.sort_field
    }

    pub fn direction(&self) -> SortOrder {
        self.direction
    }

    /// Stable hash of the canonical JSON form
    pub fn cache_key(&self) -> Result<String> {
        let canonical = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&canonical)))
    }
}

/// Wire form of a [`RankQuery`]; decoding goes through the builder
#[derive(Debug, Deserialize)]
struct RawRankQuery {
    window: String,
    limit: usize,
    #[serde(default)]
    filters: Vec<FilterPredicate>,
    #[serde(default)]
    platforms: Option<Vec<String>>,
    #[serde(default)]
    exclude_completed: bool,
    #[serde(default = "default_sort_field")]
    sort_field: SortField,
    #[serde(default = "default_direction")]
    direction: SortOrder,
}

fn default_sort_field() -> SortField {
    SortField::Volume
}

fn default_direction() -> SortOrder {
    SortOrder::Desc
}

impl TryFrom<RawRankQuery> for RankQuery {
    type Error = RankingError;

    fn try_from(raw: RawRankQuery) -> Result<Self> {
        let mut builder = RankQueryBuilder::new(&raw.window, raw.limit)
            .exclude_completed(raw.exclude_completed)
            .sort_by(raw.sort_field, raw.direction);
        builder.filters = raw.filters;
        builder.platforms = raw.platforms;
        builder.build()
    }
}

/// Validating builder for [`RankQuery`]
#[derive(Debug, Clone)]
pub struct RankQueryBuilder {
    window: String,
    limit: usize,
    filters: Vec<FilterPredicate>,
    platforms: Option<Vec<String>>,
    exclude_completed: bool,
    sort_field: SortField,
    direction: SortOrder,
}

impl RankQueryBuilder {
    pub fn new(window: &str, limit: usize) -> Self {
        Self {
            window: window.to_string(),
            limit,
            filters: Vec::new(),
            platforms: None,
            exclude_completed: false,
            sort_field: SortField::Volume,
            direction: SortOrder::Desc,
        }
    }

    pub fn filter(mut self, predicate: FilterPredicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = Some(platforms.into_iter().map(Into::into).collect());
        self
    }

    pub fn exclude_completed(mut self, exclude: bool) -> Self {
        self.exclude_completed = exclude;
        self
    }

    pub fn sort_by(mut self, field: SortField, direction: SortOrder) -> Self {
        self.sort_field = field;
        self.direction = direction;
        self
    }

    pub fn build(self) -> Result<RankQuery> {
        if self.limit == 0 {
            return Err(RankingError::InvalidQuery(
                "limit must be greater than zero".to_string(),
            ));
        }
        let window: TimeWindow = self.window.parse()?;
        for filter in &self.filters {
            filter.validate()?;
        }

        // Platform order does not change the result set
        let platforms = self.platforms.map(|mut platforms| {
            platforms.sort();
            platforms.dedup();
            platforms
        });
        if matches!(&platforms, Some(p) if p.is_empty()) {
            return Err(RankingError::InvalidQuery(
                "platform allow-list is empty".to_string(),
            ));
        }

        Ok(RankQuery {
            window,
            limit: self.limit,
            filters: self.filters,
            platforms,
            exclude_completed: self.exclude_completed,
            sort_field: self.sort_field,
            direction: self.direction,
        })
    }
}
