//! Ranking query construction
//!
//! Maps a [`RankQuery`] onto builder calls. The bucket layout produced here is
//! the one `search_common::aggregation` decodes:
//!
//! ```text
//! tokens (terms on token_address, ordered by the sort metric)
//! ├── window_<label>    filter: timestamp >= now-<label>
//! │   ├── volume        sum(amount_usd)
//! │   ├── traders       cardinality(wallet_address)
//! │   ├── buys          filter side=buy  -> volume
//! │   └── sells         filter side=sell -> volume
//! ├── mcap_<label>      filter: timestamp <= now-<label> -> snapshot top hit
//! ├── holders           cardinality(wallet_address)
//! ├── latest_transaction  top hit, newest first
//! ├── active_in_window  bucket_selector: swaps in ranking window > 0
//! └── buy_ratio         bucket_script: buys / swaps
//! total_volume          sum_bucket over tokens>window_<label>>volume
//! ```

use crate::query::{RankQuery, SortField, TimeWindow};
use crate::Result;
use search_common::schema::{aggs, fields, LATEST_PROJECTION, SIDE_BUY, SIDE_SELL};
use search_common::{Aggregation, Clause, QueryBuilder, RangeBounds, SortOrder};

/// Statistics windows reported alongside the ranking window
pub const STAT_WINDOWS: &[&str] = &["5m", "1h", "6h", "24h"];

/// Windows for which statistics are aggregated: every standard window
/// shorter than the ranking window, then the ranking window under its own label
pub fn stat_windows(window: &TimeWindow) -> Vec<TimeWindow> {
    let mut windows: Vec<TimeWindow> = STAT_WINDOWS
        .iter()
        .filter_map(|label| label.parse::<TimeWindow>().ok())
        .filter(|candidate| candidate.seconds() < window.seconds())
        .collect();
    windows.push(window.clone());
    windows
}

/// Horizons with a market-cap snapshot: standard windows strictly inside the
/// ranking window (older snapshots fall outside the root time filter)
pub fn market_cap_horizons(window: &TimeWindow) -> Vec<TimeWindow> {
    STAT_WINDOWS
        .iter()
        .filter_map(|label| label.parse::<TimeWindow>().ok())
        .filter(|candidate| candidate.seconds() < window.seconds())
        .collect()
}

/// Terms ordering used to pick candidate buckets.
///
/// Market cap, price, buy ratio and last trade time come from top hits and
/// bucket scripts, which a terms aggregation cannot order by. For those sorts
/// the candidates are the most active tokens (`_count desc`, whatever the
/// requested direction), and only those candidates are ranked by the metric.
fn candidate_order(field: SortField, window: &str, direction: SortOrder) -> (String, SortOrder) {
    let window_agg = aggs::window(window);
    let path = match field {
        SortField::Volume => format!("{}>{}", window_agg, aggs::VOLUME),
        SortField::Swaps => format!("{}>_count", window_agg),
        SortField::Buys => format!("{}>{}>_count", window_agg, aggs::BUYS),
        SortField::Sells => format!("{}>{}>_count", window_agg, aggs::SELLS),
        SortField::Traders => format!("{}>{}", window_agg, aggs::TRADERS),
        SortField::Holders => aggs::HOLDERS.to_string(),
        SortField::MarketCap
        | SortField::Price
        | SortField::BuyRatio
        | SortField::LastTradeAt => return ("_count".to_string(), SortOrder::Desc),
    };
    (path, direction)
}

fn since(window: &TimeWindow) -> Clause {
    Clause::range(fields::TIMESTAMP, RangeBounds::new().gte(window.start_expr()))
}

fn side_filter(side: &str) -> Aggregation {
    Aggregation::filter(Clause::term(fields::SIDE, side))
}

/// Build the search document for `query`, fetching `limit * candidate_multiplier` buckets
pub fn build_ranking_query(query: &RankQuery, candidate_multiplier: usize) -> Result<QueryBuilder> {
    let window = query.window();
    let ranking_window = aggs::window(window.label());
    let bucket_count = query.limit().saturating_mul(candidate_multiplier.max(1));

    let mut builder = QueryBuilder::new();
    builder.filter(since(window));
    for predicate in query.filters() {
        builder.filter(predicate.to_clause());
    }
    if let Some(platforms) = query.platforms() {
        builder.filter(Clause::terms(fields::PLATFORM, platforms.iter().cloned()));
    }

    // Final ordering is applied after decoding; this only selects candidates
    let (order_metric, order_direction) =
        candidate_order(query.sort_field(), window.label(), query.direction());
    builder.aggregate(
        aggs::TOKENS,
        Aggregation::terms(fields::TOKEN_ADDRESS, bucket_count)
            .ordered_by(order_metric, order_direction),
    )?;

    for stats_window in stat_windows(window) {
        let name = aggs::window(stats_window.label());
        let path = format!("{}>{}", aggs::TOKENS, name);
        builder
            .sub_aggregate(aggs::TOKENS, &name, Aggregation::filter(since(&stats_window)))?
            .sub_aggregate(&path, aggs::VOLUME, Aggregation::sum(fields::AMOUNT_USD))?
            .sub_aggregate(&path, aggs::TRADERS, Aggregation::cardinality(fields::WALLET))?
            .sub_aggregate(&path, aggs::BUYS, side_filter(SIDE_BUY))?
            .sub_aggregate(&path, aggs::SELLS, side_filter(SIDE_SELL))?
            .sub_aggregate(
                &format!("{}>{}", path, aggs::BUYS),
                aggs::VOLUME,
                Aggregation::sum(fields::AMOUNT_USD),
            )?
            .sub_aggregate(
                &format!("{}>{}", path, aggs::SELLS),
                aggs::VOLUME,
                Aggregation::sum(fields::AMOUNT_USD),
            )?;
    }

    for horizon in market_cap_horizons(window) {
        let name = aggs::market_cap(horizon.label());
        builder
            .sub_aggregate(
                aggs::TOKENS,
                &name,
                Aggregation::filter(Clause::range(
                    fields::TIMESTAMP,
                    RangeBounds::new().lte(horizon.start_expr()),
                )),
            )?
            .sub_aggregate(
                &format!("{}>{}", aggs::TOKENS, name),
                aggs::SNAPSHOT,
                Aggregation::top_hits(1)
                    .sorted_by(fields::TIMESTAMP, SortOrder::Desc)
                    .including([fields::MARKET_CAP]),
            )?;
    }

    builder
        .sub_aggregate(
            aggs::TOKENS,
            aggs::HOLDERS,
            Aggregation::cardinality(fields::WALLET),
        )?
        .sub_aggregate(
            aggs::TOKENS,
            aggs::LATEST_TRANSACTION,
            Aggregation::top_hits(1)
                .sorted_by(fields::TIMESTAMP, SortOrder::Desc)
                .including(LATEST_PROJECTION.iter().copied()),
        )?
        .sub_aggregate(
            aggs::TOKENS,
            aggs::ACTIVE_IN_WINDOW,
            Aggregation::bucket_selector(
                [("swaps", format!("{}>_count", ranking_window))],
                "params.swaps > 0",
            ),
        )?
        .sub_aggregate(
            aggs::TOKENS,
            aggs::BUY_RATIO,
            Aggregation::bucket_script(
                [
                    ("buys", format!("{}>{}>_count", ranking_window, aggs::BUYS)),
                    ("swaps", format!("{}>_count", ranking_window)),
                ],
                "params.swaps > 0 ? params.buys / params.swaps : 0",
            ),
        )?
        .aggregate(
            aggs::TOTAL_VOLUME,
            Aggregation::sum_bucket(format!(
                "{}>{}>{}",
                aggs::TOKENS,
                ranking_window,
                aggs::VOLUME
            )),
        )?;

    Ok(builder)
}
