//! Transaction index schema
//!
//! Field names of the swap transaction documents, aggregation names shared by
//! the ranking query and the bucket decoder, and the fixed index mapping used
//! when a new index generation is created.

use serde_json::{json, Value};

/// Document fields
pub mod fields {
    pub const TOKEN_ADDRESS: &str = "token_address";
    pub const TX_HASH: &str = "tx_hash";
    pub const LOG_INDEX: &str = "log_index";
    pub const TIMESTAMP: &str = "timestamp";
    pub const SIDE: &str = "side";
    pub const AMOUNT_USD: &str = "amount_usd";
    pub const WALLET: &str = "wallet_address";
    pub const PRICE_USD: &str = "price_usd";
    pub const MARKET_CAP: &str = "market_cap";
    pub const PLATFORM: &str = "platform";
    pub const IS_COMPLETED: &str = "is_completed";
    pub const HOLDER_COUNT: &str = "holder_count";
    pub const TOP_HOLDER_PCTS: &str = "top_holder_pcts";
    pub const NAME: &str = "name";
    pub const SYMBOL: &str = "symbol";
    pub const METADATA: &str = "metadata";
}

/// Aggregation names
pub mod aggs {
    pub const TOKENS: &str = "tokens";
    pub const LATEST_TRANSACTION: &str = "latest_transaction";
    pub const HOLDERS: &str = "holders";
    pub const SWAPS: &str = "swaps";
    pub const BUYS: &str = "buys";
    pub const SELLS: &str = "sells";
    pub const VOLUME: &str = "volume";
    pub const BUY_VOLUME: &str = "buy_volume";
    pub const SELL_VOLUME: &str = "sell_volume";
    pub const TRADERS: &str = "traders";
    pub const SNAPSHOT: &str = "snapshot";
    pub const BUY_RATIO: &str = "buy_ratio";
    pub const ACTIVE_IN_WINDOW: &str = "active_in_window";
    pub const TOTAL_VOLUME: &str = "total_volume";

    /// Prefix of per-window filter aggregations (`window_1h`)
    pub const WINDOW_PREFIX: &str = "window_";
    /// Prefix of market-cap snapshot aggregations (`mcap_5m`)
    pub const MCAP_PREFIX: &str = "mcap_";

    pub fn window(label: &str) -> String {
        format!("{}{}", WINDOW_PREFIX, label)
    }

    pub fn market_cap(label: &str) -> String {
        format!("{}{}", MCAP_PREFIX, label)
    }
}

/// Swap side values stored in [`fields::SIDE`]
pub const SIDE_BUY: &str = "buy";
pub const SIDE_SELL: &str = "sell";

/// Fields projected by the latest-transaction top hit
pub const LATEST_PROJECTION: &[&str] = &[
    fields::TOKEN_ADDRESS,
    fields::TIMESTAMP,
    fields::PRICE_USD,
    fields::MARKET_CAP,
    fields::PLATFORM,
    fields::IS_COMPLETED,
    fields::HOLDER_COUNT,
    fields::TOP_HOLDER_PCTS,
    fields::NAME,
    fields::SYMBOL,
    fields::METADATA,
];

/// Index settings and mappings for every transaction index generation
pub fn transaction_index_schema() -> Value {
    json!({
        "settings": {
            "number_of_shards": 3,
            "number_of_replicas": 1,
            "refresh_interval": "5s"
        },
        "mappings": {
            "dynamic": "strict",
            "properties": {
                (fields::TOKEN_ADDRESS): { "type": "keyword" },
                (fields::TX_HASH): { "type": "keyword" },
                (fields::LOG_INDEX): { "type": "integer" },
                (fields::TIMESTAMP): { "type": "date", "format": "epoch_second||strict_date_optional_time" },
                (fields::SIDE): { "type": "keyword" },
                (fields::AMOUNT_USD): { "type": "double" },
                (fields::WALLET): { "type": "keyword" },
                (fields::PRICE_USD): { "type": "double" },
                (fields::MARKET_CAP): { "type": "double" },
                (fields::PLATFORM): { "type": "keyword" },
                (fields::IS_COMPLETED): { "type": "boolean" },
                (fields::HOLDER_COUNT): { "type": "long" },
                (fields::TOP_HOLDER_PCTS): { "type": "double" },
                (fields::NAME): { "type": "keyword" },
                (fields::SYMBOL): { "type": "keyword" },
                (fields::METADATA): { "type": "keyword", "index": false, "doc_values": false }
            }
        }
    })
}

/// Painless script assigning the deterministic document id during reindex,
/// so repeated copies hit `create` conflicts instead of duplicating.
pub const DEFAULT_ID_SCRIPT: &str =
    "ctx._id = ctx._source.tx_hash + ':' + String.valueOf(ctx._source.log_index)";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_maps_every_projected_field() {
        let schema = transaction_index_schema();
        let properties = &schema["mappings"]["properties"];
        for field in LATEST_PROJECTION {
            assert!(
                properties.get(*field).is_some(),
                "{} missing from mapping",
                field
            );
        }
    }

    #[test]
    fn prefixed_names() {
        assert_eq!(aggs::window("1h"), "window_1h");
        assert_eq!(aggs::market_cap("5m"), "mcap_5m");
    }
}
