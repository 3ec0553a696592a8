use cache_common::MemoryCacheStore;
use search_common::{ElasticsearchClient, SearchClientConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use token_ranking_provider::{RankOutcome, RankQuery, RankingPipeline, SortField};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn pipeline_for(server: &MockServer, cache: &MemoryCacheStore) -> RankingPipeline {
    let search = ElasticsearchClient::new(
        SearchClientConfig::new(server.uri()).with_timeout(Duration::from_secs(5)),
    )
    .expect("client");
    RankingPipeline::new(Arc::new(search), Arc::new(cache.clone()), "transactions")
}

fn token_bucket(address: &str, volume: f64, swaps: u64, price: f64) -> serde_json::Value {
    json!({
        "key": address,
        "doc_count": swaps,
        "window_5m": { "doc_count": 0 },
        "window_1h": {
            "doc_count": swaps,
            "volume": { "value": volume },
            "traders": { "value": 3 },
            "buys": { "doc_count": swaps, "volume": { "value": volume } },
            "sells": { "doc_count": 0 }
        },
        "mcap_5m": {
            "doc_count": 1,
            "snapshot": { "hits": { "hits": [{ "_source": { "market_cap": 1000.0 } }] } }
        },
        "holders": { "value": 40 },
        "buy_ratio": { "value": 1.0 },
        "latest_transaction": {
            "hits": { "hits": [{ "_source": {
                "timestamp": "2024-05-01T12:00:00Z",
                "price_usd": price,
                "market_cap": 1500.0,
                "platform": "pump",
                "name": address,
                "symbol": address
            } }] }
        }
    })
}

#[tokio::test]
async fn test_rank_against_search_engine() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transactions/_search"))
        .and(body_partial_json(json!({
            "size": 0,
            "aggs": { "tokens": { "terms": { "field": "token_address", "size": 6 } } }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "took": 12,
            "timed_out": false,
            "aggregations": {
                "tokens": { "buckets": [
                    token_bucket("T1", 900.0, 9, 0.01),
                    token_bucket("T2", 400.0, 4, 0.02)
                ] },
                "total_volume": { "value": 1300.0 }
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let cache = MemoryCacheStore::new();
    let query = RankQuery::builder("1h", 2)
        .sort_by(SortField::Price, search_common::SortOrder::Desc)
        .build()
        .unwrap();

    let outcome = pipeline_for(&server, &cache).rank(&query).await.unwrap();

    let RankOutcome::Ranked {
        tokens,
        total_volume_usd,
    } = outcome
    else {
        panic!("expected a ranking");
    };
    assert_eq!(total_volume_usd, 1300.0);
    assert_eq!(tokens.len(), 2);
    assert_eq!(tokens[0].address, "T2");
    assert_eq!(tokens[1].address, "T1");

    let t1 = &tokens[1];
    assert_eq!(t1.stats.volume_usd, 900.0);
    assert_eq!(t1.stats.buys, 9);
    assert_eq!(t1.holders, 40);
    assert_eq!(t1.windows["5m"].swaps, 0);
    assert_eq!(t1.market_cap_change_pct["5m"], 50.0);
    assert_eq!(t1.platform.as_deref(), Some("pump"));
}

#[tokio::test]
async fn test_rank_surfaces_search_failures() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/transactions/_search"))
        .respond_with(ResponseTemplate::new(500).set_body_string("shard failure"))
        .mount(&server)
        .await;

    let cache = MemoryCacheStore::new();
    let result = pipeline_for(&server, &cache)
        .rank_cached(&RankQuery::new("1h", 10).unwrap())
        .await;

    assert!(result.is_err());
    assert!(result.unwrap_err().is_retryable());
}
