use serde_json::json;
use std::time::Duration;
use token_ranking_provider::{
    EnrichedToken, HttpSafetyChecker, HttpTokenRepository, RankingError, SafetyChecker,
    TokenMetadata, TokenRepository,
};
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TIMEOUT: Duration = Duration::from_secs(5);

fn addresses(list: &[&str]) -> Vec<String> {
    list.iter().map(|a| a.to_string()).collect()
}

#[tokio::test]
async fn test_metadata_lookup_posts_addresses() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tokens/lookup"))
        .and(body_json(json!({ "addresses": ["T1", "T2"] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "tokens": [
                { "address": "T1", "name": "One", "symbol": "ONE", "holder_count": 12, "verified": true }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let repository = HttpTokenRepository::new(server.uri(), TIMEOUT).unwrap();
    let tokens = repository
        .fetch_metadata(&addresses(&["T1", "T2"]))
        .await
        .unwrap();

    assert_eq!(
        tokens,
        vec![TokenMetadata {
            address: "T1".to_string(),
            name: Some("One".to_string()),
            symbol: Some("ONE".to_string()),
            holder_count: Some(12),
            verified: true,
            ..Default::default()
        }]
    );
}

#[tokio::test]
async fn test_empty_lookup_makes_no_request() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let repository = HttpTokenRepository::new(server.uri(), TIMEOUT).unwrap();
    assert!(repository.fetch_metadata(&[]).await.unwrap().is_empty());
    repository.upsert(&[]).await.unwrap();
}

#[tokio::test]
async fn test_token_service_errors_are_classified() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tokens/lookup"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tokens/bulk-upsert"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bad token"))
        .mount(&server)
        .await;

    let repository = HttpTokenRepository::new(server.uri(), TIMEOUT).unwrap();

    let lookup = repository
        .fetch_metadata(&addresses(&["T1"]))
        .await
        .unwrap_err();
    assert!(matches!(lookup, RankingError::UpstreamStatus { status: 503, .. }));
    assert!(lookup.is_retryable());

    let upsert = repository
        .upsert(&[EnrichedToken::new("T1", 1_700_000_000)])
        .await
        .unwrap_err();
    assert!(matches!(upsert, RankingError::UpstreamStatus { status: 422, .. }));
    assert!(!upsert.is_retryable());
}

#[tokio::test]
async fn test_upsert_sends_enriched_tokens() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/tokens/bulk-upsert"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let repository = HttpTokenRepository::new(server.uri(), TIMEOUT).unwrap();
    repository
        .upsert(&[EnrichedToken::new("T1", 1_700_000_000)])
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["tokens"][0]["address"], json!("T1"));
    assert_eq!(body["tokens"][0]["refreshed_at"], json!(1_700_000_000));
}

#[tokio::test]
async fn test_safety_check_sums_liquidity_per_token() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tokens/v1/solana/T1,T2,T3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "baseToken": { "address": "T1" }, "priceUsd": "0.5", "liquidity": { "usd": 3000.0 } },
            { "baseToken": { "address": "T1" }, "priceUsd": "0.6", "liquidity": { "usd": 4000.0 } },
            { "baseToken": { "address": "T2" }, "liquidity": { "usd": 100.0 } }
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let checker = HttpSafetyChecker::new(server.uri(), "solana", 5_000.0, TIMEOUT).unwrap();
    let reports = checker
        .check(&addresses(&["T1", "T2", "T3"]))
        .await
        .unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].address, "T1");
    assert_eq!(reports[0].pair_count, 2);
    assert_eq!(reports[0].liquidity_usd, 7000.0);
    assert_eq!(reports[0].price_usd, Some(0.5));
    assert!(!reports[0].low_liquidity);

    assert_eq!(reports[1].address, "T2");
    assert_eq!(reports[1].price_usd, None);
    assert!(reports[1].low_liquidity);
}

#[tokio::test]
async fn test_safety_check_merges_security_verdicts() {
    let dex = MockServer::start().await;
    let security = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tokens/v1/solana/T1,T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "baseToken": { "address": "T1" }, "priceUsd": "0.5", "liquidity": { "usd": 8000.0 } }
        ])))
        .expect(1)
        .mount(&dex)
        .await;
    Mock::given(method("GET"))
        .and(path("/security/v1/solana/T1,T2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "address": "T1", "honeypot": false, "mintable": true },
            { "address": "T2", "honeypot": true }
        ])))
        .expect(1)
        .mount(&security)
        .await;

    let checker = HttpSafetyChecker::new(dex.uri(), "solana", 5_000.0, TIMEOUT)
        .unwrap()
        .with_security_api(Some(format!("{}/", security.uri())));
    let reports = checker.check(&addresses(&["T1", "T2"])).await.unwrap();

    assert_eq!(reports.len(), 2);
    assert_eq!(reports[0].address, "T1");
    assert_eq!(reports[0].liquidity_usd, 8000.0);
    assert_eq!(reports[0].honeypot, Some(false));
    assert_eq!(reports[0].mintable, Some(true));

    // Verdict without pairs: no liquidity, still flagged
    assert_eq!(reports[1].address, "T2");
    assert_eq!(reports[1].pair_count, 0);
    assert!(reports[1].low_liquidity);
    assert_eq!(reports[1].honeypot, Some(true));
    assert_eq!(reports[1].mintable, None);

    let mut token = EnrichedToken::new("T2", 1_700_000_000);
    token.safety = Some(reports[1].clone());
    let flags = token.flags();
    assert!(flags.honeypot);
    assert!(!flags.mintable);
}

#[tokio::test]
async fn test_security_outage_keeps_liquidity_report() {
    let dex = MockServer::start().await;
    let security = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/tokens/v1/solana/T1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "baseToken": { "address": "T1" }, "liquidity": { "usd": 8000.0 } }
        ])))
        .mount(&dex)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&security)
        .await;

    let checker = HttpSafetyChecker::new(dex.uri(), "solana", 5_000.0, TIMEOUT)
        .unwrap()
        .with_security_api(Some(security.uri()));
    let reports = checker.check(&addresses(&["T1"])).await.unwrap();

    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].liquidity_usd, 8000.0);
    assert_eq!(reports[0].honeypot, None);
    assert_eq!(reports[0].mintable, None);
}

#[tokio::test]
async fn test_safety_rate_limit_is_retryable() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let checker = HttpSafetyChecker::new(server.uri(), "solana", 5_000.0, TIMEOUT).unwrap();
    let err = checker.check(&addresses(&["T1"])).await.unwrap_err();

    assert!(matches!(
        err,
        RankingError::UpstreamStatus {
            service: "safety api",
            status: 429,
            ..
        }
    ));
    assert!(err.is_retryable());
}
