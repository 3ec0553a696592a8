use index_migrator_provider::{MigrationError, MigrationOutcome, MigratorConfig, ReindexCoordinator};
use search_common::{ElasticsearchClient, SearchClientConfig};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn coordinator_for(server: &MockServer) -> ReindexCoordinator {
    let client = ElasticsearchClient::new(
        SearchClientConfig::new(server.uri()).with_timeout(Duration::from_secs(5)),
    )
    .expect("client");
    ReindexCoordinator::new(Arc::new(client), &MigratorConfig::default())
        .with_poll_interval(Duration::from_millis(5))
        .with_copy_timeout(Duration::from_secs(2))
}

/// Alias resolves to v1 on the first lookup and to v2 afterwards
async fn mount_alias_progression(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/_alias/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions_v1": { "aliases": { "transactions": {} } }
        })))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_alias/transactions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "transactions_v2": { "aliases": { "transactions": { "is_write_index": true } } }
        })))
        .mount(server)
        .await;
}

async fn mount_candidate_creation(server: &MockServer) {
    Mock::given(method("HEAD"))
        .and(path("/transactions_v2"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/transactions_v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/_reindex"))
        .and(query_param("wait_for_completion", "false"))
        .and(body_partial_json(json!({
            "source": { "index": "transactions_v1" },
            "dest": { "index": "transactions_v2", "op_type": "create" }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "task": "node:7" })))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_migration_over_http() {
    let server = MockServer::start().await;
    mount_alias_progression(&server).await;
    mount_candidate_creation(&server).await;

    Mock::given(method("POST"))
        .and(path("/_aliases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_tasks/node:7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "completed": true,
            "task": { "status": { "total": 3, "created": 3, "version_conflicts": 0 } },
            "response": { "failures": [] }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transactions_v2/_refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "_shards": { "failed": 0 } })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/transactions_v2/_count"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "count": 3 })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/transactions_v1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
        .expect(1)
        .mount(&server)
        .await;

    let report = coordinator_for(&server)
        .migrate("transactions")
        .await
        .unwrap();

    assert_eq!(report.outcome, MigrationOutcome::Completed { old_deleted: true });
    assert_eq!(report.copy.created, 3);
    assert_eq!(report.documents, 3);

    // The candidate is refreshed before its documents are counted
    let requests = server.received_requests().await.unwrap();
    let position = |suffix: &str| {
        requests
            .iter()
            .position(|request| request.url.path() == suffix)
            .unwrap()
    };
    assert!(position("/transactions_v2/_refresh") < position("/transactions_v2/_count"));
    let reindex = &requests[position("/_reindex")];
    assert!(reindex
        .url
        .query_pairs()
        .any(|(key, value)| key == "refresh" && value == "true"));
}

#[tokio::test]
async fn test_failed_copy_rolls_back_over_http() {
    let server = MockServer::start().await;
    mount_alias_progression(&server).await;
    mount_candidate_creation(&server).await;

    // Swap to the candidate, then back to the original
    Mock::given(method("POST"))
        .and(path("/_aliases"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_tasks/node:7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "completed": true,
            "task": { "status": { "total": 3, "created": 1 } },
            "error": { "type": "search_phase_execution_exception", "reason": "all shards failed" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/transactions_v2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "acknowledged": true })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/transactions_v1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let error = coordinator_for(&server)
        .migrate("transactions")
        .await
        .unwrap_err();

    match error {
        MigrationError::RolledBack {
            cause,
            alias_restored,
            candidate_deleted,
        } => {
            assert!(alias_restored);
            assert!(candidate_deleted);
            assert!(matches!(
                *cause,
                MigrationError::CopyFailed { ref reason, .. } if reason == "all shards failed"
            ));
        }
        other => panic!("expected rollback, got {}", other),
    }
}
