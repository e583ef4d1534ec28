//! HTTP directory client against a mock directory.

use std::time::Duration;

use serde_json::json;
use stargazer_core::DirectoryConfig;
use stargazer_sync::{DirectoryClient, HttpDirectoryClient, SyncError};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn directory_config(server: &MockServer) -> DirectoryConfig {
    DirectoryConfig {
        base_url: format!("{}/hypermedia", server.uri()),
        api_key: "api-key-123".into(),
        agent_id: "agent-id-123".into(),
        middleware_id: "middleware-id-123".into(),
        timeout: Duration::from_secs(5),
        retry_count: 6,
    }
}

fn client(server: &MockServer) -> HttpDirectoryClient {
    HttpDirectoryClient::new(&directory_config(server))
        .expect("client")
        .with_initial_backoff(Duration::from_millis(5))
}

#[tokio::test]
async fn three_empty_bodies_then_payload_succeeds() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hypermedia/agents/agent-id-123"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(3)
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/hypermedia/agents/agent-id-123"))
        .and(header("X-API-KEY", "api-key-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "agent-id-123",
            "name": "Test agent",
            "agentType": "managed-kafka"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let agent = client(&server).get_agent().await.expect("agent");
    assert_eq!(agent.agent_type, "managed-kafka");
}

#[tokio::test]
async fn two_byte_body_counts_as_payload() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hypermedia/middlewares/middleware-id-123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let ns = client(&server).get_namespace().await.expect("namespace");
    assert_eq!(ns.prefix, "");
    assert!(ns.endpoints.is_empty());
}

#[tokio::test]
async fn malformed_payload_is_a_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hypermedia/agents/agent-id-123"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server).get_agent().await.unwrap_err();
    assert!(matches!(err, SyncError::Decode { .. }), "got: {err}");
}

#[tokio::test]
async fn unreachable_directory_exhausts_budget() {
    // Nothing listens on port 1.
    let config = DirectoryConfig {
        base_url: "http://127.0.0.1:1".into(),
        api_key: "k".into(),
        agent_id: "a".into(),
        middleware_id: "m".into(),
        timeout: Duration::from_secs(1),
        retry_count: 2,
    };
    let client = HttpDirectoryClient::new(&config)
        .expect("client")
        .with_initial_backoff(Duration::from_millis(1));

    let err = client.get_agent().await.unwrap_err();
    assert!(
        matches!(err, SyncError::DirectoryUnavailable { .. }),
        "got: {err}"
    );
}

#[tokio::test]
async fn report_error_patches_message() {
    let server = MockServer::start().await;
    Mock::given(method("PATCH"))
        .and(path("/hypermedia/agents/agent-id-123"))
        .and(wiremock::matchers::body_json(json!({ "error": "broker unavailable: down" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    client(&server)
        .report_error("broker unavailable: down")
        .await
        .expect("report");
}
