//! Tests for the Network Management prober against a mock API.

use super::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TESTS_PATH: &str = "/projects/acme-prod/locations/global/connectivityTests";
const OPERATION: &str = "projects/acme-prod/locations/global/operations/operation-17";

fn settings(server: &MockServer, max_polls: u32) -> ProberSettings {
    ProberSettings {
        base_url: format!("{}/", server.uri()),
        poll_interval_ms: 1,
        max_polls,
    }
}

fn prober(server: &MockServer, max_polls: u32) -> NetworkManagementProber {
    NetworkManagementProber::new(&settings(server, max_polls), "token-abc")
        .with_request_retry(RetryConfig::no_retry())
}

fn endpoints() -> ProbeEndpoints {
    ProbeEndpoints {
        target_ip: "10.20.0.3".parse().unwrap(),
        source_ip: "192.168.1.40".parse().unwrap(),
        source_port: 5432,
    }
}

fn running() -> serde_json::Value {
    json!({ "name": OPERATION, "done": false })
}

fn finished(result: &str) -> serde_json::Value {
    json!({
        "name": OPERATION,
        "done": true,
        "response": {
            "name": "projects/acme-prod/locations/global/connectivityTests/dma-orders",
            "reachabilityDetails": {
                "result": result,
                "traces": [{
                    "steps": [
                        { "state": "START_FROM_INSTANCE", "description": "Initial state" },
                        { "state": "DELIVER", "description": "Packet delivered to 192.168.1.40" }
                    ]
                }]
            }
        }
    })
}

// ==================== Create Tests ====================

#[tokio::test]
async fn test_create_sends_target_to_source_probe() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TESTS_PATH))
        .and(query_param("testId", "dma-orders"))
        .and(header("authorization", "Bearer token-abc"))
        .and(body_partial_json(json!({
            "source": { "ipAddress": "10.20.0.3" },
            "destination": { "ipAddress": "192.168.1.40", "port": 5432 },
            "protocol": "TCP"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(finished("REACHABLE")))
        .expect(1)
        .mount(&server)
        .await;

    // Act
    let result = prober(&server, 3)
        .create("dma-orders", "acme-prod", endpoints())
        .await
        .unwrap();

    // Assert
    assert_eq!(result.status, ProbeStatus::Reachable);
    assert_eq!(result.operation, ProbeOperation::Create);
    assert_eq!(
        result.details,
        vec!["DELIVER: Packet delivered to 192.168.1.40".to_string()]
    );
}

#[tokio::test]
async fn test_create_polls_running_operation() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TESTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(running()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{OPERATION}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(finished("UNREACHABLE")))
        .expect(1)
        .mount(&server)
        .await;

    // Act
    let result = prober(&server, 5)
        .create("dma-orders", "acme-prod", endpoints())
        .await
        .unwrap();

    // Assert
    assert_eq!(result.status, ProbeStatus::Unreachable);
    assert!(result.status.is_failure());
}

#[tokio::test]
async fn test_create_reports_pending_after_poll_budget() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TESTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(running()))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{OPERATION}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(running()))
        .expect(3)
        .mount(&server)
        .await;

    // Act
    let result = prober(&server, 3)
        .create("dma-orders", "acme-prod", endpoints())
        .await
        .unwrap();

    // Assert
    assert_eq!(result.status, ProbeStatus::Pending);
    assert_eq!(result.operation_name.as_deref(), Some(OPERATION));
}

#[tokio::test]
async fn test_failed_operation_is_prober_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TESTS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": OPERATION,
            "done": true,
            "error": { "code": 6, "message": "Resource 'dma-orders' already exists" }
        })))
        .mount(&server)
        .await;

    let err = prober(&server, 3)
        .create("dma-orders", "acme-prod", endpoints())
        .await
        .unwrap_err();

    assert_eq!(err.code(), "DMA-007");
    assert!(err.to_string().contains("already exists"));
}

// ==================== Rerun / Delete Tests ====================

#[tokio::test]
async fn test_rerun_reads_test_when_response_is_empty() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(format!("{TESTS_PATH}/dma-orders:rerun")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "name": OPERATION, "done": true })),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{TESTS_PATH}/dma-orders")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "reachabilityDetails": { "result": "AMBIGUOUS" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    // Act
    let result = prober(&server, 3).rerun("dma-orders", "acme-prod").await.unwrap();

    // Assert
    assert_eq!(result.status, ProbeStatus::Ambiguous);
    assert_eq!(result.operation, ProbeOperation::Rerun);
    assert!(result.details.is_empty());
}

#[tokio::test]
async fn test_delete_waits_for_operation() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path(format!("{TESTS_PATH}/dma-orders")))
        .and(header("authorization", "Bearer token-abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(running()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("/{OPERATION}")))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({ "name": OPERATION, "done": true })),
        )
        .mount(&server)
        .await;

    // Act
    let result = prober(&server, 3).delete("dma-orders", "acme-prod").await.unwrap();

    // Assert
    assert_eq!(result.status, ProbeStatus::Deleted);
    assert!(result.operation_name.is_none());
}

// ==================== HTTP Error Tests ====================

#[tokio::test]
async fn test_unauthorized_is_authentication_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": 401, "message": "Request had invalid authentication credentials." }
        })))
        .mount(&server)
        .await;

    let err = prober(&server, 3).rerun("dma-orders", "acme-prod").await.unwrap_err();

    assert!(matches!(err, Error::Authentication(ref m) if m.contains("invalid authentication")));
}

#[tokio::test]
async fn test_not_found_is_prober_error() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": 404, "message": "Connectivity test not found" }
        })))
        .mount(&server)
        .await;

    let err = prober(&server, 3).delete("dma-orders", "acme-prod").await.unwrap_err();

    assert_eq!(err.to_string(), "[DMA-007] Connectivity probe error: HTTP 404: Connectivity test not found");
}

#[tokio::test]
async fn test_rate_limit_reads_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "12"))
        .mount(&server)
        .await;

    let err = prober(&server, 3).rerun("dma-orders", "acme-prod").await.unwrap_err();

    assert!(matches!(err, Error::RateLimit(12)));
}

#[tokio::test]
async fn test_unavailable_call_is_retried() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend unavailable"))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(finished("REACHABLE")))
        .expect(1)
        .mount(&server)
        .await;
    let retry = RetryConfig {
        max_retries: 2,
        initial_delay: Duration::from_millis(1),
        add_jitter: false,
        ..Default::default()
    };

    // Act
    let result = prober(&server, 3)
        .with_request_retry(retry)
        .rerun("dma-orders", "acme-prod")
        .await
        .unwrap();

    // Assert
    assert_eq!(result.status, ProbeStatus::Reachable);
}

#[test]
fn test_api_message_falls_back_to_body() {
    assert_eq!(api_message("  upstream reset  "), "upstream reset");
    assert_eq!(
        api_message(r#"{"error":{"message":"quota exceeded"}}"#),
        "quota exceeded"
    );
}
