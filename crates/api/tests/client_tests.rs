//! HTTP-level tests for `ArloClient` against a mock audit server.

use std::time::Duration;

use arlo_api::{ApiRequest, ArloClient, Transport, TransportErrorKind, endpoints};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client_for(server: &MockServer, session: Option<&str>) -> ArloClient {
    ArloClient::new(&server.uri(), session, Duration::from_secs(5)).expect("client")
}

#[tokio::test]
async fn get_returns_status_and_body_with_session_cookie() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/election/e1/audit/status"))
        .and(header("cookie", "session=abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"electionId": "e1", "phase": "SEED_SET"})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server, Some("abc123"));
    let response = client
        .execute(ApiRequest::get(endpoints::audit_status("e1")))
        .await
        .expect("response");

    assert_eq!(response.status, 200);
    let body: serde_json::Value = serde_json::from_str(&response.body).expect("json body");
    assert_eq!(body["phase"], "SEED_SET");
}

#[tokio::test]
async fn rejection_statuses_are_responses_not_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/election/e1/round"))
        .and(body_json(json!({"roundNum": 3})))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "errors": [{"message": "The next round number must be 2", "errorType": "Conflict"}]
        })))
        .mount(&server)
        .await;

    let client = client_for(&server, None);
    let response = client
        .execute(ApiRequest::post(endpoints::rounds("e1"), json!({"roundNum": 3})))
        .await
        .expect("a 409 is still a response");

    assert_eq!(response.status, 409);
    assert!(!response.is_success());
    assert!(response.body.contains("next round number"));
}

#[tokio::test]
async fn slow_server_surfaces_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/election/e1/round"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = ArloClient::new(&server.uri(), None, Duration::from_millis(100)).expect("client");
    let error = client
        .execute(ApiRequest::get(endpoints::rounds("e1")))
        .await
        .expect_err("should time out");

    assert_eq!(error.kind, TransportErrorKind::Timeout);
    assert_eq!(error.path, "/election/e1/round");
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let client = ArloClient::new("http://127.0.0.1:1", None, Duration::from_secs(2)).expect("client");
    let error = client
        .execute(ApiRequest::get(endpoints::contests("e1")))
        .await
        .expect_err("nothing listens on port 1");

    assert_ne!(error.kind, TransportErrorKind::Timeout);
    assert_eq!(error.method, "GET");
}
