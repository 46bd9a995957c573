//! WhatsApp call control client tests against a mock Graph API.

use std::time::Duration;

use serde_json::{Value, json};
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use callbridge_gateway::core::call_control::{
    CallAction, CallControl, CallControlError, WhatsAppCallClient, WhatsAppConfig,
};

const ANSWER_SDP: &str = "v=0\r\na=setup:active\r\n";

fn client(server: &MockServer) -> WhatsAppCallClient {
    client_for(&server.uri())
}

fn client_for(api_base: &str) -> WhatsAppCallClient {
    WhatsAppCallClient::new(&WhatsAppConfig {
        api_base: api_base.to_string(),
        phone_number_id: "PNID".to_string(),
        access_token: "test-token".to_string(),
        request_timeout: Duration::from_secs(2),
    })
    .unwrap()
}

async fn last_body(server: &MockServer) -> Value {
    let requests = server.received_requests().await.unwrap();
    let request = requests.last().expect("no request received");
    serde_json::from_slice(&request.body).unwrap()
}

#[tokio::test]
async fn test_pre_accept_sends_answer_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/PNID/calls"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client(&server).pre_accept("W1", ANSWER_SDP).await;
    assert!(outcome.is_success());
    assert_eq!(outcome.action, CallAction::PreAccept);

    assert_eq!(
        last_body(&server).await,
        json!({
            "messaging_product": "whatsapp",
            "call_id": "W1",
            "action": "pre_accept",
            "session": {"sdp_type": "answer", "sdp": ANSWER_SDP}
        })
    );
}

#[tokio::test]
async fn test_accept_carries_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/PNID/calls"))
        .and(body_partial_json(json!({"action": "accept"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client(&server).accept("W1", ANSWER_SDP).await.is_success());
    assert_eq!(last_body(&server).await["session"]["sdp"], ANSWER_SDP);
}

#[tokio::test]
async fn test_reject_and_terminate_omit_session() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/PNID/calls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .expect(2)
        .mount(&server)
        .await;

    let client = client(&server);
    assert!(client.reject("W1").await.is_success());
    let body = last_body(&server).await;
    assert_eq!(body["action"], "reject");
    assert!(body.get("session").is_none());

    assert!(client.terminate("W1").await.is_success());
    let body = last_body(&server).await;
    assert_eq!(body["action"], "terminate");
    assert!(body.get("session").is_none());
}

#[tokio::test]
async fn test_success_false_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/PNID/calls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false})))
        .mount(&server)
        .await;

    let outcome = client(&server).accept("W1", ANSWER_SDP).await;
    assert!(!outcome.is_success());
    assert!(matches!(
        outcome.error,
        Some(CallControlError::NotSuccessful(_))
    ));
}

#[tokio::test]
async fn test_missing_success_flag_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/PNID/calls"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    assert!(!client(&server).terminate("W1").await.is_success());
}

#[tokio::test]
async fn test_http_error_carries_graph_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/PNID/calls"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "Call not found", "code": 138006}
        })))
        .mount(&server)
        .await;

    let outcome = client(&server).pre_accept("W1", ANSWER_SDP).await;
    match &outcome.error {
        Some(CallControlError::HttpStatus { status, body }) => {
            assert_eq!(*status, 500);
            assert_eq!(body, "Call not found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(outcome.reason().contains("500"));
}

#[tokio::test]
async fn test_unparseable_response_is_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/PNID/calls"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let outcome = client(&server).reject("W1").await;
    assert!(matches!(
        outcome.error,
        Some(CallControlError::InvalidResponse(_))
    ));
}

#[tokio::test]
async fn test_transport_failure_is_failure() {
    // Nothing listens on the discard port
    let outcome = client_for("http://127.0.0.1:9").terminate("W1").await;
    assert!(!outcome.is_success());
    assert!(matches!(outcome.error, Some(CallControlError::Transport(_))));
}
