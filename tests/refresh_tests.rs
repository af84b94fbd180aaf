// ABOUTME: Token refresher tests: rotation visible to the poller, 403 halt, retry, secret mode.
// ABOUTME: Uses short refresh intervals and header-matched mocks to observe rotation.

use chatline::{ClientConfig, ConnectionClient, ConnectionStatus};
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn token_config(server: &MockServer) -> ClientConfig {
    ClientConfig {
        base_url: server.uri(),
        token: Some("tok-0".into()),
        user_id: Some("user-1".into()),
        poll_interval_ms: 25,
        retry_delay_ms: 30,
        refresh_interval_ms: 80,
        request_timeout_secs: 5,
        ..ClientConfig::default()
    }
}

async fn mount_start(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/conversations"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversationId": "conv-1",
            "token": "tok-1"
        })))
        .mount(server)
        .await;
}

async fn mount_empty_poll(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/conversations/conv-1/activities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "activities": [],
            "watermark": null
        })))
        .mount(server)
        .await;
}

async fn wait_for_status(rx: &mut watch::Receiver<ConnectionStatus>, want: ConnectionStatus) {
    tokio::time::timeout(Duration::from_secs(2), rx.wait_for(|s| *s == want))
        .await
        .expect("timed out waiting for status change")
        .expect("status channel closed");
}

fn refresh_count(requests: &[wiremock::Request]) -> usize {
    requests
        .iter()
        .filter(|r| r.url.path() == "/tokens/refresh")
        .count()
}

#[tokio::test]
async fn test_refresh_rotates_token_for_subsequent_requests() {
    let server = MockServer::start().await;
    mount_start(&server).await;
    mount_empty_poll(&server).await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversationId": "conv-1",
            "token": "tok-2"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .and(header("Authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversationId": "conv-1",
            "token": "tok-3"
        })))
        .mount(&server)
        .await;

    let client = ConnectionClient::new(token_config(&server)).unwrap();
    let _receiver = client.start().await.unwrap();

    // One refresh period plus slack
    tokio::time::sleep(Duration::from_millis(150)).await;
    client.end();

    let requests = server.received_requests().await.unwrap();
    assert!(refresh_count(&requests) >= 1);

    let auth_values: Vec<&str> = requests
        .iter()
        .filter(|r| r.url.path() == "/conversations/conv-1/activities")
        .filter_map(|r| r.headers.get("authorization").and_then(|v| v.to_str().ok()))
        .collect();
    assert!(
        auth_values.iter().any(|v| *v == "Bearer tok-1"),
        "polls before the first refresh use the start token"
    );
    assert!(
        auth_values.iter().any(|v| *v == "Bearer tok-2"),
        "polls after the refresh must use the rotated token"
    );
}

#[tokio::test]
async fn test_refresh_403_goes_offline_and_halts_everything() {
    let server = MockServer::start().await;
    mount_start(&server).await;
    mount_empty_poll(&server).await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let client = ConnectionClient::new(token_config(&server)).unwrap();
    let mut status_rx = client.status();
    let mut receiver = client.start().await.unwrap();

    wait_for_status(&mut status_rx, ConnectionStatus::Offline).await;

    // Poller notices the dead session and closes the stream
    let closed = tokio::time::timeout(Duration::from_millis(500), receiver.recv())
        .await
        .expect("stream should close after going offline");
    assert!(closed.is_none());

    let requests = server.received_requests().await.unwrap();
    let refreshes_then = refresh_count(&requests);
    let polls_then = requests
        .iter()
        .filter(|r| r.url.path() == "/conversations/conv-1/activities")
        .count();

    tokio::time::sleep(Duration::from_millis(200)).await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        refresh_count(&requests),
        refreshes_then,
        "no further refresh attempts after a 403"
    );
    assert_eq!(refreshes_then, 1);
    let polls_now = requests
        .iter()
        .filter(|r| r.url.path() == "/conversations/conv-1/activities")
        .count();
    assert_eq!(polls_then, polls_now, "polling halts once the session is offline");
}

#[tokio::test]
async fn test_refresh_5xx_retries_with_fixed_delay() {
    let server = MockServer::start().await;
    mount_start(&server).await;
    mount_empty_poll(&server).await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/tokens/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "conversationId": "conv-1",
            "token": "tok-2"
        })))
        .mount(&server)
        .await;

    let client = ConnectionClient::new(token_config(&server)).unwrap();
    let _receiver = client.start().await.unwrap();

    // Refresh fires at ~80ms, fails, retries at ~110ms and succeeds
    tokio::time::sleep(Duration::from_millis(220)).await;
    client.end();

    let requests = server.received_requests().await.unwrap();
    assert!(refresh_count(&requests) >= 2);
    let rotated = requests
        .iter()
        .filter(|r| r.url.path() == "/conversations/conv-1/activities")
        .filter_map(|r| r.headers.get("authorization").and_then(|v| v.to_str().ok()))
        .any(|v| v == "Bearer tok-2");
    assert!(rotated, "the retried refresh must still rotate the token");
}

#[tokio::test]
async fn test_secret_mode_never_refreshes() {
    let server = MockServer::start().await;
    mount_start(&server).await;
    mount_empty_poll(&server).await;

    let config = ClientConfig {
        token: None,
        secret: Some("app-secret".into()),
        refresh_interval_ms: 50,
        ..token_config(&server)
    };
    let client = ConnectionClient::new(config).unwrap();
    let _receiver = client.start().await.unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    client.end();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(
        refresh_count(&requests),
        0,
        "a long-lived secret is never refreshed"
    );
}
