mod common;

use common::{FakeRefresher, JWT, config_for};
use garmin_connect_client::GarminError;
use garmin_connect_client::http_client::ReqwestGarminClient;
use garmin_connect_client::session::{BROWSER_USER_AGENT, MOBILE_USER_AGENT};
use secrecy::SecretString;
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn bearer_requests_use_api_host_and_mobile_agent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hrv-service/hrv/2025-01-10"))
        .and(header("authorization", "Bearer tok"))
        .and(header("user-agent", MOBILE_USER_AGENT))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(2)
        .mount(&server)
        .await;

    let mut client = ReqwestGarminClient::new(config_for(&server.uri())).unwrap();
    client.set_bearer_token(Some(SecretString::new(" tok ".into())));

    let v = client.fetch_json("/hrv-service/hrv/2025-01-10").await.unwrap();
    assert_eq!(v["ok"], true);
    // Proxy-prefixed paths are rewritten onto the API host.
    client.execute("/modern/proxy/hrv-service/hrv/2025-01-10", true).await.unwrap();
}

#[tokio::test]
async fn cookie_requests_use_proxy_prefix_and_browser_headers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/modern/proxy/hrv-service/hrv/2025-01-10"))
        .and(header("x-requested-with", "XMLHttpRequest"))
        .and(header("nk", "NT"))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .expect(2)
        .mount(&server)
        .await;

    let mut client = ReqwestGarminClient::new(config_for(&server.uri())).unwrap();
    assert!(client.fetch_json("/hrv-service/hrv/2025-01-10").await.unwrap().is_null());
    client.execute("/modern/proxy/hrv-service/hrv/2025-01-10", true).await.unwrap();

    // The browser agent contains commas, which header matchers split on.
    let requests = server.received_requests().await.unwrap();
    for request in &requests {
        let agent = request.headers.get("user-agent").and_then(|v| v.to_str().ok());
        assert_eq!(agent, Some(BROWSER_USER_AGENT));
        assert!(request.headers.get("authorization").is_none());
    }
}

#[tokio::test]
async fn unauthorized_triggers_one_refresh_and_one_retry() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/modern/proxy/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/userprofile-service/socialProfile"))
        .and(header("authorization", format!("Bearer {JWT}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"displayName": "runner"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", format!("Bearer {JWT}")))
        .respond_with(ResponseTemplate::new(200).set_body_string("[1]"))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = Arc::new(FakeRefresher::resuming(JWT));
    let mut client = ReqwestGarminClient::new(config_for(&server.uri()))
        .unwrap()
        .with_refresher(refresher.clone());

    assert_eq!(client.execute("/data", true).await.unwrap(), "[1]");
    // No credentials configured: only the resume call runs.
    assert_eq!(refresher.calls(), vec![false]);
    assert_eq!(client.display_name(), Some("runner"));
}

#[tokio::test]
async fn second_unauthorized_is_surfaced() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/userprofile-service/socialProfile"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"displayName": "runner"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/modern/proxy/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = Arc::new(FakeRefresher::resuming(JWT));
    let mut client = ReqwestGarminClient::new(config_for(&server.uri()))
        .unwrap()
        .with_refresher(refresher.clone());

    let err = client.execute("/data", true).await.unwrap_err();
    assert_eq!(err.status(), Some(401));
    assert_eq!(refresher.calls().len(), 1);
}

#[tokio::test]
async fn unauthorized_without_refresher_or_retry_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/modern/proxy/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let mut plain = ReqwestGarminClient::new(config_for(&server.uri())).unwrap();
    let err = plain.execute("/data", true).await.unwrap_err();
    assert!(err.is_unauthorized());

    let refresher = Arc::new(FakeRefresher::resuming(JWT));
    let mut no_retry = ReqwestGarminClient::new(config_for(&server.uri()))
        .unwrap()
        .with_refresher(refresher.clone());
    let err = no_retry.execute("/data", false).await.unwrap_err();
    assert!(err.is_unauthorized());
    assert!(refresher.calls().is_empty());
}

#[tokio::test]
async fn failed_refresh_surfaces_original_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/modern/proxy/data"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let refresher = Arc::new(FakeRefresher::default());
    let mut client = ReqwestGarminClient::new(config_for(&server.uri()))
        .unwrap()
        .with_refresher(refresher.clone());

    let err = client.execute("/data", true).await.unwrap_err();
    match err {
        GarminError::Status { status, url, .. } => {
            assert_eq!(status, 401);
            assert!(url.ends_with("/modern/proxy/data"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(refresher.calls(), vec![false]);
}
