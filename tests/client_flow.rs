//! Integration tests for the authenticated client using wiremock.
//!
//! Covers the cross-cutting request contract: the `X-Auth-Token` header,
//! the optional `X-Org` header, and how non-2xx responses and malformed
//! bodies surface as errors.

use cbc_export::auth::ApiCredentials;
use cbc_export::client::CbcClient;
use cbc_export::error::CbcError;
use serde_json::{Value, json};
use wiremock::matchers::{header, header_exists, method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

fn mock_client(server: &MockServer) -> CbcClient {
    let creds = ApiCredentials::new("api-id", "api-secret").unwrap();
    CbcClient::with_base_url(&server.uri(), "ORGKEY", creds).unwrap()
}

#[tokio::test]
async fn requests_carry_secret_slash_id_token() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/appservices/v6/orgs/ORGKEY/ping"))
        .and(header("X-Auth-Token", "api-secret/api-id"))
        .and(header("Content-Type", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = client.org_path("appservices/v6", "ping");
    let body: Value = client.get(&endpoint).await.unwrap();
    assert_eq!(body["ok"], true);
}

#[tokio::test]
async fn org_header_is_sent_only_when_enabled() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/threathunter/watchlistmgr/v3/orgs/ORGKEY/watchlists"))
        .and(header("X-Org", "ORGKEY"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = mock_client(&server).with_org_header(true);
    let endpoint = client.org_path("threathunter/watchlistmgr/v3", "watchlists");
    let _: Value = client.get(&endpoint).await.unwrap();

    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let plain = mock_client(&server);
    let _: Value = plain.get("plain").await.unwrap();
    let received = server.received_requests().await.unwrap();
    let last: &Request = received.last().unwrap();
    assert!(!last.headers.contains_key("X-Org"));
}

#[tokio::test]
async fn non_success_status_keeps_response_body() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("POST"))
        .and(path("/appservices/v6/orgs/ORGKEY/devices/_search"))
        .and(header_exists("X-Auth-Token"))
        .respond_with(
            ResponseTemplate::new(403)
                .set_body_string(r#"{"success":false,"message":"Permission denied: device.READ"}"#),
        )
        .mount(&server)
        .await;

    let endpoint = client.org_path("appservices/v6", "devices/_search");
    let err = client.post::<_, Value>(&endpoint, &json!({})).await.unwrap_err();
    match err {
        CbcError::Api { status, body } => {
            assert_eq!(status.as_u16(), 403);
            assert!(body.contains("device.READ"));
        }
        other => panic!("expected Api error, got {other:?}"),
    }
}

#[tokio::test]
async fn malformed_json_is_a_parse_error() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>gateway</html>"))
        .mount(&server)
        .await;

    let err = client.get::<Value>("broken").await.unwrap_err();
    assert!(matches!(err, CbcError::Parse(_)), "got {err:?}");
}

#[tokio::test]
async fn query_values_are_url_encoded() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/appservices/v6/orgs/ORGKEY/things"))
        .and(query_param("name", "a&b=c d"))
        .and(query_param("rows", "10"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = client.org_path("appservices/v6", "things");
    let body: Value = client
        .get_query(&endpoint, &[("name", "a&b=c d"), ("rows", "10")])
        .await
        .unwrap();
    assert_eq!(body["ok"], true);

    let received = server.received_requests().await.unwrap();
    let query = received[0].url.query().unwrap_or_default();
    assert!(!query.contains("a&b"), "unencoded query: {query}");
}

#[tokio::test]
async fn rejected_key_is_an_api_error_not_auth() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/appservices/v6/orgs/ORGKEY/ping"))
        .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = client.org_path("appservices/v6", "ping");
    let err = client.get::<Value>(&endpoint).await.unwrap_err();
    assert!(
        matches!(err, CbcError::Api { status, ref body } if status.as_u16() == 403 && body == "Forbidden"),
        "got {err:?}"
    );
}
