//! Integration tests for the smaller inventory endpoints using wiremock:
//! USB devices, API keys, asset groups, Live Query differentials and
//! sensor kits.

use cbc_export::api_keys::{api_key_table, find_api_keys};
use cbc_export::asset_groups::*;
use cbc_export::auth::ApiCredentials;
use cbc_export::client::CbcClient;
use cbc_export::live_query::differential_search;
use cbc_export::sensor_kits::published_sensor_kits;
use cbc_export::usb_devices::export_usb_devices;
use serde_json::json;
use wiremock::matchers::{body_json, body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn mock_client(server: &MockServer) -> CbcClient {
    let creds = ApiCredentials::new("api-id", "api-secret").unwrap();
    CbcClient::with_base_url(&server.uri(), "ORGKEY", creds).unwrap()
}

// ── USB devices ─────────────────────────────────────────────────────────

#[tokio::test]
async fn usb_export_has_summary_and_one_sheet_per_device() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("POST"))
        .and(path("/device_control/v3/orgs/ORGKEY/devices/_search"))
        .and(body_partial_json(json!({"sort": [{"field": "last_seen", "order": "DESC"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": 11, "vendor_name": "SanDisk"},
                {"id": "22", "vendor_name": "Kingston"}
            ],
            "num_found": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    for id in ["11", "22"] {
        Mock::given(method("GET"))
            .and(path(format!("/device_control/v3/orgs/ORGKEY/devices/{id}/endpoints")))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{"endpoint_name": format!("host-{id}"), "os": "WINDOWS"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let workbook = export_usb_devices(&client).await.unwrap();
    assert_eq!(workbook.sheet_count(), 3);
}

// ── API keys ────────────────────────────────────────────────────────────

#[tokio::test]
async fn api_keys_are_listed_and_scrubbed() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("POST"))
        .and(path("/appservices/v5/orgs/ORGKEY/connectors/find"))
        .and(body_partial_json(json!({"orgId": "1035", "fromRow": 0, "maxRows": 50})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "entries": [{
                "name": "SIEM",
                "apiKey": "SECRET-VALUE",
                "createTime": 1_700_000_000_000_i64,
                "stats": {"totalRequests": 4}
            }],
            "totalResults": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let entries = find_api_keys(&client, "1035").await.unwrap();
    let table = api_key_table(&entries).unwrap();
    assert!(table.column_index("apiKey").is_none());
    assert_eq!(table.cell_text(0, "createTime"), "2023-11-14 22:13:20.000");
    assert_eq!(table.cell_text(0, "totalRequests"), "4");
}

#[tokio::test]
async fn api_keys_are_paged_past_the_first_fifty() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    let keys = |from: usize, n: usize| -> Vec<serde_json::Value> {
        (from..from + n).map(|i| json!({"name": format!("key-{i}")})).collect()
    };
    for (from_row, count) in [(0, 50), (50, 50), (100, 20)] {
        Mock::given(method("POST"))
            .and(path("/appservices/v5/orgs/ORGKEY/connectors/find"))
            .and(body_partial_json(json!({"fromRow": from_row, "maxRows": 50})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "entries": keys(from_row, count),
                "totalResults": 120
            })))
            .expect(1)
            .mount(&server)
            .await;
    }

    let entries = find_api_keys(&client, "1035").await.unwrap();
    assert_eq!(entries.len(), 120);
    assert_eq!(entries[0]["name"], "key-0");
    assert_eq!(entries[119]["name"], "key-119");
}

// ── Asset groups ────────────────────────────────────────────────────────

#[tokio::test]
async fn asset_group_is_created_from_hostnames() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("POST"))
        .and(path("/asset_groups/v1/orgs/ORGKEY/groups"))
        .and(body_json(json!({
            "name": "Finance",
            "description": "Finance",
            "member_type": "DEVICE",
            "query": "name.equals: \"fin-01\" OR name.equals: \"fin-02\""
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "ag-1",
            "name": "Finance",
            "member_count": 2
        })))
        .expect(1)
        .mount(&server)
        .await;

    let query = hostname_query("fin-01\nfin-02\n").unwrap();
    let group = create_asset_group(&client, &NewAssetGroup::devices("Finance", query))
        .await
        .unwrap();
    assert_eq!(group.id, "ag-1");
    assert_eq!(group.member_count, Some(2));
}

#[tokio::test]
async fn asset_groups_are_listed() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("GET"))
        .and(path("/asset_groups/v1/orgs/ORGKEY/groups"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"id": "ag-1", "name": "Finance", "status": "OK"},
                {"id": "ag-2", "name": "Servers"}
            ],
            "num_found": 2
        })))
        .mount(&server)
        .await;

    let list = list_asset_groups(&client).await.unwrap();
    assert_eq!(list.num_found, 2);
    assert_eq!(list.results[0].extra["status"], "OK");
    assert_eq!(list.results[1].name, "Servers");
}

// ── Live Query differential ─────────────────────────────────────────────

#[tokio::test]
async fn differential_search_sends_org_header_and_run_ids() {
    let server = MockServer::start().await;
    let client = mock_client(&server).with_org_header(true);

    Mock::given(method("POST"))
        .and(path("/livequery/v1/orgs/ORGKEY/differential/runs/_search"))
        .and(header("X-Org", "ORGKEY"))
        .and(body_json(json!({
            "count_only": false,
            "newer_run_id": "run-new",
            "older_run_id": "run-old"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{"device_id": 7, "added_count": 1, "removed_count": 0}],
            "num_found": 1
        })))
        .expect(1)
        .mount(&server)
        .await;

    let diff = differential_search(&client, "run-new", Some("run-old"), false)
        .await
        .unwrap();
    assert_eq!(diff.num_found, 1);
    assert_eq!(diff.results[0]["added_count"], 1);
}

// ── Sensor kits ─────────────────────────────────────────────────────────

#[tokio::test]
async fn sensor_kits_use_numeric_org_id() {
    let server = MockServer::start().await;
    let client = mock_client(&server).with_org_header(true);

    Mock::given(method("GET"))
        .and(path("/appservices/v5/orgs/1035/kits/published"))
        .and(query_param("deploymentType", "WORKLOAD"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"os": "LINUX", "version": "2.15.2"}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    let kits = published_sensor_kits(&client, "1035", "WORKLOAD").await.unwrap();
    assert_eq!(kits[0]["version"], "2.15.2");
}

#[tokio::test]
async fn sensor_kit_deployment_type_is_encoded() {
    let server = MockServer::start().await;
    let client = mock_client(&server).with_org_header(true);

    Mock::given(method("GET"))
        .and(path("/appservices/v5/orgs/1035/kits/published"))
        .and(query_param("deploymentType", "ENDPOINT&os=WINDOWS"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let kits = published_sensor_kits(&client, "1035", "ENDPOINT&os=WINDOWS")
        .await
        .unwrap();
    assert_eq!(kits, json!([]));
}
