//! Integration tests for investigate search and detail jobs using wiremock.
//!
//! Each flow is: POST the job → GET results with `rows=0` until
//! `completed >= contacted` → GET results page by page.

use std::time::Duration;

use cbc_export::auth::ApiCredentials;
use cbc_export::client::CbcClient;
use cbc_export::error::CbcError;
use cbc_export::investigate::*;
use cbc_export::poll::PollConfig;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const BASE: &str = "/api/investigate/v2/orgs/ORGKEY";

fn mock_client(server: &MockServer) -> CbcClient {
    let creds = ApiCredentials::new("api-id", "api-secret").unwrap();
    CbcClient::with_base_url(&server.uri(), "ORGKEY", creds).unwrap()
}

fn fast_poll() -> PollConfig {
    PollConfig {
        interval: Duration::from_millis(5),
        timeout: Duration::from_secs(5),
        max_attempts: 20,
    }
}

/// Mounts the status poll for a job: one partial answer, then complete.
async fn mount_job_status(server: &MockServer, jobs_path: &str, num_found: u64) {
    Mock::given(method("GET"))
        .and(path(format!("{jobs_path}/results")))
        .and(query_param("rows", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [],
            "num_found": 0,
            "num_available": 0,
            "contacted": 10,
            "completed": 3
        })))
        .up_to_n_times(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{jobs_path}/results")))
        .and(query_param("rows", "0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [],
            "num_found": num_found,
            "num_available": num_found,
            "contacted": 10,
            "completed": 10
        })))
        .mount(server)
        .await;
}

#[tokio::test]
async fn process_search_polls_then_collects_results() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let jobs = format!("{BASE}/processes/search_jobs/job-1");

    Mock::given(method("POST"))
        .and(path(format!("{BASE}/processes/search_jobs")))
        .and(body_partial_json(json!({
            "query": "process_name:powershell.exe",
            "fields": ["*"],
            "time_range": {"window": "-30d"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "job-1"})))
        .expect(1)
        .mount(&server)
        .await;

    mount_job_status(&server, &jobs, 2).await;

    Mock::given(method("GET"))
        .and(path(format!("{jobs}/results")))
        .and(query_param("start", "0"))
        .and(query_param("rows", "10000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"process_guid": "G-1", "device_name": "WIN-01", "process_name": "powershell.exe"},
                {"process_guid": "G-2", "device_name": "WIN-02", "process_name": "powershell.exe",
                 "process_username": ["CORP\\alice"]}
            ],
            "num_found": 2,
            "num_available": 2,
            "contacted": 10,
            "completed": 10
        })))
        .expect(1)
        .mount(&server)
        .await;

    let request = process_search_request("process_name:powershell.exe", "-30d");
    let processes = search_processes(&client, &request, usize::MAX, &fast_poll())
        .await
        .unwrap();

    assert_eq!(processes.len(), 2);
    assert_eq!(processes[0].process_guid, "G-1");
    assert!(processes[0].process_cmdline.is_none());
    assert_eq!(processes[1].extra["process_username"], json!(["CORP\\alice"]));
}

#[tokio::test]
async fn detail_job_fills_command_lines() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let jobs = format!("{BASE}/processes/detail_jobs/detail-1");

    Mock::given(method("POST"))
        .and(path(format!("{BASE}/processes/detail_jobs")))
        .and(body_partial_json(json!({"process_guids": ["G-1", "G-2", "G-3"]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "detail-1"})))
        .expect(1)
        .mount(&server)
        .await;

    mount_job_status(&server, &jobs, 2).await;

    Mock::given(method("GET"))
        .and(path(format!("{jobs}/results")))
        .and(query_param("rows", "10000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                {"process_guid": "G-2", "process_cmdline": ["cmd.exe /c whoami"]},
                {"process_guid": "G-1", "process_cmdline": ["powershell.exe -nop", "-enc AAA"]}
            ],
            "num_found": 2,
            "num_available": 2,
            "contacted": 10,
            "completed": 10
        })))
        .mount(&server)
        .await;

    let mut processes: Vec<Process> = serde_json::from_value(json!([
        {"process_guid": "G-1"},
        {"process_guid": "G-2"},
        {"process_guid": "G-3", "process_cmdline": "unchanged"}
    ]))
    .unwrap();

    enrich_process_cmdlines(&client, &mut processes, &fast_poll())
        .await
        .unwrap();

    assert_eq!(
        processes[0].process_cmdline.as_deref(),
        Some("powershell.exe -nop; -enc AAA")
    );
    assert_eq!(processes[1].process_cmdline.as_deref(), Some("cmd.exe /c whoami"));
    assert_eq!(processes[2].process_cmdline.as_deref(), Some("unchanged"));
}

#[tokio::test]
async fn observation_search_queries_by_alert() {
    let server = MockServer::start().await;
    let client = mock_client(&server);
    let jobs = format!("{BASE}/observations/search_jobs/obs-9");

    Mock::given(method("POST"))
        .and(path(format!("{BASE}/observations/search_jobs")))
        .and(body_partial_json(json!({"query": "alert_id:a-123"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "obs-9"})))
        .expect(1)
        .mount(&server)
        .await;

    mount_job_status(&server, &jobs, 1).await;

    Mock::given(method("GET"))
        .and(path(format!("{jobs}/results")))
        .and(query_param("rows", "10000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [{
                "observation_id": "o-1",
                "alert_id": ["a-123"],
                "observation_type": "CB_ANALYTICS",
                "device_name": "WIN-01"
            }],
            "num_found": 1,
            "num_available": 1,
            "contacted": 10,
            "completed": 10
        })))
        .mount(&server)
        .await;

    let request = observations_for_alert_request("a-123", "-180d");
    let observations = search_observations(&client, &request, usize::MAX, &fast_poll())
        .await
        .unwrap();

    assert_eq!(observations.len(), 1);
    assert_eq!(observations[0].observation_id.as_deref(), Some("o-1"));
    assert_eq!(observations[0].alert_id, Some(json!(["a-123"])));
}

#[tokio::test]
async fn job_that_never_completes_times_out() {
    let server = MockServer::start().await;
    let client = mock_client(&server);

    Mock::given(method("POST"))
        .and(path(format!("{BASE}/processes/search_jobs")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"job_id": "stuck"})))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(format!("{BASE}/processes/search_jobs/stuck/results")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "contacted": 0,
            "completed": 0
        })))
        .expect(4)
        .mount(&server)
        .await;

    let poll = PollConfig {
        max_attempts: 4,
        ..fast_poll()
    };
    let request = process_search_request("*", "-1d");
    let err = search_processes(&client, &request, usize::MAX, &poll)
        .await
        .unwrap_err();
    assert!(
        matches!(err, CbcError::Timeout { attempts: 4, .. }),
        "got {err:?}"
    );
}
