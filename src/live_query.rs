//! Live Query differential analysis.
//!
//! Compares two runs of the same query and reports what changed per
//! device. The endpoint requires the `X-Org` header.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::client::CbcClient;

const LIVE_QUERY_SERVICE: &str = "livequery/v1";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DifferentialRequest {
    pub count_only: bool,
    pub newer_run_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub older_run_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DifferentialResponse {
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(default)]
    pub num_found: u64,
}

/// Runs a differential search between `newer_run_id` and `older_run_id`.
///
/// Without `older_run_id` the server compares against the previous run.
pub async fn differential_search(
    client: &CbcClient,
    newer_run_id: &str,
    older_run_id: Option<&str>,
    count_only: bool,
) -> crate::error::Result<DifferentialResponse> {
    let path = client.org_path(LIVE_QUERY_SERVICE, "differential/runs/_search");
    let body = DifferentialRequest {
        count_only,
        newer_run_id: newer_run_id.to_string(),
        older_run_id: older_run_id.map(str::to_string),
    };
    client.post(&path, &body).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_missing_older_run() {
        let body = DifferentialRequest {
            count_only: true,
            newer_run_id: "new".to_string(),
            older_run_id: None,
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"count_only": true, "newer_run_id": "new"})
        );
    }
}
