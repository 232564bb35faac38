//! Alert search (Alerts v7 API).
//!
//! `api/alerts/v7/orgs/{org}/alerts/_search` returns at most 10,000 alerts
//! per request. [`search_all_alerts`] pages through the rest.
//!
//! Permission: `org.alerts` / READ.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::client::CbcClient;
use crate::search::{MAX_ROWS, ResultPage, SearchRequest, SortField, TimeRange, search_all};

const ALERT_SERVICE: &str = "api/alerts/v7";

/// A v7 alert. Unmodelled fields are kept in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,

    /// `CB_ANALYTICS`, `WATCHLIST`, `DEVICE_CONTROL`, ...
    #[serde(rename = "type", default)]
    pub alert_type: Option<String>,

    /// 1 (lowest) to 10.
    #[serde(default)]
    pub severity: Option<i64>,

    #[serde(default)]
    pub reason: Option<String>,

    #[serde(default)]
    pub device_id: Option<i64>,

    #[serde(default)]
    pub device_name: Option<String>,

    #[serde(default)]
    pub backend_timestamp: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The query behind the `alerts` export: every alert in the retention
/// period with severity >= `minimum_severity`, most severe first.
pub fn export_alerts_request(minimum_severity: u8) -> SearchRequest {
    SearchRequest::new()
        .time_range(TimeRange::all())
        .criterion("minimum_severity", json!(minimum_severity))
        .sort(SortField::desc("severity"))
        .page(1, MAX_ROWS)
}

/// Runs one alert search request.
pub async fn search_alerts(
    client: &CbcClient,
    request: &SearchRequest,
) -> crate::error::Result<ResultPage<Alert>> {
    let path = client.org_path(ALERT_SERVICE, "alerts/_search");
    client.post(&path, request).await
}

/// Runs an alert search and follows pagination up to `max_rows`.
pub async fn search_all_alerts(
    client: &CbcClient,
    request: &SearchRequest,
    max_rows: usize,
) -> crate::error::Result<Vec<Alert>> {
    let path = client.org_path(ALERT_SERVICE, "alerts/_search");
    search_all(client, &path, request, max_rows).await
}
