//! Device inventory search.
//!
//! - [`search_devices`]: one page from `appservices/v6/orgs/{org}/devices/_search`.
//! - [`search_all_devices`]: every page, walking past the 10,000-row cap.
//!
//! [`Device`] models the handful of fields the CLI reports on; everything
//! else the API returns is kept in `extra` so exports lose nothing.
//!
//! Permission: `device` / READ.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use crate::client::CbcClient;
use crate::search::{MAX_ROWS, ResultPage, SearchRequest, SortField, search_all};

const DEVICE_SERVICE: &str = "appservices/v6";

/// An enrolled sensor as returned by device search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    /// Numeric device id.
    pub id: i64,

    #[serde(default)]
    pub name: Option<String>,

    /// `WINDOWS`, `MAC`, `LINUX`, ...
    #[serde(default)]
    pub os: Option<String>,

    /// `REGISTERED`, `DEREGISTERED`, `BYPASS`, ...
    #[serde(default)]
    pub status: Option<String>,

    /// `ENDPOINT`, `WORKLOAD`, `VDI`.
    #[serde(default)]
    pub deployment_type: Option<String>,

    #[serde(default)]
    pub last_contact_time: Option<String>,

    #[serde(default)]
    pub policy_name: Option<String>,

    #[serde(default)]
    pub device_owner_id: Option<i64>,

    /// Every other field returned by the API.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The inventory query used by the `devices` export: every endpoint,
/// workload and VDI sensor, most recently seen first.
pub fn export_devices_request() -> SearchRequest {
    SearchRequest::new()
        .criterion("deployment_type", json!(["ENDPOINT", "WORKLOAD", "VDI"]))
        .sort(SortField::desc("last_contact_time"))
        .page(0, MAX_ROWS)
}

/// Runs one device search request.
pub async fn search_devices(
    client: &CbcClient,
    request: &SearchRequest,
) -> crate::error::Result<ResultPage<Device>> {
    let path = client.org_path(DEVICE_SERVICE, "devices/_search");
    client.post(&path, request).await
}

/// Runs a device search and follows pagination up to `max_rows`.
pub async fn search_all_devices(
    client: &CbcClient,
    request: &SearchRequest,
    max_rows: usize,
) -> crate::error::Result<Vec<Device>> {
    let path = client.org_path(DEVICE_SERVICE, "devices/_search");
    search_all(client, &path, request, max_rows).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_keeps_unmodelled_fields() {
        let json = r#"{
            "id": 1234567,
            "name": "WIN-HOST-01",
            "os": "WINDOWS",
            "status": "REGISTERED",
            "deployment_type": "ENDPOINT",
            "last_contact_time": "2026-10-18T22:14:03.123Z",
            "device_owner_id": 88,
            "sensor_version": "3.9.1.2451",
            "vulnerability_score": 7.5
        }"#;
        let device: Device = serde_json::from_str(json).unwrap();
        assert_eq!(device.id, 1234567);
        assert_eq!(device.name.as_deref(), Some("WIN-HOST-01"));
        assert_eq!(device.device_owner_id, Some(88));
        assert_eq!(device.extra["sensor_version"], "3.9.1.2451");

        let back = serde_json::to_value(&device).unwrap();
        assert_eq!(back["vulnerability_score"], 7.5, "extra fields survive re-serialization");
    }

    #[test]
    fn minimal_device_deserializes() {
        let device: Device = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert!(device.name.is_none());
        assert!(device.extra.is_empty());
    }

    #[test]
    fn export_request_targets_all_deployment_types() {
        let json = serde_json::to_value(export_devices_request()).unwrap();
        assert_eq!(json["criteria"]["deployment_type"], json!(["ENDPOINT", "WORKLOAD", "VDI"]));
        assert_eq!(json["sort"][0]["field"], "last_contact_time");
        assert_eq!(json["rows"], 10_000);
    }
}
