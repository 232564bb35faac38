//! USB device inventory (Device Control v3).
//!
//! The export is a workbook: a `Summary` sheet with one row per USB device
//! (`id` renamed to `usb_id`), followed by one `device{N}` sheet per device
//! listing the flattened endpoints that device has been seen on.

use serde_json::Value;
use tracing::info;

use crate::client::CbcClient;
use crate::export::{Table, Workbook};
use crate::flatten::{CollisionPolicy, Flattener};
use crate::search::{MAX_ROWS, ResultPage, SearchRequest, SortField};

const DEVICE_CONTROL_SERVICE: &str = "device_control/v3";

/// Every USB device, most recently seen first.
pub fn usb_devices_request() -> SearchRequest {
    SearchRequest::new()
        .query("")
        .sort(SortField::desc("last_seen"))
        .page(0, MAX_ROWS)
}

pub async fn search_usb_devices(
    client: &CbcClient,
    request: &SearchRequest,
) -> crate::error::Result<ResultPage<Value>> {
    let path = client.org_path(DEVICE_CONTROL_SERVICE, "devices/_search");
    client.post(&path, request).await
}

/// Endpoints a USB device has been connected to.
pub async fn get_usb_device_endpoints(
    client: &CbcClient,
    usb_id: &str,
) -> crate::error::Result<Value> {
    let path = client.org_path(DEVICE_CONTROL_SERVICE, &format!("devices/{usb_id}/endpoints"));
    client.get(&path).await
}

/// The `Summary` sheet contents.
pub fn summary_table(devices: &[Value]) -> crate::error::Result<Table> {
    let mut table = Table::from_records(devices, &Flattener::default())?;
    table.rename_column("id", "usb_id");
    Ok(table)
}

fn usb_id(device: &Value) -> Option<String> {
    match device.get("id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Builds the USB device workbook.
pub async fn export_usb_devices(client: &CbcClient) -> crate::error::Result<Workbook> {
    let page = search_usb_devices(client, &usb_devices_request()).await?;
    info!(devices = page.results.len(), found = page.num_found, "USB devices found");

    let mut workbook = Workbook::new();
    workbook.add_table_sheet("Summary", &summary_table(&page.results)?)?;

    let flattener = Flattener::new("_", CollisionPolicy::LastWriteWins);
    for (i, device) in page.results.iter().enumerate() {
        let Some(id) = usb_id(device) else {
            tracing::warn!(index = i, "USB device without id, skipping endpoints");
            continue;
        };
        let endpoints = get_usb_device_endpoints(client, &id).await?;
        let flat = flattener.flatten(&endpoints)?;
        workbook.add_key_value_sheet(&format!("device{i}"), &flat, "value")?;
    }
    Ok(workbook)
}
