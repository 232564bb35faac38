//! Audit log export.
//!
//! `appservices/v5/orgs/{org_id}/auditlog/find` is keyed by the *numeric*
//! org id rather than the org key, and answers at most 10,000 entries per
//! call. Long histories are therefore fetched in [`AUDIT_CHUNK_DAYS`]-day
//! windows and concatenated.

use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use tracing::info;

use crate::chunk::{ChunkOrder, DateWindow, chunk, collect_chunked, trailing_days};
use crate::client::{CbcClient, org_scoped_path};
use crate::search::{FindRequest, FindResponse, MAX_ROWS};

const AUDIT_SERVICE: &str = "appservices/v5";

/// Default window width for chunked audit log exports.
pub const AUDIT_CHUNK_DAYS: u32 = 5;

/// The `find` body for one audit window: every non-verbose entry between
/// the window's bounds, oldest first.
pub fn audit_request(org_id: &str, window: &DateWindow) -> FindRequest {
    FindRequest::new(org_id, 1, MAX_ROWS)
        .criterion("VERBOSE_ENTRIES", json!(["false"]))
        .highlight(false)
        .between(window.start_millis(), window.end_millis())
}

/// Runs one `auditlog/find` request.
pub async fn find_audit_logs(
    client: &CbcClient,
    org_id: &str,
    request: &FindRequest,
) -> crate::error::Result<Vec<Value>> {
    let path = org_scoped_path(AUDIT_SERVICE, org_id, "auditlog/find");
    let response: FindResponse<Value> = client.post(&path, request).await?;
    Ok(response.entries)
}

/// Exports the audit log for the `days` days ending at the next UTC
/// midnight after `now`, in `chunk_days`-day windows.
///
/// Entries come back in window order; a failure on any window fails the
/// whole export.
pub async fn export_audit_log(
    client: &CbcClient,
    org_id: &str,
    days: u32,
    chunk_days: u32,
    now: DateTime<Utc>,
) -> crate::error::Result<Vec<Value>> {
    let (start, end) = trailing_days(days, now)?;
    let windows = chunk(start, end, chunk_days, ChunkOrder::Ascending)?;
    info!(org_id, days, windows = windows.len(), "exporting audit log");

    collect_chunked(&windows, |window| async move {
        find_audit_logs(client, org_id, &audit_request(org_id, &window)).await
    })
    .await
}
