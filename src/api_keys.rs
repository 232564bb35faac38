//! API key (connector) inventory.
//!
//! `appservices/v5/orgs/{org_key}/connectors/find` lists every API key in
//! the org with usage stats, one `fromRow`/`maxRows` page at a time. The
//! export drops the columns that carry secrets or internal ids, lifts the
//! usage counters out of `stats` and renders the epoch-millisecond
//! timestamps as readable UTC datetimes.

use chrono::DateTime;
use serde_json::Value;
use tracing::{info, warn};

use crate::client::CbcClient;
use crate::export::Table;
use crate::flatten::Flattener;
use crate::search::{FindRequest, FindResponse, ResultPage, collect_pages};

const CONNECTOR_SERVICE: &str = "appservices/v5";

/// Page size the console uses for this listing.
const CONNECTOR_PAGE: u32 = 50;

/// Never exported. `apiKey` is the secret itself.
pub const DROPPED_COLUMNS: &[&str] = &["serviceConnector", "sessionId", "apiKey", "orgId"];

/// Nested object whose counters become top-level columns.
const STATS_PREFIX: &str = "stats.";

/// Epoch-millisecond columns rendered as datetimes.
pub const TIME_COLUMNS: &[&str] = &[
    "createTime",
    "lastUpdatedTime",
    "lastReportedTime",
    "sessionStartTime",
];

/// Lists every API key, paging until `totalResults` entries are in hand or
/// the server returns a short page.
pub async fn find_api_keys(client: &CbcClient, org_id: &str) -> crate::error::Result<Vec<Value>> {
    let path = client.org_path(CONNECTOR_SERVICE, "connectors/find");
    let path = path.as_str();
    let entries = collect_pages(0, CONNECTOR_PAGE, usize::MAX, |from_row, max_rows| {
        let request = FindRequest::new(org_id, from_row, max_rows);
        async move {
            client
                .post::<_, FindResponse<Value>>(path, &request)
                .await
                .map(ResultPage::from)
        }
    })
    .await?;
    info!(keys = entries.len(), "API keys listed");
    Ok(entries)
}

/// `1700000000000` → `2023-11-14 22:13:20.000`. Anything that is not an
/// integer in range is left untouched.
pub fn millis_to_datetime(value: &Value) -> Value {
    value
        .as_i64()
        .and_then(DateTime::from_timestamp_millis)
        .map(|dt| Value::String(dt.format("%Y-%m-%d %H:%M:%S%.3f").to_string()))
        .unwrap_or_else(|| value.clone())
}

/// Builds the export table from raw `connectors/find` entries.
pub fn api_key_table(entries: &[Value]) -> crate::error::Result<Table> {
    let mut table = Table::from_records(entries, &Flattener::default())?;
    table.drop_columns(DROPPED_COLUMNS);
    lift_stats(&mut table);
    for column in TIME_COLUMNS {
        table.map_column(column, millis_to_datetime);
    }
    Ok(table)
}

/// `stats.totalRequests` → `totalRequests`. A counter whose bare name is
/// already a column keeps its prefixed name.
fn lift_stats(table: &mut Table) {
    let counters: Vec<String> = table
        .columns()
        .iter()
        .filter_map(|c| c.strip_prefix(STATS_PREFIX).map(str::to_string))
        .collect();
    for name in counters {
        let nested = format!("{STATS_PREFIX}{name}");
        if table.column_index(&name).is_some() {
            warn!(column = %nested, "stats counter clashes with a top-level column, keeping prefix");
            continue;
        }
        table.rename_column(&nested, &name);
    }
}
