//! Watchlist management (`threathunter/watchlistmgr/v3`).
//!
//! Two jobs live here:
//!
//! - **Expiry**: a watchlist whose description contains a date (e.g.
//!   "Disable after 2026-09-30" or "expires Sep 30, 2026") is disabled once
//!   that date has passed. Disabling means a PUT of the same watchlist with
//!   `tags_enabled: false`.
//! - **Export**: every watchlist is flattened into its own sheet, with the
//!   contents of each referenced report alongside its id.

use std::collections::HashMap;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::client::CbcClient;
use crate::export::{Table, Workbook};
use crate::flatten::{CollisionPolicy, Flattener};

const WATCHLIST_SERVICE: &str = "threathunter/watchlistmgr/v3";

/// `2026-09-30`, `09/30/2026`, `Sep 30, 2026`, `September 30 2026`,
/// `30 Sep 2026`. Slashed dates are month first.
static EXPIRY_DATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)
        \b(?:
            (?P<iso_y>\d{4})-(?P<iso_m>\d{1,2})-(?P<iso_d>\d{1,2})
          | (?P<us_m>\d{1,2})/(?P<us_d>\d{1,2})/(?P<us_y>\d{4})
          | (?P<md_mon>[a-z]{3,9})\.?\s+(?P<md_d>\d{1,2})(?:st|nd|rd|th)?,?\s+(?P<md_y>\d{4})
          | (?P<dm_d>\d{1,2})(?:st|nd|rd|th)?\s+(?P<dm_mon>[a-z]{3,9})\.?,?\s+(?P<dm_y>\d{4})
        )\b",
    )
    .expect("expiry date pattern is a valid regex")
});

/// A watchlist as returned by the list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Watchlist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Whether hits on this watchlist are tagged; `false` means disabled.
    #[serde(default)]
    pub tags_enabled: bool,
    #[serde(default)]
    pub report_ids: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct WatchlistList {
    #[serde(default)]
    results: Vec<Watchlist>,
}

/// PUT body for `watchlists/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WatchlistUpdate {
    pub name: String,
    pub description: String,
    pub tags_enabled: bool,
    pub report_ids: Vec<String>,
}

impl WatchlistUpdate {
    /// The body that disables `watchlist` and leaves everything else as is.
    pub fn disable(watchlist: &Watchlist) -> Self {
        WatchlistUpdate {
            name: watchlist.name.clone(),
            description: watchlist.description.clone(),
            tags_enabled: false,
            report_ids: watchlist.report_ids.clone(),
        }
    }
}

/// What `disable_expired` did with one watchlist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisableOutcome {
    /// The description has no date.
    NoExpiry,
    /// The date is today or later.
    NotExpired { expires: NaiveDate },
    /// Expired but `tags_enabled` was already false.
    AlreadyDisabled { expires: NaiveDate },
    /// Expired and successfully disabled.
    Disabled { expires: NaiveDate },
    /// Expired, but the update request failed.
    Failed { expires: NaiveDate, error: String },
}

/// Per-watchlist result of [`disable_expired`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchlistOutcome {
    pub id: String,
    pub name: String,
    pub outcome: DisableOutcome,
}

/// First real calendar date in `description`, in any of the forms
/// [`EXPIRY_DATE`] recognises.
///
/// Matches that are not real dates (`2026-02-30`, `02/30/2026`,
/// `Foo 3, 2026`) are skipped, and scanning resumes one character into the
/// rejected match so a date it overlapped is still found.
pub fn expiry_date(description: &str) -> Option<NaiveDate> {
    let mut at = 0;
    while let Some(caps) = EXPIRY_DATE.captures_at(description, at) {
        if let Some(date) = captured_date(&caps) {
            return Some(date);
        }
        let start = caps.get(0)?.start();
        let step = description[start..].chars().next().map_or(1, char::len_utf8);
        at = start + step;
    }
    None
}

fn captured_date(caps: &Captures<'_>) -> Option<NaiveDate> {
    let num = |name: &str| caps.name(name)?.as_str().parse::<u32>().ok();
    if let (Some(y), Some(m), Some(d)) = (caps.name("iso_y"), num("iso_m"), num("iso_d")) {
        return NaiveDate::from_ymd_opt(y.as_str().parse().ok()?, m, d);
    }
    if let (Some(y), Some(m), Some(d)) = (caps.name("us_y"), num("us_m"), num("us_d")) {
        return NaiveDate::from_ymd_opt(y.as_str().parse().ok()?, m, d);
    }
    let (month, day, year) = match (caps.name("md_mon"), caps.name("dm_mon")) {
        (Some(mon), _) => (mon, caps.name("md_d")?, caps.name("md_y")?),
        (None, Some(mon)) => (mon, caps.name("dm_d")?, caps.name("dm_y")?),
        (None, None) => return None,
    };
    named_month_date(month.as_str(), day.as_str(), year.as_str())
}

/// Accepts full and three-letter month names in any case, plus `Sept`.
fn named_month_date(month: &str, day: &str, year: &str) -> Option<NaiveDate> {
    let parse = |mon: &str| NaiveDate::parse_from_str(&format!("{day} {mon} {year}"), "%d %B %Y").ok();
    parse(month).or_else(|| month.get(..3).and_then(parse))
}

pub async fn list_watchlists(client: &CbcClient) -> crate::error::Result<Vec<Watchlist>> {
    let path = client.org_path(WATCHLIST_SERVICE, "watchlists");
    let list: WatchlistList = client.get(&path).await?;
    Ok(list.results)
}

pub async fn get_report(client: &CbcClient, report_id: &str) -> crate::error::Result<Value> {
    let path = client.org_path(WATCHLIST_SERVICE, &format!("reports/{report_id}"));
    client.get(&path).await
}

pub async fn update_watchlist(
    client: &CbcClient,
    watchlist_id: &str,
    update: &WatchlistUpdate,
) -> crate::error::Result<Value> {
    let path = client.org_path(WATCHLIST_SERVICE, &format!("watchlists/{watchlist_id}"));
    client.put(&path, update).await
}

/// Disables every enabled watchlist whose expiry date is before `today`.
///
/// A failed update is recorded as [`DisableOutcome::Failed`] and the
/// remaining watchlists are still processed. Only the initial listing
/// can fail the whole call.
pub async fn disable_expired(
    client: &CbcClient,
    today: NaiveDate,
) -> crate::error::Result<Vec<WatchlistOutcome>> {
    let watchlists = list_watchlists(client).await?;
    let mut outcomes = Vec::with_capacity(watchlists.len());

    for wl in watchlists {
        let outcome = match expiry_date(&wl.description) {
            None => DisableOutcome::NoExpiry,
            Some(expires) if today <= expires => DisableOutcome::NotExpired { expires },
            Some(expires) if !wl.tags_enabled => DisableOutcome::AlreadyDisabled { expires },
            Some(expires) => {
                match update_watchlist(client, &wl.id, &WatchlistUpdate::disable(&wl)).await {
                    Ok(_) => {
                        info!(id = %wl.id, name = %wl.name, %expires, "watchlist disabled");
                        DisableOutcome::Disabled { expires }
                    }
                    Err(e) => {
                        warn!(id = %wl.id, name = %wl.name, error = %e, "failed to disable watchlist");
                        DisableOutcome::Failed {
                            expires,
                            error: e.to_string(),
                        }
                    }
                }
            }
        };
        outcomes.push(WatchlistOutcome {
            id: wl.id,
            name: wl.name,
            outcome,
        });
    }
    Ok(outcomes)
}

/// Column holding the flattened contents of a referenced report.
pub const REPORT_DATA_COLUMN: &str = "report-data";

/// One `name` / `value` / `report-data` table per watchlist.
///
/// Watchlists are flattened with `_` as separator. Rows whose key is a
/// `report_ids_N` entry get the flattened report as a JSON string in
/// `report-data`. Reports are fetched once each; a report that cannot be
/// fetched leaves its cell empty.
pub async fn watchlist_tables(client: &CbcClient) -> crate::error::Result<Vec<(String, Table)>> {
    let watchlists = list_watchlists(client).await?;
    let flattener = Flattener::new("_", CollisionPolicy::LastWriteWins);
    let mut reports: HashMap<String, Option<String>> = HashMap::new();
    let mut tables = Vec::with_capacity(watchlists.len());

    for (i, wl) in watchlists.iter().enumerate() {
        let flat = flattener.flatten(&serde_json::to_value(wl)?)?;
        let mut rows = Vec::with_capacity(flat.len());
        for (key, value) in flat {
            let mut report_data = String::new();
            if key.starts_with("report_ids_") {
                if let Some(report_id) = value.as_str() {
                    if !reports.contains_key(report_id) {
                        let data = match get_report(client, report_id).await {
                            Ok(report) => Some(serde_json::to_string(&flattener.flatten(&report)?)?),
                            Err(e) => {
                                warn!(report_id, error = %e, "could not fetch report");
                                None
                            }
                        };
                        reports.insert(report_id.to_string(), data);
                    }
                    report_data = reports.get(report_id).cloned().flatten().unwrap_or_default();
                }
            }
            let mut row = Map::new();
            row.insert("name".to_string(), Value::String(key));
            row.insert("value".to_string(), value);
            row.insert(REPORT_DATA_COLUMN.to_string(), Value::String(report_data));
            rows.push(row);
        }
        tables.push((format!("watchlist{i}"), Table::from_flat_rows(rows)));
    }
    info!(watchlists = tables.len(), reports = reports.len(), "watchlists collected");
    Ok(tables)
}

/// Builds the watchlist workbook: one sheet per watchlist.
pub async fn export_watchlists(client: &CbcClient) -> crate::error::Result<Workbook> {
    let mut workbook = Workbook::new();
    for (name, table) in watchlist_tables(client).await? {
        workbook.add_table_sheet(&name, &table)?;
    }
    Ok(workbook)
}
