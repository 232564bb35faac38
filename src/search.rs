//! Search request bodies, result pages, and start/rows pagination.
//!
//! The v6/v7 `_search` endpoints share one request shape: free-text
//! `query`, structured `criteria`, a `time_range`, a `start`/`rows` window
//! and a `sort` list. They answer with a [`ResultPage`]. A single page is
//! capped at [`MAX_ROWS`]; [`collect_pages`] walks past that cap.

use std::future::Future;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::debug;

use crate::client::CbcClient;
use crate::error::Result;

/// Server-side ceiling on `rows` for a single search request.
pub const MAX_ROWS: u32 = 10_000;

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// One entry of the `sort` list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortField {
    pub field: String,
    pub order: SortOrder,
}

impl SortField {
    pub fn asc(field: &str) -> Self {
        SortField {
            field: field.to_string(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: &str) -> Self {
        SortField {
            field: field.to_string(),
            order: SortOrder::Desc,
        }
    }
}

/// The `time_range` object: either the whole retention period or a
/// relative window such as `-30d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeRange {
    /// `{"range": "all"}` (or any other named range).
    Range { range: String },
    /// `{"window": "-30d"}`.
    Window { window: String },
}

impl TimeRange {
    pub fn all() -> Self {
        TimeRange::Range {
            range: "all".to_string(),
        }
    }

    pub fn window(window: &str) -> Self {
        TimeRange::Window {
            window: window.to_string(),
        }
    }
}

/// Request body shared by the `_search` and `search_jobs` endpoints.
///
/// Unset fields are omitted from the serialized JSON.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub criteria: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub sort: Vec<SortField>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, query: &str) -> Self {
        self.query = Some(query.to_string());
        self
    }

    pub fn criterion(mut self, key: &str, value: Value) -> Self {
        self.criteria.insert(key.to_string(), value);
        self
    }

    pub fn time_range(mut self, range: TimeRange) -> Self {
        self.time_range = Some(range);
        self
    }

    pub fn fields(mut self, fields: &[&str]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.to_string()).collect());
        self
    }

    pub fn sort(mut self, field: SortField) -> Self {
        self.sort.push(field);
        self
    }

    /// Sets the `start`/`rows` window. `rows` is clamped to [`MAX_ROWS`].
    pub fn page(mut self, start: u32, rows: u32) -> Self {
        self.start = Some(start);
        self.rows = Some(rows.min(MAX_ROWS));
        self
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultPage<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    /// Total matches on the server.
    #[serde(default)]
    pub num_found: u64,
    /// Matches retrievable through paging (may be lower than `num_found`).
    #[serde(default)]
    pub num_available: Option<u64>,
}

impl<T> ResultPage<T> {
    fn available(&self) -> u64 {
        self.num_available.unwrap_or(self.num_found)
    }
}

/// Collects results page by page.
///
/// `fetch(start, rows)` is called with `start` beginning at `first_start`
/// (0 or 1 depending on the endpoint) and advancing by the number of rows
/// actually returned. Paging stops on a short page, an empty page, once
/// `num_available` rows are in hand, or once `max_rows` are collected.
pub async fn collect_pages<T, F, Fut>(
    first_start: u32,
    page_size: u32,
    max_rows: usize,
    mut fetch: F,
) -> Result<Vec<T>>
where
    F: FnMut(u32, u32) -> Fut,
    Fut: Future<Output = Result<ResultPage<T>>>,
{
    let page_size = page_size.clamp(1, MAX_ROWS);
    let mut all: Vec<T> = Vec::new();
    let mut start = first_start;

    while all.len() < max_rows {
        let remaining = u32::try_from(max_rows - all.len()).unwrap_or(u32::MAX);
        let rows = page_size.min(remaining);
        let page = fetch(start, rows).await?;
        let available = page.available();
        let got = page.results.len();
        debug!(start, rows, got, available, "fetched page");

        all.extend(page.results);
        if got == 0 || got < rows as usize || all.len() as u64 >= available {
            break;
        }
        start = start.saturating_add(got as u32);
    }

    all.truncate(max_rows);
    Ok(all)
}

/// POSTs `request` to a `_search` endpoint page by page.
///
/// Paging starts at `request.start` (default 0) with `request.rows`
/// (default [`MAX_ROWS`]) per page.
pub async fn search_all<T: DeserializeOwned>(
    client: &CbcClient,
    path: &str,
    request: &SearchRequest,
    max_rows: usize,
) -> Result<Vec<T>> {
    let first = request.start.unwrap_or(0);
    let page_size = request.rows.unwrap_or(MAX_ROWS);
    collect_pages(first, page_size, max_rows, |start, rows| {
        let req = request.clone().page(start, rows);
        async move { client.post::<_, ResultPage<T>>(path, &req).await }
    })
    .await
}

/// Sort clause of the v5 `find` APIs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SortDefinition {
    pub field_name: String,
    pub sort_order: SortOrder,
}

/// Request body of the older v5 `.../find` endpoints (audit log, API keys).
///
/// These use camelCase keys, `fromRow`/`maxRows` paging and epoch-millisecond
/// `startTime`/`endTime` bounds instead of a `time_range` object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindRequest {
    pub from_row: u32,
    pub max_rows: u32,
    pub search_window: String,
    pub sort_definition: SortDefinition,
    #[serde(skip_serializing_if = "Map::is_empty", default)]
    pub criteria: Map<String, Value>,
    pub org_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
}

impl FindRequest {
    /// Everything in the retention period, oldest first.
    pub fn new(org_id: &str, from_row: u32, max_rows: u32) -> Self {
        FindRequest {
            from_row,
            max_rows: max_rows.min(MAX_ROWS),
            search_window: "ALL".to_string(),
            sort_definition: SortDefinition {
                field_name: "TIME".to_string(),
                sort_order: SortOrder::Asc,
            },
            criteria: Map::new(),
            org_id: org_id.to_string(),
            highlight: None,
            start_time: None,
            end_time: None,
        }
    }

    pub fn criterion(mut self, key: &str, value: Value) -> Self {
        self.criteria.insert(key.to_string(), value);
        self
    }

    pub fn highlight(mut self, on: bool) -> Self {
        self.highlight = Some(on.to_string());
        self
    }

    /// Bounds the search to `[start_ms, end_ms]`.
    pub fn between(mut self, start_ms: i64, end_ms: i64) -> Self {
        self.start_time = Some(start_ms);
        self.end_time = Some(end_ms);
        self
    }
}

/// Response of the v5 `find` endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindResponse<T> {
    #[serde(default = "Vec::new")]
    pub entries: Vec<T>,
    #[serde(default)]
    pub total_results: Option<u64>,
}

/// Lets [`collect_pages`] drive the `fromRow`/`maxRows` endpoints. Without
/// `totalResults` only a short page ends the paging.
impl<T> From<FindResponse<T>> for ResultPage<T> {
    fn from(response: FindResponse<T>) -> Self {
        ResultPage {
            results: response.entries,
            num_found: response.total_results.unwrap_or(u64::MAX),
            num_available: response.total_results,
        }
    }
}
