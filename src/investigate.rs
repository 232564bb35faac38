//! Investigate API: asynchronous process and observation search jobs.
//!
//! Every search here is a three-step flow:
//!
//! 1. POST the query to `.../search_jobs` (or `.../detail_jobs`), which
//!    answers with a `job_id`.
//! 2. GET `.../{job_id}/results?rows=0` until the job has heard back from
//!    every backend shard it contacted (`contacted > 0 && completed >= contacted`).
//! 3. GET `.../{job_id}/results?start=N&rows=M` page by page.
//!
//! Reading results before step 2 finishes returns a partial result set,
//! so nothing here ever skips the poll.
//!
//! Permissions: `org.search.events` / CREATE, READ.

use serde::{Deserialize, Deserializer, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::client::CbcClient;
use crate::poll::{JobStatus, PollConfig, Progress, counts_complete, submit_and_poll};
use crate::search::{MAX_ROWS, ResultPage, SearchRequest, SortField, TimeRange, collect_pages};

const INVESTIGATE_SERVICE: &str = "api/investigate/v2";

/// Processes per detail job when enriching command lines.
const DETAIL_BATCH: usize = 100;

// ── Wire types ─────────────────────────────────────────────────────────

/// Response to a job submission.
#[derive(Debug, Deserialize)]
pub struct JobHandle {
    pub job_id: String,
}

/// Status and (possibly partial) results of a search or detail job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchJobResults<T> {
    #[serde(default = "Vec::new")]
    pub results: Vec<T>,
    #[serde(default)]
    pub num_found: u64,
    #[serde(default)]
    pub num_available: u64,
    /// Backend shards the job was sent to.
    #[serde(default)]
    pub contacted: u64,
    /// Shards that have answered.
    #[serde(default)]
    pub completed: u64,
}

impl<T> JobStatus for SearchJobResults<T> {
    fn progress(&self) -> Progress {
        counts_complete(self.contacted, self.completed).into()
    }
}

impl<T> From<SearchJobResults<T>> for ResultPage<T> {
    fn from(job: SearchJobResults<T>) -> Self {
        ResultPage {
            results: job.results,
            num_found: job.num_found,
            num_available: Some(job.num_available),
        }
    }
}

/// A process record. `process_cmdline` is absent from search results
/// unless requested, and is a list on the wire; it is joined into one string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Process {
    pub process_guid: String,
    #[serde(default)]
    pub device_id: Option<i64>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub process_name: Option<String>,
    #[serde(
        default,
        deserialize_with = "string_or_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub process_cmdline: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An observation (alert evidence record).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    #[serde(default)]
    pub observation_id: Option<String>,
    #[serde(default)]
    pub alert_id: Option<Value>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub observation_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_list<'de, D: Deserializer<'de>>(de: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(de)? {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s),
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
                .collect::<Vec<_>>()
                .join("; "),
        ),
        Some(other) => Some(other.to_string()),
    })
}

// ── Request builders ───────────────────────────────────────────────────

/// Process search over a relative window, oldest first, all fields.
pub fn process_search_request(query: &str, window: &str) -> SearchRequest {
    SearchRequest::new()
        .query(query)
        .fields(&["*"])
        .sort(SortField::asc("device_timestamp"))
        .time_range(TimeRange::window(window))
        .page(0, MAX_ROWS)
}

/// Observation search for everything attached to one alert.
pub fn observations_for_alert_request(alert_id: &str, window: &str) -> SearchRequest {
    SearchRequest::new()
        .query(&format!("alert_id:{alert_id}"))
        .time_range(TimeRange::window(window))
        .sort(SortField::desc("device_timestamp"))
        .page(0, MAX_ROWS)
}

/// Columns kept by the `processes` export.
pub const PROCESS_EXPORT_COLUMNS: &[&str] = &[
    "process_guid",
    "backend_timestamp",
    "device_id",
    "device_name",
    "device_policy_id",
    "process_name",
    "process_username",
    "process_cmdline",
];

// ── Generic job runner ─────────────────────────────────────────────────

/// Submits a job to `{kind}/{jobs}` and returns its id.
async fn submit<B: Serialize + ?Sized>(
    client: &CbcClient,
    kind: &str,
    jobs: &str,
    body: &B,
) -> crate::error::Result<String> {
    let path = client.org_path(INVESTIGATE_SERVICE, &format!("{kind}/{jobs}"));
    let handle: JobHandle = client.post(&path, body).await?;
    debug!(kind, jobs, job_id = %handle.job_id, "submitted investigate job");
    Ok(handle.job_id)
}

/// Fetches one results page of a job.
pub async fn job_results<T: DeserializeOwned>(
    client: &CbcClient,
    kind: &str,
    jobs: &str,
    job_id: &str,
    start: u32,
    rows: u32,
) -> crate::error::Result<SearchJobResults<T>> {
    let path = client.org_path(INVESTIGATE_SERVICE, &format!("{kind}/{jobs}/{job_id}/results"));
    client
        .get_query(&path, &[("start", start), ("rows", rows)])
        .await
}

/// Submits a job, waits for every contacted shard to answer, then pages
/// through its results.
async fn run_job<T: DeserializeOwned, B: Serialize + ?Sized>(
    client: &CbcClient,
    kind: &str,
    jobs: &str,
    body: &B,
    page_size: u32,
    max_rows: usize,
    poll: &PollConfig,
) -> crate::error::Result<Vec<T>> {
    let (job_id, done) = submit_and_poll(
        poll,
        || submit(client, kind, jobs, body),
        |job_id| async move { job_results::<Value>(client, kind, jobs, &job_id, 0, 0).await },
        |status: &SearchJobResults<Value>| status.progress(),
    )
    .await?;
    info!(
        job_id = %job_id,
        num_found = done.num_found,
        num_available = done.num_available,
        "search job complete"
    );

    let job_id = job_id.as_str();
    collect_pages(0, page_size, max_rows, |start, rows| async move {
        let page = job_results::<T>(client, kind, jobs, job_id, start, rows).await?;
        Ok(ResultPage::from(page))
    })
    .await
}

// ── Processes ──────────────────────────────────────────────────────────

/// Runs a process search to completion and returns up to `max_rows` processes.
pub async fn search_processes(
    client: &CbcClient,
    request: &SearchRequest,
    max_rows: usize,
    poll: &PollConfig,
) -> crate::error::Result<Vec<Process>> {
    let rows = request.rows.unwrap_or(MAX_ROWS);
    run_job(client, "processes", "search_jobs", request, rows, max_rows, poll).await
}

/// Runs a detail job for the given process GUIDs.
pub async fn process_details(
    client: &CbcClient,
    process_guids: &[String],
    poll: &PollConfig,
) -> crate::error::Result<Vec<Process>> {
    let body = json!({ "process_guids": process_guids });
    run_job(
        client,
        "processes",
        "detail_jobs",
        &body,
        MAX_ROWS,
        usize::MAX,
        poll,
    )
    .await
}

/// Fills `process_cmdline` on every process from detail jobs, batching
/// GUIDs. Processes the detail job does not return are left unchanged
/// and logged.
pub async fn enrich_process_cmdlines(
    client: &CbcClient,
    processes: &mut [Process],
    poll: &PollConfig,
) -> crate::error::Result<()> {
    for (batch_no, batch) in processes.chunks_mut(DETAIL_BATCH).enumerate() {
        let guids: Vec<String> = batch.iter().map(|p| p.process_guid.clone()).collect();
        let details = process_details(client, &guids, poll).await?;
        for process in batch.iter_mut() {
            match details.iter().find(|d| d.process_guid == process.process_guid) {
                Some(detail) => process.process_cmdline = detail.process_cmdline.clone(),
                None => warn!(guid = %process.process_guid, "no detail returned for process"),
            }
        }
        info!(batch = batch_no, size = batch.len(), "process details enriched");
    }
    Ok(())
}

// ── Observations ───────────────────────────────────────────────────────

/// Runs an observation search to completion.
pub async fn search_observations(
    client: &CbcClient,
    request: &SearchRequest,
    max_rows: usize,
    poll: &PollConfig,
) -> crate::error::Result<Vec<Observation>> {
    let rows = request.rows.unwrap_or(MAX_ROWS);
    run_job(client, "observations", "search_jobs", request, rows, max_rows, poll).await
}
