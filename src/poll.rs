//! Job polling for asynchronous Carbon Black Cloud operations.
//!
//! Several API families share the same shape:
//!
//! 1. **Submit** a request that returns a job (or session, or command) id.
//! 2. **Poll** a status endpoint until the server says the work is done.
//! 3. **Consume** the final status payload, which usually carries the results.
//!
//! Investigate search jobs report progress as `contacted` / `completed`
//! shard counts; live response sessions and commands report a `status`
//! string. Both are expressed here as a caller-supplied check returning
//! [`Progress`], so a single bounded loop serves all of them.
//!
//! The loop is bounded twice: by attempt count and by wall-clock timeout.
//! Whichever trips first produces `CbcError::Timeout`; a stuck job never
//! spins forever.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{CbcError, Result};

/// Outcome of inspecting one status payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// Not finished yet; poll again after the interval.
    Pending,
    /// Finished; the payload that produced this is the final status.
    Done,
    /// The server reported a terminal failure.
    Failed(String),
}

impl From<bool> for Progress {
    fn from(done: bool) -> Self {
        if done { Progress::Done } else { Progress::Pending }
    }
}

/// Status payloads that know how to classify themselves.
pub trait JobStatus {
    /// Classifies this payload for the polling loop.
    fn progress(&self) -> Progress;
}

/// Completion predicate for `contacted` / `completed` counters.
///
/// A job that has contacted nothing yet (`0 / 0`) has not started, so it
/// is *not* complete even though the two counts are equal.
pub fn counts_complete(contacted: u64, completed: u64) -> bool {
    contacted > 0 && completed >= contacted
}

/// Controls how long and how often a job is polled.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Delay between consecutive status requests.
    pub interval: Duration,
    /// Maximum wall-clock time spent polling, measured from the first request.
    pub timeout: Duration,
    /// Maximum number of status requests. Values below 1 are treated as 1.
    pub max_attempts: u32,
}

impl PollConfig {
    /// Creates a config with the given interval and timeout and an attempt
    /// bound derived from them.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        let per = interval.as_millis().max(1);
        let attempts = (timeout.as_millis() / per).saturating_add(1);
        PollConfig {
            interval,
            timeout,
            max_attempts: u32::try_from(attempts).unwrap_or(u32::MAX),
        }
    }

    /// Overrides the attempt bound.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(600),
            max_attempts: 120,
        }
    }
}

/// Calls `status_fn` until `check` reports [`Progress::Done`].
///
/// Exactly one `status_fn` call is made per iteration. The first call is
/// immediate; later calls are separated by `config.interval`.
///
/// # Errors
///
/// - `CbcError::Timeout` when `max_attempts` requests have been made, or the
///   timeout has elapsed, without reaching a terminal state.
/// - `CbcError::JobFailed` when `check` returns [`Progress::Failed`].
/// - Any error returned by `status_fn` is propagated unchanged.
pub async fn poll_until<S, F, Fut, P>(
    job_id: &str,
    config: &PollConfig,
    mut status_fn: F,
    mut check: P,
) -> Result<S>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<S>>,
    P: FnMut(&S) -> Progress,
{
    let max_attempts = config.max_attempts.max(1);
    let started = Instant::now();
    let mut attempts: u32 = 0;

    loop {
        if attempts > 0 {
            if attempts < max_attempts {
                tokio::time::sleep(config.interval).await;
            }
            // Checked after the sleep so we never send a request we already
            // know we cannot wait for.
            if attempts >= max_attempts || started.elapsed() >= config.timeout {
                return Err(CbcError::Timeout {
                    job_id: job_id.to_string(),
                    attempts,
                    elapsed: started.elapsed(),
                });
            }
        }

        attempts += 1;
        let status = status_fn().await?;
        match check(&status) {
            Progress::Done => {
                debug!(job_id, attempts, "job complete");
                return Ok(status);
            }
            Progress::Failed(reason) => {
                return Err(CbcError::JobFailed {
                    job_id: job_id.to_string(),
                    reason,
                });
            }
            Progress::Pending => trace!(job_id, attempts, "job still pending"),
        }
    }
}

/// Submits a job once, then polls it to completion.
///
/// `submit` returns the job id; `status_fn` receives that id on every
/// iteration. Returns the job id together with its final status.
pub async fn submit_and_poll<S, SF, SFut, F, Fut, P>(
    config: &PollConfig,
    submit: SF,
    mut status_fn: F,
    check: P,
) -> Result<(String, S)>
where
    SF: FnOnce() -> SFut,
    SFut: Future<Output = Result<String>>,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<S>>,
    P: FnMut(&S) -> Progress,
{
    let job_id = submit().await?;
    debug!(job_id = %job_id, "job submitted");
    let status = poll_until(&job_id, config, || status_fn(job_id.clone()), check).await?;
    Ok((job_id, status))
}
