//! Date-range chunking for historical exports.
//!
//! Search endpoints cap a single response at 10,000 rows. For exports that
//! span months (audit logs, alerts), the requested window is split into
//! fixed-size sub-windows and one request is issued per window.
//!
//! Windows are half-open, `[start, end)`. Each window's `end` is the next
//! window's `start`, so together they cover the whole range with no gaps
//! and no overlaps; the final window ends exactly at the requested end.

use std::future::Future;

use chrono::{DateTime, NaiveTime, TimeDelta, Utc};
use tracing::debug;

use crate::error::{CbcError, Result};

/// One sub-window of a chunked date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateWindow {
    /// Inclusive start.
    pub start: DateTime<Utc>,
    /// Exclusive end (inclusive for the last window of a range).
    pub end: DateTime<Utc>,
}

impl DateWindow {
    /// Start as epoch milliseconds, the unit the v5 `find` APIs expect.
    pub fn start_millis(&self) -> i64 {
        self.start.timestamp_millis()
    }

    /// End as epoch milliseconds.
    pub fn end_millis(&self) -> i64 {
        self.end.timestamp_millis()
    }

    /// Width of the window.
    pub fn width(&self) -> TimeDelta {
        self.end - self.start
    }
}

/// Order in which windows are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChunkOrder {
    /// Oldest window first.
    #[default]
    Ascending,
    /// Newest window first.
    Descending,
}

/// Splits `[start, end]` into windows of at most `chunk_size_days` days.
///
/// `start == end` yields no windows.
///
/// # Errors
///
/// `CbcError::InvalidRange` if `start > end` or `chunk_size_days == 0`.
pub fn chunk(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    chunk_size_days: u32,
    order: ChunkOrder,
) -> Result<Vec<DateWindow>> {
    if chunk_size_days == 0 {
        return Err(CbcError::InvalidRange(
            "chunk size must be at least one day".to_string(),
        ));
    }
    if start > end {
        return Err(CbcError::InvalidRange(format!(
            "start {start} is after end {end}"
        )));
    }

    let step = TimeDelta::days(i64::from(chunk_size_days));
    let mut windows = Vec::new();
    let mut cursor = start;
    while cursor < end {
        let next = cursor
            .checked_add_signed(step)
            .map_or(end, |candidate| candidate.min(end));
        windows.push(DateWindow {
            start: cursor,
            end: next,
        });
        cursor = next;
    }

    if order == ChunkOrder::Descending {
        windows.reverse();
    }
    Ok(windows)
}

/// The window used by the audit log export: it ends at the next UTC
/// midnight after `now` and starts `days` days before that.
pub fn trailing_days(days: u32, now: DateTime<Utc>) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let tomorrow = now
        .date_naive()
        .succ_opt()
        .ok_or_else(|| CbcError::InvalidRange("date overflow computing tomorrow".to_string()))?
        .and_time(NaiveTime::MIN)
        .and_utc();
    let start = tomorrow
        .checked_sub_signed(TimeDelta::days(i64::from(days)))
        .ok_or_else(|| CbcError::InvalidRange(format!("{days} days is out of range")))?;
    Ok((start, tomorrow))
}

/// Issues one `fetch` per window, in order, and concatenates the results.
///
/// The first failing window aborts the export; nothing partial is returned.
pub async fn collect_chunked<T, F, Fut>(windows: &[DateWindow], mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(DateWindow) -> Fut,
    Fut: Future<Output = Result<Vec<T>>>,
{
    let mut all = Vec::new();
    for (i, window) in windows.iter().enumerate() {
        let mut rows = fetch(*window).await?;
        debug!(
            window = i,
            start = %window.start,
            end = %window.end,
            rows = rows.len(),
            "fetched window"
        );
        all.append(&mut rows);
    }
    Ok(all)
}
