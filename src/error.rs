//! Typed error hierarchy for the cbc-export crate.
//!
//! Every variant maps to a real failure boundary: the credential check,
//! the Carbon Black Cloud REST API, the job polling loop, local input
//! validation, and the export writers. `#[source]` / `#[from]` fields keep
//! the underlying cause reachable through `Error::source()`.
//!
//! `Api` keeps the response body. The platform returns JSON error payloads
//! with a `message` or `reason` field that explain permission and request
//! shape problems, so discarding them (as `error_for_status()` would) makes
//! failures much harder to diagnose.

use reqwest::StatusCode;

/// Unified error type for all cbc-export operations.
#[derive(Debug, thiserror::Error)]
pub enum CbcError {
    /// The API credentials were unusable before any request was made
    /// (empty id or secret). A key the server rejects (401/403) surfaces
    /// as [`CbcError::Api`] with that status.
    #[error("authentication failed: {message}")]
    Auth {
        /// Human-readable description of the failure.
        message: String,
    },

    /// The API returned a non-success HTTP status code.
    #[error("API error {status}: {body}")]
    Api {
        /// The HTTP status code returned by the API.
        status: StatusCode,
        /// The raw response body text, or an empty string if it could not be read.
        body: String,
    },

    /// A polling loop ran out of attempts or wall-clock time before the
    /// job reached a terminal state.
    #[error("polling timed out after {attempts} attempts ({elapsed:?}) for job {job_id}")]
    Timeout {
        /// The server-side job, session or command id being polled.
        job_id: String,
        /// Number of status requests issued.
        attempts: u32,
        /// Total elapsed time when the bound was hit.
        elapsed: std::time::Duration,
    },

    /// The job reached a terminal failure state instead of completing.
    ///
    /// The HTTP exchange itself succeeded; the server reported that the
    /// work failed (e.g. a live response command in `ERROR` status).
    #[error("job {job_id} failed: {reason}")]
    JobFailed {
        /// The job id.
        job_id: String,
        /// Status or error text reported by the server.
        reason: String,
    },

    /// A date range or chunk size that cannot be split into windows.
    #[error("invalid date range: {0}")]
    InvalidRange(String),

    /// Two different JSON paths flattened to the same column name and the
    /// flattener was configured to reject collisions.
    #[error("flattened key collision on '{key}'")]
    FlattenCollision {
        /// The colliding flattened key.
        key: String,
    },

    /// Missing or invalid configuration (CLI flags, environment, TOML file).
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failed.
    #[error("failed to parse response: {0}")]
    Parse(#[from] serde_json::Error),

    /// Transport-level failure (DNS, TCP, TLS, request timeout).
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Local file I/O failed while reading input or writing an export.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV writer failure.
    #[error("CSV export failed: {0}")]
    Csv(#[from] csv::Error),

    /// XLSX writer failure.
    #[error("XLSX export failed: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
}

/// Convenience alias used throughout the library.
pub type Result<T> = std::result::Result<T, CbcError>;
