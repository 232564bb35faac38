//! Live Response session and command orchestration.
//!
//! A Live Response run is a multi-step async flow:
//! 1. POST `liveresponse/sessions` with a device id. The session starts
//!    `PENDING` while the sensor checks in; the POST is repeated until it
//!    turns `ACTIVE`.
//! 2. POST `sessions/{id}/commands` to issue a command (returns `PENDING`).
//! 3. Poll `GET sessions/{id}/commands/{cmd}` until `COMPLETE`; `ERROR` is
//!    terminal.
//! 4. For `get file`, download `sessions/{id}/files/{file_id}/content`.
//! 5. DELETE `sessions/{id}` (answers 204).
//!
//! [`run_and_collect`] chains all of them and closes the session whether
//! or not the middle steps succeeded.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

use crate::client::CbcClient;
use crate::error::CbcError;
use crate::poll::{PollConfig, Progress, poll_until};

const LR_SERVICE: &str = "appservices/v6";

// ── Request types ──────────────────────────────────────────────────────

/// Body of a command POST. `name` is the Live Response command verb
/// (`create process`, `get file`, `directory list`, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait: Option<bool>,
}

impl CommandRequest {
    /// Runs `command_line` on the device, redirecting its output to
    /// `output_file` on the device. Does not block the session.
    pub fn create_process(command_line: &str, output_file: &str) -> Self {
        CommandRequest {
            name: "create process".to_string(),
            path: command_line.to_string(),
            output_file: Some(output_file.to_string()),
            wait: Some(false),
        }
    }

    /// Stages a device file for download.
    pub fn get_file(path: &str) -> Self {
        CommandRequest {
            name: "get file".to_string(),
            path: path.to_string(),
            output_file: None,
            wait: None,
        }
    }
}

// ── Response types ─────────────────────────────────────────────────────

/// A Live Response session. `status` moves `PENDING` → `ACTIVE` → `CLOSED`.
#[derive(Debug, Clone, Deserialize)]
pub struct Session {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub current_working_directory: Option<String>,
    #[serde(default)]
    pub supported_commands: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// `file_details` of a completed `get file` command.
#[derive(Debug, Clone, Deserialize)]
pub struct FileDetails {
    pub file_id: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Command status. `status` moves `PENDING` → `COMPLETE` | `ERROR`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandStatus {
    /// Numeric on the wire; kept as text.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub name: Option<String>,
    /// Echo of the request.
    #[serde(default)]
    pub input: Option<CommandRequest>,
    #[serde(default)]
    pub file_details: Option<FileDetails>,
    #[serde(default)]
    pub result_desc: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_number<'de, D: Deserializer<'de>>(de: D) -> Result<String, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) => s,
        other => other.to_string(),
    })
}

/// Output of [`run_and_collect`].
#[derive(Debug, Clone)]
pub struct CollectedOutput {
    pub session_id: String,
    /// Path of the output file on the device.
    pub output_file: String,
    pub content: bytes::Bytes,
}

fn session_progress(session: &Session) -> Progress {
    match session.status.as_str() {
        "ACTIVE" => Progress::Done,
        "PENDING" => Progress::Pending,
        other => Progress::Failed(format!("session {} is {other}", session.id)),
    }
}

fn command_progress(command: &CommandStatus) -> Progress {
    match command.status.as_str() {
        "COMPLETE" => Progress::Done,
        "ERROR" => Progress::Failed(
            command
                .result_desc
                .clone()
                .unwrap_or_else(|| format!("command {} failed", command.id)),
        ),
        _ => Progress::Pending,
    }
}

// ── Session lifecycle ──────────────────────────────────────────────────

/// Opens a session on `device_id`, repeating the POST while the session
/// is `PENDING`. Any status other than `PENDING` or `ACTIVE` is a failure.
///
/// If the session never becomes active, the last session id the server
/// handed out is closed before the error is returned.
pub async fn start_session(
    client: &CbcClient,
    device_id: i64,
    poll: &PollConfig,
) -> crate::error::Result<Session> {
    let path = client.org_path(LR_SERVICE, "liveresponse/sessions");
    let body = json!({ "device_id": device_id });
    let label = format!("device {device_id}");
    let mut last_seen: Option<String> = None;
    let started = poll_until(
        &label,
        poll,
        || client.post::<_, Session>(&path, &body),
        |session: &Session| {
            last_seen = Some(session.id.clone());
            session_progress(session)
        },
    )
    .await;
    let session = match started {
        Ok(session) => session,
        Err(e) => {
            if let Some(session_id) = last_seen {
                if let Err(close_err) = close_session(client, &session_id).await {
                    warn!(%session_id, error = %close_err, "could not close session that never became active");
                }
            }
            return Err(e);
        }
    };
    info!(
        session_id = %session.id,
        device_id,
        cwd = session.current_working_directory.as_deref().unwrap_or(""),
        "live response session active"
    );
    Ok(session)
}

pub async fn get_session(client: &CbcClient, session_id: &str) -> crate::error::Result<Session> {
    let path = client.org_path(LR_SERVICE, &format!("liveresponse/sessions/{session_id}"));
    client.get(&path).await
}

/// Closes a session.
///
/// The API answers 204; any other 2xx is accepted but logged.
pub async fn close_session(client: &CbcClient, session_id: &str) -> crate::error::Result<()> {
    let path = client.org_path(LR_SERVICE, &format!("liveresponse/sessions/{session_id}"));
    let status = client.delete(&path).await?;
    if status != reqwest::StatusCode::NO_CONTENT {
        warn!(session_id, %status, "unexpected status closing session");
    }
    info!(session_id, "live response session closed");
    Ok(())
}

// ── Commands ───────────────────────────────────────────────────────────

pub async fn issue_command(
    client: &CbcClient,
    session_id: &str,
    command: &CommandRequest,
) -> crate::error::Result<CommandStatus> {
    let path = client.org_path(
        LR_SERVICE,
        &format!("liveresponse/sessions/{session_id}/commands"),
    );
    let status: CommandStatus = client.post(&path, command).await?;
    info!(session_id, command_id = %status.id, name = %command.name, "command issued");
    Ok(status)
}

pub async fn get_command(
    client: &CbcClient,
    session_id: &str,
    command_id: &str,
) -> crate::error::Result<CommandStatus> {
    let path = client.org_path(
        LR_SERVICE,
        &format!("liveresponse/sessions/{session_id}/commands/{command_id}"),
    );
    client.get(&path).await
}

/// Polls a command until it is `COMPLETE`.
///
/// # Errors
///
/// `CbcError::JobFailed` if the command ends in `ERROR`.
pub async fn wait_for_command(
    client: &CbcClient,
    session_id: &str,
    command_id: &str,
    poll: &PollConfig,
) -> crate::error::Result<CommandStatus> {
    poll_until(
        command_id,
        poll,
        || get_command(client, session_id, command_id),
        command_progress,
    )
    .await
}

/// Downloads the content of a staged file.
pub async fn get_file_content(
    client: &CbcClient,
    session_id: &str,
    file_id: &str,
) -> crate::error::Result<bytes::Bytes> {
    let path = client.org_path(
        LR_SERVICE,
        &format!("liveresponse/sessions/{session_id}/files/{file_id}/content"),
    );
    client.get_bytes(&path).await
}

// ── Orchestration ──────────────────────────────────────────────────────

/// Issues `command` and waits for it to complete.
async fn run_command(
    client: &CbcClient,
    session_id: &str,
    command: &CommandRequest,
    poll: &PollConfig,
) -> crate::error::Result<CommandStatus> {
    let issued = issue_command(client, session_id, command).await?;
    wait_for_command(client, session_id, &issued.id, poll).await
}

async fn collect_in_session(
    client: &CbcClient,
    session_id: &str,
    command_line: &str,
    output_file: &str,
    poll: &PollConfig,
) -> crate::error::Result<CollectedOutput> {
    let ran = run_command(
        client,
        session_id,
        &CommandRequest::create_process(command_line, output_file),
        poll,
    )
    .await?;
    let output_file = ran
        .input
        .and_then(|input| input.output_file)
        .unwrap_or_else(|| output_file.to_string());

    let staged = run_command(client, session_id, &CommandRequest::get_file(&output_file), poll).await?;
    let file_id = staged
        .file_details
        .map(|d| d.file_id)
        .ok_or_else(|| CbcError::JobFailed {
            job_id: staged.id.clone(),
            reason: "get file completed without file_details".to_string(),
        })?;

    let content = get_file_content(client, session_id, &file_id).await?;
    info!(session_id, %file_id, bytes = content.len(), "collected output file");
    Ok(CollectedOutput {
        session_id: session_id.to_string(),
        output_file,
        content,
    })
}

/// Runs `command_line` on `device_id`, fetches the file it wrote to
/// `output_file`, and closes the session.
///
/// The session is closed even if a step in between fails. If both the run
/// and the close fail, the run's error is returned and the close error is
/// logged.
pub async fn run_and_collect(
    client: &CbcClient,
    device_id: i64,
    command_line: &str,
    output_file: &str,
    poll: &PollConfig,
) -> crate::error::Result<CollectedOutput> {
    let session = start_session(client, device_id, poll).await?;
    let result = collect_in_session(client, &session.id, command_line, output_file, poll).await;
    let closed = close_session(client, &session.id).await;

    match (result, closed) {
        (Ok(output), Ok(())) => Ok(output),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(run_err), Ok(())) => Err(run_err),
        (Err(run_err), Err(close_err)) => {
            warn!(session_id = %session.id, error = %close_err, "failed to close session after error");
            Err(run_err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_process_serializes_output_file_and_wait() {
        let cmd = CommandRequest::create_process(
            "c:\\program files\\confer\\repcli.exe status",
            "c:\\windows\\temp\\repcli-42.txt",
        );
        let json = serde_json::to_value(&cmd).unwrap();
        assert_eq!(json["name"], "create process");
        assert_eq!(json["output_file"], "c:\\windows\\temp\\repcli-42.txt");
        assert_eq!(json["wait"], false);
    }

    #[test]
    fn get_file_omits_optional_fields() {
        let json = serde_json::to_value(CommandRequest::get_file("c:\\x.txt")).unwrap();
        assert_eq!(json, json!({"name": "get file", "path": "c:\\x.txt"}));
    }

    #[test]
    fn session_deserializes_from_api_response() {
        let json = r#"{
            "id": "1:2468",
            "status": "ACTIVE",
            "device_id": 2468,
            "current_working_directory": "C:\\Windows\\system32",
            "supported_commands": ["get file", "create process"]
        }"#;
        let session: Session = serde_json::from_str(json).unwrap();
        assert_eq!(session.id, "1:2468");
        assert_eq!(session_progress(&session), Progress::Done);
        assert_eq!(session.supported_commands.len(), 2);
        assert_eq!(session.extra["device_id"], 2468);
    }

    #[test]
    fn session_status_classification() {
        let mut s: Session = serde_json::from_str(r#"{"id": "s", "status": "PENDING"}"#).unwrap();
        assert_eq!(session_progress(&s), Progress::Pending);
        s.status = "CLOSED".to_string();
        assert!(matches!(session_progress(&s), Progress::Failed(_)));
    }

    #[test]
    fn command_status_accepts_numeric_id_and_file_details() {
        let json = r#"{
            "id": 7,
            "status": "COMPLETE",
            "name": "get file",
            "file_details": {"file_id": "f-123", "size": 42}
        }"#;
        let cmd: CommandStatus = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.id, "7");
        assert_eq!(cmd.file_details.unwrap().file_id, "f-123");
    }

    #[test]
    fn command_error_is_terminal_failure() {
        let cmd: CommandStatus = serde_json::from_str(
            r#"{"id": "9", "status": "ERROR", "result_desc": "file not found"}"#,
        )
        .unwrap();
        assert_eq!(command_progress(&cmd), Progress::Failed("file not found".to_string()));
    }

    #[test]
    fn command_echoes_input() {
        let cmd: CommandStatus = serde_json::from_str(
            r#"{"id": 1, "status": "PENDING", "input": {"name": "create process", "path": "cmd", "output_file": "c:\\o.txt"}}"#,
        )
        .unwrap();
        assert_eq!(command_progress(&cmd), Progress::Pending);
        assert_eq!(cmd.input.unwrap().output_file.as_deref(), Some("c:\\o.txt"));
    }
}
