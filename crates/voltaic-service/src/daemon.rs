// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Daemon RPC: line-delimited JSON request/response.
//!
//! Requests arrive one per line, are processed strictly in order, and each
//! response is written (and flushed) before the next request is read. The
//! loop is generic over reader and writer so tests drive it with byte
//! buffers; the CLI wires it to stdin/stdout.

use std::io::{BufRead, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ErrorCode, ServiceError};
use crate::service::SessionService;

/// One request line.
#[derive(Debug, Clone, Deserialize)]
pub struct DaemonRequest {
    /// Correlation id, echoed on the response.
    pub id: Value,
    /// Command name. The daemon serves the workspace/session/branch subset
    /// of the CLI vocabulary plus `export-netlist`; streaming debug
    /// endpoints and the rewrite-engine commands are CLI-only, and anything
    /// else is answered with `CommandParseError`.
    pub command: String,
    /// Workspace the command targets.
    #[serde(default)]
    pub workspace: Option<String>,
    /// Session the command targets, when applicable.
    #[serde(default)]
    pub session_id: Option<i64>,
    /// Caller identity; recorded, not authenticated.
    #[serde(default)]
    pub user_id: Option<String>,
    /// Command-specific arguments.
    #[serde(default)]
    pub payload: Value,
}

/// One response line.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonResponse {
    /// Echoed correlation id.
    pub id: Value,
    /// Whether the command succeeded.
    pub ok: bool,
    /// Echoed command name.
    pub command: String,
    /// Stable error code on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    /// Human-readable message on failure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Structured result on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl DaemonResponse {
    fn ok(id: Value, command: &str, data: Value) -> Self {
        Self {
            id,
            ok: true,
            command: command.to_owned(),
            error_code: None,
            error: None,
            data: Some(data),
        }
    }

    fn err(id: Value, command: &str, error: &ServiceError) -> Self {
        Self {
            id,
            ok: false,
            command: command.to_owned(),
            error_code: Some(error.code.as_str().to_owned()),
            error: Some(error.message.clone()),
            data: None,
        }
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value, ServiceError> {
    serde_json::to_value(value)
        .map_err(|e| ServiceError::new(ErrorCode::InternalError, e.to_string()))
}

fn require_session(request: &DaemonRequest) -> Result<i64, ServiceError> {
    request.session_id.ok_or_else(|| {
        ServiceError::new(ErrorCode::InvalidArgument, "session_id is required")
    })
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

fn dispatch(request: &DaemonRequest) -> Result<Value, ServiceError> {
    let workspace = request.workspace.as_deref().ok_or_else(|| {
        ServiceError::new(ErrorCode::InvalidArgument, "workspace is required")
    })?;
    let workspace = Path::new(workspace);

    match request.command.as_str() {
        "init-workspace" => {
            let outcome = SessionService::init_workspace(workspace)?;
            to_value(&serde_json::json!({
                "workspace": workspace.display().to_string(),
                "created": outcome.created,
                "next_session_id": outcome.metadata.next_session_id,
            }))
        }
        "create-session" => {
            let service = SessionService::new(workspace);
            let circuit_file = payload_str(&request.payload, "circuit_file").ok_or_else(|| {
                ServiceError::new(ErrorCode::InvalidArgument, "payload.circuit_file is required")
            })?;
            let metadata = service.create_session(Path::new(circuit_file))?;
            to_value(&metadata)
        }
        "list-sessions" => {
            let service = SessionService::new(workspace);
            let list = service.list_sessions()?;
            to_value(&serde_json::json!({
                "sessions": list.sessions,
                "corrupt_sessions": list.corrupt_sessions,
            }))
        }
        "run-ticks" => {
            let service = SessionService::new(workspace);
            let session_id = require_session(request)?;
            let ticks = request
                .payload
                .get("ticks")
                .and_then(Value::as_u64)
                .ok_or_else(|| {
                    ServiceError::new(ErrorCode::InvalidArgument, "payload.ticks is required")
                })?;
            to_value(&service.run_ticks(session_id, ticks)?)
        }
        "get-state" => {
            let service = SessionService::new(workspace);
            to_value(&service.get_state(require_session(request)?)?)
        }
        "export-netlist" => {
            let service = SessionService::new(workspace);
            let session_id = require_session(request)?;
            let pcb_id = request
                .payload
                .get("pcb_id")
                .and_then(Value::as_u64)
                .unwrap_or(0);
            to_value(&service.export_netlist(session_id, usize::try_from(pcb_id).unwrap_or(0))?)
        }
        "destroy-session" => {
            let service = SessionService::new(workspace);
            let session_id = require_session(request)?;
            service.destroy_session(session_id)?;
            to_value(&serde_json::json!({ "session_id": session_id, "destroyed": true }))
        }
        "branch-list" => {
            let service = SessionService::new(workspace);
            let result = service.list_branches(require_session(request)?)?;
            to_value(&serde_json::json!({
                "session_id": result.session_id,
                "current_branch": result.current_branch,
                "branches": result.branches,
            }))
        }
        "branch-create" => {
            let service = SessionService::new(workspace);
            let session_id = require_session(request)?;
            let name = payload_str(&request.payload, "name").ok_or_else(|| {
                ServiceError::new(ErrorCode::InvalidArgument, "payload.name is required")
            })?;
            let from = payload_str(&request.payload, "from_branch");
            let from_revision = request
                .payload
                .get("from_revision")
                .and_then(Value::as_i64)
                .unwrap_or(-1);
            let result = service.create_branch(session_id, name, from, from_revision)?;
            to_value(&serde_json::json!({
                "session_id": result.session_id,
                "branch": result.branch,
            }))
        }
        "branch-switch" => {
            let service = SessionService::new(workspace);
            let session_id = require_session(request)?;
            let name = payload_str(&request.payload, "name").ok_or_else(|| {
                ServiceError::new(ErrorCode::InvalidArgument, "payload.name is required")
            })?;
            let result = service.switch_branch(session_id, name)?;
            to_value(&serde_json::json!({
                "session_id": result.session_id,
                "current_branch": result.current_branch,
            }))
        }
        "branch-delete" => {
            let service = SessionService::new(workspace);
            let session_id = require_session(request)?;
            let name = payload_str(&request.payload, "name").ok_or_else(|| {
                ServiceError::new(ErrorCode::InvalidArgument, "payload.name is required")
            })?;
            let result = service.delete_branch(session_id, name)?;
            to_value(&serde_json::json!({
                "session_id": result.session_id,
                "deleted_branch": result.deleted_branch,
            }))
        }
        "branch-merge" => {
            let service = SessionService::new(workspace);
            let session_id = require_session(request)?;
            let source = payload_str(&request.payload, "source").ok_or_else(|| {
                ServiceError::new(ErrorCode::InvalidArgument, "payload.source is required")
            })?;
            let target = payload_str(&request.payload, "target").ok_or_else(|| {
                ServiceError::new(ErrorCode::InvalidArgument, "payload.target is required")
            })?;
            let allow_merge = request
                .payload
                .get("allow_merge")
                .and_then(Value::as_bool)
                .unwrap_or(true);
            to_value(&service.merge_branches(session_id, source, target, allow_merge)?)
        }
        other => Err(ServiceError::new(
            ErrorCode::CommandParseError,
            format!("unknown command: {other}"),
        )),
    }
}

/// Runs the request loop until EOF. Each line is one request; each reply is
/// one line, flushed before the next read.
pub fn run_daemon<R: BufRead, W: Write>(reader: R, mut writer: W) -> std::io::Result<()> {
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<DaemonRequest>(&line) {
            Ok(request) => {
                debug!(command = %request.command, "daemon request");
                match dispatch(&request) {
                    Ok(data) => DaemonResponse::ok(request.id, &request.command, data),
                    Err(err) => {
                        warn!(command = %request.command, %err, "daemon request failed");
                        DaemonResponse::err(request.id, &request.command, &err)
                    }
                }
            }
            Err(parse_err) => DaemonResponse::err(
                Value::Null,
                "",
                &ServiceError::new(ErrorCode::CommandParseError, parse_err.to_string()),
            ),
        };
        let body = serde_json::to_string(&response)
            .unwrap_or_else(|_| "{\"ok\":false,\"error_code\":\"InternalError\"}".to_owned());
        writeln!(writer, "{body}")?;
        writer.flush()?;
    }
    Ok(())
}
