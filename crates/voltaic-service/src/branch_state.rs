// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Per-branch circuit state.
//!
//! The session's imported circuit file is the revision-0 base. Each branch
//! keeps its full edit-operation log from revision 0 in
//! `branches/<name>.json`; the branch's circuit is the base plus a replay
//! of that log, and `head_revision` equals the log length. Creating a
//! branch at revision `r` copies the source log truncated to `r`, so two
//! branches' merge base is simply the length of their logs' longest common
//! prefix.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use voltaic_circuit::{Circuit, EditOperation};

use crate::error::{ErrorCode, ServiceError};

const BRANCH_LOG_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BranchLog {
    schema_version: u32,
    #[serde(default)]
    ops: Vec<EditOperation>,
}

fn branch_log_path(session_dir: &Path, branch: &str) -> PathBuf {
    session_dir.join("branches").join(format!("{branch}.json"))
}

/// Loads a branch's op log (empty when the branch has no edits yet).
pub(crate) fn load_branch_ops(
    session_dir: &Path,
    branch: &str,
) -> Result<Vec<EditOperation>, ServiceError> {
    let path = branch_log_path(session_dir, branch);
    if !path.exists() {
        return Ok(Vec::new());
    }
    let raw = std::fs::read_to_string(&path)
        .map_err(|e| ServiceError::new(ErrorCode::StorageIoError, e.to_string()))?;
    let log: BranchLog = serde_json::from_str(&raw)
        .map_err(|e| ServiceError::new(ErrorCode::CircuitStateCorrupt, e.to_string()))?;
    if log.schema_version != BRANCH_LOG_SCHEMA_VERSION {
        return Err(ServiceError::new(
            ErrorCode::StorageSchemaMismatch,
            format!("branch log schema {}", log.schema_version),
        ));
    }
    Ok(log.ops)
}

/// Persists a branch's op log (atomic temp-then-rename).
pub(crate) fn save_branch_ops(
    session_dir: &Path,
    branch: &str,
    ops: &[EditOperation],
) -> Result<(), ServiceError> {
    let path = branch_log_path(session_dir, branch);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ServiceError::new(ErrorCode::StorageIoError, e.to_string()))?;
    }
    let log = BranchLog {
        schema_version: BRANCH_LOG_SCHEMA_VERSION,
        ops: ops.to_vec(),
    };
    let mut body = serde_json::to_string_pretty(&log)
        .map_err(|e| ServiceError::new(ErrorCode::InternalError, e.to_string()))?;
    body.push('\n');
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)
        .map_err(|e| ServiceError::new(ErrorCode::StorageIoError, e.to_string()))?;
    std::fs::rename(&tmp, &path)
        .map_err(|e| ServiceError::new(ErrorCode::StorageIoError, e.to_string()))?;
    Ok(())
}

/// Deletes a branch's log file, if present.
pub(crate) fn drop_branch_ops(session_dir: &Path, branch: &str) -> Result<(), ServiceError> {
    let path = branch_log_path(session_dir, branch);
    if path.exists() {
        std::fs::remove_file(&path)
            .map_err(|e| ServiceError::new(ErrorCode::StorageIoError, e.to_string()))?;
    }
    Ok(())
}

/// Materializes the branch's circuit: base file plus log replay.
pub(crate) fn load_branch_circuit(
    session_dir: &Path,
    base_circuit_file: &Path,
    branch: &str,
) -> Result<Circuit, ServiceError> {
    let mut circuit = voltaic_circuit::load_circuit(base_circuit_file)?;
    let ops = load_branch_ops(session_dir, branch)?;
    circuit.apply_all(ops).map_err(|e| {
        ServiceError::new(
            ErrorCode::CircuitStateCorrupt,
            format!("branch '{branch}' log no longer replays: {e}"),
        )
    })?;
    Ok(circuit)
}

/// Length of the longest common prefix of two op logs - the merge base.
pub(crate) fn common_prefix_len(a: &[EditOperation], b: &[EditOperation]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use voltaic_circuit::ComponentClass;

    fn op(id: &str) -> EditOperation {
        EditOperation::AddComponent {
            id: id.into(),
            class: ComponentClass::Buffer,
            properties: std::collections::BTreeMap::new(),
            custom_pins: Vec::new(),
        }
    }

    #[test]
    fn logs_round_trip_and_missing_means_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_branch_ops(dir.path(), "main").unwrap().is_empty());
        save_branch_ops(dir.path(), "main", &[op("a"), op("b")]).unwrap();
        let ops = load_branch_ops(dir.path(), "main").unwrap();
        assert_eq!(ops.len(), 2);
    }

    #[test]
    fn merge_base_is_the_common_prefix() {
        let base = vec![op("a"), op("b")];
        let mut source = base.clone();
        source.push(op("c"));
        let mut target = base.clone();
        target.push(op("d"));
        assert_eq!(common_prefix_len(&source, &target), 2);
        assert_eq!(common_prefix_len(&source, &base), 2);
        assert_eq!(common_prefix_len(&base, &base), 2);
    }
}
