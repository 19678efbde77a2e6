// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Workspace bootstrap and `workspace.json` access.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::StoreError;
use crate::types::{current_timestamp, WorkspaceMetadata, ENGINE_VERSION, STORE_SCHEMA_VERSION};

/// Outcome of [`init_workspace`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitOutcome {
    /// True on first initialization; false when the workspace already
    /// existed (the call is idempotent).
    pub created: bool,
    /// The workspace metadata now on disk.
    pub metadata: WorkspaceMetadata,
}

/// Writes `value` as pretty JSON via temp-file-then-rename.
///
/// The temp file lives next to the target so the rename stays within one
/// filesystem and is atomic.
pub(crate) fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let mut body = serde_json::to_string_pretty(value)
        .map_err(|e| StoreError::WorkspaceCorrupt(e.to_string()))?;
    body.push('\n');
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Reads a JSON metadata file, classifying parse failures with `corrupt`.
pub(crate) fn read_json<T: DeserializeOwned>(
    path: &Path,
    corrupt: impl Fn(String) -> StoreError,
) -> Result<T, StoreError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|e| corrupt(e.to_string()))
}

/// Creates a workspace at `path`, or validates the one already there.
///
/// Idempotent: a second call on the same path succeeds with `created:
/// false` and leaves `workspace.json` untouched. A non-empty directory that
/// is not a workspace is refused.
pub fn init_workspace(path: &Path) -> Result<InitOutcome, StoreError> {
    let marker = path.join("workspace.json");
    if marker.exists() {
        let metadata = load_workspace(path)?;
        debug!(workspace = %path.display(), "workspace already initialized");
        ensure_subdirs(path)?;
        return Ok(InitOutcome {
            created: false,
            metadata,
        });
    }

    if path.exists() {
        let non_empty = std::fs::read_dir(path)?.next().is_some();
        if non_empty {
            return Err(StoreError::InvalidWorkspace(format!(
                "{} exists and is not a workspace",
                path.display()
            )));
        }
    } else {
        std::fs::create_dir_all(path)?;
    }

    let metadata = WorkspaceMetadata {
        schema_version: STORE_SCHEMA_VERSION,
        created_at: current_timestamp(),
        created_with: format!("voltaic-cli/{ENGINE_VERSION}"),
        engine_version: ENGINE_VERSION.to_owned(),
        next_session_id: 1,
        extra: std::collections::BTreeMap::new(),
    };
    ensure_subdirs(path)?;
    atomic_write_json(&marker, &metadata)?;
    debug!(workspace = %path.display(), "workspace initialized");
    Ok(InitOutcome {
        created: true,
        metadata,
    })
}

fn ensure_subdirs(path: &Path) -> Result<(), StoreError> {
    for sub in ["sessions", "logs", "artifacts"] {
        std::fs::create_dir_all(path.join(sub))?;
    }
    Ok(())
}

/// Loads and schema-checks `workspace.json`.
pub fn load_workspace(path: &Path) -> Result<WorkspaceMetadata, StoreError> {
    let marker = path.join("workspace.json");
    if !marker.exists() {
        return Err(StoreError::WorkspaceNotFound(path.display().to_string()));
    }
    let metadata: WorkspaceMetadata = read_json(&marker, StoreError::WorkspaceCorrupt)?;
    if metadata.schema_version != STORE_SCHEMA_VERSION {
        return Err(StoreError::SchemaMismatch {
            found: metadata.schema_version,
            expected: STORE_SCHEMA_VERSION,
        });
    }
    Ok(metadata)
}

/// Persists updated workspace metadata.
pub(crate) fn save_workspace(
    path: &Path,
    metadata: &WorkspaceMetadata,
) -> Result<(), StoreError> {
    atomic_write_json(&path.join("workspace.json"), metadata)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn init_creates_marker_and_subdirs() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        let outcome = init_workspace(&ws).unwrap();
        assert!(outcome.created);
        assert_eq!(outcome.metadata.next_session_id, 1);
        assert!(ws.join("workspace.json").exists());
        for sub in ["sessions", "logs", "artifacts"] {
            assert!(ws.join(sub).is_dir());
        }
    }

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        init_workspace(&ws).unwrap();
        let before = std::fs::read_to_string(ws.join("workspace.json")).unwrap();
        let second = init_workspace(&ws).unwrap();
        assert!(!second.created);
        let after = std::fs::read_to_string(ws.join("workspace.json")).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn non_workspace_directory_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("unrelated.txt"), "hi").unwrap();
        assert!(matches!(
            init_workspace(dir.path()),
            Err(StoreError::InvalidWorkspace(_))
        ));
    }

    #[test]
    fn schema_mismatch_is_surfaced_and_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        init_workspace(&ws).unwrap();
        let marker = ws.join("workspace.json");
        let doctored = std::fs::read_to_string(&marker)
            .unwrap()
            .replace("\"schema_version\": 1", "\"schema_version\": 42");
        std::fs::write(&marker, &doctored).unwrap();
        assert!(matches!(
            load_workspace(&ws),
            Err(StoreError::SchemaMismatch { found: 42, .. })
        ));
        assert_eq!(std::fs::read_to_string(&marker).unwrap(), doctored);
    }
}
