// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The session store: `sessions/<id>/` trees under a workspace.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::StoreError;
use crate::types::{
    current_timestamp, SessionMetadata, SessionState, STORE_SCHEMA_VERSION,
};
use crate::workspace::{atomic_write_json, load_workspace, read_json, save_workspace};

/// Result of a listing pass: healthy sessions plus the ids of directories
/// whose metadata could not be understood (reported, never fatal).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionList {
    /// Sessions in id order.
    pub sessions: Vec<SessionMetadata>,
    /// Ids of corrupt session directories.
    pub corrupt_sessions: Vec<i64>,
}

/// On-disk session persistence.
///
/// One implementation ships (JSON files under the workspace); the trait is
/// the seam the session service and tests mock against.
pub trait SessionStore {
    /// Allocates an id, copies the circuit file in, writes fresh metadata.
    fn create_session(&self, circuit_file: &Path) -> Result<SessionMetadata, StoreError>;
    /// Loads and validates one session.
    fn load_session(&self, session_id: i64) -> Result<SessionMetadata, StoreError>;
    /// Persists `metadata` (atomic).
    fn save_session(&self, metadata: &SessionMetadata) -> Result<(), StoreError>;
    /// Enumerates all sessions; corrupt ones are reported, not fatal.
    fn list_sessions(&self) -> Result<SessionList, StoreError>;
    /// Removes a session; soft deletion only marks the state.
    fn delete_session(&self, session_id: i64, soft: bool) -> Result<(), StoreError>;
    /// Updates just the lifecycle state.
    fn update_session_state(&self, session_id: i64, state: SessionState)
        -> Result<(), StoreError>;
    /// Adds `ticks` to the session's total and bumps `last_used_at`.
    fn update_session_ticks(&self, session_id: i64, ticks: u64) -> Result<(), StoreError>;
    /// Directory of one session.
    fn session_dir(&self, session_id: i64) -> PathBuf;
}

/// JSON-file session store rooted at one workspace.
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    workspace: PathBuf,
}

impl JsonSessionStore {
    /// A store over `workspace` (validated lazily, per call).
    #[must_use]
    pub fn new(workspace: &Path) -> Self {
        Self {
            workspace: workspace.to_path_buf(),
        }
    }

    /// The workspace root this store serves.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    fn sessions_dir(&self) -> PathBuf {
        self.workspace.join("sessions")
    }

    fn metadata_path(&self, session_id: i64) -> PathBuf {
        self.session_dir(session_id).join("session.json")
    }

    fn load_unchecked(&self, session_id: i64) -> Result<SessionMetadata, StoreError> {
        let path = self.metadata_path(session_id);
        if !path.exists() {
            return Err(StoreError::SessionNotFound(session_id));
        }
        let metadata: SessionMetadata =
            read_json(&path, |e| StoreError::SessionCorrupt(e.to_string()))?;
        if metadata.schema_version != STORE_SCHEMA_VERSION {
            return Err(StoreError::SchemaMismatch {
                found: metadata.schema_version,
                expected: STORE_SCHEMA_VERSION,
            });
        }
        Ok(metadata)
    }
}

impl SessionStore for JsonSessionStore {
    fn create_session(&self, circuit_file: &Path) -> Result<SessionMetadata, StoreError> {
        let mut workspace_meta = load_workspace(&self.workspace)?;
        if !circuit_file.exists() {
            return Err(StoreError::CircuitFileNotFound(
                circuit_file.display().to_string(),
            ));
        }

        let session_id = workspace_meta.next_session_id;
        let dir = self.session_dir(session_id);
        if dir.exists() {
            return Err(StoreError::SessionIdConflict(session_id));
        }
        std::fs::create_dir_all(&dir)?;

        let file_name = circuit_file
            .file_name()
            .ok_or_else(|| StoreError::CircuitFileUnreadable(circuit_file.display().to_string()))?;
        let target = dir.join(file_name);
        std::fs::copy(circuit_file, &target)
            .map_err(|e| StoreError::CircuitFileUnreadable(e.to_string()))?;

        let metadata = SessionMetadata::new(session_id, &target.display().to_string());
        atomic_write_json(&self.metadata_path(session_id), &metadata)?;

        // Advance the allocator only after the session is fully on disk.
        workspace_meta.next_session_id = session_id + 1;
        save_workspace(&self.workspace, &workspace_meta)?;
        debug!(session_id, "session created");
        Ok(metadata)
    }

    fn load_session(&self, session_id: i64) -> Result<SessionMetadata, StoreError> {
        let metadata = self.load_unchecked(session_id)?;
        if metadata.state == SessionState::Deleted {
            return Err(StoreError::SessionDeleted(session_id));
        }
        Ok(metadata)
    }

    fn save_session(&self, metadata: &SessionMetadata) -> Result<(), StoreError> {
        let dir = self.session_dir(metadata.session_id);
        if !dir.exists() {
            return Err(StoreError::SessionNotFound(metadata.session_id));
        }
        atomic_write_json(&self.metadata_path(metadata.session_id), metadata)
    }

    fn list_sessions(&self) -> Result<SessionList, StoreError> {
        let mut list = SessionList::default();
        let sessions_dir = self.sessions_dir();
        if !sessions_dir.exists() {
            return Ok(list);
        }
        let mut ids: Vec<i64> = Vec::new();
        for entry in std::fs::read_dir(&sessions_dir)? {
            let entry = entry?;
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|s| s.parse::<i64>().ok())
            {
                ids.push(id);
            }
        }
        ids.sort_unstable();
        for id in ids {
            match self.load_unchecked(id) {
                Ok(metadata) => list.sessions.push(metadata),
                Err(StoreError::Io(e)) => return Err(StoreError::Io(e)),
                Err(err) => {
                    warn!(session_id = id, %err, "corrupt session skipped");
                    list.corrupt_sessions.push(id);
                }
            }
        }
        Ok(list)
    }

    fn delete_session(&self, session_id: i64, soft: bool) -> Result<(), StoreError> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Err(StoreError::SessionNotFound(session_id));
        }
        if soft {
            let mut metadata = self.load_unchecked(session_id)?;
            metadata.state = SessionState::Deleted;
            metadata.last_used_at = current_timestamp();
            atomic_write_json(&self.metadata_path(session_id), &metadata)?;
        } else {
            std::fs::remove_dir_all(&dir)?;
        }
        debug!(session_id, soft, "session deleted");
        Ok(())
    }

    fn update_session_state(
        &self,
        session_id: i64,
        state: SessionState,
    ) -> Result<(), StoreError> {
        let mut metadata = self.load_session(session_id)?;
        metadata.state = state;
        metadata.last_used_at = current_timestamp();
        self.save_session(&metadata)
    }

    fn update_session_ticks(&self, session_id: i64, ticks: u64) -> Result<(), StoreError> {
        let mut metadata = self.load_session(session_id)?;
        metadata.total_ticks += ticks;
        metadata.last_used_at = current_timestamp();
        self.save_session(&metadata)
    }

    fn session_dir(&self, session_id: i64) -> PathBuf {
        self.sessions_dir().join(session_id.to_string())
    }
}
