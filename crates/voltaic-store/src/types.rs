// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Persisted metadata types.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Schema version written into `workspace.json` and `session.json`.
pub const STORE_SCHEMA_VERSION: u32 = 1;

/// Engine version stamped into metadata files.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// UTC ISO-8601 timestamp with a trailing `Z`, second precision.
#[must_use]
pub fn current_timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Session lifecycle state. Serialized as the integer the schema fixes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Just created; no machine has run.
    Created,
    /// Loaded and runnable.
    Ready,
    /// A tick run is in progress.
    Running,
    /// The last operation failed; metadata may lag.
    Error,
    /// Soft-deleted; rejected by load.
    Deleted,
}

impl SessionState {
    /// The wire integer.
    #[must_use]
    pub fn as_int(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Ready => 1,
            Self::Running => 2,
            Self::Error => 3,
            Self::Deleted => 4,
        }
    }

    /// Parses the wire integer.
    #[must_use]
    pub fn from_int(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Created),
            1 => Some(Self::Ready),
            2 => Some(Self::Running),
            3 => Some(Self::Error),
            4 => Some(Self::Deleted),
            _ => None,
        }
    }
}

impl Serialize for SessionState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_int())
    }
}

impl<'de> Deserialize<'de> for SessionState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let v = u8::deserialize(deserializer)?;
        Self::from_int(v)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown session state {v}")))
    }
}

/// One branch pointer into the session's revision graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchMetadata {
    /// Branch name, `[A-Za-z0-9_-]{1,100}`.
    pub name: String,
    /// Latest circuit revision on this branch.
    pub head_revision: i64,
    /// Revision the latest simulation snapshot is based on; may lag head.
    pub sim_revision: i64,
    /// Revision this branch forked from.
    pub base_revision: i64,
    /// Exactly one branch per session carries this flag.
    pub is_default: bool,
}

impl BranchMetadata {
    /// A fresh branch pointing at `revision`.
    #[must_use]
    pub fn at(name: &str, revision: i64, is_default: bool) -> Self {
        Self {
            name: name.to_owned(),
            head_revision: revision,
            sim_revision: revision,
            base_revision: revision,
            is_default,
        }
    }
}

/// `session.json` content (schema_version = 1).
///
/// Unknown fields survive a load/save round-trip through `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Always [`STORE_SCHEMA_VERSION`].
    pub schema_version: u32,
    /// Stable integer id.
    pub session_id: i64,
    /// Lifecycle state (integer enum on the wire).
    pub state: SessionState,
    /// Path of the session's circuit-file copy.
    pub circuit_file: String,
    /// Creation timestamp, UTC ISO-8601 `Z`.
    pub created_at: String,
    /// Last-use timestamp, UTC ISO-8601 `Z`.
    pub last_used_at: String,
    /// Lifetime tick count.
    pub total_ticks: u64,
    /// Deprecated alias of the current branch's head; kept for the schema.
    pub circuit_revision: i64,
    /// Deprecated alias of the current branch's sim revision.
    pub sim_revision: i64,
    /// Name of the active branch.
    pub current_branch: String,
    /// All branches.
    pub branches: Vec<BranchMetadata>,
    /// Engine that wrote the file.
    pub engine_version: String,
    /// Unknown fields, preserved on round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl SessionMetadata {
    /// Fresh metadata for a new session with a default `main` branch at
    /// revision 0.
    #[must_use]
    pub fn new(session_id: i64, circuit_file: &str) -> Self {
        let now = current_timestamp();
        Self {
            schema_version: STORE_SCHEMA_VERSION,
            session_id,
            state: SessionState::Created,
            circuit_file: circuit_file.to_owned(),
            created_at: now.clone(),
            last_used_at: now,
            total_ticks: 0,
            circuit_revision: 0,
            sim_revision: 0,
            current_branch: "main".to_owned(),
            branches: vec![BranchMetadata::at("main", 0, true)],
            engine_version: ENGINE_VERSION.to_owned(),
            extra: BTreeMap::new(),
        }
    }

    /// The active branch's metadata, when consistent.
    #[must_use]
    pub fn current_branch_meta(&self) -> Option<&BranchMetadata> {
        self.branches.iter().find(|b| b.name == self.current_branch)
    }
}

/// `workspace.json` content (schema_version = 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceMetadata {
    /// Always [`STORE_SCHEMA_VERSION`].
    pub schema_version: u32,
    /// Creation timestamp, UTC ISO-8601 `Z`.
    pub created_at: String,
    /// Tool that created the workspace.
    pub created_with: String,
    /// Engine version at creation.
    pub engine_version: String,
    /// Next session id to allocate.
    pub next_session_id: i64,
    /// Unknown fields, preserved on round-trip.
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
