// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Storage-layer errors.

use thiserror::Error;

/// Failure in the workspace/session store.
///
/// Variants map one-to-one onto the service error taxonomy; the session
/// layer converts them without losing the classification.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The workspace directory does not exist.
    #[error("workspace not found: {0}")]
    WorkspaceNotFound(String),

    /// The directory exists but is not (and cannot become) a workspace.
    #[error("not a workspace: {0}")]
    InvalidWorkspace(String),

    /// `workspace.json` exists but cannot be understood.
    #[error("workspace corrupt: {0}")]
    WorkspaceCorrupt(String),

    /// Underlying filesystem failure.
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    /// A metadata file declares a schema this build does not speak.
    #[error("storage schema mismatch: found {found}, expected {expected}")]
    SchemaMismatch {
        /// Version found in the file.
        found: u32,
        /// Version this build writes.
        expected: u32,
    },

    /// No session with that id.
    #[error("session not found: {0}")]
    SessionNotFound(i64),

    /// The session's metadata cannot be understood.
    #[error("session corrupt: {0}")]
    SessionCorrupt(String),

    /// The session was deleted.
    #[error("session deleted: {0}")]
    SessionDeleted(i64),

    /// A session id was allocated twice (workspace invariant violation).
    #[error("session id conflict: {0}")]
    SessionIdConflict(i64),

    /// The circuit file to import does not exist.
    #[error("circuit file not found: {0}")]
    CircuitFileNotFound(String),

    /// The circuit file exists but cannot be read.
    #[error("circuit file unreadable: {0}")]
    CircuitFileUnreadable(String),

    /// An invalid branch operation (bad name, missing branch, protected
    /// branch).
    #[error("invalid branch operation: {0}")]
    InvalidBranchOp(String),
}
