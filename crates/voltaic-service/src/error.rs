// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The typed error taxonomy every response carries.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use voltaic_store::StoreError;

/// Stable error codes, fixed across responses and daemon replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// Malformed or out-of-range argument.
    InvalidArgument,
    /// The command line / request could not be parsed.
    CommandParseError,
    /// An edit or branch operation violated its preconditions.
    InvalidEditOperation,
    /// Workspace directory missing.
    WorkspaceNotFound,
    /// Directory exists but is not a workspace.
    InvalidWorkspace,
    /// `workspace.json` unreadable.
    WorkspaceCorrupt,
    /// Filesystem failure in the store.
    StorageIoError,
    /// Metadata schema version mismatch.
    StorageSchemaMismatch,
    /// No such session.
    SessionNotFound,
    /// Session metadata unreadable.
    SessionCorrupt,
    /// Session was deleted.
    SessionDeleted,
    /// Session id allocated twice.
    SessionIdConflict,
    /// Circuit file missing.
    CircuitFileNotFound,
    /// Circuit file unreadable.
    CircuitFileUnreadable,
    /// Circuit or snapshot state corrupt.
    CircuitStateCorrupt,
    /// Merge or edit conflict.
    Conflict,
    /// Anything that escaped classification.
    InternalError,
}

impl ErrorCode {
    /// The wire string (identical to the variant name).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "InvalidArgument",
            Self::CommandParseError => "CommandParseError",
            Self::InvalidEditOperation => "InvalidEditOperation",
            Self::WorkspaceNotFound => "WorkspaceNotFound",
            Self::InvalidWorkspace => "InvalidWorkspace",
            Self::WorkspaceCorrupt => "WorkspaceCorrupt",
            Self::StorageIoError => "StorageIoError",
            Self::StorageSchemaMismatch => "StorageSchemaMismatch",
            Self::SessionNotFound => "SessionNotFound",
            Self::SessionCorrupt => "SessionCorrupt",
            Self::SessionDeleted => "SessionDeleted",
            Self::SessionIdConflict => "SessionIdConflict",
            Self::CircuitFileNotFound => "CircuitFileNotFound",
            Self::CircuitFileUnreadable => "CircuitFileUnreadable",
            Self::CircuitStateCorrupt => "CircuitStateCorrupt",
            Self::Conflict => "Conflict",
            Self::InternalError => "InternalError",
        }
    }
}

/// A classified failure: stable code plus human-readable message.
///
/// No panic and no unclassified error crosses the service boundary; every
/// lower-layer failure converts into one of these.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code:?}: {message}")]
pub struct ServiceError {
    /// Stable classification.
    pub code: ErrorCode,
    /// Human-readable detail.
    pub message: String,
}

impl ServiceError {
    /// Builds an error from parts.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        let code = match &err {
            StoreError::WorkspaceNotFound(_) => ErrorCode::WorkspaceNotFound,
            StoreError::InvalidWorkspace(_) => ErrorCode::InvalidWorkspace,
            StoreError::WorkspaceCorrupt(_) => ErrorCode::WorkspaceCorrupt,
            StoreError::Io(_) => ErrorCode::StorageIoError,
            StoreError::SchemaMismatch { .. } => ErrorCode::StorageSchemaMismatch,
            StoreError::SessionNotFound(_) => ErrorCode::SessionNotFound,
            StoreError::SessionCorrupt(_) => ErrorCode::SessionCorrupt,
            StoreError::SessionDeleted(_) => ErrorCode::SessionDeleted,
            StoreError::SessionIdConflict(_) => ErrorCode::SessionIdConflict,
            StoreError::CircuitFileNotFound(_) => ErrorCode::CircuitFileNotFound,
            StoreError::CircuitFileUnreadable(_) => ErrorCode::CircuitFileUnreadable,
            StoreError::InvalidBranchOp(_) => ErrorCode::InvalidEditOperation,
        };
        Self::new(code, err.to_string())
    }
}

impl From<voltaic_circuit::EditError> for ServiceError {
    fn from(err: voltaic_circuit::EditError) -> Self {
        Self::new(ErrorCode::InvalidEditOperation, err.to_string())
    }
}

impl From<voltaic_circuit::CircuitFileError> for ServiceError {
    fn from(err: voltaic_circuit::CircuitFileError) -> Self {
        let code = match &err {
            voltaic_circuit::CircuitFileError::Io(_) => ErrorCode::CircuitFileUnreadable,
            voltaic_circuit::CircuitFileError::Parse(_) => ErrorCode::CircuitStateCorrupt,
            voltaic_circuit::CircuitFileError::SchemaMismatch { .. } => {
                ErrorCode::StorageSchemaMismatch
            }
        };
        Self::new(code, err.to_string())
    }
}

impl From<voltaic_elab::ElabError> for ServiceError {
    fn from(err: voltaic_elab::ElabError) -> Self {
        Self::new(ErrorCode::CircuitStateCorrupt, err.to_string())
    }
}

impl From<voltaic_kernel::CodecError> for ServiceError {
    fn from(err: voltaic_kernel::CodecError) -> Self {
        Self::new(ErrorCode::CircuitStateCorrupt, err.to_string())
    }
}

impl From<voltaic_rewrite::VerifyError> for ServiceError {
    fn from(err: voltaic_rewrite::VerifyError) -> Self {
        match err {
            voltaic_rewrite::VerifyError::Apply(e) => e.into(),
            voltaic_rewrite::VerifyError::Elab(e) => e.into(),
        }
    }
}
