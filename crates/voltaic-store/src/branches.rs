// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Branch metadata operations.
//!
//! These operate on [`SessionMetadata`] in memory; callers persist through
//! the store afterwards. Validation and error wording follow the session
//! service contract: every violation is an invalid-branch-operation error,
//! never a silent no-op.

use crate::error::StoreError;
use crate::types::{BranchMetadata, SessionMetadata};

/// Result of listing branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchListResult {
    /// Owning session.
    pub session_id: i64,
    /// All branches.
    pub branches: Vec<BranchMetadata>,
    /// Active branch name.
    pub current_branch: String,
}

/// Result of creating a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchCreateResult {
    /// Owning session.
    pub session_id: i64,
    /// The new branch.
    pub branch: BranchMetadata,
}

/// Result of switching branches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchSwitchResult {
    /// Owning session.
    pub session_id: i64,
    /// The now-active branch name.
    pub current_branch: String,
}

/// Result of deleting a branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchDeleteResult {
    /// Owning session.
    pub session_id: i64,
    /// Name of the removed branch.
    pub deleted_branch: String,
}

/// `[A-Za-z0-9_-]{1,100}`, enforced without a regex engine.
fn is_valid_branch_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 100
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Finds a branch by name.
#[must_use]
pub fn find_branch<'a>(session: &'a SessionMetadata, name: &str) -> Option<&'a BranchMetadata> {
    session.branches.iter().find(|b| b.name == name)
}

/// Lists the session's branches.
#[must_use]
pub fn list_branches(session: &SessionMetadata) -> BranchListResult {
    BranchListResult {
        session_id: session.session_id,
        branches: session.branches.clone(),
        current_branch: session.current_branch.clone(),
    }
}

/// Creates a branch from `from_branch` (or the current branch) at
/// `from_revision` (`-1` means the source's head). The new branch's base is
/// the fork revision and it starts non-default.
pub fn create_branch(
    session: &mut SessionMetadata,
    name: &str,
    from_branch: Option<&str>,
    from_revision: i64,
) -> Result<BranchCreateResult, StoreError> {
    if !is_valid_branch_name(name) {
        return Err(StoreError::InvalidBranchOp(format!(
            "invalid branch name: {name}"
        )));
    }
    if find_branch(session, name).is_some() {
        return Err(StoreError::InvalidBranchOp(format!(
            "branch already exists: {name}"
        )));
    }
    let source_name = from_branch.unwrap_or(&session.current_branch).to_owned();
    let source = find_branch(session, &source_name).ok_or_else(|| {
        StoreError::InvalidBranchOp(format!("source branch not found: {source_name}"))
    })?;
    let revision = if from_revision < 0 {
        source.head_revision
    } else {
        if from_revision > source.head_revision {
            return Err(StoreError::InvalidBranchOp(format!(
                "revision {from_revision} is beyond head of {source_name}"
            )));
        }
        from_revision
    };

    let branch = BranchMetadata::at(name, revision, false);
    session.branches.push(branch.clone());
    Ok(BranchCreateResult {
        session_id: session.session_id,
        branch,
    })
}

/// Switches the active branch.
pub fn switch_branch(
    session: &mut SessionMetadata,
    name: &str,
) -> Result<BranchSwitchResult, StoreError> {
    if find_branch(session, name).is_none() {
        return Err(StoreError::InvalidBranchOp(format!(
            "branch not found: {name}"
        )));
    }
    session.current_branch = name.to_owned();
    if let Some((head_revision, sim_revision)) = session
        .current_branch_meta()
        .map(|meta| (meta.head_revision, meta.sim_revision))
    {
        session.circuit_revision = head_revision;
        session.sim_revision = sim_revision;
    }
    Ok(BranchSwitchResult {
        session_id: session.session_id,
        current_branch: name.to_owned(),
    })
}

/// Deletes a branch. The current branch and the default branch are
/// protected; revisions are never deleted with it.
pub fn delete_branch(
    session: &mut SessionMetadata,
    name: &str,
) -> Result<BranchDeleteResult, StoreError> {
    if session.current_branch == name {
        return Err(StoreError::InvalidBranchOp(format!(
            "cannot delete the current branch: {name}"
        )));
    }
    let index = session
        .branches
        .iter()
        .position(|b| b.name == name)
        .ok_or_else(|| StoreError::InvalidBranchOp(format!("branch not found: {name}")))?;
    if session.branches[index].is_default {
        return Err(StoreError::InvalidBranchOp(format!(
            "cannot delete the default branch: {name}"
        )));
    }
    session.branches.remove(index);
    Ok(BranchDeleteResult {
        session_id: session.session_id,
        deleted_branch: name.to_owned(),
    })
}
