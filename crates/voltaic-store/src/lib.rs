// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! voltaic-store: the on-disk representation of workspaces, sessions,
//! branches, and snapshots.
//!
//! Layout:
//!
//! ```text
//! <workspace>/
//!   workspace.json
//!   sessions/<id>/
//!     session.json
//!     <circuit-file-copy>
//!     snapshots/snap_<tick>.bin
//!     snapshots/lineage.json
//!     netlists/netlist_<pcb_id>.txt
//!   logs/
//!   artifacts/
//! ```
//!
//! Every metadata write goes through write-to-temp-then-rename, so a partial
//! write is never observable; readers racing a writer of the same file see
//! either the old or the new content, nothing in between.

mod branches;
mod error;
mod session;
mod snapshots;
mod types;
mod workspace;

pub use branches::{
    create_branch, delete_branch, find_branch, list_branches, switch_branch, BranchCreateResult,
    BranchDeleteResult, BranchListResult, BranchSwitchResult,
};
pub use error::StoreError;
pub use session::{JsonSessionStore, SessionList, SessionStore};
pub use snapshots::{
    invalidate_stale_snapshots, latest_snapshot, list_snapshots, save_snapshot, SnapshotEntry,
};
pub use types::{
    current_timestamp, BranchMetadata, SessionMetadata, SessionState, WorkspaceMetadata,
    ENGINE_VERSION, STORE_SCHEMA_VERSION,
};
pub use workspace::{init_workspace, load_workspace, InitOutcome};
