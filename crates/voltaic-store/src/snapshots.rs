// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Snapshot files and the lineage index.
//!
//! Snapshot bytes live flat as `snapshots/snap_<tick>.bin` per the
//! workspace layout; the logical key `(branch, circuit_revision, tick)`
//! lives in `snapshots/lineage.json`. Files are append-only - the "latest"
//! snapshot for a branch is derived from the index, and invalidation after
//! a merge drops index entries without touching bytes on disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::StoreError;
use crate::workspace::{atomic_write_json, read_json};

/// One lineage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// File name under `snapshots/` (`snap_<tick>.bin`).
    pub file: String,
    /// Branch the snapshot was taken on.
    pub branch: String,
    /// Circuit revision the machine was elaborated from.
    pub circuit_revision: i64,
    /// Machine tick count at capture.
    pub tick: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LineageIndex {
    #[serde(default)]
    entries: Vec<SnapshotEntry>,
}

fn snapshots_dir(session_dir: &Path) -> PathBuf {
    session_dir.join("snapshots")
}

fn lineage_path(session_dir: &Path) -> PathBuf {
    snapshots_dir(session_dir).join("lineage.json")
}

fn load_index(session_dir: &Path) -> Result<LineageIndex, StoreError> {
    let path = lineage_path(session_dir);
    if !path.exists() {
        return Ok(LineageIndex::default());
    }
    read_json(&path, |e| StoreError::SessionCorrupt(e.to_string()))
}

fn save_index(session_dir: &Path, index: &LineageIndex) -> Result<(), StoreError> {
    atomic_write_json(&lineage_path(session_dir), index)
}

/// Writes snapshot `bytes` for `(branch, circuit_revision, tick)` and
/// indexes it. A same-tick re-snapshot overwrites the file and re-points
/// the entry.
pub fn save_snapshot(
    session_dir: &Path,
    branch: &str,
    circuit_revision: i64,
    tick: u64,
    bytes: &[u8],
) -> Result<PathBuf, StoreError> {
    let dir = snapshots_dir(session_dir);
    std::fs::create_dir_all(&dir)?;
    let file = format!("snap_{tick}.bin");
    let path = dir.join(&file);
    std::fs::write(&path, bytes)?;

    let mut index = load_index(session_dir)?;
    index.entries.retain(|e| e.file != file);
    index.entries.push(SnapshotEntry {
        file,
        branch: branch.to_owned(),
        circuit_revision,
        tick,
    });
    index.entries.sort_by(|a, b| a.tick.cmp(&b.tick));
    save_index(session_dir, &index)?;
    debug!(branch, tick, "snapshot saved");
    Ok(path)
}

/// All indexed snapshots, tick-ascending.
pub fn list_snapshots(session_dir: &Path) -> Result<Vec<SnapshotEntry>, StoreError> {
    Ok(load_index(session_dir)?.entries)
}

/// The latest snapshot for `branch` (highest tick), with its bytes path.
pub fn latest_snapshot(
    session_dir: &Path,
    branch: &str,
) -> Result<Option<(PathBuf, SnapshotEntry)>, StoreError> {
    let index = load_index(session_dir)?;
    let best = index
        .entries
        .into_iter()
        .filter(|e| e.branch == branch)
        .max_by_key(|e| e.tick);
    Ok(best.map(|e| (snapshots_dir(session_dir).join(&e.file), e)))
}

/// Drops index entries on `branch` whose `circuit_revision` fails
/// `is_ancestor` - the post-merge invalidation rule. Returns the dropped
/// entries; bytes on disk stay where they are.
pub fn invalidate_stale_snapshots(
    session_dir: &Path,
    branch: &str,
    is_ancestor: impl Fn(i64) -> bool,
) -> Result<Vec<SnapshotEntry>, StoreError> {
    let mut index = load_index(session_dir)?;
    let (kept, dropped): (Vec<SnapshotEntry>, Vec<SnapshotEntry>) = index
        .entries
        .into_iter()
        .partition(|e| e.branch != branch || is_ancestor(e.circuit_revision));
    index.entries = kept;
    save_index(session_dir, &index)?;
    if !dropped.is_empty() {
        debug!(branch, dropped = dropped.len(), "stale snapshots invalidated");
    }
    Ok(dropped)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn latest_is_per_branch_by_tick() {
        let dir = tempfile::tempdir().unwrap();
        save_snapshot(dir.path(), "main", 0, 5, b"five").unwrap();
        save_snapshot(dir.path(), "main", 1, 9, b"nine").unwrap();
        save_snapshot(dir.path(), "exp", 2, 12, b"twelve").unwrap();

        let (path, entry) = latest_snapshot(dir.path(), "main").unwrap().unwrap();
        assert_eq!(entry.tick, 9);
        assert_eq!(std::fs::read(path).unwrap(), b"nine");
        assert!(latest_snapshot(dir.path(), "missing").unwrap().is_none());
    }

    #[test]
    fn same_tick_resnapshot_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        save_snapshot(dir.path(), "main", 0, 5, b"old").unwrap();
        save_snapshot(dir.path(), "exp", 3, 5, b"new").unwrap();
        let entries = list_snapshots(dir.path()).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].branch, "exp");
        let (path, _) = latest_snapshot(dir.path(), "exp").unwrap().unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"new");
    }

    #[test]
    fn invalidation_drops_non_ancestor_revisions_only() {
        let dir = tempfile::tempdir().unwrap();
        save_snapshot(dir.path(), "main", 2, 5, b"a").unwrap();
        save_snapshot(dir.path(), "main", 8, 9, b"b").unwrap();
        save_snapshot(dir.path(), "exp", 8, 11, b"c").unwrap();

        // After a merge, only revisions <= 4 remain ancestors of main's head.
        let dropped =
            invalidate_stale_snapshots(dir.path(), "main", |rev| rev <= 4).unwrap();
        assert_eq!(dropped.len(), 1);
        assert_eq!(dropped[0].circuit_revision, 8);

        let remaining = list_snapshots(dir.path()).unwrap();
        assert_eq!(remaining.len(), 2);
        // The other branch's entry is untouched.
        assert!(remaining.iter().any(|e| e.branch == "exp"));
        // Bytes stay on disk even for dropped entries.
        assert!(snapshots_dir(dir.path()).join("snap_9.bin").exists());
    }
}
