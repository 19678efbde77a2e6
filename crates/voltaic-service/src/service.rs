// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The session service proper.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use voltaic_circuit::{BlockId, Circuit, EditOperation, MergeResult};
use voltaic_elab::{elaborate, export_netlist};
use voltaic_kernel::{
    decode_snapshot, encode_snapshot, restore_snapshot, KernelConfig, Machine,
};
use voltaic_rewrite::{
    build_transformation_plan, evaluate_retiming_plans, propose_global_pipelining_plans,
    propose_retiming_plans, resolve_conflicts, GlobalPipelineMap, GlobalPipeliningObjective,
    GlobalPipeliningPlan, RetimingApplicationOptions, RetimingApplicationResult,
    RetimingObjective, RetimingOptimizationResult, RetimingPlan, TransformationEngine,
    TransformationPlan,
};
use voltaic_store::{
    create_branch, delete_branch, invalidate_stale_snapshots, list_branches, list_snapshots,
    save_snapshot, switch_branch, BranchCreateResult, BranchDeleteResult, BranchListResult,
    BranchSwitchResult, InitOutcome, JsonSessionStore, SessionList, SessionMetadata,
    SessionState, SessionStore, SnapshotEntry,
};

use crate::branch_state::{
    common_prefix_len, drop_branch_ops, load_branch_circuit, load_branch_ops, save_branch_ops,
};
use crate::error::{ErrorCode, ServiceError};

/// Cap on plans re-derived when resolving a plan id.
const PLAN_LOOKUP_LIMIT: usize = 64;

/// Per-session in-memory state. The machine is a cache; disk wins.
#[derive(Debug, Default)]
struct Resident {
    machine: Option<Machine>,
    machine_branch: String,
    machine_revision: i64,
}

/// Outcome of a tick run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTicksResult {
    /// Session that ran.
    pub session_id: i64,
    /// Ticks executed in this call.
    pub ticks_run: u64,
    /// Session lifetime tick total after the run.
    pub total_ticks: u64,
    /// Machine tick counter after the run.
    pub machine_ticks: u64,
    /// Canonical state hash, lowercase hex.
    pub state_hash: String,
    /// True when any component-contract fault was recorded.
    pub degraded: bool,
    /// Number of faults recorded.
    pub fault_count: usize,
}

/// Structured `get-state` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetStateResult {
    /// The session's metadata as persisted.
    pub session: SessionMetadata,
    /// Tick of the latest snapshot on the current branch, if any.
    pub latest_snapshot_tick: Option<u64>,
    /// State hash of the current branch's machine state, lowercase hex.
    pub state_hash: Option<String>,
}

/// Outcome of a netlist export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetlistResult {
    /// Session exported from.
    pub session_id: i64,
    /// Board index exported.
    pub pcb_id: usize,
    /// File the netlist was written to.
    pub path: String,
    /// Rendered line count.
    pub lines: usize,
}

/// Outcome of a branch merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeBranchResult {
    /// Owning session.
    pub session_id: i64,
    /// Source branch.
    pub source_branch: String,
    /// Target branch.
    pub target_branch: String,
    /// Target head after the merge.
    pub target_new_revision: i64,
    /// Ops appended onto the target.
    pub merged_ops_count: usize,
    /// Whether the merge was a fast-forward.
    pub fast_forward: bool,
}

/// One service instance per workspace.
pub struct SessionService {
    store: JsonSessionStore,
    config: KernelConfig,
    // Process-local lookup only; iteration order never observed.
    cache: Mutex<FxHashMap<i64, Arc<Mutex<Resident>>>>,
}

impl SessionService {
    /// A service over `workspace` (not yet validated; each call checks).
    #[must_use]
    pub fn new(workspace: &Path) -> Self {
        Self {
            store: JsonSessionStore::new(workspace),
            config: KernelConfig::default(),
            cache: Mutex::new(FxHashMap::default()),
        }
    }

    /// Bootstrap (or validate) a workspace directory.
    pub fn init_workspace(workspace: &Path) -> Result<InitOutcome, ServiceError> {
        Ok(voltaic_store::init_workspace(workspace)?)
    }

    fn resident(&self, session_id: i64) -> Result<Arc<Mutex<Resident>>, ServiceError> {
        let mut cache = self
            .cache
            .lock()
            .map_err(|_| ServiceError::new(ErrorCode::InternalError, "session cache poisoned"))?;
        Ok(cache
            .entry(session_id)
            .or_insert_with(|| Arc::new(Mutex::new(Resident::default())))
            .clone())
    }

    fn lock_resident<'a>(
        entry: &'a Arc<Mutex<Resident>>,
    ) -> Result<std::sync::MutexGuard<'a, Resident>, ServiceError> {
        entry
            .lock()
            .map_err(|_| ServiceError::new(ErrorCode::InternalError, "session lock poisoned"))
    }

    /// Creates a session from `circuit_file`.
    pub fn create_session(&self, circuit_file: &Path) -> Result<SessionMetadata, ServiceError> {
        let metadata = self.store.create_session(circuit_file)?;
        info!(session_id = metadata.session_id, "session created");
        Ok(metadata)
    }

    /// Lists sessions (corrupt ones reported, not fatal).
    pub fn list_sessions(&self) -> Result<SessionList, ServiceError> {
        // Surface a missing workspace before enumerating nothing.
        voltaic_store::load_workspace(self.store.workspace())?;
        Ok(self.store.list_sessions()?)
    }

    /// Destroys a session (hard delete) and evicts its cache entry.
    pub fn destroy_session(&self, session_id: i64) -> Result<(), ServiceError> {
        self.store.delete_session(session_id, false)?;
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&session_id);
        }
        info!(session_id, "session destroyed");
        Ok(())
    }

    fn branch_meta<'a>(
        metadata: &'a SessionMetadata,
        branch: &str,
    ) -> Result<&'a voltaic_store::BranchMetadata, ServiceError> {
        voltaic_store::find_branch(metadata, branch).ok_or_else(|| {
            ServiceError::new(
                ErrorCode::SessionCorrupt,
                format!("branch '{branch}' missing from session metadata"),
            )
        })
    }

    fn resolve_branch(
        metadata: &SessionMetadata,
        branch: Option<&str>,
    ) -> Result<String, ServiceError> {
        let name = branch.unwrap_or(&metadata.current_branch);
        Self::branch_meta(metadata, name)?;
        Ok(name.to_owned())
    }

    /// Newest snapshot on `branch` whose lineage matches `head`.
    fn latest_matching_snapshot(
        session_dir: &Path,
        branch: &str,
        head: i64,
    ) -> Result<Option<SnapshotEntry>, ServiceError> {
        Ok(list_snapshots(session_dir)?
            .into_iter()
            .filter(|e| e.branch == branch && e.circuit_revision == head)
            .max_by_key(|e| e.tick))
    }

    fn branch_circuit(
        &self,
        metadata: &SessionMetadata,
        branch: &str,
    ) -> Result<Circuit, ServiceError> {
        load_branch_circuit(
            &self.store.session_dir(metadata.session_id),
            Path::new(&metadata.circuit_file),
            branch,
        )
    }

    /// Runs `ticks` ticks on the session's current branch, snapshots, and
    /// refreshes metadata. Callers bound long runs themselves; there is no
    /// thread-level cancellation.
    pub fn run_ticks(&self, session_id: i64, ticks: u64) -> Result<RunTicksResult, ServiceError> {
        let entry = self.resident(session_id)?;
        let mut resident = Self::lock_resident(&entry)?;

        let mut metadata = self.store.load_session(session_id)?;
        let branch = metadata.current_branch.clone();
        let head = Self::branch_meta(&metadata, &branch)?.head_revision;
        let session_dir = self.store.session_dir(session_id);

        // Reuse the resident machine only when it matches this branch state.
        let reusable = resident.machine.is_some()
            && resident.machine_branch == branch
            && resident.machine_revision == head;
        if !reusable {
            let circuit = self.branch_circuit(&metadata, &branch)?;
            let elab = elaborate(&circuit, &self.config)?;
            let mut machine = elab.machine;
            // Resume from the newest snapshot whose lineage matches the head
            // we just elaborated; snapshots from older revisions stay on
            // disk but never feed a mismatched machine.
            if let Some(snap_entry) = Self::latest_matching_snapshot(&session_dir, &branch, head)? {
                let path = session_dir.join("snapshots").join(&snap_entry.file);
                let bytes = std::fs::read(&path)
                    .map_err(|e| ServiceError::new(ErrorCode::StorageIoError, e.to_string()))?;
                let image = decode_snapshot(&bytes)?;
                restore_snapshot(&mut machine, &image)?;
                debug!(session_id, tick = snap_entry.tick, "resumed from snapshot");
            }
            resident.machine = Some(machine);
            resident.machine_branch = branch.clone();
            resident.machine_revision = head;
        }

        self.store
            .update_session_state(session_id, SessionState::Running)?;

        let Some(machine) = resident.machine.as_mut() else {
            return Err(ServiceError::new(
                ErrorCode::InternalError,
                "resident machine vanished under its lock",
            ));
        };
        let report = machine.run(ticks);
        if report.degraded() {
            warn!(
                session_id,
                faults = report.faults.len(),
                "tick run degraded by component-contract faults"
            );
        }

        let bytes = encode_snapshot(machine);
        save_snapshot(&session_dir, &branch, head, machine.total_ticks(), &bytes)?;

        metadata = self.store.load_session(session_id)?;
        metadata.total_ticks += ticks;
        metadata.last_used_at = voltaic_store::current_timestamp();
        metadata.state = SessionState::Ready;
        for b in &mut metadata.branches {
            if b.name == branch {
                b.sim_revision = head;
            }
        }
        metadata.sim_revision = head;
        self.store.save_session(&metadata)?;

        Ok(RunTicksResult {
            session_id,
            ticks_run: ticks,
            total_ticks: metadata.total_ticks,
            machine_ticks: machine.total_ticks(),
            state_hash: hex::encode(machine.state_hash()),
            degraded: report.degraded(),
            fault_count: report.faults.len(),
        })
    }

    /// Reports the session's persisted state plus the current branch's
    /// machine-state hash (reconstructed from the latest snapshot when one
    /// matches the branch head).
    pub fn get_state(&self, session_id: i64) -> Result<GetStateResult, ServiceError> {
        let metadata = self.store.load_session(session_id)?;
        let branch = metadata.current_branch.clone();
        let head = Self::branch_meta(&metadata, &branch)?.head_revision;
        let session_dir = self.store.session_dir(session_id);

        let latest_tick = list_snapshots(&session_dir)?
            .iter()
            .filter(|e| e.branch == branch)
            .map(|e| e.tick)
            .max();
        let mut state_hash = None;
        if let Some(entry) = Self::latest_matching_snapshot(&session_dir, &branch, head)? {
            let circuit = self.branch_circuit(&metadata, &branch)?;
            let mut machine = elaborate(&circuit, &self.config)?.machine;
            let path = session_dir.join("snapshots").join(&entry.file);
            let bytes = std::fs::read(&path)
                .map_err(|e| ServiceError::new(ErrorCode::StorageIoError, e.to_string()))?;
            let image = decode_snapshot(&bytes)?;
            restore_snapshot(&mut machine, &image)?;
            state_hash = Some(hex::encode(machine.state_hash()));
        }

        Ok(GetStateResult {
            session: metadata,
            latest_snapshot_tick: latest_tick,
            state_hash,
        })
    }

    /// Exports board `pcb_id`'s netlist under `netlists/`.
    pub fn export_netlist(
        &self,
        session_id: i64,
        pcb_id: usize,
    ) -> Result<NetlistResult, ServiceError> {
        let metadata = self.store.load_session(session_id)?;
        let branch = metadata.current_branch.clone();
        let circuit = self.branch_circuit(&metadata, &branch)?;
        let machine = elaborate(&circuit, &self.config)?.machine;
        let text = export_netlist(&machine, pcb_id).ok_or_else(|| {
            ServiceError::new(
                ErrorCode::InvalidArgument,
                format!("no board with pcb id {pcb_id}"),
            )
        })?;

        let dir = self.store.session_dir(session_id).join("netlists");
        std::fs::create_dir_all(&dir)
            .map_err(|e| ServiceError::new(ErrorCode::StorageIoError, e.to_string()))?;
        let path = dir.join(format!("netlist_{pcb_id}.txt"));
        std::fs::write(&path, &text)
            .map_err(|e| ServiceError::new(ErrorCode::StorageIoError, e.to_string()))?;
        Ok(NetlistResult {
            session_id,
            pcb_id,
            path: path.display().to_string(),
            lines: text.lines().count(),
        })
    }

    // ── Branch operations ───────────────────────────────────────────────

    /// Lists a session's branches.
    pub fn list_branches(&self, session_id: i64) -> Result<BranchListResult, ServiceError> {
        let metadata = self.store.load_session(session_id)?;
        Ok(list_branches(&metadata))
    }

    /// Creates a branch; its op log is the source's, truncated to the fork
    /// revision.
    pub fn create_branch(
        &self,
        session_id: i64,
        name: &str,
        from_branch: Option<&str>,
        from_revision: i64,
    ) -> Result<BranchCreateResult, ServiceError> {
        let mut metadata = self.store.load_session(session_id)?;
        let source_name = from_branch.unwrap_or(&metadata.current_branch).to_owned();
        let result = create_branch(&mut metadata, name, Some(&source_name), from_revision)?;

        let session_dir = self.store.session_dir(session_id);
        let source_ops = load_branch_ops(&session_dir, &source_name)?;
        let fork = usize::try_from(result.branch.head_revision).unwrap_or(source_ops.len());
        save_branch_ops(&session_dir, name, &source_ops[..fork.min(source_ops.len())])?;

        self.store.save_session(&metadata)?;
        Ok(result)
    }

    /// Switches the active branch.
    pub fn switch_branch(
        &self,
        session_id: i64,
        name: &str,
    ) -> Result<BranchSwitchResult, ServiceError> {
        let entry = self.resident(session_id)?;
        let mut resident = Self::lock_resident(&entry)?;
        let mut metadata = self.store.load_session(session_id)?;
        let result = switch_branch(&mut metadata, name)?;
        self.store.save_session(&metadata)?;
        resident.machine = None; // next run re-materializes for the branch
        Ok(result)
    }

    /// Deletes a branch (never its revisions; never current or default).
    pub fn delete_branch(
        &self,
        session_id: i64,
        name: &str,
    ) -> Result<BranchDeleteResult, ServiceError> {
        let mut metadata = self.store.load_session(session_id)?;
        let result = delete_branch(&mut metadata, name)?;
        self.store.save_session(&metadata)?;
        drop_branch_ops(&self.store.session_dir(session_id), name)?;
        Ok(result)
    }

    /// Three-way merge of `source` into `target`.
    ///
    /// Fast-forward when the target added nothing since the fork; otherwise
    /// a clean interleave when no op pair conflicts; otherwise, with
    /// `allow_merge`, the rewrite engine's resolver produces a compound edit
    /// list - and a `Conflict` error when it cannot.
    pub fn merge_branches(
        &self,
        session_id: i64,
        source: &str,
        target: &str,
        allow_merge: bool,
    ) -> Result<MergeBranchResult, ServiceError> {
        let entry = self.resident(session_id)?;
        let mut resident = Self::lock_resident(&entry)?;

        let mut metadata = self.store.load_session(session_id)?;
        let source_meta = Self::branch_meta(&metadata, source)
            .map_err(|_| ServiceError::new(ErrorCode::InvalidEditOperation, format!("source branch not found: {source}")))?
            .clone();
        Self::branch_meta(&metadata, target).map_err(|_| {
            ServiceError::new(
                ErrorCode::InvalidEditOperation,
                format!("target branch not found: {target}"),
            )
        })?;

        let session_dir = self.store.session_dir(session_id);
        let source_ops = load_branch_ops(&session_dir, source)?;
        let target_ops = load_branch_ops(&session_dir, target)?;
        let base = common_prefix_len(&source_ops, &target_ops);
        let source_extra = &source_ops[base..];
        let target_extra = &target_ops[base..];

        let (new_log, appended, fast_forward) = if source_extra.is_empty() {
            (target_ops.clone(), 0, false)
        } else if target_extra.is_empty() {
            (source_ops.clone(), source_extra.len(), true)
        } else {
            match voltaic_circuit::three_way_merge(source_extra, target_extra) {
                MergeResult::FastForward { ops } | MergeResult::Clean { ops } => {
                    let mut log = target_ops.clone();
                    log.extend(ops.iter().cloned());
                    (log, ops.len(), false)
                }
                MergeResult::Conflicts(conflicts) => {
                    if !allow_merge {
                        return Err(ServiceError::new(
                            ErrorCode::Conflict,
                            format!("{} conflicting op pairs", conflicts.len()),
                        ));
                    }
                    let Some(resolved_tail) = resolve_conflicts(&conflicts) else {
                        return Err(ServiceError::new(
                            ErrorCode::Conflict,
                            "conflicts are not auto-resolvable",
                        ));
                    };
                    // Compound list: non-conflicting source ops in order,
                    // then the resolver's contributions.
                    let conflicted: Vec<&EditOperation> =
                        conflicts.iter().map(|c| &c.source_op).collect();
                    let mut merged: Vec<EditOperation> = source_extra
                        .iter()
                        .filter(|op| !conflicted.contains(op))
                        .cloned()
                        .collect();
                    merged.extend(resolved_tail);
                    let mut log = target_ops.clone();
                    let appended = merged.len();
                    log.extend(merged);
                    (log, appended, false)
                }
            }
        };

        // The merged log must replay against the base circuit.
        let base_circuit = voltaic_circuit::load_circuit(Path::new(&metadata.circuit_file))?;
        let mut replay = base_circuit;
        replay.apply_all(new_log.clone()).map_err(|e| {
            ServiceError::new(ErrorCode::Conflict, format!("merged ops do not replay: {e}"))
        })?;

        save_branch_ops(&session_dir, target, &new_log)?;
        let new_head = i64::try_from(new_log.len()).unwrap_or(i64::MAX);
        let old_target_head = Self::branch_meta(&metadata, target)?.head_revision;
        for b in &mut metadata.branches {
            if b.name == target {
                b.head_revision = new_head;
                if fast_forward {
                    b.sim_revision = source_meta.sim_revision;
                }
            }
        }
        if metadata.current_branch == target {
            metadata.circuit_revision = new_head;
        }
        self.store.save_session(&metadata)?;

        // Post-merge lineage rule: snapshots whose revision is no longer an
        // ancestor of the new head are dropped from the index.
        let prefix = i64::try_from(base).unwrap_or(i64::MAX);
        invalidate_stale_snapshots(&session_dir, target, |rev| {
            rev <= old_target_head.max(prefix) && rev <= new_head
        })?;
        resident.machine = None;

        Ok(MergeBranchResult {
            session_id,
            source_branch: source.to_owned(),
            target_branch: target.to_owned(),
            target_new_revision: new_head,
            merged_ops_count: appended,
            fast_forward,
        })
    }

    // ── Transformations ─────────────────────────────────────────────────

    /// Appends `ops` to `branch`'s log, advancing its head by exactly the
    /// op count. Validation happens against a working copy first; nothing
    /// is appended unless every op applies.
    fn append_ops_in_branch(
        &self,
        metadata: &mut SessionMetadata,
        branch: &str,
        ops: Vec<EditOperation>,
    ) -> Result<i64, ServiceError> {
        let mut circuit = self.branch_circuit(metadata, branch)?;
        circuit.apply_all(ops.clone())?;

        let session_dir = self.store.session_dir(metadata.session_id);
        let mut log = load_branch_ops(&session_dir, branch)?;
        log.extend(ops);
        save_branch_ops(&session_dir, branch, &log)?;
        let new_head = i64::try_from(log.len()).unwrap_or(i64::MAX);
        for b in &mut metadata.branches {
            if b.name == branch {
                b.head_revision = new_head;
                // sim_revision deliberately untouched; the next run
                // refreshes it.
            }
        }
        if metadata.current_branch == branch {
            metadata.circuit_revision = new_head;
        }
        metadata.last_used_at = voltaic_store::current_timestamp();
        self.store.save_session(metadata)?;
        Ok(new_head)
    }

    /// Proposes transformations for a branch (optionally scoped to a block).
    pub fn propose_transformations(
        &self,
        session_id: i64,
        branch: Option<&str>,
        block: Option<&str>,
        max_plans: usize,
    ) -> Result<Vec<TransformationPlan>, ServiceError> {
        let metadata = self.store.load_session(session_id)?;
        let branch = Self::resolve_branch(&metadata, branch)?;
        let circuit = self.branch_circuit(&metadata, &branch)?;
        Ok(match block {
            Some(block_id) => TransformationEngine::propose_for_block(
                &circuit,
                &BlockId(block_id.to_owned()),
                max_plans,
            ),
            None => TransformationEngine::propose_for_circuit(&circuit, max_plans),
        })
    }

    fn find_transformation_plan(
        &self,
        metadata: &SessionMetadata,
        branch: &str,
        plan_id: &str,
    ) -> Result<TransformationPlan, ServiceError> {
        let circuit = self.branch_circuit(metadata, branch)?;
        TransformationEngine::propose_for_circuit(&circuit, PLAN_LOOKUP_LIMIT)
            .into_iter()
            .find(|p| p.id == plan_id)
            .ok_or_else(|| {
                ServiceError::new(
                    ErrorCode::InvalidArgument,
                    format!("no such transformation plan: {plan_id}"),
                )
            })
    }

    /// Applies a previously proposed plan in `branch`. Plan ids are
    /// deterministic, so the plan is re-derived and matched by id.
    pub fn apply_transformation(
        &self,
        session_id: i64,
        branch: Option<&str>,
        plan_id: &str,
    ) -> Result<(TransformationPlan, i64), ServiceError> {
        let entry = self.resident(session_id)?;
        let mut resident = Self::lock_resident(&entry)?;
        let mut metadata = self.store.load_session(session_id)?;
        let branch = Self::resolve_branch(&metadata, branch)?;
        let plan = self.find_transformation_plan(&metadata, &branch, plan_id)?;
        let ops = TransformationEngine::materialize(&plan);
        let new_head = self.append_ops_in_branch(&mut metadata, &branch, ops)?;
        resident.machine = None;
        info!(session_id, plan_id, new_head, "transformation applied");
        Ok((plan, new_head))
    }

    /// Verifies a proposed plan preserves settled observable behavior.
    pub fn verify_transformation(
        &self,
        session_id: i64,
        branch: Option<&str>,
        plan_id: &str,
    ) -> Result<(bool, String), ServiceError> {
        let metadata = self.store.load_session(session_id)?;
        let branch = Self::resolve_branch(&metadata, branch)?;
        let plan = self.find_transformation_plan(&metadata, &branch, plan_id)?;
        let circuit = self.branch_circuit(&metadata, &branch)?;
        Ok(voltaic_rewrite::verify_behavior_preserved(
            &circuit,
            &plan,
            &self.config,
        )?)
    }

    // ── Retiming ────────────────────────────────────────────────────────

    fn analyses(
        circuit: &Circuit,
    ) -> (
        voltaic_analyze::TimingAnalysis,
        voltaic_analyze::PipelineMap,
        voltaic_analyze::CdcReport,
    ) {
        let graph = voltaic_analyze::CircuitGraph::build(circuit);
        let timing = voltaic_analyze::analyze_timing(circuit, &graph);
        let pipeline = voltaic_analyze::pipeline_map(circuit, &graph, &timing);
        let cdc = voltaic_analyze::clock_domain_map(circuit, &graph);
        (timing, pipeline, cdc)
    }

    /// Proposes retiming plans for a target block (or the whole circuit).
    pub fn propose_retiming(
        &self,
        session_id: i64,
        branch: Option<&str>,
        target: Option<&str>,
        objective: &RetimingObjective,
    ) -> Result<Vec<RetimingPlan>, ServiceError> {
        let metadata = self.store.load_session(session_id)?;
        let branch = Self::resolve_branch(&metadata, branch)?;
        let circuit = self.branch_circuit(&metadata, &branch)?;
        let (timing, pipeline, cdc) = Self::analyses(&circuit);
        Ok(propose_retiming_plans(
            &circuit,
            target.unwrap_or("circuit"),
            &pipeline,
            &timing,
            &cdc,
            objective,
        ))
    }

    /// Scores retiming plans for a target without applying anything.
    pub fn evaluate_retiming(
        &self,
        session_id: i64,
        branch: Option<&str>,
        target: Option<&str>,
        objective: &RetimingObjective,
    ) -> Result<RetimingOptimizationResult, ServiceError> {
        let metadata = self.store.load_session(session_id)?;
        let branch = Self::resolve_branch(&metadata, branch)?;
        let circuit = self.branch_circuit(&metadata, &branch)?;
        let (timing, pipeline, cdc) = Self::analyses(&circuit);
        let target = target.unwrap_or("circuit");
        let plans = propose_retiming_plans(&circuit, target, &pipeline, &timing, &cdc, objective);
        Ok(evaluate_retiming_plans(
            target,
            &plans,
            objective,
            Some(&pipeline),
            Some(&timing),
            Some(&cdc),
        ))
    }

    /// Applies a retiming plan (selected by id) under `options`.
    ///
    /// `objective` must be the one the plan was proposed under: plans are
    /// re-derived here and matched by id, and the id commits to the
    /// objective and the move set, so a mismatched objective yields a
    /// lookup miss rather than a silently different move body.
    pub fn apply_retiming(
        &self,
        session_id: i64,
        branch: Option<&str>,
        target: Option<&str>,
        plan_id: &str,
        objective: &RetimingObjective,
        options: &RetimingApplicationOptions,
    ) -> Result<RetimingApplicationResult, ServiceError> {
        let entry = self.resident(session_id)?;
        let mut resident = Self::lock_resident(&entry)?;
        let mut metadata = self.store.load_session(session_id)?;
        let branch = Self::resolve_branch(&metadata, branch)?;
        let circuit = self.branch_circuit(&metadata, &branch)?;
        let (timing, pipeline, cdc) = Self::analyses(&circuit);
        let plans = propose_retiming_plans(
            &circuit,
            target.unwrap_or("circuit"),
            &pipeline,
            &timing,
            &cdc,
            objective,
        );
        let plan = plans.into_iter().find(|p| p.id == plan_id).ok_or_else(|| {
            ServiceError::new(
                ErrorCode::InvalidArgument,
                format!("no such retiming plan: {plan_id}"),
            )
        })?;

        let (transformation, mut result) = build_transformation_plan(&plan, options);
        let ops = TransformationEngine::materialize(&transformation);
        let new_head = self.append_ops_in_branch(&mut metadata, &branch, ops)?;
        result.new_circuit_revision = new_head;
        resident.machine = None;
        info!(
            session_id,
            plan_id,
            applied = result.applied_move_ids.len(),
            skipped = result.skipped_move_ids.len(),
            "retiming applied"
        );
        Ok(result)
    }

    // ── Global pipelining ───────────────────────────────────────────────

    /// Proposes subsystem-level pipelining plans composed from per-block
    /// retiming results.
    pub fn propose_global_pipelining(
        &self,
        session_id: i64,
        branch: Option<&str>,
        subsystem_id: &str,
        objective: &GlobalPipeliningObjective,
    ) -> Result<Vec<GlobalPipeliningPlan>, ServiceError> {
        let metadata = self.store.load_session(session_id)?;
        let branch = Self::resolve_branch(&metadata, branch)?;
        let circuit = self.branch_circuit(&metadata, &branch)?;
        let (timing, pipeline, cdc) = Self::analyses(&circuit);

        let blocks = voltaic_analyze::infer_blocks(&circuit);
        let block_ids: Vec<String> = blocks.iter().map(|b| b.id.clone()).collect();
        let local_objective = RetimingObjective::default();
        let per_block: Vec<RetimingOptimizationResult> = block_ids
            .iter()
            .map(|block_id| {
                let plans = propose_retiming_plans(
                    &circuit,
                    block_id,
                    &pipeline,
                    &timing,
                    &cdc,
                    &local_objective,
                );
                evaluate_retiming_plans(
                    block_id,
                    &plans,
                    &local_objective,
                    Some(&pipeline),
                    Some(&timing),
                    Some(&cdc),
                )
            })
            .collect();

        let global_map = GlobalPipelineMap {
            subsystem_id: subsystem_id.to_owned(),
            block_ids: block_ids.clone(),
            max_total_depth: timing.max_depth,
            ..GlobalPipelineMap::default()
        };
        Ok(propose_global_pipelining_plans(
            subsystem_id,
            &block_ids,
            objective,
            &global_map,
            &per_block,
        ))
    }

    /// Applies a global pipelining plan: per-block retiming application in
    /// step order. A failing step rolls the branch log back to its pre-plan
    /// state and abandons the remaining steps.
    pub fn apply_global_pipelining(
        &self,
        session_id: i64,
        branch: Option<&str>,
        subsystem_id: &str,
        plan_id: &str,
        options: &RetimingApplicationOptions,
        objective: &GlobalPipeliningObjective,
    ) -> Result<Vec<RetimingApplicationResult>, ServiceError> {
        let plans =
            self.propose_global_pipelining(session_id, branch, subsystem_id, objective)?;
        let plan = plans.into_iter().find(|p| p.id == plan_id).ok_or_else(|| {
            ServiceError::new(
                ErrorCode::InvalidArgument,
                format!("no such global plan: {plan_id}"),
            )
        })?;

        let metadata = self.store.load_session(session_id)?;
        let branch = Self::resolve_branch(&metadata, branch)?;
        let session_dir = self.store.session_dir(session_id);
        let log_before = load_branch_ops(&session_dir, &branch)?;
        let head_before = Self::branch_meta(&metadata, &branch)?.head_revision;

        // Per-block plans were proposed and scored under the default local
        // objective (see propose_global_pipelining); application must
        // re-derive under the same one for the plan ids to resolve.
        let local_objective = RetimingObjective::default();
        let mut results = Vec::new();
        for step in &plan.steps {
            match self.apply_retiming(
                session_id,
                Some(&branch),
                Some(&step.block_id),
                &step.retiming_plan_id,
                &local_objective,
                options,
            ) {
                Ok(result) => results.push(result),
                Err(err) => {
                    // Roll the branch back to its pre-plan state, including
                    // the deprecated current-branch alias that
                    // append_ops_in_branch advances.
                    save_branch_ops(&session_dir, &branch, &log_before)?;
                    let mut metadata = self.store.load_session(session_id)?;
                    for b in &mut metadata.branches {
                        if b.name == branch {
                            b.head_revision = head_before;
                        }
                    }
                    if metadata.current_branch == branch {
                        metadata.circuit_revision = head_before;
                    }
                    self.store.save_session(&metadata)?;
                    warn!(session_id, plan_id, %err, "global plan rolled back");
                    return Err(err);
                }
            }
        }
        Ok(results)
    }

    /// The workspace this service serves.
    #[must_use]
    pub fn workspace(&self) -> &Path {
        self.store.workspace()
    }

    /// Directory of one session (for CLI artifact paths).
    #[must_use]
    pub fn session_dir(&self, session_id: i64) -> PathBuf {
        self.store.session_dir(session_id)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use voltaic_circuit::{ComponentClass, CustomPin};

    fn circuit_fixture() -> Circuit {
        let mut c = Circuit::new();
        for (id, class) in [
            ("k", ComponentClass::Constant),
            ("inv", ComponentClass::Not),
            ("r1", ComponentClass::Register),
            ("p", ComponentClass::Probe),
        ] {
            c.apply(EditOperation::AddComponent {
                id: id.into(),
                class,
                properties: std::collections::BTreeMap::new(),
                custom_pins: Vec::new(),
            })
            .unwrap();
        }
        for (a, b) in [("k.out", "inv.in"), ("inv.out", "r1.d"), ("r1.q", "p.in")] {
            c.apply(EditOperation::Connect {
                a: a.into(),
                b: b.into(),
            })
            .unwrap();
        }
        c
    }

    fn service_fixture() -> (tempfile::TempDir, SessionService, i64) {
        let dir = tempfile::tempdir().unwrap();
        let ws = dir.path().join("ws");
        SessionService::init_workspace(&ws).unwrap();
        let circuit_path = dir.path().join("demo.vltc");
        voltaic_circuit::save_circuit(&circuit_path, &circuit_fixture()).unwrap();
        let service = SessionService::new(&ws);
        let metadata = service.create_session(&circuit_path).unwrap();
        (dir, service, metadata.session_id)
    }

    #[test]
    fn run_ticks_snapshots_and_updates_metadata() {
        let (_dir, service, id) = service_fixture();
        let result = service.run_ticks(id, 5).unwrap();
        assert_eq!(result.ticks_run, 5);
        assert_eq!(result.total_ticks, 5);
        assert_eq!(result.machine_ticks, 5);
        assert!(!result.degraded);

        let state = service.get_state(id).unwrap();
        assert_eq!(state.session.total_ticks, 5);
        assert_eq!(state.latest_snapshot_tick, Some(5));
        // Snapshot-reconstructed hash matches the live run's hash.
        assert_eq!(state.state_hash.as_deref(), Some(result.state_hash.as_str()));
    }

    #[test]
    fn run_resumes_from_the_latest_snapshot() {
        let (_dir, service, id) = service_fixture();
        service.run_ticks(id, 3).unwrap();
        let second = service.run_ticks(id, 2).unwrap();
        assert_eq!(second.machine_ticks, 5);
        assert_eq!(second.total_ticks, 5);
    }

    #[test]
    fn branch_create_switch_delete_follow_the_contract() {
        let (_dir, service, id) = service_fixture();
        let created = service.create_branch(id, "exp", None, -1).unwrap();
        assert_eq!(created.branch.head_revision, 0);
        assert_eq!(created.branch.base_revision, 0);
        assert!(!created.branch.is_default);

        let switched = service.switch_branch(id, "exp").unwrap();
        assert_eq!(switched.current_branch, "exp");

        // Deleting the current branch fails.
        let err = service.delete_branch(id, "exp").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidEditOperation);

        service.switch_branch(id, "main").unwrap();
        let deleted = service.delete_branch(id, "exp").unwrap();
        assert_eq!(deleted.deleted_branch, "exp");
    }

    #[test]
    fn transformation_apply_advances_head_by_op_count() {
        let (_dir, service, id) = service_fixture();
        // Add a second inverter on a branch so a double inversion exists.
        let mut metadata = service.store.load_session(id).unwrap();
        let ops = vec![
            EditOperation::Disconnect {
                a: "inv.out".into(),
                b: "r1.d".into(),
            },
            EditOperation::AddComponent {
                id: "inv2".into(),
                class: ComponentClass::Not,
                properties: std::collections::BTreeMap::new(),
                custom_pins: Vec::new(),
            },
            EditOperation::Connect {
                a: "inv.out".into(),
                b: "inv2.in".into(),
            },
            EditOperation::Connect {
                a: "inv2.out".into(),
                b: "r1.d".into(),
            },
        ];
        service
            .append_ops_in_branch(&mut metadata, "main", ops)
            .unwrap();

        let plans = service
            .propose_transformations(id, None, None, 8)
            .unwrap();
        let plan = plans
            .iter()
            .find(|p| {
                p.kind == voltaic_rewrite::TransformationKind::SimplifyDoubleInversion
            })
            .unwrap();
        let head_before = service
            .list_branches(id)
            .unwrap()
            .branches
            .iter()
            .find(|b| b.name == "main")
            .unwrap()
            .head_revision;

        let (applied, new_head) = service
            .apply_transformation(id, None, &plan.id)
            .unwrap();
        let expected = i64::try_from(applied.op_count()).unwrap();
        assert_eq!(new_head, head_before + expected);

        // sim_revision lags until the next run.
        let branches = service.list_branches(id).unwrap();
        let main = branches.branches.iter().find(|b| b.name == "main").unwrap();
        assert_eq!(main.head_revision, new_head);
        assert!(main.sim_revision < new_head);
    }

    #[test]
    fn merge_fast_forwards_when_target_is_unchanged() {
        let (_dir, service, id) = service_fixture();
        service.create_branch(id, "exp", None, -1).unwrap();
        service.switch_branch(id, "exp").unwrap();
        let mut metadata = service.store.load_session(id).unwrap();
        service
            .append_ops_in_branch(
                &mut metadata,
                "exp",
                vec![EditOperation::AddComponent {
                    id: "extra".into(),
                    class: ComponentClass::Buffer,
                    properties: std::collections::BTreeMap::new(),
                    custom_pins: Vec::new(),
                }],
            )
            .unwrap();
        service.switch_branch(id, "main").unwrap();

        let result = service.merge_branches(id, "exp", "main", false).unwrap();
        assert!(result.fast_forward);
        assert_eq!(result.merged_ops_count, 1);
        assert_eq!(result.target_new_revision, 1);
    }

    #[test]
    fn conflicting_merge_without_allow_merge_is_a_conflict_error() {
        let (_dir, service, id) = service_fixture();
        service.create_branch(id, "exp", None, -1).unwrap();
        let mut metadata = service.store.load_session(id).unwrap();
        // Both branches remove the same component.
        let remove = EditOperation::RemoveComponent {
            id: "p".into(),
            cascade: true,
            detached: Vec::new(),
        };
        service
            .append_ops_in_branch(&mut metadata, "exp", vec![remove.clone()])
            .unwrap();
        let mut metadata = service.store.load_session(id).unwrap();
        service
            .append_ops_in_branch(&mut metadata, "main", vec![remove])
            .unwrap();

        let err = service
            .merge_branches(id, "exp", "main", false)
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::Conflict);

        // With allow_merge, the double remove resolves to nothing new.
        let ok = service.merge_branches(id, "exp", "main", true).unwrap();
        assert_eq!(ok.merged_ops_count, 0);
    }

    #[test]
    fn retiming_apply_moves_a_register_and_advances_the_head() {
        let (_dir, service, id) = service_fixture();
        // k -> inv -> r1 admits one safe backward move of r1 across inv.
        let objective = RetimingObjective::default();
        let plans = service.propose_retiming(id, None, None, &objective).unwrap();
        assert_eq!(plans.len(), 1);
        assert!(plans[0].is_valid());
        let plan_id = plans[0].id.clone();

        let result = service
            .apply_retiming(
                id,
                None,
                None,
                &plan_id,
                &objective,
                &RetimingApplicationOptions::default(),
            )
            .unwrap();
        assert_eq!(result.applied_move_ids.len(), 1);
        assert!(result.skipped_move_ids.is_empty());
        assert!(result.all_moves_safe);
        assert!(result.new_circuit_revision > 0);

        let branches = service.list_branches(id).unwrap();
        let main = branches.branches.iter().find(|b| b.name == "main").unwrap();
        assert_eq!(main.head_revision, result.new_circuit_revision);
        // The rewired branch still elaborates and runs.
        let run = service.run_ticks(id, 3).unwrap();
        assert!(!run.degraded);
    }

    #[test]
    fn retiming_apply_requires_the_proposing_objective() {
        let (_dir, service, id) = service_fixture();
        let balance = voltaic_rewrite::RetimingObjective {
            kind: voltaic_rewrite::RetimingObjectiveKind::BalanceStages,
            ..RetimingObjective::default()
        };
        let plans = service.propose_retiming(id, None, None, &balance).unwrap();
        let plan_id = plans[0].id.clone();

        // A different objective derives differently-identified plans, so the
        // stale id is rejected instead of resolving to another move body.
        let err = service
            .apply_retiming(
                id,
                None,
                None,
                &plan_id,
                &RetimingObjective::default(),
                &RetimingApplicationOptions::default(),
            )
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidArgument);

        let result = service
            .apply_retiming(
                id,
                None,
                None,
                &plan_id,
                &balance,
                &RetimingApplicationOptions::default(),
            )
            .unwrap();
        assert_eq!(result.applied_move_ids.len(), 1);
    }

    #[test]
    fn custom_pins_round_trip_through_branch_logs() {
        // Guards the serde shape of CustomPin in branch log files.
        let (_dir, service, id) = service_fixture();
        let mut metadata = service.store.load_session(id).unwrap();
        service
            .append_ops_in_branch(
                &mut metadata,
                "main",
                vec![EditOperation::AddComponent {
                    id: "plug".into(),
                    class: ComponentClass::Custom("ext".into()),
                    properties: std::collections::BTreeMap::new(),
                    custom_pins: vec![CustomPin {
                        name: "io".into(),
                        direction: voltaic_circuit::PinDirection::Bidirectional,
                        width: 1,
                    }],
                }],
            )
            .unwrap();
        let branches = service.list_branches(id).unwrap();
        let main = branches.branches.iter().find(|b| b.name == "main").unwrap();
        assert_eq!(main.head_revision, 1);
    }
}
