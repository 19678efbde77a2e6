// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Global pipelining: composing per-block retiming into subsystem plans.

use serde::{Deserialize, Serialize};
use voltaic_circuit::ComponentId;

use crate::opt::RetimingOptimizationResult;

/// One end-to-end path through a subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPipelinePath {
    /// Path id.
    pub path_id: String,
    /// Registers along the path, in traversal order.
    pub reg_ids: Vec<ComponentId>,
    /// Blocks the path crosses (may repeat).
    pub block_ids: Vec<String>,
    /// Clock domain of the path.
    pub domain_id: u32,
    /// Register-to-register hops.
    pub total_stages: u32,
    /// Sum of per-segment depth estimates.
    pub total_comb_depth_estimate: u32,
    /// Depth between consecutive registers.
    pub segment_depths: Vec<u32>,
}

/// One stage band across blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPipelineStage {
    /// Stage index along the reference path.
    pub stage_index: u32,
    /// Clock domain.
    pub domain_id: u32,
    /// Registers conceptually in this stage, across blocks.
    pub reg_ids: Vec<ComponentId>,
    /// Blocks contributing logic to this stage.
    pub block_ids: Vec<String>,
    /// Worst combinational depth in the stage.
    pub max_comb_depth_estimate: u32,
}

/// Subsystem-level pipeline model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPipelineMap {
    /// Subsystem id.
    pub subsystem_id: String,
    /// Member blocks.
    pub block_ids: Vec<String>,
    /// Stage bands.
    pub stages: Vec<GlobalPipelineStage>,
    /// End-to-end paths of interest.
    pub paths: Vec<GlobalPipelinePath>,
    /// Worst end-to-end depth, when known.
    pub max_total_depth: u32,
}

/// Strategy selector for subsystem pipelining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GlobalPipeliningStrategyKind {
    /// Equalize per-stage depth.
    BalanceStages,
    /// Reduce the worst end-to-end depth.
    ReduceCriticalPath,
}

/// Strategy plus budgets. Negative budgets mean "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPipeliningObjective {
    /// Strategy.
    pub kind: GlobalPipeliningStrategyKind,
    /// Desired stage count (latency bound).
    pub target_stage_count: i64,
    /// Desired per-stage depth bound.
    pub target_max_depth: i64,
    /// Register budget.
    pub max_extra_registers: i64,
    /// Total move budget.
    pub max_total_moves: i64,
}

/// One step: apply a named local retiming plan in a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPipeliningStep {
    /// The block.
    pub block_id: String,
    /// A local retiming plan id within that block.
    pub retiming_plan_id: String,
}

/// A composed subsystem plan; steps apply in order, and a failed step rolls
/// the branch back to its pre-plan state while the remaining steps are
/// abandoned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalPipeliningPlan {
    /// Plan id (`GPP_…`).
    pub id: String,
    /// Subsystem id.
    pub subsystem_id: String,
    /// Member blocks.
    pub block_ids: Vec<String>,
    /// Objective the plan was composed under.
    pub objective: GlobalPipeliningObjective,
    /// Local plans to apply, in order.
    pub steps: Vec<GlobalPipeliningStep>,
    /// Estimated end-to-end depth before.
    pub estimated_global_depth_before: u32,
    /// Estimated end-to-end depth after.
    pub estimated_global_depth_after: u32,
    /// True when every referenced local plan respects CDC fences.
    pub respects_cdc_fences: bool,
}

/// Composes global plans from per-block optimization results.
///
/// One plan per viable composition: the "best local plan per block" under
/// the objective. Blocks without a scored plan are skipped; a subsystem
/// where no block has one yields no plans.
#[must_use]
pub fn propose_global_pipelining_plans(
    subsystem_id: &str,
    block_ids: &[String],
    objective: &GlobalPipeliningObjective,
    global_pipeline: &GlobalPipelineMap,
    per_block_results: &[RetimingOptimizationResult],
) -> Vec<GlobalPipeliningPlan> {
    let mut steps = Vec::new();
    let mut depth_after = 0u32;
    let mut respects = true;
    let mut total_moves = 0usize;

    for block_id in block_ids {
        let Some(result) = per_block_results.iter().find(|r| &r.target_id == block_id) else {
            continue;
        };
        let Some(best_id) = &result.best_plan_id else {
            continue;
        };
        let Some(score) = result.plan_scores.iter().find(|s| &s.plan_id == best_id) else {
            continue;
        };
        if objective.max_total_moves >= 0 {
            let budget = usize::try_from(objective.max_total_moves).unwrap_or(usize::MAX);
            if total_moves + score.applied_move_count > budget {
                continue;
            }
        }
        total_moves += score.applied_move_count;
        depth_after = depth_after.max(score.estimated_max_depth_after);
        respects = respects && score.respects_cdc_fences;
        steps.push(GlobalPipeliningStep {
            block_id: block_id.clone(),
            retiming_plan_id: best_id.clone(),
        });
    }

    if steps.is_empty() {
        return Vec::new();
    }

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"voltaic:global-plan:");
    hasher.update(subsystem_id.as_bytes());
    for step in &steps {
        hasher.update(step.retiming_plan_id.as_bytes());
    }
    let id = format!("GPP_{}", &hex::encode(hasher.finalize().as_bytes())[..10]);

    vec![GlobalPipeliningPlan {
        id,
        subsystem_id: subsystem_id.to_owned(),
        block_ids: block_ids.to_vec(),
        objective: *objective,
        steps,
        estimated_global_depth_before: global_pipeline.max_total_depth,
        estimated_global_depth_after: depth_after,
        respects_cdc_fences: respects,
    }]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::opt::{
        evaluate_retiming_plans, RetimingObjective,
    };
    use crate::retiming::propose_retiming_plans;
    use crate::retiming::testutil::{analyses, retimable_circuit};

    fn objective() -> GlobalPipeliningObjective {
        GlobalPipeliningObjective {
            kind: GlobalPipeliningStrategyKind::ReduceCriticalPath,
            target_stage_count: -1,
            target_max_depth: -1,
            max_extra_registers: -1,
            max_total_moves: -1,
        }
    }

    #[test]
    fn composes_best_local_plan_per_block() {
        let circuit = retimable_circuit();
        let (timing, pipeline, cdc) = analyses(&circuit);
        let local_objective = RetimingObjective::default();
        let plans = propose_retiming_plans(
            &circuit,
            "blk_0",
            &pipeline,
            &timing,
            &cdc,
            &local_objective,
        );
        let result = evaluate_retiming_plans(
            "blk_0",
            &plans,
            &local_objective,
            Some(&pipeline),
            Some(&timing),
            Some(&cdc),
        );

        let global = propose_global_pipelining_plans(
            "subsys",
            &["blk_0".to_owned()],
            &objective(),
            &GlobalPipelineMap::default(),
            &[result.clone()],
        );
        assert_eq!(global.len(), 1);
        assert_eq!(global[0].steps.len(), 1);
        assert_eq!(
            Some(&global[0].steps[0].retiming_plan_id),
            result.best_plan_id.as_ref()
        );
        assert!(global[0].respects_cdc_fences);
    }

    #[test]
    fn no_scored_blocks_means_no_plans() {
        let global = propose_global_pipelining_plans(
            "subsys",
            &["blk_0".to_owned()],
            &objective(),
            &GlobalPipelineMap::default(),
            &[],
        );
        assert!(global.is_empty());
    }
}
