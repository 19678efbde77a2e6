// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Retiming plan evaluation and ranking.

use serde::{Deserialize, Serialize};
use voltaic_analyze::{CdcReport, PipelineMap, TimingAnalysis};

use crate::retiming::{RetimingMoveSafety, RetimingPlan};

/// What the optimizer is asked to improve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetimingObjectiveKind {
    /// Reduce the critical combinational depth.
    MinimizeMaxDepth,
    /// Reduce depth while respecting register/move budgets.
    MinimizeDepthWithBudget,
    /// Spread depth more evenly across stages.
    BalanceStages,
}

/// Objective plus optional budgets. Negative budgets mean "no limit".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetimingObjective {
    /// What to optimize.
    pub kind: RetimingObjectiveKind,
    /// Budget for added registers (unused by pure moves; kept for duplicating
    /// moves a future proposal generator may emit).
    pub max_extra_registers: i64,
    /// Limit on moves applied per plan.
    pub max_moves: i64,
    /// Desired upper bound on critical depth.
    pub target_max_depth: i64,
}

impl Default for RetimingObjective {
    fn default() -> Self {
        Self {
            kind: RetimingObjectiveKind::MinimizeMaxDepth,
            max_extra_registers: -1,
            max_moves: -1,
            target_max_depth: -1,
        }
    }
}

/// Score card for one plan. Lower `cost` ranks earlier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetimingPlanScore {
    /// The scored plan.
    pub plan_id: String,
    /// Critical depth before.
    pub estimated_max_depth_before: u32,
    /// Estimated critical depth after.
    pub estimated_max_depth_after: u32,
    /// Moves the plan would apply.
    pub applied_move_count: usize,
    /// Safe moves among them.
    pub safe_move_count: usize,
    /// Suspicious moves among them.
    pub suspicious_move_count: usize,
    /// Forbidden moves (0 for any valid plan).
    pub forbidden_move_count: usize,
    /// Register count before (pure moves keep it).
    pub estimated_register_count_before: usize,
    /// Register count after.
    pub estimated_register_count_after: usize,
    /// True when no move crosses a CDC hazard.
    pub respects_cdc_fences: bool,
    /// Whether the plan satisfies the objective under its budgets.
    pub meets_objective: bool,
    /// Scalar ranking cost, lower is better.
    pub cost: f64,
}

/// Evaluation result: scores sorted by cost, best plan id first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetimingOptimizationResult {
    /// Block or subsystem id.
    pub target_id: String,
    /// The objective evaluated against.
    pub objective: RetimingObjective,
    /// Scores, cost-ascending.
    pub plan_scores: Vec<RetimingPlanScore>,
    /// Id of the cheapest plan, when any was scored.
    pub best_plan_id: Option<String>,
}

/// Scores `plans` against `objective` without applying anything.
///
/// `pipeline`, `timing`, and `cdc` refine the estimates when provided; a
/// plan's own aggregates are the fallback.
#[must_use]
pub fn evaluate_retiming_plans(
    target_id: &str,
    plans: &[RetimingPlan],
    objective: &RetimingObjective,
    pipeline: Option<&PipelineMap>,
    timing: Option<&TimingAnalysis>,
    cdc: Option<&CdcReport>,
) -> RetimingOptimizationResult {
    let register_count = pipeline.map_or(0, |p| p.register_stage.len());
    let baseline_depth = timing.map_or(0, |t| t.max_depth);

    let mut plan_scores: Vec<RetimingPlanScore> = plans
        .iter()
        .map(|plan| score_plan(plan, objective, register_count, baseline_depth, cdc))
        .collect();
    plan_scores.sort_by(|a, b| {
        a.cost
            .partial_cmp(&b.cost)
            .unwrap_or(core::cmp::Ordering::Equal)
            .then_with(|| a.plan_id.cmp(&b.plan_id))
    });

    RetimingOptimizationResult {
        target_id: target_id.to_owned(),
        objective: *objective,
        best_plan_id: plan_scores.first().map(|s| s.plan_id.clone()),
        plan_scores,
    }
}

#[allow(clippy::cast_precision_loss)]
fn score_plan(
    plan: &RetimingPlan,
    objective: &RetimingObjective,
    register_count: usize,
    baseline_depth: u32,
    cdc: Option<&CdcReport>,
) -> RetimingPlanScore {
    let safe = plan
        .moves
        .iter()
        .filter(|m| m.safety == RetimingMoveSafety::SafeIntraDomain)
        .count();
    let suspicious = plan
        .moves
        .iter()
        .filter(|m| m.safety == RetimingMoveSafety::Suspicious)
        .count();
    let forbidden = plan
        .moves
        .iter()
        .filter(|m| m.safety == RetimingMoveSafety::Forbidden)
        .count();

    let before = if baseline_depth > 0 {
        baseline_depth.max(plan.estimated_max_depth_before)
    } else {
        plan.estimated_max_depth_before
    };
    let after = plan.estimated_max_depth_after;

    // Fences: the plan's own flag, tightened by a CDC cross-check when the
    // report is available.
    let respects = plan.respects_cdc_fences
        && cdc.is_none_or(|report| {
            plan.moves
                .iter()
                .all(|m| !report.crosses(&m.dst_reg_id, &m.src_reg_id))
        });

    let within_move_budget =
        objective.max_moves < 0 || plan.moves.len() <= usize::try_from(objective.max_moves).unwrap_or(usize::MAX);
    let meets_depth_target = objective.target_max_depth < 0
        || u64::from(after) <= u64::try_from(objective.target_max_depth).unwrap_or(u64::MAX);
    let meets_objective = match objective.kind {
        RetimingObjectiveKind::MinimizeMaxDepth => after < before && respects,
        RetimingObjectiveKind::MinimizeDepthWithBudget => {
            after < before && respects && within_move_budget && meets_depth_target
        }
        RetimingObjectiveKind::BalanceStages => respects && within_move_budget,
    };

    // Depth dominates; suspicious moves and churn are tie-breakers,
    // forbidden moves are effectively disqualifying.
    let cost = f64::from(after)
        + 0.25 * suspicious as f64
        + 0.05 * plan.moves.len() as f64
        + 100.0 * forbidden as f64
        + if respects { 0.0 } else { 50.0 };

    RetimingPlanScore {
        plan_id: plan.id.clone(),
        estimated_max_depth_before: before,
        estimated_max_depth_after: after,
        applied_move_count: plan.moves.len(),
        safe_move_count: safe,
        suspicious_move_count: suspicious,
        forbidden_move_count: forbidden,
        estimated_register_count_before: register_count,
        estimated_register_count_after: register_count,
        respects_cdc_fences: respects,
        meets_objective,
        cost,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::retiming::testutil::{analyses, retimable_circuit};
    use crate::retiming::propose_retiming_plans;

    #[test]
    fn scores_come_back_cost_sorted_with_a_best_plan() {
        let circuit = retimable_circuit();
        let (timing, pipeline, cdc) = analyses(&circuit);
        let objective = RetimingObjective::default();
        let plans =
            propose_retiming_plans(&circuit, "blk_0", &pipeline, &timing, &cdc, &objective);
        let result = evaluate_retiming_plans(
            "blk_0",
            &plans,
            &objective,
            Some(&pipeline),
            Some(&timing),
            Some(&cdc),
        );
        assert_eq!(result.plan_scores.len(), plans.len());
        assert!(result.best_plan_id.is_some());
        assert!(result
            .plan_scores
            .windows(2)
            .all(|w| w[0].cost <= w[1].cost));
        for score in &result.plan_scores {
            assert_eq!(score.forbidden_move_count, 0);
            assert!(score.respects_cdc_fences);
        }
    }

    #[test]
    fn depth_reducing_plan_meets_the_minimize_objective() {
        let circuit = retimable_circuit();
        let (timing, pipeline, cdc) = analyses(&circuit);
        let objective = RetimingObjective::default();
        let plans =
            propose_retiming_plans(&circuit, "blk_0", &pipeline, &timing, &cdc, &objective);
        let result =
            evaluate_retiming_plans("blk_0", &plans, &objective, Some(&pipeline), Some(&timing), Some(&cdc));
        assert!(result.plan_scores.iter().any(|s| s.meets_objective));
    }
}
