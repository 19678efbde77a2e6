// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Retiming application: move selection and plan lowering.
//!
//! Selection semantics are fixed:
//! - `Forbidden` moves are never applied;
//! - `Suspicious` moves are applied only when `allow_suspicious_moves`;
//! - `max_moves >= 0` caps the applied count, in plan order;
//! - everything else follows `apply_only_safe_moves` (the default).
//!
//! The accepted moves lower into a [`TransformationPlan`] whose steps are
//! the moves' edit operations; appending those ops to a branch is the
//! session layer's job, which advances `head_revision` by exactly the op
//! count.

use serde::{Deserialize, Serialize};

use crate::retiming::{RetimingMove, RetimingMoveSafety, RetimingPlan};
use crate::transform::{
    PreservationLevel, TransformationKind, TransformationPlan, TransformationStep,
    TransformationTarget,
};

/// Knobs for one application pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetimingApplicationOptions {
    /// Ignore everything but `SafeIntraDomain` moves (default true).
    pub apply_only_safe_moves: bool,
    /// Also accept `Suspicious` moves (default false).
    pub allow_suspicious_moves: bool,
    /// Cap on applied moves; negative means no limit.
    pub max_moves: i64,
}

impl Default for RetimingApplicationOptions {
    fn default() -> Self {
        Self {
            apply_only_safe_moves: true,
            allow_suspicious_moves: false,
            max_moves: -1,
        }
    }
}

/// What one application pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetimingApplicationResult {
    /// The retiming plan applied.
    pub plan_id: String,
    /// Block or subsystem id.
    pub target_id: String,
    /// Moves actually applied, in order.
    pub applied_move_ids: Vec<String>,
    /// Moves skipped by safety or the cap.
    pub skipped_move_ids: Vec<String>,
    /// Branch head after application; -1 when nothing was appended yet.
    pub new_circuit_revision: i64,
    /// Critical depth before, from the plan.
    pub estimated_max_depth_before: u32,
    /// Estimated critical depth after.
    pub estimated_max_depth_after: u32,
    /// True when every applied move was `SafeIntraDomain`.
    pub all_moves_safe: bool,
}

/// Splits a plan's moves into (applied, skipped) under `options`.
#[must_use]
pub fn select_moves<'a>(
    plan: &'a RetimingPlan,
    options: &RetimingApplicationOptions,
) -> (Vec<&'a RetimingMove>, Vec<&'a RetimingMove>) {
    let mut applied = Vec::new();
    let mut skipped = Vec::new();
    for m in &plan.moves {
        let cap_reached = options.max_moves >= 0
            && applied.len() >= usize::try_from(options.max_moves).unwrap_or(usize::MAX);
        let accept = !cap_reached
            && match m.safety {
                RetimingMoveSafety::SafeIntraDomain => true,
                RetimingMoveSafety::Suspicious => options.allow_suspicious_moves,
                RetimingMoveSafety::Forbidden => false,
            };
        if accept {
            applied.push(m);
        } else {
            skipped.push(m);
        }
    }
    (applied, skipped)
}

/// Lowers the accepted subset of `plan` into a [`TransformationPlan`] plus
/// the application summary (revision not yet filled in).
#[must_use]
pub fn build_transformation_plan(
    plan: &RetimingPlan,
    options: &RetimingApplicationOptions,
) -> (TransformationPlan, RetimingApplicationResult) {
    let (applied, skipped) = select_moves(plan, options);
    let all_moves_safe = applied
        .iter()
        .all(|m| m.safety == RetimingMoveSafety::SafeIntraDomain);

    let steps: Vec<TransformationStep> = applied
        .iter()
        .map(|m| TransformationStep {
            description: format!(
                "move {} {} across {}",
                m.src_reg_id,
                match m.direction {
                    crate::retiming::RetimingMoveDirection::Forward => "forward",
                    crate::retiming::RetimingMoveDirection::Backward => "backward",
                },
                m.affected_ops.join(", "),
            ),
            ops: m.ops.clone(),
        })
        .collect();

    let transformation = TransformationPlan {
        id: format!("{}_APPLY", plan.id),
        kind: TransformationKind::RetimeRegisters,
        target: TransformationTarget {
            subject_id: plan.target_id.clone(),
            subject_kind: "block".to_owned(),
        },
        // Retiming preserves I/O behavior modulo pipeline latency; latency
        // preservation is deliberately not claimed.
        guarantees: vec![PreservationLevel::IoContractPreserved],
        steps,
    };

    let result = RetimingApplicationResult {
        plan_id: plan.id.clone(),
        target_id: plan.target_id.clone(),
        applied_move_ids: applied.iter().map(|m| m.move_id.clone()).collect(),
        skipped_move_ids: skipped.iter().map(|m| m.move_id.clone()).collect(),
        new_circuit_revision: -1,
        estimated_max_depth_before: plan.estimated_max_depth_before,
        estimated_max_depth_after: plan.estimated_max_depth_after,
        all_moves_safe,
    };
    (transformation, result)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::retiming::{RetimingMove, RetimingMoveDirection, RetimingPlan};

    fn mv(id: &str, safety: RetimingMoveSafety) -> RetimingMove {
        RetimingMove {
            move_id: id.to_owned(),
            src_reg_id: "r".into(),
            dst_reg_id: "s".into(),
            direction: RetimingMoveDirection::Backward,
            domain_id: 0,
            src_stage_index: 1,
            dst_stage_index: 0,
            before_comb_depth: 2,
            after_comb_depth_est: 1,
            safety,
            safety_reason: String::new(),
            affected_ops: vec!["c".to_owned()],
            ops: Vec::new(),
        }
    }

    fn plan() -> RetimingPlan {
        RetimingPlan {
            id: "RTP_TEST".to_owned(),
            target_id: "blk".to_owned(),
            description: "fixture".to_owned(),
            moves: vec![
                mv("m1", RetimingMoveSafety::SafeIntraDomain),
                mv("m2", RetimingMoveSafety::Suspicious),
                mv("m3", RetimingMoveSafety::Forbidden),
            ],
            estimated_max_depth_before: 2,
            estimated_max_depth_after: 1,
            respects_cdc_fences: false,
        }
    }

    #[test]
    fn default_options_apply_only_the_safe_move() {
        let plan = plan();
        let (_, result) = build_transformation_plan(&plan, &RetimingApplicationOptions::default());
        assert_eq!(result.applied_move_ids, vec!["m1"]);
        assert_eq!(result.skipped_move_ids, vec!["m2", "m3"]);
        assert!(result.all_moves_safe);
    }

    #[test]
    fn allow_suspicious_admits_m2_and_clears_the_safe_flag() {
        let plan = plan();
        let options = RetimingApplicationOptions {
            allow_suspicious_moves: true,
            ..Default::default()
        };
        let (_, result) = build_transformation_plan(&plan, &options);
        assert_eq!(result.applied_move_ids, vec!["m1", "m2"]);
        assert_eq!(result.skipped_move_ids, vec!["m3"]);
        assert!(!result.all_moves_safe);
    }

    #[test]
    fn max_moves_caps_regardless_of_safety_settings() {
        let plan = plan();
        let options = RetimingApplicationOptions {
            allow_suspicious_moves: true,
            max_moves: 1,
            ..Default::default()
        };
        let (_, result) = build_transformation_plan(&plan, &options);
        assert_eq!(result.applied_move_ids, vec!["m1"]);
        assert_eq!(result.skipped_move_ids, vec!["m2", "m3"]);
    }

    #[test]
    fn forbidden_moves_never_apply() {
        let plan = plan();
        let options = RetimingApplicationOptions {
            apply_only_safe_moves: false,
            allow_suspicious_moves: true,
            max_moves: -1,
        };
        let (_, result) = build_transformation_plan(&plan, &options);
        assert!(!result.applied_move_ids.contains(&"m3".to_owned()));
    }

    #[test]
    fn lowered_plan_carries_one_step_per_applied_move() {
        let plan = plan();
        let options = RetimingApplicationOptions {
            allow_suspicious_moves: true,
            ..Default::default()
        };
        let (transformation, result) = build_transformation_plan(&plan, &options);
        assert_eq!(transformation.steps.len(), result.applied_move_ids.len());
        assert_eq!(transformation.kind, TransformationKind::RetimeRegisters);
    }
}
