// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! voltaic-rewrite: behavior-preserving rewrite engines.
//!
//! Three engines layer on the analyzer:
//! - the [`TransformationEngine`] discovers structural rewrite opportunities
//!   and materializes them into edit-operation lists (pure - callers preview,
//!   dry-run, or queue);
//! - the retiming engine proposes register movements with safety
//!   classification and applies the accepted subset through the
//!   transformation layer;
//! - the global pipelining engine composes per-block retiming results into
//!   subsystem-level plans.

mod apply;
mod opt;
mod pipeline;
mod resolver;
mod retiming;
mod transform;
mod verify;

pub use apply::{
    build_transformation_plan, select_moves, RetimingApplicationOptions,
    RetimingApplicationResult,
};
pub use opt::{
    evaluate_retiming_plans, RetimingObjective, RetimingObjectiveKind, RetimingOptimizationResult,
    RetimingPlanScore,
};
pub use pipeline::{
    propose_global_pipelining_plans, GlobalPipelineMap, GlobalPipelinePath, GlobalPipelineStage,
    GlobalPipeliningObjective, GlobalPipeliningPlan, GlobalPipeliningStep,
    GlobalPipeliningStrategyKind,
};
pub use resolver::resolve_conflicts;
pub use retiming::{
    propose_retiming_plans, RetimingMove, RetimingMoveDirection, RetimingMoveSafety, RetimingPlan,
};
pub use transform::{
    PreservationLevel, TransformationEngine, TransformationKind, TransformationPlan,
    TransformationStep, TransformationTarget,
};
pub use verify::{verify_behavior_preserved, VerifyError};
