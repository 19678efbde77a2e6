// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Retiming model and proposal generation.
//!
//! A retiming move slides one register across one adjacent combinational
//! component. Only moves that are *exactly* materializable are proposed: the
//! component being crossed must be single-input/single-output and must feed
//! (or be fed by) the register exclusively, so the rewiring is a clean swap
//! and input–output behavior is preserved modulo pipeline latency. Moves are
//! classified `SafeIntraDomain`, `Suspicious`, or `Forbidden`; proposed
//! plans never contain a `Forbidden` move.

use serde::{Deserialize, Serialize};
use voltaic_analyze::{CdcReport, PipelineMap, TimingAnalysis};
use voltaic_circuit::{Circuit, ComponentClass, ComponentId, EditOperation, PinId};

use crate::opt::{RetimingObjective, RetimingObjectiveKind};

/// Which way a register slides.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetimingMoveDirection {
    /// Toward the outputs (later in the pipeline).
    Forward,
    /// Toward the inputs (earlier in the pipeline).
    Backward,
}

/// Safety classification, fixed by rule, never by judgement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetimingMoveSafety {
    /// Same clock domain, no CDC crossing on any affected edge.
    SafeIntraDomain,
    /// Heuristically risky (wired enables, shared upstream logic); applied
    /// only when the caller opts in.
    Suspicious,
    /// Crosses a CDC fence or moves a synchronizer; never applied.
    Forbidden,
}

/// One register-movement proposal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetimingMove {
    /// Stable move id (`RTM_…`).
    pub move_id: String,
    /// Register being moved.
    pub src_reg_id: ComponentId,
    /// Register on the far side of the affected path (the stage anchor).
    pub dst_reg_id: ComponentId,
    /// Movement direction.
    pub direction: RetimingMoveDirection,
    /// Clock domain of the move.
    pub domain_id: u32,
    /// Pipeline stage of the moved register.
    pub src_stage_index: u32,
    /// Stage of the anchor register.
    pub dst_stage_index: u32,
    /// Combinational depth on the affected path before the move.
    pub before_comb_depth: u32,
    /// Estimated depth after the move.
    pub after_comb_depth_est: u32,
    /// Safety classification.
    pub safety: RetimingMoveSafety,
    /// Why the classification came out this way.
    pub safety_reason: String,
    /// Components the rewiring touches.
    pub affected_ops: Vec<String>,
    /// Edit operations that realize the move exactly.
    pub ops: Vec<EditOperation>,
}

/// An ordered set of moves targeting one block or subsystem.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetimingPlan {
    /// Plan id (`RTP_…`).
    pub id: String,
    /// Block or subsystem id.
    pub target_id: String,
    /// Short human-readable summary.
    pub description: String,
    /// Moves in application order.
    pub moves: Vec<RetimingMove>,
    /// Critical depth before the plan.
    pub estimated_max_depth_before: u32,
    /// Estimated critical depth after the plan.
    pub estimated_max_depth_after: u32,
    /// True when no move crosses a CDC hazard.
    pub respects_cdc_fences: bool,
}

impl RetimingPlan {
    /// A plan is valid iff it contains no `Forbidden` move.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.moves
            .iter()
            .all(|m| m.safety != RetimingMoveSafety::Forbidden)
    }
}

fn move_id(src: &ComponentId, direction: RetimingMoveDirection, ordinal: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"voltaic:retiming-move:");
    hasher.update(format!("{src}:{direction:?}:{ordinal}").as_bytes());
    format!("RTM_{}", &hex::encode(hasher.finalize().as_bytes())[..10])
}

fn component_pin(component: &ComponentId, pin: &str) -> PinId {
    PinId(format!("{}.{}", component.as_str(), pin))
}

fn net_driver(circuit: &Circuit, pin: &PinId) -> Option<PinId> {
    let net_id = circuit.pin(pin).and_then(|p| p.net.clone())?;
    circuit.net(&net_id)?.pins.iter().find_map(|p| {
        let candidate = circuit.pin(p)?;
        matches!(candidate.direction, voltaic_circuit::PinDirection::Output).then(|| p.clone())
    })
}

fn net_sinks(circuit: &Circuit, pin: &PinId) -> Vec<PinId> {
    let Some(net_id) = circuit.pin(pin).and_then(|p| p.net.clone()) else {
        return Vec::new();
    };
    circuit
        .net(&net_id)
        .map(|net| {
            net.pins
                .iter()
                .filter(|p| *p != pin)
                .filter(|p| {
                    circuit.pin(p).is_some_and(|pp| {
                        matches!(pp.direction, voltaic_circuit::PinDirection::Input)
                    })
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

fn owner(pin: &PinId) -> ComponentId {
    ComponentId(
        pin.as_str()
            .split('.')
            .next()
            .unwrap_or(pin.as_str())
            .to_owned(),
    )
}

/// A register candidate whose upstream logic admits a clean backward move.
struct Candidate {
    register: ComponentId,
    crossed: ComponentId,
    anchor: ComponentId,
    ops: Vec<EditOperation>,
    safety: RetimingMoveSafety,
    reason: String,
}

fn backward_candidates(circuit: &Circuit, cdc: &CdcReport) -> Vec<Candidate> {
    let mut out = Vec::new();
    for reg in circuit.components() {
        if !reg.class.is_sequential() {
            continue;
        }
        // Upstream component C: sole driver of reg.d, single-input comb.
        let d_pin = component_pin(&reg.id, "d");
        let Some(c_out) = net_driver(circuit, &d_pin) else {
            continue;
        };
        let crossed = owner(&c_out);
        let Some(crossed_comp) = circuit.component(&crossed) else {
            continue;
        };
        if crossed_comp.class.is_sequential() {
            continue; // nothing combinational to cross
        }
        if !matches!(
            crossed_comp.class,
            ComponentClass::Not | ComponentClass::Buffer
        ) {
            continue; // only 1-in/1-out components admit a clean swap
        }
        // C must feed the register exclusively.
        if net_sinks(circuit, &c_out) != vec![d_pin.clone()] {
            continue;
        }
        let c_in = component_pin(&crossed, "in");
        let Some(src) = net_driver(circuit, &c_in) else {
            continue;
        };
        let anchor = owner(&src);
        let q_pin = component_pin(&reg.id, "q");
        let q_sinks = net_sinks(circuit, &q_pin);

        // Rewire: src -> reg.d, reg.q -> C.in, C.out -> old q sinks.
        let mut ops = vec![
            EditOperation::Disconnect {
                a: src.clone(),
                b: c_in.clone(),
            },
            EditOperation::Disconnect {
                a: c_out.clone(),
                b: d_pin.clone(),
            },
        ];
        for sink in &q_sinks {
            ops.push(EditOperation::Disconnect {
                a: q_pin.clone(),
                b: sink.clone(),
            });
        }
        ops.push(EditOperation::Connect {
            a: src.clone(),
            b: d_pin.clone(),
        });
        ops.push(EditOperation::Connect {
            a: q_pin.clone(),
            b: c_in.clone(),
        });
        for sink in &q_sinks {
            ops.push(EditOperation::Connect {
                a: c_out.clone(),
                b: sink.clone(),
            });
        }

        let (safety, reason) = classify(circuit, cdc, reg, &anchor, &src);
        out.push(Candidate {
            register: reg.id.clone(),
            crossed,
            anchor,
            ops,
            safety,
            reason,
        });
    }
    out
}

fn classify(
    circuit: &Circuit,
    cdc: &CdcReport,
    reg: &voltaic_circuit::Component,
    anchor: &ComponentId,
    src: &PinId,
) -> (RetimingMoveSafety, String) {
    if reg.class == ComponentClass::Synchronizer {
        return (
            RetimingMoveSafety::Forbidden,
            "moving a synchronizer would remove a CDC fence".to_owned(),
        );
    }
    let reg_domain = cdc.domain_of(&reg.id);
    let anchor_domain = cdc.domain_of(anchor);
    if let (Some(a), Some(b)) = (reg_domain, anchor_domain) {
        if a != b {
            return (
                RetimingMoveSafety::Forbidden,
                format!("move would cross clock domains {b} -> {a}"),
            );
        }
    }
    // Wired enable/clear changes meaning when the latch shifts a stage.
    let en_wired = circuit
        .pin(&component_pin(&reg.id, "en"))
        .is_some_and(|p| p.net.is_some());
    let clr_wired = circuit
        .pin(&component_pin(&reg.id, "clr"))
        .is_some_and(|p| p.net.is_some());
    if en_wired || clr_wired {
        return (
            RetimingMoveSafety::Suspicious,
            "register has wired enable/clear; stage shift changes gating".to_owned(),
        );
    }
    // Shared upstream logic: the source also feeds other sinks.
    if net_sinks(circuit, src).len() > 1 {
        return (
            RetimingMoveSafety::Suspicious,
            "upstream source fans out; move duplicates its timing".to_owned(),
        );
    }
    (
        RetimingMoveSafety::SafeIntraDomain,
        "intra-domain, no CDC crossings".to_owned(),
    )
}

/// Proposes retiming plans for `target_id` under `objective`.
///
/// Proposed plans are always valid (no `Forbidden` move); forbidden
/// candidates are dropped at discovery time.
#[must_use]
pub fn propose_retiming_plans(
    circuit: &Circuit,
    target_id: &str,
    pipeline: &PipelineMap,
    timing: &TimingAnalysis,
    cdc: &CdcReport,
    objective: &RetimingObjective,
) -> Vec<RetimingPlan> {
    let candidates: Vec<Candidate> = backward_candidates(circuit, cdc)
        .into_iter()
        .filter(|c| c.safety != RetimingMoveSafety::Forbidden)
        .collect();
    if candidates.is_empty() {
        return Vec::new();
    }

    let depth_before = timing.max_depth;
    let mut moves: Vec<RetimingMove> = Vec::new();
    for (ordinal, candidate) in candidates.iter().enumerate() {
        let src_stage = pipeline.stage_of(&candidate.register).unwrap_or(0);
        let dst_stage = pipeline.stage_of(&candidate.anchor).unwrap_or(0);
        let before = pipeline
            .segments
            .iter()
            .filter(|s| s.to == candidate.register)
            .map(|s| s.depth)
            .max()
            .unwrap_or(depth_before);
        moves.push(RetimingMove {
            move_id: move_id(&candidate.register, RetimingMoveDirection::Backward, ordinal),
            src_reg_id: candidate.register.clone(),
            dst_reg_id: candidate.anchor.clone(),
            direction: RetimingMoveDirection::Backward,
            domain_id: cdc.domain_of(&candidate.register).unwrap_or(0),
            src_stage_index: src_stage,
            dst_stage_index: dst_stage,
            before_comb_depth: before,
            after_comb_depth_est: before.saturating_sub(1),
            safety: candidate.safety,
            safety_reason: candidate.reason.clone(),
            affected_ops: vec![candidate.crossed.as_str().to_owned()],
            ops: candidate.ops.clone(),
        });
    }

    // Objective shaping: deepest-first for depth objectives, stage-balance
    // order otherwise.
    match objective.kind {
        RetimingObjectiveKind::MinimizeMaxDepth | RetimingObjectiveKind::MinimizeDepthWithBudget => {
            moves.sort_by(|a, b| {
                b.before_comb_depth
                    .cmp(&a.before_comb_depth)
                    .then_with(|| a.move_id.cmp(&b.move_id))
            });
        }
        RetimingObjectiveKind::BalanceStages => {
            moves.sort_by(|a, b| {
                a.src_stage_index
                    .cmp(&b.src_stage_index)
                    .then_with(|| a.move_id.cmp(&b.move_id))
            });
        }
    }
    if objective.max_moves >= 0 {
        moves.truncate(usize::try_from(objective.max_moves).unwrap_or(usize::MAX));
    }

    let mut plans = Vec::new();
    let safe_only: Vec<RetimingMove> = moves
        .iter()
        .filter(|m| m.safety == RetimingMoveSafety::SafeIntraDomain)
        .cloned()
        .collect();

    if let Some(first) = safe_only.first() {
        plans.push(assemble_plan(
            target_id,
            "single deepest safe move",
            vec![first.clone()],
            depth_before,
            objective,
            plans.len(),
        ));
    }
    if safe_only.len() > 1 {
        plans.push(assemble_plan(
            target_id,
            "all safe moves",
            safe_only,
            depth_before,
            objective,
            plans.len(),
        ));
    }
    if moves.iter().any(|m| m.safety == RetimingMoveSafety::Suspicious) {
        plans.push(assemble_plan(
            target_id,
            "aggressive: safe and suspicious moves",
            moves,
            depth_before,
            objective,
            plans.len(),
        ));
    }
    plans
}

fn assemble_plan(
    target_id: &str,
    description: &str,
    moves: Vec<RetimingMove>,
    depth_before: u32,
    objective: &RetimingObjective,
    ordinal: usize,
) -> RetimingPlan {
    // The id commits to the objective and the exact move set, not just the
    // description: the objective reorders and truncates moves, so two plans
    // derived under different objectives must never collide. Application
    // re-derives plans and matches by id; a mismatch is a lookup miss, not a
    // silently different move body.
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"voltaic:retiming-plan:");
    hasher.update(format!("{target_id}:{description}:{ordinal}:{objective:?}").as_bytes());
    for m in &moves {
        hasher.update(m.move_id.as_bytes());
    }
    let id = format!("RTP_{}", &hex::encode(hasher.finalize().as_bytes())[..10]);

    let after = moves
        .iter()
        .map(|m| m.after_comb_depth_est)
        .max()
        .unwrap_or(depth_before)
        .min(depth_before);
    let respects = moves
        .iter()
        .all(|m| m.safety != RetimingMoveSafety::Forbidden);
    RetimingPlan {
        id,
        target_id: target_id.to_owned(),
        description: description.to_owned(),
        moves,
        estimated_max_depth_before: depth_before,
        estimated_max_depth_after: after,
        respects_cdc_fences: respects,
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    #![allow(clippy::unwrap_used)]

    use crate::transform::testutil::{add, connect, set_clock};
    use voltaic_circuit::{Circuit, ComponentClass};

    /// `k -> inv -> r1 -> buf -> r2 -> p`, all on one clock. The `inv`
    /// before `r1` and the `buf` before `r2` both admit backward moves.
    pub(crate) fn retimable_circuit() -> Circuit {
        let mut c = Circuit::new();
        add(&mut c, "k", ComponentClass::Constant);
        add(&mut c, "inv", ComponentClass::Not);
        add(&mut c, "r1", ComponentClass::Register);
        add(&mut c, "buf", ComponentClass::Buffer);
        add(&mut c, "r2", ComponentClass::Register);
        add(&mut c, "p", ComponentClass::Probe);
        set_clock(&mut c, "r1", "clk");
        set_clock(&mut c, "r2", "clk");
        connect(&mut c, "k.out", "inv.in");
        connect(&mut c, "inv.out", "r1.d");
        connect(&mut c, "r1.q", "buf.in");
        connect(&mut c, "buf.out", "r2.d");
        connect(&mut c, "r2.q", "p.in");
        c
    }

    pub(crate) fn analyses(
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
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::testutil::{analyses, retimable_circuit};
    use super::*;
    use crate::opt::{RetimingObjective, RetimingObjectiveKind};
    use crate::transform::testutil::set_clock;

    fn objective() -> RetimingObjective {
        RetimingObjective {
            kind: RetimingObjectiveKind::MinimizeMaxDepth,
            max_extra_registers: -1,
            max_moves: -1,
            target_max_depth: -1,
        }
    }

    #[test]
    fn proposals_contain_no_forbidden_moves() {
        let circuit = retimable_circuit();
        let (timing, pipeline, cdc) = analyses(&circuit);
        let plans =
            propose_retiming_plans(&circuit, "blk_0", &pipeline, &timing, &cdc, &objective());
        assert!(!plans.is_empty());
        for plan in &plans {
            assert!(plan.is_valid());
            assert!(plan.respects_cdc_fences);
        }
    }

    #[test]
    fn moves_materialize_into_applicable_ops() {
        let circuit = retimable_circuit();
        let (timing, pipeline, cdc) = analyses(&circuit);
        let plans =
            propose_retiming_plans(&circuit, "blk_0", &pipeline, &timing, &cdc, &objective());
        let plan = &plans[0];
        assert_eq!(plan.moves.len(), 1);

        let mut rewritten = circuit.clone();
        rewritten.apply_all(plan.moves[0].ops.clone()).unwrap();
        // The register now latches straight from the moved-across source and
        // the crossed component sits behind it.
        let moved = &plan.moves[0].src_reg_id;
        let crossed = voltaic_circuit::ComponentId(plan.moves[0].affected_ops[0].clone());
        assert!(rewritten.component(moved).is_some());
        assert!(rewritten.component(&crossed).is_some());
    }

    #[test]
    fn cross_domain_move_is_dropped_as_forbidden() {
        let mut circuit = retimable_circuit();
        // Put r2 on its own clock: the buf move would cross r1(clk) -> r2(fast).
        set_clock(&mut circuit, "r2", "fast");
        let (timing, pipeline, cdc) = analyses(&circuit);
        let plans =
            propose_retiming_plans(&circuit, "blk_0", &pipeline, &timing, &cdc, &objective());
        for plan in &plans {
            for m in &plan.moves {
                assert_ne!(m.src_reg_id, voltaic_circuit::ComponentId::from("r2"));
            }
        }
    }

    #[test]
    fn plan_ids_commit_to_the_objective_and_move_set() {
        let circuit = retimable_circuit();
        let (timing, pipeline, cdc) = analyses(&circuit);

        let minimize =
            propose_retiming_plans(&circuit, "blk_0", &pipeline, &timing, &cdc, &objective());
        let balance = propose_retiming_plans(
            &circuit,
            "blk_0",
            &pipeline,
            &timing,
            &cdc,
            &RetimingObjective {
                kind: RetimingObjectiveKind::BalanceStages,
                ..objective()
            },
        );
        let capped = propose_retiming_plans(
            &circuit,
            "blk_0",
            &pipeline,
            &timing,
            &cdc,
            &RetimingObjective {
                max_moves: 1,
                ..objective()
            },
        );

        // Same circuit, same finder output, but the objective is part of the
        // id: no plan id from one objective resolves under another.
        let minimize_ids: Vec<&str> = minimize.iter().map(|p| p.id.as_str()).collect();
        for plan in balance.iter().chain(capped.iter()) {
            assert!(!minimize_ids.contains(&plan.id.as_str()), "{}", plan.id);
        }
    }

    #[test]
    fn max_moves_cap_is_respected_at_proposal_time() {
        let circuit = retimable_circuit();
        let (timing, pipeline, cdc) = analyses(&circuit);
        let capped = RetimingObjective {
            max_moves: 1,
            ..objective()
        };
        let plans = propose_retiming_plans(&circuit, "blk_0", &pipeline, &timing, &cdc, &capped);
        for plan in &plans {
            assert!(plan.moves.len() <= 1);
        }
    }
}
