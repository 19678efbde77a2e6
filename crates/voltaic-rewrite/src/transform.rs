// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transformation engine: discovery and materialization of structural
//! rewrites.
//!
//! Proposals are value objects: each plan carries its steps *with* the edit
//! operations that realize them, so [`TransformationEngine::materialize`] is
//! pure - it reads nothing but the plan. Application (appending the ops to a
//! branch) is the session layer's job; the engine never touches state.

use serde::{Deserialize, Serialize};
use voltaic_circuit::{Block, BlockId, Circuit, ComponentClass, ComponentId, EditOperation, PinId};

/// Kind of structural rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransformationKind {
    /// Remove a `not` → `not` chain.
    SimplifyDoubleInversion,
    /// Collapse a gate whose inputs are provably identical.
    SimplifyRedundantGate,
    /// Tag a recognized structure as a known library block.
    ReplaceWithKnownBlock,
    /// Split an over-wide fanout through a buffer.
    RewireFanoutTree,
    /// Fold duplicate block declarations together.
    MergeEquivalentBlocks,
    /// Register movement steps generated by the retiming engine.
    RetimeRegisters,
}

/// What a proposal claims to preserve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreservationLevel {
    /// The circuit still computes the same kind of function.
    BehaviorKindPreserved,
    /// Observable input→output behavior is unchanged (modulo latency).
    IoContractPreserved,
    /// The dependency structure between surviving entities is unchanged.
    DependencyPatternPreserved,
}

/// What a plan targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransformationTarget {
    /// Block, component, or region identifier.
    pub subject_id: String,
    /// `"block"`, `"component"`, or `"region"`.
    pub subject_kind: String,
}

/// One step of a plan: a description plus the ops that realize it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationStep {
    /// Human-readable summary.
    pub description: String,
    /// Edit operations realizing the step, in order.
    pub ops: Vec<EditOperation>,
}

/// A proposed behavior-preserving rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformationPlan {
    /// Unique, deterministic plan id.
    pub id: String,
    /// Rewrite kind.
    pub kind: TransformationKind,
    /// What the plan touches.
    pub target: TransformationTarget,
    /// Declared preservation guarantees.
    pub guarantees: Vec<PreservationLevel>,
    /// Ordered steps.
    pub steps: Vec<TransformationStep>,
}

impl TransformationPlan {
    /// Total edit operations across all steps.
    #[must_use]
    pub fn op_count(&self) -> usize {
        self.steps.iter().map(|s| s.ops.len()).sum()
    }
}

/// Deterministic plan id: domain-separated digest of kind, target, and
/// discovery ordinal.
fn plan_id(kind: TransformationKind, subject: &str, ordinal: usize) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"voltaic:plan:");
    hasher.update(format!("{kind:?}:{subject}:{ordinal}").as_bytes());
    format!("TP_{}", &hex::encode(hasher.finalize().as_bytes())[..12])
}

/// Fanout width beyond which a buffer split is proposed.
const FANOUT_THRESHOLD: usize = 4;

/// Discovery and materialization of structural rewrites.
#[derive(Debug, Default)]
pub struct TransformationEngine;

impl TransformationEngine {
    /// Discovers rewrite opportunities anywhere in `circuit`, bounded by
    /// `max_plans`.
    #[must_use]
    pub fn propose_for_circuit(circuit: &Circuit, max_plans: usize) -> Vec<TransformationPlan> {
        Self::propose(circuit, None, max_plans)
    }

    /// Discovers rewrite opportunities scoped to one declared block.
    #[must_use]
    pub fn propose_for_block(
        circuit: &Circuit,
        block_id: &BlockId,
        max_plans: usize,
    ) -> Vec<TransformationPlan> {
        Self::propose(circuit, Some(block_id), max_plans)
    }

    fn propose(
        circuit: &Circuit,
        block: Option<&BlockId>,
        max_plans: usize,
    ) -> Vec<TransformationPlan> {
        let scope: Option<&Block> = block.and_then(|id| circuit.block(id));
        let in_scope = |component: &ComponentId| {
            scope.is_none_or(|b| b.components.contains(component))
        };

        let mut plans = Vec::new();
        find_double_inversions(circuit, &in_scope, &mut plans);
        find_redundant_gates(circuit, &in_scope, &mut plans);
        find_known_blocks(circuit, scope, &mut plans);
        find_wide_fanouts(circuit, &in_scope, &mut plans);
        find_equivalent_blocks(circuit, &mut plans);
        plans.truncate(max_plans);
        plans
    }

    /// Materializes `plan` into its edit-operation list. Pure: touches no
    /// state, so callers can preview, dry-run, or queue the plan.
    #[must_use]
    pub fn materialize(plan: &TransformationPlan) -> Vec<EditOperation> {
        plan.steps.iter().flat_map(|s| s.ops.clone()).collect()
    }
}

/// Sinks on the net driven by `pin`, excluding `pin` itself.
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
                        matches!(
                            pp.direction,
                            voltaic_circuit::PinDirection::Input
                                | voltaic_circuit::PinDirection::Bidirectional
                        )
                    })
                })
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// The driver pin of the net `pin` sits on, if any.
fn net_driver(circuit: &Circuit, pin: &PinId) -> Option<PinId> {
    let net_id = circuit.pin(pin).and_then(|p| p.net.clone())?;
    circuit.net(&net_id)?.pins.iter().find_map(|p| {
        let candidate = circuit.pin(p)?;
        matches!(candidate.direction, voltaic_circuit::PinDirection::Output).then(|| p.clone())
    })
}

fn component_pin(component: &ComponentId, pin: &str) -> PinId {
    PinId(format!("{}.{}", component.as_str(), pin))
}

fn find_double_inversions<F: Fn(&ComponentId) -> bool>(
    circuit: &Circuit,
    in_scope: &F,
    plans: &mut Vec<TransformationPlan>,
) {
    for first in circuit.components() {
        if first.class != ComponentClass::Not || !in_scope(&first.id) {
            continue;
        }
        let first_out = component_pin(&first.id, "out");
        let sinks = net_sinks(circuit, &first_out);
        // The pattern only fires when the first inverter feeds exactly the
        // second one, so removal cannot disturb other consumers.
        let [only_sink] = sinks.as_slice() else {
            continue;
        };
        let Some(second) = circuit.pin(only_sink).map(|p| p.component.clone()) else {
            continue;
        };
        if circuit.component(&second).map(|c| c.class.clone()) != Some(ComponentClass::Not)
            || !in_scope(&second)
        {
            continue;
        }

        let Some(source) = net_driver(circuit, &component_pin(&first.id, "in")) else {
            continue;
        };
        let second_out = component_pin(&second, "out");
        let downstream = net_sinks(circuit, &second_out);

        let mut ops = vec![
            EditOperation::RemoveComponent {
                id: first.id.clone(),
                cascade: true,
                detached: Vec::new(),
            },
            EditOperation::RemoveComponent {
                id: second.clone(),
                cascade: true,
                detached: Vec::new(),
            },
        ];
        for sink in &downstream {
            ops.push(EditOperation::Connect {
                a: source.clone(),
                b: sink.clone(),
            });
        }

        let ordinal = plans.len();
        plans.push(TransformationPlan {
            id: plan_id(
                TransformationKind::SimplifyDoubleInversion,
                first.id.as_str(),
                ordinal,
            ),
            kind: TransformationKind::SimplifyDoubleInversion,
            target: TransformationTarget {
                subject_id: first.id.as_str().to_owned(),
                subject_kind: "component".to_owned(),
            },
            guarantees: vec![
                PreservationLevel::IoContractPreserved,
                PreservationLevel::BehaviorKindPreserved,
            ],
            steps: vec![TransformationStep {
                description: format!(
                    "remove inverter pair {} / {} and reconnect {} downstream",
                    first.id, second, source
                ),
                ops,
            }],
        });
    }
}

fn find_redundant_gates<F: Fn(&ComponentId) -> bool>(
    circuit: &Circuit,
    in_scope: &F,
    plans: &mut Vec<TransformationPlan>,
) {
    for gate in circuit.components() {
        if !matches!(gate.class, ComponentClass::And | ComponentClass::Or) || !in_scope(&gate.id) {
            continue;
        }
        let a_src = net_driver(circuit, &component_pin(&gate.id, "a"));
        let b_src = net_driver(circuit, &component_pin(&gate.id, "b"));
        let (Some(a_src), Some(b_src)) = (a_src, b_src) else {
            continue;
        };
        if a_src != b_src {
            continue;
        }
        // AND(x, x) == OR(x, x) == x: bypass the gate entirely.
        let downstream = net_sinks(circuit, &component_pin(&gate.id, "out"));
        let mut ops = vec![EditOperation::RemoveComponent {
            id: gate.id.clone(),
            cascade: true,
            detached: Vec::new(),
        }];
        for sink in &downstream {
            ops.push(EditOperation::Connect {
                a: a_src.clone(),
                b: sink.clone(),
            });
        }
        let ordinal = plans.len();
        plans.push(TransformationPlan {
            id: plan_id(
                TransformationKind::SimplifyRedundantGate,
                gate.id.as_str(),
                ordinal,
            ),
            kind: TransformationKind::SimplifyRedundantGate,
            target: TransformationTarget {
                subject_id: gate.id.as_str().to_owned(),
                subject_kind: "component".to_owned(),
            },
            guarantees: vec![
                PreservationLevel::IoContractPreserved,
                PreservationLevel::BehaviorKindPreserved,
            ],
            steps: vec![TransformationStep {
                description: format!("bypass idempotent gate {} fed twice from {}", gate.id, a_src),
                ops,
            }],
        });
    }
}

fn find_known_blocks(
    circuit: &Circuit,
    scope: Option<&Block>,
    plans: &mut Vec<TransformationPlan>,
) {
    // Half-adder shape: an xor and an and sharing both input drivers.
    for xor in circuit.components() {
        if xor.class != ComponentClass::Xor {
            continue;
        }
        let xa = net_driver(circuit, &component_pin(&xor.id, "a"));
        let xb = net_driver(circuit, &component_pin(&xor.id, "b"));
        let (Some(xa), Some(xb)) = (xa, xb) else {
            continue;
        };
        for and in circuit.components() {
            if and.class != ComponentClass::And {
                continue;
            }
            if let Some(block) = scope {
                if !block.components.contains(&xor.id) || !block.components.contains(&and.id) {
                    continue;
                }
            }
            let aa = net_driver(circuit, &component_pin(&and.id, "a"));
            let ab = net_driver(circuit, &component_pin(&and.id, "b"));
            let (Some(aa), Some(ab)) = (aa, ab) else {
                continue;
            };
            let same = (aa == xa && ab == xb) || (aa == xb && ab == xa);
            if !same {
                continue;
            }
            let block_id = BlockId(format!("half_adder_{}", xor.id.as_str()));
            if circuit.block(&block_id).is_some() {
                continue; // already tagged
            }
            let ordinal = plans.len();
            plans.push(TransformationPlan {
                id: plan_id(
                    TransformationKind::ReplaceWithKnownBlock,
                    xor.id.as_str(),
                    ordinal,
                ),
                kind: TransformationKind::ReplaceWithKnownBlock,
                target: TransformationTarget {
                    subject_id: block_id.as_str().to_owned(),
                    subject_kind: "block".to_owned(),
                },
                guarantees: vec![
                    PreservationLevel::IoContractPreserved,
                    PreservationLevel::DependencyPatternPreserved,
                ],
                steps: vec![TransformationStep {
                    description: format!(
                        "declare half-adder over {} (sum) and {} (carry)",
                        xor.id, and.id
                    ),
                    ops: vec![EditOperation::AddBlock {
                        block: Block {
                            id: block_id,
                            name: "half_adder".to_owned(),
                            components: [xor.id.clone(), and.id.clone()].into_iter().collect(),
                            ports: Vec::new(),
                        },
                    }],
                }],
            });
        }
    }
}

fn find_wide_fanouts<F: Fn(&ComponentId) -> bool>(
    circuit: &Circuit,
    in_scope: &F,
    plans: &mut Vec<TransformationPlan>,
) {
    for component in circuit.components() {
        if !in_scope(&component.id) {
            continue;
        }
        for pin_id in &component.pins {
            let Some(pin) = circuit.pin(pin_id) else {
                continue;
            };
            if !matches!(pin.direction, voltaic_circuit::PinDirection::Output) || pin.width != 1 {
                continue;
            }
            let sinks = net_sinks(circuit, pin_id);
            if sinks.len() < FANOUT_THRESHOLD {
                continue;
            }
            // Route the tail of the fanout through a fresh buffer.
            let buffer_id = ComponentId(format!("fanbuf_{}", component.id.as_str()));
            if circuit.component(&buffer_id).is_some() {
                continue;
            }
            let mut ops = vec![
                EditOperation::AddComponent {
                    id: buffer_id.clone(),
                    class: ComponentClass::Buffer,
                    properties: std::collections::BTreeMap::new(),
                    custom_pins: Vec::new(),
                },
                EditOperation::Connect {
                    a: pin_id.clone(),
                    b: component_pin(&buffer_id, "in"),
                },
            ];
            for sink in sinks.iter().skip(FANOUT_THRESHOLD / 2) {
                ops.push(EditOperation::Disconnect {
                    a: pin_id.clone(),
                    b: sink.clone(),
                });
                ops.push(EditOperation::Connect {
                    a: component_pin(&buffer_id, "out"),
                    b: sink.clone(),
                });
            }
            let ordinal = plans.len();
            plans.push(TransformationPlan {
                id: plan_id(
                    TransformationKind::RewireFanoutTree,
                    component.id.as_str(),
                    ordinal,
                ),
                kind: TransformationKind::RewireFanoutTree,
                target: TransformationTarget {
                    subject_id: component.id.as_str().to_owned(),
                    subject_kind: "component".to_owned(),
                },
                // The buffer adds a tick of latency on the rerouted half, so
                // only the behavior kind is claimed.
                guarantees: vec![PreservationLevel::BehaviorKindPreserved],
                steps: vec![TransformationStep {
                    description: format!(
                        "split {}-wide fanout of {} through {}",
                        sinks.len(),
                        pin_id,
                        buffer_id
                    ),
                    ops,
                }],
            });
        }
    }
}

fn find_equivalent_blocks(circuit: &Circuit, plans: &mut Vec<TransformationPlan>) {
    let signatures: Vec<(BlockId, Vec<ComponentClass>)> = circuit
        .blocks()
        .map(|b| {
            let mut classes: Vec<ComponentClass> = b
                .components
                .iter()
                .filter_map(|c| circuit.component(c))
                .map(|c| c.class.clone())
                .collect();
            classes.sort();
            (b.id.clone(), classes)
        })
        .collect();

    for (i, (block_a, sig_a)) in signatures.iter().enumerate() {
        for (block_b, sig_b) in signatures.iter().skip(i + 1) {
            if sig_a != sig_b || sig_a.is_empty() {
                continue;
            }
            let ordinal = plans.len();
            plans.push(TransformationPlan {
                id: plan_id(
                    TransformationKind::MergeEquivalentBlocks,
                    block_a.as_str(),
                    ordinal,
                ),
                kind: TransformationKind::MergeEquivalentBlocks,
                target: TransformationTarget {
                    subject_id: block_a.as_str().to_owned(),
                    subject_kind: "block".to_owned(),
                },
                guarantees: vec![PreservationLevel::DependencyPatternPreserved],
                steps: vec![TransformationStep {
                    description: format!(
                        "blocks {block_a} and {block_b} have identical class signatures; drop {block_b}"
                    ),
                    ops: vec![EditOperation::RemoveBlock {
                        id: block_b.clone(),
                    }],
                }],
            });
        }
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    #![allow(clippy::unwrap_used)]

    use voltaic_circuit::{Circuit, ComponentClass, EditOperation, PropertyValue};

    pub(crate) fn add(c: &mut Circuit, id: &str, class: ComponentClass) {
        c.apply(EditOperation::AddComponent {
            id: id.into(),
            class,
            properties: std::collections::BTreeMap::new(),
            custom_pins: Vec::new(),
        })
        .unwrap();
    }

    pub(crate) fn connect(c: &mut Circuit, a: &str, b: &str) {
        c.apply(EditOperation::Connect {
            a: a.into(),
            b: b.into(),
        })
        .unwrap();
    }

    pub(crate) fn set_clock(c: &mut Circuit, comp: &str, clock: &str) {
        c.apply(EditOperation::SetProperty {
            component: comp.into(),
            name: "clock".into(),
            value: PropertyValue::Text(clock.into()),
        })
        .unwrap();
    }

    /// `k(1) -> n1 -> n2 -> p`: a removable inverter pair.
    pub(crate) fn double_inversion_circuit() -> Circuit {
        let mut c = Circuit::new();
        add(&mut c, "k", ComponentClass::Constant);
        c.apply(EditOperation::SetProperty {
            component: "k".into(),
            name: "value".into(),
            value: PropertyValue::Int(1),
        })
        .unwrap();
        add(&mut c, "n1", ComponentClass::Not);
        add(&mut c, "n2", ComponentClass::Not);
        add(&mut c, "p", ComponentClass::Probe);
        connect(&mut c, "k.out", "n1.in");
        connect(&mut c, "n1.out", "n2.in");
        connect(&mut c, "n2.out", "p.in");
        c
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::testutil::{add, connect, double_inversion_circuit};
    use super::*;

    #[test]
    fn double_inversion_is_found_and_materializes() {
        let circuit = double_inversion_circuit();
        let plans = TransformationEngine::propose_for_circuit(&circuit, 8);
        let plan = plans
            .iter()
            .find(|p| p.kind == TransformationKind::SimplifyDoubleInversion)
            .unwrap();
        assert!(plan
            .guarantees
            .contains(&PreservationLevel::IoContractPreserved));

        let ops = TransformationEngine::materialize(plan);
        assert_eq!(ops.len(), plan.op_count());

        let mut rewritten = circuit.clone();
        rewritten.apply_all(ops).unwrap();
        assert!(rewritten.component(&"n1".into()).is_none());
        assert!(rewritten.component(&"n2".into()).is_none());
        // k now drives the probe directly.
        let net = rewritten
            .pin(&"k.out".into())
            .unwrap()
            .net
            .clone()
            .unwrap();
        assert!(rewritten.net(&net).unwrap().pins.contains(&"p.in".into()));
    }

    #[test]
    fn materialization_does_not_touch_the_circuit() {
        let circuit = double_inversion_circuit();
        let before = circuit.clone();
        let plans = TransformationEngine::propose_for_circuit(&circuit, 8);
        for plan in &plans {
            let _ = TransformationEngine::materialize(plan);
        }
        assert_eq!(circuit, before);
    }

    #[test]
    fn max_plans_bounds_discovery() {
        let circuit = double_inversion_circuit();
        assert!(TransformationEngine::propose_for_circuit(&circuit, 0).is_empty());
        assert_eq!(
            TransformationEngine::propose_for_circuit(&circuit, 1).len(),
            1
        );
    }

    #[test]
    fn redundant_gate_is_bypassed() {
        let mut c = Circuit::new();
        add(&mut c, "k", ComponentClass::Constant);
        add(&mut c, "g", ComponentClass::And);
        add(&mut c, "p", ComponentClass::Probe);
        connect(&mut c, "k.out", "g.a");
        connect(&mut c, "k.out", "g.b");
        connect(&mut c, "g.out", "p.in");

        let plans = TransformationEngine::propose_for_circuit(&c, 8);
        let plan = plans
            .iter()
            .find(|p| p.kind == TransformationKind::SimplifyRedundantGate)
            .unwrap();
        let mut rewritten = c.clone();
        rewritten
            .apply_all(TransformationEngine::materialize(plan))
            .unwrap();
        assert!(rewritten.component(&"g".into()).is_none());
    }

    #[test]
    fn half_adder_shape_is_tagged_as_known_block() {
        let mut c = Circuit::new();
        add(&mut c, "x", ComponentClass::Constant);
        add(&mut c, "y", ComponentClass::Constant);
        add(&mut c, "sum", ComponentClass::Xor);
        add(&mut c, "carry", ComponentClass::And);
        connect(&mut c, "x.out", "sum.a");
        connect(&mut c, "y.out", "sum.b");
        connect(&mut c, "x.out", "carry.a");
        connect(&mut c, "y.out", "carry.b");

        let plans = TransformationEngine::propose_for_circuit(&c, 8);
        let plan = plans
            .iter()
            .find(|p| p.kind == TransformationKind::ReplaceWithKnownBlock)
            .unwrap();
        let mut rewritten = c.clone();
        rewritten
            .apply_all(TransformationEngine::materialize(plan))
            .unwrap();
        assert!(rewritten.blocks().any(|b| b.name == "half_adder"));
    }

    #[test]
    fn plan_ids_are_deterministic() {
        let circuit = double_inversion_circuit();
        let a = TransformationEngine::propose_for_circuit(&circuit, 8);
        let b = TransformationEngine::propose_for_circuit(&circuit, 8);
        let ids_a: Vec<&str> = a.iter().map(|p| p.id.as_str()).collect();
        let ids_b: Vec<&str> = b.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }
}
