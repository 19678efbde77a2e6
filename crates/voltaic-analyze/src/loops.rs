// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Loop detection.
//!
//! The kernel's single-pass tick turns combinational cycles into one-tick
//! delays rather than hangs, so they are a modeling smell, not a crash - but
//! they almost never mean what the designer intended. This analysis flags
//! them. Cycles that pass through a register are legitimate sequential
//! feedback and are only counted.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use voltaic_circuit::{Circuit, PinId};

use crate::graph::{CircuitGraph, EdgeKind};

/// One combinational cycle (a strongly connected pin set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CombLoop {
    /// Pins on the cycle, in id order.
    pub pins: Vec<PinId>,
}

/// Loop detection results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopReport {
    /// Combinational cycles (flagged).
    pub combinational: Vec<CombLoop>,
    /// Count of cycles broken by a sequential edge (legitimate feedback).
    pub sequential_feedback: usize,
}

/// Detects combinational cycles and counts sequential feedback in `circuit`.
#[must_use]
pub fn detect_loops(circuit: &Circuit, graph: &CircuitGraph) -> LoopReport {
    // Strongly connected components over the comb-only subgraph via
    // iterative Tarjan. Components of size > 1 (or with a self edge) are
    // combinational loops.
    let pins: Vec<PinId> = circuit.pins().map(|p| p.id.clone()).collect();
    let comb_sccs = tarjan_sccs(&pins, |pin| {
        graph
            .edges_from(pin)
            .iter()
            .filter(|e| e.kind != EdgeKind::Sequential)
            .map(|e| e.to.clone())
            .collect()
    });

    let mut combinational = Vec::new();
    for scc in &comb_sccs {
        let is_cycle = scc.len() > 1
            || graph
                .edges_from(&scc[0])
                .iter()
                .any(|e| e.kind != EdgeKind::Sequential && e.to == scc[0]);
        if is_cycle {
            let mut pins = scc.clone();
            pins.sort();
            combinational.push(CombLoop { pins });
        }
    }
    combinational.sort_by(|a, b| a.pins.cmp(&b.pins));

    // Sequential feedback: SCCs of the *full* graph that are cycles but did
    // not show up combinationally.
    let full_sccs = tarjan_sccs(&pins, |pin| {
        graph.edges_from(pin).iter().map(|e| e.to.clone()).collect()
    });
    let comb_keys: BTreeSet<Vec<PinId>> = combinational.iter().map(|l| l.pins.clone()).collect();
    let sequential_feedback = full_sccs
        .iter()
        .filter(|scc| scc.len() > 1)
        .filter(|scc| {
            let mut key = (*scc).clone();
            key.sort();
            !comb_keys.contains(&key)
        })
        .count();

    LoopReport {
        combinational,
        sequential_feedback,
    }
}

/// Iterative Tarjan over an arbitrary successor function.
fn tarjan_sccs<F>(pins: &[PinId], successors: F) -> Vec<Vec<PinId>>
where
    F: Fn(&PinId) -> Vec<PinId>,
{
    #[derive(Default, Clone)]
    struct Meta {
        index: Option<usize>,
        lowlink: usize,
        on_stack: bool,
    }

    let mut meta: BTreeMap<PinId, Meta> = pins.iter().map(|p| (p.clone(), Meta::default())).collect();
    let mut index = 0usize;
    let mut stack: Vec<PinId> = Vec::new();
    let mut sccs: Vec<Vec<PinId>> = Vec::new();

    enum Frame {
        Enter(PinId),
        Resume(PinId, Vec<PinId>, usize),
    }

    for root in pins {
        if meta.get(root).and_then(|m| m.index).is_some() {
            continue;
        }
        let mut work = vec![Frame::Enter(root.clone())];
        while let Some(frame) = work.pop() {
            match frame {
                Frame::Enter(v) => {
                    let m = meta.entry(v.clone()).or_default();
                    if m.index.is_some() {
                        continue;
                    }
                    m.index = Some(index);
                    m.lowlink = index;
                    m.on_stack = true;
                    index += 1;
                    stack.push(v.clone());
                    let succ = successors(&v);
                    work.push(Frame::Resume(v, succ, 0));
                }
                Frame::Resume(v, succ, mut i) => {
                    let mut descended = false;
                    while i < succ.len() {
                        let w = &succ[i];
                        i += 1;
                        let w_meta = meta.entry(w.clone()).or_default().clone();
                        if w_meta.index.is_none() {
                            work.push(Frame::Resume(v.clone(), succ.clone(), i));
                            work.push(Frame::Enter(w.clone()));
                            descended = true;
                            break;
                        } else if w_meta.on_stack {
                            let w_index = w_meta.index.unwrap_or(0);
                            if let Some(vm) = meta.get_mut(&v) {
                                vm.lowlink = vm.lowlink.min(w_index);
                            }
                        }
                    }
                    if descended {
                        continue;
                    }
                    // All successors processed: fold lowlinks and maybe pop.
                    let v_low = {
                        let mut low = meta.get(&v).map_or(0, |m| m.lowlink);
                        for w in &succ {
                            let wm = meta.get(w).cloned().unwrap_or_default();
                            if wm.on_stack {
                                low = low.min(wm.lowlink);
                            }
                        }
                        if let Some(vm) = meta.get_mut(&v) {
                            vm.lowlink = low;
                        }
                        low
                    };
                    let v_index = meta.get(&v).and_then(|m| m.index).unwrap_or(0);
                    if v_low == v_index {
                        let mut scc = Vec::new();
                        while let Some(w) = stack.pop() {
                            if let Some(wm) = meta.get_mut(&w) {
                                wm.on_stack = false;
                            }
                            let done = w == v;
                            scc.push(w);
                            if done {
                                break;
                            }
                        }
                        sccs.push(scc);
                    }
                }
            }
        }
    }
    sccs
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::graph::testutil::chain_circuit;
    use voltaic_circuit::{ComponentClass, EditOperation};

    #[test]
    fn straight_chain_has_no_loops() {
        let circuit = chain_circuit();
        let graph = CircuitGraph::build(&circuit);
        let report = detect_loops(&circuit, &graph);
        assert!(report.combinational.is_empty());
        assert_eq!(report.sequential_feedback, 0);
    }

    fn add(c: &mut voltaic_circuit::Circuit, id: &str, class: ComponentClass) {
        c.apply(EditOperation::AddComponent {
            id: id.into(),
            class,
            properties: std::collections::BTreeMap::new(),
            custom_pins: Vec::new(),
        })
        .unwrap();
    }

    fn connect(c: &mut voltaic_circuit::Circuit, a: &str, b: &str) {
        c.apply(EditOperation::Connect {
            a: a.into(),
            b: b.into(),
        })
        .unwrap();
    }

    #[test]
    fn two_inverters_in_a_ring_are_a_combinational_loop() {
        let mut c = voltaic_circuit::Circuit::new();
        add(&mut c, "n1", ComponentClass::Not);
        add(&mut c, "n2", ComponentClass::Not);
        connect(&mut c, "n1.out", "n2.in");
        connect(&mut c, "n2.out", "n1.in");
        let graph = CircuitGraph::build(&c);
        let report = detect_loops(&c, &graph);
        assert_eq!(report.combinational.len(), 1);
        assert_eq!(report.combinational[0].pins.len(), 4);
    }

    #[test]
    fn feedback_through_a_register_is_not_flagged() {
        let mut c = voltaic_circuit::Circuit::new();
        add(&mut c, "inv", ComponentClass::Not);
        add(&mut c, "r", ComponentClass::Register);
        connect(&mut c, "inv.out", "r.d");
        connect(&mut c, "r.q", "inv.in");
        let graph = CircuitGraph::build(&c);
        let report = detect_loops(&c, &graph);
        assert!(report.combinational.is_empty());
        assert_eq!(report.sequential_feedback, 1);
    }
}
