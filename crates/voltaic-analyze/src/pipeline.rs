// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pipeline map: stage assignment for sequential components.
//!
//! Registers are assigned a stage index equal to their longest
//! register-distance from the pipeline entry (registers with no upstream
//! register sit at stage 0). Segment depths record the worst combinational
//! depth between adjacent registers; the retiming engine consumes both.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use voltaic_circuit::{Circuit, ComponentId, PinDirection};

use crate::graph::{CircuitGraph, EdgeKind};
use crate::timing::TimingAnalysis;

/// One pipeline stage band.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStage {
    /// Stage index, 0-based from the entry.
    pub index: u32,
    /// Registers in this stage, in id order.
    pub registers: Vec<ComponentId>,
    /// Worst combinational depth feeding this stage.
    pub max_depth_in: u32,
}

/// Combinational depth between two adjacent registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentDepth {
    /// Producing register.
    pub from: ComponentId,
    /// Consuming register.
    pub to: ComponentId,
    /// Worst-case combinational hops between them.
    pub depth: u32,
}

/// Stage assignment plus segment depths for a circuit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineMap {
    /// Stages in index order.
    pub stages: Vec<PipelineStage>,
    /// Register → stage index.
    pub register_stage: BTreeMap<ComponentId, u32>,
    /// Adjacent-register segment depths, sorted.
    pub segments: Vec<SegmentDepth>,
}

impl PipelineMap {
    /// Stage index of `register`, when assigned.
    #[must_use]
    pub fn stage_of(&self, register: &ComponentId) -> Option<u32> {
        self.register_stage.get(register).copied()
    }

    /// Total number of stages.
    #[must_use]
    pub fn stage_count(&self) -> u32 {
        u32::try_from(self.stages.len()).unwrap_or(u32::MAX)
    }
}

/// Builds the pipeline map for `circuit`.
#[must_use]
pub fn pipeline_map(
    circuit: &Circuit,
    graph: &CircuitGraph,
    timing: &TimingAnalysis,
) -> PipelineMap {
    // Register adjacency: A -> B when a comb path runs from A's outputs to
    // B's inputs.
    let registers: Vec<ComponentId> = circuit
        .components()
        .filter(|c| c.class.is_sequential())
        .map(|c| c.id.clone())
        .collect();
    let mut adjacency: BTreeMap<ComponentId, BTreeSet<ComponentId>> = BTreeMap::new();
    for reg in &registers {
        adjacency.insert(reg.clone(), downstream_registers(circuit, graph, reg));
    }

    let mut upstream: BTreeMap<ComponentId, BTreeSet<ComponentId>> = BTreeMap::new();
    for (from, tos) in &adjacency {
        for to in tos {
            upstream.entry(to.clone()).or_default().insert(from.clone());
        }
    }

    // Stage = longest distance from any entry register, cycle-guarded.
    let mut register_stage: BTreeMap<ComponentId, u32> = BTreeMap::new();
    for reg in &registers {
        let mut on_path = BTreeSet::new();
        let stage = longest_distance(reg, &upstream, &mut on_path);
        register_stage.insert(reg.clone(), stage);
    }

    // Segment depths out of the timing paths.
    let mut segments: Vec<SegmentDepth> = Vec::new();
    for (from, tos) in &adjacency {
        for to in tos {
            let depth = timing
                .paths
                .iter()
                .filter(|p| {
                    owner(&p.start) == from.as_str() && owner(&p.end) == to.as_str()
                })
                .map(|p| p.depth)
                .max()
                .unwrap_or(0);
            segments.push(SegmentDepth {
                from: from.clone(),
                to: to.clone(),
                depth,
            });
        }
    }
    segments.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));

    // Stage bands.
    let mut stages: Vec<PipelineStage> = Vec::new();
    let max_stage = register_stage.values().copied().max().unwrap_or(0);
    if !register_stage.is_empty() {
        for index in 0..=max_stage {
            let regs: Vec<ComponentId> = register_stage
                .iter()
                .filter(|(_, s)| **s == index)
                .map(|(r, _)| r.clone())
                .collect();
            if regs.is_empty() {
                continue;
            }
            let max_depth_in = segments
                .iter()
                .filter(|s| regs.contains(&s.to))
                .map(|s| s.depth)
                .max()
                .unwrap_or(0);
            stages.push(PipelineStage {
                index,
                registers: regs,
                max_depth_in,
            });
        }
    }

    PipelineMap {
        stages,
        register_stage,
        segments,
    }
}

fn owner(pin: &voltaic_circuit::PinId) -> &str {
    pin.as_str().split('.').next().unwrap_or(pin.as_str())
}

fn longest_distance(
    reg: &ComponentId,
    upstream: &BTreeMap<ComponentId, BTreeSet<ComponentId>>,
    on_path: &mut BTreeSet<ComponentId>,
) -> u32 {
    if !on_path.insert(reg.clone()) {
        return 0; // sequential feedback; do not spin
    }
    let result = upstream.get(reg).map_or(0, |ups| {
        ups.iter()
            .map(|up| longest_distance(up, upstream, on_path) + 1)
            .max()
            .unwrap_or(0)
    });
    on_path.remove(reg);
    result
}

/// Sequential components comb-reachable downstream of `reg`'s outputs.
fn downstream_registers(
    circuit: &Circuit,
    graph: &CircuitGraph,
    reg: &ComponentId,
) -> BTreeSet<ComponentId> {
    let mut found = BTreeSet::new();
    let Some(component) = circuit.component(reg) else {
        return found;
    };
    let mut stack: Vec<voltaic_circuit::PinId> = component
        .pins
        .iter()
        .filter_map(|p| circuit.pin(p))
        .filter(|p| matches!(p.direction, PinDirection::Output))
        .map(|p| p.id.clone())
        .collect();
    let mut seen = BTreeSet::new();
    while let Some(pin) = stack.pop() {
        if !seen.insert(pin.clone()) {
            continue;
        }
        for edge in graph.edges_from(&pin) {
            match edge.kind {
                EdgeKind::Sequential => {
                    if let Some(c) = edge.through.clone() {
                        found.insert(c);
                    }
                }
                EdgeKind::Net | EdgeKind::Combinational => stack.push(edge.to.clone()),
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::graph::testutil::chain_circuit;
    use crate::timing::analyze_timing;

    #[test]
    fn chain_assigns_increasing_stages() {
        let circuit = chain_circuit();
        let graph = CircuitGraph::build(&circuit);
        let timing = analyze_timing(&circuit, &graph);
        let map = pipeline_map(&circuit, &graph, &timing);

        assert_eq!(map.stage_of(&"r1".into()), Some(0));
        assert_eq!(map.stage_of(&"r2".into()), Some(1));
        assert_eq!(map.stage_count(), 2);

        assert_eq!(map.segments.len(), 1);
        assert_eq!(map.segments[0].from, ComponentId::from("r1"));
        assert_eq!(map.segments[0].to, ComponentId::from("r2"));
        assert_eq!(map.segments[0].depth, 1);
    }
}
