// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Timing paths: longest combinational stretches between register
//! boundaries.
//!
//! Depth is the count of combinational component hops on a path. Paths start
//! at a sequential component's outputs (or at a pure source such as a
//! constant) and end at a sequential component's inputs. Sequential edges
//! are never traversed, so every path models one clock cycle of work.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use voltaic_circuit::{Circuit, ComponentId, PinId};

use crate::graph::{CircuitGraph, EdgeKind};

/// Safety valve against path explosion on pathological fan-out.
const MAX_PATHS: usize = 1024;

/// One register-to-register combinational path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingPath {
    /// Pin the path launches from.
    pub start: PinId,
    /// Pin the path captures at.
    pub end: PinId,
    /// Combinational hops (components traversed).
    pub depth: u32,
    /// Combinational components on the path, in traversal order.
    pub through: Vec<ComponentId>,
}

/// Full timing report, critical paths first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingAnalysis {
    /// Every discovered path, deepest first (ties broken by pin ids).
    pub paths: Vec<TimingPath>,
    /// Depth of the critical path (0 when no paths exist).
    pub max_depth: u32,
}

impl TimingAnalysis {
    /// Paths at the critical depth.
    #[must_use]
    pub fn critical_paths(&self) -> Vec<&TimingPath> {
        self.paths
            .iter()
            .filter(|p| p.depth == self.max_depth)
            .collect()
    }

    /// Deepest path launching from any pin of `component`, if one exists.
    #[must_use]
    pub fn max_depth_from(&self, component: &ComponentId) -> Option<u32> {
        self.paths
            .iter()
            .filter(|p| {
                p.start
                    .as_str()
                    .split('.')
                    .next()
                    .is_some_and(|c| c == component.as_str())
            })
            .map(|p| p.depth)
            .max()
    }
}

/// Discovers register-to-register combinational paths in `circuit`.
#[must_use]
pub fn analyze_timing(circuit: &Circuit, graph: &CircuitGraph) -> TimingAnalysis {
    let launch_pins: Vec<PinId> = launch_points(circuit);
    let capture_pins: BTreeSet<PinId> = capture_points(circuit);

    let mut paths = Vec::new();
    for start in &launch_pins {
        let mut on_path = BTreeSet::new();
        let mut through = Vec::new();
        walk(
            graph,
            start,
            start,
            &capture_pins,
            &mut on_path,
            &mut through,
            &mut paths,
        );
        if paths.len() >= MAX_PATHS {
            break;
        }
    }

    paths.sort_by(|a, b| {
        b.depth
            .cmp(&a.depth)
            .then_with(|| a.start.cmp(&b.start))
            .then_with(|| a.end.cmp(&b.end))
    });
    let max_depth = paths.first().map_or(0, |p| p.depth);
    TimingAnalysis { paths, max_depth }
}

fn launch_points(circuit: &Circuit) -> Vec<PinId> {
    let mut pins = Vec::new();
    for component in circuit.components() {
        let has_inputs = component.pins.iter().filter_map(|p| circuit.pin(p)).any(|p| {
            matches!(
                p.direction,
                voltaic_circuit::PinDirection::Input | voltaic_circuit::PinDirection::Bidirectional
            )
        });
        // Launch from sequential outputs and from pure sources.
        if component.class.is_sequential() || !has_inputs {
            for pin_id in &component.pins {
                if let Some(pin) = circuit.pin(pin_id) {
                    if matches!(pin.direction, voltaic_circuit::PinDirection::Output) {
                        pins.push(pin.id.clone());
                    }
                }
            }
        }
    }
    pins.sort();
    pins
}

fn capture_points(circuit: &Circuit) -> BTreeSet<PinId> {
    let mut pins = BTreeSet::new();
    for component in circuit.components() {
        if component.class.is_sequential() {
            for pin_id in &component.pins {
                if let Some(pin) = circuit.pin(pin_id) {
                    if matches!(pin.direction, voltaic_circuit::PinDirection::Input) {
                        pins.insert(pin.id.clone());
                    }
                }
            }
        }
    }
    pins
}

#[allow(clippy::too_many_arguments)]
fn walk(
    graph: &CircuitGraph,
    start: &PinId,
    at: &PinId,
    captures: &BTreeSet<PinId>,
    on_path: &mut BTreeSet<PinId>,
    through: &mut Vec<ComponentId>,
    paths: &mut Vec<TimingPath>,
) {
    if paths.len() >= MAX_PATHS {
        return;
    }
    if at != start && captures.contains(at) {
        paths.push(TimingPath {
            start: start.clone(),
            end: at.clone(),
            depth: u32::try_from(through.len()).unwrap_or(u32::MAX),
            through: through.clone(),
        });
        return;
    }
    if !on_path.insert(at.clone()) {
        return; // combinational cycle; the loop detector owns this case
    }
    for edge in graph.edges_from(at) {
        match edge.kind {
            EdgeKind::Sequential => continue,
            EdgeKind::Net => {
                walk(graph, start, &edge.to, captures, on_path, through, paths);
            }
            EdgeKind::Combinational => {
                let comp = edge.through.clone();
                if let Some(c) = comp {
                    through.push(c);
                    walk(graph, start, &edge.to, captures, on_path, through, paths);
                    through.pop();
                }
            }
        }
    }
    on_path.remove(at);
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::graph::testutil::chain_circuit;

    #[test]
    fn chain_has_a_depth_one_and_a_zero_depth_segment() {
        let circuit = chain_circuit();
        let graph = CircuitGraph::build(&circuit);
        let timing = analyze_timing(&circuit, &graph);

        // k -> inv -> r1 launches at k.out, captures at r1.d, depth 1 (inv).
        let to_r1 = timing
            .paths
            .iter()
            .find(|p| p.end == PinId::from("r1.d"))
            .unwrap();
        assert_eq!(to_r1.depth, 1);
        assert_eq!(to_r1.through, vec!["inv".into()]);

        // r1 -> buf -> r2 has depth 1 (buf).
        let to_r2 = timing
            .paths
            .iter()
            .find(|p| p.end == PinId::from("r2.d"))
            .unwrap();
        assert_eq!(to_r2.start, PinId::from("r1.q"));
        assert_eq!(to_r2.depth, 1);
        assert_eq!(timing.max_depth, 1);
    }

    #[test]
    fn critical_paths_are_sorted_first() {
        let circuit = chain_circuit();
        let graph = CircuitGraph::build(&circuit);
        let timing = analyze_timing(&circuit, &graph);
        let critical = timing.critical_paths();
        assert!(!critical.is_empty());
        assert!(critical.iter().all(|p| p.depth == timing.max_depth));
        assert!(timing.paths.windows(2).all(|w| w[0].depth >= w[1].depth));
    }
}
