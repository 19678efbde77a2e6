// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Clock-domain map and crossing report.
//!
//! Every sequential component is assigned a domain id derived from its
//! `clock` property (registers without one share the anonymous domain "").
//! A clock-domain crossing is any combinational reachability from a register
//! in one domain to a register in another; each is recorded with a hazard
//! category. Crossings that land on a [`Synchronizer`] are reported as
//! synchronized - legal, but still visible to the retiming engine, which
//! treats synchronizers as fences.
//!
//! [`Synchronizer`]: voltaic_circuit::ComponentClass::Synchronizer

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use voltaic_circuit::{Circuit, ComponentClass, ComponentId, PinId};

use crate::graph::{CircuitGraph, EdgeKind};

/// Hazard classification of one crossing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdcHazard {
    /// Lands on a synchronizer; safe by construction.
    Synchronized,
    /// Single-bit crossing with no synchronizer.
    Unsynchronized,
    /// Multi-bit crossing with no synchronizer (gray-coding territory).
    UnsynchronizedMultiBit,
}

/// One producer→consumer crossing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CdcCrossing {
    /// Producing sequential component.
    pub from: ComponentId,
    /// Consuming sequential component.
    pub to: ComponentId,
    /// Producer's domain id.
    pub from_domain: u32,
    /// Consumer's domain id.
    pub to_domain: u32,
    /// Hazard category.
    pub hazard: CdcHazard,
}

/// Clock-domain assignment plus all discovered crossings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdcReport {
    /// Clock name → domain id, in clock-name order.
    pub domains: BTreeMap<String, u32>,
    /// Sequential component → domain id.
    pub register_domains: BTreeMap<ComponentId, u32>,
    /// All crossings, sorted.
    pub crossings: Vec<CdcCrossing>,
}

impl CdcReport {
    /// Domain id of `component`, when sequential.
    #[must_use]
    pub fn domain_of(&self, component: &ComponentId) -> Option<u32> {
        self.register_domains.get(component).copied()
    }

    /// Whether any combinational edge between the two components crosses
    /// domains.
    #[must_use]
    pub fn crosses(&self, from: &ComponentId, to: &ComponentId) -> bool {
        self.crossings
            .iter()
            .any(|c| &c.from == from && &c.to == to)
    }
}

/// Builds the clock-domain map and crossing report for `circuit`.
#[must_use]
pub fn clock_domain_map(circuit: &Circuit, graph: &CircuitGraph) -> CdcReport {
    // Domain ids in sorted clock-name order, so equal circuits always get
    // equal ids.
    let mut clock_names: BTreeSet<String> = BTreeSet::new();
    for component in circuit.components() {
        if component.class.is_sequential() {
            let clock = component
                .properties
                .get("clock")
                .and_then(|v| v.as_text())
                .unwrap_or("");
            clock_names.insert(clock.to_owned());
        }
    }
    let domains: BTreeMap<String, u32> = clock_names
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name, u32::try_from(i).unwrap_or(u32::MAX)))
        .collect();

    let mut register_domains: BTreeMap<ComponentId, u32> = BTreeMap::new();
    for component in circuit.components() {
        if component.class.is_sequential() {
            let clock = component
                .properties
                .get("clock")
                .and_then(|v| v.as_text())
                .unwrap_or("");
            if let Some(id) = domains.get(clock) {
                register_domains.insert(component.id.clone(), *id);
            }
        }
    }

    // Crossings: comb-reachability from each sequential output to sequential
    // inputs in another domain.
    let mut crossings = BTreeSet::new();
    for (producer, from_domain) in &register_domains {
        let Some(component) = circuit.component(producer) else {
            continue;
        };
        for pin_id in &component.pins {
            let Some(pin) = circuit.pin(pin_id) else {
                continue;
            };
            if !matches!(pin.direction, voltaic_circuit::PinDirection::Output) {
                continue;
            }
            let reached = comb_reachable_registers(circuit, graph, &pin.id);
            for (consumer, via_width) in reached {
                let Some(to_domain) = register_domains.get(&consumer) else {
                    continue;
                };
                if to_domain == from_domain {
                    continue;
                }
                let consumer_class = circuit.component(&consumer).map(|c| c.class.clone());
                let hazard = if matches!(consumer_class, Some(ComponentClass::Synchronizer)) {
                    CdcHazard::Synchronized
                } else if via_width > 1 {
                    CdcHazard::UnsynchronizedMultiBit
                } else {
                    CdcHazard::Unsynchronized
                };
                crossings.insert(CdcCrossing {
                    from: producer.clone(),
                    to: consumer,
                    from_domain: *from_domain,
                    to_domain: *to_domain,
                    hazard,
                });
            }
        }
    }

    CdcReport {
        domains,
        register_domains,
        crossings: crossings.into_iter().collect(),
    }
}

/// Sequential components reachable from `start` over non-sequential edges,
/// with the widest pin seen on the way in.
fn comb_reachable_registers(
    circuit: &Circuit,
    graph: &CircuitGraph,
    start: &PinId,
) -> Vec<(ComponentId, u8)> {
    let mut seen: BTreeSet<PinId> = BTreeSet::new();
    let mut stack = vec![(start.clone(), circuit.pin(start).map_or(1, |p| p.width))];
    let mut found = Vec::new();
    while let Some((pin_id, width)) = stack.pop() {
        if !seen.insert(pin_id.clone()) {
            continue;
        }
        for edge in graph.edges_from(&pin_id) {
            let next_width = circuit.pin(&edge.to).map_or(width, |p| p.width.max(width));
            match edge.kind {
                EdgeKind::Sequential => {
                    if let Some(component) = edge.through.clone() {
                        found.push((component, next_width));
                    }
                }
                EdgeKind::Net | EdgeKind::Combinational => {
                    stack.push((edge.to.clone(), next_width));
                }
            }
        }
    }
    found.sort();
    found.dedup();
    found
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::graph::testutil::chain_circuit;
    use voltaic_circuit::{EditOperation, PropertyValue};

    #[test]
    fn chain_with_two_clocks_reports_one_unsynchronized_crossing() {
        let circuit = chain_circuit();
        let graph = CircuitGraph::build(&circuit);
        let report = clock_domain_map(&circuit, &graph);

        assert_eq!(report.domains.len(), 2);
        assert_eq!(report.crossings.len(), 1);
        let crossing = &report.crossings[0];
        assert_eq!(crossing.from, ComponentId::from("r1"));
        assert_eq!(crossing.to, ComponentId::from("r2"));
        assert_eq!(crossing.hazard, CdcHazard::Unsynchronized);
        assert!(report.crosses(&"r1".into(), &"r2".into()));
    }

    #[test]
    fn same_clock_everywhere_means_no_crossings() {
        let mut circuit = chain_circuit();
        circuit
            .apply(EditOperation::SetProperty {
                component: "r2".into(),
                name: "clock".into(),
                value: PropertyValue::Text("clk_a".into()),
            })
            .unwrap();
        let graph = CircuitGraph::build(&circuit);
        let report = clock_domain_map(&circuit, &graph);
        assert_eq!(report.domains.len(), 1);
        assert!(report.crossings.is_empty());
    }

    #[test]
    fn domain_ids_are_stable_across_rebuilds() {
        let circuit = chain_circuit();
        let graph = CircuitGraph::build(&circuit);
        let a = clock_domain_map(&circuit, &graph);
        let b = clock_domain_map(&circuit, &graph);
        assert_eq!(a, b);
    }
}
