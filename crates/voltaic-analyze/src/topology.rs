// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Topology lints.

use serde::{Deserialize, Serialize};
use voltaic_circuit::{Circuit, ComponentId, NetId, PinDirection, PinId};

/// Width disagreement within one net.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WidthMismatch {
    /// The offending net.
    pub net: NetId,
    /// Distinct widths found, ascending.
    pub widths: Vec<u8>,
}

/// Structural lint results; all lists sorted for determinism.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyReport {
    /// Pins attached to no net.
    pub dangling_pins: Vec<PinId>,
    /// Nets carrying more than one output-direction pin.
    pub shorted_nets: Vec<NetId>,
    /// Nets whose pins disagree on width.
    pub width_mismatches: Vec<WidthMismatch>,
    /// Components none of whose pins touch a net.
    pub unreachable_components: Vec<ComponentId>,
}

impl TopologyReport {
    /// True when no lint fired.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.dangling_pins.is_empty()
            && self.shorted_nets.is_empty()
            && self.width_mismatches.is_empty()
            && self.unreachable_components.is_empty()
    }
}

/// Runs all topology lints over `circuit`.
#[must_use]
pub fn lint_topology(circuit: &Circuit) -> TopologyReport {
    let mut report = TopologyReport::default();

    for pin in circuit.pins() {
        if pin.net.is_none() {
            report.dangling_pins.push(pin.id.clone());
        }
    }

    for net in circuit.nets() {
        let drivers = net
            .pins
            .iter()
            .filter_map(|id| circuit.pin(id))
            .filter(|p| matches!(p.direction, PinDirection::Output))
            .count();
        if drivers > 1 {
            report.shorted_nets.push(net.id.clone());
        }

        let mut widths: Vec<u8> = net
            .pins
            .iter()
            .filter_map(|id| circuit.pin(id))
            .map(|p| p.width)
            .collect();
        widths.sort_unstable();
        widths.dedup();
        if widths.len() > 1 {
            report.width_mismatches.push(WidthMismatch {
                net: net.id.clone(),
                widths,
            });
        }
    }

    for component in circuit.components() {
        let connected = component
            .pins
            .iter()
            .filter_map(|id| circuit.pin(id))
            .any(|p| p.net.is_some());
        if !connected {
            report.unreachable_components.push(component.id.clone());
        }
    }

    // Iteration above is already id-ordered; keep the contract explicit.
    report.dangling_pins.sort();
    report.shorted_nets.sort();
    report.unreachable_components.sort();
    report
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::graph::testutil::chain_circuit;
    use voltaic_circuit::{ComponentClass, EditOperation};

    #[test]
    fn clean_chain_flags_only_unwired_control_pins() {
        let circuit = chain_circuit();
        let report = lint_topology(&circuit);
        // The register en/clr pins are deliberately unwired in the fixture.
        assert!(report.dangling_pins.contains(&"r1.en".into()));
        assert!(report.shorted_nets.is_empty());
        assert!(report.width_mismatches.is_empty());
        assert!(report.unreachable_components.is_empty());
    }

    #[test]
    fn isolated_component_is_unreachable() {
        let mut circuit = chain_circuit();
        circuit
            .apply(EditOperation::AddComponent {
                id: "orphan".into(),
                class: ComponentClass::And,
                properties: std::collections::BTreeMap::new(),
                custom_pins: Vec::new(),
            })
            .unwrap();
        let report = lint_topology(&circuit);
        assert_eq!(report.unreachable_components, vec!["orphan".into()]);
    }
}
