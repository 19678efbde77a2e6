// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Pin-level directed graph over the circuit model.
//!
//! Nodes are pins. Three edge kinds:
//! - `Net`: source pin → sink pin along a net.
//! - `Combinational`: input pin → output pin inside a combinational
//!   component.
//! - `Sequential`: input pin → output pin across a register boundary, with a
//!   unit delay.
//!
//! Adjacency is stored in BTree maps so every traversal is deterministic.

use std::collections::BTreeMap;

use voltaic_circuit::{Circuit, ComponentId, Pin, PinDirection, PinId};

/// Kind of a graph edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EdgeKind {
    /// Along a net, driver to sink.
    Net,
    /// Through a combinational component.
    Combinational,
    /// Across a register boundary (unit delay).
    Sequential,
}

/// One directed edge.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct GraphEdge {
    /// Destination pin.
    pub to: PinId,
    /// Edge kind.
    pub kind: EdgeKind,
    /// Component traversed for internal edges; `None` for net edges.
    pub through: Option<ComponentId>,
}

/// Directed pin graph with deterministic adjacency.
#[derive(Debug, Clone, Default)]
pub struct CircuitGraph {
    adjacency: BTreeMap<PinId, Vec<GraphEdge>>,
}

impl CircuitGraph {
    /// Builds the pin graph for `circuit`.
    #[must_use]
    pub fn build(circuit: &Circuit) -> Self {
        let mut adjacency: BTreeMap<PinId, Vec<GraphEdge>> = BTreeMap::new();

        // Net edges: every driving pin to every latching pin on the net.
        for net in circuit.nets() {
            let pins: Vec<&Pin> = net
                .pins
                .iter()
                .filter_map(|id| circuit.pin(id))
                .collect();
            for from in &pins {
                if !drives(from.direction) {
                    continue;
                }
                for to in &pins {
                    if from.id == to.id || !latches(to.direction) {
                        continue;
                    }
                    adjacency.entry(from.id.clone()).or_default().push(GraphEdge {
                        to: to.id.clone(),
                        kind: EdgeKind::Net,
                        through: None,
                    });
                }
            }
        }

        // Internal edges: inputs to outputs, combinational or sequential per
        // the component class.
        for component in circuit.components() {
            let kind = if component.class.is_sequential() {
                EdgeKind::Sequential
            } else {
                EdgeKind::Combinational
            };
            let inputs: Vec<&Pin> = component
                .pins
                .iter()
                .filter_map(|id| circuit.pin(id))
                .filter(|p| latches(p.direction))
                .collect();
            let outputs: Vec<&Pin> = component
                .pins
                .iter()
                .filter_map(|id| circuit.pin(id))
                .filter(|p| drives(p.direction))
                .collect();
            for i in &inputs {
                for o in &outputs {
                    adjacency.entry(i.id.clone()).or_default().push(GraphEdge {
                        to: o.id.clone(),
                        kind,
                        through: Some(component.id.clone()),
                    });
                }
            }
        }

        for edges in adjacency.values_mut() {
            edges.sort();
            edges.dedup();
        }
        Self { adjacency }
    }

    /// Outbound edges of `pin`, deterministically ordered.
    #[must_use]
    pub fn edges_from(&self, pin: &PinId) -> &[GraphEdge] {
        self.adjacency.get(pin).map_or(&[], Vec::as_slice)
    }

    /// All pins that have outbound edges, in id order.
    pub fn sources(&self) -> impl Iterator<Item = &PinId> {
        self.adjacency.keys()
    }
}

fn drives(direction: PinDirection) -> bool {
    matches!(direction, PinDirection::Output | PinDirection::Bidirectional)
}

fn latches(direction: PinDirection) -> bool {
    matches!(direction, PinDirection::Input | PinDirection::Bidirectional)
}

#[cfg(test)]
pub(crate) mod testutil {
    #![allow(clippy::unwrap_used)]

    use voltaic_circuit::{Circuit, ComponentClass, EditOperation, PropertyValue};

    /// `const -> not -> reg(clk a) -> buf -> reg(clk b)` with clock names.
    pub(crate) fn chain_circuit() -> Circuit {
        let mut c = Circuit::new();
        let add = |c: &mut Circuit, id: &str, class: ComponentClass| {
            c.apply(EditOperation::AddComponent {
                id: id.into(),
                class,
                properties: std::collections::BTreeMap::new(),
                custom_pins: Vec::new(),
            })
            .unwrap();
        };
        add(&mut c, "k", ComponentClass::Constant);
        add(&mut c, "inv", ComponentClass::Not);
        add(&mut c, "r1", ComponentClass::Register);
        add(&mut c, "buf", ComponentClass::Buffer);
        add(&mut c, "r2", ComponentClass::Register);
        for (comp, clock) in [("r1", "clk_a"), ("r2", "clk_b")] {
            c.apply(EditOperation::SetProperty {
                component: comp.into(),
                name: "clock".into(),
                value: PropertyValue::Text(clock.into()),
            })
            .unwrap();
        }
        for (a, b) in [
            ("k.out", "inv.in"),
            ("inv.out", "r1.d"),
            ("r1.q", "buf.in"),
            ("buf.out", "r2.d"),
        ] {
            c.apply(EditOperation::Connect {
                a: a.into(),
                b: b.into(),
            })
            .unwrap();
        }
        c
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::testutil::chain_circuit;
    use super::*;

    #[test]
    fn net_and_internal_edges_coexist() {
        let circuit = chain_circuit();
        let graph = CircuitGraph::build(&circuit);

        let from_k: Vec<_> = graph.edges_from(&"k.out".into()).to_vec();
        assert_eq!(from_k.len(), 1);
        assert_eq!(from_k[0].kind, EdgeKind::Net);
        assert_eq!(from_k[0].to, PinId::from("inv.in"));

        let through_inv: Vec<_> = graph.edges_from(&"inv.in".into()).to_vec();
        assert_eq!(through_inv.len(), 1);
        assert_eq!(through_inv[0].kind, EdgeKind::Combinational);

        let through_r1: Vec<_> = graph.edges_from(&"r1.d".into()).to_vec();
        assert_eq!(through_r1.len(), 1);
        assert_eq!(through_r1[0].kind, EdgeKind::Sequential);
    }

    #[test]
    fn build_is_deterministic() {
        let circuit = chain_circuit();
        let a = CircuitGraph::build(&circuit);
        let b = CircuitGraph::build(&circuit);
        let pins_a: Vec<_> = a.sources().cloned().collect();
        let pins_b: Vec<_> = b.sources().cloned().collect();
        assert_eq!(pins_a, pins_b);
        for pin in &pins_a {
            assert_eq!(a.edges_from(pin), b.edges_from(pin));
        }
    }
}
