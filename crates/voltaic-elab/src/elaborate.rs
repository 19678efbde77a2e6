// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Circuit → machine elaboration.

use std::collections::BTreeMap;

use thiserror::Error;
use voltaic_circuit::{Circuit, ComponentClass, ComponentId, PinDirection, PinId};
use voltaic_kernel::analog::{DcSource, RcLowPass};
use voltaic_kernel::parts::{
    AndGate, Buffer, Constant, NotGate, OrGate, Probe, RegisterBit, XorGate,
};
use voltaic_kernel::{
    Board, Endpoint, KernelConfig, LinkError, Machine, Node, NodeBehavior, NodeIndex,
};

/// Elaboration failure.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ElabError {
    /// Custom classes have no kernel behavior to instantiate.
    #[error("component {0} has class with no kernel behavior")]
    UnsupportedClass(ComponentId),

    /// A circuit pin has no counterpart connector on the kernel part.
    #[error("pin {0} has no kernel connector")]
    MissingConnector(PinId),

    /// A net carries more than one driver.
    #[error("net {0} has multiple drivers")]
    MultipleDrivers(String),

    /// Wiring was rejected by the board.
    #[error("link rejected: {0}")]
    Link(#[from] LinkError),
}

/// A live machine plus the component → node mapping that produced it.
#[derive(Debug)]
pub struct Elaboration {
    /// The elaborated machine (one board).
    pub machine: Machine,
    /// Component id → node index on board 0.
    pub nodes: BTreeMap<ComponentId, NodeIndex>,
}

fn behavior_for(
    component: &voltaic_circuit::Component,
    config: &KernelConfig,
) -> Result<NodeBehavior, ElabError> {
    let int_prop = |name: &str, default: i64| {
        component
            .properties
            .get(name)
            .and_then(voltaic_circuit::PropertyValue::as_int)
            .unwrap_or(default)
    };
    let float_prop = |name: &str, default: f64| match component.properties.get(name) {
        Some(voltaic_circuit::PropertyValue::Float(v)) => *v,
        _ => default,
    };

    Ok(match &component.class {
        ComponentClass::Constant => {
            let width = u8::try_from(int_prop("width", 1)).unwrap_or(1);
            let value = u64::try_from(int_prop("value", 0)).unwrap_or(0);
            NodeBehavior::Constant(Constant::new(value, width))
        }
        ComponentClass::Buffer => NodeBehavior::Buffer(Buffer::new()),
        ComponentClass::Not => NodeBehavior::Not(NotGate::new()),
        ComponentClass::And => NodeBehavior::And(AndGate::new()),
        ComponentClass::Or => NodeBehavior::Or(OrGate::new()),
        ComponentClass::Xor => NodeBehavior::Xor(XorGate::new()),
        // A synchronizer elaborates as a single latch stage; its stage count
        // matters to the analyzer and retiming fences, not to the kernel's
        // one-tick-per-node semantics.
        ComponentClass::Register | ComponentClass::Synchronizer => {
            NodeBehavior::Register(RegisterBit::new())
        }
        ComponentClass::Probe => NodeBehavior::Probe(Probe::new()),
        ComponentClass::DcSource => NodeBehavior::DcSource(DcSource::new(float_prop("level", 0.0))),
        ComponentClass::RcLowPass => NodeBehavior::RcLowPass(RcLowPass::new(
            float_prop("rc", 1e-3),
            config.sample_period(),
        )),
        ComponentClass::Custom(_) => return Err(ElabError::UnsupportedClass(component.id.clone())),
    })
}

/// Elaborates `circuit` into a single-board machine.
pub fn elaborate(circuit: &Circuit, config: &KernelConfig) -> Result<Elaboration, ElabError> {
    let mut board = Board::new("main");
    let mut nodes: BTreeMap<ComponentId, NodeIndex> = BTreeMap::new();

    // Components in id order.
    for component in circuit.components() {
        let behavior = behavior_for(component, config)?;
        let idx = board.add_node(Node::new(component.id.as_str(), behavior));
        nodes.insert(component.id.clone(), idx);
    }

    // Synchronizer pins are named d/q; the kernel register shares those
    // names, so pin-name lookup below covers every built-in class.
    for net in circuit.nets() {
        let mut driver: Option<&voltaic_circuit::Pin> = None;
        let mut sinks: Vec<&voltaic_circuit::Pin> = Vec::new();
        for pin_id in &net.pins {
            let Some(pin) = circuit.pin(pin_id) else {
                continue;
            };
            match pin.direction {
                PinDirection::Output => {
                    if driver.is_some() {
                        return Err(ElabError::MultipleDrivers(net.id.as_str().to_owned()));
                    }
                    driver = Some(pin);
                }
                PinDirection::Input | PinDirection::Bidirectional => sinks.push(pin),
            }
        }
        let Some(driver) = driver else {
            continue; // undriven net: latches keep their reset state
        };
        let from = endpoint(&board, &nodes, driver)?;
        for sink in sinks {
            let to = endpoint(&board, &nodes, sink)?;
            board.link(from, to)?;
        }
    }

    let mut machine = Machine::new();
    machine.add_board(board);
    Ok(Elaboration { machine, nodes })
}

fn endpoint(
    board: &Board,
    nodes: &BTreeMap<ComponentId, NodeIndex>,
    pin: &voltaic_circuit::Pin,
) -> Result<Endpoint, ElabError> {
    let node = nodes
        .get(&pin.component)
        .copied()
        .ok_or_else(|| ElabError::MissingConnector(pin.id.clone()))?;
    let conn = board
        .node(node)
        .and_then(|n| n.connector_named(&pin.name))
        .ok_or_else(|| ElabError::MissingConnector(pin.id.clone()))?;
    Ok(Endpoint { node, conn })
}
